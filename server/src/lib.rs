//! DataBrowser - S3 data source browser
//!
//! This library provides the core components for the DataBrowser server:
//! the credential vault, object storage sessions, the browser REST API and
//! table import/export jobs.

pub mod auth;
pub mod browser;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod import_export;
pub mod storage;
pub mod vault;
