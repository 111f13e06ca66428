//! Object storage backend abstraction (AWS S3 or an in-memory store).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod aws;
pub mod memory;
pub mod paths;
pub mod session;

pub use aws::AwsStorageFactory;
pub use memory::MemoryStorage;
pub use session::{S3Session, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Any other SDK or transport failure.
    #[error("{0}")]
    Service(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Plaintext key pair for one storage connection. Never persisted in this form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key_name: String,
    pub key_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_name", &self.key_name)
            .field("key_secret", &"****")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct BucketListing {
    pub buckets: Vec<BucketSummary>,
    /// Display name of the account that owns the buckets.
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AclOwner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Grantee {
    #[serde(rename = "Type")]
    pub grantee_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "URI", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Grant {
    pub grantee: Option<Grantee>,
    pub permission: Option<String>,
}

/// Bucket or object ACL, serialized in the same shape S3 returns it.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AccessControlPolicy {
    pub owner: Option<AclOwner>,
    pub grants: Vec<Grant>,
}

/// A connected storage client.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_buckets(&self) -> Result<BucketListing>;

    /// Every object under `prefix`, across all result pages.
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectSummary>>;

    async fn bucket_acl(&self, bucket: &str) -> Result<AccessControlPolicy>;

    async fn object_acl(&self, bucket: &str, key: &str) -> Result<AccessControlPolicy>;

    /// Object metadata; a missing object is `StorageError::NotFound`.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary>;
}

/// Builds storage clients, optionally bound to a data source's key pair.
/// `None` means the ambient credential chain.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn connect(&self, credentials: Option<&Credentials>) -> Result<Arc<dyn ObjectStorage>>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-memory store, empty at startup.
    Memory,
    /// AWS S3 or an S3-compatible endpoint (MinIO etc.).
    Aws {
        endpoint: Option<String>,
        region: Option<String>,
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Aws {
            endpoint: None,
            region: None,
            force_path_style: false,
        }
    }
}

/// Factory function: pick the storage backend for a configuration.
pub fn create_factory(config: &StorageConfig) -> Arc<dyn StorageFactory> {
    match config {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::Aws {
            endpoint,
            region,
            force_path_style,
        } => Arc::new(AwsStorageFactory::new(
            endpoint.clone(),
            region.clone(),
            *force_path_style,
        )),
    }
}
