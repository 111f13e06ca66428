pub mod app_user;
pub mod data_group;
pub mod data_source;
