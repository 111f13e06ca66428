use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{app_user, data_group, data_source};

// ---------- auth ----------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, Clone)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub is_active: bool,
    /// Whether a master password has been chosen.
    pub master_password_set: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<app_user::Model> for UserResponse {
    fn from(m: app_user::Model) -> Self {
        Self {
            id: m.id,
            username: m.username,
            is_active: m.is_active,
            master_password_set: m.masterpass_check.is_some(),
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MasterPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MasterPasswordStatus {
    /// The key is unlocked for this process.
    pub present: bool,
    /// A master password has been recorded.
    pub is_set: bool,
}

// ---------- data groups ----------

#[derive(Debug, Serialize)]
pub struct DataGroupSummary {
    pub id: i32,
    pub name: String,
    pub can_delete: bool,
}

impl From<data_group::Model> for DataGroupSummary {
    fn from(m: data_group::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            can_delete: m.can_delete,
        }
    }
}

// ---------- data sources ----------

#[derive(Debug, Serialize)]
pub struct DataSourceSummary {
    pub id: i32,
    pub name: String,
    #[serde(rename = "group-id")]
    pub group_id: i32,
    #[serde(rename = "group-name")]
    pub group_name: String,
    pub datasource_type: String,
}

impl DataSourceSummary {
    pub fn new(ds: data_source::Model, group_name: &str) -> Self {
        Self {
            id: ds.id,
            name: ds.name,
            group_id: ds.datagroup_id,
            group_name: group_name.to_string(),
            datasource_type: ds.ds_type,
        }
    }
}

/// Full property sheet. Secrets are never echoed; only whether one is saved.
#[derive(Debug, Serialize)]
pub struct DataSourceProperties {
    pub id: i32,
    pub name: String,
    pub gid: i32,
    pub ds_type: String,
    pub pattern: Option<String>,
    pub prefix: Option<String>,
    pub bgcolor: Option<String>,
    pub fgcolor: Option<String>,
    pub is_secret_saved: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<data_source::Model> for DataSourceProperties {
    fn from(m: data_source::Model) -> Self {
        Self {
            is_secret_saved: m.has_saved_secret(),
            id: m.id,
            name: m.name,
            gid: m.datagroup_id,
            ds_type: m.ds_type,
            pattern: m.pattern,
            prefix: m.prefix,
            bgcolor: m.bgcolor,
            fgcolor: m.fgcolor,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

// ---------- buckets & objects ----------

#[derive(Debug, Serialize)]
pub struct BucketSummaryResponse {
    pub name: String,
    pub creationdate: Option<DateTime<Utc>>,
    pub dataowner: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirObjSummary {
    pub key: String,
    pub name: String,
    pub do_type: &'static str,
    pub size: i64,
    pub mtime: Option<DateTime<Utc>>,
}
