//! Runtime settings, read from `DBR_*` environment variables (a `.env` file is honoured).

use std::path::PathBuf;

use crate::storage::StorageConfig;

const PREFIX: &str = "DBR_";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("DBR_{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,
    /// `None` means a random secret per process.
    pub jwt_secret: Option<String>,
    pub jwt_expiry_hours: u64,
    /// Permit persisting data source secrets when a request asks for it.
    pub allow_save_secret: bool,
    pub cors_allowed_origins: Vec<String>,
    pub static_dir: PathBuf,
    pub storage: StorageConfig,
    /// `psql` binary for direct table copies.
    pub psql_path: PathBuf,
    /// Bulk loader binary for S3-backed copies.
    pub loader_path: PathBuf,
    pub admin_user: String,
    pub admin_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://databrowser.db?mode=rwc".to_string(),
            bind_addr: "127.0.0.1:5050".to_string(),
            jwt_secret: None,
            jwt_expiry_hours: 24,
            allow_save_secret: true,
            cors_allowed_origins: Vec::new(),
            static_dir: PathBuf::from("/usr/local/share/databrowser-ui"),
            storage: StorageConfig::default(),
            psql_path: PathBuf::from("psql"),
            loader_path: PathBuf::from("dbx-pload"),
            admin_user: "admin".to_string(),
            admin_password: None,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SettingsError::Invalid {
            key,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(format!("{PREFIX}{key}")).ok())
    }

    /// Build settings from a key lookup (keys without the `DBR_` prefix).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut s = Settings::default();

        if let Some(v) = get("DATABASE_URL") {
            s.database_url = v;
        }
        if let Some(v) = get("BIND_ADDR") {
            s.bind_addr = v;
        }
        s.jwt_secret = get("JWT_SECRET").filter(|v| !v.is_empty());
        if let Some(v) = get("JWT_EXPIRY_HOURS") {
            s.jwt_expiry_hours = v.parse().map_err(|e| SettingsError::Invalid {
                key: "JWT_EXPIRY_HOURS",
                reason: format!("{e}"),
            })?;
        }
        if let Some(v) = get("ALLOW_SAVE_SECRET") {
            s.allow_save_secret = parse_bool("ALLOW_SAVE_SECRET", &v)?;
        }
        if let Some(v) = get("CORS_ALLOWED_ORIGINS") {
            s.cors_allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("STATIC_DIR") {
            s.static_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PSQL_PATH") {
            s.psql_path = PathBuf::from(v);
        }
        if let Some(v) = get("LOADER_PATH") {
            s.loader_path = PathBuf::from(v);
        }
        if let Some(v) = get("ADMIN_USER") {
            s.admin_user = v;
        }
        s.admin_password = get("ADMIN_PASSWORD").filter(|v| !v.is_empty());

        s.storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("aws") {
            "memory" => StorageConfig::Memory,
            "aws" | "s3" => StorageConfig::Aws {
                endpoint: get("S3_ENDPOINT").filter(|v| !v.is_empty()),
                region: get("S3_REGION").filter(|v| !v.is_empty()),
                force_path_style: get("S3_FORCE_PATH_STYLE")
                    .map(|v| parse_bool("S3_FORCE_PATH_STYLE", &v))
                    .transpose()?
                    .unwrap_or(false),
            },
            other => {
                return Err(SettingsError::Invalid {
                    key: "STORAGE_BACKEND",
                    reason: format!("unknown backend {other:?} (expected aws or memory)"),
                });
            }
        };

        Ok(s)
    }
}
