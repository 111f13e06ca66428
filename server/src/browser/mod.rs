use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::response::SetResponseHeaderLayer;

use crate::auth::Auth;
use crate::config::Settings;
use crate::import_export::{self, job::JobStore};
use crate::storage::{SessionError, StorageError, StorageFactory};
use crate::vault::{KeyRing, VaultError};

pub mod auth_handlers;
pub mod bucket_handlers;
pub mod datagroup_handlers;
pub mod datasource_handlers;
pub mod datasource_types;
pub mod dirobj_handlers;
pub mod dirobj_types;
pub mod dto;
pub mod jwt;
pub mod node;
pub mod payload;
pub mod response;
#[cfg(test)]
pub mod test_support;

// ---------- shared state ----------

#[derive(Clone)]
pub struct BrowserState {
    pub auth: Arc<Auth>,
    pub db: DatabaseConnection,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    /// Unlocked master-password keys.
    pub key_ring: Arc<KeyRing>,
    /// Builds storage clients for S3 data sources.
    pub storage: Arc<dyn StorageFactory>,
    /// Global switch for persisting data source secrets.
    pub allow_save_secret: bool,
    pub settings: Arc<Settings>,
    /// In-memory registry of import/export jobs.
    pub job_store: Arc<Mutex<JobStore>>,
}

// ---------- error type ----------

/// Transport-independent error kinds. Only [`ErrorKind::status`] knows about HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced node does not exist or belongs to another user.
    NotFound,
    /// A required request field is absent.
    MissingParameter,
    BadRequest,
    Unauthorized,
    Forbidden,
    PreconditionFailed,
    CryptKeyMissing,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound | ErrorKind::MissingParameter => StatusCode::GONE,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::PreconditionFailed => StatusCode::EXPECTATION_FAILED,
            ErrorKind::CryptKeyMissing => StatusCode::PRECONDITION_REQUIRED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An error envelope: `{"success": 0, "errormsg": "...", "status": ...}`.
#[derive(Debug)]
pub struct ApiErr {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiErr {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        tracing::error!(error = %e, "request failed");
        Self::new(ErrorKind::Internal, e.to_string())
    }

    pub fn gone(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn missing_parameter(field: &str) -> Self {
        Self::new(
            ErrorKind::MissingParameter,
            format!("Could not find the required parameter ({field})."),
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, msg)
    }

    pub fn crypt_key_missing() -> Self {
        Self::new(ErrorKind::CryptKeyMissing, VaultError::CryptKeyMissing.to_string())
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let body = serde_json::json!({
            "success": 0,
            "errormsg": self.message,
            "info": "",
            "result": null,
            "data": null,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for ApiErr {
    fn from(e: DbErr) -> Self {
        ApiErr::internal(e)
    }
}

impl From<VaultError> for ApiErr {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::CryptKeyMissing => ApiErr::crypt_key_missing(),
            VaultError::IncorrectMasterPassword => ApiErr::unauthorized(e.to_string()),
            VaultError::UserNotFound => ApiErr::gone(e.to_string()),
            VaultError::Crypto(_) | VaultError::Db(_) => ApiErr::internal(e),
        }
    }
}

impl From<StorageError> for ApiErr {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => ApiErr::gone(e.to_string()),
            StorageError::AccessDenied(_) => ApiErr::unauthorized(e.to_string()),
            StorageError::InvalidConfig(_) => ApiErr::bad_request(e.to_string()),
            StorageError::Service(_) => ApiErr::internal(e),
        }
    }
}

impl From<SessionError> for ApiErr {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::DataSourceNotFound(_) => ApiErr::gone(e.to_string()),
            // wrong master password or tampered ciphertext
            SessionError::Crypto(_) => ApiErr::unauthorized(e.to_string()),
            SessionError::Vault(v) => v.into(),
            SessionError::Db(d) => d.into(),
            SessionError::Storage(s) => s.into(),
        }
    }
}

// ---------- router ----------

pub fn browser_router(state: BrowserState) -> Router {
    let allowed_origins: Vec<HeaderValue> = state
        .settings
        .cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new() // no origins allowed = same-origin only
    } else {
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    };

    let static_dir = state.settings.static_dir.clone();

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api", api())
        .nest("/browser", browser())
        .nest("/import_export", import_export::routes())
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state)
}

fn api() -> Router<BrowserState> {
    Router::new()
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/me", get(auth_handlers::me))
        .route(
            "/master_password",
            get(auth_handlers::master_password_status)
                .post(auth_handlers::set_master_password)
                .delete(auth_handlers::reset_master_password),
        )
}

fn browser() -> Router<BrowserState> {
    Router::new()
        // data groups
        .route(
            "/data_group/obj",
            get(datagroup_handlers::list).post(datagroup_handlers::create),
        )
        .route(
            "/data_group/obj/{gid}",
            get(datagroup_handlers::properties)
                .put(datagroup_handlers::update)
                .delete(datagroup_handlers::delete),
        )
        .route("/data_group/nodes", get(datagroup_handlers::nodes))
        .route("/data_group/nodes/{gid}", get(datagroup_handlers::node))
        // data sources
        .route(
            "/datasource/supported_types",
            get(datasource_handlers::supported_types),
        )
        .route(
            "/datasource/obj/{gid}",
            get(datasource_handlers::list).post(datasource_handlers::create),
        )
        .route(
            "/datasource/obj/{gid}/{sid}",
            get(datasource_handlers::properties)
                .put(datasource_handlers::update)
                .delete(datasource_handlers::delete),
        )
        .route("/datasource/nodes/{gid}", get(datasource_handlers::nodes))
        .route(
            "/datasource/nodes/{gid}/{sid}",
            get(datasource_handlers::node),
        )
        .route(
            "/datasource/clear_saved_authentication/{gid}/{sid}",
            put(datasource_handlers::clear_saved_authentication),
        )
        .route(
            "/datasource/change_authentication/{gid}/{sid}",
            post(datasource_handlers::change_authentication),
        )
        // buckets
        .route("/bucket/obj/{gid}/{sid}", get(bucket_handlers::list))
        .route(
            "/bucket/obj/{gid}/{sid}/{bid}",
            get(bucket_handlers::properties),
        )
        .route("/bucket/nodes/{gid}/{sid}", get(bucket_handlers::nodes))
        .route("/bucket/nodes/{gid}/{sid}/{bid}", get(bucket_handlers::node))
        .route(
            "/bucket/get_bucket_acl/{gid}/{sid}/{bid}",
            get(bucket_handlers::get_bucket_acl),
        )
        // objects
        .route("/dirobj/supported_types", get(dirobj_handlers::supported_types))
        .route("/dirobj/obj/{gid}/{sid}/{bid}", get(dirobj_handlers::list))
        .route(
            "/dirobj/obj/{gid}/{sid}/{bid}/{*oid}",
            get(dirobj_handlers::properties),
        )
        .route("/dirobj/nodes/{gid}/{sid}/{bid}", get(dirobj_handlers::nodes))
        .route(
            "/dirobj/nodes/{gid}/{sid}/{bid}/{*oid}",
            get(dirobj_handlers::node),
        )
        .route(
            "/dirobj/children/{gid}/{sid}/{bid}/{*oid}",
            get(dirobj_handlers::children),
        )
}
