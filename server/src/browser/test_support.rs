//! Shared fixtures for handler tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use migration::MigratorTrait as _;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

use super::{BrowserState, browser_router, jwt};
use crate::auth::Auth;
use crate::config::Settings;
use crate::crypto;
use crate::entity::{app_user, data_source};
use crate::import_export::job::JobStore;
use crate::storage::MemoryStorage;
use crate::vault::{self, KeyRing};

pub const JWT_SECRET: &str = "test-jwt-secret-key-32-chars-pad";
pub const MASTER_PASSWORD: &str = "correct horse";

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub fn make_state(db: DatabaseConnection, storage: MemoryStorage) -> BrowserState {
    BrowserState {
        auth: Arc::new(Auth::new(db.clone())),
        db,
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expiry_hours: 1,
        key_ring: Arc::new(KeyRing::new()),
        storage: Arc::new(storage),
        allow_save_secret: true,
        settings: Arc::new(Settings::default()),
        job_store: Arc::new(Mutex::new(JobStore::new())),
    }
}

pub async fn create_user(state: &BrowserState, username: &str) -> app_user::Model {
    state.auth.create_user(username, "pw").await.unwrap()
}

/// Set and unlock the master password for `user_id`.
pub async fn unlock(state: &BrowserState, user_id: i32) -> [u8; 32] {
    vault::unlock(&state.db, &state.key_ring, user_id, MASTER_PASSWORD)
        .await
        .unwrap();
    state.key_ring.require(user_id).unwrap()
}

pub fn token(user: &app_user::Model) -> String {
    let claims = jwt::Claims::for_user(user.id, &user.username, 1);
    jwt::encode_jwt(&claims, JWT_SECRET).unwrap()
}

/// Insert an S3 data source with an encrypted key pair.
pub async fn insert_s3_source(
    db: &DatabaseConnection,
    key: &[u8; 32],
    user_id: i32,
    group_id: i32,
    name: &str,
    key_name: &str,
    key_secret: &str,
) -> data_source::Model {
    let now = Utc::now().naive_utc();
    data_source::ActiveModel {
        user_id: Set(user_id),
        datagroup_id: Set(group_id),
        name: Set(name.to_string()),
        ds_type: Set("S3".to_string()),
        key_name: Set(Some(crypto::encrypt(key_name, key).unwrap())),
        key_secret: Set(Some(crypto::encrypt(key_secret, key).unwrap())),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// Send one request through the full router and decode the JSON body.
pub async fn send(
    state: &BrowserState,
    method: Method,
    uri: &str,
    token: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let router: Router = browser_router(state.clone());
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"));
    let body = match body {
        Some(v) => {
            req = req.header("Content-Type", "application/json");
            Body::from(serde_json::to_string(&v).unwrap())
        }
        None => Body::empty(),
    };
    let res = router.oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
