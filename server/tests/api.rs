//! End-to-end tests for the browser API
//!
//! Each test builds the full router over an in-memory SQLite database and the
//! in-memory storage backend, then drives it the way the web client does:
//! log in, unlock the vault, register a data source, walk the tree.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use databrowser::auth::Auth;
use databrowser::browser::{BrowserState, browser_router};
use databrowser::config::Settings;
use databrowser::import_export::job::JobStore;
use databrowser::storage::MemoryStorage;
use databrowser::vault::KeyRing;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;

struct App {
    router: Router,
}

impl App {
    async fn new(storage: MemoryStorage) -> Self {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let auth = Arc::new(Auth::new(db.clone()));
        auth.create_user("alice", "wonderland").await.unwrap();
        auth.create_user("bob", "builder").await.unwrap();

        let state = BrowserState {
            auth,
            db,
            jwt_secret: "integration-secret".to_string(),
            jwt_expiry_hours: 1,
            key_ring: Arc::new(KeyRing::new()),
            storage: Arc::new(storage),
            allow_save_secret: true,
            settings: Arc::new(Settings::default()),
            job_store: Arc::new(tokio::sync::Mutex::new(JobStore::new())),
        };
        Self {
            router: browser_router(state),
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {t}"));
        }
        let body = match body {
            Some(v) => {
                req = req.header("Content-Type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };

        let res = self
            .router
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn unlock(&self, token: &str) {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/master_password",
                Some(token),
                Some(json!({ "password": "open sesame" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    async fn default_group(&self, token: &str) -> i64 {
        let (_, groups) = self
            .call(Method::GET, "/browser/data_group/nodes", Some(token), None)
            .await;
        groups[0]["_id"].as_i64().unwrap()
    }
}

fn lake() -> MemoryStorage {
    MemoryStorage::new()
        .with_object("sales-lake", "2026/", 0)
        .with_object("sales-lake", "2026/q1.par", 4096)
        .with_object("sales-lake", "2026/q2.csv", 512)
        .with_object("sales-lake", "README.md", 12)
        .with_bucket("scratch")
        .require_credentials("AKIA", "shh")
}

#[tokio::test]
async fn test_requires_token() {
    let app = App::new(lake()).await;

    let (status, _) = app
        .call(Method::GET, "/browser/data_group/nodes", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::GET, "/browser/data_group/nodes", Some("garbage"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_browse_saved_source() {
    let app = App::new(lake()).await;
    let token = app.login("alice", "wonderland").await;
    app.unlock(&token).await;
    let gid = app.default_group(&token).await;

    let (status, created) = app
        .call(
            Method::POST,
            &format!("/browser/datasource/obj/{gid}"),
            Some(&token),
            Some(json!({
                "name": "lake",
                "ds_type": "S3",
                "key_name": "AKIA",
                "key_secret": "shh",
                "save_secret": true,
                "pattern": "sales-*",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert_eq!(created["node"]["is_secret_saved"], true);
    let sid = created["node"]["_id"].as_i64().unwrap();

    // the pattern hides "scratch"
    let (status, buckets) = app
        .call(
            Method::GET,
            &format!("/browser/bucket/nodes/{gid}/{sid}"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{buckets}");
    let names: Vec<_> = buckets
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["label"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["sales-lake"]);

    let (_, top) = app
        .call(
            Method::GET,
            &format!("/browser/dirobj/nodes/{gid}/{sid}/sales-lake"),
            Some(&token),
            None,
        )
        .await;
    let top_ids: Vec<_> = top
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["_id"].as_str().unwrap())
        .collect();
    assert_eq!(top_ids, vec!["2026/", "README.md"]);

    let (_, children) = app
        .call(
            Method::GET,
            &format!("/browser/dirobj/children/{gid}/{sid}/sales-lake/2026/"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(children.as_array().unwrap().len(), 2);
    assert_eq!(children[0]["do_type"], "parquet");
    assert_eq!(children[1]["do_type"], "csv");

    let (status, props) = app
        .call(
            Method::GET,
            &format!("/browser/dirobj/obj/{gid}/{sid}/sales-lake/2026/q1.par"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(props["s3_uri"], "s3://sales-lake/2026/q1.par");
}

#[tokio::test]
async fn test_reset_master_password_drops_saved_secrets() {
    let app = App::new(lake()).await;
    let token = app.login("alice", "wonderland").await;
    app.unlock(&token).await;
    let gid = app.default_group(&token).await;

    let (_, created) = app
        .call(
            Method::POST,
            &format!("/browser/datasource/obj/{gid}"),
            Some(&token),
            Some(json!({
                "name": "lake", "ds_type": "S3",
                "key_name": "AKIA", "key_secret": "shh", "save_secret": true,
            })),
        )
        .await;
    let sid = created["node"]["_id"].as_i64().unwrap();

    let (status, body) = app
        .call(Method::DELETE, "/api/master_password", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, node) = app
        .call(
            Method::GET,
            &format!("/browser/datasource/nodes/{gid}/{sid}"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(node["node"]["is_secret_saved"], false);

    let (_, status_body) = app
        .call(Method::GET, "/api/master_password", Some(&token), None)
        .await;
    assert_eq!(status_body["is_set"], false);
    assert_eq!(status_body["present"], false);
}

#[tokio::test]
async fn test_users_are_isolated() {
    let app = App::new(lake()).await;
    let alice = app.login("alice", "wonderland").await;
    let bob = app.login("bob", "builder").await;
    let alice_gid = app.default_group(&alice).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/browser/datasource/obj/{alice_gid}"),
            Some(&alice),
            Some(json!({ "name": "scratch", "ds_type": "LFS" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/browser/datasource/nodes/{alice_gid}"),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["success"], 0);
}

#[tokio::test]
async fn test_locked_vault_blocks_saved_source() {
    let app = App::new(lake()).await;
    let token = app.login("alice", "wonderland").await;
    let gid = app.default_group(&token).await;

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/browser/datasource/obj/{gid}"),
            Some(&token),
            Some(json!({
                "name": "lake", "ds_type": "S3",
                "key_name": "AKIA", "key_secret": "shh", "save_secret": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED, "{body}");
    assert_eq!(body["status"], 428);
}
