use std::path::Path as FsPath;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::browser::{
    ApiErr, BrowserState,
    bucket_handlers::ensure_bucket_visible,
    datasource_handlers::find_datasource,
    datasource_types::{self, DataSourceKind},
    jwt::AuthClaims,
    payload::Payload,
    response::Envelope,
};
use crate::crypto;
use crate::entity::data_source;
use crate::storage::paths::create_s3_uri;
use crate::storage::{Credentials, S3Session};

use super::command::{self, ImportExportRequest, JobError, LoaderConfig};
use super::job::{ImportExportJob, JobStatusResponse, JobStore};

/// Accepts the description either as the body itself or as a JSON string in
/// a `data` field (form posts).
fn parse_request(payload: Payload) -> Result<ImportExportRequest, ApiErr> {
    let Payload(mut body) = payload;
    let value = match body.remove("data") {
        Some(Value::String(raw)) => serde_json::from_str(&raw)
            .map_err(|e| ApiErr::bad_request(format!("Invalid job description: {e}")))?,
        Some(obj @ Value::Object(_)) => obj,
        _ => Value::Object(body),
    };
    serde_json::from_value(value)
        .map_err(|e| ApiErr::bad_request(format!("Invalid job description: {e}")))
}

/// Decrypt the data source's saved key pair. `None` means ambient credentials.
fn saved_credentials(
    state: &BrowserState,
    user_id: i32,
    ds: &data_source::Model,
) -> Result<Option<Credentials>, ApiErr> {
    let (Some(key_name), Some(key_secret)) = (&ds.key_name, &ds.key_secret) else {
        return Ok(None);
    };
    let key = state.key_ring.require(user_id)?;
    let decrypt =
        |v: &str| crypto::decrypt(v, &key).map_err(|e| ApiErr::unauthorized(e.to_string()));
    Ok(Some(Credentials {
        key_name: decrypt(key_name)?,
        key_secret: decrypt(key_secret)?,
    }))
}

fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ApiErr> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiErr::missing_parameter(field))
}

// ---------- POST /import_export/job/{gid}/{sid} ----------

pub async fn create_job(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
    payload: Payload,
) -> Result<Envelope, ApiErr> {
    let user_id = claims.user_id();
    let ds = find_datasource(&state.db, user_id, gid, sid).await?;
    let req = parse_request(payload)?;

    for (field, value) in [
        ("host", &req.host),
        ("database", &req.database),
        ("username", &req.username),
        ("schema", &req.schema),
        ("table", &req.table),
    ] {
        required(field, Some(value.as_str()))?;
    }

    let setting = if req.is_def_ds {
        &state.settings.psql_path
    } else {
        &state.settings.loader_path
    };
    let utility = match command::resolve_utility(setting) {
        Ok(path) => path,
        Err(e) => return Ok(Envelope::failure(e.to_string())),
    };

    let (args, stdin) = if req.is_def_ds {
        let filename = req
            .filename
            .as_deref()
            .filter(|f| FsPath::new(f).is_absolute())
            .ok_or_else(|| ApiErr::bad_request("Please specify a valid file"))?;
        if req.is_import
            && !tokio::fs::metadata(filename)
                .await
                .is_ok_and(|m| m.is_file())
        {
            return Err(ApiErr::bad_request("Please specify a valid file"));
        }
        let copy = command::copy_command(&req, filename);
        (vec!["--command".to_string(), copy], None)
    } else {
        if datasource_types::classify(&ds.ds_type).kind != DataSourceKind::S3 {
            return Err(ApiErr::bad_request(format!(
                "Data source '{}' is not an S3 data source",
                ds.name
            )));
        }
        let bucket = required("bucket", req.bucket.as_deref())?;
        ensure_bucket_visible(&ds, bucket)?;
        let key = required("key", req.key.as_deref())?;
        if req.is_import {
            let session = S3Session::new(state.storage.clone(), user_id);
            session
                .authenticate(&state.db, &state.key_ring, user_id, gid, sid, Some(&ds))
                .await?;
            if !session.exists(user_id, bucket, key).await? {
                return Err(ApiErr::bad_request(format!(
                    "Could not find the object '{}'",
                    create_s3_uri(bucket, key)
                )));
            }
        }
        let credentials = saved_credentials(&state, user_id, &ds)?;
        let config = LoaderConfig::new(&req, bucket, key, credentials)
            .to_stdin()
            .map_err(ApiErr::internal)?;
        (vec!["--file".to_string(), "stdin".to_string()], Some(config))
    };

    let job = ImportExportJob::new(user_id, ds.id, req.description());
    let job_id = job.id.clone();
    let cancel = job.cancel.clone();
    state
        .job_store
        .lock()
        .await
        .try_register(job)
        .map_err(|existing| {
            ApiErr::bad_request(format!(
                "An import/export job is already running for this data source (job_id: {existing})"
            ))
        })?;

    let mut cmd = Command::new(&utility);
    cmd.args(&args).envs(req.env());

    tracing::info!(
        user_id,
        sid = ds.id,
        job_id = %job_id,
        utility = %utility.display(),
        direct = req.is_def_ds,
        "import/export job started"
    );
    tokio::spawn(run_job(
        state.job_store.clone(),
        job_id.clone(),
        cmd,
        stdin,
        cancel,
    ));

    Ok(Envelope::ok().data(json!({ "job_id": job_id, "success": 1 })))
}

// ---------- GET /import_export/jobs/{job_id} ----------

pub async fn job_status(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiErr> {
    let store = state.job_store.lock().await;
    let job = store
        .get(&job_id)
        .filter(|j| j.user_id == claims.user_id())
        .ok_or_else(|| ApiErr::gone("Could not find the job."))?;
    Ok(Json(job.into()))
}

// ---------- DELETE /import_export/jobs/{job_id} ----------

pub async fn cancel_job(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(job_id): Path<String>,
) -> Result<Envelope, ApiErr> {
    let mut store = state.job_store.lock().await;
    if !store
        .get(&job_id)
        .is_some_and(|j| j.user_id == claims.user_id())
    {
        return Err(ApiErr::gone("Could not find the job."));
    }
    if !store.cancel(&job_id) {
        return Err(ApiErr::bad_request("The job is not running."));
    }

    tracing::info!(job_id = %job_id, "import/export job cancelled");
    Ok(Envelope::ok().info("Job cancelled"))
}

// ---------- GET /import_export/utility_exists/{kind} ----------

pub async fn utility_exists(
    _claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(kind): Path<String>,
) -> Result<Envelope, ApiErr> {
    let setting = match kind.as_str() {
        "sql" | "psql" => &state.settings.psql_path,
        "loader" => &state.settings.loader_path,
        other => return Err(ApiErr::bad_request(format!("Unknown utility: {other}"))),
    };

    Ok(match command::resolve_utility(setting) {
        Ok(_) => Envelope::ok(),
        Err(e) => Envelope::failure(e.to_string()),
    })
}

// ---------- Core runner — HTTP-independent ----------

async fn run_job(
    store: Arc<Mutex<JobStore>>,
    job_id: String,
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    cancel: CancellationToken,
) {
    let outcome = run_process(&mut cmd, stdin, &cancel).await;

    let mut store = store.lock().await;
    match outcome {
        Ok((status, _)) if status.success() => {
            tracing::info!(job_id = %job_id, "import/export job completed");
            store.complete(&job_id, status.code());
        }
        Ok((status, stderr)) => {
            let stderr = stderr.trim();
            let msg = if stderr.is_empty() {
                status.to_string()
            } else {
                stderr.to_string()
            };
            tracing::warn!(job_id = %job_id, code = ?status.code(), error = %msg, "import/export job failed");
            store.fail(&job_id, msg, status.code());
        }
        Err(JobError::Cancelled) => {}
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "import/export job could not run");
            store.fail(&job_id, e.to_string(), None);
        }
    }
}

async fn run_process(
    cmd: &mut Command,
    stdin: Option<Vec<u8>>,
    cancel: &CancellationToken,
) -> Result<(ExitStatus, String), JobError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(data) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(&data).await?;
        // dropping the pipe closes the utility's stdin
    }

    let stderr = child.stderr.take();
    let collect = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            Ok((status, collect.await.unwrap_or_default()))
        }
        _ = cancel.cancelled() => {
            child.kill().await?;
            Err(JobError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::test_support::*;
    use crate::config::Settings;
    use crate::entity::data_group;
    use crate::import_export::job::JobStatus;
    use crate::storage::MemoryStorage;
    use axum::http::{Method, StatusCode};
    use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
    use std::path::PathBuf;
    use std::time::Duration;

    async fn setup(psql: &str, loader: &str) -> (BrowserState, String, i32, i32) {
        let mut state = make_state(setup_db().await, MemoryStorage::new());
        state.settings = Arc::new(Settings {
            psql_path: PathBuf::from(psql),
            loader_path: PathBuf::from(loader),
            ..Settings::default()
        });
        let user = create_user(&state, "alice").await;
        let gid = data_group::Entity::find()
            .filter(data_group::Column::UserId.eq(user.id))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap()
            .id;
        let key = unlock(&state, user.id).await;
        let ds = insert_s3_source(&state.db, &key, user.id, gid, "lake", "k", "s").await;
        (state, token(&user), gid, ds.id)
    }

    fn job_body(filename: &str) -> Value {
        json!({
            "host": "localhost",
            "database": "sales",
            "username": "etl",
            "schema": "public",
            "table": "orders",
            "is_import": true,
            "filename": filename,
        })
    }

    async fn wait_finished(state: &BrowserState, job_id: &str) -> JobStatus {
        for _ in 0..100 {
            let status = state.job_store.lock().await.get(job_id).unwrap().status;
            if status != JobStatus::Running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        JobStatus::Running
    }

    #[test]
    fn test_parse_request_from_data_field() {
        let mut body = serde_json::Map::new();
        body.insert(
            "data".into(),
            Value::String(r#"{"table": "t", "port": 6543}"#.into()),
        );
        let req = parse_request(Payload(body)).unwrap();
        assert_eq!(req.table, "t");
        assert_eq!(req.port, 6543);
    }

    #[tokio::test]
    async fn test_utility_exists() {
        let (state, t, _, _) = setup("sh", "no-such-loader-utility").await;

        let (status, body) =
            send(&state, Method::GET, "/import_export/utility_exists/sql", &t, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], 1);

        let (status, body) =
            send(&state, Method::GET, "/import_export/utility_exists/loader", &t, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], 0);
        assert!(body["errormsg"].as_str().unwrap().contains("file not found"));

        let (status, _) =
            send(&state, Method::GET, "/import_export/utility_exists/ftp", &t, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_direct_job_runs_to_completion() {
        let (state, t, gid, sid) = setup("true", "true").await;
        let file = tempfile::NamedTempFile::new().unwrap();
        let filename = file.path().to_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/import_export/job/{gid}/{sid}"),
            &t,
            Some(job_body(&filename)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["success"], 1);
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();

        assert_eq!(wait_finished(&state, &job_id).await, JobStatus::Completed);

        let (status, body) = send(
            &state,
            Method::GET,
            &format!("/import_export/jobs/{job_id}"),
            &t,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["exit_code"], 0);
        assert_eq!(body["datasource_id"], sid);

        let (status, _) = send(
            &state,
            Method::DELETE,
            &format!("/import_export/jobs/{job_id}"),
            &t,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_utility_is_recorded() {
        let (state, t, gid, sid) = setup("false", "true").await;
        let file = tempfile::NamedTempFile::new().unwrap();
        let filename = file.path().to_str().unwrap().to_string();

        let (_, body) = send(
            &state,
            Method::POST,
            &format!("/import_export/job/{gid}/{sid}"),
            &t,
            Some(job_body(&filename)),
        )
        .await;
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();

        assert_eq!(wait_finished(&state, &job_id).await, JobStatus::Failed);
        let store = state.job_store.lock().await;
        assert_eq!(store.get(&job_id).unwrap().exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_validation() {
        let (state, t, gid, sid) = setup("true", "no-such-loader-utility").await;
        let uri = format!("/import_export/job/{gid}/{sid}");

        let mut body = job_body("/tmp/x.csv");
        body.as_object_mut().unwrap().remove("table");
        let (status, resp) = send(&state, Method::POST, &uri, &t, Some(body)).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(resp["errormsg"], "Could not find the required parameter (table).");

        let (status, _) =
            send(&state, Method::POST, &uri, &t, Some(job_body("relative.csv"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // a missing utility is a handled failure, not an HTTP error
        let mut body = job_body("/tmp/x.csv");
        body["is_def_ds"] = json!(false);
        body["bucket"] = json!("lake");
        body["key"] = json!("in/orders.csv");
        let (status, resp) = send(&state, Method::POST, &uri, &t, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["success"], 0);

        let (status, _) = send(
            &state,
            Method::GET,
            "/import_export/jobs/0192f0c4-0000-7000-8000-000000000000",
            &t,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_loader_job_requires_object() {
        let (state, t, gid, sid) = setup("true", "true").await;
        let mut body = job_body("/tmp/x.csv");
        body["is_def_ds"] = json!(false);
        body["bucket"] = json!("lake");

        let (status, resp) = send(
            &state,
            Method::POST,
            &format!("/import_export/job/{gid}/{sid}"),
            &t,
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(resp["errormsg"], "Could not find the required parameter (key).");
    }

    #[tokio::test]
    async fn test_loader_import_checks_object() {
        let (state, t, gid, sid) = setup("true", "true").await;
        let mut body = job_body("/tmp/x.csv");
        body["is_def_ds"] = json!(false);
        body["bucket"] = json!("lake");
        body["key"] = json!("in/orders.csv");

        let (status, resp) = send(
            &state,
            Method::POST,
            &format!("/import_export/job/{gid}/{sid}"),
            &t,
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp["errormsg"],
            "Could not find the object 's3://lake/in/orders.csv'"
        );
    }

    #[tokio::test]
    async fn test_loader_export_is_registered() {
        let (state, t, gid, sid) = setup("true", "true").await;
        let mut body = job_body("/tmp/x.csv");
        body["is_def_ds"] = json!(false);
        body["is_import"] = json!(false);
        body["bucket"] = json!("lake");
        body["key"] = json!("out/orders.csv");

        let (status, resp) = send(
            &state,
            Method::POST,
            &format!("/import_export/job/{gid}/{sid}"),
            &t,
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{resp}");
        let job_id = resp["data"]["job_id"].as_str().unwrap().to_string();

        let store = state.job_store.lock().await;
        let job = store.get(&job_id).unwrap();
        assert_eq!(job.datasource_id, sid);
        assert!(job.description.contains("orders"));
    }

    #[tokio::test]
    async fn test_loader_job_rejects_hidden_bucket() {
        let (state, t, gid, sid) = setup("true", "true").await;
        let ds = data_source::Entity::find_by_id(sid)
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        let mut active: data_source::ActiveModel = ds.into();
        active.pattern = Set(Some("archive-*".to_string()));
        active.update(&state.db).await.unwrap();

        for is_import in [true, false] {
            let mut body = job_body("/tmp/x.csv");
            body["is_def_ds"] = json!(false);
            body["is_import"] = json!(is_import);
            body["bucket"] = json!("lake");
            body["key"] = json!("out/orders.csv");

            let (status, resp) = send(
                &state,
                Method::POST,
                &format!("/import_export/job/{gid}/{sid}"),
                &t,
                Some(body),
            )
            .await;
            assert_eq!(status, StatusCode::GONE);
            assert_eq!(resp["errormsg"], "Not found bucket");
        }
        let idle = ImportExportJob::new(1, sid, "copy".to_string());
        assert!(state.job_store.lock().await.try_register(idle).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (state, t, _, sid) = setup("true", "true").await;
        let claims = crate::browser::jwt::decode_jwt(&t, JWT_SECRET).unwrap();
        let job_id = state
            .job_store
            .lock()
            .await
            .try_register(ImportExportJob::new(claims.sub, sid, "copy".into()))
            .unwrap();

        let (status, body) = send(
            &state,
            Method::DELETE,
            &format!("/import_export/jobs/{job_id}"),
            &t,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"], "Job cancelled");
        let store = state.job_store.lock().await;
        assert!(store.get(&job_id).unwrap().cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_process_writes_stdin() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("read line; [ \"$line\" = hello ] || exit 4");
        let (status, _) =
            run_process(&mut cmd, Some(b"hello\n".to_vec()), &CancellationToken::new())
                .await
                .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_run_process_cancel_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let outcome = run_process(&mut cmd, None, &cancel).await;
        assert!(matches!(outcome, Err(JobError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
