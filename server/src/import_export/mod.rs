//! Table import/export through external utilities: `psql \copy` for local
//! files, the bulk loader for objects of an S3 data source.

use axum::{
    Router,
    routing::{get, post},
};

use crate::browser::BrowserState;

pub mod command;
pub mod handlers;
pub mod job;

pub fn routes() -> Router<BrowserState> {
    Router::new()
        .route("/job/{gid}/{sid}", post(handlers::create_job))
        .route(
            "/jobs/{job_id}",
            get(handlers::job_status).delete(handlers::cancel_job),
        )
        .route("/utility_exists/{kind}", get(handlers::utility_exists))
}
