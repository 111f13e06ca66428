//! Success envelopes. Errors go through [`super::ApiErr`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;

use super::node::BrowserNode;

/// `{"success", "errormsg", "info", "result", "data", "status"}`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: u8,
    pub errormsg: String,
    pub info: String,
    pub result: Value,
    pub data: Value,
    pub status: u16,
}

impl Envelope {
    pub fn ok() -> Self {
        Self {
            success: 1,
            errormsg: String::new(),
            info: String::new(),
            result: Value::Null,
            data: Value::Null,
            status: StatusCode::OK.as_u16(),
        }
    }

    /// A handled failure reported with HTTP 200, e.g. a missing utility.
    pub fn failure(errormsg: impl Into<String>) -> Self {
        Self {
            success: 0,
            errormsg: errormsg.into(),
            ..Self::ok()
        }
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).unwrap_or_default();
        self
    }

    pub fn result(mut self, result: impl Serialize) -> Self {
        self.result = serde_json::to_value(result).unwrap_or_default();
        self
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// `{"node": {...}}`, returned by create/update and single-node lookups.
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub node: BrowserNode,
}

impl From<BrowserNode> for NodeResponse {
    fn from(node: BrowserNode) -> Self {
        Self { node }
    }
}

impl IntoResponse for NodeResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
