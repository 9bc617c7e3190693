//! Response envelope and error mapping for every cq-daemon endpoint.
//!
//! Every body is `{status, message?, data?}`: `success` on 2xx, `fail` on
//! 4xx, `error` on 5xx.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cq_queue::QueueError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Hash of the effective configuration the process started with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data: Some(data),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let code = match self.status {
            "success" => StatusCode::OK,
            "fail" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(self)).into_response()
    }
}

/// `data` of a successful queue-list sync.
#[derive(Debug, Clone, Serialize)]
pub struct QueuesUpdated<T> {
    pub message: &'static str,
    pub queues: Vec<T>,
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// A [`QueueError`] on its way out of a handler, optionally with a `data`
/// payload (per-record results of a fully failed batch).
#[derive(Debug)]
pub struct ApiError {
    pub err: QueueError,
    pub data: Option<Value>,
}

impl ApiError {
    pub fn with_data(err: QueueError, data: Value) -> Self {
        Self {
            err,
            data: Some(data),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.err {
            QueueError::Validation(_) => StatusCode::BAD_REQUEST,
            QueueError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self { err, data: None }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        QueueError::validation(format!("Invalid JSON body: {}", rejection.body_text())).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let status = if code.is_server_error() { "error" } else { "fail" };
        let message = match &self.err {
            QueueError::Internal(e) => {
                error!(category = "http", error = %format!("{e:#}"), "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Envelope {
            status,
            message: Some(message),
            data: self.data,
        };
        (code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
