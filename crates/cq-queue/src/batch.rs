//! Per-record outcomes of batch endpoints.

use serde::Serialize;
use serde_json::Value;

use crate::error::QueueError;

/// Outcome of one input record. `data` is the stored row on success and the
/// offending input on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: Value,
    #[serde(rename = "isUpdate", skip_serializing_if = "Option::is_none")]
    pub is_update: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    /// Failed on a backend fault rather than on its input.
    #[serde(skip)]
    pub internal: bool,
}

impl RecordResult {
    pub fn ok(data: Value, is_update: bool) -> Self {
        Self {
            success: true,
            error: None,
            data,
            is_update: Some(is_update),
            retryable: false,
            internal: false,
        }
    }

    /// Backend details of internal errors stay in the logs.
    pub fn failed(err: &QueueError, input: Value) -> Self {
        let internal = matches!(err, QueueError::Internal(_));
        let error = if internal {
            "Internal server error".to_string()
        } else {
            err.to_string()
        };
        Self {
            success: false,
            error: Some(error),
            data: input,
            is_update: None,
            retryable: err.is_retryable(),
            internal,
        }
    }
}

/// Results in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: Vec<RecordResult>,
}

impl BatchReport {
    pub fn push(&mut self, r: RecordResult) {
        self.results.push(r);
    }

    /// The batch as a whole succeeds iff at least one record did.
    pub fn any_success(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Every record hit a backend fault; nothing was written.
    pub fn all_internal(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.internal)
    }
}
