use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::TITLE_KEY;

/// Body of `POST /upload`: one relay job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub access_token: String,
    /// Upload destination.
    pub salesforce_endpoint: String,
    /// Download source.
    pub file_url: String,
    /// Attached verbatim as the metadata part; `Title` names the file.
    pub metadata: Map<String, Value>,
    pub callback_url: String,
    /// Per-job override of the server's default rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_bytes_per_second: Option<f64>,
}

impl UploadRequest {
    /// Returns the metadata `Title` if it is a non-empty string.
    pub fn title(&self) -> Option<&str> {
        self.metadata
            .get(TITLE_KEY)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// Immediate acknowledgment returned by the trigger endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedResponse {
    /// RFC 3339 UTC timestamp.
    pub started_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_id: String,
}

/// Structured failure description delivered in the callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorReport {
    /// Creates a report with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            data: None,
        }
    }
}

/// Outcome webhook body.
///
/// A failure sets `error` and leaves `result` null. A success leaves
/// `error` null; `result` is whatever the upload answered, which is itself
/// `null` for an empty response body. Both fields are always serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub error: Option<ErrorReport>,
    pub result: Option<Value>,
}

impl CallbackPayload {
    /// Payload for a successful job.
    pub fn success(result: Value) -> Self {
        Self {
            error: None,
            result: Some(result),
        }
    }

    /// Payload for a failed job.
    pub fn failure(error: ErrorReport) -> Self {
        Self {
            error: Some(error),
            result: None,
        }
    }

    /// Returns `true` if the payload reports success.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
