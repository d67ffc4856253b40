//! Job error types.

use formrelay_protocol::ErrorReport;
use formrelay_protocol::constants::DOWNLOAD_FAILED_MESSAGE;
use serde_json::Value;

/// Errors that end a job. Every variant except `Callback` is delivered to
/// the webhook as the `error` field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("Failed to download the file")]
    Download { status: Option<u16>, detail: String },

    #[error("Request failed with status code {status}: {body}")]
    UploadStatus { status: u16, body: String },

    #[error("upload failed: {0}")]
    UploadTransport(String),

    #[error("invalid job configuration: {0}")]
    Configuration(String),

    #[error("cancelled")]
    Cancelled,

    #[error("callback failed: {0}")]
    Callback(String),
}

impl JobError {
    /// Converts the error into its wire representation.
    pub fn report(&self) -> ErrorReport {
        match self {
            JobError::Download { status, detail } => ErrorReport {
                message: DOWNLOAD_FAILED_MESSAGE.to_string(),
                status: *status,
                data: (!detail.is_empty()).then(|| Value::String(detail.clone())),
            },
            JobError::UploadStatus { status, body } => ErrorReport {
                message: self.to_string(),
                status: Some(*status),
                data: (!body.is_empty()).then(|| {
                    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone()))
                }),
            },
            other => ErrorReport::new(other.to_string()),
        }
    }
}
