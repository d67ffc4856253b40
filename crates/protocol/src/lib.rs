//! Wire types shared by the formrelay trigger server, the job runner
//! and anything that consumes the outcome webhook.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use types::{CallbackPayload, ErrorReport, StartedResponse, UploadRequest};
