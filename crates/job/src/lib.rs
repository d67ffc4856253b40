//! Relay jobs: download a file, re-upload it as `multipart/form-data`,
//! and report the outcome to a webhook.
//!
//! This crate holds the orchestration logic only. All network access goes
//! through the [`Transport`] trait so jobs can be driven by mocks in tests;
//! [`ReqwestTransport`] is the production implementation.
//!
//! # Pipeline
//!
//! 1. **Configure**: build the throttle (or metering pass-through)
//! 2. **Download**: open the source stream, retrying per [`RetryPolicy`]
//! 3. **Upload**: stream `entity_content` + `VersionData` to the endpoint
//! 4. **Report**: POST the outcome to the callback URL exactly once

pub mod error;
pub mod job;
pub mod retry;
pub mod runner;
pub mod transport;

pub use error::JobError;
pub use job::{JobSpec, JobState, Outcome, TransferJob};
pub use retry::{RetryPolicy, retry_delay};
pub use runner::{JobDefaults, JobHandle, JobRunner};
pub use transport::{
    BoxFuture, Download, HttpFailure, MultipartUpload, ReqwestTransport, Timeouts, Transport,
};
