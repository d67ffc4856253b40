//! Streaming building blocks for relaying a download into a multipart upload.
//!
//! Every stage is a pull-based [`futures_util::Stream`] of [`Bytes`], so a
//! slow consumer stalls every stage upstream of it without buffering.
//!
//! - [`OrderedStreamMerger`]: sequential concatenation of byte sources
//! - [`Throttle`]: token-bucket rate limiting as a [`ByteTransform`]
//! - [`MultipartEncoder`]: `multipart/form-data` framing with length accounting

mod merge;
mod multipart;
mod throttle;
mod transform;

pub use merge::OrderedStreamMerger;
pub use multipart::{BOUNDARY_PREFIX, MultipartEncoder, MultipartHeaders, Part};
pub use throttle::{Acquire, Throttle, ThrottleOptions, TokenBucket};
pub use transform::{ByteTransform, Metered, Transformed};

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

/// Owned, sendable byte stream used between pipeline stages.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>;

/// Errors produced by the transfer crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid usage: {0}")]
    Usage(&'static str),

    #[error("source stream failed: {0}")]
    Source(String),

    #[error("rate limiter error: {0}")]
    Limiter(String),

    #[error("length mismatch: declared {declared} bytes, got {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Json(e.to_string())
    }
}

/// Boxes any compatible stream into a [`ByteStream`].
pub fn boxed<S>(stream: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, TransferError>> + Send + 'static,
{
    Box::pin(stream)
}
