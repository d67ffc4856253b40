//! HTTP seam between jobs and the network.
//!
//! `Transport` is implemented by [`ReqwestTransport`] in production and by
//! in-memory mocks in tests. Failures are explicit values: a non-success
//! status is an [`HttpFailure::Status`], never a panic or a generic error.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use formrelay_transfer::{ByteStream, TransferError};
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HttpFailure {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl HttpFailure {
    /// Transport errors and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpFailure::Status { status, .. } => *status >= 500,
            HttpFailure::Transport(_) => true,
        }
    }
}

/// An opened download.
pub struct Download {
    pub stream: ByteStream,
    /// Value of the response `Content-Length`, if present.
    pub content_length: Option<u64>,
}

/// A streamed multipart POST.
pub struct MultipartUpload {
    pub endpoint: String,
    pub token: String,
    pub content_type: String,
    /// Sent as `Content-Length`; `None` uses chunked transfer encoding.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Network operations a job needs.
pub trait Transport: Send + Sync {
    /// Issues a GET and returns the response body as a stream.
    fn download<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Download, HttpFailure>>;

    /// Streams a multipart body and returns the parsed response.
    ///
    /// The response is JSON when it parses, otherwise a JSON string, or
    /// `null` when empty.
    fn upload(&self, upload: MultipartUpload) -> BoxFuture<'_, Result<Value, HttpFailure>>;

    /// POSTs a JSON document, ignoring the response body.
    fn post_json<'a>(&'a self, url: &'a str, body: &'a Value)
    -> BoxFuture<'a, Result<(), HttpFailure>>;
}

/// Network time limits for [`ReqwestTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Establishing a TCP/TLS connection.
    pub connect: Duration,
    /// Wait for a download's response headers.
    pub response: Duration,
    /// Whole callback POST, from connect to status line.
    pub callback: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            response: Duration::from_secs(60),
            callback: Duration::from_secs(30),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest::Client` connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    response_timeout: Duration,
    callback_timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with the given time limits.
    ///
    /// Uploads carry no deadline of their own: a throttled body may take
    /// arbitrarily long. They end with the job's cancellation token.
    pub fn new(timeouts: Timeouts) -> Result<Self, HttpFailure> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(transport_failure)?;
        Ok(Self {
            http,
            response_timeout: timeouts.response,
            callback_timeout: timeouts.callback,
        })
    }

    /// Wraps an existing client.
    pub fn with_client(http: reqwest::Client) -> Self {
        let defaults = Timeouts::default();
        Self {
            http,
            response_timeout: defaults.response,
            callback_timeout: defaults.callback,
        }
    }
}

impl Transport for ReqwestTransport {
    fn download<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Download, HttpFailure>> {
        Box::pin(async move {
            let resp = tokio::time::timeout(self.response_timeout, self.http.get(url).send())
                .await
                .map_err(|_| {
                    HttpFailure::Transport(format!(
                        "no response within {}s",
                        self.response_timeout.as_secs_f64()
                    ))
                })?
                .map_err(transport_failure)?;
            let resp = check_status(resp).await?;
            let content_length = resp.content_length();
            debug!(url, ?content_length, "download opened");

            let stream = resp
                .bytes_stream()
                .map_err(|e| TransferError::Source(e.to_string()));
            Ok(Download {
                stream: Box::pin(stream),
                content_length,
            })
        })
    }

    fn upload(&self, upload: MultipartUpload) -> BoxFuture<'_, Result<Value, HttpFailure>> {
        Box::pin(async move {
            let mut req = self
                .http
                .post(&upload.endpoint)
                .bearer_auth(&upload.token)
                .header(CONTENT_TYPE, upload.content_type);
            if let Some(len) = upload.content_length {
                req = req.header(CONTENT_LENGTH, len);
            }

            let resp = req
                .body(reqwest::Body::wrap_stream(upload.body))
                .send()
                .await
                .map_err(transport_failure)?;
            let resp = check_status(resp).await?;
            let text = resp.text().await.map_err(transport_failure)?;
            Ok(parse_response_body(&text))
        })
    }

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<(), HttpFailure>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(url)
                .timeout(self.callback_timeout)
                .json(body)
                .send()
                .await
                .map_err(transport_failure)?;
            check_status(resp).await?;
            Ok(())
        })
    }
}

/// Interprets a success body: JSON if it parses, else a string, `null` if empty.
pub fn parse_response_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HttpFailure> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(HttpFailure::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Flattens a `reqwest` error and its sources into one message.
fn transport_failure(e: reqwest::Error) -> HttpFailure {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    HttpFailure::Transport(message)
}
