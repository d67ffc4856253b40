//! A single relay job and its pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use formrelay_protocol::constants::{FILE_FIELD, METADATA_FIELD};
use formrelay_protocol::{CallbackPayload, UploadRequest};
use formrelay_transfer::{
    ByteStream, Metered, MultipartEncoder, Part, Throttle, ThrottleOptions, TransferError,
    Transformed,
};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::retry::RetryPolicy;
use crate::transport::{Download, HttpFailure, MultipartUpload, Transport};

/// Validated description of one relay job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub source_url: String,
    pub destination_endpoint: String,
    pub auth_token: String,
    /// Sent verbatim as the metadata part.
    pub metadata: Map<String, Value>,
    /// Filename of the file part, taken from `metadata.Title`.
    pub title: String,
    pub callback_url: String,
    pub rate_limit_bytes_per_second: Option<f64>,
}

impl JobSpec {
    /// Validates a trigger request.
    ///
    /// All URLs must parse and `metadata.Title` must be a non-empty string.
    /// The rate limit is checked later, when the job builds its throttle.
    pub fn from_request(req: UploadRequest) -> Result<Self, JobError> {
        for (field, url) in [
            ("fileUrl", &req.file_url),
            ("salesforceEndpoint", &req.salesforce_endpoint),
            ("callbackUrl", &req.callback_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| {
                JobError::Configuration(format!("{field} is not a valid URL: {e}"))
            })?;
        }

        let title = req
            .title()
            .ok_or_else(|| {
                JobError::Configuration("metadata.Title must be a non-empty string".into())
            })?
            .to_string();

        Ok(Self {
            source_url: req.file_url,
            destination_endpoint: req.salesforce_endpoint,
            auth_token: req.access_token,
            metadata: req.metadata,
            title,
            callback_url: req.callback_url,
            rate_limit_bytes_per_second: req.rate_limit_bytes_per_second,
        })
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Downloading,
    Uploading,
    Succeeded,
    Failed,
    /// Callback attempted; the job is finished.
    Done,
}

/// Final result of [`TransferJob::perform`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub id: Uuid,
    /// What was reported to the callback.
    pub result: Result<Value, JobError>,
    /// Set when the callback POST itself failed.
    pub callback_error: Option<JobError>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// One download-to-upload relay, reported to its callback exactly once.
pub struct TransferJob {
    id: Uuid,
    spec: JobSpec,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    state: JobState,
    bytes_sent: Arc<AtomicU64>,
}

impl TransferJob {
    pub fn new(
        id: Uuid,
        spec: JobSpec,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            spec,
            transport,
            retry,
            cancel,
            state: JobState::Pending,
            bytes_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs the job to completion and posts the outcome to the callback.
    ///
    /// Never fails: every error ends up in the returned [`Outcome`] and in
    /// the callback payload.
    pub async fn perform(mut self) -> Outcome {
        info!(job = %self.id, source = %self.spec.source_url, "job started");

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            r = self.transfer() => r,
        };

        match &result {
            Ok(_) => {
                self.set_state(JobState::Succeeded);
                info!(
                    job = %self.id,
                    bytes = self.bytes_sent.load(Ordering::Relaxed),
                    "job succeeded"
                );
            }
            Err(e) => {
                self.set_state(JobState::Failed);
                warn!(job = %self.id, error = %e, "job failed");
            }
        }

        let payload = match &result {
            Ok(value) => CallbackPayload::success(value.clone()),
            Err(e) => CallbackPayload::failure(e.report()),
        };
        let callback_error = self.report(&payload).await.err();
        self.set_state(JobState::Done);

        Outcome {
            id: self.id,
            result,
            callback_error,
        }
    }

    async fn transfer(&mut self) -> Result<Value, JobError> {
        let throttle = self.build_throttle()?;

        self.set_state(JobState::Downloading);
        let download = self.download().await?;
        debug!(job = %self.id, content_length = ?download.content_length, "source opened");

        let source = match throttle {
            Some(throttle) => Box::pin(throttle.apply(download.stream)) as ByteStream,
            None => download.stream,
        };
        let metered = Metered::with_counter(Arc::clone(&self.bytes_sent));
        let source: ByteStream = Box::pin(Transformed::new(source, metered));

        let mut encoder = MultipartEncoder::new();
        encoder
            .append_json(Part::new(METADATA_FIELD), &self.spec.metadata)
            .map_err(encoding_error)?
            .append_stream(
                Part::new(FILE_FIELD).filename(&self.spec.title),
                source,
                download.content_length,
            )
            .map_err(encoding_error)?;
        encoder.finalize().map_err(encoding_error)?;

        let headers = encoder.headers();
        let body_error: Arc<Mutex<Option<TransferError>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&body_error);
        let body = encoder
            .into_body()
            .map_err(encoding_error)?
            .inspect_err(move |e| {
                if let Ok(mut slot) = slot.lock() {
                    slot.get_or_insert_with(|| e.clone());
                }
            });

        self.set_state(JobState::Uploading);
        debug!(
            job = %self.id,
            content_length = ?headers.content_length,
            endpoint = %self.spec.destination_endpoint,
            "upload started"
        );
        let upload = MultipartUpload {
            endpoint: self.spec.destination_endpoint.clone(),
            token: self.spec.auth_token.clone(),
            content_type: headers.content_type,
            content_length: headers.content_length,
            body: Box::pin(body),
        };

        match self.transport.upload(upload).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                let broken = body_error.lock().ok().and_then(|mut slot| slot.take());
                Err(match broken {
                    Some(e) => body_stream_error(e),
                    None => upload_error(failure),
                })
            }
        }
    }

    fn build_throttle(&self) -> Result<Option<Throttle>, JobError> {
        let Some(rate) = self.spec.rate_limit_bytes_per_second else {
            return Ok(None);
        };
        let throttle = Throttle::new(ThrottleOptions::new(rate))
            .map_err(|e| JobError::Configuration(e.to_string()))?;
        debug!(
            job = %self.id,
            rate,
            chunk_size = throttle.chunk_size(),
            "throttle configured"
        );
        Ok(Some(throttle))
    }

    async fn download(&self) -> Result<Download, JobError> {
        let mut attempt = 0;
        loop {
            match self.transport.download(&self.spec.source_url).await {
                Ok(download) => return Ok(download),
                Err(failure) if self.retry.should_retry(attempt, &failure) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        job = %self.id,
                        attempt = attempt + 1,
                        error = %failure,
                        ?delay,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err(download_error(failure)),
            }
        }
    }

    async fn report(&self, payload: &CallbackPayload) -> Result<(), JobError> {
        let body = serde_json::to_value(payload).map_err(|e| JobError::Callback(e.to_string()))?;
        match self.transport.post_json(&self.spec.callback_url, &body).await {
            Ok(()) => {
                debug!(job = %self.id, "callback delivered");
                Ok(())
            }
            Err(e) => {
                warn!(job = %self.id, url = %self.spec.callback_url, error = %e, "callback failed");
                Err(JobError::Callback(e.to_string()))
            }
        }
    }

    fn set_state(&mut self, state: JobState) {
        debug!(job = %self.id, from = ?self.state, to = ?state, "state change");
        self.state = state;
    }
}

fn download_error(failure: HttpFailure) -> JobError {
    match failure {
        HttpFailure::Status { status, body } => JobError::Download {
            status: Some(status),
            detail: body,
        },
        HttpFailure::Transport(detail) => JobError::Download {
            status: None,
            detail,
        },
    }
}

fn upload_error(failure: HttpFailure) -> JobError {
    match failure {
        HttpFailure::Status { status, body } => JobError::UploadStatus { status, body },
        HttpFailure::Transport(msg) => JobError::UploadTransport(msg),
    }
}

/// A body stream error means the source broke, not the upload endpoint.
fn body_stream_error(e: TransferError) -> JobError {
    match e {
        TransferError::Source(detail) => JobError::Download {
            status: None,
            detail,
        },
        TransferError::LengthMismatch { .. } => JobError::Download {
            status: None,
            detail: e.to_string(),
        },
        other => JobError::UploadTransport(other.to_string()),
    }
}

fn encoding_error(e: TransferError) -> JobError {
    JobError::Configuration(e.to_string())
}
