//! Fire-and-forget job execution with tracked shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::{JobSpec, Outcome, TransferJob};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Server-wide settings applied to every job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobDefaults {
    /// Used when a request carries no rate limit of its own.
    pub rate_limit_bytes_per_second: Option<f64>,
    pub retry: RetryPolicy,
    /// How long [`JobRunner::shutdown`] waits for cancelled jobs to report.
    pub shutdown_grace: Duration,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            rate_limit_bytes_per_second: None,
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// A started job.
pub struct JobHandle {
    id: Uuid,
    started_at: DateTime<Utc>,
    join: JoinHandle<Outcome>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Start time as RFC 3339 with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
    pub fn started_at_rfc3339(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Waits for the job to finish. Returns `None` if the task panicked.
    pub async fn join(self) -> Option<Outcome> {
        self.join.await.ok()
    }
}

/// Spawns jobs onto the runtime and tracks them for shutdown.
#[derive(Clone)]
pub struct JobRunner {
    transport: Arc<dyn Transport>,
    defaults: JobDefaults,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new(transport: Arc<dyn Transport>, defaults: JobDefaults) -> Self {
        Self {
            transport,
            defaults,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns a job and returns without waiting for it.
    ///
    /// Must be called from within a tokio runtime. Jobs started after
    /// [`shutdown`](Self::shutdown) report `cancelled` immediately.
    pub fn start(&self, mut spec: JobSpec) -> JobHandle {
        if spec.rate_limit_bytes_per_second.is_none() {
            spec.rate_limit_bytes_per_second = self.defaults.rate_limit_bytes_per_second;
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let job = TransferJob::new(
            id,
            spec,
            Arc::clone(&self.transport),
            self.defaults.retry,
            self.cancel.child_token(),
        );
        let join = self.tracker.spawn(job.perform());

        JobHandle {
            id,
            started_at,
            join,
        }
    }

    /// Number of jobs still running.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels in-flight jobs and waits until each has posted its callback.
    ///
    /// Gives up after the configured grace period; returns `false` if some
    /// jobs were still running by then.
    pub async fn shutdown(&self) -> bool {
        info!(active = self.tracker.len(), "shutting down job runner");
        self.cancel.cancel();
        self.tracker.close();

        let grace = self.defaults.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                active = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "jobs still running after shutdown grace period"
            );
            return false;
        }
        true
    }
}
