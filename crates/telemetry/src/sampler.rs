//! Async memory sampler with configurable interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::platform;

/// Interval used when `start` is given a zero duration.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One RSS reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub rss_bytes: u64,
}

impl MemorySample {
    /// RSS in whole mebibytes, rounded to nearest.
    pub fn rss_mb(&self) -> u64 {
        (self.rss_bytes + BYTES_PER_MB / 2) / BYTES_PER_MB
    }
}

/// Callback invoked with each sample.
pub type SampleFn = Box<dyn Fn(MemorySample) + Send + Sync + 'static>;

/// Periodic RSS sampler.
///
/// Spawns a tokio task that logs the process RSS at `info` on every tick.
pub struct MemorySampler {
    inner: Arc<Mutex<SamplerInner>>,
}

struct SamplerInner {
    on_sample: Option<SampleFn>,
    cancel: Option<CancellationToken>,
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler {
    /// Creates a sampler that only logs.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a sampler that also forwards samples to `on_sample`.
    pub fn with_callback(on_sample: SampleFn) -> Self {
        Self::build(Some(on_sample))
    }

    fn build(on_sample: Option<SampleFn>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SamplerInner {
                on_sample,
                cancel: None,
            })),
        }
    }

    /// Starts sampling every `interval`; restarts if already running.
    pub async fn start(&self, interval: Duration) {
        let mut inner = self.inner.lock().await;

        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }

        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };

        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());

        let sampler = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sampling_loop(sampler, interval, cancel).await;
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "memory sampler started");
    }

    /// Stops the sampler.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
            tracing::info!("memory sampler stopped");
        }
    }

    /// Returns `true` if the sampler is running.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.cancel.is_some()
    }
}

async fn sampling_loop(
    inner: Arc<Mutex<SamplerInner>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(rss_bytes) = platform::read_rss_bytes() else {
                    tracing::debug!("memory sample unavailable");
                    continue;
                };
                let sample = MemorySample { rss_bytes };
                tracing::info!(rss_mb = sample.rss_mb(), "[usage]");

                let guard = inner.lock().await;
                if let Some(on_sample) = &guard.on_sample {
                    on_sample(sample);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_mb_rounds() {
        assert_eq!(MemorySample { rss_bytes: 0 }.rss_mb(), 0);
        assert_eq!(MemorySample { rss_bytes: 3 * BYTES_PER_MB }.rss_mb(), 3);
        assert_eq!(
            MemorySample {
                rss_bytes: 3 * BYTES_PER_MB + BYTES_PER_MB / 2
            }
            .rss_mb(),
            4
        );
    }

    #[tokio::test]
    async fn sampler_start_stop() {
        let sampler = MemorySampler::new();
        assert!(!sampler.is_running().await);

        sampler.start(Duration::from_millis(50)).await;
        assert!(sampler.is_running().await);

        sampler.start(Duration::ZERO).await;
        assert!(sampler.is_running().await);

        sampler.stop().await;
        assert!(!sampler.is_running().await);
    }

    #[tokio::test]
    async fn stop_when_not_running() {
        MemorySampler::new().stop().await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(start_paused = true)]
    async fn callback_receives_samples() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let sampler = MemorySampler::with_callback(Box::new(move |sample| {
            assert!(sample.rss_bytes > 0);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        sampler.start(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(3500)).await;
        sampler.stop().await;

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected at least 2 samples, got {ticks}");
    }
}
