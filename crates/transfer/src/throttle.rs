//! Token-bucket bandwidth limiting.
//!
//! The throttle slices each chunk into pieces of at most `chunk_size` bytes
//! and only releases a piece once the bucket grants that many tokens. While
//! it waits, the driving stream returns `Pending`, so nothing upstream is
//! read and nothing is buffered beyond the current chunk.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

use crate::transform::{ByteTransform, Transformed};
use crate::TransferError;

/// Shortest wait handed out by the bucket; the timer has 1 ms resolution.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Default slice size as a fraction of the rate.
const DEFAULT_CHUNK_DIVISOR: f64 = 10.0;

/// Outcome of a non-blocking token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Tokens were removed from the bucket.
    Granted,
    /// Not enough tokens yet; retry after this delay.
    Wait(Duration),
    /// The request is larger than the bucket and can never be granted.
    Exceeds,
}

/// Token bucket with continuous refill.
///
/// Starts empty, refills at `refill_rate` tokens per second and never holds
/// more than `capacity` tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates an empty bucket.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: 0.0,
            last_refill: Instant::now(),
        }
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens available right now.
    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }

    /// Removes `amount` tokens if available, otherwise reports how long to wait.
    pub fn try_acquire(&mut self, amount: usize) -> Acquire {
        let amount = amount as f64;
        if amount > self.capacity {
            return Acquire::Exceeds;
        }

        self.refill(Instant::now());
        if self.tokens >= amount {
            self.tokens -= amount;
            return Acquire::Granted;
        }

        let deficit = amount - self.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_rate);
        Acquire::Wait(wait.max(MIN_WAIT))
    }

    /// Discards tokens above `max` that built up while nobody was drawing.
    pub fn limit_burst(&mut self, max: f64) {
        self.refill(Instant::now());
        self.tokens = self.tokens.min(max);
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Throttle configuration as received from callers.
///
/// Validated by [`Throttle::new`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThrottleOptions {
    /// Bytes per second. Required.
    pub rate: Option<f64>,
    /// Bytes per emitted slice. Defaults to `rate / 10`.
    pub chunk_size: Option<f64>,
}

impl ThrottleOptions {
    /// Options for the given rate with the default slice size.
    pub fn new(rate: f64) -> Self {
        Self {
            rate: Some(rate),
            chunk_size: None,
        }
    }

    /// Overrides the slice size.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: f64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// Rate-limiting [`ByteTransform`] backed by its own [`TokenBucket`].
///
/// Bucket capacity equals the rate, but tokens saved up while the source
/// was idle (or downstream was slow) are trimmed to one slice before each
/// grant. Any one-second window therefore carries at most `rate` bytes plus
/// one slice, including right after a pause.
#[derive(Debug)]
pub struct Throttle {
    bucket: TokenBucket,
    rate: f64,
    chunk_size: usize,
    pending: Bytes,
    delay: Option<Pin<Box<Sleep>>>,
}

impl Throttle {
    /// Validates `options` and creates a throttle with a fresh bucket.
    pub fn new(options: ThrottleOptions) -> Result<Self, TransferError> {
        let rate = options
            .rate
            .ok_or_else(|| TransferError::Config("throttle rate is a required argument".into()))?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(TransferError::Config(
                "throttle rate must be a positive number".into(),
            ));
        }

        let chunk = match options.chunk_size {
            Some(c) if !c.is_finite() || c <= 0.0 => {
                return Err(TransferError::Config(
                    "throttle chunk size must be a positive number".into(),
                ));
            }
            Some(c) => c,
            None => rate / DEFAULT_CHUNK_DIVISOR,
        };

        let chunk_size = (chunk.floor() as usize).max(1);
        if chunk_size as f64 > rate {
            return Err(TransferError::Config(format!(
                "throttle chunk size {chunk_size} exceeds rate {rate}"
            )));
        }

        Ok(Self {
            bucket: TokenBucket::new(rate, rate),
            rate,
            chunk_size,
            pending: Bytes::new(),
            delay: None,
        })
    }

    /// Configured rate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum bytes per emitted slice.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Wraps `input` so it is released at this throttle's rate.
    pub fn apply<S>(self, input: S) -> Transformed<S, Self> {
        Transformed::new(input, self)
    }
}

impl ByteTransform for Throttle {
    fn push(&mut self, chunk: Bytes) {
        self.pending = chunk;
    }

    fn poll_output(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, TransferError>>> {
        loop {
            if self.pending.is_empty() {
                return Poll::Ready(None);
            }

            if let Some(delay) = self.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                self.delay = None;
            }

            let n = self.chunk_size.min(self.pending.len());
            self.bucket.limit_burst(self.chunk_size as f64);
            match self.bucket.try_acquire(n) {
                Acquire::Granted => return Poll::Ready(Some(Ok(self.pending.split_to(n)))),
                Acquire::Wait(wait) => {
                    trace!(
                        bytes = n,
                        wait_us = wait.as_micros() as u64,
                        "throttle waiting for tokens"
                    );
                    self.delay = Some(Box::pin(tokio::time::sleep(wait)));
                }
                Acquire::Exceeds => {
                    debug!(
                        bytes = n,
                        capacity = self.bucket.capacity(),
                        "throttle request exceeds bucket"
                    );
                    self.pending.clear();
                    return Poll::Ready(Some(Err(TransferError::Limiter(format!(
                        "requested {n} tokens, bucket capacity is {}",
                        self.bucket.capacity()
                    )))));
                }
            }
        }
    }
}
