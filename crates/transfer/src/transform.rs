//! Composable chunk transforms and the stream adapter that drives them.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;

use crate::TransferError;

/// A stage that turns each input chunk into zero or more output chunks.
///
/// The driver pushes one chunk, then polls output until the transform
/// returns `Ready(None)`; only then is the next chunk pulled from upstream.
/// Returning `Pending` from [`poll_output`](Self::poll_output) therefore
/// stalls the whole upstream pipeline.
pub trait ByteTransform: Send + Unpin {
    /// Hands over the next input chunk.
    ///
    /// Only called after `poll_output` returned `Ready(None)`.
    fn push(&mut self, chunk: Bytes);

    /// Polls the next output chunk.
    ///
    /// `Ready(None)` means the last pushed chunk is fully consumed.
    /// An error terminates the stream.
    fn poll_output(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, TransferError>>>;
}

impl<T: ByteTransform + ?Sized> ByteTransform for Box<T> {
    fn push(&mut self, chunk: Bytes) {
        (**self).push(chunk);
    }

    fn poll_output(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, TransferError>>> {
        (**self).poll_output(cx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    InputDone,
    Finished,
}

/// Stream adapter running `input` through a [`ByteTransform`].
///
/// An upstream error is forwarded unchanged and ends the stream.
pub struct Transformed<S, T> {
    input: S,
    transform: T,
    state: State,
}

impl<S, T> Transformed<S, T> {
    /// Wraps `input` with `transform`.
    pub fn new(input: S, transform: T) -> Self {
        Self {
            input,
            transform,
            state: State::Open,
        }
    }
}

impl<S, T> Stream for Transformed<S, T>
where
    S: Stream<Item = Result<Bytes, TransferError>> + Unpin,
    T: ByteTransform,
{
    type Item = Result<Bytes, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.state == State::Finished {
                return Poll::Ready(None);
            }

            match this.transform.poll_output(cx) {
                Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
                Poll::Ready(Some(Err(e))) => {
                    this.state = State::Finished;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {}
            }

            if this.state == State::InputDone {
                this.state = State::Finished;
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.input).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.transform.push(chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.state = State::Finished;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.state = State::InputDone,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Identity transform that counts the bytes flowing through it.
///
/// Serves as the pass-through stage when no rate limit is configured.
#[derive(Debug, Default)]
pub struct Metered {
    counter: Arc<AtomicU64>,
    pending: Option<Bytes>,
}

impl Metered {
    /// Creates a transform with a fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transform that adds to an existing counter.
    pub fn with_counter(counter: Arc<AtomicU64>) -> Self {
        Self {
            counter,
            pending: None,
        }
    }

    /// Shared handle to the byte counter.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.counter)
    }
}

impl ByteTransform for Metered {
    fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.pending = Some(chunk);
        }
    }

    fn poll_output(&mut self, _cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, TransferError>>> {
        match self.pending.take() {
            Some(chunk) => {
                self.counter
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Poll::Ready(Some(Ok(chunk)))
            }
            None => Poll::Ready(None),
        }
    }
}
