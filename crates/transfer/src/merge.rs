use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tracing::debug;

use crate::{ByteStream, TransferError};

/// Concatenates byte sources in the order they were pushed.
///
/// Only the front source is ever polled; it is dropped as soon as it ends,
/// so at most one source is open for reading at a time. If a source fails,
/// its error is yielded once, all remaining sources are dropped, and the
/// merged stream ends.
#[derive(Default)]
pub struct OrderedStreamMerger {
    sources: VecDeque<ByteStream>,
    started: bool,
    finished: bool,
}

impl OrderedStreamMerger {
    /// Creates an empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source after all previously pushed ones.
    ///
    /// Sources must be registered before the first read.
    pub fn push(&mut self, source: ByteStream) -> Result<(), TransferError> {
        if self.started {
            return Err(TransferError::Usage("source pushed after reading started"));
        }
        self.sources.push_back(source);
        Ok(())
    }

    /// Appends an in-memory chunk as its own source.
    pub fn push_bytes(&mut self, bytes: impl Into<Bytes>) -> Result<(), TransferError> {
        let bytes = bytes.into();
        self.push(Box::pin(futures_util::stream::once(async move {
            Ok::<_, TransferError>(bytes)
        })))
    }

    /// Number of sources not yet exhausted.
    pub fn remaining(&self) -> usize {
        self.sources.len()
    }
}

impl Stream for OrderedStreamMerger {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.started = true;

        if this.finished {
            return Poll::Ready(None);
        }

        while let Some(front) = this.sources.front_mut() {
            match front.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
                Poll::Ready(Some(Err(e))) => {
                    debug!(
                        error = %e,
                        dropped = this.sources.len() - 1,
                        "merged source failed"
                    );
                    this.finished = true;
                    this.sources.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.sources.pop_front();
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        this.finished = true;
        Poll::Ready(None)
    }
}
