//! Streaming `multipart/form-data` encoder.
//!
//! Parts are framed in append order into an [`OrderedStreamMerger`]. Header
//! text and JSON payloads are buffered in memory; stream payloads are pulled
//! only when the body is read.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use rand::Rng;
use serde::Serialize;

use crate::merge::OrderedStreamMerger;
use crate::{ByteStream, TransferError};

/// Fixed leading part of every generated boundary.
pub const BOUNDARY_PREFIX: &str = "--------------------------";

const CRLF: &[u8] = b"\r\n";
const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Descriptor of a single form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    name: String,
    content_type: Option<String>,
    filename: Option<String>,
}

impl Part {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            filename: None,
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// HTTP headers describing an encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHeaders {
    /// `multipart/form-data; boundary=...`
    pub content_type: String,
    /// `None` when a stream part was appended without a known length.
    pub content_length: Option<u64>,
}

/// Assembles form parts into a single byte stream.
///
/// Lifecycle: parts appended, then [`finalize`](Self::finalize) exactly once,
/// then [`into_body`](Self::into_body). Any other order is rejected with
/// [`TransferError::Usage`].
pub struct MultipartEncoder {
    boundary: String,
    merger: OrderedStreamMerger,
    buffered: BytesMut,
    length: Option<u64>,
    finalized: bool,
}

impl MultipartEncoder {
    /// Creates an encoder with a fresh random boundary.
    pub fn new() -> Self {
        Self::with_boundary(random_boundary())
    }

    /// Creates an encoder with a caller-chosen boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            merger: OrderedStreamMerger::new(),
            buffered: BytesMut::new(),
            length: Some(0),
            finalized: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Total body length, if every stream part declared one.
    pub fn content_length(&self) -> Option<u64> {
        self.length
    }

    pub fn headers(&self) -> MultipartHeaders {
        MultipartHeaders {
            content_type: format!("multipart/form-data; boundary={}", self.boundary),
            content_length: self.length,
        }
    }

    /// Appends a field whose payload is `value` serialized as JSON.
    pub fn append_json<T>(&mut self, part: Part, value: &T) -> Result<&mut Self, TransferError>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        let payload = serde_json::to_vec(value)?;

        self.write_header(&part, JSON_CONTENT_TYPE);
        self.write(&payload);
        self.write(CRLF);
        Ok(self)
    }

    /// Appends a field whose payload is read from `stream` when the body is read.
    ///
    /// A declared `known_length` is enforced: the body fails with
    /// [`TransferError::LengthMismatch`] if the stream yields a different
    /// number of bytes.
    pub fn append_stream(
        &mut self,
        part: Part,
        stream: ByteStream,
        known_length: Option<u64>,
    ) -> Result<&mut Self, TransferError> {
        self.ensure_open()?;

        self.write_header(&part, OCTET_STREAM_CONTENT_TYPE);
        self.flush()?;

        let payload = match known_length {
            Some(declared) => {
                self.length = self.length.map(|len| len + declared);
                Box::pin(ExactLength::new(stream, declared)) as ByteStream
            }
            None => {
                self.length = None;
                stream
            }
        };
        self.merger.push(payload)?;

        self.write(CRLF);
        Ok(self)
    }

    /// Appends the closing boundary.
    pub fn finalize(&mut self) -> Result<(), TransferError> {
        self.ensure_open()?;
        let terminator = format!("--{}--", self.boundary);
        self.write(terminator.as_bytes());
        self.flush()?;
        self.finalized = true;
        Ok(())
    }

    /// Consumes the encoder and returns the body stream.
    pub fn into_body(self) -> Result<ByteStream, TransferError> {
        if !self.finalized {
            return Err(TransferError::Usage("multipart body read before finalize"));
        }
        Ok(Box::pin(self.merger))
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.finalized {
            return Err(TransferError::Usage("multipart encoder already finalized"));
        }
        Ok(())
    }

    fn write_header(&mut self, part: &Part, default_content_type: &str) {
        let content_type = part.content_type.as_deref().unwrap_or(default_content_type);
        let mut header = format!(
            "--{}\r\nContent-Type: {}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            content_type,
            escape_quoted(&part.name)
        );
        if let Some(filename) = &part.filename {
            header.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
        }
        header.push_str("\r\n\r\n");
        self.write(header.as_bytes());
    }

    fn write(&mut self, data: &[u8]) {
        self.buffered.put_slice(data);
        self.length = self.length.map(|len| len + data.len() as u64);
    }

    fn flush(&mut self) -> Result<(), TransferError> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let chunk = self.buffered.split().freeze();
        self.merger.push_bytes(chunk)
    }
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn random_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill(&mut bytes);
    format!("{BOUNDARY_PREFIX}{}", hex::encode(bytes))
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Fails the stream if it yields more or fewer bytes than declared.
struct ExactLength {
    inner: ByteStream,
    declared: u64,
    seen: u64,
    done: bool,
}

impl ExactLength {
    fn new(inner: ByteStream, declared: u64) -> Self {
        Self {
            inner,
            declared,
            seen: 0,
            done: false,
        }
    }

    fn mismatch(&mut self) -> TransferError {
        self.done = true;
        TransferError::LengthMismatch {
            declared: self.declared,
            actual: self.seen,
        }
    }
}

impl Stream for ExactLength {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.seen += chunk.len() as u64;
                if this.seen > this.declared {
                    return Poll::Ready(Some(Err(this.mismatch())));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if this.seen != this.declared {
                    return Poll::Ready(Some(Err(this.mismatch())));
                }
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
