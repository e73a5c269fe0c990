//! Incremental reader for line-framed Server-Sent Events bodies.
//!
//! A [`StreamReader`] pulls one line at a time from a live response body and
//! yields decoded payloads of type `T`:
//!
//! - `data: <json>` lines decode into `T`;
//! - `data: [DONE]` ends the stream, and every later [`next`](StreamReader::next)
//!   returns `Ok(None)`;
//! - `data: {"error": ...}` starts an in-band error, which is decoded from the
//!   accumulated error buffer on the following read;
//! - anything else (blank separators, `: keep-alive` comments) is noise,
//!   appended to the error buffer and counted against `empty_messages_limit`.
//!
//! Only the line in flight and the error buffer are held in memory.

use std::io;
use std::marker::PhantomData;
use std::pin::Pin;

use futures::Stream;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader as BodyReader;
use tracing::{debug, trace};

use super::classify::decode_error_envelope;
use super::headers::RateLimitHeaders;
use crate::error::{ApiError, Error, Result};

const DATA_PREFIX: &[u8] = b"data: ";
const ERROR_PREFIX: &[u8] = br#"data: {"error":"#;
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Structural classification of one trimmed body line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A data line; holds the payload after the marker.
    Data(&'a [u8]),
    /// The terminal `data: [DONE]` line.
    Done,
    /// A data line opening an error envelope; holds the payload after the marker.
    ErrorLead(&'a [u8]),
    /// Any line without the data marker.
    Noise(&'a [u8]),
}

impl<'a> Frame<'a> {
    pub fn classify(line: &'a [u8]) -> Self {
        if line.starts_with(ERROR_PREFIX) {
            return Frame::ErrorLead(&line[DATA_PREFIX.len()..]);
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(DONE_SENTINEL) => Frame::Done,
            Some(payload) => Frame::Data(payload),
            None => Frame::Noise(line),
        }
    }

    /// The line with the data marker stripped, if it had one.
    pub fn payload(&self) -> &'a [u8] {
        match *self {
            Frame::Data(p) | Frame::ErrorLead(p) | Frame::Noise(p) => p,
            Frame::Done => DONE_SENTINEL,
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    finished: bool,
    empty_messages: usize,
    empty_messages_limit: usize,
    error_buffer: Vec<u8>,
}

type Body = Pin<Box<dyn AsyncBufRead + Send>>;

/// Pull-based reader over an event-stream body.
///
/// Not `Clone`; `next` takes `&mut self`, so a reader has a single consumer.
pub struct StreamReader<T> {
    body: Option<Body>,
    headers: HeaderMap,
    state: StreamState,
    line: Vec<u8>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for StreamReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("open", &self.body.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl<T: DeserializeOwned> StreamReader<T> {
    /// Wrap any buffered async reader. `headers` are the response headers of
    /// the request that produced the body.
    pub fn new(
        body: impl AsyncBufRead + Send + 'static,
        empty_messages_limit: usize,
        headers: HeaderMap,
    ) -> Self {
        Self {
            body: Some(Box::pin(body)),
            headers,
            state: StreamState {
                empty_messages_limit,
                ..Default::default()
            },
            line: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Bind a reader to the live body of a successful response.
    pub(crate) fn from_response(resp: reqwest::Response, empty_messages_limit: usize) -> Self {
        let headers = resp.headers().clone();
        let chunks = futures::stream::unfold(resp, |mut resp| async move {
            match resp.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), resp)),
                Ok(None) => None,
                Err(e) => Some((Err(io::Error::other(e)), resp)),
            }
        });
        Self::new(BodyReader::new(Box::pin(chunks)), empty_messages_limit, headers)
    }

    /// Receive the next payload.
    ///
    /// Returns `Ok(None)` at the end of the stream, both when the terminal
    /// sentinel is read and on every call after it.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.state.finished || self.body.is_none() {
            return Ok(None);
        }

        let mut error_lead = false;
        self.state.empty_messages = 0;

        loop {
            let read = self.read_line().await;
            if error_lead || !matches!(read, Ok(true)) {
                return self.finish_with_error(read, error_lead);
            }

            let line = self.line.trim_ascii();
            let frame = Frame::classify(line);
            trace!(frame = ?FrameKind::from(&frame), len = line.len(), "stream line");

            if let Frame::ErrorLead(_) = frame {
                error_lead = true;
            }

            match frame {
                Frame::Done if !error_lead => {
                    debug!("stream reached [DONE]");
                    self.state.finished = true;
                    self.body = None;
                    return Ok(None);
                }
                Frame::Data(payload) if !error_lead => {
                    return serde_json::from_slice(payload)
                        .map(Some)
                        .map_err(Error::MalformedPayload);
                }
                other => {
                    self.state.error_buffer.extend_from_slice(other.payload());
                    self.state.empty_messages += 1;
                    if self.state.empty_messages > self.state.empty_messages_limit {
                        return Err(Error::TooManyEmptyMessages {
                            limit: self.state.empty_messages_limit,
                        });
                    }
                }
            }
        }
    }

    /// Adapt the reader into a [`Stream`] that ends after the terminal frame
    /// or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send
    where
        T: Send + 'static,
    {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<T> StreamReader<T> {
    /// Release the underlying body. Further calls to `next` return `Ok(None)`.
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            debug!("stream closed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn rate_limits(&self) -> RateLimitHeaders {
        RateLimitHeaders::from_headers(&self.headers)
    }

    /// Read one line into `self.line`. `Ok(false)` means the body ended; a
    /// trailing line without a newline counts as the end.
    async fn read_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        let Some(body) = self.body.as_mut() else {
            return Ok(false);
        };
        let n = body.read_until(b'\n', &mut self.line).await?;
        Ok(n > 0 && self.line.last() == Some(&b'\n'))
    }

    /// Resolve a read failure, end of body, or pending error-lead line.
    fn finish_with_error(&self, read: io::Result<bool>, error_lead: bool) -> Result<Option<T>> {
        if let Some(err) = decode_error_envelope(&self.state.error_buffer) {
            return Err(Error::Stream(err));
        }
        match read {
            Err(e) => Err(Error::Io(e)),
            Ok(false) => Ok(None),
            // An error-lead line whose buffer did not decode into a message.
            Ok(true) => {
                debug_assert!(error_lead);
                Err(Error::Stream(ApiError {
                    message: String::from_utf8_lossy(&self.state.error_buffer).into_owned(),
                    ..Default::default()
                }))
            }
        }
    }
}

/// Payload-free frame label for trace output.
#[derive(Debug)]
enum FrameKind {
    Data,
    Done,
    ErrorLead,
    Noise,
}

impl From<&Frame<'_>> for FrameKind {
    fn from(frame: &Frame<'_>) -> Self {
        match frame {
            Frame::Data(_) => FrameKind::Data,
            Frame::Done => FrameKind::Done,
            Frame::ErrorLead(_) => FrameKind::ErrorLead,
            Frame::Noise(_) => FrameKind::Noise,
        }
    }
}
