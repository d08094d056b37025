//! Server-sent event framing and long-lived stream sessions.
//!
//! [`SseParser`] turns raw body chunks into [`SseEvent`]s following the
//! `text/event-stream` line format. [`StreamSession`] owns one open response
//! body and hands out events one at a time.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, trace};

use super::TransportError;
use super::constants::MAX_SSE_LINE_BYTES;

/// Event type used when the server does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Logical event type (`message` unless the server sent `event:`).
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last `id:` field seen for this event.
    pub id: Option<String>,
    /// Reconnection hint in milliseconds from a `retry:` field.
    pub retry: Option<u64>,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a body chunk and returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n')
            else {
                self.scanned = self.buffer.len();
                break;
            };
            let newline = self.scanned + offset;
            self.scanned = 0;
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes of the current line still waiting for a newline.
    #[must_use]
    pub fn pending_line_len(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes an event left pending when the body ends without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(millis);
                }
            }
            other => trace!(field = other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self
                .event
                .take()
                .filter(|event| !event.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
            retry: self.retry.take(),
        })
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// One open server-push connection.
///
/// Dropping the session closes the underlying connection.
pub struct StreamSession {
    url: String,
    body: BodyStream,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("url", &self.url)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    pub(crate) fn new(url: impl Into<String>, response: reqwest::Response) -> Self {
        Self::from_stream(url, response.bytes_stream())
    }

    pub(crate) fn from_stream<S>(url: impl Into<String>, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            url: url.into(),
            body: Box::pin(body),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Returns the URL this session is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Waits for the next event.
    ///
    /// Returns `Ok(None)` once the server closes the stream cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the connection fails mid-stream, or
    /// [`TransportError::Decode`] when a line grows past
    /// [`MAX_SSE_LINE_BYTES`] without a newline.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend(self.parser.feed(&chunk));
                    let pending = self.parser.pending_line_len();
                    if pending > MAX_SSE_LINE_BYTES {
                        self.finished = true;
                        return Err(TransportError::decode(
                            self.url.clone(),
                            format!("event line exceeds {MAX_SSE_LINE_BYTES} bytes ({pending} buffered)"),
                        ));
                    }
                }
                Some(Err(error)) => {
                    self.finished = true;
                    return Err(TransportError::network(self.url.clone(), error));
                }
                None => {
                    debug!(url = %self.url, "event stream ended");
                    self.finished = true;
                    self.pending.extend(self.parser.finish());
                }
            }
        }
    }
}
