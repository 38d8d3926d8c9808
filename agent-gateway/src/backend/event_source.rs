//! Line framing and event parsing for the Agent API event stream.
//!
//! The backend streams `data: {...}` lines. [`EventSource`] turns the raw
//! byte stream into lines, splitting on `\n` at the byte level so multi-byte
//! characters cut across network chunks are reassembled before decoding.

use crate::error::GatewayError;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;
use std::time::Duration;

/// Prefix of a data line in the event-stream protocol.
const DATA_PREFIX: &str = "data:";

/// Sentinel some backends send after the last event.
const DONE_SENTINEL: &str = "[DONE]";

/// Longest line accepted from the backend before the stream is abandoned.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Lazily consumed sequence of lines from a streaming backend response.
///
/// The sequence ends when the body ends. It has no built-in end otherwise,
/// so an idle timeout bounds the wait for each chunk.
pub struct EventSource {
    inner: BoxStream<'static, Result<Vec<u8>, GatewayError>>,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl EventSource {
    /// Wrap a byte stream, such as `reqwest::Response::bytes_stream()`.
    pub fn from_byte_stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + 'static,
        E: Display + 'static,
    {
        let inner = stream
            .map(|chunk| {
                chunk.map(|bytes| bytes.as_ref().to_vec()).map_err(|e| {
                    GatewayError::BackendUnavailable(format!("stream read failed: {}", e))
                })
            })
            .boxed();

        Self {
            inner,
            buffer: Vec::new(),
            idle_timeout: None,
            finished: false,
        }
    }

    /// Build a source that yields the given lines, one chunk per line.
    pub fn from_lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let chunks: Vec<Result<Vec<u8>, GatewayError>> = lines
            .into_iter()
            .map(|line| {
                let mut bytes = line.into().into_bytes();
                bytes.push(b'\n');
                Ok(bytes)
            })
            .collect();

        Self::from_byte_stream(stream::iter(chunks))
    }

    /// Fail the stream if no chunk arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Pull the next line, without its line terminator.
    ///
    /// Returns `None` once the body has ended and every buffered line was
    /// handed out. A read error, idle timeout or oversized line is returned
    /// once, after which the source is exhausted.
    pub async fn next_line(&mut self) -> Option<Result<String, GatewayError>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                return Some(Ok(decode_line(line)));
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                self.finished = true;
                self.buffer.clear();
                return Some(Err(GatewayError::MalformedBackendFrame(format!(
                    "line exceeds {} bytes without a terminator",
                    MAX_LINE_BYTES
                ))));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buffer);
                return Some(Ok(decode_line(rest)));
            }

            let next = match self.idle_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, self.inner.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.finished = true;
                        self.buffer.clear();
                        return Some(Err(GatewayError::BackendUnavailable(format!(
                            "no stream data within {}s",
                            timeout.as_secs()
                        ))));
                    }
                },
                None => self.inner.next().await,
            };

            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
                None => self.finished = true,
            }
        }
    }
}

fn decode_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

// ============================================================================
// Event Parsing
// ============================================================================

/// One event from the Agent API stream, tagged by its `event` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    MessageStart {
        #[serde(default)]
        task_id: Option<Value>,
    },
    Message {
        #[serde(default)]
        answer: Option<String>,
    },
    MessageEnd,
    MessageFailed {
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Other,
}

impl AgentEvent {
    /// Render a loosely typed payload field as plain text.
    pub fn value_text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Parse one raw stream line.
///
/// `Ok(None)` for lines that carry no event (non-data lines, blank payloads,
/// the `[DONE]` sentinel); `Err(MalformedBackendFrame)` for data lines whose
/// payload is not a JSON event.
pub fn parse_event_line(line: &str) -> Result<Option<AgentEvent>, GatewayError> {
    let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };

    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return Ok(None);
    }

    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| GatewayError::MalformedBackendFrame(format!("{}: {}", e, payload)))
}
