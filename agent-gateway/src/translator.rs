//! Agent event stream to OpenAI chunk stream.
//!
//! One [`StreamTranslator`] per streaming request. It always emits a role
//! chunk, the content deltas, a finish chunk and the `[DONE]` marker, in that
//! order and each framing chunk once, even when the backend stream fails.

use crate::backend::{parse_event_line, AgentEvent, EventSource};
use crate::error::GatewayError;
use crate::openai::{ChatCompletionChunk, ChunkFactory};
use futures_util::stream::{self, Stream};

/// Termination marker sent as the last frame.
pub const DONE_MARKER: &str = "[DONE]";

const UNKNOWN_ERROR: &str = "unknown error";

/// Where the translator is in the backend event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingStart,
    Streaming,
    Done,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

/// Outcome of feeding one raw line to the translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to emit.
    Skip,
    /// Emit this text as a content delta.
    Delta(String),
    /// Stop reading the backend stream.
    Finished,
}

/// One frame of the caller-facing stream.
#[derive(Debug, Clone)]
pub enum Frame {
    Chunk(ChatCompletionChunk),
    Done,
}

impl Frame {
    /// Payload for the `data:` field of the SSE event.
    pub fn data(&self) -> String {
        match self {
            Self::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to serialize chunk");
                String::from("{}")
            }),
            Self::Done => DONE_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Role,
    Content,
    Finish,
    Marker,
    Closed,
}

pub struct StreamTranslator {
    source: EventSource,
    chunks: ChunkFactory,
    state: StreamState,
    phase: Phase,
    task_id: Option<String>,
    error: Option<GatewayError>,
    session_id: Option<String>,
}

impl StreamTranslator {
    pub fn new(source: EventSource, model: &str) -> Self {
        Self {
            source,
            chunks: ChunkFactory::new(model),
            state: StreamState::AwaitingStart,
            phase: Phase::Role,
            task_id: None,
            error: None,
            session_id: None,
        }
    }

    /// Attach the session id to log lines.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Why the stream ended early, if it did.
    pub fn error(&self) -> Option<&GatewayError> {
        self.error.as_ref()
    }

    /// Backend task id from `message_start`.
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or("-")
    }

    /// Advance the state machine by one raw backend line.
    pub fn apply_line(&mut self, line: &str) -> Step {
        if self.state.is_terminal() {
            return Step::Finished;
        }

        tracing::debug!(session_id = self.session(), line, "Backend line");

        let event = match parse_event_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return Step::Skip,
            Err(e) => {
                tracing::debug!(session_id = self.session(), error = %e, "Skipping backend line");
                return Step::Skip;
            }
        };

        match event {
            AgentEvent::MessageStart { task_id } => {
                self.state = StreamState::Streaming;
                self.task_id = task_id.as_ref().map(AgentEvent::value_text);
                tracing::debug!(
                    session_id = self.session(),
                    task_id = self.task_id.as_deref().unwrap_or("-"),
                    "Agent stream started"
                );
                Step::Skip
            }
            AgentEvent::Message { answer } => {
                // Some backends skip message_start
                self.state = StreamState::Streaming;
                match answer {
                    Some(text) if !text.is_empty() => {
                        tracing::debug!(session_id = self.session(), delta = %text, "Content delta");
                        Step::Delta(text)
                    }
                    _ => Step::Skip,
                }
            }
            AgentEvent::MessageEnd => {
                self.state = StreamState::Done;
                tracing::debug!(session_id = self.session(), "Agent stream finished");
                Step::Finished
            }
            AgentEvent::MessageFailed { error } => {
                let message = error
                    .as_ref()
                    .map(AgentEvent::value_text)
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                tracing::error!(
                    session_id = self.session(),
                    task_id = self.task_id.as_deref().unwrap_or("-"),
                    error = %message,
                    "Agent stream failed"
                );
                self.state = StreamState::Errored;
                self.error = Some(GatewayError::StreamTerminatedWithError(message));
                Step::Finished
            }
            AgentEvent::Other => Step::Skip,
        }
    }

    /// Pull the next caller-facing frame. `None` after `[DONE]`.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.phase {
                Phase::Role => {
                    self.phase = Phase::Content;
                    return Some(Frame::Chunk(self.chunks.role()));
                }
                Phase::Content => match self.source.next_line().await {
                    Some(Ok(line)) => match self.apply_line(&line) {
                        Step::Skip => {}
                        Step::Delta(text) => return Some(Frame::Chunk(self.chunks.content(text))),
                        Step::Finished => self.phase = Phase::Finish,
                    },
                    Some(Err(e)) => {
                        tracing::warn!(session_id = self.session(), error = %e, "Agent stream interrupted");
                        self.state = StreamState::Errored;
                        self.error = Some(e);
                        self.phase = Phase::Finish;
                    }
                    None => {
                        if !self.state.is_terminal() {
                            tracing::debug!(
                                session_id = self.session(),
                                "Agent stream ended without message_end"
                            );
                            self.state = StreamState::Done;
                        }
                        self.phase = Phase::Finish;
                    }
                },
                Phase::Finish => {
                    self.phase = Phase::Marker;
                    return Some(Frame::Chunk(self.chunks.finish()));
                }
                Phase::Marker => {
                    self.phase = Phase::Closed;
                    return Some(Frame::Done);
                }
                Phase::Closed => return None,
            }
        }
    }

    /// Drive the translator as a stream of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        stream::unfold(self, |mut translator| async move {
            translator.next_frame().await.map(|frame| (frame, translator))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    /// Render frames as short tags for order assertions.
    async fn drain(translator: &mut StreamTranslator) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = translator.next_frame().await {
            out.push(match frame {
                Frame::Done => DONE_MARKER.to_string(),
                Frame::Chunk(chunk) => {
                    let json: Value = serde_json::to_value(&chunk).unwrap();
                    let choice = &json["choices"][0];
                    if choice["finish_reason"] == "stop" {
                        "stop".to_string()
                    } else if choice["delta"]["role"] == "assistant" {
                        "role".to_string()
                    } else {
                        format!("content:{}", choice["delta"]["content"].as_str().unwrap())
                    }
                }
            });
        }
        out
    }

    fn translator(lines: &[&str]) -> StreamTranslator {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        StreamTranslator::new(EventSource::from_lines(lines), "agent-model")
    }

    #[tokio::test]
    async fn test_normal_sequence() {
        let mut t = translator(&[
            r#"data: {"event": "message_start", "task_id": "t-1"}"#,
            "",
            r#"data: {"event": "message", "answer": "Hi"}"#,
            r#"data: {"event": "message", "answer": " there"}"#,
            r#"data: {"event": "message_end"}"#,
        ]);

        assert_eq!(
            drain(&mut t).await,
            vec!["role", "content:Hi", "content: there", "stop", "[DONE]"]
        );
        assert_eq!(t.state(), StreamState::Done);
        assert_eq!(t.task_id(), Some("t-1"));
        assert!(t.error().is_none());
    }

    #[tokio::test]
    async fn test_failed_sequence_emits_no_content() {
        let mut t = translator(&[
            r#"data: {"event": "message_start", "task_id": "t-2"}"#,
            r#"data: {"event": "message_failed", "error": "boom"}"#,
            r#"data: {"event": "message", "answer": "never"}"#,
        ]);

        assert_eq!(drain(&mut t).await, vec!["role", "stop", "[DONE]"]);
        assert_eq!(t.state(), StreamState::Errored);
        match t.error() {
            Some(GatewayError::StreamTerminatedWithError(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_without_error_text() {
        let mut t = translator(&[r#"data: {"event": "message_failed"}"#]);
        drain(&mut t).await;
        assert!(t.error().unwrap().to_string().contains("unknown error"));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let mut t = translator(&[
            r#"data: {"event": "message_start"}"#,
            "data: {not json",
            r#"data: {"event": "message", "answer": "still here"}"#,
            r#"data: {"event": "message_end"}"#,
        ]);

        assert_eq!(
            drain(&mut t).await,
            vec!["role", "content:still here", "stop", "[DONE]"]
        );
        assert_eq!(t.state(), StreamState::Done);
    }

    #[tokio::test]
    async fn test_source_end_closes_gracefully() {
        let mut t = translator(&[
            r#"data: {"event": "message_start"}"#,
            r#"data: {"event": "message", "answer": "partial"}"#,
        ]);

        assert_eq!(
            drain(&mut t).await,
            vec!["role", "content:partial", "stop", "[DONE]"]
        );
        assert_eq!(t.state(), StreamState::Done);
    }

    #[tokio::test]
    async fn test_source_error_closes_gracefully() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"event\": \"message\", \"answer\": \"a\"}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let source = EventSource::from_byte_stream(stream::iter(chunks));
        let mut t = StreamTranslator::new(source, "agent-model");

        assert_eq!(drain(&mut t).await, vec!["role", "content:a", "stop", "[DONE]"]);
        assert_eq!(t.state(), StreamState::Errored);
        assert!(matches!(t.error(), Some(GatewayError::BackendUnavailable(_))));
    }

    #[test]
    fn test_apply_line_transitions() {
        let mut t = translator(&[]);
        assert_eq!(t.state(), StreamState::AwaitingStart);

        assert_eq!(t.apply_line(": ping"), Step::Skip);
        assert_eq!(t.apply_line(r#"data: {"event": "agent_thought"}"#), Step::Skip);
        assert_eq!(t.state(), StreamState::AwaitingStart);

        assert_eq!(t.apply_line(r#"data: {"event": "message_start"}"#), Step::Skip);
        assert_eq!(t.state(), StreamState::Streaming);

        assert_eq!(t.apply_line(r#"data: {"event": "message", "answer": ""}"#), Step::Skip);
        assert_eq!(
            t.apply_line(r#"data: {"event": "message", "answer": "x"}"#),
            Step::Delta("x".into())
        );

        assert_eq!(t.apply_line(r#"data: {"event": "message_end"}"#), Step::Finished);
        // Terminal states ignore further input
        assert_eq!(
            t.apply_line(r#"data: {"event": "message", "answer": "late"}"#),
            Step::Finished
        );
    }

    /// Byte stream that never ends, counting polls and recording its drop.
    struct EndlessBody {
        chunks: VecDeque<Vec<u8>>,
        polls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for EndlessBody {
        type Item = Result<Vec<u8>, std::io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.chunks.pop_front() {
                Some(chunk) => Poll::Ready(Some(Ok(chunk))),
                None => Poll::Pending,
            }
        }
    }

    impl Drop for EndlessBody {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_backend() {
        let polls = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let body = EndlessBody {
            chunks: VecDeque::from(vec![
                b"data: {\"event\": \"message_start\"}\n".to_vec(),
                b"data: {\"event\": \"message\", \"answer\": \"Hi\"}\n".to_vec(),
                b"data: {\"event\": \"message\", \"answer\": \"unread\"}\n".to_vec(),
            ]),
            polls: Arc::clone(&polls),
            dropped: Arc::clone(&dropped),
        };

        let translator = StreamTranslator::new(EventSource::from_byte_stream(body), "agent-model");
        let mut frames = Box::pin(translator.into_stream());

        let role = frames.next().await.unwrap();
        assert!(matches!(role, Frame::Chunk(_)));
        let content: Value = serde_json::from_str(&frames.next().await.unwrap().data()).unwrap();
        assert_eq!(content["choices"][0]["delta"]["content"], "Hi");
        let polled = polls.load(Ordering::SeqCst);
        assert!(!dropped.load(Ordering::SeqCst));

        drop(frames);

        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(polls.load(Ordering::SeqCst), polled);
    }

    #[tokio::test]
    async fn test_into_stream_frames() {
        let t = translator(&[
            r#"data: {"event": "message", "answer": "ok"}"#,
            r#"data: {"event": "message_end"}"#,
        ]);
        let frames: Vec<String> = t.into_stream().map(|f| f.data()).collect().await;

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], "[DONE]");
        let content: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(content["choices"][0]["delta"]["content"], "ok");
    }
}
