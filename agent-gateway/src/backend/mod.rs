//! Client side of the Agent conversational API.
//!
//! The gateway talks to exactly one backend. [`ConversationBackend`] is the
//! seam the conversation store and the route handlers depend on; [`AgentClient`]
//! is the HTTP implementation.

mod agent;
mod event_source;

pub use agent::AgentClient;
pub use event_source::{parse_event_line, AgentEvent, EventSource};

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Backend Trait
// ============================================================================

/// Operations the gateway needs from the conversational backend.
///
/// Implementations fail fast: no call is retried here.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Create a backend conversation and return its opaque handle.
    async fn create_conversation(
        &self,
        user_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, GatewayError>;

    /// Send a query and wait for the complete answer.
    async fn send_blocking(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: &str,
    ) -> Result<String, GatewayError>;

    /// Send a query and return the live line stream of the answer.
    async fn send_streaming(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: &str,
    ) -> Result<EventSource, GatewayError>;
}

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `create_conversation`.
#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    #[serde(rename = "UserID")]
    user_id: &'a str,
    #[serde(rename = "Inputs")]
    inputs: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    #[serde(rename = "Conversation", default)]
    conversation: Option<ConversationInfo>,
}

#[derive(Debug, Deserialize)]
struct ConversationInfo {
    #[serde(rename = "AppConversationID", default)]
    app_conversation_id: Option<String>,
}

impl CreateConversationResponse {
    /// The handle, if the backend returned a non-empty one.
    fn into_handle(self) -> Option<String> {
        self.conversation
            .and_then(|c| c.app_conversation_id)
            .filter(|id| !id.is_empty())
    }
}

/// How the backend should deliver its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ResponseMode {
    Blocking,
    Streaming,
}

/// Body of `chat_query_v2`.
#[derive(Debug, Serialize)]
struct ChatQueryRequest<'a> {
    #[serde(rename = "AppConversationID")]
    conversation_id: &'a str,
    #[serde(rename = "UserID")]
    user_id: &'a str,
    #[serde(rename = "Query")]
    query: &'a str,
    #[serde(rename = "ResponseMode")]
    response_mode: ResponseMode,
}

#[derive(Debug, Deserialize)]
struct BlockingAnswer {
    #[serde(default)]
    answer: Option<String>,
}
