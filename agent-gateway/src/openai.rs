//! OpenAI-compatible request and response types.

use serde::{Deserialize, Serialize};

/// Owner reported for the single exposed model.
pub const MODEL_OWNER: &str = "agent-api";

const COMPLETION_OBJECT: &str = "chat.completion";
const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Tag used when flattening a conversation into one backend query.
    fn query_tag(self) -> &'static str {
        match self {
            Self::System => "[SYSTEM]",
            Self::User => "[USER]",
            Self::Assistant => "[ASSISTANT]",
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Chat completion request.
///
/// Sampling parameters are accepted for compatibility; the backend has no
/// equivalent and ignores them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// End-user identifier, used as the session key under `user` keying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Flatten messages into the single text blob the backend expects.
pub fn format_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.query_tag(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Non-streaming
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// Complete (non-streaming) chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Wrap a full assistant answer.
    pub fn from_answer(model: &str, answer: String) -> Self {
        Self {
            id: completion_id(),
            object: COMPLETION_OBJECT.to_string(),
            created: now_timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: answer,
                },
                finish_reason: FinishReason::Stop,
            }],
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Incremental message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    /// Serialized as `null` until the final chunk.
    pub finish_reason: Option<FinishReason>,
}

/// One streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Builds the chunks of one stream with a shared id and timestamp.
#[derive(Debug, Clone)]
pub struct ChunkFactory {
    id: String,
    created: i64,
    model: String,
}

impl ChunkFactory {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            created: now_timestamp(),
            model: model.into(),
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: CHUNK_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    pub fn role(&self) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                role: Some(Role::Assistant),
                content: None,
            },
            None,
        )
    }

    pub fn content(&self, text: String) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                role: None,
                content: Some(text),
            },
            None,
        )
    }

    pub fn finish(&self) -> ChatCompletionChunk {
        self.chunk(Delta::default(), Some(FinishReason::Stop))
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    /// List containing only `model_id`.
    pub fn single(model_id: &str) -> Self {
        Self {
            object: "list".to_string(),
            data: vec![ModelCard {
                id: model_id.to_string(),
                object: "model".to_string(),
                created: now_timestamp(),
                owned_by: MODEL_OWNER.to_string(),
            }],
        }
    }
}
