//! HTTP client for the Agent conversational API.
//!
//! Every call carries the `Apikey` header and a fixed timeout. Nothing is
//! retried; retry policy belongs to the caller.

use super::{
    BlockingAnswer, ChatQueryRequest, ConversationBackend, CreateConversationRequest,
    CreateConversationResponse, EventSource, ResponseMode,
};
use crate::error::GatewayError;
use agent_common::config::AgentApiConfig;
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Timeout for create and blocking chat calls.
const BLOCKING_TIMEOUT_SECS: u64 = 30;
/// Timeout for opening a stream, and for each gap between stream chunks.
const STREAMING_TIMEOUT_SECS: u64 = 60;

const CREATE_CONVERSATION_PATH: &str = "/api/proxy/api/v1/create_conversation";
const CHAT_QUERY_PATH: &str = "/api/proxy/api/v1/chat_query_v2";

/// Agent API client.
pub struct AgentClient {
    base_url: String,
    api_key: String,
    client: Client,
    stream_client: Client,
}

impl AgentClient {
    /// Create a new client for the given base URL and key.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(BLOCKING_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            // No total timeout: a healthy stream may run for minutes.
            stream_client: Client::builder()
                .connect_timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS))
                .tcp_nodelay(true)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn from_config(config: &AgentApiConfig) -> Self {
        Self::new(&config.api_base_url, &config.api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Apikey", self.api_key.as_str())
    }

    /// POST a JSON body and decode a JSON response.
    async fn post_json<T, R>(&self, path: &str, body: &T) -> Result<R, GatewayError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .authorized(self.client.post(self.url(path)))
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(format!("Request failed: {}", e)))?;

        let response = check_status(response).await?;

        response.json().await.map_err(|e| {
            GatewayError::BackendUnavailable(format!("Failed to parse response: {}", e))
        })
    }
}

/// Turn a non-2xx response into `BackendUnavailable`.
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(GatewayError::BackendUnavailable(format!(
        "API error ({}): {}",
        status.as_u16(),
        error_text
    )))
}

#[async_trait]
impl ConversationBackend for AgentClient {
    async fn create_conversation(
        &self,
        user_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, GatewayError> {
        let body = CreateConversationRequest { user_id, inputs };
        let response: CreateConversationResponse =
            self.post_json(CREATE_CONVERSATION_PATH, &body).await?;

        let handle = response.into_handle().ok_or_else(|| {
            GatewayError::SessionCreationFailed(format!(
                "no AppConversationID returned for {}",
                user_id
            ))
        })?;

        tracing::debug!(user_id, conversation_id = %handle, "Created Agent conversation");
        Ok(handle)
    }

    async fn send_blocking(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: &str,
    ) -> Result<String, GatewayError> {
        let body = ChatQueryRequest {
            conversation_id,
            user_id,
            query,
            response_mode: ResponseMode::Blocking,
        };
        let response: BlockingAnswer = self.post_json(CHAT_QUERY_PATH, &body).await?;

        response.answer.ok_or_else(|| {
            GatewayError::BackendUnavailable("response has no answer field".to_string())
        })
    }

    async fn send_streaming(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: &str,
    ) -> Result<EventSource, GatewayError> {
        let body = ChatQueryRequest {
            conversation_id,
            user_id,
            query,
            response_mode: ResponseMode::Streaming,
        };

        let request = self
            .authorized(self.stream_client.post(self.url(CHAT_QUERY_PATH)))
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header(header::ACCEPT, "text/event-stream; charset=utf-8")
            .json(&body);

        let timeout = Duration::from_secs(STREAMING_TIMEOUT_SECS);
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| {
                GatewayError::BackendUnavailable(format!(
                    "stream not opened within {}s",
                    STREAMING_TIMEOUT_SECS
                ))
            })?
            .map_err(|e| GatewayError::BackendUnavailable(format!("Request failed: {}", e)))?;

        let response = check_status(response).await?;

        tracing::debug!(conversation_id, "Agent stream opened");
        Ok(EventSource::from_byte_stream(response.bytes_stream()).with_idle_timeout(timeout))
    }
}
