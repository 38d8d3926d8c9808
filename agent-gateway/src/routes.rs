//! Route definitions for the Agent gateway.
//!
//! Service endpoints (`/`, `/health`, `/stats`) are public; the
//! OpenAI-compatible `/v1` endpoints sit behind the bearer key middleware.

use crate::auth::{auth_middleware, AuthState};
use crate::backend::{AgentClient, ConversationBackend};
use crate::error::GatewayError;
use crate::openai::{format_messages, ChatCompletionRequest, ChatCompletionResponse, ModelList};
use crate::session::resolve_session_id;
use crate::store::{ConversationStore, StoreStats};
use crate::translator::StreamTranslator;
use agent_common::config::{Config, SessionKeying};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

/// Largest accepted chat request body.
const MAX_CHAT_BODY_BYTES: usize = 10 * 1024 * 1024;

const SERVICE_NAME: &str = "agent-gateway";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub backend: Arc<dyn ConversationBackend>,
    pub model_id: String,
    pub keying: SessionKeying,
}

impl AppState {
    pub fn new(config: &Config, backend: Arc<dyn ConversationBackend>) -> Self {
        let store = ConversationStore::new(
            Arc::clone(&backend),
            config.session.max_conversations,
            config.conversation_timeout(),
        );

        Self {
            store: Arc::new(store),
            backend,
            model_id: config.server.model_id.clone(),
            keying: config.session.keying,
        }
    }
}

/// Service banner.
#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Build the complete router with all routes, talking to the configured Agent API.
pub fn build_all_routes(config: &Config) -> Router {
    let backend: Arc<dyn ConversationBackend> = Arc::new(AgentClient::from_config(&config.agent));
    build_routes_with_backend(config, backend)
}

/// Build the complete router around an explicit backend.
pub fn build_routes_with_backend(config: &Config, backend: Arc<dyn ConversationBackend>) -> Router {
    let state = AppState::new(config, backend);
    let auth_state = AuthState::new(config.auth_key());

    if !auth_state.is_enabled() {
        tracing::warn!("API key authentication is disabled");
    }

    let api_routes = Router::new()
        .route("/v1/models", get(list_models_handler))
        .route(
            "/v1/chat/completions",
            post(chat_completions_handler).layer(DefaultBodyLimit::max(MAX_CHAT_BODY_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(api_routes)
        .merge(service_routes())
        .with_state(state)
}

fn service_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Agent API gateway is running".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: SERVICE_NAME.into(),
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.store.stats())
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_models_handler(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::single(&state.model_id))
}

async fn chat_completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".into(),
        ));
    }

    let query = format_messages(&request.messages);
    let session_id = resolve_session_id(state.keying, &headers, &request);
    let model = if request.model.is_empty() {
        state.model_id.clone()
    } else {
        request.model.clone()
    };

    let conversation = state.store.resolve_or_create(&session_id).await?;

    tracing::info!(
        session_id = %session_id,
        conversation_id = %conversation.app_conversation_id,
        stream = request.stream,
        messages = request.messages.len(),
        "Chat completion request"
    );

    if request.stream {
        let source = state
            .backend
            .send_streaming(
                &conversation.app_conversation_id,
                &conversation.backend_user_id,
                &query,
            )
            .await?;

        let events = StreamTranslator::new(source, &model)
            .with_session_id(session_id)
            .into_stream()
            .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));

        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let answer = state
        .backend
        .send_blocking(
            &conversation.app_conversation_id,
            &conversation.backend_user_id,
            &query,
        )
        .await?;

    Ok(Json(ChatCompletionResponse::from_answer(&model, answer)).into_response())
}
