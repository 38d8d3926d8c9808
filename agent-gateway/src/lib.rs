//! Agent Gateway - OpenAI-compatible front end for the Agent conversational API.
//!
//! This crate provides:
//! - `/v1/models` and `/v1/chat/completions` in the OpenAI wire format
//! - A bounded, time-expiring store mapping sessions to backend conversations
//! - Translation of the Agent event stream into OpenAI completion chunks
//! - Bearer key authentication
//!
//! ## Architecture
//!
//! ```text
//! Client → Gateway (auth → session store → Agent client) → Agent API
//!                                    ↓
//!                          stream translator → SSE chunks
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod backend;
pub mod error;
pub mod openai;
pub mod routes;
pub mod session;
pub mod store;
pub mod translator;

pub use backend::{AgentClient, AgentEvent, ConversationBackend, EventSource};
pub use error::{ErrorResponse, GatewayError};
pub use store::{ConversationEntry, ConversationStore, StoreStats};
pub use translator::{Frame, StreamState, StreamTranslator};

use agent_common::config::Config;
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

/// Build the gateway router with all routes and middleware.
pub fn build_router(config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(config).layer(cors)
}

/// Start the gateway server and run until a shutdown signal arrives.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(config);

    tracing::info!("Starting Agent Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Agent Gateway stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
