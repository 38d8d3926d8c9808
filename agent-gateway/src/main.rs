//! Agent Gateway - Main entry point.

use agent_common::config::Config;
use agent_common::logging::init_logging;
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging(&config.logging);

    tracing::info!("Agent Gateway v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    agent_gateway::start_server(&config).await
}
