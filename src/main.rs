//! Pico backend - entry point
//!
//! Wires the flat-file providers into the registry, builds the agent on
//! top of the Claude client, and serves the HTTP API.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pico_mcp::agent::PicoAgent;
use pico_mcp::completion::ClaudeClient;
use pico_mcp::config::Config;
use pico_mcp::http::{self, AppState};
use pico_mcp::protocol::{CapabilityProvider, Registry};
use pico_mcp::providers::{NotesProvider, PreferencesProvider, TodosProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let data_dir = Path::new(&config.data_dir);

    let notes = Arc::new(NotesProvider::new(data_dir.join("notes"))?);
    let todos = Arc::new(TodosProvider::new(data_dir.join("todos.json"))?);
    let preferences = Arc::new(PreferencesProvider::new(data_dir.join("preferences.json"))?);

    // Preferences first so their context loads ahead of record data.
    let mut registry = Registry::new();
    registry.register(Arc::clone(&preferences) as Arc<dyn CapabilityProvider>);
    registry.register(Arc::clone(&notes) as Arc<dyn CapabilityProvider>);
    registry.register(Arc::clone(&todos) as Arc<dyn CapabilityProvider>);

    let claude = ClaudeClient::from_config(&config)
        .context("ANTHROPIC_API_KEY is required to start the agent")?;

    let agent = Arc::new(PicoAgent::new(registry, Arc::new(claude)));

    let state = AppState {
        agent,
        notes,
        todos,
        model: config.model.clone(),
        max_tokens: config.max_tokens,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, http::router(state))
        .await
        .context("server error")?;

    Ok(())
}
