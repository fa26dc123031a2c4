//! Skillcheck · Assessment Generation & Scoring Backend
//!
//! - Axum HTTP API for assessments, question bank, generation jobs and test sessions
//! - Optional OpenAI and retrieval collaborators (via environment variables)
//!
//! Important env variables:
//!   PORT                      : u16 (default 3000)
//!   OPENAI_API_KEY            : enables the chat-completions model if present
//!   OPENAI_BASE_URL           : default "https://api.openai.com/v1"
//!   OPENAI_MODEL              : default "gpt-4o-mini"
//!   RETRIEVAL_URL             : enables retrieval-grounded generation if present
//!   ENGINE_CONFIG_PATH        : path to TOML config (prompts, generation, release, answers)
//!   SCORE_RELEASE_POLICY      : "immediate" or "delayed" (overrides TOML)
//!   SCORE_RELEASE_DELAY_SECS  : delay before a delayed score is released
//!   RETRIEVAL_TOP_K           : snippets requested per grounded item
//!   LOG_LEVEL                 : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT                : "pretty" (default) or "json"

mod allocation;
mod config;
mod domain;
mod error;
mod experience;
mod generation;
mod jobs;
mod openai;
mod protocol;
mod release;
mod retrieval;
mod routes;
mod seeds;
mod session;
mod state;
mod store;
mod telemetry;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (store, engine, collaborators, demo content).
  let state = Arc::new(AppState::from_env().await?);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "skillcheck", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "skillcheck", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "skillcheck", error = %e, "Could not listen for ctrl-c; running until killed");
    std::future::pending::<()>().await;
  }
  info!(target: "skillcheck", "Shutdown requested");
}
