//! # textpilot-server
//!
//! Real-time sync core for a chat account.
//!
//! This binary provides:
//! - **Event broker** that fans account events out to every open stream,
//!   suppressing duplicate message deliveries
//! - **SSE streams** for the pairing QR code, readiness and live messages
//! - **Send command** whose result reaches every stream exactly once
//! - **Lookups** for contacts, profile pictures and quoted messages, cached
//!   for a few minutes
//!
//! The account itself sits behind the `Upstream` trait; the binary runs the
//! in-process simulated account.

mod api;
mod bridge;
mod broker;
mod config;
mod dedup;
mod error;
mod lookup;
mod service;
mod simulated;
mod streams;
mod subscription;
mod upstream;

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::service::ChatService;
use crate::simulated::{SimulatedConfig, SimulatedUpstream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,textpilot_server=debug")),
        )
        .init();

    info!("Starting TextPilot server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Start the account and the chat service
    // -----------------------------------------------------------------------
    let (upstream, notifications) = SimulatedUpstream::new(SimulatedConfig {
        pairing_delay: config.sim_pairing_delay,
        echo_sent: config.sim_echo_sent,
    });
    let service = ChatService::start(&config, Arc::new(upstream), notifications).await?;

    let app_state = AppState {
        service: service.clone(),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic lookup cache cleanup (every minute)
    let lookups = service.lookups().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = lookups.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired lookups");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    service.stop().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
