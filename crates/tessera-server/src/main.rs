//! # tessera-server
//!
//! The Tessera world server.
//!
//! This binary provides:
//! - **Challenge/response authentication** binding anonymous sockets to
//!   Ed25519 identities
//! - **Rooms**: chat channels and game worlds multiplexed over one
//!   WebSocket per connection, with admission control and bounded history
//! - **Presence**: live position maps and occupancy broadcasts
//! - **Background world loops**: patrols and animated tiles driven by a
//!   cancellable scheduler

use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_server::{ws, ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tessera_server=debug")),
        )
        .init();

    info!("Starting Tessera server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Spawn the coordinator (owns all identity and room state)
    // -----------------------------------------------------------------------
    let ws_addr = config.ws_addr;
    let (events_tx, coordinator) = ChatServer::spawn(config);

    // -----------------------------------------------------------------------
    // 4. Run the WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = ws::serve(events_tx, ws_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "WebSocket server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    coordinator.abort();
    Ok(())
}
