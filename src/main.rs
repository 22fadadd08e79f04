//! ==============================================================================
//! main.rs - greenhouse dashboard backend entry point
//! ==============================================================================
//!
//! purpose:
//!     small http backend between the greenhouse ui, the field device and a
//!     cloud iot broker. it does not poll: every broker call is triggered by
//!     an incoming request.
//!
//! responsibilities:
//!     - load configuration and the broker token (from the environment)
//!     - open the sqlite readings history
//!     - build the shared context (gateway client, sensor cache, store)
//!     - serve the /api endpoints
//!
//! relationships:
//!     - uses: config.rs (greenhouse.toml)
//!     - uses: broker.rs + gateway.rs (cloud broker)
//!     - uses: cache.rs (reports from the field device)
//!     - uses: store.rs (history)
//!     - uses: server.rs (routes and handlers)
//!
//! architecture:
//!
//!     ┌──────────────┐   GET /api/data, /api/toggle, /api/readings
//!     │ dashboard ui │ ──────────────────────────┐
//!     └──────────────┘                           ▼
//!     ┌──────────────┐  POST /api/logs   ┌───────────────┐   https   ┌──────────────┐
//!     │ field device │ ────────────────► │  this server  │ ────────► │ cloud broker │
//!     └──────────────┘                   └───────┬───────┘           └──────────────┘
//!                                                │
//!                                        ┌───────┴───────┐
//!                                        │ sensor cache  │ (memory)
//!                                        │ readings log  │ (sqlite)
//!                                        └───────────────┘
//!
//! ==============================================================================

mod broker;
mod cache;
mod config;
mod domain;
mod error;
mod gateway;
mod server;
mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration (log level lives in it)
    let config = config::DashboardConfig::load_or_default();
    init_tracing(&config.logging.level);

    info!("===========================================================");
    info!("  Greenhouse Dashboard v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");
    config.print_summary();

    // step 2: broker client, token only ever comes from the environment
    let token = config.broker.token()?;
    let broker = Arc::new(broker::HttpBroker::new(&config.broker, token));
    let gateway = gateway::GatewayClient::new(broker, config.broker.channels.clone());

    // step 3: readings history
    let store = match store::ReadingsStore::open(&config.database.url, config.database.max_connections).await {
        Ok(store) => {
            info!("[STARTUP] ✓ Readings store ready ({})", config.database.url);
            store
        }
        Err(e) => {
            error!("[STARTUP] Fatal: failed to open readings store: {}", e);
            return Err(e.into());
        }
    };

    // step 4: serve
    let app = server::router(server::AppContext::new(gateway, store));
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!("[STARTUP] ✓ API live at http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// RUST_LOG wins, otherwise the configured level
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::new(level.as_str())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
