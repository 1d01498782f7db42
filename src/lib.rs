// ============================================================================
// Brigade Gateway
// ============================================================================
//
// Multi-tenant real-time event gateway for the restaurant platform.
// POS terminals, kitchen displays and dashboards hold a WebSocket
// connection here; upstream services publish events over the internal
// HTTP surface and the gateway fans them out to the connections
// entitled to see them.

pub mod access;
pub mod audit;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod http;
pub mod message;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod scope;
pub mod storage;
pub mod tenant;
pub mod utils;

use crate::access::TenantAccessValidator;
use crate::audit::SecurityMonitor;
use crate::auth::AuthManager;
use crate::config::Config;
use crate::context::AppContext;
use crate::rate_limit::{RateLimiter, RedisCounterStore};
use crate::registry::ConnectionManager;
use crate::storage::MemoryStorage;
use anyhow::Context as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub async fn run() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    tracing::info!(
        ws_port = config.port,
        http_port = config.http_port,
        redis = %utils::mask_url(&config.redis_url),
        "Starting gateway"
    );

    let auth = Arc::new(AuthManager::new(&config)?);

    let store = tokio::time::timeout(
        Duration::from_secs(10),
        RedisCounterStore::connect(&config.redis_url),
    )
    .await
    .context("Timed out connecting to the counter store")?
    .context("Failed to connect to the counter store")?;
    let limiter = Arc::new(RateLimiter::new(Arc::new(store), config.limits.clone()));

    let storage = Arc::new(MemoryStorage::new());
    let (monitor, _audit_writer) =
        SecurityMonitor::start(storage.clone(), config.audit_queue_capacity);

    let validator = Arc::new(TenantAccessValidator::new(
        auth.clone(),
        monitor.clone(),
        config.platform_roles.clone(),
        config.logging.hash_salt.clone(),
    ));

    let connections = Arc::new(ConnectionManager::new(monitor.clone()));
    let _heartbeat = connections.clone().spawn_heartbeat_monitor(
        Duration::from_secs(config.heartbeat_interval_secs),
        config.heartbeat_max_missed,
    );

    let ctx = AppContext {
        config: config.clone(),
        auth,
        storage,
        monitor,
        validator,
        connections,
        limiter,
    };

    let ws_server = run_websocket_server(ctx.clone(), config.port);
    let http_server = http::run_http_server(ctx, config.http_port);

    tokio::select! {
        result = ws_server => result.context("WebSocket server exited"),
        result = http_server => result.context("HTTP server exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    }
}

async fn run_websocket_server(ctx: AppContext, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "WebSocket server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handlers::handle_connection(ctx, stream, peer).await;
        });
    }
}
