//! Chat Relay
//!
//! Real-time presence and message relay for a chat application. Clients hold
//! one WebSocket per device; the relay authenticates them, tracks who is
//! online, persists messages through a store and fans events out to rooms.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod session;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::auth::TokenTable;
use crate::config::{AppState, RelayConfig};
use crate::relay::Relay;
use crate::store::{MemoryGroupStore, MemoryMessageStore, SeedFile};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/socket", get(handlers::ws::socket))
        .route(
            "/internal/groups/{group_id}/members/{user_id}",
            post(handlers::internal::add_member).delete(handlers::internal::remove_member),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat_relay=debug,info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the in-memory stores and relay from configuration.
pub async fn build_state(config: RelayConfig) -> Result<AppState> {
    let seed = match &config.seed_file {
        Some(path) => SeedFile::load(path).await?,
        None => SeedFile::default(),
    };

    let tokens = Arc::new(TokenTable::from_map(seed.tokens));
    let groups = Arc::new(MemoryGroupStore::with_groups(seed.groups));
    let messages = Arc::new(MemoryMessageStore::new());
    let relay = Arc::new(Relay::new(messages, groups.clone(), tokens));

    Ok(AppState {
        config: Arc::new(config),
        relay,
        groups,
    })
}

pub async fn run() -> Result<()> {
    init_tracing();

    let config = RelayConfig::from_env();
    let addr = config.bind_addr;
    info!(
        "[Relay] heartbeat {:?}, idle timeout {:?}, auth grace {:?}",
        config.heartbeat_interval, config.idle_timeout, config.auth_grace_period
    );

    let app = router(build_state(config).await?);

    info!("[Relay] Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
