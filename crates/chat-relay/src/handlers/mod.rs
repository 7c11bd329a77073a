//! HTTP surface: the socket upgrade plus internal membership hooks.

pub mod internal;
pub mod ws;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.relay.hub().connection_count(),
        "online": state.relay.registry().online_users().len(),
    }))
}
