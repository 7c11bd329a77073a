//! Internal membership hooks, called by the REST layer after it commits a
//! group membership change.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use tracing::{info, warn};

use crate::config::AppState;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.internal_token {
        None => true,
        Some(expected) => headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected),
    }
}

/// POST /internal/groups/{group_id}/members/{user_id}
pub async fn add_member(
    Path((group_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&state, &headers) {
        warn!("[Relay] Rejected internal add of {} to {}", user_id, group_id);
        return StatusCode::UNAUTHORIZED;
    }
    if !state.groups.contains(&group_id) {
        return StatusCode::NOT_FOUND;
    }
    if !state.groups.add_member(&group_id, &user_id) {
        info!("[Relay] {} already in {}", user_id, group_id);
    }
    state.relay.group_member_added(&group_id, &user_id);
    StatusCode::NO_CONTENT
}

/// DELETE /internal/groups/{group_id}/members/{user_id}
pub async fn remove_member(
    Path((group_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&state, &headers) {
        warn!("[Relay] Rejected internal removal of {} from {}", user_id, group_id);
        return StatusCode::UNAUTHORIZED;
    }
    if !state.groups.contains(&group_id) {
        return StatusCode::NOT_FOUND;
    }
    state.groups.remove_member(&group_id, &user_id);
    state.relay.group_member_removed(&group_id, &user_id);
    StatusCode::NO_CONTENT
}
