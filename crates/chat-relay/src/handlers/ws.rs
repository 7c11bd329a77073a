//! WebSocket transport
//!
//! One reader loop and one writer task per socket. The reader awaits every
//! dispatch before taking the next frame, so events from one connection are
//! handled in arrival order.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{Stream, StreamExt},
};
use serde::Deserialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::auth::Handshake;
use crate::config::{AppState, RelayConfig};
use crate::error::RelayError;
use crate::models::ConnectionId;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::relay::Relay;

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// GET /socket
pub async fn socket(
    ws: WebSocketUpgrade,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = query.token.or_else(|| bearer_token(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let config = state.config.clone();
    let relay = state.relay.clone();
    let (mut ws_sender, ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(config.outbound_buffer);

    let conn = relay.open(tx);
    info!("[Socket] Connection {} accepted", conn);

    let heartbeat = config.heartbeat_interval;
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("[Socket] Could not encode {:?}: {}", event, e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let handshake = drive_connection(&relay, &config, conn, token.as_deref(), ws_receiver).await;
    writer.abort();
    match &handshake {
        Handshake::Authenticated(user) => info!("[Socket] {} ({}) disconnected", conn, user),
        Handshake::Unauthenticated(_) => info!("[Socket] {} disconnected", conn),
    }
}

/// Handshake, read loop and cleanup for one opened connection.
///
/// Returns once the peer closes, errors, stays silent past `idle_timeout`, or
/// fails to authenticate within `auth_grace_period`. Every exit runs
/// `Relay::close`.
pub async fn drive_connection<S, E>(
    relay: &Relay,
    config: &RelayConfig,
    conn: ConnectionId,
    token: Option<&str>,
    mut frames: S,
) -> Handshake
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut handshake = relay.handshake(conn, token).await;
    let auth_deadline = Instant::now() + config.auth_grace_period;

    loop {
        let next = if handshake.user_id().is_none() {
            match timeout_at(auth_deadline, frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("[Socket] {} did not authenticate in time", conn);
                    break;
                }
            }
        } else {
            match timeout(config.idle_timeout, frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("[Socket] {} idle for {:?}, evicting", conn, config.idle_timeout);
                    break;
                }
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => relay.dispatch(conn, &mut handshake, event).await,
                    Err(e) => relay.reject_frame(conn, RelayError::from(e)),
                }
            }
            Some(Ok(Message::Binary(_))) => {
                relay.reject_frame(conn, RelayError::invalid_event("binary frames are not supported"));
            }
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                debug!("[Socket] {} errored: {}", conn, e);
                break;
            }
            None => break,
        }
    }

    relay.close(conn, &handshake);
    handshake
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-a"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-a"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }
}
