//! Socket read loop: liveness eviction and the authentication grace period.

use axum::extract::ws::Message;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chat_relay::auth::{Handshake, TokenTable};
use chat_relay::config::RelayConfig;
use chat_relay::handlers::ws::drive_connection;
use chat_relay::protocol::ServerEvent;
use chat_relay::relay::Relay;
use chat_relay::store::{MemoryGroupStore, MemoryMessageStore};

type Frame = Result<Message, axum::Error>;

fn relay() -> Relay {
    let tokens = TokenTable::new();
    tokens.insert("tok-alice", "alice");
    tokens.insert("tok-bob", "bob");
    Relay::new(
        Arc::new(MemoryMessageStore::new()),
        Arc::new(MemoryGroupStore::new()),
        Arc::new(tokens),
    )
}

fn config() -> RelayConfig {
    RelayConfig {
        idle_timeout: Duration::from_secs(60),
        auth_grace_period: Duration::from_secs(10),
        ..RelayConfig::default()
    }
}

/// Authenticated observer that records presence announcements.
async fn observer(relay: &Relay) -> mpsc::Receiver<ServerEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    relay.handshake(conn, Some("tok-alice")).await;
    while rx.try_recv().is_ok() {}
    rx
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Frames fed by a channel, so a test can deliver them at chosen instants.
fn channel_frames() -> (mpsc::Sender<Frame>, impl Stream<Item = Frame> + Unpin) {
    let (tx, mut rx) = mpsc::channel::<Frame>(8);
    (tx, stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

fn text(frame: &str) -> Frame {
    Ok(Message::Text(frame.to_string().into()))
}

fn presence(online: bool) -> ServerEvent {
    if online {
        ServerEvent::UserOnline {
            user_id: "bob".into(),
        }
    } else {
        ServerEvent::UserOffline {
            user_id: "bob".into(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_evicted() {
    let relay = relay();
    let config = config();
    let mut alice = observer(&relay).await;

    let (tx, _rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    let started = Instant::now();
    let handshake = drive_connection(
        &relay,
        &config,
        conn,
        Some("tok-bob"),
        stream::pending::<Frame>(),
    )
    .await;

    assert_eq!(started.elapsed(), config.idle_timeout);
    assert_eq!(handshake, Handshake::Authenticated("bob".into()));
    assert!(!relay.is_online("bob"));
    assert_eq!(relay.hub().connection_count(), 1);
    assert_eq!(drain(&mut alice), vec![presence(true), presence(false)]);
}

#[tokio::test(start_paused = true)]
async fn test_pong_keeps_connection_alive() {
    let relay = relay();
    let config = config();

    let (frames_tx, frames) = channel_frames();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(40)).await;
        let _ = frames_tx.send(Ok(Message::Pong(Default::default()))).await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let (tx, _rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    let started = Instant::now();
    drive_connection(&relay, &config, conn, Some("tok-bob"), frames).await;

    assert_eq!(started.elapsed(), Duration::from_secs(40) + config.idle_timeout);
    assert!(!relay.is_online("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_unauthenticated_socket_closes_after_grace_period() {
    let relay = relay();
    let config = config();
    let mut alice = observer(&relay).await;

    let (tx, mut rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    let started = Instant::now();
    let handshake =
        drive_connection(&relay, &config, conn, None, stream::pending::<Frame>()).await;

    assert_eq!(started.elapsed(), config.auth_grace_period);
    assert!(handshake.user_id().is_none());
    assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::AuthError { .. }]));
    assert_eq!(relay.hub().connection_count(), 1);
    assert!(drain(&mut alice).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_authentication_switches_to_idle_timeout() {
    let relay = relay();
    let config = config();
    let mut alice = observer(&relay).await;

    let (frames_tx, frames) = channel_frames();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = frames_tx
            .send(text(r#"{"event":"authenticate","data":{"token":"tok-bob"}}"#))
            .await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let (tx, mut rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    let started = Instant::now();
    let handshake = drive_connection(&relay, &config, conn, Some("bogus"), frames).await;

    assert_eq!(started.elapsed(), Duration::from_secs(5) + config.idle_timeout);
    assert_eq!(handshake, Handshake::Authenticated("bob".into()));
    let events = drain(&mut rx);
    assert!(matches!(events[0], ServerEvent::AuthError { .. }));
    assert_eq!(
        events[1],
        ServerEvent::Authenticated {
            user_id: "bob".into()
        }
    );
    assert_eq!(drain(&mut alice), vec![presence(true), presence(false)]);
}

#[tokio::test]
async fn test_close_frame_runs_cleanup() {
    let relay = relay();
    let config = config();
    let mut alice = observer(&relay).await;

    let frames = stream::iter(vec![text(r#"{"event":"ping"}"#), Ok(Message::Close(None))])
        .chain(stream::pending());
    let (tx, mut rx) = mpsc::channel(64);
    let conn = relay.open(tx);
    drive_connection(&relay, &config, conn, Some("tok-bob"), frames).await;

    assert!(drain(&mut rx).contains(&ServerEvent::Pong));
    assert!(!relay.is_online("bob"));
    assert_eq!(relay.hub().connection_count(), 1);
    assert_eq!(drain(&mut alice), vec![presence(true), presence(false)]);
}
