//! Relay configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::relay::Relay;
use crate::store::MemoryGroupStore;

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Interval between WebSocket pings
    pub heartbeat_interval: Duration,
    /// Connections silent for this long are evicted
    pub idle_timeout: Duration,
    /// Time an unauthenticated connection may stay open
    pub auth_grace_period: Duration,
    /// Per-connection outbound queue length
    pub outbound_buffer: usize,
    /// Shared secret for the internal membership endpoints
    pub internal_token: Option<String>,
    /// Optional JSON file with tokens and groups
    pub seed_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            heartbeat_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(60),
            auth_grace_period: Duration::from_secs(10),
            outbound_buffer: 256,
            internal_token: None,
            seed_file: None,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("RELAY_BIND").unwrap_or(defaults.bind_addr),
            heartbeat_interval: env_parse("RELAY_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            idle_timeout: env_parse("RELAY_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            auth_grace_period: env_parse("RELAY_AUTH_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.auth_grace_period),
            outbound_buffer: env_parse("RELAY_OUTBOUND_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.outbound_buffer),
            internal_token: std::env::var("RELAY_INTERNAL_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            seed_file: std::env::var("RELAY_SEED_FILE").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub relay: Arc<Relay>,
    /// Membership mirror written by the internal endpoints
    pub groups: Arc<MemoryGroupStore>,
}
