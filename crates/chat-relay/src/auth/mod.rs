//! Authentication Module
//!
//! Token issuance lives in the account service. The relay only verifies
//! the token a client presents when it opens its socket.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::models::UserId;
use crate::rooms::is_routable_identity;

/// Verifies bearer tokens into user identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Outcome of the socket handshake, checked before every dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Authenticated(UserId),
    Unauthenticated(AuthError),
}

impl Handshake {
    pub async fn perform(auth: &dyn Authenticator, token: Option<&str>) -> Self {
        let token = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => return Handshake::Unauthenticated(AuthError::MissingToken),
        };
        match auth.verify(token).await {
            Ok(user_id) if !is_routable_identity(&user_id) => {
                warn!("[Auth] Verified identity {:?} is not routable", user_id);
                Handshake::Unauthenticated(AuthError::UnroutableIdentity(user_id))
            }
            Ok(user_id) => Handshake::Authenticated(user_id),
            Err(e) => {
                debug!("[Auth] Token rejected: {}", e);
                Handshake::Unauthenticated(e)
            }
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Handshake::Authenticated(user_id) => Some(user_id),
            Handshake::Unauthenticated(_) => None,
        }
    }
}

/// In-memory token -> identity table.
#[derive(Default)]
pub struct TokenTable {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(tokens: HashMap<String, UserId>) -> Self {
        info!("[Auth] Token table loaded with {} tokens", tokens.len());
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        self.tokens.write().insert(token.into(), user_id.into());
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
