//! Transport types and configuration

use crate::session::{SessionError, TokenKind};
use std::time::Duration;
use thiserror::Error;

/// Real-time connection configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Label used in logs ("trading", "md")
    pub name: String,
    /// WebSocket URL to connect to
    pub url: String,
    /// Token presented in the authorization frame
    pub token_kind: TokenKind,
    /// Interval for client keep-alive frames
    pub heartbeat_interval: Duration,
    /// How long `connect` waits for authorization
    pub auth_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: "trading".to_string(),
            url: String::new(),
            token_kind: TokenKind::Access,
            heartbeat_interval: Duration::from_millis(2500),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Create a new config with the given name and URL
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Authorize with the given token kind
    pub fn token_kind(mut self, kind: TokenKind) -> Self {
        self.token_kind = kind;
        self
    }

    /// Set keep-alive interval
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// Set authorization timeout
    pub fn auth_timeout(mut self, d: Duration) -> Self {
        self.auth_timeout = d;
        self
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dial or socket failure; no automatic reconnect
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Authorization not confirmed within {0:?}")]
    AuthorizationTimeout(Duration),
    #[error("Not connected")]
    NotConnected,
    #[error("No reply to {endpoint} within {timeout:?}")]
    RequestTimeout { endpoint: String, timeout: Duration },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
