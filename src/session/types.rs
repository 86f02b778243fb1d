//! Session types: credentials, auth payloads, token state and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Login credentials and application identity
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Client ID from the API key settings
    pub cid: i64,
    /// Client secret from the API key settings
    pub sec: String,
    pub app_id: String,
    pub app_version: String,
    pub device_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("cid", &self.cid)
            .field("app_id", &self.app_id)
            .field("app_version", &self.app_version)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Body of `POST /auth/accesstokenrequest`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthRequest {
    pub name: String,
    pub password: String,
    pub app_id: String,
    pub app_version: String,
    pub cid: i64,
    pub sec: String,
    pub device_id: String,
}

/// Reply to an access token request or renewal
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub md_access_token: Option<String>,
    /// ISO-8601 expiry instant
    #[serde(default)]
    pub expiration_time: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub error_text: Option<String>,
    /// Penalty ticket issued when logins are throttled
    #[serde(rename = "p-ticket", default)]
    pub p_ticket: Option<String>,
    /// Seconds to wait before retrying with the penalty ticket
    #[serde(rename = "p-time", default)]
    pub p_time: Option<u64>,
}

/// Trading account as returned by `/account/list`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    /// Account spec used when placing orders
    pub name: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub active: bool,
}

/// Tokens and identity derived from a successful login
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub md_access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: i64,
}

/// Which token a consumer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Trading / user data token
    Access,
    /// Market data token
    MarketData,
}

/// Session and token errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Token expired")]
    TokenExpired,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("No trading accounts available")]
    NoAccounts,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SessionError {
    /// Map a non-success HTTP status to the session error taxonomy
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 401 => SessionError::InvalidCredentials(body),
            403 => SessionError::AccessDenied(body),
            429 => SessionError::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => SessionError::ServerError { status, body },
            _ => SessionError::UnexpectedStatus { status, body },
        }
    }

    /// Whether renewing the token could clear this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::TokenExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            SessionError::from_status(401, "bad".into()),
            SessionError::InvalidCredentials(_)
        ));
        assert!(matches!(
            SessionError::from_status(400, String::new()),
            SessionError::InvalidCredentials(_)
        ));
        assert!(matches!(
            SessionError::from_status(403, String::new()),
            SessionError::AccessDenied(_)
        ));
        assert!(matches!(
            SessionError::from_status(429, String::new()),
            SessionError::RateLimited { .. }
        ));
        assert!(matches!(
            SessionError::from_status(503, String::new()),
            SessionError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            SessionError::from_status(404, String::new()),
            SessionError::UnexpectedStatus { status: 404, .. }
        ));
    }

    #[test]
    fn test_auth_response_penalty_ticket() {
        let json = r#"{"p-ticket": "abc", "p-time": 15, "p-captcha": false}"#;
        let resp: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.p_ticket.as_deref(), Some("abc"));
        assert_eq!(resp.p_time, Some(15));
        assert!(resp.access_token.is_none());
    }

    #[test]
    fn test_auth_response_success() {
        let json = r#"{
            "accessToken": "tok",
            "mdAccessToken": "md-tok",
            "expirationTime": "2026-10-18T12:00:00.000Z",
            "userId": 99,
            "name": "trader"
        }"#;
        let resp: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token.as_deref(), Some("tok"));
        assert_eq!(resp.md_access_token.as_deref(), Some("md-tok"));
        assert_eq!(resp.user_id, Some(99));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials {
            username: "trader".into(),
            password: "hunter2".into(),
            cid: 1,
            sec: "s3cret".into(),
            app_id: "app".into(),
            app_version: "1.0".into(),
            device_id: None,
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("trader"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_only_token_expiry_is_recoverable() {
        assert!(SessionError::TokenExpired.is_recoverable());
        assert!(!SessionError::NotAuthenticated.is_recoverable());
        assert!(!SessionError::AccessDenied(String::new()).is_recoverable());
    }
}
