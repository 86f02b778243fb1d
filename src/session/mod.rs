//! Token/session management
//!
//! Owns the credential set, logs in against the REST API, hands out access
//! and market-data tokens, renews them ahead of expiry and exposes
//! authenticated REST helpers.

mod client;
mod types;

pub use client::{Session, DEFAULT_TOKEN_LIFETIME, REFRESH_LEAD};
pub use types::{Account, Credentials, SessionError, TokenKind, TokenState};

#[cfg(test)]
pub(crate) use client::tests::{test_credentials, test_session};
