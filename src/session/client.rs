//! Shared authenticated session
//!
//! One `Session` is built per process and handed to every component that
//! needs a token or an authenticated REST call. Tokens are renewed in place,
//! so sockets authorized with an earlier token stay open.

use super::types::{
    Account, AuthRequest, AuthResponse, Credentials, SessionError, TokenKind, TokenState,
};
use crate::config::SessionConfig;
use crate::telemetry::{record_latency, LatencyMetric};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Renew this long before the recorded expiry
pub const REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);

/// Assumed lifetime when the venue omits `expirationTime`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(80 * 60);

/// Back-off after a failed renewal inside the refresh monitor
const RENEW_RETRY_DELAY: Duration = Duration::from_secs(30);

struct RefreshMonitor {
    stop: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

/// Holder of credentials and derived tokens
pub struct Session {
    http: Client,
    base_url: String,
    credentials: RwLock<Credentials>,
    device_id: String,
    tokens: RwLock<Option<TokenState>>,
    account: RwLock<Option<Account>>,
    refresh: Mutex<Option<RefreshMonitor>>,
}

impl Session {
    /// Create a session; nothing is sent until [`Session::authenticate`]
    pub fn new(config: &SessionConfig, credentials: Credentials) -> Result<Self, SessionError> {
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        let device_id = credentials
            .device_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            http,
            base_url: config.rest_url(),
            credentials: RwLock::new(credentials),
            device_id,
            tokens: RwLock::new(None),
            account: RwLock::new(None),
            refresh: Mutex::new(None),
        })
    }

    /// REST base URL this session talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the credential set; existing tokens stay valid until expiry
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = credentials;
    }

    /// Log in and store the access/market-data tokens
    pub async fn authenticate(&self) -> Result<(), SessionError> {
        let request = {
            let creds = self.credentials.read();
            AuthRequest {
                name: creds.username.clone(),
                password: creds.password.clone(),
                app_id: creds.app_id.clone(),
                app_version: creds.app_version.clone(),
                cid: creds.cid,
                sec: creds.sec.clone(),
                device_id: self.device_id.clone(),
            }
        };

        tracing::info!(url = %self.base_url, user = %request.name, "Authenticating");

        let response = self
            .http
            .post(format!("{}/auth/accesstokenrequest", self.base_url))
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Authentication rejected");
            return Err(SessionError::from_status(status.as_u16(), body));
        }

        let auth: AuthResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::UnexpectedResponse(e.to_string()))?;
        let state = Self::token_state_from(auth, Utc::now())?;

        tracing::info!(
            user_id = state.user_id,
            expires_at = %state.expires_at,
            "Authenticated"
        );
        *self.tokens.write() = Some(state);
        Ok(())
    }

    /// Exchange the current token for a fresh one without touching sockets
    pub async fn renew_access_token(&self) -> Result<(), SessionError> {
        let token = match self.access_token() {
            Ok(token) => token,
            Err(SessionError::TokenExpired) => {
                tracing::warn!("Token already expired, logging in again");
                return self.authenticate().await;
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("Renewing access token");

        let started = Instant::now();
        let response = self
            .http
            .get(format!("{}/auth/renewaccesstoken", self.base_url))
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .send()
            .await?;
        record_latency(LatencyMetric::TokenRenewal, started.elapsed());

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SessionError::from_status(status.as_u16(), body));
        }

        let auth: AuthResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::UnexpectedResponse(e.to_string()))?;
        if let Some(error) = auth.error_text {
            return Err(SessionError::InvalidCredentials(error));
        }
        let access_token = auth
            .access_token
            .ok_or_else(|| SessionError::UnexpectedResponse("renewal without token".into()))?;
        let expires_at = Self::parse_expiry(auth.expiration_time.as_deref(), Utc::now());

        let mut guard = self.tokens.write();
        let state = guard.as_mut().ok_or(SessionError::NotAuthenticated)?;
        state.access_token = access_token;
        if let Some(md) = auth.md_access_token {
            state.md_access_token = md;
        }
        state.expires_at = expires_at;
        tracing::info!(expires_at = %expires_at, "Access token renewed");
        Ok(())
    }

    fn token_state_from(auth: AuthResponse, now: DateTime<Utc>) -> Result<TokenState, SessionError> {
        if let Some(error) = auth.error_text {
            return Err(SessionError::InvalidCredentials(error));
        }
        if auth.p_ticket.is_some() {
            return Err(SessionError::RateLimited {
                retry_after_secs: auth.p_time,
            });
        }
        let access_token = auth
            .access_token
            .ok_or_else(|| SessionError::UnexpectedResponse("no access token returned".into()))?;
        let md_access_token = auth
            .md_access_token
            .unwrap_or_else(|| access_token.clone());

        Ok(TokenState {
            expires_at: Self::parse_expiry(auth.expiration_time.as_deref(), now),
            user_id: auth.user_id.unwrap_or_default(),
            access_token,
            md_access_token,
        })
    }

    fn parse_expiry(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
        raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| {
                now + chrono::Duration::from_std(DEFAULT_TOKEN_LIFETIME)
                    .unwrap_or_else(|_| chrono::Duration::minutes(80))
            })
    }

    /// Store tokens directly (used when a token is obtained out of band)
    pub fn install_tokens(&self, state: TokenState) {
        *self.tokens.write() = Some(state);
    }

    /// Trading access token, refused at or past expiry
    pub fn access_token(&self) -> Result<String, SessionError> {
        self.token_at(TokenKind::Access, Utc::now())
    }

    /// Market data access token, refused at or past expiry
    pub fn md_access_token(&self) -> Result<String, SessionError> {
        self.token_at(TokenKind::MarketData, Utc::now())
    }

    /// Token of the given kind as of `now`
    pub fn token_at(&self, kind: TokenKind, now: DateTime<Utc>) -> Result<String, SessionError> {
        let guard = self.tokens.read();
        let state = guard.as_ref().ok_or(SessionError::NotAuthenticated)?;
        if now >= state.expires_at {
            return Err(SessionError::TokenExpired);
        }
        Ok(match kind {
            TokenKind::Access => state.access_token.clone(),
            TokenKind::MarketData => state.md_access_token.clone(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens
            .read()
            .as_ref()
            .is_some_and(|s| Utc::now() < s.expires_at)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.tokens.read().as_ref().map(|s| s.user_id)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.read().as_ref().map(|s| s.expires_at)
    }

    /// How long the refresh monitor should sleep before renewing
    pub fn time_until_refresh(&self, now: DateTime<Utc>) -> Duration {
        let Some(expires_at) = self.expires_at() else {
            return Duration::ZERO;
        };
        let lead = chrono::Duration::from_std(REFRESH_LEAD)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        (expires_at - lead - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Start the background renewal loop; a second call while running is a no-op
    pub fn start_token_refresh_monitor<F>(self: &Arc<Self>, on_renewed: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut guard = self.refresh.lock();
        if guard.is_some() {
            tracing::debug!("Token refresh monitor already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let session = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                let wait = session.time_until_refresh(Utc::now());
                tracing::debug!(wait_secs = wait.as_secs(), "Token refresh scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }

                match session.renew_access_token().await {
                    Ok(()) => on_renewed(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Token renewal failed");
                        tokio::select! {
                            _ = tokio::time::sleep(RENEW_RETRY_DELAY) => {}
                            _ = stop_rx.changed() => break,
                        }
                    }
                }
            }
            tracing::debug!("Token refresh monitor stopped");
        });

        *guard = Some(RefreshMonitor {
            stop: stop_tx,
            _handle: handle,
        });
    }

    /// Signal the refresh loop to exit; safe to call repeatedly
    pub fn stop_token_refresh_monitor(&self) {
        if let Some(monitor) = self.refresh.lock().take() {
            let _ = monitor.stop.send(true);
        }
    }

    pub fn refresh_monitor_running(&self) -> bool {
        self.refresh.lock().is_some()
    }

    /// First account on the login, fetched once and cached
    pub async fn account(&self) -> Result<Account, SessionError> {
        let cached = self.account.read().clone();
        if let Some(account) = cached {
            return Ok(account);
        }

        let accounts: Vec<Account> = self.get_json("/account/list").await?;
        let account = accounts.into_iter().next().ok_or(SessionError::NoAccounts)?;
        tracing::info!(account_id = account.id, name = %account.name, "Using account");

        *self.account.write() = Some(account.clone());
        Ok(account)
    }

    pub async fn account_id(&self) -> Result<i64, SessionError> {
        Ok(self.account().await?.id)
    }

    /// Authenticated GET
    pub async fn get_json<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R, SessionError> {
        let token = self.access_token()?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::decode(endpoint, response).await
    }

    /// Authenticated POST
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R, SessionError> {
        let token = self.access_token()?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        Self::decode(endpoint, response).await
    }

    async fn decode<R: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<R, SessionError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(endpoint, status = status.as_u16(), "Request failed");
            return Err(SessionError::from_status(status.as_u16(), body));
        }
        serde_json::from_str(&body)
            .map_err(|e| SessionError::UnexpectedResponse(format!("{}: {}", endpoint, e)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_token_refresh_monitor();
    }
}
