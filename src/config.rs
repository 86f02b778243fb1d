//! Configuration types for tradovate-engine

use crate::session::Credentials;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Venue environment: demo (simulated) or live accounts
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Demo,
    Live,
}

impl Environment {
    /// REST base URL
    pub fn rest_url(&self) -> &'static str {
        match self {
            Environment::Demo => "https://demo.tradovateapi.com/v1",
            Environment::Live => "https://live.tradovateapi.com/v1",
        }
    }

    /// Trading (user data) websocket URL
    pub fn trading_ws_url(&self) -> &'static str {
        match self {
            Environment::Demo => "wss://demo.tradovateapi.com/v1/websocket",
            Environment::Live => "wss://live.tradovateapi.com/v1/websocket",
        }
    }

    /// Market data websocket URL
    pub fn md_ws_url(&self) -> &'static str {
        match self {
            Environment::Demo => "wss://md-demo.tradovateapi.com/v1/websocket",
            Environment::Live => "wss://md.tradovateapi.com/v1/websocket",
        }
    }
}

/// Session and credential configuration
///
/// Secrets are normally supplied through the environment; see
/// [`Config::credentials`].
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Overrides the environment's REST URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cid: Option<i64>,
    #[serde(default)]
    pub sec: Option<String>,
    /// HTTP request timeout (seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_app_id() -> String {
    "tradovate-engine".to_string()
}
fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Demo,
            base_url: None,
            app_id: default_app_id(),
            app_version: default_app_version(),
            device_id: None,
            username: None,
            password: None,
            cid: None,
            sec: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl SessionConfig {
    /// Effective REST base URL
    pub fn rest_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.rest_url().to_string())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Real-time socket settings
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Overrides the environment's trading websocket URL
    #[serde(default)]
    pub trading_url: Option<String>,
    /// Overrides the environment's market data websocket URL
    #[serde(default)]
    pub md_url: Option<String>,
    /// Client keep-alive interval (milliseconds)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    /// Authorization handshake timeout (seconds)
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Timeout for awaited request replies (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_heartbeat_ms() -> u64 {
    2500
}
fn default_auth_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            trading_url: None,
            md_url: None,
            heartbeat_interval_ms: default_heartbeat_ms(),
            auth_timeout_secs: default_auth_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TransportSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pre-trade risk configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum absolute contracts per symbol, working orders included
    #[serde(default = "default_max_contracts")]
    pub max_contracts: u32,
    /// Daily realized loss (positive number) that halts new orders
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
}

fn default_true() -> bool {
    true
}
fn default_max_contracts() -> u32 {
    5
}
fn default_daily_loss_limit() -> Decimal {
    Decimal::new(500, 0)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_contracts: default_max_contracts(),
            daily_loss_limit: default_daily_loss_limit(),
        }
    }
}

/// Order manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    /// Resubmissions allowed after venue rejections
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Strategy selection for the `run` command
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_symbol() -> String {
    "MESZ6".to_string()
}
fn default_fast_period() -> usize {
    5
}
fn default_slow_period() -> usize {
    20
}
fn default_quantity() -> u32 {
    1
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            quantity: default_quantity(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus listener port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or crash the engine at runtime
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("transport.heartbeat_interval_ms", self.transport.heartbeat_interval_ms),
            ("transport.auth_timeout_secs", self.transport.auth_timeout_secs),
            ("transport.request_timeout_secs", self.transport.request_timeout_secs),
            ("session.http_timeout_secs", self.session.http_timeout_secs),
        ];
        for (key, value) in durations {
            anyhow::ensure!(value > 0, "{} must be greater than zero", key);
        }
        Ok(())
    }

    /// Effective trading websocket URL
    pub fn trading_url(&self) -> String {
        self.transport
            .trading_url
            .clone()
            .unwrap_or_else(|| self.session.environment.trading_ws_url().to_string())
    }

    /// Effective market data websocket URL
    pub fn md_url(&self) -> String {
        self.transport
            .md_url
            .clone()
            .unwrap_or_else(|| self.session.environment.md_ws_url().to_string())
    }

    /// Resolve credentials, letting `TRADOVATE_*` environment variables
    /// override anything in the file.
    pub fn credentials(&self) -> anyhow::Result<Credentials> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let username = env("TRADOVATE_USERNAME")
            .or_else(|| self.session.username.clone())
            .ok_or_else(|| anyhow::anyhow!("TRADOVATE_USERNAME not set"))?;
        let password = env("TRADOVATE_PASSWORD")
            .or_else(|| self.session.password.clone())
            .ok_or_else(|| anyhow::anyhow!("TRADOVATE_PASSWORD not set"))?;
        let cid = match env("TRADOVATE_CID") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("TRADOVATE_CID must be an integer: {}", e))?,
            None => self
                .session
                .cid
                .ok_or_else(|| anyhow::anyhow!("TRADOVATE_CID not set"))?,
        };
        let sec = env("TRADOVATE_SEC")
            .or_else(|| self.session.sec.clone())
            .ok_or_else(|| anyhow::anyhow!("TRADOVATE_SEC not set"))?;
        let device_id = env("TRADOVATE_DEVICE_ID").or_else(|| self.session.device_id.clone());

        Ok(Credentials {
            username,
            password,
            cid,
            sec,
            app_id: self.session.app_id.clone(),
            app_version: self.session.app_version.clone(),
            device_id,
        })
    }
}
