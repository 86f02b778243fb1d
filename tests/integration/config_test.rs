//! Configuration loading integration tests

use rust_decimal_macros::dec;
use std::io::Write;
use std::time::Duration;
use tradovate_engine::config::{Config, Environment, LogFormat};

#[test]
fn test_config_example_loads() {
    let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml.example")).unwrap();
    assert_eq!(config.session.environment, Environment::Demo);
    assert_eq!(config.transport.heartbeat_interval(), Duration::from_millis(2500));
    assert_eq!(config.risk.max_contracts, 5);
    assert_eq!(config.risk.daily_loss_limit, dec!(500));
    assert_eq!(config.orders.max_retries, 3);
    assert_eq!(config.strategy.symbol, "MESZ6");
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
}

#[test]
fn test_config_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [session]
        environment = "live"

        [risk]
        enabled = false
        max_contracts = 1

        [telemetry]
        log_format = "json"
        metrics_port = 9464
        "#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.session.environment, Environment::Live);
    assert!(config.trading_url().starts_with("wss://live."));
    assert!(!config.risk.enabled);
    assert_eq!(config.risk.max_contracts, 1);
    assert_eq!(config.orders.max_retries, 3);
    assert_eq!(config.telemetry.metrics_port, Some(9464));
}

#[test]
fn test_config_load_rejects_bad_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[risk]\nmax_contracts = \"many\"").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_config_load_rejects_zero_heartbeat() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[transport]\nheartbeat_interval_ms = 0").unwrap();
    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("heartbeat_interval_ms"));
}
