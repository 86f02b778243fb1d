//! Run command implementation

use crate::config::Config;
use crate::engine::Engine;
use crate::strategy::{MaCrossover, Strategy};
use clap::Args;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the configured symbol
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Strategy parameter override, `name=value` (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Close open positions before exiting
    #[arg(long)]
    pub flatten_on_exit: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {:?}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut strategy = MaCrossover::from_config(&config.strategy)?;
        if let Some(symbol) = &self.symbol {
            strategy.set_parameter("symbol", symbol)?;
        }
        for (name, value) in &self.params {
            strategy.set_parameter(name, value)?;
        }
        for param in strategy.parameters() {
            tracing::info!(name = param.name, value = %param.value, "Strategy parameter");
        }

        let engine = Engine::start(config).await?;
        let symbol = strategy.symbol().to_string();
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        };
        let result = engine.run_strategy(&mut strategy, &symbol, shutdown).await;

        if self.flatten_on_exit {
            let ids = engine.orders().flatten_positions().await;
            tracing::info!(orders = ids.len(), "Flattened on exit");
        }
        engine.shutdown();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("fast_period = 3").unwrap(),
            ("fast_period".to_string(), "3".to_string())
        );
        assert!(parse_param("fast_period").is_err());
    }
}
