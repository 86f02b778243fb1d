use clap::Parser;
use tradovate_engine::cli::{Cli, Commands};
use tradovate_engine::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize telemetry
    tradovate_engine::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting strategy run");
            args.execute(&config).await?;
        }
        Commands::Flatten(args) => {
            tracing::info!("Flattening positions");
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Session: {:?} {}",
                config.session.environment,
                config.session.rest_url()
            );
            println!("  Trading socket: {}", config.trading_url());
            println!("  Market data socket: {}", config.md_url());
            println!(
                "  Heartbeat: {:?}, request timeout {:?}",
                config.transport.heartbeat_interval(),
                config.transport.request_timeout()
            );
            println!(
                "  Risk: enabled={}, MaxContracts={}, DailyLossLimit={}",
                config.risk.enabled, config.risk.max_contracts, config.risk.daily_loss_limit
            );
            println!("  Orders: MaxRetries={}", config.orders.max_retries);
            println!(
                "  Strategy: {} SMA {}/{} x{}",
                config.strategy.symbol,
                config.strategy.fast_period,
                config.strategy.slow_period,
                config.strategy.quantity
            );
        }
    }

    Ok(())
}
