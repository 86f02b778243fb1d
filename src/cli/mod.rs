//! CLI interface for tradovate-engine
//!
//! Provides subcommands for:
//! - `run`: Trade the configured strategy
//! - `flatten`: Close every open position and exit
//! - `config`: Show the effective configuration

mod flatten;
mod run;

pub use flatten::FlattenArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tradovate-engine")]
#[command(about = "Automated futures execution engine for the Tradovate real-time API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trade the configured strategy until interrupted
    Run(RunArgs),
    /// Close all open positions at market
    Flatten(FlattenArgs),
    /// Show configuration
    Config,
}
