//! Strategy framework
//!
//! Fixed contract every trading strategy implements, plus a moving-average
//! crossover built on a tick-driven SMA.

mod crossover;
mod sma;

pub use crossover::MaCrossover;
pub use sma::Sma;

use crate::orders::{OrderError, OrderManager};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

/// One tunable strategy parameter with its current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParam {
    pub name: &'static str,
    pub description: &'static str,
    pub value: String,
}

/// Strategy errors
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
    #[error("Strategy not initialized")]
    NotInitialized,
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Contract between the engine and a trading strategy
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<StrategyParam>;
    fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), StrategyError>;
    /// Hand the strategy the order manager it trades through
    fn init(&mut self, orders: Arc<OrderManager>);
    /// React to a trade price
    async fn on_price_tick(&mut self, symbol: &str, price: Decimal) -> Result<(), StrategyError>;
    /// Drop accumulated state; parameters are kept
    fn reset(&mut self);
}
