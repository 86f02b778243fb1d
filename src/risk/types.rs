//! Risk management types

use crate::config::RiskConfig;
use crate::orders::Side;
use rust_decimal::Decimal;
use thiserror::Error;

/// Limits enforced by the pre-trade gate
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// When false every check passes
    pub enabled: bool,
    /// Maximum absolute net contracts per symbol, working orders included
    pub max_contracts: u32,
    /// Positive loss amount at which new orders stop for the day
    pub daily_loss_limit: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_contracts: config.max_contracts,
            daily_loss_limit: config.daily_loss_limit,
        }
    }
}

/// Inputs for one pre-trade decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskCheck<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity: u32,
    /// Signed net position currently held
    pub current_position: i64,
    /// Signed remaining quantity of orders already at the venue
    pub working_quantity: i64,
}

impl RiskCheck<'_> {
    /// Net position if this order and every working order filled
    pub fn prospective_position(&self) -> i64 {
        self.current_position + self.working_quantity + self.side.signed(self.quantity)
    }
}

/// Read access to live net positions
pub trait PositionSource: Send + Sync {
    /// Signed net contracts held in `symbol`
    fn net_position(&self, symbol: &str) -> i64;
    /// Every symbol with a nonzero position
    fn open_positions(&self) -> Vec<(String, i64)>;
}

/// Pre-trade rejections; never involve a network call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("Max contracts exceeded for {symbol}: prospective {prospective}, limit {max}")]
    MaxContractsExceeded {
        symbol: String,
        prospective: i64,
        max: u32,
    },
    #[error("Daily loss limit reached: pnl {daily_pnl}, limit {limit}")]
    DailyLossLimitReached { daily_pnl: Decimal, limit: Decimal },
}
