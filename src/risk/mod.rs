//! Risk management module
//!
//! Pre-trade contract cap and daily loss limit

mod manager;
mod types;

pub use manager::{RiskManager, DAILY_RESET_HOURS};
pub use types::{PositionSource, RiskCheck, RiskError, RiskLimits};
