//! Position and PnL tracking
//!
//! Consumes account sync, position, cash balance and quote events and keeps
//! per-symbol realized and unrealized PnL.

mod tracker;
mod types;

pub use tracker::PortfolioTracker;
pub use types::{quote_trade_price, PlEntry, PositionUpdate};
