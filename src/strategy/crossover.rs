//! Moving average crossover: golden cross goes long, death cross goes short.

use super::{Sma, Strategy, StrategyError, StrategyParam};
use crate::config::StrategyConfig;
use crate::orders::{OrderManager, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;

/// Trades one symbol toward `+quantity` on a golden cross and `-quantity`
/// on a death cross.
pub struct MaCrossover {
    symbol: String,
    quantity: u32,
    fast: Sma,
    slow: Sma,
    /// Sign of fast minus slow on the previous ready tick
    last_relation: Option<Ordering>,
    orders: Option<Arc<OrderManager>>,
}

impl MaCrossover {
    pub fn new(
        symbol: impl Into<String>,
        fast_period: usize,
        slow_period: usize,
        quantity: u32,
    ) -> Result<Self, StrategyError> {
        Self::validate_periods(fast_period, slow_period)?;
        if quantity == 0 {
            return Err(invalid("quantity", "0", "must be positive"));
        }
        Ok(Self {
            symbol: symbol.into(),
            quantity,
            fast: Sma::new(fast_period),
            slow: Sma::new(slow_period),
            last_relation: None,
            orders: None,
        })
    }

    pub fn from_config(config: &StrategyConfig) -> Result<Self, StrategyError> {
        Self::new(
            config.symbol.clone(),
            config.fast_period,
            config.slow_period,
            config.quantity,
        )
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn validate_periods(fast: usize, slow: usize) -> Result<(), StrategyError> {
        if fast == 0 {
            return Err(invalid("fast_period", &fast.to_string(), "must be at least 1"));
        }
        if slow <= fast {
            return Err(invalid(
                "slow_period",
                &slow.to_string(),
                "must be greater than fast_period",
            ));
        }
        Ok(())
    }

    /// Order that moves the current position to `target`
    fn rebalance(current: i64, target: i64) -> Option<(Side, u32)> {
        let delta = target - current;
        let quantity = u32::try_from(delta.unsigned_abs()).ok()?;
        match delta.cmp(&0) {
            Ordering::Greater => Some((Side::Buy, quantity)),
            Ordering::Less => Some((Side::Sell, quantity)),
            Ordering::Equal => None,
        }
    }
}

fn invalid(name: &str, value: &str, reason: &str) -> StrategyError {
    StrategyError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StrategyError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "not a number"))
}

#[async_trait]
impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn description(&self) -> &str {
        "Goes long when the fast SMA crosses above the slow SMA and short on the reverse cross"
    }

    fn parameters(&self) -> Vec<StrategyParam> {
        vec![
            StrategyParam {
                name: "symbol",
                description: "Contract to trade",
                value: self.symbol.clone(),
            },
            StrategyParam {
                name: "fast_period",
                description: "Ticks in the fast average",
                value: self.fast.period().to_string(),
            },
            StrategyParam {
                name: "slow_period",
                description: "Ticks in the slow average",
                value: self.slow.period().to_string(),
            },
            StrategyParam {
                name: "quantity",
                description: "Contracts held after a cross",
                value: self.quantity.to_string(),
            },
        ]
    }

    fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), StrategyError> {
        match name {
            "symbol" => {
                let symbol = value.trim();
                if symbol.is_empty() {
                    return Err(invalid(name, value, "must not be empty"));
                }
                self.symbol = symbol.to_string();
            }
            "fast_period" => {
                let fast: usize = parse(name, value)?;
                Self::validate_periods(fast, self.slow.period())?;
                self.fast = Sma::new(fast);
            }
            "slow_period" => {
                let slow: usize = parse(name, value)?;
                Self::validate_periods(self.fast.period(), slow)?;
                self.slow = Sma::new(slow);
            }
            "quantity" => {
                let quantity: u32 = parse(name, value)?;
                if quantity == 0 {
                    return Err(invalid(name, value, "must be positive"));
                }
                self.quantity = quantity;
            }
            other => return Err(StrategyError::UnknownParameter(other.to_string())),
        }
        self.reset();
        Ok(())
    }

    fn init(&mut self, orders: Arc<OrderManager>) {
        self.orders = Some(orders);
        self.reset();
    }

    async fn on_price_tick(&mut self, symbol: &str, price: Decimal) -> Result<(), StrategyError> {
        if symbol != self.symbol {
            return Ok(());
        }
        let orders = self.orders.clone().ok_or(StrategyError::NotInitialized)?;

        let fast = self.fast.update(price);
        let slow = self.slow.update(price);
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return Ok(());
        };

        let relation = fast.cmp(&slow);
        let previous = self.last_relation.replace(relation);
        let target = match (previous, relation) {
            (Some(prev), Ordering::Greater) if prev != Ordering::Greater => i64::from(self.quantity),
            (Some(prev), Ordering::Less) if prev != Ordering::Less => -i64::from(self.quantity),
            _ => return Ok(()),
        };

        let current = orders.position(&self.symbol);
        let Some((side, quantity)) = Self::rebalance(current, target) else {
            return Ok(());
        };
        tracing::info!(
            strategy = self.name(),
            symbol = %self.symbol,
            %fast,
            %slow,
            current,
            target,
            "Crossover signal"
        );
        orders
            .submit_market_order(&self.symbol, side, quantity)
            .await?;
        Ok(())
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.last_relation = None;
    }
}
