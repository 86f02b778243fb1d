//! Pre-trade gate with a daily PnL accumulator

use super::types::{RiskCheck, RiskError, RiskLimits};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Hours after which the daily accumulator starts over
pub const DAILY_RESET_HOURS: i64 = 24;

#[derive(Debug)]
struct RiskState {
    limits: RiskLimits,
    daily_pnl: Decimal,
    last_reset: DateTime<Utc>,
}

impl RiskState {
    fn roll_day(&mut self, now: DateTime<Utc>) {
        if now - self.last_reset >= Duration::hours(DAILY_RESET_HOURS) {
            tracing::info!(previous_pnl = %self.daily_pnl, "Daily risk window reset");
            self.daily_pnl = Decimal::ZERO;
            self.last_reset = now;
        }
    }
}

/// Risk manager consulted by the order manager before any venue contact
#[derive(Debug)]
pub struct RiskManager {
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self::new_at(limits, Utc::now())
    }

    /// Start the daily window at `now`
    pub fn new_at(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(RiskState {
                limits,
                daily_pnl: Decimal::ZERO,
                last_reset: now,
            }),
        }
    }

    pub fn check(&self, request: &RiskCheck<'_>) -> Result<(), RiskError> {
        self.check_at(request, Utc::now())
    }

    /// Evaluate one order under the lock; no I/O
    pub fn check_at(&self, request: &RiskCheck<'_>, now: DateTime<Utc>) -> Result<(), RiskError> {
        let result = {
            let mut state = self.state.lock();
            if !state.limits.enabled {
                return Ok(());
            }
            state.roll_day(now);
            Self::evaluate(&state, request)
        };

        if let Err(e) = &result {
            increment(CounterMetric::RiskRejections);
            tracing::warn!(symbol = request.symbol, side = ?request.side, qty = request.quantity, error = %e, "Risk check failed");
        }
        result
    }

    fn evaluate(state: &RiskState, request: &RiskCheck<'_>) -> Result<(), RiskError> {
        let limit = state.limits.daily_loss_limit;
        if state.daily_pnl <= -limit {
            return Err(RiskError::DailyLossLimitReached {
                daily_pnl: state.daily_pnl,
                limit,
            });
        }

        let prospective = request.prospective_position();
        if prospective.unsigned_abs() > u64::from(state.limits.max_contracts) {
            return Err(RiskError::MaxContractsExceeded {
                symbol: request.symbol.to_string(),
                prospective,
                max: state.limits.max_contracts,
            });
        }
        Ok(())
    }

    /// Add a realized PnL delta to today's total
    pub fn record_pnl(&self, delta: Decimal) {
        let total = {
            let mut state = self.state.lock();
            state.roll_day(Utc::now());
            state.daily_pnl += delta;
            state.daily_pnl
        };
        Self::publish(total);
    }

    /// Replace today's total with an authoritative figure
    pub fn set_daily_pnl(&self, pnl: Decimal) {
        {
            let mut state = self.state.lock();
            state.roll_day(Utc::now());
            state.daily_pnl = pnl;
        }
        Self::publish(pnl);
    }

    fn publish(pnl: Decimal) {
        set_gauge(GaugeMetric::DailyPnl, pnl.to_f64().unwrap_or_default());
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.state.lock().daily_pnl
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.state.lock().last_reset
    }

    /// Start a new daily window now
    pub fn reset_daily(&self) {
        let mut state = self.state.lock();
        state.daily_pnl = Decimal::ZERO;
        state.last_reset = Utc::now();
    }

    pub fn limits(&self) -> RiskLimits {
        self.state.lock().limits.clone()
    }

    pub fn set_limits(&self, limits: RiskLimits) {
        tracing::info!(?limits, "Risk limits updated");
        self.state.lock().limits = limits;
    }
}
