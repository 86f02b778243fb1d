//! Live position and PnL tracking from account sync, position, cash and quote events

use super::types::{quote_trade_price, PlEntry, PositionUpdate};
use crate::orders::decimal_from;
use crate::risk::{PositionSource, RiskManager};
use crate::router::{EventClass, RoutedEvent, SubscriptionKind, SubscriptionRouter};
use crate::telemetry::{set_gauge, GaugeMetric};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
struct PortfolioState {
    entries: HashMap<String, PlEntry>,
    symbols: HashMap<i64, String>,
    contracts: HashMap<String, i64>,
    value_per_point: HashMap<i64, Decimal>,
    /// Authoritative realized figure from the latest cash balance
    venue_realized: Option<Decimal>,
}

impl PortfolioState {
    fn symbol_for(&self, contract_id: i64) -> String {
        self.symbols
            .get(&contract_id)
            .cloned()
            .unwrap_or_else(|| contract_id.to_string())
    }

    fn local_realized(&self) -> Decimal {
        self.entries.values().map(|e| e.realized).sum()
    }

    fn realized(&self) -> Decimal {
        self.venue_realized.unwrap_or_else(|| self.local_realized())
    }

    fn unrealized(&self) -> Decimal {
        self.entries.values().map(|e| e.unrealized).sum()
    }

    /// Apply a position update; returns the previous net position
    fn apply_position(&mut self, update: &PositionUpdate) -> (String, i64) {
        let symbol = self.symbol_for(update.contract_id);
        let value_per_point = self
            .value_per_point
            .get(&update.contract_id)
            .copied()
            .unwrap_or(Decimal::ONE);

        let entry = self
            .entries
            .entry(symbol.clone())
            .or_insert_with(|| PlEntry::new(symbol.clone(), update.contract_id, value_per_point));
        let previous = entry.net_pos;
        entry.value_per_point = value_per_point;
        entry.net_pos = update.net_pos;
        entry.net_price = update.net_price;
        entry.realized = update.realized(value_per_point);
        entry.remark();
        (symbol, previous)
    }
}

/// Per-symbol and total PnL fed by routed venue events
pub struct PortfolioTracker {
    state: RwLock<PortfolioState>,
    risk: Option<Arc<RiskManager>>,
    quotes: RwLock<Option<Arc<SubscriptionRouter>>>,
    synced: AtomicBool,
}

impl PortfolioTracker {
    /// Realized PnL is pushed to `risk` whenever it changes
    pub fn new(risk: Option<Arc<RiskManager>>) -> Self {
        Self {
            state: RwLock::new(PortfolioState::default()),
            risk,
            quotes: RwLock::new(None),
            synced: AtomicBool::new(false),
        }
    }

    /// Observe account events on `trading` and quotes on `market_data`;
    /// quote subscriptions follow open positions.
    pub fn attach(self: &Arc<Self>, trading: &SubscriptionRouter, market_data: Arc<SubscriptionRouter>) {
        let handlers: [(EventClass, fn(&Self, &Value)); 3] = [
            (EventClass::UserSync, Self::handle_user_sync),
            (EventClass::Position, Self::handle_position),
            (EventClass::CashBalance, Self::handle_cash_balance),
        ];
        for (class, handler) in handlers {
            trading.add_observer(class, Self::observer(Arc::downgrade(self), handler));
        }
        market_data.add_observer(
            EventClass::Quote,
            Self::observer(Arc::downgrade(self), Self::handle_quote),
        );
        *self.quotes.write() = Some(market_data);
    }

    fn observer(tracker: Weak<Self>, handler: fn(&Self, &Value)) -> crate::router::Observer {
        Arc::new(move |event: &RoutedEvent| {
            if let Some(tracker) = tracker.upgrade() {
                handler(&tracker, &event.data);
            }
        })
    }

    /// Build lookup tables from the initial sync and seed positions
    pub fn handle_user_sync(&self, data: &Value) {
        let list = |field: &str| -> Vec<Value> {
            data.get(field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let products: HashMap<i64, Decimal> = list("products")
            .iter()
            .filter_map(|p| Some((p.get("id")?.as_i64()?, decimal_from(p.get("valuePerPoint")?)?)))
            .collect();
        let maturities: HashMap<i64, i64> = list("contractMaturities")
            .iter()
            .filter_map(|m| Some((m.get("id")?.as_i64()?, m.get("productId")?.as_i64()?)))
            .collect();

        let mut opened = Vec::new();
        let mut closed = Vec::new();
        let (contracts, positions) = {
            let mut state = self.state.write();
            for contract in list("contracts") {
                let (Some(id), Some(name)) = (
                    contract.get("id").and_then(Value::as_i64),
                    contract.get("name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let value_per_point = contract
                    .get("contractMaturityId")
                    .and_then(Value::as_i64)
                    .and_then(|m| maturities.get(&m))
                    .and_then(|p| products.get(p))
                    .copied()
                    .or_else(|| contract.get("valuePerPoint").and_then(decimal_from));
                match value_per_point {
                    Some(vpp) => {
                        state.value_per_point.insert(id, vpp);
                    }
                    None => tracing::warn!(contract_id = id, name, "No value per point for contract"),
                }
                state.symbols.insert(id, name.to_string());
                state.contracts.insert(name.to_string(), id);
            }

            let mut positions = 0;
            for entity in list("positions") {
                let Some(update) = PositionUpdate::from_entity(&entity) else {
                    continue;
                };
                // A repeated sync only changes subscriptions on a 0 boundary
                let (symbol, previous) = state.apply_position(&update);
                match (previous, update.net_pos) {
                    (0, now) if now != 0 => opened.push(symbol),
                    (was, 0) if was != 0 => closed.push(symbol),
                    _ => {}
                }
                positions += 1;
            }
            (state.symbols.len(), positions)
        };

        for balance in list("cashBalances") {
            self.handle_cash_balance(&balance);
        }

        self.synced.store(true, Ordering::SeqCst);
        tracing::info!(contracts, positions, open = opened.len(), "Portfolio synced");
        for symbol in opened {
            self.subscribe_quotes(&symbol);
        }
        for symbol in closed {
            self.unsubscribe_quotes(&symbol);
        }
        self.publish();
    }

    /// Recompute realized PnL from a position update
    pub fn handle_position(&self, entity: &Value) {
        let Some(update) = PositionUpdate::from_entity(entity) else {
            tracing::debug!(data = %entity, "Ignoring position entity");
            return;
        };
        let (symbol, previous) = self.state.write().apply_position(&update);
        tracing::debug!(symbol = %symbol, previous, net_pos = update.net_pos, "Position updated");

        match (previous, update.net_pos) {
            (0, now) if now != 0 => self.subscribe_quotes(&symbol),
            (was, 0) if was != 0 => self.unsubscribe_quotes(&symbol),
            _ => {}
        }
        self.publish();
    }

    /// Adopt the venue's realized PnL
    pub fn handle_cash_balance(&self, entity: &Value) {
        let Some(realized) = entity.get("realizedPnL").and_then(decimal_from) else {
            return;
        };
        self.state.write().venue_realized = Some(realized);
        tracing::debug!(%realized, "Cash balance realized PnL");
        self.publish();
    }

    /// Mark a tracked contract at its last trade
    pub fn handle_quote(&self, quote: &Value) {
        let Some((contract_id, price)) = quote_trade_price(quote) else {
            return;
        };
        let marked = {
            let mut state = self.state.write();
            let Some(symbol) = state.symbols.get(&contract_id).cloned() else {
                return;
            };
            match state.entries.get_mut(&symbol) {
                Some(entry) => {
                    entry.mark(price);
                    true
                }
                None => false,
            }
        };
        if marked {
            let unrealized = self.unrealized_pnl();
            set_gauge(GaugeMetric::UnrealizedPnl, unrealized.to_f64().unwrap_or_default());
        }
    }

    fn subscribe_quotes(&self, symbol: &str) {
        let router = self.quotes.read().clone();
        if let Some(router) = router {
            router.subscribe(SubscriptionKind::Quote, json!({ "symbol": symbol }));
        }
    }

    fn unsubscribe_quotes(&self, symbol: &str) {
        let router = self.quotes.read().clone();
        if let Some(router) = router {
            router.unsubscribe(SubscriptionKind::Quote, json!({ "symbol": symbol }));
        }
    }

    fn publish(&self) {
        let (realized, unrealized, open) = {
            let state = self.state.read();
            let open = state.entries.values().filter(|e| e.net_pos != 0).count();
            (state.realized(), state.unrealized(), open)
        };
        set_gauge(GaugeMetric::RealizedPnl, realized.to_f64().unwrap_or_default());
        set_gauge(GaugeMetric::UnrealizedPnl, unrealized.to_f64().unwrap_or_default());
        set_gauge(GaugeMetric::OpenPositions, open as f64);
        if let Some(risk) = &self.risk {
            risk.set_daily_pnl(realized);
        }
    }

    /// True once the initial account sync has been applied
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Consistent copy of every entry
    pub fn snapshot(&self) -> HashMap<String, PlEntry> {
        self.state.read().entries.clone()
    }

    pub fn entry(&self, symbol: &str) -> Option<PlEntry> {
        self.state.read().entries.get(symbol).cloned()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.state.read().realized()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.state.read().unrealized()
    }

    pub fn total_pnl(&self) -> Decimal {
        let state = self.state.read();
        state.realized() + state.unrealized()
    }

    pub fn contract_id(&self, symbol: &str) -> Option<i64> {
        self.state.read().contracts.get(symbol).copied()
    }

    pub fn value_per_point(&self, contract_id: i64) -> Option<Decimal> {
        self.state.read().value_per_point.get(&contract_id).copied()
    }
}

impl PositionSource for PortfolioTracker {
    fn net_position(&self, symbol: &str) -> i64 {
        self.state
            .read()
            .entries
            .get(symbol)
            .map_or(0, |e| e.net_pos)
    }

    fn open_positions(&self) -> Vec<(String, i64)> {
        let mut open: Vec<(String, i64)> = self
            .state
            .read()
            .entries
            .values()
            .filter(|e| e.net_pos != 0)
            .map(|e| (e.symbol.clone(), e.net_pos))
            .collect();
        open.sort();
        open
    }
}
