//! Portfolio types

use crate::orders::decimal_from;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Per-symbol profit and loss
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlEntry {
    pub symbol: String,
    pub contract_id: i64,
    /// Signed contracts; positive is long
    pub net_pos: i64,
    /// Average entry price of the open position
    pub net_price: Decimal,
    pub value_per_point: Decimal,
    pub last_price: Option<Decimal>,
    pub realized: Decimal,
    pub unrealized: Decimal,
}

impl PlEntry {
    pub fn new(symbol: impl Into<String>, contract_id: i64, value_per_point: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            contract_id,
            net_pos: 0,
            net_price: Decimal::ZERO,
            value_per_point,
            last_price: None,
            realized: Decimal::ZERO,
            unrealized: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.realized + self.unrealized
    }

    /// Mark the open position at `price`
    pub(crate) fn mark(&mut self, price: Decimal) {
        self.last_price = Some(price);
        self.unrealized = (price - self.net_price) * self.value_per_point * Decimal::from(self.net_pos);
    }

    /// Re-mark at the last seen price, or zero out when flat
    pub(crate) fn remark(&mut self) {
        match self.last_price {
            Some(price) if self.net_pos != 0 => self.mark(price),
            _ => self.unrealized = Decimal::ZERO,
        }
    }
}

/// Fields of a venue `position` entity
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub contract_id: i64,
    pub net_pos: i64,
    pub net_price: Decimal,
    pub bought_value: Decimal,
    pub sold_value: Decimal,
}

impl PositionUpdate {
    pub fn from_entity(entity: &Value) -> Option<Self> {
        let number = |field: &str| entity.get(field).and_then(decimal_from).unwrap_or_default();
        Some(Self {
            contract_id: entity.get("contractId")?.as_i64()?,
            net_pos: entity.get("netPos").and_then(Value::as_i64).unwrap_or(0),
            net_price: number("netPrice"),
            bought_value: number("boughtValue"),
            sold_value: number("soldValue"),
        })
    }

    /// Realized PnL in currency: closed notional plus the open leg at cost
    pub fn realized(&self, value_per_point: Decimal) -> Decimal {
        (self.sold_value - self.bought_value + Decimal::from(self.net_pos) * self.net_price)
            * value_per_point
    }
}

/// Last trade price from a quote payload
pub fn quote_trade_price(quote: &Value) -> Option<(i64, Decimal)> {
    let contract_id = quote.get("contractId")?.as_i64()?;
    let price = quote
        .get("entries")?
        .get("Trade")?
        .get("price")
        .and_then(decimal_from)?;
    Some((contract_id, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_mark_long_and_short() {
        let mut entry = PlEntry::new("ESZ6", 1, dec!(50));
        entry.net_pos = 2;
        entry.net_price = dec!(100);
        entry.mark(dec!(103));
        assert_eq!(entry.unrealized, dec!(300));

        entry.net_pos = -1;
        entry.mark(dec!(103));
        assert_eq!(entry.unrealized, dec!(-150));

        entry.net_pos = 0;
        entry.remark();
        assert_eq!(entry.unrealized, Decimal::ZERO);
    }

    #[test]
    fn test_realized_from_position() {
        // Bought 2 @ 100, sold 1 @ 104, one still open at 100
        let update = PositionUpdate::from_entity(&json!({
            "id": 1, "contractId": 9, "netPos": 1, "netPrice": 100,
            "bought": 2, "boughtValue": 200, "sold": 1, "soldValue": 104
        }))
        .unwrap();
        assert_eq!(update.realized(dec!(5)), dec!(20));
    }

    #[test]
    fn test_flat_position_without_price() {
        let update = PositionUpdate::from_entity(&json!({
            "contractId": 9, "netPos": 0, "boughtValue": 300.5, "soldValue": 301
        }))
        .unwrap();
        assert_eq!(update.net_price, Decimal::ZERO);
        assert_eq!(update.realized(dec!(2)), dec!(1));
    }

    #[test]
    fn test_quote_trade_price() {
        let quote = json!({"contractId": 9, "entries": {"Bid": {"price": 99.75}, "Trade": {"price": 100.25, "size": 3}}});
        assert_eq!(quote_trade_price(&quote), Some((9, dec!(100.25))));
        assert_eq!(quote_trade_price(&json!({"contractId": 9, "entries": {}})), None);
    }
}
