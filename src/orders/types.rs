//! Order types and the order state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::gateway::GatewayError;

/// Internal order identifier
pub type OrderId = Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed contract count: positive for buys
    pub fn signed(self, quantity: u32) -> i64 {
        match self {
            Side::Buy => i64::from(quantity),
            Side::Sell => -i64::from(quantity),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Venue `action` value
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl OrderType {
    /// Venue `orderType` value
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
            OrderType::Stop => "Stop",
        }
    }
}

/// Local order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created, not yet at the venue (also between retries)
    Pending,
    /// Accepted by the venue
    Submitted,
    /// Accepted and partially filled
    Working,
    Filled,
    Rejected,
    Canceled,
    /// Transport error while placing
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Canceled | OrderStatus::Failed
        )
    }

    /// Counts toward working quantity in the risk check
    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::Working
        )
    }
}

/// What a caller asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: u32) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: u32, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop(symbol: impl Into<String>, side: Side, quantity: u32, stop_price: Decimal) -> Self {
        Self {
            stop_price: Some(stop_price),
            order_type: OrderType::Stop,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Reject malformed requests before any risk check
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        if self.symbol.trim().is_empty() {
            return Err(OrderError::EmptySymbol);
        }
        match self.order_type {
            OrderType::Limit if self.price.is_none() => Err(OrderError::MissingPrice(OrderType::Limit)),
            OrderType::Stop if self.stop_price.is_none() => Err(OrderError::MissingPrice(OrderType::Stop)),
            _ => Ok(()),
        }
    }
}

/// Order record owned by the order manager
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    /// First venue id; never changes once set
    pub external_id: Option<i64>,
    /// Venue ids of later attempts after retries
    pub retry_external_ids: Vec<i64>,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_quantity: u32,
    pub avg_fill_price: Option<Decimal>,
    pub reject_reason: Option<String>,
    pub retry_count: u32,
}

impl Order {
    pub fn new(request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: None,
            retry_external_ids: Vec::new(),
            request,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            filled_quantity: 0,
            avg_fill_price: None,
            reject_reason: None,
            retry_count: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.request.symbol
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.request.quantity.saturating_sub(self.filled_quantity)
    }

    /// Remaining quantity signed by side; zero once terminal
    pub fn signed_open_quantity(&self) -> i64 {
        if self.status.is_open() {
            self.request.side.signed(self.remaining_quantity())
        } else {
            0
        }
    }

    /// Every venue id this order has carried
    pub fn venue_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.external_id.into_iter().chain(self.retry_external_ids.iter().copied())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Venue accepted an attempt
    pub(crate) fn mark_submitted(&mut self, venue_id: i64) {
        match self.external_id {
            None => self.external_id = Some(venue_id),
            Some(existing) if existing == venue_id => {}
            Some(_) => self.retry_external_ids.push(venue_id),
        }
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Submitted;
        }
        self.touch();
    }

    /// Venue confirmed the order is resting
    pub(crate) fn mark_working(&mut self) -> bool {
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Submitted;
            self.touch();
            return true;
        }
        false
    }

    /// Apply a cumulative filled quantity; returns the new contracts filled
    pub(crate) fn apply_fill(&mut self, cumulative: u32, price: Option<Decimal>) -> u32 {
        let cumulative = cumulative.min(self.request.quantity);
        if cumulative <= self.filled_quantity || self.status.is_terminal() {
            return 0;
        }
        let delta = cumulative - self.filled_quantity;

        if let Some(price) = price {
            let previous = self.avg_fill_price.unwrap_or(price) * Decimal::from(self.filled_quantity);
            self.avg_fill_price =
                Some((previous + price * Decimal::from(delta)) / Decimal::from(cumulative));
        }
        self.filled_quantity = cumulative;
        self.status = if cumulative >= self.request.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Working
        };
        self.touch();
        delta
    }

    /// Either schedule a retry (returns true) or reject terminally
    pub(crate) fn reject(&mut self, reason: String, max_retries: u32) -> bool {
        self.reject_reason = Some(reason);
        self.touch();
        if self.retry_count < max_retries {
            self.retry_count += 1;
            self.status = OrderStatus::Pending;
            true
        } else {
            self.status = OrderStatus::Rejected;
            false
        }
    }

    /// Rejected locally; never retried
    pub(crate) fn reject_final(&mut self, reason: String) {
        self.reject_reason = Some(reason);
        self.status = OrderStatus::Rejected;
        self.touch();
    }

    pub(crate) fn mark_canceled(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Canceled;
        self.touch();
        true
    }

    pub(crate) fn mark_failed(&mut self, reason: String) -> bool {
        if self.status == OrderStatus::Filled {
            return false;
        }
        self.reject_reason = Some(reason);
        self.status = OrderStatus::Failed;
        self.touch();
        true
    }
}

/// Order status as reported by the venue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueOrderStatus {
    Working,
    Filled,
    Rejected,
    Cancelled,
    Other(String),
}

impl VenueOrderStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "Working" | "PendingNew" | "PendingReplace" | "Suspended" => VenueOrderStatus::Working,
            "Filled" | "Completed" => VenueOrderStatus::Filled,
            "Rejected" => VenueOrderStatus::Rejected,
            "Canceled" | "Cancelled" | "Expired" => VenueOrderStatus::Cancelled,
            other => VenueOrderStatus::Other(other.to_string()),
        }
    }
}

/// Status update for one venue order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusEvent {
    pub external_id: i64,
    pub status: VenueOrderStatus,
    /// Cumulative filled quantity when the venue reports one
    pub filled_quantity: Option<u32>,
    pub fill_price: Option<Decimal>,
    pub reason: Option<String>,
}

impl OrderStatusEvent {
    /// Decode an `order` entity update
    pub fn from_entity(entity: &Value) -> Option<Self> {
        let external_id = entity.get("id")?.as_i64()?;
        let status = VenueOrderStatus::parse(entity.get("ordStatus")?.as_str()?);
        let filled_quantity = entity
            .get("filledQty")
            .or_else(|| entity.get("cumQty"))
            .and_then(Value::as_u64)
            .and_then(|q| u32::try_from(q).ok());
        let fill_price = entity.get("avgPx").and_then(decimal_from);
        let reason = entity
            .get("rejectReason")
            .or_else(|| entity.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            external_id,
            status,
            filled_quantity,
            fill_price,
            reason,
        })
    }
}

/// Incremental execution for one venue order
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub external_id: i64,
    pub quantity: u32,
    pub price: Decimal,
}

impl FillReport {
    /// Decode a `fill` entity update
    pub fn from_entity(entity: &Value) -> Option<Self> {
        Some(Self {
            external_id: entity.get("orderId")?.as_i64()?,
            quantity: u32::try_from(entity.get("qty")?.as_u64()?).ok()?,
            price: decimal_from(entity.get("price")?)?,
        })
    }
}

pub(crate) fn decimal_from(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Order manager errors; risk and venue rejections are recorded on the order instead
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Quantity must be positive")]
    InvalidQuantity,
    #[error("Symbol must not be empty")]
    EmptySymbol,
    #[error("{0:?} order requires a price")]
    MissingPrice(OrderType),
    #[error("Order not found: {0}")]
    NotFound(OrderId),
    #[error("Order {id} cannot be canceled in status {status:?}")]
    NotCancelable { id: OrderId, status: OrderStatus },
    #[error("Order {0} has no venue id yet")]
    NotSubmitted(OrderId),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_validation() {
        assert!(matches!(
            OrderRequest::market("ESZ6", Side::Buy, 0).validate(),
            Err(OrderError::InvalidQuantity)
        ));
        assert!(matches!(
            OrderRequest::market(" ", Side::Buy, 1).validate(),
            Err(OrderError::EmptySymbol)
        ));
        let mut limit = OrderRequest::limit("ESZ6", Side::Sell, 1, dec!(5000));
        assert!(limit.validate().is_ok());
        limit.price = None;
        assert!(matches!(
            limit.validate(),
            Err(OrderError::MissingPrice(OrderType::Limit))
        ));
    }

    #[test]
    fn test_external_id_is_immutable() {
        let mut order = Order::new(OrderRequest::market("ESZ6", Side::Buy, 1));
        order.mark_submitted(10);
        assert!(order.reject("busy".into(), 3));
        order.mark_submitted(11);

        assert_eq!(order.external_id, Some(10));
        assert_eq!(order.retry_external_ids, vec![11]);
        assert_eq!(order.venue_ids().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(order.status, OrderStatus::Submitted);
    }

    #[test]
    fn test_partial_then_full_fill() {
        let mut order = Order::new(OrderRequest::market("ESZ6", Side::Sell, 3));
        order.mark_submitted(1);

        assert_eq!(order.apply_fill(1, Some(dec!(100))), 1);
        assert_eq!(order.status, OrderStatus::Working);
        assert_eq!(order.signed_open_quantity(), -2);

        // Stale cumulative quantity is ignored
        assert_eq!(order.apply_fill(1, Some(dec!(100))), 0);

        assert_eq!(order.apply_fill(3, Some(dec!(103))), 2);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(102)));
        assert_eq!(order.signed_open_quantity(), 0);
    }

    #[test]
    fn test_reject_respects_retry_bound() {
        let mut order = Order::new(OrderRequest::market("ESZ6", Side::Buy, 1));
        assert!(order.reject("a".into(), 2));
        assert!(order.reject("b".into(), 2));
        assert!(!order.reject("c".into(), 2));
        assert_eq!(order.retry_count, 2);
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.reject_reason.as_deref(), Some("c"));
    }

    #[test]
    fn test_filled_order_cannot_fail() {
        let mut order = Order::new(OrderRequest::market("ESZ6", Side::Buy, 1));
        order.mark_submitted(1);
        order.apply_fill(1, None);
        assert!(!order.mark_failed("late".into()));
        assert!(!order.mark_canceled());
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_status_event_from_entity() {
        let event = OrderStatusEvent::from_entity(&json!({
            "id": 77, "ordStatus": "Rejected", "rejectReason": "Insufficient margin"
        }))
        .unwrap();
        assert_eq!(event.external_id, 77);
        assert_eq!(event.status, VenueOrderStatus::Rejected);
        assert_eq!(event.reason.as_deref(), Some("Insufficient margin"));

        assert!(OrderStatusEvent::from_entity(&json!({"ordStatus": "Working"})).is_none());
    }

    #[test]
    fn test_fill_report_from_entity() {
        let fill = FillReport::from_entity(&json!({
            "id": 5, "orderId": 77, "qty": 2, "price": 4512.25
        }))
        .unwrap();
        assert_eq!(fill.external_id, 77);
        assert_eq!(fill.quantity, 2);
        assert_eq!(fill.price, dec!(4512.25));
    }
}
