//! Router types: subscription kinds, canonical keys and routed events

use serde_json::Value;
use std::sync::Arc;

/// Kind of streaming subscription, mapped to explicit wire endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Quote,
    DepthOfMarket,
    Chart,
    UserSync,
}

impl SubscriptionKind {
    pub fn subscribe_endpoint(&self) -> &'static str {
        match self {
            SubscriptionKind::Quote => "md/subscribeQuote",
            SubscriptionKind::DepthOfMarket => "md/subscribeDOM",
            SubscriptionKind::Chart => "md/getChart",
            SubscriptionKind::UserSync => "user/syncrequest",
        }
    }

    /// `None` when the venue has no way to end the stream
    pub fn unsubscribe_endpoint(&self) -> Option<&'static str> {
        match self {
            SubscriptionKind::Quote => Some("md/unsubscribeQuote"),
            SubscriptionKind::DepthOfMarket => Some("md/unsubscribeDOM"),
            SubscriptionKind::Chart => Some("md/cancelChart"),
            SubscriptionKind::UserSync => None,
        }
    }
}

/// Canonical identity of a subscription: kind plus key-sorted parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub kind: SubscriptionKind,
    pub params: String,
}

impl SubscriptionKey {
    pub fn new(kind: SubscriptionKind, params: &Value) -> Self {
        Self {
            kind,
            params: canonicalize(params).to_string(),
        }
    }
}

/// Recursively sort object keys so logically equal parameters compare equal
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Live subscription held by the router
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub params: Value,
    pub ref_count: usize,
    /// Venue-assigned id needed to cancel (charts)
    pub wire_id: Option<i64>,
}

/// Category of an inbound event, used to pick observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Quote,
    Chart,
    DepthOfMarket,
    UserSync,
    Order,
    Position,
    CashBalance,
    Fill,
    /// Any other incremental entity update
    Props,
}

impl EventClass {
    /// Classify a `props` entity type
    pub fn from_entity_type(entity_type: &str) -> Self {
        match entity_type {
            "order" => EventClass::Order,
            "position" => EventClass::Position,
            "cashBalance" => EventClass::CashBalance,
            "fill" => EventClass::Fill,
            _ => EventClass::Props,
        }
    }
}

/// Event handed to observers
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub class: EventClass,
    /// `Created` / `Updated` / `Deleted` for entity updates
    pub event_type: Option<String>,
    /// Entity type as sent by the venue, for `Props`
    pub entity_type: Option<String>,
    pub data: Value,
}

impl RoutedEvent {
    pub fn new(class: EventClass, data: Value) -> Self {
        Self {
            class,
            event_type: None,
            entity_type: None,
            data,
        }
    }
}

/// Synchronous observer; long work must be handed to a queue
pub type Observer = Arc<dyn Fn(&RoutedEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_order_independent() {
        let a = SubscriptionKey::new(
            SubscriptionKind::Chart,
            &json!({"symbol": "ESZ6", "chartDescription": {"underlyingType": "Tick", "elementSize": 1}}),
        );
        let b = SubscriptionKey::new(
            SubscriptionKind::Chart,
            &json!({"chartDescription": {"elementSize": 1, "underlyingType": "Tick"}, "symbol": "ESZ6"}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_distinguishes_kind() {
        let params = json!({"symbol": "ESZ6"});
        assert_ne!(
            SubscriptionKey::new(SubscriptionKind::Quote, &params),
            SubscriptionKey::new(SubscriptionKind::DepthOfMarket, &params)
        );
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(SubscriptionKind::Quote.subscribe_endpoint(), "md/subscribeQuote");
        assert_eq!(
            SubscriptionKind::Chart.unsubscribe_endpoint(),
            Some("md/cancelChart")
        );
        assert!(SubscriptionKind::UserSync.unsubscribe_endpoint().is_none());
    }

    #[test]
    fn test_entity_classification() {
        assert_eq!(EventClass::from_entity_type("order"), EventClass::Order);
        assert_eq!(EventClass::from_entity_type("position"), EventClass::Position);
        assert_eq!(EventClass::from_entity_type("cashBalance"), EventClass::CashBalance);
        assert_eq!(EventClass::from_entity_type("fill"), EventClass::Fill);
        assert_eq!(EventClass::from_entity_type("orderVersion"), EventClass::Props);
    }
}
