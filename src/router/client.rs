//! Subscription router on top of a transport

use super::table::{Release, SubscriptionTable};
use super::types::{EventClass, Observer, RoutedEvent, SubscriptionKey, SubscriptionKind};
use crate::transport::{ResponseMessage, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Ref-counted subscriptions plus typed fan-out of inbound events
pub struct SubscriptionRouter {
    transport: Arc<Transport>,
    request_timeout: Duration,
    table: Mutex<SubscriptionTable>,
    observers: RwLock<HashMap<EventClass, Vec<Observer>>>,
}

impl SubscriptionRouter {
    /// Build a router and register its handlers on `transport`
    pub fn new(transport: Arc<Transport>, request_timeout: Duration) -> Arc<Self> {
        let router = Arc::new(Self {
            transport: Arc::clone(&transport),
            request_timeout,
            table: Mutex::new(SubscriptionTable::new()),
            observers: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&router);
        for event in ["md", "chart"] {
            let weak: Weak<Self> = weak.clone();
            transport.on_event(
                event,
                Arc::new(move |msg: &ResponseMessage| {
                    if let Some(router) = weak.upgrade() {
                        router.handle_market_data(msg);
                    }
                }),
            );
        }

        let props_weak = weak.clone();
        transport.on_event(
            "props",
            Arc::new(move |msg: &ResponseMessage| {
                if let Some(router) = props_weak.upgrade() {
                    router.handle_props(msg);
                }
            }),
        );

        let sync_weak = weak;
        transport.on_reply(
            SubscriptionKind::UserSync.subscribe_endpoint(),
            Arc::new(move |msg: &ResponseMessage| {
                if let Some(router) = sync_weak.upgrade() {
                    router.handle_sync_reply(msg);
                }
            }),
        );

        transport.on_event(
            "shutdown",
            Arc::new(|msg: &ResponseMessage| {
                tracing::warn!(data = ?msg.data, "Venue announced shutdown");
            }),
        );

        router
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Append an observer for `class`; observers run in registration order
    pub fn add_observer(&self, class: EventClass, observer: Observer) {
        self.observers.write().entry(class).or_default().push(observer);
    }

    /// Take a reference on a subscription; only the first one hits the wire
    pub fn subscribe(self: &Arc<Self>, kind: SubscriptionKind, params: Value) -> SubscriptionKey {
        let key = SubscriptionKey::new(kind, &params);
        let count = self.table.lock().acquire(&key, &params);

        if count == 1 {
            tracing::debug!(?kind, params = %key.params, "Subscribing");
            let endpoint = kind.subscribe_endpoint();
            // Queued here so a later unsubscribe cannot overtake it on the wire
            match self.transport.send_with_reply(endpoint, Some(params)) {
                Ok((id, reply)) => {
                    let router = Arc::clone(self);
                    let key = key.clone();
                    tokio::spawn(async move {
                        let reply = router
                            .transport
                            .await_reply(endpoint, id, reply, router.request_timeout)
                            .await;
                        router.finish_subscribe(key, reply);
                    });
                }
                Err(e) => tracing::warn!(endpoint, error = %e, "Subscribe failed"),
            }
        } else {
            tracing::trace!(?kind, params = %key.params, count, "Subscription shared");
        }
        key
    }

    fn finish_subscribe(&self, key: SubscriptionKey, reply: Result<ResponseMessage, TransportError>) {
        let endpoint = key.kind.subscribe_endpoint();
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "Subscribe failed");
                return;
            }
        };

        if reply.is_failure() {
            tracing::warn!(
                endpoint,
                status = ?reply.status,
                status_text = ?reply.status_text,
                "Subscribe rejected"
            );
            return;
        }

        match key.kind {
            SubscriptionKind::Chart => {
                let wire_id = reply
                    .data
                    .as_ref()
                    .and_then(|d| d.get("realtimeId"))
                    .and_then(Value::as_i64);
                if let Some(id) = wire_id {
                    if !self.table.lock().set_wire_id(&key, id) {
                        // Released before the reply came back
                        self.send_unsubscribe(SubscriptionKind::Chart, &Value::Null, Some(id));
                    }
                }
            }
            SubscriptionKind::UserSync => self.handle_sync_reply(&reply),
            SubscriptionKind::Quote | SubscriptionKind::DepthOfMarket => {}
        }
    }

    /// Drop a reference; the wire unsubscribe is sent when the count hits zero.
    /// Returns the remaining count.
    pub fn unsubscribe(&self, kind: SubscriptionKind, params: Value) -> usize {
        let key = SubscriptionKey::new(kind, &params);
        let release = self.table.lock().release(&key);

        match release {
            Release::Removed(record) => {
                tracing::debug!(?kind, params = %key.params, "Unsubscribing");
                self.send_unsubscribe(kind, &record.params, record.wire_id);
                0
            }
            Release::Remaining(count) => count,
            Release::NotFound => {
                tracing::warn!(?kind, params = %key.params, "Unsubscribe without subscription");
                0
            }
        }
    }

    /// Release every subscription regardless of ref count
    pub fn unsubscribe_all(&self) {
        let drained = self.table.lock().drain();
        tracing::info!(count = drained.len(), "Releasing all subscriptions");
        for (key, record) in drained {
            self.send_unsubscribe(key.kind, &record.params, record.wire_id);
        }
    }

    fn send_unsubscribe(&self, kind: SubscriptionKind, params: &Value, wire_id: Option<i64>) {
        let Some(endpoint) = kind.unsubscribe_endpoint() else {
            return;
        };
        let body = match kind {
            SubscriptionKind::Chart => match wire_id {
                Some(id) => json!({ "subscriptionId": id }),
                None => {
                    tracing::warn!("Chart released before its id arrived");
                    return;
                }
            },
            _ => json!({ "symbol": params.get("symbol").cloned().unwrap_or(Value::Null) }),
        };
        if let Err(e) = self.transport.send(endpoint, Some(body)) {
            tracing::warn!(endpoint, error = %e, "Unsubscribe not sent");
        }
    }

    pub fn ref_count(&self, kind: SubscriptionKind, params: &Value) -> usize {
        self.table.lock().ref_count(&SubscriptionKey::new(kind, params))
    }

    pub fn subscription_count(&self) -> usize {
        self.table.lock().len()
    }

    /// One-shot historical bars; bypasses the subscription table
    pub async fn historical_chart(&self, params: Value) -> Result<ResponseMessage, TransportError> {
        self.transport
            .request(
                SubscriptionKind::Chart.subscribe_endpoint(),
                Some(params),
                self.request_timeout,
            )
            .await
    }

    /// Invoke every observer registered for the event's class
    pub fn dispatch(&self, event: &RoutedEvent) {
        let observers = self
            .observers
            .read()
            .get(&event.class)
            .cloned()
            .unwrap_or_default();
        for observer in observers {
            observer(event);
        }
    }

    fn handle_market_data(&self, msg: &ResponseMessage) {
        let Some(data) = msg.data.as_ref() else {
            return;
        };
        let streams = [
            ("quotes", EventClass::Quote),
            ("charts", EventClass::Chart),
            ("doms", EventClass::DepthOfMarket),
        ];
        for (field, class) in streams {
            if let Some(items) = data.get(field).and_then(Value::as_array) {
                for item in items {
                    self.dispatch(&RoutedEvent::new(class, item.clone()));
                }
            }
        }
    }

    fn handle_props(&self, msg: &ResponseMessage) {
        let Some(data) = msg.data.as_ref() else {
            return;
        };
        let entity_type = data.get("entityType").and_then(Value::as_str).unwrap_or("");
        let event = RoutedEvent {
            class: EventClass::from_entity_type(entity_type),
            event_type: data
                .get("eventType")
                .and_then(Value::as_str)
                .map(str::to_string),
            entity_type: Some(entity_type.to_string()),
            data: data.get("entity").cloned().unwrap_or(Value::Null),
        };
        self.dispatch(&event);
    }

    fn handle_sync_reply(&self, msg: &ResponseMessage) {
        if msg.is_failure() {
            tracing::warn!(status = ?msg.status, status_text = ?msg.status_text, "Sync request failed");
            return;
        }
        if let Some(data) = msg.data.clone() {
            self.dispatch(&RoutedEvent::new(EventClass::UserSync, data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::authorized_transport;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn router() -> (Arc<SubscriptionRouter>, mpsc::UnboundedReceiver<String>) {
        let (transport, rx) = authorized_transport();
        (SubscriptionRouter::new(transport, Duration::from_secs(5)), rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame expected")
            .expect("channel open")
    }

    fn frame_id(frame: &str) -> u64 {
        frame.lines().nth(1).and_then(|l| l.parse().ok()).unwrap()
    }

    fn recorder() -> (Observer, Arc<parking_lot::Mutex<Vec<RoutedEvent>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer = Arc::new(move |event: &RoutedEvent| sink.lock().push(event.clone()));
        (observer, seen)
    }

    #[tokio::test]
    async fn test_ref_counted_quote_subscription() {
        let (router, mut rx) = router();
        let params = json!({"symbol": "ESZ6"});

        router.subscribe(SubscriptionKind::Quote, params.clone());
        router.subscribe(SubscriptionKind::Quote, params.clone());
        assert_eq!(router.ref_count(SubscriptionKind::Quote, &params), 2);

        let frame = next_frame(&mut rx).await;
        assert!(frame.starts_with("md/subscribeQuote\n"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "second subscribe must not hit the wire");

        assert_eq!(router.unsubscribe(SubscriptionKind::Quote, params.clone()), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(router.ref_count(SubscriptionKind::Quote, &params), 1);

        assert_eq!(router.unsubscribe(SubscriptionKind::Quote, params.clone()), 0);
        let frame = rx.try_recv().unwrap();
        assert!(frame.starts_with("md/unsubscribeQuote\n"));
        assert!(frame.ends_with(r#"{"symbol":"ESZ6"}"#));
        assert!(rx.try_recv().is_err());

        // Extra release is a no-op on the wire
        router.unsubscribe(SubscriptionKind::Quote, params);
        assert!(rx.try_recv().is_err());
        assert_eq!(router.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_is_queued_before_immediate_unsubscribe() {
        let (router, mut rx) = router();
        let params = json!({"symbol": "NQZ6"});

        router.subscribe(SubscriptionKind::Quote, params.clone());
        assert_eq!(router.unsubscribe(SubscriptionKind::Quote, params), 0);

        // Both frames are queued without yielding to the runtime
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(first.starts_with("md/subscribeQuote\n"));
        assert!(second.starts_with("md/unsubscribeQuote\n"));
        assert!(frame_id(&first) < frame_id(&second));
        assert_eq!(router.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_reply_dispatches_user_sync() {
        let (router, mut rx) = router();
        let (observer, seen) = recorder();
        router.add_observer(EventClass::UserSync, observer);

        router.subscribe(SubscriptionKind::UserSync, json!({"users": [7]}));
        let frame = next_frame(&mut rx).await;
        let id = frame_id(&frame);
        router.transport().handle_text(&format!(
            r#"a[{{"s":200,"i":{},"d":{{"positions":[]}}}}]"#,
            id
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let events = seen.lock();
        assert_eq!(events[0].class, EventClass::UserSync);
        assert_eq!(events[0].data, json!({"positions": []}));
    }

    #[tokio::test]
    async fn test_chart_cancel_uses_wire_id() {
        let (router, mut rx) = router();
        let params = json!({"symbol": "NQZ6", "chartDescription": {"underlyingType": "MinuteBar"}});

        router.subscribe(SubscriptionKind::Chart, params.clone());
        let frame = next_frame(&mut rx).await;
        router.transport().handle_text(&format!(
            r#"a[{{"s":200,"i":{},"d":{{"historicalId":1,"realtimeId":42}}}}]"#,
            frame_id(&frame)
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let key = SubscriptionKey::new(SubscriptionKind::Chart, &params);
                let has_id = router
                    .table
                    .lock()
                    .get(&key)
                    .is_some_and(|r| r.wire_id == Some(42));
                if has_id {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        router.unsubscribe(SubscriptionKind::Chart, params);
        let frame = rx.try_recv().unwrap();
        assert!(frame.starts_with("md/cancelChart\n"));
        assert!(frame.ends_with(r#"{"subscriptionId":42}"#));
    }

    #[tokio::test]
    async fn test_unsubscribe_all_releases_everything() {
        let (router, mut rx) = router();
        router.subscribe(SubscriptionKind::Quote, json!({"symbol": "ESZ6"}));
        router.subscribe(SubscriptionKind::Quote, json!({"symbol": "ESZ6"}));
        router.subscribe(SubscriptionKind::DepthOfMarket, json!({"symbol": "ESZ6"}));
        router.subscribe(SubscriptionKind::UserSync, json!({"users": [1]}));

        for _ in 0..3 {
            next_frame(&mut rx).await;
        }

        router.unsubscribe_all();
        assert_eq!(router.subscription_count(), 0);

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames.sort();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("md/unsubscribeDOM\n"));
        assert!(frames[1].starts_with("md/unsubscribeQuote\n"));
    }

    #[test]
    fn test_market_data_fan_out_in_order() {
        let (router, _rx) = router();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            router.add_observer(
                EventClass::Quote,
                Arc::new(move |event: &RoutedEvent| {
                    calls.lock().push((tag, event.data["contractId"].as_i64().unwrap()));
                }),
            );
        }

        router.transport().handle_text(
            r#"a[{"e":"md","d":{"quotes":[{"contractId":1,"entries":{}},{"contractId":2,"entries":{}}]}}]"#,
        );

        assert_eq!(
            *calls.lock(),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    #[test]
    fn test_props_classified_by_entity_type() {
        let (router, _rx) = router();
        let (orders, seen_orders) = recorder();
        let (props, seen_props) = recorder();
        router.add_observer(EventClass::Order, orders);
        router.add_observer(EventClass::Props, props);

        router.transport().handle_text(
            r#"a[{"e":"props","d":{"entityType":"order","eventType":"Updated","entity":{"id":5,"ordStatus":"Working"}}},
               {"e":"props","d":{"entityType":"orderVersion","eventType":"Created","entity":{"id":6}}}]"#,
        );

        let orders = seen_orders.lock();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].event_type.as_deref(), Some("Updated"));
        assert_eq!(orders[0].data["id"], 5);

        let props = seen_props.lock();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].entity_type.as_deref(), Some("orderVersion"));
    }
}
