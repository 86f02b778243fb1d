//! Order manager: risk-gated submission, venue event processing, bounded retry

use super::gateway::{GatewayError, OrderGateway};
use super::types::{
    FillReport, Order, OrderError, OrderId, OrderRequest, OrderStatus, OrderStatusEvent, Side,
    VenueOrderStatus,
};
use crate::risk::{PositionSource, RiskCheck, RiskManager};
use crate::router::{EventClass, RoutedEvent, SubscriptionRouter};
use crate::telemetry::{increment, record_latency, CounterMetric, LatencyMetric};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc;

/// Venue update queued for the event worker
#[derive(Debug, Clone)]
enum OrderFeed {
    Status(OrderStatusEvent),
    Fill(FillReport),
}

#[derive(Debug, Default)]
struct OrderBook {
    orders: HashMap<OrderId, Order>,
    /// Creation order for listing
    sequence: Vec<OrderId>,
    by_external: HashMap<i64, OrderId>,
    /// Signed sum of fills per symbol
    fills: HashMap<String, i64>,
    /// Updates that arrived before their placement reply, by venue id
    orphans: HashMap<i64, Vec<OrderFeed>>,
    /// Arrival order of `orphans` keys for eviction
    orphan_ids: VecDeque<i64>,
}

/// Venue ids with held updates; the oldest is dropped beyond this
const MAX_ORPHAN_IDS: usize = 256;

impl OrderBook {
    fn working_quantity(&self, symbol: &str, exclude: OrderId) -> i64 {
        self.orders
            .values()
            .filter(|o| o.id != exclude && o.symbol() == symbol)
            .map(Order::signed_open_quantity)
            .sum()
    }

    fn lookup(&self, external_id: i64) -> Option<OrderId> {
        self.by_external.get(&external_id).copied()
    }

    fn hold_orphan(&mut self, external_id: i64, update: OrderFeed) {
        if !self.orphans.contains_key(&external_id) {
            self.orphan_ids.push_back(external_id);
            if self.orphan_ids.len() > MAX_ORPHAN_IDS {
                if let Some(oldest) = self.orphan_ids.pop_front() {
                    self.orphans.remove(&oldest);
                }
            }
        }
        self.orphans.entry(external_id).or_default().push(update);
    }

    fn take_orphans(&mut self, external_id: i64) -> Vec<OrderFeed> {
        let held = self.orphans.remove(&external_id).unwrap_or_default();
        if !held.is_empty() {
            self.orphan_ids.retain(|id| *id != external_id);
        }
        held
    }

    fn apply_fill(&mut self, id: OrderId, cumulative: u32, price: Option<Decimal>) -> u32 {
        let Some(order) = self.orders.get_mut(&id) else {
            return 0;
        };
        let delta = order.apply_fill(cumulative, price);
        if delta > 0 {
            let signed = order.request.side.signed(delta);
            let symbol = order.request.symbol.clone();
            *self.fills.entry(symbol).or_insert(0) += signed;
        }
        delta
    }
}

/// Creates, tracks and drives orders through their lifecycle
pub struct OrderManager {
    gateway: Arc<dyn OrderGateway>,
    risk: Arc<RiskManager>,
    positions: RwLock<Option<Arc<dyn PositionSource>>>,
    max_retries: u32,
    book: Mutex<OrderBook>,
}

impl OrderManager {
    pub fn new(gateway: Arc<dyn OrderGateway>, risk: Arc<RiskManager>, max_retries: u32) -> Self {
        Self {
            gateway,
            risk,
            positions: RwLock::new(None),
            max_retries,
            book: Mutex::new(OrderBook::default()),
        }
    }

    /// Use live positions for risk checks and flattening instead of the fill ledger
    pub fn set_position_source(&self, source: Arc<dyn PositionSource>) {
        *self.positions.write() = Some(source);
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    /// Observe order and fill updates from `router`. Updates are applied by a
    /// single worker task in arrival order; requires a tokio runtime.
    pub fn attach(self: &Arc<Self>, router: &SubscriptionRouter) {
        let (tx, rx) = mpsc::unbounded_channel();

        let status_tx = tx.clone();
        router.add_observer(
            EventClass::Order,
            Arc::new(move |event: &RoutedEvent| {
                match OrderStatusEvent::from_entity(&event.data) {
                    Some(update) => {
                        let _ = status_tx.send(OrderFeed::Status(update));
                    }
                    None => tracing::debug!(data = %event.data, "Ignoring order entity"),
                }
            }),
        );
        router.add_observer(
            EventClass::Fill,
            Arc::new(move |event: &RoutedEvent| {
                if event.event_type.as_deref() == Some("Deleted") {
                    return;
                }
                match FillReport::from_entity(&event.data) {
                    Some(fill) => {
                        let _ = tx.send(OrderFeed::Fill(fill));
                    }
                    None => tracing::debug!(data = %event.data, "Ignoring fill entity"),
                }
            }),
        );

        tokio::spawn(Self::event_worker(Arc::downgrade(self), rx));
    }

    async fn event_worker(manager: Weak<Self>, mut rx: mpsc::UnboundedReceiver<OrderFeed>) {
        while let Some(update) = rx.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            match update {
                OrderFeed::Status(event) => manager.process_event(event).await,
                OrderFeed::Fill(fill) => manager.process_fill(fill),
            }
        }
        tracing::debug!("Order event worker stopped");
    }

    pub async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: u32,
    ) -> Result<OrderId, OrderError> {
        self.submit_order(OrderRequest::market(symbol, side, quantity))
            .await
    }

    pub async fn submit_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: u32,
        price: Decimal,
    ) -> Result<OrderId, OrderError> {
        self.submit_order(OrderRequest::limit(symbol, side, quantity, price))
            .await
    }

    pub async fn submit_stop_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: u32,
        stop_price: Decimal,
    ) -> Result<OrderId, OrderError> {
        self.submit_order(OrderRequest::stop(symbol, side, quantity, stop_price))
            .await
    }

    /// Gate `request` through risk and place it. Risk and venue rejections
    /// are recorded on the returned order, not returned as errors.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<OrderId, OrderError> {
        request.validate()?;

        let current_position = self.position(&request.symbol);
        let order = Order::new(request);
        let id = order.id;

        let working_quantity = {
            let mut book = self.book.lock();
            let working = book.working_quantity(order.symbol(), id);
            book.sequence.push(id);
            book.orders.insert(id, order.clone());
            working
        };

        let check = RiskCheck {
            symbol: &order.request.symbol,
            side: order.request.side,
            quantity: order.request.quantity,
            current_position,
            working_quantity,
        };
        if let Err(e) = self.risk.check(&check) {
            if let Some(order) = self.book.lock().orders.get_mut(&id) {
                order.reject_final(e.to_string());
            }
            increment(CounterMetric::OrdersRejected);
            tracing::warn!(order_id = %id, error = %e, "Order rejected by risk");
            return Ok(id);
        }

        tracing::info!(
            order_id = %id,
            symbol = %order.request.symbol,
            side = ?order.request.side,
            qty = order.request.quantity,
            order_type = ?order.request.order_type,
            "Submitting order"
        );
        self.place(id).await;
        Ok(id)
    }

    /// Send attempts until the venue accepts, rejection retries run out,
    /// or the transport fails.
    async fn place(&self, id: OrderId) {
        loop {
            let request = match self.book.lock().orders.get(&id) {
                Some(order) if order.status == OrderStatus::Pending => order.request.clone(),
                _ => return,
            };

            let started = Instant::now();
            let outcome = self.gateway.place_order(&request).await;
            record_latency(LatencyMetric::OrderPlacement, started.elapsed());

            match outcome {
                Ok(external_id) => {
                    let held = {
                        let mut book = self.book.lock();
                        if let Some(order) = book.orders.get_mut(&id) {
                            order.mark_submitted(external_id);
                        }
                        book.by_external.insert(external_id, id);
                        book.take_orphans(external_id)
                    };
                    increment(CounterMetric::OrdersSubmitted);
                    tracing::info!(order_id = %id, external_id, "Order accepted");

                    if !held.is_empty() {
                        tracing::debug!(order_id = %id, external_id, held = held.len(), "Replaying early updates");
                    }
                    let mut retry = false;
                    for update in held {
                        match update {
                            OrderFeed::Status(event) => retry |= self.apply_event(event).is_some(),
                            OrderFeed::Fill(fill) => self.process_fill(fill),
                        }
                    }
                    if !retry {
                        return;
                    }
                }
                Err(GatewayError::Rejected(reason)) => {
                    if !self.reject(id, reason) {
                        return;
                    }
                }
                Err(e) => {
                    if let Some(order) = self.book.lock().orders.get_mut(&id) {
                        order.mark_failed(e.to_string());
                    }
                    increment(CounterMetric::OrdersFailed);
                    tracing::error!(order_id = %id, error = %e, "Order placement failed");
                    return;
                }
            }
        }
    }

    /// Record a venue rejection; returns true when a retry should be sent
    fn reject(&self, id: OrderId, reason: String) -> bool {
        let (retry, attempt) = {
            let mut book = self.book.lock();
            let Some(order) = book.orders.get_mut(&id) else {
                return false;
            };
            let retry = order.reject(reason.clone(), self.max_retries);
            (retry, order.retry_count)
        };

        if retry {
            increment(CounterMetric::OrderRetries);
            tracing::warn!(order_id = %id, attempt, max = self.max_retries, reason = %reason, "Order rejected, retrying");
        } else {
            increment(CounterMetric::OrdersRejected);
            tracing::error!(order_id = %id, reason = %reason, "Order rejected");
        }
        retry
    }

    /// Apply one venue status update
    pub async fn process_event(&self, event: OrderStatusEvent) {
        if let Some(id) = self.apply_event(event) {
            self.place(id).await;
        }
    }

    /// Apply a status update to the book; returns the order when a rejection
    /// calls for another placement attempt. Updates for venue ids not yet
    /// known are held until their placement reply lands.
    fn apply_event(&self, event: OrderStatusEvent) -> Option<OrderId> {
        let id = {
            let mut book = self.book.lock();
            match book.lookup(event.external_id) {
                Some(id) => id,
                None => {
                    tracing::debug!(external_id = event.external_id, "Holding update for unknown order");
                    book.hold_orphan(event.external_id, OrderFeed::Status(event));
                    return None;
                }
            }
        };

        match event.status {
            VenueOrderStatus::Working => {
                if let Some(order) = self.book.lock().orders.get_mut(&id) {
                    order.mark_working();
                }
            }
            VenueOrderStatus::Filled => {
                let delta = {
                    let mut book = self.book.lock();
                    let Some(order) = book.orders.get(&id) else {
                        return None;
                    };
                    let cumulative = event.filled_quantity.unwrap_or(order.request.quantity);
                    book.apply_fill(id, cumulative, event.fill_price)
                };
                if delta > 0 {
                    increment(CounterMetric::Fills);
                    tracing::info!(order_id = %id, delta, "Order filled");
                }
            }
            VenueOrderStatus::Rejected => {
                let active = self
                    .book
                    .lock()
                    .orders
                    .get(&id)
                    .is_some_and(|o| !o.status.is_terminal());
                if !active {
                    return None;
                }
                let reason = event.reason.unwrap_or_else(|| "rejected by venue".to_string());
                if self.reject(id, reason) {
                    return Some(id);
                }
            }
            VenueOrderStatus::Cancelled => {
                let canceled = self
                    .book
                    .lock()
                    .orders
                    .get_mut(&id)
                    .is_some_and(Order::mark_canceled);
                if canceled {
                    tracing::info!(order_id = %id, "Order canceled");
                }
            }
            VenueOrderStatus::Other(status) => {
                tracing::debug!(order_id = %id, status = %status, "Unmapped venue status");
            }
        }
        None
    }

    /// Apply one incremental execution
    pub fn process_fill(&self, fill: FillReport) {
        let delta = {
            let mut book = self.book.lock();
            let Some(id) = book.lookup(fill.external_id) else {
                tracing::debug!(external_id = fill.external_id, "Holding fill for unknown order");
                book.hold_orphan(fill.external_id, OrderFeed::Fill(fill));
                return;
            };
            let Some(filled) = book.orders.get(&id).map(|o| o.filled_quantity) else {
                return;
            };
            book.apply_fill(id, filled + fill.quantity, Some(fill.price))
        };
        if delta > 0 {
            increment(CounterMetric::Fills);
            tracing::info!(external_id = fill.external_id, qty = delta, price = %fill.price, "Fill applied");
        }
    }

    /// Ask the venue to cancel; the status changes when the venue confirms
    pub async fn cancel_order(&self, id: OrderId) -> Result<(), OrderError> {
        let external_id = {
            let book = self.book.lock();
            let order = book.orders.get(&id).ok_or(OrderError::NotFound(id))?;
            if order.status.is_terminal() {
                return Err(OrderError::NotCancelable {
                    id,
                    status: order.status,
                });
            }
            // Latest attempt is the live one
            order
                .venue_ids()
                .last()
                .ok_or(OrderError::NotSubmitted(id))?
        };

        tracing::info!(order_id = %id, external_id, "Canceling order");
        self.gateway.cancel_order(external_id).await?;
        Ok(())
    }

    /// Send opposing market orders for every open position. Skips the risk
    /// gate so exposure can always be reduced.
    pub async fn flatten_positions(&self) -> Vec<OrderId> {
        let open = self.open_positions();
        tracing::info!(positions = open.len(), "Flattening positions");

        let mut ids = Vec::with_capacity(open.len());
        for (symbol, net) in open {
            let side = if net > 0 { Side::Sell } else { Side::Buy };
            let Ok(quantity) = u32::try_from(net.unsigned_abs()) else {
                tracing::error!(symbol = %symbol, net, "Position too large to flatten");
                continue;
            };

            let order = Order::new(OrderRequest::market(symbol.clone(), side, quantity));
            let id = order.id;
            {
                let mut book = self.book.lock();
                book.sequence.push(id);
                book.orders.insert(id, order);
            }
            tracing::info!(order_id = %id, symbol = %symbol, side = ?side, qty = quantity, "Flatten order");
            self.place(id).await;
            ids.push(id);
        }
        ids
    }

    fn open_positions(&self) -> Vec<(String, i64)> {
        let source = self.positions.read().clone();
        match source {
            Some(source) => source.open_positions(),
            None => {
                let book = self.book.lock();
                let mut open: Vec<(String, i64)> = book
                    .fills
                    .iter()
                    .filter(|(_, net)| **net != 0)
                    .map(|(symbol, net)| (symbol.clone(), *net))
                    .collect();
                open.sort();
                open
            }
        }
    }

    /// Every order in creation order
    pub fn list_orders(&self) -> Vec<Order> {
        let book = self.book.lock();
        book.sequence
            .iter()
            .filter_map(|id| book.orders.get(id).cloned())
            .collect()
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.book.lock().orders.get(&id).cloned()
    }

    pub fn order_by_external(&self, external_id: i64) -> Option<Order> {
        let book = self.book.lock();
        book.lookup(external_id)
            .and_then(|id| book.orders.get(&id).cloned())
    }

    /// Net position: live source when attached, otherwise the fill ledger
    pub fn position(&self, symbol: &str) -> i64 {
        let source = self.positions.read().clone();
        match source {
            Some(source) => source.net_position(symbol),
            None => self.filled_position(symbol),
        }
    }

    /// Signed sum of fills applied to orders on `symbol`
    pub fn filled_position(&self, symbol: &str) -> i64 {
        self.book.lock().fills.get(symbol).copied().unwrap_or(0)
    }
}
