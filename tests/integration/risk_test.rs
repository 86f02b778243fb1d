//! Risk gate integration tests: risk manager and order manager together

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tradovate_engine::orders::{
    GatewayError, OrderGateway, OrderManager, OrderRequest, OrderStatus, OrderStatusEvent, Side,
    VenueOrderStatus,
};
use tradovate_engine::risk::{
    PositionSource, RiskCheck, RiskError, RiskLimits, RiskManager, DAILY_RESET_HOURS,
};

/// Accepts every order and numbers them from 1000
#[derive(Default)]
struct AcceptingGateway {
    next_id: AtomicI64,
    placed: Mutex<Vec<OrderRequest>>,
}

#[async_trait]
impl OrderGateway for AcceptingGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<i64, GatewayError> {
        self.placed.lock().push(request.clone());
        Ok(1000 + self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn cancel_order(&self, _external_id: i64) -> Result<(), GatewayError> {
        Ok(())
    }
}

struct FixedPositions(Vec<(String, i64)>);

impl PositionSource for FixedPositions {
    fn net_position(&self, symbol: &str) -> i64 {
        self.0
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    fn open_positions(&self) -> Vec<(String, i64)> {
        self.0.clone()
    }
}

fn limits(max_contracts: u32) -> RiskLimits {
    RiskLimits {
        enabled: true,
        max_contracts,
        daily_loss_limit: dec!(500),
    }
}

fn setup(max_contracts: u32) -> (Arc<OrderManager>, Arc<AcceptingGateway>, Arc<RiskManager>) {
    let gateway = Arc::new(AcceptingGateway::default());
    let risk = Arc::new(RiskManager::new(limits(max_contracts)));
    let orders = Arc::new(OrderManager::new(
        Arc::clone(&gateway) as Arc<dyn OrderGateway>,
        Arc::clone(&risk),
        3,
    ));
    (orders, gateway, risk)
}

#[tokio::test]
async fn test_cap_blocks_before_venue() {
    let (orders, gateway, _risk) = setup(5);
    orders.set_position_source(Arc::new(FixedPositions(vec![("MESZ6".to_string(), 4)])));

    let id = orders
        .submit_market_order("MESZ6", Side::Buy, 2)
        .await
        .unwrap();

    let order = orders.order(id).unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(order.reject_reason.unwrap().contains("Max contracts"));
    assert!(gateway.placed.lock().is_empty());
}

#[tokio::test]
async fn test_working_orders_count_toward_cap() {
    let (orders, gateway, _risk) = setup(3);

    let first = orders
        .submit_market_order("MESZ6", Side::Buy, 2)
        .await
        .unwrap();
    assert_eq!(orders.order(first).unwrap().status, OrderStatus::Submitted);

    // 2 working + 2 new = 4 > 3
    let second = orders
        .submit_market_order("MESZ6", Side::Buy, 2)
        .await
        .unwrap();
    assert_eq!(orders.order(second).unwrap().status, OrderStatus::Rejected);

    // Reducing exposure stays inside the cap
    let third = orders
        .submit_market_order("MESZ6", Side::Sell, 1)
        .await
        .unwrap();
    assert_eq!(orders.order(third).unwrap().status, OrderStatus::Submitted);
    assert_eq!(gateway.placed.lock().len(), 2);
}

#[tokio::test]
async fn test_daily_loss_halts_new_orders() {
    let (orders, gateway, risk) = setup(5);
    risk.record_pnl(dec!(-300));
    risk.record_pnl(dec!(-200));
    assert_eq!(risk.daily_pnl(), dec!(-500));

    let id = orders
        .submit_market_order("MNQZ6", Side::Sell, 1)
        .await
        .unwrap();
    let order = orders.order(id).unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(order.reject_reason.unwrap().contains("Daily loss"));
    assert!(gateway.placed.lock().is_empty());
}

#[tokio::test]
async fn test_flatten_ignores_loss_limit() {
    let (orders, gateway, risk) = setup(5);
    orders.set_position_source(Arc::new(FixedPositions(vec![
        ("MESZ6".to_string(), 2),
        ("MNQZ6".to_string(), -1),
    ])));
    risk.set_daily_pnl(dec!(-900));

    let ids = orders.flatten_positions().await;
    assert_eq!(ids.len(), 2);

    let placed = gateway.placed.lock().clone();
    assert_eq!(placed[0].symbol, "MESZ6");
    assert_eq!(placed[0].side, Side::Sell);
    assert_eq!(placed[0].quantity, 2);
    assert_eq!(placed[1].symbol, "MNQZ6");
    assert_eq!(placed[1].side, Side::Buy);
}

#[tokio::test]
async fn test_fills_feed_ledger_position() {
    let (orders, _gateway, _risk) = setup(5);
    let id = orders
        .submit_market_order("MESZ6", Side::Buy, 3)
        .await
        .unwrap();
    let external_id = orders.order(id).unwrap().external_id.unwrap();

    orders
        .process_event(OrderStatusEvent {
            external_id,
            status: VenueOrderStatus::Filled,
            filled_quantity: Some(3),
            fill_price: Some(dec!(5000.25)),
            reason: None,
        })
        .await;

    assert_eq!(orders.order(id).unwrap().status, OrderStatus::Filled);
    assert_eq!(orders.position("MESZ6"), 3);

    // Filled 3 + new 3 = 6 > 5
    let blocked = orders
        .submit_market_order("MESZ6", Side::Buy, 3)
        .await
        .unwrap();
    assert_eq!(orders.order(blocked).unwrap().status, OrderStatus::Rejected);
}

#[test]
fn test_window_rolls_after_reset_period() {
    let start = Utc::now();
    let risk = RiskManager::new_at(limits(5), start);
    risk.set_daily_pnl(dec!(-600));

    let check = RiskCheck {
        symbol: "MESZ6",
        side: Side::Buy,
        quantity: 1,
        current_position: 0,
        working_quantity: 0,
    };
    assert!(matches!(
        risk.check_at(&check, start + Duration::hours(1)),
        Err(RiskError::DailyLossLimitReached { .. })
    ));

    let later = start + Duration::hours(DAILY_RESET_HOURS);
    assert_eq!(risk.check_at(&check, later), Ok(()));
    assert_eq!(risk.daily_pnl(), dec!(0));
    assert_eq!(risk.last_reset(), later);
}
