//! Engine wiring
//!
//! Builds the session, both sockets, routers, risk, portfolio and order
//! manager from a `Config`, and tears them down in reverse.

use crate::config::Config;
use crate::orders::{OrderGateway, OrderManager, VenueOrderGateway};
use crate::portfolio::{quote_trade_price, PortfolioTracker};
use crate::risk::{PositionSource, RiskLimits, RiskManager};
use crate::router::{EventClass, RoutedEvent, SubscriptionKind, SubscriptionRouter};
use crate::session::{Account, Session, SessionError, TokenKind};
use crate::strategy::Strategy;
use crate::transport::{Transport, TransportConfig};
use anyhow::Context;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Running engine: authenticated, both sockets authorized, account synced
pub struct Engine {
    session: Arc<Session>,
    account: Account,
    trading: Arc<Transport>,
    market_data: Arc<Transport>,
    trading_router: Arc<SubscriptionRouter>,
    md_router: Arc<SubscriptionRouter>,
    risk: Arc<RiskManager>,
    portfolio: Arc<PortfolioTracker>,
    orders: Arc<OrderManager>,
}

impl Engine {
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let credentials = config.credentials()?;
        let session = Arc::new(Session::new(&config.session, credentials)?);
        session
            .authenticate()
            .await
            .context("Authentication failed")?;
        let account = session.account().await.context("Account lookup failed")?;

        let settings = &config.transport;
        let transport = |name: &str, url: String, kind: TokenKind| {
            Arc::new(Transport::new(
                TransportConfig::new(name, url)
                    .token_kind(kind)
                    .heartbeat_interval(settings.heartbeat_interval())
                    .auth_timeout(settings.auth_timeout()),
                Arc::clone(&session),
            ))
        };
        let trading = transport("trading", config.trading_url(), TokenKind::Access);
        let market_data = transport("md", config.md_url(), TokenKind::MarketData);

        let timeout = settings.request_timeout();
        let trading_router = SubscriptionRouter::new(Arc::clone(&trading), timeout);
        let md_router = SubscriptionRouter::new(Arc::clone(&market_data), timeout);

        let risk = Arc::new(RiskManager::new(RiskLimits::from(&config.risk)));
        let portfolio = Arc::new(PortfolioTracker::new(Some(Arc::clone(&risk))));
        let gateway: Arc<dyn OrderGateway> = Arc::new(VenueOrderGateway::new(
            Arc::clone(&trading),
            account.clone(),
            timeout,
        ));
        let orders = Arc::new(OrderManager::new(
            gateway,
            Arc::clone(&risk),
            config.orders.max_retries,
        ));
        orders.set_position_source(Arc::clone(&portfolio) as Arc<dyn PositionSource>);

        // Observers go in before the sockets so the first sync is not missed
        portfolio.attach(&trading_router, Arc::clone(&md_router));
        orders.attach(&trading_router);

        trading.connect().await.context("Trading socket")?;
        market_data.connect().await.context("Market data socket")?;

        let user_id = session.user_id().ok_or(SessionError::NotAuthenticated)?;
        trading_router.subscribe(SubscriptionKind::UserSync, json!({ "users": [user_id] }));

        session.start_token_refresh_monitor(|| tracing::info!("Access token renewed"));

        tracing::info!(account = %account.name, user_id, "Engine started");
        Ok(Self {
            session,
            account,
            trading,
            market_data,
            trading_router,
            md_router,
            risk,
            portfolio,
            orders,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    pub fn portfolio(&self) -> &Arc<PortfolioTracker> {
        &self.portfolio
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn trading_router(&self) -> &Arc<SubscriptionRouter> {
        &self.trading_router
    }

    pub fn md_router(&self) -> &Arc<SubscriptionRouter> {
        &self.md_router
    }

    /// Wait until the initial account sync has reached the portfolio
    pub async fn wait_for_sync(&self, timeout: Duration) -> anyhow::Result<()> {
        let portfolio = Arc::clone(&self.portfolio);
        tokio::time::timeout(timeout, async move {
            while !portfolio.is_synced() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .with_context(|| format!("No account sync within {:?}", timeout))
    }

    /// Venue contract id for a symbol
    pub async fn find_contract(&self, symbol: &str) -> anyhow::Result<i64> {
        let contract: Value = self
            .session
            .get_json(&format!("/contract/find?name={}", symbol))
            .await?;
        contract
            .get("id")
            .and_then(Value::as_i64)
            .with_context(|| format!("Unknown contract {}", symbol))
    }

    /// Feed trade prices for `symbol` into `strategy` until `shutdown` resolves
    pub async fn run_strategy<S>(
        &self,
        strategy: &mut dyn Strategy,
        symbol: &str,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        S: Future<Output = ()>,
    {
        let contract_id = self.find_contract(symbol).await?;
        strategy.init(Arc::clone(&self.orders));

        let (tx, mut ticks) = mpsc::unbounded_channel::<Decimal>();
        self.md_router.add_observer(
            EventClass::Quote,
            Arc::new(move |event: &RoutedEvent| {
                if let Some((id, price)) = quote_trade_price(&event.data) {
                    if id == contract_id {
                        let _ = tx.send(price);
                    }
                }
            }),
        );
        let params = json!({ "symbol": symbol });
        self.md_router
            .subscribe(SubscriptionKind::Quote, params.clone());
        tracing::info!(strategy = strategy.name(), symbol, contract_id, "Strategy running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                tick = ticks.recv() => {
                    let Some(price) = tick else { break };
                    if let Err(e) = strategy.on_price_tick(symbol, price).await {
                        tracing::error!(strategy = strategy.name(), error = %e, "Strategy tick failed");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        self.md_router.unsubscribe(SubscriptionKind::Quote, params);
        Ok(())
    }

    /// Stop renewal, release subscriptions and close both sockets
    pub fn shutdown(&self) {
        self.session.stop_token_refresh_monitor();
        self.md_router.unsubscribe_all();
        self.trading_router.unsubscribe_all();
        self.market_data.disconnect();
        self.trading.disconnect();
        tracing::info!("Engine stopped");
    }
}
