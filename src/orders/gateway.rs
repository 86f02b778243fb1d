//! Order placement seam between the order manager and the venue

use crate::session::{Account, SessionError};
use crate::transport::{ResponseMessage, Transport, TransportError};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::types::OrderRequest;

/// Errors from one placement or cancel attempt
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Venue refused the order; eligible for retry
    #[error("Rejected by venue: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Unexpected venue response: {0}")]
    UnexpectedResponse(String),
}

/// Where orders go
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Place one attempt; returns the venue order id
    async fn place_order(&self, request: &OrderRequest) -> Result<i64, GatewayError>;
    /// Request cancellation of a venue order
    async fn cancel_order(&self, external_id: i64) -> Result<(), GatewayError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderBody<'a> {
    account_spec: &'a str,
    account_id: i64,
    action: &'static str,
    symbol: &'a str,
    order_qty: u32,
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<f64>,
    is_automated: bool,
}

/// Places orders as requests over the trading socket
pub struct VenueOrderGateway {
    transport: Arc<Transport>,
    account: Account,
    timeout: Duration,
}

impl VenueOrderGateway {
    pub fn new(transport: Arc<Transport>, account: Account, timeout: Duration) -> Self {
        Self {
            transport,
            account,
            timeout,
        }
    }

    fn check_reply(reply: &ResponseMessage) -> Result<&Value, GatewayError> {
        if reply.is_failure() {
            let reason = reply
                .status_text
                .clone()
                .unwrap_or_else(|| format!("status {:?}", reply.status));
            return Err(GatewayError::Rejected(reason));
        }
        let data = reply
            .data
            .as_ref()
            .ok_or_else(|| GatewayError::UnexpectedResponse("missing body".into()))?;

        if data.get("orderId").is_some() {
            return Ok(data);
        }
        let failure = data
            .get("failureText")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| data.get("failureReason").and_then(Value::as_str))
            .filter(|s| *s != "Success");
        match failure {
            Some(reason) => Err(GatewayError::Rejected(reason.to_string())),
            None => Ok(data),
        }
    }
}

#[async_trait]
impl OrderGateway for VenueOrderGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<i64, GatewayError> {
        let body = PlaceOrderBody {
            account_spec: &self.account.name,
            account_id: self.account.id,
            action: request.side.as_str(),
            symbol: &request.symbol,
            order_qty: request.quantity,
            order_type: request.order_type.as_str(),
            price: request.price.and_then(|p| p.to_f64()),
            stop_price: request.stop_price.and_then(|p| p.to_f64()),
            is_automated: true,
        };
        let body = serde_json::to_value(&body).map_err(TransportError::from)?;

        let reply = self
            .transport
            .request("order/placeorder", Some(body), self.timeout)
            .await?;
        let data = Self::check_reply(&reply)?;

        data.get("orderId")
            .and_then(Value::as_i64)
            .ok_or_else(|| GatewayError::UnexpectedResponse(data.to_string()))
    }

    async fn cancel_order(&self, external_id: i64) -> Result<(), GatewayError> {
        let reply = self
            .transport
            .request(
                "order/cancelorder",
                Some(serde_json::json!({ "orderId": external_id })),
                self.timeout,
            )
            .await?;
        Self::check_reply(&reply).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::Side;
    use crate::transport::authorized_transport;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn account() -> Account {
        Account {
            id: 901,
            name: "DEMO1234".into(),
            user_id: 7,
            active: true,
        }
    }

    async fn answer(
        transport: &Transport,
        rx: &mut mpsc::UnboundedReceiver<String>,
        reply: &str,
    ) -> Value {
        let frame = rx.recv().await.unwrap();
        let mut lines = frame.splitn(4, '\n');
        let _endpoint = lines.next();
        let id: u64 = lines.next().unwrap().parse().unwrap();
        let _query = lines.next();
        let body: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        transport.handle_text(&format!(r#"a[{{"i":{},{}}}]"#, id, reply));
        body
    }

    #[tokio::test]
    async fn test_place_order_body_and_id() {
        let (transport, mut rx) = authorized_transport();
        let gateway = Arc::new(VenueOrderGateway::new(
            Arc::clone(&transport),
            account(),
            Duration::from_secs(5),
        ));

        let placing = Arc::clone(&gateway);
        let handle = tokio::spawn(async move {
            placing
                .place_order(&OrderRequest::limit("MESZ6", Side::Sell, 2, dec!(5012.5)))
                .await
        });

        let body = answer(&transport, &mut rx, r#""s":200,"d":{"orderId":4401}"#).await;
        assert_eq!(body["accountSpec"], "DEMO1234");
        assert_eq!(body["accountId"], 901);
        assert_eq!(body["action"], "Sell");
        assert_eq!(body["orderType"], "Limit");
        assert_eq!(body["orderQty"], 2);
        assert_eq!(body["price"], 5012.5);
        assert_eq!(body["isAutomated"], true);
        assert!(body.get("stopPrice").is_none());

        assert_eq!(handle.await.unwrap().unwrap(), 4401);
    }

    #[tokio::test]
    async fn test_failure_reason_is_rejection() {
        let (transport, mut rx) = authorized_transport();
        let gateway = Arc::new(VenueOrderGateway::new(
            Arc::clone(&transport),
            account(),
            Duration::from_secs(5),
        ));

        let placing = Arc::clone(&gateway);
        let handle = tokio::spawn(async move {
            placing
                .place_order(&OrderRequest::market("MESZ6", Side::Buy, 1))
                .await
        });
        answer(
            &transport,
            &mut rx,
            r#""s":200,"d":{"failureReason":"RiskCheck","failureText":"Exceeds max position"}"#,
        )
        .await;

        match handle.await.unwrap() {
            Err(GatewayError::Rejected(reason)) => assert_eq!(reason, "Exceeds max position"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_rejection() {
        let (transport, mut rx) = authorized_transport();
        let gateway = Arc::new(VenueOrderGateway::new(
            Arc::clone(&transport),
            account(),
            Duration::from_secs(5),
        ));

        let cancelling = Arc::clone(&gateway);
        let handle = tokio::spawn(async move { cancelling.cancel_order(4401).await });
        let body = answer(
            &transport,
            &mut rx,
            r#""s":404,"statusText":"Order not found""#,
        )
        .await;
        assert_eq!(body["orderId"], 4401);

        assert!(matches!(
            handle.await.unwrap(),
            Err(GatewayError::Rejected(reason)) if reason == "Order not found"
        ));
    }

    #[tokio::test]
    async fn test_disconnected_is_transport_error() {
        let (transport, _rx) = authorized_transport();
        transport.disconnect();
        let gateway = VenueOrderGateway::new(transport, account(), Duration::from_secs(1));

        let result = gateway
            .place_order(&OrderRequest::market("MESZ6", Side::Buy, 1))
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::NotConnected))
        ));
    }
}
