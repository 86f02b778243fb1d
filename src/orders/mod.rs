//! Order management module
//!
//! Order lifecycle, risk-gated submission and venue placement

mod gateway;
mod manager;
mod types;

pub use gateway::{GatewayError, OrderGateway, VenueOrderGateway};
pub use manager::OrderManager;
pub use types::{
    FillReport, Order, OrderError, OrderId, OrderRequest, OrderStatus, OrderStatusEvent,
    OrderType, Side, VenueOrderStatus,
};

pub(crate) use types::decimal_from;

#[cfg(test)]
pub(crate) use manager::tests::ScriptedGateway;
