//! tradovate-engine: automated futures execution for the Tradovate real-time API
//!
//! This library provides the core components for:
//! - Token/session management with proactive renewal
//! - Framed websocket transport with authorization and keep-alive
//! - Reference-counted subscription routing to ordered observers
//! - Pre-trade risk checks with a daily loss limit
//! - Position and P&L tracking from account sync and quotes
//! - Order lifecycle management with bounded retries
//! - A pluggable strategy contract with an SMA crossover
//! - Structured logging and Prometheus metrics

pub mod cli;
pub mod config;
pub mod engine;
pub mod orders;
pub mod portfolio;
pub mod risk;
pub mod router;
pub mod session;
pub mod strategy;
pub mod telemetry;
pub mod transport;
