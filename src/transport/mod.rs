//! Real-time protocol transport
//!
//! Websocket connection speaking the venue's framed protocol: open and
//! authorization handshake, client keep-alive, `a`-frame decoding and
//! request/response correlation.

mod client;
mod frame;
mod types;

pub use client::{MessageHandler, Transport};
pub use frame::{
    encode_authorize, encode_request, Frame, FrameError, ResponseMessage, AUTHORIZE_REQUEST_ID,
    HEARTBEAT_FRAME,
};
pub use types::{TransportConfig, TransportError};

#[cfg(test)]
pub(crate) use client::tests::authorized_transport;
