//! Frame codec for the venue's real-time protocol
//!
//! Every inbound websocket text message starts with a one byte tag:
//! `o` (open), `h` (heartbeat), `a` (JSON array of messages) or `c` (close).
//! Outbound requests are plain text: `"<endpoint>\n<id>\n\n<body>"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Client keep-alive payload
pub const HEARTBEAT_FRAME: &str = "[]";

/// Request id used by the authorization frame
pub const AUTHORIZE_REQUEST_ID: u64 = 1;

/// One message inside an `a` frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// HTTP-like status of a reply
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Push event name
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Request id this message answers
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "statusText", default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl ResponseMessage {
    /// Event name, ignoring empty strings
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref().filter(|e| !e.is_empty())
    }

    /// Nonzero request id
    pub fn request_id(&self) -> Option<u64> {
        self.id.filter(|id| *id != 0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }

    /// Status present and outside 2xx
    pub fn is_failure(&self) -> bool {
        matches!(self.status, Some(s) if !(200..300).contains(&s))
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open,
    Heartbeat,
    Messages(Vec<ResponseMessage>),
    Close(Option<Value>),
}

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,
    #[error("Unknown frame tag: {0:?}")]
    UnknownTag(char),
    #[error("Malformed array frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Frame {
    /// Decode one websocket text message
    pub fn parse(text: &str) -> Result<Frame, FrameError> {
        let mut chars = text.chars();
        let tag = chars.next().ok_or(FrameError::Empty)?;
        let payload = chars.as_str();

        match tag {
            'o' => Ok(Frame::Open),
            'h' => Ok(Frame::Heartbeat),
            'a' => {
                let messages: Vec<ResponseMessage> = serde_json::from_str(payload)?;
                Ok(Frame::Messages(messages))
            }
            'c' => {
                let reason = if payload.trim().is_empty() {
                    None
                } else {
                    serde_json::from_str(payload).ok()
                };
                Ok(Frame::Close(reason))
            }
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

/// Encode an outbound request; an empty body leaves the payload blank
pub fn encode_request(endpoint: &str, id: u64, body: &str) -> String {
    format!("{}\n{}\n\n{}", endpoint, id, body)
}

/// Encode the authorization request for `token`
pub fn encode_authorize(token: &str) -> String {
    encode_request("authorize", AUTHORIZE_REQUEST_ID, token)
}
