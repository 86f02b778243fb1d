//! Real-time socket connection to the venue
//!
//! A `Transport` owns one websocket. It performs the open/authorize
//! handshake, runs a proactive keep-alive, decodes inbound frames on a single
//! reader task and routes each message to the handler registered for its
//! event name or for the endpoint of the request it answers.

use super::frame::{
    encode_authorize, encode_request, Frame, ResponseMessage, AUTHORIZE_REQUEST_ID,
    HEARTBEAT_FRAME,
};
use super::types::{TransportConfig, TransportError};
use crate::session::Session;
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

/// Callback invoked on the reader task for a routed message
pub type MessageHandler = Arc<dyn Fn(&ResponseMessage) + Send + Sync>;

/// What the reader loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameAction {
    Continue,
    Close,
}

struct PendingRequest {
    endpoint: String,
    reply: Option<oneshot::Sender<ResponseMessage>>,
}

/// One logical connection (trading or market data)
pub struct Transport {
    config: TransportConfig,
    session: Arc<Session>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    authorized: AtomicBool,
    auth_tx: watch::Sender<bool>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    event_handlers: RwLock<HashMap<String, MessageHandler>>,
    endpoint_handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl Transport {
    pub fn new(config: TransportConfig, session: Arc<Session>) -> Self {
        let (auth_tx, _) = watch::channel(false);
        Self {
            config,
            session,
            outbound: Mutex::new(None),
            shutdown: Mutex::new(None),
            authorized: AtomicBool::new(false),
            auth_tx,
            // id 1 belongs to the authorization frame
            next_id: AtomicU64::new(AUTHORIZE_REQUEST_ID + 1),
            pending: Mutex::new(HashMap::new()),
            event_handlers: RwLock::new(HashMap::new()),
            endpoint_handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    /// Requests sent but not yet answered
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Route push events named `event` to `handler` (replaces any previous one)
    pub fn on_event(&self, event: impl Into<String>, handler: MessageHandler) {
        self.event_handlers.write().insert(event.into(), handler);
    }

    /// Route eventless replies to requests sent on `endpoint` to `handler`
    pub fn on_reply(&self, endpoint: impl Into<String>, handler: MessageHandler) {
        self.endpoint_handlers.write().insert(endpoint.into(), handler);
    }

    /// Dial, complete the handshake and wait for authorization
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.is_connected() {
            tracing::debug!(name = %self.config.name, "Already connected");
            return Ok(());
        }

        tracing::info!(name = %self.config.name, url = %self.config.url, "Connecting");

        let (ws_stream, _response) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.authorized.store(false, Ordering::SeqCst);
        self.auth_tx.send_replace(false);
        *self.outbound.lock() = Some(out_tx.clone());
        *self.shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(Self::write_loop(self.config.name.clone(), write, out_rx));
        tokio::spawn(Arc::clone(self).read_loop(read, shutdown_rx.clone()));
        tokio::spawn(Self::heartbeat_loop(
            self.config.heartbeat_interval,
            out_tx,
            shutdown_rx,
        ));

        self.wait_for_authorization().await
    }

    async fn wait_for_authorization(&self) -> Result<(), TransportError> {
        let timeout = self.config.auth_timeout;
        let mut auth_rx = self.auth_tx.subscribe();

        let confirmed = matches!(
            tokio::time::timeout(timeout, auth_rx.wait_for(|authorized| *authorized)).await,
            Ok(Ok(_))
        );
        if confirmed {
            tracing::info!(name = %self.config.name, "Authorized");
            Ok(())
        } else {
            tracing::error!(name = %self.config.name, ?timeout, "Authorization not confirmed");
            self.disconnect();
            Err(TransportError::AuthorizationTimeout(timeout))
        }
    }

    /// Release the socket and clear auth state; idempotent
    pub fn disconnect(&self) {
        let was_connected = self.outbound.lock().take().is_some();
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        self.authorized.store(false, Ordering::SeqCst);
        self.auth_tx.send_replace(false);

        // Waiters observe a closed channel instead of hanging until timeout
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };

        if was_connected {
            tracing::info!(name = %self.config.name, dropped_requests = dropped, "Disconnected");
        }
    }

    /// Frame and write a request; returns its id
    pub fn send(&self, endpoint: &str, body: Option<Value>) -> Result<u64, TransportError> {
        self.enqueue(endpoint, body, None)
    }

    /// Send a request and wait for the correlated reply
    pub async fn request(
        &self,
        endpoint: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<ResponseMessage, TransportError> {
        let (id, reply) = self.send_with_reply(endpoint, body)?;
        self.await_reply(endpoint, id, reply, timeout).await
    }

    /// Queue a request now and hand back the receiver for its reply. The
    /// frame is on the outbound queue before this returns, so later sends
    /// from the same caller go out after it.
    pub fn send_with_reply(
        &self,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<(u64, oneshot::Receiver<ResponseMessage>), TransportError> {
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue(endpoint, body, Some(tx))?;
        Ok((id, rx))
    }

    /// Wait for the reply to a request queued by `send_with_reply`
    pub async fn await_reply(
        &self,
        endpoint: &str,
        id: u64,
        reply: oneshot::Receiver<ResponseMessage>,
        timeout: Duration,
    ) -> Result<ResponseMessage, TransportError> {
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                tracing::warn!(name = %self.config.name, endpoint, id, "Request timed out");
                Err(TransportError::RequestTimeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                })
            }
        }
    }

    fn enqueue(
        &self,
        endpoint: &str,
        body: Option<Value>,
        reply: Option<oneshot::Sender<ResponseMessage>>,
    ) -> Result<u64, TransportError> {
        let outbound = self
            .outbound
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let body = match body {
            Some(value) => serde_json::to_string(&value)?,
            None => String::new(),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.pending.lock().insert(
            id,
            PendingRequest {
                endpoint: endpoint.to_string(),
                reply,
            },
        );

        if outbound.send(encode_request(endpoint, id, &body)).is_err() {
            self.pending.lock().remove(&id);
            return Err(TransportError::NotConnected);
        }

        tracing::trace!(name = %self.config.name, endpoint, id, "Request sent");
        Ok(id)
    }

    /// Decode one inbound text message and act on it
    pub(crate) fn handle_text(&self, text: &str) -> FrameAction {
        match Frame::parse(text) {
            Ok(Frame::Open) => {
                self.send_authorization();
                FrameAction::Continue
            }
            Ok(Frame::Heartbeat) => {
                tracing::trace!(name = %self.config.name, "Server heartbeat");
                FrameAction::Continue
            }
            Ok(Frame::Messages(messages)) => {
                for message in messages {
                    self.route(message);
                }
                FrameAction::Continue
            }
            Ok(Frame::Close(reason)) => {
                tracing::info!(name = %self.config.name, ?reason, "Close frame received");
                FrameAction::Close
            }
            Err(e) => {
                tracing::warn!(
                    name = %self.config.name,
                    error = %e,
                    preview = %text.chars().take(100).collect::<String>(),
                    "Failed to decode frame"
                );
                FrameAction::Continue
            }
        }
    }

    fn send_authorization(&self) {
        let token = match self.session.token_at(self.config.token_kind, Utc::now()) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(name = %self.config.name, error = %e, "No token for authorization");
                return;
            }
        };
        let outbound = self.outbound.lock().clone();
        match outbound {
            Some(tx) => {
                if tx.send(encode_authorize(&token)).is_err() {
                    tracing::error!(name = %self.config.name, "Failed to queue authorization");
                }
            }
            None => tracing::warn!(name = %self.config.name, "Open frame without socket"),
        }
    }

    /// Route a decoded message: auth confirmation, push event, reply, failure
    pub(crate) fn route(&self, message: ResponseMessage) {
        if !self.is_authorized() && message.status == Some(200) {
            self.mark_authorized();
            return;
        }

        if let Some(event) = message.event_name() {
            let handler = self.event_handlers.read().get(event).cloned();
            match handler {
                Some(handler) => handler(&message),
                None => tracing::trace!(name = %self.config.name, event, "Unhandled event"),
            }
            return;
        }

        if let Some(id) = message.request_id() {
            let pending = self.pending.lock().remove(&id);
            if let Some(pending) = pending {
                match pending.reply {
                    Some(reply) => {
                        let _ = reply.send(message);
                    }
                    None => {
                        let handler = self.endpoint_handlers.read().get(&pending.endpoint).cloned();
                        match handler {
                            Some(handler) => handler(&message),
                            None => tracing::trace!(
                                name = %self.config.name,
                                endpoint = %pending.endpoint,
                                "Unhandled reply"
                            ),
                        }
                    }
                }
                return;
            }
        }

        if message.request_id() == Some(AUTHORIZE_REQUEST_ID) && message.is_failure() {
            tracing::error!(name = %self.config.name, status = ?message.status, data = ?message.data, "Authorization refused");
            return;
        }

        if message.is_failure() {
            tracing::warn!(
                name = %self.config.name,
                status = ?message.status,
                id = ?message.id,
                status_text = ?message.status_text,
                "Request failed"
            );
        }
    }

    fn mark_authorized(&self) {
        // Only the first confirmation per connection signals waiters
        if !self.authorized.swap(true, Ordering::SeqCst) {
            self.auth_tx.send_replace(true);
        }
    }

    async fn read_loop<S>(self: Arc<Self>, mut read: S, mut shutdown: watch::Receiver<bool>)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let ended_by: Option<String> = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text) == FrameAction::Close {
                                break Some("close frame".to_string());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break Some(format!("socket closed: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break Some("stream ended".to_string()),
                    }
                }
                _ = shutdown.changed() => break None,
            }
        };

        match ended_by {
            Some(reason) if self.is_connected() => {
                tracing::error!(name = %self.config.name, reason = %reason, "Connection lost");
                self.disconnect();
            }
            Some(reason) => {
                tracing::debug!(name = %self.config.name, reason = %reason, "Reader stopped after disconnect");
            }
            None => tracing::debug!(name = %self.config.name, "Reader shut down"),
        }
    }

    async fn write_loop<W>(name: String, mut write: W, mut out_rx: mpsc::UnboundedReceiver<String>)
    where
        W: Sink<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = write.send(Message::Text(text)).await {
                tracing::warn!(name = %name, error = %e, "Socket write failed");
                break;
            }
        }
        let _ = write.close().await;
    }

    async fn heartbeat_loop(
        period: Duration,
        out_tx: mpsc::UnboundedSender<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if period.is_zero() {
            tracing::warn!("Keep-alive disabled: zero heartbeat interval");
            return;
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if out_tx.send(HEARTBEAT_FRAME.to_string()).is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Attach an in-memory outbound channel in place of a socket
    #[cfg(test)]
    pub(crate) fn attach_outbound(&self, tx: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(tx);
    }
}
