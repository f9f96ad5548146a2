//! WebSocket connection with request/response correlation
//!
//! One [`Connection`] owns one socket. Callers register interest in a
//! message hash with [`Connection::future`] and the venue handler settles
//! it with [`Connection::resolve`] or [`Connection::reject`] when the
//! matching message arrives on the receive task.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame::{decode_binary, parse_text, BinaryEncoding};
use crate::error::{MarketDataError, Result};
use crate::future::Future;
use crate::metrics::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Lifecycle of a connection. `Closed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }
}

/// Connection tuning
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Keepalive tick; zero disables the watchdog
    pub keepalive: Duration,
    /// Liveness intervals that may pass without a pong
    pub max_ping_pong_misses: f64,
    pub connect_timeout: Duration,
    pub binary_encoding: BinaryEncoding,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(30),
            max_ping_pong_misses: 2.0,
            connect_timeout: Duration::from_secs(10),
            binary_encoding: BinaryEncoding::Utf8,
        }
    }
}

/// Venue-specific callbacks invoked from the receive and keepalive tasks
pub trait MessageHandler<T = Value>: Send + Sync + 'static {
    /// A decoded inbound message
    fn on_message(&self, conn: &Connection<T>, message: Value);

    fn on_connected(&self, conn: &Connection<T>) {
        debug!(url = %conn.url(), "Connected");
    }

    /// A fatal connection error. Pending futures are already rejected.
    fn on_error(&self, conn: &Connection<T>, error: &MarketDataError) {
        error!(url = %conn.url(), error = %error, "Connection failed");
    }

    /// The remote side closed the socket
    fn on_close(&self, conn: &Connection<T>, reason: &MarketDataError) {
        info!(url = %conn.url(), reason = %reason, "Connection closed");
    }

    /// Message sent on every keepalive tick. Defaults to a protocol ping;
    /// venues with application-level pings return their own payload and
    /// call [`Connection::on_pong`] when the reply arrives.
    fn ping(&self, _conn: &Connection<T>) -> Option<Message> {
        Some(Message::Ping(Vec::new()))
    }
}

/// Cloneable handle to one persistent WebSocket connection
pub struct Connection<T = Value> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    url: String,
    options: ConnectionOptions,
    handler: Arc<dyn MessageHandler<T>>,
    state: Mutex<ConnectionState>,
    connected: Future<()>,
    pending: Mutex<Pending<T>>,
    rejections: Mutex<HashMap<String, MarketDataError>>,
    subscriptions: Mutex<HashMap<String, Value>>,
    /// Send critical section
    sink: tokio::sync::Mutex<Option<WsSink>>,
    last_pong: Mutex<Instant>,
    cancel: CancellationToken,
}

/// Futures waiting for a message, and the error that ended the connection
struct Pending<T> {
    futures: HashMap<String, Future<T>>,
    /// Once set, new futures are rejected with it instead of registered
    ended: Option<MarketDataError>,
}

impl<T> Default for Pending<T> {
    fn default() -> Self {
        Self {
            futures: HashMap::new(),
            ended: None,
        }
    }
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &*self.inner.state.lock())
            .field("pending", &self.inner.pending.lock().futures.len())
            .finish()
    }
}

impl<T> Connection<T> {
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

impl<T: Clone + Send + Sync + 'static> Connection<T> {
    /// Create an idle connection; nothing is dialed until [`connect`](Self::connect)
    pub fn new(
        url: impl Into<String>,
        options: ConnectionOptions,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                options,
                handler,
                state: Mutex::new(ConnectionState::Idle),
                connected: Future::new(),
                pending: Mutex::new(Pending::default()),
                rejections: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                sink: tokio::sync::Mutex::new(None),
                last_pong: Mutex::new(Instant::now()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Open the socket, or join the attempt already in flight
    ///
    /// Only the first call dials. Every caller waits on the same
    /// "connected" future, so a failed or closed connection keeps
    /// returning its error.
    pub async fn connect(&self) -> Result<()> {
        let dial = {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        };

        if dial {
            let conn = self.clone();
            tokio::spawn(async move { conn.dial().await });
        }
        self.inner.connected.wait().await
    }

    /// Future resolved once the socket is open
    pub fn connected(&self) -> Future<()> {
        self.inner.connected.clone()
    }

    async fn dial(&self) {
        let url = self.inner.url.as_str();
        info!(url = %url, "Connecting to WebSocket");

        let stream = match timeout(self.inner.options.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, response))) => {
                debug!(url = %url, status = ?response.status(), "Handshake complete");
                stream
            }
            Ok(Err(e)) => {
                self.fail(e.into()).await;
                return;
            }
            Err(_) => {
                self.fail(MarketDataError::RequestTimeout(format!(
                    "connection to {url} timed out after {:?}",
                    self.inner.options.connect_timeout
                )))
                .await;
                return;
            }
        };

        let (sink, stream) = stream.split();
        *self.inner.sink.lock().await = Some(sink);

        let opened = {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        };
        if !opened {
            // closed while the handshake was in flight
            if let Some(mut sink) = self.inner.sink.lock().await.take() {
                let _ = sink.close().await;
            }
            return;
        }

        self.on_pong();
        info!(url = %url, "WebSocket connected");

        tokio::spawn(self.clone().receive(stream));
        tokio::spawn(self.clone().keepalive());

        self.inner.handler.on_connected(self);
        self.inner.connected.resolve(());
    }

    async fn receive(self, mut stream: SplitStream<WsStream>) {
        let cancel = self.inner.cancel.clone();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    if let Some(reason) = self.handle_frame(message) {
                        self.closed_by_remote(reason).await;
                        break;
                    }
                }
                Some(Err(e)) => {
                    self.fail(e.into()).await;
                    break;
                }
                None => {
                    self.closed_by_remote(MarketDataError::ConnectionClosed(
                        "stream ended".to_string(),
                    ))
                    .await;
                    break;
                }
            }
        }
        debug!(url = %self.inner.url, "Receive loop stopped");
    }

    /// Returns the close reason once the remote side closes
    fn handle_frame(&self, message: Message) -> Option<MarketDataError> {
        let frames = &metrics().frames_received;
        match message {
            Message::Text(text) => {
                frames.with_label_values(&["text"]).inc();
                self.dispatch_text(&text);
            }
            Message::Binary(data) => {
                frames.with_label_values(&["binary"]).inc();
                self.dispatch_binary(&data);
            }
            Message::Ping(_) => {
                frames.with_label_values(&["ping"]).inc();
            }
            Message::Pong(_) => {
                frames.with_label_values(&["pong"]).inc();
                self.on_pong();
            }
            // tungstenite reassembles fragments before they reach us
            Message::Frame(_) => {}
            Message::Close(frame) => {
                frames.with_label_values(&["close"]).inc();
                return Some(MarketDataError::ConnectionClosed(close_reason(frame)));
            }
        }
        None
    }

    fn dispatch_binary(&self, data: &[u8]) {
        match decode_binary(data, self.inner.options.binary_encoding) {
            Ok(text) => self.dispatch_text(&text),
            Err(e) => self.malformed(&e),
        }
    }

    fn dispatch_text(&self, text: &str) {
        match parse_text(text) {
            Ok(message) => self.inner.handler.on_message(self, message),
            Err(e) => self.malformed(&e),
        }
    }

    fn malformed(&self, error: &MarketDataError) {
        metrics().frames_malformed.inc();
        warn!(url = %self.inner.url, error = %error, "Skipping malformed frame");
    }

    async fn keepalive(self) {
        let period = self.inner.options.keepalive;
        if period.is_zero() {
            return;
        }
        let allowed = period.mul_f64(self.inner.options.max_ping_pong_misses);
        let cancel = self.inner.cancel.clone();
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let last_pong = *self.inner.last_pong.lock();
            if last_pong + allowed < Instant::now() {
                metrics().keepalive_timeouts.inc();
                self.fail(MarketDataError::RequestTimeout(format!(
                    "connection to {} timed out due to a ping-pong keepalive missing on time",
                    self.inner.url
                )))
                .await;
                break;
            }

            if let Some(ping) = self.inner.handler.ping(&self) {
                if let Err(e) = self.send_message(ping).await {
                    warn!(url = %self.inner.url, error = %e, "Failed to send keepalive ping");
                }
            }
        }
    }

    /// Completes once the connection failed or was closed
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Record a liveness response
    pub fn on_pong(&self) {
        *self.inner.last_pong.lock() = Instant::now();
    }

    pub fn last_pong(&self) -> Instant {
        *self.inner.last_pong.lock()
    }

    /// Move to a terminal state; false if already terminal
    fn finish(&self, terminal: ConnectionState) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = terminal;
        true
    }

    async fn fail(&self, error: MarketDataError) {
        if !self.finish(ConnectionState::Error) {
            return;
        }
        self.inner.cancel.cancel();
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.inner.connected.reject(error.clone());
        self.abandon(error.clone());
        self.inner.handler.on_error(self, &error);
    }

    async fn closed_by_remote(&self, reason: MarketDataError) {
        if !self.finish(ConnectionState::Closed) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.sink.lock().await.take();
        self.inner.handler.on_close(self, &reason);
        self.inner.connected.reject(reason.clone());
        self.abandon(reason);
    }

    /// Send a JSON message; a JSON string is sent as raw text
    pub async fn send(&self, message: &Value) -> Result<()> {
        let text = match message {
            Value::String(text) => text.clone(),
            other => serde_json::to_string(other)?,
        };
        self.send_message(Message::Text(text)).await
    }

    /// Send a raw WebSocket message
    ///
    /// Concurrent sends are serialized so frames never interleave.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or_else(|| MarketDataError::NotConnected(self.inner.url.clone()))?;
        debug!(url = %self.inner.url, "Sending message");
        sink.send(message).await.map_err(|e| {
            MarketDataError::WebSocketMessage(format!("send to {} failed: {e}", self.inner.url))
        })
    }

    /// Close the socket and reject every pending future
    pub async fn close(&self) {
        let closed_now = self.finish(ConnectionState::Closed);
        self.inner.cancel.cancel();

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(url = %self.inner.url, error = %e, "Close handshake failed");
            }
        }

        let error = MarketDataError::ClosedByUser(format!("connection to {} closed", self.inner.url));
        self.inner.connected.reject(error.clone());
        self.abandon(error);

        if closed_now {
            info!(url = %self.inner.url, "Connection closed by caller");
        }
    }

    /// Pending future for `message_hash`, created if absent
    ///
    /// A rejection recorded for the hash before anyone waited on it is
    /// applied immediately. On a closed or failed connection the future
    /// comes back already rejected with the error that ended it.
    pub fn future(&self, message_hash: &str) -> Future<T> {
        let future = {
            let mut pending = self.inner.pending.lock();
            if let Some(error) = &pending.ended {
                let future = Future::new();
                future.reject(error.clone());
                return future;
            }
            pending
                .futures
                .entry(message_hash.to_string())
                .or_default()
                .clone()
        };

        let early = self.inner.rejections.lock().remove(message_hash);
        if let Some(error) = early {
            self.reject(Some(message_hash), error);
        }
        future
    }

    /// Resolve and remove the future for `message_hash`
    ///
    /// Returns false if nobody was waiting.
    pub fn resolve(&self, message_hash: &str, value: T) -> bool {
        let future = self.inner.pending.lock().futures.remove(message_hash);
        match future {
            Some(future) => {
                future.resolve(value);
                metrics().futures_resolved.inc();
                true
            }
            None => false,
        }
    }

    /// Reject the future for `message_hash`, or every pending future when
    /// `message_hash` is `None`
    ///
    /// A rejection for a hash nobody waits on yet is kept for the next
    /// [`future`](Self::future) call.
    pub fn reject(&self, message_hash: Option<&str>, error: MarketDataError) {
        match message_hash {
            Some(hash) => {
                let future = self.inner.pending.lock().futures.remove(hash);
                match future {
                    Some(future) => {
                        future.reject(error);
                        metrics().futures_rejected.inc();
                    }
                    None => {
                        self.inner.rejections.lock().insert(hash.to_string(), error);
                    }
                }
            }
            None => {
                let drained = std::mem::take(&mut self.inner.pending.lock().futures);
                self.reject_drained(drained, &error);
            }
        }
    }

    /// Reject every pending future and every future registered from now on
    fn abandon(&self, error: MarketDataError) {
        let drained = {
            let mut pending = self.inner.pending.lock();
            pending.ended.get_or_insert_with(|| error.clone());
            std::mem::take(&mut pending.futures)
        };
        self.reject_drained(drained, &error);
    }

    fn reject_drained(&self, drained: HashMap<String, Future<T>>, error: &MarketDataError) {
        if !drained.is_empty() {
            debug!(url = %self.inner.url, count = drained.len(), error = %error, "Rejecting pending futures");
        }
        for (_, future) in drained {
            future.reject(error.clone());
            metrics().futures_rejected.inc();
        }
    }

    /// Drop the future for `message_hash`, rejecting its waiters
    fn discard(&self, message_hash: &str, error: &MarketDataError) {
        let future = self.inner.pending.lock().futures.remove(message_hash);
        if let Some(future) = future {
            future.reject(error.clone());
            metrics().futures_rejected.inc();
        }
    }

    /// Number of futures waiting for a message
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().futures.len()
    }

    pub fn has_future(&self, message_hash: &str) -> bool {
        self.inner.pending.lock().futures.contains_key(message_hash)
    }

    pub fn is_subscribed(&self, subscribe_hash: &str) -> bool {
        self.inner.subscriptions.lock().contains_key(subscribe_hash)
    }

    pub fn subscription(&self, subscribe_hash: &str) -> Option<Value> {
        self.inner.subscriptions.lock().get(subscribe_hash).cloned()
    }

    /// Forget a subscription so the next [`watch`](Self::watch) sends it again
    pub fn remove_subscription(&self, subscribe_hash: &str) -> Option<Value> {
        self.inner.subscriptions.lock().remove(subscribe_hash)
    }

    /// Wait for the next message on `message_hash`, subscribing first
    ///
    /// Connects if needed. `message` is sent only the first time
    /// `subscribe_hash` (default: `message_hash`) is seen on this
    /// connection.
    pub async fn watch(
        &self,
        message_hash: &str,
        message: Option<Value>,
        subscribe_hash: Option<&str>,
        subscription: Option<Value>,
    ) -> Result<T> {
        let future = self.future(message_hash);
        if let Err(e) = self.connect().await {
            self.discard(message_hash, &e);
            return Err(e);
        }

        let subscribe_hash = subscribe_hash.unwrap_or(message_hash);
        let first = {
            let mut subscriptions = self.inner.subscriptions.lock();
            if subscriptions.contains_key(subscribe_hash) {
                false
            } else {
                subscriptions.insert(
                    subscribe_hash.to_string(),
                    subscription.unwrap_or(Value::Bool(true)),
                );
                true
            }
        };

        if first {
            if let Some(message) = message {
                if let Err(e) = self.send(&message).await {
                    self.inner.subscriptions.lock().remove(subscribe_hash);
                    self.discard(message_hash, &e);
                    return Err(e);
                }
            }
        }

        future.await
    }
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) => format!("code {}: {}", u16::from(frame.code), frame.reason),
        None => "no close frame".to_string(),
    }
}
