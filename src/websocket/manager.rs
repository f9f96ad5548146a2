//! Connection pool
//!
//! Keeps one logical connection per URL, shared by every caller that asks
//! for it. A connection that failed or was closed is replaced by a fresh
//! one on the next request; connections never reconnect on their own.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::client::{Connection, ConnectionOptions, MessageHandler};

/// Owner of the connections opened by one venue handler
pub struct ConnectionPool<T = Value> {
    options: ConnectionOptions,
    handler: Arc<dyn MessageHandler<T>>,
    connections: Mutex<HashMap<String, Connection<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ConnectionPool<T> {
    pub fn new(options: ConnectionOptions, handler: Arc<dyn MessageHandler<T>>) -> Self {
        Self {
            options,
            handler,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Live connection for `url`, created (not yet connected) if needed
    pub fn connection(&self, url: &str) -> Connection<T> {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(url) {
            if !existing.state().is_terminal() {
                return existing.clone();
            }
            debug!(url = %url, state = ?existing.state(), "Replacing dead connection");
        }

        let conn = Connection::new(url, self.options.clone(), self.handler.clone());
        connections.insert(url.to_string(), conn.clone());
        conn
    }

    /// Connection for `url` if one was created, whatever its state
    pub fn get(&self, url: &str) -> Option<Connection<T>> {
        self.connections.lock().get(url).cloned()
    }

    /// Drop `url` from the pool without closing it
    pub fn remove(&self, url: &str) -> Option<Connection<T>> {
        self.connections.lock().remove(url)
    }

    pub fn urls(&self) -> Vec<String> {
        self.connections.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Close every connection and empty the pool
    pub async fn close(&self) {
        let drained: Vec<Connection<T>> = self
            .connections
            .lock()
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        let count = drained.len();
        futures_util::future::join_all(drained.iter().map(|conn| conn.close())).await;
        info!(count, "Connection pool closed");
    }
}
