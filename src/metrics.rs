//! Process-wide counters for the streaming layer
//!
//! Registered once into the default Prometheus registry so the service
//! binary can expose them through `prometheus::gather()`.

use prometheus::{IntCounter, IntCounterVec, Opts};
use std::sync::OnceLock;
use tracing::warn;

/// Counters shared by connections, books and streams
pub struct Metrics {
    /// Inbound frames by kind (`text`, `binary`, `ping`, `pong`, `close`)
    pub frames_received: IntCounterVec,
    /// Frames that could not be decoded and were skipped
    pub frames_malformed: IntCounter,
    pub futures_resolved: IntCounter,
    pub futures_rejected: IntCounter,
    /// Messages dropped from a full consumer backlog
    pub consumer_dropped: IntCounter,
    /// Book updates ignored because their nonce was not newer
    pub stale_updates: IntCounter,
    pub keepalive_timeouts: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::register)
}

impl Metrics {
    fn register() -> Self {
        let metrics = Self {
            frames_received: IntCounterVec::new(
                Opts::new("ws_frames_received_total", "Inbound WebSocket frames"),
                &["kind"],
            )
            .expect("valid frames_received opts"),
            frames_malformed: counter("ws_frames_malformed_total", "Frames skipped as malformed"),
            futures_resolved: counter("ws_futures_resolved_total", "Futures resolved"),
            futures_rejected: counter("ws_futures_rejected_total", "Futures rejected"),
            consumer_dropped: counter(
                "stream_consumer_dropped_total",
                "Messages dropped from full consumer backlogs",
            ),
            stale_updates: counter(
                "orderbook_stale_updates_total",
                "Order book updates ignored for a stale nonce",
            ),
            keepalive_timeouts: counter(
                "ws_keepalive_timeouts_total",
                "Connections failed by the keepalive watchdog",
            ),
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.frames_received.clone()),
            Box::new(metrics.frames_malformed.clone()),
            Box::new(metrics.futures_resolved.clone()),
            Box::new(metrics.futures_rejected.clone()),
            Box::new(metrics.consumer_dropped.clone()),
            Box::new(metrics.stale_updates.clone()),
            Box::new(metrics.keepalive_timeouts.clone()),
        ];
        for collector in collectors {
            if let Err(e) = prometheus::register(collector) {
                warn!(error = %e, "Failed to register metric");
            }
        }

        metrics
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("valid counter opts")
}
