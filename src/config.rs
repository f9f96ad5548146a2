//! Configuration module for the streaming layer

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::Result;
use crate::websocket::{BinaryEncoding, ConnectionOptions};

/// Environment variable naming an optional configuration file
const CONFIG_FILE_VAR: &str = "MARKET_DATA_CONFIG";
/// Prefix of environment overrides, e.g. `MARKET_DATA_KEEPALIVE_MS`
const ENV_PREFIX: &str = "MARKET_DATA";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint the tap service connects to
    pub ws_endpoint: String,

    /// JSON text sent once connected, e.g. a venue subscribe request
    pub subscribe_message: Option<String>,

    /// Address of the health / metrics HTTP server
    pub health_addr: String,

    /// Keepalive tick and liveness interval in milliseconds
    pub keepalive_ms: u64,

    /// Number of liveness intervals that may pass without a pong
    pub max_ping_pong_misses: f64,

    /// Dial timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// How binary frames are turned into text
    pub binary_encoding: BinaryEncoding,

    /// Default number of levels kept per book side
    pub order_book_depth: Option<usize>,

    /// Snapshot recovery attempts before giving up
    pub snapshot_max_retries: u32,

    /// History kept per stream topic (0 keeps everything)
    pub max_messages_per_topic: usize,

    /// Undelivered messages buffered per consumer
    pub consumer_max_backlog: usize,

    /// Cache capacities
    pub trades_limit: usize,
    pub ohlcv_limit: usize,
    pub orders_limit: usize,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(env::var(CONFIG_FILE_VAR).ok().as_deref())
    }

    /// Load configuration layering `path` (if any) and the environment over defaults
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Options for connections opened with this configuration
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            keepalive: Duration::from_millis(self.keepalive_ms),
            max_ping_pong_misses: self.max_ping_pong_misses,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            binary_encoding: self.binary_encoding,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            subscribe_message: None,
            health_addr: "0.0.0.0:9090".to_string(),
            keepalive_ms: 30_000,
            max_ping_pong_misses: 2.0,
            connect_timeout_ms: 10_000,
            binary_encoding: BinaryEncoding::Utf8,
            order_book_depth: None,
            snapshot_max_retries: 3,
            max_messages_per_topic: 0,
            consumer_max_backlog: 10,
            trades_limit: 1000,
            ohlcv_limit: 1000,
            orders_limit: 1000,
        }
    }
}
