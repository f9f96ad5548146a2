//! Market data tap
//!
//! Connects to one WebSocket endpoint, publishes every decoded frame on a
//! stream topic, logs it, and serves health and Prometheus metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_data_stream::stream::ERRORS_TOPIC;
use market_data_stream::{
    Config, Connection, ConnectionPool, MarketDataError, Message, MessageHandler, Stream,
};

const FRAMES_TOPIC: &str = "frames";
/// Frames waiting for the stream; newer frames are dropped once full
const FRAME_QUEUE: usize = 1024;

/// Forwards decoded frames to the stream in arrival order
struct TapHandler {
    frames: mpsc::Sender<Value>,
}

impl MessageHandler for TapHandler {
    fn on_message(&self, conn: &Connection, message: Value) {
        if message.as_str() == Some("pong") {
            conn.on_pong();
            return;
        }
        match self.frames.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(url = %conn.url(), capacity = FRAME_QUEUE, "Frame queue full, dropping frame")
            }
            Err(TrySendError::Closed(_)) => warn!(url = %conn.url(), "Frame forwarder stopped"),
        }
    }

    fn on_connected(&self, conn: &Connection) {
        info!(url = %conn.url(), "Tap connected");
    }
}

struct AppState {
    connection: Connection,
    stream: Stream<Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting market data tap");

    let config = Config::load()?;
    info!(endpoint = %config.ws_endpoint, "Configuration loaded");

    let stream: Stream<Value> = Stream::from_config(&config);
    stream.subscribe(
        FRAMES_TOPIC,
        |message: Message<Value>| async move {
            debug!(index = message.index, payload = ?message.payload, "Frame");
            Ok(())
        },
        false,
    );
    stream.subscribe(
        ERRORS_TOPIC,
        |message: Message<Value>| async move {
            if let Some(error) = message.error {
                warn!(index = message.index, error = %error, "Consumer error");
            }
            Ok(())
        },
        false,
    );

    let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
    let forward = stream.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            forward.produce(FRAMES_TOPIC, frame).await;
        }
    });

    let pool = ConnectionPool::new(config.connection_options(), Arc::new(TapHandler { frames: tx }));
    let connection = pool.connection(&config.ws_endpoint);
    connection.connect().await?;

    if let Some(text) = &config.subscribe_message {
        let message: Value = serde_json::from_str(text)
            .map_err(|e| MarketDataError::ConfigError(format!("subscribe_message: {e}")))?;
        connection.send(&message).await?;
        info!("Subscribe message sent");
    }

    let state = Arc::new(AppState {
        connection: connection.clone(),
        stream: stream.clone(),
    });
    let addr: SocketAddr = config.health_addr.parse()?;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(addr, state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = connection.closed() => error!(state = ?connection.state(), "Connection ended"),
    }

    pool.close().await;
    stream.close();
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let connected = state.connection.is_connected();
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if connected { "healthy" } else { "disconnected" },
        "component": "market-data-tap",
        "url": state.connection.url(),
        "connection": format!("{:?}", state.connection.state()),
        "pending_futures": state.connection.pending(),
        "frames_produced": state.stream.last_index(FRAMES_TOPIC),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    (status, Json(body))
}

async fn metrics() -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
