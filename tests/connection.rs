//! Connection behaviour against a local WebSocket server

use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future as StdFuture;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use market_data_stream::websocket::{BinaryEncoding, ConnectionState};
use market_data_stream::{
    Connection, ConnectionOptions, ConnectionPool, MarketDataError, MessageHandler,
};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

/// Resolves the future named by a message's `id` field and records everything
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<Value>>,
    closed: AtomicUsize,
    errors: AtomicUsize,
    silent: bool,
}

impl MessageHandler for Recorder {
    fn on_message(&self, conn: &Connection, message: Value) {
        self.messages.lock().push(message.clone());
        if let Some(id) = message.get("id").and_then(Value::as_str) {
            conn.resolve(id, message.clone());
        }
    }

    fn on_close(&self, _conn: &Connection, _reason: &MarketDataError) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _conn: &Connection, _error: &MarketDataError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn ping(&self, _conn: &Connection) -> Option<Message> {
        if self.silent {
            None
        } else {
            Some(Message::Ping(Vec::new()))
        }
    }
}

/// Accept connections on a random port, running `serve` for each
async fn spawn_server<F, Fut>(serve: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                tokio::spawn(serve(ws));
            }
        }
    });

    (format!("ws://{addr}"), accepted)
}

/// Keep the socket open until the client goes away
async fn idle(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn echo(mut ws: ServerSocket) {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            if ws.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

fn connection(url: &str, handler: Arc<Recorder>, options: ConnectionOptions) -> Connection {
    Connection::new(url, options, handler)
}

#[tokio::test]
async fn test_request_response_correlation() {
    let (url, _) = spawn_server(echo).await;
    let conn = connection(&url, Arc::new(Recorder::default()), ConnectionOptions::default());

    let pending = conn.future("req-1");
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);

    conn.send(&json!({"id": "req-1", "op": "subscribe"}))
        .await
        .unwrap();
    let reply = timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(reply["op"], "subscribe");

    conn.close().await;
}

#[tokio::test]
async fn test_concurrent_connect_dials_once() {
    let (url, accepted) = spawn_server(idle).await;
    let conn = connection(&url, Arc::new(Recorder::default()), ConnectionOptions::default());

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.connect().await })
        })
        .collect();
    for attempt in attempts {
        timeout(WAIT, attempt).await.unwrap().unwrap().unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    conn.close().await;
}

#[tokio::test]
async fn test_gzip_binary_frames_are_decoded() {
    let (url, _) = spawn_server(|mut ws: ServerSocket| async move {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"id":"depth","bids":[["10","1"]]}"#)
            .unwrap();
        let _ = ws.send(Message::Binary(encoder.finish().unwrap())).await;
        idle(ws).await;
    })
    .await;

    let options = ConnectionOptions {
        binary_encoding: BinaryEncoding::Gzip,
        ..ConnectionOptions::default()
    };
    let conn = connection(&url, Arc::new(Recorder::default()), options);
    let pending = conn.future("depth");
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();

    let message = timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(message["bids"][0][0], "10");
    conn.close().await;
}

#[tokio::test]
async fn test_fragmented_text_is_delivered_whole() {
    let (url, _) = spawn_server(|mut ws: ServerSocket| async move {
        let parts: [(&[u8], OpCode, bool); 3] = [
            (br#"{"id":"depth","#, OpCode::Data(Data::Text), false),
            (br#""bids":[["10","#, OpCode::Data(Data::Continue), false),
            (br#""1"]]}"#, OpCode::Data(Data::Continue), true),
        ];
        for (payload, opcode, is_final) in parts {
            let frame = Frame::message(payload.to_vec(), opcode, is_final);
            if ws.send(Message::Frame(frame)).await.is_err() {
                return;
            }
        }
        idle(ws).await;
    })
    .await;

    let handler = Arc::new(Recorder::default());
    let conn = connection(&url, handler.clone(), ConnectionOptions::default());
    let pending = conn.future("depth");
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();

    let message = timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(message["bids"][0][1], "1");
    assert_eq!(handler.messages.lock().len(), 1);
    conn.close().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_close_connection() {
    let (url, _) = spawn_server(|mut ws: ServerSocket| async move {
        let _ = ws.send(Message::Text("{not json".to_string())).await;
        let _ = ws.send(Message::Text("pong".to_string())).await;
        let _ = ws.send(Message::Text(r#"{"id":"after"}"#.to_string())).await;
        idle(ws).await;
    })
    .await;

    let handler = Arc::new(Recorder::default());
    let conn = connection(&url, handler.clone(), ConnectionOptions::default());
    let pending = conn.future("after");
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();

    timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);
    // the bare text arrives as a JSON string, the broken frame not at all
    let messages = handler.messages.lock().clone();
    assert_eq!(messages, vec![json!("pong"), json!({"id": "after"})]);
    conn.close().await;
}

#[tokio::test]
async fn test_remote_close_rejects_pending_futures() {
    let (url, _) = spawn_server(|mut ws: ServerSocket| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = ws.close(None).await;
        idle(ws).await;
    })
    .await;

    let handler = Arc::new(Recorder::default());
    let conn = connection(&url, handler.clone(), ConnectionOptions::default());
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();
    let pending = conn.future("never");

    let err = timeout(WAIT, pending).await.unwrap().unwrap_err();
    assert!(matches!(err, MarketDataError::ConnectionClosed(_)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keepalive_timeout_is_fatal() {
    let (url, _) = spawn_server(idle).await;
    let handler = Arc::new(Recorder {
        silent: true,
        ..Recorder::default()
    });
    let options = ConnectionOptions {
        keepalive: Duration::from_millis(50),
        max_ping_pong_misses: 1.0,
        ..ConnectionOptions::default()
    };
    let conn = connection(&url, handler.clone(), options);
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();
    let pending = conn.future("ticker");

    let err = timeout(WAIT, pending).await.unwrap().unwrap_err();
    assert!(matches!(err, MarketDataError::RequestTimeout(_)));
    assert_eq!(conn.state(), ConnectionState::Error);
    assert_eq!(handler.errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_protocol_pongs_keep_connection_alive() {
    let (url, _) = spawn_server(idle).await;
    let options = ConnectionOptions {
        keepalive: Duration::from_millis(50),
        max_ping_pong_misses: 3.0,
        ..ConnectionOptions::default()
    };
    let conn = connection(&url, Arc::new(Recorder::default()), options);
    timeout(WAIT, conn.connect()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(conn.state(), ConnectionState::Open);
    conn.close().await;
}

#[tokio::test]
async fn test_watch_sends_subscription_once() {
    let subscribes = Arc::new(AtomicUsize::new(0));
    let seen = subscribes.clone();
    let (url, _) = spawn_server(move |mut ws: ServerSocket| {
        let seen = seen.clone();
        async move {
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(_) = message {
                    seen.fetch_add(1, Ordering::SeqCst);
                    for n in 1..=2 {
                        let update = json!({"id": "trades:BTC/USDT", "n": n}).to_string();
                        if ws.send(Message::Text(update)).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    })
    .await;

    let conn = connection(&url, Arc::new(Recorder::default()), ConnectionOptions::default());
    let subscribe = json!({"op": "subscribe", "args": ["trades:BTC/USDT"]});

    let first = timeout(
        WAIT,
        conn.watch("trades:BTC/USDT", Some(subscribe.clone()), None, None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(first["n"], 1);

    let second = timeout(
        WAIT,
        conn.watch("trades:BTC/USDT", Some(subscribe), None, None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(second["n"], 2);

    assert_eq!(subscribes.load(Ordering::SeqCst), 1);
    assert!(conn.is_subscribed("trades:BTC/USDT"));
    conn.close().await;
}

#[tokio::test]
async fn test_pool_replaces_failed_connection() {
    let (url, accepted) = spawn_server(idle).await;
    let pool: ConnectionPool = ConnectionPool::new(
        ConnectionOptions::default(),
        Arc::new(Recorder::default()),
    );

    let first = pool.connection(&url);
    timeout(WAIT, first.connect()).await.unwrap().unwrap();
    first.close().await;

    let second = pool.connection(&url);
    assert_eq!(second.state(), ConnectionState::Idle);
    timeout(WAIT, second.connect()).await.unwrap().unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    pool.close().await;
    assert!(pool.is_empty());
}
