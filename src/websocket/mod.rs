//! WebSocket connections, frame decoding and the per-URL pool

mod client;
mod frame;
mod manager;

pub use client::{Connection, ConnectionOptions, ConnectionState, MessageHandler};
pub use frame::{decode_binary, parse_text, BinaryEncoding};
pub use manager::ConnectionPool;
pub use tokio_tungstenite::tungstenite::Message;
