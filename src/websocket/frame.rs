//! Inbound message decoding
//!
//! Fragmented messages arrive already reassembled by tungstenite.
//! Binary payloads are decompressed according to the connection's
//! [`BinaryEncoding`] and then handled like text. Text that looks like a
//! JSON document is parsed; anything else (e.g. a bare `pong`) is passed on
//! as a JSON string.

use flate2::read::{DeflateDecoder, GzDecoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;

use crate::error::{MarketDataError, Result};

/// How binary frames are turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryEncoding {
    /// Payload is already UTF-8 text
    #[default]
    Utf8,
    Gzip,
    /// Raw deflate stream without zlib header
    Deflate,
}

/// Decode a binary payload into text
pub fn decode_binary(data: &[u8], encoding: BinaryEncoding) -> Result<String> {
    let mut text = String::new();
    match encoding {
        BinaryEncoding::Utf8 => {
            return String::from_utf8(data.to_vec())
                .map_err(|e| MarketDataError::ParseError(format!("binary frame is not UTF-8: {e}")));
        }
        BinaryEncoding::Gzip => {
            GzDecoder::new(data).read_to_string(&mut text)?;
        }
        BinaryEncoding::Deflate => {
            DeflateDecoder::new(data).read_to_string(&mut text)?;
        }
    }
    Ok(text)
}

/// Turn a text message into a JSON value
pub fn parse_text(text: &str) -> Result<Value> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else {
        Ok(Value::String(text.to_string()))
    }
}
