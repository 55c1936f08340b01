//! Compressed payload codec
//!
//! Some envelopes carry their payload as a base64 string wrapping a
//! gzip-compressed UTF-8 JSON document. Decoding never panics: every failure
//! is reported as a [`DecodeError`], whose public reason is always
//! `"decompress-failed"`. The variant only records which stage broke.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

/// Reason string surfaced to subscribers for any decode failure
pub const DECODE_FAILURE_REASON: &str = "decompress-failed";

/// Stage at which decoding a compressed payload failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("decompress-failed: malformed base64")]
    Base64,

    #[error("decompress-failed: corrupt gzip stream")]
    Gzip,

    #[error("decompress-failed: invalid UTF-8")]
    Utf8,

    #[error("decompress-failed: invalid JSON")]
    Json,
}

impl DecodeError {
    /// The reason reported to subscribers, identical for every stage
    pub fn reason(&self) -> &'static str {
        DECODE_FAILURE_REASON
    }
}

/// Decode a base64+gzip JSON payload
pub fn decode(compressed: &str) -> Result<Value, DecodeError> {
    let bytes = STANDARD
        .decode(compressed.trim())
        .map_err(|_| DecodeError::Base64)?;

    let mut inflated = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|_| DecodeError::Gzip)?;

    let text = String::from_utf8(inflated).map_err(|_| DecodeError::Utf8)?;
    serde_json::from_str(&text).map_err(|_| DecodeError::Json)
}

/// Encode a JSON value as a base64+gzip payload
pub fn encode(value: &Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail
    let _ = encoder.write_all(value.to_string().as_bytes());
    let compressed = encoder.finish().unwrap_or_default();
    STANDARD.encode(compressed)
}
