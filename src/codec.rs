//! Base64 framing of the string values exchanged with the peripheral.
//!
//! The peripheral firmware expects the standard alphabet with padding and a
//! whole value per frame.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::{Error, Result};

/// Encode a string into the base64 text sent over the wire.
pub fn encode(value: &str) -> String {
    BASE64_STANDARD.encode(value.as_bytes())
}

/// Decode base64 text received from the peripheral.
pub fn decode(payload: &str) -> Result<String> {
    decode_bytes(payload.as_bytes())
}

/// Decode a raw frame, as delivered by a read or a notification.
pub fn decode_bytes(frame: &[u8]) -> Result<String> {
    let bytes = BASE64_STANDARD
        .decode(frame)
        .map_err(|e| Error::Decode(e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))
}
