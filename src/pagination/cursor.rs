//! Opaque pagination tokens.
//!
//! A token is the URL-safe base64 of a boundary key's text. Tokens are neither
//! versioned nor signed; a forged token only changes the window its sender sees.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

use crate::{AppError, Timestamp};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed pagination cursor")]
pub struct InvalidCursor;

impl From<InvalidCursor> for AppError {
    fn from(_: InvalidCursor) -> Self {
        AppError::InvalidCursor
    }
}

/// What a decoded token points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorKey {
    At(Timestamp),
    Opaque(String),
}

pub fn encode(at: Timestamp) -> String {
    encode_key(&CursorKey::At(at))
}

pub fn encode_key(key: &CursorKey) -> String {
    match key {
        CursorKey::At(at) => URL_SAFE_NO_PAD.encode(at.to_string()),
        CursorKey::Opaque(raw) => URL_SAFE_NO_PAD.encode(raw),
    }
}

pub fn decode(token: &str) -> Result<CursorKey, InvalidCursor> {
    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| InvalidCursor)?;
    let text = String::from_utf8(bytes).map_err(|_| InvalidCursor)?;
    if text.is_empty() {
        return Err(InvalidCursor);
    }

    Ok(match text.parse::<Timestamp>() {
        Ok(at) => CursorKey::At(at),
        Err(_) => CursorKey::Opaque(text),
    })
}

/// Decodes a token that must carry a timestamp boundary.
pub fn decode_timestamp(token: &str) -> Result<Timestamp, InvalidCursor> {
    match decode(token)? {
        CursorKey::At(at) => Ok(at),
        CursorKey::Opaque(_) => Err(InvalidCursor),
    }
}
