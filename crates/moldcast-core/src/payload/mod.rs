//! Payload recovery: turn raw model text into a parsed value.
//!
//! Decoding is `sanitize` → parse → `repair` → parse. Sanitizing strips
//! fences and surrounding prose; repair closes payloads that were cut off
//! mid-stream.

mod repair;
mod sanitize;

pub use repair::{repair, try_repair};
pub use sanitize::sanitize;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when decoding a model response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Response contained no payload")]
    Empty,

    #[error("Payload could not be repaired: {0}")]
    Unrepairable(String),
}

/// A parsed payload and whether repair was needed to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub value: Value,
    pub repaired: bool,
}

/// Decode raw model text into a value.
pub fn decode_payload(raw: &str) -> Result<DecodedPayload, DecodeError> {
    let cleaned = sanitize(raw);
    if cleaned.is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(DecodedPayload {
            value,
            repaired: false,
        });
    }

    let repaired = try_repair(&cleaned).ok_or_else(|| DecodeError::Unrepairable(preview(&cleaned)))?;
    let value = serde_json::from_str(&repaired)
        .map_err(|e| DecodeError::Unrepairable(e.to_string()))?;

    tracing::debug!(
        raw_len = raw.len(),
        repaired_len = repaired.len(),
        "Payload required repair"
    );

    Ok(DecodedPayload {
        value,
        repaired: true,
    })
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 80;
    match text.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
