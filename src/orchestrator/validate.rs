//! Input validation for orchestrator actions

use crate::chain::Credential;
use crate::error::{OperationError, OperationResult};

/// Upper bound for a repeated mutation burst
pub const MAX_REPEAT: u32 = 1_000;

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// A private key: 32 bytes of hex, optional `0x` prefix
pub fn credential(raw: &str) -> OperationResult<Credential> {
    let key = strip_hex_prefix(raw.trim());
    if key.is_empty() {
        return Err(OperationError::Validation(
            "enter a private key".to_string(),
        ));
    }
    if key.len() != 64 {
        return Err(OperationError::Validation(format!(
            "private key must be 64 hex characters, got {}",
            key.len()
        )));
    }
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OperationError::Validation(
            "private key must be hexadecimal".to_string(),
        ));
    }
    Ok(Credential::new(key.to_ascii_lowercase()))
}

pub fn message(text: &str) -> OperationResult<Vec<u8>> {
    if text.trim().is_empty() {
        return Err(OperationError::Validation(
            "message must not be empty".to_string(),
        ));
    }
    Ok(text.as_bytes().to_vec())
}

/// Pre-signed payload, returned without prefix
pub fn raw_payload(raw: &str) -> OperationResult<String> {
    let payload = strip_hex_prefix(raw.trim());
    if payload.is_empty() {
        return Err(OperationError::Validation(
            "raw transaction must not be empty".to_string(),
        ));
    }
    if payload.len() % 2 != 0 || !payload.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OperationError::Validation(
            "raw transaction must be even-length hex".to_string(),
        ));
    }
    Ok(payload.to_string())
}

pub fn repeat_count(times: u32) -> OperationResult<u32> {
    if times == 0 || times > MAX_REPEAT {
        return Err(OperationError::Validation(format!(
            "repeat count must be between 1 and {}",
            MAX_REPEAT
        )));
    }
    Ok(times)
}
