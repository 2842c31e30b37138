use crate::app_error::{AppError, AppResult};

const PREFIX: &str = "blake3:";

pub fn blake3_hex_prefixed(bytes: &[u8]) -> String {
    format!("{PREFIX}{}", blake3::hash(bytes).to_hex())
}

pub fn validate_blake3_prefixed(s: &str) -> AppResult<()> {
    let Some(hex) = s.strip_prefix(PREFIX) else {
        return Err(AppError::new(
            "ES_HASH_INVALID_FORMAT",
            "hash",
            "hash must start with blake3:",
            false,
            serde_json::json!({ "value": s }),
        ));
    };
    if hex.len() != 64 || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(AppError::new(
            "ES_HASH_DECODE_FAILED",
            "hash",
            "invalid lowercase hex digest",
            false,
            serde_json::json!({ "value": s }),
        ));
    }
    Ok(())
}
