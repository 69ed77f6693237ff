//! Helpers for rendering byte strings as the integer encodings proving services expect.
use ruint::aliases::U256;

use crate::error::ZkLoginError;

/// Renders up to 32 big-endian bytes as a decimal integer string.
///
/// Proving services take salts and randomness as decimal field-element strings on the wire.
///
/// # Panics
/// Panics if `bytes` is longer than 32 bytes. Callers only pass fixed-size arrays.
#[must_use]
pub fn to_decimal_string(bytes: &[u8]) -> String {
    U256::from_be_slice(bytes).to_string()
}

/// Parses a decimal proof coordinate, checking it fits in 256 bits.
///
/// # Errors
/// Will return `ZkLoginError::MalformedProofResult` if the input is not a decimal number up to 256 bits.
pub fn parse_coordinate(value: &str) -> Result<U256, ZkLoginError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ZkLoginError::MalformedProofResult(
            "empty proof coordinate".to_string(),
        ));
    }
    U256::from_str_radix(value, 10).map_err(|_| {
        ZkLoginError::MalformedProofResult(format!(
            "proof coordinate is not a decimal field element: {}",
            value.chars().take(20).collect::<String>()
        ))
    })
}
