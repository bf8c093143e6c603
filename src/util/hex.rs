//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers shared by the frame tooling (CLI `decode`, debug dumps) and the ledger
//! payloads, which carry `0x`-prefixed hex strings.
//!
//! ```rust
//! use biogas_iot::util::hex::{decode_hex, encode_prefixed, format_hex_compact};
//!
//! let data = [0x02, 0x04, 0x00, 0x0a];
//! assert_eq!(encode_prefixed(&data), "0x0204000a");
//! assert_eq!(decode_hex("0x0204000a").unwrap(), data);
//! assert_eq!(format_hex_compact(&data), "02 04 00 0a");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to a `0x`-prefixed lowercase hex string
pub fn encode_prefixed(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Decode hex string to bytes
///
/// Accepts an optional `0x` prefix and embedded whitespace.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let trimmed = hex_str.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "01 04 14 08" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex string that may contain spaces or other separators
///
/// More lenient than decode_hex, strips all non-hex characters.
pub fn parse_hex_lenient(input: &str) -> Result<Vec<u8>, HexError> {
    let body = input.trim();
    let body = body.strip_prefix("0x").unwrap_or(body);
    let hex_chars: String = body.chars().filter(|c| c.is_ascii_hexdigit()).collect();

    if hex_chars.is_empty() {
        return Err(HexError::EmptyString);
    }
    if hex_chars.len() % 2 != 0 {
        return Err(HexError::OddLength(hex_chars.len()));
    }

    hex::decode(&hex_chars).map_err(|e| HexError::DecodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_prefix_and_whitespace() {
        assert_eq!(decode_hex("0x01 04 14").unwrap(), vec![0x01, 0x04, 0x14]);
        assert_eq!(decode_hex("0X0a").unwrap(), vec![0x0a]);
    }

    #[test]
    fn test_encode_prefixed() {
        assert_eq!(encode_prefixed(&[0xde, 0xad, 0x01]), "0xdead01");
        assert_eq!(decode_hex(&encode_prefixed(&[0x7f])).unwrap(), vec![0x7f]);
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x02, 0x04, 0x70, 0x3e]), "02 04 70 3e");
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(
            parse_hex_lenient("02-04:00 0a").unwrap(),
            vec![0x02, 0x04, 0x00, 0x0a]
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("0x"), Err(HexError::EmptyString));
        assert_eq!(decode_hex("1"), Err(HexError::OddLength(1)));
        assert!(matches!(decode_hex("GG"), Err(HexError::DecodeError(_))));
    }
}
