//! # Utility Modules
//!
//! Hex encoding/decoding and rate-limited logging helpers used throughout the crate.

pub mod hex;
pub mod logging;

pub use hex::{
    decode_hex, encode_prefixed, format_hex_compact, parse_hex_lenient, HexError,
};
pub use logging::{log_frame_hex, LogThrottle};
