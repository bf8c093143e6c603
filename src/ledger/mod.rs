//! # Ledger Collaborators
//!
//! The accounting engine talks to the carbon-credit ledger through two capabilities:
//! [`NonceProvider`] (the on-chain mint nonce of this appliance) and [`Minter`] (submit a
//! signed mint request). [`MinterClient`] is the HTTP implementation of `Minter`; it
//! delegates the typed-data signature to a [`MintSigner`] holding the wallet key.
//! [`DryRunLedger`] implements both capabilities in memory.

pub mod client;
pub mod dry_run;

pub use client::MinterClient;
pub use dry_run::{DryRunLedger, MintRecord};

use crate::error::IotError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Length of a recoverable secp256k1 signature (`r || s || v`).
pub const RSV_SIGNATURE_LEN: usize = 65;

#[async_trait]
pub trait NonceProvider: Send + Sync {
    /// Current mint nonce of the owning wallet.
    async fn nonce(&self) -> Result<u64, IotError>;
}

#[async_trait]
pub trait Minter: Send + Sync {
    /// Requests issuance for `amount` Wh under `nonce`.
    async fn post_mint_sign(&self, nonce: u64, amount: u64) -> Result<(), IotError>;
}

/// Wallet capability that signs mint requests as typed data.
#[async_trait]
pub trait MintSigner: Send + Sync {
    /// Wallet address, `0x`-prefixed.
    fn address(&self) -> String;

    async fn sign_mint(&self, request: &MintRequest) -> Result<[u8; RSV_SIGNATURE_LEN], IotError>;
}

/// The signed part of a mint submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub iot: String,
    /// Even-length `0x` hex.
    pub amount: String,
    pub nonce: u64,
}

impl MintRequest {
    pub fn new(iot: impl Into<String>, amount: u64, nonce: u64) -> Self {
        MintRequest {
            iot: iot.into(),
            amount: amount_hex(amount),
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvSignature {
    pub r: String,
    pub s: String,
    pub v: String,
}

/// Body of `POST /iots/{address}/mint-sign`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintPayload {
    #[serde(flatten)]
    pub request: MintRequest,
    #[serde(flatten)]
    pub signature: RsvSignature,
}

/// `0x` hex of `amount`, left-padded to an even number of digits.
pub fn amount_hex(amount: u64) -> String {
    let digits = format!("{amount:x}");
    if digits.len() % 2 == 0 {
        format!("0x{digits}")
    } else {
        format!("0x0{digits}")
    }
}

/// Splits a 65-byte signature into `r` (bytes 0..32), `s` (32..64) and `v` (64).
pub fn split_signature(signature: &[u8]) -> Result<RsvSignature, IotError> {
    if signature.len() != RSV_SIGNATURE_LEN {
        return Err(IotError::Signing(format!(
            "mint signature must be {RSV_SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    Ok(RsvSignature {
        r: format!("0x{}", hex::encode(&signature[..32])),
        s: format!("0x{}", hex::encode(&signature[32..64])),
        v: format!("0x{}", hex::encode(&signature[64..])),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_hex_is_even_length() {
        assert_eq!(amount_hex(0), "0x00");
        assert_eq!(amount_hex(300), "0x012c");
        assert_eq!(amount_hex(255), "0xff");
        assert_eq!(amount_hex(4096), "0x1000");
    }

    #[test]
    fn test_split_signature() {
        let mut signature = [0u8; RSV_SIGNATURE_LEN];
        signature[0] = 0xaa;
        signature[32] = 0xbb;
        signature[64] = 0x1b;
        let rsv = split_signature(&signature).unwrap();
        assert_eq!(rsv.r.len(), 66);
        assert!(rsv.r.starts_with("0xaa"));
        assert!(rsv.s.starts_with("0xbb"));
        assert_eq!(rsv.v, "0x1b");
    }

    #[test]
    fn test_split_signature_rejects_wrong_length() {
        assert!(matches!(
            split_signature(&[0u8; 64]),
            Err(IotError::Signing(_))
        ));
    }

    #[test]
    fn test_payload_is_flat() {
        let payload = MintPayload {
            request: MintRequest::new("0xabc", 300, 6),
            signature: RsvSignature {
                r: "0x01".into(),
                s: "0x02".into(),
                v: "0x1c".into(),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["iot"], "0xabc");
        assert_eq!(json["amount"], "0x012c");
        assert_eq!(json["nonce"], 6);
        assert_eq!(json["v"], "0x1c");
    }
}
