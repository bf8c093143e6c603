//! # Device Identity
//!
//! Signing and identity-recovery capabilities consumed by the checkpoint store and the
//! metric client. The device key is an ed25519 key; a signature is encoded as
//! `public_key(32) || signature(64)` in `0x` hex, so the signer identity can be recovered
//! from the signature alone and compared against the expected owner.
//!
//! ```rust
//! # async fn demo() -> Result<(), biogas_iot::error::IotError> {
//! use biogas_iot::identity::{DeviceKey, Ed25519Verifier, Signer, Verifier};
//!
//! let key = DeviceKey::generate();
//! let signature = key.sign_message(b"{\"totalWh\":42}").await?;
//! let signer = Ed25519Verifier.recover_identity(b"{\"totalWh\":42}", &signature)?;
//! assert_eq!(signer, key.identity());
//! # Ok(())
//! # }
//! ```

use crate::error::IotError;
use crate::util::hex::{decode_hex, encode_prefixed};
use async_trait::async_trait;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use log::info;
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = PUBLIC_KEY_LEN + 64;

/// Anything that can sign on behalf of an identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Identity string of the signer (`0x`-prefixed hex).
    fn identity(&self) -> String;

    /// Signs `message` and returns the hex-encoded signature.
    async fn sign_message(&self, message: &[u8]) -> Result<String, IotError>;
}

/// Recovers who signed a message.
pub trait Verifier: Send + Sync {
    /// Returns the identity that produced `signature` over `message`.
    ///
    /// Fails with `IotError::Signing` when the signature is malformed or does not verify.
    fn recover_identity(&self, message: &[u8], signature: &str) -> Result<String, IotError>;
}

/// ed25519 key of this appliance.
pub struct DeviceKey {
    signing_key: SigningKey,
}

impl DeviceKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *bytes);
        DeviceKey {
            signing_key: SigningKey::from_bytes(&bytes),
        }
    }

    /// Builds a key from its hex-encoded 32-byte secret.
    pub fn from_hex(secret: &str) -> Result<Self, IotError> {
        let bytes = Zeroizing::new(
            decode_hex(secret).map_err(|e| IotError::Signing(format!("device key: {e}")))?,
        );
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            IotError::Signing(format!(
                "device key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let secret = Zeroizing::new(secret);
        Ok(DeviceKey {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Loads the key at `path`, generating and storing a fresh one if the file is missing.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, IotError> {
        let path = path.as_ref();
        if path.exists() {
            let contents = Zeroizing::new(std::fs::read_to_string(path)?);
            return Self::from_hex(contents.trim());
        }

        let key = Self::generate();
        key.store(path)?;
        info!("Generated device key {} at {}", key.identity(), path.display());
        Ok(key)
    }

    /// Writes the hex-encoded secret to `path`, creating parent directories.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), IotError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let secret = Zeroizing::new(hex::encode(self.signing_key.to_bytes()));
        std::fs::write(path, secret.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs synchronously and returns the raw `public_key || signature` bytes.
    pub fn sign_bytes(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        use ed25519_dalek::Signer as _;
        let signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out[..PUBLIC_KEY_LEN].copy_from_slice(self.verifying_key().as_bytes());
        out[PUBLIC_KEY_LEN..].copy_from_slice(&signature.to_bytes());
        out
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for DeviceKey {
    fn identity(&self) -> String {
        identity_of(&self.verifying_key())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String, IotError> {
        Ok(encode_prefixed(&self.sign_bytes(message)))
    }
}

impl Verifier for DeviceKey {
    fn recover_identity(&self, message: &[u8], signature: &str) -> Result<String, IotError> {
        Ed25519Verifier.recover_identity(message, signature)
    }
}

/// Stateless verifier for `public_key || signature` encoded signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn recover_identity(&self, message: &[u8], signature: &str) -> Result<String, IotError> {
        let bytes = decode_hex(signature).map_err(|e| IotError::Signing(e.to_string()))?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(IotError::Signing(format!(
                "signature must be {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let (key_bytes, sig_bytes) = bytes.split_at(PUBLIC_KEY_LEN);
        let key_bytes: [u8; PUBLIC_KEY_LEN] = key_bytes
            .try_into()
            .map_err(|_| IotError::Signing("invalid public key length".into()))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| IotError::Signing("invalid signature length".into()))?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| IotError::Signing(format!("invalid public key: {e}")))?;
        let signature = Signature::from_bytes(&sig_bytes);

        verifying_key
            .verify_strict(message, &signature)
            .map_err(|e| IotError::Signing(format!("signature does not verify: {e}")))?;

        Ok(identity_of(&verifying_key))
    }
}

fn identity_of(key: &VerifyingKey) -> String {
    encode_prefixed(key.as_bytes())
}
