//! # Signed Checkpoint Store
//!
//! Tamper-evident persistence for the state of one component. Each save serializes the
//! payload to JSON, signs that exact string and writes a record
//!
//! ```json
//! {"ca": "2024-05-01T10:00:00.000Z", "raw": "{\"totalWh\":42,...}", "sign": "0x..."}
//! ```
//!
//! to `{dir}/{identity}_latest.json` (replaced atomically) and appends the same line to
//! `{dir}/{identity}_logger.txt`. Loading recovers the signer from the signature and
//! refuses the record unless it is the store's own identity.

use crate::error::IotError;
use crate::identity::{Signer, Verifier};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const LATEST_SUFFIX: &str = "latest.json";
const LOG_SUFFIX: &str = "logger.txt";

/// On-disk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    /// Capture time, ISO-8601.
    pub ca: String,
    /// The payload exactly as it was signed.
    pub raw: String,
    /// Hex signature over `raw`.
    pub sign: String,
}

/// A verified payload together with the time it was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint<T> {
    pub captured_at: DateTime<Utc>,
    pub payload: T,
}

pub struct CheckpointStore<T> {
    signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,
    identity: String,
    latest_path: PathBuf,
    log_path: PathBuf,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for CheckpointStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("identity", &self.identity)
            .field("latest_path", &self.latest_path)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize + DeserializeOwned> CheckpointStore<T> {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// Files are keyed by the signer's identity, so components that must not share state
    /// need their own directory.
    pub fn open(
        dir: impl AsRef<Path>,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
    ) -> Result<Self, IotError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            IotError::Persistence(format!("cannot create {}: {e}", dir.display()))
        })?;

        let identity = signer.identity();
        Ok(CheckpointStore {
            latest_path: dir.join(format!("{identity}_{LATEST_SUFFIX}")),
            log_path: dir.join(format!("{identity}_{LOG_SUFFIX}")),
            identity,
            signer,
            verifier,
            _payload: PhantomData,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn latest_path(&self) -> &Path {
        &self.latest_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Signs and persists `payload`. Failures are returned, never retried here.
    pub async fn save(&self, payload: &T) -> Result<(), IotError> {
        let raw = serde_json::to_string(payload)?;
        let sign = self.signer.sign_message(raw.as_bytes()).await?;
        let record = SignedRecord {
            ca: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            raw,
            sign,
        };
        let line = serde_json::to_string(&record)?;

        let tmp_path = self.latest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, line.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.latest_path).await?;

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.write_all(b"\n").await?;
        log.flush().await?;

        debug!("Checkpoint saved to {}", self.latest_path.display());
        Ok(())
    }

    /// Loads the latest payload, or `None` if nothing was saved yet.
    pub async fn load_latest(&self) -> Result<Option<T>, IotError> {
        Ok(self
            .load_latest_checkpoint()
            .await?
            .map(|checkpoint| checkpoint.payload))
    }

    /// Like [`load_latest`](Self::load_latest) but keeps the capture time.
    pub async fn load_latest_checkpoint(&self) -> Result<Option<Checkpoint<T>>, IotError> {
        let contents = match tokio::fs::read_to_string(&self.latest_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let contents = contents.trim();
        if contents.is_empty() {
            return Ok(None);
        }

        let record: SignedRecord = serde_json::from_str(contents)?;
        self.verify(&record)?;

        let captured_at = DateTime::parse_from_rfc3339(&record.ca)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| IotError::Serialization(format!("bad capture time {:?}: {e}", record.ca)))?;
        let payload = serde_json::from_str(&record.raw)?;
        Ok(Some(Checkpoint {
            captured_at,
            payload,
        }))
    }

    fn verify(&self, record: &SignedRecord) -> Result<(), IotError> {
        let recovered = match self
            .verifier
            .recover_identity(record.raw.as_bytes(), &record.sign)
        {
            Ok(identity) => identity,
            Err(e) => format!("<unverifiable: {e}>"),
        };
        if recovered != self.identity {
            error!(
                "Checkpoint {} is not signed by {}",
                self.latest_path.display(),
                self.identity
            );
            return Err(IotError::SignatureMismatch {
                expected: self.identity.clone(),
                recovered,
            });
        }
        Ok(())
    }
}
