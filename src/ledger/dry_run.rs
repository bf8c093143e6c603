//! In-memory ledger. Records mint requests instead of submitting them.

use super::{Minter, NonceProvider};
use crate::error::IotError;
use async_trait::async_trait;
use log::info;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintRecord {
    pub nonce: u64,
    pub amount: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    nonce: u64,
    mints: Vec<MintRecord>,
    auto_finalize: bool,
    fail_next: Option<String>,
}

/// Cloned handles share one ledger.
#[derive(Debug, Clone, Default)]
pub struct DryRunLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl DryRunLedger {
    pub fn new(nonce: u64) -> Self {
        DryRunLedger {
            state: Arc::new(Mutex::new(LedgerState {
                nonce,
                ..LedgerState::default()
            })),
        }
    }

    /// Finalizes every accepted mint immediately, advancing the nonce.
    pub fn with_auto_finalize(self, auto_finalize: bool) -> Self {
        self.lock().auto_finalize = auto_finalize;
        self
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.lock().nonce = nonce;
    }

    /// Marks the pending mint as executed on chain.
    pub fn finalize(&self) {
        self.lock().nonce += 1;
    }

    /// Makes the next mint submission fail with a network error.
    pub fn fail_next_mint(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }

    pub fn mints(&self) -> Vec<MintRecord> {
        self.lock().mints.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NonceProvider for DryRunLedger {
    async fn nonce(&self) -> Result<u64, IotError> {
        Ok(self.lock().nonce)
    }
}

#[async_trait]
impl Minter for DryRunLedger {
    async fn post_mint_sign(&self, nonce: u64, amount: u64) -> Result<(), IotError> {
        let mut state = self.lock();
        if let Some(reason) = state.fail_next.take() {
            return Err(IotError::Network(reason));
        }
        state.mints.push(MintRecord { nonce, amount });
        if state.auto_finalize {
            state.nonce += 1;
        }
        info!("Dry-run mint: {amount} Wh, nonce {nonce}");
        Ok(())
    }
}
