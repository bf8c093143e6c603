//! # Accounting Methodology
//!
//! Accumulates the metrics of primary sensors into a running energy total and requests
//! carbon-credit issuance for it. The total belongs to one accounting epoch, the span
//! between two changes of the ledger's mint nonce:
//!
//! - while the nonce is unchanged, every mint tick re-submits the full epoch total
//!   (above 1 Wh) under the same nonce
//! - once the nonce moves, a mint of this epoch was executed; the total restarts at 0
//!
//! Energy accumulated after the last accepted submission of an epoch is not carried
//! into the next one.

pub mod carbon;

use crate::checkpoint::CheckpointStore;
use crate::error::IotError;
use crate::ledger::{Minter, NonceProvider};
use crate::sensors::{unix_seconds, MetricEvent, Sensor, SensorKind};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Smallest epoch total worth a mint request, in Wh.
pub const MINT_THRESHOLD_WH: f64 = 1.0;

/// Which sensors count toward the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodologyKind {
    /// Biogas generator: electricity from the power meters.
    #[default]
    Methane,
    /// Improved cook stove: thermocouple readings.
    CookStove,
}

impl MethodologyKind {
    pub fn primary_sensor(self) -> SensorKind {
        match self {
            MethodologyKind::Methane => SensorKind::PowerMeter,
            MethodologyKind::CookStove => SensorKind::Temperature,
        }
    }

    /// Marks exactly the sensors of the primary kind as primary.
    pub fn assign_primary(self, sensors: &mut [Box<dyn Sensor>]) {
        let primary = self.primary_sensor();
        for sensor in sensors.iter_mut() {
            sensor.set_primary(sensor.kind() == primary);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCheckpoint {
    pub current_nonce: u64,
    /// Unix seconds of the last accumulated metric or epoch start.
    pub latest_update: i64,
    /// Wh accumulated in the current epoch.
    pub total_wh: f64,
    /// Total of the last accepted mint request.
    pub latest_posted_total_wh: f64,
}

/// Result of one mint tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MintOutcome {
    /// The ledger nonce moved; a new epoch started and nothing was submitted.
    EpochReset { previous_nonce: u64, nonce: u64 },
    /// A mint for `amount` Wh was accepted.
    Submitted { nonce: u64, amount: u64 },
    /// The epoch total is too small to submit.
    BelowThreshold,
}

pub struct MethaneMethodology {
    store: CheckpointStore<MethodCheckpoint>,
    nonce_provider: Arc<dyn NonceProvider>,
    minter: Arc<dyn Minter>,
    conversion_factor: f64,
    checkpoint: MethodCheckpoint,
    status_tx: watch::Sender<MethodCheckpoint>,
}

impl MethaneMethodology {
    pub fn new(
        store: CheckpointStore<MethodCheckpoint>,
        nonce_provider: Arc<dyn NonceProvider>,
        minter: Arc<dyn Minter>,
        conversion_factor: f64,
    ) -> Self {
        let checkpoint = MethodCheckpoint::default();
        let (status_tx, _) = watch::channel(checkpoint);
        MethaneMethodology {
            store,
            nonce_provider,
            minter,
            conversion_factor,
            checkpoint,
            status_tx,
        }
    }

    /// Restores the persisted checkpoint or starts a fresh one.
    ///
    /// A checkpoint that does not verify is an error; accounting never starts from
    /// unverified state.
    pub async fn initial(&mut self) -> Result<(), IotError> {
        self.checkpoint = match self.store.load_latest().await {
            Ok(Some(latest)) => {
                info!(
                    "Methodology restored: nonce {}, {} Wh",
                    latest.current_nonce, latest.total_wh
                );
                latest
            }
            Ok(None) => MethodCheckpoint {
                latest_update: unix_seconds(),
                ..MethodCheckpoint::default()
            },
            Err(e) => {
                error!("Methodology checkpoint rejected: {e}");
                return Err(e);
            }
        };
        self.publish();
        Ok(())
    }

    pub fn checkpoint(&self) -> MethodCheckpoint {
        self.checkpoint
    }

    /// Observes every checkpoint change.
    pub fn subscribe(&self) -> watch::Receiver<MethodCheckpoint> {
        self.status_tx.subscribe()
    }

    /// Adds a primary metric to the epoch total. Other metrics are ignored.
    pub fn on_metric(&mut self, event: &MetricEvent) {
        if !event.is_primary {
            return;
        }
        if let Some(value) = &event.indicator.value {
            self.checkpoint.total_wh += value.total();
        }
        self.checkpoint.latest_update = unix_seconds();
        debug!(
            "Sensor {}: epoch total {} Wh",
            event.sensor_id, self.checkpoint.total_wh
        );
        self.publish();
    }

    /// One mint tick.
    pub async fn post_mint(&mut self) -> Result<MintOutcome, IotError> {
        let nonce = self.nonce_provider.nonce().await?;

        if nonce != self.checkpoint.current_nonce {
            let previous_nonce = self.checkpoint.current_nonce;
            info!(
                "Ledger nonce {previous_nonce} -> {nonce}: new epoch, dropping {} Wh ({} Wh posted)",
                self.checkpoint.total_wh, self.checkpoint.latest_posted_total_wh
            );
            self.checkpoint = MethodCheckpoint {
                current_nonce: nonce,
                latest_update: unix_seconds(),
                total_wh: 0.0,
                latest_posted_total_wh: 0.0,
            };
            self.publish();
            return Ok(MintOutcome::EpochReset {
                previous_nonce,
                nonce,
            });
        }

        let total_wh = self.checkpoint.total_wh;
        if total_wh <= MINT_THRESHOLD_WH {
            return Ok(MintOutcome::BelowThreshold);
        }

        // The ledger counts whole Wh.
        let amount = total_wh.floor() as u64;
        info!("Requesting mint of {amount} Wh with nonce {nonce}");
        self.minter.post_mint_sign(nonce, amount).await?;

        self.checkpoint.latest_posted_total_wh = total_wh;
        self.store.save(&self.checkpoint).await?;
        self.publish();
        Ok(MintOutcome::Submitted { nonce, amount })
    }

    /// Credits of the current epoch, in thousandths of the conversion unit.
    pub fn current_carbon(&self) -> i64 {
        (self.checkpoint.total_wh * self.conversion_factor * 1000.0).round() as i64
    }

    /// Consumes metrics and ticks `post_mint` every `mint_interval` until `shutdown`
    /// changes. Both run on this one task, so a tick never overlaps a metric update.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<MetricEvent>,
        mint_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IotError> {
        let mut ticker = interval_at(Instant::now() + mint_interval, mint_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;
        info!("Methodology started, mint every {} ms", mint_interval.as_millis());

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_metric(&event),
                    None => events_open = false,
                },
                _ = ticker.tick() => match self.post_mint().await {
                    Ok(outcome) => debug!("Mint tick: {outcome:?}"),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => error!("Mint tick failed: {e}"),
                },
            }
        }

        info!("Methodology stopped at {} Wh", self.checkpoint.total_wh);
        Ok(())
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.checkpoint);
    }
}
