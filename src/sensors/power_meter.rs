//! Energy sensor on top of the meter poller.
//!
//! Reports how many Wh the meters accumulated since the previous report. The cumulative
//! total last reported is checkpointed, so a restart resumes from it instead of
//! reporting the meters' lifetime counters again.

use super::{Indicator, Monitoring, Sensor, SensorKind, TimedIndicator, EPSILON};
use crate::checkpoint::CheckpointStore;
use crate::error::IotError;
use crate::poller::{MeterSnapshot, Phase};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Source of cumulative energy.
pub trait PowerMeterReader: Send + Sync {
    fn total_wh(&self) -> f64;

    fn phases(&self) -> Vec<Phase>;
}

impl PowerMeterReader for watch::Receiver<MeterSnapshot> {
    fn total_wh(&self) -> f64 {
        self.borrow().total_wh as f64
    }

    fn phases(&self) -> Vec<Phase> {
        self.borrow().phases.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorCheckpoint {
    pub total_wh: f64,
    /// Unix seconds; 0 until the first observation.
    pub latest_observed_at: i64,
}

pub struct PowerMeterSensor {
    id: u32,
    primary: bool,
    reader: Box<dyn PowerMeterReader>,
    store: CheckpointStore<SensorCheckpoint>,
    checkpoint: SensorCheckpoint,
    last_delta: f64,
}

impl PowerMeterSensor {
    pub fn new(
        id: u32,
        primary: bool,
        reader: Box<dyn PowerMeterReader>,
        store: CheckpointStore<SensorCheckpoint>,
    ) -> Self {
        PowerMeterSensor {
            id,
            primary,
            reader,
            store,
            checkpoint: SensorCheckpoint::default(),
            last_delta: 0.0,
        }
    }

    pub fn checkpoint(&self) -> SensorCheckpoint {
        self.checkpoint
    }
}

#[async_trait]
impl Sensor for PowerMeterSensor {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::PowerMeter
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    async fn initial(&mut self) -> Result<(), IotError> {
        if let Some(latest) = self.store.load_latest().await? {
            debug!("Sensor {}: restored {latest:?}", self.id);
            self.checkpoint = latest;
        }
        Ok(())
    }

    async fn observe(&mut self, now: i64) -> Result<Option<TimedIndicator>, IotError> {
        let from = self.checkpoint.latest_observed_at;
        let current = self.reader.total_wh();
        let delta = current - self.checkpoint.total_wh;
        self.last_delta = delta;

        if from == 0 || delta < EPSILON {
            self.checkpoint.latest_observed_at = now;
            return Ok(None);
        }

        let next = SensorCheckpoint {
            total_wh: current,
            latest_observed_at: now,
        };
        self.store.save(&next).await?;
        self.checkpoint = next;

        Ok(Some(TimedIndicator {
            from,
            to: now,
            indicator: Indicator::scalar(delta),
        }))
    }

    fn current_indicator(&self) -> Option<Indicator> {
        Some(Indicator::scalar(self.last_delta))
    }

    fn monitoring(&self) -> Monitoring {
        Monitoring {
            temp: None,
            total: Some(self.reader.total_wh()),
            phases: Some(self.reader.phases()),
        }
    }
}
