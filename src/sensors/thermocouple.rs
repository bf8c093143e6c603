//! Temperature sensor. Samples one or more probes every tick and reports the reading.

use super::{
    unix_seconds, Indicator, IndicatorValue, Monitoring, Sensor, SensorKind, TimedIndicator,
};
use crate::checkpoint::CheckpointStore;
use crate::error::IotError;
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait ThermocoupleReader: Send + Sync {
    /// Reads every probe: a scalar for one probe, a series for several.
    async fn read_temp(&self) -> Result<IndicatorValue, IotError>;
}

/// Random readings in 0..=100 °C for mock mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedThermocouple;

#[async_trait]
impl ThermocoupleReader for SimulatedThermocouple {
    async fn read_temp(&self) -> Result<IndicatorValue, IotError> {
        let temp = rand::thread_rng().gen_range(0..=100);
        Ok(IndicatorValue::Scalar(f64::from(temp)))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Temperature {
    pub temp: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThermocoupleCheckpoint {
    pub latest: i64,
    pub temperature: Temperature,
}

pub struct ThermocoupleSensor {
    id: u32,
    primary: bool,
    reader: Box<dyn ThermocoupleReader>,
    store: CheckpointStore<ThermocoupleCheckpoint>,
    checkpoint: ThermocoupleCheckpoint,
}

impl ThermocoupleSensor {
    pub fn new(
        id: u32,
        primary: bool,
        reader: Box<dyn ThermocoupleReader>,
        store: CheckpointStore<ThermocoupleCheckpoint>,
    ) -> Self {
        ThermocoupleSensor {
            id,
            primary,
            reader,
            store,
            checkpoint: ThermocoupleCheckpoint {
                latest: unix_seconds(),
                temperature: Temperature::default(),
            },
        }
    }

    pub fn checkpoint(&self) -> &ThermocoupleCheckpoint {
        &self.checkpoint
    }
}

#[async_trait]
impl Sensor for ThermocoupleSensor {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Temperature
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    async fn initial(&mut self) -> Result<(), IotError> {
        if let Some(latest) = self.store.load_latest().await? {
            debug!("Thermocouple {}: restored {latest:?}", self.id);
            self.checkpoint = latest;
        }
        Ok(())
    }

    async fn observe(&mut self, now: i64) -> Result<Option<TimedIndicator>, IotError> {
        let temp = self.reader.read_temp().await?;
        let from = self.checkpoint.latest;
        let next = ThermocoupleCheckpoint {
            latest: now,
            temperature: Temperature { temp: temp.clone() },
        };
        self.store.save(&next).await?;
        self.checkpoint = next;

        Ok(Some(TimedIndicator {
            from,
            to: now,
            indicator: Indicator::sample(temp),
        }))
    }

    fn current_indicator(&self) -> Option<Indicator> {
        Some(Indicator::sample(self.checkpoint.temperature.temp.clone()))
    }

    fn monitoring(&self) -> Monitoring {
        Monitoring {
            temp: Some(self.checkpoint.temperature.temp.clone()),
            total: None,
            phases: None,
        }
    }
}
