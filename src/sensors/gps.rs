//! Position sensor. Reports the new fix whenever the device has moved.

use super::{unix_seconds, Indicator, Monitoring, Sensor, SensorKind, TimedIndicator, EPSILON};
use crate::checkpoint::CheckpointStore;
use crate::error::IotError;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GpsLocation {
            latitude,
            longitude,
        }
    }

    /// Within `EPSILON` on both axes.
    pub fn is_same(&self, other: &GpsLocation) -> bool {
        (self.latitude - other.latitude).abs() < EPSILON
            && (self.longitude - other.longitude).abs() < EPSILON
    }
}

/// Latest fix of a GPS receiver.
pub trait GpsReader: Send + Sync {
    fn location(&self) -> Result<GpsLocation, IotError>;
}

/// A receiver whose fix only changes when told to. Used in mock mode and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticGpsReader {
    location: Arc<Mutex<GpsLocation>>,
}

impl StaticGpsReader {
    pub fn new(location: GpsLocation) -> Self {
        StaticGpsReader {
            location: Arc::new(Mutex::new(location)),
        }
    }

    pub fn move_to(&self, location: GpsLocation) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = location;
    }
}

impl GpsReader for StaticGpsReader {
    fn location(&self) -> Result<GpsLocation, IotError> {
        Ok(*self.location.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsCheckpoint {
    pub latest: i64,
    pub loc: GpsLocation,
}

pub struct GpsSensor {
    id: u32,
    primary: bool,
    reader: Box<dyn GpsReader>,
    store: CheckpointStore<GpsCheckpoint>,
    checkpoint: GpsCheckpoint,
}

impl GpsSensor {
    pub fn new(
        id: u32,
        primary: bool,
        reader: Box<dyn GpsReader>,
        store: CheckpointStore<GpsCheckpoint>,
    ) -> Self {
        GpsSensor {
            id,
            primary,
            reader,
            store,
            checkpoint: GpsCheckpoint {
                latest: unix_seconds(),
                loc: GpsLocation::default(),
            },
        }
    }

    pub fn checkpoint(&self) -> GpsCheckpoint {
        self.checkpoint
    }
}

#[async_trait]
impl Sensor for GpsSensor {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Gps
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    async fn initial(&mut self) -> Result<(), IotError> {
        if let Some(latest) = self.store.load_latest().await? {
            debug!("GPS sensor {}: restored {latest:?}", self.id);
            self.checkpoint = latest;
        }
        Ok(())
    }

    async fn observe(&mut self, now: i64) -> Result<Option<TimedIndicator>, IotError> {
        let location = self.reader.location()?;
        if location.is_same(&self.checkpoint.loc) {
            return Ok(None);
        }

        let from = self.checkpoint.latest;
        let next = GpsCheckpoint {
            latest: now,
            loc: location,
        };
        self.store.save(&next).await?;
        self.checkpoint = next;

        Ok(Some(TimedIndicator {
            from,
            to: now,
            indicator: Indicator::position(location.latitude, location.longitude),
        }))
    }

    fn current_indicator(&self) -> Option<Indicator> {
        Some(Indicator::position(
            self.checkpoint.loc.latitude,
            self.checkpoint.loc.longitude,
        ))
    }

    fn monitoring(&self) -> Monitoring {
        Monitoring::default()
    }
}
