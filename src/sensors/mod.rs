//! # Sensors
//!
//! A sensor turns the raw state of a reader into time-bounded indicators on a fixed
//! cadence and keeps its own signed checkpoint. Three variants exist:
//!
//! - [`PowerMeterSensor`]: energy deltas from the meter poller (primary for methane)
//! - [`GpsSensor`]: position changes
//! - [`ThermocoupleSensor`]: temperature samples (primary for cook stoves)
//!
//! [`SensorTask`] drives one sensor: every tick it observes, posts the resulting metric
//! to the collector and forwards it to the methodology as a [`MetricEvent`].

pub mod gps;
pub mod power_meter;
pub mod thermocouple;

pub use gps::{GpsCheckpoint, GpsLocation, GpsReader, GpsSensor, StaticGpsReader};
pub use power_meter::{PowerMeterReader, PowerMeterSensor, SensorCheckpoint};
pub use thermocouple::{
    SimulatedThermocouple, ThermocoupleCheckpoint, ThermocoupleReader, ThermocoupleSensor,
};

use crate::collector::MetricPoster;
use crate::error::IotError;
use crate::poller::Phase;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Changes smaller than this are rounding noise.
pub const EPSILON: f64 = 1e-6;

/// Current wall-clock time in unix seconds.
pub fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    PowerMeter,
    Gps,
    Temperature,
}

impl SensorKind {
    /// Numeric type code used by the collector.
    pub fn code(self) -> u8 {
        match self {
            SensorKind::PowerMeter => 2,
            SensorKind::Gps => 3,
            SensorKind::Temperature => 4,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::PowerMeter => "power meter",
            SensorKind::Gps => "GPS",
            SensorKind::Temperature => "thermocouple",
        };
        f.write_str(name)
    }
}

/// A scalar or one value per probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl IndicatorValue {
    /// Sum of all components.
    pub fn total(&self) -> f64 {
        match self {
            IndicatorValue::Scalar(v) => *v,
            IndicatorValue::Series(values) => values.iter().sum(),
        }
    }
}

impl Default for IndicatorValue {
    fn default() -> Self {
        IndicatorValue::Scalar(0.0)
    }
}

/// What a sensor reports: a delta/sample in `value`, or a position in `lat`/`lng`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<IndicatorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl Indicator {
    pub fn scalar(value: f64) -> Self {
        Indicator {
            value: Some(IndicatorValue::Scalar(value)),
            ..Indicator::default()
        }
    }

    pub fn sample(value: IndicatorValue) -> Self {
        Indicator {
            value: Some(value),
            ..Indicator::default()
        }
    }

    pub fn position(lat: f64, lng: f64) -> Self {
        Indicator {
            value: None,
            lat: Some(lat),
            lng: Some(lng),
        }
    }
}

/// An indicator covering `from..to` (unix seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedIndicator {
    pub from: i64,
    pub to: i64,
    pub indicator: Indicator,
}

/// A metric forwarded from a sensor to the methodology.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub sensor_id: u32,
    pub from: i64,
    pub to: i64,
    pub indicator: Indicator,
    pub is_primary: bool,
}

/// On-demand status of a sensor.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Monitoring {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<IndicatorValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<Phase>>,
}

#[async_trait]
pub trait Sensor: Send {
    fn id(&self) -> u32;

    fn kind(&self) -> SensorKind;

    /// Whether this sensor's metrics count toward the methodology total.
    fn is_primary(&self) -> bool;

    fn set_primary(&mut self, primary: bool);

    /// Restores the checkpoint. A checkpoint signed by someone else is fatal.
    async fn initial(&mut self) -> Result<(), IotError>;

    /// Runs one observation cycle at `now` (unix seconds).
    ///
    /// Returns the indicator to report, after it has been checkpointed, or `None` when
    /// there is nothing to report this cycle.
    async fn observe(&mut self, now: i64) -> Result<Option<TimedIndicator>, IotError>;

    /// The latest indicator, without side effects.
    fn current_indicator(&self) -> Option<Indicator>;

    fn monitoring(&self) -> Monitoring;
}

/// Periodic driver for one sensor.
pub struct SensorTask {
    sensor: Box<dyn Sensor>,
    period: Duration,
    poster: Option<Arc<dyn MetricPoster>>,
    events: Option<mpsc::Sender<MetricEvent>>,
}

impl SensorTask {
    pub fn new(sensor: Box<dyn Sensor>, period: Duration) -> Self {
        SensorTask {
            sensor,
            period,
            poster: None,
            events: None,
        }
    }

    /// Posts every metric to the remote collector.
    pub fn with_poster(mut self, poster: Arc<dyn MetricPoster>) -> Self {
        self.poster = Some(poster);
        self
    }

    /// Forwards every metric to the methodology.
    pub fn with_events(mut self, events: mpsc::Sender<MetricEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sensor(&self) -> &dyn Sensor {
        self.sensor.as_ref()
    }

    /// One cycle: observe, post, emit.
    ///
    /// Collector failures are logged and swallowed; the next delta covers the gap.
    pub async fn tick(&mut self, now: i64) -> Result<Option<MetricEvent>, IotError> {
        let Some(metric) = self.sensor.observe(now).await? else {
            return Ok(None);
        };
        let id = self.sensor.id();
        debug!("Sensor {id}: metric {metric:?}");

        if let Some(poster) = &self.poster {
            if let Err(e) = poster.post_metric(id, &metric).await {
                error!("Sensor {id}: post metric failed: {e}");
            }
        }

        let event = MetricEvent {
            sensor_id: id,
            from: metric.from,
            to: metric.to,
            indicator: metric.indicator,
            is_primary: self.sensor.is_primary(),
        };
        if let Some(events) = &self.events {
            if events.send(event.clone()).await.is_err() {
                warn!("Sensor {id}: methodology is gone, metric dropped");
            }
        }
        Ok(Some(event))
    }

    /// Ticks every `period` until `shutdown` changes. The first tick comes one period
    /// after start; overdue ticks are skipped, never bunched.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IotError> {
        let id = self.sensor.id();
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Sensor {id} ({}) started, every {} ms",
            self.sensor.kind(),
            self.period.as_millis()
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.tick(unix_seconds()).await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => error!("Sensor {id}: cycle failed: {e}"),
                    }
                }
            }
        }

        info!("Sensor {id} stopped, last status {:?}", self.sensor.monitoring());
        Ok(())
    }
}
