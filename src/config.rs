//! # Appliance Configuration
//!
//! Loaded once at startup from a JSON file with camelCase keys. Unknown keys are
//! rejected; every optional key has an explicit default.
//!
//! ```json
//! {
//!   "port": "/dev/ttyAMA0",
//!   "collectorUrl": "https://collector.example",
//!   "sensors": [
//!     { "id": 1, "type": "powerMeter", "metricInterval": 15000 },
//!     { "id": 2, "type": "gps" }
//!   ]
//! }
//! ```

use crate::error::IotError;
use crate::methodology::{carbon, MethodologyKind};
use crate::modbus::serial::SerialConfig;
use crate::poller::{PollerSettings, MAX_DEVICES};
use crate::sensors::SensorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default metric cadence of GPS sensors, ms.
pub const GPS_METRIC_INTERVAL_MS: u64 = 1_000;
/// Default metric cadence of other sensors, ms.
pub const DEFAULT_METRIC_INTERVAL_MS: u64 = 15_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SensorSettings {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    /// Defaults by kind, see [`SensorSettings::metric_interval`].
    #[serde(default)]
    pub metric_interval: Option<u64>,
    /// Overridden by the methodology.
    #[serde(default)]
    pub is_primary: Option<bool>,
}

impl SensorSettings {
    pub fn metric_interval(&self) -> Duration {
        let ms = self.metric_interval.unwrap_or(match self.kind {
            SensorKind::Gps => GPS_METRIC_INTERVAL_MS,
            _ => DEFAULT_METRIC_INTERVAL_MS,
        });
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    /// Serial device of the meter bus. Required unless `mock`.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Meter round period, ms.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout: u64,
    #[serde(default = "default_inter_frame_gap")]
    pub inter_frame_gap: u64,
    #[serde(default = "default_frame_silence")]
    pub frame_silence: u64,
    #[serde(default = "default_meter_addresses")]
    pub meter_addresses: Vec<u8>,
    /// Simulated meters, GPS and thermocouples instead of hardware.
    #[serde(default)]
    pub mock: bool,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default)]
    pub collector_url: Option<String>,
    /// Accounting tick, ms.
    #[serde(default = "default_mint_interval")]
    pub mint_interval: u64,
    /// Tons of CO2 per MWh.
    #[serde(default = "carbon::mwh_to_ton_co2")]
    pub conversion_factor: f64,
    #[serde(default)]
    pub methodology: MethodologyKind,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorSettings>,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_poll_interval() -> u64 {
    15_000
}

fn default_watchdog_timeout() -> u64 {
    1_000
}

fn default_inter_frame_gap() -> u64 {
    10
}

fn default_frame_silence() -> u64 {
    50
}

fn default_meter_addresses() -> Vec<u8> {
    vec![0x01, 0x02, 0x03]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./static/logs")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("./static/keys/device.key")
}

fn default_mint_interval() -> u64 {
    15_000
}

fn default_sensors() -> Vec<SensorSettings> {
    vec![SensorSettings {
        id: 1,
        kind: SensorKind::PowerMeter,
        metric_interval: None,
        is_primary: None,
    }]
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: None,
            baud_rate: default_baud_rate(),
            poll_interval: default_poll_interval(),
            watchdog_timeout: default_watchdog_timeout(),
            inter_frame_gap: default_inter_frame_gap(),
            frame_silence: default_frame_silence(),
            meter_addresses: default_meter_addresses(),
            mock: false,
            data_dir: default_data_dir(),
            key_path: default_key_path(),
            collector_url: None,
            mint_interval: default_mint_interval(),
            conversion_factor: carbon::mwh_to_ton_co2(),
            methodology: MethodologyKind::default(),
            sensors: default_sensors(),
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, IotError> {
        serde_json::from_str(json).map_err(|e| IotError::Config(e.to_string()))
    }

    /// Reads and parses `path`. Ranges are checked by [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IotError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IotError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), IotError> {
        if !self.mock && self.port.as_deref().map_or(true, str::is_empty) {
            return Err(IotError::Config("port is required unless mock is set".into()));
        }
        if self.baud_rate == 0 {
            return Err(IotError::Config("baudRate must be positive".into()));
        }
        for (name, value) in [
            ("pollInterval", self.poll_interval),
            ("watchdogTimeout", self.watchdog_timeout),
            ("frameSilence", self.frame_silence),
            ("mintInterval", self.mint_interval),
        ] {
            if value == 0 {
                return Err(IotError::Config(format!("{name} must be positive")));
            }
        }

        if self.meter_addresses.is_empty() || self.meter_addresses.len() > MAX_DEVICES {
            return Err(IotError::Config(format!(
                "meterAddresses must list 1 to {MAX_DEVICES} meters, got {}",
                self.meter_addresses.len()
            )));
        }
        if let Some(bad) = self
            .meter_addresses
            .iter()
            .find(|a| !(0x01..=0xF7).contains(*a))
        {
            return Err(IotError::Config(format!(
                "meter address 0x{bad:02X} outside 0x01..=0xF7"
            )));
        }

        if !self.conversion_factor.is_finite() || self.conversion_factor <= 0.0 {
            return Err(IotError::Config("conversionFactor must be positive".into()));
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if !ids.insert(sensor.id) {
                return Err(IotError::Config(format!("duplicate sensor id {}", sensor.id)));
            }
            if sensor.metric_interval == Some(0) {
                return Err(IotError::Config(format!(
                    "sensor {}: metricInterval must be positive",
                    sensor.id
                )));
            }
        }
        let primary = self.methodology.primary_sensor();
        if !self.sensors.iter().any(|s| s.kind == primary) {
            return Err(IotError::Config(format!(
                "methodology {:?} needs a {primary} sensor",
                self.methodology
            )));
        }
        Ok(())
    }

    pub fn serial(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone().unwrap_or_default(),
            baudrate: self.baud_rate,
            ..SerialConfig::default()
        }
    }

    pub fn poller(&self) -> PollerSettings {
        PollerSettings {
            addresses: self.meter_addresses.clone(),
            poll_interval: Duration::from_millis(self.poll_interval),
            inter_frame_gap: Duration::from_millis(self.inter_frame_gap),
            watchdog_timeout: Duration::from_millis(self.watchdog_timeout),
            frame_silence: Duration::from_millis(self.frame_silence),
        }
    }

    pub fn mint_interval(&self) -> Duration {
        Duration::from_millis(self.mint_interval)
    }

    /// Directory holding the checkpoint files of sensor `id`.
    pub fn sensor_dir(&self, id: u32) -> PathBuf {
        self.data_dir.join("sensors").join(id.to_string())
    }

    /// Directory holding the methodology checkpoint.
    pub fn methodology_dir(&self) -> PathBuf {
        self.data_dir.join("method")
    }
}
