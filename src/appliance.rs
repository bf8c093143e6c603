//! # Appliance Assembly
//!
//! Wires the configured components into running tasks:
//!
//! ```text
//! PowerMeterPoller --watch--> PowerMeterSensor --+
//!                             GpsSensor ---------+--mpsc--> MethaneMethodology --> Minter
//!                             ThermocoupleSensor-+
//! ```
//!
//! Every task shares one shutdown signal. A fatal error in any task (a checkpoint that
//! does not verify, for instance) stops the whole appliance.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::collector::{MetricClient, MetricPoster};
use crate::config::AppConfig;
use crate::error::IotError;
use crate::identity::{DeviceKey, Ed25519Verifier, Signer, Verifier};
use crate::ledger::DryRunLedger;
use crate::methodology::{MethaneMethodology, MethodCheckpoint};
use crate::modbus::serial::{open_serial, RtuTransport};
use crate::modbus::serial_mock::MockRtuBus;
use crate::poller::{MeterSnapshot, PowerMeterPoller};
use crate::sensors::{
    GpsLocation, GpsSensor, PowerMeterSensor, Sensor, SensorKind, SensorTask,
    SimulatedThermocouple, StaticGpsReader, ThermocoupleSensor,
};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Energy a simulated meter adds per query, Wh.
const MOCK_ENERGY_STEP: u32 = 5;
const METRIC_QUEUE: usize = 64;

struct Identity {
    signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,
}

fn load_identity(config: &AppConfig) -> Result<Identity, IotError> {
    let key = DeviceKey::load_or_generate(&config.key_path)?;
    info!("Device identity {}", key.identity());
    Ok(Identity {
        signer: Arc::new(key),
        verifier: Arc::new(Ed25519Verifier),
    })
}

fn spawn_poller<T: RtuTransport + 'static>(
    tasks: &mut JoinSet<Result<(), IotError>>,
    transport: T,
    config: &AppConfig,
    shutdown: &watch::Receiver<bool>,
) -> watch::Receiver<MeterSnapshot> {
    let poller = PowerMeterPoller::new(transport, &config.poller());
    let snapshots = poller.subscribe();
    tasks.spawn(poller.run(shutdown.clone()));
    snapshots
}

fn build_sensors(
    config: &AppConfig,
    identity: &Identity,
    snapshots: Option<&watch::Receiver<MeterSnapshot>>,
) -> Result<Vec<Box<dyn Sensor>>, IotError> {
    let mut sensors: Vec<Box<dyn Sensor>> = Vec::with_capacity(config.sensors.len());
    for settings in &config.sensors {
        let dir = config.sensor_dir(settings.id);
        let primary = settings.is_primary.unwrap_or(false);
        let sensor: Box<dyn Sensor> = match settings.kind {
            SensorKind::PowerMeter => {
                let reader = snapshots
                    .cloned()
                    .ok_or_else(|| IotError::Config("power meter without a meter bus".into()))?;
                Box::new(PowerMeterSensor::new(
                    settings.id,
                    primary,
                    Box::new(reader),
                    CheckpointStore::open(dir, identity.signer.clone(), identity.verifier.clone())?,
                ))
            }
            SensorKind::Gps if config.mock => Box::new(GpsSensor::new(
                settings.id,
                primary,
                Box::new(StaticGpsReader::new(GpsLocation::default())),
                CheckpointStore::open(dir, identity.signer.clone(), identity.verifier.clone())?,
            )),
            SensorKind::Temperature if config.mock => Box::new(ThermocoupleSensor::new(
                settings.id,
                primary,
                Box::new(SimulatedThermocouple),
                CheckpointStore::open(dir, identity.signer.clone(), identity.verifier.clone())?,
            )),
            kind => {
                return Err(IotError::Config(format!(
                    "sensor {}: no hardware reader for {kind}, enable mock",
                    settings.id
                )))
            }
        };
        sensors.push(sensor);
    }
    Ok(sensors)
}

/// Runs the appliance until `shutdown` changes or a task fails fatally.
pub async fn run(config: AppConfig, shutdown: watch::Receiver<bool>) -> Result<(), IotError> {
    config.validate()?;
    let identity = load_identity(&config)?;
    let mut tasks = JoinSet::new();

    let needs_meters = config
        .sensors
        .iter()
        .any(|s| s.kind == SensorKind::PowerMeter);
    let snapshots = if !needs_meters {
        None
    } else if config.mock {
        info!("Simulated meter bus at {:?}", config.meter_addresses);
        let bus = MockRtuBus::simulated(&config.meter_addresses, MOCK_ENERGY_STEP);
        Some(spawn_poller(&mut tasks, bus, &config, &shutdown))
    } else {
        let serial = config.serial();
        info!("Meter bus on {} at {} baud", serial.port, serial.baudrate);
        let port = open_serial(&serial)?;
        Some(spawn_poller(&mut tasks, port, &config, &shutdown))
    };

    let mut sensors = build_sensors(&config, &identity, snapshots.as_ref())?;
    config.methodology.assign_primary(&mut sensors);
    for sensor in sensors.iter_mut() {
        sensor.initial().await?;
    }

    let ledger = DryRunLedger::new(0).with_auto_finalize(true);
    warn!("No ledger signer configured, mint requests are recorded locally");

    let store = CheckpointStore::open(
        config.methodology_dir(),
        identity.signer.clone(),
        identity.verifier.clone(),
    )?;
    let mut methodology = MethaneMethodology::new(
        store,
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        config.conversion_factor,
    );
    methodology.initial().await?;
    let nonce = resume_nonce(&methodology.checkpoint());
    info!("Local ledger resumes at nonce {nonce}");
    ledger.set_nonce(nonce);

    let poster: Option<Arc<dyn MetricPoster>> = config
        .collector_url
        .as_ref()
        .map(|url| -> Arc<dyn MetricPoster> {
            Arc::new(MetricClient::new(url.clone(), identity.signer.clone()))
        });

    let (events_tx, events_rx) = mpsc::channel(METRIC_QUEUE);
    for (sensor, settings) in sensors.into_iter().zip(&config.sensors) {
        let mut task =
            SensorTask::new(sensor, settings.metric_interval()).with_events(events_tx.clone());
        if let Some(poster) = &poster {
            task = task.with_poster(poster.clone());
        }
        tasks.spawn(task.run(shutdown.clone()));
    }
    drop(events_tx);
    tasks.spawn(methodology.run(events_rx, config.mint_interval(), shutdown.clone()));

    info!("Appliance running with {} tasks", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(IotError::Other(format!("task panicked: {e}")));
            }
        }
    }
    info!("Appliance stopped");
    Ok(())
}

/// Nonce a local ledger resumes at after a restart. The local ledger finalizes every
/// accepted mint at once, so a restored epoch that already posted is closed.
fn resume_nonce(restored: &MethodCheckpoint) -> u64 {
    if restored.latest_posted_total_wh > 0.0 {
        restored.current_nonce + 1
    } else {
        restored.current_nonce
    }
}

/// Verified checkpoints of one appliance.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub identity: String,
    pub methodology: Option<CheckpointStatus<MethodCheckpoint>>,
    pub sensors: Vec<SensorStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStatus<T> {
    pub captured_at: String,
    pub payload: T,
}

impl<T> From<Checkpoint<T>> for CheckpointStatus<T> {
    fn from(checkpoint: Checkpoint<T>) -> Self {
        CheckpointStatus {
            captured_at: checkpoint.captured_at.to_rfc3339(),
            payload: checkpoint.payload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SensorStatus {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    pub checkpoint: Option<CheckpointStatus<serde_json::Value>>,
}

/// Loads and verifies every checkpoint the configuration refers to.
pub async fn status(config: &AppConfig) -> Result<StatusReport, IotError> {
    let identity = load_identity(config)?;

    let store: CheckpointStore<MethodCheckpoint> = CheckpointStore::open(
        config.methodology_dir(),
        identity.signer.clone(),
        identity.verifier.clone(),
    )?;
    let methodology = store.load_latest_checkpoint().await?.map(Into::into);

    let mut sensors = Vec::with_capacity(config.sensors.len());
    for settings in &config.sensors {
        let store: CheckpointStore<serde_json::Value> = CheckpointStore::open(
            config.sensor_dir(settings.id),
            identity.signer.clone(),
            identity.verifier.clone(),
        )?;
        sensors.push(SensorStatus {
            id: settings.id,
            kind: settings.kind,
            checkpoint: store.load_latest_checkpoint().await?.map(Into::into),
        });
    }

    Ok(StatusReport {
        identity: identity.signer.identity(),
        methodology,
        sensors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_nonce() {
        let fresh = MethodCheckpoint::default();
        assert_eq!(resume_nonce(&fresh), 0);

        let posted = MethodCheckpoint {
            current_nonce: 4,
            total_wh: 120.0,
            latest_posted_total_wh: 120.0,
            ..MethodCheckpoint::default()
        };
        assert_eq!(resume_nonce(&posted), 5);

        let unposted = MethodCheckpoint {
            current_nonce: 4,
            total_wh: 0.5,
            ..MethodCheckpoint::default()
        };
        assert_eq!(resume_nonce(&unposted), 4);
    }
}
