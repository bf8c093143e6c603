//! Tests for the sensor variants and the periodic `SensorTask` driver.

use async_trait::async_trait;
use biogas_iot::checkpoint::CheckpointStore;
use biogas_iot::collector::MetricPoster;
use biogas_iot::error::IotError;
use biogas_iot::identity::{DeviceKey, Ed25519Verifier};
use biogas_iot::poller::Phase;
use biogas_iot::sensors::{
    GpsLocation, GpsSensor, Indicator, IndicatorValue, PowerMeterReader, PowerMeterSensor,
    Sensor, SensorKind, SensorTask, StaticGpsReader, ThermocoupleReader, ThermocoupleSensor,
    TimedIndicator,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// Energy counter the test can move by hand.
#[derive(Clone, Default)]
struct ManualMeter(Arc<Mutex<f64>>);

impl ManualMeter {
    fn set(&self, total: f64) {
        *self.0.lock().unwrap() = total;
    }
}

impl PowerMeterReader for ManualMeter {
    fn total_wh(&self) -> f64 {
        *self.0.lock().unwrap()
    }

    fn phases(&self) -> Vec<Phase> {
        vec![Phase::default(); 3]
    }
}

struct FixedProbes(IndicatorValue);

#[async_trait]
impl ThermocoupleReader for FixedProbes {
    async fn read_temp(&self) -> Result<IndicatorValue, IotError> {
        Ok(self.0.clone())
    }
}

/// Poster that always fails and counts the attempts.
#[derive(Default)]
struct OfflineCollector {
    attempts: AtomicUsize,
}

#[async_trait]
impl MetricPoster for OfflineCollector {
    async fn post_metric(&self, _sensor_id: u32, _metric: &TimedIndicator) -> Result<(), IotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(IotError::Network("collector unreachable".into()))
    }
}

fn store<T>(dir: &Path, key: &Arc<DeviceKey>) -> CheckpointStore<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    CheckpointStore::open(dir, key.clone(), Arc::new(Ed25519Verifier)).unwrap()
}

fn power_meter(dir: &Path, key: &Arc<DeviceKey>, meter: &ManualMeter) -> PowerMeterSensor {
    PowerMeterSensor::new(1, true, Box::new(meter.clone()), store(dir, key))
}

/// Tests that the very first observation only records its timestamp.
#[tokio::test]
async fn test_power_meter_first_observation_sets_timestamp() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    meter.set(500.0);
    let mut sensor = power_meter(dir.path(), &key, &meter);
    sensor.initial().await.unwrap();

    assert_eq!(sensor.observe(100).await.unwrap(), None);
    assert_eq!(sensor.checkpoint().latest_observed_at, 100);
    assert_eq!(sensor.checkpoint().total_wh, 0.0);
    assert!(!dir.path().read_dir().unwrap().any(|_| true));
}

/// Tests that a change below the noise floor is neither reported nor persisted.
#[tokio::test]
async fn test_power_meter_ignores_tiny_delta() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    let mut sensor = power_meter(dir.path(), &key, &meter);
    sensor.initial().await.unwrap();
    sensor.observe(100).await.unwrap();

    meter.set(0.0000001);
    assert_eq!(sensor.observe(115).await.unwrap(), None);
    assert_eq!(sensor.checkpoint().latest_observed_at, 115);
    assert_eq!(sensor.checkpoint().total_wh, 0.0);
    let saved: Option<biogas_iot::sensors::SensorCheckpoint> =
        store(dir.path(), &key).load_latest().await.unwrap();
    assert_eq!(saved, None);
}

/// Tests that a real delta is checkpointed and reported over the elapsed span.
#[tokio::test]
async fn test_power_meter_reports_delta() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    let mut sensor = power_meter(dir.path(), &key, &meter);
    sensor.initial().await.unwrap();
    sensor.observe(100).await.unwrap();

    meter.set(100.0);
    let metric = sensor.observe(115).await.unwrap().unwrap();
    assert_eq!(
        metric,
        TimedIndicator {
            from: 100,
            to: 115,
            indicator: Indicator::scalar(100.0),
        }
    );
    assert_eq!(sensor.current_indicator(), Some(Indicator::scalar(100.0)));

    let monitoring = sensor.monitoring();
    assert_eq!(monitoring.total, Some(100.0));
    assert_eq!(monitoring.phases.map(|p| p.len()), Some(3));
}

/// Tests that a restarted sensor resumes from its checkpoint instead of re-reporting.
#[tokio::test]
async fn test_power_meter_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    {
        let mut sensor = power_meter(dir.path(), &key, &meter);
        sensor.initial().await.unwrap();
        sensor.observe(100).await.unwrap();
        meter.set(100.0);
        sensor.observe(115).await.unwrap().unwrap();
    }

    meter.set(150.0);
    let mut restarted = power_meter(dir.path(), &key, &meter);
    restarted.initial().await.unwrap();
    assert_eq!(restarted.checkpoint().total_wh, 100.0);

    let metric = restarted.observe(130).await.unwrap().unwrap();
    assert_eq!((metric.from, metric.to), (115, 130));
    assert_eq!(metric.indicator, Indicator::scalar(50.0));
}

/// Tests that a sensor refuses a checkpoint signed by another device.
#[tokio::test]
async fn test_power_meter_rejects_foreign_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mine = Arc::new(DeviceKey::generate());
    let theirs = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();

    let mut foreign = power_meter(dir.path(), &theirs, &meter);
    foreign.observe(1).await.unwrap();
    meter.set(10.0);
    foreign.observe(2).await.unwrap();

    let own: CheckpointStore<biogas_iot::sensors::SensorCheckpoint> = store(dir.path(), &mine);
    let theirs_store: CheckpointStore<biogas_iot::sensors::SensorCheckpoint> =
        store(dir.path(), &theirs);
    std::fs::copy(theirs_store.latest_path(), own.latest_path()).unwrap();

    let mut sensor = power_meter(dir.path(), &mine, &meter);
    let err = sensor.initial().await.unwrap_err();
    assert!(matches!(err, IotError::SignatureMismatch { .. }));
}

/// Tests that the GPS sensor reports moves in any direction and stays quiet otherwise.
#[tokio::test]
async fn test_gps_reports_moves_only() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let reader = StaticGpsReader::new(GpsLocation::new(10.5, 106.7));
    let mut sensor = GpsSensor::new(2, false, Box::new(reader.clone()), store(dir.path(), &key));
    sensor.initial().await.unwrap();
    assert_eq!(sensor.kind(), SensorKind::Gps);

    let first = sensor.observe(100).await.unwrap().unwrap();
    assert_eq!(first.indicator, Indicator::position(10.5, 106.7));
    assert_eq!(sensor.observe(101).await.unwrap(), None);

    reader.move_to(GpsLocation::new(10.4, 106.6));
    let moved = sensor.observe(102).await.unwrap().unwrap();
    assert_eq!((moved.from, moved.to), (100, 102));
    assert_eq!(moved.indicator.lat, Some(10.4));
    assert_eq!(sensor.checkpoint().loc, GpsLocation::new(10.4, 106.6));
}

/// Tests that the thermocouple reports every cycle, including multi-probe series.
#[tokio::test]
async fn test_thermocouple_reports_every_tick() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let probes = IndicatorValue::Series(vec![60.0, 75.5]);
    let mut sensor = ThermocoupleSensor::new(
        3,
        true,
        Box::new(FixedProbes(probes.clone())),
        store(dir.path(), &key),
    );
    sensor.initial().await.unwrap();

    for now in [100, 115, 130] {
        let metric = sensor.observe(now).await.unwrap().unwrap();
        assert_eq!(metric.to, now);
        assert_eq!(metric.indicator, Indicator::sample(probes.clone()));
    }
    assert_eq!(sensor.checkpoint().latest, 130);
    assert_eq!(sensor.monitoring().temp, Some(probes));
}

/// Tests that a tick forwards the metric to the methodology channel.
#[tokio::test]
async fn test_task_tick_emits_event() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    let (tx, mut rx) = mpsc::channel(8);
    let mut task = SensorTask::new(
        Box::new(power_meter(dir.path(), &key, &meter)),
        Duration::from_secs(15),
    )
    .with_events(tx);

    assert_eq!(task.tick(100).await.unwrap(), None);
    meter.set(42.0);
    let event = task.tick(115).await.unwrap().unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received, event);
    assert_eq!(received.sensor_id, 1);
    assert!(received.is_primary);
    assert_eq!(received.indicator, Indicator::scalar(42.0));
}

/// Tests that collector failures are swallowed and the metric still reaches the methodology.
#[tokio::test]
async fn test_task_swallows_post_failures() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let meter = ManualMeter::default();
    let collector = Arc::new(OfflineCollector::default());
    let (tx, mut rx) = mpsc::channel(8);
    let mut task = SensorTask::new(
        Box::new(power_meter(dir.path(), &key, &meter)),
        Duration::from_secs(15),
    )
    .with_poster(collector.clone())
    .with_events(tx);

    task.tick(100).await.unwrap();
    meter.set(7.0);
    assert!(task.tick(115).await.unwrap().is_some());
    assert_eq!(collector.attempts.load(Ordering::SeqCst), 1);
    assert!(rx.recv().await.is_some());
}

/// Tests the task loop: the first tick waits one period and shutdown stops it.
#[tokio::test(start_paused = true)]
async fn test_task_run_ticks_on_period() {
    let dir = TempDir::new().unwrap();
    let key = Arc::new(DeviceKey::generate());
    let (tx, mut rx) = mpsc::channel(8);
    let sensor = ThermocoupleSensor::new(
        4,
        true,
        Box::new(FixedProbes(IndicatorValue::Scalar(80.0))),
        store(dir.path(), &key),
    );
    let task = SensorTask::new(Box::new(sensor), Duration::from_secs(15)).with_events(tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(task.run(shutdown_rx));
    let event = rx.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(event.indicator, Indicator::scalar(80.0));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
