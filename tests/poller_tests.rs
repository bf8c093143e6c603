//! Tests for the round-robin meter poller, both the pure state machine and the task
//! driving a simulated bus. Timer-dependent tests run on paused tokio time.

use biogas_iot::modbus::frame::{encode_reply, MeterReading};
use biogas_iot::modbus::serial_mock::{MeterBehavior, MockMeter, MockRtuBus};
use biogas_iot::poller::{
    MeterSnapshot, Phase, PollerMachine, PollerSettings, PollerState, PowerMeterPoller,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

fn reply(address: u8, energy: u32, voltage: f64) -> Vec<u8> {
    encode_reply(&MeterReading {
        address,
        voltage,
        current: 2.0,
        power: 400.0,
        energy,
        frequency: 50.0,
        power_factor: 0.9,
        alarm: false,
    })
}

/// Tests that each meter's reply only lands in its own slot.
#[test]
fn test_no_cross_writes_between_meters() {
    let mut machine = PollerMachine::new(&PollerSettings::default());
    machine.start();
    machine.on_reply(&reply(1, 111, 221.0));
    machine.on_reply(&reply(2, 222, 222.0));
    machine.on_reply(&reply(3, 333, 223.0));

    let snapshot = machine.snapshot();
    assert_eq!(snapshot.energies, [111, 222, 333]);
    assert_eq!(snapshot.total_wh, 666);
    let voltages: Vec<f64> = snapshot.phases.iter().map(|p| p.voltage).collect();
    assert_eq!(voltages, vec![221.0, 222.0, 223.0]);
}

/// Tests that a silent first meter is zeroed and the round still completes.
#[test]
fn test_silent_first_meter_round() {
    let mut machine = PollerMachine::new(&PollerSettings::default());
    machine.start();

    let next = machine.on_timeout().unwrap();
    assert_eq!((next.device_index, next.delay), (1, Duration::ZERO));
    machine.on_reply(&reply(2, 20, 230.0));
    machine.on_reply(&reply(3, 30, 240.0));

    let snapshot = machine.snapshot();
    assert_eq!(snapshot.phases[0], Phase::default());
    assert_eq!(snapshot.phases[1].voltage, 230.0);
    assert_eq!(snapshot.phases[2].voltage, 240.0);
    assert_eq!(snapshot.device_index, 0);
    assert_eq!(
        machine.state(),
        PollerState::AwaitingResponse { device_index: 0 }
    );
}

/// Tests that malformed frames leave the machine waiting on the same meter.
#[test]
fn test_malformed_frames_are_ignored() {
    let mut machine = PollerMachine::new(&PollerSettings::default());
    machine.start();

    let mut garbled = reply(1, 10, 220.0);
    garbled[10] ^= 0x01;
    assert!(machine.on_reply(&garbled).is_none());
    assert!(machine.on_reply(&[0x01, 0x04]).is_none());
    assert!(machine.on_reply(&[]).is_none());
    assert_eq!(
        machine.state(),
        PollerState::AwaitingResponse { device_index: 0 }
    );

    assert!(machine.on_reply(&reply(1, 10, 220.0)).is_some());
}

async fn first_round(snapshots: &mut watch::Receiver<MeterSnapshot>) -> MeterSnapshot {
    snapshots
        .wait_for(|s| s.rounds >= 1)
        .await
        .expect("poller alive")
        .clone()
}

/// Tests the polling task against a bus whose first meter never answers.
#[tokio::test(start_paused = true)]
async fn test_poller_recovers_from_silent_meter() {
    let bus = MockRtuBus::new();
    bus.add_meter(MockMeter::loaded(1, 100).with_behavior(MeterBehavior::Silent));
    bus.add_meter(MockMeter::loaded(2, 200));
    bus.add_meter(MockMeter::loaded(3, 300));

    let poller = PowerMeterPoller::new(bus.clone(), &PollerSettings::default());
    let mut snapshots = poller.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let started = Instant::now();
    let task = tokio::spawn(poller.run(shutdown_rx));

    let snapshot = first_round(&mut snapshots).await;
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(snapshot.phases[0], Phase::default());
    assert_eq!(snapshot.phases[1].voltage, 220.0);
    assert_eq!(snapshot.phases[2].cos_phi, 0.95);
    assert_eq!(snapshot.energies, [0, 200, 300]);
    assert_eq!(snapshot.device_index, 0);
    assert_eq!(bus.queried_addresses(), vec![1, 2, 3]);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

/// Tests that a full round of good replies waits the poll interval before the next round.
#[tokio::test(start_paused = true)]
async fn test_poll_interval_between_rounds() {
    let bus = MockRtuBus::simulated(&[1, 2, 3], 10);
    let settings = PollerSettings::default();
    let poller = PowerMeterPoller::new(bus.clone(), &settings);
    let mut snapshots = poller.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(poller.run(shutdown_rx));

    let round_one = first_round(&mut snapshots).await;
    assert_eq!(round_one.total_wh, 30);
    let after_first = Instant::now();

    let round_two = snapshots
        .wait_for(|s| s.rounds >= 2)
        .await
        .unwrap()
        .clone();
    assert_eq!(round_two.total_wh, 60);
    assert!(round_two.changed);
    assert!(after_first.elapsed() >= settings.poll_interval);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

/// Tests that line noise received during the pause between rounds does not corrupt the
/// first reply of the next round.
#[tokio::test(start_paused = true)]
async fn test_noise_between_rounds_is_discarded() {
    let bus = MockRtuBus::simulated(&[1, 2, 3], 10);
    let poller = PowerMeterPoller::new(bus.clone(), &PollerSettings::default());
    let mut snapshots = poller.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(poller.run(shutdown_rx));

    first_round(&mut snapshots).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    bus.queue_rx_data(&[0x00]);

    let round_two = snapshots
        .wait_for(|s| s.rounds >= 2)
        .await
        .unwrap()
        .clone();
    assert_eq!(round_two.energies, [20, 20, 20]);
    assert_eq!(round_two.phases[0].voltage, 220.0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

/// Tests that garbled replies are treated like silence.
#[tokio::test(start_paused = true)]
async fn test_garbled_meter_counts_as_silent() {
    let bus = MockRtuBus::simulated(&[1, 2, 3], 0);
    bus.set_energy(2, 500);
    bus.set_behavior(2, MeterBehavior::Garbled);

    let poller = PowerMeterPoller::new(bus.clone(), &PollerSettings::default());
    let mut snapshots = poller.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(poller.run(shutdown_rx));

    let snapshot = first_round(&mut snapshots).await;
    assert_eq!(snapshot.energies[1], 0);
    assert_eq!(snapshot.phases[1], Phase::default());
    assert_eq!(snapshot.phases[0].voltage, 220.0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

/// Tests that a poller without addresses refuses to start.
#[tokio::test]
async fn test_poller_without_addresses() {
    let settings = PollerSettings {
        addresses: Vec::new(),
        ..PollerSettings::default()
    };
    let poller = PowerMeterPoller::new(MockRtuBus::new(), &settings);
    let (_tx, rx) = watch::channel(false);
    assert!(poller.run(rx).await.is_err());
}
