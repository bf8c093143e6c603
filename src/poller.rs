//! # Power-Meter Poller
//!
//! Round-robin polling of up to three energy meters sharing one RTU bus. The decision
//! logic lives in [`PollerMachine`], which is free of I/O and timers: it consumes reply
//! frames and watchdog expiries and answers with the next query to send. The
//! [`PowerMeterPoller`] task wraps it with a transport and a [`Watchdog`] and publishes
//! a [`MeterSnapshot`] after every transition.
//!
//! Exactly one query is outstanding at a time. A silent meter costs one watchdog window
//! per round and never blocks the others.

use crate::error::IotError;
use crate::modbus::frame::{decode_reply, measurement_query, MeterReading};
use crate::modbus::serial::{read_frame, send_query, RtuTransport};
use crate::util::logging::{log_frame_hex, LogThrottle};
use crate::watchdog::Watchdog;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Maximum number of meters on one bus.
pub const MAX_DEVICES: usize = 3;

/// Electrical state of one phase as seen by its meter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Phase {
    #[serde(rename = "U")]
    pub voltage: f64,
    #[serde(rename = "I")]
    pub current: f64,
    #[serde(rename = "cosPhi")]
    pub cos_phi: f64,
}

impl Phase {
    fn from_reading(reading: &MeterReading) -> Self {
        Phase {
            voltage: reading.voltage,
            current: reading.current,
            cos_phi: reading.power_factor,
        }
    }
}

/// Everything the poller knows after its latest transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MeterSnapshot {
    /// Last energy counter reported by each meter, in Wh.
    pub energies: [u32; MAX_DEVICES],
    pub phases: [Phase; MAX_DEVICES],
    /// Sum of `energies`.
    pub total_wh: u64,
    /// Whether the last valid reply moved the total.
    pub changed: bool,
    /// Completed polling rounds.
    pub rounds: u64,
    /// Index of the meter queried next (or being awaited).
    pub device_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    AwaitingResponse { device_index: usize },
}

/// What the driver has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextQuery {
    pub device_index: usize,
    pub address: u8,
    /// Wait before putting the query on the line.
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// RTU addresses, one per phase, in polling order.
    pub addresses: Vec<u8>,
    /// Pause after a completed round.
    pub poll_interval: Duration,
    /// Pause between two meters of the same round.
    pub inter_frame_gap: Duration,
    pub watchdog_timeout: Duration,
    /// Line silence that terminates a reply frame.
    pub frame_silence: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        PollerSettings {
            addresses: vec![0x01, 0x02, 0x03],
            poll_interval: Duration::from_millis(15_000),
            inter_frame_gap: Duration::from_millis(10),
            watchdog_timeout: Duration::from_millis(1_000),
            frame_silence: Duration::from_millis(50),
        }
    }
}

/// Pure round-robin state machine.
#[derive(Debug)]
pub struct PollerMachine {
    state: PollerState,
    snapshot: MeterSnapshot,
    addresses: Vec<u8>,
    poll_interval: Duration,
    inter_frame_gap: Duration,
    rejects: LogThrottle,
}

impl PollerMachine {
    pub fn new(settings: &PollerSettings) -> Self {
        let mut addresses = settings.addresses.clone();
        addresses.truncate(MAX_DEVICES);
        PollerMachine {
            state: PollerState::Idle,
            snapshot: MeterSnapshot::default(),
            addresses,
            poll_interval: settings.poll_interval,
            inter_frame_gap: settings.inter_frame_gap,
            rejects: LogThrottle::new(60_000, 10),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn snapshot(&self) -> &MeterSnapshot {
        &self.snapshot
    }

    /// Enters `AwaitingResponse(0)`; the first query goes out immediately.
    ///
    /// Returns `None` when no address is configured.
    pub fn start(&mut self) -> Option<NextQuery> {
        let address = *self.addresses.first()?;
        self.state = PollerState::AwaitingResponse { device_index: 0 };
        self.snapshot.device_index = 0;
        Some(NextQuery {
            device_index: 0,
            address,
            delay: Duration::ZERO,
        })
    }

    /// Handles a frame read from the bus.
    ///
    /// Invalid, foreign or unexpected frames are logged and ignored; the machine keeps
    /// waiting for a valid reply or the watchdog.
    pub fn on_reply(&mut self, frame: &[u8]) -> Option<NextQuery> {
        let PollerState::AwaitingResponse { device_index } = self.state else {
            debug!("Unsolicited frame while idle, {} bytes", frame.len());
            return None;
        };

        let reading = match decode_reply(frame) {
            Ok(reading) => reading,
            Err(e) => {
                if self.rejects.allow() {
                    warn!("Meter {device_index}: rejected reply: {e}");
                    log_frame_hex("Rejected frame", frame);
                }
                return None;
            }
        };

        let expected = self.addresses[device_index];
        if reading.address != expected {
            if self.rejects.allow() {
                warn!(
                    "Meter {device_index}: reply from address 0x{:02X}, expected 0x{expected:02X}",
                    reading.address
                );
            }
            return None;
        }

        self.apply_reading(device_index, &reading);
        let next = self.advance(device_index);
        let delay = if next == 0 {
            self.poll_interval
        } else {
            self.inter_frame_gap
        };
        Some(self.query_for(next, delay))
    }

    /// Handles a watchdog expiry: the awaited meter counts as disconnected for this round.
    pub fn on_timeout(&mut self) -> Option<NextQuery> {
        let PollerState::AwaitingResponse { device_index } = self.state else {
            return None;
        };

        self.snapshot.phases[device_index] = Phase::default();
        let next = self.advance(device_index);
        Some(self.query_for(next, Duration::ZERO))
    }

    /// Returns to `Idle`; a later `start` begins a fresh round at meter 0.
    pub fn stop(&mut self) {
        self.state = PollerState::Idle;
    }

    fn apply_reading(&mut self, device_index: usize, reading: &MeterReading) {
        let previous_total = self.snapshot.total_wh;
        self.snapshot.energies[device_index] = reading.energy;
        self.snapshot.total_wh = self.snapshot.energies.iter().map(|&e| u64::from(e)).sum();
        self.snapshot.changed = self.snapshot.total_wh != previous_total;
        self.snapshot.phases[device_index] = Phase::from_reading(reading);

        if reading.alarm {
            warn!("Meter {device_index} (0x{:02X}) reports power alarm", reading.address);
        }
    }

    fn advance(&mut self, device_index: usize) -> usize {
        let next = (device_index + 1) % self.addresses.len();
        if next == 0 {
            self.snapshot.rounds += 1;
            debug!(
                "Round {} complete, total {} Wh",
                self.snapshot.rounds, self.snapshot.total_wh
            );
        }
        self.state = PollerState::AwaitingResponse { device_index: next };
        self.snapshot.device_index = next;
        next
    }

    fn query_for(&self, device_index: usize, delay: Duration) -> NextQuery {
        NextQuery {
            device_index,
            address: self.addresses[device_index],
            delay,
        }
    }
}

/// Polling task owning the bus.
pub struct PowerMeterPoller<T: RtuTransport> {
    transport: T,
    machine: PollerMachine,
    watchdog: Watchdog,
    frame_silence: Duration,
    snapshot_tx: watch::Sender<MeterSnapshot>,
}

impl<T: RtuTransport> PowerMeterPoller<T> {
    pub fn new(transport: T, settings: &PollerSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(MeterSnapshot::default());
        PowerMeterPoller {
            transport,
            machine: PollerMachine::new(settings),
            watchdog: Watchdog::new(settings.watchdog_timeout),
            frame_silence: settings.frame_silence,
            snapshot_tx,
        }
    }

    /// A handle observing every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<MeterSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Drives the bus until `shutdown` changes or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IotError> {
        let Some(first) = self.machine.start() else {
            return Err(IotError::Config("no meter address configured".into()));
        };
        info!("Power-meter poller started");

        let mut next = Some(first);
        let mut bus_fault = false;

        loop {
            if let Some(query) = next.take() {
                if !query.delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(query.delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                let frame = measurement_query(query.address);
                if let Err(e) = self.transport.discard_input() {
                    warn!("Clearing stale input before meter {}: {e}", query.device_index);
                }
                if let Err(e) = send_query(&mut self.transport, &frame).await {
                    error!("UART write to meter {}: {e}", query.device_index);
                }
                bus_fault = false;
                self.watchdog.start();
            }

            let transport = &mut self.transport;
            let watchdog = &mut self.watchdog;
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = watchdog.expired() => {
                    if let PollerState::AwaitingResponse { device_index } = self.machine.state() {
                        warn!("No response from meter {device_index}, moving to next meter");
                    }
                    next = self.machine.on_timeout();
                    self.publish();
                }
                frame = read_frame(transport, self.frame_silence), if !bus_fault => {
                    match frame {
                        Ok(bytes) => {
                            if let Some(query) = self.machine.on_reply(&bytes) {
                                self.watchdog.stop();
                                next = Some(query);
                                self.publish();
                            }
                        }
                        Err(e) => {
                            // Wait for the watchdog instead of spinning on a broken line.
                            error!("Serial read failed: {e}");
                            bus_fault = true;
                        }
                    }
                }
            }
        }

        self.watchdog.stop();
        self.machine.stop();
        info!("Power-meter poller stopped");
        Ok(())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.machine.snapshot().clone());
    }
}
