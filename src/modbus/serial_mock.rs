//! Simulated RTU bus
//!
//! An in-process stand-in for the serial line. Each configured meter answers measurement
//! queries addressed to it with a properly encoded reply, or misbehaves as scripted
//! (silent, garbled CRC, exception response). Used for `mock` deployments and by the
//! poller tests.

use crate::modbus::crc::{append_crc, check_crc};
use crate::modbus::frame::{encode_reply, MeterReading, QUERY_FRAME_LEN};
use crate::modbus::serial::RtuTransport;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// How a simulated meter reacts to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterBehavior {
    Normal,
    /// Never answers; the poller's watchdog has to fire.
    Silent,
    /// Answers with a corrupted CRC trailer.
    Garbled,
    /// Answers with an exception frame carrying this code.
    Exception(u8),
}

/// A simulated PZEM meter.
#[derive(Debug, Clone)]
pub struct MockMeter {
    pub reading: MeterReading,
    pub behavior: MeterBehavior,
    /// Energy added to the meter's counter before each answered query.
    pub energy_step: u32,
}

impl MockMeter {
    pub fn new(reading: MeterReading) -> Self {
        MockMeter {
            reading,
            behavior: MeterBehavior::Normal,
            energy_step: 0,
        }
    }

    /// A meter on a loaded 220 V phase.
    pub fn loaded(address: u8, energy: u32) -> Self {
        MockMeter::new(MeterReading {
            address,
            voltage: 220.0,
            current: 10.0,
            power: 2090.0,
            energy,
            frequency: 50.0,
            power_factor: 0.95,
            alarm: false,
        })
    }

    pub fn with_behavior(mut self, behavior: MeterBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_energy_step(mut self, step: u32) -> Self {
        self.energy_step = step;
        self
    }
}

#[derive(Default)]
struct BusState {
    meters: HashMap<u8, MockMeter>,
    rx_buffer: VecDeque<u8>,
    tx_buffer: Vec<u8>,
    pending_query: Vec<u8>,
    queries: Vec<u8>,
    read_waker: Option<Waker>,
    next_error: Option<io::Error>,
}

impl BusState {
    fn answer(&mut self, query: &[u8]) {
        self.queries.push(query[0]);
        if !check_crc(query) {
            return;
        }
        let Some(meter) = self.meters.get_mut(&query[0]) else {
            return;
        };

        let reply = match meter.behavior {
            MeterBehavior::Silent => return,
            MeterBehavior::Normal => {
                meter.reading.energy = meter.reading.energy.wrapping_add(meter.energy_step);
                encode_reply(&meter.reading)
            }
            MeterBehavior::Garbled => {
                let mut frame = encode_reply(&meter.reading);
                if let Some(last) = frame.last_mut() {
                    *last ^= 0x5A;
                }
                frame
            }
            MeterBehavior::Exception(code) => {
                let mut frame = vec![meter.reading.address, query[1] | 0x80, code];
                append_crc(&mut frame);
                frame
            }
        };

        self.rx_buffer.extend(reply);
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// Simulated bus shared between the poller (as transport) and the test or simulator.
#[derive(Clone, Default)]
pub struct MockRtuBus {
    inner: Arc<Mutex<BusState>>,
}

impl MockRtuBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with one loaded meter per address, each counting `energy_step` Wh per query.
    pub fn simulated(addresses: &[u8], energy_step: u32) -> Self {
        let bus = MockRtuBus::new();
        for &address in addresses {
            bus.add_meter(MockMeter::loaded(address, 0).with_energy_step(energy_step));
        }
        bus
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_meter(&self, meter: MockMeter) {
        self.state().meters.insert(meter.reading.address, meter);
    }

    pub fn set_behavior(&self, address: u8, behavior: MeterBehavior) {
        if let Some(meter) = self.state().meters.get_mut(&address) {
            meter.behavior = behavior;
        }
    }

    pub fn set_energy(&self, address: u8, energy: u32) {
        if let Some(meter) = self.state().meters.get_mut(&address) {
            meter.reading.energy = energy;
        }
    }

    /// Queue raw bytes to be read by the poller, regardless of any query.
    pub fn queue_rx_data(&self, data: &[u8]) {
        let mut state = self.state();
        state.rx_buffer.extend(data);
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
    }

    /// Every byte written to the bus so far.
    pub fn get_tx_data(&self) -> Vec<u8> {
        self.state().tx_buffer.clone()
    }

    /// Addresses of the queries seen so far, in order.
    pub fn queried_addresses(&self) -> Vec<u8> {
        self.state().queries.clone()
    }

    /// Set an error to be returned on the next read or write.
    pub fn set_next_error(&self, error: io::Error) {
        self.state().next_error = Some(error);
    }
}

impl RtuTransport for MockRtuBus {
    fn discard_input(&mut self) -> io::Result<()> {
        self.state().rx_buffer.clear();
        Ok(())
    }
}

impl AsyncRead for MockRtuBus {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.state();
        if let Some(error) = state.next_error.take() {
            return Poll::Ready(Err(error));
        }

        if state.rx_buffer.is_empty() {
            state.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let available = state.rx_buffer.len().min(buf.remaining());
        let data: Vec<u8> = state.rx_buffer.drain(..available).collect();
        buf.put_slice(&data);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockRtuBus {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state();
        if let Some(error) = state.next_error.take() {
            return Poll::Ready(Err(error));
        }

        state.tx_buffer.extend_from_slice(buf);
        state.pending_query.extend_from_slice(buf);
        while state.pending_query.len() >= QUERY_FRAME_LEN {
            let query: Vec<u8> = state.pending_query.drain(..QUERY_FRAME_LEN).collect();
            state.answer(&query);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
