//! # Modbus-RTU Serial Transport
//!
//! This module provides the byte-stream transport used by the poller: a small trait over
//! tokio's `AsyncRead`/`AsyncWrite` so the poller can drive either a real serial port or
//! the in-process [`MockRtuBus`](crate::modbus::serial_mock::MockRtuBus), plus the helpers
//! that send a query and collect one reply frame.
//!
//! RTU has no start/stop delimiters; a frame ends when the line stays silent. The reader
//! therefore takes whatever arrives first and keeps appending until no byte shows up for
//! the configured silence window.

use crate::error::IotError;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};

const READ_CHUNK: usize = 64;

/// Upper bound on one collected frame; anything longer is line noise.
pub const MAX_FRAME_BYTES: usize = 256;

/// Trait for the bus the poller owns exclusively.
#[async_trait::async_trait]
pub trait RtuTransport: AsyncRead + AsyncWrite + Unpin + Send {
    async fn flush_frame(&mut self) -> Result<(), io::Error> {
        AsyncWriteExt::flush(self).await
    }

    /// Drops every received byte not yet read, so the next reply starts on a clean line.
    fn discard_input(&mut self) -> Result<(), io::Error>;
}

impl RtuTransport for tokio_serial::SerialStream {
    fn discard_input(&mut self) -> Result<(), io::Error> {
        SerialPort::clear(self, ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Configuration for the serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyAMA0".to_string(),
            baudrate: 9600,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Opens the meter bus: 8 data bits, no parity, one stop bit.
pub fn open_serial(config: &SerialConfig) -> Result<tokio_serial::SerialStream, IotError> {
    let port = tokio_serial::new(&config.port, config.baudrate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .timeout(config.timeout)
        .open_native_async()?;
    Ok(port)
}

/// Writes a complete query frame and flushes it onto the line.
pub async fn send_query<T: RtuTransport>(transport: &mut T, frame: &[u8]) -> Result<(), IotError> {
    transport
        .write_all(frame)
        .await
        .map_err(|e| IotError::SerialPort(e.to_string()))?;
    transport
        .flush_frame()
        .await
        .map_err(|e| IotError::SerialPort(e.to_string()))
}

/// Reads one frame: waits for the first bytes, then gathers until `silence` elapses
/// without further data.
///
/// Cancelling this future after bytes have arrived drops them, and whatever the meter
/// sends afterwards stays in the receive buffer. Callers must
/// [`discard_input`](RtuTransport::discard_input) before the next query.
pub async fn read_frame<T: RtuTransport>(
    transport: &mut T,
    silence: Duration,
) -> Result<Vec<u8>, IotError> {
    let mut buf = BytesMut::with_capacity(MAX_FRAME_BYTES);
    let mut chunk = [0u8; READ_CHUNK];

    let n = transport
        .read(&mut chunk)
        .await
        .map_err(|e| IotError::SerialPort(e.to_string()))?;
    if n == 0 {
        return Err(IotError::SerialPort("serial line closed".into()));
    }
    buf.extend_from_slice(&chunk[..n]);

    while buf.len() < MAX_FRAME_BYTES {
        match tokio::time::timeout(silence, transport.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(IotError::SerialPort(e.to_string())),
        }
    }

    Ok(buf.to_vec())
}
