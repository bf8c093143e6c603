//! # biogas-iot - Field Appliance for Biogas Carbon Credits
//!
//! The biogas-iot crate meters the AC energy produced by a biogas generator, turns the
//! accumulated energy into a carbon-credit claim and submits signed observations to a
//! remote ledger.
//!
//! ## Features
//!
//! - Modbus-RTU codec for energy meters (read input registers, CRC16/Modbus)
//! - Round-robin polling of up to three meters on one bus, recovered by a watchdog
//! - Tamper-evident, signed checkpoints with an append-only audit log
//! - Power-meter, GPS and thermocouple sensors reporting time-bounded indicators
//! - Methane and cook-stove accounting methodologies with nonce-based epochs
//! - Simulated meter bus for running without hardware
//!
//! ## Usage
//!
//! ```rust
//! use biogas_iot::modbus::{decode_reply, encode_query};
//!
//! let query = encode_query(0x02, 0x04, 0x0000, 0x000a);
//! assert_eq!(query, [0x02, 0x04, 0x00, 0x00, 0x00, 0x0a, 0x70, 0x3e]);
//!
//! let reply = hex::decode("010414089803e80000089800000000000001f40064000063ce").unwrap();
//! let reading = decode_reply(&reply).unwrap();
//! assert_eq!(reading.voltage, 220.0);
//! ```

pub mod appliance;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod methodology;
pub mod modbus;
pub mod poller;
pub mod sensors;
pub mod util;
pub mod watchdog;

pub use crate::error::{FrameError, IotError};
pub use crate::logging::{init_logger, log_info};

pub use checkpoint::{Checkpoint, CheckpointStore, SignedRecord};
pub use config::{AppConfig, SensorSettings};
pub use identity::{DeviceKey, Ed25519Verifier, Signer, Verifier};
pub use methodology::{MethaneMethodology, MethodCheckpoint, MethodologyKind, MintOutcome};
pub use modbus::{MeterReading, MockRtuBus, RtuTransport};
pub use poller::{MeterSnapshot, Phase, PollerMachine, PowerMeterPoller};
pub use sensors::{Indicator, MetricEvent, Sensor, SensorKind, SensorTask};
pub use watchdog::Watchdog;
