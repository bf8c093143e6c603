//! The modbus module contains the components responsible for talking to the energy
//! meters: CRC, frame encoding/decoding, and the serial transport.

pub mod crc;
pub mod frame;
pub mod serial;
pub mod serial_mock;

pub use crc::{append_crc, check_crc, crc16_modbus};
pub use frame::{
    decode_reply, encode_query, encode_reply, measurement_query, MeterReading,
    FUNCTION_READ_INPUT_REGISTERS, QUERY_FRAME_LEN, REPLY_FRAME_LEN, REPLY_REGISTER_COUNT,
};
pub use serial::{open_serial, read_frame, send_query, RtuTransport, SerialConfig};
pub use serial_mock::{MeterBehavior, MockMeter, MockRtuBus};
