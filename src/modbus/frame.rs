//! # Modbus-RTU Frame Codec
//!
//! Encodes read-input-register queries and decodes the fixed 25-byte reply returned by
//! the PZEM-style energy meters on the bus. Only function 0x04 with ten input registers
//! is supported.
//!
//! Query frame (8 bytes):
//! `[address][0x04][start_hi][start_lo][count_hi][count_lo][crc_lo][crc_hi]`
//!
//! Reply frame (25 bytes):
//! `[address][0x04][0x14][10 x u16 big-endian registers][crc_lo][crc_hi]`
//!
//! Register map of the reply:
//!
//! | Register | Offset | Meaning                      | Unit  |
//! |----------|--------|------------------------------|-------|
//! | 0x00     | 3      | voltage                      | 0.1 V |
//! | 0x01/02  | 5/7    | current (low / high word)    | 1 mA  |
//! | 0x03/04  | 9/11   | power (low / high word)      | 0.1 W |
//! | 0x05/06  | 13/15  | energy (low / high word)     | 1 Wh  |
//! | 0x07     | 17     | frequency                    | 0.1 Hz|
//! | 0x08     | 19     | power factor                 | 0.01  |
//! | 0x09     | 21     | alarm (0xFFFF = alarm)       |       |

use crate::error::FrameError;
use crate::modbus::crc::{append_crc, check_crc};
use nom::multi::count;
use nom::number::complete::be_u16;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// Function code for "read input registers".
pub const FUNCTION_READ_INPUT_REGISTERS: u8 = 0x04;

/// Length of every query frame sent by the poller.
pub const QUERY_FRAME_LEN: usize = 8;

/// Length of a valid read-input-registers reply.
pub const REPLY_FRAME_LEN: usize = 25;

/// Number of input registers requested from each meter.
pub const REPLY_REGISTER_COUNT: usize = 10;

/// First register of the measurement block.
pub const MEASUREMENT_START_REGISTER: u16 = 0x0000;

const REPLY_HEADER_LEN: usize = 3;
const ALARM_ACTIVE: u16 = 0xFFFF;

/// One decoded measurement set from a single meter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterReading {
    /// RTU address of the replying device.
    pub address: u8,
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Cumulative energy in watt-hours.
    pub energy: u32,
    /// Hertz.
    pub frequency: f64,
    /// Power factor, 0..=1.
    pub power_factor: f64,
    /// Set when the meter's alarm register reads 0xFFFF.
    pub alarm: bool,
}

impl MeterReading {
    /// Builds a reading from the ten raw input registers.
    pub fn from_registers(address: u8, regs: &[u16; REPLY_REGISTER_COUNT]) -> Self {
        MeterReading {
            address,
            voltage: f64::from(regs[0]) / 10.0,
            current: f64::from(join_words(regs[2], regs[1])) / 1000.0,
            power: f64::from(join_words(regs[4], regs[3])) / 10.0,
            energy: join_words(regs[6], regs[5]),
            frequency: f64::from(regs[7]) / 10.0,
            power_factor: f64::from(regs[8]) / 100.0,
            alarm: regs[9] == ALARM_ACTIVE,
        }
    }

    /// Converts the reading back into its raw register block.
    pub fn to_registers(&self) -> [u16; REPLY_REGISTER_COUNT] {
        let current = scale_u32(self.current, 1000.0);
        let power = scale_u32(self.power, 10.0);
        [
            scale_u16(self.voltage, 10.0),
            (current & 0xFFFF) as u16,
            (current >> 16) as u16,
            (power & 0xFFFF) as u16,
            (power >> 16) as u16,
            (self.energy & 0xFFFF) as u16,
            (self.energy >> 16) as u16,
            scale_u16(self.frequency, 10.0),
            scale_u16(self.power_factor, 100.0),
            if self.alarm { ALARM_ACTIVE } else { 0x0000 },
        ]
    }
}

/// Reassembles a 32-bit register pair without sign extension.
fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn scale_u16(value: f64, factor: f64) -> u16 {
    (value * factor).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn scale_u32(value: f64, factor: f64) -> u32 {
    (value * factor).round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Encodes an 8-byte query frame with its CRC trailer.
pub fn encode_query(
    address: u8,
    function_code: u8,
    start_register: u16,
    register_count: u16,
) -> [u8; QUERY_FRAME_LEN] {
    let mut frame = Vec::with_capacity(QUERY_FRAME_LEN);
    frame.push(address);
    frame.push(function_code);
    frame.extend_from_slice(&start_register.to_be_bytes());
    frame.extend_from_slice(&register_count.to_be_bytes());
    append_crc(&mut frame);

    let mut out = [0u8; QUERY_FRAME_LEN];
    out.copy_from_slice(&frame);
    out
}

/// Query asking the meter at `address` for its full measurement block.
pub fn measurement_query(address: u8) -> [u8; QUERY_FRAME_LEN] {
    encode_query(
        address,
        FUNCTION_READ_INPUT_REGISTERS,
        MEASUREMENT_START_REGISTER,
        REPLY_REGISTER_COUNT as u16,
    )
}

/// Encodes the 25-byte reply a meter would send for `reading`.
pub fn encode_reply(reading: &MeterReading) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REPLY_FRAME_LEN);
    frame.push(reading.address);
    frame.push(FUNCTION_READ_INPUT_REGISTERS);
    frame.push((REPLY_REGISTER_COUNT * 2) as u8);
    for reg in reading.to_registers() {
        frame.extend_from_slice(&reg.to_be_bytes());
    }
    append_crc(&mut frame);
    frame
}

fn parse_registers(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    count(be_u16, REPLY_REGISTER_COUNT)(input)
}

/// Validates and decodes a read-input-registers reply.
///
/// Checks run in a fixed order: CRC, function code, total length, register count.
pub fn decode_reply(frame: &[u8]) -> Result<MeterReading, FrameError> {
    if !check_crc(frame) {
        return Err(FrameError::CrcError);
    }

    // Two bytes can self-cancel the CRC; there is no header to read then.
    if frame.len() < REPLY_HEADER_LEN {
        return Err(FrameError::FrameLengthError {
            actual: frame.len(),
        });
    }

    let address = frame[0];
    let function = frame[1];
    if function != FUNCTION_READ_INPUT_REGISTERS {
        return Err(FrameError::DeviceErrorResponse {
            function,
            code: frame[2],
        });
    }

    if frame.len() != REPLY_FRAME_LEN {
        return Err(FrameError::FrameLengthError {
            actual: frame.len(),
        });
    }

    let registers = usize::from(frame[2]) / 2;
    if registers != REPLY_REGISTER_COUNT {
        return Err(FrameError::RegisterCountError { registers });
    }

    let (_, words) = parse_registers(&frame[REPLY_HEADER_LEN..REPLY_FRAME_LEN - 2]).map_err(
        |_| FrameError::FrameLengthError {
            actual: frame.len(),
        },
    )?;
    let mut regs = [0u16; REPLY_REGISTER_COUNT];
    regs.copy_from_slice(&words);

    Ok(MeterReading::from_registers(address, &regs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_words_has_no_sign_extension() {
        assert_eq!(join_words(0xFFFF, 0xFFFF), u32::MAX);
        assert_eq!(join_words(0x8000, 0x0000), 0x8000_0000);
    }

    #[test]
    fn test_measurement_query_matches_wire_bytes() {
        assert_eq!(
            measurement_query(0x01),
            [0x01, 0x04, 0x00, 0x00, 0x00, 0x0a, 0x70, 0x0d]
        );
        assert_eq!(
            measurement_query(0x03),
            [0x03, 0x04, 0x00, 0x00, 0x00, 0x0a, 0x71, 0xef]
        );
    }

    #[test]
    fn test_two_byte_self_cancelling_frame() {
        // 0xFFFF register with trailer FF FF checksums to zero.
        assert!(check_crc(&[0xFF, 0xFF]));
        assert_eq!(
            decode_reply(&[0xFF, 0xFF]),
            Err(FrameError::FrameLengthError { actual: 2 })
        );
    }

    #[test]
    fn test_exception_reply() {
        let mut frame = vec![0x01, 0x84, 0x02];
        append_crc(&mut frame);
        assert_eq!(
            decode_reply(&frame),
            Err(FrameError::DeviceErrorResponse {
                function: 0x84,
                code: 0x02
            })
        );
    }

    #[test]
    fn test_large_current_keeps_high_word() {
        let reading = MeterReading {
            address: 2,
            current: 70_000.0,
            ..Default::default()
        };
        let decoded = decode_reply(&encode_reply(&reading)).unwrap();
        assert_eq!(decoded.current, 70_000.0);
    }
}
