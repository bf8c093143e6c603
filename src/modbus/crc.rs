//! # CRC16/Modbus
//!
//! Reflected CRC-16 with polynomial 0xA001 and initial register 0xFFFF, as used by
//! Modbus-RTU. The result is returned byte-swapped so that `to_be_bytes()` yields the
//! on-wire trailer order (`crc_lo`, `crc_hi`).
//!
//! A frame that already carries its trailer checksums to zero, which is what
//! [`check_crc`] relies on.
//!
//! ```rust
//! use biogas_iot::modbus::crc::{append_crc, check_crc, crc16_modbus};
//!
//! let mut query = vec![0x02, 0x04, 0x00, 0x00, 0x00, 0x0a];
//! assert_eq!(crc16_modbus(&query), 0x703e);
//! append_crc(&mut query);
//! assert!(check_crc(&query));
//! ```

const CRC16_MODBUS_POLY: u16 = 0xA001;
const CRC16_MODBUS_INIT: u16 = 0xFFFF;

/// Computes the CRC16/Modbus of `data`, byte-swapped for big-endian emission.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc = CRC16_MODBUS_INIT;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.swap_bytes()
}

/// Returns `true` when `frame` (including its two trailer bytes) self-validates.
pub fn check_crc(frame: &[u8]) -> bool {
    crc16_modbus(frame) == 0
}

/// Appends the two CRC trailer bytes to `frame`.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_be_bytes());
}
