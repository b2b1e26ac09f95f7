//! ==============================================================================
//! crc.rs - CRC-16/MODBUS
//! ==============================================================================
//!
//! purpose:
//!     checksum carried by every Modbus RTU frame.
//!     reflected polynomial 0xA001, seed 0xFFFF, appended low byte first.
//!
//! relationships:
//!     - used by: modbus.rs (request encoding, response validation)
//!     - used by: hal.rs (mock level transmitter replies)
//!
//! ==============================================================================

const SEED: u16 = 0xFFFF;
const POLY: u16 = 0xA001;

/// Modbus RTU CRC over `data`. Empty input yields the seed.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = SEED;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` to itself, low byte first as RTU puts it on the wire.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}
