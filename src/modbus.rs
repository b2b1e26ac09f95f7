//! ==============================================================================
//! modbus.rs - Modbus RTU frame codec (read holding registers)
//! ==============================================================================
//!
//! purpose:
//!     builds the 8-byte "read holding registers" request and validates the
//!     slave's reply before any register value is trusted.
//!
//! wire format:
//!     request  = slave | 0x03 | reg_hi | reg_lo | count_hi | count_lo | crc_lo | crc_hi
//!     response = slave | func | byte_count | data[byte_count] | crc_lo | crc_hi
//!
//! relationships:
//!     - uses: crc.rs
//!     - used by: sensors.rs (level sensor), rs485.rs carries the bytes
//!
//! ==============================================================================

use crate::crc::crc16;
use crate::error::ProtocolError;

/// Function code 0x03: read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Smallest possible response: slave, func, byte_count, crc_lo, crc_hi.
pub const MIN_RESPONSE_LEN: usize = 5;

/// QDY30A-B holding register carrying the liquid level in millimetres.
/// (0x0006 temperature, 0x0008 battery and 0x000A status are not polled.)
pub const WATER_LEVEL_REGISTER: u16 = 0x0004;

/// A fully encoded read request. Built once and reused for every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusRequestFrame {
    pub slave_address: u8,
    pub function_code: u8,
    pub register_address: u16,
    pub register_count: u16,
    pub crc: u16,
}

impl ModbusRequestFrame {
    /// Wire bytes, CRC low byte first.
    pub fn to_bytes(&self) -> [u8; 8] {
        let [reg_hi, reg_lo] = self.register_address.to_be_bytes();
        let [cnt_hi, cnt_lo] = self.register_count.to_be_bytes();
        let [crc_lo, crc_hi] = self.crc.to_le_bytes();
        [
            self.slave_address,
            self.function_code,
            reg_hi,
            reg_lo,
            cnt_hi,
            cnt_lo,
            crc_lo,
            crc_hi,
        ]
    }
}

/// Build a "read holding registers" request.
pub fn build_read_request(
    slave_address: u8,
    register_address: u16,
    register_count: u16,
) -> ModbusRequestFrame {
    let mut head = Vec::with_capacity(8);
    head.push(slave_address);
    head.push(READ_HOLDING_REGISTERS);
    head.extend_from_slice(&register_address.to_be_bytes());
    head.extend_from_slice(&register_count.to_be_bytes());

    ModbusRequestFrame {
        slave_address,
        function_code: READ_HOLDING_REGISTERS,
        register_address,
        register_count,
        crc: crc16(&head),
    }
}

/// A reply that passed every validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponseFrame {
    pub slave_address: u8,
    pub function_code: u8,
    pub byte_count: u8,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl ModbusResponseFrame {
    /// First holding register, big-endian.
    pub fn first_register(&self) -> Result<u16, ProtocolError> {
        match self.payload.as_slice() {
            [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ProtocolError::MissingRegister {
                available: self.payload.len(),
            }),
        }
    }

    /// Water level register (millimetres) converted to metres.
    pub fn water_level_meters(&self) -> Result<f32, ProtocolError> {
        Ok(f32::from(self.first_register()?) / 1000.0)
    }
}

/// Validate a raw reply from `expected_slave` and split out its payload.
///
/// Checks run in a fixed order so each corruption maps to exactly one error.
pub fn parse_response(expected_slave: u8, raw: &[u8]) -> Result<ModbusResponseFrame, ProtocolError> {
    if raw.len() < MIN_RESPONSE_LEN {
        return Err(ProtocolError::ShortFrame {
            received: raw.len(),
            minimum: MIN_RESPONSE_LEN,
        });
    }

    if raw[0] != expected_slave {
        return Err(ProtocolError::AddressMismatch {
            expected: expected_slave,
            received: raw[0],
        });
    }

    if raw[1] != READ_HOLDING_REGISTERS {
        return Err(ProtocolError::FunctionMismatch {
            expected: READ_HOLDING_REGISTERS,
            received: raw[1],
        });
    }

    let byte_count = raw[2];
    let needed = usize::from(byte_count) + MIN_RESPONSE_LEN;
    if raw.len() < needed {
        return Err(ProtocolError::LengthMismatch {
            byte_count,
            needed,
            received: raw.len(),
        });
    }

    let (body, tail) = raw.split_at(raw.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let calculated = crc16(body);
    if calculated != received {
        return Err(ProtocolError::CrcMismatch { received, calculated });
    }

    let start = 3;
    Ok(ModbusResponseFrame {
        slave_address: raw[0],
        function_code: raw[1],
        byte_count,
        payload: raw[start..start + usize::from(byte_count)].to_vec(),
        crc: received,
    })
}

/// Encode a well-formed reply. Only the test doubles on the bus side need this.
#[cfg(test)]
pub fn encode_response(slave_address: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![slave_address, READ_HOLDING_REGISTERS, payload.len() as u8];
    frame.extend_from_slice(payload);
    crate::crc::append_crc(&mut frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::append_crc;

    #[test]
    fn test_water_level_request_bytes() {
        let req = build_read_request(0x01, WATER_LEVEL_REGISTER, 0x0001);
        assert_eq!(req.to_bytes(), [0x01, 0x03, 0x00, 0x04, 0x00, 0x01, 0xC5, 0xCB]);
        assert_eq!(req.crc, 0xCBC5);
        assert_eq!(req.function_code, READ_HOLDING_REGISTERS);
    }

    #[test]
    fn test_request_encodes_wide_fields_big_endian() {
        let bytes = build_read_request(0x11, 0x1234, 0x0102).to_bytes();
        assert_eq!(&bytes[..6], &[0x11, 0x03, 0x12, 0x34, 0x01, 0x02]);
        assert_eq!(crc16(&bytes), 0x0000);
    }

    #[test]
    fn test_parse_level_reply() {
        let raw = [0x01, 0x03, 0x02, 0x05, 0xDC, 0xBA, 0x8D];
        let frame = parse_response(0x01, &raw).unwrap();
        assert_eq!(frame.byte_count, 2);
        assert_eq!(frame.payload, vec![0x05, 0xDC]);
        assert_eq!(frame.crc, 0x8DBA);
        assert_eq!(frame.first_register().unwrap(), 1500);
        assert!((frame.water_level_meters().unwrap() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_short_frame() {
        let err = parse_response(0x01, &[0x01, 0x03, 0x02, 0x05]).unwrap_err();
        assert_eq!(err, ProtocolError::ShortFrame { received: 4, minimum: 5 });
        assert!(matches!(parse_response(0x01, &[]), Err(ProtocolError::ShortFrame { .. })));
    }

    #[test]
    fn test_address_mismatch() {
        let raw = encode_response(0x02, &[0x05, 0xDC]);
        let err = parse_response(0x01, &raw).unwrap_err();
        assert_eq!(err, ProtocolError::AddressMismatch { expected: 0x01, received: 0x02 });
    }

    #[test]
    fn test_function_mismatch() {
        // exception reply: function code with the high bit set
        let mut raw = vec![0x01, 0x83, 0x02];
        append_crc(&mut raw);
        let err = parse_response(0x01, &raw).unwrap_err();
        assert_eq!(err, ProtocolError::FunctionMismatch { expected: 0x03, received: 0x83 });
    }

    #[test]
    fn test_length_mismatch() {
        // declares 4 data bytes, only 2 arrive before the CRC
        let raw = [0x01, 0x03, 0x04, 0x05, 0xDC, 0xBA, 0x8D];
        let err = parse_response(0x01, &raw).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::LengthMismatch { byte_count: 4, needed: 9, received: 7 }
        );
    }

    #[test]
    fn test_crc_mismatch() {
        let mut raw = encode_response(0x01, &[0x05, 0xDC]);
        raw[4] ^= 0xFF;
        let err = parse_response(0x01, &raw).unwrap_err();
        assert!(matches!(err, ProtocolError::CrcMismatch { received: 0x8DBA, .. }));
    }

    #[test]
    fn test_reply_without_register_data() {
        let raw = encode_response(0x01, &[0x05]);
        let frame = parse_response(0x01, &raw).unwrap();
        assert_eq!(
            frame.water_level_meters().unwrap_err(),
            ProtocolError::MissingRegister { available: 1 }
        );
    }
}
