//! ==============================================================================
//! error.rs - error taxonomy for the acquisition and protocol layer
//! ==============================================================================
//!
//! purpose:
//!     typed failures for every component that can go wrong at runtime.
//!     none of these are fatal: the sensor aggregator catches all of them
//!     and substitutes fallback values.
//!
//! relationships:
//!     - ProtocolError: produced by modbus.rs (frame validation)
//!     - TransportError: produced by rs485.rs (serial line / direction pin)
//!     - LinkError: produced by link.rs (controller TCP/HTTP)
//!     - SensorError: produced by hal.rs drivers, and wraps the two bus
//!       errors when the level sensor read fails
//!
//! ==============================================================================

use thiserror::Error;

/// Modbus RTU response validation failures, in the order they are checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short: got {received} bytes, need at least {minimum}")]
    ShortFrame { received: usize, minimum: usize },

    #[error("slave address mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    AddressMismatch { expected: u8, received: u8 },

    #[error("function code mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    FunctionMismatch { expected: u8, received: u8 },

    #[error("length mismatch: byte count {byte_count} needs {needed} bytes, received {received}")]
    LengthMismatch {
        byte_count: u8,
        needed: usize,
        received: usize,
    },

    #[error("CRC mismatch: received 0x{received:04X}, calculated 0x{calculated:04X}")]
    CrcMismatch { received: u16, calculated: u16 },

    #[error("payload holds {available} bytes, a register needs 2")]
    MissingRegister { available: usize },
}

/// Serial line or direction-control failure on the RS-485 bus.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("serial read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("direction pin: {0}")]
    Direction(String),
}

/// Controller link failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("controller unavailable (disconnected, reconnect throttled)")]
    Unavailable,

    #[error("controller I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("controller rejected request: {0}")]
    Rejected(String),

    #[error("malformed controller response: {0}")]
    MalformedResponse(String),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A sensor read that produced no usable value.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("driver failure: {0}")]
    Driver(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SensorError {
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_names_expected_and_received() {
        let e = ProtocolError::AddressMismatch { expected: 0x01, received: 0x02 };
        assert_eq!(
            e.to_string(),
            "slave address mismatch: expected 0x01, received 0x02"
        );

        let e = ProtocolError::CrcMismatch { received: 0x1234, calculated: 0xCBC5 };
        assert!(e.to_string().contains("0x1234"));
        assert!(e.to_string().contains("0xCBC5"));
    }

    #[test]
    fn test_sensor_error_wraps_bus_errors() {
        let e: SensorError = ProtocolError::ShortFrame { received: 0, minimum: 5 }.into();
        assert!(matches!(e, SensorError::Protocol(ProtocolError::ShortFrame { .. })));
        assert_eq!(e.to_string(), "frame too short: got 0 bytes, need at least 5");
    }
}
