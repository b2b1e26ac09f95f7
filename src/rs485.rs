//! ==============================================================================
//! rs485.rs - half-duplex RS-485 transport
//! ==============================================================================
//!
//! purpose:
//!     moves one Modbus request across the bus and collects whatever the
//!     slave has put on the line after a fixed settle time.
//!
//! turnaround sequence (one request in flight, ever):
//!     discard stale rx -> DE high -> guard -> write -> DE low -> settle -> read
//!
//!     without a DE pin the direction steps are skipped and the bus is taken
//!     to be full-duplex or externally arbitrated.
//!
//! relationships:
//!     - uses: hal.rs (SerialLine, DirectionPin)
//!     - used by: sensors.rs (ModbusLevelSensor)
//!
//! ==============================================================================

use crate::error::TransportError;
use crate::hal::{DirectionPin, SerialLine};
use std::time::Duration;

/// Bus timing. Defaults suit a 9600 baud QDY30A-B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turnaround {
    /// after asserting transmit, before the first byte
    pub guard: Duration,
    /// after releasing the bus, before reading the reply
    pub settle: Duration,
}

impl Default for Turnaround {
    fn default() -> Self {
        Self {
            guard: Duration::from_millis(10),
            settle: Duration::from_millis(100),
        }
    }
}

pub struct Rs485Transport {
    serial: Box<dyn SerialLine>,
    direction: Option<Box<dyn DirectionPin>>,
    timing: Turnaround,
    sleep: fn(Duration),
}

impl Rs485Transport {
    /// Takes ownership of the line and parks the transceiver in receive mode.
    pub fn new(
        serial: Box<dyn SerialLine>,
        mut direction: Option<Box<dyn DirectionPin>>,
        timing: Turnaround,
    ) -> Result<Self, TransportError> {
        if let Some(pin) = direction.as_mut() {
            pin.set_transmit(false)
                .map_err(|e| TransportError::Direction(e.to_string()))?;
        }
        Ok(Self {
            serial,
            direction,
            timing,
            sleep: std::thread::sleep,
        })
    }

    #[cfg(test)]
    fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Send `frame` and return the raw bytes available after the settle time.
    ///
    /// The reply may be empty, partial or complete; it is not retried here.
    pub fn transact(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let stale = self.serial.read_available().map_err(TransportError::Read)?;
        if !stale.is_empty() {
            tracing::debug!("[RS485] Dropped {} stale bytes: {}", stale.len(), hex::encode(&stale));
        }
        self.serial.discard_input().map_err(TransportError::Read)?;

        self.set_direction(true)?;
        let written = self.serial.write(frame);
        // release the bus even when the write failed
        let released = self.set_direction(false);

        let written = written.map_err(TransportError::Write)?;
        released?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        tracing::trace!("[RS485] TX {}", hex::encode(frame));

        (self.sleep)(self.timing.settle);

        let reply = self.serial.read_available().map_err(TransportError::Read)?;
        tracing::trace!("[RS485] RX {} ({} bytes)", hex::encode(&reply), reply.len());
        Ok(reply)
    }

    fn set_direction(&mut self, transmit: bool) -> Result<(), TransportError> {
        let Some(pin) = self.direction.as_mut() else {
            return Ok(());
        };
        pin.set_transmit(transmit)
            .map_err(|e| TransportError::Direction(e.to_string()))?;
        if transmit {
            (self.sleep)(self.timing.guard);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    /// Everything that happened on the fake bus, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum BusEvent {
        Discard,
        Direction(bool),
        Write(Vec<u8>),
        Read(usize),
    }

    pub type BusLog = Rc<RefCell<Vec<BusEvent>>>;

    /// Serial double: each `read_available` pops the next queued chunk.
    pub struct FakeSerial {
        pub log: BusLog,
        pub reads: VecDeque<Vec<u8>>,
        pub fail_write: bool,
    }

    impl SerialLine for FakeSerial {
        fn discard_input(&mut self) -> io::Result<()> {
            self.log.borrow_mut().push(BusEvent::Discard);
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "uart gone"));
            }
            self.log.borrow_mut().push(BusEvent::Write(data.to_vec()));
            Ok(data.len())
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            let chunk = self.reads.pop_front().unwrap_or_default();
            self.log.borrow_mut().push(BusEvent::Read(chunk.len()));
            Ok(chunk)
        }
    }

    pub struct FakePin {
        pub log: BusLog,
    }

    impl DirectionPin for FakePin {
        fn set_transmit(&mut self, transmit: bool) -> anyhow::Result<()> {
            self.log.borrow_mut().push(BusEvent::Direction(transmit));
            Ok(())
        }
    }

    fn no_sleep(_: Duration) {}

    pub fn fake_transport(reads: Vec<Vec<u8>>, with_pin: bool) -> (Rs485Transport, BusLog) {
        let log: BusLog = Rc::default();
        let serial = FakeSerial {
            log: log.clone(),
            reads: reads.into(),
            fail_write: false,
        };
        let pin = with_pin.then(|| Box::new(FakePin { log: log.clone() }) as Box<dyn DirectionPin>);
        let transport = Rs485Transport::new(Box::new(serial), pin, Turnaround::default())
            .unwrap()
            .with_sleep(no_sleep);
        log.borrow_mut().clear();
        (transport, log)
    }

    #[test]
    fn test_turnaround_order_with_pin() {
        let stale = vec![0xAA, 0xBB];
        let reply = vec![0x01, 0x03, 0x02, 0x05, 0xDC, 0xBA, 0x8D];
        let (mut t, log) = fake_transport(vec![stale, reply.clone()], true);

        let request = [0x01, 0x03, 0x00, 0x04, 0x00, 0x01, 0xC5, 0xCB];
        assert_eq!(t.transact(&request).unwrap(), reply);

        assert_eq!(
            *log.borrow(),
            vec![
                BusEvent::Read(2),
                BusEvent::Discard,
                BusEvent::Direction(true),
                BusEvent::Write(request.to_vec()),
                BusEvent::Direction(false),
                BusEvent::Read(7),
            ]
        );
    }

    #[test]
    fn test_no_pin_skips_direction() {
        let (mut t, log) = fake_transport(vec![vec![], vec![0x01]], false);
        assert_eq!(t.transact(&[0x01, 0x03]).unwrap(), vec![0x01]);
        assert!(!log.borrow().iter().any(|e| matches!(e, BusEvent::Direction(_))));
    }

    #[test]
    fn test_silent_slave_returns_empty() {
        let (mut t, _) = fake_transport(vec![], true);
        assert!(t.transact(&[0x01]).unwrap().is_empty());
    }

    #[test]
    fn test_new_parks_pin_in_receive() {
        let log: BusLog = Rc::default();
        let serial = FakeSerial { log: log.clone(), reads: VecDeque::new(), fail_write: false };
        let pin = FakePin { log: log.clone() };
        Rs485Transport::new(Box::new(serial), Some(Box::new(pin)), Turnaround::default()).unwrap();
        assert_eq!(*log.borrow(), vec![BusEvent::Direction(false)]);
    }

    #[test]
    fn test_write_failure_releases_bus() {
        let log: BusLog = Rc::default();
        let serial = FakeSerial { log: log.clone(), reads: VecDeque::new(), fail_write: true };
        let pin = FakePin { log: log.clone() };
        let mut t = Rs485Transport::new(Box::new(serial), Some(Box::new(pin)), Turnaround::default())
            .unwrap()
            .with_sleep(no_sleep);

        let err = t.transact(&[0x01]).unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
        assert_eq!(log.borrow().last(), Some(&BusEvent::Direction(false)));
    }
}
