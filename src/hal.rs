//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the station's peripherals: the RS-485
//!     UART, its DE/RE direction line, two MAX31855 thermocouple amplifiers
//!     and the DHT22. abstracts away the difference between running on a real
//!     Raspberry Pi (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - mock build: a simulated level transmitter answers on the fake bus,
//!       so the whole station runs on a laptop.
//!     - hardware build: drivers call `rppal` directly, nothing in between.
//!     - the core only sees traits; drivers live here.
//!
//! relationships:
//!     - used by: rs485.rs (SerialLine, DirectionPin)
//!     - used by: sensors.rs (Thermocouple, ClimateSensor)
//!     - uses: rppal (on feature="hardware")
//!     - uses: std::process::Command (python DHT22 driver on hardware builds)
//!
//! ==============================================================================

use crate::config::StationConfig;
use crate::error::SensorError;
use std::io;

/// Byte-level access to the serial port behind the RS-485 transceiver.
pub trait SerialLine {
    /// Drop everything already sitting in the receive buffer.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Write `data`, returning once it has left the UART.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
    /// Non-blocking read of whatever is available right now (possibly nothing).
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

/// DE/RE line of a half-duplex transceiver.
pub trait DirectionPin {
    fn set_transmit(&mut self, transmit: bool) -> anyhow::Result<()>;
}

/// A thermocouple amplifier.
pub trait Thermocouple {
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

/// Combined temperature/humidity sensor. Returns (°C, %RH).
pub trait ClimateSensor {
    fn read(&mut self) -> Result<(f32, f32), SensorError>;
}

/// Everything the station talks to, opened once at startup.
pub struct Peripherals {
    pub thermocouple1: Box<dyn Thermocouple>,
    pub thermocouple2: Box<dyn Thermocouple>,
    pub climate: Box<dyn ClimateSensor>,
    pub serial: Box<dyn SerialLine>,
    pub direction: Option<Box<dyn DirectionPin>>,
}

// MAX31855 word layout: D31..D18 signed temperature (0.25 °C), D16 fault,
// D2 short to VCC, D1 short to GND, D0 open circuit.
const MAX31855_FAULT: u32 = 0x0001_0000;
const MAX31855_SCV: u32 = 0x0000_0004;
const MAX31855_SCG: u32 = 0x0000_0002;
const MAX31855_OC: u32 = 0x0000_0001;

/// Decode the 32-bit word clocked out of a MAX31855.
pub fn decode_max31855(raw: u32) -> Result<f32, SensorError> {
    if raw & (MAX31855_FAULT | MAX31855_SCV) != 0 {
        let kind = if raw & MAX31855_OC != 0 {
            "open circuit"
        } else if raw & MAX31855_SCG != 0 {
            "short to GND"
        } else if raw & MAX31855_SCV != 0 {
            "short to VCC"
        } else {
            "unspecified fault"
        };
        return Err(SensorError::driver(format!(
            "MAX31855 {} (raw 0x{:08X})",
            kind, raw
        )));
    }
    // arithmetic shift keeps the sign of the 14-bit field
    let counts = (raw as i32) >> 18;
    Ok(counts as f32 * 0.25)
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub use mock::open;

#[cfg(not(feature = "hardware"))]
mod mock {
    use super::*;
    use crate::modbus::READ_HOLDING_REGISTERS;

    /// Simulated level transmitter: answers every read request addressed to
    /// it with a fixed level, the way a QDY30A-B on a quiet bus would.
    pub struct MockSerial {
        slave_address: u8,
        level_mm: u16,
        pending: Vec<u8>,
    }

    impl SerialLine for MockSerial {
        fn discard_input(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            tracing::debug!("[MOCK UART] Write: {}", hex::encode(data));
            if data.len() == 8
                && data[0] == self.slave_address
                && data[1] == READ_HOLDING_REGISTERS
            {
                let mut reply = vec![self.slave_address, READ_HOLDING_REGISTERS, 2];
                reply.extend_from_slice(&self.level_mm.to_be_bytes());
                crate::crc::append_crc(&mut reply);
                self.pending = reply;
            }
            Ok(data.len())
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            Ok(std::mem::take(&mut self.pending))
        }
    }

    pub struct MockDirection {
        pin: u8,
    }

    impl DirectionPin for MockDirection {
        fn set_transmit(&mut self, transmit: bool) -> anyhow::Result<()> {
            tracing::trace!("[MOCK GPIO] Pin {} write {}", self.pin, transmit);
            Ok(())
        }
    }

    /// Emits a fixed MAX31855 word so the decode path runs in dev builds too.
    pub struct MockThermocouple {
        chip_select: u8,
        raw: u32,
    }

    impl Thermocouple for MockThermocouple {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            tracing::debug!("[MOCK SPI] CE{} read 0x{:08X}", self.chip_select, self.raw);
            decode_max31855(self.raw)
        }
    }

    pub struct MockClimate {
        pin: u8,
    }

    impl ClimateSensor for MockClimate {
        fn read(&mut self) -> Result<(f32, f32), SensorError> {
            tracing::debug!("[MOCK DHT22] Reading pin {}", self.pin);
            Ok((25.0, 50.0))
        }
    }

    pub fn open(config: &StationConfig) -> anyhow::Result<Peripherals> {
        tracing::info!("Using MOCK HAL (No hardware access)");
        // 41.25 °C and 63.5 °C in 0.25 °C counts
        let raw = |counts: i32| (counts << 18) as u32;
        Ok(Peripherals {
            thermocouple1: Box::new(MockThermocouple {
                chip_select: config.sensors.thermocouple1.chip_select,
                raw: raw(165),
            }),
            thermocouple2: Box::new(MockThermocouple {
                chip_select: config.sensors.thermocouple2.chip_select,
                raw: raw(254),
            }),
            climate: Box::new(MockClimate { pin: config.sensors.dht22.gpio_pin }),
            serial: Box::new(MockSerial {
                slave_address: config.rs485.slave_address,
                level_mm: 1200,
                pending: Vec::new(),
            }),
            direction: config
                .rs485
                .de_pin
                .map(|pin| Box::new(MockDirection { pin }) as Box<dyn DirectionPin>),
        })
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub use real::open;

#[cfg(feature = "hardware")]
mod real {
    use super::*;
    use anyhow::Context;
    use rppal::gpio::{Gpio, OutputPin};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use rppal::uart::{Parity, Queue, Uart};
    use std::time::Duration;

    pub struct UartLine {
        uart: Uart,
    }

    impl UartLine {
        pub fn open(path: &str, baud_rate: u32) -> anyhow::Result<Self> {
            let mut uart = Uart::with_path(path, baud_rate, Parity::None, 8, 1)
                .with_context(|| format!("failed to open UART {}", path))?;
            // min_length 0 + zero timeout: read() returns immediately
            uart.set_read_mode(0, Duration::ZERO)?;
            uart.set_write_mode(true)?;
            Ok(Self { uart })
        }
    }

    impl SerialLine for UartLine {
        fn discard_input(&mut self) -> io::Result<()> {
            self.uart.flush(Queue::Input).map_err(io::Error::other)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let written = self.uart.write(data).map_err(io::Error::other)?;
            // the transceiver must not leave transmit mode mid-frame
            self.uart.drain().map_err(io::Error::other)?;
            Ok(written)
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            let mut buf = [0u8; 256];
            let n = self.uart.read(&mut buf).map_err(io::Error::other)?;
            Ok(buf[..n].to_vec())
        }
    }

    pub struct GpioDirection {
        pin: OutputPin,
    }

    impl DirectionPin for GpioDirection {
        fn set_transmit(&mut self, transmit: bool) -> anyhow::Result<()> {
            if transmit {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
            Ok(())
        }
    }

    pub struct Max31855 {
        spi: Spi,
    }

    impl Max31855 {
        pub fn open(chip_select: u8) -> anyhow::Result<Self> {
            let ss = match chip_select {
                0 => SlaveSelect::Ss0,
                1 => SlaveSelect::Ss1,
                2 => SlaveSelect::Ss2,
                other => anyhow::bail!("unsupported SPI chip select {}", other),
            };
            let spi = Spi::new(Bus::Spi0, ss, 1_000_000, Mode::Mode0)
                .with_context(|| format!("failed to open SPI0 CE{}", chip_select))?;
            Ok(Self { spi })
        }
    }

    impl Thermocouple for Max31855 {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            let mut buf = [0u8; 4];
            let n = self
                .spi
                .read(&mut buf)
                .map_err(|e| SensorError::driver(format!("SPI read failed: {}", e)))?;
            if n != buf.len() {
                return Err(SensorError::driver(format!("SPI short read: {} bytes", n)));
            }
            decode_max31855(u32::from_be_bytes(buf))
        }
    }

    pub struct Dht22 {
        pin: u8,
    }

    impl ClimateSensor for Dht22 {
        fn read(&mut self) -> Result<(f32, f32), SensorError> {
            // NOTE: DHT22 goes through python/adafruit_dht; native bit-banging is
            // notoriously flaky on a stock kernel.
            use std::process::Command;
            let script = format!(
                r#"
import sys
try:
    import adafruit_dht, board, json
    dht = adafruit_dht.DHT22(board.D{})
    try:
        t, h = dht.temperature, dht.humidity
        print(json.dumps({{"t": t, "h": h}}) if t is not None and h is not None else "null")
    finally:
        dht.exit()
except Exception as e:
    print(str(e), file=sys.stderr)
    sys.exit(1)
"#,
                self.pin
            );
            let output = Command::new("python3")
                .args(["-c", &script])
                .output()
                .map_err(|e| SensorError::driver(format!("failed to run python3: {}", e)))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(SensorError::driver(format!("DHT22: {}", stderr.trim())));
            }
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if stdout == "null" || stdout.is_empty() {
                return Err(SensorError::driver("DHT22 returned null"));
            }
            let v: serde_json::Value = serde_json::from_str(&stdout)
                .map_err(|e| SensorError::driver(format!("DHT22 JSON: {} (got: {})", e, stdout)))?;
            let t = v["t"].as_f64().ok_or_else(|| SensorError::driver("DHT22 missing temp"))?;
            let h = v["h"].as_f64().ok_or_else(|| SensorError::driver("DHT22 missing humidity"))?;
            Ok((t as f32, h as f32))
        }
    }

    pub fn open(config: &StationConfig) -> anyhow::Result<Peripherals> {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let rs485 = &config.rs485;
        let direction = match rs485.de_pin {
            Some(pin) => {
                let out = Gpio::new()?
                    .get(pin)
                    .with_context(|| format!("DE/RE pin {}", pin))?
                    .into_output_low();
                Some(Box::new(GpioDirection { pin: out }) as Box<dyn DirectionPin>)
            }
            None => None,
        };
        Ok(Peripherals {
            thermocouple1: Box::new(Max31855::open(config.sensors.thermocouple1.chip_select)?),
            thermocouple2: Box::new(Max31855::open(config.sensors.thermocouple2.chip_select)?),
            climate: Box::new(Dht22 { pin: config.sensors.dht22.gpio_pin }),
            serial: Box::new(UartLine::open(&rs485.uart_path, rs485.baud_rate)?),
            direction,
        })
    }
}
