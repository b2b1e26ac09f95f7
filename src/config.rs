//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `station.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig: sampling / connection-check / loop timing.
//!     - SensorsConfig: SPI chip selects and the DHT22 GPIO pin.
//!     - Rs485Config: UART, DE/RE pin, Modbus slave and register, bus timing.
//!     - ControllerConfig: remote controller address, timeouts, backoff.
//!     - tank / thresholds / alerts / web / logging.
//!
//! every section is optional in the file; missing keys take the defaults below.
//!
//! ==============================================================================

use crate::domain::{TankGeometry, Thresholds};
use crate::modbus::WATER_LEVEL_REGISTER;
use anyhow::{ensure, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StationConfig {
    pub polling: PollingConfig,
    pub sensors: SensorsConfig,
    pub rs485: Rs485Config,
    pub controller: ControllerConfig,
    pub tank: TankGeometry,
    pub thresholds: Thresholds,
    pub alerts: AlertsConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub sample_interval_seconds: u64,
    pub connection_check_ms: u64,
    pub loop_quantum_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 60,
            connection_check_ms: 500,
            loop_quantum_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub thermocouple1: ThermocoupleConfig,
    pub thermocouple2: ThermocoupleConfig,
    pub dht22: Dht22Config,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            thermocouple1: ThermocoupleConfig { chip_select: 0 },
            thermocouple2: ThermocoupleConfig { chip_select: 1 },
            dht22: Dht22Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThermocoupleConfig {
    /// SPI0 chip-enable line of the MAX31855
    pub chip_select: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Dht22Config {
    pub gpio_pin: u8,
}

impl Default for Dht22Config {
    fn default() -> Self {
        Self { gpio_pin: 15 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Rs485Config {
    pub uart_path: String,
    pub baud_rate: u32,
    /// DE/RE direction pin; leave unset for auto-direction transceivers
    pub de_pin: Option<u8>,
    pub slave_address: u8,
    pub register: u16,
    pub guard_ms: u64,
    pub settle_ms: u64,
}

impl Default for Rs485Config {
    fn default() -> Self {
        Self {
            uart_path: "/dev/serial0".to_string(),
            baud_rate: 9600,
            de_pin: Some(10),
            slave_address: 0x01,
            register: WATER_LEVEL_REGISTER,
            guard_ms: 10,
            settle_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub reconnect_interval_seconds: u64,
    /// substring that marks a successful controller response
    pub success_token: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 80,
            connect_timeout_ms: 3000,
            read_timeout_ms: 5000,
            reconnect_interval_seconds: 30,
            success_token: "200 OK".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AlertsConfig {
    pub email_sender: String,
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
    pub port: u16,
    /// read/write timeout on an accepted client
    pub client_timeout_ms: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 80,
            client_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl PollingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }

    pub fn connection_check(&self) -> Duration {
        Duration::from_millis(self.connection_check_ms)
    }

    pub fn loop_quantum(&self) -> Duration {
        Duration::from_millis(self.loop_quantum_ms)
    }
}

impl StationConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: StationConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("station.toml"),
            std::path::PathBuf::from("..").join("config").join("station.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tank.height > 0.0, "tank.height must be positive");
        ensure!(self.tank.capacity > 0.0, "tank.capacity must be positive");
        ensure!(self.polling.sample_interval_seconds > 0, "polling.sample_interval_seconds must be > 0");
        ensure!(self.polling.connection_check_ms > 0, "polling.connection_check_ms must be > 0");
        ensure!(self.polling.loop_quantum_ms > 0, "polling.loop_quantum_ms must be > 0");
        ensure!(
            self.controller.connect_timeout_ms > 0 && self.controller.read_timeout_ms > 0,
            "controller timeouts must be > 0"
        );
        ensure!(self.web.client_timeout_ms > 0, "web.client_timeout_ms must be > 0");
        ensure!(self.rs485.baud_rate > 0, "rs485.baud_rate must be > 0");
        ensure!(!self.controller.success_token.is_empty(), "controller.success_token must not be empty");
        Ok(())
    }

    pub fn controller_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.connect_timeout_ms)
    }

    pub fn controller_read_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.read_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.controller.reconnect_interval_seconds)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let de = self
            .rs485
            .de_pin
            .map_or_else(|| "none".to_string(), |p| p.to_string());
        println!("┌─────────────────────────────────────────┐");
        println!("│          STATION CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Sample Interval: {}s", self.polling.sample_interval_seconds);
        println!("│ RS-485: {} @ {} baud, DE/RE: {}", self.rs485.uart_path, self.rs485.baud_rate, de);
        println!("│ Modbus: slave 0x{:02X}, register 0x{:04X}", self.rs485.slave_address, self.rs485.register);
        println!("│ Controller: {}:{}", self.controller.host, self.controller.port);
        println!("│ Tank: {}m / {}L", self.tank.height, self.tank.capacity);
        println!("│ Web: {}:{}", self.web.bind, self.web.port);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
