//! ==============================================================================
//! sensors.rs - sensor aggregator
//! ==============================================================================
//!
//! purpose:
//!     reads every source once per cycle, substitutes documented fallbacks for
//!     anything that failed, derives the tank volume, pushes the result to the
//!     controller and evaluates edge-triggered alerts.
//!
//! read order (fixed):
//!     thermocouple #1 -> thermocouple #2 -> dht22 -> modbus level sensor
//!
//! failure policy:
//!     SensorError / ProtocolError / TransportError / LinkError all stop here.
//!     read_all() always returns a complete Reading; each field records
//!     whether it was measured or substituted.
//!
//! relationships:
//!     - uses: hal.rs (drivers), rs485.rs + modbus.rs (level sensor)
//!     - uses: link.rs (push), domain.rs (Reading, AlertState)
//!     - used by: dispatcher.rs
//!
//! ==============================================================================

use crate::domain::{AlertFlags, AlertState, Reading, Sample, TankGeometry, Thresholds};
use crate::error::{LinkError, SensorError};
use crate::hal::{ClimateSensor, Thermocouple};
use crate::link::{ControllerLink, Dial};
use crate::modbus::{parse_response, ModbusRequestFrame};
use crate::rs485::Rs485Transport;

/// Values substituted for failed reads.
pub mod fallback {
    pub const TEMP1: f32 = 25.0;
    pub const TEMP2: f32 = 30.0;
    pub const ROOM_TEMP: f32 = 28.0;
    pub const HUMIDITY: f32 = 65.0;
    pub const WATER_LEVEL: f32 = 1.5;
}

/// Anything that can report the tank level in metres.
pub trait LevelSensor {
    fn read_level(&mut self) -> Result<f32, SensorError>;
}

/// QDY30A-B level transmitter polled over Modbus RTU.
pub struct ModbusLevelSensor {
    transport: Rs485Transport,
    request: ModbusRequestFrame,
}

impl ModbusLevelSensor {
    /// `request` is built once at startup and reused for every poll.
    pub fn new(transport: Rs485Transport, request: ModbusRequestFrame) -> Self {
        Self { transport, request }
    }
}

impl LevelSensor for ModbusLevelSensor {
    fn read_level(&mut self) -> Result<f32, SensorError> {
        let raw = self.transport.transact(&self.request.to_bytes())?;
        let frame = parse_response(self.request.slave_address, &raw)?;
        let level = frame.water_level_meters()?;
        tracing::debug!(
            "[LEVEL] slave 0x{:02X} fn 0x{:02X} {} bytes crc 0x{:04X}: {} mm ({:.3} m)",
            frame.slave_address,
            frame.function_code,
            frame.byte_count,
            frame.crc,
            frame.first_register().unwrap_or_default(),
            level
        );
        Ok(level)
    }
}

/// Where finished readings go.
pub trait Uplink {
    fn push(&mut self, reading: &Reading) -> Result<(), LinkError>;
}

impl<D: Dial> Uplink for ControllerLink<D> {
    fn push(&mut self, reading: &Reading) -> Result<(), LinkError> {
        self.send(reading)
    }
}

/// Alert delivery capability (email/SMS live outside the station core).
pub trait Notifier {
    fn deliver(&mut self, subject: &str, message: &str) -> anyhow::Result<()>;
}

/// Logs which configured channels an alert would be sent through.
pub struct LogNotifier {
    email_sender: String,
    phone_number: String,
}

impl LogNotifier {
    pub fn new(email_sender: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            email_sender: email_sender.into(),
            phone_number: phone_number.into(),
        }
    }
}

impl Notifier for LogNotifier {
    fn deliver(&mut self, subject: &str, message: &str) -> anyhow::Result<()> {
        if !self.email_sender.is_empty() {
            tracing::info!("[ALERT] email from {}: {} - {}", self.email_sender, subject, message);
        }
        if !self.phone_number.is_empty() {
            tracing::info!("[ALERT] SMS to {}: {} - {}", self.phone_number, subject, message);
        }
        Ok(())
    }
}

/// Every driver the aggregator reads from.
pub struct Sources {
    pub thermocouple1: Box<dyn Thermocouple>,
    pub thermocouple2: Box<dyn Thermocouple>,
    pub climate: Box<dyn ClimateSensor>,
    pub level: Box<dyn LevelSensor>,
}

#[derive(Debug, Default)]
struct Alerts {
    temp1: AlertState,
    temp2: AlertState,
    water_level: AlertState,
}

impl Alerts {
    fn flags(&self) -> AlertFlags {
        AlertFlags {
            temp1: self.temp1.is_active(),
            temp2: self.temp2.is_active(),
            water_level: self.water_level.is_active(),
        }
    }
}

pub struct SensorAggregator {
    sources: Sources,
    uplink: Box<dyn Uplink>,
    notifier: Box<dyn Notifier>,
    tank: TankGeometry,
    thresholds: Thresholds,
    alerts: Alerts,
    latest: Option<Reading>,
    show_sensor_data: bool,
}

impl SensorAggregator {
    pub fn new(
        sources: Sources,
        uplink: Box<dyn Uplink>,
        notifier: Box<dyn Notifier>,
        tank: TankGeometry,
        thresholds: Thresholds,
    ) -> Self {
        tracing::info!(
            "[SENSORS] Tank height={}m, capacity={}L",
            tank.height,
            tank.capacity
        );
        Self {
            sources,
            uplink,
            notifier,
            tank,
            thresholds,
            alerts: Alerts::default(),
            latest: None,
            show_sensor_data: false,
        }
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    pub fn tank(&self) -> TankGeometry {
        self.tank
    }

    /// Most recent reading, if a cycle has run.
    #[cfg(test)]
    pub fn latest(&self) -> Option<&Reading> {
        self.latest.as_ref()
    }

    /// Read every source and produce a complete reading. Never fails.
    pub fn read_all(&mut self) -> Reading {
        let temp1 = sample("temp1", self.sources.thermocouple1.read_celsius(), fallback::TEMP1);
        let temp2 = sample("temp2", self.sources.thermocouple2.read_celsius(), fallback::TEMP2);

        let (room_temp, humidity) = match self.sources.climate.read() {
            Ok((t, h)) if t.is_finite() && h.is_finite() => (Sample::Measured(t), Sample::Measured(h)),
            Ok((t, h)) => {
                tracing::warn!("[DHT22] Implausible reading ({}, {}), using fallback", t, h);
                (Sample::Fallback(fallback::ROOM_TEMP), Sample::Fallback(fallback::HUMIDITY))
            }
            Err(e) => {
                tracing::warn!("[DHT22] Read failed, using fallback: {}", e);
                (Sample::Fallback(fallback::ROOM_TEMP), Sample::Fallback(fallback::HUMIDITY))
            }
        };

        let water_level = sample("water_level", self.sources.level.read_level(), fallback::WATER_LEVEL);
        let level = water_level.value();

        let reading = Reading {
            temp1,
            temp2,
            room_temp,
            humidity,
            water_level,
            tank_volume: self.tank.volume(level),
            alerts: self.alerts.flags(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        if self.show_sensor_data {
            tracing::info!(
                "Temp1: {:.1}°C | Temp2: {:.1}°C | Room: {:.1}°C | Humidity: {:.1}% | Level: {:.2}m ({:.1}%) | Volume: {:.1}L",
                reading.temp1.value(),
                reading.temp2.value(),
                reading.room_temp.value(),
                reading.humidity.value(),
                level,
                self.tank.percentage(level),
                reading.tank_volume
            );
        }

        let degraded = reading.fallback_fields();
        if !degraded.is_empty() {
            tracing::warn!("[SENSORS] Degraded reading, fallbacks in: {}", degraded.join(", "));
        }

        match self.uplink.push(&reading) {
            Ok(()) => {}
            Err(LinkError::Unavailable) => tracing::debug!("[LINK] Controller offline, reading not pushed"),
            Err(e) => tracing::warn!("[LINK] Failed to push reading: {}", e),
        }

        self.latest = Some(reading.clone());
        reading
    }

    /// Compare the latest reading against the limits; notify on rising edges.
    pub fn check_thresholds(&mut self) {
        let Some(reading) = self.latest.as_ref() else {
            return;
        };
        let limits = self.thresholds;
        let temp1 = reading.temp1.value();
        let temp2 = reading.temp2.value();
        let level = reading.water_level.value();

        if self.alerts.temp1.update(temp1 > limits.temp1) {
            self.raise(
                "Temperature alert",
                format!("Sensor 1 temperature reached {}°C, above the {}°C threshold", temp1, limits.temp1),
            );
        }
        if self.alerts.temp2.update(temp2 > limits.temp2) {
            self.raise(
                "Temperature alert",
                format!("Sensor 2 temperature reached {}°C, above the {}°C threshold", temp2, limits.temp2),
            );
        }
        if self.alerts.water_level.update(level > limits.water_level) {
            self.raise(
                "Water level alert",
                format!("Water level reached {}m, above the {}m threshold", level, limits.water_level),
            );
        }
    }

    fn raise(&mut self, subject: &str, message: String) {
        tracing::warn!("[ALERT] {}: {}", subject, message);
        if let Err(e) = self.notifier.deliver(subject, &message) {
            tracing::warn!("[ALERT] Delivery failed: {:#}", e);
        }
    }
}

fn sample(name: &str, result: Result<f32, SensorError>, fallback: f32) -> Sample {
    match result {
        Ok(v) if v.is_finite() => {
            tracing::debug!("[{}] {}", name, v);
            Sample::Measured(v)
        }
        Ok(v) => {
            tracing::warn!("[{}] Implausible value {}, using fallback {}", name, v, fallback);
            Sample::Fallback(fallback)
        }
        Err(e) => {
            tracing::warn!("[{}] Read failed, using fallback {}: {}", name, fallback, e);
            Sample::Fallback(fallback)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modbus::build_read_request;
    use crate::rs485::tests::fake_transport;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Pops scripted temperatures; an empty script fails.
    pub struct ScriptedThermocouple(pub VecDeque<f32>);

    impl Thermocouple for ScriptedThermocouple {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            self.0.pop_front().ok_or_else(|| SensorError::driver("no thermocouple"))
        }
    }

    pub struct FixedClimate(pub Option<(f32, f32)>);

    impl ClimateSensor for FixedClimate {
        fn read(&mut self) -> Result<(f32, f32), SensorError> {
            self.0.ok_or_else(|| SensorError::driver("checksum error"))
        }
    }

    pub struct FixedLevel(pub Option<f32>);

    impl LevelSensor for FixedLevel {
        fn read_level(&mut self) -> Result<f32, SensorError> {
            self.0.ok_or_else(|| SensorError::driver("bus silent"))
        }
    }

    #[derive(Default, Clone)]
    pub struct RecordingUplink {
        pub pushed: Rc<RefCell<Vec<Reading>>>,
        pub fail: bool,
    }

    impl Uplink for RecordingUplink {
        fn push(&mut self, reading: &Reading) -> Result<(), LinkError> {
            self.pushed.borrow_mut().push(reading.clone());
            if self.fail {
                Err(LinkError::Rejected("HTTP/1.1 500 Internal Server Error".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default, Clone)]
    pub struct RecordingNotifier(pub Rc<RefCell<Vec<(String, String)>>>);

    impl Notifier for RecordingNotifier {
        fn deliver(&mut self, subject: &str, message: &str) -> anyhow::Result<()> {
            self.0.borrow_mut().push((subject.to_string(), message.to_string()));
            Ok(())
        }
    }

    pub fn aggregator(sources: Sources) -> (SensorAggregator, RecordingUplink, RecordingNotifier) {
        let uplink = RecordingUplink::default();
        let notifier = RecordingNotifier::default();
        let agg = SensorAggregator::new(
            sources,
            Box::new(uplink.clone()),
            Box::new(notifier.clone()),
            TankGeometry { height: 3.0, capacity: 1000.0 },
            Thresholds { water_level: 2.0, temp1: 80.0, temp2: 80.0 },
        );
        (agg, uplink, notifier)
    }

    pub fn healthy_sources() -> Sources {
        Sources {
            thermocouple1: Box::new(ScriptedThermocouple(vec![41.0; 8].into())),
            thermocouple2: Box::new(ScriptedThermocouple(vec![55.5; 8].into())),
            climate: Box::new(FixedClimate(Some((26.5, 48.0)))),
            level: Box::new(FixedLevel(Some(1.5))),
        }
    }

    fn failing_sources() -> Sources {
        Sources {
            thermocouple1: Box::new(ScriptedThermocouple(VecDeque::new())),
            thermocouple2: Box::new(ScriptedThermocouple(VecDeque::new())),
            climate: Box::new(FixedClimate(None)),
            level: Box::new(FixedLevel(None)),
        }
    }

    /// Which source was read, in order.
    pub type ReadLog = Rc<RefCell<Vec<&'static str>>>;

    struct LoggedThermocouple {
        name: &'static str,
        log: ReadLog,
    }

    impl Thermocouple for LoggedThermocouple {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            self.log.borrow_mut().push(self.name);
            Ok(40.0)
        }
    }

    struct LoggedClimate(ReadLog);

    impl ClimateSensor for LoggedClimate {
        fn read(&mut self) -> Result<(f32, f32), SensorError> {
            self.0.borrow_mut().push("dht22");
            Ok((26.0, 50.0))
        }
    }

    struct LoggedLevel(ReadLog);

    impl LevelSensor for LoggedLevel {
        fn read_level(&mut self) -> Result<f32, SensorError> {
            self.0.borrow_mut().push("level");
            Ok(1.0)
        }
    }

    #[test]
    fn test_sources_read_in_fixed_order() {
        let log: ReadLog = Rc::default();
        let sources = Sources {
            thermocouple1: Box::new(LoggedThermocouple { name: "temp1", log: log.clone() }),
            thermocouple2: Box::new(LoggedThermocouple { name: "temp2", log: log.clone() }),
            climate: Box::new(LoggedClimate(log.clone())),
            level: Box::new(LoggedLevel(log.clone())),
        };
        let (mut agg, _, _) = aggregator(sources);

        agg.read_all();
        assert_eq!(*log.borrow(), vec!["temp1", "temp2", "dht22", "level"]);

        agg.read_all();
        assert_eq!(log.borrow().len(), 8);
        assert_eq!(log.borrow()[4..], ["temp1", "temp2", "dht22", "level"]);
    }

    #[test]
    fn test_all_sources_failing_yields_fallbacks() {
        let (mut agg, uplink, _) = aggregator(failing_sources());
        let r = agg.read_all();

        assert_eq!(r.temp1, Sample::Fallback(25.0));
        assert_eq!(r.temp2, Sample::Fallback(30.0));
        assert_eq!(r.room_temp, Sample::Fallback(28.0));
        assert_eq!(r.humidity, Sample::Fallback(65.0));
        assert_eq!(r.water_level, Sample::Fallback(1.5));
        assert!((r.tank_volume - 500.0).abs() < 1e-3);
        assert_eq!(r.fallback_fields().len(), 5);
        assert_eq!(r.timestamp.len(), "2026-10-16 08:30:00".len());
        assert_eq!(uplink.pushed.borrow().len(), 1);
    }

    #[test]
    fn test_measured_values_pass_through() {
        let (mut agg, uplink, _) = aggregator(healthy_sources());
        let r = agg.read_all();
        assert_eq!(r.temp1, Sample::Measured(41.0));
        assert_eq!(r.temp2, Sample::Measured(55.5));
        assert_eq!(r.room_temp, Sample::Measured(26.5));
        assert_eq!(r.humidity, Sample::Measured(48.0));
        assert_eq!(r.water_level, Sample::Measured(1.5));
        assert!(r.fallback_fields().is_empty());
        assert_eq!(uplink.pushed.borrow()[0].temp1, Sample::Measured(41.0));
        assert_eq!(agg.latest().map(|l| l.temp2), Some(Sample::Measured(55.5)));
    }

    #[test]
    fn test_non_finite_driver_value_uses_fallback() {
        let mut sources = healthy_sources();
        sources.thermocouple1 = Box::new(ScriptedThermocouple(vec![f32::NAN].into()));
        sources.climate = Box::new(FixedClimate(Some((f32::INFINITY, 40.0))));
        let (mut agg, _, _) = aggregator(sources);
        let r = agg.read_all();
        assert_eq!(r.temp1, Sample::Fallback(25.0));
        assert_eq!(r.room_temp, Sample::Fallback(28.0));
        assert_eq!(r.humidity, Sample::Fallback(65.0));
    }

    #[test]
    fn test_push_failure_is_swallowed() {
        let uplink = RecordingUplink { fail: true, ..Default::default() };
        let mut agg = SensorAggregator::new(
            healthy_sources(),
            Box::new(uplink.clone()),
            Box::new(RecordingNotifier::default()),
            TankGeometry::default(),
            Thresholds::default(),
        );
        let r = agg.read_all();
        assert_eq!(r.water_level, Sample::Measured(1.5));
        assert!(agg.latest().is_some());
    }

    #[test]
    fn test_temperature_alert_is_edge_triggered() {
        let mut sources = healthy_sources();
        sources.thermocouple1 = Box::new(ScriptedThermocouple(vec![90.0, 90.0, 90.0, 70.0, 90.0].into()));
        let (mut agg, _, notifier) = aggregator(sources);

        for _ in 0..4 {
            agg.read_all();
            agg.check_thresholds();
        }
        assert_eq!(notifier.0.borrow().len(), 1);
        let (subject, message) = notifier.0.borrow()[0].clone();
        assert_eq!(subject, "Temperature alert");
        assert!(message.contains("90"));
        assert!(message.contains("80"));

        // back above the limit after the drop: fires again
        agg.read_all();
        agg.check_thresholds();
        assert_eq!(notifier.0.borrow().len(), 2);
    }

    #[test]
    fn test_alert_flags_reported_in_next_reading() {
        let mut sources = healthy_sources();
        sources.level = Box::new(FixedLevel(Some(2.4)));
        let (mut agg, _, notifier) = aggregator(sources);

        assert!(!agg.read_all().alerts.water_level);
        agg.check_thresholds();
        assert_eq!(notifier.0.borrow()[0].0, "Water level alert");
        let r = agg.read_all();
        assert!(r.alerts.water_level);
        assert!(!r.alerts.temp1);
    }

    #[test]
    fn test_check_thresholds_before_first_read_is_noop() {
        let (mut agg, _, notifier) = aggregator(healthy_sources());
        agg.check_thresholds();
        assert!(notifier.0.borrow().is_empty());
    }

    #[test]
    fn test_modbus_level_sensor_over_fake_bus() {
        let reply = vec![0x01, 0x03, 0x02, 0x05, 0xDC, 0xBA, 0x8D];
        let (transport, _) = fake_transport(vec![vec![], reply], true);
        let mut sensor = ModbusLevelSensor::new(transport, build_read_request(0x01, 0x0004, 1));
        assert!((sensor.read_level().unwrap() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_level_reply_falls_back() {
        let garbled = vec![0x01, 0x03, 0x02, 0x05, 0xDC, 0x00, 0x00];
        let (transport, _) = fake_transport(vec![vec![], garbled], true);
        let level = ModbusLevelSensor::new(transport, build_read_request(0x01, 0x0004, 1));

        let err = ModbusLevelSensor::new(
            fake_transport(vec![vec![], vec![0x01, 0x03]], false).0,
            build_read_request(0x01, 0x0004, 1),
        )
        .read_level()
        .unwrap_err();
        assert!(matches!(err, SensorError::Protocol(crate::error::ProtocolError::ShortFrame { .. })));

        let mut sources = healthy_sources();
        sources.level = Box::new(level);
        let (mut agg, _, _) = aggregator(sources);
        let r = agg.read_all();
        assert_eq!(r.water_level, Sample::Fallback(1.5));
        assert_eq!(r.temp1, Sample::Measured(41.0));
    }
}
