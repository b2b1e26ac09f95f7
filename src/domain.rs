use serde::{Deserialize, Serialize, Serializer};

/// one sensor value, tagged with where it came from.
///
/// serializes as the bare number so the json shape of a reading does not
/// change when a sensor degrades.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// value read from the sensor
    Measured(f32),
    /// documented default substituted for a failed read
    Fallback(f32),
}

impl Sample {
    pub fn value(self) -> f32 {
        match self {
            Sample::Measured(v) | Sample::Fallback(v) => v,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Sample::Fallback(_))
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(self.value())
    }
}

/// alert flags as published in a reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertFlags {
    pub temp1: bool,
    pub temp2: bool,
    pub water_level: bool,
}

/// aggregated snapshot of every sensor for one sampling cycle
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    /// thermocouple #1 (°C)
    pub temp1: Sample,
    /// thermocouple #2 (°C)
    pub temp2: Sample,
    /// dht22 temperature (°C)
    pub room_temp: Sample,
    /// dht22 relative humidity (%)
    pub humidity: Sample,
    /// tank level (m)
    pub water_level: Sample,
    /// litres, derived from water_level and the tank geometry
    pub tank_volume: f32,
    pub alerts: AlertFlags,
    /// local time, "YYYY-MM-DD HH:MM:SS"
    pub timestamp: String,
}

/// body pushed to the controller: the reading minus alerts and timestamp
#[derive(Debug, Serialize)]
pub struct ControllerPayload {
    pub temp1: f32,
    pub temp2: f32,
    pub room_temp: f32,
    pub humidity: f32,
    pub water_level: f32,
    pub tank_volume: f32,
}

impl Reading {
    pub fn controller_payload(&self) -> ControllerPayload {
        ControllerPayload {
            temp1: self.temp1.value(),
            temp2: self.temp2.value(),
            room_temp: self.room_temp.value(),
            humidity: self.humidity.value(),
            water_level: self.water_level.value(),
            tank_volume: self.tank_volume,
        }
    }

    /// names of the fields that carry a fallback instead of a measurement
    pub fn fallback_fields(&self) -> Vec<&'static str> {
        [
            ("temp1", self.temp1),
            ("temp2", self.temp2),
            ("room_temp", self.room_temp),
            ("humidity", self.humidity),
            ("water_level", self.water_level),
        ]
        .into_iter()
        .filter(|(_, s)| s.is_fallback())
        .map(|(name, _)| name)
        .collect()
    }
}

/// edge-triggered alert for one metric
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertState {
    active: bool,
}

impl AlertState {
    /// feed the latest evaluation; returns true only on the false -> true edge
    pub fn update(&mut self, abnormal: bool) -> bool {
        let rising = abnormal && !self.active;
        self.active = abnormal;
        rising
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// tank dimensions used to turn a level into a volume
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TankGeometry {
    /// metres
    pub height: f32,
    /// litres
    pub capacity: f32,
}

impl Default for TankGeometry {
    fn default() -> Self {
        Self { height: 3.0, capacity: 1000.0 }
    }
}

impl TankGeometry {
    /// level / height, clamped to [0, 1]
    pub fn fill_ratio(&self, level: f32) -> f32 {
        if self.height <= 0.0 || !level.is_finite() {
            return 0.0;
        }
        (level / self.height).clamp(0.0, 1.0)
    }

    pub fn volume(&self, level: f32) -> f32 {
        self.fill_ratio(level) * self.capacity
    }

    pub fn percentage(&self, level: f32) -> f32 {
        self.fill_ratio(level) * 100.0
    }
}

/// alert limits; a value strictly above its limit is abnormal
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// metres
    pub water_level: f32,
    /// °C
    pub temp1: f32,
    /// °C
    pub temp2: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { water_level: 2.0, temp1: 80.0, temp2: 80.0 }
    }
}
