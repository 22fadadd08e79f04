use chrono::{FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// greenhouse local civil time is UTC+05:30 (no dst)
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// iso-8601 without offset, microsecond precision
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// current local civil time, stored without timezone
pub fn now_ist() -> NaiveDateTime {
    match FixedOffset::east_opt(IST_OFFSET_SECS) {
        Some(offset) => Utc::now().with_timezone(&offset).naive_local(),
        None => Utc::now().naive_utc(),
    }
}

/// round to one decimal place for display
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ==============================================================================
// devices
// ==============================================================================

/// the two actuators the broker can switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Pump,
    Fan,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Pump => "pump",
            Device::Fan => "fan",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    /// case-insensitive, anything else is rejected
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pump" => Ok(Device::Pump),
            "fan" => Ok(Device::Fan),
            _ => Err(s.to_string()),
        }
    }
}

/// last known / commanded actuator states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub pump: bool,
    pub fan: bool,
}

impl DeviceState {
    pub fn get(&self, device: Device) -> bool {
        match device {
            Device::Pump => self.pump,
            Device::Fan => self.fan,
        }
    }

    pub fn set(&mut self, device: Device, on: bool) {
        match device {
            Device::Pump => self.pump = on,
            Device::Fan => self.fan = on,
        }
    }
}

// ==============================================================================
// soil
// ==============================================================================

/// categorical soil moisture label derived from the raw sensor scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SoilStatus {
    #[serde(rename = "very dry")]
    VeryDry,
    #[serde(rename = "dry")]
    Dry,
    #[serde(rename = "moist")]
    Moist,
    #[serde(rename = "wet")]
    Wet,
}

impl SoilStatus {
    pub fn from_raw(soil: i64) -> Self {
        match soil {
            s if s <= 20 => SoilStatus::VeryDry,
            s if s <= 40 => SoilStatus::Dry,
            s if s <= 70 => SoilStatus::Moist,
            _ => SoilStatus::Wet,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SoilStatus::VeryDry => "very dry",
            SoilStatus::Dry => "dry",
            SoilStatus::Moist => "moist",
            SoilStatus::Wet => "wet",
        }
    }
}

// ==============================================================================
// snapshots (returned to the ui)
// ==============================================================================

/// complete current state as served by GET /api/data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub soil: i64,
    #[serde(rename = "soilStatus")]
    pub soil_status: SoilStatus,
    pub pump: bool,
    pub fan: bool,
}

impl Snapshot {
    pub fn new(temperature: f64, humidity: f64, soil: i64, devices: DeviceState) -> Self {
        Self {
            temperature: round1(temperature),
            humidity: round1(humidity),
            soil,
            soil_status: SoilStatus::from_raw(soil),
            pump: devices.pump,
            fan: devices.fan,
        }
    }
}

/// snapshot served from the local sensor cache when the broker is down
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedSnapshot {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub source: &'static str,
    /// opaque timestamp string last reported by the field device
    pub timestamp: Option<String>,
}

pub const LOCAL_CACHE_SOURCE: &str = "local-cache";

// ==============================================================================
// readings (persisted history)
// ==============================================================================

/// provenance of a persisted reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Blynk,
    Esp32,
    Unknown,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Blynk => "blynk",
            Source::Esp32 => "esp32",
            Source::Unknown => "unknown",
        }
    }

    /// unrecognised tags read back as Unknown
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "blynk" => Source::Blynk,
            "esp32" => Source::Esp32,
            _ => Source::Unknown,
        }
    }
}

/// a reading about to be appended (id and timestamp assigned by the store)
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil: Option<i64>,
    pub pump: bool,
    pub fan: bool,
    pub source: Source,
}

impl NewReading {
    pub fn from_snapshot(snapshot: &Snapshot, source: Source) -> Self {
        Self {
            temperature: Some(snapshot.temperature),
            humidity: Some(snapshot.humidity),
            soil: Some(snapshot.soil),
            pump: snapshot.pump,
            fan: snapshot.fan,
            source,
        }
    }
}

/// one persisted history record, as served by GET /api/readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub id: i64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil: Option<i64>,
    pub pump: bool,
    pub fan: bool,
    pub source: Source,
}

fn serialize_timestamp<S: serde::Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}
