//! local sensor cache, fed by the field device through POST /api/logs
//!
//! it is the fallback source for GET /api/data when the broker cannot be
//! reached. fields are merged one by one and never cleared.

use crate::domain::{DeviceState, Snapshot};

use serde_json::{Map, Value};

/// partial report as posted by the field device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReport {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil: Option<i64>,
    pub timestamp: Option<String>,
}

impl SensorReport {
    /// pick the known keys out of a json object; unparseable fields stay None
    ///
    /// `moisture` is the device's name for soil and wins whenever the key is
    /// present, even when its value is null.
    pub fn from_json(body: &Map<String, Value>) -> Self {
        let soil_key = if body.contains_key("moisture") { "moisture" } else { "soil" };
        Self {
            temperature: body.get("temperature").and_then(as_real),
            humidity: body.get("humidity").and_then(as_real),
            soil: body.get(soil_key).and_then(as_real).map(|s| s.trunc() as i64),
            timestamp: body.get("timestamp").and_then(as_timestamp),
        }
    }
}

fn as_real(value: &Value) -> Option<f64> {
    let real = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    real.filter(|v| v.is_finite())
}

fn as_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// last values reported by the field device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorCache {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil: Option<i64>,
    pub timestamp: Option<String>,
}

/// what read_snapshot hands back when something has been cached
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValues {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil: Option<i64>,
    pub timestamp: Option<String>,
}

impl CachedValues {
    /// fill a ui snapshot; values never reported read as zero
    pub fn to_snapshot(&self, devices: DeviceState) -> Snapshot {
        Snapshot::new(
            self.temperature.unwrap_or(0.0),
            self.humidity.unwrap_or(0.0),
            self.soil.unwrap_or(0),
            devices,
        )
    }
}

impl SensorCache {
    /// overwrite only the fields the report actually carries
    pub fn ingest(&mut self, report: SensorReport) {
        if let Some(t) = report.temperature {
            self.temperature = Some(t);
        }
        if let Some(h) = report.humidity {
            self.humidity = Some(h);
        }
        if let Some(s) = report.soil {
            self.soil = Some(s);
        }
        if let Some(ts) = report.timestamp {
            self.timestamp = Some(ts);
        }
    }

    /// None until at least one sensor value has been reported
    pub fn read_snapshot(&self) -> Option<CachedValues> {
        if self.temperature.is_none() && self.humidity.is_none() && self.soil.is_none() {
            return None;
        }
        Some(CachedValues {
            temperature: self.temperature,
            humidity: self.humidity,
            soil: self.soil,
            timestamp: self.timestamp.clone(),
        })
    }
}
