//! ==============================================================================
//! gateway.rs - remote device gateway client
//! ==============================================================================
//!
//! purpose:
//!     turns the broker's loosely typed channels (virtual pins) into a typed
//!     `Snapshot`, and flips the pump / fan command channels.
//!
//! fetch policy:
//!     1. one batch request for all five channels.
//!     2. non-success status or transport failure -> one request per channel.
//!        a failed channel reads as 0 instead of failing the whole fetch.
//!     3. every value is coerced on its own; a value that does not parse reads
//!        as 0 / false and is logged as degraded, never raised.
//!     the fetch is only an error when the batch reply is unreadable, or when
//!     no request at all reached the broker.
//!
//! relationships:
//!     - used by: server.rs (get_current, toggle)
//!     - uses: broker.rs (Broker trait), domain.rs (Snapshot, DeviceState)
//!
//! ==============================================================================

use crate::broker::Broker;
use crate::config::ChannelConfig;
use crate::domain::{Device, DeviceState, Snapshot};
use crate::error::GatewayError;

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ==============================================================================
// value coercion
// ==============================================================================

/// a parsed value, plus whether it had to fall back to the default
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coerced<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Coerced<T> {
    fn clean(value: T) -> Self {
        Self { value, degraded: false }
    }

    fn degraded(value: T) -> Self {
        Self { value, degraded: true }
    }
}

/// reals: json numbers or numeric text. missing, null and "" read as 0.0
pub fn coerce_f64(raw: Option<&Value>) -> Coerced<f64> {
    let parsed = match raw {
        None | Some(Value::Null) => return Coerced::clean(0.0),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim().trim_matches('"').trim();
            if s.is_empty() {
                return Coerced::clean(0.0);
            }
            s.parse::<f64>().ok()
        }
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Coerced::clean(v),
        _ => Coerced::degraded(0.0),
    }
}

/// integers truncate toward zero from a real parse
pub fn coerce_i64(raw: Option<&Value>) -> Coerced<i64> {
    let real = coerce_f64(raw);
    Coerced { value: real.value.trunc() as i64, degraded: real.degraded }
}

/// device channels are on iff the truncated integer is non-zero
pub fn coerce_bool(raw: Option<&Value>) -> Coerced<bool> {
    let int = coerce_i64(raw);
    Coerced { value: int.value != 0, degraded: int.degraded }
}

// ==============================================================================
// gateway client
// ==============================================================================

pub struct GatewayClient {
    broker: Arc<dyn Broker>,
    channels: ChannelConfig,
    devices: Arc<Mutex<DeviceState>>,
}

impl GatewayClient {
    pub fn new(broker: Arc<dyn Broker>, channels: ChannelConfig) -> Self {
        Self { broker, channels, devices: Arc::new(Mutex::new(DeviceState::default())) }
    }

    /// copy of the locally mirrored device states
    pub async fn devices(&self) -> DeviceState {
        *self.devices.lock().await
    }

    fn channel_for(&self, device: Device) -> &str {
        match device {
            Device::Pump => &self.channels.pump,
            Device::Fan => &self.channels.fan,
        }
    }

    fn all_channels(&self) -> [&str; 5] {
        [
            &self.channels.temperature,
            &self.channels.humidity,
            &self.channels.soil,
            &self.channels.pump,
            &self.channels.fan,
        ]
    }

    /// read all five channels and mirror the device states locally
    pub async fn fetch_current(&self) -> Result<Snapshot, GatewayError> {
        let values = self.fetch_channels().await?;

        let temperature = self.coerced(&values, &self.channels.temperature, coerce_f64);
        let humidity = self.coerced(&values, &self.channels.humidity, coerce_f64);
        let soil = self.coerced(&values, &self.channels.soil, coerce_i64);
        let pump = self.coerced(&values, &self.channels.pump, coerce_bool);
        let fan = self.coerced(&values, &self.channels.fan, coerce_bool);

        let devices = DeviceState { pump, fan };
        *self.devices.lock().await = devices;

        let snapshot = Snapshot::new(temperature, humidity, soil, devices);
        debug!(
            "[GATEWAY] {:.1}°C | {:.1}% | soil {} ({}) | pump {} | fan {}",
            snapshot.temperature,
            snapshot.humidity,
            snapshot.soil,
            snapshot.soil_status.label(),
            snapshot.pump,
            snapshot.fan
        );
        Ok(snapshot)
    }

    fn coerced<T: Copy + std::fmt::Debug>(
        &self,
        values: &Map<String, Value>,
        channel: &str,
        coerce: fn(Option<&Value>) -> Coerced<T>,
    ) -> T {
        let raw = values.get(channel);
        let result = coerce(raw);
        if result.degraded {
            warn!("[GATEWAY] channel {} value {:?} unreadable, using {:?}", channel, raw, result.value);
        }
        result.value
    }

    async fn fetch_channels(&self) -> Result<Map<String, Value>, GatewayError> {
        let channels = self.all_channels();

        let batch_reached = match self.broker.batch_get(&channels).await {
            Ok(response) if response.is_success() => {
                return match serde_json::from_str::<Value>(&response.body) {
                    Ok(Value::Object(map)) => Ok(map),
                    Ok(other) => Err(GatewayError::MalformedBatch(format!("expected object, got {}", other))),
                    Err(e) => Err(GatewayError::MalformedBatch(e.to_string())),
                };
            }
            Ok(response) => {
                warn!(
                    "[GATEWAY] batch get failed with HTTP {}, falling back to per-channel get: {}",
                    response.status,
                    response.excerpt()
                );
                true
            }
            Err(e) => {
                warn!("[GATEWAY] batch get failed, falling back to per-channel get: {}", e);
                false
            }
        };

        let mut values = Map::new();
        let mut any_reached = batch_reached;
        for channel in channels {
            let value = match self.broker.get(channel).await {
                Ok(response) if response.is_success() => {
                    any_reached = true;
                    Value::String(response.body.trim().trim_matches('"').to_string())
                }
                Ok(response) => {
                    any_reached = true;
                    warn!("[GATEWAY] get {} failed with HTTP {}: {}", channel, response.status, response.excerpt());
                    Value::from(0)
                }
                Err(e) => {
                    warn!("[GATEWAY] get {} failed: {}", channel, e);
                    Value::from(0)
                }
            };
            values.insert(channel.to_string(), value);
        }

        if any_reached {
            Ok(values)
        } else {
            Err(GatewayError::Unreachable)
        }
    }

    /// flip a device on the broker, committing locally only once the broker accepted it
    pub async fn toggle_device(&self, device: Device) -> Result<bool, GatewayError> {
        // held across the update so concurrent toggles cannot both flip the same old value
        let mut devices = self.devices.lock().await;
        let new_state = !devices.get(device);
        let channel = self.channel_for(device);

        let response = self.broker.update(channel, i64::from(new_state)).await?;
        if !response.is_success() {
            return Err(GatewayError::Status { status: response.status, body: response.excerpt().to_string() });
        }

        devices.set(device, new_state);
        info!("[GATEWAY] {} toggled to {}", device, new_state);
        Ok(new_state)
    }
}
