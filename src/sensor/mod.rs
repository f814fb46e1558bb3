pub mod client;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::{Sensor, SensorClient};

/// One successful temperature sample from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn now(temperature: f64) -> Self {
        Self {
            temperature,
            timestamp: Utc::now(),
        }
    }
}

/// Last confirmed relay state. `Unknown` until the device has answered once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "On"),
            PowerState::Off => write!(f, "Off"),
            PowerState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A relay state we can actually ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTarget {
    On,
    Off,
}

impl PowerTarget {
    /// Tasmota `cmnd` query value, pre-encoded.
    pub(crate) fn command(self) -> &'static str {
        match self {
            PowerTarget::On => "Power%20On",
            PowerTarget::Off => "Power%20Off",
        }
    }

    pub fn as_state(self) -> PowerState {
        match self {
            PowerTarget::On => PowerState::On,
            PowerTarget::Off => PowerState::Off,
        }
    }
}

impl fmt::Display for PowerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerTarget::On => write!(f, "On"),
            PowerTarget::Off => write!(f, "Off"),
        }
    }
}

// Serde structs for the Tasmota `cm` endpoint payloads. Every level is
// optional: the device omits sections freely depending on firmware/sensor.

#[derive(Debug, Deserialize)]
pub(crate) struct StatusSnsResponse {
    #[serde(rename = "StatusSNS")]
    status_sns: Option<StatusSns>,
}

#[derive(Debug, Deserialize)]
struct StatusSns {
    #[serde(rename = "DS18B20")]
    ds18b20: Option<Ds18b20>,
}

#[derive(Debug, Deserialize)]
struct Ds18b20 {
    #[serde(rename = "Temperature")]
    temperature: Option<f64>,
}

impl StatusSnsResponse {
    pub(crate) fn temperature(&self) -> Option<f64> {
        self.status_sns.as_ref()?.ds18b20.as_ref()?.temperature
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PowerStatusResponse {
    #[serde(rename = "Status")]
    status: Option<PowerStatus>,
}

#[derive(Debug, Deserialize)]
struct PowerStatus {
    #[serde(rename = "Power")]
    power: Option<u8>,
}

impl PowerStatusResponse {
    /// Tasmota reports power as 0/1 in `status 9`.
    pub(crate) fn power_state(&self) -> Option<PowerState> {
        let power = self.status.as_ref()?.power?;
        Some(if power != 0 {
            PowerState::On
        } else {
            PowerState::Off
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PowerChangeResponse {
    #[serde(rename = "POWER")]
    power: Option<String>,
}

impl PowerChangeResponse {
    pub(crate) fn power_state(&self) -> Option<PowerState> {
        match self.power.as_deref()? {
            "ON" => Some(PowerState::On),
            "OFF" => Some(PowerState::Off),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_temperature_from_status_8_payload() {
        let raw = r#"{"StatusSNS":{"Time":"2021-01-30T18:09:25","DS18B20":{"Temperature":21.5},"TempUnit":"C"}}"#;
        let parsed: StatusSnsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.temperature(), Some(21.5));
    }

    #[test]
    fn missing_sensor_section_yields_no_temperature() {
        let parsed: StatusSnsResponse = serde_json::from_str(r#"{"StatusSNS":{}}"#).unwrap();
        assert_eq!(parsed.temperature(), None);

        let parsed: StatusSnsResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(parsed.temperature(), None);
    }

    #[test]
    fn power_status_maps_zero_and_nonzero() {
        let on: PowerStatusResponse =
            serde_json::from_str(r#"{"Status":{"Power":1}}"#).unwrap();
        assert_eq!(on.power_state(), Some(PowerState::On));

        let off: PowerStatusResponse =
            serde_json::from_str(r#"{"Status":{"Power":0}}"#).unwrap();
        assert_eq!(off.power_state(), Some(PowerState::Off));

        let missing: PowerStatusResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(missing.power_state(), None);
    }

    #[test]
    fn power_change_ack_parses_both_directions() {
        let on: PowerChangeResponse = serde_json::from_str(r#"{"POWER":"ON"}"#).unwrap();
        assert_eq!(on.power_state(), Some(PowerState::On));

        let off: PowerChangeResponse = serde_json::from_str(r#"{"POWER":"OFF"}"#).unwrap();
        assert_eq!(off.power_state(), Some(PowerState::Off));

        let odd: PowerChangeResponse = serde_json::from_str(r#"{"POWER":"TOGGLE"}"#).unwrap();
        assert_eq!(odd.power_state(), None);
    }
}
