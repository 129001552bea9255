//! Telemetry and command wire formats
//!
//! The device streams msgpack-encoded state frames on the telemetry channel
//! and accepts JSON command envelopes on the command channel. Field names on
//! both sides match what the onboard firmware emits and parses.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One motor's reported state inside a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MotorUpdate {
    /// Commanded position in raw device units
    #[serde(rename = "Target")]
    pub target: i32,
    /// Measured position in raw device units
    #[serde(rename = "Current")]
    pub current: i32,
}

/// A full device state frame: every sensor region's pressure matrix and
/// every motor's target/current pair. Frames are complete snapshots, so a
/// dropped frame never leaves the model inconsistent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceUpdate {
    /// Region name to row-major pressure matrix
    #[serde(rename = "Sensors", default)]
    pub sensors: HashMap<String, Vec<Vec<u8>>>,
    /// Motor name to reported state
    #[serde(rename = "Motors", default)]
    pub motors: HashMap<String, MotorUpdate>,
}

impl DeviceUpdate {
    /// Decode a msgpack-encoded telemetry frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data)
            .map_err(|e| Error::DecodeError(format!("Bad telemetry frame: {}", e)))
    }
}

/// Command envelope sent to the device on the command channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmd {
    /// Command verb
    pub cmd: String,
    /// Target motor name, empty for commands that address the whole device
    #[serde(default)]
    pub name: String,
    /// Command argument; meaning depends on the verb
    #[serde(default)]
    pub value: i64,
}

impl Cmd {
    /// Position a motor on the normalized 0-255 scale
    pub fn set_motor(name: &str, value: u8) -> Self {
        Self {
            cmd: "set_motor".to_string(),
            name: name.to_string(),
            value: i64::from(value),
        }
    }

    /// Drive a motor to an absolute raw position, bypassing scaling
    pub fn motor_goto_raw(name: &str, value: i64) -> Self {
        Self {
            cmd: "motor_goto_raw".to_string(),
            name: name.to_string(),
            value,
        }
    }

    /// Write a raw value directly to a motor controller
    pub fn motor_write_raw(name: &str, value: i64) -> Self {
        Self {
            cmd: "motor_write_raw".to_string(),
            name: name.to_string(),
            value,
        }
    }

    /// Record the motor's current position as its home point
    pub fn motor_record_home(name: &str) -> Self {
        Self {
            cmd: "motor_record_home".to_string(),
            name: name.to_string(),
            value: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DeviceUpdate {
        let mut sensors = HashMap::new();
        sensors.insert(
            "left_mtp".to_string(),
            vec![vec![0u8, 10], vec![200, 255]],
        );
        let mut motors = HashMap::new();
        motors.insert(
            "left_pitch".to_string(),
            MotorUpdate {
                target: 1480,
                current: 1473,
            },
        );
        DeviceUpdate { sensors, motors }
    }

    #[test]
    fn test_decode_roundtrip() {
        let frame = sample_frame();
        let encoded = rmp_serde::to_vec_named(&frame).unwrap();
        let decoded = DeviceUpdate::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = DeviceUpdate::decode(&[0xc1, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn test_decode_empty_frame() {
        let encoded = rmp_serde::to_vec_named(&DeviceUpdate::default()).unwrap();
        let decoded = DeviceUpdate::decode(&encoded).unwrap();
        assert!(decoded.sensors.is_empty());
        assert!(decoded.motors.is_empty());
    }

    #[test]
    fn test_set_motor_envelope() {
        let cmd = Cmd::set_motor("left_pitch", 128);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "set_motor");
        assert_eq!(json["name"], "left_pitch");
        assert_eq!(json["value"], 128);
    }

    #[test]
    fn test_record_home_envelope() {
        let cmd = Cmd::motor_record_home("right_roll");
        assert_eq!(cmd.cmd, "motor_record_home");
        assert_eq!(cmd.value, 0);
    }
}
