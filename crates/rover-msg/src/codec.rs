//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Wire schema types and the message codec."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! JSON codec for the rover link.
//!
//! One transport message carries exactly one frame. Outbound commands are
//! validated before serialisation; inbound telemetry is parsed into a
//! [`TelemetryFrame`] and range-checked. Decoding never panics.

use serde_json::Value;
use thiserror::Error;

use crate::types::{
    Command, Indicator, TelemetryFrame, UnderglowMode, DRIVE_MAX, DRIVE_MIN,
};

/// Reasons an outbound command cannot be encoded.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Drive channel outside `[-100, 100]`.
    #[error("drive value {value} for {field} outside [-100, 100]")]
    DriveOutOfRange {
        /// `left` or `right`.
        field: &'static str,
        /// Offending value.
        value: i32,
    },
    /// Indicator code the firmware does not understand.
    #[error("unknown indicator code {0}")]
    UnknownIndicator(u8),
    /// Underglow mode code the firmware does not understand.
    #[error("unknown underglow mode {0}")]
    UnknownUnderglowMode(u8),
    /// Serialisation failure.
    #[error("serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons an inbound frame is rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid UTF-8.
    #[error("frame is not valid utf-8")]
    Utf8,
    /// Payload is not syntactically valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),
    /// Payload is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// A known field has the wrong shape.
    #[error("schema violation: {0}")]
    Schema(serde_json::Error),
    /// A known field holds a value outside its documented range.
    #[error("field {field} out of range: {value}")]
    OutOfRange {
        /// Dotted path of the field.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
    },
}

impl Command {
    /// Check drive bounds and enumerated codes.
    pub fn validate(&self) -> Result<(), EncodeError> {
        match *self {
            Command::Control { left, right } => {
                check_drive("left", left)?;
                check_drive("right", right)
            }
            Command::Lights { indicators, .. } => Indicator::from_code(indicators)
                .map(|_| ())
                .ok_or(EncodeError::UnknownIndicator(indicators)),
            Command::Horn { .. } => Ok(()),
            Command::Underglow { mode, .. } => UnderglowMode::from_code(mode)
                .map(|_| ())
                .ok_or(EncodeError::UnknownUnderglowMode(mode)),
        }
    }
}

fn check_drive(field: &'static str, value: i32) -> Result<(), EncodeError> {
    if (DRIVE_MIN..=DRIVE_MAX).contains(&value) {
        Ok(())
    } else {
        Err(EncodeError::DriveOutOfRange { field, value })
    }
}

/// Encode one outbound command as a text frame.
pub fn encode(command: &Command) -> Result<String, EncodeError> {
    command.validate()?;
    Ok(serde_json::to_string(command)?)
}

/// Decode one inbound telemetry frame from raw bytes.
pub fn decode(bytes: &[u8]) -> Result<TelemetryFrame, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::Utf8)?;
    decode_str(text)
}

/// Decode one inbound telemetry frame from text.
///
/// Unknown keys are ignored, including a stray `type` discriminator.
pub fn decode_str(text: &str) -> Result<TelemetryFrame, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let frame: TelemetryFrame = serde_json::from_value(value).map_err(DecodeError::Schema)?;
    check_frame(&frame)?;
    Ok(frame)
}

fn check_frame(frame: &TelemetryFrame) -> Result<(), DecodeError> {
    if let Some(battery) = &frame.battery {
        if battery.percentage > 100 {
            return Err(out_of_range("battery.percentage", battery.percentage));
        }
        if !battery.voltage.is_finite() || battery.voltage < 0.0 {
            return Err(out_of_range("battery.voltage", battery.voltage));
        }
    }
    if let Some(motors) = &frame.motors {
        if !(DRIVE_MIN..=DRIVE_MAX).contains(&motors.left_speed) {
            return Err(out_of_range("motors.leftSpeed", motors.left_speed));
        }
        if !(DRIVE_MIN..=DRIVE_MAX).contains(&motors.right_speed) {
            return Err(out_of_range("motors.rightSpeed", motors.right_speed));
        }
    }
    if let Some(indicators) = frame.lights.and_then(|lights| lights.indicators) {
        if Indicator::from_code(indicators).is_none() {
            return Err(out_of_range("lights.indicators", indicators));
        }
    }
    Ok(())
}

fn out_of_range(field: &'static str, value: impl ToString) -> DecodeError {
    DecodeError::OutOfRange {
        field,
        value: value.to_string(),
    }
}

/// Decode an outbound command. Used by the device emulator.
pub fn decode_command(text: &str) -> Result<Command, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    serde_json::from_value(value).map_err(DecodeError::Schema)
}

/// Encode a telemetry frame. Used by the device emulator.
pub fn encode_frame(frame: &TelemetryFrame) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LightsReport, Rgb8};

    #[test]
    fn battery_only_frame_leaves_other_fields_empty() {
        let frame = decode(
            br#"{"battery":{"percentage":42,"voltage":11.8,"low":false,"critical":false}}"#,
        )
        .expect("valid frame");
        let battery = frame.battery.expect("battery present");
        assert_eq!(battery.percentage, 42);
        assert!((battery.voltage - 11.8).abs() < f64::EPSILON);
        assert!(frame.failsafe.is_none());
        assert!(frame.motors.is_none());
        assert!(frame.lights.is_none());
        assert!(frame.uptime.is_none());
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let err = decode(br#"{"type":"bogus""#).expect_err("truncated");
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn non_object_and_bad_utf8_are_rejected() {
        assert!(matches!(decode(b"[1,2,3]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode(&[0xff, 0xfe]), Err(DecodeError::Utf8)));
    }

    #[test]
    fn wrong_field_shape_is_schema_error() {
        let err = decode_str(r#"{"uptime":"soon"}"#).expect_err("uptime must be numeric");
        assert!(matches!(err, DecodeError::Schema(_)));
        let err = decode_str(r#"{"battery":{"percentage":50}}"#).expect_err("missing voltage");
        assert!(matches!(err, DecodeError::Schema(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = decode_str(
            r#"{"battery":{"percentage":140,"voltage":11.0,"low":false,"critical":false}}"#,
        )
        .expect_err("percentage above 100");
        assert!(matches!(
            err,
            DecodeError::OutOfRange {
                field: "battery.percentage",
                ..
            }
        ));
        let err = decode_str(r#"{"motors":{"leftSpeed":0,"rightSpeed":-130}}"#)
            .expect_err("speed below -100");
        assert!(matches!(
            err,
            DecodeError::OutOfRange {
                field: "motors.rightSpeed",
                ..
            }
        ));
        assert!(decode_str(r#"{"lights":{"indicators":7}}"#).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let frame = decode_str(r#"{"type":"status","horn":true,"extra":{"nested":1}}"#)
            .expect("unknown keys tolerated");
        assert_eq!(frame.horn, Some(true));
    }

    #[test]
    fn full_status_frame_decodes() {
        let frame = decode_str(
            r#"{
                "battery":{"percentage":80,"voltage":12.1,"low":false,"critical":false},
                "failsafe":{"active":true,"reason":1},
                "uptime":3725,
                "version":"1.0.0",
                "motors":{"leftSpeed":-40,"rightSpeed":40},
                "lights":{"headlights":true,"taillights":false,"indicators":3,
                          "underglow":{"r":10,"g":20,"b":30}},
                "horn":false,
                "connected":true
            }"#,
        )
        .expect("full frame");
        assert_eq!(frame.uptime, Some(3725));
        assert_eq!(frame.version.as_deref(), Some("1.0.0"));
        assert_eq!(frame.motors.map(|m| m.left_speed), Some(-40));
        let failsafe = frame.failsafe.expect("failsafe present");
        assert_eq!(
            failsafe.reason(),
            Some(crate::types::FailsafeReason::CommTimeout)
        );
        assert_eq!(
            frame.lights.and_then(|l| l.underglow),
            Some(Rgb8::new(10, 20, 30))
        );
    }

    #[test]
    fn unrecognised_failsafe_codes_keep_the_rest_of_the_frame() {
        for (code, expected) in [(300, 300), (-1, -1)] {
            let frame = decode_str(&format!(
                r#"{{"battery":{{"percentage":42,"voltage":11.8,"low":false,"critical":false}},
                    "failsafe":{{"active":true,"reason":{code}}}}}"#
            ))
            .expect("unknown failsafe code still decodes");
            assert_eq!(frame.battery.map(|b| b.percentage), Some(42));
            assert_eq!(
                frame.failsafe.and_then(|f| f.reason()),
                Some(crate::types::FailsafeReason::Unknown(expected))
            );
        }
    }

    #[test]
    fn underglow_colour_survives_device_echo() {
        let text = encode(&Command::Underglow {
            r: 0,
            g: 255,
            b: 0,
            mode: 2,
        })
        .expect("encode underglow");
        let sent: Command = decode_command(&text).expect("emulator view");
        let Command::Underglow { r, g, b, .. } = sent else {
            panic!("wrong command kind: {sent:?}");
        };
        let echo = TelemetryFrame {
            lights: Some(LightsReport {
                underglow: Some(Rgb8::new(r, g, b)),
                ..LightsReport::default()
            }),
            ..TelemetryFrame::default()
        };
        let echoed = decode_str(&encode_frame(&echo).expect("encode echo")).expect("decode echo");
        assert_eq!(
            echoed.lights.and_then(|l| l.underglow),
            Some(Rgb8::new(0, 255, 0))
        );
    }

    #[test]
    fn encode_rejects_invalid_commands() {
        let err = encode(&Command::Control {
            left: 101,
            right: 0,
        })
        .expect_err("left too large");
        assert!(matches!(
            err,
            EncodeError::DriveOutOfRange {
                field: "left",
                value: 101
            }
        ));
        assert!(matches!(
            encode(&Command::Lights {
                headlights: true,
                taillights: false,
                indicators: 4,
            }),
            Err(EncodeError::UnknownIndicator(4))
        ));
        assert!(matches!(
            encode(&Command::Underglow {
                r: 1,
                g: 2,
                b: 3,
                mode: 9,
            }),
            Err(EncodeError::UnknownUnderglowMode(9))
        ));
    }

    #[test]
    fn control_frame_matches_wire_shape() {
        let text = encode(&Command::Control {
            left: -100,
            right: 35,
        })
        .expect("encode control");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"type": "control", "left": -100, "right": 35})
        );
    }

    #[test]
    fn command_without_type_is_rejected() {
        assert!(matches!(
            decode_command(r#"{"left":1,"right":2}"#),
            Err(DecodeError::Schema(_))
        ));
    }
}
