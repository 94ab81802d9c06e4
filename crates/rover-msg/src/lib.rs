//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Wire schema types and the message codec."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Wire model shared by the operator console and the device emulator.
#![warn(missing_docs)]

pub mod codec;
pub mod logging;
pub mod types;

pub use codec::{decode, decode_command, decode_str, encode, encode_frame, DecodeError, EncodeError};
pub use logging::{log_message, MessageDirection};
pub use types::{
    BatteryReport, Command, CommandKind, FailsafeReason, FailsafeReport, Indicator, LightsReport,
    MotorReport, Rgb8, TelemetryFrame, UnderglowMode, DRIVE_MAX, DRIVE_MIN,
};
