//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Wire schema types and the message codec."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lower bound of a drive channel, in percent of full power.
pub const DRIVE_MIN: i32 = -100;
/// Upper bound of a drive channel, in percent of full power.
pub const DRIVE_MAX: i32 = 100;

/// 8-bit RGB triple used by the underglow strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb8 {
    /// Red component.
    pub r: u8,
    /// Green component.
    pub g: u8,
    /// Blue component.
    pub b: u8,
}

impl Rgb8 {
    /// Construct a colour from its components.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#rrggbb` colour picker value. The leading `#` is optional.
    pub fn from_hex(value: &str) -> Option<Self> {
        let digits = value.strip_prefix('#').unwrap_or(value);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let component = |range: std::ops::Range<usize>| {
            digits
                .get(range)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
        };
        Some(Self {
            r: component(0..2)?,
            g: component(2..4)?,
            b: component(4..6)?,
        })
    }

    /// Render as a lowercase `#rrggbb` string.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Turn indicator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Indicator {
    /// Indicators dark.
    #[default]
    Off,
    /// Left indicator blinking.
    Left,
    /// Right indicator blinking.
    Right,
    /// Both indicators blinking.
    Hazard,
}

impl Indicator {
    /// Wire code carried in the `indicators` field.
    pub const fn code(self) -> u8 {
        match self {
            Indicator::Off => 0,
            Indicator::Left => 1,
            Indicator::Right => 2,
            Indicator::Hazard => 3,
        }
    }

    /// Resolve a wire code, returning `None` for codes outside `0..=3`.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Indicator::Off),
            1 => Some(Indicator::Left),
            2 => Some(Indicator::Right),
            3 => Some(Indicator::Hazard),
            _ => None,
        }
    }
}

impl FromStr for Indicator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Indicator::Off),
            "left" => Ok(Indicator::Left),
            "right" => Ok(Indicator::Right),
            "hazard" => Ok(Indicator::Hazard),
            other => Err(format!("unknown indicator: {other}")),
        }
    }
}

/// Underglow animation modes understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnderglowMode {
    /// Solid colour.
    Static,
    /// Slow brightness pulse.
    Breathing,
    /// Hue cycle, ignores the configured colour.
    Rainbow,
    /// Running light.
    Chase,
}

impl UnderglowMode {
    /// Wire code carried in the `mode` field.
    pub const fn code(self) -> u8 {
        match self {
            UnderglowMode::Static => 0,
            UnderglowMode::Breathing => 1,
            UnderglowMode::Rainbow => 2,
            UnderglowMode::Chase => 3,
        }
    }

    /// Resolve a wire code, returning `None` for unknown modes.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(UnderglowMode::Static),
            1 => Some(UnderglowMode::Breathing),
            2 => Some(UnderglowMode::Rainbow),
            3 => Some(UnderglowMode::Chase),
            _ => None,
        }
    }
}

/// Reason reported by the device when its failsafe engages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailsafeReason {
    /// No command received within the device's timeout.
    CommTimeout,
    /// Battery dropped below the critical threshold.
    CriticalBattery,
    /// A motor stalled.
    MotorBlocked,
    /// Current limit exceeded.
    Overcurrent,
    /// Code this client does not know about, kept as reported.
    Unknown(i64),
}

impl FailsafeReason {
    /// Map a wire code; `0` means "no reason" and yields `None`.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(FailsafeReason::CommTimeout),
            2 => Some(FailsafeReason::CriticalBattery),
            3 => Some(FailsafeReason::MotorBlocked),
            4 => Some(FailsafeReason::Overcurrent),
            other => Some(FailsafeReason::Unknown(other)),
        }
    }

    /// Wire code for this reason.
    pub const fn code(self) -> i64 {
        match self {
            FailsafeReason::CommTimeout => 1,
            FailsafeReason::CriticalBattery => 2,
            FailsafeReason::MotorBlocked => 3,
            FailsafeReason::Overcurrent => 4,
            FailsafeReason::Unknown(code) => code,
        }
    }

    /// Operator-facing label.
    pub const fn label(self) -> &'static str {
        match self {
            FailsafeReason::CommTimeout => "Communication Timeout",
            FailsafeReason::CriticalBattery => "Critical Battery",
            FailsafeReason::MotorBlocked => "Motor Blocked",
            FailsafeReason::Overcurrent => "Overcurrent",
            FailsafeReason::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for FailsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outbound command shapes, discriminated by the `type` field on the wire.
///
/// Fields carry raw wire values; [`Command::validate`] enforces ranges and codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Differential drive power, sent on every cadence tick.
    Control {
        /// Left track power.
        left: i32,
        /// Right track power.
        right: i32,
    },
    /// Full light state.
    Lights {
        /// Headlights on.
        headlights: bool,
        /// Taillights on.
        taillights: bool,
        /// Indicator code, see [`Indicator::code`].
        indicators: u8,
    },
    /// Horn state.
    Horn {
        /// Horn sounding.
        state: bool,
    },
    /// Underglow colour and animation mode.
    Underglow {
        /// Red component.
        r: u8,
        /// Green component.
        g: u8,
        /// Blue component.
        b: u8,
        /// Mode code, see [`UnderglowMode::code`].
        mode: u8,
    },
}

/// Discriminant of a [`Command`], used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `control`
    Control,
    /// `lights`
    Lights,
    /// `horn`
    Horn,
    /// `underglow`
    Underglow,
}

impl CommandKind {
    /// Wire discriminator string.
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandKind::Control => "control",
            CommandKind::Lights => "lights",
            CommandKind::Horn => "horn",
            CommandKind::Underglow => "underglow",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    /// Discriminant of this command.
    pub const fn kind(&self) -> CommandKind {
        match self {
            Command::Control { .. } => CommandKind::Control,
            Command::Lights { .. } => CommandKind::Lights,
            Command::Horn { .. } => CommandKind::Horn,
            Command::Underglow { .. } => CommandKind::Underglow,
        }
    }
}

/// Battery section of a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReport {
    /// State of charge, 0–100.
    pub percentage: u8,
    /// Pack voltage.
    pub voltage: f64,
    /// Below the low-battery warning threshold.
    pub low: bool,
    /// Below the critical threshold.
    pub critical: bool,
}

/// Failsafe section of a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailsafeReport {
    /// Failsafe engaged.
    pub active: bool,
    /// Raw reason code; `0` when inactive. Any integer is accepted so that
    /// firmware codes unknown here still decode.
    #[serde(default)]
    pub reason: i64,
}

impl FailsafeReport {
    /// Decoded reason, `None` when the device reports code `0`.
    pub const fn reason(&self) -> Option<FailsafeReason> {
        FailsafeReason::from_code(self.reason)
    }
}

/// Measured motor output reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorReport {
    /// Measured left track speed.
    pub left_speed: i32,
    /// Measured right track speed.
    pub right_speed: i32,
}

/// Device view of the light outputs. Every field may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightsReport {
    /// Headlights on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headlights: Option<bool>,
    /// Taillights on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taillights: Option<bool>,
    /// Indicator code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<u8>,
    /// Underglow colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underglow: Option<Rgb8>,
}

/// One decoded inbound status update. Every top-level section is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Battery state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryReport>,
    /// Failsafe state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failsafe: Option<FailsafeReport>,
    /// Device uptime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Firmware version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Measured motor speeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motors: Option<MotorReport>,
    /// Light outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lights: Option<LightsReport>,
    /// Horn output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horn: Option<bool>,
    /// Device-side client connection flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}
