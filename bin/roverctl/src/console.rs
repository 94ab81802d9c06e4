//! ---
//! rover_section: "04-operator-console"
//! rover_subsection: "binary"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator console for the rover link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Line-oriented input source for `roverctl run`.

use std::str::FromStr;

use rover_core::InputEvent;
use rover_msg::{Indicator, Rgb8, UnderglowMode};

pub const HELP: &str = "commands: drive <forward> <turn> | release | headlights | taillights | \
indicator <off|left|right|hazard> | horn <on|off> | underglow <#rrggbb> [mode] | status | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Input(InputEvent),
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = words.collect();
        let command = match (verb.to_lowercase().as_str(), args.as_slice()) {
            ("drive", [forward, turn]) => ConsoleCommand::Input(InputEvent::DriveVector {
                forward: parse_axis(forward)?,
                turn: parse_axis(turn)?,
            }),
            ("release" | "stop", []) => ConsoleCommand::Input(InputEvent::Release),
            ("headlights", []) => ConsoleCommand::Input(InputEvent::ToggleHeadlights),
            ("taillights", []) => ConsoleCommand::Input(InputEvent::ToggleTaillights),
            ("indicator", [state]) => {
                ConsoleCommand::Input(InputEvent::Indicator(state.parse::<Indicator>()?))
            }
            ("horn", [state]) => ConsoleCommand::Input(InputEvent::Horn(parse_switch(state)?)),
            ("underglow", [colour, rest @ ..]) if rest.len() <= 1 => {
                let color = Rgb8::from_hex(colour)
                    .ok_or_else(|| format!("invalid colour {colour}, expected #rrggbb"))?;
                let mode = match rest.first() {
                    Some(mode) => parse_mode(mode)?,
                    None => UnderglowMode::Static.code(),
                };
                ConsoleCommand::Input(InputEvent::Underglow { color, mode })
            }
            ("status", []) => ConsoleCommand::Status,
            ("help" | "?", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            _ => return Err(format!("unrecognised command: {line}")),
        };
        Ok(command)
    }
}

fn parse_axis(value: &str) -> Result<f64, String> {
    let axis: f64 = value
        .parse()
        .map_err(|_| format!("invalid axis value {value}"))?;
    if !(-1.0..=1.0).contains(&axis) {
        return Err(format!("axis value {value} outside [-1, 1]"));
    }
    Ok(axis)
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on/off, got {other}")),
    }
}

/// Mode by name or raw code. Unknown numeric codes pass through so the
/// encoder can reject them.
fn parse_mode(value: &str) -> Result<u8, String> {
    let mode = match value.to_lowercase().as_str() {
        "static" => UnderglowMode::Static.code(),
        "breathing" => UnderglowMode::Breathing.code(),
        "rainbow" => UnderglowMode::Rainbow.code(),
        "chase" => UnderglowMode::Chase.code(),
        other => other
            .parse::<u8>()
            .map_err(|_| format!("unknown underglow mode {other}"))?,
    };
    Ok(mode)
}
