//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::fmt;

use rover_msg::{CommandKind, FailsafeReason};

/// One-shot operator notifications fanned out over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Device failsafe engaged, or its reason changed while engaged.
    FailsafeEngaged { reason: FailsafeReason },
    /// Device failsafe released.
    FailsafeCleared,
    /// A command could not be encoded and was discarded.
    CommandRejected { kind: CommandKind, reason: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::FailsafeEngaged { reason } => {
                write!(f, "Failsafe activated: {}", reason.label())
            }
            Notification::FailsafeCleared => f.write_str("Failsafe cleared"),
            Notification::CommandRejected { kind, reason } => {
                write!(f, "Command {kind} rejected: {reason}")
            }
        }
    }
}
