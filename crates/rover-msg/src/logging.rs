//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Wire schema types and the message codec."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use tracing::debug;

/// Direction of the frame movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Command written to the link.
    Outbound,
    /// Telemetry read from the link.
    Inbound,
    /// Pending command replayed after a reconnect.
    Resync,
}

impl MessageDirection {
    /// Short label for log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageDirection::Outbound => "outbound",
            MessageDirection::Inbound => "inbound",
            MessageDirection::Resync => "resync",
        }
    }
}

/// Emit a structured log entry for link traffic.
pub fn log_message(direction: MessageDirection, kind: &str, bytes: usize) {
    debug!(
        direction = direction.as_str(),
        kind,
        bytes,
        "link frame"
    );
}
