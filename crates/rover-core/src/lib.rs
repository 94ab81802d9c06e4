//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Control-synchronization core for the rover link.
//!
//! A [`Session`] keeps one persistent channel to the device, turns operator
//! input into a bounded-rate command stream, and folds device telemetry into
//! a read-only snapshot without ever writing back into operator intent.

pub mod calibration;
pub mod connection;
pub mod dispatch;
pub mod input;
pub mod intent;
pub mod notify;
pub mod reconcile;
pub mod session;

pub use calibration::{CalibrationClient, CalibrationError};
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionOptions, ConnectionState, SendError,
};
pub use dispatch::DispatchLoop;
pub use input::{drive_from_vector, InputEvent};
pub use intent::{
    DriveIntent, IntentField, IntentStore, LightIntent, PendingCommand, UnderglowIntent,
};
pub use notify::Notification;
pub use reconcile::{
    format_uptime, BatteryLevel, DeviceOutputs, ReconcileTask, StateReconciler,
    TelemetrySnapshot,
};
pub use session::{Session, SessionOptions};
