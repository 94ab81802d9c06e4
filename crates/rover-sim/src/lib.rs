//! ---
//! rover_section: "05-device-emulator"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Emulated vehicle controller serving the link endpoints."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Stand-in for the vehicle controller: streams status over `/ws`, applies
//! operator commands, and answers the calibration API.

pub mod device;
pub mod server;

pub use device::DeviceModel;
pub use server::{EmulatorBuilder, EmulatorHandle};
