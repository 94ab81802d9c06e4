//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Shared primitives and utilities for the link runtime."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Shared primitives for the Rover Link workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the core, the emulator, and the console binary.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CalibrationConfig, DispatchConfig, LinkConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, SimConfig,
};
pub use logging::{init_tracing, LogFormat};
