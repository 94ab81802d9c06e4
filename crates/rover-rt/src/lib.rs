//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Runtime helpers for the link tasks."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Timing helpers for the rover link runtime.

pub mod scheduling;

pub use scheduling::{RateLimiter, RetryTimer, TaskSet};
