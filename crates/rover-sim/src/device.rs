//! ---
//! rover_section: "05-device-emulator"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Emulated vehicle controller serving the link endpoints."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Emulated controller state.
//!
//! Mirrors the firmware's observable behaviour: commands drive outputs, a
//! communication timeout engages the failsafe, a failsafe other than a
//! critical battery recovers on its own after a while, and the battery
//! reading is a 3S pack seen through a calibratable voltage divider.

use std::time::Duration;

use rover_common::SimConfig;
use rover_msg::{
    BatteryReport, Command, FailsafeReason, FailsafeReport, Indicator, LightsReport, MotorReport,
    Rgb8, TelemetryFrame,
};
use tokio::time::Instant;
use tracing::{info, warn};

pub const BATTERY_FULL_VOLTAGE: f64 = 12.6;
pub const BATTERY_EMPTY_VOLTAGE: f64 = 9.0;
pub const BATTERY_LOW_THRESHOLD: f64 = 10.0;
pub const BATTERY_CRITICAL_THRESHOLD: f64 = 9.5;

#[derive(Debug, Clone)]
pub struct DeviceModel {
    firmware_version: String,
    failsafe_timeout: Duration,
    failsafe_recovery: Duration,
    started: Instant,
    last_command: Instant,
    left: i32,
    right: i32,
    headlights: bool,
    taillights: bool,
    indicator: Indicator,
    horn: bool,
    underglow: Rgb8,
    underglow_mode: u8,
    failsafe: Option<FailsafeReason>,
    engaged_at: Instant,
    raw_voltage: f64,
    divider_ratio: f64,
    clients: usize,
    motor_calibrations: u32,
}

impl DeviceModel {
    pub fn new(config: &SimConfig) -> Self {
        let now = Instant::now();
        Self {
            firmware_version: config.firmware_version.clone(),
            failsafe_timeout: config.failsafe_timeout,
            failsafe_recovery: config.failsafe_recovery,
            started: now,
            last_command: now,
            left: 0,
            right: 0,
            headlights: false,
            taillights: false,
            indicator: Indicator::Off,
            horn: false,
            underglow: Rgb8::default(),
            underglow_mode: 0,
            failsafe: None,
            engaged_at: now,
            raw_voltage: config.battery_voltage,
            divider_ratio: 1.0,
            clients: 0,
            motor_calibrations: 0,
        }
    }

    /// Apply one operator command and refresh command recency.
    pub fn apply(&mut self, command: &Command) {
        self.last_command = Instant::now();
        match *command {
            Command::Control { left, right } => {
                self.left = left.clamp(-100, 100);
                self.right = right.clamp(-100, 100);
            }
            Command::Lights {
                headlights,
                taillights,
                indicators,
            } => {
                self.headlights = headlights;
                self.taillights = taillights;
                match Indicator::from_code(indicators) {
                    Some(indicator) => self.indicator = indicator,
                    None => warn!(indicators, "ignoring unknown indicator code"),
                }
            }
            Command::Horn { state } => self.horn = state,
            Command::Underglow { r, g, b, mode } => {
                self.underglow = Rgb8::new(r, g, b);
                self.underglow_mode = mode;
            }
        }
    }

    /// Periodic failsafe evaluation. While engaged only recovery is checked.
    pub fn tick(&mut self, now: Instant) {
        if let Some(reason) = self.failsafe {
            let engaged_for = now.saturating_duration_since(self.engaged_at);
            if reason != FailsafeReason::CriticalBattery && engaged_for >= self.failsafe_recovery {
                info!(reason = %reason, "failsafe recovery time elapsed");
                self.clear(now);
            }
            return;
        }
        if now.saturating_duration_since(self.last_command) >= self.failsafe_timeout {
            self.trigger(FailsafeReason::CommTimeout, now);
        } else if self.voltage() < BATTERY_CRITICAL_THRESHOLD {
            self.trigger(FailsafeReason::CriticalBattery, now);
        }
    }

    fn trigger(&mut self, reason: FailsafeReason, now: Instant) {
        warn!(reason = %reason, "failsafe engaged");
        self.failsafe = Some(reason);
        self.engaged_at = now;
        self.left = 0;
        self.right = 0;
        if reason == FailsafeReason::CommTimeout {
            self.indicator = Indicator::Hazard;
        }
    }

    /// Clear the failsafe. Refused while a critical battery is still critical.
    pub fn reset_failsafe(&mut self) -> bool {
        if self.failsafe == Some(FailsafeReason::CriticalBattery)
            && self.voltage() < BATTERY_CRITICAL_THRESHOLD
        {
            warn!("cannot reset failsafe: battery still critical");
            return false;
        }
        self.clear(Instant::now());
        true
    }

    fn clear(&mut self, now: Instant) {
        if self.failsafe.take().is_some() {
            info!("failsafe reset");
            self.indicator = Indicator::Off;
        }
        self.last_command = now;
    }

    /// Rescale the divider ratio so the reading matches a measured voltage.
    pub fn calibrate_battery(&mut self, measured: f64) -> bool {
        if !measured.is_finite() || measured <= 0.0 || self.raw_voltage <= 0.0 {
            warn!(measured, "invalid measured voltage for calibration");
            return false;
        }
        self.divider_ratio = measured / self.raw_voltage;
        info!(measured, ratio = self.divider_ratio, "battery calibrated");
        true
    }

    pub fn calibrate_motors(&mut self) -> bool {
        self.motor_calibrations += 1;
        info!(runs = self.motor_calibrations, "motor calibration complete");
        true
    }

    pub fn client_connected(&mut self) {
        self.clients += 1;
    }

    pub fn client_disconnected(&mut self) {
        self.clients = self.clients.saturating_sub(1);
    }

    pub fn failsafe(&self) -> Option<FailsafeReason> {
        self.failsafe
    }

    pub fn voltage(&self) -> f64 {
        self.raw_voltage * self.divider_ratio
    }

    /// Voltage as reported on the wire, in centivolts precision.
    fn reported_voltage(&self) -> f64 {
        (self.voltage() * 100.0).round() / 100.0
    }

    /// Linear charge estimate, truncated to a whole percent.
    pub fn battery_percentage(&self) -> u8 {
        let span = BATTERY_FULL_VOLTAGE - BATTERY_EMPTY_VOLTAGE;
        let pct = (self.reported_voltage() - BATTERY_EMPTY_VOLTAGE) / span * 100.0;
        pct.clamp(0.0, 100.0).floor() as u8
    }

    /// Measured speed: commanded speed unless the failsafe holds the motors.
    pub fn measured_speed(&self) -> (i32, i32) {
        if self.failsafe.is_some() {
            (0, 0)
        } else {
            (self.left, self.right)
        }
    }

    /// Full status frame as pushed over `/ws` and served on `/api/status`.
    pub fn status_frame(&self, now: Instant) -> TelemetryFrame {
        let voltage = self.voltage();
        let (left_speed, right_speed) = self.measured_speed();
        TelemetryFrame {
            battery: Some(BatteryReport {
                percentage: self.battery_percentage(),
                voltage: self.reported_voltage(),
                low: voltage < BATTERY_LOW_THRESHOLD,
                critical: voltage < BATTERY_CRITICAL_THRESHOLD,
            }),
            failsafe: Some(FailsafeReport {
                active: self.failsafe.is_some(),
                reason: self.failsafe.map_or(0, FailsafeReason::code),
            }),
            uptime: Some(now.saturating_duration_since(self.started).as_secs()),
            version: Some(self.firmware_version.clone()),
            motors: Some(MotorReport {
                left_speed,
                right_speed,
            }),
            lights: Some(LightsReport {
                headlights: Some(self.headlights),
                taillights: Some(self.taillights),
                indicators: Some(self.indicator.code()),
                underglow: Some(self.underglow),
            }),
            horn: Some(self.horn),
            connected: Some(self.clients > 0),
        }
    }
}
