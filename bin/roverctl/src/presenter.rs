//! ---
//! rover_section: "04-operator-console"
//! rover_subsection: "binary"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator console for the rover link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use anyhow::Result;
use rover_core::{BatteryLevel, ConnectionState, Notification, TelemetrySnapshot};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// The parts of a snapshot worth surfacing to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySummary {
    pub battery_level: BatteryLevel,
    pub battery_pct: Option<u8>,
    pub uptime: Option<String>,
    pub measured_left: i32,
    pub measured_right: i32,
    pub failsafe_active: bool,
}

impl From<&TelemetrySnapshot> for TelemetrySummary {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            battery_level: snapshot.battery_level(),
            battery_pct: snapshot.battery_pct,
            uptime: snapshot.uptime_display(),
            measured_left: snapshot.measured_left,
            measured_right: snapshot.measured_right,
            failsafe_active: snapshot.failsafe_active,
        }
    }
}

impl TelemetrySummary {
    /// Same summary apart from uptime, which moves every frame.
    fn same_readings(&self, other: &Self) -> bool {
        self.battery_level == other.battery_level
            && self.battery_pct == other.battery_pct
            && self.measured_left == other.measured_left
            && self.measured_right == other.measured_right
            && self.failsafe_active == other.failsafe_active
    }
}

pub fn battery_label(level: BatteryLevel) -> &'static str {
    match level {
        BatteryLevel::Normal => "normal",
        BatteryLevel::Warning => "warning",
        BatteryLevel::Critical => "critical",
    }
}

/// Logs connection changes, notifications and telemetry until shutdown.
pub struct Presenter {
    state: watch::Receiver<ConnectionState>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    notifications: broadcast::Receiver<Notification>,
    last: Option<TelemetrySummary>,
}

impl Presenter {
    pub fn new(
        state: watch::Receiver<ConnectionState>,
        telemetry: watch::Receiver<TelemetrySnapshot>,
        notifications: broadcast::Receiver<Notification>,
    ) -> Self {
        Self {
            state,
            telemetry,
            notifications,
            last: None,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.state.borrow_and_update();
                    info!(%state, "link state changed");
                }
                changed = self.telemetry.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let summary = TelemetrySummary::from(&*self.telemetry.borrow_and_update());
                    self.present(summary);
                }
                notification = self.notifications.recv() => match notification {
                    Ok(notification) => present_notification(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "presenter lagged behind notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("presenter stopped");
        Ok(())
    }

    fn present(&mut self, summary: TelemetrySummary) {
        if self
            .last
            .as_ref()
            .is_some_and(|last| last.same_readings(&summary))
        {
            return;
        }
        info!(
            battery = battery_label(summary.battery_level),
            battery_pct = ?summary.battery_pct,
            uptime = summary.uptime.as_deref().unwrap_or("--:--:--"),
            left = summary.measured_left,
            right = summary.measured_right,
            failsafe = summary.failsafe_active,
            "telemetry"
        );
        self.last = Some(summary);
    }
}

fn present_notification(notification: &Notification) {
    match notification {
        Notification::FailsafeEngaged { .. } => warn!(%notification, "device failsafe"),
        Notification::FailsafeCleared => info!(%notification, "device failsafe"),
        Notification::CommandRejected { .. } => warn!(%notification, "command rejected"),
    }
}
