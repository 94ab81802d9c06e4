//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Device-authoritative telemetry.
//!
//! Frames are merged last-frame-wins into a [`TelemetrySnapshot`]. The
//! reconciler has no access to the intent store; device light and horn state
//! land in a display copy only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rover_metrics::LinkMetrics;
use rover_msg::{
    decode, log_message, DecodeError, FailsafeReason, Indicator, MessageDirection, Rgb8,
    TelemetryFrame,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::notify::Notification;

/// Battery classification for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl BatteryLevel {
    /// Critical wins over low.
    pub const fn from_flags(low: bool, critical: bool) -> Self {
        if critical {
            BatteryLevel::Critical
        } else if low {
            BatteryLevel::Warning
        } else {
            BatteryLevel::Normal
        }
    }
}

/// Render seconds as `HH:MM:SS`. Hours grow past two digits when needed.
pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// What the device reports its outputs to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceOutputs {
    pub headlights: bool,
    pub taillights: bool,
    pub indicator: Indicator,
    pub underglow: Option<Rgb8>,
    pub horn: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub battery_pct: Option<u8>,
    pub battery_volts: Option<f64>,
    pub battery_low: bool,
    pub battery_critical: bool,
    pub failsafe_active: bool,
    pub failsafe_reason: Option<FailsafeReason>,
    pub uptime_seconds: Option<u64>,
    pub firmware_version: Option<String>,
    pub measured_left: i32,
    pub measured_right: i32,
    pub connected: bool,
    pub device: DeviceOutputs,
    pub frames: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    pub fn battery_level(&self) -> BatteryLevel {
        BatteryLevel::from_flags(self.battery_low, self.battery_critical)
    }

    pub fn uptime_display(&self) -> Option<String> {
        self.uptime_seconds.map(format_uptime)
    }

    /// Overwrite every field the frame carries.
    pub fn merge(&mut self, frame: &TelemetryFrame) {
        if let Some(battery) = &frame.battery {
            self.battery_pct = Some(battery.percentage);
            self.battery_volts = Some(battery.voltage);
            self.battery_low = battery.low;
            self.battery_critical = battery.critical;
        }
        if let Some(failsafe) = &frame.failsafe {
            self.failsafe_active = failsafe.active;
            self.failsafe_reason = failsafe.reason();
        }
        if let Some(uptime) = frame.uptime {
            self.uptime_seconds = Some(uptime);
        }
        if let Some(version) = &frame.version {
            self.firmware_version = Some(version.clone());
        }
        if let Some(motors) = &frame.motors {
            self.measured_left = motors.left_speed;
            self.measured_right = motors.right_speed;
        }
        if let Some(lights) = &frame.lights {
            if let Some(headlights) = lights.headlights {
                self.device.headlights = headlights;
            }
            if let Some(taillights) = lights.taillights {
                self.device.taillights = taillights;
            }
            if let Some(indicator) = lights.indicators.and_then(Indicator::from_code) {
                self.device.indicator = indicator;
            }
            if let Some(underglow) = lights.underglow {
                self.device.underglow = Some(underglow);
            }
        }
        if let Some(horn) = frame.horn {
            self.device.horn = horn;
        }
        if let Some(connected) = frame.connected {
            self.connected = connected;
        }
        self.frames += 1;
        self.updated_at = Some(Utc::now());
    }
}

/// Applies frames and tracks failsafe edges. Synchronous core of the task.
#[derive(Debug, Default)]
pub struct StateReconciler {
    snapshot: TelemetrySnapshot,
    announced: Option<FailsafeReason>,
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Decode and merge one payload. On error the snapshot is untouched.
    pub fn ingest(&mut self, payload: &[u8]) -> Result<Option<Notification>, DecodeError> {
        let frame = decode(payload)?;
        Ok(self.apply(&frame))
    }

    /// Merge a decoded frame. Returns a notification when the failsafe
    /// engages, changes reason, or clears.
    pub fn apply(&mut self, frame: &TelemetryFrame) -> Option<Notification> {
        self.snapshot.merge(frame);
        let failsafe = frame.failsafe.as_ref()?;
        if failsafe.active {
            let reason = failsafe
                .reason()
                .unwrap_or(FailsafeReason::Unknown(failsafe.reason));
            if self.announced == Some(reason) {
                return None;
            }
            self.announced = Some(reason);
            Some(Notification::FailsafeEngaged { reason })
        } else {
            self.announced
                .take()
                .map(|_| Notification::FailsafeCleared)
        }
    }
}

/// Task wrapper feeding link payloads through a [`StateReconciler`].
pub struct ReconcileTask {
    reconciler: StateReconciler,
    inbound: mpsc::Receiver<Vec<u8>>,
    snapshot: watch::Sender<TelemetrySnapshot>,
    notifications: broadcast::Sender<Notification>,
    metrics: LinkMetrics,
}

impl ReconcileTask {
    pub fn new(
        inbound: mpsc::Receiver<Vec<u8>>,
        snapshot: watch::Sender<TelemetrySnapshot>,
        notifications: broadcast::Sender<Notification>,
        metrics: LinkMetrics,
    ) -> Self {
        Self {
            reconciler: StateReconciler::new(),
            inbound,
            snapshot,
            notifications,
            metrics,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("reconciler shutdown signal received");
                    break;
                }
                payload = self.inbound.recv() => match payload {
                    Some(payload) => self.handle(&payload),
                    None => break,
                },
            }
        }
        Ok(())
    }

    fn handle(&mut self, payload: &[u8]) {
        self.metrics.record_frame();
        match self.reconciler.ingest(payload) {
            Ok(notification) => {
                log_message(MessageDirection::Inbound, "telemetry", payload.len());
                self.snapshot
                    .send_replace(self.reconciler.snapshot().clone());
                if let Some(notification) = notification {
                    info!(%notification, "device notification");
                    let _ = self.notifications.send(notification);
                }
            }
            Err(err) => {
                self.metrics.record_rejected();
                warn!(error = %err, bytes = payload.len(), "dropping undecodable frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATTERY_ONLY: &[u8] =
        br#"{"battery":{"percentage":42,"voltage":11.8,"low":false,"critical":false}}"#;

    #[test]
    fn partial_frame_only_touches_its_fields() {
        let mut reconciler = StateReconciler::new();
        reconciler
            .ingest(br#"{"uptime":90,"motors":{"leftSpeed":12,"rightSpeed":-12}}"#)
            .expect("valid");
        reconciler.ingest(BATTERY_ONLY).expect("valid");
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.battery_pct, Some(42));
        assert_eq!(snapshot.uptime_seconds, Some(90));
        assert_eq!(snapshot.measured_left, 12);
        assert_eq!(snapshot.frames, 2);
    }

    #[test]
    fn bad_frame_leaves_snapshot_untouched() {
        let mut reconciler = StateReconciler::new();
        reconciler.ingest(BATTERY_ONLY).expect("valid");
        let before = reconciler.snapshot().clone();
        assert!(reconciler.ingest(br#"{"type":"bogus""#).is_err());
        assert_eq!(reconciler.snapshot(), &before);
    }

    #[test]
    fn failsafe_notification_is_edge_triggered() {
        let mut reconciler = StateReconciler::new();
        let engaged = br#"{"failsafe":{"active":true,"reason":1}}"#;
        assert_eq!(
            reconciler.ingest(engaged).expect("valid"),
            Some(Notification::FailsafeEngaged {
                reason: FailsafeReason::CommTimeout
            })
        );
        assert_eq!(reconciler.ingest(engaged).expect("valid"), None);
        assert_eq!(
            reconciler
                .ingest(br#"{"failsafe":{"active":true,"reason":4}}"#)
                .expect("valid"),
            Some(Notification::FailsafeEngaged {
                reason: FailsafeReason::Overcurrent
            })
        );
        assert_eq!(
            reconciler
                .ingest(br#"{"failsafe":{"active":false,"reason":0}}"#)
                .expect("valid"),
            Some(Notification::FailsafeCleared)
        );
        assert_eq!(
            reconciler
                .ingest(br#"{"failsafe":{"active":false}}"#)
                .expect("valid"),
            None
        );
        assert!(matches!(
            reconciler.ingest(br#"{"failsafe":{"active":true,"reason":42}}"#),
            Ok(Some(Notification::FailsafeEngaged {
                reason: FailsafeReason::Unknown(42)
            }))
        ));
    }

    #[test]
    fn device_lights_update_display_copy() {
        let mut reconciler = StateReconciler::new();
        reconciler
            .ingest(br#"{"lights":{"headlights":true,"underglow":{"r":0,"g":255,"b":0}},"horn":true}"#)
            .expect("valid");
        let device = reconciler.snapshot().device;
        assert!(device.headlights);
        assert!(!device.taillights);
        assert_eq!(device.underglow, Some(Rgb8::new(0, 255, 0)));
        assert!(device.horn);
    }

    #[test]
    fn battery_level_and_uptime_helpers() {
        assert_eq!(BatteryLevel::from_flags(true, true), BatteryLevel::Critical);
        assert_eq!(BatteryLevel::from_flags(true, false), BatteryLevel::Warning);
        assert_eq!(BatteryLevel::from_flags(false, false), BatteryLevel::Normal);
        assert_eq!(format_uptime(0), "00:00:00");
        assert_eq!(format_uptime(3725), "01:02:05");
        assert_eq!(format_uptime(360_000), "100:00:00");
    }

    #[tokio::test]
    async fn task_publishes_snapshots_and_counts_rejects() {
        let (inbound_tx, inbound) = mpsc::channel(8);
        let (snapshot_tx, mut snapshot_rx) = watch::channel(TelemetrySnapshot::default());
        let (notify_tx, _notify_rx) = broadcast::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let metrics = LinkMetrics::unregistered();
        let task = ReconcileTask::new(inbound, snapshot_tx, notify_tx, metrics.clone());
        let join = tokio::spawn(task.run(shutdown_rx));

        inbound_tx.send(b"not json".to_vec()).await.expect("send");
        inbound_tx.send(BATTERY_ONLY.to_vec()).await.expect("send");
        snapshot_rx.changed().await.expect("snapshot published");
        assert_eq!(snapshot_rx.borrow().battery_pct, Some(42));
        drop(inbound_tx);
        join.await.expect("join").expect("task result");
        assert_eq!(metrics.frames_received(), 2);
        assert_eq!(metrics.frames_rejected(), 1);
    }
}
