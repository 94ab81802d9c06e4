//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use rover_common::AppConfig;
use rover_metrics::LinkMetrics;
use rover_msg::{Indicator, Rgb8};
use rover_rt::TaskSet;
use rover_transport::Connector;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::info;

use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionOptions, ConnectionState};
use crate::dispatch::DispatchLoop;
use crate::input::{drive_from_vector, InputEvent};
use crate::intent::{DriveIntent, IntentStore, LightIntent, UnderglowIntent};
use crate::notify::Notification;
use crate::reconcile::{ReconcileTask, TelemetrySnapshot};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect_interval: Duration,
    pub drive_period: Duration,
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            drive_period: Duration::from_millis(100),
            event_capacity: 64,
        }
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            reconnect_interval: config.link.reconnect_interval,
            drive_period: config.dispatch.drive_period,
            event_capacity: config.link.event_capacity,
        }
    }
}

/// One operator session against one device.
///
/// Owns the intent store and the telemetry snapshot, and runs three tasks:
/// the connection manager, the dispatch loop and the reconciler.
pub struct Session {
    intent: Arc<Mutex<IntentStore>>,
    changed: Arc<Notify>,
    connection: ConnectionHandle,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    notifications: broadcast::Sender<Notification>,
    shutdown: broadcast::Sender<()>,
    tasks: TaskSet,
    metrics: LinkMetrics,
}

impl Session {
    /// Spawn the session tasks. The link stays down until [`Session::connect`].
    pub fn start(
        connector: Arc<dyn Connector>,
        options: SessionOptions,
        metrics: LinkMetrics,
    ) -> Self {
        let capacity = options.event_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (notifications, _) = broadcast::channel(capacity);
        let (shutdown, _) = broadcast::channel(1);
        let (telemetry_tx, telemetry) = watch::channel(TelemetrySnapshot::default());
        let intent = Arc::new(Mutex::new(IntentStore::new()));
        let changed = Arc::new(Notify::new());

        let (manager, connection) = ConnectionManager::new(
            connector,
            &ConnectionOptions {
                reconnect_interval: options.reconnect_interval,
                request_capacity: capacity,
            },
            metrics.clone(),
            inbound_tx,
        );
        let dispatch = DispatchLoop::new(
            intent.clone(),
            changed.clone(),
            connection.clone(),
            notifications.clone(),
            metrics.clone(),
            options.drive_period,
        );
        let reconcile = ReconcileTask::new(
            inbound_rx,
            telemetry_tx,
            notifications.clone(),
            metrics.clone(),
        );

        let mut tasks = TaskSet::default();
        tasks.spawn("connection", manager.run());
        tasks.spawn("dispatch", dispatch.run(shutdown.subscribe()));
        tasks.spawn("reconcile", reconcile.run(shutdown.subscribe()));
        info!(
            reconnect_s = options.reconnect_interval.as_secs(),
            drive_period_ms = options.drive_period.as_millis() as u64,
            "session started"
        );

        Self {
            intent,
            changed,
            connection,
            telemetry,
            notifications,
            shutdown,
            tasks,
            metrics,
        }
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.borrow().clone()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.clone()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub fn drive(&self) -> DriveIntent {
        self.intent.lock().drive()
    }

    pub fn lights(&self) -> LightIntent {
        self.intent.lock().lights()
    }

    pub fn horn(&self) -> bool {
        self.intent.lock().horn()
    }

    pub fn underglow(&self) -> UnderglowIntent {
        self.intent.lock().underglow()
    }

    pub fn set_drive(&self, left: i32, right: i32) {
        self.intent.lock().set_drive(left, right);
    }

    pub fn release(&self) {
        self.intent.lock().release();
    }

    pub fn toggle_headlights(&self) -> bool {
        self.on_change(|intent| intent.toggle_headlights())
    }

    pub fn toggle_taillights(&self) -> bool {
        self.on_change(|intent| intent.toggle_taillights())
    }

    pub fn set_indicator(&self, indicator: Indicator) -> Indicator {
        self.on_change(|intent| intent.set_indicator(indicator))
    }

    pub fn set_horn(&self, on: bool) -> bool {
        self.on_change(|intent| intent.set_horn(on))
    }

    pub fn set_underglow(&self, color: Rgb8, mode: u8) -> UnderglowIntent {
        self.on_change(|intent| intent.set_underglow(color, mode))
    }

    /// Route one input event to the matching intent mutation.
    pub fn apply_input(&self, event: InputEvent) {
        match event {
            InputEvent::DriveVector { forward, turn } => {
                let (left, right) = drive_from_vector(forward, turn);
                self.set_drive(left, right);
            }
            InputEvent::Release => self.release(),
            InputEvent::ToggleHeadlights => {
                self.toggle_headlights();
            }
            InputEvent::ToggleTaillights => {
                self.toggle_taillights();
            }
            InputEvent::Indicator(indicator) => {
                self.set_indicator(indicator);
            }
            InputEvent::Horn(on) => {
                self.set_horn(on);
            }
            InputEvent::Underglow { color, mode } => {
                self.set_underglow(color, mode);
            }
        }
    }

    fn on_change<T>(&self, mutate: impl FnOnce(&mut IntentStore) -> T) -> T {
        let value = mutate(&mut self.intent.lock());
        self.changed.notify_one();
        value
    }

    /// Close the link, stop every task and wait for them to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.connection.close().await;
        let _ = self.shutdown.send(());
        self.connection.shutdown().await;
        self.tasks.join().await?;
        info!("session shutdown complete");
        Ok(())
    }
}
