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
use rover_metrics::LinkMetrics;
use rover_msg::{encode, log_message, Command, MessageDirection};
use rover_rt::RateLimiter;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionState, SendError};
use crate::intent::IntentStore;
use crate::notify::Notification;

/// Writes operator intent to the link.
///
/// Drive intent goes out on every cadence tick while connected. Lights, horn
/// and underglow go out when they change, and pending changes are replayed
/// once when the link comes (back) up.
pub struct DispatchLoop {
    intent: Arc<Mutex<IntentStore>>,
    changed: Arc<Notify>,
    connection: ConnectionHandle,
    state: watch::Receiver<ConnectionState>,
    notifications: broadcast::Sender<Notification>,
    metrics: LinkMetrics,
    period: Duration,
}

impl DispatchLoop {
    pub fn new(
        intent: Arc<Mutex<IntentStore>>,
        changed: Arc<Notify>,
        connection: ConnectionHandle,
        notifications: broadcast::Sender<Notification>,
        metrics: LinkMetrics,
        period: Duration,
    ) -> Self {
        let state = connection.subscribe();
        Self {
            intent,
            changed,
            connection,
            state,
            notifications,
            metrics,
            period,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut limiter = RateLimiter::new(self.period);
        info!(period_ms = self.period.as_millis() as u64, "dispatch loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("dispatch loop shutdown signal received");
                    break;
                }
                _ = limiter.tick() => self.dispatch_drive().await,
                _ = self.changed.notified() => {
                    self.dispatch_pending(MessageDirection::Outbound).await;
                }
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.state.borrow_and_update();
                    if state == ConnectionState::Connected {
                        self.dispatch_pending(MessageDirection::Resync).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// One cadence tick. A tick while the link is down is dropped.
    pub async fn dispatch_drive(&self) {
        if !self.connected() {
            return;
        }
        let drive = self.intent.lock().drive();
        self.transmit(drive.to_command(), MessageDirection::Outbound)
            .await;
    }

    /// Send every pending on-change field. Fields whose send fails stay
    /// pending; fields that cannot be encoded are discarded.
    pub async fn dispatch_pending(&self, direction: MessageDirection) {
        if !self.connected() {
            return;
        }
        let pending = self.intent.lock().pending_commands();
        for item in pending {
            let delivered = self.transmit(item.command, direction).await;
            match delivered {
                Delivery::Sent | Delivery::Rejected => {
                    self.intent.lock().mark_dispatched(item.field, item.revision);
                }
                Delivery::Failed => break,
            }
        }
    }

    async fn transmit(&self, command: Command, direction: MessageDirection) -> Delivery {
        let kind = command.kind();
        let text = match encode(&command) {
            Ok(text) => text,
            Err(err) => {
                warn!(kind = %kind, error = %err, "command rejected by encoder");
                self.metrics.record_dropped(kind.as_str(), "encode");
                let _ = self.notifications.send(Notification::CommandRejected {
                    kind,
                    reason: err.to_string(),
                });
                return Delivery::Rejected;
            }
        };
        let bytes = text.len();
        match self.connection.send(text).await {
            Ok(()) => {
                log_message(direction, kind.as_str(), bytes);
                self.metrics.record_sent(kind.as_str());
                Delivery::Sent
            }
            Err(SendError::NotConnected) => {
                debug!(kind = %kind, "link went down before send");
                self.metrics.record_dropped(kind.as_str(), "disconnected");
                Delivery::Failed
            }
            Err(err) => {
                debug!(kind = %kind, error = %err, "send failed");
                self.metrics.record_dropped(kind.as_str(), "transport");
                Delivery::Failed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Rejected,
    Failed,
}
