//! ---
//! rover_section: "05-device-emulator"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Emulated vehicle controller serving the link endpoints."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use rover_common::SimConfig;
use rover_msg::{decode_command, encode_frame, log_message, MessageDirection};
use rover_rt::RateLimiter;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::device::DeviceModel;

const FRAME_CAPACITY: usize = 16;

struct EmulatorState {
    device: Mutex<DeviceModel>,
    frames: broadcast::Sender<String>,
}

impl EmulatorState {
    fn status_text(&self) -> Option<String> {
        let frame = self.device.lock().status_frame(Instant::now());
        match encode_frame(&frame) {
            Ok(text) => Some(text),
            Err(err) => {
                error!(error = %err, "failed to serialise status frame");
                None
            }
        }
    }
}

/// Builder for the emulated controller.
#[derive(Debug, Clone)]
pub struct EmulatorBuilder {
    config: SimConfig,
}

impl EmulatorBuilder {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Bind the listener, start the status ticker and serve `/ws` plus `/api/*`.
    pub async fn spawn(self) -> anyhow::Result<EmulatorHandle> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, version = %self.config.firmware_version, "device emulator listening");

        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        let state = Arc::new(EmulatorState {
            device: Mutex::new(DeviceModel::new(&self.config)),
            frames,
        });

        let app = Router::new()
            .route("/ws", get(upgrade_handler))
            .route("/api/status", get(status_handler))
            .route("/api/calibrate/motor", get(calibrate_motor_handler))
            .route("/api/calibrate/battery", get(calibrate_battery_handler))
            .route("/api/reset", get(reset_handler))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ticker = {
            let state = state.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            let mut limiter = RateLimiter::new(self.config.state_interval);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        now = limiter.tick() => {
                            state.device.lock().tick(now);
                            if let Some(text) = state.status_text() {
                                let _ = state.frames.send(text);
                            }
                        }
                    }
                }
            })
        };

        let server = {
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                });
                if let Err(err) = server.await {
                    warn!(error = %err, "emulator server exited with error");
                }
            })
        };

        Ok(EmulatorHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            server,
            ticker,
        })
    }
}

/// Handle for the running emulator.
pub struct EmulatorHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl EmulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// `ws://` URL of the streaming endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.address)
    }

    /// `http://` base URL of the calibration API.
    pub fn http_base(&self) -> String {
        format!("http://{}/", self.address)
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.ticker.await.map_err(|err| anyhow::anyhow!(err))?;
        self.server.await.map_err(|err| anyhow::anyhow!(err))
    }
}

#[derive(Debug, Serialize)]
struct Ack {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct BatteryCalibration {
    voltage: Option<f64>,
}

async fn status_handler(State(state): State<Arc<EmulatorState>>) -> Response {
    let frame = state.device.lock().status_frame(Instant::now());
    Json(frame).into_response()
}

async fn calibrate_motor_handler(State(state): State<Arc<EmulatorState>>) -> Json<Ack> {
    let success = state.device.lock().calibrate_motors();
    Json(Ack { success })
}

async fn calibrate_battery_handler(
    State(state): State<Arc<EmulatorState>>,
    Query(params): Query<BatteryCalibration>,
) -> Response {
    match params.voltage {
        Some(voltage) => {
            let success = state.device.lock().calibrate_battery(voltage);
            Json(Ack { success }).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "missing voltage parameter").into_response(),
    }
}

async fn reset_handler(State(state): State<Arc<EmulatorState>>) -> Json<Ack> {
    let success = state.device.lock().reset_failsafe();
    Json(Ack { success })
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<EmulatorState>>,
) -> Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: Arc<EmulatorState>) {
    let mut subscription = state.frames.subscribe();
    state.device.lock().client_connected();
    info!("operator connected");

    if let Some(text) = state.status_text() {
        if socket.send(Message::Text(text)).await.is_err() {
            state.device.lock().client_disconnected();
            return;
        }
    }

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let text = match frame {
                    Ok(text) => text,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "operator lagged behind; dropping status frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                match message {
                    Message::Text(text) => handle_command(&state, &text),
                    Message::Binary(_) => debug!("ignoring binary frame"),
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    state.device.lock().client_disconnected();
    info!("operator disconnected");
}

fn handle_command(state: &EmulatorState, text: &str) {
    match decode_command(text) {
        Ok(command) => {
            log_message(MessageDirection::Inbound, command.kind().as_str(), text.len());
            state.device.lock().apply(&command);
        }
        Err(err) => warn!(error = %err, "invalid command payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use rover_msg::{decode, FailsafeReason};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

    fn config() -> SimConfig {
        SimConfig {
            listen: "127.0.0.1:0".parse().expect("addr"),
            state_interval: Duration::from_millis(20),
            failsafe_timeout: Duration::from_millis(200),
            ..SimConfig::default()
        }
    }

    async fn next_status(
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> rover_msg::TelemetryFrame {
        loop {
            let message = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("status within deadline")
                .expect("stream open")
                .expect("frame ok");
            if let WsMessage::Text(text) = message {
                return decode(text.as_bytes()).expect("decodable status");
            }
        }
    }

    #[tokio::test]
    async fn commands_are_reflected_in_status_frames() {
        let handle = EmulatorBuilder::new(config()).spawn().await.expect("spawn");
        let (mut socket, _) = connect_async(handle.ws_url()).await.expect("connect");

        let greeting = next_status(&mut socket).await;
        assert_eq!(greeting.connected, Some(true));

        socket
            .send(WsMessage::Text(
                r#"{"type":"control","left":40,"right":-40}"#.into(),
            ))
            .await
            .expect("send control");
        socket
            .send(WsMessage::Text("{\"type\":".into()))
            .await
            .expect("send garbage");

        let mut matched = false;
        for _ in 0..20 {
            let frame = next_status(&mut socket).await;
            if frame.motors.map(|m| (m.left_speed, m.right_speed)) == Some((40, -40)) {
                matched = true;
                break;
            }
        }
        assert!(matched, "motor speeds never reflected the command");
        handle.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn silence_trips_failsafe_and_reset_clears_it() {
        let handle = EmulatorBuilder::new(config()).spawn().await.expect("spawn");
        let base = handle.http_base();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let status: rover_msg::TelemetryFrame = reqwest::get(format!("{base}api/status"))
            .await
            .expect("status")
            .json()
            .await
            .expect("json");
        let failsafe = status.failsafe.expect("failsafe");
        assert!(failsafe.active);
        assert_eq!(failsafe.reason(), Some(FailsafeReason::CommTimeout));

        let ack: serde_json::Value = reqwest::get(format!("{base}api/reset"))
            .await
            .expect("reset")
            .json()
            .await
            .expect("json");
        assert_eq!(ack, serde_json::json!({"success": true}));
        handle.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn battery_calibration_validates_voltage() {
        let handle = EmulatorBuilder::new(config()).spawn().await.expect("spawn");
        let base = handle.http_base();
        let client = reqwest::Client::new();

        let ack: serde_json::Value = client
            .get(format!("{base}api/calibrate/battery?voltage=-2"))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(ack["success"], false);

        let ack: serde_json::Value = client
            .get(format!("{base}api/calibrate/battery?voltage=12.6"))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(ack["success"], true);

        let missing = client
            .get(format!("{base}api/calibrate/battery"))
            .send()
            .await
            .expect("request");
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);
        handle.shutdown().await.expect("shutdown");
    }
}
