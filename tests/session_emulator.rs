//! ---
//! rover_section: "15-testing-qa-runbook"
//! rover_subsection: "integration-tests"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Session against the device emulator over a real WebSocket."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use rover_common::SimConfig;
use rover_core::{
    CalibrationClient, ConnectionState, Notification, Session, SessionOptions, TelemetrySnapshot,
};
use rover_metrics::LinkMetrics;
use rover_msg::{FailsafeReason, Indicator};
use rover_sim::{EmulatorBuilder, EmulatorHandle};
use rover_transport::WebSocketConnector;
use tokio::sync::watch;
use tokio::time::timeout;
use url::Url;

const DEADLINE: Duration = Duration::from_secs(5);

async fn emulator(battery_voltage: f64) -> EmulatorHandle {
    EmulatorBuilder::new(SimConfig {
        listen: "127.0.0.1:0".parse().expect("addr"),
        state_interval: Duration::from_millis(20),
        failsafe_timeout: Duration::from_millis(500),
        battery_voltage,
        ..SimConfig::default()
    })
    .spawn()
    .await
    .expect("emulator starts")
}

fn session(handle: &EmulatorHandle) -> Session {
    let url = Url::parse(&handle.ws_url()).expect("ws url");
    Session::start(
        Arc::new(WebSocketConnector::new(url)),
        SessionOptions {
            reconnect_interval: Duration::from_millis(200),
            drive_period: Duration::from_millis(50),
            event_capacity: 64,
        },
        LinkMetrics::unregistered(),
    )
}

async fn connected(session: &Session) {
    let mut state = session.subscribe_state();
    timeout(
        DEADLINE,
        state.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .expect("connected within deadline")
    .expect("state channel open");
}

async fn telemetry_until(
    telemetry: &mut watch::Receiver<TelemetrySnapshot>,
    predicate: impl FnMut(&TelemetrySnapshot) -> bool,
) -> TelemetrySnapshot {
    timeout(DEADLINE, telemetry.wait_for(predicate))
        .await
        .expect("telemetry within deadline")
        .expect("telemetry channel open")
        .clone()
}

#[tokio::test]
async fn operator_commands_are_reflected_in_device_telemetry() {
    let handle = emulator(11.8).await;
    let session = session(&handle);
    session.connect().await;
    connected(&session).await;

    session.set_drive(40, -40);
    session.toggle_headlights();
    session.set_indicator(Indicator::Left);
    session.set_horn(true);

    let mut telemetry = session.subscribe_telemetry();
    let snapshot = telemetry_until(&mut telemetry, |snapshot| {
        snapshot.measured_left == 40
            && snapshot.measured_right == -40
            && snapshot.device.headlights
            && snapshot.device.indicator == Indicator::Left
            && snapshot.device.horn
    })
    .await;
    assert!(snapshot.connected);
    assert_eq!(snapshot.firmware_version.as_deref(), Some("1.0.0"));
    assert!(!snapshot.failsafe_active);

    // Intent stays operator-owned.
    assert!(session.lights().headlights);
    assert!(session.metrics().sent("control") > 0);
    assert!(session.metrics().frames_received() > 0);
    assert_eq!(session.metrics().connection_state(), 2);

    session.release();
    telemetry_until(&mut telemetry, |snapshot| {
        snapshot.measured_left == 0 && snapshot.measured_right == 0
    })
    .await;

    session.shutdown().await.expect("session shutdown");
    handle.shutdown().await.expect("emulator shutdown");
}

#[tokio::test]
async fn critical_battery_failsafe_is_announced_and_cleared() {
    let handle = emulator(9.2).await;
    let session = session(&handle);
    let mut notifications = session.subscribe_notifications();
    session.connect().await;
    connected(&session).await;

    let engaged = timeout(DEADLINE, notifications.recv())
        .await
        .expect("notification within deadline")
        .expect("notification");
    assert_eq!(
        engaged,
        Notification::FailsafeEngaged {
            reason: FailsafeReason::CriticalBattery
        }
    );
    assert_eq!(engaged.to_string(), "Failsafe activated: Critical Battery");

    let api = CalibrationClient::new(
        Url::parse(&handle.http_base()).expect("http url"),
        Duration::from_secs(2),
    )
    .expect("client");
    assert!(!api.reset_failsafe().await.expect("reset call"));
    assert!(api.calibrate_battery(11.0).await.expect("calibrate call"));
    assert!(api.reset_failsafe().await.expect("reset call"));

    let cleared = timeout(DEADLINE, notifications.recv())
        .await
        .expect("notification within deadline")
        .expect("notification");
    assert_eq!(cleared, Notification::FailsafeCleared);

    let mut telemetry = session.subscribe_telemetry();
    let snapshot = telemetry_until(&mut telemetry, |snapshot| !snapshot.failsafe_active).await;
    assert!(!snapshot.battery_critical);

    session.shutdown().await.expect("session shutdown");
    handle.shutdown().await.expect("emulator shutdown");
}

#[tokio::test]
async fn closing_the_session_lets_the_device_time_out() {
    let handle = emulator(11.8).await;
    let session = session(&handle);
    session.connect().await;
    connected(&session).await;
    session.close().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    session.shutdown().await.expect("session shutdown");

    let api = CalibrationClient::new(
        Url::parse(&handle.http_base()).expect("http url"),
        Duration::from_secs(2),
    )
    .expect("client");
    tokio::time::sleep(Duration::from_millis(800)).await;
    let status = api.fetch_status().await.expect("status");
    let failsafe = status.failsafe.expect("failsafe block");
    assert!(failsafe.active);
    assert_eq!(failsafe.reason(), Some(FailsafeReason::CommTimeout));
    assert_eq!(status.connected, Some(false));
    handle.shutdown().await.expect("emulator shutdown");
}
