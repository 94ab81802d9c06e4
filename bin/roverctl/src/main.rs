//! ---
//! rover_section: "04-operator-console"
//! rover_subsection: "binary"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Binary entrypoint for the roverctl operator console."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
mod console;
mod presenter;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rover_common::{init_tracing, AppConfig};
use rover_core::{CalibrationClient, Session, SessionOptions, TelemetrySnapshot};
use rover_metrics::{new_registry, spawn_http_server, LinkMetrics};
use rover_sim::EmulatorBuilder;
use rover_transport::WebSocketConnector;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::console::{ConsoleCommand, HELP};
use crate::presenter::{battery_label, Presenter};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("roverctl ", env!("CARGO_PKG_VERSION")),
    about = "Rover operator console",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        env = "ROVER_URL",
        value_name = "URL",
        help = "Override the device streaming endpoint (ws:// or wss://)"
    )]
    url: Option<Url>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Connect to the device and drive it from stdin")]
    Run,
    #[command(about = "Run the motor calibration routine on the device")]
    CalibrateMotors,
    #[command(about = "Calibrate the battery sensor against a measured voltage")]
    CalibrateBattery {
        #[arg(long, help = "Measured pack voltage in volts")]
        voltage: f64,
    },
    #[command(about = "Clear an active failsafe")]
    ResetFailsafe,
    #[command(about = "Fetch and print one status frame over HTTP")]
    Status,
    #[command(about = "Run the device emulator")]
    Sim,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/roverctl.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(url) = cli.url {
        config.link.url = Some(url);
        config.link.validate()?;
    }
    init_tracing("roverctl", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_console(config).await?,
        Commands::CalibrateMotors => {
            let ok = calibration_client(&config)?.calibrate_motors().await?;
            render_ack("Motor calibration", ok)?;
        }
        Commands::CalibrateBattery { voltage } => {
            let ok = calibration_client(&config)?
                .calibrate_battery(voltage)
                .await?;
            render_ack("Battery calibration", ok)?;
        }
        Commands::ResetFailsafe => {
            let ok = calibration_client(&config)?.reset_failsafe().await?;
            render_ack("Failsafe reset", ok)?;
        }
        Commands::Status => {
            let frame = calibration_client(&config)?.fetch_status().await?;
            let mut snapshot = TelemetrySnapshot::default();
            snapshot.merge(&frame);
            render_telemetry(&snapshot);
        }
        Commands::Sim => run_emulator(config).await?,
    }

    Ok(())
}

fn calibration_client(config: &AppConfig) -> Result<CalibrationClient> {
    let base = config.calibration_base()?;
    info!(base = %base, "using device http api");
    Ok(CalibrationClient::new(base, config.calibration.timeout)?)
}

fn render_ack(action: &str, ok: bool) -> Result<()> {
    if ok {
        println!("{action}: succeeded");
        Ok(())
    } else {
        bail!("{action}: refused by device")
    }
}

async fn run_console(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let metrics = LinkMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let endpoint = config.link.endpoint()?;
    let connector = Arc::new(WebSocketConnector::new(endpoint.clone()));
    let session = Session::start(connector, SessionOptions::from(&config), metrics);

    let (presenter_shutdown, _) = broadcast::channel(1);
    let presenter = tokio::spawn(
        Presenter::new(
            session.subscribe_state(),
            session.subscribe_telemetry(),
            session.subscribe_notifications(),
        )
        .run(presenter_shutdown.subscribe()),
    );

    info!(url = %endpoint, "connecting to device");
    session.connect().await;
    println!("{HELP}");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("ctrl-c received; shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("input closed; shutting down");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Input(event)) => session.apply_input(event),
                    Ok(ConsoleCommand::Status) => render_session(&session),
                    Ok(ConsoleCommand::Help) => println!("{HELP}"),
                    Ok(ConsoleCommand::Quit) => break,
                    Err(err) => warn!(error = %err, "ignoring input"),
                }
            }
        }
    }

    session.shutdown().await?;
    let _ = presenter_shutdown.send(());
    presenter.await??;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn run_emulator(config: AppConfig) -> Result<()> {
    let handle = EmulatorBuilder::new(config.sim).spawn().await?;
    info!(ws = %handle.ws_url(), http = %handle.http_base(), "emulator running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    handle.shutdown().await
}

fn render_session(session: &Session) {
    let drive = session.drive();
    let lights = session.lights();
    let underglow = session.underglow();
    println!(
        "Link: {}\nDrive: left {} right {}\nLights: headlights {} taillights {} indicator {:?}\nHorn: {}\nUnderglow: {} mode {}",
        session.state(),
        drive.left,
        drive.right,
        on_off(lights.headlights),
        on_off(lights.taillights),
        lights.indicator,
        on_off(session.horn()),
        underglow.color.to_hex(),
        underglow.mode,
    );
    render_telemetry(&session.telemetry());
}

fn render_telemetry(snapshot: &TelemetrySnapshot) {
    let battery = match (snapshot.battery_pct, snapshot.battery_volts) {
        (Some(pct), Some(volts)) => format!(
            "{pct}% {volts:.2} V ({})",
            battery_label(snapshot.battery_level())
        ),
        _ => "unknown".to_owned(),
    };
    let failsafe = match (snapshot.failsafe_active, snapshot.failsafe_reason) {
        (true, Some(reason)) => format!("active ({})", reason.label()),
        (true, None) => "active".to_owned(),
        (false, _) => "inactive".to_owned(),
    };
    println!(
        "Battery: {battery}\nFailsafe: {failsafe}\nUptime: {}\nFirmware: {}\nMeasured: left {} right {}",
        snapshot.uptime_display().as_deref().unwrap_or("--:--:--"),
        snapshot.firmware_version.as_deref().unwrap_or("unknown"),
        snapshot.measured_left,
        snapshot.measured_right,
    );
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
