//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Shared primitives and utilities for the link runtime."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

const DEVICE_AP_ADDRESS: &str = "192.168.4.1";

/// Streaming endpoint of a device reached over its own access point. It
/// always answers on the gateway address.
fn device_link_url() -> Result<Url> {
    Url::parse(&format!("ws://{DEVICE_AP_ADDRESS}/ws")).context("invalid device link url")
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_event_capacity() -> usize {
    64
}

fn default_drive_period() -> Duration {
    Duration::from_millis(100)
}

fn default_calibration_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9899))
}

fn default_sim_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_state_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_failsafe_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_failsafe_recovery() -> Duration {
    Duration::from_millis(3000)
}

fn default_firmware_version() -> String {
    "1.0.0".to_owned()
}

fn default_battery_voltage() -> f64 {
    11.8
}

/// Primary configuration object for the console, core, and emulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ROVER_CONFIG";

    /// Load configuration from disk, respecting the `ROVER_CONFIG` override.
    ///
    /// Unlike a daemon, the console is usable without any file at all: when no
    /// candidate exists the built-in defaults are returned with `source: None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    /// Parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Base URL for the request/response calibration API.
    ///
    /// Falls back to the HTTP origin of the streaming link when no explicit
    /// base is configured.
    pub fn calibration_base(&self) -> Result<Url> {
        if let Some(base) = &self.calibration.base_url {
            return Ok(base.clone());
        }
        let link = self.link.endpoint()?;
        let mut base = link.clone();
        let scheme = match link.scheme() {
            "wss" => "https",
            _ => "http",
        };
        base.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot derive calibration url from {link}"))?;
        base.set_path("/");
        base.set_query(None);
        Ok(base)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.dispatch.validate()?;
        self.calibration.validate()?;
        self.sim.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Streaming channel settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Streaming endpoint. Unset means the device access point address.
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default = "default_reconnect_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reconnect_interval: Duration,
    /// Capacity of the notification and inbound frame channels.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_interval: default_reconnect_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl LinkConfig {
    /// Configured endpoint, or the device access point default.
    pub fn endpoint(&self) -> Result<Url> {
        match &self.url {
            Some(url) => Ok(url.clone()),
            None => device_link_url(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint()?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!("link url {url} must use the ws or wss scheme"));
        }
        if self.reconnect_interval.is_zero() {
            return Err(anyhow!("link reconnect_interval must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow!("link event_capacity must be greater than zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_drive_period")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub drive_period: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            drive_period: default_drive_period(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.drive_period.is_zero() {
            return Err(anyhow!("dispatch drive_period must be greater than zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default = "default_calibration_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_calibration_timeout(),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(base) = &self.base_url {
            if !matches!(base.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "calibration base_url {} must use the http or https scheme",
                    base
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Device emulator settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_sim_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_state_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub state_interval: Duration,
    #[serde(default = "default_failsafe_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub failsafe_timeout: Duration,
    /// Time after which a failsafe other than a critical battery clears itself.
    #[serde(default = "default_failsafe_recovery")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub failsafe_recovery: Duration,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    /// Uncalibrated pack voltage reported by the emulated sensor.
    #[serde(default = "default_battery_voltage")]
    pub battery_voltage: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            listen: default_sim_listen(),
            state_interval: default_state_interval(),
            failsafe_timeout: default_failsafe_timeout(),
            failsafe_recovery: default_failsafe_recovery(),
            firmware_version: default_firmware_version(),
            battery_voltage: default_battery_voltage(),
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.state_interval.is_zero() {
            return Err(anyhow!("sim state_interval must be greater than zero"));
        }
        if self.failsafe_timeout.is_zero() {
            return Err(anyhow!("sim failsafe_timeout must be greater than zero"));
        }
        if self.failsafe_recovery.is_zero() {
            return Err(anyhow!("sim failsafe_recovery must be greater than zero"));
        }
        if !self.battery_voltage.is_finite() || self.battery_voltage <= 0.0 {
            return Err(anyhow!(
                "sim battery_voltage must be positive, got {}",
                self.battery_voltage
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_conventions() {
        let config = AppConfig::default();
        assert!(config.link.url.is_none());
        assert_eq!(
            config.link.endpoint().expect("default endpoint").as_str(),
            "ws://192.168.4.1/ws"
        );
        assert_eq!(
            config.calibration_base().expect("derived base").as_str(),
            "http://192.168.4.1/"
        );
        assert_eq!(config.link.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.dispatch.drive_period, Duration::from_millis(100));
        config.validate().expect("defaults validate");
    }

    #[test]
    fn parses_durations_in_their_units() {
        let config: AppConfig = r#"
            [link]
            url = "ws://10.0.0.7:81/ws"
            reconnect_interval = 2

            [dispatch]
            drive_period = 50

            [sim]
            failsafe_timeout = 750
            failsafe_recovery = 2500
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.link.reconnect_interval, Duration::from_secs(2));
        assert_eq!(config.dispatch.drive_period, Duration::from_millis(50));
        assert_eq!(config.sim.failsafe_timeout, Duration::from_millis(750));
        assert_eq!(config.sim.failsafe_recovery, Duration::from_millis(2500));
        assert_eq!(
            AppConfig::default().sim.failsafe_recovery,
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn rejects_non_websocket_link() {
        let err = "[link]\nurl = \"http://10.0.0.7/ws\"\n"
            .parse::<AppConfig>()
            .expect_err("http link rejected");
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn rejects_zero_drive_period() {
        assert!("[dispatch]\ndrive_period = 0\n".parse::<AppConfig>().is_err());
    }

    #[test]
    fn calibration_base_derives_from_link() {
        let config: AppConfig = "[link]\nurl = \"ws://10.0.0.7:81/ws\"\n"
            .parse()
            .expect("config parses");
        let base = config.calibration_base().expect("derived base");
        assert_eq!(base.as_str(), "http://10.0.0.7:81/");

        let secure: AppConfig = "[link]\nurl = \"wss://rover.local/ws\"\n"
            .parse()
            .expect("config parses");
        assert_eq!(
            secure.calibration_base().expect("derived base").as_str(),
            "https://rover.local/"
        );
    }

    #[test]
    fn explicit_calibration_base_wins() {
        let config: AppConfig = "[calibration]\nbase_url = \"http://127.0.0.1:9000/\"\n"
            .parse()
            .expect("config parses");
        assert_eq!(
            config.calibration_base().expect("base").as_str(),
            "http://127.0.0.1:9000/"
        );
    }

    #[test]
    fn load_with_source_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        let loaded = AppConfig::load_with_source(&[missing]).expect("defaults");
        assert!(loaded.source.is_none());
    }

    #[test]
    fn load_with_source_reads_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rover.toml");
        std::fs::write(&path, "[dispatch]\ndrive_period = 40\n").expect("write config");
        let loaded =
            AppConfig::load_with_source(&[dir.path().join("absent.toml"), path.clone()])
                .expect("config loads");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.dispatch.drive_period, Duration::from_millis(40));
    }
}
