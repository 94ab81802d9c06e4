//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Request/response calls against the device HTTP API.
//!
//! These run outside the streaming channel and never touch session state.

use std::time::Duration;

use reqwest::Client;
use rover_msg::{decode, DecodeError, TelemetryFrame};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("battery voltage must be a positive number, got {0}")]
    InvalidVoltage(f64),
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device answered {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },
    #[error("unexpected response body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("status frame rejected: {0}")]
    StatusFrame(#[from] DecodeError),
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
}

#[derive(Debug, Clone)]
pub struct CalibrationClient {
    http: Client,
    base: Url,
}

impl CalibrationClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, CalibrationError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Ask the controller to run its motor calibration routine.
    pub async fn calibrate_motors(&self) -> Result<bool, CalibrationError> {
        self.acknowledge("api/calibrate/motor", &[]).await
    }

    /// Tell the controller the measured pack voltage.
    pub async fn calibrate_battery(&self, voltage: f64) -> Result<bool, CalibrationError> {
        if !voltage.is_finite() || voltage <= 0.0 {
            return Err(CalibrationError::InvalidVoltage(voltage));
        }
        self.acknowledge("api/calibrate/battery", &[("voltage", voltage.to_string())])
            .await
    }

    /// Clear an active failsafe.
    pub async fn reset_failsafe(&self) -> Result<bool, CalibrationError> {
        self.acknowledge("api/reset", &[]).await
    }

    /// Fetch one full status frame.
    pub async fn fetch_status(&self) -> Result<TelemetryFrame, CalibrationError> {
        let body = self.get("api/status", &[]).await?;
        Ok(decode(body.as_bytes())?)
    }

    async fn acknowledge(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<bool, CalibrationError> {
        let body = self.get(path, query).await?;
        let ack: Ack = serde_json::from_str(&body)?;
        info!(endpoint = path, success = ack.success, "device acknowledged request");
        Ok(ack.success)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, CalibrationError> {
        let endpoint = self.base.join(path)?;
        debug!(endpoint = %endpoint, "calibration request");
        let response = self.http.get(endpoint.clone()).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CalibrationError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}
