//! Submission Client.
//!
//! Sends exactly one `device_tracker.see` service call per sample. Every
//! failure is classified into a [`PipelineError`], handed to the telemetry
//! sink, and returned. Nothing is retried: losing an occasional sample is
//! preferable to duplicate or out-of-order reports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};
use crate::models::{battery_percent, DeviceIdentity, Entity, LocationSample};
use crate::platform::{BatteryMonitor, BatteryState, ClientEvent, ClientEventType, TelemetrySink};

/// Header carrying the legacy API password.
const PASSWORD_HEADER: &str = "x-ha-access";

/// Result of one submission.
pub type SubmissionOutcome = Result<Vec<Entity>>;

// ---

/// When the device identifies itself to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyPolicy {
    /// Once, before the first submission of the session.
    OncePerSession,
    /// Before every submission.
    EverySubmission,
}

/// Server connection settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// `None` leaves the client unconfigured.
    pub base_url: Option<String>,
    pub api_password: Option<String>,
    pub request_timeout: Duration,
    pub identify_policy: IdentifyPolicy,
}

#[derive(Debug, Serialize)]
struct IdentifyRequest<'a> {
    app_bundle_identifier: &'static str,
    app_version: &'static str,
    device_id: &'a str,
    device_name: &'a str,
    battery_level: u8,
    battery_state: BatteryState,
    permissions: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct SubmissionClient {
    http: reqwest::Client,
    settings: ServerSettings,
    device: DeviceIdentity,
    permissions: Vec<String>,
    battery: Arc<dyn BatteryMonitor>,
    telemetry: Arc<dyn TelemetrySink>,
    identified: Mutex<bool>,
}

impl SubmissionClient {
    // ---
    pub fn new(
        settings: ServerSettings,
        device: DeviceIdentity,
        permissions: Vec<String>,
        battery: Arc<dyn BatteryMonitor>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> anyhow::Result<Self> {
        // ---
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let settings = ServerSettings {
            base_url: settings
                .base_url
                .map(|url| url.trim_end_matches('/').to_string()),
            ..settings
        };

        Ok(Self {
            http,
            settings,
            device,
            permissions,
            battery,
            telemetry,
            identified: Mutex::new(false),
        })
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Current battery percentage, simulator-normalized.
    pub fn battery_percent(&self) -> u8 {
        battery_percent(self.battery.level())
    }

    /// Report one sample. Never retries.
    pub async fn submit(&self, sample: &LocationSample) -> SubmissionOutcome {
        // ---
        let outcome = self.try_submit(sample).await;

        let (status, error_text) = match &outcome {
            Ok(entities) => {
                info!(entities = entities.len(), "device seen");
                ("success", None)
            }
            Err(err) => {
                error!("error when updating location: {err}");
                self.telemetry.record_error(err.category(), &err.to_string());
                ("failure", Some(err.to_string()))
            }
        };

        self.telemetry.record_event(ClientEvent::new(
            "Calling service: device_tracker - see",
            ClientEventType::ServiceCall,
            json!({
                "domain": "device_tracker",
                "service": "see",
                "data": sample,
                "status": status,
                "error": error_text,
            }),
        ));

        outcome
    }

    async fn try_submit(&self, sample: &LocationSample) -> SubmissionOutcome {
        // ---
        let base_url = self
            .settings
            .base_url
            .as_deref()
            .ok_or(PipelineError::ManagerNotAvailable)?;

        self.ensure_identified(base_url).await?;

        let url = format!("{base_url}/api/services/device_tracker/see");
        debug!(%url, ?sample, "submitting location");
        let body = self.send(self.http.post(&url).json(sample)).await?;

        serde_json::from_slice::<Vec<Entity>>(&body).map_err(|e| PipelineError::InvalidResponse {
            detail: e.to_string(),
        })
    }

    async fn ensure_identified(&self, base_url: &str) -> Result<()> {
        // ---
        let mut identified = self.identified.lock().await;
        if *identified && self.settings.identify_policy == IdentifyPolicy::OncePerSession {
            return Ok(());
        }

        let request = IdentifyRequest {
            app_bundle_identifier: env!("CARGO_PKG_NAME"),
            app_version: env!("CARGO_PKG_VERSION"),
            device_id: &self.device.device_id,
            device_name: &self.device.device_name,
            battery_level: self.battery_percent(),
            battery_state: self.battery.state(),
            permissions: &self.permissions,
        };

        let url = format!("{base_url}/api/ios/identify");
        let body = self.send(self.http.post(&url).json(&request)).await?;
        debug!(response = %String::from_utf8_lossy(&body), "device identified");

        *identified = true;
        Ok(())
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        // ---
        let request = match &self.settings.api_password {
            Some(password) => request.header(PASSWORD_HEADER, password),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::from_transport(&e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::from_transport(&e))?;

        if !status.is_success() {
            return Err(PipelineError::NetworkError {
                status: Some(status.as_u16()),
                detail: error_detail(status, &body),
            });
        }
        Ok(body.to_vec())
    }
}

/// Prefer the server's `message`, fall back to the status reason.
fn error_detail(status: StatusCode, body: &[u8]) -> String {
    // ---
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .map(String::from)
                .unwrap_or_else(|| status.to_string())
        })
}
