//! Error taxonomy for the location pipeline.
//!
//! Every failure the pipeline can observe is folded into [`PipelineError`].
//! Region Monitor and Trigger Classifier failures are recovered where they
//! happen; Submission Client failures are reported to the telemetry sink and
//! end that single event. Each variant maps onto a stable [`ErrorCategory`]
//! so the telemetry sink can group them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Convenience alias used across the library.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Submission attempted before the client had a base URL.
    #[error("submission client is not configured")]
    ManagerNotAvailable,

    /// The transport succeeded but the body did not decode.
    #[error("invalid response: {detail}")]
    InvalidResponse { detail: String },

    /// Transport-level failure or non-2xx status. `detail` carries the
    /// server's `message` field when an error body was returned.
    #[error("network error{}: {detail}", status_suffix(.status))]
    NetworkError { status: Option<u16>, detail: String },

    #[error("location permission denied")]
    AuthorizationDenied,

    #[error("zone store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// An enter/exit callback named a region that is not in the registry.
    #[error("no zone for monitored region '{identifier}'")]
    RegionResolutionMiss { identifier: String },

    /// Any other platform location failure delivered to a pending request.
    #[error("location failure: {detail}")]
    LocationFailure { detail: String },

    /// A one-shot location request was replaced by a newer one.
    #[error("location request superseded by a newer request")]
    RequestSuperseded,
}

/// Stable grouping key handed to `TelemetrySink::record_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ManagerNotAvailable,
    InvalidResponse,
    NetworkError,
    AuthorizationDenied,
    StoreUnavailable,
    RegionResolutionMiss,
    LocationFailure,
    RequestSuperseded,
}

impl PipelineError {
    // ---
    pub fn category(&self) -> ErrorCategory {
        // ---
        match self {
            Self::ManagerNotAvailable => ErrorCategory::ManagerNotAvailable,
            Self::InvalidResponse { .. } => ErrorCategory::InvalidResponse,
            Self::NetworkError { .. } => ErrorCategory::NetworkError,
            Self::AuthorizationDenied => ErrorCategory::AuthorizationDenied,
            Self::StoreUnavailable { .. } => ErrorCategory::StoreUnavailable,
            Self::RegionResolutionMiss { .. } => ErrorCategory::RegionResolutionMiss,
            Self::LocationFailure { .. } => ErrorCategory::LocationFailure,
            Self::RequestSuperseded => ErrorCategory::RequestSuperseded,
        }
    }

    /// Build a `NetworkError` from a `reqwest` failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        // ---
        Self::NetworkError {
            status: err.status().map(|s| s.as_u16()),
            detail: err.to_string(),
        }
    }

    pub fn store(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err.to_string())
    }
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            Self::ManagerNotAvailable => "manager_not_available",
            Self::InvalidResponse => "invalid_response",
            Self::NetworkError => "network_error",
            Self::AuthorizationDenied => "authorization_denied",
            Self::StoreUnavailable => "store_unavailable",
            Self::RegionResolutionMiss => "region_resolution_miss",
            Self::LocationFailure => "location_failure",
            Self::RequestSuperseded => "request_superseded",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
