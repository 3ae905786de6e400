//! Collaborator seams between the pipeline and the host platform.
//!
//! Everything the pipeline cannot do by itself (watch regions, keep the
//! process alive in the background, show notifications, read the battery,
//! record diagnostics) sits behind one of the traits below. The `headless`
//! module implements them for hosts without a mobile OS.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::models::Location;

pub mod headless;

// ---

/// A region handed to the platform's region-watching primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Circular {
        identifier: String,
        latitude: f64,
        longitude: f64,
        radius: f64,
    },
    Beacon {
        identifier: String,
        uuid: Uuid,
        major: Option<u16>,
        minor: Option<u16>,
        /// Deliver the current enter/exit state when the display turns on.
        notify_on_display: bool,
    },
}

impl Region {
    pub fn identifier(&self) -> &str {
        match self {
            Region::Circular { identifier, .. } | Region::Beacon { identifier, .. } => identifier,
        }
    }
}

/// Region-watching and location-update primitive.
pub trait RegionPlatform: Send + Sync {
    fn start_monitoring(&self, region: &Region);
    fn stop_monitoring(&self, identifier: &str);
    fn start_significant_changes(&self);
    fn start_updating_location(&self);
    fn stop_updating_location(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseHandle(pub u64);

/// Grants finite-lifetime background execution.
///
/// `on_expire` is called at most once, when the platform revokes the lease
/// before it was released.
pub trait LeaseProvider: Send + Sync {
    fn acquire(&self, on_expire: Box<dyn FnOnce() + Send>) -> LeaseHandle;
    fn release(&self, handle: LeaseHandle);
}

/// Local notification system. Scheduling with an identifier that is already
/// pending replaces that notification.
pub trait Notifier: Send + Sync {
    fn schedule(&self, identifier: &str, title: &str, body: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEventType {
    LocationUpdate,
    ServiceCall,
}

/// Diagnostic record kept for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ClientEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(rename = "type")]
    pub event_type: ClientEventType,
    pub payload: serde_json::Value,
}

impl ClientEvent {
    pub fn new(text: impl Into<String>, event_type: ClientEventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            text: text.into(),
            event_type,
            payload,
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record_error(&self, category: ErrorCategory, detail: &str);
    fn record_event(&self, event: ClientEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryState {
    Unknown,
    Charging,
    Unplugged,
    Full,
}

pub trait BatteryMonitor: Send + Sync {
    /// Charge level in `0.0..=1.0`, or `-1.0` when the host cannot tell.
    fn level(&self) -> f32;
    fn state(&self) -> BatteryState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

/// Failure kinds the platform location service reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationErrorKind {
    LocationUnknown,
    Denied,
    Network,
    HeadingFailure,
    RegionMonitoringDenied,
    RegionMonitoringFailure,
    RegionMonitoringSetupDelayed,
    RegionMonitoringResponseDelayed,
    RangingUnavailable,
    RangingFailure,
    Other,
}

impl LocationErrorKind {
    pub fn describe(&self) -> &'static str {
        // ---
        match self {
            Self::LocationUnknown => "unable to obtain a location value right now",
            Self::Denied => "access to the location service was denied by the user",
            Self::Network => "the network was unavailable or a network error occurred",
            Self::HeadingFailure => "the heading could not be determined",
            Self::RegionMonitoringDenied => "access to region monitoring was denied by the user",
            Self::RegionMonitoringFailure => "a registered region cannot be monitored",
            Self::RegionMonitoringSetupDelayed => "region monitoring could not be initialized immediately",
            Self::RegionMonitoringResponseDelayed => "region events will be delivered but may be delayed",
            Self::RangingUnavailable => "ranging is disabled",
            Self::RangingFailure => "a general ranging error occurred",
            Self::Other => "other location error",
        }
    }
}

/// One item on the platform's location delivery stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum PlatformSignal {
    RegionEntered { identifier: String },
    RegionExited { identifier: String },
    SignificantChange { location: Location },
    /// Continuous-update delivery; answers a pending one-shot request.
    LocationsUpdated { locations: Vec<Location> },
    AuthorizationChanged { status: AuthorizationStatus },
    Failure { kind: LocationErrorKind },
}
