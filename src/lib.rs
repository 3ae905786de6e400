//! Client-side location telemetry for a home-automation companion.
//!
//! The pipeline watches the device's position against user-defined zones
//! (geofences or beacon regions), classifies zone crossings, reports them to
//! the server and optionally raises a local notification:
//!
//! ```text
//! platform signal → RegionMonitor → TriggerClassifier → { SubmissionClient, NotificationDispatcher }
//!                        ▲
//!                   ZoneRegistry ← ZoneStore
//! ```
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): each
//! module owns one component and the gateway below re-exports what the binary
//! and the tests need, so callers never reach into a module's internals.

pub mod classifier;
pub mod config;
pub mod error;
pub mod lease;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod schema;
pub mod store;
pub mod submission;

pub use classifier::{NotificationDecision, NotificationPreferences, PolicyTable, TriggerClassifier};
pub use config::Config;
pub use error::{ErrorCategory, PipelineError};
pub use lease::BackgroundLease;
pub use models::{DeviceIdentity, Location, LocationSample, LocationUpdateTrigger, SourceType, Zone};
pub use monitor::{LocationEvent, LocationRequester, RegionMonitor};
pub use notify::NotificationDispatcher;
pub use pipeline::{LocationPipeline, ProcessedEvent};
pub use registry::ZoneRegistry;
pub use store::{SqliteZoneStore, ZoneStore};
pub use submission::{IdentifyPolicy, ServerSettings, SubmissionClient, SubmissionOutcome};
