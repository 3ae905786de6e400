//! Configuration loader for the `zonewatch` location pipeline.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The result is one immutable [`Config`] produced at
//! startup and handed to the components that need it.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::classifier::NotificationPreferences;
use crate::models::DeviceIdentity;
use crate::submission::{IdentifyPolicy, ServerSettings};

/// Parse an optional environment variable of type `$ty` with a default value.
macro_rules! parse_env {
    ($get:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $get($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($get:expr, $var_name:expr) => {
        $get($var_name)
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string of the zone store.
    pub zone_db_url: String,

    /// Maximum number of zone store connections in the pool.
    pub db_pool_max: u32,

    /// Server connection settings used by the submission client.
    pub server: ServerSettings,

    /// Identity reported with every sample.
    pub device: DeviceIdentity,

    /// How long a background lease lives before the platform revokes it.
    pub lease_lifetime: Duration,

    /// Triggers the user wants to be notified about.
    pub notifications: NotificationPreferences,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `ZONE_DB_URL` – SQLite connection string of the zone store
///
/// Optional:
/// - `HA_BASE_URL` – server base URL (unset: submissions fail as not configured)
/// - `HA_API_PASSWORD` – legacy API password
/// - `DEVICE_NAME` – reported host name (default: `zonewatch`)
/// - `DEVICE_ID` – reported device id (default: derived from `DEVICE_NAME`)
/// - `REQUEST_TIMEOUT_SECS` – HTTP request timeout (default: 10)
/// - `LEASE_SECS` – background lease lifetime (default: 30)
/// - `IDENTIFY_EVERY_SUBMISSION` – identify before every submission (default: false)
/// - `LOCATION_NOTIFICATIONS` – comma list of notifying triggers
///   (default: `enter,exit,beacon_enter,beacon_exit`)
/// - `DB_POOL_MAX` – max zone store connections (default: 1)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

fn load_from(get: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

    let zone_db_url = require_env!(get, "ZONE_DB_URL");
    let db_pool_max = parse_env!(get, "DB_POOL_MAX", u32, 1);
    let request_timeout_secs = parse_env!(get, "REQUEST_TIMEOUT_SECS", u64, 10);
    let lease_secs = parse_env!(get, "LEASE_SECS", u64, 30);
    let identify_every = parse_env!(get, "IDENTIFY_EVERY_SUBMISSION", bool, false);
    let notifications = get("LOCATION_NOTIFICATIONS")
        .map(|v| v.parse::<NotificationPreferences>())
        .transpose()
        .map_err(|e| anyhow!("Invalid LOCATION_NOTIFICATIONS: {}", e))?
        .unwrap_or_default();

    let device_name = get("DEVICE_NAME").unwrap_or_else(|| "zonewatch".to_string());
    let mut device = DeviceIdentity::from_name(&device_name);
    if let Some(device_id) = get("DEVICE_ID") {
        device.device_id = device_id;
    }

    let server = ServerSettings {
        base_url: get("HA_BASE_URL"),
        api_password: get("HA_API_PASSWORD"),
        request_timeout: Duration::from_secs(request_timeout_secs),
        identify_policy: if identify_every {
            IdentifyPolicy::EverySubmission
        } else {
            IdentifyPolicy::OncePerSession
        },
    };

    Ok(Config {
        zone_db_url,
        db_pool_max,
        server,
        device,
        lease_lifetime: Duration::from_secs(lease_secs),
        notifications,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API password while showing all other values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_password = match &self.server.api_password {
            Some(_) => "****",
            None => "(unset)",
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  ZONE_DB_URL          : {}", self.zone_db_url);
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!(
            "  HA_BASE_URL          : {}",
            self.server.base_url.as_deref().unwrap_or("(unset)")
        );
        tracing::info!("  HA_API_PASSWORD      : {}", masked_password);
        tracing::info!("  DEVICE_NAME          : {}", self.device.device_name);
        tracing::info!("  DEVICE_ID            : {}", self.device.device_id);
        tracing::info!("  REQUEST_TIMEOUT_SECS : {}", self.server.request_timeout.as_secs());
        tracing::info!("  LEASE_SECS           : {}", self.lease_lifetime.as_secs());
        tracing::info!("  IDENTIFY_POLICY      : {:?}", self.server.identify_policy);
        tracing::info!("  NOTIFICATIONS        : {:?}", self.notifications);
    }
}
