//! Data models for the location pipeline.
//!
//! Zones arrive from the store as [`ZoneRecord`] rows and are turned into
//! immutable [`Zone`] values; everything downstream of the registry only ever
//! sees `Zone`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name used whenever a zone has none (or there is no zone at all).
pub const UNKNOWN_ZONE: &str = "Unknown zone";

/// Battery percentage reported by hosts without a real battery.
const SIMULATOR_BATTERY_SENTINEL: i32 = -100;

// ---

/// Raw zone row as persisted by the zone store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ZoneRecord {
    // ---
    pub id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub tracking_enabled: bool,
    pub beacon_uuid: Option<String>,
    pub beacon_major: Option<i64>,
    pub beacon_minor: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// A monitorable area: either a circular geofence or a beacon region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    // ---
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Geofence radius in meters.
    pub radius: f64,
    pub beacon: Option<BeaconSpec>,
    pub tracking_enabled: bool,
}

/// Beacon discriminators. `major`/`minor` narrow the region; a `minor`
/// without a `major` carries no extra specificity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconSpec {
    pub uuid: String,
    pub major: Option<u16>,
    pub minor: Option<u16>,
}

impl ZoneRecord {
    // ---
    pub fn to_zone(&self) -> Zone {
        // ---
        let beacon = self.beacon_uuid.as_ref().map(|uuid| BeaconSpec {
            uuid: uuid.clone(),
            major: self.beacon_major.and_then(|v| u16::try_from(v).ok()),
            minor: self.beacon_minor.and_then(|v| u16::try_from(v).ok()),
        });

        Zone {
            id: self.id.clone(),
            name: self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_ZONE.to_string()),
            latitude: self.latitude,
            longitude: self.longitude,
            radius: self.radius,
            beacon,
            tracking_enabled: self.tracking_enabled,
        }
    }
}

impl Zone {
    // ---
    /// Geofence zone with tracking enabled and the id as its name.
    pub fn geofence(id: &str, latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            latitude,
            longitude,
            radius,
            beacon: None,
            tracking_enabled: true,
        }
    }

    /// Beacon zone with tracking enabled and the id as its name.
    pub fn beacon(id: &str, uuid: &str, major: Option<u16>, minor: Option<u16>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            radius: 1.0,
            beacon: Some(BeaconSpec {
                uuid: uuid.to_string(),
                major,
                minor,
            }),
            tracking_enabled: true,
        }
    }

    pub fn is_beacon(&self) -> bool {
        self.beacon.is_some()
    }

    /// Location used when the zone itself is the position being reported.
    pub fn center(&self) -> Location {
        // ---
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
            horizontal_accuracy: 1.0,
            timestamp: Utc::now(),
        }
    }
}

/// Why a location report is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationUpdateTrigger {
    RegionEnter,
    RegionExit,
    BeaconRegionEnter,
    BeaconRegionExit,
    SignificantLocationUpdate,
    BackgroundFetch,
    PushNotification,
    #[serde(rename = "url_scheme")]
    URLScheme,
    Manual,
}

impl LocationUpdateTrigger {
    pub const ALL: [LocationUpdateTrigger; 9] = [
        Self::RegionEnter,
        Self::RegionExit,
        Self::BeaconRegionEnter,
        Self::BeaconRegionExit,
        Self::SignificantLocationUpdate,
        Self::BackgroundFetch,
        Self::PushNotification,
        Self::URLScheme,
        Self::Manual,
    ];

    pub fn is_beacon(&self) -> bool {
        matches!(self, Self::BeaconRegionEnter | Self::BeaconRegionExit)
    }

    /// Geofence enter/exit become their beacon counterparts for beacon zones.
    pub fn for_zone(self, zone: &Zone) -> Self {
        // ---
        match (self, zone.is_beacon()) {
            (Self::RegionEnter, true) => Self::BeaconRegionEnter,
            (Self::RegionExit, true) => Self::BeaconRegionExit,
            (other, _) => other,
        }
    }

    pub fn source_type(&self) -> SourceType {
        if self.is_beacon() {
            SourceType::BluetoothLe
        } else {
            SourceType::Gps
        }
    }

    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            Self::RegionEnter => "region_enter",
            Self::RegionExit => "region_exit",
            Self::BeaconRegionEnter => "beacon_region_enter",
            Self::BeaconRegionExit => "beacon_region_exit",
            Self::SignificantLocationUpdate => "significant_location_update",
            Self::BackgroundFetch => "background_fetch",
            Self::PushNotification => "push_notification",
            Self::URLScheme => "url_scheme",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "gps")]
    Gps,
    #[serde(rename = "bluetooth_le")]
    BluetoothLe,
}

/// A single position fix delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters.
    pub horizontal_accuracy: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Who the device says it is to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
}

impl DeviceIdentity {
    // ---
    /// Derive the device id from the name: strip everything that is not
    /// alphanumeric or a space, turn spaces into underscores, lowercase.
    pub fn from_name(device_name: &str) -> Self {
        // ---
        let device_id = device_name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == ' ')
            .collect::<String>()
            .replace(' ', "_")
            .to_lowercase();

        Self {
            device_id,
            device_name: device_name.to_string(),
        }
    }
}

/// Payload of a `device_tracker.see` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    // ---
    #[serde(rename = "battery")]
    pub battery_percent: u8,
    #[serde(rename = "gps")]
    pub coordinates: [f64; 2],
    #[serde(rename = "gps_accuracy")]
    pub horizontal_accuracy: f64,
    #[serde(rename = "host_name")]
    pub device_name: String,
    #[serde(rename = "dev_id")]
    pub device_id: String,
    pub source_type: SourceType,
}

/// Entity state echoed back by the server after a service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Convert a platform battery level (`0.0..=1.0`, `-1.0` when unknown) into
/// a percentage. The simulator's `-100` is reported as a full battery.
pub fn battery_percent(level: f32) -> u8 {
    // ---
    let percent = (level * 100.0) as i32;
    if percent == SIMULATOR_BATTERY_SENTINEL {
        return 100;
    }
    percent.clamp(0, 100) as u8
}
