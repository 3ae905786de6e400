//! Trigger Classifier.
//!
//! Pure mapping from a trigger (and the zone that produced it, if any) to the
//! shell of the sample that will be submitted and the notification decision.
//! What each trigger says and whether it may notify lives in a
//! [`PolicyTable`], so the mapping is data rather than a `match` with side
//! effects.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::models::{
    DeviceIdentity, Location, LocationSample, LocationUpdateTrigger, SourceType, Zone,
    UNKNOWN_ZONE,
};

pub const NOTIFICATION_TITLE: &str = "Location change";

/// Placeholder replaced by the zone name in body templates.
const ZONE_PLACEHOLDER: &str = "{zone}";

// ---

/// How the notification identifier is formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierTemplate {
    /// `"<zone id>_<suffix>"`
    ZoneSuffix(String),
    Fixed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub body_template: String,
    /// `None` means the trigger never notifies.
    pub identifier: Option<IdentifierTemplate>,
}

impl NotificationPolicy {
    fn zone(body_template: &str, suffix: &str) -> Self {
        Self {
            body_template: body_template.to_string(),
            identifier: Some(IdentifierTemplate::ZoneSuffix(suffix.to_string())),
        }
    }

    fn fixed(body_template: &str, identifier: &str) -> Self {
        Self {
            body_template: body_template.to_string(),
            identifier: Some(IdentifierTemplate::Fixed(identifier.to_string())),
        }
    }

    fn silent(body_template: &str) -> Self {
        Self {
            body_template: body_template.to_string(),
            identifier: None,
        }
    }
}

/// Notification policy per trigger.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<LocationUpdateTrigger, NotificationPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        // ---
        use LocationUpdateTrigger::*;

        let policies = HashMap::from([
            (RegionEnter, NotificationPolicy::zone("{zone} entered", "_entered")),
            (RegionExit, NotificationPolicy::zone("{zone} exited", "_exited")),
            (
                BeaconRegionEnter,
                NotificationPolicy::zone("{zone} entered via iBeacon", "_beacon_entered"),
            ),
            (
                BeaconRegionExit,
                NotificationPolicy::zone("{zone} exited via iBeacon", "_beacon_exited"),
            ),
            (
                SignificantLocationUpdate,
                NotificationPolicy::fixed("Significant location change detected", "sig_change"),
            ),
            (
                BackgroundFetch,
                NotificationPolicy::fixed(
                    "Current location delivery triggered via background fetch",
                    "background_fetch",
                ),
            ),
            (
                PushNotification,
                NotificationPolicy::fixed(
                    "Location request from push notification",
                    "push_notification",
                ),
            ),
            (
                URLScheme,
                NotificationPolicy::fixed("Location update triggered by URL scheme", "url_scheme"),
            ),
            (Manual, NotificationPolicy::silent("Location update triggered by user")),
        ]);

        Self { policies }
    }
}

impl PolicyTable {
    // ---
    pub fn get(&self, trigger: LocationUpdateTrigger) -> Option<&NotificationPolicy> {
        self.policies.get(&trigger)
    }

    /// Replace the policy for one trigger. `Manual` stays silent whatever
    /// the replacement says.
    pub fn with_policy(mut self, trigger: LocationUpdateTrigger, mut policy: NotificationPolicy) -> Self {
        // ---
        if trigger == LocationUpdateTrigger::Manual {
            policy.identifier = None;
        }
        self.policies.insert(trigger, policy);
        self
    }
}

/// Which triggers the user wants to be notified about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPreferences {
    enabled: HashSet<LocationUpdateTrigger>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        // ---
        use LocationUpdateTrigger::*;
        Self::with_enabled([RegionEnter, RegionExit, BeaconRegionEnter, BeaconRegionExit])
    }
}

impl NotificationPreferences {
    // ---
    pub fn none() -> Self {
        Self {
            enabled: HashSet::new(),
        }
    }

    pub fn with_enabled(triggers: impl IntoIterator<Item = LocationUpdateTrigger>) -> Self {
        Self {
            enabled: triggers.into_iter().collect(),
        }
    }

    pub fn is_enabled(&self, trigger: LocationUpdateTrigger) -> bool {
        self.enabled.contains(&trigger)
    }

    /// Names accepted in a preference list, in display order.
    pub fn names() -> &'static [&'static str] {
        &[
            "enter",
            "exit",
            "beacon_enter",
            "beacon_exit",
            "significant_change",
            "background_fetch",
            "push",
            "url_scheme",
        ]
    }
}

fn trigger_for_name(name: &str) -> Option<LocationUpdateTrigger> {
    // ---
    use LocationUpdateTrigger::*;
    let trigger = match name {
        "enter" => RegionEnter,
        "exit" => RegionExit,
        "beacon_enter" => BeaconRegionEnter,
        "beacon_exit" => BeaconRegionExit,
        "significant_change" => SignificantLocationUpdate,
        "background_fetch" => BackgroundFetch,
        "push" => PushNotification,
        "url_scheme" => URLScheme,
        _ => return None,
    };
    Some(trigger)
}

impl FromStr for NotificationPreferences {
    type Err = String;

    /// Parse a comma-separated list such as `"enter,exit"`. `"none"` and
    /// the empty string disable everything.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let mut enabled = HashSet::new();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "none" {
                continue;
            }
            let trigger = trigger_for_name(name).ok_or_else(|| {
                format!(
                    "unknown notification trigger '{name}' (expected one of: {})",
                    Self::names().join(", ")
                )
            })?;
            enabled.insert(trigger);
        }
        Ok(Self { enabled })
    }
}

/// The part of a [`LocationSample`] the classifier decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleShell {
    pub source_type: SourceType,
}

impl SampleShell {
    pub fn fill(&self, location: &Location, battery_percent: u8, device: &DeviceIdentity) -> LocationSample {
        // ---
        LocationSample {
            battery_percent,
            coordinates: [location.latitude, location.longitude],
            horizontal_accuracy: location.horizontal_accuracy,
            device_name: device.device_name.clone(),
            device_id: device.device_id.clone(),
            source_type: self.source_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDecision {
    pub title: String,
    pub body: String,
    pub identifier: String,
    pub should_notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub trigger: LocationUpdateTrigger,
    pub shell: SampleShell,
    pub decision: NotificationDecision,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerClassifier {
    policies: PolicyTable,
    preferences: NotificationPreferences,
}

impl TriggerClassifier {
    // ---
    pub fn new(policies: PolicyTable, preferences: NotificationPreferences) -> Self {
        Self {
            policies,
            preferences,
        }
    }

    pub fn classify(&self, trigger: LocationUpdateTrigger, zone: Option<&Zone>) -> Classification {
        // ---
        let zone_name = zone.map(|z| z.name.as_str()).unwrap_or(UNKNOWN_ZONE);
        let zone_key = zone.map(|z| z.id.as_str()).unwrap_or(UNKNOWN_ZONE);

        let decision = match self.policies.get(trigger) {
            Some(policy) => {
                let identifier = match &policy.identifier {
                    Some(IdentifierTemplate::ZoneSuffix(suffix)) => format!("{zone_key}{suffix}"),
                    Some(IdentifierTemplate::Fixed(id)) => id.clone(),
                    None => String::new(),
                };
                NotificationDecision {
                    title: NOTIFICATION_TITLE.to_string(),
                    body: policy.body_template.replace(ZONE_PLACEHOLDER, zone_name),
                    should_notify: policy.identifier.is_some()
                        && self.preferences.is_enabled(trigger),
                    identifier,
                }
            }
            None => NotificationDecision {
                title: NOTIFICATION_TITLE.to_string(),
                body: String::new(),
                identifier: String::new(),
                should_notify: false,
            },
        };

        Classification {
            trigger,
            shell: SampleShell {
                source_type: trigger.source_type(),
            },
            decision,
        }
    }
}
