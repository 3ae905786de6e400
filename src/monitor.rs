//! Region Monitor.
//!
//! Owns the monitored-region set and keeps it in step with the zone registry,
//! turns raw platform signals into typed [`LocationEvent`]s, and attaches a
//! background lease to every event it emits.
//!
//! Resync is a full sweep: every monitored region is stopped, then every
//! tracking-enabled zone is started again. The platform primitive has no
//! atomic replace, so there is a short window with nothing monitored. A
//! callback that arrives during that window for a region that no longer
//! resolves is treated as drift: no event, one more resync.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::lease::BackgroundLease;
use crate::models::{Location, LocationUpdateTrigger, Zone};
use crate::platform::{
    AuthorizationStatus, LeaseProvider, LocationErrorKind, PlatformSignal, Region,
    RegionPlatform, TelemetrySink,
};
use crate::registry::ZoneRegistry;

// ---

/// A classified-ready event leaving the monitor.
///
/// The lease keeps the process alive until whoever consumes the event drops
/// it, which should be once the submission has settled.
#[derive(Debug)]
pub struct LocationEvent {
    pub trigger: LocationUpdateTrigger,
    pub zone: Option<Zone>,
    pub location: Location,
    pub lease: BackgroundLease,
}

struct PendingRequest {
    trigger: LocationUpdateTrigger,
    reply: oneshot::Sender<Result<Location>>,
}

type RequestSlot = Arc<Mutex<Option<PendingRequest>>>;

fn lock(slot: &RequestSlot) -> MutexGuard<'_, Option<PendingRequest>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for one-shot "get current location" requests.
///
/// Only one request is tracked at a time; issuing a new one while another is
/// outstanding displaces the older request, which then resolves with
/// `RequestSuperseded`.
#[derive(Clone)]
pub struct LocationRequester {
    slot: RequestSlot,
    platform: Arc<dyn RegionPlatform>,
}

impl LocationRequester {
    // ---
    /// Ask for a fix and report it with `trigger` (default `Manual`).
    ///
    /// Resolves once the fix has been handed to the pipeline, or with the
    /// platform error that prevented it.
    pub async fn get_and_send_location(
        &self,
        trigger: Option<LocationUpdateTrigger>,
    ) -> Result<Location> {
        // ---
        let (reply, response) = oneshot::channel();
        let request = PendingRequest {
            trigger: trigger.unwrap_or(LocationUpdateTrigger::Manual),
            reply,
        };

        let displaced = lock(&self.slot).replace(request);
        if displaced.is_some() {
            warn!("overlapping location request, the earlier request will not be answered");
        }
        drop(displaced);

        self.platform.start_updating_location();
        response
            .await
            .unwrap_or(Err(PipelineError::RequestSuperseded))
    }
}

/// Build the platform region for a zone, or `None` if it cannot be monitored.
pub fn region_for(zone: &Zone) -> Option<Region> {
    // ---
    let Some(beacon) = &zone.beacon else {
        if zone.radius.is_nan() || zone.radius <= 0.0 {
            warn!(
                zone_id = %zone.id,
                radius = zone.radius,
                "not monitoring geofence zone without a positive radius"
            );
            return None;
        }
        return Some(Region::Circular {
            identifier: zone.id.clone(),
            latitude: zone.latitude,
            longitude: zone.longitude,
            radius: zone.radius,
        });
    };

    let uuid = match Uuid::parse_str(&beacon.uuid) {
        Ok(uuid) => uuid,
        Err(e) => {
            warn!(zone_id = %zone.id, uuid = %beacon.uuid, "not monitoring beacon zone with invalid UUID: {e}");
            return None;
        }
    };

    // A minor only narrows the region together with a major.
    let (major, minor) = match (beacon.major, beacon.minor) {
        (Some(major), minor) => (Some(major), minor),
        (None, _) => (None, None),
    };

    Some(Region::Beacon {
        identifier: zone.id.clone(),
        uuid,
        major,
        minor,
        notify_on_display: true,
    })
}

pub struct RegionMonitor {
    registry: ZoneRegistry,
    platform: Arc<dyn RegionPlatform>,
    leases: Arc<dyn LeaseProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    monitored: BTreeMap<String, Region>,
    pending: RequestSlot,
    events: mpsc::UnboundedSender<LocationEvent>,
}

impl RegionMonitor {
    // ---
    /// Create the monitor and the event stream it feeds.
    pub fn new(
        registry: ZoneRegistry,
        platform: Arc<dyn RegionPlatform>,
        leases: Arc<dyn LeaseProvider>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> (Self, mpsc::UnboundedReceiver<LocationEvent>) {
        // ---
        let (events, stream) = mpsc::unbounded_channel();
        let monitor = Self {
            registry,
            platform,
            leases,
            telemetry,
            monitored: BTreeMap::new(),
            pending: Arc::new(Mutex::new(None)),
            events,
        };
        (monitor, stream)
    }

    pub fn requester(&self) -> LocationRequester {
        LocationRequester {
            slot: self.pending.clone(),
            platform: self.platform.clone(),
        }
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    /// Identifiers of the regions currently monitored, in order.
    pub fn monitored(&self) -> Vec<String> {
        self.monitored.keys().cloned().collect()
    }

    /// Start significant-change delivery and do the initial resync.
    pub async fn start(&mut self) -> Result<()> {
        // ---
        self.platform.start_significant_changes();
        self.resync().await
    }

    /// Replace the monitored-region set with the registry's tracked zones.
    ///
    /// If the registry cannot load, nothing is touched and the previous set
    /// stays monitored.
    pub async fn resync(&mut self) -> Result<()> {
        // ---
        if let Err(err) = self.registry.load().await {
            warn!("zone registry load failed, keeping {} monitored regions: {err}", self.monitored.len());
            self.telemetry.record_error(err.category(), &err.to_string());
            return Err(err);
        }

        for identifier in std::mem::take(&mut self.monitored).into_keys() {
            self.platform.stop_monitoring(&identifier);
        }

        for zone in self.registry.zones().filter(|z| z.tracking_enabled) {
            if let Some(region) = region_for(zone) {
                self.platform.start_monitoring(&region);
                self.monitored.insert(zone.id.clone(), region);
            }
        }

        info!(
            zones = self.registry.len(),
            monitored = self.monitored.len(),
            "monitored regions synchronized"
        );
        Ok(())
    }

    /// Process one item from the platform delivery stream.
    pub async fn handle_signal(&mut self, signal: PlatformSignal) {
        // ---
        match signal {
            PlatformSignal::RegionEntered { identifier } => {
                self.region_event(LocationUpdateTrigger::RegionEnter, &identifier)
                    .await
            }
            PlatformSignal::RegionExited { identifier } => {
                self.region_event(LocationUpdateTrigger::RegionExit, &identifier)
                    .await
            }
            PlatformSignal::SignificantChange { location } => {
                self.emit(LocationUpdateTrigger::SignificantLocationUpdate, None, location)
            }
            PlatformSignal::LocationsUpdated { locations } => self.locations_updated(locations),
            PlatformSignal::AuthorizationChanged { status } => self.authorization_changed(status),
            PlatformSignal::Failure { kind } => self.location_failure(kind),
        }
    }

    /// Drive the monitor: platform signals and registry changes, serialized.
    pub async fn run(mut self, mut signals: mpsc::Receiver<PlatformSignal>) {
        // ---
        let mut changes = self.registry.on_change();
        let mut watching_store = true;

        loop {
            // A pending store change is applied before the next signal, so a
            // zone disabled in the store never reports a crossing.
            tokio::select! {
                biased;

                change = changes.recv(), if watching_store => match change {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        debug!("zone store changed, resyncing");
                        let _ = self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("zone store change feed closed");
                        watching_store = false;
                    }
                },
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        info!("platform signal stream closed, region monitor stopping");
                        break;
                    }
                },
            }
        }
    }

    async fn region_event(&mut self, trigger: LocationUpdateTrigger, identifier: &str) {
        // ---
        let Some(zone) = self.registry.get(identifier).cloned() else {
            let miss = PipelineError::RegionResolutionMiss {
                identifier: identifier.to_string(),
            };
            warn!("{miss}, resyncing");
            let _ = self.resync().await;
            return;
        };

        if !zone.tracking_enabled {
            debug!(zone_id = %zone.id, trigger = trigger.as_str(), "tracking disabled for zone, dropping event");
            return;
        }

        let trigger = trigger.for_zone(&zone);
        let location = zone.center();
        self.emit(trigger, Some(zone), location);
    }

    fn locations_updated(&mut self, locations: Vec<Location>) {
        // ---
        let Some(location) = locations.into_iter().last() else {
            return;
        };
        self.platform.stop_updating_location();

        let Some(request) = lock(&self.pending).take() else {
            debug!("location update with no pending request");
            return;
        };

        self.emit(request.trigger, None, location.clone());
        let _ = request.reply.send(Ok(location));
    }

    fn authorization_changed(&mut self, status: AuthorizationStatus) {
        // ---
        match status {
            AuthorizationStatus::Denied => self.fail_pending(PipelineError::AuthorizationDenied),
            AuthorizationStatus::AuthorizedAlways => info!("location access authorized, location enabled"),
            other => debug!(?other, "location authorization changed"),
        }
    }

    fn location_failure(&mut self, kind: LocationErrorKind) {
        // ---
        match kind {
            // A fix is expected shortly
            LocationErrorKind::LocationUnknown => debug!("{}", kind.describe()),
            LocationErrorKind::Denied => {
                warn!("{}", kind.describe());
                self.fail_pending(PipelineError::AuthorizationDenied);
            }
            other => {
                warn!("{}", other.describe());
                self.fail_pending(PipelineError::LocationFailure {
                    detail: other.describe().to_string(),
                });
            }
        }
    }

    fn fail_pending(&mut self, err: PipelineError) {
        // ---
        let pending = lock(&self.pending).take();
        match pending {
            Some(request) => {
                self.platform.stop_updating_location();
                let _ = request.reply.send(Err(err));
            }
            None => debug!("no pending location request to fail: {err}"),
        }
    }

    fn emit(&self, trigger: LocationUpdateTrigger, zone: Option<Zone>, location: Location) {
        // ---
        let lease = BackgroundLease::acquire(self.leases.clone());
        debug!(
            trigger = trigger.as_str(),
            zone_id = zone.as_ref().map(|z| z.id.as_str()),
            "location event"
        );

        let event = LocationEvent {
            trigger,
            zone,
            location,
            lease,
        };
        if self.events.send(event).is_err() {
            warn!("location event stream has no consumer, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_geofence_region() {
        // ---
        let zone = Zone::geofence("home", 52.0, 4.3, 100.0);
        assert_eq!(
            region_for(&zone),
            Some(Region::Circular {
                identifier: "home".into(),
                latitude: 52.0,
                longitude: 4.3,
                radius: 100.0,
            })
        );
    }

    #[test]
    fn test_beacon_region_granularity() {
        // ---
        let uuid = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";
        let cases = [
            ((Some(1), Some(2)), (Some(1), Some(2))),
            ((Some(1), None), (Some(1), None)),
            ((None, None), (None, None)),
            ((None, Some(2)), (None, None)),
        ];

        for ((major, minor), expected) in cases {
            let zone = Zone::beacon("work", uuid, major, minor);
            match region_for(&zone) {
                Some(Region::Beacon {
                    identifier,
                    major,
                    minor,
                    notify_on_display,
                    ..
                }) => {
                    assert_eq!(identifier, "work");
                    assert_eq!((major, minor), expected);
                    assert!(notify_on_display);
                }
                other => panic!("expected beacon region, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_geofence_without_positive_radius_is_skipped() {
        // ---
        for radius in [0.0, -25.0, f64::NAN] {
            let zone = Zone::geofence("home", 52.0, 4.3, radius);
            assert_eq!(region_for(&zone), None, "radius {radius}");
        }
    }

    #[test]
    fn test_invalid_beacon_uuid_is_skipped() {
        // ---
        let zone = Zone::beacon("work", "ABCD", Some(1), Some(2));
        assert_eq!(region_for(&zone), None);
    }
}
