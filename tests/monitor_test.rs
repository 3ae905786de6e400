//! Region monitor behaviour against a scripted zone store and the headless
//! platform.

mod common;

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use common::{settings, Harness};
use zonewatch::platform::{AuthorizationStatus, LocationErrorKind, PlatformSignal, Region};
use zonewatch::{ErrorCategory, Location, LocationUpdateTrigger, PipelineError, Zone};

const BEACON_UUID: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

fn fix(latitude: f64, longitude: f64) -> Location {
    Location {
        latitude,
        longitude,
        horizontal_accuracy: 12.0,
        timestamp: Utc::now(),
    }
}

fn untracked(mut zone: Zone) -> Zone {
    zone.tracking_enabled = false;
    zone
}

fn harness(zones: Vec<Zone>) -> Harness {
    Harness::new(zones, settings(None))
}

/// Wait until the spawned requester has registered its request.
async fn wait_for_request(h: &Harness) {
    while !h.platform.is_updating_location() {
        tokio::task::yield_now().await;
    }
}

// ---

#[tokio::test]
async fn test_start_monitors_tracked_zones_only() {
    // ---
    let mut h = harness(vec![
        Zone::geofence("home", 52.0, 4.3, 100.0),
        untracked(Zone::geofence("office", 52.1, 4.4, 50.0)),
        Zone::beacon("work", BEACON_UUID, Some(1), Some(2)),
    ]);

    assert_ok!(h.monitor.start().await);

    assert!(h.platform.is_watching_significant_changes());
    assert_eq!(h.monitor.monitored(), vec!["home", "work"]);
    assert_eq!(h.platform.monitored(), vec!["home", "work"]);
    assert!(matches!(
        h.platform.region("work"),
        Some(Region::Beacon { major: Some(1), minor: Some(2), .. })
    ));
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    // ---
    let mut h = harness(vec![
        Zone::geofence("home", 52.0, 4.3, 100.0),
        Zone::beacon("work", BEACON_UUID, Some(1), None),
    ]);

    assert_ok!(h.monitor.resync().await);
    let first = h.platform.monitored();
    let home = h.platform.region("home");

    assert_ok!(h.monitor.resync().await);
    assert_eq!(h.platform.monitored(), first);
    assert_eq!(h.platform.region("home"), home);
}

#[tokio::test]
async fn test_resync_keeps_regions_when_store_fails() {
    // ---
    let mut h = harness(vec![
        Zone::geofence("a", 52.0, 4.3, 100.0),
        Zone::geofence("b", 52.1, 4.4, 100.0),
    ]);
    assert_ok!(h.monitor.resync().await);

    h.store.fail("disk I/O error");
    let err = assert_err!(h.monitor.resync().await);

    assert_eq!(err.category(), ErrorCategory::StoreUnavailable);
    assert_eq!(h.monitor.monitored(), vec!["a", "b"]);
    assert_eq!(h.platform.monitored(), vec!["a", "b"]);
    assert_eq!(
        h.telemetry.error_categories(),
        vec![ErrorCategory::StoreUnavailable]
    );
}

#[tokio::test]
async fn test_resync_follows_store_changes() {
    // ---
    let mut h = harness(vec![
        Zone::geofence("a", 52.0, 4.3, 100.0),
        Zone::geofence("b", 52.1, 4.4, 100.0),
    ]);
    assert_ok!(h.monitor.resync().await);

    h.store.set_zones(vec![
        Zone::geofence("a", 52.0, 4.3, 100.0),
        Zone::geofence("c", 52.2, 4.5, 100.0),
    ]);
    assert_ok!(h.monitor.resync().await);

    assert_eq!(h.platform.monitored(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_region_enter_emits_event_with_lease() {
    // ---
    let mut h = harness(vec![Zone::geofence("home", 52.0, 4.3, 100.0)]);
    assert_ok!(h.monitor.start().await);

    h.monitor
        .handle_signal(PlatformSignal::RegionEntered {
            identifier: "home".into(),
        })
        .await;

    let event = h.next_event().expect("event for home");
    assert_eq!(event.trigger, LocationUpdateTrigger::RegionEnter);
    assert_eq!(event.zone.as_ref().map(|z| z.id.as_str()), Some("home"));
    assert_eq!(event.location.latitude, 52.0);
    assert_eq!(event.location.horizontal_accuracy, 1.0);
    assert!(event.lease.is_held());
    assert_eq!(h.leases.acquired(), 1);

    drop(event);
    assert_eq!(h.leases.released(), 1);
}

#[tokio::test]
async fn test_beacon_exit_is_remapped() {
    // ---
    let mut h = harness(vec![Zone::beacon("work", BEACON_UUID, Some(1), Some(2))]);
    assert_ok!(h.monitor.start().await);

    h.monitor
        .handle_signal(PlatformSignal::RegionExited {
            identifier: "work".into(),
        })
        .await;

    let event = h.next_event().expect("event for work");
    assert_eq!(event.trigger, LocationUpdateTrigger::BeaconRegionExit);
}

#[tokio::test]
async fn test_beacon_zone_with_invalid_uuid_still_resolves() {
    // ---
    let mut h = harness(vec![Zone::beacon("lab", "ABCD", Some(1), Some(2))]);
    assert_ok!(h.monitor.start().await);
    assert!(h.platform.monitored().is_empty());

    h.monitor
        .handle_signal(PlatformSignal::RegionEntered {
            identifier: "lab".into(),
        })
        .await;

    let event = h.next_event().expect("event for lab");
    assert_eq!(event.trigger, LocationUpdateTrigger::BeaconRegionEnter);
}

#[tokio::test]
async fn test_untracked_zone_events_are_dropped() {
    // ---
    let mut h = harness(vec![untracked(Zone::geofence("office", 52.1, 4.4, 50.0))]);
    assert_ok!(h.monitor.start().await);

    for signal in [
        PlatformSignal::RegionEntered {
            identifier: "office".into(),
        },
        PlatformSignal::RegionExited {
            identifier: "office".into(),
        },
    ] {
        h.monitor.handle_signal(signal).await;
    }

    assert!(h.next_event().is_none());
    assert_eq!(h.leases.acquired(), 0);
}

#[tokio::test]
async fn test_unknown_identifier_triggers_resync() {
    // ---
    let mut h = harness(vec![Zone::geofence("home", 52.0, 4.3, 100.0)]);
    assert_ok!(h.monitor.start().await);

    // The store moved on; the registry has not seen "gym" yet.
    h.store.set_zones(vec![
        Zone::geofence("home", 52.0, 4.3, 100.0),
        Zone::geofence("gym", 52.3, 4.6, 80.0),
    ]);

    h.monitor
        .handle_signal(PlatformSignal::RegionEntered {
            identifier: "gym".into(),
        })
        .await;

    assert!(h.next_event().is_none());
    assert_eq!(h.monitor.monitored(), vec!["gym", "home"]);
    assert!(h.monitor.registry().get("gym").is_some());
}

#[tokio::test]
async fn test_significant_change_emits_event_without_zone() {
    // ---
    let mut h = harness(vec![]);

    h.monitor
        .handle_signal(PlatformSignal::SignificantChange {
            location: fix(51.5, -0.1),
        })
        .await;

    let event = h.next_event().expect("significant change event");
    assert_eq!(event.trigger, LocationUpdateTrigger::SignificantLocationUpdate);
    assert!(event.zone.is_none());
    assert_eq!(event.location.latitude, 51.5);
}

// ---

#[tokio::test]
async fn test_one_shot_request_defaults_to_manual() {
    // ---
    let mut h = harness(vec![]);
    let requester = h.monitor.requester();

    let request = tokio::spawn(async move { requester.get_and_send_location(None).await });
    wait_for_request(&h).await;

    h.monitor
        .handle_signal(PlatformSignal::LocationsUpdated {
            locations: vec![fix(1.0, 1.0), fix(2.0, 2.0)],
        })
        .await;

    let location = assert_ok!(request.await.unwrap());
    assert_eq!(location.latitude, 2.0);
    assert!(!h.platform.is_updating_location());

    let event = h.next_event().expect("manual event");
    assert_eq!(event.trigger, LocationUpdateTrigger::Manual);
    assert_eq!(event.location.latitude, 2.0);
}

#[tokio::test]
async fn test_one_shot_request_keeps_its_trigger() {
    // ---
    let mut h = harness(vec![]);
    let requester = h.monitor.requester();

    let request = tokio::spawn(async move {
        requester
            .get_and_send_location(Some(LocationUpdateTrigger::PushNotification))
            .await
    });
    wait_for_request(&h).await;

    h.monitor
        .handle_signal(PlatformSignal::LocationsUpdated {
            locations: vec![fix(3.0, 3.0)],
        })
        .await;

    assert_ok!(request.await.unwrap());
    let event = h.next_event().expect("push event");
    assert_eq!(event.trigger, LocationUpdateTrigger::PushNotification);
}

#[tokio::test]
async fn test_one_shot_request_fails_when_authorization_denied() {
    // ---
    let mut h = harness(vec![]);
    let requester = h.monitor.requester();

    let request = tokio::spawn(async move { requester.get_and_send_location(None).await });
    wait_for_request(&h).await;

    h.monitor
        .handle_signal(PlatformSignal::AuthorizationChanged {
            status: AuthorizationStatus::Denied,
        })
        .await;

    let err = assert_err!(request.await.unwrap());
    assert_eq!(err, PipelineError::AuthorizationDenied);
    assert!(!h.platform.is_updating_location());
    assert!(h.next_event().is_none());
}

#[tokio::test]
async fn test_location_unknown_keeps_request_pending() {
    // ---
    let mut h = harness(vec![]);
    let requester = h.monitor.requester();

    let request = tokio::spawn(async move { requester.get_and_send_location(None).await });
    wait_for_request(&h).await;

    h.monitor
        .handle_signal(PlatformSignal::Failure {
            kind: LocationErrorKind::LocationUnknown,
        })
        .await;
    assert!(h.platform.is_updating_location());
    assert!(!request.is_finished());

    h.monitor
        .handle_signal(PlatformSignal::LocationsUpdated {
            locations: vec![fix(4.0, 4.0)],
        })
        .await;
    assert_ok!(request.await.unwrap());
}

#[tokio::test]
async fn test_location_failure_resolves_request() {
    // ---
    let mut h = harness(vec![]);
    let requester = h.monitor.requester();

    let request = tokio::spawn(async move { requester.get_and_send_location(None).await });
    wait_for_request(&h).await;

    h.monitor
        .handle_signal(PlatformSignal::Failure {
            kind: LocationErrorKind::Network,
        })
        .await;

    let err = assert_err!(request.await.unwrap());
    assert_eq!(err.category(), ErrorCategory::LocationFailure);
}

#[tokio::test]
async fn test_overlapping_request_supersedes_the_first() {
    // ---
    let mut h = harness(vec![]);

    let first = h.monitor.requester();
    let first = tokio::spawn(async move { first.get_and_send_location(None).await });
    wait_for_request(&h).await;

    let second = h.monitor.requester();
    let second = tokio::spawn(async move {
        second
            .get_and_send_location(Some(LocationUpdateTrigger::URLScheme))
            .await
    });

    let err = assert_err!(first.await.unwrap());
    assert_eq!(err, PipelineError::RequestSuperseded);

    h.monitor
        .handle_signal(PlatformSignal::LocationsUpdated {
            locations: vec![fix(5.0, 5.0)],
        })
        .await;

    assert_ok!(second.await.unwrap());
    let event = h.next_event().expect("url scheme event");
    assert_eq!(event.trigger, LocationUpdateTrigger::URLScheme);
    assert!(h.next_event().is_none());
}

#[tokio::test]
async fn test_unrequested_location_update_is_ignored() {
    // ---
    let mut h = harness(vec![]);

    h.monitor
        .handle_signal(PlatformSignal::LocationsUpdated {
            locations: vec![fix(6.0, 6.0)],
        })
        .await;

    assert!(h.next_event().is_none());
}

// ---

#[tokio::test]
async fn test_run_loop_resyncs_on_store_change() {
    // ---
    let mut h = harness(vec![Zone::geofence("home", 52.0, 4.3, 100.0)]);
    assert_ok!(h.monitor.start().await);

    let Harness {
        store,
        platform,
        monitor,
        mut events,
        ..
    } = h;

    let (signal_tx, signal_rx) = mpsc::channel(8);
    let running = tokio::spawn(monitor.run(signal_rx));

    // Once a signal comes back out, the loop is subscribed to store changes.
    signal_tx
        .send(PlatformSignal::SignificantChange {
            location: fix(52.0, 4.3),
        })
        .await
        .unwrap();
    assert!(events.recv().await.is_some());

    store.set_zones(vec![Zone::geofence("work", 52.2, 4.5, 100.0)]);

    let synced = tokio::time::timeout(Duration::from_secs(2), async {
        while platform.monitored() != vec!["work"] {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert_ok!(synced);

    drop(signal_tx);
    assert_ok!(running.await);
}

#[tokio::test]
async fn test_run_loop_applies_disable_before_pending_crossing() {
    // ---
    for _ in 0..20 {
        let mut h = harness(vec![Zone::geofence("home", 52.0, 4.3, 100.0)]);
        assert_ok!(h.monitor.start().await);

        let Harness {
            store,
            monitor,
            mut events,
            ..
        } = h;

        let (signal_tx, signal_rx) = mpsc::channel(8);
        let running = tokio::spawn(monitor.run(signal_rx));

        // Once a signal comes back out, the loop is subscribed to store changes.
        signal_tx
            .send(PlatformSignal::SignificantChange {
                location: fix(52.0, 4.3),
            })
            .await
            .unwrap();
        assert!(events.recv().await.is_some());

        // Disable, then the crossing arrives; both are queued before the
        // loop runs again.
        store.set_zones(vec![untracked(Zone::geofence("home", 52.0, 4.3, 100.0))]);
        signal_tx.try_send(entered_home()).unwrap();
        signal_tx
            .try_send(PlatformSignal::SignificantChange {
                location: fix(1.0, 1.0),
            })
            .unwrap();

        let next = events.recv().await.expect("marker event");
        assert_eq!(next.trigger, LocationUpdateTrigger::SignificantLocationUpdate);
        assert_eq!(next.location.latitude, 1.0);

        drop(signal_tx);
        assert_ok!(running.await);
        assert!(events.recv().await.is_none());
    }
}

fn entered_home() -> PlatformSignal {
    PlatformSignal::RegionEntered {
        identifier: "home".into(),
    }
}
