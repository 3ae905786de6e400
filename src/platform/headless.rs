//! Platform implementations for hosts without a mobile OS.
//!
//! The binary uses these: regions are tracked in-process, leases expire on a
//! tokio timer, notifications are held in an in-process notification center,
//! and telemetry goes to `tracing`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    BatteryMonitor, BatteryState, ClientEvent, LeaseHandle, LeaseProvider, Notifier, Region,
    RegionPlatform, TelemetrySink,
};
use crate::error::ErrorCategory;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---

/// Keeps the monitored-region set in memory and logs every change.
#[derive(Default)]
pub struct HeadlessRegionPlatform {
    regions: Mutex<BTreeMap<String, Region>>,
    updating: AtomicBool,
    significant_changes: AtomicBool,
}

impl HeadlessRegionPlatform {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers currently being monitored, in order.
    pub fn monitored(&self) -> Vec<String> {
        lock(&self.regions).keys().cloned().collect()
    }

    pub fn region(&self, identifier: &str) -> Option<Region> {
        lock(&self.regions).get(identifier).cloned()
    }

    pub fn is_updating_location(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    pub fn is_watching_significant_changes(&self) -> bool {
        self.significant_changes.load(Ordering::SeqCst)
    }
}

impl RegionPlatform for HeadlessRegionPlatform {
    fn start_monitoring(&self, region: &Region) {
        info!(region = %region.identifier(), "starting monitoring of region");
        lock(&self.regions).insert(region.identifier().to_string(), region.clone());
    }

    fn stop_monitoring(&self, identifier: &str) {
        info!(region = %identifier, "stopping monitoring of region");
        lock(&self.regions).remove(identifier);
    }

    fn start_significant_changes(&self) {
        self.significant_changes.store(true, Ordering::SeqCst);
    }

    fn start_updating_location(&self) {
        self.updating.store(true, Ordering::SeqCst);
    }

    fn stop_updating_location(&self) {
        self.updating.store(false, Ordering::SeqCst);
    }
}

/// Grants leases that the "platform" revokes after a fixed lifetime.
pub struct TimerLeaseProvider {
    lifetime: Duration,
    next: AtomicU64,
    timers: Mutex<HashMap<LeaseHandle, Option<JoinHandle<()>>>>,
}

impl TimerLeaseProvider {
    // ---
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            next: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl LeaseProvider for TimerLeaseProvider {
    fn acquire(&self, on_expire: Box<dyn FnOnce() + Send>) -> LeaseHandle {
        // ---
        let handle = LeaseHandle(self.next.fetch_add(1, Ordering::SeqCst));
        let lifetime = self.lifetime;

        // Outside a runtime there is nothing to drive the timer; the lease
        // then lives until it is released.
        let timer = tokio::runtime::Handle::try_current().ok().map(|rt| {
            rt.spawn(async move {
                tokio::time::sleep(lifetime).await;
                on_expire();
            })
        });

        lock(&self.timers).insert(handle, timer);
        handle
    }

    fn release(&self, handle: LeaseHandle) {
        match lock(&self.timers).remove(&handle) {
            Some(timer) => {
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            None => warn!(lease = handle.0, "release of unknown background lease"),
        }
    }
}

/// A notification waiting to be seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotification {
    pub title: String,
    pub body: String,
}

/// In-process notification center with identifier-replace semantics.
#[derive(Default)]
pub struct NotificationCenter {
    pending: Mutex<BTreeMap<String, PendingNotification>>,
}

impl NotificationCenter {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<(String, PendingNotification)> {
        lock(&self.pending)
            .iter()
            .map(|(id, n)| (id.clone(), n.clone()))
            .collect()
    }

    /// Remove a pending notification, as if the user dismissed it.
    pub fn dismiss(&self, identifier: &str) -> Option<PendingNotification> {
        lock(&self.pending).remove(identifier)
    }
}

impl Notifier for NotificationCenter {
    fn schedule(&self, identifier: &str, title: &str, body: &str) {
        // ---
        let replaced = lock(&self.pending)
            .insert(
                identifier.to_string(),
                PendingNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                },
            )
            .is_some();
        info!(identifier, replaced, "{title}: {body}");
    }
}

/// Sends telemetry into the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_error(&self, category: ErrorCategory, detail: &str) {
        error!(%category, detail, "pipeline error");
    }

    fn record_event(&self, event: ClientEvent) {
        debug!(
            id = %event.id,
            event_type = ?event.event_type,
            payload = %event.payload,
            "{}", event.text
        );
    }
}

/// Battery reading fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct FixedBattery {
    level: f32,
    state: BatteryState,
}

impl FixedBattery {
    pub fn new(level: f32, state: BatteryState) -> Self {
        Self { level, state }
    }

    /// A host that cannot read its battery.
    pub fn unknown() -> Self {
        Self::new(-1.0, BatteryState::Unknown)
    }
}

impl BatteryMonitor for FixedBattery {
    fn level(&self) -> f32 {
        self.level
    }

    fn state(&self) -> BatteryState {
        self.state
    }
}
