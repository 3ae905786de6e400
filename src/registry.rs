//! Typed, ordered view over the zone store.
//!
//! The registry keeps the last successfully loaded snapshot as an arena of
//! immutable [`Zone`] values keyed by id. A failed load never touches that
//! snapshot: the previous set stays authoritative until a load succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Zone;
use crate::store::ZoneStore;

// ---

/// What changed between two registry snapshots, by zone id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ZoneDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ZoneDiff {
    // ---
    pub fn between(previous: &BTreeMap<String, Zone>, next: &BTreeMap<String, Zone>) -> Self {
        // ---
        let mut diff = ZoneDiff::default();

        for (id, zone) in next {
            match previous.get(id) {
                None => diff.added.push(id.clone()),
                Some(old) if old != zone => diff.changed.push(id.clone()),
                Some(_) => {}
            }
        }
        diff.removed = previous
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub struct ZoneRegistry {
    store: Arc<dyn ZoneStore>,
    zones: BTreeMap<String, Zone>,
}

impl ZoneRegistry {
    // ---
    pub fn new(store: Arc<dyn ZoneStore>) -> Self {
        Self {
            store,
            zones: BTreeMap::new(),
        }
    }

    /// Reload the snapshot from the store.
    ///
    /// On error the previous snapshot is kept and `StoreUnavailable` is
    /// returned to the caller.
    pub async fn load(&mut self) -> Result<ZoneDiff> {
        // ---
        let listed = self.store.list().await?;

        let mut next = BTreeMap::new();
        for zone in listed {
            if let Some(duplicate) = next.insert(zone.id.clone(), zone) {
                warn!(zone_id = %duplicate.id, "store returned duplicate zone id, keeping the last one");
            }
        }

        let diff = ZoneDiff::between(&self.zones, &next);
        debug!(
            total = next.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "zone registry loaded"
        );
        self.zones = next;
        Ok(diff)
    }

    /// Zones in id order.
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Subscribe to store mutations.
    pub fn on_change(&self) -> broadcast::Receiver<()> {
        self.store.subscribe()
    }
}
