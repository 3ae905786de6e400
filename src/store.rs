//! Zone store collaborator.
//!
//! The pipeline only needs two things from a store: a snapshot of every zone
//! and a signal when that snapshot may have changed. [`ZoneStore`] is that
//! seam; [`SqliteZoneStore`] is the implementation the binary runs on.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::models::{Zone, ZoneRecord};

/// Capacity of the change channel. Changes carry no payload, so a lagging
/// subscriber only needs to know that *something* changed.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

// ---

#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Snapshot of every stored zone.
    async fn list(&self) -> Result<Vec<Zone>>;

    /// Subscribe to store mutations.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

/// SQLite-backed zone store.
#[derive(Clone)]
pub struct SqliteZoneStore {
    pool: SqlitePool,
    changes: broadcast::Sender<()>,
}

impl SqliteZoneStore {
    // ---
    pub fn new(pool: SqlitePool) -> Self {
        // ---
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    /// Insert or replace a zone and notify subscribers.
    pub async fn upsert(&self, zone: &Zone) -> Result<()> {
        // ---
        let beacon = zone.beacon.as_ref();

        sqlx::query(
            r#"
            INSERT INTO zones (
                id, name, latitude, longitude, radius, tracking_enabled,
                beacon_uuid, beacon_major, beacon_minor, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name             = EXCLUDED.name,
                latitude         = EXCLUDED.latitude,
                longitude        = EXCLUDED.longitude,
                radius           = EXCLUDED.radius,
                tracking_enabled = EXCLUDED.tracking_enabled,
                beacon_uuid      = EXCLUDED.beacon_uuid,
                beacon_major     = EXCLUDED.beacon_major,
                beacon_minor     = EXCLUDED.beacon_minor,
                updated_at       = EXCLUDED.updated_at
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(zone.latitude)
        .bind(zone.longitude)
        .bind(zone.radius)
        .bind(zone.tracking_enabled)
        .bind(beacon.map(|b| b.uuid.clone()))
        .bind(beacon.and_then(|b| b.major).map(i64::from))
        .bind(beacon.and_then(|b| b.minor).map(i64::from))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(zone_id = %zone.id, "zone stored");
        self.notify();
        Ok(())
    }

    /// Delete a zone. Returns whether a row was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        // ---
        let removed = sqlx::query("DELETE FROM zones WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        if removed {
            debug!(zone_id = %id, "zone removed");
            self.notify();
        }
        Ok(removed)
    }

    fn notify(&self) {
        // No subscribers is fine; the next load picks the change up.
        let _ = self.changes.send(());
    }
}

#[async_trait]
impl ZoneStore for SqliteZoneStore {
    async fn list(&self) -> Result<Vec<Zone>> {
        // ---
        let records: Vec<ZoneRecord> = sqlx::query_as(
            r#"
            SELECT id, name, latitude, longitude, radius, tracking_enabled,
                   beacon_uuid, beacon_major, beacon_minor, updated_at
            FROM zones
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.iter().map(ZoneRecord::to_zone).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}
