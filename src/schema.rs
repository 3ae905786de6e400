//! Database schema management for the zone store.
//!
//! Ensures the `zones` table exists before the store is used.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use sqlx::SqlitePool;

use crate::error::Result;

// ---

/// Create or update the zone store schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated as `StoreUnavailable`.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS zones (
            id               TEXT    PRIMARY KEY,
            name             TEXT,
            latitude         REAL    NOT NULL,
            longitude        REAL    NOT NULL,
            radius           REAL    NOT NULL CHECK (radius > 0),
            tracking_enabled BOOLEAN NOT NULL DEFAULT 1,
            beacon_uuid      TEXT,
            beacon_major     INTEGER,
            beacon_minor     INTEGER,
            updated_at       TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
