//! Database schema management for the gateway.
//!
//! Ensures the sample table and its indexes exist before acquisition
//! starts. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// The `samples` table is append-only: the gateway only ever INSERTs,
/// and the unique index enforces the (device, register, timestamp)
/// uniqueness key. Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS samples (
            id          BIGSERIAL PRIMARY KEY,
            device_id   TEXT             NOT NULL,
            register    SMALLINT         NOT NULL,
            value       DOUBLE PRECISION NOT NULL,
            captured_at TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Row uniqueness key; duplicate timestamps across registers within
    // one batch are legal because the register is part of the key.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_samples_identity
            ON samples (device_id, register, captured_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Backs the bounded recency query used by the viewer.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_samples_device_recency
            ON samples (device_id, captured_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
