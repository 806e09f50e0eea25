//! Durable, append-only sample storage.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::Sample;

// ---

/// Timeseries store keyed by (device, register, timestamp).
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append one cycle's samples as a single atomic batch: either the
    /// whole register set becomes visible or none of it does.
    async fn append(&self, batch: &[Sample]) -> Result<(), StoreError>;

    /// Every sample of the device's most recent `limit` capture
    /// timestamps, newest first. A limit of 1 returns exactly one full
    /// register block. Never unbounded.
    async fn query_recent(&self, device_id: &str, limit: u32) -> Result<Vec<Sample>, StoreError>;
}

/// PostgreSQL-backed store over the shared connection pool.
pub struct PgSampleStore {
    pool: PgPool,
}

impl PgSampleStore {
    pub fn new(pool: PgPool) -> Self {
        PgSampleStore { pool }
    }
}

#[async_trait]
impl SampleStore for PgSampleStore {
    async fn append(&self, batch: &[Sample]) -> Result<(), StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;

        for sample in batch {
            sqlx::query(
                r#"
                INSERT INTO samples (device_id, register, value, captured_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&sample.device_id)
            .bind(sample.register)
            .bind(sample.value)
            .bind(sample.captured_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query_recent(&self, device_id: &str, limit: u32) -> Result<Vec<Sample>, StoreError> {
        // ---
        // Limit counts capture timestamps, not rows, so a batch is
        // always returned whole.
        let samples = sqlx::query_as::<_, Sample>(
            r#"
            SELECT device_id, register, value, captured_at
            FROM samples
            WHERE device_id = $1
              AND captured_at IN (
                  SELECT DISTINCT captured_at
                  FROM samples
                  WHERE device_id = $1
                  ORDER BY captured_at DESC
                  LIMIT $2
              )
            ORDER BY captured_at DESC, register ASC
            "#,
        )
        .bind(device_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(samples)
    }
}

// ---

/// In-memory store for acquisition-loop tests: same contract, plus
/// scripted write failures.
#[cfg(test)]
pub mod testing {
    // ---
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemorySampleStore {
        rows: Mutex<Vec<Sample>>,
        fail_next: AtomicU32,
        append_calls: AtomicU32,
    }

    impl MemorySampleStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` append calls fail.
        pub fn fail_next_appends(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        pub fn append_calls(&self) -> u32 {
            self.append_calls.load(Ordering::SeqCst)
        }

        pub fn rows(&self) -> Vec<Sample> {
            self.rows.lock().unwrap().clone()
        }
    }

    // Mirrors the SQL semantics of PgSampleStore::query_recent: limit
    // selects capture timestamps, batches come back whole.
    #[async_trait]
    impl SampleStore for MemorySampleStore {
        async fn append(&self, batch: &[Sample]) -> Result<(), StoreError> {
            // ---
            self.append_calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }

            self.rows.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }

        async fn query_recent(
            &self,
            device_id: &str,
            limit: u32,
        ) -> Result<Vec<Sample>, StoreError> {
            // ---
            let mut rows: Vec<Sample> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.device_id == device_id)
                .cloned()
                .collect();

            rows.sort_by(|a, b| {
                b.captured_at
                    .cmp(&a.captured_at)
                    .then(a.register.cmp(&b.register))
            });

            let mut cutoffs: Vec<_> = rows.iter().map(|s| s.captured_at).collect();
            cutoffs.dedup();
            cutoffs.truncate(limit as usize);
            rows.retain(|s| cutoffs.contains(&s.captured_at));

            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use chrono::{TimeZone, Utc};

    use super::testing::MemorySampleStore;
    use super::*;

    fn batch(second: u32, values: &[f64]) -> Vec<Sample> {
        // ---
        let captured_at = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, second).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample {
                device_id: "motor-a".to_string(),
                register: i as i16,
                value,
                captured_at,
            })
            .collect()
    }

    #[tokio::test]
    async fn query_limit_counts_cycles_and_returns_whole_batches() {
        // ---
        let store = MemorySampleStore::new();
        store.append(&batch(0, &[20.0, 40.0, 0.0])).await.unwrap();
        store.append(&batch(5, &[21.0, 41.0, 1.0])).await.unwrap();
        store.append(&batch(10, &[22.0, 42.0, 2.0])).await.unwrap();

        let recent = store.query_recent("motor-a", 1).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|s| s.captured_at == recent[0].captured_at));
        assert_eq!(recent[0].value, 22.0);

        let two = store.query_recent("motor-a", 2).await.unwrap();
        assert_eq!(two.len(), 6);
    }

    #[tokio::test]
    async fn query_orders_newest_first_then_register() {
        // ---
        let store = MemorySampleStore::new();
        store.append(&batch(0, &[20.0, 40.0])).await.unwrap();
        store.append(&batch(5, &[21.0, 41.0])).await.unwrap();

        let recent = store.query_recent("motor-a", 10).await.unwrap();

        for pair in recent.windows(2) {
            assert!(pair[0].captured_at >= pair[1].captured_at);
            if pair[0].captured_at == pair[1].captured_at {
                assert!(pair[0].register < pair[1].register);
            }
        }
        assert!(store.query_recent("other", 10).await.unwrap().is_empty());
    }
}
