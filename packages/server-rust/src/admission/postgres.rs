//! Shared counter store on `PostgreSQL`, for several instances behind one
//! quota.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagedrop_core::Clock;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::counter::{CounterSnapshot, CounterStore};

/// Counter store backed by a `rate_limits` table.
///
/// One upsert per hit: a row whose window has elapsed is restarted at count 1
/// inside the same statement, so concurrent instances never double-reset.
pub struct PostgresCounterStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresCounterStore {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl CounterStore for PostgresCounterStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rate_limits (
                key TEXT PRIMARY KEY,
                count BIGINT NOT NULL,
                expires_at BIGINT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM rate_limits")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<CounterSnapshot> {
        let now = self.clock.now_millis();
        let window_ms = i64::try_from(window.as_millis())?;

        let row = sqlx::query(
            "INSERT INTO rate_limits (key, count, expires_at) VALUES ($1, 1, $2 + $3)
             ON CONFLICT (key) DO UPDATE SET
                count = CASE WHEN rate_limits.expires_at <= $2 THEN 1
                             ELSE rate_limits.count + 1 END,
                expires_at = CASE WHEN rate_limits.expires_at <= $2 THEN $2 + $3
                                  ELSE rate_limits.expires_at END
             RETURNING count, expires_at",
        )
        .bind(key)
        .bind(now)
        .bind(window_ms)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        let expires_at: i64 = row.try_get("expires_at")?;
        Ok(CounterSnapshot {
            count: u64::try_from(count)?,
            ttl_remaining: Duration::from_millis(u64::try_from(expires_at - now).unwrap_or(0)),
        })
    }
}
