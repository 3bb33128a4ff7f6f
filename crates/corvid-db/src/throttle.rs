//! SQLite throttle repository: concurrency slots and rate-limit buckets.
//!
//! Both tables are keyed by (connector, account). Slot acquisition is a
//! conditional increment; token consumption refills the bucket lazily from
//! the elapsed wall-clock time before attempting the spend. SQLite's write
//! serialization makes each statement atomic against concurrent workers.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use corvid_core::{ConnectorType, Result, ThrottleRepository};

pub struct SqliteThrottleRepository {
    pool: SqlitePool,
}

impl SqliteThrottleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThrottleRepository for SqliteThrottleRepository {
    async fn acquire_slot(
        &self,
        connector: ConnectorType,
        account_id: &str,
        max: i32,
    ) -> Result<bool> {
        sqlx::query(
            r#"
            INSERT INTO concurrency_slots (connector, account_id, count)
            VALUES (?1, ?2, 0)
            ON CONFLICT (connector, account_id) DO NOTHING
            "#,
        )
        .bind(connector.as_str())
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE concurrency_slots
            SET count = count + 1
            WHERE connector = ?1 AND account_id = ?2 AND count < ?3
            "#,
        )
        .bind(connector.as_str())
        .bind(account_id)
        .bind(max)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_slot(&self, connector: ConnectorType, account_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE concurrency_slots
            SET count = MAX(count - 1, 0)
            WHERE connector = ?1 AND account_id = ?2
            "#,
        )
        .bind(connector.as_str())
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn slot_count(&self, connector: ConnectorType, account_id: &str) -> Result<i32> {
        let row = sqlx::query(
            "SELECT count FROM concurrency_slots WHERE connector = ?1 AND account_id = ?2",
        )
        .bind(connector.as_str())
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => row.try_get("count")?,
            None => 0,
        })
    }

    async fn consume_token(
        &self,
        connector: ConnectorType,
        account_id: &str,
        capacity: f64,
        refill_per_sec: f64,
    ) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();

        // New keys start with a full bucket.
        sqlx::query(
            r#"
            INSERT INTO rate_buckets (connector, account_id, tokens, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (connector, account_id) DO NOTHING
            "#,
        )
        .bind(connector.as_str())
        .bind(account_id)
        .bind(capacity)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        // Refill from elapsed time, capped at capacity, then spend one token
        // only if a whole token is available. All in one statement so two
        // workers cannot both spend the last token.
        let result = sqlx::query(
            r#"
            UPDATE rate_buckets
            SET tokens = MIN(?3, tokens + (?4 - updated_at_ms) * ?5 / 1000.0) - 1.0,
                updated_at_ms = ?4
            WHERE connector = ?1 AND account_id = ?2
              AND MIN(?3, tokens + (?4 - updated_at_ms) * ?5 / 1000.0) >= 1.0
            "#,
        )
        .bind(connector.as_str())
        .bind(account_id)
        .bind(capacity)
        .bind(now_ms)
        .bind(refill_per_sec)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
