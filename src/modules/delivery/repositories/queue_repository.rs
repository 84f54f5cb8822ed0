use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::core::error::AicmResult;
use crate::core::time::epoch_seconds;
use crate::modules::delivery::models::QueueStatus;

/// Backoff cap for rescheduled rows, in seconds.
const BACKOFF_CAP_SECS: f64 = 300.0;

/// One row of the durable queue.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueRow {
    pub id: i64,
    pub payload: String,
    pub status: String,
    pub retry_count: i64,
    pub scheduled_at: f64,
    pub created_at: f64,
    pub updated_at: f64,
}

/// SQLite-backed queue storage for the persistent delivery strategy.
///
/// The database is opened in WAL mode with a single writer per process;
/// pickup flips rows to `processing` inside one transaction so a crash can
/// orphan but never lose work.
pub struct QueueRepository {
    pool: Pool<Sqlite>,
}

impl QueueRepository {
    /// Open (creating directories, file and schema as needed).
    pub async fn connect(db_path: &Path) -> AicmResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                scheduled_at REAL NOT NULL,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_pickup ON queue (status, scheduled_at, id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert a record as `queued`, eligible immediately.
    pub async fn enqueue(&self, payload: &str) -> AicmResult<i64> {
        let now = epoch_seconds();
        let result = sqlx::query(
            "INSERT INTO queue (payload, status, retry_count, scheduled_at, created_at, updated_at) \
             VALUES (?, 'queued', 0, ?, ?, ?)",
        )
        .bind(payload)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        debug!(id, "enqueued message");
        Ok(id)
    }

    /// Fetch up to `limit` due rows and mark them `processing` in a single
    /// transaction. Rows come back in id order.
    pub async fn fetch_batch(&self, limit: i64) -> AicmResult<Vec<QueueRow>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT id, payload, status, retry_count, scheduled_at, created_at, updated_at \
             FROM queue WHERE status = 'queued' AND scheduled_at <= ? ORDER BY id LIMIT ?",
        )
        .bind(epoch_seconds())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        if !rows.is_empty() {
            let now = epoch_seconds();
            for row in &rows {
                sqlx::query("UPDATE queue SET status = 'processing', updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        if !rows.is_empty() {
            debug!(count = rows.len(), "fetched messages for processing");
        }
        Ok(rows)
    }

    /// Acknowledge delivered rows by deleting them in one transaction.
    pub async fn ack(&self, ids: &[i64]) -> AicmResult<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM queue WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = ids.len(), "delivered messages");
        Ok(())
    }

    /// Requeue a row with exponential backoff, or mark it terminally
    /// `failed` once `retry_count` reaches `max_retries`. Returns the new
    /// status.
    pub async fn reschedule(
        &self,
        id: i64,
        retry_count: i64,
        max_retries: i64,
    ) -> AicmResult<QueueStatus> {
        let now = epoch_seconds();
        let (status, scheduled_at) = if retry_count >= max_retries {
            (QueueStatus::Failed, now)
        } else {
            let backoff = f64::min((1u64 << retry_count.clamp(0, 32)) as f64, BACKOFF_CAP_SECS);
            (QueueStatus::Queued, now + backoff)
        };
        sqlx::query(
            "UPDATE queue SET status = ?, retry_count = ?, scheduled_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(retry_count)
        .bind(scheduled_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        debug!(id, retry = retry_count, status = %status, next_at = scheduled_at, "rescheduled message");
        Ok(status)
    }

    /// Demote orphaned `processing` rows older than `threshold` back to
    /// `queued`, making them immediately eligible. Returns how many rows
    /// were reclaimed.
    pub async fn reclaim(&self, threshold: Duration) -> AicmResult<u64> {
        let now = epoch_seconds();
        let cutoff = now - threshold.as_secs_f64();
        let result = sqlx::query(
            "UPDATE queue SET status = 'queued', scheduled_at = ?, updated_at = ? \
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Per-status row counts.
    pub async fn status_counts(&self) -> AicmResult<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn queued_count(&self) -> AicmResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM queue WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Rows in a given status, oldest first.
    pub async fn list(&self, status: QueueStatus, limit: i64) -> AicmResult<Vec<QueueRow>> {
        let rows = sqlx::query_as(
            "SELECT id, payload, status, retry_count, scheduled_at, created_at, updated_at \
             FROM queue WHERE status = ? ORDER BY id LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
