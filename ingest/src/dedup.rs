use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use time::format_description::well_known::Iso8601;
use tokio::sync::Mutex;

use crate::time::TimeSource;

/// Enumeration of errors for operations on the dedup store.
/// Errors originating from sqlx are wrapped to add command context.
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("failed to create data directory: {error}")]
    DataDirError { error: std::io::Error },
    #[error("connection to dedup database failed: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

pub type DedupResult<T> = std::result::Result<T, DedupError>;

/// A row returned by topic queries: everything but the topic itself.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessedRecord {
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub processed_at: String,
}

/// Durable set of processed (topic, event_id) keys, backed by a SQLite file.
///
/// The composite primary key is the source of truth for idempotence:
/// `mark_processed` is the only mutation, and a conflicting insert reports
/// "already present" instead of failing. Writes are serialized behind a
/// process-wide gate; reads go straight to the pool.
pub struct DedupStore {
    pool: SqlitePool,
    write_gate: Mutex<()>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl DedupStore {
    pub async fn new(
        db_path: impl AsRef<Path>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> DedupResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| DedupError::DataDirError { error })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|error| DedupError::ConnectionError { error })?;

        tracing::info!(path = %db_path.display(), "dedup store opened");

        Ok(Self {
            pool,
            write_gate: Mutex::new(()),
            timesource,
        })
    }

    /// Creates the schema and indices if absent. Idempotent; a failure here
    /// is fatal to service startup.
    pub async fn initialize(&self) -> DedupResult<()> {
        let statements = [
            r#"
CREATE TABLE IF NOT EXISTS processed_events (
    topic TEXT NOT NULL,
    event_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (topic, event_id)
)
            "#,
            "CREATE INDEX IF NOT EXISTS idx_topic ON processed_events (topic)",
            "CREATE INDEX IF NOT EXISTS idx_processed_at ON processed_events (processed_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|error| DedupError::QueryError {
                    command: "CREATE".to_owned(),
                    error,
                })?;
        }

        tracing::info!("dedup store initialized");
        Ok(())
    }

    /// True iff a record with this key exists at the moment of the call.
    /// Point-in-time only: admission uses this as a fast path, but the
    /// insert in `mark_processed` stays authoritative.
    pub async fn is_duplicate(&self, topic: &str, event_id: &str) -> DedupResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM processed_events WHERE topic = ?1 AND event_id = ?2 LIMIT 1",
        )
        .bind(topic)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| DedupError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        Ok(row.is_some())
    }

    /// Atomically records the key as processed, stamping `processed_at` with
    /// the current time. Returns true on insert, false iff the key already
    /// existed; the uniqueness conflict is never surfaced as an error.
    pub async fn mark_processed(
        &self,
        topic: &str,
        event_id: &str,
        timestamp: &str,
        source: &str,
    ) -> DedupResult<bool> {
        let _gate = self.write_gate.lock().await;

        let processed_at = self.timesource.current_time();
        let result = sqlx::query(
            r#"
INSERT INTO processed_events (topic, event_id, timestamp, source, processed_at)
VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .bind(timestamp)
        .bind(source)
        .bind(&processed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => Ok(false),
            Err(error) => Err(DedupError::QueryError {
                command: "INSERT".to_owned(),
                error,
            }),
        }
    }

    /// Total count of processed records.
    pub async fn get_processed_count(&self) -> DedupResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| DedupError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(count.unsigned_abs())
    }

    /// Distinct topics, sorted.
    pub async fn get_topics(&self) -> DedupResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT topic FROM processed_events ORDER BY topic")
            .fetch_all(&self.pool)
            .await
            .map_err(|error| DedupError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Records for one topic, most recently processed first.
    pub async fn get_events_by_topic(
        &self,
        topic: &str,
        limit: Option<i64>,
    ) -> DedupResult<Vec<ProcessedRecord>> {
        sqlx::query_as::<_, ProcessedRecord>(
            r#"
SELECT event_id, timestamp, source, processed_at
FROM processed_events
WHERE topic = ?1
ORDER BY processed_at DESC
LIMIT ?2
            "#,
        )
        .bind(topic)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| DedupError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    pub async fn get_count_by_topic(&self, topic: &str) -> DedupResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_events WHERE topic = ?1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| DedupError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(count.unsigned_abs())
    }

    /// Deletes records whose `processed_at` is older than `max_age_days`
    /// before now. Returns the number of deleted records.
    pub async fn cleanup_old_events(&self, max_age_days: u32) -> DedupResult<u64> {
        let _gate = self.write_gate.lock().await;

        let cutoff = self.timesource.now() - time::Duration::days(i64::from(max_age_days));
        let cutoff_iso = cutoff
            .format(&Iso8601::DEFAULT)
            .expect("failed to iso8601 format cutoff");

        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < ?1")
            .bind(&cutoff_iso)
            .execute(&self.pool)
            .await
            .map_err(|error| DedupError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, max_age_days, "cleaned up old events");
        }
        Ok(deleted)
    }
}
