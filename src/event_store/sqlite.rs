// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed event store.
//!
//! The log lives in two tables: `transactions` assigns each transaction
//! id a monotonically increasing position, and `operations` holds the
//! transformed operations as JSON, indexed by the schema columns the
//! cursor filter needs. Idempotency rides on the UNIQUE constraint over
//! `transaction_id`: a replayed write inserts zero rows and reports a
//! duplicate.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. We handle this with:
//! - Automatic retry with exponential backoff
//! - Configurable max retries (default 5)
//!
//! # Why SQLite?
//!
//! - The log must survive daemon restarts; acknowledged source
//!   transactions cannot be re-read from the source.
//! - Write volume is one batch per source commit, well within
//!   single-writer territory.
//! - WAL mode gives durability with good performance.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::EventStoreConfig;
use crate::cursor::{Cursor, PublicSchemaReference};
use crate::error::Result;
use crate::operation::{OperationMessage, TransformedOperationWithSource};

use super::{EventStore, DEFAULT_READ_LIMIT, MAX_READ_LIMIT};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            // Fallback to message matching
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::event_store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Durable event store backed by SQLite.
pub struct SqliteEventStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteEventStore {
    /// Open (or create) the event log at the configured path.
    pub async fn new(config: &EventStoreConfig) -> Result<Self> {
        let path = config.sqlite_path.clone();
        info!(path = %path, "Initializing event store");

        let in_memory = path == ":memory:";
        let mut options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path))
        }
        .map_err(|e| crate::error::SyncError::Config(format!("Invalid SQLite path: {}", e)))?
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .create_if_missing(true);

        if config.wal_mode && !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // An in-memory database exists per connection; more than one
        // connection would see different logs.
        let max_connections = if in_memory { 1 } else { 2 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                transaction_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                manifest_slug TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                major_version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (transaction_id, seq)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_operations_schema
             ON operations (manifest_slug, schema_name, major_version)",
        )
        .execute(&pool)
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await?;
        if count > 0 {
            info!(transactions = count, "Restored event log from previous run");
        }

        Ok(Self { pool, path })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resume position: one past the furthest cursor, 0 when no cursor
    /// resolves to a stored transaction.
    async fn start_position(&self, cursors: &[Cursor]) -> Result<i64> {
        let mut start = 0i64;
        for cursor in cursors {
            let Some(id) = cursor.transaction_id.as_deref() else {
                continue;
            };
            let position: Option<i64> = execute_with_retry("read_position", || async {
                sqlx::query_scalar("SELECT position FROM transactions WHERE transaction_id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
            if let Some(position) = position {
                start = start.max(position + 1);
            }
        }
        Ok(start)
    }

    /// Build `(slug, name, major)` filter over the distinct schemas the
    /// cursors name, as an OR of parameterized triples.
    fn schema_filter(cursors: &[Cursor]) -> (String, Vec<(&str, &str, u32)>) {
        let mut triples: Vec<(&str, &str, u32)> = Vec::new();
        for cursor in cursors {
            let triple = (
                cursor.schema.manifest_slug.as_str(),
                cursor.schema.name.as_str(),
                cursor.schema.major_version,
            );
            if !triples.contains(&triple) {
                triples.push(triple);
            }
        }
        let clause = std::iter::repeat("(o.manifest_slug = ? AND o.schema_name = ? AND o.major_version = ?)")
            .take(triples.len())
            .collect::<Vec<_>>()
            .join(" OR ");
        (clause, triples)
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        execute_with_retry("checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn prepare(&self) -> Result<()> {
        // Connection is established in new(); verify it still answers.
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Event store closed");
        Ok(())
    }

    async fn write(
        &self,
        transaction_id: &str,
        operations: &[TransformedOperationWithSource],
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();

        let payloads: Vec<String> = operations
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;

        let accepted = execute_with_retry("write", || {
            let payloads = payloads.clone();
            async move {
                let mut tx = self.pool.begin().await?;

                let inserted = sqlx::query(
                    "INSERT OR IGNORE INTO transactions (transaction_id, created_at) VALUES (?, ?)",
                )
                .bind(transaction_id)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if inserted == 0 {
                    tx.rollback().await?;
                    return Ok(false);
                }

                for (seq, (op, payload)) in operations.iter().zip(&payloads).enumerate() {
                    sqlx::query(
                        r#"
                        INSERT INTO operations
                            (transaction_id, seq, manifest_slug, schema_name, major_version, payload)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(transaction_id)
                    .bind(seq as i64)
                    .bind(&op.source_manifest_slug)
                    .bind(&op.source_public_schema.name)
                    .bind(op.source_public_schema.version.major as i64)
                    .bind(payload)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok(true)
            }
        })
        .await?;

        crate::metrics::record_event_store_write(transaction_id, accepted, operations.len());
        if !accepted {
            debug!(transaction_id, "Duplicate transaction ignored");
        }
        Ok(accepted)
    }

    async fn read(
        &self,
        cursors: &[Cursor],
        limit: Option<usize>,
    ) -> Result<Vec<OperationMessage>> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(DEFAULT_READ_LIMIT).min(MAX_READ_LIMIT);
        let start = self.start_position(cursors).await?;
        let (clause, triples) = Self::schema_filter(cursors);

        // Page of transactions that contain at least one matching
        // operation, oldest first.
        let page_sql = format!(
            "SELECT DISTINCT t.position, t.transaction_id
             FROM transactions t
             JOIN operations o ON o.transaction_id = t.transaction_id
             WHERE t.position >= ? AND ({clause})
             ORDER BY t.position
             LIMIT ?"
        );

        let page: Vec<(i64, String)> = execute_with_retry("read_page", || {
            let mut query = sqlx::query_as::<_, (i64, String)>(&page_sql).bind(start);
            for (slug, name, major) in &triples {
                query = query.bind(*slug).bind(*name).bind(*major as i64);
            }
            query.bind(limit as i64).fetch_all(&self.pool)
        })
        .await?;

        let mut messages = Vec::with_capacity(page.len());
        for (_, transaction_id) in page {
            let ops_sql = format!(
                "SELECT o.payload FROM operations o
                 WHERE o.transaction_id = ? AND ({clause})
                 ORDER BY o.seq"
            );
            let rows: Vec<String> = execute_with_retry("read_operations", || {
                let mut query = sqlx::query_scalar::<_, String>(&ops_sql).bind(&transaction_id);
                for (slug, name, major) in &triples {
                    query = query.bind(*slug).bind(*name).bind(*major as i64);
                }
                query.fetch_all(&self.pool)
            })
            .await?;

            let operations = rows
                .iter()
                .map(|payload| serde_json::from_str(payload))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            messages.push(OperationMessage {
                transaction_id,
                operations,
            });
        }
        Ok(messages)
    }

    async fn tail(&self, schemas: &[PublicSchemaReference]) -> Result<Vec<Cursor>> {
        let mut cursors = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let row = execute_with_retry("tail", || async {
                sqlx::query(
                    "SELECT t.transaction_id
                     FROM transactions t
                     JOIN operations o ON o.transaction_id = t.transaction_id
                     WHERE o.manifest_slug = ? AND o.schema_name = ? AND o.major_version = ?
                     ORDER BY t.position DESC
                     LIMIT 1",
                )
                .bind(&schema.manifest_slug)
                .bind(&schema.name)
                .bind(schema.major_version as i64)
                .fetch_optional(&self.pool)
                .await
            })
            .await?;

            let transaction_id = row.map(|r| r.get::<String, _>(0));
            cursors.push(Cursor::new(schema.clone(), transaction_id));
        }
        Ok(cursors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{SourcePublicSchema, TransformedOperation, Version};
    use tempfile::tempdir;

    fn op(schema: &str, major: u32, id: i64) -> TransformedOperationWithSource {
        let mut object = serde_json::Map::new();
        object.insert("id".to_string(), serde_json::json!(id));
        TransformedOperationWithSource {
            operation: TransformedOperation::Insert {
                key_columns: vec!["id".to_string()],
                object,
            },
            source_manifest_slug: "svc-a".to_string(),
            source_data_store_slug: "ds-main".to_string(),
            source_public_schema: SourcePublicSchema {
                name: schema.to_string(),
                version: Version::new(major, 0),
            },
        }
    }

    fn reference(schema: &str, major: u32) -> PublicSchemaReference {
        PublicSchemaReference::new("svc-a", schema, major)
    }

    async fn memory_store() -> SqliteEventStore {
        SqliteEventStore::new(&EventStoreConfig::in_memory())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_roundtrip() {
        let store = memory_store().await;

        assert!(store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap());
        assert!(store.write("tx-2", &[op("accounts", 1, 2)]).await.unwrap());

        let cursors = vec![Cursor::empty(reference("accounts", 1))];
        let messages = store.read(&cursors, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].transaction_id, "tx-1");
        assert_eq!(messages[0].operations.len(), 1);
        assert_eq!(messages[1].transaction_id, "tx-2");
    }

    #[tokio::test]
    async fn test_duplicate_write_is_rejected_without_side_effects() {
        let store = memory_store().await;

        assert!(store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap());
        assert!(!store
            .write("tx-1", &[op("accounts", 1, 999)])
            .await
            .unwrap());

        let cursors = vec![Cursor::empty(reference("accounts", 1))];
        let messages = store.read(&cursors, None).await.unwrap();
        assert_eq!(messages.len(), 1);
        // The replay's payload must not have replaced the original.
        match &messages[0].operations[0].operation {
            TransformedOperation::Insert { object, .. } => {
                assert_eq!(object["id"], serde_json::json!(1));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_resumes_after_cursor() {
        let store = memory_store().await;
        for i in 1..=5 {
            store
                .write(&format!("tx-{i}"), &[op("accounts", 1, i)])
                .await
                .unwrap();
        }

        let cursors = vec![Cursor::new(
            reference("accounts", 1),
            Some("tx-3".to_string()),
        )];
        let messages = store.read(&cursors, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].transaction_id, "tx-4");
        assert_eq!(messages[1].transaction_id, "tx-5");
    }

    #[tokio::test]
    async fn test_read_filters_schema_and_skips_unmatched_transactions() {
        let store = memory_store().await;
        store
            .write("tx-1", &[op("accounts", 1, 1), op("orders", 1, 1)])
            .await
            .unwrap();
        store.write("tx-2", &[op("orders", 1, 2)]).await.unwrap();

        let cursors = vec![Cursor::empty(reference("accounts", 1))];
        let messages = store.read(&cursors, None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].operations.len(), 1);
        assert_eq!(
            messages[0].operations[0].source_public_schema.name,
            "accounts"
        );
    }

    #[tokio::test]
    async fn test_read_respects_limit() {
        let store = memory_store().await;
        for i in 0..10 {
            store
                .write(&format!("tx-{i:02}"), &[op("accounts", 1, i)])
                .await
                .unwrap();
        }

        let cursors = vec![Cursor::empty(reference("accounts", 1))];
        let messages = store.read(&cursors, Some(4)).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].transaction_id, "tx-03");
    }

    #[tokio::test]
    async fn test_tail() {
        let store = memory_store().await;
        store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap();
        store.write("tx-2", &[op("orders", 1, 1)]).await.unwrap();

        let cursors = store
            .tail(&[reference("accounts", 1), reference("untouched", 1)])
            .await
            .unwrap();
        assert_eq!(cursors[0].transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(cursors[1].transaction_id, None);
    }

    #[tokio::test]
    async fn test_idempotency_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = EventStoreConfig {
            sqlite_path: dir.path().join("events.db").to_string_lossy().to_string(),
            wal_mode: true,
        };

        {
            let store = SqliteEventStore::new(&config).await.unwrap();
            assert!(store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap());
            store.close().await.unwrap();
        }

        let store = SqliteEventStore::new(&config).await.unwrap();
        // Same id after restart: still a duplicate.
        assert!(!store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap());
        assert!(store.write("tx-2", &[op("accounts", 1, 2)]).await.unwrap());

        let cursors = vec![Cursor::empty(reference("accounts", 1))];
        let messages = store.read(&cursors, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_with_no_cursors_is_empty() {
        let store = memory_store().await;
        store.write("tx-1", &[op("accounts", 1, 1)]).await.unwrap();
        assert!(store.read(&[], None).await.unwrap().is_empty());
    }
}
