//! SQLCipher-backed implementation of the key/value store port.
//!
//! Conditional batches run inside `BEGIN IMMEDIATE`, so preconditions are
//! checked under the write lock and hold across processes sharing the file.

use std::sync::Arc;

use async_trait::async_trait;
use haven_core::store::{KeyValueStore, KvOp, Precondition, Txn};
use haven_domain::{HavenError, Result as DomainResult};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tokio::task;

use super::manager::{map_sql_error, DbManager};

const GET_SQL: &str = "SELECT value FROM kv WHERE key = ?1";
const UPSERT_SQL: &str = "INSERT INTO kv (key, value, updated_at) \
     VALUES (?1, ?2, CAST(strftime('%s','now') AS INTEGER)) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";
const DELETE_SQL: &str = "DELETE FROM kv WHERE key = ?1";
const SCAN_SQL: &str =
    "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key";
const DELETE_PREFIX_SQL: &str = "DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1";

/// [`KeyValueStore`] over a single `kv` table in the encrypted database.
pub struct SqliteKeyValueStore {
    db: Arc<DbManager>,
}

impl SqliteKeyValueStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DbManager) -> DomainResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || f(&db)).await.map_err(map_join_error)?
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> DomainResult<Option<String>> {
        let key = key.to_owned();
        self.blocking(move |db| {
            let conn = db.get_connection()?;
            conn.query_row(GET_SQL, params![key], |row| row.get(0))
                .optional()
                .map_err(map_sql_error)
        })
        .await
    }

    async fn put(&self, key: &str, value: String) -> DomainResult<()> {
        let key = key.to_owned();
        self.blocking(move |db| {
            let conn = db.get_connection()?;
            conn.execute(UPSERT_SQL, params![key, value]).map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> DomainResult<bool> {
        let key = key.to_owned();
        self.blocking(move |db| {
            let conn = db.get_connection()?;
            Ok(conn.execute(DELETE_SQL, params![key]).map_err(map_sql_error)? > 0)
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> DomainResult<Vec<(String, String)>> {
        let prefix = prefix.to_owned();
        self.blocking(move |db| {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(SCAN_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(map_sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sql_error)
        })
        .await
    }

    async fn commit(&self, txn: Txn) -> DomainResult<bool> {
        self.blocking(move |db| {
            let mut conn = db.get_connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;

            for condition in &txn.conditions {
                let (key, expected) = match condition {
                    Precondition::Absent(key) => (key, None),
                    Precondition::Equals(key, value) => (key, Some(value)),
                };
                let current: Option<String> = tx
                    .query_row(GET_SQL, params![key], |row| row.get(0))
                    .optional()
                    .map_err(map_sql_error)?;
                if current.as_ref() != expected {
                    // Dropping the transaction rolls it back.
                    return Ok(false);
                }
            }

            for op in &txn.ops {
                let applied = match op {
                    KvOp::Put(key, value) => tx.execute(UPSERT_SQL, params![key, value]),
                    KvOp::Delete(key) => tx.execute(DELETE_SQL, params![key]),
                };
                applied.map_err(map_sql_error)?;
            }
            tx.commit().map_err(map_sql_error)?;
            Ok(true)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> DomainResult<usize> {
        let prefix = prefix.to_owned();
        self.blocking(move |db| {
            let conn = db.get_connection()?;
            conn.execute(DELETE_PREFIX_SQL, params![prefix]).map_err(map_sql_error)
        })
        .await
    }
}

fn map_join_error(err: task::JoinError) -> HavenError {
    if err.is_cancelled() {
        HavenError::Internal("blocking task cancelled".into())
    } else {
        HavenError::Internal(format!("blocking task failed: {err}"))
    }
}
