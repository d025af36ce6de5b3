//! Database connection manager backed by an SQLCipher connection pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use haven_domain::{HavenError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::errors::conversions::looks_like_wrong_key;
use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type SqlCipherConnection = PooledConnection<SqliteConnectionManager>;

/// Database manager that wraps an r2d2 pool of keyed SQLCipher connections.
pub struct DbManager {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager").field("path", &self.path).finish_non_exhaustive()
    }
}

impl DbManager {
    /// Open (or create) the encrypted database at `db_path`.
    ///
    /// Fails with a storage error if the key does not open an existing file.
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        pool_size: u32,
        encryption_key: Option<&str>,
    ) -> Result<Self> {
        let key = encryption_key
            .map(std::borrow::ToOwned::to_owned)
            .ok_or_else(|| HavenError::Config("database encryption key not provided".into()))?;

        let path = db_path.as_ref().to_path_buf();
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.pragma_update(None, "key", &key)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\n\
                 PRAGMA wal_autocheckpoint=1000;\n\
                 PRAGMA synchronous=NORMAL;\n\
                 PRAGMA foreign_keys=ON;",
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| map_pool_error("failed to create pool", &e))?;

        // The key is only checked when a page is read.
        {
            let conn = pool.get().map_err(|e| map_pool_error("failed to get test connection", &e))?;
            conn.query_row("SELECT count(*) FROM sqlite_master", params![], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(map_sql_error)?;
        }

        info!(
            db_path = %path.display(),
            max_connections = pool.max_size(),
            "sqlcipher pool initialised"
        );

        Ok(Self { pool, path })
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<SqlCipherConnection> {
        self.pool.get().map_err(|e| map_pool_error("failed to acquire connection", &e))
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        create_schema(&conn)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the database is reachable and answering queries.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", params![], |row| row.get::<_, i32>(0)).map_err(map_sql_error)?;
        Ok(())
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, CAST(strftime('%s','now') AS INTEGER))",
        params![SCHEMA_VERSION],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> HavenError {
    HavenError::from(InfraError::from(err))
}

fn map_pool_error(context: &str, err: &r2d2::Error) -> HavenError {
    warn!(error = %err, "{context}");
    let message = err.to_string();
    if looks_like_wrong_key(&message) {
        HavenError::Storage("SQLCipher key rejected or database not encrypted".into())
    } else {
        HavenError::Storage(format!("{context}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const TEST_KEY: &str = "test_key_64_chars_long_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn migrations_create_schema_version() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path, 4, Some(TEST_KEY)).expect("manager created");
        manager.run_migrations().expect("migrations run");
        manager.run_migrations().expect("migrations are idempotent");

        let conn = manager.get_connection().expect("connection acquired");
        let version: i32 =
            conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn health_check_succeeds_for_valid_database() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path, 4, Some(TEST_KEY)).expect("manager created");
        manager.run_migrations().expect("migrations run");
        manager.health_check().expect("health check passed");
    }

    #[test]
    fn missing_encryption_key_is_rejected() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let result = DbManager::new(temp_dir.path().join("test.db"), 4, None);
        assert!(matches!(result, Err(HavenError::Config(_))));
    }

    #[test]
    fn wrong_key_cannot_open_existing_database() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");
        {
            let manager = DbManager::new(&db_path, 1, Some(TEST_KEY)).expect("manager created");
            manager.run_migrations().expect("migrations run");
        }

        let result = DbManager::new(&db_path, 1, Some("another_key"));
        assert!(matches!(result, Err(HavenError::Storage(_))));
    }
}
