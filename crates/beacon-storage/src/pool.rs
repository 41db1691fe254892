//! Database connection pool management
//!
//! Provides a pair of SQLx SqlitePools over one database file:
//! - A writer pool holding exactly one connection, so writes are serialized
//! - A reader pool with several connections for concurrent snapshot reads
//! - Automatic directory creation and schema migration
//! - In-memory mode for testing

use std::path::Path;
use std::time::Duration;

use beacon_core::config::StorageConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::StorageError;

/// Writer and reader pools for the Beacon telemetry database
///
/// The pools are configured with:
/// - WAL journal mode so readers never block the writer
/// - 1 writer connection
/// - `max_readers` reader connections for file-based databases
/// - A single shared connection for in-memory databases (required for data persistence)
/// - A configurable busy timeout to absorb contention with other processes
#[derive(Debug, Clone)]
pub struct StoragePool {
    writer: SqlitePool,
    reader: SqlitePool,
}

impl StoragePool {
    /// Opens the database file at `db_path`
    ///
    /// This will:
    /// 1. Create parent directories if they don't exist
    /// 2. Create the database file if it doesn't exist
    /// 3. Enable WAL journal mode
    /// 4. Run schema migrations on the writer connection
    /// 5. Open the reader pool
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the directory, the connections
    /// or the migration fail.
    pub async fn open(db_path: &Path, config: &StorageConfig) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!(
                    "Failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(config.max_readers.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!(
                    "Failed to open reader pool at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        tracing::info!(
            path = %db_path.display(),
            readers = config.max_readers,
            "Storage pool initialized"
        );

        Ok(Self { writer, reader })
    }

    /// Creates an in-memory database for testing
    ///
    /// Reader and writer share one connection since SQLite in-memory
    /// databases are per-connection.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the connection or the
    /// migration fail.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!("Failed to create in-memory database: {}", e))
            })?;

        sqlx::raw_sql("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!("Failed to enable foreign keys: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory storage pool initialized");

        Ok(Self {
            writer: pool.clone(),
            reader: pool,
        })
    }

    /// Pool used for every write; holds a single connection
    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    /// Pool used for reads
    pub fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    /// Closes both pools, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }

    /// Runs the initial schema migration
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
        let migration_sql = include_str!("migrations/0001_initial.sql");
        sqlx::raw_sql(migration_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!("Failed to run initial migration: {}", e))
            })?;

        tracing::debug!("Storage migrations completed");
        Ok(())
    }
}
