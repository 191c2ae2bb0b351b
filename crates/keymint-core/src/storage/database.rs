//! SQLite connection pool for the key store
//!
//! A [`Database`] owns the pool and knows how to bring the schema up to date.
//! Paths are handed to SQLite as filenames, never spliced into a URL.

use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const MEMORY_PATH: &str = ":memory:";

/// Where and how to open the key store
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    pub max_connections: u32,
    /// Bring the schema to the latest version on open
    pub auto_migrate: bool,
    pub journal_mode: SqliteJournalMode,
    pub synchronous: SqliteSynchronous,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
        }
    }
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// A private in-memory store; one connection so every query sees the same data
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Leave the schema alone on open; call [`Database::migrate`] explicitly
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };
        Ok(options
            .journal_mode(self.journal_mode)
            .synchronous(self.synchronous))
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })
            }
            _ => Ok(()),
        }
    }
}

/// `<data dir>/keymint/keymint.db`, or `keymint.db` in the working directory
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("keymint").join("keymint.db"))
        .unwrap_or_else(|| PathBuf::from("keymint.db"))
}

/// Handle to the key store's connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Open the store described by `config`, migrating it if asked to
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        config.ensure_parent_dir()?;

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open key store: {}", config.path.display()))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }

        tracing::debug!(path = %db.config.path.display(), "Key store opened");
        Ok(db)
    }

    pub async fn open_default() -> Result<Self> {
        Self::new(DatabaseConfig::default()).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate key store schema")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read key store schema version")
    }

    /// Round-trip a trivial query through the pool
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Key store health check failed")?;
        Ok(())
    }

    /// Close every pooled connection; later queries fail with `PoolClosed`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::in_memory()
            .await
            .expect("Failed to create in-memory database");

        db.health_check().await.expect("Health check failed");

        let status = db
            .migration_status()
            .await
            .expect("Failed to get migration status");
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_database_config_builder() {
        let config = DatabaseConfig::with_path("/tmp/keys.db")
            .max_connections(10)
            .no_migrate();

        assert_eq!(config.path, PathBuf::from("/tmp/keys.db"));
        assert_eq!(config.max_connections, 10);
        assert!(!config.auto_migrate);
    }

    #[tokio::test]
    async fn test_no_migrate_leaves_schema_empty() {
        let db = Database::new(DatabaseConfig::in_memory().no_migrate())
            .await
            .expect("Failed to create database");

        let status = db.migration_status().await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        db.migrate().await.unwrap();
        assert!(!db.migration_status().await.unwrap().needs_migration);
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keys.db");

        let db = Database::open(&path).await.expect("Failed to open database");
        db.health_check().await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
        db.close().await;
    }

    #[tokio::test]
    async fn test_path_with_url_metacharacters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd?name#1%20.db");

        let db = Database::open(&path).await.expect("Failed to open database");
        db.health_check().await.unwrap();
        db.close().await;

        assert!(path.exists());
        assert!(!dir.path().join("odd").exists());
    }

    #[tokio::test]
    async fn test_signature_unique_index_enforced() {
        let db = Database::in_memory().await.expect("Failed to create database");

        let insert = "INSERT INTO signing_keys (signature, scope, active, created_at, last_updated) \
                      VALUES (?, ?, 1, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)";

        sqlx::query(insert)
            .bind("dup")
            .bind("reset")
            .execute(db.pool())
            .await
            .expect("First insert should succeed");

        let err = sqlx::query(insert)
            .bind("dup")
            .bind("api")
            .execute(db.pool())
            .await
            .expect_err("Duplicate signature must be rejected");

        match err {
            sqlx::Error::Database(db_err) => assert!(db_err.is_unique_violation()),
            other => panic!("Unexpected error: {other:?}"),
        }
    }
}
