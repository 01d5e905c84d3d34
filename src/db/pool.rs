//! Connection pools
//!
//! Repositories hold a `DynDatabasePool` and branch on `driver()` to reach
//! the typed sqlx pool they need.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions},
    sqlite::{SqlitePool, SqlitePoolOptions},
};
use std::path::Path;
use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseDriver};

/// A SQLite or MySQL pool behind one interface
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows
    async fn execute(&self, query: &str) -> Result<u64>;

    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn as_sqlite(&self) -> Option<&SqlitePool>;

    fn as_mysql(&self) -> Option<&MySqlPool>;

    fn require_sqlite(&self) -> Result<&SqlitePool> {
        self.as_sqlite()
            .context("Database driver mismatch: expected a SQLite pool")
    }

    fn require_mysql(&self) -> Result<&MySqlPool> {
        self.as_mysql()
            .context("Database driver mismatch: expected a MySQL pool")
    }
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// True when `err` was caused by a UNIQUE constraint violation
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

pub struct SqliteDatabase {
    pool: SqlitePool,
}

fn is_in_memory(url: &str) -> bool {
    url == ":memory:" || url.starts_with("sqlite::memory:")
}

/// Normalize a configured SQLite location into a connection URL.
/// Plain paths and bare `sqlite:` URLs get `mode=rwc` so the file is created.
fn sqlite_url(url: &str) -> String {
    if url == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    match url.strip_prefix("sqlite:") {
        Some(_) if url.contains('?') => url.to_string(),
        Some(_) => format!("{}?mode=rwc", url),
        None => format!("sqlite:{}?mode=rwc", url),
    }
}

impl SqliteDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let in_memory = is_in_memory(url);

        if !in_memory {
            let path = Path::new(url.trim_start_matches("sqlite:"));
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create database directory: {:?}", dir))?;
            }
        }

        // Every in-memory connection is its own database, so pin it to one
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(20)
        };

        let pool = options
            .connect(&sqlite_url(url))
            .await
            .with_context(|| format!("Failed to connect to SQLite database: {}", url))?;

        // Sessions, tokens and links cascade from users
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .context("Failed to enable foreign keys")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Sqlite
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        None
    }
}

pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(30)
            .connect(&url)
            .await
            .context("Failed to connect to MySQL database")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Mysql
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        None
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        Some(&self.pool)
    }
}

/// Connect to the configured database.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    let pool: DynDatabasePool = match config.driver {
        DatabaseDriver::Sqlite => Arc::new(SqliteDatabase::new(&config.url).await?),
        DatabaseDriver::Mysql => Arc::new(MysqlDatabase::new(&config.url).await?),
    };

    tracing::debug!(driver = ?config.driver, "Database pool ready");
    Ok(pool)
}

/// In-memory SQLite pool for tests
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    create_pool(&DatabaseConfig {
        driver: DatabaseDriver::Sqlite,
        url: ":memory:".to_string(),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_config(url: String) -> DatabaseConfig {
        DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url,
        }
    }

    #[test]
    fn test_sqlite_url() {
        assert_eq!(sqlite_url(":memory:"), "sqlite::memory:");
        assert_eq!(sqlite_url("data/app.db"), "sqlite:data/app.db?mode=rwc");
        assert_eq!(sqlite_url("sqlite:data/app.db"), "sqlite:data/app.db?mode=rwc");
        assert_eq!(sqlite_url("sqlite:data/app.db?mode=ro"), "sqlite:data/app.db?mode=ro");
    }

    #[tokio::test]
    async fn test_test_pool_is_sqlite() {
        let pool = create_test_pool().await.expect("Failed to create pool");

        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(pool.require_sqlite().is_ok());
        assert!(pool.require_mysql().is_err());
    }

    #[tokio::test]
    async fn test_file_pool_creates_nested_directories() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("dir").join("links.db");

        let pool = create_pool(&sqlite_config(db_path.to_string_lossy().to_string()))
            .await
            .expect("Failed to create pool");
        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_in_memory_pool_keeps_schema_across_queries() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .expect("Failed to create table");

        // A second pooled connection would see an empty database
        for _ in 0..5 {
            assert_eq!(pool.execute("INSERT INTO t DEFAULT VALUES").await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_unique_violation_is_detected_through_context() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        pool.execute("CREATE TABLE t (code TEXT UNIQUE)").await.unwrap();
        pool.execute("INSERT INTO t (code) VALUES ('abc')").await.unwrap();

        let duplicate = pool
            .execute("INSERT INTO t (code) VALUES ('abc')")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&duplicate));

        let other = pool.execute("INSERT INTO missing DEFAULT VALUES").await.unwrap_err();
        assert!(!is_unique_violation(&other));
    }

    #[tokio::test]
    async fn test_closed_pool_fails() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        pool.close().await;
        assert!(pool.execute("SELECT 1").await.is_err());
    }
}
