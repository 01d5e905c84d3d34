//! Short link repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ListParams, ShortLink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Short link repository trait
#[async_trait]
pub trait ShortLinkRepository: Send + Sync {
    /// Create a new short link
    async fn create(&self, user_id: i64, url: &str, short_code: &str) -> Result<ShortLink>;

    /// Get a link by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<ShortLink>>;

    /// Get a link by its public code
    async fn get_by_code(&self, short_code: &str) -> Result<Option<ShortLink>>;

    /// Check whether a code is already taken
    async fn exists_by_code(&self, short_code: &str) -> Result<bool>;

    /// List a user's links, newest first, with the total count
    async fn list_by_user(&self, user_id: i64, params: &ListParams)
        -> Result<(Vec<ShortLink>, i64)>;

    /// Update URL and code
    async fn update(&self, link: &ShortLink) -> Result<ShortLink>;

    /// Delete a link owned by `user_id`. Returns false if nothing matched.
    async fn delete(&self, id: i64, user_id: i64) -> Result<bool>;
}

/// SQLx-based short link repository implementation
pub struct SqlxShortLinkRepository {
    pool: DynDatabasePool,
}

impl SqlxShortLinkRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ShortLinkRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_LINK: &str =
    "SELECT id, user_id, url, short_code, created_at, updated_at FROM short_links";

#[async_trait]
impl ShortLinkRepository for SqlxShortLinkRepository {
    async fn create(&self, user_id: i64, url: &str, short_code: &str) -> Result<ShortLink> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_link_sqlite(self.pool.require_sqlite()?, user_id, url, short_code).await
            }
            DatabaseDriver::Mysql => {
                create_link_mysql(self.pool.require_mysql()?, user_id, url, short_code).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ShortLink>> {
        let sql = format!("{} WHERE id = ?", SELECT_LINK);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.require_sqlite()?)
                    .await
                    .context("Failed to get short link by ID")?;
                row.as_ref().map(row_to_link_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.require_mysql()?)
                    .await
                    .context("Failed to get short link by ID")?;
                row.as_ref().map(row_to_link_mysql).transpose()
            }
        }
    }

    async fn get_by_code(&self, short_code: &str) -> Result<Option<ShortLink>> {
        let sql = format!("{} WHERE short_code = ?", SELECT_LINK);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(short_code)
                    .fetch_optional(self.pool.require_sqlite()?)
                    .await
                    .context("Failed to get short link by code")?;
                row.as_ref().map(row_to_link_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(short_code)
                    .fetch_optional(self.pool.require_mysql()?)
                    .await
                    .context("Failed to get short link by code")?;
                row.as_ref().map(row_to_link_mysql).transpose()
            }
        }
    }

    async fn exists_by_code(&self, short_code: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) AS count FROM short_links WHERE short_code = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(short_code)
                .fetch_one(self.pool.require_sqlite()?)
                .await
                .context("Failed to check short code")?
                .try_get("count")?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(short_code)
                .fetch_one(self.pool.require_mysql()?)
                .await
                .context("Failed to check short code")?
                .try_get("count")?,
        };

        Ok(count > 0)
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<(Vec<ShortLink>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_links_sqlite(self.pool.require_sqlite()?, user_id, params).await
            }
            DatabaseDriver::Mysql => {
                list_links_mysql(self.pool.require_mysql()?, user_id, params).await
            }
        }
    }

    async fn update(&self, link: &ShortLink) -> Result<ShortLink> {
        let now = Utc::now();
        let sql = "UPDATE short_links SET url = ?, short_code = ?, updated_at = ? WHERE id = ?";

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(&link.url)
                    .bind(&link.short_code)
                    .bind(now)
                    .bind(link.id)
                    .execute(self.pool.require_sqlite()?)
                    .await
                    .context("Failed to update short link")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(&link.url)
                    .bind(&link.short_code)
                    .bind(now)
                    .bind(link.id)
                    .execute(self.pool.require_mysql()?)
                    .await
                    .context("Failed to update short link")?;
            }
        }

        Ok(ShortLink {
            updated_at: now,
            ..link.clone()
        })
    }

    async fn delete(&self, id: i64, user_id: i64) -> Result<bool> {
        let sql = "DELETE FROM short_links WHERE id = ? AND user_id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .bind(user_id)
                .execute(self.pool.require_sqlite()?)
                .await
                .context("Failed to delete short link")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .bind(user_id)
                .execute(self.pool.require_mysql()?)
                .await
                .context("Failed to delete short link")?
                .rows_affected(),
        };

        Ok(affected > 0)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_link_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    url: &str,
    short_code: &str,
) -> Result<ShortLink> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO short_links (user_id, url, short_code, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(url)
    .bind(short_code)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create short link")?;

    Ok(ShortLink {
        id: result.last_insert_rowid(),
        user_id,
        url: url.to_string(),
        short_code: short_code.to_string(),
        created_at: now,
        updated_at: now,
    })
}

async fn list_links_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    params: &ListParams,
) -> Result<(Vec<ShortLink>, i64)> {
    let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM short_links WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("Failed to count short links")?
        .try_get("count")?;

    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        SELECT_LINK
    ))
    .bind(user_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(pool)
    .await
    .context("Failed to list short links")?;

    let links = rows
        .iter()
        .map(row_to_link_sqlite)
        .collect::<Result<Vec<_>>>()?;

    Ok((links, total))
}

fn row_to_link_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<ShortLink> {
    Ok(ShortLink {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("url")?,
        short_code: row.try_get("short_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_link_mysql(
    pool: &MySqlPool,
    user_id: i64,
    url: &str,
    short_code: &str,
) -> Result<ShortLink> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO short_links (user_id, url, short_code, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(url)
    .bind(short_code)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create short link")?;

    Ok(ShortLink {
        id: result.last_insert_id() as i64,
        user_id,
        url: url.to_string(),
        short_code: short_code.to_string(),
        created_at: now,
        updated_at: now,
    })
}

async fn list_links_mysql(
    pool: &MySqlPool,
    user_id: i64,
    params: &ListParams,
) -> Result<(Vec<ShortLink>, i64)> {
    let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM short_links WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("Failed to count short links")?
        .try_get("count")?;

    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        SELECT_LINK
    ))
    .bind(user_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(pool)
    .await
    .context("Failed to list short links")?;

    let links = rows
        .iter()
        .map(row_to_link_mysql)
        .collect::<Result<Vec<_>>>()?;

    Ok((links, total))
}

fn row_to_link_mysql(row: &sqlx::mysql::MySqlRow) -> Result<ShortLink> {
    Ok(ShortLink {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("url")?,
        short_code: row.try_get("short_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
