//! Session repository
//!
//! Database operations for login sessions. Sessions are never deleted by
//! logout; they are invalidated so that outstanding refresh tokens stop
//! working while the row stays available for auditing.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ClientMeta, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new valid session for a user
    async fn create(&self, user_id: i64, meta: &ClientMeta) -> Result<Session>;

    /// Get session by ID; a missing ID is `Ok(None)`
    async fn get_by_id(&self, id: i64) -> Result<Option<Session>>;

    /// Mark a session invalid
    async fn invalidate(&self, id: i64) -> Result<()>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, user_id: i64, meta: &ClientMeta) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_session_sqlite(self.pool.require_sqlite()?, user_id, meta).await
            }
            DatabaseDriver::Mysql => {
                create_session_mysql(self.pool.require_mysql()?, user_id, meta).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_session_by_id_sqlite(self.pool.require_sqlite()?, id).await
            }
            DatabaseDriver::Mysql => get_session_by_id_mysql(self.pool.require_mysql()?, id).await,
        }
    }

    async fn invalidate(&self, id: i64) -> Result<()> {
        let query = "UPDATE sessions SET valid = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(false)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.require_sqlite()?)
                    .await
                    .context("Failed to invalidate session")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(false)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.require_mysql()?)
                    .await
                    .context("Failed to invalidate session")?;
            }
        }

        Ok(())
    }
}

const INVALIDATE_USER_SESSIONS: &str =
    "UPDATE sessions SET valid = ?, updated_at = ? WHERE user_id = ? AND valid = ?";

const SELECT_SESSION: &str =
    "SELECT id, user_id, valid, ip, user_agent, created_at, updated_at FROM sessions WHERE id = ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    meta: &ClientMeta,
) -> Result<Session> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO sessions (user_id, valid, ip, user_agent, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(true)
    .bind(&meta.ip)
    .bind(&meta.user_agent)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(Session {
        id: result.last_insert_rowid(),
        user_id,
        valid: true,
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Invalidate every valid session of a user, returning how many changed.
/// Runs on any executor so a password reset can revoke inside its own
/// transaction.
pub(crate) async fn invalidate_user_sessions_sqlite<'e, E>(executor: E, user_id: i64) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(INVALIDATE_USER_SESSIONS)
        .bind(false)
        .bind(Utc::now())
        .bind(user_id)
        .bind(true)
        .execute(executor)
        .await
        .context("Failed to invalidate user sessions")?;

    Ok(result.rows_affected())
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(Session {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            valid: row.try_get("valid")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })),
        None => Ok(None),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(
    pool: &MySqlPool,
    user_id: i64,
    meta: &ClientMeta,
) -> Result<Session> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO sessions (user_id, valid, ip, user_agent, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(true)
    .bind(&meta.ip)
    .bind(&meta.user_agent)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(Session {
        id: result.last_insert_id() as i64,
        user_id,
        valid: true,
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub(crate) async fn invalidate_user_sessions_mysql<'e, E>(executor: E, user_id: i64) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    let result = sqlx::query(INVALIDATE_USER_SESSIONS)
        .bind(false)
        .bind(Utc::now())
        .bind(user_id)
        .bind(true)
        .execute(executor)
        .await
        .context("Failed to invalidate user sessions")?;

    Ok(result.rows_affected())
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(Session {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            valid: row.try_get("valid")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })),
        None => Ok(None),
    }
}
