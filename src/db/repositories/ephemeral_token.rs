//! Single-use token repository
//!
//! Storage for email verification codes and password reset digests. The
//! repository stores whatever value it is given; hashing is the caller's
//! concern.

use crate::config::DatabaseDriver;
use crate::db::repositories::session::{
    invalidate_user_sessions_mysql, invalidate_user_sessions_sqlite,
};
use crate::db::repositories::user::{
    mark_email_valid_mysql, mark_email_valid_sqlite, update_password_mysql,
    update_password_sqlite,
};
use crate::db::DynDatabasePool;
use crate::models::{EphemeralToken, TokenPurpose};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// What redeeming a token does to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption<'a> {
    /// Mark the email address confirmed
    VerifyEmail,
    /// Store a new password hash and invalidate every session
    ResetPassword { password_hash: &'a str },
}

impl Redemption<'_> {
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            Redemption::VerifyEmail => TokenPurpose::VerifyEmail,
            Redemption::ResetPassword { .. } => TokenPurpose::PasswordReset,
        }
    }
}

/// Single-use token repository trait
#[async_trait]
pub trait EphemeralTokenRepository: Send + Sync {
    /// Atomically purge expired tokens of `purpose`, drop the user's existing
    /// tokens of `purpose`, and insert the new one.
    async fn replace(
        &self,
        user_id: i64,
        purpose: TokenPurpose,
        token_value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<EphemeralToken>;

    /// Find an unexpired token by stored value. When `email` is given the
    /// owning user's email must match it exactly.
    async fn find_live(
        &self,
        purpose: TokenPurpose,
        token_value: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<EphemeralToken>>;

    /// In one transaction: delete `token`, apply `redemption` to its user
    /// and purge the user's other tokens of the same purpose.
    ///
    /// Returns false, changing nothing, when another caller consumed the
    /// token first. Any error rolls the whole redemption back.
    async fn redeem(&self, token: &EphemeralToken, redemption: Redemption<'_>) -> Result<bool>;
}

/// SQLx-based single-use token repository
pub struct SqlxEphemeralTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxEphemeralTokenRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EphemeralTokenRepository> {
        Arc::new(Self::new(pool))
    }
}

const DELETE_EXPIRED: &str = "DELETE FROM ephemeral_tokens WHERE purpose = ? AND expires_at <= ?";
const DELETE_FOR_USER: &str = "DELETE FROM ephemeral_tokens WHERE user_id = ? AND purpose = ?";
const DELETE_TOKEN: &str = "DELETE FROM ephemeral_tokens WHERE id = ?";
const INSERT_TOKEN: &str = r#"
    INSERT INTO ephemeral_tokens (user_id, purpose, token_value, expires_at, created_at)
    VALUES (?, ?, ?, ?, ?)
"#;
const SELECT_LIVE: &str = r#"
    SELECT t.id, t.user_id, t.purpose, t.token_value, t.expires_at, t.created_at
    FROM ephemeral_tokens t
    JOIN users u ON u.id = t.user_id
    WHERE t.purpose = ? AND t.token_value = ? AND t.expires_at > ?
"#;

#[async_trait]
impl EphemeralTokenRepository for SqlxEphemeralTokenRepository {
    async fn replace(
        &self,
        user_id: i64,
        purpose: TokenPurpose,
        token_value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<EphemeralToken> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_token_sqlite(
                    self.pool.require_sqlite()?,
                    user_id,
                    purpose,
                    token_value,
                    expires_at,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                replace_token_mysql(
                    self.pool.require_mysql()?,
                    user_id,
                    purpose,
                    token_value,
                    expires_at,
                )
                .await
            }
        }
    }

    async fn find_live(
        &self,
        purpose: TokenPurpose,
        token_value: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<EphemeralToken>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_live_sqlite(self.pool.require_sqlite()?, purpose, token_value, email, now)
                    .await
            }
            DatabaseDriver::Mysql => {
                find_live_mysql(self.pool.require_mysql()?, purpose, token_value, email, now).await
            }
        }
    }

    async fn redeem(&self, token: &EphemeralToken, redemption: Redemption<'_>) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                redeem_token_sqlite(self.pool.require_sqlite()?, token, redemption).await
            }
            DatabaseDriver::Mysql => {
                redeem_token_mysql(self.pool.require_mysql()?, token, redemption).await
            }
        }
    }
}

fn live_query(email: Option<&str>) -> String {
    match email {
        Some(_) => format!("{} AND u.email = ?", SELECT_LIVE),
        None => SELECT_LIVE.to_string(),
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn replace_token_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    purpose: TokenPurpose,
    token_value: &str,
    expires_at: DateTime<Utc>,
) -> Result<EphemeralToken> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(DELETE_EXPIRED)
        .bind(purpose.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to purge expired tokens")?;

    sqlx::query(DELETE_FOR_USER)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to delete superseded tokens")?;

    let result = sqlx::query(INSERT_TOKEN)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(token_value)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert token")?;

    tx.commit().await.context("Failed to commit token issuance")?;

    Ok(EphemeralToken {
        id: result.last_insert_rowid(),
        user_id,
        purpose,
        token_value: token_value.to_string(),
        expires_at,
        created_at: now,
    })
}

async fn find_live_sqlite(
    pool: &SqlitePool,
    purpose: TokenPurpose,
    token_value: &str,
    email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<EphemeralToken>> {
    let sql = live_query(email);
    let mut query = sqlx::query(&sql)
        .bind(purpose.as_str())
        .bind(token_value)
        .bind(now);
    if let Some(email) = email {
        query = query.bind(email);
    }

    let row = query
        .fetch_optional(pool)
        .await
        .context("Failed to look up token")?;

    row.as_ref().map(row_to_token_sqlite).transpose()
}

async fn redeem_token_sqlite(
    pool: &SqlitePool,
    token: &EphemeralToken,
    redemption: Redemption<'_>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let consumed = sqlx::query(DELETE_TOKEN)
        .bind(token.id)
        .execute(&mut *tx)
        .await
        .context("Failed to consume token")?
        .rows_affected();
    if consumed != 1 {
        return Ok(false);
    }

    match redemption {
        Redemption::VerifyEmail => mark_email_valid_sqlite(&mut *tx, token.user_id).await?,
        Redemption::ResetPassword { password_hash } => {
            update_password_sqlite(&mut *tx, token.user_id, password_hash).await?;
            invalidate_user_sessions_sqlite(&mut *tx, token.user_id).await?;
        }
    }

    sqlx::query(DELETE_FOR_USER)
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to purge remaining tokens")?;

    tx.commit().await.context("Failed to commit token redemption")?;

    Ok(true)
}

fn row_to_token_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<EphemeralToken> {
    let purpose: String = row.try_get("purpose")?;
    Ok(EphemeralToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        purpose: TokenPurpose::from_str(&purpose)?,
        token_value: row.try_get("token_value")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn replace_token_mysql(
    pool: &MySqlPool,
    user_id: i64,
    purpose: TokenPurpose,
    token_value: &str,
    expires_at: DateTime<Utc>,
) -> Result<EphemeralToken> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(DELETE_EXPIRED)
        .bind(purpose.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to purge expired tokens")?;

    sqlx::query(DELETE_FOR_USER)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to delete superseded tokens")?;

    let result = sqlx::query(INSERT_TOKEN)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(token_value)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert token")?;

    tx.commit().await.context("Failed to commit token issuance")?;

    Ok(EphemeralToken {
        id: result.last_insert_id() as i64,
        user_id,
        purpose,
        token_value: token_value.to_string(),
        expires_at,
        created_at: now,
    })
}

async fn find_live_mysql(
    pool: &MySqlPool,
    purpose: TokenPurpose,
    token_value: &str,
    email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<EphemeralToken>> {
    let sql = live_query(email);
    let mut query = sqlx::query(&sql)
        .bind(purpose.as_str())
        .bind(token_value)
        .bind(now);
    if let Some(email) = email {
        query = query.bind(email);
    }

    let row = query
        .fetch_optional(pool)
        .await
        .context("Failed to look up token")?;

    row.as_ref().map(row_to_token_mysql).transpose()
}

async fn redeem_token_mysql(
    pool: &MySqlPool,
    token: &EphemeralToken,
    redemption: Redemption<'_>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let consumed = sqlx::query(DELETE_TOKEN)
        .bind(token.id)
        .execute(&mut *tx)
        .await
        .context("Failed to consume token")?
        .rows_affected();
    if consumed != 1 {
        return Ok(false);
    }

    match redemption {
        Redemption::VerifyEmail => mark_email_valid_mysql(&mut *tx, token.user_id).await?,
        Redemption::ResetPassword { password_hash } => {
            update_password_mysql(&mut *tx, token.user_id, password_hash).await?;
            invalidate_user_sessions_mysql(&mut *tx, token.user_id).await?;
        }
    }

    sqlx::query(DELETE_FOR_USER)
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to purge remaining tokens")?;

    tx.commit().await.context("Failed to commit token redemption")?;

    Ok(true)
}

fn row_to_token_mysql(row: &sqlx::mysql::MySqlRow) -> Result<EphemeralToken> {
    let purpose: String = row.try_get("purpose")?;
    Ok(EphemeralToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        purpose: TokenPurpose::from_str(&purpose)?,
        token_value: row.try_get("token_value")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
