//! OAuth account repository
//!
//! Links between local users and provider accounts.

use crate::config::DatabaseDriver;
use crate::db::repositories::user::{
    insert_user_mysql, insert_user_sqlite, row_to_user_mysql, row_to_user_sqlite,
};
use crate::db::DynDatabasePool;
use crate::models::{OAuthAccount, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait OAuthAccountRepository: Send + Sync {
    /// Find the local user linked to a provider account
    async fn find_user(&self, provider: &str, provider_account_id: &str) -> Result<Option<User>>;

    /// Link an existing user to a provider account
    async fn link(
        &self,
        user_id: i64,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<OAuthAccount>;

    /// Create a user and its provider link in one transaction
    async fn create_user_with_link(
        &self,
        user: &User,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<User>;
}

pub struct SqlxOAuthAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxOAuthAccountRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn OAuthAccountRepository> {
        Arc::new(Self::new(pool))
    }
}

const FIND_USER: &str = r#"
    SELECT u.id, u.name, u.email, u.password_hash, u.is_email_valid, u.avatar_url,
           u.created_at, u.updated_at
    FROM oauth_accounts o
    JOIN users u ON u.id = o.user_id
    WHERE o.provider = ? AND o.provider_account_id = ?
"#;
const INSERT_LINK: &str = r#"
    INSERT INTO oauth_accounts (user_id, provider, provider_account_id, created_at)
    VALUES (?, ?, ?, ?)
"#;

#[async_trait]
impl OAuthAccountRepository for SqlxOAuthAccountRepository {
    async fn find_user(&self, provider: &str, provider_account_id: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(FIND_USER)
                    .bind(provider)
                    .bind(provider_account_id)
                    .fetch_optional(self.pool.require_sqlite()?)
                    .await
                    .context("Failed to find OAuth user")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(FIND_USER)
                    .bind(provider)
                    .bind(provider_account_id)
                    .fetch_optional(self.pool.require_mysql()?)
                    .await
                    .context("Failed to find OAuth user")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn link(
        &self,
        user_id: i64,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<OAuthAccount> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_link_sqlite(
                    self.pool.require_sqlite()?,
                    user_id,
                    provider,
                    provider_account_id,
                    now,
                )
                .await?
            }
            DatabaseDriver::Mysql => {
                insert_link_mysql(
                    self.pool.require_mysql()?,
                    user_id,
                    provider,
                    provider_account_id,
                    now,
                )
                .await?
            }
        };

        Ok(OAuthAccount {
            id,
            user_id,
            provider: provider.to_string(),
            provider_account_id: provider_account_id.to_string(),
            created_at: now,
        })
    }

    async fn create_user_with_link(
        &self,
        user: &User,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_user_with_link_sqlite(
                    self.pool.require_sqlite()?,
                    user,
                    provider,
                    provider_account_id,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                create_user_with_link_mysql(
                    self.pool.require_mysql()?,
                    user,
                    provider,
                    provider_account_id,
                )
                .await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_link_sqlite<'e, E>(
    executor: E,
    user_id: i64,
    provider: &str,
    provider_account_id: &str,
    now: DateTime<Utc>,
) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(INSERT_LINK)
        .bind(user_id)
        .bind(provider)
        .bind(provider_account_id)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to link OAuth account")?;

    Ok(result.last_insert_rowid())
}

async fn create_user_with_link_sqlite(
    pool: &SqlitePool,
    user: &User,
    provider: &str,
    provider_account_id: &str,
) -> Result<User> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let created = insert_user_sqlite(&mut *tx, user).await?;
    insert_link_sqlite(&mut *tx, created.id, provider, provider_account_id, Utc::now()).await?;

    tx.commit().await.context("Failed to commit OAuth signup")?;
    Ok(created)
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_link_mysql<'e, E>(
    executor: E,
    user_id: i64,
    provider: &str,
    provider_account_id: &str,
    now: DateTime<Utc>,
) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    let result = sqlx::query(INSERT_LINK)
        .bind(user_id)
        .bind(provider)
        .bind(provider_account_id)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to link OAuth account")?;

    Ok(result.last_insert_id() as i64)
}

async fn create_user_with_link_mysql(
    pool: &MySqlPool,
    user: &User,
    provider: &str,
    provider_account_id: &str,
) -> Result<User> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let created = insert_user_mysql(&mut *tx, user).await?;
    insert_link_mysql(&mut *tx, created.id, provider, provider_account_id, Utc::now()).await?;

    tx.commit().await.context("Failed to commit OAuth signup")?;
    Ok(created)
}
