//! User repository
//!
//! Database operations for accounts.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by email (exact match)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist name, email, password hash, verification flag and avatar
    async fn update(&self, user: &User) -> Result<User>;

    /// Replace the stored password hash
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.require_sqlite()?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.require_mysql()?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(self.pool.require_sqlite()?, id).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(self.pool.require_mysql()?, id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_email_sqlite(self.pool.require_sqlite()?, email).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_email_mysql(self.pool.require_mysql()?, email).await
            }
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(self.pool.require_sqlite()?, user).await,
            DatabaseDriver::Mysql => update_user_mysql(self.pool.require_mysql()?, user).await,
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_password_sqlite(self.pool.require_sqlite()?, id, password_hash).await
            }
            DatabaseDriver::Mysql => {
                update_password_mysql(self.pool.require_mysql()?, id, password_hash).await
            }
        }
    }
}

const SELECT_USER: &str = r#"
    SELECT id, name, email, password_hash, is_email_valid, avatar_url, created_at, updated_at
    FROM users
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

/// Insert a user row. Shared with the OAuth repository, which creates users
/// inside its own transaction.
pub(crate) async fn insert_user_sqlite<'e, E>(executor: E, user: &User) -> Result<User>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, is_email_valid, avatar_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.is_email_valid)
    .bind(&user.avatar_url)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    insert_user_sqlite(pool, user).await
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_USER))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn get_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE email = ?", SELECT_USER))
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE users
        SET name = ?, email = ?, password_hash = ?, is_email_valid = ?, avatar_url = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.is_email_valid)
    .bind(&user.avatar_url)
    .bind(now)
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    Ok(User {
        updated_at: now,
        ..user.clone()
    })
}

/// Mark the user's email address as confirmed. Used by token redemption
/// inside its transaction.
pub(crate) async fn mark_email_valid_sqlite<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("UPDATE users SET is_email_valid = 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to mark email as verified")?;

    Ok(())
}

pub(crate) async fn update_password_sqlite<'e, E>(
    executor: E,
    id: i64,
    password_hash: &str,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to update password")?;

    Ok(())
}

pub(crate) fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_email_valid: row.try_get("is_email_valid")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

pub(crate) async fn insert_user_mysql<'e, E>(executor: E, user: &User) -> Result<User>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, is_email_valid, avatar_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.is_email_valid)
    .bind(&user.avatar_url)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    insert_user_mysql(pool, user).await
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_USER))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn get_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    // BINARY keeps the lookup case-sensitive under MySQL's default collation
    let row = sqlx::query(&format!("{} WHERE email = BINARY ?", SELECT_USER))
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE users
        SET name = ?, email = ?, password_hash = ?, is_email_valid = ?, avatar_url = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.is_email_valid)
    .bind(&user.avatar_url)
    .bind(now)
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    Ok(User {
        updated_at: now,
        ..user.clone()
    })
}

pub(crate) async fn mark_email_valid_mysql<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query("UPDATE users SET is_email_valid = TRUE, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to mark email as verified")?;

    Ok(())
}

pub(crate) async fn update_password_mysql<'e, E>(
    executor: E,
    id: i64,
    password_hash: &str,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to update password")?;

    Ok(())
}

pub(crate) fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_email_valid: row.try_get("is_email_valid")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::services::password::{hash_password, verify_password};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone());
        (pool, repo)
    }

    fn create_test_user(name: &str, email: &str) -> User {
        User::new(
            name.to_string(),
            email.to_string(),
            Some(hash_password("test_password").expect("Failed to hash password")),
        )
    }

    #[tokio::test]
    async fn test_create_user() {
        let (_pool, repo) = setup_test_repo().await;
        let user = create_test_user("alice", "alice@example.com");

        let created = repo.create(&user).await.expect("Failed to create user");

        assert!(created.id > 0);
        assert_eq!(created.name, "alice");
        assert_eq!(created.email, "alice@example.com");
        assert!(!created.is_email_valid);
    }

    #[tokio::test]
    async fn test_get_user_by_id() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo
            .create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        let found = repo
            .get_by_id(created.id)
            .await
            .expect("Failed to get user")
            .expect("User not found");

        assert_eq!(found.id, created.id);
        assert_eq!(found.name, "alice");
        assert!(repo.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_by_email_is_exact() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        assert!(repo
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .get_by_email("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oauth_user_has_no_password() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = User::new("bob".to_string(), "bob@example.com".to_string(), None);
        user.is_email_valid = true;

        let created = repo.create(&user).await.unwrap();
        let found = repo.get_by_id(created.id).await.unwrap().unwrap();

        assert!(found.password_hash.is_none());
        assert!(found.is_email_valid);
    }

    #[tokio::test]
    async fn test_update_user() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = repo
            .create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        user.name = "Alice Liddell".to_string();
        user.avatar_url = Some("https://example.com/a.png".to_string());
        repo.update(&user).await.expect("Failed to update user");

        let found = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Alice Liddell");
        assert_eq!(found.avatar_url.as_deref(), Some("https://example.com/a.png"));
    }

    #[tokio::test]
    async fn test_mark_email_valid() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo
            .create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        mark_email_valid_sqlite(repo.pool.require_sqlite().unwrap(), user.id)
            .await
            .unwrap();

        assert!(repo.get_by_id(user.id).await.unwrap().unwrap().is_email_valid);
    }

    #[tokio::test]
    async fn test_update_password() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo
            .create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        let new_hash = hash_password("another_password").unwrap();
        repo.update_password(user.id, &new_hash).await.unwrap();

        let stored = repo.get_by_id(user.id).await.unwrap().unwrap();
        let stored_hash = stored.password_hash.unwrap();
        assert!(verify_password("another_password", &stored_hash).unwrap());
        assert!(!verify_password("test_password", &stored_hash).unwrap());
    }

    #[tokio::test]
    async fn test_unique_email_constraint() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&create_test_user("alice", "alice@example.com"))
            .await
            .unwrap();

        let result = repo
            .create(&create_test_user("other", "alice@example.com"))
            .await;

        assert!(result.is_err());
    }
}
