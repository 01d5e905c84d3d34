//! User service
//!
//! Account operations:
//! - Registration with a unique email
//! - Password login (sessions are handled by `services::auth`)
//! - Profile and password changes
//! - Sign-in through an external identity provider

use crate::db::is_unique_violation;
use crate::db::repositories::{OAuthAccountRepository, UserRepository};
use crate::models::{OAuthIdentity, UpdateProfileInput, User};
use crate::services::password::{hash_password, verify_dummy_password, verify_password};
use crate::services::validation::{self, ValidationError};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const AVATAR_URL_MAX_LEN: usize = 1024;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Authentication failed (invalid credentials)
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    /// User already exists
    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    UserNotFound,

    /// Current password did not match
    #[error("Current password is incorrect")]
    InvalidPassword,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// User service for managing accounts
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    oauth_repo: Arc<dyn OAuthAccountRepository>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        oauth_repo: Arc<dyn OAuthAccountRepository>,
    ) -> Self {
        Self {
            user_repo,
            oauth_repo,
        }
    }

    /// Register a new, unverified user.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for malformed name, email or password
    /// - `UserExists` if the email is already registered
    /// - `InternalError` for database errors
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let valid = validation::registration(&input.name, &input.email, &input.password)?;

        let taken = || {
            UserServiceError::UserExists(format!("Email '{}' is already registered", valid.email))
        };

        if self
            .user_repo
            .get_by_email(&valid.email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(taken());
        }

        let password_hash = hash_password(&valid.password).context("Failed to hash password")?;
        let user = User::new(valid.name.clone(), valid.email.clone(), Some(password_hash));

        // A concurrent registration can still win the race to the UNIQUE index
        let created = match self.user_repo.create(&user).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => return Err(taken()),
            Err(e) => return Err(e.context("Failed to register user").into()),
        };

        tracing::info!(user_id = created.id, "User registered");

        Ok(created)
    }

    /// Check credentials and return the user.
    ///
    /// Unknown email, wrong password and password-less accounts all fail with
    /// the same message and cost one Argon2 verification each.
    pub async fn login(&self, input: LoginInput) -> Result<User, UserServiceError> {
        let valid = validation::login(&input.email, &input.password)?;

        let user = self
            .user_repo
            .get_by_email(&valid.email)
            .await
            .context("Failed to get user by email")?;

        let Some(user) = user else {
            verify_dummy_password(&valid.password);
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        };

        let Some(hash) = user.password_hash.as_deref() else {
            verify_dummy_password(&valid.password);
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        };

        if !verify_password(&valid.password, hash).context("Failed to verify password")? {
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        }

        Ok(user)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        let user = self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?;

        Ok(user)
    }

    /// Get user by email
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserServiceError> {
        let user = self
            .user_repo
            .get_by_email(email)
            .await
            .context("Failed to get user by email")?;

        Ok(user)
    }

    /// Update name and/or avatar. An empty avatar URL removes the avatar.
    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self.require_user(user_id).await?;

        if let Some(name) = input.name {
            user.name = validation::name(&name)?;
        }

        if let Some(avatar_url) = input.avatar_url {
            let avatar_url = avatar_url.trim();
            if avatar_url.chars().count() > AVATAR_URL_MAX_LEN {
                return Err(UserServiceError::ValidationError(ValidationError {
                    field: "avatar_url",
                    message: format!("must be at most {} characters", AVATAR_URL_MAX_LEN),
                }));
            }
            user.avatar_url = (!avatar_url.is_empty()).then(|| avatar_url.to_string());
        }

        user.updated_at = Utc::now();

        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update user")?;

        Ok(updated)
    }

    /// Change the password. Accounts without a password (OAuth sign-ups) may
    /// set their first one without supplying `current_password`.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: Option<&str>,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        let new_password = validation::password("new_password", new_password)?;
        let user = self.require_user(user_id).await?;

        if let Some(hash) = user.password_hash.as_deref() {
            let current = current_password.ok_or(UserServiceError::InvalidPassword)?;
            if !verify_password(current, hash).context("Failed to verify password")? {
                return Err(UserServiceError::InvalidPassword);
            }
        }

        let password_hash = hash_password(&new_password).context("Failed to hash password")?;
        self.user_repo
            .update_password(user_id, &password_hash)
            .await
            .context("Failed to update password")?;

        tracing::info!(user_id, "Password changed");

        Ok(())
    }

    /// Resolve an external identity to a local user, linking or creating as
    /// needed.
    ///
    /// - already linked: the linked user
    /// - email known, not linked: link it, adopt the avatar if the user has none
    /// - unknown: a new verified user, created together with the link
    pub async fn login_with_oauth(&self, identity: OAuthIdentity) -> Result<User, UserServiceError> {
        if let Some(user) = self
            .oauth_repo
            .find_user(&identity.provider, &identity.provider_account_id)
            .await
            .context("Failed to look up linked account")?
        {
            return Ok(user);
        }

        let existing = self
            .user_repo
            .get_by_email(&identity.email)
            .await
            .context("Failed to get user by email")?;

        if let Some(mut user) = existing {
            self.oauth_repo
                .link(user.id, &identity.provider, &identity.provider_account_id)
                .await
                .context("Failed to link account")?;

            tracing::info!(user_id = user.id, provider = %identity.provider, "Account linked");

            if user.avatar_url.is_none() && identity.avatar_url.is_some() {
                user.avatar_url = identity.avatar_url;
                user.updated_at = Utc::now();
                user = self
                    .user_repo
                    .update(&user)
                    .await
                    .context("Failed to update avatar")?;
            }
            return Ok(user);
        }

        let mut user = User::new(identity.name, identity.email, None);
        user.is_email_valid = true;
        user.avatar_url = identity.avatar_url;

        let created = self
            .oauth_repo
            .create_user_with_link(&user, &identity.provider, &identity.provider_account_id)
            .await
            .context("Failed to create linked user")?;

        tracing::info!(user_id = created.id, provider = %identity.provider, "User registered via provider");

        Ok(created)
    }

    async fn require_user(&self, user_id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user by ID")?
            .ok_or(UserServiceError::UserNotFound)
    }
}

/// Input for user registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for user login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxOAuthAccountRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_service() -> UserService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxOAuthAccountRepository::boxed(pool),
        )
    }

    fn identity(account_id: &str, email: &str) -> OAuthIdentity {
        OAuthIdentity {
            provider: "github".to_string(),
            provider_account_id: account_id.to_string(),
            email: email.to_string(),
            name: "Octo Cat".to_string(),
            avatar_url: Some("https://avatars.example.com/octo.png".to_string()),
        }
    }

    /// Never finds an existing email, like a registration that loses the
    /// race between its duplicate check and its insert
    struct RacingLookup(Arc<dyn UserRepository>);

    #[async_trait::async_trait]
    impl UserRepository for RacingLookup {
        async fn create(&self, user: &User) -> anyhow::Result<User> {
            self.0.create(user).await
        }

        async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
            self.0.get_by_id(id).await
        }

        async fn get_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn update(&self, user: &User) -> anyhow::Result<User> {
            self.0.update(user).await
        }

        async fn update_password(&self, id: i64, password_hash: &str) -> anyhow::Result<()> {
            self.0.update_password(id, password_hash).await
        }
    }

    // ========================================================================
    // Registration tests
    // ========================================================================

    #[tokio::test]
    async fn test_register_race_on_unique_email_is_user_exists() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::boxed(pool.clone());
        let racing = UserService::new(
            Arc::new(RacingLookup(users.clone())),
            SqlxOAuthAccountRepository::boxed(pool),
        );

        racing
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();
        let result = racing
            .register(RegisterInput::new("alice2", "alice@example.com", "password456"))
            .await;

        assert!(matches!(result, Err(UserServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_register_creates_unverified_user() {
        let service = setup_test_service().await;

        let user = service
            .register(RegisterInput::new(" alice ", "alice@example.com", "password123"))
            .await
            .expect("Failed to register");

        assert_eq!(user.name, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert!(!user.is_email_valid);
        assert_ne!(user.password_hash.as_deref(), Some("password123"));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_fails() {
        let service = setup_test_service().await;

        service
            .register(RegisterInput::new("user1", "same@example.com", "password123"))
            .await
            .expect("Failed to register first user");

        let result = service
            .register(RegisterInput::new("user2", "same@example.com", "password456"))
            .await;

        assert!(matches!(result, Err(UserServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let service = setup_test_service().await;

        let result = service
            .register(RegisterInput::new("alice", "not-an-email", "password123"))
            .await;

        match result {
            Err(UserServiceError::ValidationError(e)) => assert_eq!(e.field, "email"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // ========================================================================
    // Login tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_success() {
        let service = setup_test_service().await;
        let registered = service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();

        let user = service
            .login(LoginInput::new("alice@example.com", "password123"))
            .await
            .expect("Failed to login");

        assert_eq!(user.id, registered.id);
    }

    #[tokio::test]
    async fn test_login_failures_share_one_message() {
        let service = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();
        service.login_with_oauth(identity("1", "octo@example.com")).await.unwrap();

        let wrong_password = service
            .login(LoginInput::new("alice@example.com", "wrongpassword"))
            .await;
        let unknown_email = service
            .login(LoginInput::new("nobody@example.com", "password123"))
            .await;
        let no_password = service
            .login(LoginInput::new("octo@example.com", "password123"))
            .await;

        for result in [wrong_password, unknown_email, no_password] {
            match result {
                Err(UserServiceError::AuthenticationError(msg)) => {
                    assert_eq!(msg, INVALID_CREDENTIALS)
                }
                other => panic!("expected authentication error, got {:?}", other),
            }
        }
    }

    // ========================================================================
    // Profile and password tests
    // ========================================================================

    #[tokio::test]
    async fn test_update_profile() {
        let service = setup_test_service().await;
        let user = service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();

        let updated = service
            .update_profile(
                user.id,
                UpdateProfileInput {
                    name: Some("Alice Liddell".to_string()),
                    avatar_url: Some("https://example.com/a.png".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice Liddell");
        assert_eq!(updated.avatar_url.as_deref(), Some("https://example.com/a.png"));

        let cleared = service
            .update_profile(
                user.id,
                UpdateProfileInput {
                    name: None,
                    avatar_url: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.name, "Alice Liddell");
        assert!(cleared.avatar_url.is_none());
    }

    #[tokio::test]
    async fn test_update_profile_unknown_user() {
        let service = setup_test_service().await;
        let result = service.update_profile(999, UpdateProfileInput::default()).await;
        assert!(matches!(result, Err(UserServiceError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let service = setup_test_service().await;
        let user = service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();

        assert!(matches!(
            service.change_password(user.id, Some("wrong-one"), "newpassword").await,
            Err(UserServiceError::InvalidPassword)
        ));
        assert!(matches!(
            service.change_password(user.id, None, "newpassword").await,
            Err(UserServiceError::InvalidPassword)
        ));

        service
            .change_password(user.id, Some("password123"), "newpassword")
            .await
            .unwrap();

        assert!(service
            .login(LoginInput::new("alice@example.com", "newpassword"))
            .await
            .is_ok());
        assert!(service
            .login(LoginInput::new("alice@example.com", "password123"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_oauth_user_sets_first_password() {
        let service = setup_test_service().await;
        let user = service
            .login_with_oauth(identity("42", "octo@example.com"))
            .await
            .unwrap();

        service.change_password(user.id, None, "firstpassword").await.unwrap();

        assert!(service
            .login(LoginInput::new("octo@example.com", "firstpassword"))
            .await
            .is_ok());
    }

    // ========================================================================
    // OAuth tests
    // ========================================================================

    #[tokio::test]
    async fn test_oauth_creates_verified_user_once() {
        let service = setup_test_service().await;

        let first = service
            .login_with_oauth(identity("42", "octo@example.com"))
            .await
            .unwrap();
        assert!(first.is_email_valid);
        assert!(!first.has_password());
        assert_eq!(
            first.avatar_url.as_deref(),
            Some("https://avatars.example.com/octo.png")
        );

        let second = service
            .login_with_oauth(identity("42", "octo@example.com"))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_oauth_links_existing_email() {
        let service = setup_test_service().await;
        let registered = service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();

        let linked = service
            .login_with_oauth(identity("7", "alice@example.com"))
            .await
            .unwrap();

        assert_eq!(linked.id, registered.id);
        assert_eq!(
            linked.avatar_url.as_deref(),
            Some("https://avatars.example.com/octo.png")
        );
        // Linking keeps the password login working
        assert!(service
            .login(LoginInput::new("alice@example.com", "password123"))
            .await
            .is_ok());
    }
}
