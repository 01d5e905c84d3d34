//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered account.
///
/// Accounts created through an OAuth provider have no password hash until
/// the owner sets one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Email address (unique, compared as stored)
    pub email: String,
    /// Password hash (argon2), `None` for OAuth-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Whether the owner confirmed the email address
    pub is_email_valid: bool,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new unverified user.
    ///
    /// The password must already be hashed with `services::password::hash_password()`.
    pub fn new(name: String, email: String, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            name,
            email,
            password_hash,
            is_email_valid: false,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account can sign in with a password
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Fields a user may change on their own profile
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    /// New display name
    pub name: Option<String>,
    /// New avatar URL
    pub avatar_url: Option<String>,
}
