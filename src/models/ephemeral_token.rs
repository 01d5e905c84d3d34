//! Single-use token model

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// What a single-use token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// 8-digit code mailed to confirm an address, stored in clear
    VerifyEmail,
    /// 64-hex secret mailed for password recovery, stored as a SHA-256 digest
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::VerifyEmail => "verify_email",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify_email" => Ok(TokenPurpose::VerifyEmail),
            "password_reset" => Ok(TokenPurpose::PasswordReset),
            _ => Err(anyhow::anyhow!("Invalid token purpose: {}", s)),
        }
    }
}

/// A stored single-use token row.
///
/// `token_value` is whatever is persisted: the clear code for
/// verification, the digest for password reset.
#[derive(Debug, Clone)]
pub struct EphemeralToken {
    pub id: i64,
    pub user_id: i64,
    pub purpose: TokenPurpose,
    pub token_value: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EphemeralToken {
    /// Redeemable only strictly before `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
