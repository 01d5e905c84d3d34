//! Single-use token store
//!
//! Issues and redeems email verification codes and password reset tokens.
//! Verification codes are short enough to type and are stored as issued.
//! Reset tokens are 32 random bytes; only their SHA-256 digest is persisted,
//! so a database leak does not hand out working reset links.

use crate::db::repositories::{EphemeralTokenRepository, Redemption};
use crate::models::TokenPurpose;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Errors from the single-use token store
#[derive(Debug, thiserror::Error)]
pub enum EphemeralTokenError {
    /// Unknown, expired, already used or issued for another address
    #[error("Invalid or expired token")]
    TokenInvalid,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A freshly issued token. `raw` is what goes into the email; it is never
/// readable from storage again for password resets.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub user_id: i64,
    pub purpose: TokenPurpose,
}

/// Lifetimes for each token purpose
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub verify_email: Duration,
    pub password_reset: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            verify_email: Duration::hours(24),
            password_reset: Duration::hours(24),
        }
    }
}

impl TokenLifetimes {
    fn for_purpose(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::VerifyEmail => self.verify_email,
            TokenPurpose::PasswordReset => self.password_reset,
        }
    }
}

/// Uniform 8-digit code, 10000000..=99999999
pub fn generate_verification_code() -> String {
    rand::thread_rng()
        .gen_range(10_000_000u32..100_000_000)
        .to_string()
}

/// 32 bytes from the OS RNG, hex-encoded (64 chars)
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lowercase hex SHA-256 digest
pub fn digest_token(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// Value persisted for a raw token of the given purpose
fn stored_value(raw: &str, purpose: TokenPurpose) -> String {
    match purpose {
        TokenPurpose::VerifyEmail => raw.to_string(),
        TokenPurpose::PasswordReset => digest_token(raw),
    }
}

/// Issue/redeem facade over the token repository.
pub struct EphemeralTokenStore {
    repo: Arc<dyn EphemeralTokenRepository>,
    lifetimes: TokenLifetimes,
}

impl EphemeralTokenStore {
    pub fn new(repo: Arc<dyn EphemeralTokenRepository>, lifetimes: TokenLifetimes) -> Self {
        Self { repo, lifetimes }
    }

    /// Issue a new token, superseding any live token the user holds for the
    /// same purpose.
    pub async fn issue(
        &self,
        user_id: i64,
        purpose: TokenPurpose,
    ) -> Result<IssuedToken, EphemeralTokenError> {
        let raw = match purpose {
            TokenPurpose::VerifyEmail => generate_verification_code(),
            TokenPurpose::PasswordReset => generate_reset_token(),
        };
        let expires_at = Utc::now() + self.lifetimes.for_purpose(purpose);

        self.repo
            .replace(user_id, purpose, &stored_value(&raw, purpose), expires_at)
            .await?;

        tracing::debug!(user_id, %purpose, "Issued single-use token");

        Ok(IssuedToken {
            raw,
            user_id,
            purpose,
        })
    }

    /// Redeem a token and apply `redemption` to its owner, returning the
    /// owner's ID.
    ///
    /// Succeeds at most once per issued token even under concurrent calls:
    /// only the caller whose delete removes the row wins. Consuming the
    /// token, changing the user and purging the user's remaining tokens of
    /// this purpose commit together or not at all.
    pub async fn redeem(
        &self,
        raw: &str,
        email: Option<&str>,
        redemption: Redemption<'_>,
    ) -> Result<i64, EphemeralTokenError> {
        let purpose = redemption.purpose();
        let token = self
            .repo
            .find_live(purpose, &stored_value(raw, purpose), email, Utc::now())
            .await?
            .ok_or(EphemeralTokenError::TokenInvalid)?;

        if !self.repo.redeem(&token, redemption).await? {
            return Err(EphemeralTokenError::TokenInvalid);
        }

        Ok(token.user_id)
    }

    /// Look a token up without consuming it.
    pub async fn peek(
        &self,
        raw: &str,
        purpose: TokenPurpose,
    ) -> Result<i64, EphemeralTokenError> {
        self.repo
            .find_live(purpose, &stored_value(raw, purpose), None, Utc::now())
            .await?
            .map(|token| token.user_id)
            .ok_or(EphemeralTokenError::TokenInvalid)
    }
}
