//! Email verification and password recovery
//!
//! Both flows issue a single-use token, mail a link containing it and later
//! redeem it. Redemption failures of any kind surface as `InvalidLink`;
//! callers cannot tell an expired link from a forged one.

use crate::db::repositories::{Redemption, UserRepository};
use crate::models::TokenPurpose;
use crate::services::email::{dispatch_best_effort, DeliveryHandle, EmailSender, EmailTemplates, OutgoingEmail};
use crate::services::ephemeral_token::{
    digest_token, generate_reset_token, EphemeralTokenError, EphemeralTokenStore, TokenLifetimes,
};
use crate::services::password::hash_password;
use crate::services::validation::{self, ValidationError};
use anyhow::Context;
use std::sync::Arc;

/// Error types for verification and recovery
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Unknown, expired, already used or mismatched link
    #[error("Invalid or expired link")]
    InvalidLink,

    #[error("Email is already verified")]
    AlreadyVerified,

    #[error("User not found")]
    UserNotFound,

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<EphemeralTokenError> for VerificationError {
    fn from(err: EphemeralTokenError) -> Self {
        match err {
            EphemeralTokenError::TokenInvalid => VerificationError::InvalidLink,
            EphemeralTokenError::InternalError(e) => VerificationError::InternalError(e),
        }
    }
}

/// Verification and recovery manager
pub struct VerificationService {
    store: EphemeralTokenStore,
    user_repo: Arc<dyn UserRepository>,
    sender: Arc<dyn EmailSender>,
    templates: EmailTemplates,
    frontend_url: String,
    lifetimes: TokenLifetimes,
}

impl VerificationService {
    pub fn new(
        store: EphemeralTokenStore,
        user_repo: Arc<dyn UserRepository>,
        sender: Arc<dyn EmailSender>,
        templates: EmailTemplates,
        frontend_url: impl Into<String>,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            store,
            user_repo,
            sender,
            templates,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
            lifetimes,
        }
    }

    /// Issue a verification code and mail it.
    ///
    /// Delivery runs detached; the returned handle may be dropped. The code
    /// stays valid even if delivery fails.
    pub async fn send_verification_link(
        &self,
        user_id: i64,
        name: &str,
        email: &str,
    ) -> Result<DeliveryHandle, VerificationError> {
        let issued = self.store.issue(user_id, TokenPurpose::VerifyEmail).await?;

        let link = format!(
            "{}/verify-email-token?token={}&email={}",
            self.frontend_url,
            issued.raw,
            urlencoding::encode(email)
        );
        let html = self.templates.verification(
            name,
            &issued.raw,
            &link,
            self.lifetimes.verify_email.num_hours(),
        )?;

        tracing::info!(user_id, "Verification email queued");

        Ok(dispatch_best_effort(
            self.sender.clone(),
            OutgoingEmail {
                to: email.to_string(),
                subject: format!("Verify your email for {}", self.templates.app_name()),
                html,
            },
        ))
    }

    /// Send a fresh code to a user who has not verified yet.
    pub async fn resend_verification(&self, user_id: i64) -> Result<DeliveryHandle, VerificationError> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user by ID")?
            .ok_or(VerificationError::UserNotFound)?;

        if user.is_email_valid {
            return Err(VerificationError::AlreadyVerified);
        }

        self.send_verification_link(user.id, &user.name, &user.email)
            .await
    }

    /// Redeem a verification code for `email` and mark the address verified.
    pub async fn confirm_email(&self, token: &str, email: &str) -> Result<i64, VerificationError> {
        let valid =
            validation::verify_email(token, email).map_err(|_| VerificationError::InvalidLink)?;

        let user_id = self
            .store
            .redeem(&valid.token, Some(&valid.email), Redemption::VerifyEmail)
            .await?;

        tracing::info!(user_id, "Email verified");

        Ok(user_id)
    }

    /// Mail a reset link if `email` belongs to an account.
    ///
    /// Returns `Ok(None)` for unknown addresses. Those still generate and
    /// digest a token and render the mail, so the response and most of the
    /// work match the known-address case; only the token insert is skipped.
    pub async fn issue_password_reset_link(
        &self,
        email: &str,
    ) -> Result<Option<DeliveryHandle>, VerificationError> {
        let email = validation::email(email)?;

        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to get user by email")?;

        let Some(user) = user else {
            let decoy = format!(
                "{}/reset-password/{}",
                self.frontend_url,
                digest_token(&generate_reset_token())
            );
            self.templates.password_reset(
                &email,
                &decoy,
                self.lifetimes.password_reset.num_hours(),
            )?;
            tracing::debug!("Password reset requested for unknown email");
            return Ok(None);
        };

        let issued = self.store.issue(user.id, TokenPurpose::PasswordReset).await?;

        let link = format!("{}/reset-password/{}", self.frontend_url, issued.raw);
        let html = self.templates.password_reset(
            &user.name,
            &link,
            self.lifetimes.password_reset.num_hours(),
        )?;

        tracing::info!(user_id = user.id, "Password reset email queued");

        Ok(Some(dispatch_best_effort(
            self.sender.clone(),
            OutgoingEmail {
                to: user.email,
                subject: format!("Reset your {} password", self.templates.app_name()),
                html,
            },
        )))
    }

    /// Check a reset token without consuming it.
    pub async fn check_password_reset_token(&self, token: &str) -> Result<i64, VerificationError> {
        let token = validation::reset_token(token).map_err(|_| VerificationError::InvalidLink)?;
        Ok(self.store.peek(&token, TokenPurpose::PasswordReset).await?)
    }

    /// Redeem a reset token, set the new password and sign the user out
    /// everywhere.
    pub async fn redeem_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<i64, VerificationError> {
        let token = validation::reset_token(token).map_err(|_| VerificationError::InvalidLink)?;
        // Validate before redeeming so a rejected password does not burn the link
        let new_password = validation::password("new_password", new_password)?;

        let password_hash = hash_password(&new_password).context("Failed to hash password")?;

        let user_id = self
            .store
            .redeem(
                &token,
                None,
                Redemption::ResetPassword {
                    password_hash: &password_hash,
                },
            )
            .await?;

        tracing::info!(user_id, "Password reset, all sessions revoked");

        Ok(user_id)
    }
}
