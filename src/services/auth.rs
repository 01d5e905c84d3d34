//! Session lifecycle
//!
//! Logging in creates a session row and mints two tokens bound to it:
//! a short-lived access token carrying the user's public claims, and a
//! long-lived refresh token carrying only the session ID. Both travel as
//! HttpOnly cookies.
//!
//! Each request is resolved to an identity in one of three ways:
//! - no cookies: unauthenticated
//! - a verifiable access token: authenticated from its claims, no I/O
//! - otherwise, a refresh token: the session must still exist and be valid,
//!   the user must still exist, and a fresh token pair is minted for the
//!   same session
//!
//! Refresh failures of any kind, including storage errors, resolve to
//! "unauthenticated" and are only logged.

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{ClientMeta, User};
use crate::services::token::{AccessClaims, RefreshClaims, TokenCodec, TokenError};
use anyhow::Context;
use std::sync::Arc;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Token lifetimes and cookie attributes
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub cookie_secure: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            cookie_secure: true,
        }
    }
}

/// The authenticated caller, as carried by the access token
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub is_email_valid: bool,
    pub session_id: i64,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.id,
            name: claims.name,
            email: claims.email,
            is_email_valid: claims.is_email_valid,
            session_id: claims.session_id,
        }
    }
}

/// A pair of `Set-Cookie` header values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookies {
    pub access: String,
    pub refresh: String,
}

impl AuthCookies {
    pub fn into_values(self) -> impl Iterator<Item = String> {
        [self.access, self.refresh].into_iter()
    }
}

/// Outcome of resolving a request's cookies
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub identity: Option<Identity>,
    /// Present when a refresh happened; must be sent back to the client
    pub rotated: Option<AuthCookies>,
}

/// Why a refresh attempt did not yield an identity
#[derive(Debug, thiserror::Error)]
enum RefreshFailure {
    #[error("refresh token invalid or expired")]
    InvalidToken,
    #[error("session {0} missing or revoked")]
    SessionRevoked(i64),
    #[error("user {0} no longer exists")]
    UserVanished(i64),
    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("failed to mint tokens: {0}")]
    Mint(TokenError),
}

/// Session lifecycle manager
pub struct AuthService {
    codec: TokenCodec,
    session_repo: Arc<dyn SessionRepository>,
    user_repo: Arc<dyn UserRepository>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        codec: TokenCodec,
        session_repo: Arc<dyn SessionRepository>,
        user_repo: Arc<dyn UserRepository>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            codec,
            session_repo,
            user_repo,
            settings,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Start a new session for `user` and mint its cookies.
    pub async fn authenticate_user(
        &self,
        user: &User,
        meta: &ClientMeta,
    ) -> Result<AuthCookies, AuthError> {
        let session = self
            .session_repo
            .create(user.id, meta)
            .await
            .context("Failed to create session")?;

        tracing::info!(user_id = user.id, session_id = session.id, "Session started");

        Ok(self.mint_cookies(user, session.id)?)
    }

    /// Resolve the request's cookies to an identity, refreshing if needed.
    pub async fn resolve_request_identity(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Resolution {
        if let Some(token) = access_token {
            match self.codec.verify::<AccessClaims>(token) {
                Ok(verified) => {
                    return Resolution {
                        identity: Some(verified.claims.into()),
                        rotated: None,
                    }
                }
                Err(_) => tracing::debug!("Access token rejected, trying refresh"),
            }
        }

        let Some(token) = refresh_token else {
            return Resolution::default();
        };

        match self.refresh(token).await {
            Ok((identity, cookies)) => Resolution {
                identity: Some(identity),
                rotated: Some(cookies),
            },
            Err(failure) => {
                tracing::debug!(reason = %failure, "Refresh failed, request is unauthenticated");
                Resolution::default()
            }
        }
    }

    /// Revoke the session and return cookies that clear both tokens.
    pub async fn logout(&self, session_id: i64) -> Result<AuthCookies, AuthError> {
        self.session_repo
            .invalidate(session_id)
            .await
            .context("Failed to invalidate session")?;

        tracing::info!(session_id, "Session revoked");

        Ok(self.cleared_cookies())
    }

    /// Cookies that make the browser drop both tokens
    pub fn cleared_cookies(&self) -> AuthCookies {
        AuthCookies {
            access: self.cookie(ACCESS_COOKIE, "", 0),
            refresh: self.cookie(REFRESH_COOKIE, "", 0),
        }
    }

    async fn refresh(&self, token: &str) -> Result<(Identity, AuthCookies), RefreshFailure> {
        let claims = self
            .codec
            .verify::<RefreshClaims>(token)
            .map_err(|_| RefreshFailure::InvalidToken)?
            .claims;

        let session = self
            .session_repo
            .get_by_id(claims.session_id)
            .await?
            .filter(|s| s.valid)
            .ok_or(RefreshFailure::SessionRevoked(claims.session_id))?;

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await?
            .ok_or(RefreshFailure::UserVanished(session.user_id))?;

        let cookies = self
            .mint_cookies(&user, session.id)
            .map_err(RefreshFailure::Mint)?;

        tracing::debug!(user_id = user.id, session_id = session.id, "Tokens refreshed");

        Ok((Self::identity_of(&user, session.id), cookies))
    }

    fn identity_of(user: &User, session_id: i64) -> Identity {
        Identity {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            is_email_valid: user.is_email_valid,
            session_id,
        }
    }

    fn mint_cookies(&self, user: &User, session_id: i64) -> Result<AuthCookies, TokenError> {
        let access_claims = AccessClaims {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            is_email_valid: user.is_email_valid,
            session_id,
        };
        let access = self.codec.sign(&access_claims, self.settings.access_ttl_secs)?;
        let refresh = self
            .codec
            .sign(&RefreshClaims { session_id }, self.settings.refresh_ttl_secs)?;

        Ok(AuthCookies {
            access: self.cookie(ACCESS_COOKIE, &access, self.settings.access_ttl_secs),
            refresh: self.cookie(REFRESH_COOKIE, &refresh, self.settings.refresh_ttl_secs),
        })
    }

    fn cookie(&self, name: &str, value: &str, max_age: i64) -> String {
        let secure = if self.settings.cookie_secure {
            "; Secure"
        } else {
            ""
        };
        format!(
            "{}={}; Path=/; HttpOnly{}; SameSite=Lax; Max-Age={}",
            name, value, secure, max_age
        )
    }
}

/// Value of cookie `name` from a `Cookie` request header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::services::token::Verified;
    use chrono::Utc;

    const SECRET: &str = "auth-test-secret";

    struct Fixture {
        pool: DynDatabasePool,
        service: AuthService,
        sessions: Arc<dyn SessionRepository>,
        user: User,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::boxed(pool.clone());
        let sessions = SqlxSessionRepository::boxed(pool.clone());
        let user = users
            .create(&User::new(
                "alice".to_string(),
                "alice@example.com".to_string(),
                Some("hash".to_string()),
            ))
            .await
            .unwrap();

        let service = AuthService::new(
            TokenCodec::new(SECRET),
            sessions.clone(),
            users,
            AuthSettings::default(),
        );

        Fixture {
            pool,
            service,
            sessions,
            user,
        }
    }

    fn token_of(set_cookie: &str) -> &str {
        let first = set_cookie.split(';').next().unwrap();
        first.split_once('=').unwrap().1
    }

    fn meta() -> ClientMeta {
        ClientMeta::new(Some("203.0.113.9".to_string()), Some("test-agent".to_string()))
    }

    #[tokio::test]
    async fn test_cookies_carry_attributes_and_ttls() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        assert!(cookies.access.starts_with("access_token="));
        assert!(cookies.access.contains("HttpOnly"));
        assert!(cookies.access.contains("Secure"));
        assert!(cookies.access.ends_with("Max-Age=900"));
        assert!(cookies.refresh.starts_with("refresh_token="));
        assert!(cookies.refresh.ends_with("Max-Age=604800"));
    }

    #[tokio::test]
    async fn test_access_token_resolves_same_user() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        let resolution = f
            .service
            .resolve_request_identity(Some(token_of(&cookies.access)), None)
            .await;

        let identity = resolution.identity.expect("identity");
        assert_eq!(identity.user_id, f.user.id);
        assert_eq!(identity.email, "alice@example.com");
        assert!(resolution.rotated.is_none());
    }

    #[tokio::test]
    async fn test_session_records_client_meta() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();
        let identity = f
            .service
            .resolve_request_identity(Some(token_of(&cookies.access)), None)
            .await
            .identity
            .unwrap();

        let session = f.sessions.get_by_id(identity.session_id).await.unwrap().unwrap();
        assert_eq!(session.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(session.user_agent.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_expired_access_refreshes_with_later_expiry() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();
        let codec = TokenCodec::new(SECRET);

        let original: Verified<AccessClaims> = codec.verify(token_of(&cookies.access)).unwrap();
        let expired = codec.sign(&original.claims, -10).unwrap();

        // Timestamps have whole-second resolution
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let resolution = f
            .service
            .resolve_request_identity(Some(&expired), Some(token_of(&cookies.refresh)))
            .await;

        let identity = resolution.identity.expect("identity after refresh");
        assert_eq!(identity.user_id, f.user.id);
        assert_eq!(identity.session_id, original.claims.session_id);

        let rotated = resolution.rotated.expect("rotated cookies");
        let fresh: Verified<AccessClaims> = codec.verify(token_of(&rotated.access)).unwrap();
        assert!(fresh.expires_at > original.expires_at);
        assert!(fresh.expires_at > Utc::now());
        assert_eq!(fresh.claims.session_id, original.claims.session_id);
    }

    #[tokio::test]
    async fn test_refresh_uses_current_user_state() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        SqlxUserRepository::new(f.pool.clone())
            .update(&User {
                is_email_valid: true,
                ..f.user.clone()
            })
            .await
            .unwrap();

        let identity = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.refresh)))
            .await
            .identity
            .unwrap();
        assert!(identity.is_email_valid);
    }

    #[tokio::test]
    async fn test_revoked_session_does_not_refresh() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();
        let session_id = TokenCodec::new(SECRET)
            .verify::<RefreshClaims>(token_of(&cookies.refresh))
            .unwrap()
            .claims
            .session_id;

        f.sessions.invalidate(session_id).await.unwrap();

        let resolution = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.refresh)))
            .await;
        assert!(resolution.identity.is_none());
        assert!(resolution.rotated.is_none());
    }

    #[tokio::test]
    async fn test_logout_then_replayed_refresh_is_unauthenticated() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();
        let identity = f
            .service
            .resolve_request_identity(Some(token_of(&cookies.access)), None)
            .await
            .identity
            .unwrap();

        let cleared = f.service.logout(identity.session_id).await.unwrap();
        assert!(cleared.access.starts_with("access_token=;"));
        assert!(cleared.access.ends_with("Max-Age=0"));
        assert!(cleared.refresh.ends_with("Max-Age=0"));

        let replay = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.refresh)))
            .await;
        assert!(replay.identity.is_none());
    }

    #[tokio::test]
    async fn test_vanished_user_does_not_refresh() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        // Deleting the user cascades to the session; a refresh must not panic or error
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(f.user.id)
            .execute(f.pool.require_sqlite().unwrap())
            .await
            .unwrap();

        let resolution = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.refresh)))
            .await;
        assert!(resolution.identity.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_unauthenticated() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        f.pool.close().await;

        let resolution = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.refresh)))
            .await;
        assert!(resolution.identity.is_none());
    }

    #[tokio::test]
    async fn test_no_cookies_and_garbage_are_unauthenticated() {
        let f = fixture().await;

        assert!(f.service.resolve_request_identity(None, None).await.identity.is_none());
        assert!(f
            .service
            .resolve_request_identity(Some("garbage"), Some("more-garbage"))
            .await
            .identity
            .is_none());
    }

    #[tokio::test]
    async fn test_access_token_in_refresh_slot_is_unauthenticated() {
        let f = fixture().await;
        let cookies = f.service.authenticate_user(&f.user, &meta()).await.unwrap();

        let resolution = f
            .service
            .resolve_request_identity(None, Some(token_of(&cookies.access)))
            .await;

        assert!(resolution.identity.is_none());
        assert!(resolution.rotated.is_none());
    }

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; access_token=abc.def.ghi; refresh_token=";
        assert_eq!(cookie_value(header, "access_token"), Some("abc.def.ghi"));
        assert_eq!(cookie_value(header, "refresh_token"), None);
        assert_eq!(cookie_value(header, "missing"), None);
    }
}
