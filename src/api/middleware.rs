//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope and service error mapping
//! - Identity resolution from the `access_token`/`refresh_token` cookies
//! - Extractors for the resolved identity and client metadata

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{
    SqlxEphemeralTokenRepository, SqlxOAuthAccountRepository, SqlxSessionRepository,
    SqlxShortLinkRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::ClientMeta;
use crate::services::auth::{cookie_value, AuthCookies, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::services::{
    AuthError, AuthService, AuthSettings, EmailSender, EmailTemplates, EphemeralTokenStore,
    Identity, ShortLinkError, ShortLinkService, TokenCodec, TokenLifetimes, UserService,
    UserServiceError, ValidationError, VerificationError, VerificationService,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub verification: Arc<VerificationService>,
    pub links: Arc<ShortLinkService>,
}

impl AppState {
    /// Wire repositories and services from configuration.
    pub fn new(
        pool: DynDatabasePool,
        config: &Config,
        sender: Arc<dyn EmailSender>,
    ) -> anyhow::Result<Self> {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());

        let auth = AuthService::new(
            TokenCodec::new(&config.auth.jwt_secret),
            session_repo,
            user_repo.clone(),
            AuthSettings {
                access_ttl_secs: config.auth.access_token_ttl_secs,
                refresh_ttl_secs: config.auth.refresh_token_ttl_secs,
                cookie_secure: config.auth.cookie_secure,
            },
        );

        let lifetimes = TokenLifetimes {
            verify_email: Duration::hours(config.auth.verify_email_ttl_hours),
            password_reset: Duration::hours(config.auth.password_reset_ttl_hours),
        };
        let verification = VerificationService::new(
            EphemeralTokenStore::new(SqlxEphemeralTokenRepository::boxed(pool.clone()), lifetimes),
            user_repo.clone(),
            sender,
            EmailTemplates::new(config.email.from_name.clone())?,
            config.frontend.url.clone(),
            lifetimes,
        );

        let users = UserService::new(user_repo, SqlxOAuthAccountRepository::boxed(pool.clone()));
        let links = ShortLinkService::new(SqlxShortLinkRepository::boxed(pool.clone()));

        Ok(Self {
            pool,
            auth: Arc::new(auth),
            users: Arc::new(users),
            verification: Arc::new(verification),
            links: Arc::new(links),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn invalid_link() -> Self {
        Self::new("INVALID_LINK", "Invalid or expired link")
    }

    /// Log the cause and return a generic message
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Request failed");
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "INVALID_LINK" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::with_details(
            "VALIDATION_ERROR",
            err.to_string(),
            serde_json::json!({ "field": err.field }),
        )
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(e) => e.into(),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::UserNotFound => ApiError::unauthorized("Authentication required"),
            UserServiceError::InvalidPassword => {
                ApiError::validation_error("Current password is incorrect")
            }
            UserServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::InvalidLink => ApiError::invalid_link(),
            VerificationError::AlreadyVerified => {
                ApiError::validation_error("Email is already verified")
            }
            VerificationError::UserNotFound => ApiError::unauthorized("Authentication required"),
            VerificationError::ValidationError(e) => e.into(),
            VerificationError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<ShortLinkError> for ApiError {
    fn from(err: ShortLinkError) -> Self {
        match err {
            ShortLinkError::NotFound => ApiError::not_found("Short link not found"),
            e @ ShortLinkError::ShortCodeTaken(_) => ApiError::conflict(e.to_string()),
            ShortLinkError::ValidationError(e) => e.into(),
            ShortLinkError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::internal(err)
    }
}

// ============================================================================
// Identity resolution
// ============================================================================

/// Identity resolved for the current request, inserted by `resolve_identity`
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
}

/// Resolve the bearer cookies into a `RequestContext`.
///
/// Never rejects a request. When the identity came from a refresh, the new
/// cookie pair is appended to the response unless the handler already set
/// its own auth cookies.
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookies = request
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let resolution = state
        .auth
        .resolve_request_identity(
            cookie_value(&cookies, ACCESS_COOKIE),
            cookie_value(&cookies, REFRESH_COOKIE),
        )
        .await;

    request.extensions_mut().insert(RequestContext {
        identity: resolution.identity,
    });

    let mut response = next.run(request).await;

    // A handler that already set the auth cookies (login, logout, reset) wins
    if let Some(rotated) = resolution.rotated {
        if !sets_auth_cookie(response.headers()) {
            append_cookies(response.headers_mut(), rotated);
        }
    }

    response
}

fn sets_auth_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split_once('='))
        .any(|(name, _)| matches!(name.trim(), ACCESS_COOKIE | REFRESH_COOKIE))
}

/// Append both cookies as `Set-Cookie` headers
pub fn append_cookies(headers: &mut HeaderMap, cookies: AuthCookies) {
    for cookie in cookies.into_values() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping unencodable cookie"),
        }
    }
}

/// The request's identity, if any
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Option<Identity>);

/// The request's identity; rejects with 401 when there is none
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentIdentity(
            parts
                .extensions
                .get::<RequestContext>()
                .and_then(|ctx| ctx.identity.clone()),
        ))
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|ctx| ctx.identity.clone())
            .map(AuthenticatedUser)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Client IP and user agent, as recorded on new sessions
pub fn extract_client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(String::from);

    let user_agent = header_str(headers, header::USER_AGENT.as_str()).map(String::from);

    ClientMeta::new(ip, user_agent)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
