//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Registration, sends a verification code
//! - POST /api/v1/auth/login - Password login
//! - POST /api/v1/auth/logout - Revoke the current session
//! - GET /api/v1/auth/me - Current user
//! - PUT /api/v1/auth/profile - Update name/avatar
//! - PUT /api/v1/auth/password - Change password
//! - POST /api/v1/auth/resend-verification - Send a new verification code
//! - GET /api/v1/auth/verify-email-token - Confirm an email address
//! - POST /api/v1/auth/forgot-password - Request a reset link
//! - GET/POST /api/v1/auth/reset-password/{token} - Check/redeem a reset link

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    append_cookies, extract_client_meta, ApiError, AppState, AuthenticatedUser, CurrentIdentity,
};
use crate::models::{UpdateProfileInput, User};
use crate::services::user::{LoginInput, RegisterInput};

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

/// Response for user info
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_email_valid: bool,
    pub has_password: bool,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            has_password: user.has_password(),
            name: user.name,
            email: user.email,
            is_email_valid: user.is_email_valid,
            avatar_url: user.avatar_url,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Build the auth router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
        .route("/resend-verification", post(resend_verification))
        .route("/verify-email-token", get(verify_email_token))
        .route("/forgot-password", post(forgot_password))
        .route(
            "/reset-password/{token}",
            get(check_reset_token).post(reset_password),
        )
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .register(RegisterInput::new(body.name, body.email, body.password))
        .await?;

    // Registration stands even if the verification mail cannot be queued
    if let Err(e) = state
        .verification
        .send_verification_link(user.id, &user.name, &user.email)
        .await
    {
        tracing::warn!(user_id = user.id, error = %e, "Failed to queue verification email");
    }

    let cookies = state
        .auth
        .authenticate_user(&user, &extract_client_meta(&headers))
        .await?;

    let mut response_headers = HeaderMap::new();
    append_cookies(&mut response_headers, cookies);

    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(UserResponse::from(user)),
    ))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .login(LoginInput::new(body.email, body.password))
        .await?;

    let cookies = state
        .auth
        .authenticate_user(&user, &extract_client_meta(&headers))
        .await?;

    let mut response_headers = HeaderMap::new();
    append_cookies(&mut response_headers, cookies);

    Ok((response_headers, Json(UserResponse::from(user))))
}

/// POST /api/v1/auth/logout
///
/// Always clears the cookies; revokes the session when there is one.
async fn logout(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl IntoResponse, ApiError> {
    let cookies = match identity {
        Some(identity) => state.auth.logout(identity.session_id).await?,
        None => state.auth.cleared_cookies(),
    };

    let mut response_headers = HeaderMap::new();
    append_cookies(&mut response_headers, cookies);

    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/me
async fn get_current_user(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .get_by_id(identity.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    Ok(Json(user.into()))
}

/// PUT /api/v1/auth/profile
async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.update_profile(identity.user_id, body).await?;
    Ok(Json(user.into()))
}

/// PUT /api/v1/auth/password
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .users
        .change_password(
            identity.user_id,
            body.current_password.as_deref(),
            &body.new_password,
        )
        .await?;

    Ok(MessageResponse::new("Password updated"))
}

/// POST /api/v1/auth/resend-verification
async fn resend_verification(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .verification
        .resend_verification(identity.user_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        MessageResponse::new("Verification email sent"),
    ))
}

/// GET /api/v1/auth/verify-email-token?token=..&email=..
async fn verify_email_token(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .verification
        .confirm_email(&query.token, &query.email)
        .await?;

    Ok(MessageResponse::new("Email verified"))
}

/// POST /api/v1/auth/forgot-password
///
/// Answers identically whether or not the address has an account.
async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .verification
        .issue_password_reset_link(&body.email)
        .await?;

    Ok(MessageResponse::new(
        "If an account exists for this email, a reset link has been sent",
    ))
}

/// GET /api/v1/auth/reset-password/{token}
async fn check_reset_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .verification
        .check_password_reset_token(&token)
        .await?;

    Ok(MessageResponse::new("Reset link is valid"))
}

/// POST /api/v1/auth/reset-password/{token}
///
/// All sessions of the user are revoked, so this browser's cookies are
/// cleared as well.
async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .verification
        .redeem_password_reset(&token, &body.new_password)
        .await?;

    let mut response_headers = HeaderMap::new();
    append_cookies(&mut response_headers, state.auth.cleared_cookies());

    Ok((response_headers, MessageResponse::new("Password has been reset")))
}
