//! Short link API endpoints
//!
//! - GET /api/v1/links - List own links (paged)
//! - POST /api/v1/links - Create
//! - PUT /api/v1/links/{id} - Update
//! - DELETE /api/v1/links/{id} - Delete
//! - GET /{short_code} - Public redirect

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ListParams, PagedResult, ShortLink};

/// Request body for creating or updating a link
#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub url: String,
    pub short_code: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_links).post(create_link))
        .route("/{id}", put(update_link).delete(delete_link))
}

/// GET /api/v1/links?page=&per_page=
async fn list_links(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(params): Query<ListParams>,
) -> Result<Json<PagedResult<ShortLink>>, ApiError> {
    let page = state.links.list_for_user(identity.user_id, &params).await?;
    Ok(Json(page))
}

/// POST /api/v1/links
async fn create_link(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .links
        .create(identity.user_id, &body.url, body.short_code.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// PUT /api/v1/links/{id}
async fn update_link(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<LinkRequest>,
) -> Result<Json<ShortLink>, ApiError> {
    let link = state
        .links
        .update(identity.user_id, id, &body.url, body.short_code.as_deref())
        .await?;

    Ok(Json(link))
}

/// DELETE /api/v1/links/{id}
async fn delete_link(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.links.delete(identity.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /{short_code}
pub async fn redirect(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
) -> Result<Redirect, ApiError> {
    let link = state
        .links
        .resolve(&short_code)
        .await?
        .ok_or_else(|| ApiError::not_found("Short link not found"))?;

    Ok(Redirect::temporary(&link.url))
}
