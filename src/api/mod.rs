//! API layer - HTTP handlers and routing
//!
//! - Auth endpoints under `/api/v1/auth`
//! - Short link management under `/api/v1/links`
//! - Public redirects at `/{short_code}`
//!
//! Every request passes through `middleware::resolve_identity` first.

pub mod auth;
pub mod links;
pub mod middleware;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedUser, CurrentIdentity, RequestContext};

/// Build the API router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/links", links::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    // Cookie auth needs credentials, which rules out a wildcard origin
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin '{}'", cors_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true);

    Ok(Router::new()
        .nest("/api/v1", build_api_router())
        .route("/{short_code}", get(links::redirect))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_identity,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use crate::services::email::testing::RecordingSender;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, Response, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const ORIGIN: &str = "http://localhost:5173";

    struct TestApp {
        router: Router,
        sender: Arc<RecordingSender>,
    }

    async fn app() -> TestApp {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let mut config = Config::default();
        config.auth.jwt_secret = "router-test-secret".to_string();
        config.frontend.url = "https://sho.rt".to_string();

        let sender = Arc::new(RecordingSender::default());
        let state = AppState::new(pool, &config, sender.clone()).unwrap();

        TestApp {
            router: build_router(state, ORIGIN).unwrap(),
            sender,
        }
    }

    impl TestApp {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            cookie: Option<&str>,
            body: Option<Value>,
        ) -> Response<Body> {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.router.clone().oneshot(request).await.unwrap()
        }

        /// Register and return the `Cookie` header value for the new session
        async fn register(&self, name: &str, email: &str) -> String {
            let response = self
                .send(
                    "POST",
                    "/api/v1/auth/register",
                    None,
                    Some(json!({ "name": name, "email": email, "password": "password123" })),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            cookie_header(&response)
        }
    }

    /// Turn `Set-Cookie` values into a request `Cookie` header
    fn cookie_header(response: &Response<Body>) -> String {
        set_cookies(response)
            .iter()
            .filter_map(|c| c.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookies(response: &Response<Body>) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn only_refresh(cookie: &str) -> String {
        cookie
            .split("; ")
            .find(|c| c.starts_with("refresh_token="))
            .unwrap()
            .to_string()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_sets_cookies_and_sends_code() {
        let app = app().await;
        let response = app
            .send(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({ "name": "alice", "email": "alice@example.com", "password": "password123" })),
            )
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("HttpOnly")));

        let body = json_body(response).await;
        assert_eq!(body["email"], "alice@example.com");
        assert_eq!(body["is_email_valid"], false);
        assert!(body.get("password_hash").is_none());

        // Delivery is detached; give the task a moment to run
        for _ in 0..50 {
            if !app.sender.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(app.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_conflict() {
        let app = app().await;
        app.register("alice", "alice@example.com").await;

        let response = app
            .send(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({ "name": "alice2", "email": "alice@example.com", "password": "password123" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_invalid_input() {
        let app = app().await;
        let response = app
            .send(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({ "name": "al", "email": "alice@example.com", "password": "password123" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["details"]["field"], "name");
    }

    #[tokio::test]
    async fn test_me_requires_identity() {
        let app = app().await;
        let response = app.send("GET", "/api/v1/auth/me", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let cookie = app.register("alice", "alice@example.com").await;
        let response = app.send("GET", "/api/v1/auth/me", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).is_empty());
        assert_eq!(json_body(response).await["name"], "alice");
    }

    #[tokio::test]
    async fn test_refresh_cookie_alone_rotates() {
        let app = app().await;
        let cookie = app.register("alice", "alice@example.com").await;

        let response = app
            .send("GET", "/api/v1/auth/me", Some(&only_refresh(&cookie)), None)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let rotated = set_cookies(&response);
        assert_eq!(rotated.len(), 2);
        assert!(rotated.iter().any(|c| c.starts_with("access_token=")));
    }

    #[tokio::test]
    async fn test_login_and_wrong_password() {
        let app = app().await;
        app.register("alice", "alice@example.com").await;

        let ok = app
            .send(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": "alice@example.com", "password": "password123" })),
            )
            .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(set_cookies(&ok).len(), 2);

        let bad = app
            .send(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": "alice@example.com", "password": "wrong-password" })),
            )
            .await;
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&bad).is_empty());
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh() {
        let app = app().await;
        let cookie = app.register("alice", "alice@example.com").await;

        let response = app.send("POST", "/api/v1/auth/logout", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(set_cookies(&response).iter().all(|c| c.ends_with("Max-Age=0")));

        let replay = app
            .send("GET", "/api/v1/auth/me", Some(&only_refresh(&cookie)), None)
            .await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_with_only_refresh_cookie_clears_everything() {
        let app = app().await;
        let cookie = app.register("alice", "alice@example.com").await;
        let refresh = only_refresh(&cookie);

        let response = app.send("POST", "/api/v1/auth/logout", Some(&refresh), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.ends_with("Max-Age=0")));
        assert!(!cookies
            .iter()
            .any(|c| c.starts_with("access_token=") && !c.starts_with("access_token=;")));

        let replay = app.send("GET", "/api/v1/auth/me", Some(&refresh), None).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_access_token_in_refresh_cookie_is_rejected() {
        let app = app().await;
        let cookie = app.register("alice", "alice@example.com").await;
        let access = cookie
            .split("; ")
            .find_map(|c| c.strip_prefix("access_token="))
            .unwrap()
            .to_string();

        let response = app
            .send("GET", "/api/v1/auth/me", Some(&format!("refresh_token={}", access)), None)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    async fn test_forgot_password_same_answer_for_unknown_email() {
        let app = app().await;
        app.register("alice", "alice@example.com").await;

        let known = app
            .send(
                "POST",
                "/api/v1/auth/forgot-password",
                None,
                Some(json!({ "email": "alice@example.com" })),
            )
            .await;
        let unknown = app
            .send(
                "POST",
                "/api/v1/auth/forgot-password",
                None,
                Some(json!({ "email": "nobody@example.com" })),
            )
            .await;

        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(unknown.status(), StatusCode::OK);
        assert_eq!(json_body(known).await, json_body(unknown).await);
    }

    #[tokio::test]
    async fn test_bad_verification_and_reset_links() {
        let app = app().await;

        let verify = app
            .send(
                "GET",
                "/api/v1/auth/verify-email-token?token=12345678&email=alice%40example.com",
                None,
                None,
            )
            .await;
        assert_eq!(verify.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(verify).await["error"]["code"], "INVALID_LINK");

        let reset = app
            .send(
                "GET",
                &format!("/api/v1/auth/reset-password/{}", "ab".repeat(32)),
                None,
                None,
            )
            .await;
        assert_eq!(reset.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_link_lifecycle_and_redirect() {
        let app = app().await;
        let alice = app.register("alice", "alice@example.com").await;
        let bob = app.register("bobby", "bob@example.com").await;

        let unauthenticated = app
            .send(
                "POST",
                "/api/v1/links",
                None,
                Some(json!({ "url": "https://example.com" })),
            )
            .await;
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

        let created = app
            .send(
                "POST",
                "/api/v1/links",
                Some(&alice),
                Some(json!({ "url": "https://example.com/docs", "short_code": "docs" })),
            )
            .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let id = json_body(created).await["id"].as_i64().unwrap();

        let taken = app
            .send(
                "POST",
                "/api/v1/links",
                Some(&bob),
                Some(json!({ "url": "https://example.org", "short_code": "docs" })),
            )
            .await;
        assert_eq!(taken.status(), StatusCode::CONFLICT);

        let redirect = app.send("GET", "/docs", None, None).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            redirect.headers().get(header::LOCATION).unwrap(),
            "https://example.com/docs"
        );

        let listed = json_body(app.send("GET", "/api/v1/links", Some(&alice), None).await).await;
        assert_eq!(listed["total"], 1);
        let bobs = json_body(app.send("GET", "/api/v1/links", Some(&bob), None).await).await;
        assert_eq!(bobs["total"], 0);

        let foreign_delete = app
            .send("DELETE", &format!("/api/v1/links/{}", id), Some(&bob), None)
            .await;
        assert_eq!(foreign_delete.status(), StatusCode::NOT_FOUND);

        let deleted = app
            .send("DELETE", &format!("/api/v1/links/{}", id), Some(&alice), None)
            .await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = app.send("GET", "/docs", None, None).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_build_router_rejects_bad_origin() {
        let pool = create_test_pool().await.unwrap();
        let mut config = Config::default();
        config.auth.jwt_secret = "router-test-secret".to_string();
        let state = AppState::new(pool, &config, Arc::new(RecordingSender::default())).unwrap();

        assert!(build_router(state, "http://bad\norigin").is_err());
    }
}
