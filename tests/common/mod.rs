//! Shared helpers for integration tests: in-memory state, seeding and
//! request plumbing.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use http_body_util::BodyExt;
use tower::ServiceExt;

use osduth_gateway::auth::{OauthBroker, ProviderCredentials};
use osduth_gateway::domain::{Role, UserStatus};
use osduth_gateway::infra::{
    FeatureRegistry, IdentityStore, OauthStateStore, QuotaEngine, SessionStore, TokenStore,
    UsageTracker,
};
use osduth_gateway::server::AppState;

/// Fresh application state over an in-memory auth store.
pub async fn test_state() -> AppState {
    test_state_with_providers(ProviderCredentials::default(), ProviderCredentials::default()).await
}

pub async fn test_state_with_providers(
    google: ProviderCredentials,
    github: ProviderCredentials,
) -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    osduth_gateway::migrations::run(&pool).await.expect("migrations");

    let identity = IdentityStore::new(pool.clone());
    let features = FeatureRegistry::new(pool.clone());
    let sessions = SessionStore::new(
        pool.clone(),
        identity.clone(),
        chrono::Duration::hours(1),
        false,
    );
    let states = OauthStateStore::new(pool.clone());
    let tokens = TokenStore::new(pool.clone(), identity.clone(), features.clone());
    let quota = QuotaEngine::new(pool.clone(), identity.clone(), features.clone());
    let usage = UsageTracker::new(pool, sessions.clone(), states.clone());
    let oauth = Arc::new(OauthBroker::new(google, github, "http://localhost:9237"));

    AppState {
        identity,
        features,
        sessions,
        states,
        tokens,
        quota,
        usage,
        oauth,
    }
}

/// Creates a user in the given seeded group and returns its id.
pub async fn seed_user(state: &AppState, email: &str, group: &str) -> i64 {
    let group = state
        .identity
        .group_by_name(group)
        .await
        .unwrap()
        .expect("seed group");
    state
        .identity
        .create_user(email, "Test User", group.id)
        .await
        .unwrap()
        .id
}

pub async fn make_admin(state: &AppState, user_id: i64) {
    state
        .identity
        .update_user(user_id, Some(Role::Admin), None, None, None)
        .await
        .unwrap();
}

pub async fn suspend(state: &AppState, user_id: i64) {
    state
        .identity
        .update_user(user_id, None, Some(UserStatus::Suspended), None, None)
        .await
        .unwrap();
}

/// Opens a session and returns the Cookie header value for it.
pub async fn session_cookie_for(state: &AppState, user_id: i64) -> String {
    let session = state.sessions.create(user_id).await.unwrap();
    format!("osduth_session={}", session.id)
}

/// Issues a user token scoped to the given slugs and returns the raw value.
pub async fn issue_token(state: &AppState, user_id: i64, slugs: &[&str]) -> String {
    let slugs: Vec<String> = slugs.iter().map(|s| s.to_string()).collect();
    state
        .tokens
        .create_user_token(user_id, "test token", &slugs, &[], None)
        .await
        .unwrap()
        .raw_token
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn request_with_headers(
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Drives one request through the router.
pub async fn send(app: &axum::Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
