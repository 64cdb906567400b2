//! Request guards: token auth, session auth and role checks.
//!
//! These compose the session registry, token service, feature registry and
//! quota engine into the three contracts the router mounts: a token guard
//! fixed to one feature slug per route, a session guard for the account
//! surface, and a role guard layered on top for `/admin`.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::net::SocketAddr;
use tracing::warn;

use crate::api::ApiError;
use crate::auth::ip::{canonicalize_ip, is_ip_allowed};
use crate::domain::{Role, Token, User, UserStatus};
use crate::infra::{cookie_value, GatewayError, UNLIMITED_RPM, SESSION_COOKIE};
use crate::server::AppState;

pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Authenticated user, injected into request extensions by the guards.
#[derive(Clone)]
pub struct CurrentUser(pub User);

/// Validated token, injected by the token guard.
#[derive(Clone)]
pub struct CurrentToken(pub Token);

/// Token guard for feature endpoints. Layer with
/// `from_fn_with_state((state, "maps.tiles"), token_guard)`.
pub async fn token_guard(
    State((state, feature_slug)): State<(AppState, &'static str)>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // 1. Bearer token out of the Authorization header.
    let raw_token = match bearer_token(&request) {
        Ok(token) => token,
        Err(e) => return ApiError::from(e).into_response(),
    };

    // 2. Validate against the store.
    let validated = match state.tokens.validate(&raw_token).await {
        Ok(v) => v,
        Err(e) => return ApiError::from(e).into_response(),
    };

    // 3. The route's feature must exist; a guard on a missing slug is a
    //    deployment error, not a client one.
    let feature = match state.features.by_slug(feature_slug).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            warn!(feature_slug, "token guard mounted on unknown feature");
            return ApiError::from(GatewayError::Internal(format!(
                "feature '{feature_slug}' not found"
            )))
            .into_response();
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    // 4. Admin-only is checked live so flipping the flag takes effect
    //    immediately, even for already-issued tokens.
    match state.features.is_admin_only(feature.id).await {
        Ok(true) if !validated.token.admin_created => {
            return ApiError::from(GatewayError::Forbidden(
                "this feature requires an admin-issued token".to_string(),
            ))
            .into_response();
        }
        Ok(_) => {}
        Err(e) => return ApiError::from(e).into_response(),
    }

    // 5. Scope check with the ancestor-grant rule.
    match state
        .features
        .token_has_feature_access(&validated.feature_ids, feature_slug)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return ApiError::from(GatewayError::Forbidden(format!(
                "token does not have access to feature '{feature_slug}'"
            )))
            .into_response();
        }
        Err(e) => return ApiError::from(e).into_response(),
    }

    // 6. IP pin.
    if !validated.allowed_ips.is_empty() {
        let client_ip = client_ip(&request);
        let canonical = client_ip.as_deref().map(canonicalize_ip);
        match canonical {
            Some(Ok(ip)) if is_ip_allowed(&ip, &validated.allowed_ips) => {}
            Some(Ok(_)) => {
                return ApiError::from(GatewayError::Forbidden(
                    "IP address not allowed for this token".to_string(),
                ))
                .into_response();
            }
            _ => {
                return ApiError::from(GatewayError::Forbidden(
                    "invalid client IP".to_string(),
                ))
                .into_response();
            }
        }
    }

    // 7. Sliding-window quota.
    let effective_rpm = match state
        .quota
        .effective_rpm(validated.user.id, feature.id)
        .await
    {
        Ok(rpm) => rpm,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let mut rate_headers = None;
    if effective_rpm != UNLIMITED_RPM {
        let current = match state
            .usage
            .feature_rpm(validated.user.id, feature.id)
            .await
        {
            Ok(count) => count,
            Err(e) => return ApiError::from(e).into_response(),
        };

        let remaining = (effective_rpm - current - 1).max(0);
        let reset = (Utc::now() + chrono::Duration::seconds(60)).timestamp();
        rate_headers = Some((effective_rpm, remaining, reset));

        if current >= effective_rpm {
            return rate_limit_exceeded(effective_rpm, reset);
        }
    }

    // 8. Record usage after admission; the buffered writer makes this
    //    non-blocking for the request.
    state.usage.record(validated.user.id, feature.id);

    request.extensions_mut().insert(CurrentUser(validated.user));
    request.extensions_mut().insert(CurrentToken(validated.token));

    let mut response = next.run(request).await;
    if let Some((limit, remaining, reset)) = rate_headers {
        set_rate_headers(response.headers_mut(), limit, remaining, reset);
    }
    response
}

fn bearer_token(request: &Request<Body>) -> std::result::Result<String, GatewayError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::Unauthenticated)?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or(GatewayError::Unauthenticated)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(GatewayError::Unauthenticated);
    }
    Ok(token.to_string())
}

/// Client address: forwarded headers first, then the socket peer.
fn client_ip(request: &Request<Body>) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
    {
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn set_rate_headers(
    headers: &mut axum::http::HeaderMap,
    limit: i64,
    remaining: i64,
    reset: i64,
) {
    let entries = [
        (HEADER_RATE_LIMIT_LIMIT, limit),
        (HEADER_RATE_LIMIT_REMAINING, remaining),
        (HEADER_RATE_LIMIT_RESET, reset),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}

/// 429 response with the fixed denial body and headers.
fn rate_limit_exceeded(limit: i64, reset: i64) -> Response {
    let body = serde_json::json!({
        "error": "rate limit exceeded",
        "limit": limit,
        "retryAfter": 60,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    let headers = response.headers_mut();
    set_rate_headers(headers, limit, 0, reset);
    headers.insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
    response
}

/// Session guard for the account surface. Clears the cookie whenever the
/// session is rejected so browsers stop replaying it.
pub async fn session_guard(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session_id = match session_id_from_request(&request) {
        Some(id) => id,
        None => return ApiError::from(GatewayError::Unauthenticated).into_response(),
    };

    let user = match state.sessions.user_for(&session_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return with_cleared_cookie(
                &state,
                ApiError::from(GatewayError::Unauthenticated).into_response(),
            );
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    if user.status != UserStatus::Active {
        return with_cleared_cookie(
            &state,
            ApiError::from(GatewayError::UserNotActive(user.status)).into_response(),
        );
    }

    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

/// Loads the session if one is present and valid; never rejects.
pub async fn optional_session(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(session_id) = session_id_from_request(&request) {
        if let Ok(Some(user)) = state.sessions.user_for(&session_id).await {
            if user.status == UserStatus::Active {
                request.extensions_mut().insert(CurrentUser(user));
            }
        }
    }
    next.run(request).await
}

/// Role guard; runs after `session_guard`. `admin` passes any requirement.
pub async fn role_guard(
    State(required): State<Role>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(CurrentUser(user)) = request.extensions().get::<CurrentUser>().cloned() else {
        return ApiError::from(GatewayError::Unauthenticated).into_response();
    };

    if user.role != required && user.role != Role::Admin {
        return ApiError::from(GatewayError::Forbidden(format!(
            "requires {required} role"
        )))
        .into_response();
    }

    next.run(request).await
}

fn session_id_from_request(request: &Request<Body>) -> Option<String> {
    let header = request.headers().get(header::COOKIE)?.to_str().ok()?;
    let id = cookie_value(header, SESSION_COOKIE)?;
    (!id.is_empty()).then(|| id.to_string())
}

fn with_cleared_cookie(state: &AppState, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&state.sessions.clear_session_cookie()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}
