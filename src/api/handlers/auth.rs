//! Login flow and account endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::api::{success, ApiError};
use crate::auth::{CurrentUser, OauthUserInfo};
use crate::domain::{OauthProvider, User, UserStatus};
use crate::infra::{cookie_value, GatewayError, Result, STATE_COOKIE, STATE_EXPIRY_SECS};
use crate::server::AppState;

fn parse_provider(provider: &str) -> Result<OauthProvider> {
    OauthProvider::parse(provider)
        .ok_or_else(|| GatewayError::ProviderUnsupported(provider.to_string()))
}

/// GET /auth/login/:provider — redirect to the provider's consent screen.
///
/// The CSRF state is double-booked: one copy in the store, one in a
/// short-lived cookie. The callback requires both to agree.
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    if !state.oauth.is_configured(provider) {
        return Err(GatewayError::ProviderNotConfigured(provider.to_string()).into());
    }

    let oauth_state = state.states.create().await?;
    let auth_url = state.oauth.auth_url(provider, &oauth_state)?;

    let state_cookie = state
        .sessions
        .cookie(STATE_COOKIE, &oauth_state, STATE_EXPIRY_SECS);

    let mut response = (StatusCode::TEMPORARY_REDIRECT, ()).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&auth_url)
            .map_err(|e| GatewayError::Internal(format!("auth url header: {e}")))?,
    );
    if let Ok(value) = HeaderValue::from_str(&state_cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /auth/callback/:provider — complete the OAuth round trip.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: axum::http::HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    if !state.oauth.is_configured(provider) {
        return Err(GatewayError::ProviderNotConfigured(provider.to_string()).into());
    }

    // Both sides of the CSRF check: cookie equals query, and the stored row
    // is consumed exactly once.
    let cookie_state = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| cookie_value(h, STATE_COOKIE))
        .unwrap_or_default();
    if cookie_state.is_empty() || query.state != cookie_state {
        return Err(GatewayError::StateInvalid.into());
    }
    if !state.states.validate(&query.state).await? {
        return Err(GatewayError::StateInvalid.into());
    }

    if let Some(provider_error) = query.error.filter(|e| !e.is_empty()) {
        return Err(GatewayError::BadInput(format!("OAuth error: {provider_error}")).into());
    }
    if query.code.is_empty() {
        return Err(GatewayError::BadInput("missing authorization code".to_string()).into());
    }

    let exchanged = state.oauth.exchange_code(provider, &query.code).await?;
    let info = state.oauth.user_info(provider, &exchanged.access_token).await?;

    let user = find_or_create_user(
        &state,
        provider,
        &info,
        &exchanged.access_token,
        exchanged.refresh_token.as_deref(),
    )
    .await?;

    if user.status != UserStatus::Active {
        return Err(GatewayError::UserNotActive(user.status).into());
    }

    let session = state.sessions.create(user.id).await?;

    let body = success(json!({
        "message": "authenticated successfully",
        "user": {
            "id": user.id,
            "email": user.email,
            "displayName": user.display_name,
            "role": user.role,
        },
    }));

    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&state.sessions.session_cookie(&session.id)) {
        headers.append(header::SET_COOKIE, value);
    }
    // The state cookie has served its purpose.
    if let Ok(value) = HeaderValue::from_str(&state.sessions.cookie(STATE_COOKIE, "", -1)) {
        headers.append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// Resolves the login to a user: existing identity, existing account by
/// email, or a brand-new user in the group the email domain dictates.
async fn find_or_create_user(
    state: &AppState,
    provider: OauthProvider,
    info: &OauthUserInfo,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<User> {
    if let Some(identity) = state
        .identity
        .oauth_identity(provider, &info.provider_id)
        .await?
    {
        state
            .identity
            .update_oauth_identity_tokens(identity.id, Some(access_token), refresh_token)
            .await?;
        return state
            .identity
            .user_by_id(identity.user_id)
            .await?
            .ok_or(GatewayError::UserNotFound);
    }

    let email = info.email.to_lowercase();
    if let Some(user) = state.identity.user_by_email(&email).await? {
        state
            .identity
            .create_oauth_identity(
                user.id,
                provider,
                &info.provider_id,
                Some(access_token),
                refresh_token,
            )
            .await?;
        return state
            .identity
            .user_by_id(user.id)
            .await?
            .ok_or(GatewayError::UserNotFound);
    }

    let group_id = determine_group(state, &email).await;
    let user = state
        .identity
        .create_user(&email, &info.display_name, group_id)
        .await?;
    state
        .identity
        .create_oauth_identity(
            user.id,
            provider,
            &info.provider_id,
            Some(access_token),
            refresh_token,
        )
        .await?;

    state
        .identity
        .user_by_id(user.id)
        .await?
        .ok_or(GatewayError::UserNotFound)
}

/// Group policy at signup: academic domains promote, everything else is
/// regular, and any lookup failure falls back to group id 1.
async fn determine_group(state: &AppState, email: &str) -> i64 {
    const FALLBACK_GROUP_ID: i64 = 1;

    let group_name = match email.rsplit_once('@') {
        Some((_, domain)) => {
            let domain = domain.to_lowercase();
            match state.identity.is_academic_domain(&domain).await {
                Ok(true) => "academic",
                Ok(false) => "regular",
                Err(_) => return FALLBACK_GROUP_ID,
            }
        }
        None => "regular",
    };

    match state.identity.group_by_name(group_name).await {
        Ok(Some(group)) => group.id,
        _ => FALLBACK_GROUP_ID,
    }
}

/// GET /auth/me — the session's user.
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> impl IntoResponse {
    success(json!({ "user": user }))
}

/// GET /auth/logout — destroy the session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> std::result::Result<Response, ApiError> {
    if let Some(session_id) = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| cookie_value(h, crate::infra::SESSION_COOKIE))
    {
        if !session_id.is_empty() {
            state.sessions.delete(session_id).await?;
        }
    }

    let mut response = success(json!({ "message": "logged out successfully" })).into_response();
    if let Ok(value) = HeaderValue::from_str(&state.sessions.clear_session_cookie()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}
