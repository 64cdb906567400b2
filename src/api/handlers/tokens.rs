//! Token management for the session's own user.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::{success, ApiError};
use crate::auth::CurrentUser;
use crate::domain::TokenCreateRequest;
use crate::infra::GatewayError;
use crate::server::AppState;

/// GET /auth/tokens
pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let tokens = state.tokens.list_for_user(user.id).await?;
    Ok(success(json!({ "tokens": tokens })))
}

/// GET /auth/tokens/features — features a user may scope a token to.
pub async fn list_assignable_features(
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let features = state.features.assignable_to_users().await?;
    Ok(success(json!({ "features": features })))
}

/// POST /auth/tokens
pub async fn create_token(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(request): Json<TokenCreateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let issued = state
        .tokens
        .create_user_token(
            user.id,
            &request.label,
            &request.features,
            &request.allowed_ips,
            request.expires_at,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        success(json!({
            "token": issued.raw_token,
            "details": issued.token,
            "message": "Token created. Save this token now - it will not be shown again.",
        })),
    ))
}

/// DELETE /auth/tokens/:id
pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(token_id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let token_id: i64 = token_id
        .parse()
        .map_err(|_| GatewayError::BadInput("invalid token ID".to_string()))?;

    state.tokens.revoke(token_id, user.id).await?;
    Ok(success(json!({ "message": "Token revoked successfully" })))
}
