//! Admin surface: groups, features, academic domains, users, quotas, tokens.
//!
//! Every route here sits behind the session guard plus the admin role guard.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::{success, ApiError};
use crate::domain::{
    FeatureCreateRequest, FeatureUpdateRequest, GroupCreateRequest, GroupUpdateRequest,
    QuotaSetRequest, TokenCreateRequest, UserUpdateRequest,
};
use crate::infra::GatewayError;
use crate::server::AppState;

fn parse_id(raw: &str, what: &str) -> std::result::Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| GatewayError::BadInput(format!("invalid {what} ID")).into())
}

// --- groups ---

/// GET /admin/groups
pub async fn list_groups(
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let groups = state.identity.all_groups().await?;
    Ok(success(json!({ "groups": groups })))
}

/// GET /admin/groups/:id
pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "group")?;
    let group = state
        .identity
        .group_by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("group"))?;
    Ok(success(json!({ "group": group })))
}

/// POST /admin/groups
pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<GroupCreateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if request.name.trim().is_empty() {
        return Err(GatewayError::BadInput("group name is required".to_string()).into());
    }
    if request.default_rpm < 1 {
        return Err(GatewayError::BadInput("defaultRpm must be at least 1".to_string()).into());
    }

    let group = state
        .identity
        .create_group(
            request.name.trim(),
            request.default_rpm,
            request.description.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, success(json!({ "group": group }))))
}

/// PATCH /admin/groups/:id
pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<GroupUpdateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "group")?;
    if let Some(rpm) = request.default_rpm {
        if rpm < 1 {
            return Err(GatewayError::BadInput("defaultRpm must be at least 1".to_string()).into());
        }
    }

    state
        .identity
        .update_group(
            id,
            request.name.as_deref(),
            request.default_rpm,
            request.description.as_deref(),
        )
        .await?;

    let group = state
        .identity
        .group_by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("group"))?;
    Ok(success(json!({ "group": group })))
}

/// DELETE /admin/groups/:id
pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "group")?;
    state.identity.delete_group(id).await?;
    Ok(success(json!({ "message": "group deleted" })))
}

/// GET /admin/groups/:id/quotas
pub async fn get_group_quotas(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "group")?;
    let quotas = state.quota.group_quotas(id).await?;
    Ok(success(json!({ "quotas": quotas })))
}

/// PUT /admin/groups/:id/quotas
pub async fn set_group_quotas(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<QuotaSetRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "group")?;
    state.quota.bulk_set_group_quotas(id, &request.quotas).await?;
    Ok(success(json!({ "message": "quotas updated" })))
}

// --- features ---

/// GET /admin/features
pub async fn list_features(
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let features = state.features.all().await?;
    Ok(success(json!({ "features": features })))
}

/// GET /admin/features/:id
pub async fn get_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "feature")?;
    let feature = state
        .features
        .by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("feature"))?;
    Ok(success(json!({ "feature": feature })))
}

/// POST /admin/features
pub async fn create_feature(
    State(state): State<AppState>,
    Json(request): Json<FeatureCreateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if request.slug.trim().is_empty() || request.name.trim().is_empty() {
        return Err(GatewayError::BadInput("slug and name are required".to_string()).into());
    }

    let feature = state
        .features
        .create(
            request.slug.trim(),
            request.name.trim(),
            request.parent_id,
            request.admin_only,
        )
        .await?;
    Ok((StatusCode::CREATED, success(json!({ "feature": feature }))))
}

/// PATCH /admin/features/:id
pub async fn update_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FeatureUpdateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "feature")?;
    state
        .features
        .update(id, request.name.as_deref(), request.parent_id, request.admin_only)
        .await?;

    let feature = state
        .features
        .by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("feature"))?;
    Ok(success(json!({ "feature": feature })))
}

/// DELETE /admin/features/:id
pub async fn delete_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "feature")?;
    state.features.delete(id).await?;
    Ok(success(json!({ "message": "feature deleted" })))
}

// --- academic domains ---

/// GET /admin/academic-domains
pub async fn list_academic_domains(
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let domains = state.identity.all_academic_domains().await?;
    Ok(success(json!({ "domains": domains })))
}

#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

/// POST /admin/academic-domains
pub async fn add_academic_domain(
    State(state): State<AppState>,
    Json(request): Json<DomainRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if request.domain.trim().is_empty() {
        return Err(GatewayError::BadInput("domain is required".to_string()).into());
    }
    state.identity.add_academic_domain(request.domain.trim()).await?;
    Ok((StatusCode::CREATED, success(json!({ "message": "domain added" }))))
}

/// DELETE /admin/academic-domains/:domain
pub async fn remove_academic_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    state.identity.remove_academic_domain(&domain).await?;
    Ok(success(json!({ "message": "domain removed" })))
}

// --- users ---

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let limit = page.limit.unwrap_or(50).clamp(1, 100);
    let offset = page.offset.unwrap_or(0).max(0);

    let users = state.identity.all_users(limit, offset).await?;
    Ok(success(json!({
        "users": users,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    let user = state
        .identity
        .user_by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("user"))?;
    Ok(success(json!({ "user": user })))
}

/// PATCH /admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UserUpdateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    if let Some(max_tokens) = request.max_tokens {
        if max_tokens < 0 {
            return Err(GatewayError::BadInput("maxTokens must be >= 0".to_string()).into());
        }
    }

    state
        .identity
        .update_user(
            id,
            request.role,
            request.status,
            request.group_id,
            request.max_tokens,
        )
        .await?;

    let user = state
        .identity
        .user_by_id(id)
        .await?
        .ok_or(GatewayError::NotFound("user"))?;
    Ok(success(json!({ "user": user })))
}

/// GET /admin/users/:id/quotas
pub async fn get_user_quotas(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    let overrides = state.quota.user_overrides(id).await?;
    Ok(success(json!({ "overrides": overrides })))
}

/// PUT /admin/users/:id/quotas
pub async fn set_user_quotas(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<QuotaSetRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    state.quota.bulk_set_user_overrides(id, &request.quotas).await?;
    Ok(success(json!({ "message": "quotas updated" })))
}

/// GET /admin/users/:id/usage — sliding-window stats for one user.
pub async fn get_user_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    let by_feature = state.usage.usage_stats(id).await?;
    let total_rpm = state.usage.user_total_rpm(id).await?;
    Ok(success(json!({
        "totalRpm": total_rpm,
        "byFeature": by_feature,
    })))
}

/// GET /admin/users/:id/tokens
pub async fn list_user_tokens(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    let tokens = state.tokens.list_for_user(id).await?;
    Ok(success(json!({ "tokens": tokens })))
}

/// POST /admin/users/:id/tokens — admin issuance, no quota or admin-only
/// restrictions.
pub async fn create_user_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TokenCreateRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "user")?;
    let issued = state
        .tokens
        .create_admin_token(
            id,
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
            "message": "Admin token created. Save this token now - it will not be shown again.",
        })),
    ))
}

/// DELETE /admin/tokens/:id — revoke any token.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "token")?;
    state.tokens.admin_revoke(id).await?;
    Ok(success(json!({ "message": "Token revoked successfully" })))
}
