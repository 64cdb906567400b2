//! HTTP surface of the gateway.

mod error;
pub mod handlers;
mod response;

pub use error::{status_for, ApiError};
pub use response::{success, ApiResponse, Metadata, API_VERSION};

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::auth::{role_guard, session_guard};
use crate::domain::Role;
use crate::server::AppState;

/// Builds the `/auth` and `/admin` route tree. The caller nests this under
/// `/api`. Feature endpoints belong to their own routers, each layered with
/// the token guard and a fixed feature slug.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/login/:provider", get(handlers::auth::login))
        .route("/auth/callback/:provider", get(handlers::auth::callback));

    let session_protected = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", get(handlers::auth::logout))
        .route("/auth/tokens", get(handlers::tokens::list_tokens))
        .route(
            "/auth/tokens/features",
            get(handlers::tokens::list_assignable_features),
        )
        .route("/auth/tokens", post(handlers::tokens::create_token))
        .route("/auth/tokens/:id", delete(handlers::tokens::revoke_token))
        .layer(from_fn_with_state(state.clone(), session_guard));

    let admin = Router::new()
        .route("/admin/groups", get(handlers::admin::list_groups))
        .route("/admin/groups", post(handlers::admin::create_group))
        .route("/admin/groups/:id", get(handlers::admin::get_group))
        .route("/admin/groups/:id", patch(handlers::admin::update_group))
        .route("/admin/groups/:id", delete(handlers::admin::delete_group))
        .route(
            "/admin/groups/:id/quotas",
            get(handlers::admin::get_group_quotas),
        )
        .route(
            "/admin/groups/:id/quotas",
            put(handlers::admin::set_group_quotas),
        )
        .route("/admin/features", get(handlers::admin::list_features))
        .route("/admin/features", post(handlers::admin::create_feature))
        .route("/admin/features/:id", get(handlers::admin::get_feature))
        .route("/admin/features/:id", patch(handlers::admin::update_feature))
        .route("/admin/features/:id", delete(handlers::admin::delete_feature))
        .route(
            "/admin/academic-domains",
            get(handlers::admin::list_academic_domains),
        )
        .route(
            "/admin/academic-domains",
            post(handlers::admin::add_academic_domain),
        )
        .route(
            "/admin/academic-domains/:domain",
            delete(handlers::admin::remove_academic_domain),
        )
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/users/:id", get(handlers::admin::get_user))
        .route("/admin/users/:id", patch(handlers::admin::update_user))
        .route(
            "/admin/users/:id/quotas",
            get(handlers::admin::get_user_quotas),
        )
        .route(
            "/admin/users/:id/quotas",
            put(handlers::admin::set_user_quotas),
        )
        .route("/admin/users/:id/usage", get(handlers::admin::get_user_usage))
        .route(
            "/admin/users/:id/tokens",
            get(handlers::admin::list_user_tokens),
        )
        .route(
            "/admin/users/:id/tokens",
            post(handlers::admin::create_user_token),
        )
        .route("/admin/tokens/:id", delete(handlers::admin::revoke_token))
        // Session first, then the role check on the authenticated user.
        .layer(from_fn_with_state(Role::Admin, role_guard))
        .layer(from_fn_with_state(state.clone(), session_guard));

    Router::new()
        .merge(public)
        .merge(session_protected)
        .merge(admin)
        .with_state(state)
}
