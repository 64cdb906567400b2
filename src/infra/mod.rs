//! Store-backed components of the gateway core.
//!
//! One module per component:
//! - Identity store (users, groups, academic domains, OAuth identities)
//! - Feature registry (hierarchical permission scopes)
//! - Session registry (cookie-bound server-side sessions)
//! - OAuth state registry (single-use CSRF states)
//! - Token service (opaque bearer tokens)
//! - Quota engine + usage tracker (effective RPM and the sliding window)

mod error;
mod features;
mod identity;
mod oauth_state;
mod quota;
mod sessions;
mod tokens;
mod usage;

pub use error::{ErrorKind, GatewayError, Result};
pub use features::FeatureRegistry;
pub use identity::IdentityStore;
pub use oauth_state::{OauthStateStore, STATE_COOKIE, STATE_EXPIRY_SECS};
pub use quota::{QuotaEngine, RpmQuota, DEFAULT_SYSTEM_RPM, UNLIMITED_RPM};
pub use sessions::{
    cookie_value, SessionStore, DEFAULT_SESSION_DURATION_SECS, SESSION_COOKIE,
};
pub use tokens::{hash_token, TokenStore, TOKEN_PREFIX};
pub use usage::{
    UsageTracker, USAGE_BUFFER_SIZE, USAGE_CLEANUP_INTERVAL, USAGE_FLUSH_BATCH,
    USAGE_FLUSH_INTERVAL, USAGE_RETENTION_SECS,
};

/// Fresh in-memory auth store with migrations applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    crate::migrations::run(&pool).await.expect("migrations");
    pool
}
