//! Error types for the gateway core.
//!
//! Every component returns `GatewayError` values carrying an [`ErrorKind`];
//! only the HTTP boundary converts kinds into status codes.

use thiserror::Error;

use crate::domain::UserStatus;

/// Errors surfaced by the gateway core.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Store failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // --- token issuance ---
    /// Token label missing after trimming
    #[error("token label is required")]
    LabelRequired,

    /// Issuance or validation referenced a user that does not exist
    #[error("user not found")]
    UserNotFound,

    /// Active token count reached the user's ceiling
    #[error("maximum token limit ({0}) reached")]
    TokenQuotaExhausted(i64),

    /// One or more requested feature slugs do not exist
    #[error("one or more features not found")]
    FeatureUnknown,

    /// Token issuance must name at least one feature
    #[error("at least one valid feature is required")]
    FeatureRequired,

    /// Non-admin issuance requested an admin-only feature
    #[error("feature '{0}' is admin-only and cannot be assigned by users")]
    FeatureAdminOnly(String),

    /// Allowed-IP entry did not parse as an IP address
    #[error("invalid IP address: {0}")]
    IpInvalid(String),

    // --- token validation ---
    /// Presented token lacks the expected prefix
    #[error("invalid token format")]
    TokenFormatInvalid,

    /// No token row matches the presented hash
    #[error("invalid token")]
    TokenUnknown,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("token has expired")]
    TokenExpired,

    /// Revocation matched no live row for the caller
    #[error("token not found or already revoked")]
    TokenNotFoundOrRevoked,

    /// Token owner is not active
    #[error("user account is {0}")]
    UserNotActive(UserStatus),

    // --- oauth ---
    /// Provider outside the closed {google, github} set
    #[error("unsupported provider: {0}")]
    ProviderUnsupported(String),

    /// Provider known but its client credentials are absent
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// Provider response failed the normalization contract
    #[error("invalid user data from provider: {0}")]
    ProviderUserDataInvalid(String),

    /// Code exchange or userinfo call failed at the provider
    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    /// OAuth state absent, mismatched, expired, or already consumed
    #[error("invalid or expired OAuth state")]
    StateInvalid,

    // --- guards ---
    #[error("not authenticated")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Effective RPM reached; carries the limit for the denial body
    #[error("rate limit exceeded")]
    RateLimited { limit: i64 },

    #[error("{0}")]
    BadInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse error classification; each kind maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    Unauthenticated,
    Forbidden,
    NotFound,
    RateLimited,
    Internal,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::LabelRequired
            | GatewayError::TokenQuotaExhausted(_)
            | GatewayError::FeatureUnknown
            | GatewayError::FeatureRequired
            | GatewayError::FeatureAdminOnly(_)
            | GatewayError::IpInvalid(_)
            | GatewayError::TokenNotFoundOrRevoked
            | GatewayError::ProviderUnsupported(_)
            | GatewayError::ProviderNotConfigured(_)
            | GatewayError::StateInvalid
            | GatewayError::BadInput(_) => ErrorKind::BadInput,

            GatewayError::TokenFormatInvalid
            | GatewayError::TokenUnknown
            | GatewayError::TokenRevoked
            | GatewayError::TokenExpired
            | GatewayError::Unauthenticated => ErrorKind::Unauthenticated,

            GatewayError::UserNotActive(_) | GatewayError::Forbidden(_) => ErrorKind::Forbidden,

            GatewayError::UserNotFound | GatewayError::NotFound(_) => ErrorKind::NotFound,

            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,

            GatewayError::Database(_)
            | GatewayError::ProviderUserDataInvalid(_)
            | GatewayError::ProviderRequest(_)
            | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }
}
