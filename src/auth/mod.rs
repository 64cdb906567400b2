//! Authentication building blocks: the OAuth broker, canonical IP handling
//! and the request guards composing the store components.

pub mod ip;
mod middleware;
mod oauth;

pub use middleware::{
    optional_session, role_guard, session_guard, token_guard, CurrentToken, CurrentUser,
    HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
};
pub use oauth::{ExchangedToken, OauthBroker, OauthUserInfo, ProviderCredentials};
