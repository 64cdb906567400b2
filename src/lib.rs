//! osduth-gateway
//!
//! Authentication, authorization and quota enforcement for the OSDUTH
//! student-app API.
//!
//! ## Modules
//!
//! - [`domain`] - Entities and request types
//! - [`infra`] - Store-backed components (identity, sessions, features,
//!   tokens, quota, usage)
//! - [`auth`] - OAuth broker, IP canonicalization and request guards
//! - [`api`] - Response envelope, error mapping, handlers and router
//! - [`server`] - Configuration and process bootstrap

pub mod api;
pub mod auth;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod server;

// Re-export commonly used types
pub use domain::{
    Feature, Group, OauthIdentity, OauthProvider, Role, Session, Token, User, UserStatus,
    ValidatedToken,
};
pub use infra::{ErrorKind, GatewayError, Result};
pub use server::{AppState, Config};
