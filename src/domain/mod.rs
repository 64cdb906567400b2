//! Domain models for the gateway.
//!
//! Entities mirror the auth store schema; request types mirror the JSON
//! bodies accepted by the HTTP surface.

mod types;

pub use types::*;
