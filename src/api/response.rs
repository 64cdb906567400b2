//! Response envelope shared by every JSON endpoint.
//!
//! `{data, errors, metadata}` with a fresh request id unless the caller
//! cascades one from further up the stack.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const API_VERSION: &str = "v0";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub data: serde_json::Value,
    pub errors: Vec<String>,
    pub metadata: Metadata,
}

impl ApiResponse {
    pub fn new(data: serde_json::Value, errors: Vec<String>, request_id: Option<String>) -> Self {
        Self {
            data,
            errors,
            metadata: Metadata {
                timestamp: Utc::now(),
                version: API_VERSION,
                request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            },
        }
    }

    pub fn success(data: serde_json::Value) -> Self {
        Self::new(data, Vec::new(), None)
    }

    pub fn error(errors: Vec<String>) -> Self {
        Self::new(serde_json::Value::Null, errors, None)
    }
}

/// Success envelope as an axum JSON body.
pub fn success(data: serde_json::Value) -> axum::Json<ApiResponse> {
    axum::Json(ApiResponse::success(data))
}
