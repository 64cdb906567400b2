//! Conversion of core errors into HTTP responses.
//!
//! This is the only layer that turns [`ErrorKind`] into status codes; the
//! stores and guards never see HTTP.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::api::response::ApiResponse;
use crate::infra::{ErrorKind, GatewayError};

/// Wrapper making `GatewayError` an axum response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        // Rate limiting has a fixed denial body instead of the envelope.
        if let GatewayError::RateLimited { limit } = &self.0 {
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "limit": limit,
                "retryAfter": 60,
            });
            let mut response = (status, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
            return response;
        }

        // Store and provider failures keep their detail in the log, not in
        // the response body.
        let message = if kind == ErrorKind::Internal {
            error!(error = %self.0, "internal error");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ApiResponse::error(vec![message]))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_fixed_statuses() {
        assert_eq!(status_for(ErrorKind::BadInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rate_limited_response_has_retry_after() {
        let response = ApiError(GatewayError::RateLimited { limit: 60 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
    }

    #[test]
    fn internal_detail_stays_out_of_the_body() {
        let response =
            ApiError(GatewayError::Internal("pool exhausted at 10.0.0.5".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
