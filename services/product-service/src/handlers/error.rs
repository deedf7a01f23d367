use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use catalog::ProductError;
use domain::DomainError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// HTTP face of a [`ProductError`]
#[derive(Debug)]
pub struct ApiError(pub ProductError);

impl From<ProductError> for ApiError {
    fn from(err: ProductError) -> Self {
        ApiError(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ProductError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            ProductError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ProductError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            ProductError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ProductError::PublishFailed(_) => (StatusCode::BAD_GATEWAY, "publish_failed"),
            ProductError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            ProductError::CacheUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let message = match &self.0 {
            ProductError::Conflict { .. } => {
                format!("{}; re-read the product and retry later", self.0)
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}
