use super::params::ErrorResponse;
use crate::source::SourceError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error("Invalid filename")]
    InvalidFilename,

    #[error("{0}")]
    NotFound(String),

    #[error("Requested range not satisfiable for {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("Job queue closed")]
    QueueClosed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Validation(_) | ApiError::Source(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Json(rejection) => rejection.status(),
            ApiError::InvalidFilename => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::QueueClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ApiError::Json(rejection) => rejection.body_text(),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::ModelNotLoaded.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Validation("fps must be greater than 0".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Source(SourceError::UnsupportedScheme).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::InvalidFilename.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::NotFound("File not found".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_model_not_loaded_detail() {
        assert_eq!(ApiError::ModelNotLoaded.to_string(), "Model not loaded");
    }
}
