//! HTTP error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request signature")]
    InvalidSignature,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}
