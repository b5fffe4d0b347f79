//! 匹配服务错误类型与 HTTP 映射

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Driver not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

pub type MatcherResult<T> = Result<T, MatcherError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for MatcherError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            MatcherError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "E0003",
                format!("Driver {} not found", id),
            ),
            MatcherError::Store(e) => {
                error!(target: "matcher", error = %e, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9002",
                    "Storage error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
