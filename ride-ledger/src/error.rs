//! 账本错误类型与 HTTP 映射

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use shared::bus::BusError;
use shared::types::{RideId, RideStatus};

use crate::store::StoreError;

/// 账本层错误
///
/// OTP 不匹配和状态不符都是预期结果：同一司机可重试 OTP，
/// 它们不会被记成系统故障。
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ride not found: {0}")]
    NotFound(RideId),

    #[error("OTP mismatch")]
    OtpMismatch,

    #[error("Invalid ride state: expected {expected}, found {actual}")]
    InvalidState {
        expected: RideStatus,
        actual: RideStatus,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// 统一错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// 接单竞争落败 (409)
    pub fn ride_taken() -> Self {
        Self::new("E0004", "Ride no longer available")
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            LedgerError::Validation(msg) => (StatusCode::BAD_REQUEST, "E0002", msg.clone()),

            LedgerError::OtpMismatch => (
                StatusCode::UNAUTHORIZED,
                "E3004",
                "OTP verification failed".to_string(),
            ),

            LedgerError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "E0003",
                format!("Ride {} not found", id),
            ),

            LedgerError::InvalidState { expected, actual } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "E0005",
                format!("Ride must be {} but is {}", expected, actual),
            ),

            LedgerError::Store(e) => {
                error!(target: "ledger", error = %e, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9002",
                    "Storage error".to_string(),
                )
            }

            LedgerError::Bus(e) => {
                error!(target: "ledger", error = %e, "Bus publish error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9001",
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody::new(code, message))).into_response()
    }
}
