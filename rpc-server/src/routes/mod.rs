//! HTTP route handlers

pub mod grid;
pub mod health;
pub mod scan;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use gs_core::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn map_error(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        Error::MissingField(_) | Error::InvalidInput(_) | Error::UnsupportedFormat(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::ComponentNotFound(_) => StatusCode::NOT_FOUND,
        Error::RoleViolation(_) | Error::AlreadyRunning | Error::AlreadyCleanedUp => {
            StatusCode::CONFLICT
        }
        Error::RpcTransport(_) => StatusCode::BAD_GATEWAY,
        Error::Io(_) | Error::Serialization(_) | Error::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
