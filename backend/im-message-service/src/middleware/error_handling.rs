//! JSON error bodies for `AppError`.

use crate::error::AppError;
use crate::models::message::MessageStatus;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error name, e.g. "Not Found"
    pub error: String,
    pub message: String,
    pub status: u16,
    /// One of "validation_error", "authentication_error", "authorization_error",
    /// "not_found_error", "conflict_error", "server_error", "service_unavailable_error"
    pub error_type: String,
    /// Stable code such as "ALREADY_RECALLED"
    pub code: String,
    /// Current message status for lifecycle conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<MessageStatus>,
    pub timestamp: String,
}

fn error_type(status: u16) -> &'static str {
    match status {
        400 => "validation_error",
        401 => "authentication_error",
        403 => "authorization_error",
        404 => "not_found_error",
        409 | 410 => "conflict_error",
        502 | 503 => "service_unavailable_error",
        _ => "server_error",
    }
}

impl ErrorResponse {
    pub fn from_error(err: &AppError) -> Self {
        let status = err.status_code();
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error");

        // Infrastructure details stay in the logs.
        let message = match err {
            AppError::Database(_) | AppError::Config(_) | AppError::StartServer(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let current_status = match err {
            AppError::AlreadyRecalled => Some(MessageStatus::Recalled),
            AppError::AlreadyDeleted => Some(MessageStatus::Deleted),
            AppError::StatusConflict { current } => Some(*current),
            _ => None,
        };

        Self {
            error: reason.to_string(),
            message,
            status,
            error_type: error_type(status).to_string(),
            code: err.code().to_string(),
            current_status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let body = ErrorResponse::from_error(err);
    if body.status >= 500 {
        tracing::error!(error = %err, code = %body.code, "request failed");
    } else {
        tracing::debug!(error = %err, code = %body.code, "request rejected");
    }

    let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(body)
}
