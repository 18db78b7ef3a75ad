use crate::middleware::error_handling;
use crate::models::message::MessageStatus;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use tokio_postgres::error::SqlState;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(i64),

    #[error("invalid message type: {0}")]
    InvalidMessageType(i16),

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {max_bytes} bytes")]
    ContentTooLong { max_bytes: usize },

    #[error("unauthorized")]
    Unauthorized,

    #[error("users are not friends")]
    NotFriends,

    #[error("only the sender may recall a message")]
    NotMessageSender,

    #[error("user is not a participant of this conversation")]
    NotParticipant,

    #[error("not found")]
    NotFound,

    #[error("message already recalled")]
    AlreadyRecalled,

    #[error("message already deleted")]
    AlreadyDeleted,

    #[error("recall window expired (created_at: {created_at}, window_secs: {window_secs})")]
    RecallWindowExpired {
        created_at: chrono::DateTime<chrono::Utc>,
        window_secs: i64,
    },

    #[error("status conflict: message is {current:?}")]
    StatusConflict { current: MessageStatus },

    #[error("database error: {0}")]
    Database(String),

    #[error("transaction conflict: {0}")]
    Transaction(String),

    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Races between first-contact inserts or concurrent updates surface as
        // these codes and are safe to retry as a whole unit.
        match e.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED
                    || *code == SqlState::UNIQUE_VIOLATION =>
            {
                AppError::Transaction(e.to_string())
            }
            _ => AppError::Database(e.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Backend(inner) => inner.into(),
            deadpool_postgres::PoolError::Timeout(kind) => {
                AppError::ServiceUnavailable(format!("database pool timeout: {kind:?}"))
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<db_pool::DbPoolError> for AppError {
    fn from(e: db_pool::DbPoolError) -> Self {
        AppError::StartServer(format!("db: {e}"))
    }
}

impl AppError {
    /// Returns whether the failed unit of work may be retried as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transaction(_))
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidUserId(_)
            | AppError::InvalidMessageType(_)
            | AppError::EmptyContent
            | AppError::ContentTooLong { .. } => 400,
            AppError::Unauthorized => 401,
            AppError::NotFriends
            | AppError::NotMessageSender
            | AppError::NotParticipant
            | AppError::RecallWindowExpired { .. } => 403,
            AppError::NotFound => 404,
            AppError::StatusConflict { .. } | AppError::Transaction(_) => 409,
            AppError::AlreadyRecalled | AppError::AlreadyDeleted => 410, // 410 Gone
            AppError::Upstream(_) => 502,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_) => 500,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::StartServer(_) => "START_SERVER",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::InvalidUserId(_) => "INVALID_USER_ID",
            AppError::InvalidMessageType(_) => "INVALID_MESSAGE_TYPE",
            AppError::EmptyContent => "EMPTY_CONTENT",
            AppError::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFriends => "NOT_FRIENDS",
            AppError::NotMessageSender => "NOT_MESSAGE_SENDER",
            AppError::NotParticipant => "NOT_PARTICIPANT",
            AppError::NotFound => "NOT_FOUND",
            AppError::AlreadyRecalled => "ALREADY_RECALLED",
            AppError::AlreadyDeleted => "ALREADY_DELETED",
            AppError::RecallWindowExpired { .. } => "RECALL_WINDOW_EXPIRED",
            AppError::StatusConflict { .. } => "STATUS_CONFLICT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Transaction(_) => "TRANSACTION_CONFLICT",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_distinct_400s() {
        let errors = [
            AppError::InvalidUserId(0),
            AppError::InvalidMessageType(9),
            AppError::EmptyContent,
            AppError::ContentTooLong { max_bytes: 10 },
        ];
        for err in &errors {
            assert_eq!(err.status_code(), 400);
        }
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn state_conflicts_map_to_gone_or_conflict() {
        assert_eq!(AppError::AlreadyRecalled.status_code(), 410);
        assert_eq!(AppError::AlreadyDeleted.status_code(), 410);
        assert_eq!(
            AppError::StatusConflict {
                current: MessageStatus::Read
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn only_transaction_conflicts_are_retryable() {
        assert!(AppError::Transaction("40001".into()).is_retryable());
        assert!(!AppError::Database("syntax".into()).is_retryable());
        assert!(!AppError::NotFriends.is_retryable());
    }
}
