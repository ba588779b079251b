use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Invalid(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Concurrency / inventory
    #[error("Insufficient inventory: {0}")]
    Insufficient(String),

    #[error("Cart is stale: {0}")]
    Stale(String),

    #[error("Tickets have not dropped yet: {0}")]
    NotDropped(String),

    #[error("Showing has ended: {0}")]
    Ended(String),

    #[error("Order limit exceeded: {0}")]
    OrderLimit(String),

    #[error("Tickets already sold: {0}")]
    AlreadySold(String),

    #[error("Drop time has elapsed: {0}")]
    DropElapsed(String),

    // Workflow
    #[error("Queue closed: {0}")]
    QueueClosed(String),

    #[error("Identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("Cooldown active: {0}")]
    CooldownActive(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Amount mismatch: expected {expected}, provider reported {reported}")]
    AmountMismatch { expected: String, reported: String },

    // External
    #[error("Payment provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Email transport failed: {0}")]
    EmailTransport(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Invalid(_) | AppError::EmptyCart | AppError::AmountMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::IdentityMismatch(_) => StatusCode::FORBIDDEN,
            AppError::Insufficient(_)
            | AppError::NotDropped(_)
            | AppError::Ended(_)
            | AppError::OrderLimit(_)
            | AppError::AlreadySold(_)
            | AppError::DropElapsed(_)
            | AppError::QueueClosed(_)
            | AppError::CooldownActive(_) => StatusCode::BAD_REQUEST,
            AppError::Stale(_) => StatusCode::FORBIDDEN,
            AppError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::EmailTransport(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Invalid(_) => "INVALID",
            AppError::AlreadyExists(_) => "ALREADY_EXISTS",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Insufficient(_) => "INSUFFICIENT",
            AppError::Stale(_) => "STALE",
            AppError::NotDropped(_) => "NOT_DROPPED",
            AppError::Ended(_) => "ENDED",
            AppError::OrderLimit(_) => "ORDER_LIMIT",
            AppError::AlreadySold(_) => "ALREADY_SOLD",
            AppError::DropElapsed(_) => "DROP_ELAPSED",
            AppError::QueueClosed(_) => "QUEUE_CLOSED",
            AppError::IdentityMismatch(_) => "IDENTITY_MISMATCH",
            AppError::CooldownActive(_) => "COOLDOWN_ACTIVE",
            AppError::EmptyCart => "EMPTY_CART",
            AppError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            AppError::ProviderRejected(_) => "PROVIDER_REJECTED",
            AppError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppError::EmailTransport(_) => "EMAIL_TRANSPORT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Clients may retry these with fresh state; they are not caller bugs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Insufficient(_)
                | AppError::Stale(_)
                | AppError::ProviderUnavailable(_)
                | AppError::Database(_)
                | AppError::Internal(_)
        )
    }

    fn log(&self) {
        match self {
            AppError::Database(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::Internal(msg) | AppError::EmailTransport(msg) => {
                error!(error = ?self, message = %msg, "Internal error");
            }
            other => {
                tracing::debug!(code = other.code(), "Request failed: {}", other);
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Keep internal detail out of the wire response
        let public_message = match &self {
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            AppError::EmailTransport(_) => "Failed to send notification email".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_400() {
        assert_eq!(
            AppError::Invalid("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::OrderLimit("3 > 2".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn stale_cart_maps_to_403() {
        assert_eq!(
            AppError::Stale("holds expired".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn provider_errors_distinguish_retryability() {
        assert!(AppError::ProviderUnavailable("timeout".into()).is_retryable());
        assert!(!AppError::ProviderRejected("DECLINED".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::NotDropped("x".into()).code(), "NOT_DROPPED");
        assert_eq!(AppError::QueueClosed("x".into()).code(), "QUEUE_CLOSED");
        assert_eq!(
            AppError::CooldownActive("x".into()).code(),
            "COOLDOWN_ACTIVE"
        );
    }
}
