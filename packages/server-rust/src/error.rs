//! Rejection taxonomy for the request pipeline.
//!
//! Every variant maps to exactly one stable [`ErrorCode`] so clients can
//! render a distinct corrective action for each failure.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tenantgate_core::{ErrorBody, ErrorCode};
use tracing::error;

use crate::db::DbError;

/// Errors that abort the guard chain or the handler it protects.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("authentication required")]
    Unauthenticated,
    #[error("no active organization selected")]
    NoActiveTenant,
    #[error("insufficient role for this operation")]
    Forbidden,
    /// The transaction-local tenant setting could not be applied. The
    /// transaction has already been rolled back.
    #[error("failed to bind tenant to transaction: {0}")]
    TenantBindingFailure(#[source] DbError),
    #[error("request exceeded its {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GuardError {
    /// Stable client-facing code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::NoActiveTenant => ErrorCode::NoActiveTenant,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::TenantBindingFailure(_) | Self::Database(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Builds the JSON envelope. Internal details never reach the client.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let code = self.code();
        let message = match code {
            ErrorCode::Internal => "internal server error".to_string(),
            _ => self.to_string(),
        };
        let mut body = ErrorBody::new(code, message);
        if let Self::RateLimited { retry_after_secs } = self {
            body.retry_after_secs = Some(*retry_after_secs);
        }
        body
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code == ErrorCode::Internal {
            error!(error = %self, "request failed with internal error");
        }

        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.body())).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
