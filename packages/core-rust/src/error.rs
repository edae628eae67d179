//! Stable, client-facing error codes.
//!
//! Clients branch on [`ErrorCode`] (sign in again, pick an organization,
//! slow down, ...), so the string form of each variant is part of the wire
//! contract and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-checkable reason a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Too many requests from this client address in the current window.
    RateLimited,
    /// No valid session or principal; the client must sign in.
    Unauthenticated,
    /// Signed in, but no organization selected. Forbidden-class.
    NoActiveTenant,
    /// Signed in with a tenant, but the role does not permit the operation.
    Forbidden,
    /// The request did not finish within the handler deadline.
    Timeout,
    /// Infrastructure failure, including a failed tenant binding.
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::NoActiveTenant => "NO_ACTIVE_TENANT",
            Self::Forbidden => "FORBIDDEN",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status code this error is reported with.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::Unauthenticated => 401,
            Self::NoActiveTenant | Self::Forbidden => 403,
            Self::Timeout => 408,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error envelope returned for every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Seconds until a rate-limited client may retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}
