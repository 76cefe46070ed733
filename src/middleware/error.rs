use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Client-facing authentication errors.
///
/// Every variant renders as `{"error": {"code": .., "message": ..}}` with a stable code.
/// Nothing from the identity provider or the store is ever echoed back.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credentials, or credentials that do not verify.
    #[error("Authentication required")]
    Unauthenticated,

    /// Credentials were presented but their session no longer exists.
    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired authorization state")]
    InvalidState,

    /// Any other protocol failure during login.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Missing required scopes")]
    InsufficientScope { missing: Vec<String> },

    #[error("Too many attempts, retry later")]
    TooManyAttempts { retry_after: Duration },

    /// The identity provider is unreachable; restart the flow from login.
    #[error("Identity provider unavailable, please retry")]
    Upstream,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetails<'a>,
}

#[derive(Serialize)]
struct ErrorDetails<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_scopes: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AuthError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "authentication_required",
            Self::SessionExpired => "session_expired",
            Self::InvalidToken => "invalid_token",
            Self::InvalidState => "invalid_state",
            Self::AuthenticationFailed => "authentication_failed",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::TooManyAttempts { .. } => "too_many_attempts",
            Self::Upstream => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::SessionExpired | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidState | Self::AuthenticationFailed => StatusCode::BAD_REQUEST,
            Self::InsufficientScope { .. } => StatusCode::FORBIDDEN,
            Self::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Auth internal error");
        }

        let retry_after = match &self {
            // Round up so clients never retry a moment too early.
            Self::TooManyAttempts { retry_after } => {
                Some(retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0))
            }
            _ => None,
        };
        let message = match &self {
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        let missing_scopes = match &self {
            Self::InsufficientScope { missing } => Some(missing.as_slice()),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetails {
                code: self.code(),
                message,
                missing_scopes,
                retry_after,
            },
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        use crate::error::Error;

        match e {
            Error::InvalidState => Self::InvalidState,
            Error::MissingParameter(_) | Error::AuthenticationFailed | Error::OriginMismatch => {
                Self::AuthenticationFailed
            }
            Error::InvalidToken => Self::InvalidToken,
            Error::SessionExpired => Self::SessionExpired,
            Error::LockedOut { retry_after } => Self::TooManyAttempts { retry_after },
            Error::Upstream => Self::Upstream,
            Error::Config(_)
            | Error::Provider { .. }
            | Error::Http(_)
            | Error::Store(_)
            | Error::Serialization(_) => Self::Internal(e.to_string()),
        }
    }
}
