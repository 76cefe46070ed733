use std::time::Duration;

/// Errors produced by the authentication subsystem.
///
/// The first group of variants is what [`AuthService`](crate::AuthService) returns to
/// callers. `Provider`, `Http`, `Store` and `Serialization` carry internal detail and
/// are translated at the service boundary; they should never reach an HTTP client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing authorization parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid or expired authorization state")]
    InvalidState,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Request origin does not match the authorization request")]
    OriginMismatch,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Session expired or invalid")]
    SessionExpired,

    #[error("Too many failed attempts, retry in {}s", retry_after.as_secs())]
    LockedOut { retry_after: Duration },

    #[error("Identity provider unavailable")]
    Upstream,

    #[error("{operation} failed (status {status:?}): {detail}")]
    Provider {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::MissingParameter(_) => "missing_parameter",
            Self::InvalidState => "invalid_state",
            Self::AuthenticationFailed | Self::OriginMismatch => "authentication_failed",
            Self::InvalidToken => "invalid_token",
            Self::SessionExpired => "session_expired",
            Self::LockedOut { .. } => "too_many_attempts",
            Self::Upstream => "upstream_unavailable",
            Self::Provider { .. } | Self::Http(_) | Self::Store(_) | Self::Serialization(_) => {
                "internal_error"
            }
        }
    }

    /// Whether a provider failure is transient (timeout, connection, 5xx) rather than a
    /// rejection of the presented grant.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Provider {
                status: Some(status),
                ..
            } => *status >= 500,
            Self::Upstream => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_failures_share_a_generic_code() {
        assert_eq!(Error::AuthenticationFailed.code(), "authentication_failed");
        assert_eq!(Error::OriginMismatch.code(), "authentication_failed");
    }

    #[test]
    fn provider_5xx_is_transient() {
        let err = Error::Provider {
            operation: "token exchange",
            status: Some(503),
            detail: String::new(),
        };
        assert!(err.is_transient());

        let err = Error::Provider {
            operation: "token exchange",
            status: Some(400),
            detail: "invalid_grant".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn lockout_message_carries_retry_hint() {
        let err = Error::LockedOut {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "Too many failed attempts, retry in 42s");
    }
}
