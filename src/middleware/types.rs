use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::profile::UserProfile;
use crate::service::{AuthorizationRequest, LoginOutcome};
use crate::token::TokenPair;
use crate::types::{SessionId, SessionInfo};

/// `GET /auth/login`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LoginResponse {
    pub(super) auth_url: String,
    pub(super) state: String,
}

impl From<AuthorizationRequest> for LoginResponse {
    fn from(request: AuthorizationRequest) -> Self {
        Self {
            auth_url: request.auth_url,
            state: request.state,
        }
    }
}

/// `GET /auth/callback`
#[derive(Debug, Serialize)]
pub(super) struct CallbackResponse {
    pub(super) user: UserProfile,
    pub(super) session: SessionSummary,
    pub(super) tokens: TokenPair,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SessionSummary {
    pub(super) session_id: SessionId,
    #[serde(with = "time::serde::rfc3339")]
    pub(super) expires_at: OffsetDateTime,
}

impl From<LoginOutcome> for CallbackResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            user: outcome.user,
            session: SessionSummary {
                session_id: outcome.session.session_id,
                expires_at: outcome.session.expires_at,
            },
            tokens: outcome.tokens,
        }
    }
}

/// `POST /auth/refresh` body. The refresh cookie is used when absent.
#[derive(Debug, Default, Deserialize)]
pub(super) struct RefreshRequest {
    pub(super) refresh_token: Option<String>,
}

/// `POST /auth/logout` body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub(super) struct LogoutRequest {
    pub(super) session_id: Option<String>,
    pub(super) access_token: Option<String>,
    pub(super) refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct LogoutResponse {
    pub(super) success: bool,
}

/// `GET /auth/me`
#[derive(Debug, Serialize)]
pub(super) struct MeResponse {
    pub(super) user: UserProfile,
    pub(super) session: SessionInfo,
}
