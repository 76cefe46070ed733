use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::profile::UserProfile;

/// Provider user identifier (the profile `id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Opaque, unguessable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a request came from. Recorded on handshakes and sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOrigin {
    pub address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientOrigin {
    #[must_use]
    pub fn new(address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            address,
            user_agent,
        }
    }

    /// Key used for lockout bookkeeping. Requests without a known address share one bucket.
    #[must_use]
    pub fn lockout_key(&self) -> &str {
        self.address.as_deref().unwrap_or("unknown")
    }
}

/// In-flight authorization attempt, keyed by `state` in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub code_verifier: String,
    pub code_challenge: String,
    pub challenge_method: String,
    pub nonce: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub origin: ClientOrigin,
}

/// The identity provider's own tokens. Owned exclusively by a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: i64,
    pub token_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ProviderTokens {
    /// Whether the provider access token expires within `margin` of `now`.
    #[must_use]
    pub fn expires_within(&self, margin: time::Duration, now: OffsetDateTime) -> bool {
        let deadline_ms = epoch_millis(now + margin);
        self.expires_at_ms <= deadline_ms
    }
}

/// Server-side record of an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub user: UserProfile,
    pub provider_tokens: ProviderTokens,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    pub origin: ClientOrigin,
}

impl Session {
    /// Absolute expiry of the session given its configured TTL.
    #[must_use]
    pub fn expires_at(&self, ttl: std::time::Duration) -> OffsetDateTime {
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        self.created_at.saturating_add(ttl)
    }

    /// Scopes the provider granted at login.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.provider_tokens.scopes
    }
}

/// Session metadata safe to hand to downstream handlers and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub scopes: Vec<String>,
}

impl SessionInfo {
    pub(crate) fn from_session(session: &Session, ttl: std::time::Duration) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at(ttl),
            scopes: session.provider_tokens.scopes.clone(),
        }
    }
}

pub(crate) fn epoch_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}
