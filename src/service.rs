//! The login protocol.
//!
//! ```text
//! NoSession ──initiate──▶ HandshakeInitiated ──callback──▶ SessionActive
//!                                                          │    ▲
//!                                                 refresh  ▼    │
//!                                                        Refreshing
//!                                                          │
//!                                              logout ──▶ SessionRevoked
//! ```
//!
//! The store is the authority at every step: a handshake is consumed exactly once, and
//! a token is only as good as the session it points at.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::{AuthConfig, OriginPolicy};
use crate::error::Error;
use crate::lockout::LockoutTracker;
use crate::oauth::{AuthClient, TokenResponse};
use crate::pkce;
use crate::profile::UserProfile;
use crate::store::{AuthStore, KvStore};
use crate::token::{TokenClaims, TokenPair, TokenSigner, TokenType};
use crate::types::{
    ClientOrigin, Handshake, ProviderTokens, Session, SessionId, SessionInfo, UserId,
    epoch_millis,
};

const SESSION_ID_LEN: usize = 48;
const NONCE_LEN: usize = 32;

/// Where to send the browser, and the `state` that will come back.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LoginOutcome {
    pub user: UserProfile,
    pub session: SessionInfo,
    pub tokens: TokenPair,
}

/// A verified access token together with the live session behind it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct VerifiedSession {
    pub user: UserProfile,
    pub session: SessionInfo,
    pub provider_tokens: ProviderTokens,
}

/// A freshly minted access token.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct RefreshedAccess {
    pub access_token: String,
    pub expires_in: u64,
}

/// Orchestrates handshake, session, and token lifecycle.
///
/// Construct one per process and share it behind an `Arc`.
pub struct AuthService<S> {
    client: AuthClient,
    store: AuthStore<S>,
    signer: TokenSigner,
    lockout: LockoutTracker,
    config: AuthConfig,
    refresh_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl<S: KvStore> AuthService<S> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured lifetime is out of range, or the signing
    /// secret or HTTP client is unusable.
    pub fn new(config: AuthConfig, backend: S) -> Result<Self, Error> {
        let client = AuthClient::new(config.oauth.clone())?;
        Self::with_client(config, backend, client)
    }

    /// Build with a pre-configured provider client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured lifetime is out of range or the signing
    /// secret is unusable.
    pub fn with_client(config: AuthConfig, backend: S, client: AuthClient) -> Result<Self, Error> {
        config.validate()?;
        let signer = TokenSigner::new(&config.signing_secret)?;
        let lockout = LockoutTracker::new(config.lockout_threshold, config.lockout_window);
        Ok(Self {
            client,
            store: AuthStore::new(backend),
            signer,
            lockout,
            config,
            refresh_locks: DashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore<S> {
        &self.store
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Start an authorization attempt. Nothing is sent to the provider yet.
    ///
    /// # Errors
    ///
    /// [`Error::LockedOut`] if the address is locked, or a store error.
    pub async fn initiate(&self, origin: &ClientOrigin) -> Result<AuthorizationRequest, Error> {
        self.ensure_not_locked(origin)?;

        let pair = pkce::generate_pkce();
        let state = pkce::generate_state();
        let handshake = Handshake {
            code_verifier: pair.code_verifier,
            code_challenge: pair.code_challenge,
            challenge_method: pair.method,
            nonce: pkce::generate_opaque_string(NONCE_LEN),
            created_at: OffsetDateTime::now_utc(),
            origin: origin.clone(),
        };

        self.store
            .put_handshake(&state, &handshake, self.config.handshake_ttl)
            .await?;

        let auth_url = self
            .client
            .authorization_url(&state, &handshake.code_challenge);

        tracing::debug!(address = %origin.lockout_key(), "Authorization request issued");

        Ok(AuthorizationRequest {
            auth_url: auth_url.into(),
            state,
        })
    }

    /// Complete an authorization attempt.
    ///
    /// The handshake for `state` is consumed whether or not the rest succeeds, so a
    /// `state` can never be replayed.
    ///
    /// # Errors
    ///
    /// - [`Error::LockedOut`] before the provider is contacted if the address is locked
    /// - [`Error::MissingParameter`], [`Error::InvalidState`], [`Error::OriginMismatch`],
    ///   [`Error::AuthenticationFailed`] for protocol failures (each counted against the
    ///   address)
    /// - [`Error::Upstream`] when the provider is unreachable or failing
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        origin: &ClientOrigin,
    ) -> Result<LoginOutcome, Error> {
        if let Err(locked) = self.ensure_not_locked(origin) {
            if let Some(state) = params.state.as_deref().filter(|s| !s.is_empty()) {
                if let Err(e) = self.store.take_handshake(state).await {
                    tracing::warn!(error = %e, "Handshake cleanup failed for locked-out callback");
                }
            }
            return Err(locked);
        }
        let address = origin.lockout_key();

        if let Some(error) = params.error.as_deref() {
            tracing::warn!(
                address = %address,
                error = %error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "Provider returned an authorization error"
            );
            if let Some(state) = params.state.as_deref() {
                self.store.take_handshake(state).await?;
            }
            return Err(self.fail(origin, Error::AuthenticationFailed));
        }

        let Some(state) = params.state.as_deref().filter(|s| !s.is_empty()) else {
            return Err(self.fail(origin, Error::MissingParameter("state")));
        };
        // Consume first: a callback missing its code still burns the state.
        let handshake = self.store.take_handshake(state).await?;
        let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
            return Err(self.fail(origin, Error::MissingParameter("code")));
        };

        let Some(handshake) = handshake.filter(|h| self.handshake_is_fresh(h)) else {
            tracing::warn!(address = %address, "Unknown, reused or expired authorization state");
            return Err(self.fail(origin, Error::InvalidState));
        };

        if handshake.origin.address != origin.address {
            tracing::warn!(
                initiated_from = handshake.origin.lockout_key(),
                callback_from = %address,
                "Callback address differs from authorization request"
            );
            if self.config.origin_policy == OriginPolicy::Reject {
                return Err(self.fail(origin, Error::OriginMismatch));
            }
        }

        let token_response = match self
            .client
            .exchange_code(code, &handshake.code_verifier)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                tracing::error!(error = %e, "Token exchange unavailable");
                return Err(Error::Upstream);
            }
            Err(e) => {
                tracing::error!(error = %e, "Token exchange failed");
                return Err(self.fail(origin, Error::AuthenticationFailed));
            }
        };

        let user = match self.fetch_profile(&token_response.access_token).await {
            Ok(user) => user,
            Err(Error::Upstream) => return Err(Error::Upstream),
            Err(e) => return Err(self.fail(origin, e)),
        };

        let now = OffsetDateTime::now_utc();
        let session = Session {
            session_id: SessionId(pkce::generate_opaque_string(SESSION_ID_LEN)),
            user_id: UserId(user.id.clone()),
            user: user.clone(),
            provider_tokens: provider_tokens(&token_response, None, now),
            created_at: now,
            last_activity_at: now,
            origin: origin.clone(),
        };
        self.store
            .put_session(&session, self.config.session_ttl)
            .await?;

        let tokens = self.signer.issue_pair(
            &session.user_id,
            &session.session_id,
            self.config.access_ttl,
            self.config.refresh_ttl,
        )?;

        self.lockout.clear(address);
        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "Login successful"
        );

        Ok(LoginOutcome {
            user,
            session: SessionInfo::from_session(&session, self.config.session_ttl),
            tokens,
        })
    }

    /// Check an access token against the live session store.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToken`] if the token itself is bad (the store is not touched),
    /// [`Error::SessionExpired`] if it is well-formed but its session is gone.
    pub async fn verify(&self, access_token: &str) -> Result<VerifiedSession, Error> {
        let claims = self.signer.verify_typed(access_token, TokenType::Access)?;
        let session = self.live_session(&claims).await?;

        let now = OffsetDateTime::now_utc();
        if let Some(remaining) = self.remaining_ttl(&session, now) {
            if let Err(e) = self
                .store
                .touch_session(&session.session_id, now, remaining)
                .await
            {
                tracing::warn!(error = %e, session_id = %session.session_id, "Activity bump failed");
            }
        }

        let mut info = SessionInfo::from_session(&session, self.config.session_ttl);
        info.last_activity_at = now;

        Ok(VerifiedSession {
            user: session.user,
            session: info,
            provider_tokens: session.provider_tokens,
        })
    }

    /// Exchange a refresh token for a new access token, rotating the provider token
    /// first if it is about to expire.
    ///
    /// # Errors
    ///
    /// [`Error::LockedOut`], [`Error::InvalidToken`], [`Error::SessionExpired`], or
    /// [`Error::Upstream`] if provider rotation is needed but the provider is unavailable.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        origin: &ClientOrigin,
    ) -> Result<RefreshedAccess, Error> {
        self.ensure_not_locked(origin)?;

        let claims = self
            .signer
            .verify_typed(refresh_token, TokenType::Refresh)
            .map_err(|e| self.fail(origin, e))?;

        let lock = self
            .refresh_locks
            .entry(claims.session_id.clone())
            .or_default()
            .clone();
        let rotated = {
            let _guard = lock.lock().await;
            self.rotate_if_needed(&claims).await
        };
        drop(lock);
        self.refresh_locks
            .remove_if(&claims.session_id, |_, l| Arc::strong_count(l) == 1);

        if let Err(e) = rotated {
            return Err(match e {
                Error::SessionExpired | Error::InvalidToken => self.fail(origin, e),
                other => other,
            });
        }

        let access_claims = TokenClaims {
            token_type: TokenType::Access,
            ..claims
        };
        let access_token = self.signer.sign(&access_claims, self.config.access_ttl)?;

        Ok(RefreshedAccess {
            access_token,
            expires_in: self.config.access_ttl.as_secs(),
        })
    }

    /// Revoke a session. Succeeds whether or not the session still exists; cleanup
    /// failures are logged and swallowed.
    pub async fn logout(&self, session_id: &SessionId) {
        match self.store.delete_session(session_id).await {
            Ok(()) => tracing::info!(session_id = %session_id, "Logged out"),
            Err(e) => {
                tracing::warn!(error = %e, session_id = %session_id, "Session deletion failed during logout");
            }
        }
    }

    /// Session id named by a validly signed token of either type.
    #[must_use]
    pub fn session_id_from_token(&self, token: &str) -> Option<SessionId> {
        self.signer.verify(token).ok().map(|c| c.session_id)
    }

    /// Runs inside the per-session critical section.
    async fn rotate_if_needed(&self, claims: &TokenClaims) -> Result<(), Error> {
        let mut session = self.live_session(claims).await?;
        let now = OffsetDateTime::now_utc();

        let margin = time::Duration::try_from(self.config.refresh_margin)
            .map_err(|e| Error::Config(format!("refresh margin: {e}")))?;
        if !session.provider_tokens.expires_within(margin, now) {
            return Ok(());
        }

        let Some(provider_refresh) = session.provider_tokens.refresh_token.clone() else {
            tracing::warn!(session_id = %session.session_id, "Provider token expiring with no refresh token");
            return Err(Error::SessionExpired);
        };

        let response = match self.client.refresh_token(&provider_refresh).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                tracing::error!(error = %e, "Provider token refresh unavailable");
                return Err(Error::Upstream);
            }
            Err(e) => {
                // The provider revoked the grant; the session cannot be kept alive.
                tracing::warn!(error = %e, session_id = %session.session_id, "Provider refused token refresh");
                self.logout(&session.session_id).await;
                return Err(Error::SessionExpired);
            }
        };

        session.provider_tokens = provider_tokens(&response, Some(&session.provider_tokens), now);
        let remaining = self
            .remaining_ttl(&session, now)
            .ok_or(Error::SessionExpired)?;
        self.store.put_session(&session, remaining).await?;

        tracing::info!(session_id = %session.session_id, "Provider token rotated");
        Ok(())
    }

    /// Load the session a token points at, rejecting mismatched or overdue sessions.
    async fn live_session(&self, claims: &TokenClaims) -> Result<Session, Error> {
        let Some(session) = self.store.get_session(&claims.session_id).await? else {
            return Err(Error::SessionExpired);
        };
        if session.user_id != claims.user_id {
            tracing::warn!(session_id = %claims.session_id, "Token subject does not match session");
            return Err(Error::InvalidToken);
        }
        if self
            .remaining_ttl(&session, OffsetDateTime::now_utc())
            .is_none()
        {
            self.logout(&session.session_id).await;
            return Err(Error::SessionExpired);
        }
        Ok(session)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, Error> {
        let raw = match self.client.get_profile(access_token).await {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                tracing::error!(error = %e, "Profile request unavailable");
                return Err(Error::Upstream);
            }
            Err(e) => {
                tracing::error!(error = %e, "Profile request failed");
                return Err(Error::AuthenticationFailed);
            }
        };
        UserProfile::from_provider(&raw).map_err(|e| {
            tracing::error!(error = %e, "Unusable provider profile");
            Error::AuthenticationFailed
        })
    }

    fn ensure_not_locked(&self, origin: &ClientOrigin) -> Result<(), Error> {
        match self.lockout.retry_after(origin.lockout_key()) {
            Some(retry_after) => {
                tracing::warn!(address = %origin.lockout_key(), "Rejected attempt from locked-out address");
                Err(Error::LockedOut { retry_after })
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt against the origin and hand back the error.
    fn fail(&self, origin: &ClientOrigin, error: Error) -> Error {
        self.lockout.record_failure(origin.lockout_key());
        error
    }

    fn handshake_is_fresh(&self, handshake: &Handshake) -> bool {
        OffsetDateTime::now_utc() - handshake.created_at < self.config.handshake_ttl
    }

    fn remaining_ttl(&self, session: &Session, now: OffsetDateTime) -> Option<Duration> {
        let remaining = session.expires_at(self.config.session_ttl) - now;
        if remaining.is_positive() {
            Duration::try_from(remaining).ok()
        } else {
            None
        }
    }
}

fn provider_tokens(
    response: &TokenResponse,
    previous: Option<&ProviderTokens>,
    now: OffsetDateTime,
) -> ProviderTokens {
    let expires_in = i64::try_from(response.expires_in).unwrap_or(i64::MAX / 1000);
    let scopes = response.scopes();
    ProviderTokens {
        access_token: response.access_token.clone(),
        refresh_token: response
            .refresh_token
            .clone()
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        expires_at_ms: epoch_millis(now).saturating_add(expires_in.saturating_mul(1000)),
        token_type: response.token_type.clone(),
        scopes: if scopes.is_empty() {
            previous.map(|p| p.scopes.clone()).unwrap_or_default()
        } else {
            scopes
        },
    }
}
