use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header::AUTHORIZATION, header::USER_AGENT};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;

use super::cookies;
use super::error::AuthError;
use super::state::AuthState;
use crate::error::Error;
use crate::profile::UserProfile;
use crate::service::VerifiedSession;
use crate::store::KvStore;
use crate::types::{ClientOrigin, ProviderTokens, SessionId, SessionInfo};

/// Authentication outcome attached to every request by [`authenticate`].
///
/// Extraction never rejects: anonymous and failed requests get
/// `is_authenticated == false` and continue. Use [`RequireAuth`] or
/// [`require_auth`] to enforce.
///
/// ```rust,ignore
/// async fn playlists(auth: AuthContext) -> Result<String, AuthError> {
///     auth.require_scopes(&["playlist-read-private"])?;
///     Ok(format!("playlists for {}", auth.user.unwrap().id))
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
    pub session: Option<SessionInfo>,
    pub provider_tokens: Option<ProviderTokens>,
    pub session_id: Option<SessionId>,
    failure: Option<Failure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    InvalidToken,
    SessionExpired,
}

impl AuthContext {
    fn verified(verified: VerifiedSession) -> Self {
        Self {
            is_authenticated: true,
            session_id: Some(verified.session.session_id.clone()),
            user: Some(verified.user),
            session: Some(verified.session),
            provider_tokens: Some(verified.provider_tokens),
            failure: None,
        }
    }

    fn failed(failure: Failure, session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Fail unless the request carried credentials for a live session.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] if a well-formed token pointed at a session that no
    /// longer exists, [`AuthError::Unauthenticated`] otherwise.
    pub fn require(&self) -> Result<(), AuthError> {
        if self.is_authenticated {
            return Ok(());
        }
        match self.failure {
            Some(Failure::SessionExpired) => Err(AuthError::SessionExpired),
            Some(Failure::InvalidToken) | None => Err(AuthError::Unauthenticated),
        }
    }

    /// Fail unless the session was granted every scope in `required`.
    ///
    /// # Errors
    ///
    /// Same as [`require`](Self::require), then [`AuthError::InsufficientScope`] listing
    /// the scopes that were not granted.
    pub fn require_scopes(&self, required: &[&str]) -> Result<(), AuthError> {
        self.require()?;
        let granted = self
            .session
            .as_ref()
            .map(|s| s.scopes.as_slice())
            .unwrap_or_default();
        let missing: Vec<String> = required
            .iter()
            .filter(|scope| !granted.iter().any(|g| g == *scope))
            .map(|scope| (*scope).to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope { missing })
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor that rejects unless [`authenticate`] found a live session.
///
/// ```rust,ignore
/// async fn protected(RequireAuth(auth): RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}", auth.user.map(|u| u.id).unwrap_or_default())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl<S: Send + Sync> FromRequestParts<S> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Ok(context) = AuthContext::from_request_parts(parts, state).await;
        context.require()?;
        Ok(Self(context))
    }
}

/// Per-request authentication layer.
///
/// Reads a bearer token from `Authorization`, falling back to the access cookie, and
/// attaches the resulting [`AuthContext`] to the request. Always calls the next service.
///
/// ```rust,ignore
/// let state = AuthState::new(service);
/// let app = Router::new()
///     .route("/playlists", get(playlists))
///     .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate::<MemoryStore>))
///     .merge(auth_routes(state));
/// ```
pub async fn authenticate<S: KvStore>(
    State(state): State<AuthState<S>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = resolve_auth(&state, request.headers()).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Gate for a router or route that must only be reached by authenticated requests.
/// Install it inside [`authenticate`].
///
/// # Errors
///
/// See [`AuthContext::require`].
pub async fn require_auth(request: Request, next: Next) -> Result<Response, AuthError> {
    match request.extensions().get::<AuthContext>() {
        Some(context) => context.require()?,
        None => return Err(AuthError::Unauthenticated),
    }
    Ok(next.run(request).await)
}

/// Verify whatever credentials `headers` carry.
pub async fn resolve_auth<S: KvStore>(state: &AuthState<S>, headers: &HeaderMap) -> AuthContext {
    let Some(token) = bearer_token(headers).or_else(|| cookies::access_token(&CookieJar::from_headers(headers)))
    else {
        return AuthContext::default();
    };

    match state.service.verify(&token).await {
        Ok(verified) => AuthContext::verified(verified),
        Err(Error::SessionExpired) => AuthContext::failed(
            Failure::SessionExpired,
            state.service.session_id_from_token(&token),
        ),
        Err(Error::InvalidToken) => AuthContext::failed(Failure::InvalidToken, None),
        Err(e) => {
            tracing::error!(error = %e, "Access token verification failed");
            AuthContext::failed(Failure::InvalidToken, None)
        }
    }
}

pub(super) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Client address and user agent, as seen by [`auth_routes`](super::auth_routes).
///
/// The address is the socket peer, which requires serving with
/// `into_make_service_with_connect_info::<SocketAddr>()`. Forwarding headers are only
/// read when that peer is listed in
/// [`AuthConfig::with_trusted_proxies`](crate::AuthConfig::with_trusted_proxies).
impl<S: KvStore> FromRequestParts<AuthState<S>> for ClientOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState<S>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(client_origin(
            &parts.headers,
            peer,
            state.service.config().trusted_proxies(),
        ))
    }
}

/// Resolve the address a request should be attributed to.
///
/// `peer` is used as is unless it is one of `trusted_proxies`. Behind a trusted proxy
/// the address is the right-most `X-Forwarded-For` entry that is not itself a trusted
/// proxy, then `X-Real-IP`, then the proxy. Without a peer the address is unknown.
#[must_use]
pub fn client_origin(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> ClientOrigin {
    let address = peer.map(|peer| {
        if trusted_proxies.contains(&peer) {
            forwarded_ip(headers, trusted_proxies).unwrap_or(peer)
        } else {
            peer
        }
    });
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    ClientOrigin::new(address.map(|ip| ip.to_string()), user_agent)
}

fn forwarded_ip(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    // Entries left of the first untrusted hop were written by the client.
    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted_proxies.contains(&ip) => {}
            Ok(ip) => return Some(ip),
            Err(_) => return None,
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
