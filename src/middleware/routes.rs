use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use axum_extra::extract::CookieJar;
use serde::de::DeserializeOwned;

use super::cookies;
use super::error::AuthError;
use super::extractor::{RequireAuth, authenticate, bearer_token};
use super::state::{AUTH_PATH, AuthState};
use super::types::{
    CallbackResponse, LoginResponse, LogoutRequest, LogoutResponse, MeResponse, RefreshRequest,
};
use crate::service::CallbackParams;
use crate::store::KvStore;
use crate::types::{ClientOrigin, SessionId};

/// Create the authentication router.
///
/// | Route | |
/// |---|---|
/// | `GET /auth/login` | `{ authUrl, state }` |
/// | `GET /auth/callback` | completes login, sets the access and refresh cookies |
/// | `POST /auth/refresh` | new access token from the body or cookie refresh token |
/// | `POST /auth/logout` | revokes the session, clears cookies, always succeeds |
/// | `GET /auth/me` | current user and session |
pub fn auth_routes<S: KvStore>(state: AuthState<S>) -> Router {
    let me_route = Router::new()
        .route(&format!("{AUTH_PATH}/me"), get(me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate::<S>,
        ));

    Router::new()
        .route(&format!("{AUTH_PATH}/login"), get(login::<S>))
        .route(&format!("{AUTH_PATH}/callback"), get(callback::<S>))
        .route(&format!("{AUTH_PATH}/refresh"), post(refresh::<S>))
        .route(&format!("{AUTH_PATH}/logout"), post(logout::<S>))
        .merge(me_route)
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

async fn login<S: KvStore>(
    State(state): State<AuthState<S>>,
    origin: ClientOrigin,
) -> Result<Json<LoginResponse>, AuthError> {
    let request = state.service.initiate(&origin).await?;
    Ok(Json(request.into()))
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback<S: KvStore>(
    State(state): State<AuthState<S>>,
    origin: ClientOrigin,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Json<CallbackResponse>), AuthError> {
    // The code is single-use: finish the exchange even if the client hangs up.
    let service = state.service.clone();
    let outcome = tokio::spawn(async move { service.handle_callback(params, &origin).await })
        .await
        .map_err(|e| AuthError::Internal(format!("callback task: {e}")))??;

    let jar = jar
        .add(state.cookies.access_cookie(&outcome.tokens.access_token))
        .add(state.cookies.refresh_cookie(&outcome.tokens.refresh_token));

    Ok((jar, Json(outcome.into())))
}

// ── Refresh ────────────────────────────────────────────────────────

async fn refresh<S: KvStore>(
    State(state): State<AuthState<S>>,
    origin: ClientOrigin,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<crate::service::RefreshedAccess>), AuthError> {
    let request: RefreshRequest = parse_optional_body(&body);
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| cookies::refresh_token(&jar))
        .ok_or(AuthError::Unauthenticated)?;

    let refreshed = state.service.refresh(&refresh_token, &origin).await?;
    let jar = jar.add(state.cookies.access_cookie(&refreshed.access_token));
    Ok((jar, Json(refreshed)))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout<S: KvStore>(
    State(state): State<AuthState<S>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> (CookieJar, Json<LogoutResponse>) {
    let request: LogoutRequest = parse_optional_body(&body);

    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .map(SessionId)
        .or_else(|| {
            [
                request.access_token,
                request.refresh_token,
                bearer_token(&headers),
                cookies::access_token(&jar),
                cookies::refresh_token(&jar),
            ]
            .into_iter()
            .flatten()
            .find_map(|token| state.service.session_id_from_token(&token))
        });

    match session_id {
        Some(session_id) => state.service.logout(&session_id).await,
        None => tracing::debug!("Logout without an identifiable session"),
    }

    (state.cookies.clear(jar), Json(LogoutResponse { success: true }))
}

// ── Me ─────────────────────────────────────────────────────────────

async fn me(RequireAuth(auth): RequireAuth) -> Result<Json<MeResponse>, AuthError> {
    match (auth.user, auth.session) {
        (Some(user), Some(session)) => Ok(Json(MeResponse { user, session })),
        _ => Err(AuthError::Unauthenticated),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Bodies on refresh and logout are optional; anything unparseable counts as empty.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Ignoring malformed auth request body");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_malformed_body_is_default() {
        let parsed: LogoutRequest = parse_optional_body(&Bytes::new());
        assert!(parsed.session_id.is_none());

        let parsed: RefreshRequest = parse_optional_body(&Bytes::from_static(b"not json"));
        assert!(parsed.refresh_token.is_none());

        let parsed: RefreshRequest =
            parse_optional_body(&Bytes::from_static(br#"{"refresh_token":"rt"}"#));
        assert_eq!(parsed.refresh_token.as_deref(), Some("rt"));
    }
}
