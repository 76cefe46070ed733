//! Mock identity provider shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use encore_auth::{
    AuthConfig, AuthService, CallbackParams, ClientOrigin, Error, KvStore, LoginOutcome,
    MemoryStore, OAuthConfig,
};
use secrecy::SecretString;
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const CODE: &str = "provider-auth-code";
pub const SIGNING_SECRET: &str = "test-signing-secret-0123456789abcdef";
pub const PROVIDER_ACCESS_TOKEN: &str = "provider-at-1";
pub const ROTATED_ACCESS_TOKEN: &str = "provider-at-2";

/// Accepts a token exchange only if the verifier hashes to the challenge sent in the
/// authorization URL, the way a PKCE-enforcing provider does.
struct PkceMatcher {
    challenge: String,
}

impl Match for PkceMatcher {
    fn matches(&self, request: &Request) -> bool {
        let form: Vec<(String, String)> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();
        let field = |name: &str| {
            form.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let Some(verifier) = field("code_verifier") else {
            return false;
        };
        let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        computed == self.challenge && field("code") == Some(CODE)
    }
}

pub async fn start_provider() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "listener-42",
            "display_name": "Ada",
            "email": "ada@example.com",
            "country": "SE",
            "product": "premium",
            "followers": { "href": null, "total": 7 },
            "images": [{ "url": "https://img.example.com/ada.png", "height": 300 }],
            "explicit_content": { "filter_enabled": false, "filter_locked": false },
            "uri": "provider:user:listener-42"
        })))
        .mount(&server)
        .await;
    server
}

pub fn config(server: &MockServer) -> AuthConfig {
    let base = server.uri();
    let oauth = OAuthConfig::new(
        "test-client",
        SecretString::from("test-client-secret".to_string()),
        Url::parse("http://localhost:3000/auth/callback").unwrap(),
    )
    .with_auth_url(Url::parse(&format!("{base}/authorize")).unwrap())
    .with_token_url(Url::parse(&format!("{base}/api/token")).unwrap())
    .with_profile_url(Url::parse(&format!("{base}/v1/me")).unwrap())
    .with_http_timeout(Duration::from_secs(5));
    AuthConfig::new(oauth, SecretString::from(SIGNING_SECRET.to_string()))
}

pub fn service(config: AuthConfig) -> Arc<AuthService<MemoryStore>> {
    Arc::new(AuthService::new(config, MemoryStore::new()).unwrap())
}

/// Backend that keeps every entry for a day regardless of the requested TTL, so the
/// service's own expiry checks are the only ones in play.
#[derive(Debug, Default)]
pub struct NoExpiryStore(pub MemoryStore);

impl KvStore for NoExpiryStore {
    async fn put(&self, key: &str, value: String, _ttl: Duration) -> Result<(), Error> {
        self.0.put(key, value, Duration::from_secs(86_400)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.0.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.0.delete(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        self.0.take(key).await
    }
}

pub fn origin(address: &str) -> ClientOrigin {
    ClientOrigin::new(Some(address.to_string()), Some("encore-tests/1.0".to_string()))
}

pub fn query_param(url: &str, name: &str) -> String {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| panic!("{name} missing from {url}"))
}

/// Token endpoint that completes the code exchange for one authorization request.
pub async fn mount_exchange(server: &MockServer, auth_url: &str, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(PkceMatcher {
            challenge: query_param(auth_url, "code_challenge"),
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": PROVIDER_ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "refresh_token": "provider-rt-1",
            "scope": "user-read-email user-read-private"
        })))
        .mount(server)
        .await;
}

/// Token endpoint for provider refresh, expected to be hit exactly `times` times.
pub async fn mount_provider_refresh(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=provider-rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": ROTATED_ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Full login against the mock provider.
pub async fn login<S: KvStore>(
    service: &AuthService<S>,
    server: &MockServer,
    origin: &ClientOrigin,
    provider_expires_in: u64,
) -> Result<LoginOutcome, Error> {
    let request = service.initiate(origin).await?;
    mount_exchange(server, &request.auth_url, provider_expires_in).await;
    service
        .handle_callback(
            CallbackParams {
                code: Some(CODE.to_string()),
                state: Some(request.state.clone()),
                ..CallbackParams::default()
            },
            origin,
        )
        .await
}

pub fn callback(code: &str, state: &str) -> CallbackParams {
    CallbackParams {
        code: Some(code.to_string()),
        state: Some(state.to_string()),
        ..CallbackParams::default()
    }
}

pub async fn token_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/token")
        .count()
}
