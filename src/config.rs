use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::Error;
use crate::lockout::{DEFAULT_THRESHOLD, DEFAULT_WINDOW};
use crate::oauth::OAuthConfig;

const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for every configured lifetime and window.
pub const MAX_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// What to do when a callback arrives from a different address than the one that
/// started the authorization request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Log a warning and continue. Mobile networks change egress addresses mid-flow.
    #[default]
    LogOnly,
    /// Fail the callback.
    Reject,
}

impl FromStr for OriginPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log-only" | "log_only" => Ok(Self::LogOnly),
            "reject" => Ok(Self::Reject),
            other => Err(Error::Config(format!(
                "AUTH_ORIGIN_POLICY: expected `log` or `reject`, got `{other}`"
            ))),
        }
    }
}

/// Complete configuration of the authentication subsystem.
///
/// Use [`from_env()`](AuthConfig::from_env) for convention-based setup,
/// or [`new()`](AuthConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthConfig {
    pub(crate) oauth: OAuthConfig,
    pub(crate) signing_secret: SecretString,
    pub(crate) access_ttl: Duration,
    pub(crate) refresh_ttl: Duration,
    pub(crate) session_ttl: Duration,
    pub(crate) handshake_ttl: Duration,
    pub(crate) refresh_margin: Duration,
    pub(crate) lockout_threshold: u32,
    pub(crate) lockout_window: Duration,
    pub(crate) origin_policy: OriginPolicy,
    pub(crate) production: bool,
    pub(crate) redis_url: Option<String>,
    pub(crate) store_timeout: Duration,
    pub(crate) trusted_proxies: Vec<IpAddr>,
}

impl AuthConfig {
    /// Create config with the required provider settings and signing secret.
    #[must_use]
    pub fn new(oauth: OAuthConfig, signing_secret: SecretString) -> Self {
        Self {
            oauth,
            signing_secret,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            lockout_threshold: DEFAULT_THRESHOLD,
            lockout_window: DEFAULT_WINDOW,
            origin_policy: OriginPolicy::default(),
            production: false,
            redis_url: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            trusted_proxies: Vec::new(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `PROVIDER_CLIENT_ID`, `PROVIDER_CLIENT_SECRET`
    /// - `PROVIDER_REDIRECT_URI`: callback URI (must be a valid URL)
    /// - `AUTH_SIGNING_SECRET`: at least 32 bytes
    ///
    /// # Optional env vars
    /// - `PROVIDER_SCOPES`: comma or space separated scopes
    /// - `PROVIDER_AUTH_URL`, `PROVIDER_TOKEN_URL`, `PROVIDER_PROFILE_URL`
    /// - `AUTH_ACCESS_TTL_SECS`, `AUTH_REFRESH_TTL_SECS`, `AUTH_SESSION_TTL_SECS`,
    ///   `AUTH_HANDSHAKE_TTL_SECS`, `AUTH_HTTP_TIMEOUT_SECS`
    /// - `AUTH_LOCKOUT_THRESHOLD`, `AUTH_LOCKOUT_WINDOW_SECS`
    /// - `AUTH_ORIGIN_POLICY`: `log` (default) or `reject`
    /// - `AUTH_PRODUCTION`: `1`/`true` for secure, strict cookies
    /// - `REDIS_URL`: selects the shared session store
    /// - `AUTH_STORE_TIMEOUT_SECS`: deadline for each session store call (default 5)
    /// - `AUTH_TRUSTED_PROXIES`: comma separated proxy addresses whose forwarding
    ///   headers are believed
    ///
    /// Every `*_SECS` value must be at most [`MAX_TTL`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or any value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let client_id = required("PROVIDER_CLIENT_ID")?;
        let client_secret = SecretString::from(required("PROVIDER_CLIENT_SECRET")?);
        let redirect_uri = parse_url("PROVIDER_REDIRECT_URI", &required("PROVIDER_REDIRECT_URI")?)?;
        let signing_secret = SecretString::from(required("AUTH_SIGNING_SECRET")?);

        let mut oauth = OAuthConfig::new(client_id, client_secret, redirect_uri);

        if let Some(url) = optional("PROVIDER_AUTH_URL") {
            oauth = oauth.with_auth_url(parse_url("PROVIDER_AUTH_URL", &url)?);
        }
        if let Some(url) = optional("PROVIDER_TOKEN_URL") {
            oauth = oauth.with_token_url(parse_url("PROVIDER_TOKEN_URL", &url)?);
        }
        if let Some(url) = optional("PROVIDER_PROFILE_URL") {
            oauth = oauth.with_profile_url(parse_url("PROVIDER_PROFILE_URL", &url)?);
        }
        if let Some(scopes) = optional("PROVIDER_SCOPES") {
            oauth = oauth.with_scopes(
                scopes
                    .split([',', ' '])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect(),
            );
        }
        if let Some(timeout) = seconds("AUTH_HTTP_TIMEOUT_SECS")? {
            oauth = oauth.with_http_timeout(timeout);
        }

        let mut config = Self::new(oauth, signing_secret);

        if let Some(ttl) = seconds("AUTH_ACCESS_TTL_SECS")? {
            config = config.with_access_ttl(ttl);
        }
        if let Some(ttl) = seconds("AUTH_REFRESH_TTL_SECS")? {
            config = config.with_refresh_ttl(ttl);
        }
        if let Some(ttl) = seconds("AUTH_SESSION_TTL_SECS")? {
            config = config.with_session_ttl(ttl);
        }
        if let Some(ttl) = seconds("AUTH_HANDSHAKE_TTL_SECS")? {
            config = config.with_handshake_ttl(ttl);
        }
        if let Some(threshold) = optional("AUTH_LOCKOUT_THRESHOLD") {
            let threshold = threshold
                .parse::<u32>()
                .map_err(|e| Error::Config(format!("AUTH_LOCKOUT_THRESHOLD: {e}")))?;
            config = config.with_lockout_threshold(threshold);
        }
        if let Some(window) = seconds("AUTH_LOCKOUT_WINDOW_SECS")? {
            config = config.with_lockout_window(window);
        }
        if let Some(policy) = optional("AUTH_ORIGIN_POLICY") {
            config = config.with_origin_policy(policy.parse()?);
        }

        let production = matches!(
            optional("AUTH_PRODUCTION").as_deref(),
            Some("1") | Some("true"),
        );
        config = config.with_production(production);

        if let Some(url) = optional("REDIS_URL") {
            config = config.with_redis_url(url);
        }
        if let Some(timeout) = seconds("AUTH_STORE_TIMEOUT_SECS")? {
            config = config.with_store_timeout(timeout);
        }
        if let Some(proxies) = optional("AUTH_TRUSTED_PROXIES") {
            let proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<IpAddr>()
                        .map_err(|e| Error::Config(format!("AUTH_TRUSTED_PROXIES: `{s}`: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            config = config.with_trusted_proxies(proxies);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every lifetime fits under [`MAX_TTL`] and the store timeout is usable.
    ///
    /// Called by [`AuthService::new`](crate::AuthService::new), so values set through
    /// `with_*` are checked as well.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), Error> {
        let bounded = [
            ("access TTL", self.access_ttl),
            ("refresh TTL", self.refresh_ttl),
            ("session TTL", self.session_ttl),
            ("handshake TTL", self.handshake_ttl),
            ("refresh margin", self.refresh_margin),
            ("lockout window", self.lockout_window),
            ("store timeout", self.store_timeout),
        ];
        for (name, value) in bounded {
            if value > MAX_TTL {
                return Err(Error::Config(format!(
                    "{name} of {}s exceeds the {}s maximum",
                    value.as_secs(),
                    MAX_TTL.as_secs()
                )));
            }
        }
        if self.store_timeout.is_zero() {
            return Err(Error::Config("store timeout must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_handshake_ttl(mut self, ttl: Duration) -> Self {
        self.handshake_ttl = ttl;
        self
    }

    /// How close to expiry a provider access token may get before refresh rotates it.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    #[must_use]
    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Production mode: cookies are `Secure` and `SameSite=Strict`.
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Deadline for each call to the session store.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Peers allowed to report the client address through `X-Forwarded-For` or
    /// `X-Real-IP`. Empty (the default) means the socket address is always used.
    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.trusted_proxies = proxies.into_iter().collect();
        self
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn handshake_ttl(&self) -> Duration {
        self.handshake_ttl
    }

    #[must_use]
    pub fn origin_policy(&self) -> OriginPolicy {
        self.origin_policy
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Shared store URL. `None` means the process-local store.
    #[must_use]
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, Error> {
    optional(name).ok_or_else(|| Error::Config(format!("{name} is required")))
}

fn parse_url(name: &str, value: &str) -> Result<Url, Error> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{name}: {e}")))
}

fn seconds(name: &str) -> Result<Option<Duration>, Error> {
    optional(name)
        .map(|v| {
            let secs = v
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("{name}: {e}")))?;
            if secs > MAX_TTL.as_secs() {
                return Err(Error::Config(format!(
                    "{name}: {secs} exceeds the {}s maximum",
                    MAX_TTL.as_secs()
                )));
            }
            Ok(Duration::from_secs(secs))
        })
        .transpose()
}
