use std::time::Duration as StdDuration;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::config::AuthConfig;

pub(crate) const ACCESS_COOKIE_NAME: &str = "encore_access";
pub(crate) const REFRESH_COOKIE_NAME: &str = "encore_refresh";

/// Attributes shared by the access and refresh cookies.
///
/// `HttpOnly` is unconditional. Production adds `Secure` and tightens `SameSite` to
/// `Strict`; development keeps `Lax` so plain-http localhost flows work.
#[derive(Debug, Clone)]
pub(crate) struct CookiePolicy {
    secure: bool,
    same_site: SameSite,
    access_max_age: Duration,
    refresh_max_age: Duration,
    refresh_path: String,
}

impl CookiePolicy {
    pub(crate) fn new(config: &AuthConfig, auth_path: &str) -> Self {
        let production = config.is_production();
        Self {
            secure: production,
            same_site: if production {
                SameSite::Strict
            } else {
                SameSite::Lax
            },
            access_max_age: to_cookie_age(config.access_ttl()),
            refresh_max_age: to_cookie_age(config.refresh_ttl()),
            refresh_path: auth_path.to_string(),
        }
    }

    pub(crate) fn access_cookie(&self, token: &str) -> Cookie<'static> {
        self.build(ACCESS_COOKIE_NAME, token, "/", self.access_max_age)
    }

    /// Scoped to the auth routes: the refresh token is only ever sent to refresh and
    /// logout.
    pub(crate) fn refresh_cookie(&self, token: &str) -> Cookie<'static> {
        self.build(
            REFRESH_COOKIE_NAME,
            token,
            &self.refresh_path,
            self.refresh_max_age,
        )
    }

    /// Expire both cookies. Path must match what they were set with.
    pub(crate) fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.build(ACCESS_COOKIE_NAME, "", "/", Duration::ZERO))
            .add(self.build(
                REFRESH_COOKIE_NAME,
                "",
                &self.refresh_path,
                Duration::ZERO,
            ))
    }

    fn build(&self, name: &'static str, value: &str, path: &str, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path(path.to_string())
            .max_age(max_age)
            .build()
    }
}

fn to_cookie_age(ttl: StdDuration) -> Duration {
    Duration::try_from(ttl).unwrap_or(Duration::MAX)
}

pub(crate) fn access_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, ACCESS_COOKIE_NAME)
}

pub(crate) fn refresh_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, REFRESH_COOKIE_NAME)
}

fn non_empty(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
