use std::sync::Arc;

use super::cookies::CookiePolicy;
use crate::service::AuthService;
use crate::store::KvStore;

pub(crate) const AUTH_PATH: &str = "/auth";

/// Shared state for the [`authenticate`](super::authenticate) layer and the auth routes.
pub struct AuthState<S> {
    pub(super) service: Arc<AuthService<S>>,
    pub(super) cookies: CookiePolicy,
}

impl<S: KvStore> AuthState<S> {
    #[must_use]
    pub fn new(service: Arc<AuthService<S>>) -> Self {
        let cookies = CookiePolicy::new(service.config(), AUTH_PATH);
        Self { service, cookies }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<AuthService<S>> {
        &self.service
    }
}

// Manual Clone: avoid derive adding an `S: Clone` bound.
impl<S> Clone for AuthState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            cookies: self.cookies.clone(),
        }
    }
}
