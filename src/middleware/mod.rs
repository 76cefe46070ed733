//! Axum integration.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use encore_auth::{AuthConfig, AuthService, MemoryStore};
//! use encore_auth::middleware::{AuthContext, AuthError, AuthState, auth_routes, authenticate};
//!
//! let service = Arc::new(AuthService::new(AuthConfig::from_env()?, MemoryStore::new())?);
//! let state = AuthState::new(service);
//!
//! let app = axum::Router::new()
//!     .route("/library", axum::routing::get(library))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate::<MemoryStore>))
//!     .merge(auth_routes(state));
//!
//! async fn library(auth: AuthContext) -> Result<String, AuthError> {
//!     auth.require_scopes(&["user-library-read"])?;
//!     Ok("...".into())
//! }
//! ```

mod cookies;
mod error;
mod extractor;
mod routes;
mod state;
mod types;

pub use error::AuthError;
pub use extractor::{
    AuthContext, RequireAuth, authenticate, client_origin, require_auth, resolve_auth,
};
pub use routes::auth_routes;
pub use state::AuthState;
