#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod lockout;
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod profile;
pub mod service;
pub mod store;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use config::{AuthConfig, OriginPolicy};
pub use error::Error;
pub use lockout::LockoutTracker;
pub use oauth::{AuthClient, OAuthConfig, TokenResponse};
pub use pkce::{PkcePair, generate_code_challenge, generate_code_verifier, generate_pkce, generate_state};
pub use profile::UserProfile;
pub use service::{
    AuthService, AuthorizationRequest, CallbackParams, LoginOutcome, RefreshedAccess,
    VerifiedSession,
};
pub use store::{AuthStore, KvStore, MemoryStore};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use token::{TokenClaims, TokenPair, TokenSigner, TokenType};
pub use types::{ClientOrigin, Handshake, ProviderTokens, Session, SessionId, SessionInfo, UserId};
