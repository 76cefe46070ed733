//! First-party signed tokens.
//!
//! Access and refresh tokens are PASETO `v4.local` tokens keyed by the SHA-256 of the
//! server signing secret. They prove possession of a session; the session record in
//! the store stays the authority on whether that session is still alive.

use std::time::Duration;

use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::version4::V4;
use pasetors::{Local, local};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::types::{SessionId, UserId};

pub const TOKEN_ISSUER: &str = "encore-auth";
const TOKEN_PREFIX: &str = "v4.local.";
const MIN_SECRET_LEN: usize = 32;

const CLAIM_SESSION: &str = "sid";
const CLAIM_TYPE: &str = "typ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// Claims carried by every token this crate issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub token_type: TokenType,
}

/// An access/refresh pair bound to one session.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Mints and verifies tokens with a single symmetric key.
pub struct TokenSigner {
    key: SymmetricKey<V4>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Derive a signing key from the server secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret is shorter than 32 bytes.
    pub fn new(secret: &SecretString) -> Result<Self, Error> {
        let secret = secret.expose_secret();
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let key = SymmetricKey::<V4>::from(digest.as_slice())
            .map_err(|e| Error::Config(format!("signing key: {e}")))?;
        Ok(Self { key })
    }

    /// Sign `claims` into a token valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the claim set cannot be built or sealed.
    pub fn sign(&self, claims: &TokenClaims, ttl: Duration) -> Result<String, Error> {
        let mut payload =
            Claims::new_expires_in(&ttl).map_err(|e| Error::Config(format!("claims: {e}")))?;
        self.fill(&mut payload, claims)?;
        self.seal(&payload)
    }

    /// Verify a token and return its claims.
    ///
    /// Fails closed: any structural, cryptographic, temporal or claim problem yields
    /// [`Error::InvalidToken`] with no indication of which check failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`].
    pub fn verify(&self, token: &str) -> Result<TokenClaims, Error> {
        self.verify_inner(token).ok_or(Error::InvalidToken)
    }

    /// Verify a token and additionally require it to be of `expected` type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`].
    pub fn verify_typed(&self, token: &str, expected: TokenType) -> Result<TokenClaims, Error> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(Error::InvalidToken);
        }
        Ok(claims)
    }

    /// Mint an access/refresh pair for a session.
    ///
    /// # Errors
    ///
    /// Propagates [`TokenSigner::sign`] failures.
    pub fn issue_pair(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<TokenPair, Error> {
        let access = TokenClaims {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            token_type: TokenType::Access,
        };
        let refresh = TokenClaims {
            token_type: TokenType::Refresh,
            ..access.clone()
        };
        Ok(TokenPair {
            access_token: self.sign(&access, access_ttl)?,
            refresh_token: self.sign(&refresh, refresh_ttl)?,
            expires_in: access_ttl.as_secs(),
        })
    }

    fn fill(&self, payload: &mut Claims, claims: &TokenClaims) -> Result<(), Error> {
        let build = |e: pasetors::errors::Error| Error::Config(format!("claims: {e}"));
        payload.issuer(TOKEN_ISSUER).map_err(build)?;
        payload.subject(&claims.user_id.0).map_err(build)?;
        payload
            .add_additional(CLAIM_SESSION, claims.session_id.as_str())
            .map_err(build)?;
        payload
            .add_additional(CLAIM_TYPE, claims.token_type.as_str())
            .map_err(build)?;
        Ok(())
    }

    fn seal(&self, payload: &Claims) -> Result<String, Error> {
        local::encrypt(&self.key, payload, None, None)
            .map_err(|e| Error::Config(format!("token sealing: {e}")))
    }

    fn verify_inner(&self, token: &str) -> Option<TokenClaims> {
        if !token.starts_with(TOKEN_PREFIX) {
            return None;
        }

        // Validates exp, nbf and iat by default.
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);

        let untrusted = UntrustedToken::<Local, V4>::try_from(token).ok()?;
        let trusted = local::decrypt(&self.key, &untrusted, &rules, None, None).ok()?;
        let payload = trusted.payload_claims()?;

        let text = |key: &str| {
            payload
                .get_claim(key)
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
        };

        Some(TokenClaims {
            user_id: UserId(text("sub")?),
            session_id: SessionId(text(CLAIM_SESSION)?),
            token_type: TokenType::parse(&text(CLAIM_TYPE)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secret: &str) -> TokenSigner {
        TokenSigner::new(&SecretString::from(secret.to_string())).unwrap()
    }

    fn claims(token_type: TokenType) -> TokenClaims {
        TokenClaims {
            user_id: UserId("user-1".into()),
            session_id: SessionId("sess-1".into()),
            token_type,
        }
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn round_trip_preserves_claims() {
        let signer = signer(SECRET);
        for token_type in [TokenType::Access, TokenType::Refresh] {
            let token = signer
                .sign(&claims(token_type), Duration::from_secs(60))
                .unwrap();
            assert!(token.starts_with("v4.local."));
            assert_eq!(signer.verify(&token).unwrap(), claims(token_type));
        }
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = TokenSigner::new(&SecretString::from("short".to_string())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let token = signer(SECRET)
            .sign(&claims(TokenType::Access), Duration::from_secs(60))
            .unwrap();
        let other = signer("ffffffffffffffffffffffffffffffff");
        assert!(matches!(other.verify(&token), Err(Error::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = signer(SECRET);
        let mut payload = Claims::new().unwrap();
        signer.fill(&mut payload, &claims(TokenType::Access)).unwrap();
        payload.expiration("2020-01-01T00:00:00+00:00").unwrap();
        let token = signer.seal(&payload).unwrap();

        assert!(matches!(signer.verify(&token), Err(Error::InvalidToken)));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let signer = signer(SECRET);
        let mut payload = Claims::new().unwrap();
        payload.issuer("someone-else").unwrap();
        payload.subject("user-1").unwrap();
        payload.add_additional("sid", "sess-1").unwrap();
        payload.add_additional("typ", "access").unwrap();
        let token = signer.seal(&payload).unwrap();

        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn missing_session_claim_is_rejected() {
        let signer = signer(SECRET);
        let mut payload = Claims::new().unwrap();
        payload.issuer(TOKEN_ISSUER).unwrap();
        payload.subject("user-1").unwrap();
        payload.add_additional("typ", "access").unwrap();
        let token = signer.seal(&payload).unwrap();

        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let signer = signer(SECRET);
        for garbage in ["", "v4.local.", "v4.public.abc", "not-a-token", "v4.local.!!!"] {
            assert!(signer.verify(garbage).is_err(), "accepted {garbage:?}");
        }
    }

    #[test]
    fn tampered_token_is_rejected() {
        let signer = signer(SECRET);
        let token = signer
            .sign(&claims(TokenType::Access), Duration::from_secs(60))
            .unwrap();
        let mut bytes = token.into_bytes();
        let mid = TOKEN_PREFIX.len() + (bytes.len() - TOKEN_PREFIX.len()) / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert!(signer.verify(&tampered).is_err());
    }

    #[test]
    fn type_is_enforced() {
        let signer = signer(SECRET);
        let refresh = signer
            .sign(&claims(TokenType::Refresh), Duration::from_secs(60))
            .unwrap();
        assert!(signer.verify_typed(&refresh, TokenType::Access).is_err());
        assert!(signer.verify_typed(&refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn pair_is_bound_to_session() {
        let signer = signer(SECRET);
        let pair = signer
            .issue_pair(
                &UserId("u".into()),
                &SessionId("s".into()),
                Duration::from_secs(3600),
                Duration::from_secs(7 * 24 * 3600),
            )
            .unwrap();
        assert_eq!(pair.expires_in, 3600);

        let access = signer.verify_typed(&pair.access_token, TokenType::Access).unwrap();
        let refresh = signer.verify_typed(&pair.refresh_token, TokenType::Refresh).unwrap();
        assert_eq!(access.session_id, refresh.session_id);
        assert_eq!(access.session_id.as_str(), "s");
    }
}
