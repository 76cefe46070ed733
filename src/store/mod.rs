//! Key/value persistence for handshakes and sessions.
//!
//! Two backends implement [`KvStore`]:
//!
//! - [`MemoryStore`]: process-local. Suitable for a single instance only; logout and
//!   expiry are not visible to other processes.
//! - [`RedisStore`] (feature `redis`): shared, with native TTL. Required once more
//!   than one process serves the same users.
//!
//! Everything above this module goes through [`AuthStore`], which owns the key layout
//! and serialization.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::error::Error;
use crate::types::{Handshake, Session, SessionId, epoch_millis};

const HANDSHAKE_PREFIX: &str = "auth:handshake:";
const SESSION_PREFIX: &str = "auth:session:";
const ACTIVITY_PREFIX: &str = "auth:activity:";

/// Backend contract. Values are opaque strings; expiry is owned by the backend.
pub trait KvStore: Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    fn put(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Look up a live value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, Error>> + Send;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Atomically read and remove a value. Of two concurrent callers for the same key,
    /// at most one observes `Some`.
    fn take(&self, key: &str) -> impl Future<Output = Result<Option<String>, Error>> + Send;
}

/// Typed facade over a [`KvStore`].
#[derive(Debug)]
pub struct AuthStore<S> {
    backend: S,
}

impl<S: KvStore> AuthStore<S> {
    #[must_use]
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub async fn put_handshake(
        &self,
        state: &str,
        handshake: &Handshake,
        ttl: Duration,
    ) -> Result<(), Error> {
        self.put_json(&handshake_key(state), handshake, ttl).await
    }

    /// Consume the handshake for `state`. A second call for the same state returns `None`.
    pub async fn take_handshake(&self, state: &str) -> Result<Option<Handshake>, Error> {
        let raw = self.backend.take(&handshake_key(state)).await?;
        decode(raw)
    }

    pub async fn put_session(&self, session: &Session, ttl: Duration) -> Result<(), Error> {
        self.put_json(&session_key(&session.session_id), session, ttl)
            .await
    }

    /// Load a session, folding in the latest recorded activity.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, Error> {
        let raw = self.backend.get(&session_key(session_id)).await?;
        let Some(mut session) = decode::<Session>(raw)? else {
            return Ok(None);
        };

        let activity = self.backend.get(&activity_key(session_id)).await?;
        if let Some(at) = activity
            .and_then(|ms| ms.parse::<i128>().ok())
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms * 1_000_000).ok())
        {
            session.last_activity_at = session.last_activity_at.max(at);
        }
        Ok(Some(session))
    }

    /// Record activity without rewriting the session record, so a concurrent provider
    /// token rotation is never overwritten by a stale copy.
    pub async fn touch_session(
        &self,
        session_id: &SessionId,
        at: OffsetDateTime,
        ttl: Duration,
    ) -> Result<(), Error> {
        self.backend
            .put(&activity_key(session_id), epoch_millis(at).to_string(), ttl)
            .await
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), Error> {
        self.backend.delete(&session_key(session_id)).await?;
        self.backend.delete(&activity_key(session_id)).await
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), Error> {
        let raw = serde_json::to_string(value)?;
        self.backend.put(key, raw, ttl).await
    }
}

fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, Error> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(Into::into)
}

fn handshake_key(state: &str) -> String {
    format!("{HANDSHAKE_PREFIX}{state}")
}

fn session_key(session_id: &SessionId) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn activity_key(session_id: &SessionId) -> String {
    format!("{ACTIVITY_PREFIX}{session_id}")
}
