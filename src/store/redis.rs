use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::KvStore;
use crate::error::Error;

/// Shared [`KvStore`] on Redis.
///
/// TTLs are native (`SET .. EX`); single-use consumption is `GETDEL`, so it is atomic
/// across every process that shares the instance. Requires Redis 6.2+.
///
/// Connecting and every command are bounded by the timeout given at construction
/// (see [`AuthConfig::store_timeout`](crate::AuthConfig::store_timeout)); a stalled
/// server surfaces as [`Error::Store`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable URL and [`Error::Store`] if the
    /// initial connection fails or does not complete within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, Error> {
        let client =
            redis::Client::open(url).map_err(|e| Error::Config(format!("REDIS_URL: {e}")))?;
        let conn = bounded(timeout, "connect", async {
            ConnectionManager::new(client).await.map_err(store_error)
        })
        .await?;
        tracing::info!("Connected shared session store");
        Ok(Self { conn, timeout })
    }

    #[must_use]
    pub fn from_connection(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

impl KvStore for RedisStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), Error> {
        // Redis rejects EX 0.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        bounded(self.timeout, "SET", async move {
            conn.set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(store_error)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, "GET", async move {
            conn.get::<_, Option<String>>(key).await.map_err(store_error)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, "DEL", async move {
            conn.del::<_, ()>(key).await.map_err(store_error)
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, "GETDEL", async move {
            conn.get_del::<_, Option<String>>(key)
                .await
                .map_err(store_error)
        })
        .await
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        tracing::error!(operation, ?timeout, "Session store call timed out");
        Err(Error::Store(format!(
            "{operation} timed out after {}ms",
            timeout.as_millis()
        )))
    })
}

fn store_error(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_call_becomes_store_error() {
        let err = bounded(Duration::from_secs(5), "GET", std::future::pending::<Result<(), Error>>())
            .await
            .unwrap_err();
        match err {
            Error::Store(message) => assert!(message.contains("GET timed out"), "{message}"),
            other => panic!("expected Store error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_call_passes_through() {
        let value = bounded(Duration::from_secs(5), "GET", async { Ok(Some("v".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("v"));

        let err = bounded(Duration::from_secs(5), "DEL", async {
            Err::<(), _>(Error::Store("connection refused".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Store(m) if m == "connection refused"));
    }
}
