//! [`LockStore`] on Redis.
//!
//! Acquire is `SET NX PX`. Renew and release are Lua scripts so the ownership
//! check and the write happen in one atomic step on the server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use tokio::sync::Mutex;

use crate::error::{ConfigError, StoreError};
use crate::traits::LockStore;

const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLockStore {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    // Established on first use so the process can start while Redis is down.
    conn: Mutex<Option<ConnectionManager>>,
    op_timeout: Duration,
    renew: Script,
    release: Script,
}

impl RedisLockStore {
    /// Parses `url` without connecting.
    pub fn open(url: &str, op_timeout: Duration) -> Result<Self, ConfigError> {
        let client =
            Client::open(url).map_err(|e| ConfigError::InvalidStoreUrl(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                conn: Mutex::new(None),
                op_timeout,
                renew: Script::new(RENEW_SCRIPT),
                release: Script::new(RELEASE_SCRIPT),
            }),
        })
    }

    pub fn op_timeout(&self) -> Duration {
        self.inner.op_timeout
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let mut slot = self.inner.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.inner.client.clone()).await?;
        tracing::info!("Connected to Redis");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let after = self.inner.op_timeout;
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| StoreError::Timeout { op, after })?
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl LockStore for RedisLockStore {
    async fn acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded("acquire", async {
            let mut conn = self.connection().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn renew(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded("renew", async {
            let mut conn = self.connection().await?;
            let updated: i64 = self
                .inner
                .renew
                .key(key)
                .arg(expected)
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn)
                .await?;
            Ok(updated == 1)
        })
        .await
    }

    async fn release(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.bounded("release", async {
            let mut conn = self.connection().await?;
            let deleted: i64 = self
                .inner
                .release
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn ping(&self) -> Result<bool, StoreError> {
        self.bounded("ping", async {
            let mut conn = self.connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong == "PONG")
        })
        .await
    }
}

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        let transient = e.is_io_error()
            || e.is_timeout()
            || e.is_connection_dropped()
            || e.is_connection_refusal();
        if transient {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_malformed_url() {
        let err = RedisLockStore::open("not a url", Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidStoreUrl(_)));
    }

    #[test]
    fn open_does_not_connect() {
        // Nothing listens on port 1; open must still succeed.
        let store =
            RedisLockStore::open("redis://127.0.0.1:1/0", Duration::from_millis(50)).unwrap();
        assert_eq!(store.op_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn ttl_is_sent_in_milliseconds_and_never_zero() {
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_as_store_error() {
        let store =
            RedisLockStore::open("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();
        assert!(store.ping().await.is_err());
    }
}
