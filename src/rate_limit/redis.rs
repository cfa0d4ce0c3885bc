//! Redis-backed [`CounterStore`].
//!
//! Uses `INCR`, `PTTL`, `PEXPIRE` and `DEL`. The connection is opened on first use and
//! reconnects on its own afterwards, so an unreachable Redis at startup degrades to
//! fail-closed denials instead of preventing the server from booting.

use crate::error::{ConfigError, StoreError};
use crate::rate_limit::store::{CounterStore, Ttl};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Counter store over a shared Redis instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Client,
    address: String,
    conn: std::sync::Arc<OnceCell<ConnectionManager>>,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("address", &self.address)
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Validate `address` without connecting.
    ///
    /// Accepts `redis://` URLs as well as a bare `host:port`, which is read as
    /// `redis://host:port/0`.
    pub fn open(address: &str) -> Result<Self, ConfigError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{address}/0")
        };
        let client = Client::open(url.as_str()).map_err(|e| ConfigError::InvalidStoreAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        info!(target: "tollgate::redis", address = %address, "redis counter store configured");
        Ok(Self {
            client,
            address: address.to_string(),
            conn: std::sync::Arc::new(OnceCell::new()),
        })
    }

    async fn connection(&self, op: &'static str) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!(target: "tollgate::redis", address = %self.address, "connecting to redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(|e| StoreError::unavailable(op, e))?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection("incr").await?;
        let count: i64 = conn.incr(key, 1).await.map_err(|e| StoreError::unavailable("incr", e))?;
        u64::try_from(count).map_err(|_| StoreError::unavailable("incr", format!("negative counter {count}")))
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let mut conn = self.connection("ttl").await?;
        let millis: i64 = conn.pttl(key).await.map_err(|e| StoreError::unavailable("ttl", e))?;
        Ok(match millis {
            -2 => Ttl::Missing,
            ms if ms < 0 => Ttl::Persistent,
            ms => Ttl::Expires(Duration::from_millis(ms.unsigned_abs())),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection("expire").await?;
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let _: bool =
            conn.pexpire(key, millis).await.map_err(|e| StoreError::unavailable("expire", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection("delete").await?;
        let _: i64 = conn.del(key).await.map_err(|e| StoreError::unavailable("delete", e))?;
        Ok(())
    }
}
