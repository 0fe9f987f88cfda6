use async_trait::async_trait;
use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

use crate::models::User;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache call exceeded its timeout")]
    Timeout,
}

/// UserCache
///
/// Narrow capability over whatever backs the identity cache. Only `get`/`set` are
/// exposed; entries expire on the backend's own schedule.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>, CacheError>;
    async fn set(&self, user: &User) -> Result<(), CacheError>;
}

pub type CacheState = Arc<dyn UserCache>;

/// MokaUserCache
///
/// In-process cache keyed by identity ID. The time-to-live bounds how long a
/// snapshot can lag behind role or activation changes made elsewhere.
#[derive(Clone)]
pub struct MokaUserCache {
    inner: Cache<i64, User>,
}

impl MokaUserCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }
}

#[async_trait]
impl UserCache for MokaUserCache {
    async fn get(&self, id: i64) -> Result<Option<User>, CacheError> {
        Ok(self.inner.get(&id).await)
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        self.inner.insert(user.id, user.clone()).await;
        Ok(())
    }
}

/// NoopUserCache
///
/// Always misses. Selected when caching is disabled in configuration.
#[derive(Clone, Default)]
pub struct NoopUserCache;

#[async_trait]
impl UserCache for NoopUserCache {
    async fn get(&self, _id: i64) -> Result<Option<User>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _user: &User) -> Result<(), CacheError> {
        Ok(())
    }
}
