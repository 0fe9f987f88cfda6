use std::{future::Future, time::Duration};

use crate::{
    cache::{CacheError, CacheState},
    error::AppError,
    models::User,
    repository::RepositoryState,
};

/// UserResolver
///
/// Cache-aside lookup from identity ID to a full `User` snapshot. Runs on every
/// authenticated request.
///
/// Concurrent misses for the same ID may both read through and both populate the
/// cache. Both writes come from the same store row, so no locking is taken on the
/// miss path.
#[derive(Clone)]
pub struct UserResolver {
    repo: RepositoryState,
    cache: CacheState,
    timeout: Duration,
}

impl UserResolver {
    pub fn new(repo: RepositoryState, cache: CacheState, timeout: Duration) -> Self {
        Self {
            repo,
            cache,
            timeout,
        }
    }

    /// resolve
    ///
    /// 1. Cache hit → returned without touching the store.
    /// 2. Miss → store lookup (`NotFound` stays `NotFound`, anything else is `Internal`).
    /// 3. Store hit → cache populated, then returned.
    pub async fn resolve(&self, id: i64) -> Result<User, AppError> {
        if let Some(user) = bounded(self.timeout, self.cache.get(id)).await? {
            tracing::debug!(user_id = id, "identity cache hit");
            return Ok(user);
        }
        tracing::debug!(user_id = id, "identity cache miss");

        let user = self.repo.get_user_by_id(id).await?;

        bounded(self.timeout, self.cache.set(&user)).await?;
        Ok(user)
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(CacheError::Timeout))
}
