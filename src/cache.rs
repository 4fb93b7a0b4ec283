//! Pluggable access-token storage.
//!
//! The client keeps its token in memory, and optionally mirrors it into a
//! [`TokenCache`] so that several processes (or client instances) sharing the
//! same API key reuse one token instead of each hitting the OAuth endpoint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::{Result, XilingError};
use crate::models::AccessToken;

/// Default prefix for cache keys.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "baidu_api_access_token_";

/// A key-value store with per-entry TTL.
///
/// Implement this over Redis, memcached, a file, or anything else. Entries
/// past their TTL must not be returned from [`get`](Self::get).
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Look up a token.
    async fn get(&self, key: &str) -> Result<Option<AccessToken>>;

    /// Store a token for `ttl`.
    async fn put(&self, key: &str, token: &AccessToken, ttl: Duration) -> Result<()>;

    /// Remove a token.
    async fn del(&self, key: &str) -> Result<()>;
}

/// Build the cache key for an API key: `prefix` + hex SHA-256 of the key.
pub fn cache_key(prefix: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{prefix}{:x}", hasher.finalize())
}

/// In-process [`TokenCache`].
#[derive(Default)]
pub struct MemoryTokenCache {
    entries: Mutex<HashMap<String, (AccessToken, Instant)>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (AccessToken, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| XilingError::Cache("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, key: &str) -> Result<Option<AccessToken>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((token, deadline)) if Instant::now() < *deadline => Ok(Some(token.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, token: &AccessToken, ttl: Duration) -> Result<()> {
        self.lock()?
            .insert(key.to_string(), (token.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
