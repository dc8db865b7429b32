//! In-memory response cache decorating any asset accessor.
//!
//! Tilesets re-request the same URLs constantly: sibling tiles share
//! textures, subtree files are consulted for every descendant, and overlay
//! grids revisit source imagery. This decorator wraps an inner accessor with
//! a `moka::future::Cache` weighed by body size, so repeat GETs for the same
//! URL are answered from memory.
//!
//! Only successful (2xx) responses are cached. Failures always go back to
//! the network, which is what gives `FailedTemporarily` tiles their retry
//! path.

use std::sync::Arc;

use moka::future::Cache;

use super::{AccessorError, AssetAccessor, AssetResponse, BoxFuture, Header};

/// Caching decorator over an [`AssetAccessor`].
pub struct CachingAccessor {
    inner: Arc<dyn AssetAccessor>,
    cache: Cache<String, AssetResponse>,
}

impl CachingAccessor {
    /// Wraps `inner` with a cache bounded to `max_size_bytes` of response
    /// bodies.
    pub fn new(inner: Arc<dyn AssetAccessor>, max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &String, response: &AssetResponse| -> u32 {
                response.body.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();
        Self { inner, cache }
    }

    /// Current weighted size of cached bodies in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Number of cached responses.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Cache key: URL plus any headers that change the response.
    fn cache_key(url: &str, headers: &[Header]) -> String {
        if headers.is_empty() {
            return url.to_string();
        }
        let mut key = String::from(url);
        for (name, value) in headers {
            key.push('\n');
            key.push_str(name);
            key.push(':');
            key.push_str(value);
        }
        key
    }
}

impl AssetAccessor for CachingAccessor {
    fn get(
        &self,
        url: &str,
        headers: &[Header],
    ) -> BoxFuture<'static, Result<AssetResponse, AccessorError>> {
        let key = Self::cache_key(url, headers);
        let cache = self.cache.clone();
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        let headers = headers.to_vec();

        Box::pin(async move {
            if let Some(hit) = cache.get(&key).await {
                tracing::debug!(url = %url, "response cache hit");
                return Ok(hit);
            }

            let response = inner.get(&url, &headers).await?;
            if response.is_success() {
                cache.insert(key, response.clone()).await;
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::MockAssetAccessor;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let mock = Arc::new(MockAssetAccessor::new());
        mock.insert("http://x/tile.glb", Bytes::from_static(b"payload"));

        let caching = CachingAccessor::new(mock.clone(), 1_000_000);
        let first = caching.get("http://x/tile.glb", &[]).await.unwrap();
        let second = caching.get("http://x/tile.glb", &[]).await.unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(mock.request_count("http://x/tile.glb"), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mock = Arc::new(MockAssetAccessor::new());
        // URL never inserted: responds 404.
        let caching = CachingAccessor::new(mock.clone(), 1_000_000);

        let first = caching.get("http://x/missing", &[]).await.unwrap();
        assert_eq!(first.status, 404);
        let _ = caching.get("http://x/missing", &[]).await.unwrap();
        assert_eq!(mock.request_count("http://x/missing"), 2);
    }

    #[tokio::test]
    async fn test_distinct_headers_are_distinct_entries() {
        let mock = Arc::new(MockAssetAccessor::new());
        mock.insert("http://x/layer", Bytes::from_static(b"terrain"));

        let caching = CachingAccessor::new(mock.clone(), 1_000_000);
        let plain: Vec<Header> = vec![];
        let accept = vec![("accept".to_string(), "application/terrain".to_string())];

        let _ = caching.get("http://x/layer", &plain).await.unwrap();
        let _ = caching.get("http://x/layer", &accept).await.unwrap();
        assert_eq!(mock.request_count("http://x/layer"), 2);
    }
}
