//! Mock asset accessor for tests and samples.
//!
//! Routes URLs to canned responses. Unrouted URLs answer 404, so a test
//! exercising failure paths needs no special setup. Request counts are
//! recorded per URL for asserting fetch-once behavior.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use super::{AccessorError, AssetAccessor, AssetResponse, BoxFuture, Header};

/// A canned reply for one URL.
#[derive(Debug, Clone)]
enum MockReply {
    Response { status: u16, body: Bytes },
    Error(AccessorError),
}

/// In-memory accessor routing URLs to canned responses.
#[derive(Default)]
pub struct MockAssetAccessor {
    replies: DashMap<String, MockReply>,
    counts: DashMap<String, AtomicUsize>,
}

impl MockAssetAccessor {
    /// Creates an empty mock; every URL answers 404 until routed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `url` to a 200 response with `body`.
    pub fn insert(&self, url: &str, body: Bytes) {
        self.replies.insert(
            url.to_string(),
            MockReply::Response { status: 200, body },
        );
    }

    /// Routes `url` to an arbitrary status and body.
    pub fn insert_response(&self, url: &str, status: u16, body: Bytes) {
        self.replies
            .insert(url.to_string(), MockReply::Response { status, body });
    }

    /// Routes `url` to a transport-level error.
    pub fn insert_error(&self, url: &str, error: AccessorError) {
        self.replies.insert(url.to_string(), MockReply::Error(error));
    }

    /// Removes the route for `url`, restoring the default 404.
    pub fn remove(&self, url: &str) {
        self.replies.remove(url);
    }

    /// Number of GETs observed for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.counts
            .get(url)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total GETs observed across all URLs.
    pub fn total_requests(&self) -> usize {
        self.counts
            .iter()
            .map(|entry| entry.load(Ordering::Relaxed))
            .sum()
    }
}

impl AssetAccessor for MockAssetAccessor {
    fn get(
        &self,
        url: &str,
        _headers: &[Header],
    ) -> BoxFuture<'static, Result<AssetResponse, AccessorError>> {
        self.counts
            .entry(url.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let reply = self.replies.get(url).map(|r| r.clone());
        let url = url.to_string();

        Box::pin(async move {
            match reply {
                Some(MockReply::Response { status, body }) => Ok(AssetResponse {
                    status,
                    headers: Vec::new(),
                    url,
                    body,
                }),
                Some(MockReply::Error(error)) => Err(error),
                None => Ok(AssetResponse {
                    status: 404,
                    headers: Vec::new(),
                    url,
                    body: Bytes::new(),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routed_url_returns_body() {
        let mock = MockAssetAccessor::new();
        mock.insert("http://x/a", Bytes::from_static(b"hello"));

        let response = mock.get("http://x/a", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"hello"));
        assert_eq!(mock.request_count("http://x/a"), 1);
    }

    #[tokio::test]
    async fn test_unrouted_url_is_404() {
        let mock = MockAssetAccessor::new();
        let response = mock.get("http://x/missing", &[]).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_error_route() {
        let mock = MockAssetAccessor::new();
        mock.insert_error(
            "http://x/down",
            AccessorError::Transport {
                url: "http://x/down".to_string(),
                message: "connection refused".to_string(),
            },
        );
        let result = mock.get("http://x/down", &[]).await;
        assert!(matches!(result, Err(AccessorError::Transport { .. })));
    }
}
