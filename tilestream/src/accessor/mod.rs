//! Asset access: HTTP fetch abstraction for tile content.
//!
//! Everything the engine downloads — tileset.json documents, subtree files,
//! tile payloads, overlay imagery — goes through the [`AssetAccessor`] trait.
//! The abstraction exists for dependency injection: production code uses
//! [`ReqwestAccessor`], tests use [`MockAssetAccessor`], and either can be
//! wrapped in a [`CachingAccessor`] that dedupes repeat GETs in memory.
//!
//! # Error Surface
//!
//! Transport failures and non-2xx statuses are both ordinary values the
//! caller must check: a request that reached the server still resolves `Ok`
//! with its status code, and [`AssetResponse::require_success`] converts a
//! bad status into an [`AccessorError`]. Nothing panics across this
//! boundary.
//!
//! # Dyn Compatibility
//!
//! The trait uses `Pin<Box<dyn Future>>` for its async method so loaders can
//! hold an `Arc<dyn AssetAccessor>` polymorphically.

mod caching;
mod mock;
mod reqwest_accessor;

pub use caching::CachingAccessor;
pub use mock::MockAssetAccessor;
pub use reqwest_accessor::ReqwestAccessor;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from asset access.
#[derive(Debug, Error, Clone)]
pub enum AccessorError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The accessor could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Setup(String),
}

impl AccessorError {
    /// True for failures worth retrying on the next selection: transport
    /// errors and server-side/ratelimit statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            AccessorError::Transport { .. } => true,
            AccessorError::Status { status, .. } => *status >= 500 || *status == 429,
            AccessorError::Setup(_) => false,
        }
    }
}

/// A single request header as a name/value pair.
pub type Header = (String, String);

/// A completed HTTP response.
#[derive(Debug, Clone)]
pub struct AssetResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: Vec<Header>,
    /// The URL that produced this response, after redirects.
    pub url: String,
    /// Response body.
    pub body: Bytes,
}

impl AssetResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body for a 2xx response, or a status error otherwise.
    pub fn require_success(self) -> Result<Bytes, AccessorError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(AccessorError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// The first header with the given lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Asynchronous GET access to remote assets.
pub trait AssetAccessor: Send + Sync {
    /// Performs an HTTP GET.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL to fetch
    /// * `headers` - Extra request headers
    ///
    /// # Returns
    ///
    /// `Ok(response)` whenever the server answered, including non-2xx
    /// statuses; `Err` only when no response was produced at all.
    fn get(&self, url: &str, headers: &[Header]) -> BoxFuture<'static, Result<AssetResponse, AccessorError>>;
}

/// Resolves `relative` against `base`, keeping absolute URLs untouched.
///
/// Handles the three shapes tile content descriptors use: absolute URLs,
/// root-relative paths, and paths relative to the base document's directory.
pub fn resolve_url(base: &str, relative: &str) -> String {
    if relative.contains("://") {
        return relative.to_string();
    }

    if let Some(rest) = relative.strip_prefix('/') {
        // Root-relative: keep scheme and authority of the base.
        if let Some(scheme_end) = base.find("://") {
            let authority_start = scheme_end + 3;
            let authority_end = base[authority_start..]
                .find('/')
                .map(|i| authority_start + i)
                .unwrap_or(base.len());
            return format!("{}/{}", &base[..authority_end], rest);
        }
        return relative.to_string();
    }

    match base.rfind('/') {
        Some(slash) if base.contains("://") && slash > base.find("://").unwrap_or(0) + 2 => {
            format!("{}/{}", &base[..slash], relative)
        }
        _ => format!("{}/{}", base.trim_end_matches('/'), relative),
    }
}
