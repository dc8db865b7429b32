//! Asset accessor backed by reqwest.

use std::time::Duration;

use bytes::Bytes;

use super::{AccessorError, AssetAccessor, AssetResponse, BoxFuture, Header};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Real HTTP accessor using a shared `reqwest::Client`.
///
/// The client is cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ReqwestAccessor {
    client: reqwest::Client,
}

impl ReqwestAccessor {
    /// Creates an accessor with the default timeout.
    pub fn new() -> Result<Self, AccessorError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates an accessor with a custom request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, AccessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AccessorError::Setup(e.to_string()))?;
        Ok(Self { client })
    }
}

impl AssetAccessor for ReqwestAccessor {
    fn get(
        &self,
        url: &str,
        headers: &[Header],
    ) -> BoxFuture<'static, Result<AssetResponse, AccessorError>> {
        let client = self.client.clone();
        let url = url.to_string();
        let headers = headers.to_vec();

        Box::pin(async move {
            let mut request = client.get(&url);
            for (name, value) in &headers {
                request = request.header(name, value);
            }

            let response = request.send().await.map_err(|e| AccessorError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let response_headers: Vec<Header> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();

            let body: Bytes = response.bytes().await.map_err(|e| AccessorError::Transport {
                url: url.clone(),
                message: format!("Failed to read response body: {}", e),
            })?;

            tracing::debug!(url = %final_url, status, bytes = body.len(), "asset fetched");

            Ok(AssetResponse {
                status,
                headers: response_headers,
                url: final_url,
                body,
            })
        })
    }
}
