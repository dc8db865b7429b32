//! Overlay provider backed by a Cesium ion imagery asset.
//!
//! ion assets are resolved through a per-asset endpoint document that
//! names the actual imagery service and a scoped access token. Endpoint
//! resolution failure leaves the overlay attached but inert, so a bad
//! asset id or token degrades the scene instead of failing it.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::accessor::AssetAccessor;

use super::url_template::TemplateProvider;
use super::{RasterOverlay, RasterOverlayProvider};

const ION_API_BASE: &str = "https://api.cesium.com/v1/assets";

/// How deep to sample imagery when the endpoint doesn't say.
const DEFAULT_MAXIMUM_LEVEL: u32 = 18;

#[derive(Debug, Deserialize)]
struct IonEndpoint {
    #[serde(rename = "type")]
    kind: String,
    url: Option<String>,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(default)]
    attributions: Vec<IonAttribution>,
}

#[derive(Debug, Deserialize)]
struct IonAttribution {
    html: String,
}

/// Imagery overlay for a Cesium ion asset.
pub struct IonRasterOverlay;

impl IonRasterOverlay {
    /// Resolves the asset endpoint and creates the overlay. On any failure
    /// the overlay is created without a provider and logs a warning.
    pub async fn new(
        name: impl Into<String>,
        accessor: Arc<dyn AssetAccessor>,
        asset_id: u64,
        access_token: &str,
    ) -> Arc<RasterOverlay> {
        let name = name.into();
        let provider = match Self::resolve_endpoint(&accessor, asset_id, access_token).await {
            Ok(provider) => Some(provider),
            Err(message) => {
                warn!(asset_id, "ion overlay endpoint resolution failed: {message}");
                None
            }
        };
        RasterOverlay::with_provider(name, accessor, provider)
    }

    async fn resolve_endpoint(
        accessor: &Arc<dyn AssetAccessor>,
        asset_id: u64,
        access_token: &str,
    ) -> Result<Arc<dyn RasterOverlayProvider>, String> {
        let url = format!("{ION_API_BASE}/{asset_id}/endpoint?access_token={access_token}");
        let body = accessor
            .get(&url, &[])
            .await
            .map_err(|error| error.to_string())?
            .require_success()
            .map_err(|error| error.to_string())?;
        let endpoint: IonEndpoint = serde_json::from_slice(&body)
            .map_err(|error| format!("Failed to parse ion endpoint: {error}"))?;

        if endpoint.kind != "IMAGERY" {
            return Err(format!(
                "ion asset {asset_id} is {:?}, not IMAGERY",
                endpoint.kind
            ));
        }
        let template = endpoint
            .url
            .ok_or_else(|| format!("ion asset {asset_id} endpoint names no imagery URL"))?;
        // The scoped token rides along as a query parameter on tile URLs.
        let template = match endpoint.access_token {
            Some(token) if !template.contains("access_token") => {
                let separator = if template.contains('?') { '&' } else { '?' };
                format!("{template}{separator}access_token={token}")
            }
            _ => template,
        };
        let credit = endpoint
            .attributions
            .first()
            .map(|attribution| attribution.html.clone());

        Ok(Arc::new(TemplateProvider::new(
            template,
            DEFAULT_MAXIMUM_LEVEL,
            credit,
        )))
    }
}
