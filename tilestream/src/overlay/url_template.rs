//! Overlay provider for `{z}/{x}/{y}` URL-template imagery services.

use std::sync::Arc;

use crate::accessor::AssetAccessor;

use super::{RasterOverlay, RasterOverlayProvider, RasterOverlayTileId};

pub(crate) struct TemplateProvider {
    template: String,
    maximum_level: u32,
    credit: Option<String>,
}

impl TemplateProvider {
    pub(crate) fn new(
        template: impl Into<String>,
        maximum_level: u32,
        credit: Option<String>,
    ) -> Self {
        Self {
            template: template.into(),
            maximum_level,
            credit,
        }
    }
}

impl RasterOverlayProvider for TemplateProvider {
    fn tile_url(&self, id: RasterOverlayTileId) -> String {
        self.template
            .replace("{z}", &id.level.to_string())
            .replace("{x}", &id.x.to_string())
            .replace("{y}", &id.y.to_string())
    }

    fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    fn credit(&self) -> Option<&str> {
        self.credit.as_deref()
    }
}

/// Imagery overlay over a `{z}/{x}/{y}` URL template.
pub struct UrlTemplateRasterOverlay;

impl UrlTemplateRasterOverlay {
    /// Creates the overlay. `template` must contain `{z}`, `{x}`, and `{y}`
    /// placeholders.
    pub fn new(
        name: impl Into<String>,
        accessor: Arc<dyn AssetAccessor>,
        template: impl Into<String>,
        maximum_level: u32,
        credit: Option<String>,
    ) -> Arc<RasterOverlay> {
        RasterOverlay::with_provider(
            name,
            accessor,
            Some(Arc::new(TemplateProvider::new(
                template,
                maximum_level,
                credit,
            ))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_substitution() {
        let provider = TemplateProvider::new("http://x/{z}/{x}/{y}.png", 12, None);
        let url = provider.tile_url(RasterOverlayTileId { level: 4, x: 9, y: 2 });
        assert_eq!(url, "http://x/4/9/2.png");
    }
}
