//! Raster overlays draped over tile geometry.
//!
//! # Design
//!
//! An overlay is an imagery source on a geographic quadtree (two level-0
//! tiles, as for terrain). When a geometry tile's content loads, the
//! tileset asks each attached overlay to map itself onto that tile: the
//! overlay picks the imagery level whose texel density matches the
//! geometry's geometric error, selects the imagery tile covering the
//! geometry footprint's center, and computes the UV transform from
//! geometry texture coordinates into that imagery tile.
//!
//! Imagery bytes are decoded off-thread and shared through a depot, so two
//! geometry tiles draping the same imagery tile share one texture.

mod ion;
mod url_template;

pub use ion::IonRasterOverlay;
pub use url_template::UrlTemplateRasterOverlay;

use std::f64::consts::PI;
use std::sync::Arc;

use glam::DVec2;
use parking_lot::RwLock;
use tracing::debug;

use crate::accessor::AssetAccessor;
use crate::depot::{DepotError, SharedAssetDepot, SharedAssetHandle};
use crate::geometry::GlobeRectangle;

/// Pixels along each edge of an imagery tile, for level selection.
const TILE_PIXELS: f64 = 256.0;

/// A decoded imagery tile, RGBA8.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl OverlayImage {
    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

/// Coordinate of one imagery tile on the geographic quadtree; `y` counts
/// from the south.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterOverlayTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl RasterOverlayTileId {
    /// The tile's cartographic footprint.
    pub fn rectangle(&self) -> GlobeRectangle {
        let tiles_y = f64::from(1u32 << self.level);
        let size = PI / tiles_y;
        let west = -PI + f64::from(self.x) * size;
        let south = -PI / 2.0 + f64::from(self.y) * size;
        GlobeRectangle::new(west, south, west + size, south + size)
    }
}

/// Load state of one overlay texture draped on one geometry tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterOverlayTileState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// An overlay texture attached to a geometry tile, with the UV transform
/// from the geometry's texture coordinates into the overlay tile.
#[derive(Debug, Clone)]
pub struct RasterMappedTo3DTile {
    pub overlay_tile: RasterOverlayTileId,
    /// Multiply geometry UV by this...
    pub uv_scale: DVec2,
    /// ...then add this, to get overlay-texture UV.
    pub uv_offset: DVec2,
    pub state: RasterOverlayTileState,
    pub texture: Option<SharedAssetHandle<OverlayImage>>,
}

/// Source of imagery tile URLs.
pub trait RasterOverlayProvider: Send + Sync {
    /// URL of one imagery tile.
    fn tile_url(&self, id: RasterOverlayTileId) -> String;

    /// Deepest imagery level the source offers.
    fn maximum_level(&self) -> u32;

    /// Attribution text, shown while the overlay is on screen.
    fn credit(&self) -> Option<&str>;
}

/// One imagery source attached to a tileset.
///
/// The provider may be absent (an ion overlay whose endpoint lookup
/// failed); such an overlay stays attached but maps onto nothing.
pub struct RasterOverlay {
    name: String,
    provider: RwLock<Option<Arc<dyn RasterOverlayProvider>>>,
    accessor: Arc<dyn AssetAccessor>,
    depot: SharedAssetDepot<OverlayImage>,
}

impl RasterOverlay {
    pub(crate) fn with_provider(
        name: impl Into<String>,
        accessor: Arc<dyn AssetAccessor>,
        provider: Option<Arc<dyn RasterOverlayProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            provider: RwLock::new(provider),
            accessor,
            depot: SharedAssetDepot::new(64 * 1024 * 1024),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credit(&self) -> Option<String> {
        self.provider
            .read()
            .as_ref()
            .and_then(|provider| provider.credit().map(str::to_string))
    }

    /// Imagery level whose texel size roughly matches `geometric_error`
    /// meters on the ground.
    fn level_for_geometric_error(&self, geometric_error: f64, maximum_level: u32) -> u32 {
        // Level-0 tiles span half the equator: meters per texel at level L
        // is circumference / (4 * TILE_PIXELS * 2^L).
        let circumference = 2.0 * PI * 6378137.0;
        let target = geometric_error.max(1.0e-2);
        let level = (circumference / (4.0 * TILE_PIXELS * target)).log2().ceil();
        (level.max(0.0) as u32).min(maximum_level)
    }

    /// Maps this overlay onto a geometry tile's footprint, or `None` when
    /// the overlay has no provider or does not intersect the footprint.
    pub fn map_to_tile(
        &self,
        rectangle: &GlobeRectangle,
        geometric_error: f64,
    ) -> Option<RasterMappedTo3DTile> {
        let provider = self.provider.read().clone()?;
        let level = self.level_for_geometric_error(geometric_error, provider.maximum_level());

        let center = rectangle.center();
        let tiles_y = f64::from(1u32 << level);
        let size = PI / tiles_y;
        let x = ((center.longitude + PI) / size).floor();
        let y = ((center.latitude + PI / 2.0) / size).floor();
        if x < 0.0 || y < 0.0 || x >= 2.0 * tiles_y || y >= tiles_y {
            return None;
        }
        let overlay_tile = RasterOverlayTileId {
            level,
            x: x as u32,
            y: y as u32,
        };

        let overlay_rect = overlay_tile.rectangle();
        overlay_rect.intersection(rectangle)?;
        let uv_scale = DVec2::new(
            rectangle.width() / overlay_rect.width(),
            rectangle.height() / overlay_rect.height(),
        );
        let uv_offset = DVec2::new(
            (rectangle.west - overlay_rect.west) / overlay_rect.width(),
            (rectangle.south - overlay_rect.south) / overlay_rect.height(),
        );
        Some(RasterMappedTo3DTile {
            overlay_tile,
            uv_scale,
            uv_offset,
            state: RasterOverlayTileState::Unloaded,
            texture: None,
        })
    }

    /// Fetches and decodes one imagery tile, deduped through the depot.
    pub async fn load_overlay_tile(
        &self,
        id: RasterOverlayTileId,
    ) -> Result<SharedAssetHandle<OverlayImage>, String> {
        let provider = self
            .provider
            .read()
            .clone()
            .ok_or_else(|| format!("Overlay {:?} has no provider", self.name))?;
        let url = provider.tile_url(id);

        if let Some(handle) = self.depot.get_existing(&url) {
            return Ok(handle);
        }
        let body = self
            .accessor
            .get(&url, &[])
            .await
            .map_err(|error| error.to_string())?
            .require_success()
            .map_err(|error| error.to_string())?;

        debug!(url = %url, "Decoding overlay tile");
        self.depot
            .get_or_create(&url, move || async move {
                let image = image::load_from_memory(&body)
                    .map_err(|error| {
                        DepotError::Factory(format!("Failed to decode overlay image: {error}"))
                    })?
                    .to_rgba8();
                let (width, height) = image.dimensions();
                let rgba = image.into_raw();
                let size = rgba.len().max(1) as u64;
                Ok((
                    OverlayImage {
                        width,
                        height,
                        rgba,
                    },
                    size,
                ))
            })
            .await
            .map_err(|DepotError::Factory(message)| message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::MockAssetAccessor;

    struct FixedProvider {
        max_level: u32,
    }

    impl RasterOverlayProvider for FixedProvider {
        fn tile_url(&self, id: RasterOverlayTileId) -> String {
            format!("http://imagery/{}/{}/{}.png", id.level, id.x, id.y)
        }

        fn maximum_level(&self) -> u32 {
            self.max_level
        }

        fn credit(&self) -> Option<&str> {
            Some("Imagery Test")
        }
    }

    fn overlay(max_level: u32) -> Arc<RasterOverlay> {
        RasterOverlay::with_provider(
            "test",
            Arc::new(MockAssetAccessor::new()),
            Some(Arc::new(FixedProvider { max_level })),
        )
    }

    #[test]
    fn test_tile_id_rectangle_tiles_the_globe() {
        let root_west = RasterOverlayTileId {
            level: 0,
            x: 0,
            y: 0,
        };
        let rect = root_west.rectangle();
        assert!((rect.west + PI).abs() < 1e-12);
        assert!((rect.east - 0.0).abs() < 1e-12);
        assert!((rect.north - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_level_selection_tracks_geometric_error() {
        let overlay = overlay(18);
        let provider_max = 18;
        // Coarse geometry wants coarse imagery.
        let coarse = overlay.level_for_geometric_error(100_000.0, provider_max);
        let fine = overlay.level_for_geometric_error(1.0, provider_max);
        assert!(coarse < fine);
        assert!(fine <= provider_max);
        // Absurdly fine geometry clamps to the provider's deepest level.
        assert_eq!(
            overlay.level_for_geometric_error(1.0e-6, provider_max),
            provider_max
        );
    }

    #[test]
    fn test_map_to_tile_produces_contained_uv_transform() {
        let overlay = overlay(18);
        // A small footprint well inside one hemisphere.
        let rectangle = GlobeRectangle::from_degrees(10.0, 10.0, 10.1, 10.1);
        let mapping = overlay.map_to_tile(&rectangle, 50_000.0).unwrap();

        let overlay_rect = mapping.overlay_tile.rectangle();
        assert!(overlay_rect.intersection(&rectangle).is_some());
        // Geometry UV (0.5, 0.5) must land inside [0, 1] overlay UV.
        let center_uv = mapping.uv_scale * 0.5 + mapping.uv_offset;
        assert!((0.0..=1.0).contains(&center_uv.x));
        assert!((0.0..=1.0).contains(&center_uv.y));
    }

    #[test]
    fn test_overlay_without_provider_maps_nothing() {
        let overlay = RasterOverlay::with_provider(
            "empty",
            Arc::new(MockAssetAccessor::new()),
            None,
        );
        let rectangle = GlobeRectangle::from_degrees(0.0, 0.0, 1.0, 1.0);
        assert!(overlay.map_to_tile(&rectangle, 100.0).is_none());
        assert!(overlay.credit().is_none());
    }
}
