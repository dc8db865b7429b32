//! Loader for layer.json quantized-mesh terrain services.
//!
//! # Design
//!
//! The service describes a TMS-style geographic quadtree: two root tiles at
//! level 0 splitting the globe at the antimeridian-to-prime-meridian line,
//! with per-level availability rectangles enumerating which tiles exist.
//! All availability lives in the layer document, so child resolution never
//! touches the network; only tile content does.
//!
//! Decoded meshes come back as unit-cube fractions and are mapped onto the
//! WGS84 ellipsoid here using the tile's cartographic rectangle, so the
//! rest of the pipeline only ever sees ECEF geometry.

use std::f64::consts::PI;
use std::sync::Arc;

use futures_util::FutureExt;
use glam::{DMat4, DVec3};
use serde::Deserialize;
use tracing::debug;

use crate::accessor::{resolve_url, AssetAccessor, BoxFuture, Header};
use crate::content::TileModel;
use crate::depot::{DepotError, SharedAssetDepot};
use crate::error::ErrorList;
use crate::geometry::{
    BoundingRegion, BoundingVolume, Cartographic, Ellipsoid, GlobeRectangle,
};
use crate::implicit::QuadtreeTileId;
use crate::loader::quantized_mesh::decode_quantized_mesh;
use crate::loader::{
    ChildrenResolution, ContentOutcome, DescriptorChildren, TileDescriptor, TileLoadResult,
    TileSnapshot, TilesetContentLoader,
};
use crate::tile::{TileContentKind, TileId, TileRefine};

/// Geometric error of a level-0 terrain tile, from the 65-sample heightmap
/// equivalence over two root tiles.
const LEVEL_ZERO_GEOMETRIC_ERROR: f64 = 2.0 * PI * 6378137.0 * 0.25 / (65.0 * 2.0);

/// Height bounds assumed for tiles whose content has not loaded yet. Wide
/// enough for Earth terrain, tight enough to cull usefully.
const DEFAULT_MINIMUM_HEIGHT: f64 = -1000.0;
const DEFAULT_MAXIMUM_HEIGHT: f64 = 9000.0;

const ACCEPT_HEADER: &str = "application/vnd.quantized-mesh,application/octet-stream;q=0.9";

// =========================================================================
// layer.json document
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
struct AvailabilityRect {
    #[serde(rename = "startX")]
    start_x: u32,
    #[serde(rename = "startY")]
    start_y: u32,
    #[serde(rename = "endX")]
    end_x: u32,
    #[serde(rename = "endY")]
    end_y: u32,
}

impl AvailabilityRect {
    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.start_x && x <= self.end_x && y >= self.start_y && y <= self.end_y
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LayerJson {
    format: String,
    tiles: Vec<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    maxzoom: Option<u32>,
    #[serde(default)]
    projection: Option<String>,
    #[serde(default)]
    available: Vec<Vec<AvailabilityRect>>,
    #[serde(default)]
    attribution: Option<String>,
}

// =========================================================================
// Loader
// =========================================================================

struct LayerInner {
    accessor: Arc<dyn AssetAccessor>,
    depot: Arc<SharedAssetDepot<TileModel>>,
    /// Content template resolved against the layer.json URL.
    template: String,
    version: String,
    maxzoom: u32,
    available: Vec<Vec<AvailabilityRect>>,
    attribution: Option<String>,
}

/// Loader for a quantized-mesh terrain layer.
pub struct LayerJsonLoader {
    inner: Arc<LayerInner>,
}

impl LayerJsonLoader {
    /// Fetches and validates layer.json, returning the loader together with
    /// a synthetic root descriptor whose children are the two level-0 tiles.
    pub async fn load_root(
        accessor: Arc<dyn AssetAccessor>,
        depot: Arc<SharedAssetDepot<TileModel>>,
        url: String,
    ) -> Result<(Arc<Self>, TileDescriptor), ErrorList> {
        let response = accessor
            .get(&url, &[])
            .await
            .map_err(|error| ErrorList::error(error.to_string()))?;
        let body = response
            .require_success()
            .map_err(|error| ErrorList::error(error.to_string()))?;
        let layer: LayerJson = serde_json::from_slice(&body)
            .map_err(|error| ErrorList::error(format!("Failed to parse layer.json: {error}")))?;

        let mut errors = ErrorList::new();
        if !layer.format.starts_with("quantized-mesh") {
            return Err(ErrorList::error(format!(
                "Unsupported terrain format {:?}",
                layer.format
            )));
        }
        if let Some(projection) = &layer.projection {
            if projection != "EPSG:4326" {
                return Err(ErrorList::error(format!(
                    "Unsupported terrain projection {:?}",
                    projection
                )));
            }
        }
        let template = match layer.tiles.first() {
            Some(template) => resolve_url(&url, template),
            None => return Err(ErrorList::error("layer.json lists no tile templates")),
        };

        let maxzoom = layer.maxzoom.unwrap_or_else(|| {
            let derived = layer.available.len().saturating_sub(1) as u32;
            errors.push_warning("layer.json omits maxzoom, deriving it from availability");
            derived
        });
        errors.log(&url);

        let inner = Arc::new(LayerInner {
            accessor,
            depot,
            template,
            version: layer.version.unwrap_or_else(|| "1.0.0".to_string()),
            maxzoom,
            available: layer.available,
            attribution: layer.attribution,
        });

        debug!(url = %url, maxzoom, "Loaded terrain layer");
        let loader = Arc::new(Self { inner });
        Ok((Arc::clone(&loader), loader.root_descriptor()))
    }

    /// A contentless whole-globe root over the two level-0 tiles.
    fn root_descriptor(self: &Arc<Self>) -> TileDescriptor {
        let children = [
            QuadtreeTileId::new(0, 0, 0),
            QuadtreeTileId::new(0, 1, 0),
        ]
        .into_iter()
        .filter(|id| self.inner.tile_exists(*id))
        .map(|id| self.inner.descriptor_for(id))
        .collect();

        TileDescriptor {
            id: TileId::Url(self.inner.template.clone()),
            geometric_error: 2.0 * LEVEL_ZERO_GEOMETRIC_ERROR,
            refine: Some(TileRefine::Replace),
            transform: DMat4::IDENTITY,
            bounding_volume: BoundingVolume::Region(BoundingRegion::new(
                GlobeRectangle::new(-PI, -PI / 2.0, PI, PI / 2.0),
                DEFAULT_MINIMUM_HEIGHT,
                DEFAULT_MAXIMUM_HEIGHT,
            )),
            content: TileContentKind::None,
            children: DescriptorChildren::Nested(children),
            loader: Some(Arc::clone(self) as Arc<dyn TilesetContentLoader>),
        }
    }
}

impl LayerInner {
    fn tile_exists(&self, id: QuadtreeTileId) -> bool {
        if id.level > self.maxzoom {
            return false;
        }
        // No availability list means everything up to maxzoom exists.
        if self.available.is_empty() {
            return true;
        }
        self.available
            .get(id.level as usize)
            .map(|rects| rects.iter().any(|rect| rect.contains(id.x, id.y)))
            .unwrap_or(false)
    }

    fn content_url(&self, id: QuadtreeTileId) -> String {
        self.template
            .replace("{z}", &id.level.to_string())
            .replace("{x}", &id.x.to_string())
            .replace("{y}", &id.y.to_string())
            .replace("{version}", &self.version)
    }

    fn descriptor_for(&self, id: QuadtreeTileId) -> TileDescriptor {
        TileDescriptor {
            id: TileId::Quadtree(id),
            geometric_error: LEVEL_ZERO_GEOMETRIC_ERROR / f64::from(1u32 << id.level),
            refine: None,
            transform: DMat4::IDENTITY,
            bounding_volume: BoundingVolume::Region(BoundingRegion::new(
                tile_rectangle(id),
                DEFAULT_MINIMUM_HEIGHT,
                DEFAULT_MAXIMUM_HEIGHT,
            )),
            content: TileContentKind::Render(self.content_url(id)),
            children: DescriptorChildren::Deferred,
            loader: None,
        }
    }
}

/// Cartographic rectangle of a TMS geographic tile; y counts from the south.
fn tile_rectangle(id: QuadtreeTileId) -> GlobeRectangle {
    let tiles_y = f64::from(1u32 << id.level);
    let tiles_x = 2.0 * tiles_y;
    let width = 2.0 * PI / tiles_x;
    let height = PI / tiles_y;
    let west = -PI + f64::from(id.x) * width;
    let south = -PI / 2.0 + f64::from(id.y) * height;
    GlobeRectangle::new(west, south, west + width, south + height)
}

/// Maps a decoded quantized mesh onto the ellipsoid over `rectangle`.
fn mesh_to_model(
    mesh: &crate::loader::quantized_mesh::QuantizedMesh,
    rectangle: &GlobeRectangle,
    credits: Vec<String>,
) -> TileModel {
    let ellipsoid = Ellipsoid::WGS84;
    let width = rectangle.east - rectangle.west;
    let height = rectangle.north - rectangle.south;
    let height_span = f64::from(mesh.maximum_height) - f64::from(mesh.minimum_height);

    let positions: Vec<DVec3> = mesh
        .positions
        .iter()
        .map(|[u, v, h]| {
            let cartographic = Cartographic::new(
                rectangle.west + u * width,
                rectangle.south + v * height,
                f64::from(mesh.minimum_height) + h * height_span,
            );
            ellipsoid.cartographic_to_cartesian(&cartographic)
        })
        .collect();

    let byte_size = positions.len() * 24 + mesh.indices.len() * 4;
    TileModel {
        positions,
        indices: mesh.indices.clone(),
        gltf: None,
        byte_size,
        credits,
    }
}

impl TilesetContentLoader for LayerJsonLoader {
    fn resolve_children(&self, tile: &TileSnapshot) -> ChildrenResolution {
        let TileId::Quadtree(id) = tile.id else {
            return ChildrenResolution::Ready(Vec::new());
        };
        let children = id
            .children()
            .into_iter()
            .filter(|child| self.inner.tile_exists(*child))
            .map(|child| self.inner.descriptor_for(child))
            .collect();
        ChildrenResolution::Ready(children)
    }

    fn request_content(&self, tile: &TileSnapshot) -> BoxFuture<'static, TileLoadResult> {
        let key = tile.key;
        let TileId::Quadtree(id) = tile.id else {
            return async move { TileLoadResult::new(key, ContentOutcome::Empty) }.boxed();
        };

        let inner = Arc::clone(&self.inner);
        async move {
            let url = inner.content_url(id);
            if let Some(handle) = inner.depot.get_existing(&url) {
                return TileLoadResult::new(key, ContentOutcome::Model(handle));
            }

            let headers: Vec<Header> = vec![("Accept".to_string(), ACCEPT_HEADER.to_string())];
            let response = match inner.accessor.get(&url, &headers).await {
                Ok(response) => response,
                Err(error) => {
                    return TileLoadResult::new(
                        key,
                        ContentOutcome::FailedTemporarily(error.to_string()),
                    )
                }
            };
            let body = match response.require_success() {
                Ok(body) => body,
                Err(error) => {
                    return TileLoadResult::new(
                        key,
                        ContentOutcome::FailedTemporarily(error.to_string()),
                    )
                }
            };

            let rectangle = tile_rectangle(id);
            let credits: Vec<String> = inner.attribution.iter().cloned().collect();
            let outcome = inner
                .depot
                .get_or_create(&url, move || async move {
                    let mesh = decode_quantized_mesh(&body).map_err(DepotError::Factory)?;
                    let model = mesh_to_model(&mesh, &rectangle, credits);
                    let size = model.byte_size.max(1) as u64;
                    Ok((model, size))
                })
                .await;
            match outcome {
                Ok(handle) => TileLoadResult::new(key, ContentOutcome::Model(handle)),
                Err(DepotError::Factory(message)) => {
                    TileLoadResult::new(key, ContentOutcome::Failed(message))
                }
            }
        }
        .boxed()
    }
}
