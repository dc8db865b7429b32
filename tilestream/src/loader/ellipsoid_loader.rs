//! Procedural ellipsoid-surface loader.
//!
//! Serves a geographic quadtree over the bare WGS84 ellipsoid with no
//! network access at all: children are pure coordinate arithmetic and
//! content is a synthesized cartographic grid mesh. Useful as a globe
//! fallback when no terrain source is configured, and as a deterministic
//! source in tests.

use std::f64::consts::PI;
use std::sync::Arc;

use futures_util::FutureExt;
use glam::DMat4;

use crate::accessor::BoxFuture;
use crate::content::TileModel;
use crate::depot::{DepotError, SharedAssetDepot};
use crate::geometry::{BoundingRegion, BoundingVolume, Cartographic, Ellipsoid, GlobeRectangle};
use crate::implicit::QuadtreeTileId;
use crate::loader::{
    ChildrenResolution, ContentOutcome, DescriptorChildren, TileDescriptor, TileLoadResult,
    TileSnapshot, TilesetContentLoader,
};
use crate::tile::{TileContentKind, TileId, TileRefine};

/// Vertices along each edge of a synthesized tile grid.
const GRID_SIZE: u32 = 9;

/// Geometric error of a level-0 tile, matching the terrain convention so
/// the two sources refine at comparable camera distances.
const LEVEL_ZERO_GEOMETRIC_ERROR: f64 = 2.0 * PI * 6378137.0 * 0.25 / (65.0 * 2.0);

/// Loader that synthesizes ellipsoid-surface tiles locally.
pub struct EllipsoidLoader {
    depot: Arc<SharedAssetDepot<TileModel>>,
    max_level: u32,
}

impl EllipsoidLoader {
    pub fn new(depot: Arc<SharedAssetDepot<TileModel>>, max_level: u32) -> Arc<Self> {
        Arc::new(Self { depot, max_level })
    }

    /// A contentless whole-globe root over the two level-0 tiles.
    pub fn root_descriptor(self: &Arc<Self>) -> TileDescriptor {
        let children = vec![
            descriptor_for(QuadtreeTileId::new(0, 0, 0)),
            descriptor_for(QuadtreeTileId::new(0, 1, 0)),
        ];
        TileDescriptor {
            id: TileId::Url("ellipsoid://root".to_string()),
            geometric_error: 2.0 * LEVEL_ZERO_GEOMETRIC_ERROR,
            refine: Some(TileRefine::Replace),
            transform: DMat4::IDENTITY,
            bounding_volume: BoundingVolume::Region(BoundingRegion::new(
                GlobeRectangle::new(-PI, -PI / 2.0, PI, PI / 2.0),
                0.0,
                0.0,
            )),
            content: TileContentKind::None,
            children: DescriptorChildren::Nested(children),
            loader: Some(Arc::clone(self) as Arc<dyn TilesetContentLoader>),
        }
    }
}

/// Cartographic rectangle of a TMS geographic tile; y counts from the south.
fn tile_rectangle(id: QuadtreeTileId) -> GlobeRectangle {
    let tiles_y = f64::from(1u32 << id.level);
    let width = PI / tiles_y;
    let west = -PI + f64::from(id.x) * width;
    let south = -PI / 2.0 + f64::from(id.y) * width;
    GlobeRectangle::new(west, south, west + width, south + width)
}

fn descriptor_for(id: QuadtreeTileId) -> TileDescriptor {
    TileDescriptor {
        id: TileId::Quadtree(id),
        geometric_error: LEVEL_ZERO_GEOMETRIC_ERROR / f64::from(1u32 << id.level),
        refine: None,
        transform: DMat4::IDENTITY,
        bounding_volume: BoundingVolume::Region(BoundingRegion::new(tile_rectangle(id), 0.0, 0.0)),
        content: TileContentKind::Render(format!("ellipsoid://{}/{}/{}", id.level, id.x, id.y)),
        children: DescriptorChildren::Deferred,
        loader: None,
    }
}

/// Synthesizes a GRID_SIZE x GRID_SIZE surface patch over the tile.
fn synthesize_model(id: QuadtreeTileId) -> TileModel {
    let ellipsoid = Ellipsoid::WGS84;
    let rectangle = tile_rectangle(id);
    let width = rectangle.east - rectangle.west;
    let height = rectangle.north - rectangle.south;
    let step = 1.0 / f64::from(GRID_SIZE - 1);

    let mut positions = Vec::with_capacity((GRID_SIZE * GRID_SIZE) as usize);
    for row in 0..GRID_SIZE {
        for column in 0..GRID_SIZE {
            let cartographic = Cartographic::new(
                rectangle.west + width * step * f64::from(column),
                rectangle.south + height * step * f64::from(row),
                0.0,
            );
            positions.push(ellipsoid.cartographic_to_cartesian(&cartographic));
        }
    }

    let mut indices = Vec::with_capacity(((GRID_SIZE - 1) * (GRID_SIZE - 1) * 6) as usize);
    for row in 0..GRID_SIZE - 1 {
        for column in 0..GRID_SIZE - 1 {
            let base = row * GRID_SIZE + column;
            indices.extend_from_slice(&[
                base,
                base + 1,
                base + GRID_SIZE,
                base + 1,
                base + GRID_SIZE + 1,
                base + GRID_SIZE,
            ]);
        }
    }

    let byte_size = positions.len() * 24 + indices.len() * 4;
    TileModel {
        positions,
        indices,
        gltf: None,
        byte_size,
        credits: Vec::new(),
    }
}

impl TilesetContentLoader for EllipsoidLoader {
    fn resolve_children(&self, tile: &TileSnapshot) -> ChildrenResolution {
        let TileId::Quadtree(id) = tile.id else {
            return ChildrenResolution::Ready(Vec::new());
        };
        if id.level >= self.max_level {
            return ChildrenResolution::Ready(Vec::new());
        }
        ChildrenResolution::Ready(id.children().into_iter().map(descriptor_for).collect())
    }

    fn request_content(&self, tile: &TileSnapshot) -> BoxFuture<'static, TileLoadResult> {
        let key = tile.key;
        let TileId::Quadtree(id) = tile.id else {
            return async move { TileLoadResult::new(key, ContentOutcome::Empty) }.boxed();
        };
        let depot = Arc::clone(&self.depot);
        async move {
            let cache_key = format!("ellipsoid://{}/{}/{}", id.level, id.x, id.y);
            let outcome = depot
                .get_or_create(&cache_key, move || async move {
                    let model = synthesize_model(id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileKey;

    fn snapshot(id: QuadtreeTileId) -> TileSnapshot {
        TileSnapshot {
            key: TileKey(0),
            id: TileId::Quadtree(id),
            content: TileContentKind::None,
            geometric_error: 100.0,
            refine: TileRefine::Replace,
            bounding_volume: BoundingVolume::Region(BoundingRegion::new(
                tile_rectangle(id),
                0.0,
                0.0,
            )),
            world_transform: DMat4::IDENTITY,
        }
    }

    #[tokio::test]
    async fn test_children_halve_geometric_error() {
        let loader = EllipsoidLoader::new(Arc::new(SharedAssetDepot::new(1024 * 1024)), 10);
        let children = match loader.resolve_children(&snapshot(QuadtreeTileId::new(0, 0, 0))) {
            ChildrenResolution::Ready(children) => children,
            ChildrenResolution::Pending(_) => panic!("ellipsoid children never fetch"),
        };
        assert_eq!(children.len(), 4);
        for child in &children {
            assert!((child.geometric_error - LEVEL_ZERO_GEOMETRIC_ERROR / 2.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_max_level_caps_subdivision() {
        let loader = EllipsoidLoader::new(Arc::new(SharedAssetDepot::new(1024 * 1024)), 1);
        let result = loader.resolve_children(&snapshot(QuadtreeTileId::new(1, 1, 1)));
        assert!(matches!(result, ChildrenResolution::Ready(ref c) if c.is_empty()));
    }

    #[tokio::test]
    async fn test_synthesized_tiles_share_depot_entries() {
        let depot = Arc::new(SharedAssetDepot::new(1024 * 1024));
        let loader = EllipsoidLoader::new(Arc::clone(&depot), 10);
        let tile = snapshot(QuadtreeTileId::new(1, 2, 1));

        let first = loader.request_content(&tile).await;
        let second = loader.request_content(&tile).await;
        let (ContentOutcome::Model(a), ContentOutcome::Model(b)) = (first.outcome, second.outcome)
        else {
            panic!("expected models");
        };
        assert_eq!(a.positions.len(), (GRID_SIZE * GRID_SIZE) as usize);
        assert_eq!(a.ref_count(), b.ref_count());
        assert_eq!(depot.entry_count(), 1);
    }

    #[test]
    fn test_grid_vertices_sit_on_the_ellipsoid() {
        let model = synthesize_model(QuadtreeTileId::new(2, 3, 1));
        let ellipsoid = Ellipsoid::WGS84;
        for position in &model.positions {
            let height = ellipsoid
                .cartesian_to_cartographic(*position)
                .map(|c| c.height)
                .unwrap_or(f64::MAX);
            assert!(height.abs() < 1e-3, "vertex {position:?} is off-surface");
        }
        assert_eq!(model.indices.len() as u32, (GRID_SIZE - 1) * (GRID_SIZE - 1) * 6);
    }
}
