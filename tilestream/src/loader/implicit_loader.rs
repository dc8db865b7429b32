//! Loader for implicit quadtree/octree tilesets.
//!
//! # Design
//!
//! Children are derived from coordinates plus subtree-availability files
//! rather than listed in JSON. The loader keeps assembled [`Subtree`]s in a
//! coordinate-keyed map; fetches are deduped through a dedicated depot so
//! concurrent resolutions of the same subtree hit the network once.
//!
//! Bounding volumes and geometric error are derived in closed form from the
//! implicit root (halving per level) so deep tiles accumulate no
//! floating-point drift from chained subdivision.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use glam::DMat4;
use tracing::debug;

use crate::accessor::{resolve_url, AssetAccessor, BoxFuture};
use crate::content::{ContentConverterRegistry, TileModel};
use crate::depot::{DepotError, SharedAssetDepot, SharedAssetHandle};
use crate::error::ErrorList;
use crate::geometry::{BoundingRegion, BoundingVolume, GlobeRectangle, OrientedBoundingBox};
use crate::implicit::{OctreeTileId, ParsedSubtree, QuadtreeTileId, SubdivisionScheme, Subtree};
use crate::loader::{
    load_render_content, ChildrenResolution, ContentOutcome, DescriptorChildren, TileDescriptor,
    TileLoadResult, TileSnapshot, TilesetContentLoader,
};
use crate::tile::{TileContentKind, TileId};

/// Either tree coordinate, with uniform level/children/subtree arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Coords {
    Quad(QuadtreeTileId),
    Oct(OctreeTileId),
}

impl Coords {
    fn from_id(id: &TileId) -> Option<Self> {
        match id {
            TileId::Quadtree(id) => Some(Self::Quad(*id)),
            TileId::Octree(id) => Some(Self::Oct(*id)),
            TileId::Url(_) => None,
        }
    }

    fn to_id(self) -> TileId {
        match self {
            Self::Quad(id) => TileId::Quadtree(id),
            Self::Oct(id) => TileId::Octree(id),
        }
    }

    fn level(self) -> u32 {
        match self {
            Self::Quad(id) => id.level,
            Self::Oct(id) => id.level,
        }
    }

    fn children(self) -> Vec<Coords> {
        match self {
            Self::Quad(id) => id.children().into_iter().map(Self::Quad).collect(),
            Self::Oct(id) => id.children().into_iter().map(Self::Oct).collect(),
        }
    }

    fn subtree_root(self, subtree_levels: u32) -> Coords {
        match self {
            Self::Quad(id) => Self::Quad(id.subtree_root(subtree_levels)),
            Self::Oct(id) => Self::Oct(id.subtree_root(subtree_levels)),
        }
    }

    /// Relative level and Morton index with respect to `root`.
    fn relative_to(self, root: Coords) -> (u32, u64) {
        match (self, root) {
            (Self::Quad(id), Self::Quad(root)) => {
                (id.level - root.level, id.relative_morton_index(&root))
            }
            (Self::Oct(id), Self::Oct(root)) => {
                (id.level - root.level, id.relative_morton_index(&root))
            }
            _ => (0, 0),
        }
    }

    /// `(x, y, z)` with `z == 0` for quadtree coordinates.
    fn xyz(self) -> (u32, u32, u32) {
        match self {
            Self::Quad(id) => (id.x, id.y, 0),
            Self::Oct(id) => (id.x, id.y, id.z),
        }
    }
}

struct ImplicitInner {
    accessor: Arc<dyn AssetAccessor>,
    registry: Arc<ContentConverterRegistry>,
    depot: Arc<SharedAssetDepot<TileModel>>,
    scheme: SubdivisionScheme,
    subtree_levels: u32,
    available_levels: u32,
    content_template: Option<String>,
    subtree_template: String,
    root_bounding_volume: BoundingVolume,
    root_geometric_error: f64,
    /// Fetch-dedupe for subtree files.
    subtrees: SharedAssetDepot<Subtree>,
    /// Assembled subtrees, keyed by subtree-root (level, Morton).
    loaded: DashMap<(u32, u64), SharedAssetHandle<Subtree>>,
}

/// Loader for an implicit-tiling subtree rooted at coordinate (0, 0[, 0]).
pub struct ImplicitLoader {
    inner: Arc<ImplicitInner>,
}

impl ImplicitLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accessor: Arc<dyn AssetAccessor>,
        registry: Arc<ContentConverterRegistry>,
        depot: Arc<SharedAssetDepot<TileModel>>,
        scheme: SubdivisionScheme,
        subtree_levels: u32,
        available_levels: u32,
        content_template: Option<String>,
        subtree_template: String,
        root_bounding_volume: BoundingVolume,
        root_geometric_error: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(ImplicitInner {
                accessor,
                registry,
                depot,
                scheme,
                subtree_levels: subtree_levels.max(1),
                available_levels,
                content_template,
                subtree_template,
                root_bounding_volume,
                root_geometric_error,
                // Subtree files are tiny; keep a generous inactive window.
                subtrees: SharedAssetDepot::new(4 * 1024 * 1024),
                loaded: DashMap::new(),
            }),
        })
    }
}

/// Substitutes `{level}`, `{x}`, `{y}`, and `{z}` in a template URL. For
/// quadtree coordinates `{z}` is the TMS-style alias for the level.
fn substitute_template(template: &str, coords: Coords) -> String {
    let (x, y, z) = coords.xyz();
    let level = coords.level();
    let z_value = match coords {
        Coords::Quad(_) => level,
        Coords::Oct(_) => z,
    };
    template
        .replace("{level}", &level.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
        .replace("{z}", &z_value.to_string())
}

/// Closed-form bounding volume of the tile at `coords`, subdividing the
/// implicit root volume.
fn derive_bounding_volume(root: &BoundingVolume, coords: Coords) -> BoundingVolume {
    let level = coords.level();
    if level == 0 {
        return root.clone();
    }
    let (x, y, z) = coords.xyz();
    let fraction = 1.0 / f64::from(1u32 << level);

    match root {
        BoundingVolume::Region(region) => {
            let rect = &region.rectangle;
            let width = rect.east - rect.west;
            let height = rect.north - rect.south;
            let child_rect = GlobeRectangle::new(
                rect.west + width * fraction * f64::from(x),
                rect.south + height * fraction * f64::from(y),
                rect.west + width * fraction * f64::from(x + 1),
                rect.south + height * fraction * f64::from(y + 1),
            );
            let (minimum_height, maximum_height) = match coords {
                Coords::Quad(_) => (region.minimum_height, region.maximum_height),
                Coords::Oct(_) => {
                    let span = region.maximum_height - region.minimum_height;
                    let bottom = region.minimum_height + span * fraction * f64::from(z);
                    (bottom, bottom + span * fraction)
                }
            };
            BoundingVolume::Region(BoundingRegion::new(
                child_rect,
                minimum_height,
                maximum_height,
            ))
        }
        BoundingVolume::Box(parent) => {
            // Box coordinates span [-1, 1] along each half-axis.
            let center_fraction = |index: u32| -> f64 { -1.0 + (2.0 * f64::from(index) + 1.0) * fraction };
            let (su, sv) = (center_fraction(x), center_fraction(y));
            let split_z = matches!(coords, Coords::Oct(_));
            let sw = if split_z { center_fraction(z) } else { 0.0 };
            let axes = parent.half_axes;
            let center =
                parent.center + axes.x_axis * su + axes.y_axis * sv + axes.z_axis * sw;
            let half_axes = glam::DMat3::from_cols(
                axes.x_axis * fraction,
                axes.y_axis * fraction,
                if split_z { axes.z_axis * fraction } else { axes.z_axis },
            );
            BoundingVolume::Box(OrientedBoundingBox::new(center, half_axes))
        }
        // Sphere and S2 roots have no exact subdivision rule; reusing the
        // parent volume is loose but never wrong for culling.
        other => other.clone(),
    }
}

/// Fetches, parses, and assembles the subtree rooted at `root`, reusing an
/// already-assembled one when possible. Errors are transport-or-parse
/// messages; callers treat them as transient.
async fn ensure_subtree(
    inner: Arc<ImplicitInner>,
    root: Coords,
) -> Result<SharedAssetHandle<Subtree>, String> {
    let cache_key = (root.level(), {
        match root {
            Coords::Quad(id) => id.morton_index(),
            Coords::Oct(id) => id.morton_index(),
        }
    });
    if let Some(handle) = inner.loaded.get(&cache_key) {
        return Ok(handle.clone());
    }

    let url = substitute_template(&inner.subtree_template, root);
    let handle = {
        let accessor = Arc::clone(&inner.accessor);
        let scheme = inner.scheme;
        let subtree_levels = inner.subtree_levels;
        let factory_url = url.clone();
        inner
            .subtrees
            .get_or_create(&url, move || async move {
                let response = accessor
                    .get(&factory_url, &[])
                    .await
                    .map_err(|error| DepotError::Factory(error.to_string()))?;
                let body = response
                    .require_success()
                    .map_err(|error| DepotError::Factory(error.to_string()))?;
                let total_bytes = body.len() as u64;

                let parsed = ParsedSubtree::parse(&body)
                    .map_err(|error| DepotError::Factory(error.to_string()))?;

                let mut external = HashMap::new();
                for uri in parsed.external_buffer_uris() {
                    let resolved = resolve_url(&factory_url, &uri);
                    let buffer = accessor
                        .get(&resolved, &[])
                        .await
                        .map_err(|error| DepotError::Factory(error.to_string()))?
                        .require_success()
                        .map_err(|error| DepotError::Factory(error.to_string()))?;
                    external.insert(uri, buffer);
                }

                let subtree = parsed
                    .build(scheme, subtree_levels, &external)
                    .map_err(|error| DepotError::Factory(error.to_string()))?;
                Ok((subtree, total_bytes.max(1)))
            })
            .await
            .map_err(|DepotError::Factory(message)| message)?
    };

    debug!(url = %url, "Loaded subtree");
    inner.loaded.insert(cache_key, handle.clone());
    Ok(handle)
}

/// Derives the available children of `parent` from its covering subtree.
fn children_from_subtree(
    inner: &ImplicitInner,
    parent: Coords,
    subtree: &Subtree,
) -> Vec<TileDescriptor> {
    let root = parent.subtree_root(inner.subtree_levels);
    let mut children = Vec::new();

    for child in parent.children() {
        let (relative_level, relative_morton) = child.relative_to(root);
        // A child landing one level past this subtree starts a new one.
        let crosses_boundary = relative_level >= inner.subtree_levels;
        let (available, content_known_available) = if crosses_boundary {
            (subtree.child_subtree_available(relative_morton), None)
        } else {
            (
                subtree.tile_available(relative_level, relative_morton),
                Some(subtree.content_available(relative_level, relative_morton)),
            )
        };
        if !available {
            continue;
        }

        let content = match (&inner.content_template, content_known_available) {
            (Some(template), Some(true)) | (Some(template), None) => {
                TileContentKind::Render(substitute_template(template, child))
            }
            _ => TileContentKind::None,
        };

        children.push(TileDescriptor {
            id: child.to_id(),
            geometric_error: inner.root_geometric_error / f64::from(1u32 << child.level()),
            refine: None,
            transform: DMat4::IDENTITY,
            bounding_volume: derive_bounding_volume(&inner.root_bounding_volume, child),
            content,
            children: DescriptorChildren::Deferred,
            loader: None,
        });
    }

    children
}

impl TilesetContentLoader for ImplicitLoader {
    fn resolve_children(&self, tile: &TileSnapshot) -> ChildrenResolution {
        let Some(coords) = Coords::from_id(&tile.id) else {
            return ChildrenResolution::Ready(Vec::new());
        };
        if coords.level() + 1 >= self.inner.available_levels {
            return ChildrenResolution::Ready(Vec::new());
        }

        let root = coords.subtree_root(self.inner.subtree_levels);
        let cache_key = (root.level(), {
            match root {
                Coords::Quad(id) => id.morton_index(),
                Coords::Oct(id) => id.morton_index(),
            }
        });
        if let Some(subtree) = self.inner.loaded.get(&cache_key) {
            return ChildrenResolution::Ready(children_from_subtree(
                &self.inner,
                coords,
                &subtree,
            ));
        }

        let inner = Arc::clone(&self.inner);
        ChildrenResolution::Pending(
            async move {
                let subtree = ensure_subtree(Arc::clone(&inner), root)
                    .await
                    .map_err(ErrorList::error)?;
                Ok(children_from_subtree(&inner, coords, &subtree))
            }
            .boxed(),
        )
    }

    fn request_content(&self, tile: &TileSnapshot) -> BoxFuture<'static, TileLoadResult> {
        let key = tile.key;
        let Some(coords) = Coords::from_id(&tile.id) else {
            return async move { TileLoadResult::new(key, ContentOutcome::Empty) }.boxed();
        };
        if self.inner.content_template.is_none() {
            return async move { TileLoadResult::new(key, ContentOutcome::Empty) }.boxed();
        }

        let inner = Arc::clone(&self.inner);
        async move {
            let root = coords.subtree_root(inner.subtree_levels);
            let subtree = match ensure_subtree(Arc::clone(&inner), root).await {
                Ok(subtree) => subtree,
                Err(message) => {
                    return TileLoadResult::new(key, ContentOutcome::FailedTemporarily(message))
                }
            };

            let (relative_level, relative_morton) = coords.relative_to(root);
            if !subtree.content_available(relative_level, relative_morton) {
                return TileLoadResult::new(key, ContentOutcome::Empty);
            }

            let template = inner
                .content_template
                .as_deref()
                .unwrap_or_default()
                .to_string();
            let url = substitute_template(&template, coords);
            load_render_content(
                Arc::clone(&inner.accessor),
                Arc::clone(&inner.registry),
                Arc::clone(&inner.depot),
                key,
                url,
                Vec::new(),
            )
            .await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::MockAssetAccessor;
    use crate::geometry::BoundingSphere;
    use crate::tile::{TileKey, TileRefine};
    use bytes::Bytes;
    use glam::DVec3;

    /// A subtree file with constant availability everywhere.
    fn all_available_subtree() -> Bytes {
        let json = br#"{"tileAvailability":{"constant":1},"contentAvailability":[{"constant":1}],"childSubtreeAvailability":{"constant":1}}"#;
        let mut out = Vec::new();
        out.extend_from_slice(b"subt");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(json);
        Bytes::from(out)
    }

    fn region_volume() -> BoundingVolume {
        BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::new(-1.0, -0.5, 1.0, 0.5),
            0.0,
            100.0,
        ))
    }

    fn test_loader(accessor: Arc<MockAssetAccessor>) -> Arc<ImplicitLoader> {
        ImplicitLoader::new(
            accessor,
            Arc::new(ContentConverterRegistry::with_defaults()),
            Arc::new(SharedAssetDepot::new(1024 * 1024)),
            SubdivisionScheme::Quadtree,
            2,
            6,
            Some("http://x/content/{level}/{x}/{y}.glb".to_string()),
            "http://x/subtrees/{level}/{x}/{y}.subtree".to_string(),
            region_volume(),
            1000.0,
        )
    }

    fn snapshot(id: TileId) -> TileSnapshot {
        TileSnapshot {
            key: TileKey(0),
            id,
            content: TileContentKind::None,
            geometric_error: 1000.0,
            refine: TileRefine::Replace,
            bounding_volume: BoundingVolume::Sphere(BoundingSphere::new(DVec3::ZERO, 1.0)),
            world_transform: DMat4::IDENTITY,
        }
    }

    #[test]
    fn test_template_substitution() {
        let quad = Coords::Quad(QuadtreeTileId::new(3, 5, 6));
        assert_eq!(
            substitute_template("http://x/{level}/{x}/{y}.glb", quad),
            "http://x/3/5/6.glb"
        );
        // TMS-style {z} means level for quadtrees.
        assert_eq!(substitute_template("{z}/{x}/{y}", quad), "3/5/6");

        let oct = Coords::Oct(OctreeTileId::new(2, 1, 2, 3));
        assert_eq!(substitute_template("{level}/{x}/{y}/{z}", oct), "2/1/2/3");
    }

    #[test]
    fn test_region_subdivision_quarters_the_rectangle() {
        let child = Coords::Quad(QuadtreeTileId::new(1, 1, 0));
        match derive_bounding_volume(&region_volume(), child) {
            BoundingVolume::Region(region) => {
                assert!((region.rectangle.west - 0.0).abs() < 1e-12);
                assert!((region.rectangle.east - 1.0).abs() < 1e-12);
                assert!((region.rectangle.south - (-0.5)).abs() < 1e-12);
                assert!((region.rectangle.north - 0.0).abs() < 1e-12);
                assert_eq!(region.minimum_height, 0.0);
                assert_eq!(region.maximum_height, 100.0);
            }
            other => panic!("expected region, got {:?}", other),
        }
    }

    #[test]
    fn test_box_subdivision_halves_in_plan_only_for_quadtree() {
        let root = BoundingVolume::Box(OrientedBoundingBox::new(
            DVec3::ZERO,
            glam::DMat3::from_diagonal(DVec3::new(8.0, 4.0, 2.0)),
        ));
        let child = Coords::Quad(QuadtreeTileId::new(1, 0, 0));
        match derive_bounding_volume(&root, child) {
            BoundingVolume::Box(child_box) => {
                assert!((child_box.half_axes.x_axis.x - 4.0).abs() < 1e-12);
                assert!((child_box.half_axes.y_axis.y - 2.0).abs() < 1e-12);
                // Height is untouched by quadtree subdivision.
                assert!((child_box.half_axes.z_axis.z - 2.0).abs() < 1e-12);
                assert!((child_box.center.x - (-4.0)).abs() < 1e-12);
            }
            other => panic!("expected box, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_children_fetches_subtree_once() {
        let accessor = Arc::new(MockAssetAccessor::new());
        accessor.insert_response(
            "http://x/subtrees/0/0/0.subtree",
            200,
            all_available_subtree(),
        );
        let loader = test_loader(accessor.clone());

        let root_snapshot = snapshot(TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)));
        let children = match loader.resolve_children(&root_snapshot) {
            ChildrenResolution::Pending(future) => future.await.unwrap(),
            ChildrenResolution::Ready(_) => panic!("first resolution should fetch"),
        };
        assert_eq!(children.len(), 4);
        assert!(matches!(
            children[0].content,
            TileContentKind::Render(ref url) if url == "http://x/content/1/0/0.glb"
        ));

        // Second resolution is answered from the cached subtree.
        let again = loader.resolve_children(&root_snapshot);
        assert!(matches!(again, ChildrenResolution::Ready(ref c) if c.len() == 4));
        assert_eq!(accessor.request_count("http://x/subtrees/0/0/0.subtree"), 1);
    }

    #[tokio::test]
    async fn test_leaf_level_has_no_children() {
        let accessor = Arc::new(MockAssetAccessor::new());
        let loader = test_loader(accessor);
        let leaf = snapshot(TileId::Quadtree(QuadtreeTileId::new(5, 0, 0)));
        match loader.resolve_children(&leaf) {
            ChildrenResolution::Ready(children) => assert!(children.is_empty()),
            ChildrenResolution::Pending(_) => panic!("leaf resolution must not fetch"),
        }
    }

    #[tokio::test]
    async fn test_missing_subtree_fails_resolution_transiently() {
        let accessor = Arc::new(MockAssetAccessor::new());
        let loader = test_loader(accessor);
        let root_snapshot = snapshot(TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)));
        match loader.resolve_children(&root_snapshot) {
            ChildrenResolution::Pending(future) => {
                assert!(future.await.is_err());
            }
            ChildrenResolution::Ready(_) => panic!("must attempt a fetch"),
        }
    }

    #[tokio::test]
    async fn test_request_content_checks_availability() {
        let accessor = Arc::new(MockAssetAccessor::new());
        let json = br#"{"tileAvailability":{"constant":1},"contentAvailability":[{"constant":0}],"childSubtreeAvailability":{"constant":0}}"#;
        let mut file = Vec::new();
        file.extend_from_slice(b"subt");
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&(json.len() as u64).to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes());
        file.extend_from_slice(json);
        accessor.insert_response("http://x/subtrees/0/0/0.subtree", 200, Bytes::from(file));

        let loader = test_loader(accessor);
        let tile = snapshot(TileId::Quadtree(QuadtreeTileId::new(1, 0, 1)));
        let result = loader.request_content(&tile).await;
        assert!(matches!(result.outcome, ContentOutcome::Empty));
    }
}
