//! Loader for explicit tileset.json trees.
//!
//! The whole document is converted into a descriptor tree eagerly at load
//! time, so traversal never waits on child resolution for explicit
//! tilesets. Two cases still go through the network during traversal:
//! render content (fetched, converted, and deduped through the depot) and
//! external tileset references, whose parsed root is grafted in as the
//! referring tile's children.

use std::sync::Arc;

use futures_util::FutureExt;
use tracing::debug;

use crate::accessor::{resolve_url, AssetAccessor, BoxFuture};
use crate::content::{ContentConverterRegistry, TileModel};
use crate::depot::SharedAssetDepot;
use crate::error::ErrorList;
use crate::implicit::SubdivisionScheme;
use crate::loader::schema::{parse_tileset_json, TileJson};
use crate::loader::{
    load_render_content, ChildrenResolution, ContentOutcome, DescriptorChildren, ImplicitLoader,
    TileDescriptor, TileLoadResult, TileSnapshot, TilesetContentLoader,
};
use crate::implicit::{OctreeTileId, QuadtreeTileId};
use crate::tile::{TileContentKind, TileId, TileRefine};

/// Loader for tilesets described by an explicit tileset.json tree.
pub struct TilesetJsonLoader {
    accessor: Arc<dyn AssetAccessor>,
    registry: Arc<ContentConverterRegistry>,
    depot: Arc<SharedAssetDepot<TileModel>>,
}

impl TilesetJsonLoader {
    pub fn new(
        accessor: Arc<dyn AssetAccessor>,
        registry: Arc<ContentConverterRegistry>,
        depot: Arc<SharedAssetDepot<TileModel>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            accessor,
            registry,
            depot,
        })
    }

    /// Fetches and parses the root tileset.json, returning the descriptor
    /// tree of its root tile.
    pub async fn load_root(self: Arc<Self>, url: String) -> Result<TileDescriptor, ErrorList> {
        let response = self
            .accessor
            .get(&url, &[])
            .await
            .map_err(|error| ErrorList::error(format!("Failed to fetch {}: {}", url, error)))?;
        if !response.is_success() {
            return Err(ErrorList::error(format!(
                "Fetching {} returned status {}",
                url, response.status
            )));
        }

        let document = parse_tileset_json(&response.body)?;
        debug!(url = %url, version = %document.asset.version, "Loaded tileset.json");

        let mut errors = ErrorList::new();
        match self.descriptor_from_json(&document.root, &url, None, &mut errors) {
            Some(descriptor) => {
                errors.log(&url);
                Ok(descriptor)
            }
            None => Err(errors),
        }
    }

    /// Converts one JSON tile (and its children, recursively) into a
    /// descriptor. Returns `None` when the tile is unusable; the reason is
    /// pushed onto `errors` and siblings continue.
    fn descriptor_from_json(
        &self,
        json: &TileJson,
        base_url: &str,
        parent_geometric_error: Option<f64>,
        errors: &mut ErrorList,
    ) -> Option<TileDescriptor> {
        let bounding_volume = match json.bounding_volume.decode() {
            Ok(volume) => volume,
            Err(message) => {
                errors.push_error(format!("{} in {}", message, base_url));
                return None;
            }
        };

        let refine = match json.refine_mode() {
            Ok(refine) => refine,
            Err(message) => {
                errors.push_warning(format!("{} in {}", message, base_url));
                None
            }
        };

        let transform = match json.transform_matrix() {
            Ok(matrix) => matrix,
            Err(message) => {
                errors.push_error(format!("{} in {}", message, base_url));
                return None;
            }
        };

        if let Some(parent_error) = parent_geometric_error {
            if json.geometric_error >= parent_error && json.geometric_error > 0.0 {
                errors.push_warning(format!(
                    "Tile geometric error {} does not decrease below its parent's {} in {}",
                    json.geometric_error, parent_error, base_url
                ));
            }
        }

        // An implicit-tiling tile becomes the root of a loader-serviced
        // subtree; its JSON children are ignored per the 3D Tiles spec.
        if let Some(implicit) = json.implicit_tiling() {
            let scheme = match implicit.subdivision_scheme.to_ascii_uppercase().as_str() {
                "QUADTREE" => SubdivisionScheme::Quadtree,
                "OCTREE" => SubdivisionScheme::Octree,
                other => {
                    errors.push_error(format!(
                        "Unknown implicit subdivision scheme '{}' in {}",
                        other, base_url
                    ));
                    return None;
                }
            };

            let content_template = json
                .content
                .as_ref()
                .and_then(|content| content.uri())
                .map(|uri| resolve_url(base_url, uri));
            let subtree_template = resolve_url(base_url, &implicit.subtrees.uri);

            let id = match scheme {
                SubdivisionScheme::Quadtree => TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)),
                SubdivisionScheme::Octree => TileId::Octree(OctreeTileId::new(0, 0, 0, 0)),
            };
            let content = match &content_template {
                Some(template) => TileContentKind::Render(template.clone()),
                None => TileContentKind::None,
            };

            let loader = ImplicitLoader::new(
                Arc::clone(&self.accessor),
                Arc::clone(&self.registry),
                Arc::clone(&self.depot),
                scheme,
                implicit.subtree_levels,
                implicit.levels(),
                content_template,
                subtree_template,
                bounding_volume.clone(),
                json.geometric_error,
            );

            return Some(TileDescriptor {
                id,
                geometric_error: json.geometric_error,
                refine,
                transform,
                bounding_volume,
                content,
                children: DescriptorChildren::Deferred,
                loader: Some(loader),
            });
        }

        let content = match json.content.as_ref().and_then(|content| content.uri()) {
            None => TileContentKind::None,
            Some(uri) => {
                let resolved = resolve_url(base_url, uri);
                if is_tileset_json_uri(&resolved) {
                    TileContentKind::External(resolved)
                } else {
                    TileContentKind::Render(resolved)
                }
            }
        };

        let id = match &content {
            TileContentKind::External(url) | TileContentKind::Render(url) => {
                TileId::Url(url.clone())
            }
            TileContentKind::None => TileId::Url(base_url.to_string()),
        };

        let children: Vec<TileDescriptor> = json
            .children
            .iter()
            .filter_map(|child| {
                self.descriptor_from_json(child, base_url, Some(json.geometric_error), errors)
            })
            .collect();

        Some(TileDescriptor {
            id,
            geometric_error: json.geometric_error,
            refine,
            transform,
            bounding_volume,
            content,
            children: if children.is_empty() {
                DescriptorChildren::Leaf
            } else {
                DescriptorChildren::Nested(children)
            },
            loader: None,
        })
    }
}

/// Whether a resolved content URI refers to a nested tileset.json.
fn is_tileset_json_uri(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".json")
}

impl TilesetContentLoader for TilesetJsonLoader {
    fn resolve_children(&self, _tile: &TileSnapshot) -> ChildrenResolution {
        // Explicit trees are materialized eagerly; any tile still marked
        // unresolved is a leaf awaiting external content.
        ChildrenResolution::Ready(Vec::new())
    }

    fn request_content(&self, tile: &TileSnapshot) -> BoxFuture<'static, TileLoadResult> {
        let key = tile.key;
        match &tile.content {
            TileContentKind::None => {
                async move { TileLoadResult::new(key, ContentOutcome::Empty) }.boxed()
            }
            TileContentKind::Render(url) => load_render_content(
                Arc::clone(&self.accessor),
                Arc::clone(&self.registry),
                Arc::clone(&self.depot),
                key,
                url.clone(),
                Vec::new(),
            )
            .boxed(),
            TileContentKind::External(url) => {
                let loader = Self {
                    accessor: Arc::clone(&self.accessor),
                    registry: Arc::clone(&self.registry),
                    depot: Arc::clone(&self.depot),
                };
                let url = url.clone();
                async move {
                    match Arc::new(loader).load_root(url).await {
                        Ok(descriptor) => {
                            TileLoadResult::new(key, ContentOutcome::External(vec![descriptor]))
                        }
                        Err(errors) => {
                            let mut result = TileLoadResult::new(
                                key,
                                ContentOutcome::FailedTemporarily(format!("{}", errors)),
                            );
                            result.errors = errors;
                            result
                        }
                    }
                }
                .boxed()
            }
        }
    }
}
