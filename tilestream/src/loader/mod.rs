//! Tileset content loaders: strategies for resolving children and fetching
//! tile content.
//!
//! # Design
//!
//! Each tileset flavor (explicit JSON tree, implicit quadtree/octree,
//! quantized-mesh terrain, procedural ellipsoid) implements
//! [`TilesetContentLoader`]. Loaders never touch the tile arena: they
//! consume a [`TileSnapshot`] of one tile's immutable facts and produce
//! plain-data [`TileDescriptor`]s and [`TileLoadResult`]s. The thread
//! holding `&mut Tileset` turns descriptors into arena tiles and applies
//! load results, so all tree mutation stays on one thread while fetch and
//! decode run on workers.
//!
//! A descriptor may carry its own loader: that subtree (an implicit root,
//! for example) is then serviced by the carried loader instead of its
//! parent's.

mod ellipsoid_loader;
mod implicit_loader;
mod layer_json;
mod quantized_mesh;
mod schema;
mod tileset_json;

pub use ellipsoid_loader::EllipsoidLoader;
pub use implicit_loader::ImplicitLoader;
pub use layer_json::LayerJsonLoader;
pub use quantized_mesh::decode_quantized_mesh;
pub use schema::{BoundingVolumeJson, TileJson, TilesetJson};
pub use tileset_json::TilesetJsonLoader;

use std::sync::Arc;

use glam::DMat4;
use parking_lot::Mutex;
use tracing::debug;

use crate::accessor::{AssetAccessor, BoxFuture, Header};
use crate::content::{ContentConverterRegistry, TileModel};
use crate::depot::{DepotError, SharedAssetDepot, SharedAssetHandle};
use crate::error::ErrorList;
use crate::geometry::BoundingVolume;
use crate::tile::{TileContentKind, TileId, TileKey, TileRefine};

/// Immutable facts about one tile, captured for a loader call.
#[derive(Debug, Clone)]
pub struct TileSnapshot {
    pub key: TileKey,
    pub id: TileId,
    pub content: TileContentKind,
    pub geometric_error: f64,
    pub refine: TileRefine,
    /// Bounding volume in world coordinates.
    pub bounding_volume: BoundingVolume,
    pub world_transform: DMat4,
}

/// Child edges of a descriptor, before materialization.
#[derive(Debug)]
pub enum DescriptorChildren {
    /// Known to have no children.
    Leaf,
    /// Children fully described inline (explicit JSON trees).
    Nested(Vec<TileDescriptor>),
    /// Children must be resolved later through the subtree's loader.
    Deferred,
}

/// Plain-data description of a tile to be materialized into the arena.
pub struct TileDescriptor {
    pub id: TileId,
    pub geometric_error: f64,
    /// Inherits the parent's refinement mode when absent.
    pub refine: Option<TileRefine>,
    /// Local transform; identity when the document omits it.
    pub transform: DMat4,
    pub bounding_volume: BoundingVolume,
    pub content: TileContentKind,
    pub children: DescriptorChildren,
    /// When present, this descriptor's subtree is serviced by this loader.
    pub loader: Option<Arc<dyn TilesetContentLoader>>,
}

impl std::fmt::Debug for TileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileDescriptor")
            .field("id", &self.id)
            .field("geometric_error", &self.geometric_error)
            .field("content", &self.content)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

/// How a loader answers a resolve-children request.
pub enum ChildrenResolution {
    /// Children are known without I/O.
    Ready(Vec<TileDescriptor>),
    /// Children require a fetch (external tileset, subtree file). The future
    /// runs on a worker; its result is applied by the owning thread.
    Pending(BoxFuture<'static, Result<Vec<TileDescriptor>, ErrorList>>),
}

/// Outcome of one content load.
pub enum ContentOutcome {
    /// Decoded renderable payload, shared through the depot.
    Model(SharedAssetHandle<TileModel>),
    /// The tile has nothing to render at this level.
    Empty,
    /// The content was a nested tileset; its root becomes this tile's
    /// children.
    External(Vec<TileDescriptor>),
    /// Transport-level failure; retried the next time the tile is selected.
    FailedTemporarily(String),
    /// Malformed content; never retried.
    Failed(String),
}

impl std::fmt::Debug for ContentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model(_) => write!(f, "Model"),
            Self::Empty => write!(f, "Empty"),
            Self::External(children) => write!(f, "External({} children)", children.len()),
            Self::FailedTemporarily(message) => write!(f, "FailedTemporarily({})", message),
            Self::Failed(message) => write!(f, "Failed({})", message),
        }
    }
}

/// Result of one content load, tagged with the tile it belongs to.
#[derive(Debug)]
pub struct TileLoadResult {
    pub key: TileKey,
    pub outcome: ContentOutcome,
    pub errors: ErrorList,
}

impl TileLoadResult {
    pub fn new(key: TileKey, outcome: ContentOutcome) -> Self {
        Self {
            key,
            outcome,
            errors: ErrorList::new(),
        }
    }
}

/// Strategy for one tileset flavor.
///
/// Both operations take a snapshot rather than the tile itself so the
/// returned futures are `'static` and can run on worker tasks.
pub trait TilesetContentLoader: Send + Sync {
    /// Derives the children of `tile` when the tree does not already know
    /// them.
    fn resolve_children(&self, tile: &TileSnapshot) -> ChildrenResolution;

    /// Fetches and decodes `tile`'s content.
    fn request_content(&self, tile: &TileSnapshot) -> BoxFuture<'static, TileLoadResult>;
}

// =============================================================================
// Shared Content Path
// =============================================================================

/// Fetches a render-content URL and decodes it through the depot.
///
/// Transport errors and non-2xx statuses fail the tile temporarily; decode
/// failures are permanent. The decode runs inside the depot factory, so
/// concurrent requests for the same URL decode at most once.
pub(crate) async fn load_render_content(
    accessor: Arc<dyn AssetAccessor>,
    registry: Arc<ContentConverterRegistry>,
    depot: Arc<SharedAssetDepot<TileModel>>,
    key: TileKey,
    url: String,
    headers: Vec<Header>,
) -> TileLoadResult {
    if let Some(handle) = depot.get_existing(&url) {
        return TileLoadResult::new(key, ContentOutcome::Model(handle));
    }

    let response = match accessor.get(&url, &headers).await {
        Ok(response) => response,
        Err(error) => {
            debug!(url = %url, error = %error, "Content fetch failed");
            return TileLoadResult::new(key, ContentOutcome::FailedTemporarily(error.to_string()));
        }
    };
    if !response.is_success() {
        debug!(url = %url, status = response.status, "Content fetch returned error status");
        return TileLoadResult::new(
            key,
            ContentOutcome::FailedTemporarily(format!(
                "Status {} fetching {}",
                response.status, url
            )),
        );
    }

    let body = response.body;
    let diagnostics = Arc::new(Mutex::new(ErrorList::new()));
    let fingerprint = url.clone();
    let outcome = {
        let registry = Arc::clone(&registry);
        let url = url.clone();
        let diagnostics = Arc::clone(&diagnostics);
        depot
            .get_or_create(&fingerprint, move || async move {
                let converted = registry.convert(body, &url);
                *diagnostics.lock() = converted.errors.clone();
                match converted.model {
                    Some(model) => {
                        let size = (model.byte_size as u64).max(1);
                        Ok((model, size))
                    }
                    None => Err(DepotError::Factory(format!("{}", converted.errors))),
                }
            })
            .await
    };

    let mut result = match outcome {
        Ok(handle) => TileLoadResult::new(key, ContentOutcome::Model(handle)),
        Err(DepotError::Factory(message)) => {
            TileLoadResult::new(key, ContentOutcome::Failed(message))
        }
    };
    result.errors = diagnostics.lock().clone();
    result
}
