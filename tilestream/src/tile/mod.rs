//! The tile tree: flat arena storage, tile nodes, and their state.
//!
//! # Design
//!
//! Tiles are stored in a flat arena ([`TileArena`]) and referenced by
//! [`TileKey`] indices rather than owning pointers. Parent/child edges are
//! keys, which makes the deeply recursive tree trivially safe to mutate
//! during traversal and lets a tile survive content unload: the arena slot
//! persists, only the payload resets. Tiles are never removed from the
//! arena, so keys need no generation counter.
//!
//! Children come in two flavors: materialized (keys already in the arena)
//! and unresolved (the owning loader must derive them, by fetching an
//! external tileset, reading subtree availability, or applying an implicit
//! coordinate rule). Traversal code is uniform over both.

mod state;

pub use state::{TileLoadState, TileSelectionKind, TileSelectionState};

use glam::DMat4;

use crate::content::TileModel;
use crate::depot::SharedAssetHandle;
use crate::geometry::BoundingVolume;
use crate::implicit::{OctreeTileId, QuadtreeTileId};

/// Index of a tile in its tileset's [`TileArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(pub u32);

impl TileKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whether a tile's content renders together with or instead of its
/// children's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileRefine {
    /// Content renders alongside selected descendants.
    Add,
    /// Content is replaced entirely by descendants once they render.
    #[default]
    Replace,
}

/// Identifies a tile within its tileset flavor.
#[derive(Debug, Clone, PartialEq)]
pub enum TileId {
    /// Explicit-tree tile addressed by its (resolved) content or node URL.
    Url(String),
    /// Implicit quadtree coordinate.
    Quadtree(QuadtreeTileId),
    /// Implicit octree coordinate.
    Octree(OctreeTileId),
}

/// Child edges of a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileChildren {
    /// Children must be derived by the owning loader before descending.
    Unresolved,
    /// A resolve request is in flight.
    Resolving,
    /// Children exist in the arena (possibly zero for a leaf).
    Materialized(Vec<TileKey>),
}

impl Default for TileChildren {
    fn default() -> Self {
        Self::Materialized(Vec::new())
    }
}

impl TileChildren {
    /// The child keys if materialized, empty otherwise.
    pub fn keys(&self) -> &[TileKey] {
        match self {
            Self::Materialized(keys) => keys,
            _ => &[],
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, Self::Materialized(_))
    }
}

/// What a tile's content is, before any bytes are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TileContentKind {
    /// No content: the tile only structures the tree.
    #[default]
    None,
    /// The content URI points at a nested tileset.json; loading it grafts
    /// the external tileset's root as this tile's children.
    External(String),
    /// Renderable payload at the given resolved URL.
    Render(String),
}

/// Opaque handle returned by the renderer-resource preparation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderResourceHandle(pub u64);

/// A tile's loaded payload and renderer bookkeeping.
#[derive(Debug, Default)]
pub struct TileContent {
    /// What to load, decided at materialization time.
    pub kind: TileContentKind,
    /// Decoded model, shared through the depot.
    pub model: Option<SharedAssetHandle<TileModel>>,
    /// Renderer resources prepared on the main thread.
    pub render_resources: Option<RenderResourceHandle>,
    /// Byte size charged against the tileset cache budget.
    pub byte_size: usize,
}

/// One node of the tile tree.
#[derive(Debug)]
pub struct Tile {
    pub parent: Option<TileKey>,
    pub children: TileChildren,
    pub id: TileId,
    /// Error in meters introduced by rendering this tile instead of its
    /// descendants. Strictly decreases from parent to child.
    pub geometric_error: f64,
    pub refine: TileRefine,
    /// Local transform from the tileset document (identity when absent).
    pub transform: DMat4,
    /// Accumulated ancestor transform chain, fixed at materialization.
    pub world_transform: DMat4,
    /// Bounding volume in tileset-local coordinates.
    pub bounding_volume: BoundingVolume,
    /// `bounding_volume` carried through `world_transform`, cached because
    /// traversal tests it once per view per frame.
    pub world_bounding_volume: BoundingVolume,
    pub content: TileContent,
    pub load_state: TileLoadState,
    /// Index into the tileset's loader registry. Tiles inherit it from
    /// their parent unless their descriptor carried its own loader.
    pub loader: usize,
    /// Zero-geometric-error interior tiles are always refined past.
    pub unconditionally_refine: bool,
    pub last_selection: TileSelectionState,
    /// Frame number of the last traversal that used this tile.
    pub last_used_frame: u64,
    // Intrusive links in the tileset's loaded-tiles LRU list.
    pub lru_prev: Option<TileKey>,
    pub lru_next: Option<TileKey>,
}

impl Tile {
    /// Creates an unloaded tile. `world_transform` must already include the
    /// parent chain; the world bounding volume is derived from it.
    pub fn new(
        parent: Option<TileKey>,
        id: TileId,
        geometric_error: f64,
        refine: TileRefine,
        transform: DMat4,
        world_transform: DMat4,
        bounding_volume: BoundingVolume,
        content: TileContentKind,
    ) -> Self {
        let world_bounding_volume = bounding_volume.transform(&world_transform);
        Self {
            parent,
            children: TileChildren::Unresolved,
            id,
            geometric_error,
            refine,
            transform,
            world_transform,
            bounding_volume,
            world_bounding_volume,
            content: TileContent {
                kind: content,
                ..TileContent::default()
            },
            load_state: TileLoadState::Unloaded,
            loader: 0,
            unconditionally_refine: false,
            last_selection: TileSelectionState::default(),
            last_used_frame: 0,
            lru_prev: None,
            lru_next: None,
        }
    }

    /// True when the tile can appear in a render list: render-ready, or a
    /// structural tile with nothing to load.
    pub fn is_renderable(&self) -> bool {
        match self.load_state {
            TileLoadState::Done => true,
            TileLoadState::Failed | TileLoadState::FailedTemporarily => {
                // A failed tile never blocks its ancestors from rendering.
                true
            }
            _ => false,
        }
    }

    /// True when the traversal should dispatch a load for this tile.
    pub fn needs_load(&self) -> bool {
        self.load_state.is_loadable()
    }

    /// Bytes currently charged against the cache budget.
    pub fn content_byte_size(&self) -> usize {
        self.content.byte_size
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Flat storage for every tile of one tileset.
#[derive(Debug, Default)]
pub struct TileArena {
    tiles: Vec<Tile>,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tile and returns its key. Tiles are never removed.
    pub fn insert(&mut self, tile: Tile) -> TileKey {
        let key = TileKey(self.tiles.len() as u32);
        self.tiles.push(tile);
        key
    }

    pub fn get(&self, key: TileKey) -> &Tile {
        &self.tiles[key.index()]
    }

    pub fn get_mut(&mut self, key: TileKey) -> &mut Tile {
        &mut self.tiles[key.index()]
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &Tile)> {
        self.tiles
            .iter()
            .enumerate()
            .map(|(index, tile)| (TileKey(index as u32), tile))
    }
}
