//! The tileset: tile tree, selection, loading, and cache management.
//!
//! # Design
//!
//! A [`Tileset`] owns the tile arena and is driven from one thread through
//! `&mut self`: `update_view` traverses the tree and decides what to render
//! and load, `load_tiles` applies finished work from background tasks.
//! Workers never touch the arena; they receive an immutable
//! [`TileSnapshot`](crate::loader::TileSnapshot) and send plain-data results
//! back over channels, so there is no locking anywhere in the tree.
//!
//! # Lifecycle
//!
//! ```text
//! from_url / from_terrain_layer / from_ellipsoid
//!     -> per frame: update_view(view_group, views) -> ViewUpdateResult
//!     -> per frame (or more often): load_tiles()
//! ```

mod externals;
mod options;
mod sample_heights;
mod traversal;
mod view_group;

pub use externals::{NoopPreparer, PrepareRendererResources, TilesetExternals};
pub use options::TilesetOptions;
pub use view_group::{TilesetViewGroup, ViewUpdateResult};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::DMat4;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::credit::{Credit, CreditSystem};
use crate::depot::SharedAssetHandle;
use crate::error::ErrorList;
use crate::loader::{
    ChildrenResolution, ContentOutcome, DescriptorChildren, EllipsoidLoader, LayerJsonLoader,
    TileDescriptor, TileLoadResult, TileSnapshot, TilesetContentLoader, TilesetJsonLoader,
};
use crate::occlusion::OcclusionProxyPool;
use crate::overlay::{OverlayImage, RasterMappedTo3DTile, RasterOverlay, RasterOverlayTileState};
use crate::tile::{
    Tile, TileArena, TileChildren, TileContentKind, TileKey, TileLoadState, TileRefine,
};

/// A children-resolution result arriving from a worker task.
struct ChildrenCompletion {
    key: TileKey,
    result: Result<Vec<TileDescriptor>, ErrorList>,
}

/// An overlay texture arriving from a worker task.
struct OverlayCompletion {
    key: TileKey,
    mapping_index: usize,
    result: Result<SharedAssetHandle<OverlayImage>, String>,
}

/// One entry of a per-frame load queue. Lower priority values load first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueuedLoad {
    pub key: TileKey,
    pub priority: f64,
}

/// Which queue a load lands in; drained high to low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadPriority {
    High,
    Medium,
    Low,
}

/// A streamed 3D tileset and everything needed to select and load from it.
pub struct Tileset {
    options: TilesetOptions,
    externals: TilesetExternals,
    pub(crate) arena: TileArena,
    loaders: Vec<Arc<dyn TilesetContentLoader>>,
    root: Option<TileKey>,

    credits: CreditSystem,
    /// Per-tile credits interned from loaded content.
    tile_credits: HashMap<TileKey, Vec<Credit>>,
    pub(crate) occlusion: Option<OcclusionProxyPool>,

    overlays: Vec<Arc<RasterOverlay>>,
    raster_mappings: HashMap<TileKey, Vec<RasterMappedTo3DTile>>,

    completion_tx: mpsc::UnboundedSender<TileLoadResult>,
    completion_rx: mpsc::UnboundedReceiver<TileLoadResult>,
    children_tx: mpsc::UnboundedSender<ChildrenCompletion>,
    children_rx: mpsc::UnboundedReceiver<ChildrenCompletion>,
    overlay_tx: mpsc::UnboundedSender<OverlayCompletion>,
    overlay_rx: mpsc::UnboundedReceiver<OverlayCompletion>,

    pub(crate) loads_in_progress: u32,
    total_content_bytes: u64,
    /// Frame a tile last failed transiently, for retry pacing.
    failed_frames: HashMap<TileKey, u64>,
    /// Most recent traversal frame, for retry pacing outside traversal.
    pub(crate) last_frame: u64,

    // Per-frame load queues, rebuilt by every update_view.
    pub(crate) high_priority_queue: Vec<QueuedLoad>,
    pub(crate) medium_priority_queue: Vec<QueuedLoad>,
    pub(crate) low_priority_queue: Vec<QueuedLoad>,
    pub(crate) queued_this_frame: HashSet<TileKey>,

    // Intrusive LRU over tiles with loaded content; head is oldest.
    lru_head: Option<TileKey>,
    lru_tail: Option<TileKey>,
}

impl Tileset {
    fn empty(externals: TilesetExternals, options: TilesetOptions) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (children_tx, children_rx) = mpsc::unbounded_channel();
        let (overlay_tx, overlay_rx) = mpsc::unbounded_channel();
        let occlusion = externals
            .occlusion
            .as_ref()
            .map(|(create, size)| OcclusionProxyPool::new(|| create(), *size));
        Self {
            options,
            externals,
            arena: TileArena::new(),
            loaders: Vec::new(),
            root: None,
            credits: CreditSystem::new(),
            tile_credits: HashMap::new(),
            occlusion,
            overlays: Vec::new(),
            raster_mappings: HashMap::new(),
            completion_tx,
            completion_rx,
            children_tx,
            children_rx,
            overlay_tx,
            overlay_rx,
            loads_in_progress: 0,
            total_content_bytes: 0,
            failed_frames: HashMap::new(),
            last_frame: 0,
            high_priority_queue: Vec::new(),
            medium_priority_queue: Vec::new(),
            low_priority_queue: Vec::new(),
            queued_this_frame: HashSet::new(),
            lru_head: None,
            lru_tail: None,
        }
    }

    /// Creates a tileset from a tileset.json URL.
    pub async fn from_url(
        externals: TilesetExternals,
        options: TilesetOptions,
        url: impl Into<String>,
    ) -> Result<Self, ErrorList> {
        let loader = TilesetJsonLoader::new(
            Arc::clone(&externals.accessor),
            Arc::clone(&externals.registry),
            Arc::clone(&externals.depot),
        );
        let root = Arc::clone(&loader).load_root(url.into()).await?;
        let mut tileset = Self::empty(externals, options);
        tileset.loaders.push(loader as Arc<dyn TilesetContentLoader>);
        tileset.set_root(root);
        Ok(tileset)
    }

    /// Creates a tileset streaming quantized-mesh terrain from a layer.json
    /// URL.
    pub async fn from_terrain_layer(
        externals: TilesetExternals,
        options: TilesetOptions,
        url: impl Into<String>,
    ) -> Result<Self, ErrorList> {
        let (loader, root) = LayerJsonLoader::load_root(
            Arc::clone(&externals.accessor),
            Arc::clone(&externals.depot),
            url.into(),
        )
        .await?;
        let mut tileset = Self::empty(externals, options);
        tileset.loaders.push(loader as Arc<dyn TilesetContentLoader>);
        tileset.set_root(root);
        Ok(tileset)
    }

    /// Creates a tileset over the bare WGS84 ellipsoid, with no network.
    pub fn from_ellipsoid(
        externals: TilesetExternals,
        options: TilesetOptions,
        max_level: u32,
    ) -> Self {
        let loader = EllipsoidLoader::new(Arc::clone(&externals.depot), max_level);
        let root = loader.root_descriptor();
        let mut tileset = Self::empty(externals, options);
        tileset.loaders.push(loader as Arc<dyn TilesetContentLoader>);
        tileset.set_root(root);
        tileset
    }

    fn set_root(&mut self, descriptor: TileDescriptor) {
        let key = self.graft_descriptor(None, descriptor, TileRefine::Replace, DMat4::IDENTITY, 0);
        self.root = Some(key);
    }

    pub fn root(&self) -> Option<TileKey> {
        self.root
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn tile(&self, key: TileKey) -> &Tile {
        self.arena.get(key)
    }

    pub fn tile_count(&self) -> usize {
        self.arena.len()
    }

    /// Bytes of tile content currently cached.
    pub fn total_content_bytes(&self) -> u64 {
        self.total_content_bytes
    }

    pub fn credit_system(&self) -> &CreditSystem {
        &self.credits
    }

    /// Attaches a raster overlay; subsequently loaded tiles get textures
    /// draped from it.
    pub fn add_overlay(&mut self, overlay: Arc<RasterOverlay>) {
        self.overlays.push(overlay);
    }

    /// Raster textures draped over a tile, in overlay attach order.
    pub fn raster_mappings(&self, key: TileKey) -> &[RasterMappedTo3DTile] {
        self.raster_mappings
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // =========================================================================
    // Grafting descriptors into the arena
    // =========================================================================

    /// Inserts a descriptor subtree, inheriting refine mode, accumulated
    /// transform, and loader from the parent where the descriptor is silent.
    fn graft_descriptor(
        &mut self,
        parent: Option<TileKey>,
        descriptor: TileDescriptor,
        inherited_refine: TileRefine,
        parent_world: DMat4,
        inherited_loader: usize,
    ) -> TileKey {
        let refine = descriptor.refine.unwrap_or(inherited_refine);
        let world_transform = parent_world * descriptor.transform;
        let loader_index = match descriptor.loader {
            Some(loader) => {
                self.loaders.push(loader);
                self.loaders.len() - 1
            }
            None => inherited_loader,
        };

        let is_leaf = matches!(descriptor.children, DescriptorChildren::Leaf);
        let mut tile = Tile::new(
            parent,
            descriptor.id,
            descriptor.geometric_error,
            refine,
            descriptor.transform,
            world_transform,
            descriptor.bounding_volume,
            descriptor.content,
        );
        tile.loader = loader_index;
        // Zero-error interior tiles carry no detail of their own and are
        // always refined past.
        tile.unconditionally_refine = descriptor.geometric_error <= 0.0 && !is_leaf;
        let key = self.arena.insert(tile);

        match descriptor.children {
            DescriptorChildren::Leaf => {
                self.arena.get_mut(key).children = TileChildren::Materialized(Vec::new());
            }
            DescriptorChildren::Nested(children) => {
                let keys: Vec<TileKey> = children
                    .into_iter()
                    .map(|child| {
                        self.graft_descriptor(
                            Some(key),
                            child,
                            refine,
                            world_transform,
                            loader_index,
                        )
                    })
                    .collect();
                self.arena.get_mut(key).children = TileChildren::Materialized(keys);
            }
            DescriptorChildren::Deferred => {}
        }
        key
    }

    fn graft_children(&mut self, key: TileKey, descriptors: Vec<TileDescriptor>) {
        let (refine, world_transform, loader_index) = {
            let tile = self.arena.get(key);
            (tile.refine, tile.world_transform, tile.loader)
        };
        let keys: Vec<TileKey> = descriptors
            .into_iter()
            .map(|child| {
                self.graft_descriptor(Some(key), child, refine, world_transform, loader_index)
            })
            .collect();
        self.arena.get_mut(key).children = TileChildren::Materialized(keys);
    }

    // =========================================================================
    // Children resolution
    // =========================================================================

    pub(crate) fn snapshot(&self, key: TileKey) -> TileSnapshot {
        let tile = self.arena.get(key);
        TileSnapshot {
            key,
            id: tile.id.clone(),
            content: tile.content.kind.clone(),
            geometric_error: tile.geometric_error,
            refine: tile.refine,
            bounding_volume: tile.world_bounding_volume.clone(),
            world_transform: tile.world_transform,
        }
    }

    /// Starts (or finishes synchronously) resolution of a tile's children.
    /// The tile behaves as a leaf until the resolution lands.
    pub(crate) fn resolve_children(&mut self, key: TileKey) {
        if !matches!(self.arena.get(key).children, TileChildren::Unresolved) {
            return;
        }
        let loader = Arc::clone(&self.loaders[self.arena.get(key).loader]);
        let snapshot = self.snapshot(key);
        match loader.resolve_children(&snapshot) {
            ChildrenResolution::Ready(descriptors) => self.graft_children(key, descriptors),
            ChildrenResolution::Pending(future) => {
                self.arena.get_mut(key).children = TileChildren::Resolving;
                let tx = self.children_tx.clone();
                tokio::spawn(async move {
                    let result = future.await;
                    let _ = tx.send(ChildrenCompletion { key, result });
                });
            }
        }
    }

    fn apply_children_completion(&mut self, completion: ChildrenCompletion) {
        if !matches!(
            self.arena.get(completion.key).children,
            TileChildren::Resolving
        ) {
            return;
        }
        match completion.result {
            Ok(descriptors) => self.graft_children(completion.key, descriptors),
            Err(errors) => {
                errors.log("resolving tile children");
                // Back to unresolved so a later frame retries.
                self.arena.get_mut(completion.key).children = TileChildren::Unresolved;
            }
        }
    }

    // =========================================================================
    // Content loading
    // =========================================================================

    /// Applies all completed background work: content loads, children
    /// resolutions, overlay textures. Call once per frame, after
    /// `update_view`.
    pub fn load_tiles(&mut self) {
        while let Ok(completion) = self.children_rx.try_recv() {
            self.apply_children_completion(completion);
        }
        while let Ok(result) = self.completion_rx.try_recv() {
            self.apply_load_result(result);
        }
        while let Ok(completion) = self.overlay_rx.try_recv() {
            self.apply_overlay_completion(completion);
        }
    }

    fn apply_load_result(&mut self, result: TileLoadResult) {
        self.loads_in_progress = self.loads_in_progress.saturating_sub(1);
        result.errors.log("loading tile content");
        let key = result.key;
        if self.arena.get(key).load_state != TileLoadState::ContentLoading {
            return;
        }
        match result.outcome {
            ContentOutcome::Model(handle) => {
                let byte_size = handle.size_bytes() as usize;
                let render_resources = self.externals.prepare.prepare(&handle);
                let credits: Vec<Credit> = handle
                    .credits
                    .iter()
                    .map(|text| self.credits.create_credit(text.clone(), false))
                    .collect();
                if !credits.is_empty() {
                    self.tile_credits.insert(key, credits);
                }
                {
                    let tile = self.arena.get_mut(key);
                    tile.content.model = Some(handle);
                    tile.content.render_resources = Some(render_resources);
                    tile.content.byte_size = byte_size;
                    tile.load_state = TileLoadState::Done;
                }
                self.total_content_bytes += byte_size as u64;
                self.lru_push_tail(key);
                self.failed_frames.remove(&key);
                self.attach_raster_overlays(key);
            }
            ContentOutcome::Empty => {
                self.arena.get_mut(key).load_state = TileLoadState::Done;
                self.failed_frames.remove(&key);
            }
            ContentOutcome::External(descriptors) => {
                self.graft_children(key, descriptors);
                self.arena.get_mut(key).load_state = TileLoadState::Done;
                self.failed_frames.remove(&key);
            }
            ContentOutcome::FailedTemporarily(message) => {
                warn!(tile = ?self.arena.get(key).id, "Tile load failed (will retry): {message}");
                self.arena.get_mut(key).load_state = TileLoadState::FailedTemporarily;
                self.failed_frames.insert(key, self.last_frame);
            }
            ContentOutcome::Failed(message) => {
                warn!(tile = ?self.arena.get(key).id, "Tile load failed permanently: {message}");
                self.arena.get_mut(key).load_state = TileLoadState::Failed;
            }
        }
    }

    /// Puts a tile on one of this frame's load queues. Contentless tiles
    /// complete immediately instead.
    pub(crate) fn add_tile_to_load_queue(
        &mut self,
        views: &[crate::geometry::ViewState],
        key: TileKey,
        class: LoadPriority,
    ) {
        if self.queued_this_frame.contains(&key) {
            return;
        }
        if !self.arena.get(key).needs_load() {
            return;
        }
        if self.arena.get(key).content.kind == TileContentKind::None {
            // Structural tile: nothing to fetch.
            self.arena.get_mut(key).load_state = TileLoadState::Done;
            return;
        }
        if let Some(&failed_frame) = self.failed_frames.get(&key) {
            if self.last_frame < failed_frame + self.options.failed_tile_retry_frames {
                return;
            }
        }

        let priority = self.compute_load_priority(views, key);
        let entry = QueuedLoad { key, priority };
        self.queued_this_frame.insert(key);
        match class {
            LoadPriority::High => self.high_priority_queue.push(entry),
            LoadPriority::Medium => self.medium_priority_queue.push(entry),
            LoadPriority::Low => self.low_priority_queue.push(entry),
        }
    }

    /// Lower is loaded sooner: tiles near the view center and close to the
    /// camera win.
    fn compute_load_priority(&self, views: &[crate::geometry::ViewState], key: TileKey) -> f64 {
        let tile = self.arena.get(key);
        let center = crate::tileset::traversal::volume_center(&tile.world_bounding_volume);
        let mut priority = f64::MAX;
        for view in views {
            let to_tile = center - view.position();
            let magnitude = to_tile.length();
            if magnitude < 1.0e-7 {
                return 0.0;
            }
            let alignment = 1.0 - (to_tile / magnitude).dot(view.direction());
            priority = priority.min(alignment * magnitude);
        }
        priority
    }

    /// Dispatches queued loads, highest priority class first, until the
    /// concurrency limit stops it. The cache budget never blocks loads the
    /// selection asked for; it is enforced by eviction instead.
    pub(crate) fn process_load_queue(&mut self) {
        let mut queues = [
            std::mem::take(&mut self.high_priority_queue),
            std::mem::take(&mut self.medium_priority_queue),
            std::mem::take(&mut self.low_priority_queue),
        ];
        'outer: for queue in &mut queues {
            queue.sort_by(|a, b| a.priority.total_cmp(&b.priority));
            for entry in queue.iter() {
                if self.loads_in_progress >= self.options.maximum_simultaneous_tile_loads {
                    break 'outer;
                }
                self.dispatch_load(entry.key);
            }
        }
        let [high, medium, low] = queues;
        self.high_priority_queue = high;
        self.medium_priority_queue = medium;
        self.low_priority_queue = low;
    }

    fn dispatch_load(&mut self, key: TileKey) {
        if !self.arena.get(key).load_state.is_loadable() {
            return;
        }
        self.arena.get_mut(key).load_state = TileLoadState::ContentLoading;
        self.loads_in_progress += 1;
        let loader = Arc::clone(&self.loaders[self.arena.get(key).loader]);
        let snapshot = self.snapshot(key);
        let tx = self.completion_tx.clone();
        debug!(tile = ?snapshot.id, "Dispatching tile load");
        tokio::spawn(async move {
            let result = loader.request_content(&snapshot).await;
            let _ = tx.send(result);
        });
    }

    // =========================================================================
    // Raster overlays
    // =========================================================================

    /// Drapes every attached overlay over a freshly loaded tile and kicks
    /// off the texture loads.
    fn attach_raster_overlays(&mut self, key: TileKey) {
        if self.overlays.is_empty() {
            return;
        }
        let (rectangle, geometric_error) = {
            let tile = self.arena.get(key);
            match tile.world_bounding_volume.rectangle() {
                Some(rectangle) => (rectangle, tile.geometric_error),
                None => return,
            }
        };

        let mut mappings = Vec::new();
        for overlay in &self.overlays {
            let Some(mut mapping) = overlay.map_to_tile(&rectangle, geometric_error) else {
                continue;
            };
            mapping.state = RasterOverlayTileState::Loading;
            let mapping_index = mappings.len();
            let overlay = Arc::clone(overlay);
            let overlay_tile = mapping.overlay_tile;
            let tx = self.overlay_tx.clone();
            tokio::spawn(async move {
                let result = overlay.load_overlay_tile(overlay_tile).await;
                let _ = tx.send(OverlayCompletion {
                    key,
                    mapping_index,
                    result,
                });
            });
            mappings.push(mapping);
        }
        if !mappings.is_empty() {
            self.raster_mappings.insert(key, mappings);
        }
    }

    fn apply_overlay_completion(&mut self, completion: OverlayCompletion) {
        let Some(mappings) = self.raster_mappings.get_mut(&completion.key) else {
            return;
        };
        let Some(mapping) = mappings.get_mut(completion.mapping_index) else {
            return;
        };
        match completion.result {
            Ok(handle) => {
                mapping.texture = Some(handle);
                mapping.state = RasterOverlayTileState::Loaded;
            }
            Err(message) => {
                warn!("Overlay tile load failed: {message}");
                mapping.state = RasterOverlayTileState::Failed;
            }
        }
    }

    /// References credits for this frame's rendered content.
    pub(crate) fn reference_frame_credits(&mut self, rendered: &[TileKey]) {
        if rendered.is_empty() {
            return;
        }
        let mut referenced: Vec<Credit> = Vec::new();
        for key in rendered {
            if let Some(credits) = self.tile_credits.get(key) {
                referenced.extend_from_slice(credits);
            }
        }
        for overlay in &self.overlays {
            if let Some(text) = overlay.credit() {
                let credit = self.credits.create_credit(text, false);
                referenced.push(credit);
            }
        }
        for credit in referenced {
            self.credits.add_credit_reference(credit);
        }
    }

    // =========================================================================
    // Cache eviction
    // =========================================================================

    fn lru_in_list(&self, key: TileKey) -> bool {
        self.lru_head == Some(key)
            || self.arena.get(key).lru_prev.is_some()
            || self.arena.get(key).lru_next.is_some()
    }

    fn lru_unlink(&mut self, key: TileKey) {
        let (prev, next) = {
            let tile = self.arena.get(key);
            (tile.lru_prev, tile.lru_next)
        };
        match prev {
            Some(prev) => self.arena.get_mut(prev).lru_next = next,
            None if self.lru_head == Some(key) => self.lru_head = next,
            None => {}
        }
        match next {
            Some(next) => self.arena.get_mut(next).lru_prev = prev,
            None if self.lru_tail == Some(key) => self.lru_tail = prev,
            None => {}
        }
        let tile = self.arena.get_mut(key);
        tile.lru_prev = None;
        tile.lru_next = None;
    }

    fn lru_push_tail(&mut self, key: TileKey) {
        if self.lru_in_list(key) {
            self.lru_unlink(key);
        }
        match self.lru_tail {
            Some(tail) => {
                self.arena.get_mut(tail).lru_next = Some(key);
                self.arena.get_mut(key).lru_prev = Some(tail);
            }
            None => self.lru_head = Some(key),
        }
        self.lru_tail = Some(key);
    }

    /// Marks a tile as used this frame, moving it to the recent end of the
    /// eviction list if it holds content.
    pub(crate) fn mark_tile_used(&mut self, key: TileKey, frame: u64) {
        self.arena.get_mut(key).last_used_frame = frame;
        if self.lru_in_list(key) {
            self.lru_push_tail(key);
        }
    }

    /// Unloads least-recently-used tile content until the cache budget is
    /// met. Tiles used this frame, and the root, are never unloaded.
    pub(crate) fn unload_cached_tiles(&mut self, frame: u64) {
        while self.total_content_bytes > self.options.maximum_cached_bytes {
            let Some(head) = self.lru_head else { break };
            if Some(head) == self.root {
                break;
            }
            // Everything behind the head is more recent; once the oldest
            // tile is current, the whole list is.
            if self.arena.get(head).last_used_frame == frame {
                break;
            }
            self.unload_tile_content(head);
        }
    }

    fn unload_tile_content(&mut self, key: TileKey) {
        self.lru_unlink(key);
        self.raster_mappings.remove(&key);
        let (render_resources, freed_bytes) = {
            let tile = self.arena.get_mut(key);
            tile.load_state = TileLoadState::Unloading;
            tile.content.model = None;
            let handle = tile.content.render_resources.take();
            let bytes = std::mem::take(&mut tile.content.byte_size);
            tile.load_state = TileLoadState::Unloaded;
            (handle, bytes)
        };
        if let Some(handle) = render_resources {
            self.externals.prepare.free(handle);
        }
        self.total_content_bytes = self.total_content_bytes.saturating_sub(freed_bytes as u64);
        debug!(tile = ?self.arena.get(key).id, "Unloaded tile content");
    }
}
