//! Tuning knobs for tileset traversal, loading, and caching.

/// Options controlling how a [`Tileset`](super::Tileset) selects, loads,
/// and caches tiles. The defaults match common real-time-rendering use.
#[derive(Debug, Clone)]
pub struct TilesetOptions {
    /// Maximum screen-space error, in pixels, a rendered tile may have
    /// before the traversal refines to its children.
    pub maximum_screen_space_error: f64,
    /// Skip tiles entirely outside every view frustum.
    pub enable_frustum_culling: bool,
    /// Apply a (laxer) screen-space error test to culled tiles instead of
    /// refining them indefinitely for preloading.
    pub enforce_culled_screen_space_error: bool,
    /// Screen-space error threshold used for culled tiles when
    /// `enforce_culled_screen_space_error` is set.
    pub culled_screen_space_error: f64,
    /// Queue low-priority loads for ancestors of rendered tiles, so zooming
    /// out has content ready.
    pub preload_ancestors: bool,
    /// Queue low-priority loads for culled siblings, so panning has content
    /// ready.
    pub preload_siblings: bool,
    /// When a refined tile's descendants are this many loads away from
    /// renderable, render the tile itself instead of waiting.
    pub loading_descendant_limit: u32,
    /// Refuse to render a tile until all children it refines to are ready,
    /// trading latency for never showing holes.
    pub forbid_holes: bool,
    /// Maximum content loads in flight at once.
    pub maximum_simultaneous_tile_loads: u32,
    /// Unload least-recently-used tile content above this total, in bytes.
    /// Tiles still needed by the current frame are never unloaded.
    pub maximum_cached_bytes: u64,
    /// Frames a temporarily-failed tile waits before its load is retried.
    pub failed_tile_retry_frames: u64,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            enable_frustum_culling: true,
            enforce_culled_screen_space_error: true,
            culled_screen_space_error: 64.0,
            preload_ancestors: true,
            preload_siblings: true,
            loading_descendant_limit: 20,
            forbid_holes: false,
            maximum_simultaneous_tile_loads: 20,
            maximum_cached_bytes: 512 * 1024 * 1024,
            failed_tile_retry_frames: 60,
        }
    }
}
