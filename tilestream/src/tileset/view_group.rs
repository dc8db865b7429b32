//! Per-view-group selection state and per-frame update results.

use crate::tile::TileKey;

/// Aggregate answer of one tile's subtree during traversal: can the
/// subtree's selected tiles actually be shown yet?
#[derive(Debug, Clone, Copy)]
pub(crate) struct TraversalDetails {
    /// Every selected tile in the subtree is renderable right now.
    pub all_are_renderable: bool,
    /// Some selected tile in the subtree was rendered last frame, so
    /// swapping mid-load would not flash from nothing.
    pub any_were_rendered_last_frame: bool,
    /// Selected tiles still waiting on loads.
    pub not_yet_renderable_count: u32,
}

impl Default for TraversalDetails {
    fn default() -> Self {
        Self {
            all_are_renderable: true,
            any_were_rendered_last_frame: false,
            not_yet_renderable_count: 0,
        }
    }
}

impl TraversalDetails {
    /// Details for a single tile selected in isolation.
    pub fn for_single_tile(renderable: bool, rendered_last_frame: bool) -> Self {
        Self {
            all_are_renderable: renderable,
            any_were_rendered_last_frame: rendered_last_frame,
            not_yet_renderable_count: u32::from(!renderable),
        }
    }

    /// Folds a child subtree's answer into this one.
    pub fn merge(&mut self, other: &TraversalDetails) {
        self.all_are_renderable &= other.all_are_renderable;
        self.any_were_rendered_last_frame |= other.any_were_rendered_last_frame;
        self.not_yet_renderable_count += other.not_yet_renderable_count;
    }
}

/// One logical viewer of a tileset, usually a window or viewport set.
///
/// The group owns the frame counter that scopes tile selection state, so
/// two consecutive `update_view` calls against the same group can compare
/// "rendered last frame" correctly.
#[derive(Debug, Default)]
pub struct TilesetViewGroup {
    current_frame: u64,
}

impl TilesetViewGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame number of the most recent update.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Advances to the next frame and returns its number.
    pub(crate) fn begin_frame(&mut self) -> u64 {
        self.current_frame += 1;
        self.current_frame
    }
}

/// What one `update_view` call decided, for the renderer to act on.
#[derive(Debug, Default)]
pub struct ViewUpdateResult {
    /// Tiles to draw this frame, in traversal order.
    pub tiles_to_render: Vec<TileKey>,
    /// Tiles rendered last frame but not this one; the renderer may fade
    /// them out instead of dropping them instantly.
    pub tiles_fading_out: Vec<TileKey>,

    // Statistics for logging and debugging.
    pub tiles_visited: u32,
    pub culled_tiles_visited: u32,
    pub tiles_culled: u32,
    pub max_depth_visited: u32,
    pub tiles_loading_high_priority: u32,
    pub tiles_loading_medium_priority: u32,
    pub tiles_loading_low_priority: u32,
    /// Content loads currently in flight.
    pub tiles_loading: u32,
}

impl ViewUpdateResult {
    /// Fraction of this frame's needed loads already finished, 0 to 1.
    pub fn load_progress(&self) -> f64 {
        let pending = self.tiles_loading_high_priority
            + self.tiles_loading_medium_priority
            + self.tiles_loading_low_priority
            + self.tiles_loading;
        let done = self.tiles_to_render.len() as u32;
        if pending == 0 {
            1.0
        } else {
            f64::from(done) / f64::from(done + pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_accumulates_not_yet_renderable() {
        let mut details = TraversalDetails::default();
        details.merge(&TraversalDetails::for_single_tile(false, false));
        details.merge(&TraversalDetails::for_single_tile(true, true));
        assert!(!details.all_are_renderable);
        assert!(details.any_were_rendered_last_frame);
        assert_eq!(details.not_yet_renderable_count, 1);
    }

    #[test]
    fn test_view_group_frames_advance() {
        let mut group = TilesetViewGroup::new();
        assert_eq!(group.begin_frame(), 1);
        assert_eq!(group.begin_frame(), 2);
        assert_eq!(group.current_frame(), 2);
    }
}
