//! Per-tile load and selection state.
//!
//! Each tile carries exactly one [`TileLoadState`], mutated only by the
//! thread holding `&mut Tileset`. The selection state records what the
//! traversal decided for the tile on a given frame so the next frame can
//! distinguish "rendered last frame" from "refined past" from "culled",
//! which drives the hole-prevention and fade logic.

/// Content load state machine.
///
/// ```text
/// Unloaded -> ContentLoading -> ContentLoaded -> Done
///                  |   \-> FailedTemporarily (transient, retried on reselection)
///                  \-----> Failed            (permanent, skipped by traversal)
/// Done | ContentLoaded | Failed | FailedTemporarily -> Unloading -> Unloaded
/// ```
///
/// At most one load is in flight per tile; a `ContentLoading` tile is never
/// re-requested. The `Tile` node itself persists across content unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLoadState {
    /// No content loaded and no request in flight.
    Unloaded,
    /// A content request has been dispatched to a worker task.
    ContentLoading,
    /// Bytes fetched and decoded; renderer resources not yet prepared.
    ContentLoaded,
    /// Render-ready.
    Done,
    /// Transient failure (transport error, non-2xx). Retried the next time
    /// the traversal selects this tile.
    FailedTemporarily,
    /// Permanent failure (malformed content). Never retried.
    Failed,
    /// Teardown in progress.
    Unloading,
}

impl TileLoadState {
    /// True when a new load may be dispatched for this tile.
    pub fn is_loadable(self) -> bool {
        matches!(self, Self::Unloaded | Self::FailedTemporarily)
    }

    /// True when the tile has content that must eventually be unloaded.
    pub fn has_content(self) -> bool {
        matches!(self, Self::ContentLoaded | Self::Done)
    }
}

/// What the traversal decided for a tile on a particular frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileSelectionKind {
    /// Not visited, or visited before any decision was recorded.
    #[default]
    None,
    /// Outside every view frustum; subtree not visited.
    Culled,
    /// Selected for rendering.
    Rendered,
    /// Refined past: descendants were selected instead.
    Refined,
    /// Was selected for rendering, then kicked out of the render list in
    /// favor of a renderable ancestor.
    RenderedAndKicked,
    /// Was refined past, then the refinement was kicked.
    RefinedAndKicked,
}

/// A [`TileSelectionKind`] stamped with the frame it applies to.
///
/// Reading the state for any other frame yields [`TileSelectionKind::None`],
/// so stale decisions never leak across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileSelectionState {
    frame: u64,
    kind: TileSelectionKind,
}

impl TileSelectionState {
    /// Records a decision for `frame`.
    pub fn set(&mut self, frame: u64, kind: TileSelectionKind) {
        self.frame = frame;
        self.kind = kind;
    }

    /// The decision recorded for `frame`, or `None` if the stored decision
    /// belongs to a different frame.
    pub fn get(&self, frame: u64) -> TileSelectionKind {
        if self.frame == frame {
            self.kind
        } else {
            TileSelectionKind::None
        }
    }

    /// True if the tile was in the render list on `frame` (kicked or not).
    pub fn was_rendered(&self, frame: u64) -> bool {
        matches!(
            self.get(frame),
            TileSelectionKind::Rendered | TileSelectionKind::RenderedAndKicked
        )
    }

    /// True if the tile was kicked on `frame`.
    pub fn was_kicked(&self, frame: u64) -> bool {
        matches!(
            self.get(frame),
            TileSelectionKind::RenderedAndKicked | TileSelectionKind::RefinedAndKicked
        )
    }

    /// Converts a `Rendered`/`Refined` decision into its kicked variant.
    /// Any other decision is left untouched.
    pub fn kick(&mut self) {
        self.kind = match self.kind {
            TileSelectionKind::Rendered => TileSelectionKind::RenderedAndKicked,
            TileSelectionKind::Refined => TileSelectionKind::RefinedAndKicked,
            other => other,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loadable_states() {
        assert!(TileLoadState::Unloaded.is_loadable());
        assert!(TileLoadState::FailedTemporarily.is_loadable());
        assert!(!TileLoadState::ContentLoading.is_loadable());
        assert!(!TileLoadState::Done.is_loadable());
        assert!(!TileLoadState::Failed.is_loadable());
    }

    #[test]
    fn test_selection_state_is_frame_scoped() {
        let mut state = TileSelectionState::default();
        state.set(7, TileSelectionKind::Rendered);
        assert_eq!(state.get(7), TileSelectionKind::Rendered);
        assert_eq!(state.get(8), TileSelectionKind::None);
        assert!(state.was_rendered(7));
        assert!(!state.was_rendered(6));
    }

    #[test]
    fn test_kick_upgrades_rendered_and_refined() {
        let mut state = TileSelectionState::default();
        state.set(1, TileSelectionKind::Rendered);
        state.kick();
        assert_eq!(state.get(1), TileSelectionKind::RenderedAndKicked);
        assert!(state.was_rendered(1));
        assert!(state.was_kicked(1));

        state.set(2, TileSelectionKind::Refined);
        state.kick();
        assert_eq!(state.get(2), TileSelectionKind::RefinedAndKicked);
        assert!(!state.was_rendered(2));
        assert!(state.was_kicked(2));
    }

    #[test]
    fn test_kick_leaves_culled_alone() {
        let mut state = TileSelectionState::default();
        state.set(3, TileSelectionKind::Culled);
        state.kick();
        assert_eq!(state.get(3), TileSelectionKind::Culled);
    }
}
