//! Frame traversal: selects which tiles to render and queues loads.
//!
//! # Design
//!
//! A depth-first walk from the root decides, per tile, whether its own
//! geometric error is acceptable at the current view (render it) or not
//! (refine to children). Three rules prevent visual artifacts while
//! content streams in:
//!
//! * A tile already on screen keeps rendering while its children load, so
//!   refinement never flashes blank.
//! * If a refinement selected descendants that cannot all render yet and
//!   none were visible last frame, the whole descendant set is "kicked"
//!   from the render list and the ancestor renders instead.
//! * A kicked subtree that is too many loads away from ready has its queued
//!   descendant loads dropped in favor of loading the ancestor itself.
//!
//! Load queues are rebuilt every frame from scratch; only tiles the current
//! view actually wants ever load.

use glam::DVec3;

use crate::geometry::{BoundingVolume, ViewState};
use crate::occlusion::TileOcclusionState;
use crate::tile::{TileChildren, TileKey, TileRefine, TileSelectionKind};

use super::view_group::TraversalDetails;
use super::{LoadPriority, Tileset, TilesetViewGroup, ViewUpdateResult};

/// Representative point of a bounding volume, for load prioritization and
/// near-to-far child ordering.
pub(crate) fn volume_center(volume: &BoundingVolume) -> DVec3 {
    let ellipsoid = crate::geometry::Ellipsoid::WGS84;
    match volume {
        BoundingVolume::Box(obb) => obb.center,
        BoundingVolume::Sphere(sphere) => sphere.center,
        BoundingVolume::Region(region) => region.to_oriented_bounding_box(&ellipsoid).center,
        BoundingVolume::S2Cell(cell) => cell.conservative_sphere(&ellipsoid).center,
    }
}

impl Tileset {
    /// Selects tiles for one frame of one view group.
    ///
    /// Traverses the tree against `views`, fills the per-frame load queues,
    /// evicts stale cached content, and dispatches loads. Must be called
    /// from within a tokio runtime; worker tasks are spawned onto it.
    ///
    /// # Returns
    /// The render list, fade-out list, and traversal statistics.
    pub fn update_view(
        &mut self,
        view_group: &mut TilesetViewGroup,
        views: &[ViewState],
    ) -> ViewUpdateResult {
        let frame = view_group.begin_frame();
        self.last_frame = frame;
        self.credits.begin_frame();
        self.high_priority_queue.clear();
        self.medium_priority_queue.clear();
        self.low_priority_queue.clear();
        self.queued_this_frame.clear();

        let mut result = ViewUpdateResult::default();
        if let Some(root) = self.root() {
            self.visit_tile_if_needed(views, frame, &mut result, root, 0, false);
        }

        if let Some(pool) = &mut self.occlusion {
            pool.prune(frame);
        }
        self.unload_cached_tiles(frame);

        result.tiles_loading_high_priority = self.high_priority_queue.len() as u32;
        result.tiles_loading_medium_priority = self.medium_priority_queue.len() as u32;
        result.tiles_loading_low_priority = self.low_priority_queue.len() as u32;
        self.process_load_queue();
        result.tiles_loading = self.loads_in_progress;

        let rendered = result.tiles_to_render.clone();
        self.reference_frame_credits(&rendered);
        result
    }

    fn visit_tile_if_needed(
        &mut self,
        views: &[ViewState],
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
        depth: u32,
        ancestor_meets_sse: bool,
    ) -> TraversalDetails {
        self.mark_tile_used(key, frame);

        let culled = {
            let volume = &self.arena.get(key).world_bounding_volume;
            !views.iter().any(|view| view.is_bounding_volume_visible(volume))
        };

        if culled && self.options.enable_frustum_culling {
            self.mark_tile_and_children_non_rendered(frame, result, key);
            self.arena
                .get_mut(key)
                .last_selection
                .set(frame, TileSelectionKind::Culled);
            if self.options.preload_siblings {
                self.add_tile_to_load_queue(views, key, LoadPriority::Low);
            }
            result.tiles_culled += 1;
            return TraversalDetails::default();
        }

        self.visit_tile(views, frame, result, key, depth, ancestor_meets_sse, culled)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_tile(
        &mut self,
        views: &[ViewState],
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
        depth: u32,
        mut ancestor_meets_sse: bool,
        culled: bool,
    ) -> TraversalDetails {
        result.tiles_visited += 1;
        if culled {
            result.culled_tiles_visited += 1;
        }
        result.max_depth_visited = result.max_depth_visited.max(depth);

        let meets_sse = self.meets_sse(views, key, culled);
        let (unconditionally_refine, refine) = {
            let tile = self.arena.get(key);
            (tile.unconditionally_refine, tile.refine)
        };
        let mut want_to_refine = unconditionally_refine || (!meets_sse && !ancestor_meets_sse);

        // An entirely occluded tile gains nothing from refinement; render
        // it coarse until it comes out from behind whatever hides it.
        if want_to_refine && !culled && !unconditionally_refine {
            if self.tile_occlusion_state(key, frame) == TileOcclusionState::Occluded {
                want_to_refine = false;
            }
        }

        // Children may need deriving before we can descend. Until they
        // arrive the tile is a de-facto leaf.
        if want_to_refine && !self.arena.get(key).children.is_materialized() {
            self.resolve_children(key);
        }
        let children = match &self.arena.get(key).children {
            TileChildren::Materialized(keys) => Some(keys.clone()),
            TileChildren::Unresolved | TileChildren::Resolving => None,
        };
        let children = match children {
            Some(keys) if !keys.is_empty() => keys,
            // Leaf, or children still being derived.
            _ => return self.render_leaf(views, frame, result, key),
        };

        if want_to_refine && self.options.forbid_holes {
            let waiting = self.queue_children_for_forbid_holes(views, frame, &children);
            want_to_refine = !waiting;
        }

        if !want_to_refine {
            let last_kind = self.arena.get(key).last_selection.get(frame.wrapping_sub(1));
            let should_render_this_tile = matches!(
                last_kind,
                TileSelectionKind::Rendered | TileSelectionKind::None | TileSelectionKind::Culled
            ) || self.arena.get(key).is_renderable();

            if should_render_this_tile {
                if meets_sse && !ancestor_meets_sse {
                    self.add_tile_to_load_queue(views, key, LoadPriority::Medium);
                }
                return self.render_inner_tile(frame, result, key);
            }

            // The tile would meet the error bound but was refined past last
            // frame and has no content yet: keep refining so what is on
            // screen stays, and load this tile urgently.
            ancestor_meets_sse = true;
            if meets_sse {
                self.add_tile_to_load_queue(views, key, LoadPriority::High);
            }
        }

        // Additive tiles render alongside their descendants.
        let mut queued_for_load = false;
        if refine == TileRefine::Add {
            result.tiles_to_render.push(key);
            self.arena
                .get_mut(key)
                .last_selection
                .set(frame, TileSelectionKind::Rendered);
            if self.arena.get(key).needs_load() {
                self.add_tile_to_load_queue(views, key, LoadPriority::Medium);
                queued_for_load = true;
            }
        }

        let first_rendered_descendant = result.tiles_to_render.len();
        let queue_marks = (
            self.high_priority_queue.len(),
            self.medium_priority_queue.len(),
            self.low_priority_queue.len(),
        );

        let mut details = TraversalDetails::default();
        for child in self.children_near_to_far(views, &children) {
            let child_details =
                self.visit_tile_if_needed(views, frame, result, child, depth + 1, ancestor_meets_sse);
            details.merge(&child_details);
        }

        if result.tiles_to_render.len() == first_rendered_descendant && refine != TileRefine::Add {
            // Every descendant was culled or refined to nothing; record the
            // refinement without rendering anything here.
            self.mark_tile_non_rendered(frame, result, key);
            self.arena
                .get_mut(key)
                .last_selection
                .set(frame, TileSelectionKind::Refined);
        } else if !details.all_are_renderable && !details.any_were_rendered_last_frame {
            self.kick_descendants_and_render_tile(
                views,
                frame,
                result,
                key,
                refine,
                &mut details,
                first_rendered_descendant,
                queue_marks,
                &mut queued_for_load,
            );
        } else if refine != TileRefine::Add {
            self.mark_tile_non_rendered(frame, result, key);
            self.arena
                .get_mut(key)
                .last_selection
                .set(frame, TileSelectionKind::Refined);
        }

        if self.options.preload_ancestors && !queued_for_load {
            self.add_tile_to_load_queue(views, key, LoadPriority::Low);
        }
        details
    }

    /// Largest screen-space error over all views, compared against the
    /// applicable threshold.
    fn meets_sse(&self, views: &[ViewState], key: TileKey, culled: bool) -> bool {
        let tile = self.arena.get(key);
        let mut largest = 0.0_f64;
        for view in views {
            let distance_squared =
                view.compute_distance_squared_to_bounding_volume(&tile.world_bounding_volume);
            let distance = distance_squared.max(0.0).sqrt();
            largest = largest.max(view.compute_screen_space_error(tile.geometric_error, distance));
        }
        if culled {
            !self.options.enforce_culled_screen_space_error
                || largest < self.options.culled_screen_space_error
        } else {
            largest < self.options.maximum_screen_space_error
        }
    }

    fn tile_occlusion_state(&mut self, key: TileKey, frame: u64) -> TileOcclusionState {
        let Some(pool) = &mut self.occlusion else {
            return TileOcclusionState::NotOccluded;
        };
        match pool.fetch_for_tile(key, frame) {
            Some(proxy) => proxy.occlusion_state(),
            None => TileOcclusionState::NotAvailable,
        }
    }

    fn render_leaf(
        &mut self,
        views: &[ViewState],
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
    ) -> TraversalDetails {
        let rendered_last_frame = self
            .arena
            .get(key)
            .last_selection
            .was_rendered(frame.wrapping_sub(1));
        self.arena
            .get_mut(key)
            .last_selection
            .set(frame, TileSelectionKind::Rendered);
        result.tiles_to_render.push(key);
        self.add_tile_to_load_queue(views, key, LoadPriority::Medium);
        TraversalDetails::for_single_tile(self.arena.get(key).is_renderable(), rendered_last_frame)
    }

    fn render_inner_tile(
        &mut self,
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
    ) -> TraversalDetails {
        self.mark_children_non_rendered(frame, result, key);
        let rendered_last_frame = self
            .arena
            .get(key)
            .last_selection
            .was_rendered(frame.wrapping_sub(1));
        self.arena
            .get_mut(key)
            .last_selection
            .set(frame, TileSelectionKind::Rendered);
        result.tiles_to_render.push(key);
        TraversalDetails::for_single_tile(self.arena.get(key).is_renderable(), rendered_last_frame)
    }

    /// Queues loads for children that must render before this tile may be
    /// refined without holes. Returns true while any is not yet renderable.
    fn queue_children_for_forbid_holes(
        &mut self,
        views: &[ViewState],
        frame: u64,
        children: &[TileKey],
    ) -> bool {
        let mut waiting = false;
        for &child in children {
            self.mark_tile_used(child, frame);
            let (renderable, unconditional) = {
                let tile = self.arena.get(child);
                (tile.is_renderable(), tile.unconditionally_refine)
            };
            if unconditional {
                // The child contributes nothing itself; look through it.
                if !self.arena.get(child).children.is_materialized() {
                    self.resolve_children(child);
                }
                let grandchildren = self.arena.get(child).children.keys().to_vec();
                waiting |= self.queue_children_for_forbid_holes(views, frame, &grandchildren);
            } else if !renderable {
                self.add_tile_to_load_queue(views, child, LoadPriority::Medium);
                waiting = true;
            }
        }
        waiting
    }

    /// Removes this frame's rendered descendants from the render list,
    /// marking them kicked, and renders this tile instead.
    #[allow(clippy::too_many_arguments)]
    fn kick_descendants_and_render_tile(
        &mut self,
        views: &[ViewState],
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
        refine: TileRefine,
        details: &mut TraversalDetails,
        first_rendered_descendant: usize,
        queue_marks: (usize, usize, usize),
        queued_for_load: &mut bool,
    ) {
        // Kick every rendered descendant and the chain of refined tiles
        // between it and this tile.
        let kicked: Vec<TileKey> = result.tiles_to_render[first_rendered_descendant..].to_vec();
        for descendant in kicked {
            let mut cursor = Some(descendant);
            while let Some(current) = cursor {
                if current == key {
                    break;
                }
                let selection = &mut self.arena.get_mut(current).last_selection;
                if selection.was_kicked(frame) {
                    break;
                }
                selection.kick();
                cursor = self.arena.get(current).parent;
            }
        }
        result.tiles_to_render.truncate(first_rendered_descendant);

        if refine != TileRefine::Add {
            result.tiles_to_render.push(key);
        }
        let really_rendered_last_frame = self.arena.get(key).last_selection.get(frame.wrapping_sub(1))
            == TileSelectionKind::Rendered;
        self.arena
            .get_mut(key)
            .last_selection
            .set(frame, TileSelectionKind::Rendered);

        // A subtree too far from renderable should not hog the loader:
        // drop its queued loads and load this tile instead.
        if !really_rendered_last_frame
            && details.not_yet_renderable_count > self.options.loading_descendant_limit
            && !self.arena.get(key).unconditionally_refine
        {
            self.high_priority_queue.truncate(queue_marks.0);
            self.medium_priority_queue.truncate(queue_marks.1);
            self.low_priority_queue.truncate(queue_marks.2);
            self.add_tile_to_load_queue(views, key, LoadPriority::Medium);
            details.not_yet_renderable_count = u32::from(!self.arena.get(key).is_renderable());
            *queued_for_load = true;
        }

        details.all_are_renderable = self.arena.get(key).is_renderable();
        details.any_were_rendered_last_frame = really_rendered_last_frame;
    }

    /// If the tile was truly rendered last frame, schedule it to fade out.
    fn mark_tile_non_rendered(&mut self, frame: u64, result: &mut ViewUpdateResult, key: TileKey) {
        if self.arena.get(key).last_selection.get(frame.wrapping_sub(1))
            == TileSelectionKind::Rendered
        {
            result.tiles_fading_out.push(key);
        }
    }

    /// Fades out this tile's previously rendered descendants, recursing
    /// only through subtrees that were refined last frame.
    fn mark_children_non_rendered(
        &mut self,
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
    ) {
        let last = self.arena.get(key).last_selection.get(frame.wrapping_sub(1));
        if last != TileSelectionKind::Refined {
            return;
        }
        for child in self.arena.get(key).children.keys().to_vec() {
            self.mark_tile_non_rendered(frame, result, child);
            self.mark_children_non_rendered(frame, result, child);
        }
    }

    fn mark_tile_and_children_non_rendered(
        &mut self,
        frame: u64,
        result: &mut ViewUpdateResult,
        key: TileKey,
    ) {
        self.mark_tile_non_rendered(frame, result, key);
        self.mark_children_non_rendered(frame, result, key);
    }

    /// Children sorted nearest-first to the primary view, so closer detail
    /// is selected and loaded first.
    fn children_near_to_far(&self, views: &[ViewState], children: &[TileKey]) -> Vec<TileKey> {
        let mut sorted = children.to_vec();
        if let Some(view) = views.first() {
            sorted.sort_by(|&a, &b| {
                let da = view.compute_distance_squared_to_bounding_volume(
                    &self.arena.get(a).world_bounding_volume,
                );
                let db = view.compute_distance_squared_to_bounding_volume(
                    &self.arena.get(b).world_bounding_volume,
                );
                da.total_cmp(&db)
            });
        }
        sorted
    }
}
