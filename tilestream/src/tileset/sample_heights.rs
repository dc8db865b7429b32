//! Most-detailed terrain height sampling.

use tracing::debug;

use crate::geometry::{Cartographic, Ellipsoid};
use crate::height::{intersect_ray_triangle, HeightResults, SampleHeightResult};
use crate::tile::{TileChildren, TileKey, TileLoadState, TileRefine};

use super::Tileset;

/// Sample rays start this far above the ellipsoid, clear of any terrain.
const RAY_START_HEIGHT: f64 = 100_000.0;

/// Give up resolving one tile's children after this many failed attempts.
const MAX_RESOLVE_ATTEMPTS: u32 = 3;

impl Tileset {
    /// Samples the terrain height under each position at the most detailed
    /// level available, loading whatever tiles that requires.
    ///
    /// Positions keep their longitude/latitude; the height is replaced by
    /// the sampled value where geometry was hit. Additive-refined ancestors
    /// contribute their geometry alongside descendants; replace-refined
    /// ancestors are superseded by theirs.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn sample_height_most_detailed(
        &mut self,
        positions: &[Cartographic],
    ) -> HeightResults {
        let mut results = HeightResults::default();
        for position in positions {
            results.positions.push(
                self.sample_one_height(position, &mut results.warnings)
                    .await,
            );
        }
        results
    }

    async fn sample_one_height(
        &mut self,
        position: &Cartographic,
        warnings: &mut Vec<String>,
    ) -> SampleHeightResult {
        let Some(root) = self.root() else {
            warnings.push("Height query on a tileset with no root tile".to_string());
            return SampleHeightResult {
                position: *position,
                height_available: false,
            };
        };

        // Descend to the most detailed loaded tiles covering the position.
        let mut candidates: Vec<TileKey> = Vec::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            if !self.tile_covers(key, position) {
                continue;
            }
            self.ensure_children_resolved(key, warnings).await;
            self.ensure_tile_loaded(key).await;

            let covering: Vec<TileKey> = self
                .arena
                .get(key)
                .children
                .keys()
                .iter()
                .copied()
                .filter(|&child| self.tile_covers(child, position))
                .collect();

            let (refine, has_model) = {
                let tile = self.arena.get(key);
                (tile.refine, tile.content.model.is_some())
            };
            if covering.is_empty() {
                candidates.push(key);
            } else {
                if refine == TileRefine::Add && has_model {
                    candidates.push(key);
                }
                stack.extend(covering);
            }
        }
        debug!(
            candidates = candidates.len(),
            "Height query reached finest loaded tiles"
        );

        // Cast straight down along the geodetic normal from above.
        let ellipsoid = Ellipsoid::WGS84;
        let start = Cartographic::new(position.longitude, position.latitude, RAY_START_HEIGHT);
        let origin = ellipsoid.cartographic_to_cartesian(&start);
        let direction = -ellipsoid.geodetic_surface_normal_cartographic(&start);

        let mut nearest: Option<f64> = None;
        for key in candidates {
            let Some(model) = &self.arena.get(key).content.model else {
                continue;
            };
            for triangle in model.indices.chunks_exact(3) {
                let hit = intersect_ray_triangle(
                    origin,
                    direction,
                    model.positions[triangle[0] as usize],
                    model.positions[triangle[1] as usize],
                    model.positions[triangle[2] as usize],
                );
                if let Some(t) = hit {
                    nearest = Some(nearest.map_or(t, |best: f64| best.min(t)));
                }
            }
        }

        match nearest {
            // The first hit from above is the terrain surface.
            Some(t) => {
                let hit_point = origin + direction * t;
                let height = ellipsoid
                    .cartesian_to_cartographic(hit_point)
                    .map(|c| c.height)
                    .unwrap_or(0.0);
                SampleHeightResult {
                    position: Cartographic::new(position.longitude, position.latitude, height),
                    height_available: true,
                }
            }
            None => SampleHeightResult {
                position: *position,
                height_available: false,
            },
        }
    }

    /// True when the tile's footprint may contain the position. Volumes
    /// without a geodetic footprint are kept conservatively.
    fn tile_covers(&self, key: TileKey, position: &Cartographic) -> bool {
        match self.arena.get(key).world_bounding_volume.rectangle() {
            Some(rectangle) => rectangle.contains(position),
            None => true,
        }
    }

    /// Drives children resolution for one tile to completion, applying
    /// unrelated completions that arrive in between.
    async fn ensure_children_resolved(&mut self, key: TileKey, warnings: &mut Vec<String>) {
        let mut attempts = 0;
        loop {
            match self.arena.get(key).children {
                TileChildren::Materialized(_) => return,
                TileChildren::Unresolved => {
                    if attempts >= MAX_RESOLVE_ATTEMPTS {
                        warnings.push(format!(
                            "Giving up resolving children of {:?} for height query",
                            self.arena.get(key).id
                        ));
                        return;
                    }
                    attempts += 1;
                    self.resolve_children(key);
                    // resolve_children may have grafted synchronously.
                    if self.arena.get(key).children.is_materialized() {
                        return;
                    }
                }
                TileChildren::Resolving => {}
            }
            match self.children_rx.recv().await {
                Some(completion) => self.apply_children_completion(completion),
                None => return,
            }
        }
    }

    /// Drives one tile's content load to completion (or failure), applying
    /// unrelated completions that arrive in between.
    async fn ensure_tile_loaded(&mut self, key: TileKey) {
        let mut attempted = false;
        loop {
            match self.arena.get(key).load_state {
                TileLoadState::Done | TileLoadState::Failed => return,
                TileLoadState::FailedTemporarily if attempted => return,
                TileLoadState::Unloaded | TileLoadState::FailedTemporarily => {
                    if attempted {
                        return;
                    }
                    attempted = true;
                    self.dispatch_load(key);
                    if !matches!(
                        self.arena.get(key).load_state,
                        TileLoadState::ContentLoading
                    ) {
                        return;
                    }
                }
                TileLoadState::ContentLoading
                | TileLoadState::ContentLoaded
                | TileLoadState::Unloading => {}
            }
            match self.completion_rx.recv().await {
                Some(result) => self.apply_load_result(result),
                None => return,
            }
        }
    }
}
