//! Integration tests for the selection/load loop over a procedural globe.
//!
//! These tests drive `update_view` + `load_tiles` the way a render loop
//! would, against the network-free ellipsoid tileset:
//! - refinement depth responds to camera distance
//! - load progress converges to complete
//! - replaced coarse tiles surface in `tiles_fading_out`
//! - the cache budget unloads tiles the camera left behind
//!
//! Run with: `cargo test --test streaming_integration`

use std::sync::Arc;

use glam::{DVec2, DVec3};

use tilestream::accessor::MockAssetAccessor;
use tilestream::geometry::{Cartographic, Ellipsoid, ViewState};
use tilestream::tile::{TileKey, TileLoadState};
use tilestream::tileset::{
    Tileset, TilesetExternals, TilesetOptions, TilesetViewGroup, ViewUpdateResult,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// A camera at the given position looking straight down at the ellipsoid.
fn view_above(longitude_deg: f64, latitude_deg: f64, height: f64) -> ViewState {
    let ellipsoid = Ellipsoid::WGS84;
    let carto = Cartographic::from_degrees(longitude_deg, latitude_deg, height);
    let position = ellipsoid.cartographic_to_cartesian(&carto);
    let down = -ellipsoid.geodetic_surface_normal_cartographic(&carto);
    let up_hint = if down.z.abs() > 0.9 { DVec3::X } else { DVec3::Z };
    let up = (up_hint - down * down.dot(up_hint)).normalize();
    ViewState::create(
        position,
        down,
        up,
        DVec2::new(1024.0, 768.0),
        (45.0f64).to_radians(),
        (34.0f64).to_radians(),
    )
}

fn ellipsoid_tileset(options: TilesetOptions) -> Tileset {
    let externals = TilesetExternals::new(Arc::new(MockAssetAccessor::new()));
    Tileset::from_ellipsoid(externals, options, 6)
}

/// Runs frames until every load the selection wants is complete.
async fn converge(
    tileset: &mut Tileset,
    group: &mut TilesetViewGroup,
    views: &[ViewState],
) -> ViewUpdateResult {
    let mut last = tileset.update_view(group, views);
    tileset.load_tiles();
    for _ in 0..1000 {
        if last.load_progress() >= 1.0 && last.tiles_loading == 0 {
            break;
        }
        // Let spawned load tasks run before the next frame.
        tokio::task::yield_now().await;
        tileset.load_tiles();
        last = tileset.update_view(group, views);
        tileset.load_tiles();
    }
    assert!(
        last.load_progress() >= 1.0,
        "selection never finished loading: {} still pending",
        last.tiles_loading_high_priority
            + last.tiles_loading_medium_priority
            + last.tiles_loading_low_priority
    );
    last
}

fn tile_depth(tileset: &Tileset, key: TileKey) -> u32 {
    let mut depth = 0;
    let mut current = key;
    while let Some(parent) = tileset.tile(current).parent {
        depth += 1;
        current = parent;
    }
    depth
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A distant camera is satisfied by coarse tiles; moving close forces
/// refinement to deeper levels.
#[tokio::test]
async fn test_refinement_depth_follows_camera_distance() {
    let mut tileset = ellipsoid_tileset(TilesetOptions::default());
    let mut group = TilesetViewGroup::new();

    let far = converge(&mut tileset, &mut group, &[view_above(-90.0, 0.0, 2.0e7)]).await;
    assert!(!far.tiles_to_render.is_empty());
    let far_depth = far.max_depth_visited;

    let near = converge(&mut tileset, &mut group, &[view_above(-90.0, 0.0, 100_000.0)]).await;
    assert!(!near.tiles_to_render.is_empty());
    assert!(
        near.max_depth_visited > far_depth,
        "near view reached depth {}, far view {}",
        near.max_depth_visited,
        far_depth
    );

    // Everything selected for rendering has loaded content.
    for &key in &near.tiles_to_render {
        assert_eq!(tileset.tile(key).load_state, TileLoadState::Done);
    }
}

/// Tiles rendered last frame but replaced by their children this frame are
/// reported for fade-out instead of vanishing silently.
#[tokio::test]
async fn test_refined_tiles_fade_out() {
    let mut tileset = ellipsoid_tileset(TilesetOptions::default());
    let mut group = TilesetViewGroup::new();

    converge(&mut tileset, &mut group, &[view_above(-90.0, 0.0, 2.0e7)]).await;

    // Approach the surface; as children load in, coarse tiles hand over.
    let near = [view_above(-90.0, 0.0, 200_000.0)];
    let mut saw_fading = false;
    for _ in 0..1000 {
        let result = tileset.update_view(&mut group, &near);
        tileset.load_tiles();
        if !result.tiles_fading_out.is_empty() {
            saw_fading = true;
        }
        if result.load_progress() >= 1.0 && result.tiles_loading == 0 {
            break;
        }
        tokio::task::yield_now().await;
        tileset.load_tiles();
    }
    assert!(saw_fading, "no tile was ever reported as fading out");
}

/// Culled-but-visible-last-frame tiles are skipped by frustum culling and
/// counted, not rendered.
#[tokio::test]
async fn test_frustum_culling_reports_culled_tiles() {
    let mut tileset = ellipsoid_tileset(TilesetOptions::default());
    let mut group = TilesetViewGroup::new();

    let result = converge(&mut tileset, &mut group, &[view_above(-90.0, 20.0, 10_000.0)]).await;

    // Tiles far off to the side of a low, narrow view fall outside it.
    assert!(result.tiles_culled > 0);
    for &key in &result.tiles_to_render {
        assert!(tile_depth(&tileset, key) >= 1, "the root never renders");
    }
}

/// With a tiny cache budget, tiles the camera has left behind are unloaded
/// while the current frame's tiles are kept.
#[tokio::test]
async fn test_cache_budget_unloads_departed_tiles() {
    let options = TilesetOptions {
        maximum_cached_bytes: 1,
        ..TilesetOptions::default()
    };
    let mut tileset = ellipsoid_tileset(options);
    let mut group = TilesetViewGroup::new();

    let west = converge(&mut tileset, &mut group, &[view_above(-90.0, 0.0, 500_000.0)]).await;
    let departed: Vec<TileKey> = west
        .tiles_to_render
        .iter()
        .copied()
        .filter(|&key| tile_depth(&tileset, key) > 1)
        .collect();
    assert!(!departed.is_empty());

    // Fly to the opposite side of the globe and settle there.
    let east = converge(&mut tileset, &mut group, &[view_above(90.0, 0.0, 500_000.0)]).await;
    assert!(!east.tiles_to_render.is_empty());

    assert!(
        departed
            .iter()
            .any(|&key| tileset.tile(key).load_state == TileLoadState::Unloaded),
        "no departed tile was unloaded despite the cache budget"
    );
    for &key in &east.tiles_to_render {
        assert_eq!(tileset.tile(key).load_state, TileLoadState::Done);
    }
}

/// Two views merge their refinement demands: tiles load for both.
#[tokio::test]
async fn test_two_views_union_their_selections() {
    let mut tileset = ellipsoid_tileset(TilesetOptions::default());
    let mut group = TilesetViewGroup::new();

    let views = [
        view_above(-90.0, 0.0, 500_000.0),
        view_above(90.0, 0.0, 500_000.0),
    ];
    let result = converge(&mut tileset, &mut group, &views).await;

    // Both hemispheres contribute rendered tiles.
    let mut saw_west = false;
    let mut saw_east = false;
    for &key in &result.tiles_to_render {
        if let Some(rectangle) = tileset.tile(key).world_bounding_volume.rectangle() {
            let lon = rectangle.center().longitude;
            if lon < 0.0 {
                saw_west = true;
            } else {
                saw_east = true;
            }
        }
    }
    assert!(saw_west && saw_east);
}
