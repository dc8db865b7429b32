//! Inspect command - stream a tileset from a fixed viewpoint.
//!
//! Builds a view at the given position looking straight down, then runs the
//! selection/load loop until every selected tile has content, printing the
//! selection statistics and the attribution the renderer would display.

use clap::Args;
use glam::DVec2;
use tracing::info;

use tilestream::geometry::{Cartographic, Ellipsoid, ViewState};
use tilestream::tileset::{TilesetOptions, TilesetViewGroup};

use crate::commands::common::{build_tileset, SourceType};
use crate::error::CliError;

/// Arguments for the inspect command.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Kind of tileset to stream
    #[arg(long, value_enum, default_value = "tileset")]
    pub source: SourceType,

    /// URL of the tileset.json or layer.json (unused for the ellipsoid source)
    pub url: Option<String>,

    /// Camera longitude, degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub longitude: f64,

    /// Camera latitude, degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub latitude: f64,

    /// Camera height above the ellipsoid, meters
    #[arg(long, default_value_t = 1_000_000.0)]
    pub height: f64,

    /// Maximum screen-space error driving refinement
    #[arg(long, default_value_t = 16.0)]
    pub sse: f64,

    /// Give up after this many frames even if loads are still pending
    #[arg(long, default_value_t = 500)]
    pub max_frames: u32,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs) -> Result<(), CliError> {
    let options = TilesetOptions {
        maximum_screen_space_error: args.sse,
        ..TilesetOptions::default()
    };
    let mut tileset = build_tileset(&args.source, args.url.as_deref(), options).await?;

    let ellipsoid = Ellipsoid::WGS84;
    let camera_carto = Cartographic::from_degrees(args.longitude, args.latitude, args.height);
    let position = ellipsoid.cartographic_to_cartesian(&camera_carto);
    let down = -ellipsoid.geodetic_surface_normal_cartographic(&camera_carto);
    // Any direction not parallel to the view direction works as the up hint.
    let up_hint = if down.z.abs() > 0.9 {
        glam::DVec3::X
    } else {
        glam::DVec3::Z
    };
    let up = (up_hint - down * down.dot(up_hint)).normalize();
    let view = ViewState::create(
        position,
        down,
        up,
        DVec2::new(1920.0, 1080.0),
        (60.0f64).to_radians(),
        (34.0f64).to_radians(),
    );

    let mut view_group = TilesetViewGroup::new();
    let mut frame = 0u32;
    let result = loop {
        let result = tileset.update_view(&mut view_group, &[view.clone()]);
        tileset.load_tiles();
        frame += 1;

        if frame % 50 == 0 {
            info!(
                frame,
                rendered = result.tiles_to_render.len(),
                loading = result.tiles_loading,
                progress = format!("{:.0}%", result.load_progress() * 100.0),
                "streaming"
            );
        }
        if result.load_progress() >= 1.0 && result.tiles_loading == 0 {
            break result;
        }
        if frame >= args.max_frames {
            info!(frame, "frame limit reached with loads still pending");
            break result;
        }
        // Let in-flight load tasks make progress before the next frame.
        tokio::task::yield_now().await;
    };

    println!("Frames:            {}", frame);
    println!("Tiles rendered:    {}", result.tiles_to_render.len());
    println!("Tiles visited:     {}", result.tiles_visited);
    println!("Tiles culled:      {}", result.tiles_culled);
    println!("Max depth:         {}", result.max_depth_visited);
    println!("Tiles in memory:   {}", tileset.tile_count());
    println!(
        "Content bytes:     {:.1} MiB",
        tileset.total_content_bytes() as f64 / (1024.0 * 1024.0)
    );
    let credits = tileset.credit_system().credits_to_show();
    if !credits.is_empty() {
        println!("Attribution:");
        for credit in credits {
            println!("  {}", tileset.credit_system().html(credit));
        }
    }
    Ok(())
}
