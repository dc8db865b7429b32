//! Sample-heightmap command - rasterize terrain heights into an image.
//!
//! Samples the most-detailed terrain height on a regular lat/lon grid and
//! writes the result as an 8-bit grayscale PNG, black at the lowest sampled
//! height and white at the highest.

use std::path::PathBuf;

use clap::Args;
use image::GrayImage;
use tracing::{info, warn};

use tilestream::geometry::Cartographic;
use tilestream::tileset::TilesetOptions;

use crate::commands::common::{build_tileset, SourceType};
use crate::error::CliError;

/// Arguments for the sample-heightmap command.
#[derive(Debug, Args)]
pub struct SampleHeightmapArgs {
    /// Kind of tileset to sample
    #[arg(long, value_enum, default_value = "terrain")]
    pub source: SourceType,

    /// URL of the tileset.json or layer.json (unused for the ellipsoid source)
    pub url: Option<String>,

    /// Output PNG path
    #[arg(long, default_value = "heightmap.png")]
    pub output: PathBuf,

    /// Samples per image axis
    #[arg(long, default_value_t = 64)]
    pub resolution: u32,

    /// Western edge of the sampled rectangle, degrees
    #[arg(long, default_value_t = -180.0, allow_hyphen_values = true)]
    pub west: f64,

    /// Southern edge of the sampled rectangle, degrees
    #[arg(long, default_value_t = -90.0, allow_hyphen_values = true)]
    pub south: f64,

    /// Eastern edge of the sampled rectangle, degrees
    #[arg(long, default_value_t = 180.0, allow_hyphen_values = true)]
    pub east: f64,

    /// Northern edge of the sampled rectangle, degrees
    #[arg(long, default_value_t = 90.0, allow_hyphen_values = true)]
    pub north: f64,
}

/// Run the sample-heightmap command.
pub async fn run(args: SampleHeightmapArgs) -> Result<(), CliError> {
    if args.resolution < 2 {
        return Err(CliError::InvalidArguments(
            "resolution must be at least 2".to_string(),
        ));
    }
    if args.west >= args.east || args.south >= args.north {
        return Err(CliError::InvalidArguments(
            "rectangle must satisfy west < east and south < north".to_string(),
        ));
    }

    let mut tileset = build_tileset(&args.source, args.url.as_deref(), TilesetOptions::default())
        .await?;

    // Row 0 of the image is the northern edge.
    let n = args.resolution;
    let mut positions = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        let t = row as f64 / (n - 1) as f64;
        let latitude = args.north + t * (args.south - args.north);
        for col in 0..n {
            let s = col as f64 / (n - 1) as f64;
            let longitude = args.west + s * (args.east - args.west);
            positions.push(Cartographic::from_degrees(longitude, latitude, 0.0));
        }
    }

    info!(samples = positions.len(), "sampling terrain heights");
    let results = tileset.sample_height_most_detailed(&positions).await;
    for warning in &results.warnings {
        warn!("{}", warning);
    }

    let heights: Vec<Option<f64>> = results
        .positions
        .iter()
        .map(|r| r.height_available.then_some(r.position.height))
        .collect();
    let available = heights.iter().flatten().count();
    if available == 0 {
        warn!("no sample intersected tile geometry; the image will be black");
    }

    let pixels = normalize_heights(&heights);
    let image = GrayImage::from_fn(n, n, |x, y| {
        image::Luma([pixels[(y * n + x) as usize]])
    });
    image
        .save(&args.output)
        .map_err(|e| CliError::OutputWrite(e.to_string()))?;

    println!(
        "Sampled {} of {} positions, wrote {}",
        available,
        heights.len(),
        args.output.display()
    );
    Ok(())
}

/// Map heights onto 0..=255, scaled between the minimum and maximum sampled
/// height. Missing samples become 0. A flat (or empty) field maps to 0.
fn normalize_heights(heights: &[Option<f64>]) -> Vec<u8> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for h in heights.iter().flatten() {
        min = min.min(*h);
        max = max.max(*h);
    }
    let range = max - min;
    heights
        .iter()
        .map(|h| match h {
            Some(h) if range > 0.0 => (((h - min) / range) * 255.0).round() as u8,
            Some(_) => 0,
            None => 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_heights_scales_to_full_range() {
        let pixels = normalize_heights(&[Some(100.0), Some(300.0), Some(200.0)]);
        assert_eq!(pixels, vec![0, 255, 128]);
    }

    #[test]
    fn test_normalize_heights_missing_samples_are_black() {
        let pixels = normalize_heights(&[None, Some(5.0), Some(10.0), None]);
        assert_eq!(pixels[0], 0);
        assert_eq!(pixels[3], 0);
        assert_eq!(pixels[2], 255);
    }

    #[test]
    fn test_normalize_heights_flat_field() {
        let pixels = normalize_heights(&[Some(42.0), Some(42.0)]);
        assert_eq!(pixels, vec![0, 0]);
    }

    #[test]
    fn test_heightmap_png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heightmap.png");

        let pixels = normalize_heights(&[Some(0.0), Some(100.0), None, Some(50.0)]);
        let image = GrayImage::from_fn(2, 2, |x, y| image::Luma([pixels[(y * 2 + x) as usize]]));
        image.save(&path).unwrap();

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.dimensions(), (2, 2));
        assert_eq!(reloaded.get_pixel(0, 0).0, [0]);
        assert_eq!(reloaded.get_pixel(1, 0).0, [255]);
        assert_eq!(reloaded.get_pixel(0, 1).0, [0]);
    }
}
