//! Common types and utilities shared across CLI commands.

use std::sync::Arc;

use clap::ValueEnum;

use tilestream::accessor::ReqwestAccessor;
use tilestream::tileset::{Tileset, TilesetExternals, TilesetOptions};

use crate::error::CliError;

/// Tileset source selection for CLI arguments.
#[derive(Debug, Clone, ValueEnum, PartialEq)]
pub enum SourceType {
    /// A tileset.json URL (3D Tiles)
    Tileset,
    /// A quantized-mesh terrain layer.json URL
    Terrain,
    /// A procedural WGS84 ellipsoid surface (no URL required)
    Ellipsoid,
}

/// Build a tileset from a source type and URL.
///
/// The `Ellipsoid` source ignores the URL and streams a synthesized globe
/// surface, which is useful for testing commands offline.
pub async fn build_tileset(
    source: &SourceType,
    url: Option<&str>,
    options: TilesetOptions,
) -> Result<Tileset, CliError> {
    let accessor =
        ReqwestAccessor::new().map_err(|e| CliError::TilesetLoad(e.to_string()))?;
    let externals = TilesetExternals::new(Arc::new(accessor));

    match source {
        SourceType::Tileset => {
            let url = url.ok_or_else(|| {
                CliError::InvalidArguments("a tileset.json URL is required".to_string())
            })?;
            Tileset::from_url(externals, options, url)
                .await
                .map_err(|e| CliError::TilesetLoad(e.to_string()))
        }
        SourceType::Terrain => {
            let url = url.ok_or_else(|| {
                CliError::InvalidArguments("a layer.json URL is required".to_string())
            })?;
            Tileset::from_terrain_layer(externals, options, url)
                .await
                .map_err(|e| CliError::TilesetLoad(e.to_string()))
        }
        SourceType::Ellipsoid => Ok(Tileset::from_ellipsoid(externals, options, 14)),
    }
}
