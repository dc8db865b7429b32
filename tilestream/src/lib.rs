//! Streaming client for massive 3D geospatial tilesets.
//!
//! This crate selects, loads, and caches tiles of a 3D Tiles-style tileset
//! against one or more camera views, keeping screen-space error within a
//! configured bound while content streams in the background. It speaks
//! explicit tileset.json trees, implicit quadtree/octree tilings with
//! subtree availability, quantized-mesh terrain behind layer.json, and a
//! procedural ellipsoid fallback; raster imagery overlays drape over
//! whichever geometry is loaded.
//!
//! # Architecture
//!
//! The [`tileset::Tileset`] is single-threaded by construction: all tree
//! mutation happens through `&mut self`, while fetching and decoding run
//! on tokio worker tasks that communicate results back over channels.
//! Decoded payloads live in a [`depot::SharedAssetDepot`], so identical
//! content reached through different tiles is fetched and decoded once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glam::{DVec2, DVec3};
//! use tilestream::accessor::ReqwestAccessor;
//! use tilestream::geometry::ViewState;
//! use tilestream::tileset::{Tileset, TilesetExternals, TilesetOptions, TilesetViewGroup};
//!
//! # async fn run() -> Result<(), tilestream::error::ErrorList> {
//! let accessor = ReqwestAccessor::new().map_err(|e| tilestream::error::ErrorList::error(e.to_string()))?;
//! let externals = TilesetExternals::new(Arc::new(accessor));
//! let mut tileset =
//!     Tileset::from_url(externals, TilesetOptions::default(), "https://example.com/tileset.json")
//!         .await?;
//! let mut view_group = TilesetViewGroup::new();
//! let view = ViewState::create(
//!     DVec3::new(1.0e7, 0.0, 0.0),
//!     DVec3::NEG_X,
//!     DVec3::Z,
//!     DVec2::new(1920.0, 1080.0),
//!     1.0,
//!     0.6,
//! );
//! loop {
//!     let result = tileset.update_view(&mut view_group, &[view.clone()]);
//!     tileset.load_tiles();
//!     # let _ = result; break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod content;
pub mod credit;
pub mod depot;
pub mod error;
pub mod geometry;
pub mod height;
pub mod implicit;
pub mod loader;
pub mod occlusion;
pub mod overlay;
pub mod tile;
pub mod tileset;
