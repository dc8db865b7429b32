//! Tile content: decoded models and payload converters.
//!
//! The [`ContentConverterRegistry`] turns raw downloaded bytes into a
//! [`TileModel`], dispatching by magic bytes or file extension. Wrapper
//! formats (`.b3dm`, `.cmpt`) recurse through the registry for their inner
//! payloads.

mod composite;
mod model;
mod registry;

pub use composite::convert_composite;
pub use model::TileModel;
pub use registry::{ContentConverterRegistry, Converter, ConverterResult};
