//! Geometry and geodesy primitives consumed by the traversal engine.
//!
//! Everything here is pure math: bounding volumes with plane tests and point
//! distances, geodetic coordinate conversion over the WGS84 ellipsoid, globe
//! rectangles, and per-viewport view state with screen-space-error
//! computation. No module in here performs I/O or touches tile state.

mod bounding;
mod ellipsoid;
mod rectangle;
mod view;

pub use bounding::{
    BoundingRegion, BoundingSphere, BoundingVolume, CullingResult, OrientedBoundingBox, Plane,
    S2CellBoundingVolume,
};
pub use ellipsoid::{Cartographic, Ellipsoid};
pub use rectangle::GlobeRectangle;
pub use view::{CullingVolume, ViewState};
