//! Implicit tiling: coordinates, availability, and subtree files.
//!
//! An implicit tileset replaces an explicit child list with a coordinate
//! rule (quadtree or octree subdivision) plus availability bitstreams packed
//! into fixed-depth subtree files. Traversal derives child coordinates
//! algorithmically and consults the availability answers to know which of
//! those children actually exist.

mod availability;
mod coords;
mod subtree;

pub use availability::{AvailabilityView, SubdivisionScheme};
pub use coords::{OctreeTileId, QuadtreeTileId};
pub use subtree::{ParsedSubtree, Subtree, SubtreeError, SubtreeJson};
