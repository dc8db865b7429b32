//! Quadtree and octree tile coordinates with Morton indexing.
//!
//! Implicit tilesets address tiles by `(level, x, y[, z])` instead of listing
//! them in JSON. Availability bitstreams are indexed by the Morton (Z-order)
//! index of a coordinate relative to its subtree root, so the bit-interleave
//! helpers here must match the 3D Tiles implicit-tiling specification
//! exactly.
//!
//! Identities relied on throughout:
//!
//! - `absolute_to_relative(root, tile)` with a level-0 root is the identity.
//! - The relative Morton index of a direct child within its parent's subtree
//!   equals the child's index in `children()` order.
//! - `subtree_root(subtree_levels, id)` of a subtree root is itself.

/// Spreads the low 32 bits of `value` so bit i lands at bit 2i.
fn spread_2(value: u32) -> u64 {
    let mut x = value as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Spreads the low 21 bits of `value` so bit i lands at bit 3i.
fn spread_3(value: u32) -> u64 {
    let mut x = (value as u64) & 0x1F_FFFF;
    x = (x | (x << 32)) & 0x001F_0000_0000_FFFF;
    x = (x | (x << 16)) & 0x001F_0000_FF00_00FF;
    x = (x | (x << 8)) & 0x100F_00F0_0F00_F00F;
    x = (x | (x << 4)) & 0x10C3_0C30_C30C_30C3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

// =============================================================================
// Quadtree
// =============================================================================

/// A tile coordinate in an implicit quadtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadtreeTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl QuadtreeTileId {
    /// Creates a quadtree coordinate.
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// Morton index of this coordinate within its level.
    pub fn morton_index(&self) -> u64 {
        spread_2(self.x) | (spread_2(self.y) << 1)
    }

    /// The four children, in Morton order.
    pub fn children(&self) -> [QuadtreeTileId; 4] {
        let level = self.level + 1;
        let x = self.x * 2;
        let y = self.y * 2;
        [
            QuadtreeTileId::new(level, x, y),
            QuadtreeTileId::new(level, x + 1, y),
            QuadtreeTileId::new(level, x, y + 1),
            QuadtreeTileId::new(level, x + 1, y + 1),
        ]
    }

    /// The parent coordinate, or `None` at level 0.
    pub fn parent(&self) -> Option<QuadtreeTileId> {
        if self.level == 0 {
            None
        } else {
            Some(QuadtreeTileId::new(self.level - 1, self.x / 2, self.y / 2))
        }
    }

    /// This coordinate re-based so `root` becomes `(0, 0, 0)`.
    ///
    /// `root` must be an ancestor (or the coordinate itself).
    pub fn relative_to(&self, root: &QuadtreeTileId) -> QuadtreeTileId {
        let relative_level = self.level - root.level;
        QuadtreeTileId::new(
            relative_level,
            self.x - (root.x << relative_level),
            self.y - (root.y << relative_level),
        )
    }

    /// Morton index of this coordinate relative to `root`'s subtree.
    pub fn relative_morton_index(&self, root: &QuadtreeTileId) -> u64 {
        self.relative_to(root).morton_index()
    }

    /// The root coordinate of the fixed-depth subtree containing this tile.
    pub fn subtree_root(&self, subtree_levels: u32) -> QuadtreeTileId {
        let subtree_level = self.level / subtree_levels;
        let levels_left = self.level % subtree_levels;
        QuadtreeTileId::new(
            subtree_level * subtree_levels,
            self.x >> levels_left,
            self.y >> levels_left,
        )
    }
}

// =============================================================================
// Octree
// =============================================================================

/// A tile coordinate in an implicit octree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OctreeTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl OctreeTileId {
    /// Creates an octree coordinate.
    pub fn new(level: u32, x: u32, y: u32, z: u32) -> Self {
        Self { level, x, y, z }
    }

    /// Morton index of this coordinate within its level.
    pub fn morton_index(&self) -> u64 {
        spread_3(self.x) | (spread_3(self.y) << 1) | (spread_3(self.z) << 2)
    }

    /// The eight children, in Morton order.
    pub fn children(&self) -> [OctreeTileId; 8] {
        let level = self.level + 1;
        let x = self.x * 2;
        let y = self.y * 2;
        let z = self.z * 2;
        [
            OctreeTileId::new(level, x, y, z),
            OctreeTileId::new(level, x + 1, y, z),
            OctreeTileId::new(level, x, y + 1, z),
            OctreeTileId::new(level, x + 1, y + 1, z),
            OctreeTileId::new(level, x, y, z + 1),
            OctreeTileId::new(level, x + 1, y, z + 1),
            OctreeTileId::new(level, x, y + 1, z + 1),
            OctreeTileId::new(level, x + 1, y + 1, z + 1),
        ]
    }

    /// The parent coordinate, or `None` at level 0.
    pub fn parent(&self) -> Option<OctreeTileId> {
        if self.level == 0 {
            None
        } else {
            Some(OctreeTileId::new(
                self.level - 1,
                self.x / 2,
                self.y / 2,
                self.z / 2,
            ))
        }
    }

    /// This coordinate re-based so `root` becomes `(0, 0, 0, 0)`.
    pub fn relative_to(&self, root: &OctreeTileId) -> OctreeTileId {
        let relative_level = self.level - root.level;
        OctreeTileId::new(
            relative_level,
            self.x - (root.x << relative_level),
            self.y - (root.y << relative_level),
            self.z - (root.z << relative_level),
        )
    }

    /// Morton index of this coordinate relative to `root`'s subtree.
    pub fn relative_morton_index(&self, root: &OctreeTileId) -> u64 {
        self.relative_to(root).morton_index()
    }

    /// The root coordinate of the fixed-depth subtree containing this tile.
    pub fn subtree_root(&self, subtree_levels: u32) -> OctreeTileId {
        let subtree_level = self.level / subtree_levels;
        let levels_left = self.level % subtree_levels;
        OctreeTileId::new(
            subtree_level * subtree_levels,
            self.x >> levels_left,
            self.y >> levels_left,
            self.z >> levels_left,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadtree_morton_interleave() {
        // x=1 -> bit 0, y=1 -> bit 1.
        assert_eq!(QuadtreeTileId::new(1, 1, 0).morton_index(), 1);
        assert_eq!(QuadtreeTileId::new(1, 0, 1).morton_index(), 2);
        assert_eq!(QuadtreeTileId::new(1, 1, 1).morton_index(), 3);
        // x=0b101, y=0b011 -> interleaved 0b0_1_1_0_1_1 reading y,x pairs.
        assert_eq!(QuadtreeTileId::new(3, 5, 3).morton_index(), 0b011011);
    }

    #[test]
    fn test_octree_morton_interleave() {
        assert_eq!(OctreeTileId::new(1, 1, 0, 0).morton_index(), 1);
        assert_eq!(OctreeTileId::new(1, 0, 1, 0).morton_index(), 2);
        assert_eq!(OctreeTileId::new(1, 0, 0, 1).morton_index(), 4);
        assert_eq!(OctreeTileId::new(1, 1, 1, 1).morton_index(), 7);
    }

    #[test]
    fn test_absolute_to_relative_identity_at_root() {
        let root = OctreeTileId::new(0, 0, 0, 0);
        let tile = OctreeTileId::new(4, 11, 2, 3);
        assert_eq!(tile.relative_to(&root), tile);
    }

    #[test]
    fn test_relative_morton_of_direct_child_is_child_index() {
        let parent = QuadtreeTileId::new(2, 1, 3);
        let children = parent.children();
        for (index, child) in children.iter().enumerate() {
            assert_eq!(child.relative_morton_index(&parent), index as u64);
        }

        let parent = OctreeTileId::new(1, 1, 0, 1);
        for (index, child) in parent.children().iter().enumerate() {
            assert_eq!(child.relative_morton_index(&parent), index as u64);
        }
    }

    #[test]
    fn test_quadtree_subtree_root() {
        // Subtrees of 3 levels: levels 0-2 belong to the root subtree at
        // level 0, levels 3-5 to subtrees rooted at level 3.
        let id = QuadtreeTileId::new(4, 10, 7);
        let root = id.subtree_root(3);
        assert_eq!(root.level, 3);
        assert_eq!(root.x, 10 >> 1);
        assert_eq!(root.y, 7 >> 1);

        // A subtree root maps to itself.
        assert_eq!(root.subtree_root(3), root);
    }

    #[test]
    fn test_octree_subtree_root() {
        let id = OctreeTileId::new(5, 20, 9, 31);
        let root = id.subtree_root(2);
        assert_eq!(root.level, 4);
        assert_eq!(root.x, 20 >> 1);
        assert_eq!(root.y, 9 >> 1);
        assert_eq!(root.z, 31 >> 1);
    }

    #[test]
    fn test_children_are_consistent_with_parent() {
        let parent = QuadtreeTileId::new(3, 5, 2);
        for child in parent.children() {
            assert_eq!(child.parent(), Some(parent));
        }

        let parent = OctreeTileId::new(2, 3, 1, 0);
        for child in parent.children() {
            assert_eq!(child.parent(), Some(parent));
        }
    }

    #[test]
    fn test_relative_to_deeper_root() {
        let root = QuadtreeTileId::new(2, 1, 1);
        let tile = QuadtreeTileId::new(4, 6, 5);
        let relative = tile.relative_to(&root);
        assert_eq!(relative, QuadtreeTileId::new(2, 2, 1));
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_morton_is_injective_within_level(
                x1 in 0u32..1024,
                y1 in 0u32..1024,
                x2 in 0u32..1024,
                y2 in 0u32..1024,
            ) {
                let a = QuadtreeTileId::new(10, x1, y1);
                let b = QuadtreeTileId::new(10, x2, y2);
                prop_assert_eq!(
                    a.morton_index() == b.morton_index(),
                    a == b,
                    "Morton collision: {:?} vs {:?}", a, b
                );
            }

            #[test]
            fn test_subtree_root_is_ancestor(
                level in 0u32..16,
                x in 0u32..65536,
                y in 0u32..65536,
                subtree_levels in 1u32..6,
            ) {
                let x = x & ((1 << level) - 1).max(0);
                let y = y & ((1 << level) - 1).max(0);
                let id = QuadtreeTileId::new(level, x, y);
                let root = id.subtree_root(subtree_levels);

                prop_assert!(root.level <= id.level);
                prop_assert_eq!(root.level % subtree_levels, 0);

                // Walking parents from the tile must pass through the root.
                let mut current = id;
                while current.level > root.level {
                    current = current.parent().unwrap();
                }
                prop_assert_eq!(current, root);
            }

            #[test]
            fn test_octree_child_morton_extends_parent(
                level in 0u32..8,
                x in 0u32..256,
                y in 0u32..256,
                z in 0u32..256,
            ) {
                let x = x & ((1 << level) - 1).max(0);
                let y = y & ((1 << level) - 1).max(0);
                let z = z & ((1 << level) - 1).max(0);
                let parent = OctreeTileId::new(level, x, y, z);
                for (index, child) in parent.children().iter().enumerate() {
                    prop_assert_eq!(
                        child.morton_index(),
                        parent.morton_index() * 8 + index as u64
                    );
                }
            }
        }
    }
}
