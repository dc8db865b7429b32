//! Availability views over subtree bitstreams.
//!
//! A subtree file answers three questions per node: does the tile exist, does
//! it have content, and does a child subtree file exist below it. Each answer
//! is either a constant (`true`/`false` for every node) or one bit per
//! Morton-indexed node in a packed buffer.
//!
//! The bit index of a node at relative level `L` with relative Morton index
//! `M` is `(childCount^L - 1) / (childCount - 1) + M`: the number of nodes at
//! all shallower levels of the subtree, plus the node's position within its
//! own level. Bits are packed least-significant-first within each byte.

use bytes::Bytes;

/// How many children each node has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdivisionScheme {
    Quadtree,
    Octree,
}

impl SubdivisionScheme {
    /// Children per node: 4 or 8.
    pub fn child_count(&self) -> u64 {
        match self {
            SubdivisionScheme::Quadtree => 4,
            SubdivisionScheme::Octree => 8,
        }
    }

    /// log2 of the child count: 2 or 3.
    pub fn power_of_2(&self) -> u32 {
        match self {
            SubdivisionScheme::Quadtree => 2,
            SubdivisionScheme::Octree => 3,
        }
    }
}

/// One availability answer: a constant, or a packed bitstream.
#[derive(Debug, Clone, PartialEq)]
pub enum AvailabilityView {
    /// Uniformly available or unavailable.
    Constant(bool),
    /// One bit per node, Morton-and-level indexed.
    Bitstream(Bytes),
}

impl AvailabilityView {
    /// Returns the availability bit for a node identified by its level and
    /// Morton index relative to the subtree root.
    ///
    /// Out-of-range queries (a Morton index beyond the level's node count, or
    /// a bit beyond the buffer) answer `false` rather than panicking.
    pub fn is_available(
        &self,
        scheme: SubdivisionScheme,
        relative_level: u32,
        relative_morton: u64,
    ) -> bool {
        let nodes_in_level = 1u64 << (scheme.power_of_2() * relative_level);
        if relative_morton >= nodes_in_level {
            return false;
        }

        match self {
            AvailabilityView::Constant(value) => *value,
            AvailabilityView::Bitstream(buffer) => {
                let nodes_before_level = (nodes_in_level - 1) / (scheme.child_count() - 1);
                let bit_index = nodes_before_level + relative_morton;
                let byte_index = (bit_index / 8) as usize;
                if byte_index >= buffer.len() {
                    return false;
                }
                (buffer[byte_index] >> (bit_index % 8)) & 1 == 1
            }
        }
    }

    /// Counts set bits, used for content-availability sanity warnings.
    pub fn count_available(&self, scheme: SubdivisionScheme, levels: u32) -> u64 {
        match self {
            AvailabilityView::Constant(false) => 0,
            AvailabilityView::Constant(true) => {
                let nodes_in_next = 1u64 << (scheme.power_of_2() * levels);
                (nodes_in_next - 1) / (scheme.child_count() - 1)
            }
            AvailabilityView::Bitstream(buffer) => {
                buffer.iter().map(|byte| byte.count_ones() as u64).sum()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_availability() {
        let all = AvailabilityView::Constant(true);
        let none = AvailabilityView::Constant(false);
        assert!(all.is_available(SubdivisionScheme::Quadtree, 0, 0));
        assert!(all.is_available(SubdivisionScheme::Quadtree, 2, 15));
        assert!(!none.is_available(SubdivisionScheme::Quadtree, 0, 0));
    }

    #[test]
    fn test_constant_rejects_out_of_level_morton() {
        let all = AvailabilityView::Constant(true);
        // Level 1 of a quadtree has 4 nodes; Morton 4 is out of range.
        assert!(!all.is_available(SubdivisionScheme::Quadtree, 1, 4));
    }

    #[test]
    fn test_bitstream_level_offsets_quadtree() {
        // Root available (bit 0), level-1 children 0 and 3 available
        // (bits 1 and 4): 0b0001_0011.
        let view = AvailabilityView::Bitstream(Bytes::from_static(&[0b0001_0011]));
        let scheme = SubdivisionScheme::Quadtree;

        assert!(view.is_available(scheme, 0, 0));
        assert!(view.is_available(scheme, 1, 0));
        assert!(!view.is_available(scheme, 1, 1));
        assert!(!view.is_available(scheme, 1, 2));
        assert!(view.is_available(scheme, 1, 3));
    }

    #[test]
    fn test_bitstream_level_offsets_octree() {
        // Octree: level 0 occupies bit 0, level 1 occupies bits 1-8.
        // Child with Morton 7 -> bit 8 -> second byte, bit 0.
        let view = AvailabilityView::Bitstream(Bytes::from_static(&[0b0000_0001, 0b0000_0001]));
        let scheme = SubdivisionScheme::Octree;

        assert!(view.is_available(scheme, 0, 0));
        assert!(!view.is_available(scheme, 1, 0));
        assert!(view.is_available(scheme, 1, 7));
    }

    #[test]
    fn test_bitstream_out_of_buffer_is_unavailable() {
        let view = AvailabilityView::Bitstream(Bytes::from_static(&[0xFF]));
        // Level 2 of a quadtree needs bits 5..21; byte 0 only has 8 bits.
        assert!(view.is_available(SubdivisionScheme::Quadtree, 2, 0));
        assert!(!view.is_available(SubdivisionScheme::Quadtree, 2, 10));
    }

    #[test]
    fn test_count_available() {
        let view = AvailabilityView::Bitstream(Bytes::from_static(&[0b0001_0011]));
        assert_eq!(view.count_available(SubdivisionScheme::Quadtree, 2), 3);

        let all = AvailabilityView::Constant(true);
        // Quadtree with 2 levels: 1 + 4 = 5 nodes.
        assert_eq!(all.count_available(SubdivisionScheme::Quadtree, 2), 5);
    }
}
