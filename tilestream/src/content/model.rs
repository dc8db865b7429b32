//! Decoded tile content.
//!
//! A [`TileModel`] is what a content converter produces from a byte payload:
//! an optional triangle soup in world (ECEF) coordinates for spatial queries,
//! the raw glTF payload for the renderer to upload, and attribution strings.
//! The engine itself never interprets glTF; renderer integration receives the
//! payload through the prepare-renderer-resources hook.

use bytes::Bytes;
use glam::DVec3;

/// Decoded content of one tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileModel {
    /// Triangle vertices in ECEF meters, used by height queries. Converters
    /// that do not produce geometry leave this empty.
    pub positions: Vec<DVec3>,
    /// Triangle indices into `positions`, three per triangle.
    pub indices: Vec<u32>,
    /// The glTF payload for renderer upload, when the source format carries
    /// one.
    pub gltf: Option<Bytes>,
    /// Estimated memory footprint in bytes, used by the tile cache budget.
    pub byte_size: usize,
    /// Attribution strings that must be shown while this content renders.
    pub credits: Vec<String>,
}

impl TileModel {
    /// Creates an empty model accounting for `byte_size` bytes.
    pub fn with_size(byte_size: usize) -> Self {
        Self {
            byte_size,
            ..Self::default()
        }
    }

    /// Merges another model into this one, used when a composite tile
    /// carries several inner payloads.
    pub fn merge(&mut self, other: TileModel) {
        let base = self.positions.len() as u32;
        self.positions.extend(other.positions);
        self.indices
            .extend(other.indices.into_iter().map(|index| index + base));
        if self.gltf.is_none() {
            self.gltf = other.gltf;
        }
        self.byte_size += other.byte_size;
        self.credits.extend(other.credits);
    }

    /// Number of triangles in the spatial-query mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_offsets_indices() {
        let mut left = TileModel {
            positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            indices: vec![0, 1, 2],
            byte_size: 100,
            ..TileModel::default()
        };
        let right = TileModel {
            positions: vec![DVec3::Z, DVec3::ONE, DVec3::NEG_ONE],
            indices: vec![0, 1, 2],
            byte_size: 50,
            ..TileModel::default()
        };
        left.merge(right);

        assert_eq!(left.positions.len(), 6);
        assert_eq!(left.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(left.byte_size, 150);
        assert_eq!(left.triangle_count(), 2);
    }

    #[test]
    fn test_merge_keeps_first_gltf() {
        let mut left = TileModel {
            gltf: Some(Bytes::from_static(b"first")),
            ..TileModel::default()
        };
        let right = TileModel {
            gltf: Some(Bytes::from_static(b"second")),
            ..TileModel::default()
        };
        left.merge(right);
        assert_eq!(left.gltf, Some(Bytes::from_static(b"first")));
    }
}
