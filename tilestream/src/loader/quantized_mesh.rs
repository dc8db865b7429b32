//! Decoder for quantized-mesh terrain tiles.
//!
//! The format stores a regular-ish triangle mesh with vertex positions
//! quantized to a 0..32767 grid over the tile rectangle and the tile's
//! height span. Vertex components are zig-zag delta encoded, and triangle
//! indices use high-water-mark encoding. The decoder normalizes positions
//! to [0, 1] in u/v/height; the caller maps them onto the globe.

const HEADER_SIZE: usize = 88;
const QUANTIZED_MAX: f64 = 32767.0;

/// A decoded quantized-mesh tile, positions normalized to the unit cube.
#[derive(Debug, Clone, Default)]
pub struct QuantizedMesh {
    /// Per-vertex (u, v, height) fractions in [0, 1].
    pub positions: Vec<[f64; 3]>,
    pub indices: Vec<u32>,
    pub minimum_height: f32,
    pub maximum_height: f32,
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], String> {
        let end = self
            .offset
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                format!(
                    "Quantized-mesh tile truncated at byte {} (need {} more)",
                    self.offset, count
                )
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, String> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, String> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn align_to(&mut self, alignment: usize) -> Result<(), String> {
        let misaligned = self.offset % alignment;
        if misaligned != 0 {
            self.take(alignment - misaligned)?;
        }
        Ok(())
    }
}

fn zigzag_decode(value: u16) -> i32 {
    let value = i32::from(value);
    (value >> 1) ^ -(value & 1)
}

/// Reads one zig-zag delta-encoded vertex component array.
fn read_component_array(reader: &mut Reader<'_>, count: usize) -> Result<Vec<f64>, String> {
    let mut out = Vec::with_capacity(count);
    let mut value: i32 = 0;
    for _ in 0..count {
        value = value.wrapping_add(zigzag_decode(reader.read_u16()?));
        out.push(f64::from(value) / QUANTIZED_MAX);
    }
    Ok(out)
}

/// Decodes a quantized-mesh tile into normalized positions and indices.
///
/// Edge-index and extension sections after the triangle list are ignored;
/// they only matter for skirt stitching, which the renderer does not do.
///
/// # Arguments
/// * `data` - The raw tile body, starting at the 88-byte header.
pub fn decode_quantized_mesh(data: &[u8]) -> Result<QuantizedMesh, String> {
    if data.len() < HEADER_SIZE {
        return Err(format!(
            "Quantized-mesh tile too short: {} bytes, header needs {}",
            data.len(),
            HEADER_SIZE
        ));
    }
    let mut reader = Reader::new(data);

    // Tile center (unused), height span, bounding sphere and horizon
    // occlusion point (both unused).
    reader.take(24)?;
    let minimum_height = reader.read_f32()?;
    let maximum_height = reader.read_f32()?;
    reader.take(56)?;

    let vertex_count = reader.read_u32()? as usize;
    // A tile is a bounded grid; reject counts the buffer cannot hold.
    if vertex_count > data.len() / 2 {
        return Err(format!(
            "Quantized-mesh vertex count {} exceeds tile size",
            vertex_count
        ));
    }

    let u = read_component_array(&mut reader, vertex_count)?;
    let v = read_component_array(&mut reader, vertex_count)?;
    let height = read_component_array(&mut reader, vertex_count)?;
    let positions = (0..vertex_count)
        .map(|i| [u[i], v[i], height[i]])
        .collect();

    // Indices are 32-bit once the vertex pool outgrows u16, with padding
    // so the u32 reads stay aligned.
    let wide_indices = vertex_count > 65536;
    if wide_indices {
        reader.align_to(4)?;
    }
    let triangle_count = reader.read_u32()? as usize;
    let index_count = triangle_count
        .checked_mul(3)
        .ok_or_else(|| "Quantized-mesh triangle count overflow".to_string())?;
    let index_bytes = index_count * if wide_indices { 4 } else { 2 };
    if reader.offset + index_bytes > data.len() {
        return Err(format!(
            "Quantized-mesh index list truncated: {} triangles declared",
            triangle_count
        ));
    }

    // High-water-mark decoding: each index is stored as the distance below
    // the highest index seen so far; an encoded zero raises the mark.
    let mut indices = Vec::with_capacity(index_count);
    let mut highest: u32 = 0;
    for _ in 0..index_count {
        let encoded = if wide_indices {
            reader.read_u32()?
        } else {
            u32::from(reader.read_u16()?)
        };
        let decoded = highest
            .checked_sub(encoded)
            .ok_or_else(|| "Quantized-mesh index under high-water mark".to_string())?;
        if encoded == 0 {
            highest += 1;
        }
        if decoded as usize >= vertex_count {
            return Err(format!(
                "Quantized-mesh index {} out of range ({} vertices)",
                decoded, vertex_count
            ));
        }
        indices.push(decoded);
    }

    Ok(QuantizedMesh {
        positions,
        indices,
        minimum_height,
        maximum_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag_encode(value: i32) -> u16 {
        ((value << 1) ^ (value >> 31)) as u16
    }

    /// Builds a tile with the given quantized vertices and raw triangle
    /// indices, applying delta/zig-zag and high-water-mark encoding.
    fn build_tile(vertices: &[(u16, u16, u16)], triangles: &[[u32; 3]]) -> Vec<u8> {
        let mut out = vec![0u8; 24];
        out.extend_from_slice(&(-10.0f32).to_le_bytes());
        out.extend_from_slice(&90.0f32.to_le_bytes());
        out.extend_from_slice(&[0u8; 56]);
        out.extend_from_slice(&(vertices.len() as u32).to_le_bytes());

        for component in 0..3 {
            let mut previous: i32 = 0;
            for vertex in vertices {
                let value = i32::from(match component {
                    0 => vertex.0,
                    1 => vertex.1,
                    _ => vertex.2,
                });
                out.extend_from_slice(&zigzag_encode(value - previous).to_le_bytes());
                previous = value;
            }
        }

        out.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        let mut highest: u32 = 0;
        for triangle in triangles {
            for &index in triangle {
                let encoded = highest - index;
                out.extend_from_slice(&(encoded as u16).to_le_bytes());
                if encoded == 0 {
                    highest += 1;
                }
            }
        }
        out
    }

    #[test]
    fn test_decode_simple_quad() {
        let vertices = [
            (0u16, 0u16, 0u16),
            (32767, 0, 16384),
            (0, 32767, 32767),
            (32767, 32767, 0),
        ];
        let tile = build_tile(&vertices, &[[0, 1, 2], [1, 3, 2]]);

        let mesh = decode_quantized_mesh(&tile).unwrap();
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 1, 3, 2]);
        assert_eq!(mesh.minimum_height, -10.0);
        assert_eq!(mesh.maximum_height, 90.0);

        assert!((mesh.positions[0][0]).abs() < 1e-12);
        assert!((mesh.positions[1][0] - 1.0).abs() < 1e-12);
        assert!((mesh.positions[1][2] - 16384.0 / 32767.0).abs() < 1e-12);
        assert!((mesh.positions[2][1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_rejects_short_header() {
        assert!(decode_quantized_mesh(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_vertex_data() {
        let tile = build_tile(&[(0, 0, 0), (100, 100, 100)], &[[0, 1, 0]]);
        assert!(decode_quantized_mesh(&tile[..tile.len() - 10]).is_err());
    }

    #[test]
    fn test_decode_rejects_corrupt_triangle_count() {
        let mut tile = build_tile(&[(0, 0, 0), (100, 100, 100)], &[[0, 1, 0]]);
        // Corrupt the declared triangle count so indices run past the list.
        let count_offset = tile.len() - 6 - 4;
        tile[count_offset..count_offset + 4].copy_from_slice(&100u32.to_le_bytes());
        assert!(decode_quantized_mesh(&tile).is_err());
    }
}
