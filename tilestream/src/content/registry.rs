//! Content converter registry: magic-bytes and extension dispatch.
//!
//! Tile payloads arrive as opaque byte buffers. The registry maps the first
//! four bytes (the format magic) or, failing that, the URL's file extension
//! to a converter function that turns the buffer into a [`TileModel`].
//!
//! Lookup order is magic first, then extension, then a "no converter
//! registered" error. Converters receive the registry itself so wrapper
//! formats (`.cmpt`, `.b3dm`) can recursively convert their inner payloads.
//!
//! Conversion is pure CPU work; loaders run it on worker tasks, never on the
//! thread that owns the tile tree.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::content::composite::convert_composite;
use crate::content::TileModel;
use crate::error::ErrorList;

/// Outcome of converting one payload.
#[derive(Debug, Clone, Default)]
pub struct ConverterResult {
    /// The decoded model, absent when conversion failed.
    pub model: Option<TileModel>,
    /// Errors and warnings accumulated during conversion.
    pub errors: ErrorList,
}

impl ConverterResult {
    /// A successful result with no diagnostics.
    pub fn model(model: TileModel) -> Self {
        Self {
            model: Some(model),
            errors: ErrorList::new(),
        }
    }

    /// A failed result with one error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            model: None,
            errors: ErrorList::error(message),
        }
    }
}

/// A conversion function: payload plus source URL to a result.
pub type Converter =
    Arc<dyn Fn(&ContentConverterRegistry, Bytes, &str) -> ConverterResult + Send + Sync>;

/// Dispatch table from payload magic / file extension to converters.
pub struct ContentConverterRegistry {
    by_magic: DashMap<[u8; 4], Converter>,
    by_extension: DashMap<String, Converter>,
}

impl ContentConverterRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            by_magic: DashMap::new(),
            by_extension: DashMap::new(),
        }
    }

    /// Creates a registry with the built-in 3D Tiles converters registered:
    /// `glb`, `b3dm`, `i3dm`, `pnts`, and `cmpt`.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register_magic(*b"glTF", Arc::new(|_, data, url| convert_glb(data, url)));
        registry.register_magic(*b"b3dm", Arc::new(|reg, data, url| convert_b3dm(reg, data, url)));
        registry.register_magic(*b"i3dm", Arc::new(|reg, data, url| convert_i3dm(reg, data, url)));
        registry.register_magic(*b"pnts", Arc::new(|_, data, _| convert_pnts(data)));
        registry.register_magic(*b"cmpt", Arc::new(|reg, data, url| convert_composite(reg, data, url)));
        registry.register_extension("glb", Arc::new(|_, data, url| convert_glb(data, url)));
        registry
    }

    /// Registers a converter for a 4-byte magic.
    pub fn register_magic(&self, magic: [u8; 4], converter: Converter) {
        self.by_magic.insert(magic, converter);
    }

    /// Registers a converter for a file extension (without the dot,
    /// case-insensitive).
    pub fn register_extension(&self, extension: &str, converter: Converter) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), converter);
    }

    /// Converts a payload, dispatching by magic bytes first, then by the
    /// URL's file extension.
    pub fn convert(&self, data: Bytes, url: &str) -> ConverterResult {
        if data.len() >= 4 {
            let magic = [data[0], data[1], data[2], data[3]];
            if let Some(converter) = self.by_magic.get(&magic) {
                let converter = Arc::clone(&converter);
                return converter(self, data, url);
            }
        }

        if let Some(extension) = url_extension(url) {
            if let Some(converter) = self.by_extension.get(&extension) {
                let converter = Arc::clone(&converter);
                return converter(self, data, url);
            }
        }

        ConverterResult::error(format!("No content converter registered for {}", url))
    }
}

/// Extracts the lowercase file extension from a URL, ignoring query strings.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, extension) = name.rsplit_once('.')?;
    if extension.is_empty() {
        None
    } else {
        Some(extension.to_ascii_lowercase())
    }
}

/// Reads a little-endian u32 at `offset`, if in range.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// =============================================================================
// Built-in Converters
// =============================================================================

/// Validates a binary glTF header and wraps the payload.
fn convert_glb(data: Bytes, url: &str) -> ConverterResult {
    if data.len() < 12 {
        return ConverterResult::error(format!("glb too short ({} bytes) in {}", data.len(), url));
    }
    if &data[0..4] != b"glTF" {
        return ConverterResult::error(format!("glb has wrong magic in {}", url));
    }
    let version = read_u32(&data, 4).unwrap_or(0);
    if version != 2 {
        return ConverterResult::error(format!("Unsupported glb version {} in {}", version, url));
    }
    let declared_length = read_u32(&data, 8).unwrap_or(0) as usize;
    let mut result = ConverterResult::model(TileModel {
        byte_size: data.len(),
        gltf: Some(data.clone()),
        ..TileModel::default()
    });
    if declared_length != data.len() {
        result.errors.push_warning(format!(
            "glb declares {} bytes but buffer has {} in {}",
            declared_length,
            data.len(),
            url
        ));
    }
    result
}

/// Unwraps a Batched 3D Model: a 28-byte header, feature/batch tables, then
/// an embedded glb converted recursively.
fn convert_b3dm(registry: &ContentConverterRegistry, data: Bytes, url: &str) -> ConverterResult {
    const HEADER_LENGTH: usize = 28;
    if data.len() < HEADER_LENGTH {
        return ConverterResult::error(format!("b3dm too short ({} bytes) in {}", data.len(), url));
    }
    let byte_length = read_u32(&data, 8).unwrap_or(0) as usize;
    if byte_length > data.len() {
        return ConverterResult::error(format!(
            "b3dm declares {} bytes but buffer has {} in {}",
            byte_length,
            data.len(),
            url
        ));
    }
    let feature_json = read_u32(&data, 12).unwrap_or(0) as usize;
    let feature_binary = read_u32(&data, 16).unwrap_or(0) as usize;
    let batch_json = read_u32(&data, 20).unwrap_or(0) as usize;
    let batch_binary = read_u32(&data, 24).unwrap_or(0) as usize;

    let gltf_start = HEADER_LENGTH + feature_json + feature_binary + batch_json + batch_binary;
    if gltf_start >= byte_length {
        return ConverterResult::error(format!("b3dm has no glTF payload in {}", url));
    }
    registry.convert(data.slice(gltf_start..byte_length), url)
}

/// Unwraps an Instanced 3D Model with an embedded glb (`gltfFormat == 1`).
fn convert_i3dm(registry: &ContentConverterRegistry, data: Bytes, url: &str) -> ConverterResult {
    const HEADER_LENGTH: usize = 32;
    if data.len() < HEADER_LENGTH {
        return ConverterResult::error(format!("i3dm too short ({} bytes) in {}", data.len(), url));
    }
    let byte_length = (read_u32(&data, 8).unwrap_or(0) as usize).min(data.len());
    let feature_json = read_u32(&data, 12).unwrap_or(0) as usize;
    let feature_binary = read_u32(&data, 16).unwrap_or(0) as usize;
    let batch_json = read_u32(&data, 20).unwrap_or(0) as usize;
    let batch_binary = read_u32(&data, 24).unwrap_or(0) as usize;
    let gltf_format = read_u32(&data, 28).unwrap_or(0);
    if gltf_format != 1 {
        return ConverterResult::error(format!(
            "i3dm with external glTF uri (gltfFormat {}) is not supported in {}",
            gltf_format, url
        ));
    }

    let gltf_start = HEADER_LENGTH + feature_json + feature_binary + batch_json + batch_binary;
    if gltf_start >= byte_length {
        return ConverterResult::error(format!("i3dm has no glTF payload in {}", url));
    }
    registry.convert(data.slice(gltf_start..byte_length), url)
}

/// Validates a point-cloud header; point decoding is the renderer's concern.
fn convert_pnts(data: Bytes) -> ConverterResult {
    const HEADER_LENGTH: usize = 28;
    if data.len() < HEADER_LENGTH {
        return ConverterResult::error(format!("pnts too short ({} bytes)", data.len()));
    }
    ConverterResult::model(TileModel::with_size(data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid glb header: magic, version 2, declared length.
    fn glb_bytes(total: usize) -> Bytes {
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.resize(total, 0);
        Bytes::from(out)
    }

    fn b3dm_bytes(inner: &[u8]) -> Bytes {
        let total = 28 + inner.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"b3dm");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 16]); // empty feature/batch tables
        out.extend_from_slice(inner);
        Bytes::from(out)
    }

    #[test]
    fn test_magic_dispatch_glb() {
        let registry = ContentConverterRegistry::with_defaults();
        let result = registry.convert(glb_bytes(64), "http://x/tile.bin");
        let model = result.model.unwrap();
        assert_eq!(model.byte_size, 64);
        assert!(model.gltf.is_some());
    }

    #[test]
    fn test_extension_dispatch_when_magic_unknown() {
        let registry = ContentConverterRegistry::with_defaults();
        registry.register_extension(
            "terrain",
            Arc::new(|_, data, _| ConverterResult::model(TileModel::with_size(data.len()))),
        );
        let result = registry.convert(Bytes::from_static(&[9, 9, 9, 9, 9]), "http://x/t.terrain?v=1");
        assert_eq!(result.model.unwrap().byte_size, 5);
    }

    #[test]
    fn test_unknown_content_is_error() {
        let registry = ContentConverterRegistry::with_defaults();
        let result = registry.convert(Bytes::from_static(&[1, 2, 3, 4, 5]), "http://x/mystery.xyz");
        assert!(result.model.is_none());
        assert!(result.errors.has_errors());
    }

    #[test]
    fn test_b3dm_unwraps_to_glb() {
        let registry = ContentConverterRegistry::with_defaults();
        let inner = glb_bytes(32);
        let result = registry.convert(b3dm_bytes(&inner), "http://x/tile.b3dm");
        let model = result.model.unwrap();
        assert_eq!(model.gltf, Some(inner));
    }

    #[test]
    fn test_b3dm_overlong_declared_length() {
        let registry = ContentConverterRegistry::with_defaults();
        let mut bytes = b3dm_bytes(&glb_bytes(32)).to_vec();
        bytes[8..12].copy_from_slice(&(10_000u32).to_le_bytes());
        let result = registry.convert(Bytes::from(bytes), "http://x/tile.b3dm");
        assert!(result.model.is_none());
        assert!(result.errors.has_errors());
    }

    #[test]
    fn test_glb_bad_version() {
        let registry = ContentConverterRegistry::with_defaults();
        let mut bytes = glb_bytes(32).to_vec();
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        let result = registry.convert(Bytes::from(bytes), "http://x/tile.glb");
        assert!(result.model.is_none());
    }

    #[test]
    fn test_glb_length_mismatch_is_warning_only() {
        let registry = ContentConverterRegistry::with_defaults();
        let mut bytes = glb_bytes(32).to_vec();
        bytes[8..12].copy_from_slice(&(64u32).to_le_bytes());
        let result = registry.convert(Bytes::from(bytes), "http://x/tile.glb");
        assert!(result.model.is_some());
        assert!(!result.errors.warnings.is_empty());
    }

    #[test]
    fn test_url_extension_parsing() {
        assert_eq!(url_extension("http://x/a/b.glb"), Some("glb".to_string()));
        assert_eq!(url_extension("http://x/a/b.GLB?sig=1"), Some("glb".to_string()));
        assert_eq!(url_extension("http://x/a/noext"), None);
    }
}
