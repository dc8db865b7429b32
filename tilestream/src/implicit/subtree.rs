//! Subtree file parsing.
//!
//! A subtree file describes the availability of a fixed-depth slice of an
//! implicit tile tree. The binary layout is:
//!
//! - 24-byte header: magic `"subt"`, `version: u32`, `jsonByteLength: u64`,
//!   `binaryByteLength: u64` (all little-endian)
//! - JSON chunk of `jsonByteLength` bytes
//! - optional internal binary chunk of `binaryByteLength` bytes
//!
//! The JSON chunk declares buffers (internal or external by URI), buffer
//! views into them, and the three availability answers. External buffers are
//! fetched by the caller between [`ParsedSubtree::parse`] and
//! [`ParsedSubtree::build`]; this module never performs I/O itself.

use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use super::availability::{AvailabilityView, SubdivisionScheme};

/// Expected magic at the start of a subtree file.
const SUBTREE_MAGIC: &[u8; 4] = b"subt";

/// Subtree binary versions this parser understands.
const SUPPORTED_VERSION: u32 = 1;

/// Errors from parsing or assembling a subtree file.
#[derive(Debug, Error)]
pub enum SubtreeError {
    #[error("Subtree buffer too short: {0} bytes (need at least 24)")]
    TooShort(usize),

    #[error("Bad subtree magic: expected \"subt\"")]
    BadMagic,

    #[error("Unsupported subtree version {0}")]
    UnsupportedVersion(u32),

    #[error("Declared chunk lengths exceed the buffer: json={json}, binary={binary}, total={total}")]
    LengthMismatch { json: u64, binary: u64, total: usize },

    #[error("Subtree JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Buffer view {0} is out of range")]
    BadBufferView(usize),

    #[error("Buffer {0} has no data: internal chunk missing or external buffer not supplied")]
    MissingBuffer(usize),

    #[error("Availability declares neither a constant nor a bitstream")]
    EmptyAvailability,
}

// =============================================================================
// JSON Schema
// =============================================================================

/// A buffer declaration: external when `uri` is present, else the internal
/// binary chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeBuffer {
    pub uri: Option<String>,
    pub byte_length: u64,
}

/// A slice of a buffer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeBufferView {
    pub buffer: usize,
    #[serde(default)]
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// One availability declaration in JSON form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityJson {
    pub constant: Option<u8>,
    /// 3D Tiles 1.1 name; older drafts used `bufferView`.
    #[serde(alias = "bufferView")]
    pub bitstream: Option<usize>,
}

/// The subtree JSON chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeJson {
    #[serde(default)]
    pub buffers: Vec<SubtreeBuffer>,
    #[serde(default)]
    pub buffer_views: Vec<SubtreeBufferView>,
    pub tile_availability: AvailabilityJson,
    #[serde(default)]
    pub content_availability: Vec<AvailabilityJson>,
    pub child_subtree_availability: AvailabilityJson,
}

// =============================================================================
// Two-Phase Parse
// =============================================================================

/// A subtree whose JSON has been parsed but whose external buffers may not
/// have been fetched yet.
#[derive(Debug, Clone)]
pub struct ParsedSubtree {
    json: SubtreeJson,
    internal: Option<Bytes>,
}

impl ParsedSubtree {
    /// Parses the header and JSON chunk of a subtree file.
    pub fn parse(data: &Bytes) -> Result<Self, SubtreeError> {
        if data.len() < 24 {
            return Err(SubtreeError::TooShort(data.len()));
        }
        if &data[0..4] != SUBTREE_MAGIC {
            return Err(SubtreeError::BadMagic);
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != SUPPORTED_VERSION {
            return Err(SubtreeError::UnsupportedVersion(version));
        }
        let json_length = u64::from_le_bytes(data[8..16].try_into().unwrap_or_default());
        let binary_length = u64::from_le_bytes(data[16..24].try_into().unwrap_or_default());

        let total_needed = 24u64
            .checked_add(json_length)
            .and_then(|n| n.checked_add(binary_length));
        match total_needed {
            Some(needed) if needed <= data.len() as u64 => {}
            _ => {
                return Err(SubtreeError::LengthMismatch {
                    json: json_length,
                    binary: binary_length,
                    total: data.len(),
                })
            }
        }

        let json_end = 24 + json_length as usize;
        let json: SubtreeJson = serde_json::from_slice(&data[24..json_end])?;
        let internal = if binary_length > 0 {
            Some(data.slice(json_end..json_end + binary_length as usize))
        } else {
            None
        };

        Ok(Self { json, internal })
    }

    /// URIs of external buffers that must be fetched before [`Self::build`].
    pub fn external_buffer_uris(&self) -> Vec<String> {
        self.json
            .buffers
            .iter()
            .filter_map(|buffer| buffer.uri.clone())
            .collect()
    }

    /// Assembles the availability views, resolving buffer views against the
    /// internal chunk and any fetched external buffers (keyed by URI).
    pub fn build(
        self,
        scheme: SubdivisionScheme,
        levels: u32,
        external: &HashMap<String, Bytes>,
    ) -> Result<Subtree, SubtreeError> {
        let mut buffer_data: Vec<Option<Bytes>> = Vec::with_capacity(self.json.buffers.len());
        for buffer in &self.json.buffers {
            match &buffer.uri {
                Some(uri) => buffer_data.push(external.get(uri).cloned()),
                None => buffer_data.push(self.internal.clone()),
            }
        }

        let resolve_view = |index: usize| -> Result<Bytes, SubtreeError> {
            let view = self
                .json
                .buffer_views
                .get(index)
                .ok_or(SubtreeError::BadBufferView(index))?;
            let data = buffer_data
                .get(view.buffer)
                .and_then(|d| d.as_ref())
                .ok_or(SubtreeError::MissingBuffer(view.buffer))?;
            let start = view.byte_offset as usize;
            let end = start
                .checked_add(view.byte_length as usize)
                .ok_or(SubtreeError::BadBufferView(index))?;
            if end > data.len() {
                return Err(SubtreeError::BadBufferView(index));
            }
            Ok(data.slice(start..end))
        };

        let resolve = |json: &AvailabilityJson| -> Result<AvailabilityView, SubtreeError> {
            if let Some(constant) = json.constant {
                Ok(AvailabilityView::Constant(constant != 0))
            } else if let Some(view) = json.bitstream {
                Ok(AvailabilityView::Bitstream(resolve_view(view)?))
            } else {
                Err(SubtreeError::EmptyAvailability)
            }
        };

        let tile_availability = resolve(&self.json.tile_availability)?;
        let child_subtree_availability = resolve(&self.json.child_subtree_availability)?;
        let content_availability = self
            .json
            .content_availability
            .iter()
            .map(resolve)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Subtree {
            scheme,
            levels,
            tile_availability,
            content_availability,
            child_subtree_availability,
        })
    }
}

// =============================================================================
// Assembled Subtree
// =============================================================================

/// A fully-resolved subtree: availability answers for one fixed-depth slice
/// of the implicit tree.
#[derive(Debug, Clone)]
pub struct Subtree {
    scheme: SubdivisionScheme,
    levels: u32,
    tile_availability: AvailabilityView,
    content_availability: Vec<AvailabilityView>,
    child_subtree_availability: AvailabilityView,
}

impl Subtree {
    /// Number of levels this subtree covers.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Whether the tile at the given relative coordinate exists.
    pub fn tile_available(&self, relative_level: u32, relative_morton: u64) -> bool {
        if relative_level >= self.levels {
            return false;
        }
        self.tile_availability
            .is_available(self.scheme, relative_level, relative_morton)
    }

    /// Whether the tile at the given relative coordinate has content.
    ///
    /// When multiple content layers exist, any layer counts.
    pub fn content_available(&self, relative_level: u32, relative_morton: u64) -> bool {
        if relative_level >= self.levels {
            return false;
        }
        self.content_availability
            .iter()
            .any(|view| view.is_available(self.scheme, relative_level, relative_morton))
    }

    /// Whether a child subtree file exists for the node directly below this
    /// subtree's deepest level.
    ///
    /// `relative_morton` is relative to this subtree's root at level
    /// `self.levels()`.
    pub fn child_subtree_available(&self, relative_morton: u64) -> bool {
        // The child-subtree availability buffer covers exactly one level.
        match &self.child_subtree_availability {
            AvailabilityView::Constant(value) => {
                let nodes = 1u64 << (self.scheme.power_of_2() * self.levels);
                *value && relative_morton < nodes
            }
            AvailabilityView::Bitstream(buffer) => {
                let byte_index = (relative_morton / 8) as usize;
                if byte_index >= buffer.len() {
                    return false;
                }
                (buffer[byte_index] >> (relative_morton % 8)) & 1 == 1
            }
        }
    }
}
