//! Composite (`.cmpt`) tile parsing.
//!
//! A composite tile wraps several inner tiles in one payload:
//!
//! - 16-byte outer header: magic `"cmpt"`, `version: u32`,
//!   `byteLength: u32`, `tilesLength: u32`
//! - `tilesLength` inner tiles, each starting with a 12-byte header:
//!   4-byte magic, `version: u32`, `byteLength: u32`
//!
//! Every declared length is validated against the enclosing buffer before
//! use; malformed input yields a result with no model and a non-empty
//! diagnostics list, never a panic or an out-of-bounds read. A composite
//! with a single inner tile short-circuits to that tile's result; multiple
//! inner tiles have their models merged.

use bytes::Bytes;

use crate::content::registry::{read_u32, ContentConverterRegistry, ConverterResult};
use crate::content::TileModel;
use crate::error::ErrorList;

/// Composite versions this parser understands.
const SUPPORTED_VERSION: u32 = 1;

/// Outer header length in bytes.
const OUTER_HEADER_LENGTH: usize = 16;

/// Per-inner-tile header length in bytes.
const INNER_HEADER_LENGTH: usize = 12;

/// Converts a `.cmpt` payload by recursively converting each inner tile.
pub fn convert_composite(
    registry: &ContentConverterRegistry,
    data: Bytes,
    url: &str,
) -> ConverterResult {
    if data.len() < OUTER_HEADER_LENGTH {
        return ConverterResult {
            model: None,
            errors: ErrorList::warning(format!(
                "cmpt too short: {} bytes in {}",
                data.len(),
                url
            )),
        };
    }
    if &data[0..4] != b"cmpt" {
        return ConverterResult {
            model: None,
            errors: ErrorList::warning(format!("cmpt has wrong magic in {}", url)),
        };
    }
    let version = read_u32(&data, 4).unwrap_or(0);
    if version != SUPPORTED_VERSION {
        return ConverterResult {
            model: None,
            errors: ErrorList::warning(format!("Unsupported cmpt version {} in {}", version, url)),
        };
    }
    let byte_length = read_u32(&data, 8).unwrap_or(0) as usize;
    if byte_length > data.len() {
        return ConverterResult {
            model: None,
            errors: ErrorList::warning(format!(
                "cmpt declares {} bytes but buffer has {} in {}",
                byte_length,
                data.len(),
                url
            )),
        };
    }
    let tiles_length = read_u32(&data, 12).unwrap_or(0) as usize;

    let mut inner_results = Vec::with_capacity(tiles_length);
    let mut errors = ErrorList::new();
    let mut offset = OUTER_HEADER_LENGTH;
    for index in 0..tiles_length {
        if offset + INNER_HEADER_LENGTH > byte_length {
            errors.push_warning(format!(
                "cmpt inner tile {} header runs past the declared length in {}",
                index, url
            ));
            break;
        }
        let inner_length = read_u32(&data, offset + 8).unwrap_or(0) as usize;
        if inner_length < INNER_HEADER_LENGTH || offset + inner_length > byte_length {
            errors.push_warning(format!(
                "cmpt inner tile {} declares invalid length {} in {}",
                index, inner_length, url
            ));
            break;
        }
        inner_results.push(registry.convert(data.slice(offset..offset + inner_length), url));
        offset += inner_length;
    }

    // A single inner tile short-circuits to its own result.
    if inner_results.len() == 1 && errors.is_empty() {
        let mut result = inner_results.into_iter().next().unwrap_or_default();
        result.errors.merge(errors);
        return result;
    }

    let mut merged: Option<TileModel> = None;
    for inner in inner_results {
        errors.merge(inner.errors);
        if let Some(model) = inner.model {
            match merged.as_mut() {
                Some(target) => target.merge(model),
                None => merged = Some(model),
            }
        }
    }

    if merged.is_none() && errors.is_empty() {
        errors.push_warning(format!("cmpt with no decodable inner tiles in {}", url));
    }

    ConverterResult {
        model: merged,
        errors,
    }
}
