//! Serde schema for tileset.json documents.
//!
//! Mirrors the 3D Tiles wire format: `asset.version`, `geometricError`, a
//! recursive `root` tile with exactly one bounding-volume kind
//! (`box`[12] / `region`[6] / `sphere`[4], or the
//! `3DTILES_bounding_volume_S2` extension), `refine` ∈ {ADD, REPLACE}
//! inherited from the parent when absent, an optional column-major
//! `transform`[16], `content.uri`, and `children`. Implicit tiling appears
//! either as the 1.1 `implicitTiling` tile property or as the
//! `3DTILES_implicit_tiling` extension.

use std::collections::HashMap;

use glam::DMat4;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ErrorList;
use crate::geometry::{
    BoundingRegion, BoundingSphere, BoundingVolume, OrientedBoundingBox, S2CellBoundingVolume,
};
use crate::tile::TileRefine;

/// Top-level tileset.json document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetJson {
    pub asset: AssetJson,
    pub geometric_error: f64,
    pub root: TileJson,
    #[serde(default)]
    pub extensions_used: Vec<String>,
    #[serde(default)]
    pub extensions_required: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetJson {
    pub version: String,
}

/// One tile node of the explicit tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileJson {
    pub bounding_volume: BoundingVolumeJson,
    pub geometric_error: f64,
    pub refine: Option<String>,
    pub transform: Option<Vec<f64>>,
    pub content: Option<ContentJson>,
    #[serde(default)]
    pub children: Vec<TileJson>,
    implicit_tiling: Option<ImplicitTilingJson>,
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentJson {
    pub uri: Option<String>,
    /// Pre-1.0 documents used `url`.
    pub url: Option<String>,
}

impl ContentJson {
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitTilingJson {
    pub subdivision_scheme: String,
    pub subtree_levels: u32,
    pub available_levels: Option<u32>,
    /// Draft-extension name for `availableLevels`.
    pub maximum_level: Option<u32>,
    pub subtrees: SubtreesJson,
}

impl ImplicitTilingJson {
    /// Number of levels in the implicit tree, across naming revisions.
    pub fn levels(&self) -> u32 {
        self.available_levels
            .or(self.maximum_level.map(|level| level + 1))
            .unwrap_or(self.subtree_levels)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtreesJson {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2VolumeJson {
    token: String,
    minimum_height: f64,
    maximum_height: f64,
}

/// A tile's bounding volume before decoding.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BoundingVolumeJson {
    #[serde(rename = "box")]
    pub box_values: Option<Vec<f64>>,
    pub region: Option<Vec<f64>>,
    pub sphere: Option<Vec<f64>>,
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

impl BoundingVolumeJson {
    /// Decodes the volume, requiring exactly one of the supported kinds with
    /// the exact element count.
    pub fn decode(&self) -> Result<BoundingVolume, String> {
        if let Some(values) = &self.box_values {
            let array: [f64; 12] = values
                .as_slice()
                .try_into()
                .map_err(|_| format!("boundingVolume.box has {} elements, need 12", values.len()))?;
            return Ok(BoundingVolume::Box(OrientedBoundingBox::from_array(
                &array,
            )));
        }
        if let Some(values) = &self.region {
            let array: [f64; 6] = values.as_slice().try_into().map_err(|_| {
                format!("boundingVolume.region has {} elements, need 6", values.len())
            })?;
            return Ok(BoundingVolume::Region(BoundingRegion::from_array(&array)));
        }
        if let Some(values) = &self.sphere {
            let array: [f64; 4] = values.as_slice().try_into().map_err(|_| {
                format!("boundingVolume.sphere has {} elements, need 4", values.len())
            })?;
            return Ok(BoundingVolume::Sphere(BoundingSphere::from_array(&array)));
        }
        if let Some(value) = self.extensions.get("3DTILES_bounding_volume_S2") {
            let s2: S2VolumeJson = serde_json::from_value(value.clone())
                .map_err(|error| format!("Invalid S2 bounding volume: {}", error))?;
            return Ok(BoundingVolume::S2Cell(S2CellBoundingVolume::new(
                s2.token,
                s2.minimum_height,
                s2.maximum_height,
            )));
        }
        Err("boundingVolume has none of box/region/sphere/S2".to_string())
    }
}

impl TileJson {
    /// The implicit-tiling description, from the 1.1 property or the
    /// `3DTILES_implicit_tiling` extension.
    pub fn implicit_tiling(&self) -> Option<ImplicitTilingJson> {
        if let Some(implicit) = &self.implicit_tiling {
            return Some(implicit.clone());
        }
        self.extensions
            .get("3DTILES_implicit_tiling")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Parses `refine`; `None` means "inherit from parent".
    pub fn refine_mode(&self) -> Result<Option<TileRefine>, String> {
        match self.refine.as_deref() {
            None => Ok(None),
            Some(value) if value.eq_ignore_ascii_case("ADD") => Ok(Some(TileRefine::Add)),
            Some(value) if value.eq_ignore_ascii_case("REPLACE") => Ok(Some(TileRefine::Replace)),
            Some(other) => Err(format!("Unknown refine mode '{}'", other)),
        }
    }

    /// Decodes the column-major `transform` array; identity when absent.
    pub fn transform_matrix(&self) -> Result<DMat4, String> {
        match &self.transform {
            None => Ok(DMat4::IDENTITY),
            Some(values) => {
                let array: [f64; 16] = values
                    .as_slice()
                    .try_into()
                    .map_err(|_| format!("transform has {} elements, need 16", values.len()))?;
                Ok(DMat4::from_cols_array(&array))
            }
        }
    }
}

/// Parses a tileset.json byte buffer.
pub fn parse_tileset_json(data: &[u8]) -> Result<TilesetJson, ErrorList> {
    let document: TilesetJson = serde_json::from_slice(data)
        .map_err(|error| ErrorList::error(format!("Invalid tileset.json: {}", error)))?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "asset": { "version": "1.1" },
        "geometricError": 500.0,
        "root": {
            "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
            "geometricError": 500.0,
            "refine": "REPLACE",
            "content": { "uri": "root.glb" },
            "children": [
                {
                    "boundingVolume": { "sphere": [10.0, 0.0, 0.0, 50.0] },
                    "geometricError": 100.0,
                    "content": { "uri": "child.b3dm" }
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_minimal_document() {
        let document = parse_tileset_json(MINIMAL.as_bytes()).unwrap();
        assert_eq!(document.asset.version, "1.1");
        assert_eq!(document.root.children.len(), 1);
        assert_eq!(document.root.refine_mode().unwrap(), Some(TileRefine::Replace));
        assert_eq!(document.root.children[0].refine_mode().unwrap(), None);
        assert_eq!(
            document.root.content.as_ref().unwrap().uri(),
            Some("root.glb")
        );
    }

    #[test]
    fn test_bounding_volume_requires_exact_element_count() {
        let volume = BoundingVolumeJson {
            box_values: Some(vec![0.0; 11]),
            ..BoundingVolumeJson::default()
        };
        assert!(volume.decode().is_err());

        let volume = BoundingVolumeJson {
            region: Some(vec![-0.1, -0.1, 0.1, 0.1, 0.0, 100.0]),
            ..BoundingVolumeJson::default()
        };
        assert!(matches!(
            volume.decode().unwrap(),
            BoundingVolume::Region(_)
        ));
    }

    #[test]
    fn test_bounding_volume_missing_kinds_is_error() {
        assert!(BoundingVolumeJson::default().decode().is_err());
    }

    #[test]
    fn test_s2_extension_volume() {
        let json = r#"{
            "extensions": {
                "3DTILES_bounding_volume_S2": {
                    "token": "89c6c7",
                    "minimumHeight": 0.0,
                    "maximumHeight": 1000.0
                }
            }
        }"#;
        let volume: BoundingVolumeJson = serde_json::from_str(json).unwrap();
        match volume.decode().unwrap() {
            BoundingVolume::S2Cell(cell) => {
                assert_eq!(cell.token, "89c6c7");
                assert_eq!(cell.maximum_height, 1000.0);
            }
            other => panic!("expected S2 cell, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_is_column_major() {
        let json = r#"{
            "boundingVolume": { "sphere": [0, 0, 0, 1] },
            "geometricError": 1.0,
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5.0,6.0,7.0,1]
        }"#;
        let tile: TileJson = serde_json::from_str(json).unwrap();
        let matrix = tile.transform_matrix().unwrap();
        assert_eq!(matrix.w_axis.x, 5.0);
        assert_eq!(matrix.w_axis.y, 6.0);
        assert_eq!(matrix.w_axis.z, 7.0);
    }

    #[test]
    fn test_implicit_tiling_from_extension() {
        let json = r#"{
            "boundingVolume": { "region": [-1.0, -1.0, 1.0, 1.0, 0.0, 100.0] },
            "geometricError": 5000.0,
            "content": { "uri": "content/{level}/{x}/{y}.glb" },
            "extensions": {
                "3DTILES_implicit_tiling": {
                    "subdivisionScheme": "QUADTREE",
                    "subtreeLevels": 4,
                    "availableLevels": 8,
                    "subtrees": { "uri": "subtrees/{level}/{x}/{y}.subtree" }
                }
            }
        }"#;
        let tile: TileJson = serde_json::from_str(json).unwrap();
        let implicit = tile.implicit_tiling().unwrap();
        assert_eq!(implicit.subdivision_scheme, "QUADTREE");
        assert_eq!(implicit.subtree_levels, 4);
        assert_eq!(implicit.levels(), 8);
    }

    #[test]
    fn test_unknown_refine_is_error() {
        let json = r#"{
            "boundingVolume": { "sphere": [0, 0, 0, 1] },
            "geometricError": 1.0,
            "refine": "BLEND"
        }"#;
        let tile: TileJson = serde_json::from_str(json).unwrap();
        assert!(tile.refine_mode().is_err());
    }
}
