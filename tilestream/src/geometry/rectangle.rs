//! Geodetic rectangles on the globe.
//!
//! A [`GlobeRectangle`] is the longitude/latitude footprint of a bounding
//! region or an overlay tile, in radians. Overlay draping intersects geometry
//! footprints with overlay tile grids through this type.

use crate::geometry::Cartographic;

/// A rectangle in longitude/latitude radians.
///
/// `west`/`east` are longitudes in `[-PI, PI]`, `south`/`north` latitudes in
/// `[-PI/2, PI/2]`. Rectangles crossing the antimeridian are not modeled;
/// callers split them beforehand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobeRectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GlobeRectangle {
    /// The whole globe.
    pub const MAXIMUM: GlobeRectangle = GlobeRectangle {
        west: -std::f64::consts::PI,
        south: -std::f64::consts::FRAC_PI_2,
        east: std::f64::consts::PI,
        north: std::f64::consts::FRAC_PI_2,
    };

    /// Creates a rectangle from radian bounds.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Creates a rectangle from degree bounds.
    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    /// Longitudinal extent in radians.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Latitudinal extent in radians.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// The center of the rectangle at height zero.
    pub fn center(&self) -> Cartographic {
        Cartographic::new(
            0.5 * (self.west + self.east),
            0.5 * (self.south + self.north),
            0.0,
        )
    }

    /// Returns true if the cartographic position lies inside (inclusive).
    pub fn contains(&self, position: &Cartographic) -> bool {
        position.longitude >= self.west
            && position.longitude <= self.east
            && position.latitude >= self.south
            && position.latitude <= self.north
    }

    /// The overlapping rectangle, or `None` when disjoint.
    pub fn intersection(&self, other: &GlobeRectangle) -> Option<GlobeRectangle> {
        let west = self.west.max(other.west);
        let east = self.east.min(other.east);
        let south = self.south.max(other.south);
        let north = self.north.min(other.north);
        if west < east && south < north {
            Some(GlobeRectangle::new(west, south, east, north))
        } else {
            None
        }
    }

    /// The smallest rectangle containing both.
    pub fn union(&self, other: &GlobeRectangle) -> GlobeRectangle {
        GlobeRectangle::new(
            self.west.min(other.west),
            self.south.min(other.south),
            self.east.max(other.east),
            self.north.max(other.north),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_center() {
        let rect = GlobeRectangle::from_degrees(-10.0, -5.0, 10.0, 5.0);
        assert!(rect.contains(&rect.center()));
    }

    #[test]
    fn test_contains_excludes_outside() {
        let rect = GlobeRectangle::from_degrees(-10.0, -5.0, 10.0, 5.0);
        assert!(!rect.contains(&Cartographic::from_degrees(11.0, 0.0, 0.0)));
        assert!(!rect.contains(&Cartographic::from_degrees(0.0, 6.0, 0.0)));
    }

    #[test]
    fn test_intersection_overlapping() {
        let a = GlobeRectangle::from_degrees(0.0, 0.0, 10.0, 10.0);
        let b = GlobeRectangle::from_degrees(5.0, 5.0, 15.0, 15.0);
        let i = a.intersection(&b).unwrap();
        assert!((i.west - 5.0_f64.to_radians()).abs() < 1.0e-12);
        assert!((i.east - 10.0_f64.to_radians()).abs() < 1.0e-12);
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = GlobeRectangle::from_degrees(0.0, 0.0, 10.0, 10.0);
        let b = GlobeRectangle::from_degrees(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_union_covers_both() {
        let a = GlobeRectangle::from_degrees(0.0, 0.0, 10.0, 10.0);
        let b = GlobeRectangle::from_degrees(5.0, -5.0, 15.0, 5.0);
        let u = a.union(&b);
        assert!((u.west - 0.0).abs() < 1.0e-12);
        assert!((u.south - (-5.0_f64).to_radians()).abs() < 1.0e-12);
        assert!((u.east - 15.0_f64.to_radians()).abs() < 1.0e-12);
        assert!((u.north - 10.0_f64.to_radians()).abs() < 1.0e-12);
    }
}
