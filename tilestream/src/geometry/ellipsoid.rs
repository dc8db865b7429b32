//! Ellipsoid and cartographic coordinate math.
//!
//! All world-space positions in the engine are Earth-centered Earth-fixed
//! (ECEF) cartesian coordinates in meters. This module converts between those
//! and geodetic (longitude, latitude, height) coordinates over a reference
//! ellipsoid, and supplies surface normals for height-query rays.
//!
//! Only the operations the engine needs are implemented; this is not a
//! general geodesy library.

use glam::DVec3;

/// A geodetic position: longitude and latitude in radians, height in meters
/// above the ellipsoid surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    /// Creates a cartographic position from radians.
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    /// Creates a cartographic position from degrees.
    pub fn from_degrees(longitude_deg: f64, latitude_deg: f64, height: f64) -> Self {
        Self {
            longitude: longitude_deg.to_radians(),
            latitude: latitude_deg.to_radians(),
            height,
        }
    }
}

/// A quadratic surface of revolution centered at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    radii: DVec3,
    one_over_radii_squared: DVec3,
}

impl Ellipsoid {
    /// The WGS84 reference ellipsoid.
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: DVec3::new(6378137.0, 6378137.0, 6356752.314245179),
        one_over_radii_squared: DVec3::new(
            1.0 / (6378137.0 * 6378137.0),
            1.0 / (6378137.0 * 6378137.0),
            1.0 / (6356752.314245179 * 6356752.314245179),
        ),
    };

    /// Semi-axis lengths in meters.
    pub fn radii(&self) -> DVec3 {
        self.radii
    }

    /// Largest semi-axis length in meters.
    pub fn maximum_radius(&self) -> f64 {
        self.radii.x.max(self.radii.y).max(self.radii.z)
    }

    /// The outward unit normal of the ellipsoid surface below `position`.
    pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared).normalize()
    }

    /// The outward unit normal at a cartographic position.
    pub fn geodetic_surface_normal_cartographic(&self, cartographic: &Cartographic) -> DVec3 {
        let cos_lat = cartographic.latitude.cos();
        DVec3::new(
            cos_lat * cartographic.longitude.cos(),
            cos_lat * cartographic.longitude.sin(),
            cartographic.latitude.sin(),
        )
    }

    /// Converts a cartographic position to ECEF cartesian coordinates.
    pub fn cartographic_to_cartesian(&self, cartographic: &Cartographic) -> DVec3 {
        let normal = self.geodetic_surface_normal_cartographic(cartographic);
        let k = self.radii * self.radii * normal;
        let gamma = (normal.dot(k)).sqrt();
        let surface = k / gamma;
        surface + normal * cartographic.height
    }

    /// Converts an ECEF cartesian position to cartographic coordinates.
    ///
    /// Returns `None` for positions too close to the center of the ellipsoid
    /// for the iteration to converge.
    pub fn cartesian_to_cartographic(&self, position: DVec3) -> Option<Cartographic> {
        let surface = self.scale_to_geodetic_surface(position)?;
        let normal = self.geodetic_surface_normal(surface);
        let height_vector = position - surface;
        let height = height_vector.length().copysign(height_vector.dot(position));
        Some(Cartographic {
            longitude: normal.y.atan2(normal.x),
            latitude: normal.z.clamp(-1.0, 1.0).asin(),
            height,
        })
    }

    /// Projects `position` onto the ellipsoid surface along the geodetic
    /// normal, iteratively.
    pub fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
        let p2 = position * position;
        let beta = 1.0 / (p2.dot(self.one_over_radii_squared)).sqrt();
        if !beta.is_finite() {
            return None;
        }

        let oors = self.one_over_radii_squared;
        let mut lambda = (1.0 - beta) * position.length() / (0.5 * self.maximum_radius());
        let mut result = position * beta;
        for _ in 0..32 {
            let denom = DVec3::ONE + lambda * oors;
            let x = position / denom;
            let x2 = x * x;
            let func = x2.dot(oors) - 1.0;
            result = x;
            if func.abs() < 1.0e-12 {
                return Some(result);
            }
            let derivative = -2.0 * (x2 * oors * oors / denom).element_sum();
            if derivative == 0.0 {
                break;
            }
            lambda -= func / derivative;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1.0e-6;

    #[test]
    fn test_cartographic_round_trip_at_surface() {
        let ellipsoid = Ellipsoid::WGS84;
        let input = Cartographic::from_degrees(-105.0, 40.0, 0.0);
        let cartesian = ellipsoid.cartographic_to_cartesian(&input);
        let output = ellipsoid.cartesian_to_cartographic(cartesian).unwrap();

        assert!((output.longitude - input.longitude).abs() < EPS);
        assert!((output.latitude - input.latitude).abs() < EPS);
        assert!(output.height.abs() < 1.0e-3);
    }

    #[test]
    fn test_cartographic_round_trip_with_height() {
        let ellipsoid = Ellipsoid::WGS84;
        let input = Cartographic::from_degrees(12.5, -33.0, 1234.5);
        let cartesian = ellipsoid.cartographic_to_cartesian(&input);
        let output = ellipsoid.cartesian_to_cartographic(cartesian).unwrap();

        assert!((output.longitude - input.longitude).abs() < EPS);
        assert!((output.latitude - input.latitude).abs() < EPS);
        assert!((output.height - input.height).abs() < 1.0e-3);
    }

    #[test]
    fn test_equator_position() {
        let ellipsoid = Ellipsoid::WGS84;
        let position = ellipsoid.cartographic_to_cartesian(&Cartographic::new(0.0, 0.0, 0.0));
        assert!((position.x - 6378137.0).abs() < 1.0e-6);
        assert!(position.y.abs() < 1.0e-6);
        assert!(position.z.abs() < 1.0e-6);
    }

    #[test]
    fn test_surface_normal_points_outward() {
        let ellipsoid = Ellipsoid::WGS84;
        let carto = Cartographic::from_degrees(45.0, 45.0, 0.0);
        let position = ellipsoid.cartographic_to_cartesian(&carto);
        let normal = ellipsoid.geodetic_surface_normal(position);
        assert!(normal.dot(position) > 0.0);
        assert!((normal.length() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_center_has_no_cartographic() {
        let ellipsoid = Ellipsoid::WGS84;
        assert!(ellipsoid.cartesian_to_cartographic(DVec3::ZERO).is_none());
    }
}
