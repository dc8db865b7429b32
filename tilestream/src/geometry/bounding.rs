//! Tile bounding volumes and plane-culling primitives.
//!
//! A tile's spatial extent is one of four volume kinds, mirroring the
//! `boundingVolume` member of tileset.json:
//!
//! - **Oriented box**: 12 numbers, center plus three half-axes.
//! - **Region**: 6 numbers, geodetic rectangle plus a height span.
//! - **Sphere**: 4 numbers, center plus radius.
//! - **S2 cell**: a cell token plus a height span (the
//!   `3DTILES_bounding_volume_S2` extension form).
//!
//! Encoding and decoding the numeric array forms round-trips exactly; the
//! traversal engine relies only on the plane-intersection and point-distance
//! operations defined here.

use glam::{DMat3, DMat4, DVec3};

use crate::geometry::{Cartographic, Ellipsoid, GlobeRectangle};

// =============================================================================
// Planes and Culling
// =============================================================================

/// Result of testing a volume against a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullingResult {
    /// Entirely on the negative side of the plane.
    Outside,
    /// Crosses the plane.
    Intersecting,
    /// Entirely on the positive side of the plane.
    Inside,
}

/// A plane in Hessian normal form: `normal . p + distance == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    /// Creates a plane from a unit normal and a point it passes through.
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Signed distance of `point` from the plane.
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

// =============================================================================
// Oriented Bounding Box
// =============================================================================

/// A box with arbitrary orientation, stored as a center and a matrix whose
/// columns are the three half-axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBoundingBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

impl OrientedBoundingBox {
    /// Creates a box from its center and half-axes matrix.
    pub fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Decodes the 12-number tileset.json `box` array: center followed by the
    /// x, y, and z half-axis vectors.
    pub fn from_array(values: &[f64; 12]) -> Self {
        Self {
            center: DVec3::new(values[0], values[1], values[2]),
            half_axes: DMat3::from_cols(
                DVec3::new(values[3], values[4], values[5]),
                DVec3::new(values[6], values[7], values[8]),
                DVec3::new(values[9], values[10], values[11]),
            ),
        }
    }

    /// Encodes the box back into the 12-number array form.
    pub fn to_array(&self) -> [f64; 12] {
        let x = self.half_axes.x_axis;
        let y = self.half_axes.y_axis;
        let z = self.half_axes.z_axis;
        [
            self.center.x,
            self.center.y,
            self.center.z,
            x.x,
            x.y,
            x.z,
            y.x,
            y.y,
            y.z,
            z.x,
            z.y,
            z.z,
        ]
    }

    /// Tests the box against a plane.
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        let normal = plane.normal;
        // Projected extent of the box onto the plane normal.
        let effective_radius = normal.dot(self.half_axes.x_axis).abs()
            + normal.dot(self.half_axes.y_axis).abs()
            + normal.dot(self.half_axes.z_axis).abs();
        let distance = plane.signed_distance(self.center);

        if distance <= -effective_radius {
            CullingResult::Outside
        } else if distance >= effective_radius {
            CullingResult::Inside
        } else {
            CullingResult::Intersecting
        }
    }

    /// Squared distance from `position` to the closest point of the box.
    ///
    /// Assumes the half-axes are mutually orthogonal, which holds for every
    /// volume this engine constructs.
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let offset = position - self.center;
        let mut closest = DVec3::ZERO;
        for axis in [
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        ] {
            let length = axis.length();
            if length == 0.0 {
                continue;
            }
            let direction = axis / length;
            let projection = offset.dot(direction).clamp(-length, length);
            closest += direction * projection;
        }
        (offset - closest).length_squared()
    }

    /// Applies an affine transform to the box.
    pub fn transform(&self, matrix: &DMat4) -> Self {
        Self {
            center: matrix.transform_point3(self.center),
            half_axes: DMat3::from_cols(
                matrix.transform_vector3(self.half_axes.x_axis),
                matrix.transform_vector3(self.half_axes.y_axis),
                matrix.transform_vector3(self.half_axes.z_axis),
            ),
        }
    }

    /// Builds the tightest axis-aligned-in-frame box around a set of points
    /// expressed in an arbitrary orthonormal frame.
    pub fn from_points_in_frame(points: &[DVec3], frame: DMat3, origin: DVec3) -> Self {
        let inverse = frame.transpose();
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for point in points {
            let local = inverse * (*point - origin);
            min = min.min(local);
            max = max.max(local);
        }
        let half_extent = 0.5 * (max - min);
        let local_center = 0.5 * (max + min);
        Self {
            center: origin + frame * local_center,
            half_axes: DMat3::from_cols(
                frame.x_axis * half_extent.x,
                frame.y_axis * half_extent.y,
                frame.z_axis * half_extent.z,
            ),
        }
    }
}

// =============================================================================
// Bounding Sphere
// =============================================================================

/// A sphere in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    /// Creates a sphere from center and radius.
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Decodes the 4-number tileset.json `sphere` array.
    pub fn from_array(values: &[f64; 4]) -> Self {
        Self {
            center: DVec3::new(values[0], values[1], values[2]),
            radius: values[3],
        }
    }

    /// Encodes the sphere back into the 4-number array form.
    pub fn to_array(&self) -> [f64; 4] {
        [self.center.x, self.center.y, self.center.z, self.radius]
    }

    /// Tests the sphere against a plane.
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        let distance = plane.signed_distance(self.center);
        if distance <= -self.radius {
            CullingResult::Outside
        } else if distance >= self.radius {
            CullingResult::Inside
        } else {
            CullingResult::Intersecting
        }
    }

    /// Squared distance from `position` to the sphere surface (zero inside).
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let distance = (position - self.center).length() - self.radius;
        if distance <= 0.0 {
            0.0
        } else {
            distance * distance
        }
    }

    /// Applies an affine transform; the radius scales by the largest axis
    /// scale so the result stays conservative under non-uniform scaling.
    pub fn transform(&self, matrix: &DMat4) -> Self {
        let scale = matrix
            .transform_vector3(DVec3::X)
            .length()
            .max(matrix.transform_vector3(DVec3::Y).length())
            .max(matrix.transform_vector3(DVec3::Z).length());
        Self {
            center: matrix.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

// =============================================================================
// Bounding Region
// =============================================================================

/// A geodetic rectangle extruded between two heights above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRegion {
    pub rectangle: GlobeRectangle,
    pub minimum_height: f64,
    pub maximum_height: f64,
}

impl BoundingRegion {
    /// Creates a region from its rectangle and height span.
    pub fn new(rectangle: GlobeRectangle, minimum_height: f64, maximum_height: f64) -> Self {
        Self {
            rectangle,
            minimum_height,
            maximum_height,
        }
    }

    /// Decodes the 6-number tileset.json `region` array:
    /// `[west, south, east, north, minHeight, maxHeight]`.
    pub fn from_array(values: &[f64; 6]) -> Self {
        Self {
            rectangle: GlobeRectangle::new(values[0], values[1], values[2], values[3]),
            minimum_height: values[4],
            maximum_height: values[5],
        }
    }

    /// Encodes the region back into the 6-number array form.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.rectangle.west,
            self.rectangle.south,
            self.rectangle.east,
            self.rectangle.north,
            self.minimum_height,
            self.maximum_height,
        ]
    }

    /// The tightest oriented box containing the region on `ellipsoid`.
    ///
    /// Corner and edge-midpoint samples of the region are projected into an
    /// east-north-up frame at the region center; the box is axis-aligned in
    /// that frame.
    pub fn to_oriented_bounding_box(&self, ellipsoid: &Ellipsoid) -> OrientedBoundingBox {
        let rect = &self.rectangle;
        let center_carto = rect.center();
        let origin = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            center_carto.longitude,
            center_carto.latitude,
            0.5 * (self.minimum_height + self.maximum_height),
        ));
        let up = ellipsoid.geodetic_surface_normal(origin);
        let east = DVec3::Z.cross(up).normalize_or(DVec3::X);
        let north = up.cross(east);
        let frame = DMat3::from_cols(east, north, up);

        let longitudes = [rect.west, 0.5 * (rect.west + rect.east), rect.east];
        let latitudes = [rect.south, 0.5 * (rect.south + rect.north), rect.north];
        let heights = [self.minimum_height, self.maximum_height];
        let mut points = Vec::with_capacity(18);
        for &lon in &longitudes {
            for &lat in &latitudes {
                for &height in &heights {
                    points.push(
                        ellipsoid.cartographic_to_cartesian(&Cartographic::new(lon, lat, height)),
                    );
                }
            }
        }
        OrientedBoundingBox::from_points_in_frame(&points, frame, origin)
    }
}

// =============================================================================
// S2 Cell Volume
// =============================================================================

/// An S2 cell token with a height span, the `3DTILES_bounding_volume_S2`
/// extension form.
///
/// The token and heights round-trip exactly. Visibility and distance queries
/// fall back to a conservative whole-ellipsoid sphere, so an S2-bounded tile
/// is never falsely culled; refinement then proceeds on screen-space error
/// alone.
#[derive(Debug, Clone, PartialEq)]
pub struct S2CellBoundingVolume {
    pub token: String,
    pub minimum_height: f64,
    pub maximum_height: f64,
}

impl S2CellBoundingVolume {
    /// Creates an S2 cell volume from its token and height span.
    pub fn new(token: impl Into<String>, minimum_height: f64, maximum_height: f64) -> Self {
        Self {
            token: token.into(),
            minimum_height,
            maximum_height,
        }
    }

    /// A sphere guaranteed to contain the cell volume.
    pub fn conservative_sphere(&self, ellipsoid: &Ellipsoid) -> BoundingSphere {
        BoundingSphere::new(
            DVec3::ZERO,
            ellipsoid.maximum_radius() + self.maximum_height.max(0.0),
        )
    }
}

// =============================================================================
// Tagged Union
// =============================================================================

/// A tile's bounding volume, exactly one of the four supported kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundingVolume {
    Box(OrientedBoundingBox),
    Region(BoundingRegion),
    Sphere(BoundingSphere),
    S2Cell(S2CellBoundingVolume),
}

impl BoundingVolume {
    /// Tests the volume against a plane.
    pub fn intersect_plane(&self, plane: &Plane, ellipsoid: &Ellipsoid) -> CullingResult {
        match self {
            BoundingVolume::Box(b) => b.intersect_plane(plane),
            BoundingVolume::Region(r) => r.to_oriented_bounding_box(ellipsoid).intersect_plane(plane),
            BoundingVolume::Sphere(s) => s.intersect_plane(plane),
            BoundingVolume::S2Cell(c) => c.conservative_sphere(ellipsoid).intersect_plane(plane),
        }
    }

    /// Squared distance from `position` to the volume.
    pub fn distance_squared_to(&self, position: DVec3, ellipsoid: &Ellipsoid) -> f64 {
        match self {
            BoundingVolume::Box(b) => b.distance_squared_to(position),
            BoundingVolume::Region(r) => r
                .to_oriented_bounding_box(ellipsoid)
                .distance_squared_to(position),
            BoundingVolume::Sphere(s) => s.distance_squared_to(position),
            BoundingVolume::S2Cell(c) => {
                c.conservative_sphere(ellipsoid).distance_squared_to(position)
            }
        }
    }

    /// Applies an affine transform. Regions and S2 cells are fixed to the
    /// globe and ignore tile transforms, matching the 3D Tiles specification.
    pub fn transform(&self, matrix: &DMat4) -> BoundingVolume {
        match self {
            BoundingVolume::Box(b) => BoundingVolume::Box(b.transform(matrix)),
            BoundingVolume::Sphere(s) => BoundingVolume::Sphere(s.transform(matrix)),
            BoundingVolume::Region(_) | BoundingVolume::S2Cell(_) => self.clone(),
        }
    }

    /// The geodetic rectangle of the volume, if it has one.
    pub fn rectangle(&self) -> Option<GlobeRectangle> {
        match self {
            BoundingVolume::Region(r) => Some(r.rectangle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_array_round_trip() {
        let values = [
            1.0, 2.0, 3.0, 100.0, 0.0, 0.0, 0.0, 50.0, 0.0, 0.0, 0.0, 25.0,
        ];
        let bounding_box = OrientedBoundingBox::from_array(&values);
        assert_eq!(bounding_box.to_array(), values);
        // Re-encoding a decoded re-encode is also stable.
        let again = OrientedBoundingBox::from_array(&bounding_box.to_array());
        assert_eq!(again.to_array(), values);
    }

    #[test]
    fn test_sphere_array_round_trip() {
        let values = [10.0, -20.0, 30.0, 99.5];
        let sphere = BoundingSphere::from_array(&values);
        assert_eq!(sphere.to_array(), values);
    }

    #[test]
    fn test_region_array_round_trip() {
        let values = [-1.2, -0.5, 1.2, 0.5, -10.0, 500.0];
        let region = BoundingRegion::from_array(&values);
        assert_eq!(region.to_array(), values);
    }

    #[test]
    fn test_s2_round_trip() {
        let cell = S2CellBoundingVolume::new("89c25", -5.0, 300.0);
        let copy = S2CellBoundingVolume::new(cell.token.clone(), cell.minimum_height, cell.maximum_height);
        assert_eq!(cell, copy);
    }

    #[test]
    fn test_sphere_plane_intersection() {
        let sphere = BoundingSphere::new(DVec3::new(0.0, 0.0, 10.0), 1.0);
        let plane = Plane::from_point_normal(DVec3::ZERO, DVec3::Z);
        assert_eq!(sphere.intersect_plane(&plane), CullingResult::Inside);

        let sphere_below = BoundingSphere::new(DVec3::new(0.0, 0.0, -10.0), 1.0);
        assert_eq!(sphere_below.intersect_plane(&plane), CullingResult::Outside);

        let sphere_on = BoundingSphere::new(DVec3::new(0.0, 0.0, 0.5), 1.0);
        assert_eq!(sphere_on.intersect_plane(&plane), CullingResult::Intersecting);
    }

    #[test]
    fn test_box_plane_intersection() {
        let bounding_box = OrientedBoundingBox::new(
            DVec3::new(0.0, 0.0, 5.0),
            DMat3::from_diagonal(DVec3::new(1.0, 1.0, 1.0)),
        );
        let plane = Plane::from_point_normal(DVec3::ZERO, DVec3::Z);
        assert_eq!(bounding_box.intersect_plane(&plane), CullingResult::Inside);

        let crossing = OrientedBoundingBox::new(
            DVec3::new(0.0, 0.0, 0.5),
            DMat3::from_diagonal(DVec3::new(1.0, 1.0, 1.0)),
        );
        assert_eq!(crossing.intersect_plane(&plane), CullingResult::Intersecting);
    }

    #[test]
    fn test_box_distance_outside() {
        let bounding_box =
            OrientedBoundingBox::new(DVec3::ZERO, DMat3::from_diagonal(DVec3::splat(1.0)));
        let distance_squared = bounding_box.distance_squared_to(DVec3::new(3.0, 0.0, 0.0));
        assert!((distance_squared - 4.0).abs() < 1.0e-12);
    }

    #[test]
    fn test_box_distance_inside_is_zero() {
        let bounding_box =
            OrientedBoundingBox::new(DVec3::ZERO, DMat3::from_diagonal(DVec3::splat(2.0)));
        assert_eq!(bounding_box.distance_squared_to(DVec3::new(0.5, 0.5, 0.5)), 0.0);
    }

    #[test]
    fn test_box_transform_translates_center() {
        let bounding_box =
            OrientedBoundingBox::new(DVec3::ZERO, DMat3::from_diagonal(DVec3::splat(1.0)));
        let matrix = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0));
        let moved = bounding_box.transform(&matrix);
        assert!((moved.center.x - 10.0).abs() < 1.0e-12);
        assert_eq!(moved.half_axes, bounding_box.half_axes);
    }

    #[test]
    fn test_region_obb_contains_corners() {
        let region = BoundingRegion::new(
            GlobeRectangle::from_degrees(-1.0, -1.0, 1.0, 1.0),
            0.0,
            1000.0,
        );
        let ellipsoid = Ellipsoid::WGS84;
        let obb = region.to_oriented_bounding_box(&ellipsoid);

        for lon in [-1.0_f64, 1.0] {
            for lat in [-1.0_f64, 1.0] {
                for height in [0.0, 1000.0] {
                    let corner = ellipsoid.cartographic_to_cartesian(
                        &Cartographic::from_degrees(lon, lat, height),
                    );
                    // Corner must be inside (distance zero) up to rounding.
                    assert!(obb.distance_squared_to(corner) < 1.0);
                }
            }
        }
    }

    #[test]
    fn test_region_ignores_transform() {
        let region = BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::from_degrees(0.0, 0.0, 1.0, 1.0),
            0.0,
            100.0,
        ));
        let matrix = DMat4::from_translation(DVec3::new(1000.0, 0.0, 0.0));
        assert_eq!(region.transform(&matrix), region);
    }
}
