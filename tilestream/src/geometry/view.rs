//! Camera view state, frustum culling, and screen-space error.
//!
//! A [`ViewState`] is an immutable snapshot of one viewport's camera for a
//! single frame: position, orientation, viewport size, and field of view.
//! The traversal engine asks it three questions per tile:
//!
//! 1. Is the tile's bounding volume inside the view frustum?
//! 2. How far is the camera from the bounding volume?
//! 3. What is the screen-space error of the tile's geometric error at that
//!    distance?
//!
//! The SSE formula is `geometricError * viewportHeight / (distance *
//! sseDenominator)` with `sseDenominator = 2 * tan(fovY / 2)`; the distance
//! is clamped away from zero so a camera inside the volume yields a very
//! large (not infinite) error.

use glam::{DVec2, DVec3};

use crate::geometry::{BoundingVolume, Cartographic, CullingResult, Ellipsoid, Plane};

/// Minimum distance used in the SSE division, to avoid blowup when the
/// camera is inside the bounding volume.
const MINIMUM_SSE_DISTANCE: f64 = 1.0e-7;

/// The four side planes of a perspective view frustum.
///
/// Near and far planes are deliberately absent; distant tiles are handled by
/// screen-space error, not by a far plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullingVolume {
    pub left: Plane,
    pub right: Plane,
    pub top: Plane,
    pub bottom: Plane,
}

impl CullingVolume {
    /// Builds the side planes from camera position and orientation.
    pub fn new(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        horizontal_fov: f64,
        vertical_fov: f64,
    ) -> Self {
        let right = direction.cross(up).normalize();
        let up = right.cross(direction).normalize();

        let half_h = 0.5 * horizontal_fov;
        let half_v = 0.5 * vertical_fov;

        // Each normal points into the frustum interior.
        let left_normal = direction * half_h.sin() + right * half_h.cos();
        let right_normal = direction * half_h.sin() - right * half_h.cos();
        let bottom_normal = direction * half_v.sin() + up * half_v.cos();
        let top_normal = direction * half_v.sin() - up * half_v.cos();

        Self {
            left: Plane::from_point_normal(position, left_normal.normalize()),
            right: Plane::from_point_normal(position, right_normal.normalize()),
            top: Plane::from_point_normal(position, top_normal.normalize()),
            bottom: Plane::from_point_normal(position, bottom_normal.normalize()),
        }
    }

    /// Iterates the side planes.
    pub fn planes(&self) -> [&Plane; 4] {
        [&self.left, &self.right, &self.top, &self.bottom]
    }
}

/// One viewport's camera state for a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    position: DVec3,
    direction: DVec3,
    up: DVec3,
    viewport_size: DVec2,
    horizontal_fov: f64,
    vertical_fov: f64,
    sse_denominator: f64,
    position_cartographic: Option<Cartographic>,
    culling_volume: CullingVolume,
}

impl ViewState {
    /// Creates a view state, deriving the cartographic camera position from
    /// the WGS84 ellipsoid.
    pub fn create(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        viewport_size: DVec2,
        horizontal_fov: f64,
        vertical_fov: f64,
    ) -> Self {
        Self {
            position,
            direction,
            up,
            viewport_size,
            horizontal_fov,
            vertical_fov,
            sse_denominator: 2.0 * (0.5 * vertical_fov).tan(),
            position_cartographic: Ellipsoid::WGS84.cartesian_to_cartographic(position),
            culling_volume: CullingVolume::new(position, direction, up, horizontal_fov, vertical_fov),
        }
    }

    /// Camera position in world coordinates.
    pub fn position(&self) -> DVec3 {
        self.position
    }

    /// Camera view direction (unit).
    pub fn direction(&self) -> DVec3 {
        self.direction
    }

    /// Camera up vector (unit).
    pub fn up(&self) -> DVec3 {
        self.up
    }

    /// Viewport size in pixels.
    pub fn viewport_size(&self) -> DVec2 {
        self.viewport_size
    }

    /// Camera position as geodetic coordinates, when defined.
    pub fn position_cartographic(&self) -> Option<&Cartographic> {
        self.position_cartographic.as_ref()
    }

    /// Returns true if any part of the volume is inside the view frustum.
    pub fn is_bounding_volume_visible(&self, volume: &BoundingVolume) -> bool {
        let ellipsoid = Ellipsoid::WGS84;
        for plane in self.culling_volume.planes() {
            if volume.intersect_plane(plane, &ellipsoid) == CullingResult::Outside {
                return false;
            }
        }
        true
    }

    /// Squared distance from the camera to the volume.
    pub fn compute_distance_squared_to_bounding_volume(&self, volume: &BoundingVolume) -> f64 {
        volume.distance_squared_to(self.position, &Ellipsoid::WGS84)
    }

    /// Screen-space error of `geometric_error` viewed from `distance` meters.
    pub fn compute_screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        let distance = distance.max(MINIMUM_SSE_DISTANCE);
        (geometric_error * self.viewport_size.y) / (distance * self.sse_denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingSphere;

    fn looking_down_x() -> ViewState {
        ViewState::create(
            DVec3::ZERO,
            DVec3::X,
            DVec3::Z,
            DVec2::new(1920.0, 1080.0),
            (60.0_f64).to_radians(),
            (45.0_f64).to_radians(),
        )
    }

    #[test]
    fn test_volume_ahead_is_visible() {
        let view = looking_down_x();
        let volume = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 0.0, 0.0), 1.0));
        assert!(view.is_bounding_volume_visible(&volume));
    }

    #[test]
    fn test_volume_behind_is_culled() {
        let view = looking_down_x();
        let volume = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(-100.0, 0.0, 0.0), 1.0));
        assert!(!view.is_bounding_volume_visible(&volume));
    }

    #[test]
    fn test_volume_far_to_the_side_is_culled() {
        let view = looking_down_x();
        // 60 degree horizontal FOV: at x=100 the half-width is ~57.7m.
        let volume = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 200.0, 0.0), 1.0));
        assert!(!view.is_bounding_volume_visible(&volume));
    }

    #[test]
    fn test_large_volume_straddling_plane_is_visible() {
        let view = looking_down_x();
        let volume =
            BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 200.0, 0.0), 300.0));
        assert!(view.is_bounding_volume_visible(&volume));
    }

    #[test]
    fn test_sse_decreases_with_distance() {
        let view = looking_down_x();
        let near = view.compute_screen_space_error(16.0, 100.0);
        let far = view.compute_screen_space_error(16.0, 1000.0);
        assert!(near > far);
        assert!((near / far - 10.0).abs() < 1.0e-9);
    }

    #[test]
    fn test_sse_clamps_distance() {
        let view = looking_down_x();
        let inside = view.compute_screen_space_error(16.0, 0.0);
        assert!(inside.is_finite());
        assert!(inside > 1.0e9);
    }

    #[test]
    fn test_distance_to_volume() {
        let view = looking_down_x();
        let volume = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 0.0, 0.0), 10.0));
        let distance_squared = view.compute_distance_squared_to_bounding_volume(&volume);
        assert!((distance_squared.sqrt() - 90.0).abs() < 1.0e-9);
    }
}
