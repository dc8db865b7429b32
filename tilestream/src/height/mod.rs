//! Terrain height queries against loaded tile geometry.
//!
//! The query casts a ray from high above the queried position straight
//! down along the geodetic surface normal and intersects it with the
//! triangles of the most detailed loaded tiles covering the position. See
//! [`Tileset::sample_height_most_detailed`](crate::tileset::Tileset::sample_height_most_detailed)
//! for the driving logic.

use glam::DVec3;

use crate::geometry::Cartographic;

/// Outcome of one position's height query.
#[derive(Debug, Clone)]
pub struct SampleHeightResult {
    /// The input position with its height replaced by the sampled terrain
    /// height when available, untouched otherwise.
    pub position: Cartographic,
    /// True when some tile geometry intersected the sample ray.
    pub height_available: bool,
}

/// Results of a [`sample_height_most_detailed`] call, input order preserved.
///
/// [`sample_height_most_detailed`]: crate::tileset::Tileset::sample_height_most_detailed
#[derive(Debug, Clone, Default)]
pub struct HeightResults {
    pub positions: Vec<SampleHeightResult>,
    pub warnings: Vec<String>,
}

/// Ray/triangle intersection (Möller–Trumbore). Returns the ray parameter
/// of the hit, or `None` for a miss, a backface-or-frontface parallel ray,
/// or a hit behind the origin.
pub(crate) fn intersect_ray_triangle(
    origin: DVec3,
    direction: DVec3,
    v0: DVec3,
    v1: DVec3,
    v2: DVec3,
) -> Option<f64> {
    const EPSILON: f64 = 1.0e-12;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let p = direction.cross(edge2);
    let determinant = edge1.dot(p);
    if determinant.abs() < EPSILON {
        return None;
    }
    let inverse_determinant = 1.0 / determinant;
    let s = origin - v0;
    let u = s.dot(p) * inverse_determinant;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inverse_determinant;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inverse_determinant;
    (t > EPSILON).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_hits_triangle() {
        let t = intersect_ray_triangle(
            DVec3::new(0.25, 0.25, 10.0),
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert!((t - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ray_misses_outside_triangle() {
        assert!(intersect_ray_triangle(
            DVec3::new(0.9, 0.9, 10.0),
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        )
        .is_none());
    }

    #[test]
    fn test_hit_behind_origin_is_rejected() {
        assert!(intersect_ray_triangle(
            DVec3::new(0.25, 0.25, -5.0),
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        )
        .is_none());
    }

    #[test]
    fn test_parallel_ray_is_rejected() {
        assert!(intersect_ray_triangle(
            DVec3::new(0.0, 0.0, 10.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        )
        .is_none());
    }
}
