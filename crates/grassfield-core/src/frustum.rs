//! View frustum planes and the camera interface that supplies them.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Index of each plane inside a [`Frustum`].
pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;
pub const BOTTOM: usize = 2;
pub const TOP: usize = 3;
pub const NEAR: usize = 4;
pub const FAR: usize = 5;

/// A plane `dot(normal, p) + distance = 0`. Points with a positive signed
/// distance are in front of (inside) the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Creates a plane from a normal and distance.
    #[must_use]
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Creates a plane through `point` facing `normal`.
    #[must_use]
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    fn from_row(row: Vec4) -> Self {
        let length = row.xyz().length();
        let row = if length > 0.0 { row / length } else { row };
        Self {
            normal: row.xyz(),
            distance: row.w,
        }
    }

    /// Signed distance of `point` from the plane.
    #[must_use]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Whether any part of the box `center ± half_extents` lies in front of
    /// the plane. Only the corner furthest along the normal is tested.
    #[must_use]
    pub fn box_in_front(&self, center: Vec3, half_extents: Vec3) -> bool {
        let corner = center + half_extents * self.normal.signum();
        self.signed_distance(corner) >= 0.0
    }
}

/// Six planes ordered left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Wraps six planes supplied by a camera.
    #[must_use]
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extracts normalized planes from a view-projection matrix that maps
    /// depth to `[0, 1]`, as produced by `Mat4::perspective_rh`.
    #[must_use]
    pub fn from_view_projection(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// The six planes.
    #[must_use]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// Replaces one plane.
    pub fn set_plane(&mut self, index: usize, plane: Plane) {
        self.planes[index] = plane;
    }

    /// Whether a point is inside all six planes.
    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.signed_distance(point) >= 0.0)
    }

    /// Whether the box `center ± half_extents` is not rejected by any
    /// plane. Stops at the first rejecting plane.
    #[must_use]
    pub fn intersects_box(&self, center: Vec3, half_extents: Vec3) -> bool {
        self.planes
            .iter()
            .all(|p| p.box_in_front(center, half_extents))
    }

    /// [`Frustum::intersects_box`] for `(min, max)` bounds.
    #[must_use]
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.intersects_box((min + max) * 0.5, (max - min) * 0.5)
    }
}

/// Supplies per-frame camera data to the culling pipeline.
///
/// The far clip is exposed separately so the caller can clamp it to the
/// draw distance while planes are extracted and restore it afterwards.
pub trait FrustumSource {
    /// Current far clip distance.
    fn far_clip(&self) -> f32;

    /// Overrides the far clip distance.
    fn set_far_clip(&mut self, far: f32);

    /// Frustum planes for the current camera state.
    fn frustum(&self) -> Frustum;

    /// View-projection matrix for the current camera state.
    fn view_projection(&self) -> Mat4;

    /// Extracts the frustum with the far plane clamped to `far`, leaving the
    /// camera's own far clip unchanged afterwards.
    fn frustum_with_far(&mut self, far: f32) -> Frustum {
        let original = self.far_clip();
        self.set_far_clip(far);
        let frustum = self.frustum();
        self.set_far_clip(original);
        frustum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_neg_z(far: f32) -> Mat4 {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, far);
        proj * view
    }

    #[test]
    fn test_plane_signed_distance() {
        let plane = Plane::from_point_normal(Vec3::new(0.0, 2.0, 0.0), Vec3::Y);
        assert!((plane.signed_distance(Vec3::new(5.0, 3.0, 1.0)) - 1.0).abs() < 1e-6);
        assert!(plane.signed_distance(Vec3::ZERO) < 0.0);
    }

    #[test]
    fn test_box_uses_positive_corner() {
        let plane = Plane::from_point_normal(Vec3::ZERO, Vec3::X);
        // Box straddles the plane: its +X corner is in front.
        assert!(plane.box_in_front(Vec3::new(-0.5, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)));
        // Box entirely behind.
        assert!(!plane.box_in_front(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)));
    }

    #[test]
    fn test_extracted_planes_point_inward() {
        let frustum = Frustum::from_view_projection(looking_down_neg_z(100.0));
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -150.0)));
        assert!(!frustum.contains_point(Vec3::new(50.0, 0.0, -10.0)));

        for plane in frustum.planes() {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
        let far = frustum.planes()[FAR];
        assert!(far.signed_distance(Vec3::new(0.0, 0.0, -100.0)).abs() < 0.1);
    }

    #[test]
    fn test_intersects_aabb() {
        let frustum = Frustum::from_view_projection(looking_down_neg_z(100.0));
        assert!(frustum.intersects_aabb(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0)));
        // Straddling the far plane still counts.
        assert!(frustum.intersects_aabb(Vec3::new(-1.0, -1.0, -101.0), Vec3::new(1.0, 1.0, -99.0)));
    }

    struct FixedCamera {
        far: f32,
    }

    impl FrustumSource for FixedCamera {
        fn far_clip(&self) -> f32 {
            self.far
        }

        fn set_far_clip(&mut self, far: f32) {
            self.far = far;
        }

        fn frustum(&self) -> Frustum {
            Frustum::from_view_projection(self.view_projection())
        }

        fn view_projection(&self) -> Mat4 {
            looking_down_neg_z(self.far)
        }
    }

    #[test]
    fn test_frustum_with_far_restores_camera() {
        let mut camera = FixedCamera { far: 1000.0 };
        let frustum = camera.frustum_with_far(50.0);
        assert_eq!(camera.far_clip(), 1000.0);
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -60.0)));
        assert!(camera.frustum().contains_point(Vec3::new(0.0, 0.0, -60.0)));
    }
}
