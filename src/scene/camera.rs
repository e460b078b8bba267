//! Camera component

use glam::{Mat4, Vec3, Vec4Swizzles};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let (half_w, half_h) = (width / 2.0, height / 2.0);
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    /// Right-handed projection with a [0, 1] depth range
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    /// Same projection with a different depth range
    pub fn with_range(&self, near: f32, far: f32) -> Self {
        let mut out = *self;
        match &mut out {
            Projection::Perspective { near: n, far: f, .. } | Projection::Orthographic { near: n, far: f, .. } => {
                *n = near;
                *f = far;
            }
        }
        out
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Camera attached to a scene node.
///
/// The view is derived from the node's world transform on every scene update;
/// the camera looks down its node's -Z axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub projection: Projection,
    view: Mat4,
    position: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Projection::default())
    }
}

impl Camera {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            view: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }

    /// Derive the view from the owning node's world transform
    pub fn update_from_world(&mut self, world: Mat4) {
        self.view = world.inverse();
        self.position = world.w_axis.xyz();
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view
    }

    pub fn inverse_view_projection_matrix(&self) -> Mat4 {
        self.view_projection_matrix().inverse()
    }

    pub fn near(&self) -> f32 {
        self.projection.near()
    }

    pub fn far(&self) -> f32 {
        self.projection.far()
    }

    /// World-space corners of the view frustum between two view distances
    pub fn frustum_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let inverse = (self.projection.with_range(near, far).matrix() * self.view).inverse();
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let x = if i & 1 == 0 { -1.0 } else { 1.0 };
            let y = if i & 2 == 0 { -1.0 } else { 1.0 };
            let z = if i & 4 == 0 { 0.0 } else { 1.0 };
            *corner = inverse.project_point3(Vec3::new(x, y, z));
        }
        corners
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.projection.set_aspect(width / height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_follows_world() {
        let mut camera = Camera::default();
        camera.update_from_world(Mat4::from_translation(Vec3::new(0.0, 2.0, 5.0)));
        assert_eq!(camera.position(), Vec3::new(0.0, 2.0, 5.0));
        let origin = camera.view_matrix().transform_point3(Vec3::new(0.0, 2.0, 0.0));
        assert!(origin.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn test_frustum_corners_span_range() {
        let mut camera = Camera::new(Projection::perspective(90.0, 1.0, 0.1, 100.0));
        camera.update_from_world(Mat4::IDENTITY);
        let corners = camera.frustum_corners(1.0, 10.0);
        assert!((corners[0].z + 1.0).abs() < 1e-4);
        assert!((corners[7].z + 10.0).abs() < 1e-3);
        // 90 degree fov: half width equals distance
        assert!((corners[7].x - 10.0).abs() < 1e-3);
    }
}
