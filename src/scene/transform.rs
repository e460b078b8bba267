//! Local TRS transforms

use crate::animation::Keyframe;
use glam::{Mat3, Mat4, Quat, Vec3};

/// Translation, rotation and scale relative to the parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Decompose an affine matrix
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Local -Z
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        self.rotation = Quat::from_axis_angle(axis, angle) * self.rotation;
    }

    /// Orient -Z towards `target`
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));
    }

    pub fn looking_at(mut self, target: Vec3, up: Vec3) -> Self {
        self.look_at(target, up);
        self
    }

    /// Replace the channels a keyframe defines, keep the rest
    pub fn apply_keyframe(&self, keyframe: &Keyframe) -> Self {
        Self {
            position: keyframe.translation.unwrap_or(self.position),
            rotation: keyframe.rotation.unwrap_or(self.rotation),
            scale: keyframe.scale.unwrap_or(self.scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_points_forward_at_target() {
        let transform = Transform::from_position(Vec3::new(0.0, 0.0, 5.0)).looking_at(Vec3::new(3.0, 0.0, 5.0), Vec3::Y);
        assert!(transform.forward().abs_diff_eq(Vec3::X, 1e-5));
        assert!(transform.up().abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_apply_keyframe_keeps_missing_channels() {
        let base = Transform::from_position_scale(Vec3::X, Vec3::splat(2.0));
        let out = base.apply_keyframe(&Keyframe::new(0.0).with_translation(Vec3::Y));
        assert_eq!(out.position, Vec3::Y);
        assert_eq!(out.scale, Vec3::splat(2.0));
    }
}
