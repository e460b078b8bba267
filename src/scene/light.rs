//! Light components
//!
//! Positions and directions are derived from the owning node's world
//! transform on every scene update. Lights shine down their node's -Z axis.

use glam::{Mat4, Vec3, Vec4Swizzles};

fn world_direction(world: Mat4) -> Vec3 {
    world.transform_vector3(-Vec3::Z).normalize_or_zero()
}

/// Directional light (like the sun)
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    pub direction: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            direction: -Vec3::Z,
        }
    }
}

impl DirectionalLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn update_from_world(&mut self, world: Mat4) {
        self.direction = world_direction(world);
    }
}

/// Point light
#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub position: Vec3,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            position: Vec3::ZERO,
        }
    }
}

impl PointLight {
    pub fn new(color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            color,
            intensity,
            radius,
            ..Default::default()
        }
    }

    pub fn update_from_world(&mut self, world: Mat4) {
        self.position = world.w_axis.xyz();
    }
}

/// Spot light with a smooth cone edge
#[derive(Debug, Clone, PartialEq)]
pub struct SpotLight {
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    /// Radians
    pub inner_angle: f32,
    /// Radians
    pub outer_angle: f32,
    pub position: Vec3,
    pub direction: Vec3,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
            position: Vec3::ZERO,
            direction: -Vec3::Z,
        }
    }
}

impl SpotLight {
    pub fn new(color: Vec3, intensity: f32, radius: f32, inner_angle: f32, outer_angle: f32) -> Self {
        Self {
            color,
            intensity,
            radius,
            inner_angle,
            outer_angle,
            ..Default::default()
        }
    }

    /// Cosine of the inner cone angle
    pub fn cut_off(&self) -> f32 {
        self.inner_angle.cos()
    }

    /// Cosine of the outer cone angle
    pub fn outer_cut_off(&self) -> f32 {
        self.outer_angle.cos()
    }

    pub fn update_from_world(&mut self, world: Mat4) {
        self.position = world.w_axis.xyz();
        self.direction = world_direction(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_spot_light_follows_node() {
        let mut light = SpotLight::default();
        let world = Mat4::from_rotation_translation(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2), Vec3::new(1.0, 4.0, 0.0));
        light.update_from_world(world);
        assert_eq!(light.position, Vec3::new(1.0, 4.0, 0.0));
        assert!(light.direction.abs_diff_eq(-Vec3::Y, 1e-5));
        assert!(light.cut_off() > light.outer_cut_off());
    }
}
