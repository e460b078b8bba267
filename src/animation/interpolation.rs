//! Keyframe interpolators

use super::keyframe::Keyframe;

/// Blends two keyframes into a destination.
///
/// A channel is written only when both `start` and `end` define it; otherwise
/// the destination's channel is cleared so the node falls back to its base
/// transform. The destination's time is left untouched.
pub trait Interpolator {
    fn interpolate(&self, start: &Keyframe, end: &Keyframe, factor: f32, destination: &mut Keyframe);
}

/// Lerp for translation and scale, normalized lerp for rotation
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl Interpolator for LinearInterpolator {
    fn interpolate(&self, start: &Keyframe, end: &Keyframe, factor: f32, destination: &mut Keyframe) {
        let t = factor.clamp(0.0, 1.0);

        destination.translation = start.translation.zip(end.translation).map(|(a, b)| a.lerp(b, t));
        destination.scale = start.scale.zip(end.scale).map(|(a, b)| a.lerp(b, t));
        destination.rotation = start.rotation.zip(end.rotation).map(|(a, b)| {
            // shortest arc
            let b = if a.dot(b) < 0.0 { -b } else { b };
            (a * (1.0 - t) + b * t).normalize()
        });
    }
}

/// Holds the start keyframe until the next one
#[derive(Debug, Clone, Copy, Default)]
pub struct StepInterpolator;

impl Interpolator for StepInterpolator {
    fn interpolate(&self, start: &Keyframe, end: &Keyframe, _factor: f32, destination: &mut Keyframe) {
        destination.translation = start.translation.filter(|_| end.translation.is_some());
        destination.rotation = start.rotation.filter(|_| end.rotation.is_some());
        destination.scale = start.scale.filter(|_| end.scale.is_some());
    }
}

/// Interpolation mode of an animation channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    Linear,
    Step,
}

impl InterpolationMode {
    pub fn interpolator(self) -> &'static dyn Interpolator {
        match self {
            InterpolationMode::Linear => &LinearInterpolator,
            InterpolationMode::Step => &StepInterpolator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use rstest::rstest;

    fn full(time: f32, translation: Vec3, rotation: Quat, scale: Vec3) -> Keyframe {
        Keyframe::new(time)
            .with_translation(translation)
            .with_rotation(rotation)
            .with_scale(scale)
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.25)]
    #[case(0.5)]
    #[case(1.0)]
    fn test_linear_identical_ends_is_stable(#[case] factor: f32) {
        let rotation = Quat::from_rotation_y(0.7);
        let key = full(0.0, Vec3::new(1.0, 2.0, 3.0), rotation, Vec3::splat(2.0));
        let mut out = Keyframe::default();
        LinearInterpolator.interpolate(&key, &key, factor, &mut out);

        assert!(out.translation.unwrap().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert!(out.scale.unwrap().abs_diff_eq(Vec3::splat(2.0), 1e-6));
        assert!(out.rotation.unwrap().abs_diff_eq(rotation, 1e-5));
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.3)]
    #[case(0.5)]
    #[case(0.9)]
    #[case(1.0)]
    fn test_linear_rotation_is_unit_length(#[case] factor: f32) {
        let a = full(0.0, Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);
        let b = full(1.0, Vec3::ZERO, Quat::from_rotation_z(2.5), Vec3::ONE);
        let mut out = Keyframe::default();
        LinearInterpolator.interpolate(&a, &b, factor, &mut out);
        assert!((out.rotation.unwrap().length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_midpoint() {
        let a = full(0.0, Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);
        let b = full(1.0, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, Vec3::splat(3.0));
        let mut out = Keyframe::default();
        LinearInterpolator.interpolate(&a, &b, 0.5, &mut out);
        assert_eq!(out.translation, Some(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(out.scale, Some(Vec3::splat(2.0)));
    }

    #[test]
    fn test_step_returns_start() {
        let a = full(0.0, Vec3::X, Quat::IDENTITY, Vec3::ONE);
        let b = full(1.0, Vec3::Y, Quat::from_rotation_x(1.0), Vec3::splat(5.0));
        for factor in [0.0, 0.5, 0.99, 1.0] {
            let mut out = Keyframe::default();
            StepInterpolator.interpolate(&a, &b, factor, &mut out);
            assert_eq!(out.translation, a.translation);
            assert_eq!(out.rotation, a.rotation);
            assert_eq!(out.scale, a.scale);
        }
    }

    #[rstest]
    #[case::linear(InterpolationMode::Linear)]
    #[case::step(InterpolationMode::Step)]
    fn test_sparse_channels_are_cleared(#[case] mode: InterpolationMode) {
        let a = Keyframe::new(0.0).with_translation(Vec3::X).with_scale(Vec3::ONE);
        let b = Keyframe::new(1.0).with_translation(Vec3::Y).with_rotation(Quat::IDENTITY);

        // stale values from a previous frame
        let mut out = full(0.0, Vec3::splat(9.0), Quat::from_rotation_y(1.0), Vec3::splat(9.0));
        mode.interpolator().interpolate(&a, &b, 0.5, &mut out);

        assert!(out.translation.is_some());
        assert_eq!(out.rotation, None);
        assert_eq!(out.scale, None);
    }
}
