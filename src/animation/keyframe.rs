//! Keyframes and interval selection

use glam::{Quat, Vec3};

/// A time-stamped sample of a node transform.
///
/// Each channel is optional. A channel is animated between two keyframes only
/// when both of them define it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keyframe {
    pub time: f32,
    pub translation: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
}

impl Keyframe {
    pub fn new(time: f32) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = Some(translation);
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = Some(scale);
        self
    }
}

/// Keyframes in ascending time order.
///
/// Ordering is the caller's responsibility and is only checked in debug builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyframeSequence {
    keyframes: Vec<Keyframe>,
}

impl KeyframeSequence {
    pub fn new(keyframes: Vec<Keyframe>) -> Self {
        debug_assert!(
            keyframes.windows(2).all(|w| w[0].time <= w[1].time),
            "keyframes must be sorted by time"
        );
        Self { keyframes }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn first_time(&self) -> Option<f32> {
        self.keyframes.first().map(|k| k.time)
    }

    pub fn last_time(&self) -> Option<f32> {
        self.keyframes.last().map(|k| k.time)
    }

    /// Select the keyframes bracketing `time`.
    ///
    /// Intervals are half-open, `[k[i].time, k[i+1].time)`, so a time equal to
    /// a keyframe's time starts at that keyframe. Times outside the sequence
    /// (including exactly the last time) clamp to the first or last keyframe,
    /// returned as both ends.
    pub fn select(&self, time: f32) -> Option<(&Keyframe, &Keyframe)> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;

        // NaN lands here too
        if self.keyframes.len() == 1 || !(time >= first.time) {
            return Some((first, first));
        }
        if time >= last.time {
            return Some((last, last));
        }

        // first index whose time is strictly greater than `time`
        let end = self.keyframes.partition_point(|k| k.time <= time);
        Some((&self.keyframes[end - 1], &self.keyframes[end]))
    }
}

impl From<Vec<Keyframe>> for KeyframeSequence {
    fn from(keyframes: Vec<Keyframe>) -> Self {
        Self::new(keyframes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sequence(times: &[f32]) -> KeyframeSequence {
        KeyframeSequence::new(times.iter().map(|t| Keyframe::new(*t)).collect())
    }

    #[test]
    fn test_empty_sequence_has_no_interval() {
        assert!(sequence(&[]).select(0.5).is_none());
    }

    #[rstest]
    #[case(-10.0)]
    #[case(0.0)]
    #[case(1.0)]
    #[case(1000.0)]
    fn test_single_keyframe_is_both_ends(#[case] time: f32) {
        let seq = sequence(&[1.0]);
        let (start, end) = seq.select(time).unwrap();
        assert_eq!(start.time, 1.0);
        assert_eq!(end.time, 1.0);
    }

    #[rstest]
    #[case::before_first(-1.0, 0.0, 0.0)]
    #[case::at_first(0.0, 0.0, 1.0)]
    #[case::inside_first(0.5, 0.0, 1.0)]
    #[case::at_interior(1.0, 1.0, 2.5)]
    #[case::inside_second(2.0, 1.0, 2.5)]
    #[case::at_last(2.5, 2.5, 2.5)]
    #[case::after_last(9.0, 2.5, 2.5)]
    fn test_select_interval(#[case] time: f32, #[case] start: f32, #[case] end: f32) {
        let seq = sequence(&[0.0, 1.0, 2.5]);
        let (s, e) = seq.select(time).unwrap();
        assert_eq!((s.time, e.time), (start, end));
    }
}
