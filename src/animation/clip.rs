//! Animation clips and playback

use super::interpolation::InterpolationMode;
use super::keyframe::{Keyframe, KeyframeSequence};

/// Keyframes driving one node of a model
#[derive(Debug, Clone)]
pub struct AnimationChannel {
    /// Index into the model's flat node array
    pub node: usize,
    pub keyframes: KeyframeSequence,
    pub interpolation: InterpolationMode,
}

impl AnimationChannel {
    pub fn new(node: usize, keyframes: impl Into<KeyframeSequence>, interpolation: InterpolationMode) -> Self {
        Self {
            node,
            keyframes: keyframes.into(),
            interpolation,
        }
    }

    /// Evaluate the channel at `time`; `None` for an empty sequence
    pub fn sample(&self, time: f32) -> Option<Keyframe> {
        let (start, end) = self.keyframes.select(time)?;
        let span = end.time - start.time;
        let factor = if span > 0.0 {
            ((time - start.time) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut out = Keyframe::new(time);
        self.interpolation
            .interpolator()
            .interpolate(start, end, factor, &mut out);
        Some(out)
    }
}

/// A named set of channels
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub channels: Vec<AnimationChannel>,
    duration: f32,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<AnimationChannel>) -> Self {
        let duration = channels
            .iter()
            .filter_map(|c| c.keyframes.last_time())
            .fold(0.0, f32::max);
        Self {
            name: name.into(),
            channels,
            duration,
        }
    }

    /// Time of the last keyframe over all channels
    pub fn duration(&self) -> f32 {
        self.duration
    }
}

/// Playback state of the active clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationPlayback {
    pub clip: usize,
    pub time: f32,
    pub speed: f32,
    pub looping: bool,
    pub playing: bool,
}

impl AnimationPlayback {
    pub fn new(clip: usize) -> Self {
        Self {
            clip,
            time: 0.0,
            speed: 1.0,
            looping: true,
            playing: true,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Advance by `dt` seconds; looping clips wrap, one-shot clips clamp and stop
    pub fn advance(&mut self, dt: f32, duration: f32) {
        if !self.playing {
            return;
        }
        self.time += dt * self.speed;

        if duration <= 0.0 {
            self.time = 0.0;
        } else if self.looping {
            self.time = self.time.rem_euclid(duration);
        } else if self.time >= duration {
            self.time = duration;
            self.playing = false;
        } else if self.time < 0.0 {
            self.time = 0.0;
            self.playing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn slide() -> AnimationClip {
        AnimationClip::new(
            "slide",
            vec![AnimationChannel::new(
                0,
                vec![
                    Keyframe::new(0.0).with_translation(Vec3::ZERO),
                    Keyframe::new(2.0).with_translation(Vec3::new(4.0, 0.0, 0.0)),
                ],
                InterpolationMode::Linear,
            )],
        )
    }

    #[test]
    fn test_clip_duration_is_last_keyframe() {
        assert_eq!(slide().duration(), 2.0);
        assert_eq!(AnimationClip::new("empty", Vec::new()).duration(), 0.0);
    }

    #[test]
    fn test_channel_sample_factor() {
        let clip = slide();
        let sample = clip.channels[0].sample(0.5).unwrap();
        assert_eq!(sample.translation, Some(Vec3::new(1.0, 0.0, 0.0)));

        // clamped past the end: both ends are the last keyframe
        let sample = clip.channels[0].sample(5.0).unwrap();
        assert_eq!(sample.translation, Some(Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn test_looping_playback_wraps() {
        let mut playback = AnimationPlayback::new(0);
        playback.advance(2.5, 2.0);
        assert!((playback.time - 0.5).abs() < 1e-6);
        assert!(playback.playing);
    }

    #[test]
    fn test_one_shot_playback_clamps() {
        let mut playback = AnimationPlayback::new(0).with_looping(false);
        playback.advance(3.0, 2.0);
        assert_eq!(playback.time, 2.0);
        assert!(!playback.playing);

        playback.advance(1.0, 2.0);
        assert_eq!(playback.time, 2.0);
    }
}
