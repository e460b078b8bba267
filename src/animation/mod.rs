//! Keyframe animation
//!
//! Channels select the keyframes bracketing the playback time and blend them
//! with a [`Interpolator`]. Sampled channels override the animated node's
//! base transform; channels missing from either bracketing keyframe leave the
//! base value in place.

mod clip;
mod interpolation;
mod keyframe;

pub use clip::*;
pub use interpolation::*;
pub use keyframe::*;
