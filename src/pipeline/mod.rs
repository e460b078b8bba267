//! Deferred rendering pipeline
//!
//! One frame runs these passes over a [`RenderData`] snapshot:
//! 1. Shadow pass - depth of opaque geometry into each cascade
//! 2. G-buffer pass - geometry into color, normal, emissive and occlusion targets
//! 3. Light pass - fullscreen PBR resolve of the G-buffer with shadows and IBL
//! 4. Skybox - environment cubemap behind everything the G-buffer left empty
//!
//! The BRDF lookup table used by the light pass is baked once at startup.

pub mod bindings;
pub mod brdf_lut;
pub mod gbuffer;
pub mod lighting_pass;
pub mod render_data;
pub mod shadow;
pub mod skybox;

pub use bindings::{light_channel, material_channel, SHADOW_CASCADE_COUNT, SKYBOX_CHANNEL};
pub use brdf_lut::{BrdfLut, BRDF_LUT_FORMAT};
pub use gbuffer::{GBuffer, GBufferGenerator};
pub use lighting_pass::{LightPass, LightPassInputs};
pub use render_data::RenderData;
pub use shadow::{build_cascade_matrix, compute_cascade_splits, Cascade, ShadowMap};
pub use skybox::SkyboxPass;
