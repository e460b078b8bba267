//! Deferred Engine - a deferred shading frame renderer
//!
//! Rendering goes through the [`GraphicsDevice`](backend::GraphicsDevice)
//! state machine, which has two implementations:
//! - **Headless**: CPU reference device that records draws and rasterizes
//!   depth and coverage, used by the test suite
//! - **wgpu**: real GPU backend rendering into offscreen targets
//!
//! # Features
//! - Scene graph with per-frame render data collection
//! - Keyframe animation with linear and step interpolation, skinning
//! - G-buffer generation and a fullscreen PBR light pass
//! - Cascaded shadow maps for the main directional light
//! - Image-based lighting with a baked BRDF lookup table, skybox

pub mod animation;
pub mod backend;
pub mod engine;
pub mod pipeline;
pub mod resources;
pub mod scene;

pub use engine::{FrameStage, Renderer};

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// CPU reference device, no GPU required
    #[default]
    Headless,
    /// wgpu device rendering offscreen
    Wgpu,
}

/// Cascaded shadow settings
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowConfig {
    pub enabled: bool,
    /// Width and height of every cascade texture
    pub resolution: u32,
    /// Blend between uniform (0) and logarithmic (1) cascade splits
    pub split_lambda: f32,
    /// View distance covered by the cascades, clamped to the camera far plane
    pub shadow_distance: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 2048,
            split_lambda: 0.75,
            shadow_distance: 50.0,
        }
    }
}

impl ShadowConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_split_lambda(mut self, split_lambda: f32) -> Self {
        self.split_lambda = split_lambda;
        self
    }

    pub fn with_shadow_distance(mut self, shadow_distance: f32) -> Self {
        self.shadow_distance = shadow_distance;
        self
    }
}

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Which backend binaries should create
    pub backend: BackendType,
    /// Edge length of the baked BRDF lookup table
    pub brdf_lut_size: u32,
    pub shadow: ShadowConfig,
    /// Clear color of the HDR lighting target
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            backend: BackendType::Headless,
            brdf_lut_size: 512,
            shadow: ShadowConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl EngineConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_brdf_lut_size(mut self, size: u32) -> Self {
        self.brdf_lut_size = size;
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }
}
