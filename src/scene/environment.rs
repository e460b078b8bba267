//! Environment maps for the skybox and image-based lighting

use crate::backend::types::TextureHandle;

/// Cubemaps describing the scene's surroundings.
///
/// Every map is optional; a missing irradiance or prefiltered map disables
/// the matching part of image-based lighting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    /// Shown by the skybox
    pub environment_map: Option<TextureHandle>,
    /// Diffuse irradiance
    pub irradiance_map: Option<TextureHandle>,
    /// Specular radiance, one roughness level per mip
    pub prefiltered_map: Option<TextureHandle>,
    pub prefiltered_mip_levels: u32,
}

impl Environment {
    pub fn new(environment_map: TextureHandle) -> Self {
        Self {
            environment_map: Some(environment_map),
            ..Default::default()
        }
    }

    pub fn with_irradiance(mut self, irradiance_map: TextureHandle) -> Self {
        self.irradiance_map = Some(irradiance_map);
        self
    }

    pub fn with_prefiltered(mut self, prefiltered_map: TextureHandle, mip_levels: u32) -> Self {
        self.prefiltered_map = Some(prefiltered_map);
        self.prefiltered_mip_levels = mip_levels;
        self
    }
}
