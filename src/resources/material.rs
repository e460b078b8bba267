//! Material definitions for PBR rendering

use crate::backend::types::TextureHandle;
use glam::{Vec3, Vec4};

/// How a material treats alpha
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments with alpha below the cutoff are discarded
    Mask { cutoff: f32 },
    /// Translucent; excluded from the deferred passes
    Blend,
}

/// Optional texture maps of a material
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialTextures {
    pub diffuse: Option<TextureHandle>,
    pub emissive: Option<TextureHandle>,
    /// Roughness in G, metallic in B
    pub metallic_roughness: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub occlusion: Option<TextureHandle>,
}

/// PBR metallic-roughness material
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion_strength: f32,
    pub alpha_mode: AlphaMode,
    pub double_sided: bool,
    pub textures: MaterialTextures,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 0.5,
            occlusion_strength: 1.0,
            alpha_mode: AlphaMode::Opaque,
            double_sided: false,
            textures: MaterialTextures::default(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.double_sided = double_sided;
        self
    }

    pub fn with_textures(mut self, textures: MaterialTextures) -> Self {
        self.textures = textures;
        self
    }

    /// Whether the material is drawn by the deferred passes
    pub fn is_deferred(&self) -> bool {
        self.alpha_mode != AlphaMode::Blend
    }

    /// Alpha cutoff, or 0 when masking is off
    pub fn alpha_cutoff(&self) -> f32 {
        match self.alpha_mode {
            AlphaMode::Mask { cutoff } => cutoff,
            _ => 0.0,
        }
    }

    // Preset materials

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn glass() -> Self {
        Self::new("glass")
            .with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.3))
            .with_roughness(0.1)
            .with_alpha_mode(AlphaMode::Blend)
    }

    pub fn foliage(color: Vec3) -> Self {
        Self::new("foliage")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.8)
            .with_alpha_mode(AlphaMode::Mask { cutoff: 0.5 })
            .with_double_sided(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_is_not_deferred() {
        assert!(Material::plastic(Vec3::ONE).is_deferred());
        assert!(Material::foliage(Vec3::Y).is_deferred());
        assert!(!Material::glass().is_deferred());
    }

    #[test]
    fn test_alpha_cutoff() {
        assert_eq!(Material::foliage(Vec3::Y).alpha_cutoff(), 0.5);
        assert_eq!(Material::gold().alpha_cutoff(), 0.0);
    }
}
