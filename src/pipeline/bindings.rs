//! Binding contract shared by the passes and their WGSL sources
//!
//! Texture channel numbers and uniform names are fixed. Each WGSL source
//! declares its uniform block as a flat struct with the fields listed in the
//! matching layout function, in the same order.

use crate::backend::{GraphicsDevice, TextureSlotKind, UniformLayout, UniformLayoutBuilder, UniformType};
use crate::pipeline::render_data::RenderData;
use crate::pipeline::shadow::ShadowMap;
use crate::resources::{AlphaMode, Material, Skin};
use glam::{Mat4, Vec3};

/// Texture channels of the material maps
pub mod material_channel {
    pub const DIFFUSE: u32 = 0;
    pub const EMISSIVE: u32 = 1;
    pub const METALLIC_ROUGHNESS: u32 = 2;
    pub const NORMAL: u32 = 3;
    pub const OCCLUSION: u32 = 4;
}

/// Texture channels read by the light pass
pub mod light_channel {
    pub const GBUFFER_COLOR: u32 = 0;
    pub const GBUFFER_NORMAL: u32 = 1;
    pub const GBUFFER_EMISSIVE: u32 = 2;
    pub const GBUFFER_OCCLUSION: u32 = 3;
    pub const GBUFFER_DEPTH: u32 = 4;
    pub const BRDF_LUT: u32 = 5;
    pub const IRRADIANCE: u32 = 6;
    pub const PREFILTERED: u32 = 7;
    /// Cascade `i` is bound at `SHADOW_CASCADE_0 + i`
    pub const SHADOW_CASCADE_0: u32 = 8;
}

/// Texture channel of the skybox cubemap
pub const SKYBOX_CHANNEL: u32 = 0;

/// Number of shadow cascades
pub const SHADOW_CASCADE_COUNT: usize = 4;

fn node_fields(builder: UniformLayoutBuilder) -> UniformLayoutBuilder {
    builder
        .field("uMatrices.world", UniformType::Mat4)
        .field("uMatrices.viewProjection", UniformType::Mat4)
        .field("uIsSkinned", UniformType::Bool)
        .field("uJointCount", UniformType::UInt)
}

fn joints(builder: UniformLayoutBuilder) -> UniformLayoutBuilder {
    builder.array("uJoints", "uJointCount", &[("jointMatrix", UniformType::Mat4)])
}

/// Uniforms of the G-buffer program
pub fn geometry_layout() -> UniformLayout {
    let builder = node_fields(UniformLayout::builder())
        .field("uMaterial.alphaCutoff", UniformType::Float)
        .field("uMaterial.metallicFactor", UniformType::Float)
        .field("uMaterial.baseColorFactor", UniformType::Vec4)
        .field("uMaterial.emissiveFactor", UniformType::Vec3)
        .field("uMaterial.roughnessFactor", UniformType::Float)
        .field("uMaterial.occlusionStrength", UniformType::Float)
        .field("uMaterial.alphaMask", UniformType::Bool)
        .field("uMaterial.hasNormalTexture", UniformType::Bool);
    joints(builder).build()
}

/// Uniforms of the depth-only shadow program
pub fn shadow_layout() -> UniformLayout {
    joints(node_fields(UniformLayout::builder())).build()
}

/// Uniforms of the light pass program
pub fn light_layout() -> UniformLayout {
    let light_base = [
        ("base.color", UniformType::Vec3),
        ("base.intensity", UniformType::Float),
    ];
    let directional = [light_base[0], light_base[1], ("direction", UniformType::Vec3)];
    let point = [
        light_base[0],
        light_base[1],
        ("position", UniformType::Vec3),
        ("radius", UniformType::Float),
    ];
    let spot = [
        light_base[0],
        light_base[1],
        ("position", UniformType::Vec3),
        ("radius", UniformType::Float),
        ("direction", UniformType::Vec3),
        ("cutOff", UniformType::Float),
        ("outerCutOff", UniformType::Float),
    ];

    UniformLayout::builder()
        .field("uCamera.inverseViewProjection", UniformType::Mat4)
        .field("uCamera.view", UniformType::Mat4)
        .field("uCamera.position", UniformType::Vec3)
        .field("uLights.directionalCount", UniformType::UInt)
        .field("uLights.pointCount", UniformType::UInt)
        .field("uLights.spotCount", UniformType::UInt)
        .field("uShadow.hasShadow", UniformType::Bool)
        .field("uShadow.zNear", UniformType::Float)
        .field("uShadow.zFar", UniformType::Float)
        .field("uShadow.cascadeCount", UniformType::UInt)
        .field("uIbl.enabled", UniformType::Bool)
        .field("uIbl.prefilteredMipLevels", UniformType::Float)
        .array("uLights.directional", "uLights.directionalCount", &directional)
        .array("uLights.point", "uLights.pointCount", &point)
        .array("uLights.spot", "uLights.spotCount", &spot)
        .array(
            "uShadow.cascades",
            "uShadow.cascadeCount",
            &[("lightViewProj", UniformType::Mat4), ("splitValue", UniformType::Float)],
        )
        .build()
}

/// Uniforms of the skybox program
pub fn skybox_layout() -> UniformLayout {
    UniformLayout::builder()
        .field("uMatrices.viewProjection", UniformType::Mat4)
        .build()
}

/// Texture slots of the light pass program
pub fn light_texture_slots() -> Vec<(u32, TextureSlotKind)> {
    use light_channel::*;
    let mut slots = vec![
        (GBUFFER_COLOR, TextureSlotKind::Color),
        (GBUFFER_NORMAL, TextureSlotKind::Color),
        (GBUFFER_EMISSIVE, TextureSlotKind::Color),
        (GBUFFER_OCCLUSION, TextureSlotKind::Color),
        (GBUFFER_DEPTH, TextureSlotKind::Depth),
        (BRDF_LUT, TextureSlotKind::Color),
        (IRRADIANCE, TextureSlotKind::Cube),
        (PREFILTERED, TextureSlotKind::Cube),
    ];
    slots.extend((0..SHADOW_CASCADE_COUNT as u32).map(|i| (SHADOW_CASCADE_0 + i, TextureSlotKind::Depth)));
    slots
}

/// Upload the transform of one model node.
///
/// A skinned node is positioned entirely by its joint matrices, which already
/// include the node hierarchy above the skeleton.
pub fn bind_node_transform(device: &mut dyn GraphicsDevice, world: Mat4, view_projection: Mat4, skin: Option<&Skin>) {
    device.set_uniform("uMatrices.world", world.into());
    device.set_uniform("uMatrices.viewProjection", view_projection.into());
    device.set_uniform("uIsSkinned", skin.is_some().into());

    let matrices = skin.map_or(&[][..], Skin::joint_matrices);
    device.set_uniform("uJointCount", (matrices.len() as u32).into());
    for (i, matrix) in matrices.iter().enumerate() {
        device.set_uniform(&format!("uJoints[{i}].jointMatrix"), (*matrix).into());
    }
}

/// Upload material factors and bind its texture maps.
///
/// Returns the channels that were bound so the caller can unbind them after
/// the draw.
pub fn bind_material(device: &mut dyn GraphicsDevice, material: &Material) -> Vec<u32> {
    device.set_uniform("uMaterial.baseColorFactor", material.base_color.into());
    device.set_uniform("uMaterial.emissiveFactor", material.emissive.into());
    device.set_uniform("uMaterial.metallicFactor", material.metallic.into());
    device.set_uniform("uMaterial.roughnessFactor", material.roughness.into());
    device.set_uniform("uMaterial.occlusionStrength", material.occlusion_strength.into());
    device.set_uniform("uMaterial.alphaMask", matches!(material.alpha_mode, AlphaMode::Mask { .. }).into());
    device.set_uniform("uMaterial.alphaCutoff", material.alpha_cutoff().into());
    device.set_uniform("uMaterial.hasNormalTexture", material.textures.normal.is_some().into());

    let maps = [
        (material_channel::DIFFUSE, material.textures.diffuse),
        (material_channel::EMISSIVE, material.textures.emissive),
        (material_channel::METALLIC_ROUGHNESS, material.textures.metallic_roughness),
        (material_channel::NORMAL, material.textures.normal),
        (material_channel::OCCLUSION, material.textures.occlusion),
    ];
    let mut bound = Vec::with_capacity(maps.len());
    for (channel, texture) in maps {
        if let Some(texture) = texture {
            device.bind_texture(channel, texture);
            bound.push(channel);
        }
    }
    bound
}

pub fn unbind_textures(device: &mut dyn GraphicsDevice, channels: &[u32]) {
    for channel in channels {
        device.unbind_texture(*channel);
    }
}

/// Upload light counts and per-light arrays, sized to the actual counts
pub fn bind_lights(device: &mut dyn GraphicsDevice, data: &RenderData) {
    device.set_uniform("uLights.directionalCount", (data.directional_lights.len() as u32).into());
    device.set_uniform("uLights.pointCount", (data.point_lights.len() as u32).into());
    device.set_uniform("uLights.spotCount", (data.spot_lights.len() as u32).into());

    fn set_base(device: &mut dyn GraphicsDevice, prefix: &str, color: Vec3, intensity: f32) {
        device.set_uniform(&format!("{prefix}.base.color"), color.into());
        device.set_uniform(&format!("{prefix}.base.intensity"), intensity.into());
    }

    for (i, light) in data.directional_lights.iter().enumerate() {
        let prefix = format!("uLights.directional[{i}]");
        set_base(device, &prefix, light.color, light.intensity);
        device.set_uniform(&format!("{prefix}.direction"), light.direction.into());
    }
    for (i, light) in data.point_lights.iter().enumerate() {
        let prefix = format!("uLights.point[{i}]");
        set_base(device, &prefix, light.color, light.intensity);
        device.set_uniform(&format!("{prefix}.position"), light.position.into());
        device.set_uniform(&format!("{prefix}.radius"), light.radius.into());
    }
    for (i, light) in data.spot_lights.iter().enumerate() {
        let prefix = format!("uLights.spot[{i}]");
        set_base(device, &prefix, light.color, light.intensity);
        device.set_uniform(&format!("{prefix}.position"), light.position.into());
        device.set_uniform(&format!("{prefix}.radius"), light.radius.into());
        device.set_uniform(&format!("{prefix}.direction"), light.direction.into());
        device.set_uniform(&format!("{prefix}.cutOff"), light.cut_off().into());
        device.set_uniform(&format!("{prefix}.outerCutOff"), light.outer_cut_off().into());
    }
}

/// Upload shadow data and bind cascade depth textures.
///
/// `None` disables shadowing through `uShadow.hasShadow`. Returns the
/// channels that were bound.
pub fn bind_shadow(device: &mut dyn GraphicsDevice, shadow_map: Option<&ShadowMap>) -> Vec<u32> {
    let Some(shadow_map) = shadow_map else {
        device.set_uniform("uShadow.hasShadow", false.into());
        device.set_uniform("uShadow.cascadeCount", 0u32.into());
        return Vec::new();
    };

    device.set_uniform("uShadow.hasShadow", true.into());
    device.set_uniform("uShadow.zNear", shadow_map.z_near().into());
    device.set_uniform("uShadow.zFar", shadow_map.z_far().into());
    device.set_uniform("uShadow.cascadeCount", (shadow_map.cascades().len() as u32).into());

    let mut bound = Vec::with_capacity(shadow_map.cascades().len());
    for (i, cascade) in shadow_map.cascades().iter().enumerate() {
        let prefix = format!("uShadow.cascades[{i}]");
        device.set_uniform(&format!("{prefix}.lightViewProj"), cascade.view_projection.into());
        device.set_uniform(&format!("{prefix}.splitValue"), cascade.split_depth.into());

        let channel = light_channel::SHADOW_CASCADE_0 + i as u32;
        device.bind_texture(channel, cascade.texture);
        bound.push(channel);
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessDevice, ProgramDescriptor, TextureDescriptor, UniformValue};
    use crate::pipeline::gbuffer::GBUFFER_SHADER;
    use crate::resources::{Joint, MaterialTextures};
    use glam::Vec4;

    fn geometry_device() -> HeadlessDevice {
        let mut device = HeadlessDevice::new(8, 8);
        let desc = ProgramDescriptor::new("geometry", GBUFFER_SHADER).with_uniforms(geometry_layout());
        let program = device.create_program(&desc).unwrap();
        device.use_program(Some(program));
        device
    }

    #[test]
    fn test_layout_sizes_match_wgsl_structs() {
        assert_eq!(geometry_layout().block().size(), 192);
        assert_eq!(shadow_layout().block().size(), 144);
        let light = light_layout();
        assert_eq!(light.block().size(), 176);
        let strides: Vec<usize> = light.arrays().iter().map(|a| a.element.size()).collect();
        assert_eq!(strides, vec![32, 32, 64, 80]);
    }

    #[test]
    fn test_material_binds_only_present_maps() {
        let mut device = geometry_device();
        let normal = device.create_texture(&TextureDescriptor::default()).unwrap();
        let material = crate::resources::Material::new("m")
            .with_base_color(Vec4::new(0.5, 0.5, 0.5, 1.0))
            .with_textures(MaterialTextures {
                normal: Some(normal),
                ..Default::default()
            });

        let bound = bind_material(&mut device, &material);
        assert_eq!(bound, vec![material_channel::NORMAL]);
        assert_eq!(device.bound_texture(material_channel::NORMAL), Some(normal));
        assert_eq!(device.bound_texture(material_channel::DIFFUSE), None);

        unbind_textures(&mut device, &bound);
        assert_eq!(device.bound_texture(material_channel::NORMAL), None);
    }

    #[test]
    fn test_skinned_node_uploads_joints() {
        let mut device = geometry_device();
        let skin = Skin::new(vec![
            Joint {
                node: 0,
                inverse_bind: Mat4::IDENTITY,
            },
            Joint {
                node: 1,
                inverse_bind: Mat4::IDENTITY,
            },
        ]);
        bind_node_transform(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, Some(&skin));
        device.draw_fullscreen();

        let draw = &device.draws()[0];
        assert_eq!(draw.uniform("uIsSkinned"), Some(UniformValue::Bool(true)));
        assert_eq!(draw.uniform("uJointCount"), Some(UniformValue::UInt(2)));
        assert!(draw.uniform("uJoints[1].jointMatrix").is_some());
    }
}
