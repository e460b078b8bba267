//! G-buffer generation for deferred rendering
//!
//! Renders every opaque and alpha-masked primitive into four color targets
//! plus depth:
//! - color: albedo in rgb
//! - normal: world-space normal in xyz, roughness in w
//! - emissive: emitted radiance in rgb
//! - occlusion: ambient occlusion in r, metallic in g
//!
//! Blended materials never reach the G-buffer.

use crate::backend::*;
use crate::pipeline::bindings::{self, material_channel};
use crate::pipeline::render_data::RenderData;
use crate::resources::Model;
use glam::Mat4;

/// WGSL source of the geometry program
pub const GBUFFER_SHADER: &str = r#"
struct GeometryBlock {
    world: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    is_skinned: u32,
    joint_count: u32,
    alpha_cutoff: f32,
    metallic_factor: f32,
    base_color_factor: vec4<f32>,
    emissive_factor: vec3<f32>,
    roughness_factor: f32,
    occlusion_strength: f32,
    alpha_mask: u32,
    has_normal_texture: u32,
}

struct Joint {
    joint_matrix: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> block: GeometryBlock;
@group(0) @binding(1) var<storage, read> joints: array<Joint>;

@group(0) @binding(16) var diffuse_texture: texture_2d<f32>;
@group(0) @binding(17) var emissive_texture: texture_2d<f32>;
@group(0) @binding(18) var metallic_roughness_texture: texture_2d<f32>;
@group(0) @binding(19) var normal_texture: texture_2d<f32>;
@group(0) @binding(20) var occlusion_texture: texture_2d<f32>;
@group(0) @binding(32) var material_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
    @location(4) joint_indices: vec4<u32>,
    @location(5) joint_weights: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) world_tangent: vec4<f32>,
}

fn model_matrix(input: VertexInput) -> mat4x4<f32> {
    if block.is_skinned == 0u || block.joint_count == 0u {
        return block.world;
    }
    var skin = mat4x4<f32>();
    for (var i = 0u; i < 4u; i++) {
        let joint = min(input.joint_indices[i], block.joint_count - 1u);
        skin += joints[joint].joint_matrix * input.joint_weights[i];
    }
    return skin;
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let model = model_matrix(input);
    var out: VertexOutput;
    out.clip_position = block.view_projection * model * vec4<f32>(input.position, 1.0);
    out.world_normal = normalize((model * vec4<f32>(input.normal, 0.0)).xyz);
    out.world_tangent = vec4<f32>(normalize((model * vec4<f32>(input.tangent.xyz, 0.0)).xyz), input.tangent.w);
    out.uv = input.uv;
    return out;
}

struct GBufferOutput {
    @location(0) color: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) emissive: vec4<f32>,
    @location(3) occlusion: vec4<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    let base_color = textureSample(diffuse_texture, material_sampler, input.uv) * block.base_color_factor;
    let emissive = textureSample(emissive_texture, material_sampler, input.uv).rgb * block.emissive_factor;
    let metallic_roughness = textureSample(metallic_roughness_texture, material_sampler, input.uv);
    let tangent_normal = textureSample(normal_texture, material_sampler, input.uv).xyz * 2.0 - 1.0;
    let occlusion_sample = textureSample(occlusion_texture, material_sampler, input.uv).r;

    var normal = normalize(input.world_normal);
    if block.has_normal_texture != 0u {
        let tangent = normalize(input.world_tangent.xyz - normal * dot(normal, input.world_tangent.xyz));
        let bitangent = cross(normal, tangent) * input.world_tangent.w;
        normal = normalize(mat3x3<f32>(tangent, bitangent, normal) * tangent_normal);
    }

    if block.alpha_mask != 0u && base_color.a < block.alpha_cutoff {
        discard;
    }

    let roughness = clamp(metallic_roughness.g * block.roughness_factor, 0.04, 1.0);
    let metallic = clamp(metallic_roughness.b * block.metallic_factor, 0.0, 1.0);
    let occlusion = mix(1.0, occlusion_sample, block.occlusion_strength);

    var out: GBufferOutput;
    out.color = vec4<f32>(base_color.rgb, 1.0);
    out.normal = vec4<f32>(normal, roughness);
    out.emissive = vec4<f32>(emissive, 1.0);
    out.occlusion = vec4<f32>(occlusion, metallic, 0.0, 1.0);
    return out;
}
"#;

/// Depth value the G-buffer is cleared to
pub const CLEAR_DEPTH: f32 = 1.0;

/// Fixed-resolution deferred surface
#[derive(Debug)]
pub struct GBuffer {
    pub framebuffer: FramebufferHandle,
    pub color: TextureHandle,
    pub normal: TextureHandle,
    pub emissive: TextureHandle,
    pub occlusion: TextureHandle,
    pub depth: TextureHandle,
    pub width: u32,
    pub height: u32,
}

impl GBuffer {
    pub fn new(device: &mut dyn GraphicsDevice, width: u32, height: u32) -> BackendResult<Self> {
        let mut created = Vec::with_capacity(5);
        Self::build(device, width, height, &mut created).map_err(|err| {
            for texture in created {
                device.destroy_texture(texture);
            }
            err
        })
    }

    /// Create every target, recording each texture in `created` as it lands
    fn build(
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        created: &mut Vec<TextureHandle>,
    ) -> BackendResult<Self> {
        let mut target = |label: &str, format| -> BackendResult<TextureHandle> {
            let texture = device.create_texture(&TextureDescriptor::render_target(label, width, height, format))?;
            created.push(texture);
            Ok(texture)
        };
        let color = target("gbuffer color", TextureFormat::Rgba8Unorm)?;
        let normal = target("gbuffer normal", TextureFormat::Rgba16Float)?;
        let emissive = target("gbuffer emissive", TextureFormat::Rgba16Float)?;
        let occlusion = target("gbuffer occlusion", TextureFormat::Rg8Unorm)?;
        let depth = target("gbuffer depth", TextureFormat::Depth32Float)?;

        let framebuffer = device.create_framebuffer(&FramebufferDescriptor {
            label: Some("gbuffer".to_string()),
            color_attachments: vec![color, normal, emissive, occlusion],
            depth_attachment: Some(depth),
        })?;

        log::debug!("GBuffer: created {}x{}", width, height);
        Ok(Self {
            framebuffer,
            color,
            normal,
            emissive,
            occlusion,
            depth,
            width,
            height,
        })
    }

    /// Color attachments in output order
    pub fn color_targets(&self) -> [TextureHandle; 4] {
        [self.color, self.normal, self.emissive, self.occlusion]
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_framebuffer(self.framebuffer);
        for texture in self.color_targets() {
            device.destroy_texture(texture);
        }
        device.destroy_texture(self.depth);
    }
}

/// Renders scene geometry into the G-buffer
pub struct GBufferGenerator {
    program: ProgramHandle,
    gbuffer: GBuffer,
}

impl GBufferGenerator {
    pub fn new(device: &mut dyn GraphicsDevice, width: u32, height: u32) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("gbuffer", GBUFFER_SHADER)
            .with_uniforms(bindings::geometry_layout())
            .with_texture(material_channel::DIFFUSE, TextureSlotKind::Color)
            .with_texture(material_channel::EMISSIVE, TextureSlotKind::Color)
            .with_texture(material_channel::METALLIC_ROUGHNESS, TextureSlotKind::Color)
            .with_texture(material_channel::NORMAL, TextureSlotKind::Color)
            .with_texture(material_channel::OCCLUSION, TextureSlotKind::Color);
        let program = device.create_program(&desc)?;
        let gbuffer = GBuffer::new(device, width, height).map_err(|err| {
            device.destroy_program(program);
            err
        })?;
        Ok(Self { program, gbuffer })
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    /// Recreate the G-buffer at a new resolution
    pub fn resize(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32) -> BackendResult<()> {
        let gbuffer = GBuffer::new(device, width, height)?;
        std::mem::replace(&mut self.gbuffer, gbuffer).destroy(device);
        Ok(())
    }

    /// Fill the G-buffer from `data`; returns the same G-buffer on every call
    pub fn generate(&mut self, device: &mut dyn GraphicsDevice, data: &RenderData) -> &GBuffer {
        device.bind_framebuffer(Some(self.gbuffer.framebuffer));
        device.set_viewport(Viewport::new(self.gbuffer.width, self.gbuffer.height));
        device.clear(&ClearValues::color_and_depth([0.0; 4], CLEAR_DEPTH));

        let Some(camera) = data.camera else {
            log::warn!("GBufferGenerator: no camera in render data, geometry skipped");
            return &self.gbuffer;
        };

        let saved_depth = device.depth_state();
        device.use_program(Some(self.program));
        device.set_depth_state(DepthState::default());

        let view_projection = camera.view_projection_matrix();
        let mut draws = 0;
        for model in &data.models {
            draws += draw_model(device, model, view_projection);
        }
        device.set_depth_state(saved_depth);

        log::trace!("GBufferGenerator: {} draws from {} models", draws, data.models.len());
        &self.gbuffer
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_program(self.program);
        self.gbuffer.destroy(device);
    }
}

/// Draw the deferred primitives of every node of `model`
fn draw_model(device: &mut dyn GraphicsDevice, model: &Model, view_projection: Mat4) -> usize {
    let mut draws = 0;
    model.visit(|node| {
        if node.primitives.is_empty() {
            return;
        }
        let skin = node.skin.and_then(|index| model.skins().get(index));
        bindings::bind_node_transform(device, node.world, view_projection, skin);

        for primitive in &node.primitives {
            let Some(material) = model.materials.get(primitive.material) else {
                log::warn!(
                    "GBufferGenerator: '{}' references missing material {}",
                    node.name,
                    primitive.material
                );
                continue;
            };
            if !material.is_deferred() {
                continue;
            }

            let saved_cull = device.cull_mode();
            if material.double_sided {
                device.set_cull_mode(CullMode::None);
            }
            let bound = bindings::bind_material(device, material);
            device.draw_mesh(primitive.mesh);
            bindings::unbind_textures(device, &bound);
            device.set_cull_mode(saved_cull);
            draws += 1;
        }
    });
    draws
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::resources::{Joint, Material, Mesh, ModelNode, Skin};
    use crate::scene::{Camera, Projection, Transform};
    use glam::{Vec3, Vec4};

    fn camera() -> Camera {
        let mut camera = Camera::new(Projection::perspective(60.0, 1.0, 0.1, 100.0));
        camera.update_from_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)));
        camera
    }

    #[test]
    fn test_shader_validates() {
        let desc = ProgramDescriptor::new("gbuffer", GBUFFER_SHADER).with_uniforms(bindings::geometry_layout());
        assert!(validate_program(&desc).unwrap().has_fragment);
    }

    #[test]
    fn test_blend_primitives_are_skipped() {
        let mut device = HeadlessDevice::new(32, 32);
        let mut generator = GBufferGenerator::new(&mut device, 32, 32).unwrap();
        let mesh = Mesh::cube().upload(&mut device).unwrap();

        let mut model = Model::new("pair");
        let opaque = model.add_material(Material::plastic(Vec3::X));
        let glass = model.add_material(Material::glass());
        model
            .add_node(ModelNode::new("a", Default::default()).with_primitive(mesh, opaque), None)
            .unwrap();
        model
            .add_node(ModelNode::new("b", Default::default()).with_primitive(mesh, glass), None)
            .unwrap();
        model.update_world(Mat4::IDENTITY);

        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            models: vec![&model],
            ..Default::default()
        };
        generator.generate(&mut device, &data);

        let draws = device.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(
            draws[0].uniform("uMaterial.baseColorFactor"),
            Some(UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0)))
        );
    }

    #[test]
    fn test_double_sided_restores_cull_mode() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut generator = GBufferGenerator::new(&mut device, 16, 16).unwrap();
        let mesh = Mesh::quad(1.0, 1.0).upload(&mut device).unwrap();
        let mut model = Model::single("leaf", mesh, Material::foliage(Vec3::Y));
        model.update_world(Mat4::IDENTITY);

        device.set_cull_mode(CullMode::Front);
        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            models: vec![&model],
            ..Default::default()
        };
        generator.generate(&mut device, &data);

        assert_eq!(device.draws()[0].cull, CullMode::None);
        assert_eq!(device.cull_mode(), CullMode::Front);
        assert!(device.draws()[0].textures.is_empty());
    }

    #[test]
    fn test_children_drawn_without_parent_meshes() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut generator = GBufferGenerator::new(&mut device, 16, 16).unwrap();
        let mesh = Mesh::cube().upload(&mut device).unwrap();

        let mut model = Model::new("hierarchy");
        let material = model.add_material(Material::default());
        let root = model.add_node(ModelNode::new("empty", Default::default()), None).unwrap();
        model
            .add_node(ModelNode::new("child", Default::default()).with_primitive(mesh, material), Some(root))
            .unwrap();
        model.update_world(Mat4::IDENTITY);

        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            models: vec![&model],
            ..Default::default()
        };
        let gbuffer = generator.generate(&mut device, &data);
        let framebuffer = gbuffer.framebuffer;
        assert_eq!(device.draws().len(), 1);
        assert_eq!(device.draws()[0].framebuffer, Some(framebuffer));
    }

    #[test]
    fn test_skinned_node_uploads_joint_matrices() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut generator = GBufferGenerator::new(&mut device, 16, 16).unwrap();
        let mesh = Mesh::cube().upload(&mut device).unwrap();

        let mut model = Model::new("rig");
        let material = model.add_material(Material::default());
        let hips = model
            .add_node(ModelNode::new("hips", Transform::from_position(Vec3::new(0.0, 1.0, 0.0))), None)
            .unwrap();
        let spine = model
            .add_node(ModelNode::new("spine", Transform::from_position(Vec3::new(0.0, 0.5, 0.0))), Some(hips))
            .unwrap();
        let skin = model
            .add_skin(Skin::new(vec![
                Joint {
                    node: hips,
                    inverse_bind: Mat4::IDENTITY,
                },
                Joint {
                    node: spine,
                    inverse_bind: Mat4::from_translation(Vec3::new(0.0, -1.5, 0.0)),
                },
            ]))
            .unwrap();
        model
            .add_node(
                ModelNode::new("body", Default::default())
                    .with_primitive(mesh, material)
                    .with_skin(skin),
                None,
            )
            .unwrap();
        model.update_world(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
        model.update_joints();

        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            models: vec![&model],
            ..Default::default()
        };
        generator.generate(&mut device, &data);

        let draws = device.draws();
        assert_eq!(draws.len(), 1);
        let draw = &draws[0];
        let matrices = model.skins()[skin].joint_matrices();
        assert_eq!(draw.uniform("uIsSkinned"), Some(UniformValue::Bool(true)));
        assert_eq!(draw.uniform("uJointCount"), Some(UniformValue::UInt(2)));
        for (i, matrix) in matrices.iter().enumerate() {
            assert_eq!(
                draw.uniform(&format!("uJoints[{i}].jointMatrix")),
                Some(UniformValue::Mat4(*matrix))
            );
        }
        // hips sit at the model origin plus one unit up
        assert!(matrices[0].abs_diff_eq(Mat4::from_translation(Vec3::new(2.0, 1.0, 0.0)), 1e-5));
    }

    #[test]
    fn test_failed_creation_releases_program() {
        let mut device = HeadlessDevice::new(8, 8);
        let textures = device.texture_count();
        assert!(GBufferGenerator::new(&mut device, 0, 0).is_err());

        assert_eq!(device.program_count(), 0);
        assert_eq!(device.framebuffer_count(), 0);
        assert_eq!(device.texture_count(), textures);
    }

    #[test]
    fn test_without_camera_only_clears() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut generator = GBufferGenerator::new(&mut device, 8, 8).unwrap();
        generator.generate(&mut device, &RenderData::default());
        assert!(device.draws().is_empty());
        assert_eq!(device.clears().len(), 1);
    }
}
