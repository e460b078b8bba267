//! Skybox pass
//!
//! Draws a unit cube around the camera sampling the environment cubemap. The
//! projected depth is forced to the far plane so the cube only covers pixels
//! the G-buffer left at the cleared depth.

use crate::backend::*;
use crate::pipeline::bindings::{self, SKYBOX_CHANNEL};
use crate::pipeline::render_data::RenderData;
use crate::resources::Mesh;
use crate::scene::Camera;
use glam::{Mat3, Mat4};

/// WGSL source of the skybox program
pub const SKYBOX_SHADER: &str = r#"
struct SkyboxBlock {
    view_projection: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> block: SkyboxBlock;
@group(0) @binding(16) var environment_map: texture_cube<f32>;
@group(0) @binding(32) var environment_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = block.view_projection * vec4<f32>(position, 1.0);
    out.direction = position;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(textureSample(environment_map, environment_sampler, normalize(input.direction)).rgb, 1.0);
}
"#;

/// View-projection that keeps the camera at the cube's center and maps every
/// vertex onto the far plane
pub fn skybox_view_projection(camera: &Camera) -> Mat4 {
    let rotation = Mat4::from_mat3(Mat3::from_mat4(camera.view_matrix()));
    let mut view_projection = camera.projection_matrix() * rotation;
    view_projection.x_axis.z = view_projection.x_axis.w;
    view_projection.y_axis.z = view_projection.y_axis.w;
    view_projection.z_axis.z = view_projection.z_axis.w;
    view_projection.w_axis.z = view_projection.w_axis.w;
    view_projection
}

/// Skybox renderer
pub struct SkyboxPass {
    program: ProgramHandle,
    cube: MeshHandle,
}

impl SkyboxPass {
    pub fn new(device: &mut dyn GraphicsDevice) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("skybox", SKYBOX_SHADER)
            .with_uniforms(bindings::skybox_layout())
            .with_texture(SKYBOX_CHANNEL, TextureSlotKind::Cube);
        let program = device.create_program(&desc)?;
        let cube = Mesh::cube().upload(device)?;
        Ok(Self { program, cube })
    }

    /// Draw the environment map into the bound framebuffer.
    ///
    /// Returns `false` without drawing when there is no camera or
    /// environment map.
    pub fn render(&self, device: &mut dyn GraphicsDevice, data: &RenderData) -> bool {
        let (Some(camera), Some(environment)) = (data.camera, data.environment_map) else {
            return false;
        };

        let saved_depth = device.depth_state();
        let saved_cull = device.cull_mode();
        device.set_depth_state(DepthState {
            compare: CompareFunction::LessEqual,
            write: false,
        });
        device.set_cull_mode(CullMode::None);

        device.use_program(Some(self.program));
        device.set_uniform("uMatrices.viewProjection", skybox_view_projection(camera).into());
        device.bind_texture(SKYBOX_CHANNEL, environment);
        device.draw_mesh(self.cube);
        device.unbind_texture(SKYBOX_CHANNEL);

        device.set_depth_state(saved_depth);
        device.set_cull_mode(saved_cull);
        true
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_mesh(self.cube);
        device.destroy_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::resources::TextureData;
    use crate::scene::Projection;
    use glam::{Vec3, Vec4Swizzles};

    fn camera() -> Camera {
        let mut camera = Camera::new(Projection::perspective(70.0, 1.0, 0.1, 100.0));
        camera.update_from_world(Mat4::from_translation(Vec3::new(3.0, 1.0, -2.0)));
        camera
    }

    #[test]
    fn test_shader_validates() {
        let desc = ProgramDescriptor::new("skybox", SKYBOX_SHADER).with_uniforms(bindings::skybox_layout());
        assert!(validate_program(&desc).unwrap().has_fragment);
    }

    #[test]
    fn test_projected_depth_is_far_plane() {
        let view_projection = skybox_view_projection(&camera());
        for direction in [Vec3::new(0.2, 0.1, -1.0), Vec3::new(-0.5, 0.4, -0.7)] {
            let clip = view_projection * direction.extend(1.0);
            assert!((clip.z / clip.w - 1.0).abs() < 1e-6, "{:?}", clip.xyz());
        }
    }

    #[test]
    fn test_covers_only_cleared_depth() {
        let mut device = HeadlessDevice::new(16, 16);
        let skybox = SkyboxPass::new(&mut device).unwrap();
        let sky = TextureData::sky(4, [90, 140, 220, 255], [200, 210, 230, 255], [40, 40, 40, 255])
            .upload(&mut device)
            .unwrap();

        // left half already holds geometry at depth 0.5
        let depth = device.default_depth_texture();
        let color = device.default_color_texture();
        device.clear(&ClearValues::color_and_depth([0.0; 4], 1.0));
        let fill = device
            .create_program(&ProgramDescriptor::new(
                "fill",
                "@vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> { return vec4<f32>(p, 1.0); }",
            ))
            .unwrap();
        let half = Mesh {
            name: "left half".to_string(),
            vertices: [(-1.0, -1.0), (0.0, -1.0), (0.0, 1.0), (-1.0, 1.0)]
                .map(|(x, y)| Vertex::new(Vec3::new(x, y, 0.5), Vec3::Z, glam::Vec2::ZERO))
                .to_vec(),
            indices: vec![0, 1, 2, 0, 2, 3],
            topology: PrimitiveTopology::TriangleList,
        }
        .upload(&mut device)
        .unwrap();
        device.use_program(Some(fill));
        device.draw_mesh(half);

        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            environment_map: Some(sky),
            ..Default::default()
        };
        assert!(skybox.render(&mut device, &data));

        let draw = device.draws().last().unwrap();
        assert_eq!(draw.program_label, "skybox");
        assert_eq!(draw.cull, CullMode::None);
        assert_eq!(device.pixel(color, 12, 4), Some([1.0; 4]));
        assert_eq!(device.pixel(color, 3, 4), Some([0.0; 4]));
        assert!(device.depth_at(depth, 3, 4).is_some_and(|d| (d - 0.5).abs() < 1e-5));
        assert_eq!(device.depth_at(depth, 12, 4), Some(1.0));
        assert_eq!(device.bound_texture(SKYBOX_CHANNEL), None);
        assert_eq!(device.depth_state(), DepthState::default());
    }

    #[test]
    fn test_skipped_without_environment() {
        let mut device = HeadlessDevice::new(4, 4);
        let skybox = SkyboxPass::new(&mut device).unwrap();
        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            ..Default::default()
        };
        assert!(!skybox.render(&mut device, &data));
        assert!(device.draws().is_empty());
    }
}
