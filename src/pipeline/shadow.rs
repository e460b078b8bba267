//! Cascaded shadow map for the first directional light
//!
//! The camera range from its near plane out to the shadow distance is split
//! into cascades. Each cascade owns a depth texture rendered from an
//! orthographic light-space projection fitted to its slice of the view
//! frustum. The light pass picks a cascade by comparing view-space depth
//! against each cascade's split value.

use crate::backend::*;
use crate::pipeline::bindings::{self, SHADOW_CASCADE_COUNT};
use crate::pipeline::render_data::RenderData;
use crate::resources::Model;
use crate::ShadowConfig;
use glam::{Mat4, Vec3};

/// WGSL source of the depth-only shadow program
pub const SHADOW_SHADER: &str = r#"
struct ShadowBlock {
    world: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    is_skinned: u32,
    joint_count: u32,
}

struct Joint {
    joint_matrix: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> block: ShadowBlock;
@group(0) @binding(1) var<storage, read> joints: array<Joint>;

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(4) joint_indices: vec4<u32>,
    @location(5) joint_weights: vec4<f32>,
) -> @builtin(position) vec4<f32> {
    var model = block.world;
    if block.is_skinned != 0u && block.joint_count > 0u {
        model = mat4x4<f32>();
        for (var i = 0u; i < 4u; i++) {
            let joint = min(joint_indices[i], block.joint_count - 1u);
            model += joints[joint].joint_matrix * joint_weights[i];
        }
    }
    return block.view_projection * model * vec4<f32>(position, 1.0);
}
"#;

/// Fraction of the light-space depth range added toward the light so casters
/// outside the cascade slice still land in the map
const DEPTH_EXTENSION: f32 = 2.0;

/// Split distances in view space for `count` cascades between `near` and
/// `far`, blending uniform and logarithmic schemes by `lambda`
pub fn compute_cascade_splits(near: f32, far: f32, lambda: f32, count: usize) -> Vec<f32> {
    let near = near.max(1e-3);
    let far = far.max(near + 1e-3);
    let lambda = lambda.clamp(0.0, 1.0);
    (1..=count)
        .map(|i| {
            let p = i as f32 / count as f32;
            let uniform = near + (far - near) * p;
            let log = near * (far / near).powf(p);
            uniform + (log - uniform) * lambda
        })
        .collect()
}

/// Orthographic light view-projection enclosing a frustum slice, with its
/// footprint snapped to whole shadow-map texels
pub fn build_cascade_matrix(corners: &[Vec3; 8], direction: Vec3, resolution: u32) -> Mat4 {
    let direction = direction.normalize_or_zero();
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let radius = corners
        .iter()
        .map(|corner| corner.distance(center))
        .fold(0.0f32, f32::max)
        .max(1e-3);

    let up = if direction.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };
    let view = Mat4::look_at_rh(center - direction * radius, center, up);

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in corners {
        let light_space = view.transform_point3(*corner);
        min = min.min(light_space);
        max = max.max(light_space);
    }
    max.z += (max.z - min.z).max(radius) * DEPTH_EXTENSION;

    let texel = ((max.x - min.x).max(max.y - min.y) / resolution.max(1) as f32).max(f32::EPSILON);
    min.x = (min.x / texel).floor() * texel;
    min.y = (min.y / texel).floor() * texel;
    max.x = (max.x / texel).ceil() * texel;
    max.y = (max.y / texel).ceil() * texel;

    Mat4::orthographic_rh(min.x, max.x, min.y, max.y, -max.z, -min.z) * view
}

/// One shadow cascade
#[derive(Debug, Clone)]
pub struct Cascade {
    pub view_projection: Mat4,
    /// Far bound of the cascade in view-space depth
    pub split_depth: f32,
    pub texture: TextureHandle,
    framebuffer: FramebufferHandle,
}

impl Cascade {
    fn new(device: &mut dyn GraphicsDevice, index: usize, resolution: u32) -> BackendResult<Self> {
        let label = format!("shadow cascade {index}");
        let texture = device.create_texture(&TextureDescriptor::render_target(
            &label,
            resolution,
            resolution,
            TextureFormat::Depth32Float,
        ))?;
        let framebuffer = device
            .create_framebuffer(&FramebufferDescriptor {
                label: Some(label),
                color_attachments: Vec::new(),
                depth_attachment: Some(texture),
            })
            .map_err(|err| {
                device.destroy_texture(texture);
                err
            })?;
        Ok(Self {
            view_projection: Mat4::IDENTITY,
            split_depth: 0.0,
            texture,
            framebuffer,
        })
    }

    fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_framebuffer(self.framebuffer);
        device.destroy_texture(self.texture);
    }
}

/// Cascaded shadow map
pub struct ShadowMap {
    program: ProgramHandle,
    cascades: Vec<Cascade>,
    resolution: u32,
    split_lambda: f32,
    shadow_distance: f32,
    z_near: f32,
    z_far: f32,
    active: bool,
}

impl ShadowMap {
    pub fn new(device: &mut dyn GraphicsDevice, config: &ShadowConfig) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("shadow depth", SHADOW_SHADER).with_uniforms(bindings::shadow_layout());
        let program = device.create_program(&desc)?;

        let mut cascades = Vec::with_capacity(SHADOW_CASCADE_COUNT);
        for i in 0..SHADOW_CASCADE_COUNT {
            match Cascade::new(device, i, config.resolution) {
                Ok(cascade) => cascades.push(cascade),
                Err(err) => {
                    for cascade in cascades {
                        cascade.destroy(device);
                    }
                    device.destroy_program(program);
                    return Err(err);
                }
            }
        }

        log::info!(
            "ShadowMap: {} cascades at {}x{}",
            SHADOW_CASCADE_COUNT,
            config.resolution,
            config.resolution
        );
        Ok(Self {
            program,
            cascades,
            resolution: config.resolution,
            split_lambda: config.split_lambda,
            shadow_distance: config.shadow_distance,
            z_near: 0.0,
            z_far: 0.0,
            active: false,
        })
    }

    pub fn cascades(&self) -> &[Cascade] {
        &self.cascades
    }

    /// View-space depth where the first cascade starts
    pub fn z_near(&self) -> f32 {
        self.z_near
    }

    /// View-space depth where the last cascade ends
    pub fn z_far(&self) -> f32 {
        self.z_far
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Whether the last render produced usable cascades
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Render every cascade for the first directional light of `data`.
    ///
    /// Leaves the map inactive when there is no camera, no directional light,
    /// or the light's direction is degenerate.
    /// Device binding state is restored afterwards.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice, data: &RenderData) {
        self.active = false;
        let Some(camera) = data.camera else {
            return;
        };
        let Some(light) = data.directional_lights.first() else {
            log::warn!("ShadowMap: no directional light, shadows skipped");
            return;
        };
        if light.direction.length_squared() < 1e-8 {
            log::warn!("ShadowMap: directional light has no direction, shadows skipped");
            return;
        }

        self.z_near = camera.near();
        self.z_far = (camera.near() + self.shadow_distance).min(camera.far());
        let splits = compute_cascade_splits(self.z_near, self.z_far, self.split_lambda, self.cascades.len());

        let saved_framebuffer = device.bound_framebuffer();
        let saved_program = device.bound_program();
        let saved_depth = device.depth_state();
        let saved_cull = device.cull_mode();
        let saved_viewport = device.viewport();

        device.use_program(Some(self.program));
        device.set_depth_state(DepthState::default());
        device.set_cull_mode(CullMode::None);
        device.set_viewport(Viewport::new(self.resolution, self.resolution));

        let mut slice_near = self.z_near;
        for (cascade, split) in self.cascades.iter_mut().zip(splits) {
            let corners = camera.frustum_corners(slice_near, split);
            cascade.view_projection = build_cascade_matrix(&corners, light.direction, self.resolution);
            cascade.split_depth = split;
            slice_near = split;

            device.bind_framebuffer(Some(cascade.framebuffer));
            device.clear(&ClearValues::depth(1.0));
            for model in &data.models {
                draw_casters(device, model, cascade.view_projection);
            }
        }

        device.bind_framebuffer(saved_framebuffer);
        device.use_program(saved_program);
        device.set_depth_state(saved_depth);
        device.set_cull_mode(saved_cull);
        device.set_viewport(saved_viewport);

        self.active = true;
        log::trace!("ShadowMap: rendered splits up to {:.2}", self.z_far);
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        for cascade in self.cascades {
            cascade.destroy(device);
        }
        device.destroy_program(self.program);
    }
}

/// Draw opaque and masked primitives of `model` into the bound cascade
fn draw_casters(device: &mut dyn GraphicsDevice, model: &Model, view_projection: Mat4) {
    model.visit(|node| {
        let casters: Vec<_> = node
            .primitives
            .iter()
            .filter(|p| model.materials.get(p.material).is_some_and(|m| m.is_deferred()))
            .collect();
        if casters.is_empty() {
            return;
        }
        let skin = node.skin.and_then(|index| model.skins().get(index));
        bindings::bind_node_transform(device, node.world, view_projection, skin);
        for primitive in casters {
            device.draw_mesh(primitive.mesh);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Camera, DirectionalLight, Projection};
    use glam::Vec4Swizzles;
    use rstest::rstest;

    fn camera() -> Camera {
        let mut camera = Camera::new(Projection::perspective(60.0, 1.5, 0.1, 200.0));
        camera.update_from_world(Mat4::from_translation(Vec3::new(0.0, 2.0, 10.0)));
        camera
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.5)]
    #[case(1.0)]
    fn test_splits_increase_to_far(#[case] lambda: f32) {
        let splits = compute_cascade_splits(0.1, 50.0, lambda, 4);
        assert_eq!(splits.len(), 4);
        assert!(splits.windows(2).all(|w| w[0] < w[1]));
        assert!((splits[3] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_uniform_splits_are_even() {
        let splits = compute_cascade_splits(10.0, 50.0, 0.0, 4);
        assert_eq!(splits, vec![20.0, 30.0, 40.0, 50.0]);
    }

    #[rstest]
    #[case(Vec3::new(-0.3, -1.0, -0.2))]
    #[case(Vec3::new(0.0, -1.0, 0.0))]
    #[case(Vec3::new(1.0, -0.2, 0.0))]
    fn test_cascade_matrix_encloses_slice(#[case] direction: Vec3) {
        let camera = camera();
        let corners = camera.frustum_corners(0.5, 12.0);
        let matrix = build_cascade_matrix(&corners, direction, 1024);
        for corner in corners {
            let clip = matrix * corner.extend(1.0);
            let ndc = clip.xyz() / clip.w;
            assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4, "{ndc:?}");
            assert!((-1e-4..=1.0 + 1e-4).contains(&ndc.z), "{ndc:?}");
        }
    }

    #[test]
    fn test_render_restores_state_and_fills_cascades() {
        let mut device = HeadlessDevice::new(64, 64);
        let config = ShadowConfig::default().with_resolution(64);
        let mut shadow_map = ShadowMap::new(&mut device, &config).unwrap();

        let mesh = Mesh::cube().upload(&mut device).unwrap();
        let mut model = Model::single("box", mesh, Material::default());
        model.update_world(Mat4::IDENTITY);
        let glass = Model::single("glass", mesh, Material::glass());

        // looking straight down at the box, which sits inside the first cascade
        let mut camera = camera();
        camera.update_from_world(Mat4::look_at_rh(Vec3::new(0.0, 3.0, 0.0), Vec3::ZERO, Vec3::Z).inverse());
        let mut light = DirectionalLight::default();
        light.direction = -Vec3::Y;
        let data = RenderData {
            camera: Some(&camera),
            directional_lights: vec![&light],
            models: vec![&model, &glass],
            ..Default::default()
        };

        device.set_cull_mode(CullMode::Front);
        device.set_viewport(Viewport::new(64, 64));
        shadow_map.render(&mut device, &data);

        assert!(shadow_map.is_active());
        assert_eq!(device.draws().len(), SHADOW_CASCADE_COUNT);
        assert!(device.draws().iter().all(|d| d.program_label == "shadow depth"));
        assert_eq!(device.cull_mode(), CullMode::Front);
        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.bound_program(), None);

        let first = &shadow_map.cascades()[0];
        let covered = (0..64u32)
            .flat_map(|y| (0..64u32).map(move |x| (x, y)))
            .filter(|(x, y)| device.depth_at(first.texture, *x, *y).is_some_and(|d| d < 1.0))
            .count();
        assert!(covered > 0);
    }

    #[test]
    fn test_failed_creation_releases_program() {
        let mut device = HeadlessDevice::new(8, 8);
        let textures = device.texture_count();
        assert!(ShadowMap::new(&mut device, &ShadowConfig::default().with_resolution(0)).is_err());

        assert_eq!(device.program_count(), 0);
        assert_eq!(device.framebuffer_count(), 0);
        assert_eq!(device.texture_count(), textures);
    }

    #[test]
    fn test_inactive_without_directional_light() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut shadow_map = ShadowMap::new(&mut device, &ShadowConfig::default().with_resolution(8)).unwrap();
        let camera = camera();
        let data = RenderData {
            camera: Some(&camera),
            ..Default::default()
        };
        shadow_map.render(&mut device, &data);
        assert!(!shadow_map.is_active());
        assert!(device.draws().is_empty());
    }

    #[test]
    fn test_inactive_for_zero_scaled_light() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut shadow_map = ShadowMap::new(&mut device, &ShadowConfig::default().with_resolution(8)).unwrap();
        let camera = camera();
        let mut light = DirectionalLight::default();
        light.update_from_world(Mat4::from_scale(Vec3::ZERO));
        assert_eq!(light.direction, Vec3::ZERO);
        let data = RenderData {
            camera: Some(&camera),
            directional_lights: vec![&light],
            ..Default::default()
        };

        shadow_map.render(&mut device, &data);
        assert!(!shadow_map.is_active());
        assert!(device.draws().is_empty());
        assert!(shadow_map.cascades().iter().all(|c| c.view_projection.is_finite()));
    }
}
