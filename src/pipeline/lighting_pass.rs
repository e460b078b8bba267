//! Deferred light pass
//!
//! Reads the G-buffer and accumulates directional, point and spot lighting
//! with a Cook-Torrance BRDF, cascaded shadows for the first directional light
//! and split-sum image based lighting when both IBL maps are present.

use crate::backend::*;
use crate::pipeline::bindings::{self, light_channel};
use crate::pipeline::gbuffer::GBuffer;
use crate::pipeline::render_data::RenderData;
use crate::pipeline::shadow::ShadowMap;
use glam::{Mat4, Vec3};

/// WGSL source of the light pass program
pub const LIGHT_PASS_SHADER: &str = r#"
const PI: f32 = 3.14159265359;
const SHADOW_BIAS: f32 = 0.002;

struct LightBlock {
    inverse_view_projection: mat4x4<f32>,
    view: mat4x4<f32>,
    camera_position: vec3<f32>,
    directional_count: u32,
    point_count: u32,
    spot_count: u32,
    has_shadow: u32,
    z_near: f32,
    z_far: f32,
    cascade_count: u32,
    ibl_enabled: u32,
    prefiltered_mip_levels: f32,
}

struct DirectionalLight {
    color: vec3<f32>,
    intensity: f32,
    direction: vec3<f32>,
}

struct PointLight {
    color: vec3<f32>,
    intensity: f32,
    position: vec3<f32>,
    radius: f32,
}

struct SpotLight {
    color: vec3<f32>,
    intensity: f32,
    position: vec3<f32>,
    radius: f32,
    direction: vec3<f32>,
    cut_off: f32,
    outer_cut_off: f32,
}

struct Cascade {
    light_view_proj: mat4x4<f32>,
    split_value: f32,
}

@group(0) @binding(0) var<uniform> block: LightBlock;
@group(0) @binding(1) var<storage, read> directional_lights: array<DirectionalLight>;
@group(0) @binding(2) var<storage, read> point_lights: array<PointLight>;
@group(0) @binding(3) var<storage, read> spot_lights: array<SpotLight>;
@group(0) @binding(4) var<storage, read> cascades: array<Cascade>;

@group(0) @binding(16) var gbuffer_color: texture_2d<f32>;
@group(0) @binding(17) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(18) var gbuffer_emissive: texture_2d<f32>;
@group(0) @binding(19) var gbuffer_occlusion: texture_2d<f32>;
@group(0) @binding(20) var gbuffer_depth: texture_depth_2d;
@group(0) @binding(21) var brdf_lut: texture_2d<f32>;
@group(0) @binding(22) var irradiance_map: texture_cube<f32>;
@group(0) @binding(23) var prefiltered_map: texture_cube<f32>;
@group(0) @binding(24) var shadow_cascade_0: texture_depth_2d;
@group(0) @binding(25) var shadow_cascade_1: texture_depth_2d;
@group(0) @binding(26) var shadow_cascade_2: texture_depth_2d;
@group(0) @binding(27) var shadow_cascade_3: texture_depth_2d;
@group(0) @binding(32) var linear_sampler: sampler;
@group(0) @binding(33) var shadow_sampler: sampler_comparison;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(corner * 2.0 - 1.0, 1.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * denom * denom, 1e-6);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: vec3<f32>, roughness: f32) -> vec3<f32> {
    return f0 + (max(vec3<f32>(1.0 - roughness), f0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

struct Surface {
    albedo: vec3<f32>,
    normal: vec3<f32>,
    view_dir: vec3<f32>,
    roughness: f32,
    metallic: f32,
    f0: vec3<f32>,
}

fn radiance(surface: Surface, light_dir: vec3<f32>, light_color: vec3<f32>) -> vec3<f32> {
    let half_dir = normalize(surface.view_dir + light_dir);
    let n_dot_l = max(dot(surface.normal, light_dir), 0.0);
    let n_dot_v = max(dot(surface.normal, surface.view_dir), 1e-4);
    let n_dot_h = max(dot(surface.normal, half_dir), 0.0);

    let d = distribution_ggx(n_dot_h, surface.roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, surface.roughness);
    let f = fresnel_schlick(max(dot(half_dir, surface.view_dir), 0.0), surface.f0);

    let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 1e-4);
    let diffuse = (vec3<f32>(1.0) - f) * (1.0 - surface.metallic) * surface.albedo / PI;
    return (diffuse + specular) * light_color * n_dot_l;
}

fn range_attenuation(dist: f32, radius: f32) -> f32 {
    let ratio = clamp(1.0 - pow(dist / max(radius, 1e-4), 4.0), 0.0, 1.0);
    return ratio * ratio / (dist * dist + 1.0);
}

fn sample_cascade(index: u32, coords: vec2<f32>, depth: f32) -> f32 {
    var lit = 1.0;
    switch index {
        case 0u: {
            lit = textureSampleCompareLevel(shadow_cascade_0, shadow_sampler, coords, depth);
        }
        case 1u: {
            lit = textureSampleCompareLevel(shadow_cascade_1, shadow_sampler, coords, depth);
        }
        case 2u: {
            lit = textureSampleCompareLevel(shadow_cascade_2, shadow_sampler, coords, depth);
        }
        default: {
            lit = textureSampleCompareLevel(shadow_cascade_3, shadow_sampler, coords, depth);
        }
    }
    return lit;
}

fn shadow_factor(world_position: vec3<f32>) -> f32 {
    if block.has_shadow == 0u || block.cascade_count == 0u {
        return 1.0;
    }
    let view_depth = -(block.view * vec4<f32>(world_position, 1.0)).z;
    if view_depth < block.z_near || view_depth > block.z_far {
        return 1.0;
    }

    var index = block.cascade_count - 1u;
    for (var i = 0u; i < block.cascade_count; i++) {
        if view_depth <= cascades[i].split_value {
            index = i;
            break;
        }
    }

    let light_clip = cascades[index].light_view_proj * vec4<f32>(world_position, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let coords = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if any(coords < vec2<f32>(0.0)) || any(coords > vec2<f32>(1.0)) || ndc.z > 1.0 {
        return 1.0;
    }
    return sample_cascade(index, coords, ndc.z - SHADOW_BIAS);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let color = textureLoad(gbuffer_color, pixel, 0);
    let normal_roughness = textureLoad(gbuffer_normal, pixel, 0);
    let emissive = textureLoad(gbuffer_emissive, pixel, 0).rgb;
    let occlusion_metallic = textureLoad(gbuffer_occlusion, pixel, 0);
    let depth = textureLoad(gbuffer_depth, pixel, 0);

    let ndc = vec4<f32>(input.uv.x * 2.0 - 1.0, (1.0 - input.uv.y) * 2.0 - 1.0, depth, 1.0);
    let world = block.inverse_view_projection * ndc;
    let world_position = world.xyz / world.w;

    var surface: Surface;
    surface.albedo = color.rgb;
    surface.normal = normalize(normal_roughness.xyz);
    surface.view_dir = normalize(block.camera_position - world_position);
    surface.roughness = normal_roughness.w;
    surface.metallic = occlusion_metallic.g;
    surface.f0 = mix(vec3<f32>(0.04), surface.albedo, vec3<f32>(surface.metallic));
    let occlusion = occlusion_metallic.r;

    var lighting = vec3<f32>(0.0);

    for (var i = 0u; i < block.directional_count; i++) {
        let light = directional_lights[i];
        var visibility = 1.0;
        if i == 0u {
            visibility = shadow_factor(world_position);
        }
        lighting += radiance(surface, normalize(-light.direction), light.color * light.intensity) * visibility;
    }

    for (var i = 0u; i < block.point_count; i++) {
        let light = point_lights[i];
        let to_light = light.position - world_position;
        let dist = length(to_light);
        let attenuation = range_attenuation(dist, light.radius);
        lighting += radiance(surface, to_light / max(dist, 1e-4), light.color * light.intensity * attenuation);
    }

    for (var i = 0u; i < block.spot_count; i++) {
        let light = spot_lights[i];
        let to_light = light.position - world_position;
        let dist = length(to_light);
        let light_dir = to_light / max(dist, 1e-4);
        let theta = dot(light_dir, normalize(-light.direction));
        let epsilon = max(light.cut_off - light.outer_cut_off, 1e-4);
        let cone = clamp((theta - light.outer_cut_off) / epsilon, 0.0, 1.0);
        let attenuation = range_attenuation(dist, light.radius) * cone;
        lighting += radiance(surface, light_dir, light.color * light.intensity * attenuation);
    }

    var ambient = vec3<f32>(0.03) * surface.albedo;
    if block.ibl_enabled != 0u {
        let n_dot_v = max(dot(surface.normal, surface.view_dir), 0.0);
        let f = fresnel_schlick_roughness(n_dot_v, surface.f0, surface.roughness);
        let kd = (vec3<f32>(1.0) - f) * (1.0 - surface.metallic);
        let irradiance = textureSampleLevel(irradiance_map, linear_sampler, surface.normal, 0.0).rgb;
        let reflected = reflect(-surface.view_dir, surface.normal);
        let lod = surface.roughness * max(block.prefiltered_mip_levels - 1.0, 0.0);
        let prefiltered = textureSampleLevel(prefiltered_map, linear_sampler, reflected, lod).rgb;
        let brdf = textureSampleLevel(brdf_lut, linear_sampler, vec2<f32>(n_dot_v, surface.roughness), 0.0).rg;
        ambient = kd * irradiance * surface.albedo + prefiltered * (f * brdf.x + brdf.y);
    }

    return vec4<f32>(lighting + ambient * occlusion + emissive, 1.0);
}
"#;

/// Inputs of one light pass invocation
#[derive(Default, Clone, Copy)]
pub struct LightPassInputs<'a> {
    gbuffer: Option<&'a GBuffer>,
    render_data: Option<&'a RenderData<'a>>,
    shadow_map: Option<&'a ShadowMap>,
    brdf_lut: Option<TextureHandle>,
}

impl<'a> LightPassInputs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gbuffer(mut self, gbuffer: &'a GBuffer) -> Self {
        self.gbuffer = Some(gbuffer);
        self
    }

    pub fn with_render_data(mut self, render_data: &'a RenderData<'a>) -> Self {
        self.render_data = Some(render_data);
        self
    }

    /// Shadow map to sample; an inactive map counts as absent
    pub fn with_shadow_map(mut self, shadow_map: Option<&'a ShadowMap>) -> Self {
        self.shadow_map = shadow_map.filter(|map| map.is_active());
        self
    }

    pub fn with_brdf_lut(mut self, brdf_lut: TextureHandle) -> Self {
        self.brdf_lut = Some(brdf_lut);
        self
    }
}

/// Deferred light pass renderer
pub struct LightPass {
    program: ProgramHandle,
}

impl LightPass {
    pub fn new(device: &mut dyn GraphicsDevice) -> BackendResult<Self> {
        let desc = bindings::light_texture_slots().into_iter().fold(
            ProgramDescriptor::new("light pass", LIGHT_PASS_SHADER).with_uniforms(bindings::light_layout()),
            |desc, (channel, kind)| desc.with_texture(channel, kind),
        );
        let program = device.create_program(&desc)?;
        Ok(Self { program })
    }

    /// Shade the G-buffer into the bound framebuffer.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` lacks the G-buffer or the render data.
    pub fn render(&self, device: &mut dyn GraphicsDevice, inputs: &LightPassInputs) {
        let gbuffer = inputs.gbuffer.expect("light pass requires a G-buffer");
        let data = inputs.render_data.expect("light pass requires render data");

        let mut bound = vec![
            light_channel::GBUFFER_COLOR,
            light_channel::GBUFFER_NORMAL,
            light_channel::GBUFFER_EMISSIVE,
            light_channel::GBUFFER_OCCLUSION,
            light_channel::GBUFFER_DEPTH,
        ];
        for (channel, texture) in bound.iter().zip(gbuffer.color_targets().into_iter().chain([gbuffer.depth])) {
            device.bind_texture(*channel, texture);
        }
        if let Some(lut) = inputs.brdf_lut {
            device.bind_texture(light_channel::BRDF_LUT, lut);
            bound.push(light_channel::BRDF_LUT);
        }

        let ibl = match (data.irradiance_map, data.prefiltered_map) {
            (Some(irradiance), Some(prefiltered)) => {
                device.bind_texture(light_channel::IRRADIANCE, irradiance);
                device.bind_texture(light_channel::PREFILTERED, prefiltered);
                bound.extend([light_channel::IRRADIANCE, light_channel::PREFILTERED]);
                true
            }
            _ => false,
        };

        device.use_program(Some(self.program));
        bound.extend(bindings::bind_shadow(device, inputs.shadow_map));

        let (inverse_view_projection, view, position) = match data.camera {
            Some(camera) => (
                camera.inverse_view_projection_matrix(),
                camera.view_matrix(),
                camera.position(),
            ),
            None => (Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO),
        };
        device.set_uniform("uCamera.inverseViewProjection", inverse_view_projection.into());
        device.set_uniform("uCamera.view", view.into());
        device.set_uniform("uCamera.position", position.into());
        bindings::bind_lights(device, data);
        device.set_uniform("uIbl.enabled", ibl.into());
        device.set_uniform("uIbl.prefilteredMipLevels", (data.prefiltered_mip_levels as f32).into());

        let saved_depth = device.depth_state();
        device.set_depth_state(DepthState {
            compare: CompareFunction::NotEqual,
            write: false,
        });
        device.draw_fullscreen();
        device.set_depth_state(saved_depth);

        bindings::unbind_textures(device, &bound);
        log::trace!(
            "LightPass: {} directional, {} point, {} spot, shadow: {}, ibl: {}",
            data.directional_lights.len(),
            data.point_lights.len(),
            data.spot_lights.len(),
            inputs.shadow_map.is_some(),
            ibl
        );
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::pipeline::gbuffer::GBuffer;
    use crate::scene::{PointLight, SpotLight};

    #[test]
    fn test_shader_validates() {
        let desc = ProgramDescriptor::new("light pass", LIGHT_PASS_SHADER).with_uniforms(bindings::light_layout());
        assert!(validate_program(&desc).unwrap().has_fragment);
    }

    #[test]
    #[should_panic(expected = "requires a G-buffer")]
    fn test_missing_gbuffer_panics() {
        let mut device = HeadlessDevice::new(4, 4);
        let pass = LightPass::new(&mut device).unwrap();
        let data = RenderData::default();
        pass.render(&mut device, &LightPassInputs::new().with_render_data(&data));
    }

    #[test]
    #[should_panic(expected = "requires render data")]
    fn test_missing_render_data_panics() {
        let mut device = HeadlessDevice::new(4, 4);
        let pass = LightPass::new(&mut device).unwrap();
        let gbuffer = GBuffer::new(&mut device, 4, 4).unwrap();
        pass.render(&mut device, &LightPassInputs::new().with_gbuffer(&gbuffer));
    }

    #[test]
    fn test_light_arrays_and_unbinding() {
        let mut device = HeadlessDevice::new(8, 8);
        let pass = LightPass::new(&mut device).unwrap();
        let gbuffer = GBuffer::new(&mut device, 8, 8).unwrap();

        let point = PointLight::new(Vec3::ONE, 3.0, 5.0);
        let spot = SpotLight::default();
        let data = RenderData {
            point_lights: vec![&point, &point],
            spot_lights: vec![&spot],
            ..Default::default()
        };
        let inputs = LightPassInputs::new().with_gbuffer(&gbuffer).with_render_data(&data);
        pass.render(&mut device, &inputs);

        let draw = &device.draws()[0];
        assert_eq!(draw.uniform("uLights.pointCount"), Some(UniformValue::UInt(2)));
        assert_eq!(draw.uniform("uLights.spotCount"), Some(UniformValue::UInt(1)));
        assert_eq!(draw.uniform("uLights.point[1].base.intensity"), Some(UniformValue::Float(3.0)));
        assert_eq!(draw.uniform("uShadow.hasShadow"), Some(UniformValue::Bool(false)));
        assert_eq!(draw.textures.get(&light_channel::GBUFFER_DEPTH), Some(&gbuffer.depth));
        assert_eq!(
            draw.depth,
            DepthState {
                compare: CompareFunction::NotEqual,
                write: false
            }
        );
        for channel in 0..16 {
            assert_eq!(device.bound_texture(channel), None);
        }
    }
}
