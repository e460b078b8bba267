//! Split-sum BRDF integration lookup table
//!
//! Baked once at startup into a two-channel float texture indexed by
//! (N·V, roughness). Red holds the scale and green the bias applied to F0.

use crate::backend::*;

/// Two-channel half float format of the lookup table
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// WGSL source of the bake program
pub const BRDF_LUT_SHADER: &str = r#"
const PI: f32 = 3.14159265359;
const SAMPLE_COUNT: u32 = 256u;

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

fn hammersley(i: u32, count: u32) -> vec2<f32> {
    let radical_inverse = f32(reverseBits(i)) * 2.3283064365386963e-10;
    return vec2<f32>(f32(i) / f32(count), radical_inverse);
}

fn importance_sample_ggx(xi: vec2<f32>, roughness: f32) -> vec3<f32> {
    let a = roughness * roughness;
    let phi = 2.0 * PI * xi.x;
    let cos_theta = sqrt((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y));
    let sin_theta = sqrt(1.0 - cos_theta * cos_theta);
    // tangent space with N = +Z
    return vec3<f32>(cos(phi) * sin_theta, sin(phi) * sin_theta, cos_theta);
}

fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn integrate(n_dot_v: f32, roughness: f32) -> vec2<f32> {
    let v = vec3<f32>(sqrt(1.0 - n_dot_v * n_dot_v), 0.0, n_dot_v);
    var scale = 0.0;
    var bias = 0.0;
    for (var i = 0u; i < SAMPLE_COUNT; i++) {
        let h = importance_sample_ggx(hammersley(i, SAMPLE_COUNT), roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);
        let n_dot_l = max(l.z, 0.0);
        let n_dot_h = max(h.z, 0.0);
        let v_dot_h = max(dot(v, h), 0.0);
        if n_dot_l > 0.0 {
            let g = geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
            let g_vis = g * v_dot_h / max(n_dot_h * n_dot_v, 1e-4);
            let fc = pow(1.0 - v_dot_h, 5.0);
            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }
    return vec2<f32>(scale, bias) / f32(SAMPLE_COUNT);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let n_dot_v = max(input.uv.x, 1e-3);
    let roughness = input.uv.y;
    return vec4<f32>(integrate(n_dot_v, roughness), 0.0, 1.0);
}
"#;

/// Baked BRDF lookup table
pub struct BrdfLut {
    texture: TextureHandle,
    size: u32,
}

impl BrdfLut {
    /// Bake the table at `size`², then restore the viewport to the
    /// application resolution `(width, height)`
    pub fn bake(device: &mut dyn GraphicsDevice, size: u32, resolution: (u32, u32)) -> BackendResult<Self> {
        let program = device.create_program(&ProgramDescriptor::new("brdf lut", BRDF_LUT_SHADER))?;
        let texture = match device.create_texture(&TextureDescriptor::render_target(
            "brdf lut",
            size,
            size,
            BRDF_LUT_FORMAT,
        )) {
            Ok(texture) => texture,
            Err(err) => {
                device.destroy_program(program);
                return Err(err);
            }
        };

        let drawn = Self::draw(device, program, texture, size);
        device.set_viewport(Viewport::new(resolution.0, resolution.1));
        device.destroy_program(program);
        if let Err(err) = drawn {
            device.destroy_texture(texture);
            return Err(err);
        }

        log::info!("BrdfLut: baked {}x{}", size, size);
        Ok(Self { texture, size })
    }

    /// Run the bake program once over `texture`; bindings are restored even
    /// when submission fails
    fn draw(
        device: &mut dyn GraphicsDevice,
        program: ProgramHandle,
        texture: TextureHandle,
        size: u32,
    ) -> BackendResult<()> {
        let framebuffer = device.create_framebuffer(&FramebufferDescriptor {
            label: Some("brdf lut".to_string()),
            color_attachments: vec![texture],
            depth_attachment: None,
        })?;

        let saved_framebuffer = device.bound_framebuffer();
        let saved_program = device.bound_program();
        let saved_depth = device.depth_state();

        device.bind_framebuffer(Some(framebuffer));
        device.set_viewport(Viewport::new(size, size));
        device.use_program(Some(program));
        device.set_depth_state(DepthState {
            compare: CompareFunction::Always,
            write: false,
        });
        device.draw_fullscreen();
        let submitted = device.submit();

        device.bind_framebuffer(saved_framebuffer);
        device.use_program(saved_program);
        device.set_depth_state(saved_depth);
        device.destroy_framebuffer(framebuffer);
        submitted
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;

    #[test]
    fn test_shader_validates() {
        assert!(validate_program(&ProgramDescriptor::new("brdf lut", BRDF_LUT_SHADER))
            .unwrap()
            .has_fragment);
    }

    #[test]
    fn test_bake_restores_configured_viewport() {
        let mut device = HeadlessDevice::new(320, 200);
        device.set_viewport(Viewport::new(10, 10));
        let lut = BrdfLut::bake(&mut device, 64, (320, 200)).unwrap();

        assert_eq!(device.viewport(), Viewport::new(320, 200));
        assert_eq!(device.draws().len(), 1);
        assert_eq!(device.draws()[0].viewport, Viewport::new(64, 64));
        assert_eq!(device.draws()[0].fragments, 64 * 64);
        assert_eq!(device.bound_framebuffer(), None);

        let desc = device.texture_descriptor(lut.texture()).unwrap();
        assert_eq!((desc.width, desc.format), (64, BRDF_LUT_FORMAT));
        // scratch program and framebuffer are released
        assert_eq!(device.program_count(), 0);
        assert_eq!(device.framebuffer_count(), 0);
    }
    #[test]
    fn test_failed_bake_releases_scratch_resources() {
        let mut device = HeadlessDevice::new(8, 8);
        let textures = device.texture_count();
        assert!(BrdfLut::bake(&mut device, 0, (8, 8)).is_err());

        assert_eq!(device.program_count(), 0);
        assert_eq!(device.framebuffer_count(), 0);
        assert_eq!(device.texture_count(), textures);
    }
}
