//! Headless reference device.
//!
//! Performs no GPU work. It tracks the full binding state, records every draw
//! together with the state it was issued under, and rasterizes triangle meshes
//! and full-screen draws into CPU-side attachments so that tests can inspect
//! depth and color results without GPU hardware.
//!
//! Fragment shading is not emulated: a program with a fragment stage writes
//! `uMaterial.baseColorFactor` (white when unset) to every color attachment.

use crate::backend::shader::{validate_program, ProgramDescriptor};
use crate::backend::state::StateTracker;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::uniforms::{ProgramUniforms, UniformValue};
use glam::{Mat4, Vec2, Vec4};
use std::collections::{BTreeMap, HashMap};

/// What a recorded draw rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    Mesh(MeshHandle),
    Fullscreen,
}

/// A draw together with the state it was issued under
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub kind: DrawKind,
    pub program: ProgramHandle,
    pub program_label: String,
    pub framebuffer: Option<FramebufferHandle>,
    pub depth: DepthState,
    pub cull: CullMode,
    pub viewport: Viewport,
    pub textures: BTreeMap<u32, TextureHandle>,
    pub uniforms: HashMap<String, UniformValue>,
    /// Fragments that passed the depth test
    pub fragments: usize,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }
}

/// A recorded clear
#[derive(Debug, Clone, Copy)]
pub struct ClearRecord {
    pub framebuffer: Option<FramebufferHandle>,
    pub values: ClearValues,
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    layers: Vec<Vec<[f32; 4]>>,
}

struct HeadlessMesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    topology: PrimitiveTopology,
}

struct HeadlessProgram {
    label: String,
    has_fragment: bool,
}

/// Resolved render target of a draw
struct Target {
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
    width: u32,
    height: u32,
}

/// Per-draw raster configuration
struct RasterState {
    depth: DepthState,
    cull: CullMode,
    viewport: Viewport,
    color: Option<[f32; 4]>,
}

/// Screen-space vertex: pixel position and NDC depth
#[derive(Clone, Copy)]
struct ScreenVertex {
    position: Vec2,
    depth: f32,
}

/// Headless device
pub struct HeadlessDevice {
    width: u32,
    height: u32,
    state: StateTracker,

    textures: HashMap<u64, HeadlessTexture>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    meshes: HashMap<u64, HeadlessMesh>,
    programs: HashMap<u64, HeadlessProgram>,
    next_id: u64,

    default_color: TextureHandle,
    default_depth: TextureHandle,

    draws: Vec<DrawRecord>,
    clears: Vec<ClearRecord>,
    submissions: usize,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        let mut device = Self {
            width,
            height,
            state: StateTracker::new(width, height),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            default_color: TextureHandle(0),
            default_depth: TextureHandle(0),
            draws: Vec::new(),
            clears: Vec::new(),
            submissions: 0,
        };
        device.default_color = device.insert_texture(TextureDescriptor::render_target(
            "default color",
            width,
            height,
            TextureFormat::Rgba8Unorm,
        ));
        device.default_depth = device.insert_texture(TextureDescriptor::render_target(
            "default depth",
            width,
            height,
            TextureFormat::Depth32Float,
        ));
        log::info!("HeadlessDevice: created {}x{} default framebuffer", width, height);
        device
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_texture(&mut self, desc: TextureDescriptor) -> TextureHandle {
        let texel_count = (desc.width * desc.height) as usize;
        let initial = if desc.format.is_depth() {
            [1.0, 0.0, 0.0, 0.0]
        } else {
            [0.0; 4]
        };
        let layers = (0..desc.kind.layer_count())
            .map(|_| vec![initial; texel_count])
            .collect();
        let id = self.next_id();
        self.textures.insert(id, HeadlessTexture { desc, layers });
        TextureHandle(id)
    }

    // Inspection

    /// Every draw recorded since creation or the last [`Self::take_draws`]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    pub fn clears(&self) -> &[ClearRecord] {
        &self.clears
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Number of live textures, including the default framebuffer's
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn default_color_texture(&self) -> TextureHandle {
        self.default_color
    }

    pub fn default_depth_texture(&self) -> TextureHandle {
        self.default_depth
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    /// Read one texel of layer `layer`
    pub fn texel(&self, texture: TextureHandle, layer: u32, x: u32, y: u32) -> Option<[f32; 4]> {
        let tex = self.textures.get(&texture.0)?;
        if x >= tex.desc.width || y >= tex.desc.height {
            return None;
        }
        let layer = tex.layers.get(layer as usize)?;
        layer.get((y * tex.desc.width + x) as usize).copied()
    }

    pub fn pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<[f32; 4]> {
        self.texel(texture, 0, x, y)
    }

    pub fn depth_at(&self, texture: TextureHandle, x: u32, y: u32) -> Option<f32> {
        self.texel(texture, 0, x, y).map(|t| t[0])
    }

    // Rasterization

    fn resolve_target(&self, framebuffer: Option<FramebufferHandle>) -> Option<Target> {
        let (colors, depth) = match framebuffer {
            None => (vec![self.default_color], Some(self.default_depth)),
            Some(handle) => {
                let desc = self.framebuffers.get(&handle.0)?;
                (desc.color_attachments.clone(), desc.depth_attachment)
            }
        };
        let first = colors.first().copied().or(depth)?;
        let desc = &self.textures.get(&first.0)?.desc;
        Some(Target {
            width: desc.width,
            height: desc.height,
            colors,
            depth,
        })
    }

    fn shade_fragment(&mut self, target: &Target, raster: &RasterState, x: u32, y: u32, z: f32) -> bool {
        let index = (y * target.width + x) as usize;

        if let Some(depth) = target.depth {
            let Some(tex) = self.textures.get_mut(&depth.0) else {
                return false;
            };
            let Some(texel) = tex.layers[0].get_mut(index) else {
                return false;
            };
            if !raster.depth.compare.passes(z, texel[0]) {
                return false;
            }
            if raster.depth.write {
                texel[0] = z;
            }
        }

        if let Some(color) = raster.color {
            for attachment in &target.colors {
                if let Some(texel) = self
                    .textures
                    .get_mut(&attachment.0)
                    .and_then(|t| t.layers[0].get_mut(index))
                {
                    *texel = color;
                }
            }
        }
        true
    }

    /// Pixel bounds of the viewport clamped to the target
    fn bounds(target: &Target, viewport: Viewport) -> (u32, u32, u32, u32) {
        let x0 = viewport.x.min(target.width);
        let y0 = viewport.y.min(target.height);
        let x1 = (viewport.x + viewport.width).min(target.width);
        let y1 = (viewport.y + viewport.height).min(target.height);
        (x0, y0, x1, y1)
    }

    fn rasterize_fullscreen(&mut self, target: &Target, raster: &RasterState) -> usize {
        let (x0, y0, x1, y1) = Self::bounds(target, raster.viewport);
        let mut fragments = 0;
        for y in y0..y1 {
            for x in x0..x1 {
                if self.shade_fragment(target, raster, x, y, 1.0) {
                    fragments += 1;
                }
            }
        }
        fragments
    }

    fn rasterize_triangle(&mut self, target: &Target, raster: &RasterState, tri: [ScreenVertex; 3]) -> usize {
        let [a, b, c] = tri;
        let edge = |p: Vec2, q: Vec2, r: Vec2| (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x);
        let area = edge(a.position, b.position, c.position);
        if area == 0.0 {
            return 0;
        }

        let (vx0, vy0, vx1, vy1) = Self::bounds(target, raster.viewport);
        let min = a.position.min(b.position).min(c.position);
        let max = a.position.max(b.position).max(c.position);
        let x0 = (min.x.floor().max(vx0 as f32)) as u32;
        let y0 = (min.y.floor().max(vy0 as f32)) as u32;
        let x1 = (max.x.ceil().min(vx1 as f32)).max(0.0) as u32;
        let y1 = (max.y.ceil().min(vy1 as f32)).max(0.0) as u32;

        let mut fragments = 0;
        for y in y0..y1 {
            for x in x0..x1 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b.position, c.position, p) / area;
                let w1 = edge(c.position, a.position, p) / area;
                let w2 = edge(a.position, b.position, p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                // depth is clamped to the viewport range like on hardware
                let z = (w0 * a.depth + w1 * b.depth + w2 * c.depth).clamp(0.0, 1.0);
                if self.shade_fragment(target, raster, x, y, z) {
                    fragments += 1;
                }
            }
        }
        fragments
    }

    fn rasterize_mesh(&mut self, mesh: MeshHandle, target: &Target, raster: &RasterState, uniforms: &HashMap<String, UniformValue>) -> usize {
        let Some(data) = self.meshes.get(&mesh.0) else {
            log::warn!("HeadlessDevice: draw of unknown mesh {:?}", mesh);
            return 0;
        };
        if data.topology != PrimitiveTopology::TriangleList {
            log::trace!("HeadlessDevice: skipping {:?} rasterization", data.topology);
            return 0;
        }

        let clip = transform_vertices(&data.vertices, uniforms);
        let triangles: Vec<[Vec4; 3]> = data
            .indices
            .chunks_exact(3)
            .filter_map(|t| {
                Some([
                    *clip.get(t[0] as usize)?,
                    *clip.get(t[1] as usize)?,
                    *clip.get(t[2] as usize)?,
                ])
            })
            .collect();

        let viewport = raster.viewport;
        let to_screen = |v: Vec4| {
            let ndc = v.truncate() / v.w;
            ScreenVertex {
                position: Vec2::new(
                    viewport.x as f32 + (ndc.x * 0.5 + 0.5) * viewport.width as f32,
                    viewport.y as f32 + (0.5 - ndc.y * 0.5) * viewport.height as f32,
                ),
                depth: ndc.z,
            }
        };

        let mut fragments = 0;
        for triangle in triangles {
            let polygon = clip_polygon(triangle.to_vec());
            for i in 1..polygon.len().saturating_sub(1) {
                let (p0, p1, p2) = (polygon[0], polygon[i], polygon[i + 1]);
                let n0 = p0.truncate() / p0.w;
                let n1 = p1.truncate() / p1.w;
                let n2 = p2.truncate() / p2.w;
                // counter-clockwise in NDC is front facing
                let signed_area = (n1.x - n0.x) * (n2.y - n0.y) - (n2.x - n0.x) * (n1.y - n0.y);
                let culled = match raster.cull {
                    CullMode::None => false,
                    CullMode::Back => signed_area < 0.0,
                    CullMode::Front => signed_area > 0.0,
                };
                if culled {
                    continue;
                }
                fragments += self.rasterize_triangle(target, raster, [to_screen(p0), to_screen(p1), to_screen(p2)]);
            }
        }
        fragments
    }

    fn record_draw(&mut self, kind: DrawKind) {
        let Some(program) = self.state.program else {
            log::warn!("HeadlessDevice: draw with no program bound");
            return;
        };
        let Some((label, has_fragment)) = self
            .programs
            .get(&program.0)
            .map(|p| (p.label.clone(), p.has_fragment))
        else {
            log::warn!("HeadlessDevice: draw with destroyed program {:?}", program);
            return;
        };
        let uniforms = self
            .state
            .current_uniforms()
            .map(|u| u.values().clone())
            .unwrap_or_default();

        let color = has_fragment.then(|| {
            uniforms
                .get("uMaterial.baseColorFactor")
                .and_then(UniformValue::as_vec4)
                .unwrap_or(Vec4::ONE)
                .to_array()
        });
        let raster = RasterState {
            depth: self.state.depth,
            cull: self.state.cull,
            viewport: self.state.viewport,
            color,
        };

        let fragments = match self.resolve_target(self.state.framebuffer) {
            Some(target) => match kind {
                DrawKind::Mesh(mesh) => self.rasterize_mesh(mesh, &target, &raster, &uniforms),
                DrawKind::Fullscreen => self.rasterize_fullscreen(&target, &raster),
            },
            None => {
                log::warn!("HeadlessDevice: draw into an unknown framebuffer");
                0
            }
        };

        log::trace!(
            "HeadlessDevice: {:?} with '{}' produced {} fragments",
            kind,
            label,
            fragments
        );

        self.draws.push(DrawRecord {
            kind,
            program,
            program_label: label,
            framebuffer: self.state.framebuffer,
            depth: self.state.depth,
            cull: self.state.cull,
            viewport: self.state.viewport,
            textures: self.state.textures.clone(),
            uniforms,
            fragments,
        });
    }
}

/// Transform mesh vertices to clip space using the bound matrices and joints
fn transform_vertices(vertices: &[Vertex], uniforms: &HashMap<String, UniformValue>) -> Vec<Vec4> {
    let mat = |name: &str| {
        uniforms
            .get(name)
            .and_then(UniformValue::as_mat4)
            .unwrap_or(Mat4::IDENTITY)
    };
    let view_projection = mat("uMatrices.viewProjection");
    let world = mat("uMatrices.world");
    let skinned = uniforms
        .get("uIsSkinned")
        .and_then(UniformValue::as_bool)
        .unwrap_or(false);

    let joints: Vec<Mat4> = if skinned {
        let count = uniforms
            .get("uJointCount")
            .and_then(UniformValue::as_uint)
            .unwrap_or(0);
        (0..count)
            .map(|i| mat(&format!("uJoints[{i}].jointMatrix")))
            .collect()
    } else {
        Vec::new()
    };

    vertices
        .iter()
        .map(|v| {
            let position = v.position.extend(1.0);
            let world_position = if skinned {
                let skin = v
                    .joints
                    .iter()
                    .zip(v.weights.to_array())
                    .fold(Mat4::ZERO, |acc, (joint, weight)| {
                        acc + joints.get(*joint as usize).copied().unwrap_or(Mat4::IDENTITY) * weight
                    });
                skin * position
            } else {
                world * position
            };
            view_projection * world_position
        })
        .collect()
}

/// Clip a polygon against w > 0 and the [0, w] depth range
fn clip_polygon(polygon: Vec<Vec4>) -> Vec<Vec4> {
    let planes: [fn(Vec4) -> f32; 3] = [|v| v.w - 1e-5, |v| v.z, |v| v.w - v.z];
    let mut output = polygon;
    for plane in planes {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        for i in 0..input.len() {
            let a = input[i];
            let b = input[(i + 1) % input.len()];
            let (da, db) = (plane(a), plane(b));
            if da >= 0.0 {
                output.push(a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                let t = da / (da - db);
                output.push(a + (b - a) * t);
            }
        }
    }
    output
}

fn f16_to_f32(bits: u16) -> f32 {
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;
    let magnitude = match exponent {
        0 => mantissa as f32 * 2f32.powi(-24),
        0x1f if mantissa == 0 => f32::INFINITY,
        0x1f => f32::NAN,
        _ => f32::from_bits(((exponent + 112) << 23) | (mantissa << 13)),
    };
    if bits & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode tightly packed texel data into RGBA floats
fn decode_texels(format: TextureFormat, data: &[u8]) -> Vec<[f32; 4]> {
    let channels = format.channel_count();
    let bytes_per_pixel = format.bytes_per_pixel() as usize;
    let component_size = bytes_per_pixel / channels;

    data.chunks_exact(bytes_per_pixel)
        .map(|texel| {
            let mut out = [0.0, 0.0, 0.0, 1.0];
            for (c, component) in texel.chunks_exact(component_size).enumerate() {
                out[c] = match component_size {
                    1 => component[0] as f32 / 255.0,
                    2 => f16_to_f32(u16::from_le_bytes([component[0], component[1]])),
                    _ => f32::from_le_bytes([component[0], component[1], component[2], component[3]]),
                };
            }
            out
        })
        .collect()
}

impl GraphicsDevice for HeadlessDevice {
    fn name(&self) -> &'static str {
        "Headless Device"
    }

    fn default_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessDevice: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(self.insert_texture(desc.clone()))
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) {
        let Some(tex) = self.textures.get_mut(&texture.0) else {
            log::warn!("HeadlessDevice: write to unknown texture {:?}", texture);
            return;
        };
        let expected = (tex.desc.width * tex.desc.height * tex.desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            log::warn!(
                "HeadlessDevice: texture upload of {} bytes, expected {}",
                data.len(),
                expected
            );
            return;
        }
        let texels = decode_texels(tex.desc.format, data);
        if let Some(dst) = tex.layers.get_mut(layer as usize) {
            *dst = texels;
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_none() {
            log::warn!("HeadlessDevice: destroying unknown texture {:?}", texture);
        }
        self.state.forget_texture(texture);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle> {
        let attachments = desc.color_attachments.iter().chain(desc.depth_attachment.iter());
        let mut size = None;
        for attachment in attachments {
            let tex = self.textures.get(&attachment.0).ok_or_else(|| {
                BackendError::FramebufferCreationFailed(format!("{:?}: unknown attachment", desc.label))
            })?;
            let dims = (tex.desc.width, tex.desc.height);
            if *size.get_or_insert(dims) != dims {
                return Err(BackendError::FramebufferCreationFailed(format!(
                    "{:?}: attachment sizes differ",
                    desc.label
                )));
            }
        }
        if size.is_none() {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "{:?}: no attachments",
                desc.label
            )));
        }
        let id = self.next_id();
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    fn create_mesh(&mut self, desc: &MeshDescriptor) -> BackendResult<MeshHandle> {
        if let Some(index) = desc.indices.iter().find(|i| **i as usize >= desc.vertices.len()) {
            return Err(BackendError::MeshCreationFailed(format!(
                "{:?}: index {} out of range",
                desc.label, index
            )));
        }
        let id = self.next_id();
        self.meshes.insert(
            id,
            HeadlessMesh {
                vertices: desc.vertices.to_vec(),
                indices: desc.indices.to_vec(),
                topology: desc.topology,
            },
        );
        Ok(MeshHandle(id))
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh.0);
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let info = validate_program(desc)?;
        let id = self.next_id();
        self.programs.insert(
            id,
            HeadlessProgram {
                label: desc.label.clone(),
                has_fragment: info.has_fragment,
            },
        );
        let handle = ProgramHandle(id);
        self.state
            .register_program(handle, ProgramUniforms::new(desc.uniforms.clone()));
        log::debug!("HeadlessDevice: compiled program '{}'", desc.label);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        self.state.forget_program(program);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.framebuffer = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state.framebuffer
    }

    fn clear(&mut self, values: &ClearValues) {
        let Some(target) = self.resolve_target(self.state.framebuffer) else {
            log::warn!("HeadlessDevice: clear of an unknown framebuffer");
            return;
        };
        if let Some(color) = values.color {
            for attachment in &target.colors {
                if let Some(tex) = self.textures.get_mut(&attachment.0) {
                    tex.layers[0].fill(color);
                }
            }
        }
        if let (Some(depth), Some(attachment)) = (values.depth, target.depth) {
            if let Some(tex) = self.textures.get_mut(&attachment.0) {
                tex.layers[0].fill([depth, 0.0, 0.0, 0.0]);
            }
        }
        self.clears.push(ClearRecord {
            framebuffer: self.state.framebuffer,
            values: *values,
        });
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.state.program = program;
    }

    fn bound_program(&self) -> Option<ProgramHandle> {
        self.state.program
    }

    fn bind_texture(&mut self, channel: u32, texture: TextureHandle) {
        self.state.textures.insert(channel, texture);
    }

    fn unbind_texture(&mut self, channel: u32) {
        self.state.textures.remove(&channel);
    }

    fn bound_texture(&self, channel: u32) -> Option<TextureHandle> {
        self.state.textures.get(&channel).copied()
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.state.set_uniform(name, value);
    }

    fn depth_state(&self) -> DepthState {
        self.state.depth
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.state.depth = state;
    }

    fn cull_mode(&self) -> CullMode {
        self.state.cull
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.cull = mode;
    }

    fn viewport(&self) -> Viewport {
        self.state.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn draw_mesh(&mut self, mesh: MeshHandle) {
        self.record_draw(DrawKind::Mesh(mesh));
    }

    fn draw_fullscreen(&mut self) {
        self.record_draw(DrawKind::Fullscreen);
    }

    fn submit(&mut self) -> BackendResult<()> {
        self.submissions += 1;
        Ok(())
    }
}
