//! wgpu device implementation
//!
//! The state-machine API is recorded into pending passes: binding a different
//! framebuffer or clearing after draws starts a new pass. Every draw resolves
//! a pipeline from a cache keyed by program, target formats and fixed-function
//! state, and packs the bound program's uniforms into fresh buffers. Passes are
//! encoded and submitted on [`GraphicsDevice::submit`].

mod conversion;

use crate::backend::shader::*;
use crate::backend::state::StateTracker;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::uniforms::{ProgramUniforms, UniformValue};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct WgpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    topology: PrimitiveTopology,
}

struct WgpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    textures: Vec<TextureSlot>,
    has_fragment: bool,
}

/// Everything a render pipeline is specialized on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    depth: DepthState,
    cull: CullMode,
    topology: PrimitiveTopology,
    fullscreen: bool,
}

struct RecordedDraw {
    pipeline: PipelineKey,
    bind_group: wgpu::BindGroup,
    mesh: Option<u64>,
    viewport: Viewport,
}

/// Work recorded against one framebuffer
struct PendingPass {
    framebuffer: Option<FramebufferHandle>,
    color_clear: Option<[f32; 4]>,
    depth_clear: Option<f32>,
    draws: Vec<RecordedDraw>,
}

impl PendingPass {
    fn new(framebuffer: Option<FramebufferHandle>) -> Self {
        Self {
            framebuffer,
            color_clear: None,
            depth_clear: None,
            draws: Vec::new(),
        }
    }

    /// Depth is attached read-only unless the pass clears or writes it
    fn writes_depth(&self) -> bool {
        self.depth_clear.is_some() || self.draws.iter().any(|d| d.pipeline.depth.write)
    }
}

/// Placeholder textures bound to slots with nothing bound
struct Fallbacks {
    color: wgpu::TextureView,
    depth: wgpu::TextureView,
    cube: wgpu::TextureView,
}

/// wgpu device
pub struct WgpuDevice {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    width: u32,
    height: u32,
    state: StateTracker,

    textures: HashMap<u64, WgpuTexture>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    meshes: HashMap<u64, WgpuMesh>,
    programs: HashMap<u64, WgpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    next_id: u64,

    default_framebuffer: FramebufferDescriptor,
    filtering_sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
    fallbacks: Fallbacks,

    pending: Vec<PendingPass>,
}

impl WgpuDevice {
    /// Create a headless device with an offscreen default framebuffer
    pub fn new(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> BackendResult<Self> {
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
        } else {
            wgpu::Backends::all()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let filtering_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filtering sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let comparison_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("comparison sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let fallbacks = Self::create_fallbacks(&device, &queue);

        let mut this = Self {
            instance,
            adapter,
            device,
            queue,
            width,
            height,
            state: StateTracker::new(width, height),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 1,
            default_framebuffer: FramebufferDescriptor {
                label: Some("default framebuffer".into()),
                color_attachments: Vec::new(),
                depth_attachment: None,
            },
            filtering_sampler,
            comparison_sampler,
            fallbacks,
            pending: Vec::new(),
        };

        let color = this.create_texture(&TextureDescriptor::render_target(
            "default color",
            width,
            height,
            TextureFormat::Rgba8Unorm,
        ))?;
        let depth = this.create_texture(&TextureDescriptor::render_target(
            "default depth",
            width,
            height,
            TextureFormat::Depth32Float,
        ))?;
        this.default_framebuffer.color_attachments.push(color);
        this.default_framebuffer.depth_attachment = Some(depth);

        Ok(this)
    }

    fn create_fallbacks(device: &wgpu::Device, queue: &wgpu::Queue) -> Fallbacks {
        let one_texel = |label: &str, format: wgpu::TextureFormat, layers: u32, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let sampled = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;

        let color = one_texel("fallback color", wgpu::TextureFormat::Rgba8Unorm, 1, sampled);
        queue.write_texture(
            color.as_image_copy(),
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        // zero-initialized: black, no environment contribution
        let cube = one_texel("fallback cube", wgpu::TextureFormat::Rgba8Unorm, 6, sampled);

        // depth textures cannot be written from the queue; clear through a pass
        let depth = one_texel(
            "fallback depth",
            wgpu::TextureFormat::Depth32Float,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fallback depth clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fallback depth clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        queue.submit(Some(encoder.finish()));

        Fallbacks {
            color: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth: depth_view,
            cube: cube.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::Cube),
                ..Default::default()
            }),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn default_color_texture(&self) -> Option<TextureHandle> {
        self.default_framebuffer.color_attachments.first().copied()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn framebuffer_desc(&self, framebuffer: Option<FramebufferHandle>) -> Option<&FramebufferDescriptor> {
        match framebuffer {
            None => Some(&self.default_framebuffer),
            Some(handle) => self.framebuffers.get(&handle.0),
        }
    }

    fn format_of(&self, texture: TextureHandle) -> Option<TextureFormat> {
        self.textures.get(&texture.0).map(|t| t.desc.format)
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Option<wgpu::RenderPipeline> {
        let program = self.programs.get(&key.program)?;

        let layout = Vertex::layout();
        let attributes: Vec<wgpu::VertexAttribute> = layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: conversion::vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let mesh_buffers = [wgpu::VertexBufferLayout {
            array_stride: layout.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if key.fullscreen { &[] } else { &mesh_buffers };

        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: conversion::texture_format(*format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format: conversion::texture_format(format),
            depth_write_enabled: key.depth.write,
            depth_compare: conversion::compare_function(key.depth.compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        log::debug!("WgpuDevice: creating pipeline for '{}' {:?}", program.label, key);

        Some(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.label),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: "vs_main",
                buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: program.has_fragment.then(|| wgpu::FragmentState {
                module: &program.module,
                entry_point: "fs_main",
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: conversion::topology(key.topology),
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: conversion::cull_mode(key.cull),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        }))
    }

    fn create_bind_group(&self, program_handle: ProgramHandle) -> Option<wgpu::BindGroup> {
        let program = self.programs.get(&program_handle.0)?;
        let packed = self.state.current_uniforms()?.pack();

        let mut block = packed.block;
        block.resize(block.len().div_ceil(16) * 16, 0);
        let block_buffer = (!block.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform block"),
                contents: &block,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });
        let array_buffers: Vec<wgpu::Buffer> = packed
            .arrays
            .iter()
            .map(|bytes| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("uniform array"),
                    contents: bytes,
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();

        let views: Vec<(u32, &wgpu::TextureView)> = program
            .textures
            .iter()
            .map(|slot| {
                let bound = self
                    .state
                    .textures
                    .get(&slot.channel)
                    .and_then(|handle| self.textures.get(&handle.0))
                    .filter(|t| conversion::slot_accepts(slot.kind, t.desc.kind, t.desc.format));
                let view = match (bound, slot.kind) {
                    (Some(texture), _) => &texture.view,
                    (None, TextureSlotKind::Color) => &self.fallbacks.color,
                    (None, TextureSlotKind::Depth) => &self.fallbacks.depth,
                    (None, TextureSlotKind::Cube) => &self.fallbacks.cube,
                };
                (slot.binding(), view)
            })
            .collect();

        let mut entries = Vec::new();
        if let Some(buffer) = &block_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: UNIFORM_BLOCK_BINDING,
                resource: buffer.as_entire_binding(),
            });
        }
        for (i, buffer) in array_buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: FIRST_ARRAY_BINDING + i as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        for (binding, view) in &views {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: FILTERING_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.filtering_sampler),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: COMPARISON_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.comparison_sampler),
        });

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.label),
            layout: &program.bind_group_layout,
            entries: &entries,
        }))
    }

    /// Pending pass for the bound framebuffer, started if needed
    fn current_pass(&mut self, fresh: bool) -> &mut PendingPass {
        let framebuffer = self.state.framebuffer;
        let needs_new = self
            .pending
            .last()
            .map_or(true, |p| p.framebuffer != framebuffer || (fresh && !p.draws.is_empty()));
        if needs_new {
            self.pending.push(PendingPass::new(framebuffer));
        }
        let last = self.pending.len() - 1;
        &mut self.pending[last]
    }

    fn record_draw(&mut self, mesh: Option<MeshHandle>) {
        let Some(program) = self.state.program else {
            log::warn!("WgpuDevice: draw with no program bound");
            return;
        };
        let Some(target) = self.framebuffer_desc(self.state.framebuffer) else {
            log::warn!("WgpuDevice: draw into an unknown framebuffer");
            return;
        };
        let color_formats: Vec<TextureFormat> = target
            .color_attachments
            .iter()
            .filter_map(|t| self.format_of(*t))
            .collect();
        let depth_format = target.depth_attachment.and_then(|t| self.format_of(t));

        let topology = match mesh {
            Some(handle) => match self.meshes.get(&handle.0) {
                Some(m) => m.topology,
                None => {
                    log::warn!("WgpuDevice: draw of unknown mesh {:?}", handle);
                    return;
                }
            },
            None => PrimitiveTopology::TriangleList,
        };

        let key = PipelineKey {
            program: program.0,
            color_formats,
            depth_format,
            depth: self.state.depth,
            cull: self.state.cull,
            topology,
            fullscreen: mesh.is_none(),
        };
        if !self.pipelines.contains_key(&key) {
            let Some(pipeline) = self.create_pipeline(&key) else {
                log::warn!("WgpuDevice: draw with destroyed program {:?}", program);
                return;
            };
            self.pipelines.insert(key.clone(), pipeline);
        }

        let Some(bind_group) = self.create_bind_group(program) else {
            return;
        };
        let viewport = self.state.viewport;
        self.current_pass(false).draws.push(RecordedDraw {
            pipeline: key,
            bind_group,
            mesh: mesh.map(|m| m.0),
            viewport,
        });
    }

    /// Copy a color texture back to the CPU as tightly packed rows
    pub fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.submit()?;

        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::ReadbackFailed("Texture not found".into()))?;
        if tex.desc.format.is_depth() {
            return Err(BackendError::ReadbackFailed("Depth readback is not supported".into()));
        }

        let (width, height) = (tex.desc.width, tex.desc.height);
        let row = width * tex.desc.format.bytes_per_pixel();
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            tex.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((row * height) as usize);
        for chunk in data.chunks_exact(padded_row as usize) {
            pixels.extend_from_slice(&chunk[..row as usize]);
        }
        drop(data);
        buffer.unmap();
        Ok(pixels)
    }
}

impl GraphicsDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu Device"
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
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layer_count(),
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: conversion::texture_format(desc.format),
            usage: conversion::texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(match desc.kind {
                TextureKind::D2 => wgpu::TextureViewDimension::D2,
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });

        let id = self.next_id();
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) {
        let Some(tex) = self.textures.get(&texture.0) else {
            log::warn!("WgpuDevice: write to unknown texture {:?}", texture);
            return;
        };
        let (width, height) = (tex.desc.width, tex.desc.height);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * tex.desc.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.texture.destroy();
        }
        self.state.forget_texture(texture);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle> {
        for attachment in desc.color_attachments.iter().chain(desc.depth_attachment.iter()) {
            let tex = self.textures.get(&attachment.0).ok_or_else(|| {
                BackendError::FramebufferCreationFailed(format!("{:?}: unknown attachment", desc.label))
            })?;
            if tex.desc.kind != TextureKind::D2 {
                return Err(BackendError::FramebufferCreationFailed(format!(
                    "{:?}: cube textures cannot be attached",
                    desc.label
                )));
            }
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
        if desc.indices.is_empty() {
            return Err(BackendError::MeshCreationFailed(format!("{:?}: no indices", desc.label)));
        }
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label,
            contents: bytemuck::cast_slice(desc.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label,
            contents: bytemuck::cast_slice(desc.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let id = self.next_id();
        self.meshes.insert(
            id,
            WgpuMesh {
                vertex_buffer,
                index_buffer,
                index_count: desc.indices.len() as u32,
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

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCompilationFailed(format!("{}: {}", desc.label, error)));
        }

        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let mut entries = Vec::new();
        if !desc.uniforms.block().is_empty() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: UNIFORM_BLOCK_BINDING,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        for i in 0..desc.uniforms.arrays().len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: FIRST_ARRAY_BINDING + i as u32,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        for slot in &desc.textures {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.binding(),
                visibility,
                ty: conversion::texture_binding(slot.kind),
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: FILTERING_SAMPLER_BINDING,
            visibility,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: COMPARISON_SAMPLER_BINDING,
            visibility,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
            count: None,
        });

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let id = self.next_id();
        self.programs.insert(
            id,
            WgpuProgram {
                label: desc.label.clone(),
                module,
                bind_group_layout,
                pipeline_layout,
                textures: desc.textures.clone(),
                has_fragment: info.has_fragment,
            },
        );
        let handle = ProgramHandle(id);
        self.state
            .register_program(handle, ProgramUniforms::new(desc.uniforms.clone()));
        log::debug!("WgpuDevice: compiled program '{}'", desc.label);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        self.pipelines.retain(|key, _| key.program != program.0);
        self.state.forget_program(program);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.framebuffer = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state.framebuffer
    }

    fn clear(&mut self, values: &ClearValues) {
        let pass = self.current_pass(true);
        if values.color.is_some() {
            pass.color_clear = values.color;
        }
        if values.depth.is_some() {
            pass.depth_clear = values.depth;
        }
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
        self.record_draw(Some(mesh));
    }

    fn draw_fullscreen(&mut self) {
        self.record_draw(None);
    }

    fn submit(&mut self) -> BackendResult<()> {
        let passes = std::mem::take(&mut self.pending);
        if passes.is_empty() {
            return Ok(());
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        for pass in &passes {
            let Some(target) = self.framebuffer_desc(pass.framebuffer) else {
                log::warn!("WgpuDevice: skipping pass for a destroyed framebuffer");
                continue;
            };

            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = target
                .color_attachments
                .iter()
                .filter_map(|handle| self.textures.get(&handle.0))
                .map(|tex| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &tex.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match pass.color_clear {
                                Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: c[0] as f64,
                                    g: c[1] as f64,
                                    b: c[2] as f64,
                                    a: c[3] as f64,
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();

            let depth_attachment = target
                .depth_attachment
                .and_then(|handle| self.textures.get(&handle.0))
                .map(|tex| wgpu::RenderPassDepthStencilAttachment {
                    view: &tex.view,
                    depth_ops: pass.writes_depth().then(|| wgpu::Operations {
                        load: match pass.depth_clear {
                            Some(depth) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: target.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &pass.draws {
                let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                let v = draw.viewport;
                render_pass.set_viewport(v.x as f32, v.y as f32, v.width as f32, v.height as f32, 0.0, 1.0);
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &draw.bind_group, &[]);
                match draw.mesh.and_then(|id| self.meshes.get(&id)) {
                    Some(mesh) => {
                        render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                        render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                    None if draw.mesh.is_none() => render_pass.draw(0..3, 0..1),
                    None => {}
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        log::trace!("WgpuDevice: submitted {} passes", passes.len());
        Ok(())
    }
}
