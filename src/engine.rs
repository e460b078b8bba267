//! Frame orchestrator
//!
//! [`Renderer`] owns the device and every pass of the deferred pipeline and
//! runs them in a fixed order each frame:
//!
//! update → collect → shadows → G-buffer → light pass → skybox → submit
//!
//! Lighting lands in an HDR target that shares the G-buffer depth, so the
//! light pass and the skybox can reject pixels against scene depth. The HDR
//! color is exposed for external post-processing.

use crate::backend::*;
use crate::pipeline::{BrdfLut, GBuffer, GBufferGenerator, LightPass, LightPassInputs, RenderData, ShadowMap, SkyboxPass};
use crate::scene::Scene;
use crate::EngineConfig;

/// Format of the lighting accumulation target
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Where the renderer is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStage {
    #[default]
    Idle,
    Update,
    Shadows,
    Geometry,
    Lighting,
    Skybox,
    Submitted,
}

impl FrameStage {
    fn advance(&mut self, next: FrameStage) {
        log::trace!("Renderer: {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// HDR color plus the G-buffer depth
struct HdrTarget {
    framebuffer: FramebufferHandle,
    color: TextureHandle,
}

impl HdrTarget {
    fn new(device: &mut dyn GraphicsDevice, gbuffer: &GBuffer) -> BackendResult<Self> {
        let color = device.create_texture(&TextureDescriptor::render_target(
            "hdr color",
            gbuffer.width,
            gbuffer.height,
            HDR_FORMAT,
        ))?;
        let framebuffer = device.create_framebuffer(&FramebufferDescriptor {
            label: Some("hdr".to_string()),
            color_attachments: vec![color],
            depth_attachment: Some(gbuffer.depth),
        })?;
        Ok(Self { framebuffer, color })
    }

    fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_framebuffer(self.framebuffer);
        device.destroy_texture(self.color);
    }
}

/// Deferred renderer driving one [`GraphicsDevice`]
pub struct Renderer<D: GraphicsDevice> {
    device: D,
    config: EngineConfig,
    gbuffer: GBufferGenerator,
    light_pass: LightPass,
    skybox: SkyboxPass,
    brdf_lut: BrdfLut,
    shadow_map: Option<ShadowMap>,
    hdr: HdrTarget,
    stage: FrameStage,
    frame_index: u64,
}

impl<D: GraphicsDevice> Renderer<D> {
    /// Create every pass and bake the BRDF lookup table
    pub fn new(mut device: D, config: EngineConfig) -> BackendResult<Self> {
        let (width, height) = (config.width, config.height);
        let gbuffer = GBufferGenerator::new(&mut device, width, height)?;
        let light_pass = LightPass::new(&mut device)?;
        let skybox = SkyboxPass::new(&mut device)?;
        let brdf_lut = BrdfLut::bake(&mut device, config.brdf_lut_size, (width, height))?;
        let shadow_map = if config.shadow.enabled {
            Some(ShadowMap::new(&mut device, &config.shadow)?)
        } else {
            None
        };
        let hdr = HdrTarget::new(&mut device, gbuffer.gbuffer())?;

        log::info!(
            "Renderer: {} device at {}x{}, shadows: {}",
            device.name(),
            width,
            height,
            shadow_map.is_some()
        );
        Ok(Self {
            device,
            config,
            gbuffer,
            light_pass,
            skybox,
            brdf_lut,
            shadow_map,
            hdr,
            stage: FrameStage::Idle,
            frame_index: 0,
        })
    }

    /// Advance `scene` by `dt` seconds, then render it
    pub fn render_frame(&mut self, scene: &mut Scene, dt: f32) -> BackendResult<()> {
        self.stage.advance(FrameStage::Update);
        scene.update(dt);
        let data = RenderData::collect(scene);
        self.render(&data)
    }

    /// Render a collected snapshot into the HDR target
    pub fn render(&mut self, data: &RenderData) -> BackendResult<()> {
        self.stage.advance(FrameStage::Shadows);
        if let Some(shadow_map) = &mut self.shadow_map {
            shadow_map.render(&mut self.device, data);
        }

        self.stage.advance(FrameStage::Geometry);
        let gbuffer = self.gbuffer.generate(&mut self.device, data);

        self.stage.advance(FrameStage::Lighting);
        self.device.bind_framebuffer(Some(self.hdr.framebuffer));
        self.device.set_viewport(Viewport::new(gbuffer.width, gbuffer.height));
        self.device.clear(&ClearValues::color(self.config.clear_color));
        let inputs = LightPassInputs::new()
            .with_gbuffer(gbuffer)
            .with_render_data(data)
            .with_shadow_map(self.shadow_map.as_ref())
            .with_brdf_lut(self.brdf_lut.texture());
        self.light_pass.render(&mut self.device, &inputs);

        self.stage.advance(FrameStage::Skybox);
        let sky = self.skybox.render(&mut self.device, data);

        self.device.submit()?;
        self.stage.advance(FrameStage::Submitted);
        self.frame_index += 1;

        log::debug!(
            "Renderer: frame {} with {} models, {} lights, sky: {}",
            self.frame_index,
            data.models.len(),
            data.directional_lights.len() + data.point_lights.len() + data.spot_lights.len(),
            sky
        );
        Ok(())
    }

    /// Rebuild the G-buffer and HDR target at a new resolution
    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if (width, height) == (self.config.width, self.config.height) {
            return Ok(());
        }
        self.gbuffer.resize(&mut self.device, width, height)?;
        // rebuilt after the G-buffer since it attaches the new depth texture
        let hdr = HdrTarget::new(&mut self.device, self.gbuffer.gbuffer())?;
        std::mem::replace(&mut self.hdr, hdr).destroy(&mut self.device);
        self.config.width = width;
        self.config.height = height;
        log::info!("Renderer: resized to {}x{}", width, height);
        Ok(())
    }

    /// Lighting result of the last frame
    pub fn hdr_output(&self) -> TextureHandle {
        self.hdr.color
    }

    pub fn gbuffer(&self) -> &GBuffer {
        self.gbuffer.gbuffer()
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow_map.as_ref()
    }

    pub fn brdf_lut(&self) -> &BrdfLut {
        &self.brdf_lut
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Number of frames submitted so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Release every GPU resource and hand the device back
    pub fn destroy(mut self) -> D {
        let device: &mut dyn GraphicsDevice = &mut self.device;
        self.hdr.destroy(device);
        if let Some(shadow_map) = self.shadow_map {
            shadow_map.destroy(device);
        }
        self.brdf_lut.destroy(device);
        self.skybox.destroy(device);
        self.light_pass.destroy(device);
        self.gbuffer.destroy(device);
        log::info!("Renderer: destroyed after {} frames", self.frame_index);
        self.device
    }
}
