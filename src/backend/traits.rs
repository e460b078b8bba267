//! Core device abstraction
//!
//! [`GraphicsDevice`] is the state-machine interface every pass renders
//! through. Both the headless reference device and the wgpu device implement it.

use crate::backend::shader::ProgramDescriptor;
use crate::backend::types::*;
use crate::backend::uniforms::UniformValue;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create mesh: {0}")]
    MeshCreationFailed(String),
    #[error("Failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("Failed to read back texture: {0}")]
    ReadbackFailed(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Graphics device state machine.
///
/// Binding state (framebuffer, program, texture channels, depth state, cull
/// mode, viewport) persists across draws until changed. Every piece of state
/// has a getter so passes can save it and restore it afterwards. Uniforms are
/// stored per program and persist until overwritten.
pub trait GraphicsDevice {
    /// Device name for logging
    fn name(&self) -> &'static str;

    /// Size of the default framebuffer
    fn default_size(&self) -> (u32, u32);

    // Resources

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    /// Upload tightly packed texel data in the texture's format to one layer of mip 0
    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]);
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn create_mesh(&mut self, desc: &MeshDescriptor) -> BackendResult<MeshHandle>;
    fn destroy_mesh(&mut self, mesh: MeshHandle);

    /// Compile a program. Failures carry the compiler diagnostic.
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;
    fn destroy_program(&mut self, program: ProgramHandle);

    // Binding state

    /// Bind a framebuffer; `None` selects the default framebuffer
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;
    /// Clear attachments of the bound framebuffer
    fn clear(&mut self, values: &ClearValues);

    fn use_program(&mut self, program: Option<ProgramHandle>);
    fn bound_program(&self) -> Option<ProgramHandle>;

    fn bind_texture(&mut self, channel: u32, texture: TextureHandle);
    fn unbind_texture(&mut self, channel: u32);
    fn bound_texture(&self, channel: u32) -> Option<TextureHandle>;

    /// Set a named uniform of the bound program
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    fn depth_state(&self) -> DepthState;
    fn set_depth_state(&mut self, state: DepthState);

    fn cull_mode(&self) -> CullMode;
    fn set_cull_mode(&mut self, mode: CullMode);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);

    // Drawing

    /// Draw a mesh with the bound program into the bound framebuffer
    fn draw_mesh(&mut self, mesh: MeshHandle);
    /// Draw one full-screen triangle at depth 1.0
    fn draw_fullscreen(&mut self);

    /// Flush recorded work to the device
    fn submit(&mut self) -> BackendResult<()>;
}
