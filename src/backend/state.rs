//! Binding state shared by device implementations

use crate::backend::types::*;
use crate::backend::uniforms::{ProgramUniforms, UniformValue};
use std::collections::{BTreeMap, HashMap};

/// Tracks the binding state of a device and the uniforms of every program
#[derive(Debug, Clone)]
pub struct StateTracker {
    pub framebuffer: Option<FramebufferHandle>,
    pub program: Option<ProgramHandle>,
    pub textures: BTreeMap<u32, TextureHandle>,
    pub depth: DepthState,
    pub cull: CullMode,
    pub viewport: Viewport,
    uniforms: HashMap<ProgramHandle, ProgramUniforms>,
}

impl StateTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            framebuffer: None,
            program: None,
            textures: BTreeMap::new(),
            depth: DepthState::default(),
            cull: CullMode::Back,
            viewport: Viewport::new(width, height),
            uniforms: HashMap::new(),
        }
    }

    pub fn register_program(&mut self, program: ProgramHandle, uniforms: ProgramUniforms) {
        self.uniforms.insert(program, uniforms);
    }

    pub fn forget_program(&mut self, program: ProgramHandle) {
        self.uniforms.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    /// Drop every channel binding that refers to `texture`
    pub fn forget_texture(&mut self, texture: TextureHandle) {
        self.textures.retain(|_, bound| *bound != texture);
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(program) = self.program else {
            log::warn!("Uniform '{}' set with no program bound", name);
            return;
        };
        if let Some(uniforms) = self.uniforms.get_mut(&program) {
            uniforms.set(name, value);
        }
    }

    /// Uniforms of the bound program
    pub fn current_uniforms(&self) -> Option<&ProgramUniforms> {
        self.program.and_then(|p| self.uniforms.get(&p))
    }
}
