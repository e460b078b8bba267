//! Shader programs and WGSL validation
//!
//! Programs are single WGSL modules with a `vs_main` vertex entry point and
//! an optional `fs_main` fragment entry point. All resources live in bind
//! group 0:
//!
//! | Binding | Resource |
//! |---|---|
//! | 0 | uniform block |
//! | 1.. | storage arrays, in layout order |
//! | 16 + channel | texture bound to a texture channel |
//! | 32 | filtering sampler |
//! | 33 | comparison sampler |

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::uniforms::UniformLayout;

/// Binding index of the uniform block
pub const UNIFORM_BLOCK_BINDING: u32 = 0;
/// Binding index of the first storage array
pub const FIRST_ARRAY_BINDING: u32 = 1;
/// Binding index of texture channel 0
pub const FIRST_TEXTURE_BINDING: u32 = 16;
/// Highest texture channel a program may declare
pub const MAX_TEXTURE_CHANNELS: u32 = 16;
pub const FILTERING_SAMPLER_BINDING: u32 = 32;
pub const COMPARISON_SAMPLER_BINDING: u32 = 33;

/// How a program samples the texture on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlotKind {
    /// `texture_2d<f32>`
    Color,
    /// `texture_depth_2d`
    Depth,
    /// `texture_cube<f32>`
    Cube,
}

/// A texture channel read by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlot {
    pub channel: u32,
    pub kind: TextureSlotKind,
}

impl TextureSlot {
    pub fn new(channel: u32, kind: TextureSlotKind) -> Self {
        Self { channel, kind }
    }

    pub fn binding(&self) -> u32 {
        FIRST_TEXTURE_BINDING + self.channel
    }
}

/// Program descriptor
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: String,
    pub uniforms: UniformLayout,
    pub textures: Vec<TextureSlot>,
}

impl ProgramDescriptor {
    pub fn new(label: &str, source: &str) -> Self {
        Self {
            label: label.to_string(),
            source: source.to_string(),
            uniforms: UniformLayout::default(),
            textures: Vec::new(),
        }
    }

    pub fn with_uniforms(mut self, uniforms: UniformLayout) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_texture(mut self, channel: u32, kind: TextureSlotKind) -> Self {
        self.textures.push(TextureSlot::new(channel, kind));
        self
    }
}

/// Facts about a validated program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    pub has_fragment: bool,
}

/// Parse and validate a program's WGSL source.
///
/// Returns the compiler diagnostic as `ShaderCompilationFailed` when the
/// source does not parse, does not validate, lacks `vs_main`, or declares a
/// texture channel past [`MAX_TEXTURE_CHANNELS`].
pub fn validate_program(desc: &ProgramDescriptor) -> BackendResult<ProgramInfo> {
    let module = naga::front::wgsl::parse_str(&desc.source).map_err(|e| {
        BackendError::ShaderCompilationFailed(format!(
            "{}: WGSL parse error:\n{}",
            desc.label,
            e.emit_to_string(&desc.source)
        ))
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| {
        BackendError::ShaderCompilationFailed(format!(
            "{}: WGSL validation error:\n{}",
            desc.label,
            e.emit_to_string(&desc.source)
        ))
    })?;

    let has_entry = |stage: naga::ShaderStage, name: &str| {
        module
            .entry_points
            .iter()
            .any(|ep| ep.stage == stage && ep.name == name)
    };

    if !has_entry(naga::ShaderStage::Vertex, "vs_main") {
        return Err(BackendError::ShaderCompilationFailed(format!(
            "{}: missing vertex entry point 'vs_main'",
            desc.label
        )));
    }

    if let Some(slot) = desc.textures.iter().find(|s| s.channel >= MAX_TEXTURE_CHANNELS) {
        return Err(BackendError::ShaderCompilationFailed(format!(
            "{}: texture channel {} out of range",
            desc.label, slot.channel
        )));
    }

    Ok(ProgramInfo {
        has_fragment: has_entry(naga::ShaderStage::Fragment, "fs_main"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(index), 0.0, 1.0, 1.0);
}
"#;

    #[test]
    fn test_vertex_only_program() {
        let info = validate_program(&ProgramDescriptor::new("depth only", VALID)).unwrap();
        assert!(!info.has_fragment);
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let desc = ProgramDescriptor::new("broken", "fn vs_main( {");
        match validate_program(&desc) {
            Err(BackendError::ShaderCompilationFailed(message)) => {
                assert!(message.starts_with("broken: WGSL parse error"));
            }
            other => panic!("expected compilation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_point() {
        let source = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        let desc = ProgramDescriptor::new("no vertex", source);
        assert!(matches!(
            validate_program(&desc),
            Err(BackendError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_texture_channel_out_of_range() {
        let desc = ProgramDescriptor::new("channels", VALID).with_texture(16, TextureSlotKind::Color);
        assert!(validate_program(&desc).is_err());
    }
}
