//! Graphics device layer
//!
//! Provides the [`GraphicsDevice`] state machine along with a headless
//! reference implementation and a wgpu implementation.

pub mod headless;
pub mod shader;
pub mod state;
pub mod traits;
pub mod types;
pub mod uniforms;

// wgpu device blocks on adapter and error-scope futures
#[cfg(not(target_arch = "wasm32"))]
pub mod wgpu_backend;

pub use headless::{ClearRecord, DrawKind, DrawRecord, HeadlessDevice};
pub use shader::*;
pub use traits::*;
pub use types::*;
pub use uniforms::*;

#[cfg(not(target_arch = "wasm32"))]
pub use wgpu_backend::WgpuDevice;
