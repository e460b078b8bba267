//! Resource management
//!
//! CPU-side meshes, textures, materials and models, and their upload to a
//! [`GraphicsDevice`](crate::backend::GraphicsDevice).

mod material;
mod mesh;
mod model;
mod texture;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use texture::*;
