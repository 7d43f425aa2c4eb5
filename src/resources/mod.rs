//! Asset collaborators
//!
//! Decoding of images and meshes from disk and retrieval of shader sources.
//! Everything here is plain CPU data; GPU upload happens in the renderer.

pub mod image;
pub mod mesh;
pub mod shader;

pub use self::image::{ImageData, Pixels};
pub use self::mesh::{Face, MeshData, Vertex};
pub use self::shader::ShaderLibrary;
