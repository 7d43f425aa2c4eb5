//! Renderer error type

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{BackendError, FramebufferStatus};

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize renderer: {0}")]
    Initialization(String),

    #[error("Failed to load image file: {}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to load mesh file: {}", path.display())]
    MeshLoad {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("Mesh file contains no triangles: {}", .0.display())]
    EmptyMesh(PathBuf),

    #[error("Cannot read shader source file: {0}")]
    ShaderSource(String),

    #[error("Shader compilation failed: {name}\n{diagnostic}")]
    ShaderCompilation { name: String, diagnostic: String },

    #[error("Program link failed\n{0}")]
    ProgramLink(String),

    #[error("Framebuffer completeness check failed: {0}")]
    FramebufferIncomplete(FramebufferStatus),

    #[error("Invalid renderer state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failing_item() {
        let err = RendererError::ShaderSource("pbr_vs".into());
        assert_eq!(err.to_string(), "Cannot read shader source file: pbr_vs");

        let err = RendererError::ShaderCompilation {
            name: "tonemap_fs".into(),
            diagnostic: "error: expected ';'".into(),
        };
        assert!(err.to_string().starts_with("Shader compilation failed: tonemap_fs\n"));

        let err = RendererError::FramebufferIncomplete(FramebufferStatus::IncompleteMultisample);
        assert!(err.to_string().contains("0x8D56"));
    }
}
