//! PBR renderer with image based lighting
//!
//! The environment photograph is turned into GPU lighting resources once at
//! startup by a chain of compute passes:
//! - equirectangular to cubemap projection
//! - split-sum specular prefiltering, one roughness per mip level
//! - diffuse irradiance convolution
//! - BRDF integration lookup table
//!
//! Each frame then draws a skybox and the model into a multisampled HDR
//! framebuffer, resolves it and tone maps the result onto the window.
//!
//! Two backends implement [`backend::GraphicsBackend`]: [`WgpuBackend`] for the
//! window and [`HeadlessBackend`], which records commands without a GPU.

pub mod backend;
pub mod error;
pub mod renderer;
pub mod resources;
pub mod viewer;
pub mod window;

use std::path::PathBuf;

pub use backend::headless::{CommandRecorder, HeadlessBackend, HeadlessConfig, RecordedCommand};
pub use backend::wgpu_backend::WgpuBackend;
pub use error::{RendererError, RendererResult};
pub use renderer::ibl::IblSettings;
pub use renderer::settings::{CameraSettings, Light, SceneSettings, MAX_LIGHTS};
pub use renderer::{Renderer, RendererInterface, RendererState};
pub use viewer::{InputMode, Viewer};

/// Files the scene is built from
#[derive(Debug, Clone)]
pub struct AssetPaths {
    pub skybox_mesh: PathBuf,
    pub model_mesh: PathBuf,
    pub albedo: PathBuf,
    pub normal: PathBuf,
    pub metalness: PathBuf,
    pub roughness: PathBuf,
    /// Equirectangular HDR environment
    pub environment: PathBuf,
}

impl AssetPaths {
    /// The standard asset layout below `root`
    pub fn under<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            skybox_mesh: root.join("meshes/skybox.obj"),
            model_mesh: root.join("meshes/flaski.obj"),
            albedo: root.join("textures/flaski_albedo.png"),
            normal: root.join("textures/flaski_normal.png"),
            metalness: root.join("textures/flaski_metalness.png"),
            roughness: root.join("textures/flaski_roughness.png"),
            environment: root.join("environment.hdr"),
        }
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self::under("data")
    }
}

/// Configuration for the viewer window and renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Window width (fixed, the window is not resizable)
    pub width: u32,
    /// Window height
    pub height: u32,
    /// Requested MSAA sample count, lowered to what the device supports
    pub samples: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Sizes of the precomputed lighting textures
    pub ibl: IblSettings,
    /// Directory holding `<name>.wgsl` shader sources
    pub shader_dir: PathBuf,
    pub assets: AssetPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Physically Based Rendering".to_string(),
            width: 1024,
            height: 1024,
            samples: 16,
            vsync: true,
            ibl: IblSettings::default(),
            shader_dir: PathBuf::from("shaders"),
            assets: AssetPaths::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!((config.width, config.height, config.samples), (1024, 1024, 16));
        assert_eq!(config.ibl.environment_size, 1024);
        assert_eq!(config.assets.model_mesh, PathBuf::from("data/meshes/flaski.obj"));
        assert_eq!(config.assets.environment, PathBuf::from("data/environment.hdr"));
    }
}
