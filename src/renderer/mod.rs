//! Renderer façade
//!
//! [`Renderer`] owns every GPU object of the demo. Resources are acquired in
//! `initialize` (backend, framebuffers) and `setup` (programs, assets, IBL
//! maps) and released by `shutdown` in exactly the inverse order.

pub mod frame;
pub mod ibl;
pub mod resource_manager;
pub mod settings;
pub mod uniforms;
pub mod uploader;

use crate::backend::GraphicsBackend;
use crate::error::{RendererError, RendererResult};
use crate::resources::{ImageData, ShaderLibrary, Vertex};
use crate::RendererConfig;

use self::frame::{FramePipeline, DEPTH_FORMAT, HDR_FORMAT};
use self::ibl::IblMaps;
use self::resource_manager::{negotiate_sample_count, FrameBuffer, ResourceManager};
use self::settings::{CameraSettings, SceneSettings};
use self::uploader::SceneAssets;

/// The four lifecycle operations the application loop drives
pub trait RendererInterface {
    /// What the display surface is created from
    type Surface;

    /// Create the display surface and the offscreen framebuffers
    fn initialize(
        &mut self,
        surface: Self::Surface,
        width: u32,
        height: u32,
        max_samples: u32,
    ) -> RendererResult<()>;

    /// Upload assets and precompute image based lighting
    fn setup(&mut self) -> RendererResult<()>;

    /// Draw and present one frame
    fn render(&mut self, camera: &CameraSettings, scene: &SceneSettings) -> RendererResult<()>;

    /// Release every GPU object. Calling it again is a no-op.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Initialized,
    Ready,
    ShutDown,
}

pub struct Renderer<B: GraphicsBackend> {
    config: RendererConfig,
    library: ShaderLibrary,
    state: RendererState,
    rm: Option<ResourceManager<B>>,
    framebuffer: FrameBuffer,
    resolve_framebuffer: FrameBuffer,
    pipeline: FramePipeline,
    assets: SceneAssets,
    ibl: IblMaps,
}

impl<B: GraphicsBackend> Renderer<B> {
    pub fn new(config: RendererConfig) -> Self {
        let library = ShaderLibrary::new(&config.shader_dir);
        Self {
            config,
            library,
            state: RendererState::Uninitialized,
            rm: None,
            framebuffer: FrameBuffer::default(),
            resolve_framebuffer: FrameBuffer::default(),
            pipeline: FramePipeline::default(),
            assets: SceneAssets::default(),
            ibl: IblMaps::default(),
        }
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Sample count of the primary framebuffer; 0 means no multisampling
    pub fn samples(&self) -> u32 {
        self.framebuffer.samples
    }

    pub fn framebuffer(&self) -> &FrameBuffer {
        &self.framebuffer
    }

    pub fn resolve_framebuffer(&self) -> &FrameBuffer {
        &self.resolve_framebuffer
    }

    pub fn ibl_maps(&self) -> &IblMaps {
        &self.ibl
    }

    pub fn backend(&self) -> Option<&B> {
        self.rm.as_ref().map(ResourceManager::backend)
    }

    fn create_framebuffers(&mut self, width: u32, height: u32, max_samples: u32) -> RendererResult<()> {
        let Some(rm) = self.rm.as_mut() else {
            return Err(RendererError::InvalidState("renderer is not initialized"));
        };
        let samples = negotiate_sample_count(max_samples, &rm.backend().supported_sample_counts());
        log::info!("Using {} samples for the offscreen framebuffer", samples.max(1));

        self.framebuffer =
            rm.create_frame_buffer(width, height, samples, Some(HDR_FORMAT), Some(DEPTH_FORMAT))?;
        if samples > 0 {
            self.resolve_framebuffer =
                rm.create_frame_buffer(width, height, 0, Some(HDR_FORMAT), None)?;
        } else {
            self.resolve_framebuffer = self.framebuffer.clone();
        }
        Ok(())
    }

    fn load_scene(&mut self) -> RendererResult<()> {
        let Some(rm) = self.rm.as_mut() else {
            return Err(RendererError::InvalidState("renderer is not initialized"));
        };

        self.pipeline = FramePipeline::new(rm, &self.library, self.framebuffer.samples, &Vertex::layout())?;
        self.assets = SceneAssets::upload(rm, &self.config.assets)?;

        let environment = ImageData::from_file(&self.config.assets.environment, 3)?;
        self.ibl = ibl::precompute(rm, &self.library, &environment, &self.config.ibl)?;

        self.pipeline
            .bind(rm, &self.assets, &self.ibl, &self.resolve_framebuffer)?;

        // Nothing may render before the precompute work has finished
        rm.backend_mut().wait_idle();
        Ok(())
    }

    /// Release everything `load_scene` created, leaving the framebuffers
    fn release_scene(&mut self) {
        let Some(rm) = self.rm.as_mut() else {
            return;
        };
        self.pipeline.unbind(rm);
        self.ibl.delete(rm);
        self.assets.delete(rm);
        self.pipeline.delete(rm);
    }

    fn release(&mut self) {
        self.release_scene();
        let Some(mut rm) = self.rm.take() else {
            return;
        };

        if self.resolve_framebuffer.id != self.framebuffer.id {
            rm.delete_frame_buffer(&mut self.resolve_framebuffer);
        }
        self.resolve_framebuffer = FrameBuffer::default();
        rm.delete_frame_buffer(&mut self.framebuffer);

        rm.backend_mut().wait_idle();
        // Backend (surface, device) goes last
        drop(rm);
    }
}

impl<B: GraphicsBackend> RendererInterface for Renderer<B> {
    type Surface = B::Surface;

    fn initialize(
        &mut self,
        surface: B::Surface,
        width: u32,
        height: u32,
        max_samples: u32,
    ) -> RendererResult<()> {
        if self.state != RendererState::Uninitialized {
            return Err(RendererError::InvalidState("renderer is already initialized"));
        }
        let backend = B::create(surface, width, height, self.config.vsync)
            .map_err(|e| RendererError::Initialization(e.to_string()))?;
        self.rm = Some(ResourceManager::new(backend));

        if let Err(e) = self.create_framebuffers(width, height, max_samples) {
            self.release();
            return Err(e);
        }
        self.state = RendererState::Initialized;
        log::info!("Renderer initialized ({}x{})", width, height);
        Ok(())
    }

    fn setup(&mut self) -> RendererResult<()> {
        if self.state != RendererState::Initialized {
            return Err(RendererError::InvalidState("setup requires an initialized renderer"));
        }
        if let Err(e) = self.load_scene() {
            // A later setup starts from the framebuffers alone
            self.release_scene();
            return Err(e);
        }
        self.state = RendererState::Ready;
        log::info!("Renderer setup complete");
        Ok(())
    }

    fn render(&mut self, camera: &CameraSettings, scene: &SceneSettings) -> RendererResult<()> {
        if self.state != RendererState::Ready {
            return Err(RendererError::InvalidState("render requires a completed setup"));
        }
        let Some(rm) = self.rm.as_mut() else {
            return Err(RendererError::InvalidState("renderer is not initialized"));
        };
        self.pipeline.render(
            rm,
            &self.framebuffer,
            &self.resolve_framebuffer,
            &self.assets,
            camera,
            scene,
        )
    }

    fn shutdown(&mut self) {
        if self.state == RendererState::ShutDown {
            return;
        }
        self.release();
        if self.state != RendererState::Uninitialized {
            log::info!("Renderer shut down");
        }
        self.state = RendererState::ShutDown;
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

