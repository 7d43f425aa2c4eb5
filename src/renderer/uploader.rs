//! Asset Uploader: decodes the scene's meshes and material textures and
//! moves them onto the GPU.

use crate::backend::{GraphicsBackend, TextureFormat};
use crate::error::RendererResult;
use crate::resources::{ImageData, MeshData};
use crate::AssetPaths;

use super::resource_manager::{MeshBuffer, ResourceManager, Texture};

/// Static geometry and material maps, created once during setup
#[derive(Debug, Default)]
pub struct SceneAssets {
    pub skybox: MeshBuffer,
    pub model: MeshBuffer,
    pub albedo: Texture,
    pub normal: Texture,
    pub metalness: Texture,
    pub roughness: Texture,
}

impl SceneAssets {
    /// Load everything in `paths`. On failure whatever was already uploaded is
    /// released before the error is returned.
    pub fn upload<B: GraphicsBackend>(
        rm: &mut ResourceManager<B>,
        paths: &AssetPaths,
    ) -> RendererResult<Self> {
        let mut assets = Self::default();
        if let Err(e) = assets.upload_into(rm, paths) {
            assets.delete(rm);
            return Err(e);
        }
        log::info!(
            "Uploaded scene assets: model {} indices, skybox {} indices",
            assets.model.num_elements,
            assets.skybox.num_elements
        );
        Ok(assets)
    }

    fn upload_into<B: GraphicsBackend>(
        &mut self,
        rm: &mut ResourceManager<B>,
        paths: &AssetPaths,
    ) -> RendererResult<()> {
        self.skybox = rm.create_mesh_buffer(&MeshData::from_file(&paths.skybox_mesh)?)?;
        self.model = rm.create_mesh_buffer(&MeshData::from_file(&paths.model_mesh)?)?;

        let maps: [(&mut Texture, &std::path::Path, u32, TextureFormat); 4] = [
            (&mut self.albedo, &paths.albedo, 3, TextureFormat::Rgba8UnormSrgb),
            (&mut self.normal, &paths.normal, 3, TextureFormat::Rgba8Unorm),
            (&mut self.metalness, &paths.metalness, 1, TextureFormat::R8Unorm),
            (&mut self.roughness, &paths.roughness, 1, TextureFormat::R8Unorm),
        ];
        for (slot, path, channels, format) in maps {
            let image = ImageData::from_file(path, channels)?;
            let label = path.display().to_string();
            *slot = rm.create_texture_from_image(&label, &image, format, 0)?;
        }
        Ok(())
    }

    /// Release in the inverse order of `upload`
    pub fn delete<B: GraphicsBackend>(&mut self, rm: &mut ResourceManager<B>) {
        rm.delete_texture(&mut self.roughness);
        rm.delete_texture(&mut self.metalness);
        rm.delete_texture(&mut self.normal);
        rm.delete_texture(&mut self.albedo);
        rm.delete_mesh_buffer(&mut self.model);
        rm.delete_mesh_buffer(&mut self.skybox);
    }
}
