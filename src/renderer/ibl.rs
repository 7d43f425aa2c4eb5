//! Image based lighting precomputation
//!
//! Turns one equirectangular environment image into the three lighting
//! resources the model shader samples:
//!
//! 1. `equirect2cube` projects the image onto an unfiltered cubemap, then its
//!    mip chain is generated.
//! 2. `spmap` prefilters the specular cubemap. Mip 0 is a plain copy, mip `L`
//!    is convolved with a GGX lobe of roughness `L / (levels - 1)`.
//! 3. `irmap` convolves the prefiltered cubemap into a small irradiance map.
//! 4. `spbrdf` integrates the split-sum BRDF scale and bias into a 2D table.
//!
//! Each stage is recorded into its own command buffer and submitted before the
//! next one starts, so later stages always read finished results.

use crate::backend::*;
use crate::error::{RendererError, RendererResult};
use crate::resources::{ImageData, ShaderLibrary};

use super::resource_manager::{
    sampler_entry, storage_entry, texture_entry, uniform_entry, Program, ProgramLayout,
    ResourceManager, Texture, UniformBuffer,
};
use super::uniforms::PrefilterUniform;

/// Edge length of a compute workgroup (16x16x1 invocations)
pub const WORKGROUP_SIZE: u32 = 16;

/// Format of every texture the kernels write
pub const IBL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Workgroups needed to cover `size` texels along one axis
pub fn workgroup_count(size: u32) -> u32 {
    size.div_ceil(WORKGROUP_SIZE).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IblSettings {
    pub environment_size: u32,
    pub irradiance_size: u32,
    pub brdf_lut_size: u32,
}

impl Default for IblSettings {
    fn default() -> Self {
        Self {
            environment_size: 1024,
            irradiance_size: 32,
            brdf_lut_size: 256,
        }
    }
}

/// Lighting resources produced by [`precompute`]
#[derive(Debug, Default)]
pub struct IblMaps {
    /// Prefiltered specular cubemap, roughness increasing with mip level
    pub specular: Texture,
    pub irradiance: Texture,
    /// Split-sum scale (r) and bias (g), clamped to edge
    pub brdf_lut: Texture,
}

impl IblMaps {
    pub fn delete<B: GraphicsBackend>(&mut self, rm: &mut ResourceManager<B>) {
        rm.delete_texture(&mut self.brdf_lut);
        rm.delete_texture(&mut self.irradiance);
        rm.delete_texture(&mut self.specular);
    }
}

/// One dispatch of the specular prefilter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefilterLevel {
    pub level: u32,
    pub size: u32,
    pub roughness: f32,
    pub groups: u32,
}

/// Dispatches filling mips `1..levels` of a `size` cubemap
pub fn prefilter_schedule(size: u32, levels: u32) -> Vec<PrefilterLevel> {
    let delta_roughness = 1.0 / (levels.saturating_sub(1)).max(1) as f32;
    (1..levels)
        .map(|level| {
            let size = (size >> level).max(1);
            PrefilterLevel {
                level,
                size,
                roughness: level as f32 * delta_roughness,
                groups: workgroup_count(size),
            }
        })
        .collect()
}

/// Objects that only live for one stage
#[derive(Default)]
struct Scratch {
    program: Program,
    textures: Vec<Texture>,
    views: Vec<TextureViewHandle>,
    bind_groups: Vec<BindGroupHandle>,
    uniforms: Vec<UniformBuffer<PrefilterUniform>>,
}

impl Scratch {
    fn release<B: GraphicsBackend>(mut self, rm: &mut ResourceManager<B>) {
        for bind_group in self.bind_groups.drain(..) {
            rm.backend_mut().destroy_bind_group(bind_group);
        }
        for view in self.views.drain(..) {
            rm.backend_mut().destroy_texture_view(view);
        }
        for uniform in &mut self.uniforms {
            rm.delete_uniform_buffer(uniform);
        }
        for texture in &mut self.textures {
            rm.delete_texture(texture);
        }
        rm.delete_program(&mut self.program);
    }
}

fn compute_program<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    library: &ShaderLibrary,
    name: &str,
    entries: Vec<BindGroupLayoutEntry>,
) -> RendererResult<Program> {
    let shader = rm.compile_shader(library, name, ShaderStage::Compute)?;
    rm.link_program(
        vec![shader],
        &ProgramLayout::Compute {
            label: name.to_string(),
            bind_groups: vec![entries],
        },
    )
}

fn storage_view<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    scratch: &mut Scratch,
    texture: &Texture,
    level: u32,
) -> RendererResult<TextureViewHandle> {
    let handle = texture
        .handle
        .ok_or(RendererError::InvalidState("storage target was deleted"))?;
    let desc = match texture.kind {
        Some(TextureKind::Cube) => TextureViewDescriptor::mip_layers(level, 6),
        _ => TextureViewDescriptor {
            dimension: Some(TextureViewDimension::D2),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        },
    };
    let view = rm.backend_mut().create_texture_view(handle, &desc)?;
    scratch.views.push(view);
    Ok(view)
}

fn sampled(texture: &Texture) -> RendererResult<(TextureViewHandle, SamplerHandle)> {
    texture
        .view
        .zip(texture.sampler)
        .ok_or(RendererError::InvalidState("sampled texture was deleted"))
}

fn dispatch<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    scratch: &mut Scratch,
    label: &str,
    entries: &[(u32, BindGroupEntry)],
    groups: (u32, u32, u32),
) -> RendererResult<()> {
    let layout = scratch.program.bind_group_layout(0)?;
    let pipeline = scratch
        .program
        .compute_pipeline()
        .ok_or(RendererError::InvalidState("not a compute program"))?;
    let bind_group = rm.backend_mut().create_bind_group(layout, entries)?;
    scratch.bind_groups.push(bind_group);

    let backend = rm.backend_mut();
    backend.begin_compute_pass(Some(label));
    backend.set_compute_pipeline(pipeline);
    backend.set_bind_group(0, bind_group);
    backend.dispatch_compute(groups.0, groups.1, groups.2);
    backend.end_compute_pass();
    Ok(())
}

/// Run `stage` inside its own command buffer, releasing its scratch objects afterwards
fn run_stage<B, F>(rm: &mut ResourceManager<B>, label: &str, stage: F) -> RendererResult<()>
where
    B: GraphicsBackend,
    F: FnOnce(&mut ResourceManager<B>, &mut Scratch) -> RendererResult<()>,
{
    log::debug!("IBL stage: {}", label);
    let mut scratch = Scratch::default();
    rm.backend_mut().begin_commands(label);
    let result = stage(rm, &mut scratch);
    rm.backend_mut().submit_commands();
    scratch.release(rm);
    result
}

/// Build the specular, irradiance and BRDF maps from an equirectangular image
pub fn precompute<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    library: &ShaderLibrary,
    environment: &ImageData,
    settings: &IblSettings,
) -> RendererResult<IblMaps> {
    let mut maps = IblMaps::default();
    match build(rm, library, environment, settings, &mut maps) {
        Ok(()) => {
            log::info!(
                "IBL maps ready: specular {}x{} ({} levels), irradiance {}x{}, BRDF LUT {}x{}",
                maps.specular.width,
                maps.specular.height,
                maps.specular.levels,
                maps.irradiance.width,
                maps.irradiance.height,
                maps.brdf_lut.width,
                maps.brdf_lut.height
            );
            Ok(maps)
        }
        Err(e) => {
            maps.delete(rm);
            Err(e)
        }
    }
}

fn build<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    library: &ShaderLibrary,
    environment: &ImageData,
    settings: &IblSettings,
    maps: &mut IblMaps,
) -> RendererResult<()> {
    let env_size = settings.environment_size;
    let mut unfiltered =
        rm.create_texture("Environment Unfiltered", TextureKind::Cube, env_size, env_size, IBL_FORMAT, 0)?;

    let result = filter_environment(rm, library, environment, settings, &unfiltered, maps);
    rm.delete_texture(&mut unfiltered);
    result?;

    // Irradiance reads the already prefiltered specular map
    maps.irradiance = rm.create_texture(
        "Irradiance",
        TextureKind::Cube,
        settings.irradiance_size,
        settings.irradiance_size,
        IBL_FORMAT,
        1,
    )?;
    run_stage(rm, "irmap", |rm, scratch| {
        scratch.program = compute_program(
            rm,
            library,
            "irmap",
            vec![
                texture_entry(0, TextureViewDimension::Cube, ShaderStageFlags::COMPUTE),
                sampler_entry(1, ShaderStageFlags::COMPUTE),
                storage_entry(2, IBL_FORMAT, TextureViewDimension::D2Array),
            ],
        )?;
        let (env_view, env_sampler) = sampled(&maps.specular)?;
        let target = storage_view(rm, scratch, &maps.irradiance, 0)?;
        let groups = workgroup_count(maps.irradiance.width);
        dispatch(
            rm,
            scratch,
            "irmap",
            &[
                (0, BindGroupEntry::Texture(env_view)),
                (1, BindGroupEntry::Sampler(env_sampler)),
                (2, BindGroupEntry::StorageTexture(target)),
            ],
            (groups, groups, 6),
        )
    })?;

    maps.brdf_lut = rm.create_texture(
        "BRDF LUT",
        TextureKind::D2,
        settings.brdf_lut_size,
        settings.brdf_lut_size,
        IBL_FORMAT,
        1,
    )?;
    rm.set_texture_wrap(&mut maps.brdf_lut, AddressMode::ClampToEdge)?;
    run_stage(rm, "spbrdf", |rm, scratch| {
        scratch.program = compute_program(
            rm,
            library,
            "spbrdf",
            vec![storage_entry(0, IBL_FORMAT, TextureViewDimension::D2)],
        )?;
        let target = storage_view(rm, scratch, &maps.brdf_lut, 0)?;
        let groups = workgroup_count(maps.brdf_lut.width);
        dispatch(
            rm,
            scratch,
            "spbrdf",
            &[(0, BindGroupEntry::StorageTexture(target))],
            (groups, groups, 1),
        )
    })
}

/// Stages 1 and 2: project the equirect image, then prefilter into `maps.specular`
fn filter_environment<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    library: &ShaderLibrary,
    environment: &ImageData,
    settings: &IblSettings,
    unfiltered: &Texture,
    maps: &mut IblMaps,
) -> RendererResult<()> {
    run_stage(rm, "equirect2cube", |rm, scratch| {
        scratch.program = compute_program(
            rm,
            library,
            "equirect2cube",
            vec![
                texture_entry(0, TextureViewDimension::D2, ShaderStageFlags::COMPUTE),
                sampler_entry(1, ShaderStageFlags::COMPUTE),
                storage_entry(2, IBL_FORMAT, TextureViewDimension::D2Array),
            ],
        )?;
        let equirect = rm.create_texture_from_image("Environment Equirect", environment, IBL_FORMAT, 1)?;
        scratch.textures.push(equirect);
        let (source_view, source_sampler) = sampled(&scratch.textures[0])?;
        let target = storage_view(rm, scratch, unfiltered, 0)?;
        let groups = workgroup_count(unfiltered.width);
        dispatch(
            rm,
            scratch,
            "equirect2cube",
            &[
                (0, BindGroupEntry::Texture(source_view)),
                (1, BindGroupEntry::Sampler(source_sampler)),
                (2, BindGroupEntry::StorageTexture(target)),
            ],
            (groups, groups, 6),
        )?;
        if let Some(handle) = unfiltered.handle {
            rm.backend_mut().generate_mipmaps(handle);
        }
        Ok(())
    })?;

    let env_size = settings.environment_size;
    maps.specular = rm.create_texture("Environment", TextureKind::Cube, env_size, env_size, IBL_FORMAT, 0)?;
    run_stage(rm, "spmap", |rm, scratch| {
        scratch.program = compute_program(
            rm,
            library,
            "spmap",
            vec![
                texture_entry(0, TextureViewDimension::Cube, ShaderStageFlags::COMPUTE),
                sampler_entry(1, ShaderStageFlags::COMPUTE),
                storage_entry(2, IBL_FORMAT, TextureViewDimension::D2Array),
                uniform_entry(3, ShaderStageFlags::COMPUTE),
            ],
        )?;

        // Roughness 0 is a mirror reflection, copied unfiltered
        if let (Some(src), Some(dst)) = (unfiltered.handle, maps.specular.handle) {
            rm.backend_mut().copy_texture_to_texture(src, dst, 0);
        }

        let (source_view, source_sampler) = sampled(unfiltered)?;
        for step in prefilter_schedule(maps.specular.width, maps.specular.levels) {
            let uniform = rm.create_uniform_buffer::<PrefilterUniform>()?;
            rm.update_uniform_buffer(&uniform, &PrefilterUniform::new(step.roughness));
            let buffer = uniform.handle;
            scratch.uniforms.push(uniform);
            let Some(buffer) = buffer else {
                continue;
            };

            let target = storage_view(rm, scratch, &maps.specular, step.level)?;
            log::trace!(
                "spmap level {} ({}x{}) roughness {:.3}",
                step.level,
                step.size,
                step.size,
                step.roughness
            );
            dispatch(
                rm,
                scratch,
                "spmap",
                &[
                    (0, BindGroupEntry::Texture(source_view)),
                    (1, BindGroupEntry::Sampler(source_sampler)),
                    (2, BindGroupEntry::StorageTexture(target)),
                    (
                        3,
                        BindGroupEntry::Buffer {
                            buffer,
                            offset: 0,
                            size: None,
                        },
                    ),
                ],
                (step.groups, step.groups, 6),
            )?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource_manager::num_mipmap_levels;

    #[test]
    fn test_workgroup_count_covers_small_mips() {
        assert_eq!(workgroup_count(1024), 64);
        assert_eq!(workgroup_count(32), 2);
        assert_eq!(workgroup_count(17), 2);
        assert_eq!(workgroup_count(8), 1);
        assert_eq!(workgroup_count(1), 1);
    }

    #[test]
    fn test_prefilter_schedule_maps_level_to_roughness() {
        let levels = num_mipmap_levels(1024, 1024);
        let schedule = prefilter_schedule(1024, levels);
        assert_eq!(schedule.len(), 10);
        assert_eq!(schedule.first().map(|s| s.level), Some(1));
        assert_eq!(schedule.last().map(|s| s.level), Some(10));

        for step in &schedule {
            assert_eq!(step.roughness, step.level as f32 * (1.0 / 10.0));
            assert_eq!(step.size, 1024 >> step.level);
            assert_eq!(step.groups, step.size.div_ceil(WORKGROUP_SIZE).max(1));
        }
        let last = schedule[schedule.len() - 1];
        assert_eq!(last.size, 1);
        assert!((last.roughness - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_level_has_no_prefilter_dispatches() {
        assert!(prefilter_schedule(1, 1).is_empty());
    }
}
