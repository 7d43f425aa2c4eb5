//! Per-frame rendering
//!
//! Skybox and model go into the offscreen (possibly multisampled) framebuffer,
//! which is resolved and then tone mapped onto the swapchain image.

use glam::{Mat4, Vec3, Vec4};

use crate::backend::*;
use crate::error::{RendererError, RendererResult};
use crate::resources::ShaderLibrary;

use super::ibl::IblMaps;
use super::resource_manager::{
    sampler_entry, texture_entry, uniform_entry, FrameBuffer, MeshBuffer, Program, ProgramLayout,
    RenderProgramLayout, ResourceManager, Texture, UniformBuffer,
};
use super::settings::{CameraSettings, SceneSettings, MAX_LIGHTS};
use super::uniforms::{LightUniform, ShadingUniform, TransformUniform};
use super::uploader::SceneAssets;

pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

const NEAR_PLANE: f32 = 1.0;
const FAR_PLANE: f32 = 1000.0;

/// Rotation about X by `pitch` then about Y by `yaw`, both in degrees
pub fn euler_xy(pitch: f32, yaw: f32) -> Mat4 {
    Mat4::from_rotation_x(pitch.to_radians()) * Mat4::from_rotation_y(yaw.to_radians())
}

/// Uniform block contents for one frame
pub fn frame_uniforms(
    camera: &CameraSettings,
    scene: &SceneSettings,
    aspect_ratio: f32,
) -> (TransformUniform, ShadingUniform) {
    let projection = Mat4::perspective_rh(camera.fov.to_radians(), aspect_ratio, NEAR_PLANE, FAR_PLANE);
    let view_rotation = euler_xy(camera.pitch, camera.yaw);
    let scene_rotation = euler_xy(scene.pitch, scene.yaw);
    let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -camera.distance)) * view_rotation;
    let eye_position = view.inverse().w_axis.truncate();

    let transform = TransformUniform {
        view_projection: projection * view,
        sky_projection: projection * view_rotation,
        scene_rotation,
    };

    // Disabled lights keep their slot with zero radiance
    let mut lights = [LightUniform::default(); MAX_LIGHTS];
    for (slot, light) in lights.iter_mut().zip(scene.lights.iter()) {
        slot.direction = light.direction.extend(0.0);
        slot.radiance = if light.enabled {
            light.radiance.extend(0.0)
        } else {
            Vec4::ZERO
        };
    }

    let shading = ShadingUniform {
        lights,
        eye_position: eye_position.extend(0.0),
    };
    (transform, shading)
}

/// Programs, uniform buffers and bind groups used every frame
#[derive(Debug, Default)]
pub struct FramePipeline {
    pub transform_ub: UniformBuffer<TransformUniform>,
    pub shading_ub: UniformBuffer<ShadingUniform>,
    pub tonemap_program: Program,
    pub skybox_program: Program,
    pub pbr_program: Program,
    bind_groups: FrameBindGroups,
}

#[derive(Debug, Default)]
struct FrameBindGroups {
    skybox_uniforms: Option<BindGroupHandle>,
    skybox_textures: Option<BindGroupHandle>,
    pbr_uniforms: Option<BindGroupHandle>,
    pbr_textures: Option<BindGroupHandle>,
    tonemap_textures: Option<BindGroupHandle>,
}

impl FrameBindGroups {
    fn all(&self) -> [Option<BindGroupHandle>; 5] {
        [
            self.skybox_uniforms,
            self.skybox_textures,
            self.pbr_uniforms,
            self.pbr_textures,
            self.tonemap_textures,
        ]
    }
}

fn program<B: GraphicsBackend>(
    rm: &mut ResourceManager<B>,
    library: &ShaderLibrary,
    name: &str,
    layout: RenderProgramLayout,
) -> RendererResult<Program> {
    let vs = rm.compile_shader(library, name, ShaderStage::Vertex)?;
    let fs = match rm.compile_shader(library, name, ShaderStage::Fragment) {
        Ok(fs) => fs,
        Err(e) => {
            rm.backend_mut().destroy_shader_module(vs.module);
            return Err(e);
        }
    };
    rm.link_program(vec![vs, fs], &ProgramLayout::Render(layout))
}

fn sampled(texture: &Texture) -> RendererResult<[BindGroupEntry; 2]> {
    match (texture.view, texture.sampler) {
        (Some(view), Some(sampler)) => Ok([BindGroupEntry::Texture(view), BindGroupEntry::Sampler(sampler)]),
        _ => Err(RendererError::InvalidState("texture used before creation")),
    }
}

fn uniform<T>(buffer: &UniformBuffer<T>) -> RendererResult<BindGroupEntry> {
    buffer
        .handle
        .map(|buffer| BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        })
        .ok_or(RendererError::InvalidState("uniform buffer used before creation"))
}

impl FramePipeline {
    /// Uniform buffers and the three graphics programs
    pub fn new<B: GraphicsBackend>(
        rm: &mut ResourceManager<B>,
        library: &ShaderLibrary,
        samples: u32,
        vertex_layout: &VertexBufferLayout,
    ) -> RendererResult<Self> {
        let mut pipeline = Self::default();
        if let Err(e) = pipeline.build(rm, library, samples, vertex_layout) {
            pipeline.delete(rm);
            return Err(e);
        }
        Ok(pipeline)
    }

    fn build<B: GraphicsBackend>(
        &mut self,
        rm: &mut ResourceManager<B>,
        library: &ShaderLibrary,
        samples: u32,
        vertex_layout: &VertexBufferLayout,
    ) -> RendererResult<()> {
        let fragment = ShaderStageFlags::FRAGMENT;
        self.transform_ub = rm.create_uniform_buffer()?;
        self.shading_ub = rm.create_uniform_buffer()?;

        let swapchain_format = rm.backend().swapchain_format();
        self.tonemap_program = program(
            rm,
            library,
            "tonemap",
            RenderProgramLayout {
                label: "tonemap".into(),
                bind_groups: vec![vec![
                    texture_entry(0, TextureViewDimension::D2, fragment),
                    sampler_entry(1, fragment),
                ]],
                vertex_layouts: vec![],
                cull_mode: CullMode::None,
                depth_stencil: None,
                color_format: swapchain_format,
                sample_count: 1,
            },
        )?;

        // Always behind everything: no depth test, no depth writes
        self.skybox_program = program(
            rm,
            library,
            "skybox",
            RenderProgramLayout {
                label: "skybox".into(),
                bind_groups: vec![
                    vec![uniform_entry(0, ShaderStageFlags::VERTEX)],
                    vec![
                        texture_entry(0, TextureViewDimension::Cube, fragment),
                        sampler_entry(1, fragment),
                    ],
                ],
                vertex_layouts: vec![vertex_layout.clone()],
                cull_mode: CullMode::None,
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::Always,
                }),
                color_format: HDR_FORMAT,
                sample_count: samples.max(1),
            },
        )?;

        // Units: albedo, normal, metalness, roughness, specular, irradiance, BRDF LUT
        let dimensions = [
            TextureViewDimension::D2,
            TextureViewDimension::D2,
            TextureViewDimension::D2,
            TextureViewDimension::D2,
            TextureViewDimension::Cube,
            TextureViewDimension::Cube,
            TextureViewDimension::D2,
        ];
        let texture_entries = dimensions
            .iter()
            .enumerate()
            .flat_map(|(unit, &dimension)| {
                let unit = unit as u32;
                [
                    texture_entry(2 * unit, dimension, fragment),
                    sampler_entry(2 * unit + 1, fragment),
                ]
            })
            .collect();

        self.pbr_program = program(
            rm,
            library,
            "pbr",
            RenderProgramLayout {
                label: "pbr".into(),
                bind_groups: vec![
                    vec![
                        uniform_entry(0, ShaderStageFlags::VERTEX_FRAGMENT),
                        uniform_entry(1, fragment),
                    ],
                    texture_entries,
                ],
                vertex_layouts: vec![vertex_layout.clone()],
                cull_mode: CullMode::Back,
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::Less,
                }),
                color_format: HDR_FORMAT,
                sample_count: samples.max(1),
            },
        )?;
        Ok(())
    }

    /// Bind the uploaded assets, the IBL maps and the resolved color target
    pub fn bind<B: GraphicsBackend>(
        &mut self,
        rm: &mut ResourceManager<B>,
        assets: &SceneAssets,
        ibl: &IblMaps,
        resolve: &FrameBuffer,
    ) -> RendererResult<()> {
        let transform = uniform(&self.transform_ub)?;
        let shading = uniform(&self.shading_ub)?;

        let layout = self.skybox_program.bind_group_layout(0)?;
        self.bind_groups.skybox_uniforms =
            Some(rm.backend_mut().create_bind_group(layout, &[(0, transform.clone())])?);

        let layout = self.skybox_program.bind_group_layout(1)?;
        let [view, sampler] = sampled(&ibl.specular)?;
        self.bind_groups.skybox_textures =
            Some(rm.backend_mut().create_bind_group(layout, &[(0, view), (1, sampler)])?);

        let layout = self.pbr_program.bind_group_layout(0)?;
        self.bind_groups.pbr_uniforms =
            Some(rm.backend_mut().create_bind_group(layout, &[(0, transform), (1, shading)])?);

        let units = [
            &assets.albedo,
            &assets.normal,
            &assets.metalness,
            &assets.roughness,
            &ibl.specular,
            &ibl.irradiance,
            &ibl.brdf_lut,
        ];
        let mut entries = Vec::with_capacity(units.len() * 2);
        for (unit, texture) in units.into_iter().enumerate() {
            let [view, sampler] = sampled(texture)?;
            entries.push((2 * unit as u32, view));
            entries.push((2 * unit as u32 + 1, sampler));
        }
        let layout = self.pbr_program.bind_group_layout(1)?;
        self.bind_groups.pbr_textures = Some(rm.backend_mut().create_bind_group(layout, &entries)?);

        let (Some(color), Some(sampler)) = (resolve.color_target, resolve.color_sampler) else {
            return Err(RendererError::InvalidState("resolve framebuffer has no sampleable color"));
        };
        let layout = self.tonemap_program.bind_group_layout(0)?;
        self.bind_groups.tonemap_textures = Some(rm.backend_mut().create_bind_group(
            layout,
            &[
                (0, BindGroupEntry::Texture(color.view)),
                (1, BindGroupEntry::Sampler(sampler)),
            ],
        )?);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bind_groups.all().iter().all(Option::is_some)
    }

    /// Upload this frame's uniforms and record the frame, up to presenting it
    pub fn render<B: GraphicsBackend>(
        &self,
        rm: &mut ResourceManager<B>,
        framebuffer: &FrameBuffer,
        resolve: &FrameBuffer,
        assets: &SceneAssets,
        camera: &CameraSettings,
        scene: &SceneSettings,
    ) -> RendererResult<()> {
        let groups = &self.bind_groups;
        let (
            Some(skybox_uniforms),
            Some(skybox_textures),
            Some(pbr_uniforms),
            Some(pbr_textures),
            Some(tonemap_textures),
        ) = (
            groups.skybox_uniforms,
            groups.skybox_textures,
            groups.pbr_uniforms,
            groups.pbr_textures,
            groups.tonemap_textures,
        )
        else {
            return Err(RendererError::InvalidState("frame resources are not bound"));
        };
        let (Some(skybox_pipeline), Some(pbr_pipeline), Some(tonemap_pipeline)) = (
            self.skybox_program.render_pipeline(),
            self.pbr_program.render_pipeline(),
            self.tonemap_program.render_pipeline(),
        ) else {
            return Err(RendererError::InvalidState("frame programs are not linked"));
        };
        let (Some(color), Some(depth)) = (framebuffer.color_target, framebuffer.depth_stencil_target) else {
            return Err(RendererError::InvalidState("framebuffer is missing attachments"));
        };

        let aspect_ratio = framebuffer.width as f32 / framebuffer.height.max(1) as f32;
        let (transform, shading) = frame_uniforms(camera, scene, aspect_ratio);
        rm.update_uniform_buffer(&self.transform_ub, &transform);
        rm.update_uniform_buffer(&self.shading_ub, &shading);

        let frame = match rm.backend_mut().begin_frame() {
            Ok(frame) => frame,
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, reconfiguring");
                let (width, height) = rm.backend().surface_size();
                rm.backend_mut().resize(width, height);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Color is fully covered by the skybox, only depth needs clearing
        let backend = rm.backend_mut();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Scene".into()),
            color_attachments: vec![ColorAttachment {
                view: color.view,
                resolve_target: None,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth.view,
                depth_load_op: DepthLoadOp::Clear(1.0),
                depth_store_op: StoreOp::Store,
            }),
        });

        backend.set_render_pipeline(skybox_pipeline);
        backend.set_bind_group(0, skybox_uniforms);
        backend.set_bind_group(1, skybox_textures);
        draw_mesh(backend, &assets.skybox);

        backend.set_render_pipeline(pbr_pipeline);
        backend.set_bind_group(0, pbr_uniforms);
        backend.set_bind_group(1, pbr_textures);
        draw_mesh(backend, &assets.model);
        backend.end_render_pass();

        rm.resolve_frame_buffer(framebuffer, resolve)?;

        let backend = rm.backend_mut();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Tonemap".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(tonemap_pipeline);
        backend.set_bind_group(0, tonemap_textures);
        // Fullscreen triangle generated from the vertex index
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        backend.end_frame()?;
        Ok(())
    }

    /// Bind groups only; used before the resources they reference go away
    pub fn unbind<B: GraphicsBackend>(&mut self, rm: &mut ResourceManager<B>) {
        for bind_group in self.bind_groups.all().into_iter().flatten() {
            rm.backend_mut().destroy_bind_group(bind_group);
        }
        self.bind_groups = FrameBindGroups::default();
    }

    pub fn delete<B: GraphicsBackend>(&mut self, rm: &mut ResourceManager<B>) {
        self.unbind(rm);
        rm.delete_program(&mut self.pbr_program);
        rm.delete_program(&mut self.skybox_program);
        rm.delete_program(&mut self.tonemap_program);
        rm.delete_uniform_buffer(&mut self.shading_ub);
        rm.delete_uniform_buffer(&mut self.transform_ub);
    }
}

fn draw_mesh<B: GraphicsBackend>(backend: &mut B, mesh: &MeshBuffer) {
    let (Some(vertices), Some(indices)) = (mesh.vertex_buffer, mesh.index_buffer) else {
        return;
    };
    backend.set_vertex_buffer(0, vertices, 0);
    backend.set_index_buffer(indices, 0, IndexFormat::Uint32);
    backend.draw_indexed(0..mesh.num_elements, 0, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn test_eye_position_from_default_camera() {
        let camera = CameraSettings::default();
        let (_, shading) = frame_uniforms(&camera, &SceneSettings::default(), 1.0);
        assert!(approx(shading.eye_position.truncate(), Vec3::new(0.0, 0.0, 150.0)));
        assert_eq!(shading.eye_position.w, 0.0);
    }

    #[test]
    fn test_eye_position_follows_yaw() {
        let camera = CameraSettings {
            yaw: 90.0,
            ..Default::default()
        };
        let (_, shading) = frame_uniforms(&camera, &SceneSettings::default(), 1.0);
        assert!(approx(shading.eye_position.truncate(), Vec3::new(-150.0, 0.0, 0.0)));
    }

    #[test]
    fn test_sky_projection_ignores_distance() {
        let near = CameraSettings {
            distance: 10.0,
            ..Default::default()
        };
        let far = CameraSettings {
            distance: 500.0,
            ..Default::default()
        };
        let scene = SceneSettings::default();
        let (a, _) = frame_uniforms(&near, &scene, 1.5);
        let (b, _) = frame_uniforms(&far, &scene, 1.5);
        assert_eq!(a.sky_projection, b.sky_projection);
        assert_ne!(a.view_projection, b.view_projection);
    }

    #[test]
    fn test_disabled_light_has_zero_radiance() {
        let mut scene = SceneSettings::default();
        scene.lights[1].enabled = true;
        let (_, shading) = frame_uniforms(&CameraSettings::default(), &scene, 1.0);
        assert_eq!(shading.lights[1].radiance, Vec4::new(1.0, 1.0, 1.0, 0.0));

        scene.lights[1].enabled = false;
        let (_, disabled) = frame_uniforms(&CameraSettings::default(), &scene, 1.0);
        assert_eq!(disabled.lights[1].radiance, Vec4::ZERO);
        assert_eq!(disabled.lights[1].direction, shading.lights[1].direction);
        assert_eq!(disabled.lights[1].direction, scene.lights[1].direction.extend(0.0));
    }

    #[test]
    fn test_scene_rotation_uses_scene_angles() {
        let scene = SceneSettings {
            pitch: 30.0,
            yaw: -45.0,
            ..Default::default()
        };
        let (transform, _) = frame_uniforms(&CameraSettings::default(), &scene, 1.0);
        assert_eq!(transform.scene_rotation, euler_xy(30.0, -45.0));
    }
}
