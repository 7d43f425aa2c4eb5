//! GPU resource lifetime management
//!
//! Every object the renderer owns is created here and released here. Records
//! returned to callers hold `Option` handles; deleting a record releases the
//! backend objects and resets it to its empty default, so deleting twice is a
//! no-op rather than a double free.

use std::marker::PhantomData;

use bytemuck::Pod;
use half::f16;

use crate::backend::*;
use crate::error::{RendererError, RendererResult};
use crate::resources::{ImageData, MeshData, Pixels, ShaderLibrary, Vertex};

/// Number of mip levels needed to reach 1x1 from `width x height`
pub fn num_mipmap_levels(width: u32, height: u32) -> u32 {
    let mut levels = 1;
    while ((width | height) >> levels) != 0 {
        levels += 1;
    }
    levels
}

/// Largest supported sample count not above `requested`; 0 means no multisampling
pub fn negotiate_sample_count(requested: u32, supported: &[u32]) -> u32 {
    let samples = supported
        .iter()
        .copied()
        .filter(|&count| count <= requested)
        .max()
        .unwrap_or(1);
    if samples <= 1 {
        0
    } else {
        samples
    }
}

fn supports_storage(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::Rgba16Float | TextureFormat::Rgba32Float)
}

/// A texture with its default view and sampling parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Texture {
    pub handle: Option<TextureHandle>,
    pub view: Option<TextureViewHandle>,
    pub sampler: Option<SamplerHandle>,
    pub kind: Option<TextureKind>,
    pub format: Option<TextureFormat>,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

impl Texture {
    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }
}

/// How a framebuffer attachment is backed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Sampleable single-sample texture
    Texture,
    /// Render-only storage, possibly multisampled
    Renderbuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
}

/// Offscreen render target set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBuffer {
    pub id: Option<FramebufferHandle>,
    pub color_target: Option<Attachment>,
    pub depth_stencil_target: Option<Attachment>,
    /// Present when the color target is a texture
    pub color_sampler: Option<SamplerHandle>,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
}

impl FrameBuffer {
    /// Sample count the attachments were created with
    pub fn attachment_sample_count(&self) -> u32 {
        self.samples.max(1)
    }
}

/// Vertex and index buffers of one mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuffer {
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    /// Attribute description the pipelines are built against
    pub vertex_layout: Option<VertexBufferLayout>,
    pub num_elements: u32,
}

/// Uniform buffer sized for exactly one `T`
#[derive(Debug)]
pub struct UniformBuffer<T> {
    pub handle: Option<BufferHandle>,
    _marker: PhantomData<T>,
}

impl<T> Default for UniformBuffer<T> {
    fn default() -> Self {
        Self {
            handle: None,
            _marker: PhantomData,
        }
    }
}

/// A compiled shader module and the stage it will be linked for
#[derive(Debug, Clone)]
pub struct Shader {
    pub module: ShaderModuleHandle,
    pub stage: ShaderStage,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Render(RenderPipelineHandle),
    Compute(ComputePipelineHandle),
}

/// A linked pipeline and the layouts of its bind groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub pipeline: Option<Pipeline>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

impl Program {
    pub fn render_pipeline(&self) -> Option<RenderPipelineHandle> {
        match self.pipeline {
            Some(Pipeline::Render(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn compute_pipeline(&self) -> Option<ComputePipelineHandle> {
        match self.pipeline {
            Some(Pipeline::Compute(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn bind_group_layout(&self, group: usize) -> RendererResult<BindGroupLayoutHandle> {
        self.bind_group_layouts
            .get(group)
            .copied()
            .ok_or(RendererError::InvalidState("program has no such bind group"))
    }
}

/// Fixed state of a graphics program
#[derive(Debug, Clone)]
pub struct RenderProgramLayout {
    pub label: String,
    pub bind_groups: Vec<Vec<BindGroupLayoutEntry>>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_format: TextureFormat,
    pub sample_count: u32,
}

#[derive(Debug, Clone)]
pub enum ProgramLayout {
    Render(RenderProgramLayout),
    Compute {
        label: String,
        bind_groups: Vec<Vec<BindGroupLayoutEntry>>,
    },
}

/// Creates and destroys every GPU object, on top of one backend
pub struct ResourceManager<B: GraphicsBackend> {
    backend: B,
    max_anisotropy: u16,
}

impl<B: GraphicsBackend> ResourceManager<B> {
    pub fn new(backend: B) -> Self {
        let max_anisotropy = backend.max_anisotropy();
        Self {
            backend,
            max_anisotropy,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // Textures

    /// Allocate storage for all levels; `levels == 0` derives a full mip chain
    pub fn create_texture(
        &mut self,
        label: &str,
        kind: TextureKind,
        width: u32,
        height: u32,
        format: TextureFormat,
        levels: u32,
    ) -> RendererResult<Texture> {
        let levels = if levels > 0 {
            levels
        } else {
            num_mipmap_levels(width, height)
        };

        let mut usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC;
        if supports_storage(format) {
            usage = usage | TextureUsage::STORAGE_BINDING;
        }
        if levels > 1 {
            // Mip generation renders into each level
            usage = usage | TextureUsage::RENDER_ATTACHMENT;
        }

        let handle = self.backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            kind,
            width,
            height,
            mip_levels: levels,
            sample_count: 1,
            format,
            usage,
        })?;

        let dimension = match kind {
            TextureKind::D2 => TextureViewDimension::D2,
            TextureKind::Cube => TextureViewDimension::Cube,
        };
        let view = self.backend.create_texture_view(
            handle,
            &TextureViewDescriptor {
                label: Some(label.to_string()),
                dimension: Some(dimension),
                ..Default::default()
            },
        );
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                self.backend.destroy_texture(handle);
                return Err(e.into());
            }
        };

        let mut texture = Texture {
            handle: Some(handle),
            view: Some(view),
            sampler: None,
            kind: Some(kind),
            format: Some(format),
            width,
            height,
            levels,
        };
        if let Err(e) = self.set_texture_wrap(&mut texture, AddressMode::Repeat) {
            self.delete_texture(&mut texture);
            return Err(e);
        }

        log::trace!(
            "Created texture {} ({}x{}, {:?}, {} levels)",
            label,
            width,
            height,
            format,
            levels
        );
        Ok(texture)
    }

    /// Create a 2D texture sized from `image`, upload its pixels and fill the mip chain
    pub fn create_texture_from_image(
        &mut self,
        label: &str,
        image: &ImageData,
        format: TextureFormat,
        levels: u32,
    ) -> RendererResult<Texture> {
        let texels = texel_bytes(image, format)?;
        let mut texture =
            self.create_texture(label, TextureKind::D2, image.width, image.height, format, levels)?;

        if let Some(handle) = texture.handle {
            self.backend
                .write_texture(handle, &texels, image.width, image.height);
            if texture.levels > 1 {
                self.backend.generate_mipmaps(handle);
            }
        } else {
            self.delete_texture(&mut texture);
            return Err(RendererError::InvalidState("texture lost its handle"));
        }
        Ok(texture)
    }

    /// Replace the texture's sampler with one using `wrap` on every axis
    pub fn set_texture_wrap(&mut self, texture: &mut Texture, wrap: AddressMode) -> RendererResult<()> {
        let mipmapped = texture.levels > 1;
        let sampler = self.backend.create_sampler(&SamplerDescriptor {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: if mipmapped {
                FilterMode::Linear
            } else {
                FilterMode::Nearest
            },
            address_mode_u: wrap,
            address_mode_v: wrap,
            address_mode_w: wrap,
            anisotropy_clamp: if mipmapped { self.max_anisotropy } else { 1 },
            compare: None,
        })?;

        if let Some(old) = texture.sampler.replace(sampler) {
            self.backend.destroy_sampler(old);
        }
        Ok(())
    }

    pub fn delete_texture(&mut self, texture: &mut Texture) {
        if let Some(sampler) = texture.sampler.take() {
            self.backend.destroy_sampler(sampler);
        }
        if let Some(view) = texture.view.take() {
            self.backend.destroy_texture_view(view);
        }
        if let Some(handle) = texture.handle.take() {
            self.backend.destroy_texture(handle);
        }
        *texture = Texture::default();
    }

    // Framebuffers

    /// Create a render target set. With `samples > 0` both attachments are
    /// multisampled renderbuffers, otherwise the color target is a sampleable
    /// texture. Completeness is checked after each attachment.
    pub fn create_frame_buffer(
        &mut self,
        width: u32,
        height: u32,
        samples: u32,
        color_format: Option<TextureFormat>,
        depth_stencil_format: Option<TextureFormat>,
    ) -> RendererResult<FrameBuffer> {
        let mut framebuffer = FrameBuffer {
            width,
            height,
            samples,
            ..Default::default()
        };

        let result = self.attach_targets(&mut framebuffer, color_format, depth_stencil_format);
        if let Err(e) = result {
            self.delete_frame_buffer(&mut framebuffer);
            return Err(e);
        }
        log::debug!(
            "Created framebuffer {}x{} ({} samples)",
            width,
            height,
            samples
        );
        Ok(framebuffer)
    }

    fn attach_targets(
        &mut self,
        framebuffer: &mut FrameBuffer,
        color_format: Option<TextureFormat>,
        depth_stencil_format: Option<TextureFormat>,
    ) -> RendererResult<()> {
        let mut desc = FramebufferDescriptor {
            label: None,
            color: None,
            depth_stencil: None,
        };

        if let Some(format) = color_format {
            let kind = if framebuffer.samples > 0 {
                AttachmentKind::Renderbuffer
            } else {
                AttachmentKind::Texture
            };
            let attachment = self.create_attachment(framebuffer, kind, format)?;
            framebuffer.color_target = Some(attachment);
            if kind == AttachmentKind::Texture {
                framebuffer.color_sampler = Some(self.backend.create_sampler(&SamplerDescriptor {
                    label: Some("Framebuffer Color Sampler".into()),
                    mipmap_filter: FilterMode::Nearest,
                    ..Default::default()
                })?);
            }
            desc.color = Some(attachment.view);
            self.check_status(&desc)?;
        }

        if let Some(format) = depth_stencil_format {
            let attachment = self.create_attachment(framebuffer, AttachmentKind::Renderbuffer, format)?;
            framebuffer.depth_stencil_target = Some(attachment);
            desc.depth_stencil = Some(attachment.view);
            self.check_status(&desc)?;
        }

        self.check_status(&desc)?;
        framebuffer.id = Some(self.backend.create_framebuffer(&desc)?);
        Ok(())
    }

    fn create_attachment(
        &mut self,
        framebuffer: &FrameBuffer,
        kind: AttachmentKind,
        format: TextureFormat,
    ) -> RendererResult<Attachment> {
        let mut usage = TextureUsage::RENDER_ATTACHMENT;
        if kind == AttachmentKind::Texture {
            usage = usage | TextureUsage::TEXTURE_BINDING;
        }
        let texture = self.backend.create_texture(&TextureDescriptor {
            label: Some(format!("{:?} {:?}", kind, format)),
            kind: TextureKind::D2,
            width: framebuffer.width,
            height: framebuffer.height,
            mip_levels: 1,
            sample_count: framebuffer.attachment_sample_count(),
            format,
            usage,
        })?;
        match self
            .backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
        {
            Ok(view) => Ok(Attachment { kind, texture, view }),
            Err(e) => {
                self.backend.destroy_texture(texture);
                Err(e.into())
            }
        }
    }

    fn check_status(&self, desc: &FramebufferDescriptor) -> RendererResult<()> {
        let status = self.backend.check_framebuffer_status(desc);
        if status.is_complete() {
            Ok(())
        } else {
            Err(RendererError::FramebufferIncomplete(status))
        }
    }

    pub fn delete_frame_buffer(&mut self, framebuffer: &mut FrameBuffer) {
        if let Some(id) = framebuffer.id.take() {
            self.backend.destroy_framebuffer(id);
        }
        if let Some(sampler) = framebuffer.color_sampler.take() {
            self.backend.destroy_sampler(sampler);
        }
        for attachment in [framebuffer.color_target.take(), framebuffer.depth_stencil_target.take()]
            .into_iter()
            .flatten()
        {
            self.backend.destroy_texture_view(attachment.view);
            self.backend.destroy_texture(attachment.texture);
        }
        *framebuffer = FrameBuffer::default();
    }

    /// Record a color resolve from `src` into `dst` and invalidate `src`'s
    /// attachments. Needs an open command encoder; no-op when both are the same.
    pub fn resolve_frame_buffer(&mut self, src: &FrameBuffer, dst: &FrameBuffer) -> RendererResult<()> {
        if src.id == dst.id {
            return Ok(());
        }
        let (Some(src_color), Some(dst_color)) = (src.color_target, dst.color_target) else {
            return Err(RendererError::InvalidState("resolve needs two color targets"));
        };
        if src.width != dst.width || src.height != dst.height {
            return Err(RendererError::InvalidState("resolve between different sizes"));
        }

        self.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Resolve".into()),
            color_attachments: vec![ColorAttachment {
                view: src_color.view,
                resolve_target: Some(dst_color.view),
                load_op: LoadOp::Load,
                store_op: StoreOp::Discard,
            }],
            depth_stencil_attachment: src.depth_stencil_target.map(|depth| DepthStencilAttachment {
                view: depth.view,
                depth_load_op: DepthLoadOp::Load,
                depth_store_op: StoreOp::Discard,
            }),
        });
        self.backend.end_render_pass();
        Ok(())
    }

    // Mesh buffers

    pub fn create_mesh_buffer(&mut self, mesh: &MeshData) -> RendererResult<MeshBuffer> {
        if mesh.vertices.is_empty() || mesh.faces.is_empty() {
            return Err(RendererError::InvalidState("mesh has no geometry"));
        }

        let vertex_buffer = self.backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Mesh Vertices".into()),
                size: std::mem::size_of_val(mesh.vertices.as_slice()) as u64,
                usage: BufferUsage::VERTEX,
                mapped_at_creation: false,
            },
            bytemuck::cast_slice(&mesh.vertices),
        )?;

        let index_buffer = self.backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Mesh Indices".into()),
                size: std::mem::size_of_val(mesh.faces.as_slice()) as u64,
                usage: BufferUsage::INDEX,
                mapped_at_creation: false,
            },
            bytemuck::cast_slice(&mesh.faces),
        );
        let index_buffer = match index_buffer {
            Ok(buffer) => buffer,
            Err(e) => {
                self.backend.destroy_buffer(vertex_buffer);
                return Err(e.into());
            }
        };

        Ok(MeshBuffer {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            vertex_layout: Some(Vertex::layout()),
            num_elements: mesh.element_count(),
        })
    }

    pub fn delete_mesh_buffer(&mut self, buffer: &mut MeshBuffer) {
        if let Some(handle) = buffer.vertex_buffer.take() {
            self.backend.destroy_buffer(handle);
        }
        if let Some(handle) = buffer.index_buffer.take() {
            self.backend.destroy_buffer(handle);
        }
        *buffer = MeshBuffer::default();
    }

    // Uniform buffers

    pub fn create_uniform_buffer<T: Pod>(&mut self) -> RendererResult<UniformBuffer<T>> {
        let handle = self.backend.create_buffer(&BufferDescriptor {
            label: Some(std::any::type_name::<T>().to_string()),
            size: std::mem::size_of::<T>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        Ok(UniformBuffer {
            handle: Some(handle),
            _marker: PhantomData,
        })
    }

    pub fn update_uniform_buffer<T: Pod>(&mut self, buffer: &UniformBuffer<T>, data: &T) {
        if let Some(handle) = buffer.handle {
            self.backend.write_buffer(handle, 0, bytemuck::bytes_of(data));
        }
    }

    pub fn delete_uniform_buffer<T>(&mut self, buffer: &mut UniformBuffer<T>) {
        if let Some(handle) = buffer.handle.take() {
            self.backend.destroy_buffer(handle);
        }
    }

    // Programs

    pub fn compile_shader(
        &mut self,
        library: &ShaderLibrary,
        name: &str,
        stage: ShaderStage,
    ) -> RendererResult<Shader> {
        let source = library.source(name)?;
        log::debug!("Compiling shader: {} ({:?})", name, stage);
        let module = self
            .backend
            .create_shader_module(name, &source)
            .map_err(|e| match e {
                BackendError::ShaderCreationFailed(diagnostic) => RendererError::ShaderCompilation {
                    name: name.to_string(),
                    diagnostic,
                },
                other => other.into(),
            })?;
        Ok(Shader {
            module,
            stage,
            name: name.to_string(),
        })
    }

    /// Build a pipeline from compiled shaders. The shader modules are released
    /// whether or not linking succeeds.
    pub fn link_program(&mut self, shaders: Vec<Shader>, layout: &ProgramLayout) -> RendererResult<Program> {
        let result = self.link(&shaders, layout);
        for shader in shaders {
            self.backend.destroy_shader_module(shader.module);
        }
        result
    }

    fn link(&mut self, shaders: &[Shader], layout: &ProgramLayout) -> RendererResult<Program> {
        let find = |stage: ShaderStage| {
            shaders
                .iter()
                .find(|s| s.stage == stage)
                .map(|s| s.module)
                .ok_or_else(|| RendererError::ProgramLink(format!("no {:?} shader attached", stage)))
        };

        let bind_groups = match layout {
            ProgramLayout::Render(render) => &render.bind_groups,
            ProgramLayout::Compute { bind_groups, .. } => bind_groups,
        };
        let mut program = Program::default();
        for entries in bind_groups {
            match self.backend.create_bind_group_layout(entries) {
                Ok(handle) => program.bind_group_layouts.push(handle),
                Err(e) => {
                    self.delete_program(&mut program);
                    return Err(RendererError::ProgramLink(e.to_string()));
                }
            }
        }

        let pipeline = match layout {
            ProgramLayout::Render(render) => {
                let modules = find(ShaderStage::Vertex).and_then(|vs| Ok((vs, find(ShaderStage::Fragment)?)));
                match modules {
                    Ok((vertex_shader, fragment_shader)) => self
                        .backend
                        .create_render_pipeline(&RenderPipelineDescriptor {
                            label: Some(render.label.clone()),
                            vertex_shader,
                            fragment_shader: Some(fragment_shader),
                            vertex_layouts: render.vertex_layouts.clone(),
                            bind_group_layouts: program.bind_group_layouts.clone(),
                            primitive_topology: PrimitiveTopology::TriangleList,
                            front_face: FrontFace::Ccw,
                            cull_mode: render.cull_mode,
                            depth_stencil: render.depth_stencil.clone(),
                            color_targets: vec![ColorTargetState {
                                format: render.color_format,
                                write_mask: ColorWrites::ALL,
                            }],
                            sample_count: render.sample_count.max(1),
                        })
                        .map(Pipeline::Render)
                        .map_err(|e| RendererError::ProgramLink(e.to_string())),
                    Err(e) => Err(e),
                }
            }
            ProgramLayout::Compute { label, .. } => match find(ShaderStage::Compute) {
                Ok(shader) => self
                    .backend
                    .create_compute_pipeline(&ComputePipelineDescriptor {
                        label: Some(label.clone()),
                        shader,
                        entry_point: ShaderStage::Compute.entry_point().to_string(),
                        bind_group_layouts: program.bind_group_layouts.clone(),
                    })
                    .map(Pipeline::Compute)
                    .map_err(|e| RendererError::ProgramLink(e.to_string())),
                Err(e) => Err(e),
            },
        };

        match pipeline {
            Ok(pipeline) => {
                program.pipeline = Some(pipeline);
                Ok(program)
            }
            Err(e) => {
                self.delete_program(&mut program);
                Err(e)
            }
        }
    }

    pub fn delete_program(&mut self, program: &mut Program) {
        match program.pipeline.take() {
            Some(Pipeline::Render(handle)) => self.backend.destroy_render_pipeline(handle),
            Some(Pipeline::Compute(handle)) => self.backend.destroy_compute_pipeline(handle),
            None => {}
        }
        for layout in program.bind_group_layouts.drain(..) {
            self.backend.destroy_bind_group_layout(layout);
        }
    }
}

/// Filterable float texture binding
pub fn texture_entry(binding: u32, dimension: TextureViewDimension, visibility: ShaderStageFlags) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: dimension,
        },
    }
}

pub fn sampler_entry(binding: u32, visibility: ShaderStageFlags) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Sampler { comparison: false },
    }
}

pub fn uniform_entry(binding: u32, visibility: ShaderStageFlags) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::UniformBuffer,
    }
}

/// Write-only storage texture binding for compute kernels
pub fn storage_entry(binding: u32, format: TextureFormat, dimension: TextureViewDimension) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::COMPUTE,
        ty: BindingType::StorageTexture {
            format,
            view_dimension: dimension,
        },
    }
}

/// Convert decoded pixels into the byte layout of `format`.
///
/// Missing color channels read as 0 and a missing alpha as 1.
pub fn texel_bytes(image: &ImageData, format: TextureFormat) -> RendererResult<Vec<u8>> {
    enum Encoding {
        Unorm8,
        Float16,
        Float32,
    }

    let (channels, encoding) = match format {
        TextureFormat::R8Unorm => (1, Encoding::Unorm8),
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => (4, Encoding::Unorm8),
        TextureFormat::Rgba16Float => (4, Encoding::Float16),
        TextureFormat::Rgba32Float => (4, Encoding::Float32),
        _ => return Err(RendererError::InvalidState("format cannot be uploaded from an image")),
    };
    let expected = image.pixel_count() * image.channels as usize;
    let stored = match &image.pixels {
        Pixels::Ldr(data) => data.len(),
        Pixels::Hdr(data) => data.len(),
    };
    if stored < expected {
        return Err(RendererError::InvalidState("image holds fewer pixels than its size"));
    }

    let component = |i: usize, c: u32| -> f32 {
        image
            .component(i, c)
            .unwrap_or(if c == 3 { 1.0 } else { 0.0 })
    };

    let pixel_count = image.pixel_count();
    let mut out = Vec::with_capacity(pixel_count * format.bytes_per_pixel() as usize);
    for i in 0..pixel_count {
        for c in 0..channels {
            match encoding {
                Encoding::Unorm8 => {
                    let byte = match &image.pixels {
                        Pixels::Ldr(data) if c < image.channels => {
                            data[i * image.channels as usize + c as usize]
                        }
                        _ => (component(i, c).clamp(0.0, 1.0) * 255.0).round() as u8,
                    };
                    out.push(byte);
                }
                Encoding::Float16 => {
                    out.extend_from_slice(&f16::from_f32(component(i, c)).to_le_bytes())
                }
                Encoding::Float32 => out.extend_from_slice(&component(i, c).to_le_bytes()),
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig};
    use bytemuck::Zeroable;

    fn manager() -> (ResourceManager<HeadlessBackend>, crate::backend::headless::CommandRecorder) {
        let config = HeadlessConfig::default();
        let recorder = config.recorder.clone();
        let backend = HeadlessBackend::create(config, 64, 64, true).unwrap();
        (ResourceManager::new(backend), recorder)
    }

    #[test]
    fn test_num_mipmap_levels() {
        assert_eq!(num_mipmap_levels(1024, 1024), 11);
        assert_eq!(num_mipmap_levels(1, 1), 1);
        assert_eq!(num_mipmap_levels(300, 100), 9);
        assert_eq!(num_mipmap_levels(256, 1), 9);
        for size in 1..2048u32 {
            assert_eq!(num_mipmap_levels(size, 1), 1 + size.ilog2());
        }
    }

    #[test]
    fn test_negotiate_sample_count() {
        let supported = [1, 2, 4, 8];
        assert_eq!(negotiate_sample_count(16, &supported), 8);
        assert_eq!(negotiate_sample_count(4, &supported), 4);
        assert_eq!(negotiate_sample_count(3, &supported), 2);
        assert_eq!(negotiate_sample_count(1, &supported), 0);
        assert_eq!(negotiate_sample_count(0, &supported), 0);
        assert_eq!(negotiate_sample_count(16, &[1]), 0);
    }

    #[test]
    fn test_texture_levels_derived_when_zero() {
        let (mut rm, _) = manager();
        let mut texture = rm
            .create_texture("cube", TextureKind::Cube, 1024, 1024, TextureFormat::Rgba16Float, 0)
            .unwrap();
        assert_eq!(texture.levels, 11);
        assert!(texture.is_valid());

        rm.delete_texture(&mut texture);
        assert_eq!(texture, Texture::default());
        rm.delete_texture(&mut texture);
    }

    #[test]
    fn test_wrap_change_replaces_sampler() {
        let (mut rm, recorder) = manager();
        let mut lut = rm
            .create_texture("lut", TextureKind::D2, 256, 256, TextureFormat::Rgba16Float, 1)
            .unwrap();
        let before = recorder.live_resources();
        rm.set_texture_wrap(&mut lut, AddressMode::ClampToEdge).unwrap();
        assert_eq!(recorder.live_resources(), before);

        let samplers: Vec<_> = recorder
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                crate::backend::headless::RecordedCommand::CreateSampler {
                    address_mode,
                    mipmap_filter,
                    anisotropy_clamp,
                    ..
                } => Some((address_mode, mipmap_filter, anisotropy_clamp)),
                _ => None,
            })
            .collect();
        assert_eq!(
            samplers,
            vec![
                (AddressMode::Repeat, FilterMode::Nearest, 1),
                (AddressMode::ClampToEdge, FilterMode::Nearest, 1),
            ]
        );
    }

    #[test]
    fn test_single_sample_framebuffer_has_texture_color() {
        let (mut rm, _) = manager();
        let fb = rm
            .create_frame_buffer(64, 64, 0, Some(TextureFormat::Rgba16Float), Some(TextureFormat::Depth24PlusStencil8))
            .unwrap();
        let color = fb.color_target.unwrap();
        assert_eq!(color.kind, AttachmentKind::Texture);
        assert!(fb.color_sampler.is_some());
        assert_eq!(fb.depth_stencil_target.unwrap().kind, AttachmentKind::Renderbuffer);

        rm.backend_mut().begin_commands("resolve");
        rm.resolve_frame_buffer(&fb, &fb).unwrap();
        rm.backend_mut().submit_commands();
    }

    #[test]
    fn test_multisampled_resolve_invalidates_source() {
        let (mut rm, recorder) = manager();
        let mut msaa = rm
            .create_frame_buffer(32, 32, 4, Some(TextureFormat::Rgba16Float), Some(TextureFormat::Depth24PlusStencil8))
            .unwrap();
        let mut resolve = rm
            .create_frame_buffer(32, 32, 0, Some(TextureFormat::Rgba16Float), None)
            .unwrap();
        assert_eq!(msaa.color_target.unwrap().kind, AttachmentKind::Renderbuffer);
        assert!(resolve.depth_stencil_target.is_none());

        recorder.clear();
        rm.backend_mut().begin_commands("resolve");
        rm.resolve_frame_buffer(&msaa, &resolve).unwrap();
        rm.backend_mut().submit_commands();
        assert!(recorder.commands().iter().any(|c| matches!(
            c,
            crate::backend::headless::RecordedCommand::BeginRenderPass {
                resolves: true,
                color_load: Some(LoadOp::Load),
                color_store: Some(StoreOp::Discard),
                depth_load: Some(DepthLoadOp::Load),
                ..
            }
        )));

        rm.delete_frame_buffer(&mut resolve);
        rm.delete_frame_buffer(&mut msaa);
        assert_eq!(recorder.live_resources(), 0);
        assert_eq!(msaa, FrameBuffer::default());
    }

    #[test]
    fn test_framebuffer_without_attachments_is_incomplete() {
        let (mut rm, recorder) = manager();
        let err = rm.create_frame_buffer(16, 16, 0, None, None).unwrap_err();
        assert!(matches!(
            err,
            RendererError::FramebufferIncomplete(FramebufferStatus::MissingAttachment)
        ));
        assert_eq!(recorder.live_resources(), 0);
    }

    #[test]
    fn test_uniform_and_mesh_round_trip() {
        let (mut rm, recorder) = manager();
        let mut ub = rm.create_uniform_buffer::<[f32; 4]>().unwrap();
        rm.update_uniform_buffer(&ub, &[1.0, 2.0, 3.0, 4.0]);

        let mesh = MeshData {
            vertices: vec![Vertex::zeroed(); 3],
            faces: vec![crate::resources::Face { v1: 0, v2: 1, v3: 2 }],
        };
        let mut mb = rm.create_mesh_buffer(&mesh).unwrap();
        assert_eq!(mb.num_elements, 3);

        rm.delete_mesh_buffer(&mut mb);
        rm.delete_uniform_buffer(&mut ub);
        assert_eq!(mb, MeshBuffer::default());
        assert!(ub.handle.is_none());
        assert_eq!(recorder.live_resources(), 0);
    }

    #[test]
    fn test_texel_conversion_pads_channels() {
        let rgb = ImageData::from_ldr(1, 1, 3, vec![10, 20, 30]);
        assert_eq!(texel_bytes(&rgb, TextureFormat::Rgba8Unorm).unwrap(), vec![10, 20, 30, 255]);

        let gray = ImageData::from_ldr(2, 1, 1, vec![7, 9]);
        assert_eq!(texel_bytes(&gray, TextureFormat::R8Unorm).unwrap(), vec![7, 9]);

        let hdr = ImageData::from_hdr(1, 1, 3, vec![2.0, 0.5, 0.0]);
        let bytes = texel_bytes(&hdr, TextureFormat::Rgba16Float).unwrap();
        let halves: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect();
        assert_eq!(halves, vec![2.0, 0.5, 0.0, 1.0]);

        assert_eq!(texel_bytes(&hdr, TextureFormat::Rgba8Unorm).unwrap(), vec![255, 128, 0, 255]);
    }

    #[test]
    fn test_shader_errors_carry_name() {
        let dir = std::env::temp_dir().join(format!("pbr-ibl-shader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.wgsl"), "@vertex fn vs_main( -> {").unwrap();
        let library = ShaderLibrary::new(&dir);

        let (mut rm, _) = manager();
        match rm.compile_shader(&library, "broken", ShaderStage::Vertex) {
            Err(RendererError::ShaderCompilation { name, diagnostic }) => {
                assert_eq!(name, "broken");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            rm.compile_shader(&library, "absent", ShaderStage::Vertex),
            Err(RendererError::ShaderSource(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
