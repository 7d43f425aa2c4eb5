//! wgpu backend implementation

mod mipmap;

use crate::backend::traits::*;
use crate::backend::types::*;
use mipmap::MipmapGenerator;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Buffered compute pass command
#[derive(Clone)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

/// Pending compute pass with buffered commands
struct PendingComputePass {
    label: Option<String>,
    commands: Vec<ComputeCommand>,
}

struct StoredTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct StoredView {
    view: wgpu::TextureView,
    texture: u64,
    base_mip_level: u32,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    current_view_id: u64,  // ID used to identify the swapchain view handle

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, StoredTexture>,
    texture_views: HashMap<u64, StoredView>,
    samplers: HashMap<u64, wgpu::Sampler>,
    shader_modules: HashMap<u64, wgpu::ShaderModule>,
    bind_group_layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_sampler_id: u64,
    next_shader_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_render_pipeline_id: u64,
    next_compute_pipeline_id: u64,
    next_framebuffer_id: u64,

    mipmaps: MipmapGenerator,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending passes - commands are buffered here and executed on end_*_pass
    pending_render_pass: Option<PendingRenderPass>,
    pending_compute_pass: Option<PendingComputePass>,
}

impl WgpuBackend {
    pub(crate) fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> Option<TextureFormat> {
        match format {
            wgpu::TextureFormat::R8Unorm => Some(TextureFormat::R8Unorm),
            wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
            wgpu::TextureFormat::Rgba8UnormSrgb => Some(TextureFormat::Rgba8UnormSrgb),
            wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
            wgpu::TextureFormat::Bgra8UnormSrgb => Some(TextureFormat::Bgra8UnormSrgb),
            wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
            wgpu::TextureFormat::Rgba32Float => Some(TextureFormat::Rgba32Float),
            wgpu::TextureFormat::Depth32Float => Some(TextureFormat::Depth32Float),
            wgpu::TextureFormat::Depth24PlusStencil8 => Some(TextureFormat::Depth24PlusStencil8),
            _ => None,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_view_dimension(dimension: TextureViewDimension) -> wgpu::TextureViewDimension {
        match dimension {
            TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
            TextureViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
            TextureViewDimension::Cube => wgpu::TextureViewDimension::Cube,
        }
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn convert_load_op<T>(op: &LoadOp, clear: impl FnOnce(&[f32; 4]) -> T) -> wgpu::LoadOp<T> {
        match op {
            LoadOp::Clear(value) => wgpu::LoadOp::Clear(clear(value)),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_depth_load_op<T>(op: DepthLoadOp, clear: impl FnOnce(f32) -> T) -> wgpu::LoadOp<T> {
        match op {
            DepthLoadOp::Clear(value) => wgpu::LoadOp::Clear(clear(value)),
            DepthLoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_store_op(op: StoreOp) -> wgpu::StoreOp {
        match op {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    /// Sample counts both formats accept on this device
    fn multisample_counts(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Vec<u32> {
        let adapter_specific = device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);
        let features_of = |format: wgpu::TextureFormat| {
            if adapter_specific {
                adapter.get_texture_format_features(format)
            } else {
                format.guaranteed_format_features(device.features())
            }
        };
        let color = features_of(wgpu::TextureFormat::Rgba16Float);
        let depth = features_of(wgpu::TextureFormat::Depth24PlusStencil8);

        [1u32, 2, 4, 8, 16]
            .into_iter()
            .filter(|&count| {
                count == 1
                    || (color.flags.sample_count_supported(count)
                        && depth.flags.sample_count_supported(count))
            })
            .collect()
    }

    fn attachment_info(&self, view: TextureViewHandle) -> Option<AttachmentInfo> {
        let stored = self.texture_views.get(&view.0)?;
        let texture = self.textures.get(&stored.texture)?;
        Some(AttachmentInfo {
            width: (texture.desc.width >> stored.base_mip_level).max(1),
            height: (texture.desc.height >> stored.base_mip_level).max(1),
            sample_count: texture.desc.sample_count,
            format: texture.desc.format,
        })
    }
}

impl WgpuBackend {
    /// Async initialization, wrapped by `create`
    pub async fn new_async(
        window: Arc<winit::window::Window>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window).await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {}", error);
        }));

        let surface_caps = surface.get_capabilities(&adapter);
        // Tone mapping applies gamma itself, so prefer a linear surface format
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb() && Self::convert_texture_format_back(*f).is_some())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("Surface reports no formats".into())
            })?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let max_size = device.limits().max_texture_dimension_2d;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.clamp(1, max_size),
            height: height.clamp(1, max_size),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        let mipmaps = MipmapGenerator::new(&device);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            current_view_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            shader_modules: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            framebuffers: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_sampler_id: 1,
            next_shader_id: 1,
            next_layout_id: 1,
            next_bind_group_id: 1,
            next_render_pipeline_id: 1,
            next_compute_pipeline_id: 1,
            next_framebuffer_id: 1,
            mipmaps,
            encoder: None,
            pending_render_pass: None,
            pending_compute_pass: None,
        })
    }

    /// Native initialization
    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all);

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // Needed for sample counts above 4
        let required_features = adapter.features()
            & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("PBR Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    /// Run `create` inside a validation error scope and turn a captured error into `err`
    fn scoped<T>(
        device: &wgpu::Device,
        create: impl FnOnce() -> T,
        err: impl FnOnce(String) -> BackendError,
    ) -> BackendResult<T> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(err(error.to_string())),
            None => Ok(value),
        }
    }

    fn lookup_view<'a>(
        texture_views: &'a HashMap<u64, StoredView>,
        swapchain_view: Option<&'a wgpu::TextureView>,
        current_view_id: u64,
        handle: TextureViewHandle,
    ) -> Option<&'a wgpu::TextureView> {
        if handle.0 == current_view_id {
            swapchain_view
        } else {
            texture_views.get(&handle.0).map(|v| &v.view)
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    type Surface = Arc<winit::window::Window>;

    fn create(
        surface: Self::Surface,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(surface, width, height, vsync))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let max_size = self.device.limits().max_texture_dimension_2d;
            self.surface_config.width = width.min(max_size);
            self.surface_config.height = height.min(max_size);
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
            .unwrap_or(TextureFormat::Bgra8Unorm)
    }

    fn supported_sample_counts(&self) -> Vec<u32> {
        Self::multisample_counts(&self.adapter, &self.device)
    }

    fn max_anisotropy(&self) -> u16 {
        16
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = self
            .surface
            .get_current_texture()
            .map_err(|e| match e {
                wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => BackendError::SurfaceLost,
                wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
                _ => BackendError::AcquireImageFailed(e.to_string()),
            })?;

        // Use a unique ID for the swapchain view - the view is created when a pass needs it
        let view_id = self.next_view_id;
        self.next_view_id += 1;
        self.current_view_id = view_id;

        let width = self.surface_config.width;
        let height = self.surface_config.height;

        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width,
            height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        Ok(())
    }

    fn begin_commands(&mut self, label: &str) {
        if self.encoder.is_some() {
            log::warn!("begin_commands({}) while an encoder is open, submitting it first", label);
            self.submit_commands();
        }
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) }),
        );
    }

    fn submit_commands(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn wait_idle(&mut self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        log::trace!("wgpu: buffer {} {:?} ({} bytes)", id, desc.label, desc.size);

        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max_size || desc.height > max_size {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: size {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max_size
            )));
        }

        let texture = Self::scoped(
            &self.device,
            || {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: desc.kind.array_layers(),
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: desc.sample_count.max(1),
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: Self::convert_texture_usage(desc.usage),
                    view_formats: &[],
                })
            },
            BackendError::TextureCreationFailed,
        )?;

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            StoredTexture {
                texture,
                desc: desc.clone(),
            },
        );
        log::trace!(
            "wgpu: texture {} {:?} ({}x{}, {} mips, {} samples)",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.sample_count
        );

        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", texture.0)))?;

        let view = tex.texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            format: None,
            dimension: desc.dimension.map(Self::convert_view_dimension),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: desc.base_mip_level,
            mip_level_count: desc.mip_level_count,
            base_array_layer: desc.base_array_layer,
            array_layer_count: desc.array_layer_count,
        });

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(
            id,
            StoredView {
                view,
                texture: texture.0,
                base_mip_level: desc.base_mip_level,
            },
        );

        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        if let Some(tex) = self.textures.get(&texture.0) {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(width * tex.desc.format.bytes_per_pixel()),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        mip_level: u32,
    ) {
        let (Some(src_tex), Some(dst_tex)) = (self.textures.get(&src.0), self.textures.get(&dst.0))
        else {
            return;
        };
        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("copy_texture_to_texture outside of a command encoder");
            return;
        };

        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &src_tex.texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &dst_tex.texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: (src_tex.desc.width >> mip_level).max(1),
                height: (src_tex.desc.height >> mip_level).max(1),
                depth_or_array_layers: src_tex.desc.kind.array_layers(),
            },
        );
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(tex) = self.textures.get(&texture.0) else {
            return;
        };

        match self.encoder.as_mut() {
            Some(encoder) => {
                self.mipmaps.generate(&self.device, encoder, &tex.texture);
            }
            None => {
                let mut encoder = self
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Mipmap Encoder"),
                    });
                self.mipmaps.generate(&self.device, &mut encoder, &tex.texture);
                self.queue.submit(std::iter::once(encoder.finish()));
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.address_mode_v),
            address_mode_w: Self::convert_address_mode(desc.address_mode_w),
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: Self::convert_filter_mode(desc.mipmap_filter),
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: desc.compare.map(Self::convert_compare_function),
            anisotropy_clamp: desc.anisotropy_clamp.max(1),
            border_color: None,
        });

        let id = self.next_sampler_id;
        self.next_sampler_id += 1;
        self.samplers.insert(id, sampler);

        Ok(SamplerHandle(id))
    }

    fn create_shader_module(
        &mut self,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderModuleHandle> {
        let module = Self::scoped(
            &self.device,
            || {
                self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            },
            BackendError::ShaderCreationFailed,
        )?;

        let id = self.next_shader_id;
        self.next_shader_id += 1;
        self.shader_modules.insert(id, module);

        Ok(ShaderModuleHandle(id))
    }

    fn check_framebuffer_status(&self, desc: &FramebufferDescriptor) -> FramebufferStatus {
        let color = desc.color.map(|v| self.attachment_info(v));
        let depth = desc.depth_stencil.map(|v| self.attachment_info(v));
        if matches!(color, Some(None)) || matches!(depth, Some(None)) {
            return FramebufferStatus::IncompleteAttachment;
        }
        FramebufferStatus::evaluate(color.flatten().as_ref(), depth.flatten().as_ref())
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        let id = self.next_framebuffer_id;
        self.next_framebuffer_id += 1;
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match &e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::Texture { sample_type, view_dimension } => wgpu::BindingType::Texture {
                        sample_type: match sample_type {
                            TextureSampleType::Float { filterable } => {
                                wgpu::TextureSampleType::Float { filterable: *filterable }
                            }
                            TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
                        },
                        view_dimension: Self::convert_view_dimension(*view_dimension),
                        multisampled: false,
                    },
                    BindingType::StorageTexture { format, view_dimension } => {
                        wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: Self::convert_texture_format(*format),
                            view_dimension: Self::convert_view_dimension(*view_dimension),
                        }
                    }
                    BindingType::Sampler { comparison } => wgpu::BindingType::Sampler(
                        if *comparison {
                            wgpu::SamplerBindingType::Comparison
                        } else {
                            wgpu::SamplerBindingType::Filtering
                        },
                    ),
                };

                let mut visibility = wgpu::ShaderStages::empty();
                if e.visibility.contains(ShaderStageFlags::VERTEX) {
                    visibility |= wgpu::ShaderStages::VERTEX;
                }
                if e.visibility.contains(ShaderStageFlags::FRAGMENT) {
                    visibility |= wgpu::ShaderStages::FRAGMENT;
                }
                if e.visibility.contains(ShaderStageFlags::COMPUTE) {
                    visibility |= wgpu::ShaderStages::COMPUTE;
                }

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility,
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout = Self::scoped(
            &self.device,
            || {
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: None,
                        entries: &wgpu_entries,
                    })
            },
            BackendError::PipelineCreationFailed,
        )?;

        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.bind_group_layouts.insert(id, layout);

        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("bind group layout {}", layout.0)))?;

        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let resource = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let buf = self
                        .buffers
                        .get(&buffer.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: *offset,
                        size: size.and_then(std::num::NonZeroU64::new),
                    })
                }
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                    let v = self
                        .texture_views
                        .get(&view.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("texture view {}", view.0)))?;
                    wgpu::BindingResource::TextureView(&v.view)
                }
                BindGroupEntry::Sampler(sampler) => {
                    let s = self
                        .samplers
                        .get(&sampler.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("sampler {}", sampler.0)))?;
                    wgpu::BindingResource::Sampler(s)
                }
            };

            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        let bind_group = Self::scoped(
            &self.device,
            || {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout: layout_ref,
                    entries: &wgpu_entries,
                })
            },
            BackendError::PipelineCreationFailed,
        )?;

        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, bind_group);

        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let vertex_module = self
            .shader_modules
            .get(&desc.vertex_shader.0)
            .ok_or_else(|| BackendError::InvalidHandle("vertex shader module".into()))?;
        let fragment_module = match desc.fragment_shader {
            Some(handle) => Some(
                self.shader_modules
                    .get(&handle.0)
                    .ok_or_else(|| BackendError::InvalidHandle("fragment shader module".into()))?,
            ),
            None => None,
        };

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        // Build vertex buffer layouts with proper lifetimes
        let vertex_attrs: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: Self::convert_vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(vertex_attrs.iter())
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(target.format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::from_bits_truncate(target.write_mask.0),
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: match desc.primitive_topology {
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            strip_index_format: None,
            front_face: match desc.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: Self::convert_texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: Self::convert_compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = Self::scoped(
            &self.device,
            || {
                self.device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: desc.label.as_deref(),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: vertex_module,
                            entry_point: ShaderStage::Vertex.entry_point(),
                            buffers: &vertex_buffers,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: fragment_module.map(|module| wgpu::FragmentState {
                            module,
                            entry_point: ShaderStage::Fragment.entry_point(),
                            targets: &color_targets,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive,
                        depth_stencil,
                        multisample: wgpu::MultisampleState {
                            count: desc.sample_count.max(1),
                            ..Default::default()
                        },
                        multiview: None,
                    })
            },
            BackendError::PipelineCreationFailed,
        )?;

        let id = self.next_render_pipeline_id;
        self.next_render_pipeline_id += 1;
        self.render_pipelines.insert(id, pipeline);

        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let module = self
            .shader_modules
            .get(&desc.shader.0)
            .ok_or_else(|| BackendError::InvalidHandle("compute shader module".into()))?;

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let pipeline = Self::scoped(
            &self.device,
            || {
                self.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: desc.label.as_deref(),
                        layout: Some(&pipeline_layout),
                        module,
                        entry_point: &desc.entry_point,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    })
            },
            BackendError::PipelineCreationFailed,
        )?;

        let id = self.next_compute_pipeline_id;
        self.next_compute_pipeline_id += 1;
        self.compute_pipelines.insert(id, pipeline);

        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        // Store the descriptor for later execution
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };

        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("end_render_pass outside of a command encoder");
            return;
        };

        // Create swapchain view if needed - scope it to be dropped before encoder is used
        let swapchain_view: Option<wgpu::TextureView> = self.current_texture.as_ref().map(|tex| {
            tex.texture.create_view(&wgpu::TextureViewDescriptor::default())
        });

        let current_view_id = self.current_view_id;
        let views = &self.texture_views;

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .descriptor
                .color_attachments
                .iter()
                .filter_map(|att| {
                    let view = Self::lookup_view(views, swapchain_view.as_ref(), current_view_id, att.view)?;
                    let resolve_target = att.resolve_target.and_then(|handle| {
                        Self::lookup_view(views, swapchain_view.as_ref(), current_view_id, handle)
                    });
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target,
                        ops: wgpu::Operations {
                            load: Self::convert_load_op(&att.load_op, |c| wgpu::Color {
                                r: c[0] as f64,
                                g: c[1] as f64,
                                b: c[2] as f64,
                                a: c[3] as f64,
                            }),
                            store: Self::convert_store_op(att.store_op),
                        },
                    }))
                })
                .collect();

            let depth_attachment = pending.descriptor.depth_stencil_attachment.as_ref().and_then(|att| {
                let view = Self::lookup_view(views, swapchain_view.as_ref(), current_view_id, att.view)?;
                let has_stencil = views
                    .get(&att.view.0)
                    .and_then(|v| self.textures.get(&v.texture))
                    .is_some_and(|t| t.desc.format.has_stencil());
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: Self::convert_depth_load_op(att.depth_load_op, |depth| depth),
                        store: Self::convert_store_op(att.depth_store_op),
                    }),
                    stencil_ops: has_stencil.then(|| wgpu::Operations {
                        load: Self::convert_depth_load_op(att.depth_load_op, |_| 0u32),
                        store: Self::convert_store_op(att.depth_store_op),
                    }),
                })
            });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.render_pipelines.get(&handle.0) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = self.bind_groups.get(&bind_group.0) {
                            render_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(*offset..), wgpu_format);
                        }
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
            // render_pass is dropped here, ending the pass
        }

        self.encoder = Some(encoder);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        let Some(pending) = self.pending_compute_pass.take() else {
            return;
        };

        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("end_compute_pass outside of a command encoder");
            return;
        };

        let compute_pipelines = &self.compute_pipelines;
        let bind_groups = &self.bind_groups;

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: pending.label.as_deref(),
            timestamp_writes: None,
        });

        for cmd in &pending.commands {
            match cmd {
                ComputeCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = compute_pipelines.get(&handle.0) {
                        compute_pass.set_pipeline(pipeline);
                    }
                }
                ComputeCommand::SetBindGroup { index, bind_group } => {
                    if let Some(bg) = bind_groups.get(&bind_group.0) {
                        compute_pass.set_bind_group(*index, bg, &[]);
                    }
                }
                ComputeCommand::Dispatch { x, y, z } => {
                    compute_pass.dispatch_workgroups(*x, *y, *z);
                }
            }
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetPipeline(pipeline));
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetBindGroup { index, bind_group });
        } else if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::Dispatch { x, y, z });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(stored) = self.textures.remove(&texture.0) {
            stored.texture.destroy();
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.shader_modules.remove(&module.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
    }
}
