//! Headless backend for testing and offline runs.
//!
//! This backend performs no GPU work. It validates WGSL with naga, runs the
//! same framebuffer completeness rules as the wgpu backend, and records every
//! command into a shared [`CommandRecorder`] so tests can inspect what the
//! renderer asked for, including which resources are still alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginCommands(String),
    SubmitCommands,
    WaitIdle,
    BeginFrame,
    EndFrame,
    CreateTexture {
        label: Option<String>,
        kind: TextureKind,
        width: u32,
        height: u32,
        mip_levels: u32,
        sample_count: u32,
        format: TextureFormat,
    },
    CreateSampler {
        label: Option<String>,
        address_mode: AddressMode,
        mipmap_filter: FilterMode,
        anisotropy_clamp: u16,
    },
    WriteTexture {
        label: Option<String>,
        width: u32,
        height: u32,
        bytes: usize,
    },
    WriteBuffer {
        label: Option<String>,
        bytes: usize,
    },
    CopyTexture {
        src: Option<String>,
        dst: Option<String>,
        mip_level: u32,
    },
    GenerateMipmaps(Option<String>),
    CompileShader(String),
    /// Binding slots with the label of the buffer or texture bound there
    CreateBindGroup {
        entries: Vec<(u32, Option<String>)>,
    },
    BeginRenderPass {
        label: Option<String>,
        color_load: Option<LoadOp>,
        color_store: Option<StoreOp>,
        resolves: bool,
        depth_load: Option<DepthLoadOp>,
    },
    EndRenderPass,
    BeginComputePass(Option<String>),
    EndComputePass,
    SetRenderPipeline(Option<String>),
    SetComputePipeline(Option<String>),
    SetBindGroup(u32),
    SetVertexBuffer(u32),
    SetIndexBuffer(IndexFormat),
    Draw { vertex_count: u32 },
    DrawIndexed { index_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
}

#[derive(Debug, Default)]
struct RecorderState {
    commands: Vec<RecordedCommand>,
    live_resources: usize,
}

/// Shared log of everything a [`HeadlessBackend`] was asked to do
#[derive(Debug, Clone, Default)]
pub struct CommandRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: RecordedCommand) {
        log::trace!("HeadlessBackend: {:?}", command);
        self.state.lock().commands.push(command);
    }

    fn set_live(&self, count: usize) {
        self.state.lock().live_resources = count;
    }

    /// Snapshot of the recorded commands
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Drop the recorded commands, keeping the resource count
    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }

    /// Objects created and not yet destroyed
    pub fn live_resources(&self) -> usize {
        self.state.lock().live_resources
    }

    /// Recorded commands matching a predicate
    pub fn count(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.state.lock().commands.iter().filter(|c| predicate(c)).count()
    }
}

/// What a headless "surface" looks like
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub supported_sample_counts: Vec<u32>,
    pub max_anisotropy: u16,
    pub swapchain_format: TextureFormat,
    pub recorder: CommandRecorder,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            supported_sample_counts: vec![1, 2, 4, 8],
            max_anisotropy: 16,
            swapchain_format: TextureFormat::Bgra8Unorm,
            recorder: CommandRecorder::new(),
        }
    }
}

struct HeadlessView {
    texture: u64,
    base_mip_level: u32,
}

/// Recording backend without a GPU
pub struct HeadlessBackend {
    config: HeadlessConfig,
    width: u32,
    height: u32,
    recording: bool,
    in_render_pass: bool,
    in_compute_pass: bool,

    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_views: HashMap<u64, HeadlessView>,
    samplers: HashMap<u64, SamplerDescriptor>,
    shader_modules: HashMap<u64, naga::Module>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, usize>,
    render_pipelines: HashMap<u64, Option<String>>,
    compute_pipelines: HashMap<u64, Option<String>>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,

    next_id: u64,
    swapchain_view_id: u64,
}

impl HeadlessBackend {
    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn sync_live(&self) {
        let live = self.buffers.len()
            + self.textures.len()
            + self.texture_views.len()
            + self.samplers.len()
            + self.shader_modules.len()
            + self.bind_group_layouts.len()
            + self.bind_groups.len()
            + self.render_pipelines.len()
            + self.compute_pipelines.len()
            + self.framebuffers.len();
        self.config.recorder.set_live(live);
    }

    fn record(&self, command: RecordedCommand) {
        self.config.recorder.push(command);
    }

    fn attachment_info(&self, view: TextureViewHandle) -> Option<AttachmentInfo> {
        if view.0 == self.swapchain_view_id {
            return Some(AttachmentInfo {
                width: self.width,
                height: self.height,
                sample_count: 1,
                format: self.config.swapchain_format,
            });
        }
        let stored = self.texture_views.get(&view.0)?;
        let desc = self.textures.get(&stored.texture)?;
        Some(AttachmentInfo {
            width: (desc.width >> stored.base_mip_level).max(1),
            height: (desc.height >> stored.base_mip_level).max(1),
            sample_count: desc.sample_count,
            format: desc.format,
        })
    }

    fn texture_label(&self, texture: TextureHandle) -> Option<String> {
        self.textures.get(&texture.0).and_then(|d| d.label.clone())
    }

    fn entry_label(&self, entry: &BindGroupEntry) -> Option<String> {
        match entry {
            BindGroupEntry::Buffer { buffer, .. } => {
                self.buffers.get(&buffer.0).and_then(|d| d.label.clone())
            }
            BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                let stored = self.texture_views.get(&view.0)?;
                self.texture_label(TextureHandle(stored.texture))
            }
            BindGroupEntry::Sampler(_) => None,
        }
    }

    fn has_entry_point(module: &naga::Module, stage: ShaderStage) -> bool {
        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        };
        module
            .entry_points
            .iter()
            .any(|ep| ep.stage == naga_stage && ep.name == stage.entry_point())
    }

    fn require_entry_point(
        &self,
        module: ShaderModuleHandle,
        stage: ShaderStage,
    ) -> BackendResult<()> {
        let parsed = self
            .shader_modules
            .get(&module.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("shader module {}", module.0)))?;
        if Self::has_entry_point(parsed, stage) {
            Ok(())
        } else {
            Err(BackendError::PipelineCreationFailed(format!(
                "missing {:?} entry point `{}`",
                stage,
                stage.entry_point()
            )))
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    type Surface = HeadlessConfig;

    fn create(
        surface: Self::Surface,
        width: u32,
        height: u32,
        _vsync: bool,
    ) -> BackendResult<Self> {
        if width == 0 || height == 0 {
            return Err(BackendError::SurfaceCreationFailed(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }
        log::info!("Selected GPU: none (headless backend)");

        let backend = Self {
            config: surface,
            width,
            height,
            recording: false,
            in_render_pass: false,
            in_compute_pass: false,
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
            next_id: 1,
            swapchain_view_id: 0,
        };
        backend.sync_live();
        Ok(backend)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.config.swapchain_format
    }

    fn supported_sample_counts(&self) -> Vec<u32> {
        let mut counts = self.config.supported_sample_counts.clone();
        if !counts.contains(&1) {
            counts.push(1);
        }
        counts.sort_unstable();
        counts.dedup();
        counts
    }

    fn max_anisotropy(&self) -> u16 {
        self.config.max_anisotropy.max(1)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        self.swapchain_view_id = self.next_handle();
        self.recording = true;
        self.record(RecordedCommand::BeginFrame);
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(self.swapchain_view_id),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.recording = false;
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }

    fn begin_commands(&mut self, label: &str) {
        self.recording = true;
        self.record(RecordedCommand::BeginCommands(label.to_string()));
    }

    fn submit_commands(&mut self) {
        self.recording = false;
        self.record(RecordedCommand::SubmitCommands);
    }

    fn wait_idle(&mut self) {
        self.record(RecordedCommand::WaitIdle);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        let id = self.next_handle();
        self.buffers.insert(id, desc.clone());
        self.sync_live();
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let desc = BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        };
        self.create_buffer(&desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(desc) = self.buffers.get(&buffer.0) else {
            log::warn!("HeadlessBackend: write to unknown buffer {}", buffer.0);
            return;
        };
        if offset + data.len() as u64 > desc.size {
            log::warn!("HeadlessBackend: write past the end of buffer {:?}", desc.label);
        }
        self.record(RecordedCommand::WriteBuffer {
            label: desc.label.clone(),
            bytes: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{} with {} levels",
                desc.label, desc.width, desc.height, desc.mip_levels
            )));
        }
        let id = self.next_handle();
        self.record(RecordedCommand::CreateTexture {
            label: desc.label.clone(),
            kind: desc.kind,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels,
            sample_count: desc.sample_count,
            format: desc.format,
        });
        self.textures.insert(id, desc.clone());
        self.sync_live();
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
        if desc.base_mip_level >= tex.mip_levels {
            return Err(BackendError::InvalidHandle(format!(
                "{:?}: mip {} out of {}",
                tex.label, desc.base_mip_level, tex.mip_levels
            )));
        }
        let id = self.next_handle();
        self.texture_views.insert(
            id,
            HeadlessView {
                texture: texture.0,
                base_mip_level: desc.base_mip_level,
            },
        );
        self.sync_live();
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(desc) = self.textures.get(&texture.0) else {
            log::warn!("HeadlessBackend: write to unknown texture {}", texture.0);
            return;
        };
        let expected = (width * height * desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            log::warn!(
                "HeadlessBackend: texture {:?} got {} bytes, expected {}",
                desc.label,
                data.len(),
                expected
            );
        }
        self.record(RecordedCommand::WriteTexture {
            label: desc.label.clone(),
            width,
            height,
            bytes: data.len(),
        });
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        mip_level: u32,
    ) {
        if !self.recording {
            log::warn!("HeadlessBackend: copy outside of a command encoder");
        }
        self.record(RecordedCommand::CopyTexture {
            src: self.texture_label(src),
            dst: self.texture_label(dst),
            mip_level,
        });
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        self.record(RecordedCommand::GenerateMipmaps(self.texture_label(texture)));
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.next_handle();
        self.record(RecordedCommand::CreateSampler {
            label: desc.label.clone(),
            address_mode: desc.address_mode_u,
            mipmap_filter: desc.mipmap_filter,
            anisotropy_clamp: desc.anisotropy_clamp,
        });
        self.samplers.insert(id, desc.clone());
        self.sync_live();
        Ok(SamplerHandle(id))
    }

    fn create_shader_module(
        &mut self,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderModuleHandle> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| BackendError::ShaderCreationFailed(e.emit_to_string(source)))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| BackendError::ShaderCreationFailed(e.emit_to_string(source)))?;

        let id = self.next_handle();
        self.record(RecordedCommand::CompileShader(label.to_string()));
        self.shader_modules.insert(id, module);
        self.sync_live();
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
        let id = self.next_handle();
        self.framebuffers.insert(id, desc.clone());
        self.sync_live();
        Ok(FramebufferHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.next_handle();
        self.bind_group_layouts.insert(id, entries.to_vec());
        self.sync_live();
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("bind group layout {}", layout.0)))?;

        if layout_entries.len() != entries.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "bind group has {} entries, layout expects {}",
                entries.len(),
                layout_entries.len()
            )));
        }
        for (binding, entry) in entries {
            if !layout_entries.iter().any(|e| e.binding == *binding) {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "binding {} not in layout",
                    binding
                )));
            }
            let known = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(&buffer.0),
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                    self.texture_views.contains_key(&view.0)
                }
                BindGroupEntry::Sampler(sampler) => self.samplers.contains_key(&sampler.0),
            };
            if !known {
                return Err(BackendError::InvalidHandle(format!(
                    "resource at binding {}",
                    binding
                )));
            }
        }

        self.record(RecordedCommand::CreateBindGroup {
            entries: entries
                .iter()
                .map(|(binding, entry)| (*binding, self.entry_label(entry)))
                .collect(),
        });
        let id = self.next_handle();
        self.bind_groups.insert(id, entries.len());
        self.sync_live();
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        self.require_entry_point(desc.vertex_shader, ShaderStage::Vertex)?;
        if let Some(fragment) = desc.fragment_shader {
            self.require_entry_point(fragment, ShaderStage::Fragment)?;
        }
        let id = self.next_handle();
        self.render_pipelines.insert(id, desc.label.clone());
        self.sync_live();
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        self.require_entry_point(desc.shader, ShaderStage::Compute)?;
        let id = self.next_handle();
        self.compute_pipelines.insert(id, desc.label.clone());
        self.sync_live();
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if !self.recording {
            log::warn!("HeadlessBackend: render pass outside of a command encoder");
        }
        self.in_render_pass = true;
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_load: desc.color_attachments.first().map(|a| a.load_op.clone()),
            color_store: desc.color_attachments.first().map(|a| a.store_op),
            resolves: desc.color_attachments.iter().any(|a| a.resolve_target.is_some()),
            depth_load: desc.depth_stencil_attachment.as_ref().map(|a| a.depth_load_op),
        });
    }

    fn end_render_pass(&mut self) {
        self.in_render_pass = false;
        self.record(RecordedCommand::EndRenderPass);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        if !self.recording {
            log::warn!("HeadlessBackend: compute pass outside of a command encoder");
        }
        self.in_compute_pass = true;
        self.record(RecordedCommand::BeginComputePass(label.map(str::to_string)));
    }

    fn end_compute_pass(&mut self) {
        self.in_compute_pass = false;
        self.record(RecordedCommand::EndComputePass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        let label = self.render_pipelines.get(&pipeline.0).cloned().flatten();
        self.record(RecordedCommand::SetRenderPipeline(label));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        let label = self.compute_pipelines.get(&pipeline.0).cloned().flatten();
        self.record(RecordedCommand::SetComputePipeline(label));
    }

    fn set_bind_group(&mut self, index: u32, _bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup(index));
    }

    fn set_vertex_buffer(&mut self, slot: u32, _buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer(slot));
    }

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer(format));
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        if !self.in_render_pass {
            log::warn!("HeadlessBackend: draw outside of a render pass");
        }
        self.record(RecordedCommand::Draw {
            vertex_count: vertices.len() as u32,
        });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        _instances: std::ops::Range<u32>,
    ) {
        if !self.in_render_pass {
            log::warn!("HeadlessBackend: draw outside of a render pass");
        }
        self.record(RecordedCommand::DrawIndexed {
            index_count: indices.len() as u32,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if !self.in_compute_pass {
            log::warn!("HeadlessBackend: dispatch outside of a compute pass");
        }
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.sync_live();
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.sync_live();
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
        self.sync_live();
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
        self.sync_live();
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.shader_modules.remove(&module.0);
        self.sync_live();
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
        self.sync_live();
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
        self.sync_live();
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
        self.sync_live();
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
        self.sync_live();
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
        self.sync_live();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (HeadlessBackend, CommandRecorder) {
        let config = HeadlessConfig::default();
        let recorder = config.recorder.clone();
        let backend = HeadlessBackend::create(config, 64, 64, true).unwrap();
        (backend, recorder)
    }

    #[test]
    fn test_rejects_zero_sized_surface() {
        assert!(HeadlessBackend::create(HeadlessConfig::default(), 0, 64, true).is_err());
    }

    #[test]
    fn test_invalid_wgsl_reports_diagnostic() {
        let (mut backend, _) = backend();
        let err = backend
            .create_shader_module("broken", "fn vs_main( -> {")
            .unwrap_err();
        match err {
            BackendError::ShaderCreationFailed(diagnostic) => assert!(!diagnostic.is_empty()),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_requires_entry_points() {
        let (mut backend, _) = backend();
        let module = backend
            .create_shader_module(
                "compute only",
                "@compute @workgroup_size(1) fn cs_main() {}",
            )
            .unwrap();
        let err = backend
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: None,
                vertex_shader: module,
                fragment_shader: None,
                vertex_layouts: vec![],
                bind_group_layouts: vec![],
                primitive_topology: PrimitiveTopology::TriangleList,
                front_face: FrontFace::Ccw,
                cull_mode: CullMode::None,
                depth_stencil: None,
                color_targets: vec![],
                sample_count: 1,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::PipelineCreationFailed(_)));

        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: None,
            shader: module,
            entry_point: "cs_main".into(),
            bind_group_layouts: vec![],
        });
        assert!(pipeline.is_ok());
    }

    #[test]
    fn test_live_resources_track_create_and_destroy() {
        let (mut backend, recorder) = backend();
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 4,
                height: 4,
                ..Default::default()
            })
            .unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
            .unwrap();
        assert_eq!(recorder.live_resources(), 2);

        backend.destroy_texture_view(view);
        backend.destroy_texture(texture);
        assert_eq!(recorder.live_resources(), 0);
    }

    #[test]
    fn test_framebuffer_status_uses_view_mip_size() {
        let (mut backend, _) = backend();
        let color = backend
            .create_texture(&TextureDescriptor {
                width: 64,
                height: 64,
                mip_levels: 2,
                format: TextureFormat::Rgba16Float,
                ..Default::default()
            })
            .unwrap();
        let depth = backend
            .create_texture(&TextureDescriptor {
                width: 64,
                height: 64,
                format: TextureFormat::Depth24PlusStencil8,
                ..Default::default()
            })
            .unwrap();
        let mip1 = backend
            .create_texture_view(
                color,
                &TextureViewDescriptor {
                    base_mip_level: 1,
                    mip_level_count: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        let depth_view = backend
            .create_texture_view(depth, &TextureViewDescriptor::default())
            .unwrap();

        let status = backend.check_framebuffer_status(&FramebufferDescriptor {
            label: None,
            color: Some(mip1),
            depth_stencil: Some(depth_view),
        });
        assert_eq!(status, FramebufferStatus::IncompleteDimensions);

        let status = backend.check_framebuffer_status(&FramebufferDescriptor {
            label: None,
            color: Some(TextureViewHandle(9999)),
            depth_stencil: None,
        });
        assert_eq!(status, FramebufferStatus::IncompleteAttachment);
    }
}
