// Vulkan backend - ash + gpu-allocator
//
// Module layout:
// - context:   instance, device, queue, allocator
// - surface:   window surface from raw-window-handle
// - swapchain: presentable images
// - sync:      per-frame semaphores, fences and command buffers
// - memory:    buffers and images
// - pipeline:  render passes, descriptor sets, pipelines, framebuffers
// - shader:    SPIR-V modules
// - convert:   format tables
//
// FRAME FLOW (window output):
// 1. Wait for this frame slot's fence
// 2. Acquire a swapchain image (or reuse one held back by NO_PRESENT)
// 3. Record the program into the slot's command buffer
// 4. Submit, then present unless NO_PRESENT

pub mod context;
pub mod convert;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use context::VulkanContext;
pub use memory::{VulkanBuffer, VulkanImage};
pub use pipeline::VulkanRenderPass;

use super::{vertex_count, Backend, BackendKind, BoundComponent, Draw, FrameDesc, OutputDesc, ProgramDesc};
use crate::config::Config;
use crate::error::{RenderError, RenderResult};
use crate::render::flags::{RendererOptions, ResourceFlags};
use crate::render::format::ImageFormat;
use crate::render::render_pass::{RenderPassAttachment, RenderPassDesc};
use crate::render::resource::{Resource, ResourceKind};
use crate::render::shader::ShaderKind;
use crate::render::upload::StagedResource;
use crate::wsi::WindowSurface;
use ash::vk::{self, Handle};
use glam::UVec2;
use pipeline::{GraphicsPipelineDesc, ProgramLayout, Targets};
use std::sync::Arc;
use surface::Surface;
use swapchain::{Acquired, Swapchain};
use sync::FrameSync;

/// Creation parameters for a Vulkan backend.
#[derive(Debug, Clone)]
pub struct VulkanSettings {
    pub app_name: String,
    pub validation: bool,
    pub present_mode: vk::PresentModeKHR,
    pub frames_in_flight: usize,
}

impl Default for VulkanSettings {
    fn default() -> Self {
        Self {
            app_name: "Topaz".to_string(),
            validation: cfg!(debug_assertions),
            present_mode: vk::PresentModeKHR::FIFO,
            frames_in_flight: 2,
        }
    }
}

impl VulkanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_name: config.window.title.clone(),
            validation: cfg!(debug_assertions) && config.debug.validation_layers,
            present_mode: config.get_present_mode(),
            frames_in_flight: config.graphics.max_frames_in_flight.max(1),
        }
    }
}

pub struct VulkanBackend {
    // Field order matters for Drop: frame objects and the swapchain go
    // before the surface, and everything goes before the context.
    frames: Vec<FrameSync>,
    current_frame: usize,
    /// Acquired but not yet presented (last window frame used NO_PRESENT).
    pending_image: Option<u32>,
    swapchain: Option<Swapchain>,
    surface: Option<Surface>,
    /// Bumped on every swapchain rebuild; programs compare it against the
    /// generation their framebuffers were built for.
    generation: u64,
    needs_recreate: bool,
    present_mode: vk::PresentModeKHR,
    ctx: Arc<VulkanContext>,
}

impl VulkanBackend {
    /// A backend without a window: offscreen and compute renderers only.
    pub fn offscreen(settings: &VulkanSettings) -> RenderResult<Self> {
        let ctx = VulkanContext::new(&settings.app_name, settings.validation, None)?;
        Self::finish(ctx, settings, None)
    }

    /// A backend presenting to `window`.
    pub fn with_window<W: WindowSurface>(settings: &VulkanSettings, window: &W) -> RenderResult<Self> {
        let handle_error = |e: raw_window_handle::HandleError| RenderError::Backend(format!("window handle unavailable: {e}"));
        let display = window.display_handle().map_err(handle_error)?.as_raw();
        let window_handle = window.window_handle().map_err(handle_error)?.as_raw();

        let ctx = VulkanContext::new(&settings.app_name, settings.validation, Some(display))?;
        let surface = Surface::new(ctx.clone(), display, window_handle)?;
        let mut backend = Self::finish(ctx, settings, Some(surface))?;

        let dimensions = window.dimensions();
        if dimensions.x > 0 && dimensions.y > 0 {
            backend.rebuild_swapchain(dimensions)?;
        }
        Ok(backend)
    }

    fn finish(ctx: Arc<VulkanContext>, settings: &VulkanSettings, surface: Option<Surface>) -> RenderResult<Self> {
        let frames = (0..settings.frames_in_flight.max(1))
            .map(|_| FrameSync::new(ctx.clone()))
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!("Vulkan backend ready ({} frames in flight)", frames.len());
        Ok(Self {
            frames,
            current_frame: 0,
            pending_image: None,
            swapchain: None,
            surface,
            generation: 0,
            needs_recreate: false,
            present_mode: settings.present_mode,
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.ctx
    }

    fn rebuild_swapchain(&mut self, dimensions: UVec2) -> RenderResult<()> {
        let surface = self.surface.as_ref().ok_or_else(no_surface)?;

        // Wait for GPU to finish all work before destroying resources
        self.ctx.wait_idle()?;

        // The surface can only have one swapchain at a time
        self.swapchain = None;
        self.pending_image = None;
        self.swapchain = Some(Swapchain::new(
            self.ctx.clone(),
            surface,
            self.present_mode,
            dimensions.x,
            dimensions.y,
        )?);
        self.generation += 1;
        self.needs_recreate = false;
        Ok(())
    }

    /// Pick the swapchain image for this frame. `None` means the frame is
    /// skipped because the swapchain is out of date.
    fn acquire(&mut self, slot: usize) -> RenderResult<Option<(u32, bool)>> {
        if self.needs_recreate {
            if let Some(extent) = self.swapchain.as_ref().map(|s| s.extent) {
                self.rebuild_swapchain(UVec2::new(extent.width, extent.height))?;
            }
        }
        if let Some(index) = self.pending_image.take() {
            return Ok(Some((index, false)));
        }

        let swapchain = self.swapchain.as_ref().ok_or_else(no_surface)?;
        match swapchain.acquire_next_image(self.frames[slot].image_available)? {
            Acquired::Image { index, suboptimal } => {
                self.needs_recreate |= suboptimal;
                Ok(Some((index, true)))
            }
            Acquired::OutOfDate => {
                log::debug!("Swapchain out of date, skipping frame");
                self.needs_recreate = true;
                Ok(None)
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan backend...");
        let _ = self.ctx.wait_idle();
    }
}

fn no_surface() -> RenderError {
    RenderError::InvalidOutput("Vulkan backend has no window surface".into())
}

// ============================================================================
// Programs
// ============================================================================

pub struct VulkanProgram {
    debug_name: String,
    kind: ShaderKind,
    pipelines: Vec<vk::Pipeline>,
    render_pass: vk::RenderPass,
    subpasses: Vec<RenderPassAttachment>,
    has_depth: bool,
    targets: Option<Targets>,
    layout: ProgramLayout,
    ctx: Arc<VulkanContext>,
}

impl VulkanProgram {
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// (Re)build framebuffers unless they already match `key`.
    fn prepare_targets(&mut self, views: &[vk::ImageView], extent: vk::Extent2D, key: u64) -> RenderResult<()> {
        if self.targets.as_ref().is_some_and(|t| t.key == key) {
            return Ok(());
        }
        if self.targets.is_some() {
            // Old framebuffers may still be in flight
            self.ctx.wait_idle()?;
            self.targets = None;
        }
        log::debug!("Building framebuffers for {} ({}x{})", self.debug_name, extent.width, extent.height);
        self.targets = Some(Targets::new(
            self.ctx.clone(),
            self.render_pass,
            self.has_depth,
            views,
            extent,
            key,
        )?);
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, frame: &FrameDesc<'_, VulkanBackend>, framebuffer: Option<u32>) -> RenderResult<()> {
        let device = &self.ctx.device;
        let descriptor_sets: Vec<_> = self.layout.set.into_iter().collect();

        match (self.kind, frame.draw) {
            (ShaderKind::Compute, Draw::Dispatch(groups)) => unsafe {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipelines[0]);
                if !descriptor_sets.is_empty() {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        self.layout.pipeline_layout,
                        0,
                        &descriptor_sets,
                        &[],
                    );
                }
                device.cmd_dispatch(cmd, groups.x, groups.y, groups.z);

                // Make shader writes visible to whatever reads next
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                    .build();
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            },
            (ShaderKind::Graphics, Draw::Triangles(triangles)) => {
                let targets = self
                    .targets
                    .as_ref()
                    .ok_or_else(|| RenderError::Backend(format!("{} has no framebuffers", self.debug_name)))?;
                let framebuffer = framebuffer
                    .and_then(|i| targets.framebuffers.get(i as usize))
                    .copied()
                    .ok_or_else(|| RenderError::Backend("framebuffer index out of range".into()))?;
                let extent = targets.extent;

                let render_area = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                };
                let clear_values = [
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: frame.clear_colour.to_array(),
                        },
                    },
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                    },
                ];
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(self.render_pass)
                    .framebuffer(framebuffer)
                    .render_area(render_area)
                    .clear_values(&clear_values);

                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };

                let vertex_buffer = find_buffer(frame.bindings, ResourceFlags::VERTEX_BUFFER);
                let index_buffer = find_buffer(frame.bindings, ResourceFlags::INDEX_BUFFER);
                let clear = !frame.options.contains(RendererOptions::NO_CLEAR_OUTPUT);
                let clear_subpass = self.subpasses.iter().position(|a| a.has_colour());
                let count = vertex_count(triangles)?;

                unsafe {
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                    for (i, &pipeline) in self.pipelines.iter().enumerate() {
                        if i > 0 {
                            device.cmd_next_subpass(cmd, vk::SubpassContents::INLINE);
                        }
                        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                        device.cmd_set_viewport(cmd, 0, &[viewport]);
                        device.cmd_set_scissor(cmd, 0, &[render_area]);

                        if clear && clear_subpass == Some(i) {
                            device.cmd_clear_attachments(
                                cmd,
                                &[vk::ClearAttachment {
                                    aspect_mask: vk::ImageAspectFlags::COLOR,
                                    color_attachment: 0,
                                    clear_value: clear_values[0],
                                }],
                                &[vk::ClearRect {
                                    rect: render_area,
                                    base_array_layer: 0,
                                    layer_count: 1,
                                }],
                            );
                        }

                        if !descriptor_sets.is_empty() {
                            device.cmd_bind_descriptor_sets(
                                cmd,
                                vk::PipelineBindPoint::GRAPHICS,
                                self.layout.pipeline_layout,
                                0,
                                &descriptor_sets,
                                &[],
                            );
                        }
                        if let Some(buffer) = vertex_buffer {
                            device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
                        }
                        if count == 0 {
                            continue;
                        }
                        match index_buffer {
                            Some(buffer) => {
                                device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32);
                                device.cmd_draw_indexed(cmd, count, 1, 0, 0, 0);
                            }
                            None => device.cmd_draw(cmd, count, 1, 0, 0),
                        }
                    }
                    device.cmd_end_render_pass(cmd);
                }
            }
            (kind, draw) => {
                return Err(RenderError::Backend(format!("{draw:?} issued to a {kind:?} program")));
            }
        }
        Ok(())
    }
}

fn find_buffer(bindings: &[BoundComponent<'_, VulkanBackend>], flag: ResourceFlags) -> Option<vk::Buffer> {
    bindings.iter().find_map(|binding| match binding {
        BoundComponent::Buffer { native, flags, .. } if flags.contains(flag) => Some(native.buffer),
        _ => None,
    })
}

impl Drop for VulkanProgram {
    fn drop(&mut self) {
        // Pipelines may still be referenced by in-flight command buffers
        let _ = self.ctx.wait_idle();
        unsafe {
            for &pipeline in &self.pipelines {
                self.ctx.device.destroy_pipeline(pipeline, None);
            }
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

impl Backend for VulkanBackend {
    const KIND: BackendKind = BackendKind::Vulkan;
    const UPLOAD_ROW_ALIGNMENT: usize = 1;

    type NativeFormat = vk::Format;
    type Buffer = VulkanBuffer;
    type Image = VulkanImage;
    type RenderPass = VulkanRenderPass;
    type Program = VulkanProgram;

    fn image_format_to_native(format: ImageFormat) -> Option<vk::Format> {
        Some(convert::image_format_to_native(format))
    }

    fn image_format_from_native(native: vk::Format) -> Option<ImageFormat> {
        convert::image_format_from_native(native)
    }

    fn create_buffer(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<VulkanBuffer> {
        VulkanBuffer::with_data(
            self.ctx.clone(),
            "resource buffer",
            memory::buffer_usage(resource.flags()),
            staged.bytes(),
        )
    }

    fn write_buffer(&mut self, buffer: &mut VulkanBuffer, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        buffer.write(offset, bytes)
    }

    fn create_image(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<VulkanImage> {
        let ResourceKind::Image { format, dimensions } = *resource.kind() else {
            return Err(RenderError::Backend("create_image called with a buffer resource".into()));
        };
        let image = VulkanImage::new(self.ctx.clone(), "resource image", format, dimensions, resource.flags())?;
        image.upload(staged.bytes(), staged.row_pitch())?;
        Ok(image)
    }

    fn read_image(&mut self, image: &VulkanImage) -> RenderResult<Vec<u8>> {
        image.read_back()
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc<'_>) -> RenderResult<VulkanRenderPass> {
        VulkanRenderPass::new(
            self.ctx.clone(),
            desc.attachments,
            convert::image_format_to_native(desc.colour_format),
            desc.target,
        )
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_, Self>) -> RenderResult<VulkanProgram> {
        log::debug!("Compiling Vulkan program {}", desc.debug_name);

        let modules = shader::load_stages(&self.ctx, desc.shader)?;
        let stages = match desc.kind {
            ShaderKind::Graphics => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ShaderKind::Compute => vk::ShaderStageFlags::COMPUTE,
        };
        let layout = ProgramLayout::new(self.ctx.clone(), desc.bindings, stages)?;

        let (pipelines, render_pass, subpasses, has_depth) = match desc.kind {
            ShaderKind::Graphics => {
                if matches!(desc.output, Some(OutputDesc::Window)) && self.surface.is_none() {
                    return Err(no_surface());
                }
                let render_pass = desc.render_pass.ok_or_else(|| {
                    RenderError::InvalidRendererInfo("graphics program without a render pass".into())
                })?;
                let pipelines = pipeline::create_graphics_pipelines(
                    &self.ctx,
                    &GraphicsPipelineDesc {
                        render_pass,
                        layout: layout.pipeline_layout,
                        stages: &modules,
                        vertex_layout: desc.vertex_layout,
                        topology: desc.topology,
                        depth: desc.depth,
                        options: desc.options,
                    },
                )?;
                (pipelines, render_pass.render_pass, render_pass.subpasses.clone(), render_pass.has_depth)
            }
            ShaderKind::Compute => {
                let module = modules
                    .first()
                    .ok_or_else(|| RenderError::InvalidRendererInfo("compute program without a shader".into()))?;
                let pipeline = pipeline::create_compute_pipeline(&self.ctx, layout.pipeline_layout, module)?;
                (vec![pipeline], vk::RenderPass::null(), Vec::new(), false)
            }
        };

        Ok(VulkanProgram {
            debug_name: desc.debug_name.to_string(),
            kind: desc.kind,
            pipelines,
            render_pass,
            subpasses,
            has_depth,
            targets: None,
            layout,
            ctx: self.ctx.clone(),
        })
    }

    fn execute(&mut self, program: &mut VulkanProgram, frame: &FrameDesc<'_, Self>) -> RenderResult<()> {
        let slot = self.current_frame;
        self.frames[slot].wait()?;

        // ─────────────────────────────────────────────────────────────────
        // Pick the colour target
        // ─────────────────────────────────────────────────────────────────
        let mut window_image = None;
        let mut framebuffer = None;
        match (program.kind, &frame.output) {
            (ShaderKind::Graphics, Some(OutputDesc::Window)) => {
                let Some((index, acquired)) = self.acquire(slot)? else {
                    return Ok(());
                };
                let swapchain = self.swapchain.as_ref().ok_or_else(no_surface)?;
                program.prepare_targets(&swapchain.image_views, swapchain.extent, self.generation)?;
                window_image = Some((index, acquired));
                framebuffer = Some(index);
            }
            (ShaderKind::Graphics, Some(OutputDesc::Image { native, .. })) => {
                program.prepare_targets(&[native.view], native.extent, native.view.as_raw())?;
                framebuffer = Some(0);
            }
            (ShaderKind::Graphics, None) => {
                return Err(RenderError::InvalidOutput(format!("{} has no output", program.debug_name)));
            }
            (ShaderKind::Compute, _) => {}
        }

        // ─────────────────────────────────────────────────────────────────
        // Record
        // ─────────────────────────────────────────────────────────────────
        let sync = &self.frames[slot];
        let cmd = sync.command_buffer;
        unsafe {
            self.ctx
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.ctx.device.begin_command_buffer(cmd, &begin_info)?;
        }
        program.record(cmd, frame, framebuffer)?;
        unsafe { self.ctx.device.end_command_buffer(cmd)? };

        // ─────────────────────────────────────────────────────────────────
        // Submit
        // ─────────────────────────────────────────────────────────────────
        let present = window_image.is_some() && !frame.options.contains(RendererOptions::NO_PRESENT);
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let mut submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        if matches!(window_image, Some((_, true))) {
            submit_info = submit_info
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages);
        }
        if present {
            submit_info = submit_info.signal_semaphores(&signal_semaphores);
        }

        unsafe {
            self.ctx.device.reset_fences(&[sync.in_flight_fence])?;
            self.ctx
                .device
                .queue_submit(self.ctx.queue, &[submit_info.build()], sync.in_flight_fence)?;
        }

        // ─────────────────────────────────────────────────────────────────
        // Present
        // ─────────────────────────────────────────────────────────────────
        if let Some((index, _)) = window_image {
            if present {
                let swapchain = self.swapchain.as_ref().ok_or_else(no_surface)?;
                if swapchain.present(self.ctx.queue, index, &signal_semaphores)? {
                    self.needs_recreate = true;
                }
            } else {
                self.pending_image = Some(index);
            }
        }

        if frame.options.contains(RendererOptions::RENDER_WAIT) {
            self.frames[slot].wait()?;
        }

        self.current_frame = (slot + 1) % self.frames.len();
        Ok(())
    }

    fn window_format(&self) -> Option<ImageFormat> {
        self.swapchain
            .as_ref()
            .and_then(|s| convert::image_format_from_native(s.format))
    }

    fn window_dimensions(&self) -> Option<UVec2> {
        self.swapchain
            .as_ref()
            .map(|s| UVec2::new(s.extent.width, s.extent.height))
    }

    fn recreate_surface(&mut self, dimensions: UVec2) -> RenderResult<()> {
        self.rebuild_swapchain(dimensions)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.ctx.wait_idle()
    }
}
