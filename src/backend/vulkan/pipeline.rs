// Render passes, descriptor sets and pipelines
//
// A program is built once per renderer:
// - one descriptor set holding every bound component that is not a
//   vertex or index buffer, in binding order
// - one graphics pipeline per subpass, or a single compute pipeline
// - framebuffers, rebuilt whenever the swapchain changes
//
// Viewport and scissor are dynamic so resizes only touch framebuffers.

use super::context::VulkanContext;
use super::convert::{topology_to_native, vertex_format_to_native};
use super::memory::VulkanImage;
use super::shader::ShaderModule;
use super::VulkanBackend;
use crate::backend::BoundComponent;
use crate::error::{RenderError, RenderResult};
use crate::render::flags::{RendererOptions, ResourceFlags};
use crate::render::format::{vertex_offsets, vertex_stride, VertexFormat};
use crate::render::output::OutputTarget;
use crate::render::render_pass::RenderPassAttachment;
use crate::render::renderer::PrimitiveTopology;
use ash::vk;
use std::sync::Arc;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

// ============================================================================
// Render pass
// ============================================================================

pub struct VulkanRenderPass {
    pub render_pass: vk::RenderPass,
    pub subpasses: Vec<RenderPassAttachment>,
    pub has_depth: bool,
    pub target: OutputTarget,
    ctx: Arc<VulkanContext>,
}

impl std::fmt::Debug for VulkanRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRenderPass")
            .field("subpasses", &self.subpasses)
            .field("target", &self.target)
            .finish()
    }
}

impl VulkanRenderPass {
    /// Attachment 0 is colour, attachment 1 (when any subpass wants it) depth.
    pub fn new(
        ctx: Arc<VulkanContext>,
        subpasses: &[RenderPassAttachment],
        colour_format: vk::Format,
        target: OutputTarget,
    ) -> RenderResult<Self> {
        let has_depth = subpasses.iter().any(|a| a.has_depth());

        // Contents survive between renderers; clearing is an explicit command.
        let colour_layout = match target {
            OutputTarget::Window => vk::ImageLayout::PRESENT_SRC_KHR,
            OutputTarget::OffscreenImage => vk::ImageLayout::GENERAL,
        };
        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(colour_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(colour_layout)
            .final_layout(colour_layout)
            .build()];

        if has_depth {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(DEPTH_FORMAT)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }

        let colour_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let descriptions: Vec<vk::SubpassDescription> = subpasses
            .iter()
            .map(|attachment| {
                let mut subpass = vk::SubpassDescription::builder().pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
                if attachment.has_colour() {
                    subpass = subpass.color_attachments(&colour_ref);
                }
                if attachment.has_depth() {
                    subpass = subpass.depth_stencil_attachment(&depth_ref);
                }
                subpass.build()
            })
            .collect();

        let attachment_stages =
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

        // External -> first subpass, then each subpass waits for the one before it.
        let mut dependencies = vec![vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::TRANSFER)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(attachment_access)
            .build()];
        for i in 1..subpasses.len() as u32 {
            dependencies.push(
                vk::SubpassDependency::builder()
                    .src_subpass(i - 1)
                    .dst_subpass(i)
                    .src_stage_mask(attachment_stages)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                    .dst_stage_mask(attachment_stages)
                    .dst_access_mask(attachment_access)
                    .dependency_flags(vk::DependencyFlags::BY_REGION)
                    .build(),
            );
        }

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&descriptions)
            .dependencies(&dependencies);

        let render_pass = unsafe { ctx.device.create_render_pass(&render_pass_info, None) }?;
        log::debug!("Created render pass with {} subpasses ({:?})", subpasses.len(), target);

        Ok(Self {
            render_pass,
            subpasses: subpasses.to_vec(),
            has_depth,
            target,
            ctx,
        })
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_render_pass(self.render_pass, None) };
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Components that go through the descriptor set, with their binding slot.
pub fn descriptor_bindings<'a>(
    bindings: &'a [BoundComponent<'a, VulkanBackend>],
) -> impl Iterator<Item = (u32, &'a BoundComponent<'a, VulkanBackend>)> + 'a {
    bindings
        .iter()
        .filter(|b| !b.flags().intersects(ResourceFlags::VERTEX_BUFFER | ResourceFlags::INDEX_BUFFER))
        .enumerate()
        .map(|(slot, b)| (slot as u32, b))
}

fn descriptor_type(binding: &BoundComponent<'_, VulkanBackend>) -> vk::DescriptorType {
    match binding {
        BoundComponent::Buffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
        BoundComponent::Image { native, .. } if native.sampler.is_some() => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        BoundComponent::Image { .. } => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Pipeline layout plus the one descriptor set it binds.
pub struct ProgramLayout {
    pub pipeline_layout: vk::PipelineLayout,
    pub set: Option<vk::DescriptorSet>,
    set_layout: vk::DescriptorSetLayout,
    pool: Option<vk::DescriptorPool>,
    ctx: Arc<VulkanContext>,
}

impl ProgramLayout {
    pub fn new(
        ctx: Arc<VulkanContext>,
        bindings: &[BoundComponent<'_, VulkanBackend>],
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<Self> {
        let layout_bindings: Vec<_> = descriptor_bindings(bindings)
            .map(|(slot, b)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(slot)
                    .descriptor_type(descriptor_type(b))
                    .descriptor_count(1)
                    .stage_flags(stages)
                    .build()
            })
            .collect();

        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let set_layout = unsafe { ctx.device.create_descriptor_set_layout(&set_layout_info, None) }?;

        let mut layout = Self {
            pipeline_layout: vk::PipelineLayout::null(),
            set: None,
            set_layout,
            pool: None,
            ctx,
        };

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        layout.pipeline_layout = unsafe { layout.ctx.device.create_pipeline_layout(&layout_info, None) }?;

        if !layout_bindings.is_empty() {
            let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
            for binding in &layout_bindings {
                match pool_sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                    Some(size) => size.descriptor_count += 1,
                    None => pool_sizes.push(vk::DescriptorPoolSize {
                        ty: binding.descriptor_type,
                        descriptor_count: 1,
                    }),
                }
            }
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .pool_sizes(&pool_sizes);
            let pool = unsafe { layout.ctx.device.create_descriptor_pool(&pool_info, None) }?;
            layout.pool = Some(pool);

            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&set_layouts);
            let set = unsafe { layout.ctx.device.allocate_descriptor_sets(&alloc_info) }?[0];
            layout.set = Some(set);
            layout.write(bindings);
        }

        Ok(layout)
    }

    fn write(&self, bindings: &[BoundComponent<'_, VulkanBackend>]) {
        let Some(set) = self.set else {
            return;
        };

        // Info structs must stay put while the writes point at them.
        let buffer_infos: Vec<_> = descriptor_bindings(bindings)
            .filter_map(|(slot, b)| match b {
                BoundComponent::Buffer { native, .. } => Some((
                    slot,
                    vk::DescriptorBufferInfo {
                        buffer: native.buffer,
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    },
                )),
                BoundComponent::Image { .. } => None,
            })
            .collect();
        let image_infos: Vec<_> = descriptor_bindings(bindings)
            .filter_map(|(slot, b)| match b {
                BoundComponent::Image { native, .. } => Some((
                    slot,
                    descriptor_type(b),
                    vk::DescriptorImageInfo {
                        sampler: native.sampler.unwrap_or_default(),
                        image_view: native.view,
                        image_layout: vk::ImageLayout::GENERAL,
                    },
                )),
                BoundComponent::Buffer { .. } => None,
            })
            .collect();

        let writes: Vec<_> = buffer_infos
            .iter()
            .map(|(slot, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .chain(image_infos.iter().map(|(slot, ty, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*slot)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
                    .build()
            }))
            .collect();

        unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for ProgramLayout {
    fn drop(&mut self) {
        unsafe {
            if let Some(pool) = self.pool.take() {
                self.ctx.device.destroy_descriptor_pool(pool, None);
            }
            self.ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

// ============================================================================
// Pipelines
// ============================================================================

pub struct GraphicsPipelineDesc<'a> {
    pub render_pass: &'a VulkanRenderPass,
    pub layout: vk::PipelineLayout,
    pub stages: &'a [ShaderModule],
    pub vertex_layout: &'a [VertexFormat],
    pub topology: PrimitiveTopology,
    pub depth: bool,
    pub options: RendererOptions,
}

/// One pipeline per subpass of the render pass.
pub fn create_graphics_pipelines(ctx: &VulkanContext, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<Vec<vk::Pipeline>> {
    let entry_point = c"main";

    let shader_stages: Vec<_> = desc
        .stages
        .iter()
        .map(|module| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(module.stage)
                .module(module.module)
                .name(entry_point)
                .build()
        })
        .collect();

    // Vertex input: one interleaved binding, one location per attribute
    let bindings = if desc.vertex_layout.is_empty() {
        vec![]
    } else {
        vec![vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(vertex_stride(desc.vertex_layout) as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()]
    };
    let attributes: Vec<_> = desc
        .vertex_layout
        .iter()
        .zip(vertex_offsets(desc.vertex_layout))
        .enumerate()
        .map(|(location, (format, offset))| {
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(location as u32)
                .format(vertex_format_to_native(*format))
                .offset(offset as u32)
                .build()
        })
        .collect();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(topology_to_native(desc.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let colour_blend_attachment = if desc.options.contains(RendererOptions::ALPHA_BLENDING) {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    } else {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()
    };

    let mut pipeline_infos = Vec::with_capacity(desc.render_pass.subpasses.len());
    let mut depth_states = Vec::with_capacity(desc.render_pass.subpasses.len());
    let mut blend_states = Vec::with_capacity(desc.render_pass.subpasses.len());
    let colour_blend_attachments = [colour_blend_attachment];

    for attachment in &desc.render_pass.subpasses {
        let depth = desc.depth && attachment.has_depth();
        depth_states.push(
            vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(depth)
                .depth_write_enable(depth)
                .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false)
                .build(),
        );
        let attachments: &[vk::PipelineColorBlendAttachmentState] =
            if attachment.has_colour() { &colour_blend_attachments } else { &[] };
        blend_states.push(
            vk::PipelineColorBlendStateCreateInfo::builder()
                .logic_op_enable(false)
                .attachments(attachments)
                .build(),
        );
    }

    for (subpass, (depth_state, blend_state)) in depth_states.iter().zip(&blend_states).enumerate() {
        pipeline_infos.push(
            vk::GraphicsPipelineCreateInfo::builder()
                .stages(&shader_stages)
                .vertex_input_state(&vertex_input_info)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterizer)
                .multisample_state(&multisampling)
                .depth_stencil_state(depth_state)
                .color_blend_state(blend_state)
                .dynamic_state(&dynamic_state)
                .layout(desc.layout)
                .render_pass(desc.render_pass.render_pass)
                .subpass(subpass as u32)
                .build(),
        );
    }

    let pipelines = unsafe {
        ctx.device
            .create_graphics_pipelines(vk::PipelineCache::null(), &pipeline_infos, None)
            .map_err(|(_, e)| e)?
    };

    Ok(pipelines)
}

pub fn create_compute_pipeline(ctx: &VulkanContext, layout: vk::PipelineLayout, module: &ShaderModule) -> RenderResult<vk::Pipeline> {
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module.module)
        .name(c"main")
        .build();
    let pipeline_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout).build();

    let pipelines = unsafe {
        ctx.device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)?
    };
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Backend("driver returned no compute pipeline".into()))
}

// ============================================================================
// Framebuffers
// ============================================================================

/// Framebuffers for one render target, plus the depth image they share.
pub struct Targets {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    /// Swapchain generation or output view these were built for.
    pub key: u64,
    _depth: Option<VulkanImage>,
    ctx: Arc<VulkanContext>,
}

impl Targets {
    pub fn new(
        ctx: Arc<VulkanContext>,
        render_pass: vk::RenderPass,
        has_depth: bool,
        colour_views: &[vk::ImageView],
        extent: vk::Extent2D,
        key: u64,
    ) -> RenderResult<Self> {
        let depth = if has_depth {
            Some(VulkanImage::depth_attachment(ctx.clone(), extent)?)
        } else {
            None
        };

        let mut targets = Self {
            framebuffers: Vec::with_capacity(colour_views.len()),
            extent,
            key,
            _depth: None,
            ctx,
        };

        for &view in colour_views {
            let mut attachments = vec![view];
            if let Some(depth) = &depth {
                attachments.push(depth.view);
            }
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { targets.ctx.device.create_framebuffer(&framebuffer_info, None) }?;
            targets.framebuffers.push(framebuffer);
        }

        targets._depth = depth;
        Ok(targets)
    }
}

impl Drop for Targets {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.ctx.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}
