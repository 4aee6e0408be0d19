// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Images are moved to PRESENT_SRC right after creation so every render pass
// can start from that layout, whether or not the previous frame cleared.

use super::context::VulkanContext;
use super::surface::Surface;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use std::sync::Arc;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    ctx: Arc<VulkanContext>,
}

pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

impl Swapchain {
    pub fn new(
        ctx: Arc<VulkanContext>,
        surface: &Surface,
        preferred_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_loader = &surface.loader;
        let surface = surface.handle;

        let surface_caps =
            unsafe { surface_loader.get_physical_device_surface_capabilities(ctx.physical_device, surface) }?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(ctx.physical_device, surface) }?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(ctx.physical_device, surface) }?;

        // Prefer plain BGRA8; the engine reports it as Bgra32Unorm.
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .ok_or_else(|| RenderError::UnsupportedFeature("surface reports no formats".into()))?;

        // FIFO is always supported
        let present_mode = if present_modes.contains(&preferred_mode) {
            preferred_mode
        } else {
            log::warn!("Present mode {:?} unavailable, using FIFO", preferred_mode);
            vk::PresentModeKHR::FIFO
        };
        log::info!("Present mode: {:?}", present_mode);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: height.clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        };

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&ctx.instance, &ctx.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!("Created swapchain with {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(colour_range());
                unsafe { ctx.device.create_image_view(&create_info, None) }.map_err(RenderError::from)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let swapchain = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            ctx,
        };
        swapchain.transition_to_present()?;
        Ok(swapchain)
    }

    fn transition_to_present(&self) -> RenderResult<()> {
        let barriers: Vec<_> = self
            .images
            .iter()
            .map(|&image| {
                vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::empty())
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(colour_range())
                    .build()
            })
            .collect();

        self.ctx.submit_immediate(|device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        })
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RenderResult<Acquired> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen. Returns true when the swapchain
    /// should be recreated.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> RenderResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.ctx.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

pub fn colour_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
