// Buffers and images backed by gpu-allocator
//
// Buffers live in host-visible memory (CpuToGpu) so dynamic resources can be
// written in place. Images live in device memory, stay in GENERAL layout for
// their whole life, and go through a staging buffer both ways.

use super::context::VulkanContext;
use super::convert::{aspect_of, image_format_to_native};
use crate::error::{RenderError, RenderResult};
use crate::render::flags::ResourceFlags;
use crate::render::format::ImageFormat;
use ash::vk;
use glam::UVec2;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

// ============================================================================
// Buffers
// ============================================================================

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub size: usize,
    allocation: Option<Allocation>,
    ctx: Arc<VulkanContext>,
}

/// Usage bits for a resource buffer, from its flags.
pub fn buffer_usage(flags: ResourceFlags) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if flags.contains(ResourceFlags::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if flags.contains(ResourceFlags::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if !flags.intersects(ResourceFlags::VERTEX_BUFFER | ResourceFlags::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    usage
}

impl VulkanBuffer {
    pub fn new(
        ctx: Arc<VulkanContext>,
        name: &str,
        size: usize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<Self> {
        // Zero-sized buffers are invalid in Vulkan
        let alloc_size = size.max(4) as vk::DeviceSize;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(alloc_size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { ctx.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

        let allocation = match ctx.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { ctx.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe { ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            ctx.free(allocation);
            unsafe { ctx.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            ctx,
        })
    }

    /// Create a host-visible buffer and fill it with `data`.
    pub fn with_data(ctx: Arc<VulkanContext>, name: &str, usage: vk::BufferUsageFlags, data: &[u8]) -> RenderResult<Self> {
        let mut buffer = Self::new(ctx, name, data.len(), usage, MemoryLocation::CpuToGpu)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        let size = self.size;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| RenderError::Backend("buffer memory is not host visible".into()))?;
        let target = mapped
            .get_mut(offset..offset + bytes.len())
            .filter(|_| offset + bytes.len() <= size)
            .ok_or(RenderError::WriteOutOfBounds {
                offset,
                len: bytes.len(),
                size,
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self) -> RenderResult<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .map(|mapped| &mapped[..self.size])
            .ok_or_else(|| RenderError::Backend("buffer memory is not host visible".into()))
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
    }
}

// ============================================================================
// Images
// ============================================================================

pub struct VulkanImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: Option<vk::Sampler>,
    pub format: ImageFormat,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    ctx: Arc<VulkanContext>,
}

fn is_integer(format: ImageFormat) -> bool {
    use ImageFormat::*;
    matches!(
        format,
        R8Uint | R8Sint | R16Uint | R16Sint | Rg16Uint | Rg16Sint | Rg32Uint | Rg32Sint | Rgb24Uint | Rgb24Sint
            | Bgr24Uint | Bgr24Sint | Rgba32Uint | Rgba32Sint | Bgra32Uint | Bgra32Sint
    )
}

fn sampler_info(format: ImageFormat, flags: ResourceFlags) -> vk::SamplerCreateInfo {
    let filter = if flags.contains(ResourceFlags::IMAGE_FILTER_NEAREST) || is_integer(format) {
        vk::Filter::NEAREST
    } else {
        vk::Filter::LINEAR
    };
    let address_mode = if flags.contains(ResourceFlags::IMAGE_WRAP_REPEAT) {
        vk::SamplerAddressMode::REPEAT
    } else if flags.contains(ResourceFlags::IMAGE_WRAP_MIRRORED_REPEAT) {
        vk::SamplerAddressMode::MIRRORED_REPEAT
    } else {
        vk::SamplerAddressMode::CLAMP_TO_EDGE
    };

    vk::SamplerCreateInfo::builder()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .max_lod(0.0)
        .build()
}

impl VulkanImage {
    /// Create an image for a resource and move it to GENERAL layout.
    pub fn new(ctx: Arc<VulkanContext>, name: &str, format: ImageFormat, dimensions: UVec2, flags: ResourceFlags) -> RenderResult<Self> {
        let native = image_format_to_native(format);
        let features = ctx.format_features(native);

        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if format.is_depth() {
            if features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT) {
                usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            }
        } else if features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if !usage.intersects(
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ) || (flags.contains(ResourceFlags::RENDERER_OUTPUT) && !usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT))
        {
            return Err(RenderError::UnsupportedFormat(format, "Vulkan"));
        }

        let mut image = Self::create(ctx, name, format, dimensions, usage)?;
        image.transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)?;

        if usage.contains(vk::ImageUsageFlags::SAMPLED) {
            let sampler = unsafe { image.ctx.device.create_sampler(&sampler_info(format, flags), None) }?;
            image.sampler = Some(sampler);
        }
        Ok(image)
    }

    /// Depth attachment owned by a program. Layout is managed by the render pass.
    pub fn depth_attachment(ctx: Arc<VulkanContext>, extent: vk::Extent2D) -> RenderResult<Self> {
        Self::create(
            ctx,
            "depth attachment",
            ImageFormat::Depth32Sfloat,
            UVec2::new(extent.width, extent.height),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    fn create(
        ctx: Arc<VulkanContext>,
        name: &str,
        format: ImageFormat,
        dimensions: UVec2,
        usage: vk::ImageUsageFlags,
    ) -> RenderResult<Self> {
        let native = image_format_to_native(format);
        let extent = vk::Extent2D {
            width: dimensions.x.max(1),
            height: dimensions.y.max(1),
        };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(native)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { ctx.device.create_image(&image_info, None) }?;
        let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };

        let allocation = match ctx.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { ctx.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe {
            ctx.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .and_then(|()| {
                    let view_info = vk::ImageViewCreateInfo::builder()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(native)
                        .subresource_range(subresource_range(format));
                    ctx.device.create_image_view(&view_info, None)
                })
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                ctx.free(allocation);
                unsafe { ctx.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            image,
            view,
            sampler: None,
            format,
            extent,
            allocation: Some(allocation),
            ctx,
        })
    }

    fn transition(&self, old: vk::ImageLayout, new: vk::ImageLayout) -> RenderResult<()> {
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range(self.format))
            .build();

        self.ctx.submit_immediate(|device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    fn copy_region(&self, row_length: u32) -> vk::BufferImageCopy {
        vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(row_length)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect_of(self.format),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .build()
    }

    /// Copy staged pixel rows into the image.
    pub fn upload(&self, bytes: &[u8], row_pitch: usize) -> RenderResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let staging = VulkanBuffer::with_data(
            self.ctx.clone(),
            "image staging",
            vk::BufferUsageFlags::TRANSFER_SRC,
            bytes,
        )?;
        let row_length = (row_pitch / self.format.pixel_size_bytes()) as u32;
        let region = self.copy_region(row_length);
        let image = self.image;

        self.ctx.submit_immediate(|device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(cmd, staging.buffer, image, vk::ImageLayout::GENERAL, &[region]);
        })
    }

    /// Copy the image into host memory as tightly packed rows.
    pub fn read_back(&self) -> RenderResult<Vec<u8>> {
        let size = self.extent.width as usize * self.extent.height as usize * self.format.pixel_size_bytes();
        let staging = VulkanBuffer::new(
            self.ctx.clone(),
            "readback staging",
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;
        let region = self.copy_region(0);
        let image = self.image;

        // Make earlier attachment and shader writes visible to the copy
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .build();

        self.ctx.submit_immediate(|device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
            device.cmd_copy_image_to_buffer(cmd, image, vk::ImageLayout::GENERAL, staging.buffer, &[region]);
        })?;

        Ok(staging.read()?.to_vec())
    }

    pub fn dimensions(&self) -> UVec2 {
        UVec2::new(self.extent.width, self.extent.height)
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                self.ctx.device.destroy_sampler(sampler, None);
            }
            self.ctx.device.destroy_image_view(self.view, None);
            self.ctx.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
    }
}

pub fn subresource_range(format: ImageFormat) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_of(format),
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_buffers_are_storage_buffers() {
        let usage = buffer_usage(ResourceFlags::EMPTY);
        assert!(usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }

    #[test]
    fn vertex_and_index_flags_pick_their_usage() {
        let vertex = buffer_usage(ResourceFlags::VERTEX_BUFFER);
        assert!(vertex.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(!vertex.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        let index = buffer_usage(ResourceFlags::INDEX_BUFFER);
        assert!(index.contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn sampler_follows_filter_and_wrap_flags() {
        let info = sampler_info(
            ImageFormat::Rgba32Unorm,
            ResourceFlags::IMAGE_FILTER_NEAREST | ResourceFlags::IMAGE_WRAP_REPEAT,
        );
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);

        let info = sampler_info(ImageFormat::Rgba32Unorm, ResourceFlags::EMPTY);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }

    #[test]
    fn integer_images_never_filter_linearly() {
        let info = sampler_info(ImageFormat::R8Uint, ResourceFlags::IMAGE_FILTER_LINEAR);
        assert_eq!(info.min_filter, vk::Filter::NEAREST);
    }
}
