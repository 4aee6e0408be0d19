// Synchronization primitives
//
// One FrameSync per frame in flight: the semaphores pace the swapchain and
// the fence tells the CPU when the slot's command buffer is free again.

use super::context::VulkanContext;
use crate::error::RenderResult;
use ash::vk;
use std::sync::Arc;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    pool: vk::CommandPool,
    ctx: Arc<VulkanContext>,
}

impl FrameSync {
    pub fn new(ctx: Arc<VulkanContext>) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        unsafe {
            let pool = ctx.device.create_command_pool(&pool_info, None)?;
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = ctx.device.allocate_command_buffers(&alloc_info)?[0];

            Ok(Self {
                image_available: ctx.device.create_semaphore(&semaphore_info, None)?,
                render_finished: ctx.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: ctx.device.create_fence(&fence_info, None)?,
                command_buffer,
                pool,
                ctx,
            })
        }
    }

    /// Block until the GPU is done with this slot.
    pub fn wait(&self) -> RenderResult<()> {
        unsafe { self.ctx.device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX)? };
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let device = &self.ctx.device;
            let _ = device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}
