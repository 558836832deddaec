use super::{barrier::emit_global_barrier, context::*};
use crate::error::*;
use spark::{vk, Device};
use std::slice;

/// A single command buffer that is recorded, submitted and waited on per call.
pub(crate) struct OneShotCommandBuffer {
    context: SharedContext,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl OneShotCommandBuffer {
    pub fn new(context: &SharedContext) -> Result<Self> {
        let device = &context.device;

        let pool = {
            let command_pool_create_info = vk::CommandPoolCreateInfo {
                queue_family_index: context.queue_family_index,
                ..Default::default()
            };
            unsafe { device.create_command_pool(&command_pool_create_info, None) }.vk_context("vkCreateCommandPool")?
        };

        let [cmd] = {
            let command_buffer_allocate_info = vk::CommandBufferAllocateInfo {
                command_pool: Some(pool),
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let command_buffers: [vk::CommandBuffer; 1] =
                unsafe { device.allocate_command_buffers_array(&command_buffer_allocate_info) }
                    .vk_context("vkAllocateCommandBuffers")?;
            command_buffers
        };

        let fence = unsafe { device.create_fence(&Default::default(), None) }.vk_context("vkCreateFence")?;

        Ok(Self {
            context: SharedContext::clone(context),
            pool,
            cmd,
            fence,
        })
    }

    /// Records commands with `f`, then blocks until the queue has executed them.
    pub fn submit(&mut self, f: impl FnOnce(&Device, vk::CommandBuffer)) -> Result<()> {
        let device = &self.context.device;

        unsafe { device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }
            .vk_context("vkResetCommandPool")?;

        let command_buffer_begin_info = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(self.cmd, &command_buffer_begin_info) }
            .vk_context("vkBeginCommandBuffer")?;

        emit_global_barrier(device, self.cmd);
        f(device, self.cmd);
        emit_global_barrier(device, self.cmd);

        unsafe { device.end_command_buffer(self.cmd) }.vk_context("vkEndCommandBuffer")?;

        let submit_info = vk::SubmitInfo::builder().p_command_buffers(slice::from_ref(&self.cmd));
        unsafe { device.queue_submit(self.context.queue, slice::from_ref(&*submit_info), Some(self.fence)) }
            .vk_context("vkQueueSubmit")?;

        unsafe { device.wait_for_fences(slice::from_ref(&self.fence), true, u64::MAX) }
            .vk_context("vkWaitForFences")?;
        unsafe { device.reset_fences(slice::from_ref(&self.fence)) }.vk_context("vkResetFences")?;
        Ok(())
    }
}

impl Drop for OneShotCommandBuffer {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_fence(Some(self.fence), None);
            device.free_command_buffers(self.pool, slice::from_ref(&self.cmd));
            device.destroy_command_pool(Some(self.pool), None);
        }
    }
}
