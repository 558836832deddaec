use super::context::*;
use crate::error::*;
use arrayvec::ArrayVec;
use spark::vk;
use std::slice;

/// A layout of storage buffers at bindings `0..count` and one set allocated from a private pool.
pub(crate) struct StorageBufferSet {
    context: SharedContext,
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl StorageBufferSet {
    pub const MAX_BINDINGS: usize = 16;

    pub fn new(context: &SharedContext, count: u32) -> Result<Self> {
        let device = &context.device;
        if count as usize > Self::MAX_BINDINGS {
            return Err(Error::Unsupported("more than 16 storage buffer bindings"));
        }

        let layout = {
            let bindings: ArrayVec<_, { Self::MAX_BINDINGS }> = (0..count)
                .map(|i| vk::DescriptorSetLayoutBinding {
                    binding: i,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    descriptor_count: 1,
                    stage_flags: vk::ShaderStageFlags::COMPUTE,
                    ..Default::default()
                })
                .collect();
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder().p_bindings(&bindings);
            unsafe { device.create_descriptor_set_layout(&create_info, None) }
                .vk_context("vkCreateDescriptorSetLayout")?
        };

        let pool = {
            let descriptor_pool_size = vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: count.max(1),
            };
            let create_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .p_pool_sizes(slice::from_ref(&descriptor_pool_size));
            match unsafe { device.create_descriptor_pool(&create_info, None) } {
                Ok(pool) => pool,
                Err(result) => {
                    unsafe { device.destroy_descriptor_set_layout(Some(layout), None) };
                    return Err(result).vk_context("vkCreateDescriptorPool");
                }
            }
        };

        let set = {
            let allocate_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .p_set_layouts(slice::from_ref(&layout));
            match unsafe { device.allocate_descriptor_sets_single(&allocate_info) } {
                Ok(set) => set,
                Err(result) => {
                    unsafe {
                        device.destroy_descriptor_pool(Some(pool), None);
                        device.destroy_descriptor_set_layout(Some(layout), None);
                    }
                    return Err(result).vk_context("vkAllocateDescriptorSets");
                }
            }
        };

        Ok(Self {
            context: SharedContext::clone(context),
            layout,
            pool,
            set,
        })
    }

    /// Updates the set in place, so must not race with a submission that uses it.
    pub fn write(&self, binding: u32, buffer: vk::Buffer) {
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: Some(buffer),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let write = vk::WriteDescriptorSet {
            dst_set: Some(self.set),
            dst_binding: binding,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            p_buffer_info: &buffer_info,
            ..Default::default()
        };
        unsafe {
            self.context
                .device
                .update_descriptor_sets(slice::from_ref(&write), &[])
        };
    }
}

impl Drop for StorageBufferSet {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_descriptor_pool(Some(self.pool), None);
            device.destroy_descriptor_set_layout(Some(self.layout), None);
        }
    }
}
