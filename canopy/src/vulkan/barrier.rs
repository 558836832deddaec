use crate::resource::*;
use spark::{vk, Device};
use std::slice;

impl BufferUsageBit {
    fn as_flags(self, enable_device_addresses: bool) -> vk::BufferUsageFlags {
        match self {
            BufferUsageBit::STORAGE => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferUsageBit::VERTEX_BUFFER => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsageBit::INDEX_BUFFER => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsageBit::ACCELERATION_STRUCTURE_BUILD_INPUT if enable_device_addresses => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            }
            BufferUsageBit::ACCELERATION_STRUCTURE_STORAGE if enable_device_addresses => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            }
            BufferUsageBit::ACCELERATION_STRUCTURE_BUILD_SCRATCH => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferUsageBit::SHADER_DEVICE_ADDRESS if enable_device_addresses => {
                vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
            }
            _ => vk::BufferUsageFlags::empty(),
        }
    }
}

impl BufferUsage {
    /// Acceleration structure and device address usage is dropped when the device lacks them.
    pub(crate) fn as_flags(self, enable_device_addresses: bool) -> vk::BufferUsageFlags {
        self.iter_set_bits()
            .fold(vk::BufferUsageFlags::empty(), |m, u| m | u.as_flags(enable_device_addresses))
    }
}

/// Makes every write before this point visible to every command after it.
pub(crate) fn emit_global_barrier(device: &Device, cmd: vk::CommandBuffer) {
    let memory_barrier = vk::MemoryBarrier {
        src_access_mask: vk::AccessFlags::MEMORY_WRITE,
        dst_access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ..Default::default()
    };
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            slice::from_ref(&memory_barrier),
            &[],
            &[],
        )
    }
}
