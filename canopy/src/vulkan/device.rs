use super::{command_buffer::*, context::*, descriptor::*, shader::*};
use crate::{device::*, error::*, resource::*};
use slotmap::SlotMap;
use spark::{vk, Builder};
use std::{
    ffi::CStr,
    os::raw::c_void,
    ptr, slice,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info};

struct Mapping(*mut c_void);

// the mapping is only dereferenced while the resource lock is held
unsafe impl Send for Mapping {}

struct BufferResource {
    context: SharedContext,
    desc: BufferDesc,
    buffer: vk::Buffer,
    mem: vk::DeviceMemory,
    mapping: Option<Mapping>,
}

impl Drop for BufferResource {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_buffer(Some(self.buffer), None);
            device.free_memory(Some(self.mem), None);
        }
    }
}

struct AccelerationStructureResource {
    context: SharedContext,
    accel: vk::AccelerationStructureKHR,
}

impl Drop for AccelerationStructureResource {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_acceleration_structure_khr(Some(self.accel), None)
        };
    }
}

struct ComputePipelineResource {
    context: SharedContext,
    name: String,
    binding_count: u32,
    descriptor_set: StorageBufferSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl Drop for ComputePipelineResource {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_pipeline(Some(self.pipeline), None);
            device.destroy_pipeline_layout(Some(self.pipeline_layout), None);
        }
    }
}

struct Resources {
    acceleration_structures: SlotMap<AccelerationStructureId, AccelerationStructureResource>,
    compute_pipelines: SlotMap<ComputePipelineId, ComputePipelineResource>,
    buffers: SlotMap<BufferId, BufferResource>,
    command_buffer: OneShotCommandBuffer,
}

fn geometry_info(geometry: &AccelerationStructureGeometry) -> vk::AccelerationStructureGeometryKHR {
    match *geometry {
        AccelerationStructureGeometry::Triangles {
            vertex_data,
            vertex_stride,
            max_vertex,
            index_data,
            transform_data,
        } => vk::AccelerationStructureGeometryKHR {
            geometry_type: vk::GeometryTypeKHR::TRIANGLES,
            geometry: vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR {
                    vertex_format: vk::Format::R32G32B32_SFLOAT,
                    vertex_data: vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_data,
                    },
                    vertex_stride: vk::DeviceSize::from(vertex_stride),
                    max_vertex,
                    index_type: vk::IndexType::UINT32,
                    index_data: vk::DeviceOrHostAddressConstKHR {
                        device_address: index_data,
                    },
                    transform_data: vk::DeviceOrHostAddressConstKHR {
                        device_address: transform_data,
                    },
                    ..Default::default()
                },
            },
            flags: vk::GeometryFlagsKHR::OPAQUE,
            ..Default::default()
        },
        AccelerationStructureGeometry::Instances { data } => vk::AccelerationStructureGeometryKHR {
            geometry_type: vk::GeometryTypeKHR::INSTANCES,
            geometry: vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR {
                    data: vk::DeviceOrHostAddressConstKHR { device_address: data },
                    ..Default::default()
                },
            },
            ..Default::default()
        },
    }
}

fn acceleration_structure_type(level: AccelerationStructureLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        AccelerationStructureLevel::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureLevel::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

/// The `Device` implementation for a headless Vulkan context.
///
/// Each buffer gets a dedicated allocation, host visible buffers stay mapped
/// for their lifetime. Every build and dispatch is submitted on its own and
/// waited on with a fence.
pub struct VulkanDevice {
    context: SharedContext,
    resources: Mutex<Resources>,
}

impl VulkanDevice {
    pub fn new(params: &ContextParams) -> Result<Self> {
        let context = SharedContext::new(Context::new(params)?);
        info!(
            acceleration_structures = context.enable_acceleration_structures,
            "created device {:?}",
            unsafe { CStr::from_ptr(context.physical_device_properties.device_name.as_ptr()) }
        );
        let command_buffer = OneShotCommandBuffer::new(&context)?;
        Ok(Self {
            resources: Mutex::new(Resources {
                acceleration_structures: SlotMap::with_key(),
                compute_pipelines: SlotMap::with_key(),
                buffers: SlotMap::with_key(),
                command_buffer,
            }),
            context,
        })
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn supports_acceleration_structures(&self) -> bool {
        self.context.enable_acceleration_structures
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_acceleration_structures(&self) -> Result<()> {
        if self.context.enable_acceleration_structures {
            Ok(())
        } else {
            Err(Error::Unsupported("acceleration structures"))
        }
    }

    fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        desc: &BufferDesc,
        use_device_address: bool,
    ) -> Result<(vk::DeviceMemory, Option<Mapping>)> {
        let device = &self.context.device;
        let mem_req = unsafe { device.get_buffer_memory_requirements(buffer) };
        let property_flags = if desc.host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let memory_type_index = self
            .context
            .get_memory_type_index(mem_req.memory_type_bits, property_flags)?;

        let mut memory_allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_req.size)
            .memory_type_index(memory_type_index);
        let mut flags_info = vk::MemoryAllocateFlagsInfo {
            flags: vk::MemoryAllocateFlagsKHR::DEVICE_ADDRESS_KHR,
            ..Default::default()
        };
        if use_device_address {
            memory_allocate_info = memory_allocate_info.insert_next(&mut flags_info);
        }
        let mem = unsafe { device.allocate_memory(&memory_allocate_info, None) }.vk_context("vkAllocateMemory")?;

        let mapping = unsafe { device.bind_buffer_memory(buffer, mem, 0) }
            .vk_context("vkBindBufferMemory")
            .and_then(|_| {
                if desc.host_visible {
                    unsafe { device.map_memory(mem, 0, vk::WHOLE_SIZE, Default::default()) }
                        .vk_context("vkMapMemory")
                        .map(|p| Some(Mapping(p)))
                } else {
                    Ok(None)
                }
            });
        match mapping {
            Ok(mapping) => Ok((mem, mapping)),
            Err(err) => {
                unsafe { device.free_memory(Some(mem), None) };
                Err(err)
            }
        }
    }
}

impl Device for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<(BufferId, DeviceAddress)> {
        let device = &self.context.device;
        let use_device_address =
            self.context.enable_acceleration_structures && desc.usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS);

        let buffer_create_info = vk::BufferCreateInfo {
            size: desc.size as vk::DeviceSize,
            usage: desc.usage.as_flags(self.context.enable_acceleration_structures),
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&buffer_create_info, None) }.vk_context("vkCreateBuffer")?;

        let (mem, mapping) = match self.allocate_buffer_memory(buffer, desc, use_device_address) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(Some(buffer), None) };
                return Err(err);
            }
        };

        let address = if use_device_address {
            let info = vk::BufferDeviceAddressInfo {
                buffer: Some(buffer),
                ..Default::default()
            };
            unsafe { device.get_buffer_device_address(&info) }
        } else {
            0
        };

        let id = self.resources().buffers.insert(BufferResource {
            context: SharedContext::clone(&self.context),
            desc: desc.clone(),
            buffer,
            mem,
            mapping,
        });
        Ok((id, address))
    }

    fn destroy_buffer(&self, id: BufferId) {
        self.resources().buffers.remove(id);
    }

    fn write_buffer(&self, id: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let resources = self.resources();
        let resource = &resources.buffers[id];
        let mapping = resource.mapping.as_ref().ok_or_else(|| Error::NotHostVisible {
            name: resource.desc.name.clone(),
        })?;
        check_range(&resource.desc.name, offset, data.len(), resource.desc.size)?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), (mapping.0 as *mut u8).add(offset), data.len()) };
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: usize, data: &mut [u8]) -> Result<()> {
        let resources = self.resources();
        let resource = &resources.buffers[id];
        let mapping = resource.mapping.as_ref().ok_or_else(|| Error::NotHostVisible {
            name: resource.desc.name.clone(),
        })?;
        check_range(&resource.desc.name, offset, data.len(), resource.desc.size)?;
        unsafe { ptr::copy_nonoverlapping((mapping.0 as *const u8).add(offset), data.as_mut_ptr(), data.len()) };
        Ok(())
    }

    fn acceleration_structure_build_sizes(
        &self,
        geometry: &AccelerationStructureGeometry,
        primitive_count: u32,
    ) -> Result<AccelerationStructureBuildSizes> {
        self.check_acceleration_structures()?;
        let geometry_info = geometry_info(geometry);
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR {
            ty: acceleration_structure_type(geometry.level()),
            flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            mode: vk::BuildAccelerationStructureModeKHR::BUILD,
            geometry_count: 1,
            p_geometries: &geometry_info,
            ..Default::default()
        };
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.context.device.get_acceleration_structure_build_sizes_khr(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                Some(slice::from_ref(&primitive_count)),
                &mut sizes,
            )
        };
        Ok(AccelerationStructureBuildSizes {
            storage_size: sizes.acceleration_structure_size as usize,
            scratch_size: sizes.build_scratch_size as usize,
        })
    }

    fn create_acceleration_structure(
        &self,
        level: AccelerationStructureLevel,
        buffer: BufferId,
        size: usize,
    ) -> Result<AccelerationStructureId> {
        self.check_acceleration_structures()?;
        let mut resources = self.resources();
        let create_info = vk::AccelerationStructureCreateInfoKHR {
            buffer: Some(resources.buffers[buffer].buffer),
            size: size as vk::DeviceSize,
            ty: acceleration_structure_type(level),
            ..Default::default()
        };
        let accel = unsafe { self.context.device.create_acceleration_structure_khr(&create_info, None) }
            .vk_context("vkCreateAccelerationStructureKHR")?;
        Ok(resources
            .acceleration_structures
            .insert(AccelerationStructureResource {
                context: SharedContext::clone(&self.context),
                accel,
            }))
    }

    fn destroy_acceleration_structure(&self, id: AccelerationStructureId) {
        self.resources().acceleration_structures.remove(id);
    }

    fn acceleration_structure_device_address(&self, id: AccelerationStructureId) -> Result<DeviceAddress> {
        let info = vk::AccelerationStructureDeviceAddressInfoKHR {
            acceleration_structure: Some(self.resources().acceleration_structures[id].accel),
            ..Default::default()
        };
        Ok(unsafe { self.context.device.get_acceleration_structure_device_address_khr(&info) })
    }

    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild) -> Result<()> {
        self.check_acceleration_structures()?;
        let mut resources = self.resources();
        let geometry_info = geometry_info(build.geometry);
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR {
            ty: acceleration_structure_type(build.geometry.level()),
            flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            mode: vk::BuildAccelerationStructureModeKHR::BUILD,
            dst_acceleration_structure: Some(resources.acceleration_structures[build.dst].accel),
            geometry_count: 1,
            p_geometries: &geometry_info,
            scratch_data: vk::DeviceOrHostAddressKHR {
                device_address: build.scratch_data,
            },
            ..Default::default()
        };
        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: build.primitive_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        };
        resources.command_buffer.submit(|device, cmd| unsafe {
            device.cmd_build_acceleration_structures_khr(cmd, slice::from_ref(&build_info), &[&build_range_info])
        })
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<ComputePipelineId> {
        let device = &self.context.device;
        let descriptor_set = StorageBufferSet::new(&self.context, desc.storage_buffer_count)?;
        let pipeline_layout = {
            let create_info =
                vk::PipelineLayoutCreateInfo::builder().p_set_layouts(slice::from_ref(&descriptor_set.layout));
            unsafe { device.create_pipeline_layout(&create_info, None) }.vk_context("vkCreatePipelineLayout")?
        };

        let pipeline = load_shader_module(device, &desc.shader).and_then(|shader| {
            let shader_entry_name = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };
            let pipeline_create_info = vk::ComputePipelineCreateInfo {
                stage: vk::PipelineShaderStageCreateInfo {
                    stage: vk::ShaderStageFlags::COMPUTE,
                    module: Some(shader),
                    p_name: shader_entry_name.as_ptr(),
                    ..Default::default()
                },
                layout: Some(pipeline_layout),
                ..Default::default()
            };
            let pipeline = unsafe { device.create_compute_pipelines_single(None, &pipeline_create_info, None) }
                .vk_context("vkCreateComputePipelines");
            unsafe { device.destroy_shader_module(Some(shader), None) };
            pipeline
        });
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(err) => {
                unsafe { device.destroy_pipeline_layout(Some(pipeline_layout), None) };
                return Err(err);
            }
        };

        debug!(name = desc.name.as_str(), shader = ?desc.shader, "created compute pipeline");
        Ok(self.resources().compute_pipelines.insert(ComputePipelineResource {
            context: SharedContext::clone(&self.context),
            name: desc.name.clone(),
            binding_count: desc.storage_buffer_count,
            descriptor_set,
            pipeline_layout,
            pipeline,
        }))
    }

    fn destroy_compute_pipeline(&self, id: ComputePipelineId) {
        self.resources().compute_pipelines.remove(id);
    }

    fn bind_storage_buffer(&self, pipeline: ComputePipelineId, binding: u32, buffer: BufferId) -> Result<()> {
        let resources = self.resources();
        let pipeline = &resources.compute_pipelines[pipeline];
        if binding >= pipeline.binding_count {
            return Err(Error::InvalidBinding {
                pipeline: pipeline.name.clone(),
                binding,
            });
        }
        pipeline
            .descriptor_set
            .write(binding, resources.buffers[buffer].buffer);
        Ok(())
    }

    fn dispatch(&self, pipeline: ComputePipelineId, group_count: u32) -> Result<()> {
        if group_count == 0 {
            return Ok(());
        }
        let mut guard = self.resources();
        let resources = &mut *guard;
        let pipeline = &resources.compute_pipelines[pipeline];

        // split across y when the count exceeds the per-dimension limit, kernels bounds check
        let max_x = self.context.physical_device_properties.limits.max_compute_work_group_count[0].max(1);
        let x = group_count.min(max_x);
        let y = group_count / x + u32::from(group_count % x != 0);

        let (vk_pipeline, pipeline_layout, set) =
            (pipeline.pipeline, pipeline.pipeline_layout, pipeline.descriptor_set.set);
        resources.command_buffer.submit(|device, cmd| unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, vk_pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline_layout,
                0,
                slice::from_ref(&set),
                &[],
            );
            device.cmd_dispatch(cmd, x, y, 1);
        })
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe { self.context.device.device_wait_idle() }.ok();
    }
}
