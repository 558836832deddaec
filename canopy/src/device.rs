use crate::{error::*, resource::*};
use std::{path::PathBuf, sync::Arc};

/// Geometry for a single acceleration structure build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureGeometry {
    /// Opaque triangles with 32-bit indices and `R32G32B32_SFLOAT` positions at offset 0.
    Triangles {
        vertex_data: DeviceAddress,
        vertex_stride: u32,
        max_vertex: u32,
        index_data: DeviceAddress,
        transform_data: DeviceAddress,
    },
    /// Tightly packed array of `AccelerationStructureInstance`.
    Instances { data: DeviceAddress },
}

impl AccelerationStructureGeometry {
    pub fn level(&self) -> AccelerationStructureLevel {
        match self {
            Self::Triangles { .. } => AccelerationStructureLevel::BottomLevel,
            Self::Instances { .. } => AccelerationStructureLevel::TopLevel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationStructureBuildSizes {
    pub storage_size: usize,
    pub scratch_size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AccelerationStructureBuild<'a> {
    pub geometry: &'a AccelerationStructureGeometry,
    pub primitive_count: u32,
    pub dst: AccelerationStructureId,
    pub scratch_data: DeviceAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub shader: PathBuf,
    pub storage_buffer_count: u32,
    pub name: String,
}

/// The GPU context consumed by the scene acceleration code.
///
/// Every submission (builds and dispatches) is waited on before the call
/// returns, so results are visible to the next call without further
/// synchronisation.
pub trait Device: Send + Sync {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<(BufferId, DeviceAddress)>;
    fn destroy_buffer(&self, id: BufferId);
    fn write_buffer(&self, id: BufferId, offset: usize, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, id: BufferId, offset: usize, data: &mut [u8]) -> Result<()>;

    fn acceleration_structure_build_sizes(
        &self,
        geometry: &AccelerationStructureGeometry,
        primitive_count: u32,
    ) -> Result<AccelerationStructureBuildSizes>;
    fn create_acceleration_structure(
        &self,
        level: AccelerationStructureLevel,
        buffer: BufferId,
        size: usize,
    ) -> Result<AccelerationStructureId>;
    fn destroy_acceleration_structure(&self, id: AccelerationStructureId);
    fn acceleration_structure_device_address(&self, id: AccelerationStructureId) -> Result<DeviceAddress>;
    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild) -> Result<()>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<ComputePipelineId>;
    fn destroy_compute_pipeline(&self, id: ComputePipelineId);
    fn bind_storage_buffer(&self, pipeline: ComputePipelineId, binding: u32, buffer: BufferId) -> Result<()>;
    fn dispatch(&self, pipeline: ComputePipelineId, group_count: u32) -> Result<()>;
}

pub type SharedDevice = Arc<dyn Device>;

/// Checks a host access against the size of a buffer.
pub(crate) fn check_range(name: &str, offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::OutOfBounds {
            name: name.to_owned(),
            offset,
            len,
            size,
        }),
    }
}
