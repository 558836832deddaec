use crate::{device::*, error::*, maths::*, mesh::*, resource::*, scene::*, visitor::*};
use bytemuck::{Pod, Zeroable};
use std::{mem, ops::Range};
use tracing::{debug, trace};

/// Instance record consumed by a top level build, laid out as `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct AccelerationStructureInstance {
    pub transform: TransposedTransform3,
    pub instance_custom_index_and_mask: u32,
    pub instance_shader_binding_table_record_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl AccelerationStructureInstance {
    pub const MAX_CUSTOM_INDEX: u32 = 0x00ff_ffff;
    pub const MASK_ALL: u32 = 0xff;
    pub const TRIANGLE_FACING_CULL_DISABLE: u32 = 0x1;

    pub fn new(
        transform: TransposedTransform3,
        custom_index: u32,
        mask: u32,
        sbt_record_offset: u32,
        flags: u32,
        acceleration_structure_reference: DeviceAddress,
    ) -> Self {
        Self {
            transform,
            instance_custom_index_and_mask: (custom_index & Self::MAX_CUSTOM_INDEX) | (mask << 24),
            instance_shader_binding_table_record_offset_and_flags: (sbt_record_offset & 0x00ff_ffff) | (flags << 24),
            acceleration_structure_reference,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & Self::MAX_CUSTOM_INDEX
    }

    pub fn mask(&self) -> u32 {
        self.instance_custom_index_and_mask >> 24
    }

    pub fn sbt_record_offset(&self) -> u32 {
        self.instance_shader_binding_table_record_offset_and_flags & 0x00ff_ffff
    }

    pub fn flags(&self) -> u32 {
        self.instance_shader_binding_table_record_offset_and_flags >> 24
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildParams {
    /// First custom index handed out by each call to `build`.
    pub custom_index_base: u32,
    /// Keep existing bottom level structures of static meshes instead of rebuilding them.
    pub reuse_static_bottom_level: bool,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            custom_index_base: 0,
            reuse_static_bottom_level: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub bottom_level_count: u32,
    pub top_level_count: u32,
    pub instance_count: u32,
    pub custom_indices: Range<u32>,
}

/// Builds bottom level structures for mesh leaves and top level structures
/// for interior nodes, children before parents.
pub struct AccelerationStructureBuilder {
    device: SharedDevice,
    params: BuildParams,
    identity_transform: Buffer,
    next_custom_index: u32,
    stats: BuildStats,
}

impl AccelerationStructureBuilder {
    pub fn new(device: &SharedDevice, params: BuildParams) -> Result<Self> {
        let identity_transform = Buffer::with_data(
            device,
            BufferDesc::new(0)
                .usage(BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT | BufferUsage::SHADER_DEVICE_ADDRESS)
                .name("identity transform"),
            &[TransposedTransform3::identity()],
        )?;
        Ok(Self {
            device: SharedDevice::clone(device),
            params,
            identity_transform,
            next_custom_index: params.custom_index_base,
            stats: BuildStats::default(),
        })
    }

    /// Rebuilds every acceleration structure under `root` in place.
    ///
    /// Afterwards the root holds the top level structure to trace against,
    /// unless nothing under it has geometry.
    pub fn build(&mut self, root: &mut Node) -> Result<BuildStats> {
        let base = self.params.custom_index_base;
        self.next_custom_index = base;
        self.stats = BuildStats {
            custom_indices: base..base,
            ..Default::default()
        };
        root.accept_mut(self)?;
        self.stats.custom_indices.end = self.next_custom_index;
        debug!(
            bottom_level = self.stats.bottom_level_count,
            top_level = self.stats.top_level_count,
            instances = self.stats.instance_count,
            "built acceleration structures"
        );
        Ok(mem::take(&mut self.stats))
    }

    fn build_acceleration_structure(
        &self,
        name: &str,
        geometry: AccelerationStructureGeometry,
        primitive_count: u32,
    ) -> Result<AccelerationStructure> {
        let sizes = self
            .device
            .acceleration_structure_build_sizes(&geometry, primitive_count)?;
        debug!(
            name,
            scratch_size = sizes.scratch_size,
            storage_size = sizes.storage_size,
            "acceleration structure sizes"
        );

        let accel = AccelerationStructure::new(
            &self.device,
            geometry.level(),
            sizes.storage_size,
            primitive_count,
            name,
        )?;
        let scratch = Buffer::new(
            &self.device,
            BufferDesc::new(sizes.scratch_size)
                .usage(BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH | BufferUsage::SHADER_DEVICE_ADDRESS)
                .name(format!("{} scratch", name)),
        )?;
        self.device.build_acceleration_structure(&AccelerationStructureBuild {
            geometry: &geometry,
            primitive_count,
            dst: accel.id(),
            scratch_data: scratch.device_address(),
        })?;
        Ok(accel)
    }

    fn build_bottom_level(
        &mut self,
        name: &str,
        vertex_buffer: &Buffer,
        vertex_count: u32,
        index_buffer: &Buffer,
        index_count: u32,
    ) -> Result<AccelerationStructure> {
        let geometry = AccelerationStructureGeometry::Triangles {
            vertex_data: vertex_buffer.device_address(),
            vertex_stride: Vertex::STRIDE,
            max_vertex: vertex_count.saturating_sub(1),
            index_data: index_buffer.device_address(),
            transform_data: self.identity_transform.device_address(),
        };
        let accel = self.build_acceleration_structure(name, geometry, index_count / 3)?;
        self.stats.bottom_level_count += 1;
        Ok(accel)
    }

    fn build_top_level(
        &mut self,
        name: &str,
        instances: &[AccelerationStructureInstance],
    ) -> Result<AccelerationStructure> {
        let instance_buffer = Buffer::with_data(
            &self.device,
            BufferDesc::new(0)
                .usage(BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT | BufferUsage::SHADER_DEVICE_ADDRESS)
                .name(format!("{} instances", name)),
            instances,
        )?;
        let geometry = AccelerationStructureGeometry::Instances {
            data: instance_buffer.device_address(),
        };
        let accel = self.build_acceleration_structure(name, geometry, instances.len() as u32)?;
        self.stats.top_level_count += 1;
        self.stats.instance_count += instances.len() as u32;
        Ok(accel)
    }

    fn allocate_custom_index(&mut self) -> Result<u32> {
        let custom_index = self.next_custom_index;
        if custom_index > AccelerationStructureInstance::MAX_CUSTOM_INDEX {
            return Err(Error::CustomIndexOverflow(custom_index));
        }
        self.next_custom_index += 1;
        Ok(custom_index)
    }
}

impl VisitorMut for AccelerationStructureBuilder {
    fn visit_interior_mut(&mut self, node: InteriorMut) -> Result<()> {
        walk_children_mut(self, node.children)?;

        let mut instances = Vec::with_capacity(node.children.len());
        for child in node.children.iter() {
            let accel = match child.accel.as_ref() {
                Some(accel) => accel,
                None => {
                    trace!(parent = node.name, child = child.name.as_str(), "skipping child without geometry");
                    continue;
                }
            };
            let transform = *node.transform * child.transform;
            instances.push(AccelerationStructureInstance::new(
                TransposedTransform3::from_mat4(&transform),
                self.allocate_custom_index()?,
                AccelerationStructureInstance::MASK_ALL,
                0,
                AccelerationStructureInstance::TRIANGLE_FACING_CULL_DISABLE,
                accel.device_address(),
            ));
        }

        *node.accel = if instances.is_empty() {
            None
        } else {
            Some(self.build_top_level(node.name, &instances)?)
        };
        Ok(())
    }

    fn visit_mesh_mut(&mut self, node: LeafMut<MeshData>) -> Result<()> {
        if self.params.reuse_static_bottom_level && node.accel.is_some() {
            return Ok(());
        }
        let mesh = node.data;
        *node.accel = Some(self.build_bottom_level(
            node.name,
            &mesh.vertex_buffer,
            mesh.vertex_count,
            &mesh.index_buffer,
            mesh.index_count,
        )?);
        Ok(())
    }

    fn visit_skinned_mesh_mut(&mut self, node: LeafMut<SkinnedMeshData>) -> Result<()> {
        let mesh = node.data;
        *node.accel = Some(self.build_bottom_level(
            node.name,
            &mesh.processed_vertex_buffer,
            mesh.vertex_count,
            &mesh.index_buffer,
            mesh.index_count,
        )?);
        Ok(())
    }
}
