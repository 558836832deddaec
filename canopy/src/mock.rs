use crate::{accel::AccelerationStructureInstance, device::*, error::*, maths::*, mesh::*, resource::*};
use slotmap::SlotMap;
use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard},
};

/// Emulates a compute kernel: receives the bound buffers in binding order and the group count.
pub type MockKernel = Box<dyn FnMut(&mut [Vec<u8>], u32) + Send>;

#[derive(Debug, Clone)]
pub struct MockBuild {
    pub tick: u64,
    pub geometry: AccelerationStructureGeometry,
    pub primitive_count: u32,
    /// Vertex bytes as seen by a triangle build.
    pub vertices: Vec<u8>,
    pub instances: Vec<AccelerationStructureInstance>,
}

struct MockBuffer {
    desc: BufferDesc,
    address: DeviceAddress,
    data: Vec<u8>,
}

struct MockAccel {
    level: AccelerationStructureLevel,
    buffer: BufferId,
    size: usize,
    built: Option<MockBuild>,
}

struct MockPipeline {
    name: String,
    bindings: Vec<Option<BufferId>>,
}

struct MockState {
    buffers: SlotMap<BufferId, MockBuffer>,
    accels: SlotMap<AccelerationStructureId, MockAccel>,
    pipelines: SlotMap<ComputePipelineId, MockPipeline>,
    next_address: DeviceAddress,
    tick: u64,
    created_buffer_count: usize,
    dispatches: Vec<(ComputePipelineId, u32)>,
    dispatch_ticks: Vec<u64>,
    kernel: Option<MockKernel>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            buffers: SlotMap::with_key(),
            accels: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            next_address: 0x1_0000_0000,
            tick: 0,
            created_buffer_count: 0,
            dispatches: Vec::new(),
            dispatch_ticks: Vec::new(),
            kernel: None,
        }
    }
}

impl MockState {
    fn resolve(&self, address: DeviceAddress) -> Option<(BufferId, usize)> {
        self.buffers.iter().find_map(|(id, buffer)| {
            let offset = address.checked_sub(buffer.address)? as usize;
            (offset < buffer.desc.size).then(|| (id, offset))
        })
    }

    fn bytes_at(&self, address: DeviceAddress, len: usize) -> &[u8] {
        let (id, offset) = self
            .resolve(address)
            .unwrap_or_else(|| panic!("address {:#x} is not inside any buffer", address));
        let data = &self.buffers[id].data;
        assert!(offset + len <= data.len(), "read past the end of buffer at {:#x}", address);
        &data[offset..offset + len]
    }

    fn validate_triangles(&self, geometry: &AccelerationStructureGeometry, primitive_count: u32) -> Vec<u8> {
        if let AccelerationStructureGeometry::Triangles {
            vertex_data,
            vertex_stride,
            max_vertex,
            index_data,
            transform_data,
        } = *geometry
        {
            let index_count = 3 * primitive_count as usize;
            let indices: Vec<u32> = self
                .bytes_at(index_data, index_count * mem::size_of::<u32>())
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            assert!(indices.iter().all(|&i| i <= max_vertex), "index beyond max_vertex");
            self.bytes_at(transform_data, 48);
            self.bytes_at(vertex_data, (max_vertex as usize + 1) * vertex_stride as usize)
                .to_vec()
        } else {
            Vec::new()
        }
    }

    fn decode_instances(&self, data: DeviceAddress, count: u32) -> Vec<AccelerationStructureInstance> {
        let size = mem::size_of::<AccelerationStructureInstance>();
        let instances: Vec<AccelerationStructureInstance> = self
            .bytes_at(data, count as usize * size)
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        for instance in instances.iter() {
            let target = self
                .accels
                .values()
                .find(|accel| self.buffers[accel.buffer].address == instance.acceleration_structure_reference)
                .expect("instance references an unknown acceleration structure");
            let built = target.built.as_ref().expect("instance references an unbuilt structure");
            assert!(built.tick < self.tick, "instance target was not built first");
        }
        instances
    }
}

#[derive(Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn shared() -> (Arc<MockDevice>, SharedDevice) {
        let mock = Arc::new(MockDevice::default());
        let device: SharedDevice = mock.clone();
        (mock, device)
    }

    pub fn storage_size(primitive_count: u32) -> usize {
        256 + 64 * primitive_count as usize
    }

    pub fn scratch_size(primitive_count: u32) -> usize {
        128 + 32 * primitive_count as usize
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_kernel(&self, kernel: MockKernel) {
        self.lock().kernel = Some(kernel);
    }

    pub fn live_buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn created_buffer_count(&self) -> usize {
        self.lock().created_buffer_count
    }

    pub fn live_acceleration_structure_count(&self) -> usize {
        self.lock().accels.len()
    }

    pub fn build_record(&self, id: AccelerationStructureId) -> Option<MockBuild> {
        self.lock().accels.get(id).and_then(|accel| accel.built.clone())
    }

    pub fn dispatches(&self) -> Vec<(ComputePipelineId, u32)> {
        self.lock().dispatches.clone()
    }

    /// Ticks are shared with acceleration structure builds, so the two can be ordered.
    pub fn dispatch_ticks(&self) -> Vec<u64> {
        self.lock().dispatch_ticks.clone()
    }

    pub fn binding(&self, pipeline: ComputePipelineId, binding: u32) -> Option<BufferId> {
        self.lock().pipelines[pipeline].bindings[binding as usize]
    }

    pub fn buffer_size(&self, id: BufferId) -> usize {
        self.lock().buffers[id].desc.size
    }

    /// Contents of any buffer, ignoring host visibility.
    pub fn contents(&self, id: BufferId) -> Vec<u8> {
        self.lock().buffers[id].data.clone()
    }
}

impl Device for MockDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<(BufferId, DeviceAddress)> {
        let mut state = self.lock();
        let address = state.next_address;
        state.next_address += ((desc.size as u64 + 255) & !255) + 256;
        state.created_buffer_count += 1;
        let id = state.buffers.insert(MockBuffer {
            desc: desc.clone(),
            address,
            data: vec![0; desc.size],
        });
        Ok((id, address))
    }

    fn destroy_buffer(&self, id: BufferId) {
        let mut state = self.lock();
        assert!(
            state.accels.values().all(|accel| accel.buffer != id),
            "buffer destroyed while an acceleration structure still uses it"
        );
        state.buffers.remove(id).expect("double destroy of buffer");
    }

    fn write_buffer(&self, id: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let buffer = &mut state.buffers[id];
        if !buffer.desc.host_visible {
            return Err(Error::NotHostVisible {
                name: buffer.desc.name.clone(),
            });
        }
        check_range(&buffer.desc.name, offset, data.len(), buffer.desc.size)?;
        buffer.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: usize, data: &mut [u8]) -> Result<()> {
        let state = self.lock();
        let buffer = &state.buffers[id];
        if !buffer.desc.host_visible {
            return Err(Error::NotHostVisible {
                name: buffer.desc.name.clone(),
            });
        }
        check_range(&buffer.desc.name, offset, data.len(), buffer.desc.size)?;
        data.copy_from_slice(&buffer.data[offset..offset + data.len()]);
        Ok(())
    }

    fn acceleration_structure_build_sizes(
        &self,
        _geometry: &AccelerationStructureGeometry,
        primitive_count: u32,
    ) -> Result<AccelerationStructureBuildSizes> {
        Ok(AccelerationStructureBuildSizes {
            storage_size: Self::storage_size(primitive_count),
            scratch_size: Self::scratch_size(primitive_count),
        })
    }

    fn create_acceleration_structure(
        &self,
        level: AccelerationStructureLevel,
        buffer: BufferId,
        size: usize,
    ) -> Result<AccelerationStructureId> {
        let mut state = self.lock();
        let storage = &state.buffers[buffer];
        assert!(storage.desc.size >= size);
        assert!(storage.desc.usage.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE));
        Ok(state.accels.insert(MockAccel {
            level,
            buffer,
            size,
            built: None,
        }))
    }

    fn destroy_acceleration_structure(&self, id: AccelerationStructureId) {
        self.lock()
            .accels
            .remove(id)
            .expect("double destroy of acceleration structure");
    }

    fn acceleration_structure_device_address(&self, id: AccelerationStructureId) -> Result<DeviceAddress> {
        let state = self.lock();
        let buffer = state.accels[id].buffer;
        Ok(state.buffers[buffer].address)
    }

    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild) -> Result<()> {
        let mut state = self.lock();
        state.tick += 1;

        let dst = &state.accels[build.dst];
        assert_eq!(dst.level, build.geometry.level());
        assert!(dst.size >= Self::storage_size(build.primitive_count));

        let (scratch, offset) = state.resolve(build.scratch_data).expect("scratch address is not a buffer");
        let scratch = &state.buffers[scratch];
        assert!(scratch
            .desc
            .usage
            .contains(BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH));
        assert!(scratch.desc.size - offset >= Self::scratch_size(build.primitive_count));

        let (vertices, instances) = match *build.geometry {
            AccelerationStructureGeometry::Triangles { .. } => {
                (state.validate_triangles(build.geometry, build.primitive_count), Vec::new())
            }
            AccelerationStructureGeometry::Instances { data } => {
                (Vec::new(), state.decode_instances(data, build.primitive_count))
            }
        };

        let tick = state.tick;
        state.accels[build.dst].built = Some(MockBuild {
            tick,
            geometry: *build.geometry,
            primitive_count: build.primitive_count,
            vertices,
            instances,
        });
        Ok(())
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<ComputePipelineId> {
        Ok(self.lock().pipelines.insert(MockPipeline {
            name: desc.name.clone(),
            bindings: vec![None; desc.storage_buffer_count as usize],
        }))
    }

    fn destroy_compute_pipeline(&self, id: ComputePipelineId) {
        self.lock().pipelines.remove(id);
    }

    fn bind_storage_buffer(&self, pipeline: ComputePipelineId, binding: u32, buffer: BufferId) -> Result<()> {
        let mut state = self.lock();
        assert!(state.buffers.contains_key(buffer));
        let pipeline = &mut state.pipelines[pipeline];
        match pipeline.bindings.get_mut(binding as usize) {
            Some(slot) => {
                *slot = Some(buffer);
                Ok(())
            }
            None => Err(Error::InvalidBinding {
                pipeline: pipeline.name.clone(),
                binding,
            }),
        }
    }

    fn dispatch(&self, pipeline: ComputePipelineId, group_count: u32) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.tick += 1;
        state.dispatches.push((pipeline, group_count));
        state.dispatch_ticks.push(state.tick);

        let bound: Vec<BufferId> = state.pipelines[pipeline]
            .bindings
            .iter()
            .map(|binding| binding.expect("dispatch with an unbound storage buffer"))
            .collect();
        if let Some(kernel) = state.kernel.as_mut() {
            let buffers = &state.buffers;
            let mut data: Vec<Vec<u8>> = bound.iter().map(|&id| buffers[id].data.clone()).collect();
            kernel(&mut data, group_count);
            for (id, data) in bound.iter().zip(data.into_iter()) {
                state.buffers[*id].data = data;
            }
        }
        Ok(())
    }
}

fn skin_vertex(vertex: &Vertex, skinning: &SkinningData, bones: &[Mat4]) -> Vertex {
    let mut position = Vec3::zero();
    let mut normal = Vec3::zero();
    for (&bone, &weight) in skinning.bone_indices.iter().zip(skinning.bone_weights.iter()) {
        let m = bones[bone as usize];
        position += m.transform_point3(vertex.position) * weight;
        normal += m.transform_vec3(vertex.normal) * weight;
    }
    Vertex::new(position, normal.normalized(), vertex.tex_coord)
}

/// Runs the skinning kernel on the CPU against the bound buffers.
pub fn cpu_skinning() -> MockKernel {
    Box::new(|buffers: &mut [Vec<u8>], group_count: u32| {
        let bones: Vec<Mat4> = buffers[0].chunks_exact(64).map(bytemuck::pod_read_unaligned).collect();
        let indices: Vec<u32> = buffers[1].chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
        let source: Vec<Vertex> = buffers[2].chunks_exact(32).map(bytemuck::pod_read_unaligned).collect();
        let mut processed: Vec<Vertex> = buffers[3].chunks_exact(32).map(bytemuck::pod_read_unaligned).collect();
        let skinning: Vec<SkinningData> = buffers[4].chunks_exact(32).map(bytemuck::pod_read_unaligned).collect();
        for &index in indices.iter().take(group_count as usize) {
            let v = index as usize;
            processed[v] = skin_vertex(&source[v], &skinning[v], &bones);
        }
        buffers[3] = bytemuck::cast_slice(&processed).to_vec();
    })
}

pub fn triangle(device: &SharedDevice, name: &str) -> MeshData {
    let vertices: Vec<Vertex> = [Vec3::zero(), Vec3::unit_x(), Vec3::unit_y()]
        .iter()
        .map(|&p| Vertex::new(p, Vec3::unit_z(), Vec2::zero()))
        .collect();
    MeshData::new(device, name, &vertices, &[0, 1, 2]).unwrap()
}

pub fn quad_vertices() -> Vec<Vertex> {
    [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
        .iter()
        .map(|&(x, y)| Vertex::new(Vec3::new(x, y, 0.0), Vec3::unit_z(), Vec2::new(x, y)))
        .collect()
}

/// Quad of 2 triangles, the bottom edge bound to bone 0 and the top edge to bone 1.
pub fn skinned_quad(device: &SharedDevice, name: &str) -> SkinnedMeshData {
    let skinning = [
        SkinningData::single(0),
        SkinningData::single(0),
        SkinningData::new(&[(0, 0.5), (1, 0.5)]).unwrap(),
        SkinningData::single(1),
    ];
    SkinnedMeshData::new(device, name, &quad_vertices(), &skinning, &[0, 1, 2, 0, 2, 3]).unwrap()
}
