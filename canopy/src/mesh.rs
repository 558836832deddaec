use crate::{device::*, error::*, maths::*, resource::*};
use bytemuck::{Pod, Zeroable};
use std::{mem, sync::Arc};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const STRIDE: u32 = mem::size_of::<Vertex>() as u32;

    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// Up to 4 bone influences for one vertex, weights are used as given.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Zeroable, Pod)]
pub struct SkinningData {
    pub bone_indices: [u32; 4],
    pub bone_weights: [f32; 4],
}

impl SkinningData {
    pub const MAX_INFLUENCES: usize = 4;

    pub fn new(influences: &[(u32, f32)]) -> Result<Self> {
        if influences.len() > Self::MAX_INFLUENCES {
            return Err(Error::TooManyInfluences {
                count: influences.len(),
            });
        }
        let mut data = Self::default();
        for (i, &(bone, weight)) in influences.iter().enumerate() {
            data.bone_indices[i] = bone;
            data.bone_weights[i] = weight;
        }
        Ok(data)
    }

    pub fn single(bone: u32) -> Self {
        Self {
            bone_indices: [bone, 0, 0, 0],
            bone_weights: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

fn validate(name: &str, vertex_count: usize, indices: &[u32]) -> Result<()> {
    let invalid = |reason: String| Error::InvalidMesh {
        name: name.to_owned(),
        reason,
    };
    if vertex_count == 0 || indices.is_empty() {
        return Err(invalid("mesh has no triangles".to_owned()));
    }
    if indices.len() % 3 != 0 {
        return Err(invalid(format!("index count {} is not a multiple of 3", indices.len())));
    }
    if let Some(index) = indices.iter().find(|&&index| index as usize >= vertex_count) {
        return Err(invalid(format!(
            "index {} out of range for {} vertices",
            index, vertex_count
        )));
    }
    Ok(())
}

fn index_buffer(device: &SharedDevice, name: &str, indices: &[u32]) -> Result<Arc<Buffer>> {
    Buffer::with_data(
        device,
        BufferDesc::new(0)
            .usage(
                BufferUsage::INDEX_BUFFER
                    | BufferUsage::STORAGE
                    | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
                    | BufferUsage::SHADER_DEVICE_ADDRESS,
            )
            .name(format!("{} indices", name)),
        indices,
    )
    .map(Arc::new)
}

fn vertex_buffer(device: &SharedDevice, name: String, vertices: &[Vertex]) -> Result<Arc<Buffer>> {
    Buffer::with_data(
        device,
        BufferDesc::new(0)
            .usage(
                BufferUsage::VERTEX_BUFFER
                    | BufferUsage::STORAGE
                    | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
                    | BufferUsage::SHADER_DEVICE_ADDRESS,
            )
            .name(name),
        vertices,
    )
    .map(Arc::new)
}

#[derive(Debug)]
pub struct MeshData {
    pub vertex_buffer: Arc<Buffer>,
    pub index_buffer: Arc<Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl MeshData {
    pub fn new(device: &SharedDevice, name: &str, vertices: &[Vertex], indices: &[u32]) -> Result<Self> {
        validate(name, vertices.len(), indices)?;
        Ok(Self {
            vertex_buffer: vertex_buffer(device, format!("{} vertices", name), vertices)?,
            index_buffer: index_buffer(device, name, indices)?,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

#[derive(Debug)]
pub struct SkinnedMeshData {
    pub source_vertex_buffer: Arc<Buffer>,
    pub skinning_buffer: Arc<Buffer>,
    pub processed_vertex_buffer: Arc<Buffer>,
    pub index_buffer: Arc<Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl SkinnedMeshData {
    pub fn new(
        device: &SharedDevice,
        name: &str,
        vertices: &[Vertex],
        skinning: &[SkinningData],
        indices: &[u32],
    ) -> Result<Self> {
        validate(name, vertices.len(), indices)?;
        if skinning.len() != vertices.len() {
            return Err(Error::InvalidMesh {
                name: name.to_owned(),
                reason: format!(
                    "{} skinning entries for {} vertices",
                    skinning.len(),
                    vertices.len()
                ),
            });
        }
        let skinning_buffer = Buffer::with_data(
            device,
            BufferDesc::new(0)
                .usage(BufferUsage::STORAGE)
                .name(format!("{} skinning", name)),
            skinning,
        )?;
        Ok(Self {
            source_vertex_buffer: vertex_buffer(device, format!("{} source vertices", name), vertices)?,
            skinning_buffer: Arc::new(skinning_buffer),
            processed_vertex_buffer: vertex_buffer(device, format!("{} processed vertices", name), vertices)?,
            index_buffer: index_buffer(device, name, indices)?,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}
