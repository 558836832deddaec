use crate::{device::*, error::*, mesh::*, resource::*, scene::*, visitor::*};
use bytemuck::{Pod, Zeroable};
use tracing::debug;

/// Addresses of the two reference tables, bound as a single buffer by shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
pub struct GeometryReferenceTable {
    pub vertex_references: DeviceAddress,
    pub index_references: DeviceAddress,
}

/// Gathers the vertex and index buffer addresses of every mesh leaf in visit order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GeometryReferenceCollector {
    pub vertex_addresses: Vec<DeviceAddress>,
    pub index_addresses: Vec<DeviceAddress>,
}

impl GeometryReferenceCollector {
    pub fn collect(root: &Node) -> Self {
        let mut collector = Self::default();
        root.accept(&mut collector);
        collector
    }

    pub fn len(&self) -> usize {
        self.vertex_addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_addresses.is_empty()
    }

    pub fn upload(self, device: &SharedDevice) -> Result<GeometryReferences> {
        if self.is_empty() {
            return Err(Error::EmptyGeometryReferences);
        }
        let usage = BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS;
        let vertex_references = Buffer::with_data(
            device,
            BufferDesc::new(0).usage(usage).name("vertex references"),
            &self.vertex_addresses,
        )?;
        let index_references = Buffer::with_data(
            device,
            BufferDesc::new(0).usage(usage).name("index references"),
            &self.index_addresses,
        )?;
        let table = Buffer::with_data(
            device,
            BufferDesc::new(0).usage(usage).name("geometry references"),
            &[GeometryReferenceTable {
                vertex_references: vertex_references.device_address(),
                index_references: index_references.device_address(),
            }],
        )?;
        debug!(count = self.len(), "uploaded geometry references");
        Ok(GeometryReferences {
            vertex_references,
            index_references,
            table,
            addresses: self,
        })
    }
}

impl Visitor for GeometryReferenceCollector {
    fn visit_mesh(&mut self, _node: &Node, mesh: &MeshData) {
        self.vertex_addresses.push(mesh.vertex_buffer.device_address());
        self.index_addresses.push(mesh.index_buffer.device_address());
    }

    fn visit_skinned_mesh(&mut self, _node: &Node, mesh: &SkinnedMeshData) {
        self.vertex_addresses
            .push(mesh.processed_vertex_buffer.device_address());
        self.index_addresses.push(mesh.index_buffer.device_address());
    }
}

/// Uploaded reference tables, entry `i` of each table refers to the same leaf.
#[derive(Debug)]
pub struct GeometryReferences {
    pub vertex_references: Buffer,
    pub index_references: Buffer,
    pub table: Buffer,
    addresses: GeometryReferenceCollector,
}

impl GeometryReferences {
    pub fn count(&self) -> usize {
        self.addresses.len()
    }

    pub fn addresses(&self) -> &GeometryReferenceCollector {
        &self.addresses
    }
}

pub fn collect_geometry_references(device: &SharedDevice, root: &Node) -> Result<GeometryReferences> {
    GeometryReferenceCollector::collect(root).upload(device)
}
