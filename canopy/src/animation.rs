use crate::{device::*, error::*, maths::*, mesh::*, resource::*, scene::*, visitor::*};
use std::{
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

#[derive(Debug, Clone)]
struct SkinnedMeshBinding {
    name: String,
    index_buffer: Arc<Buffer>,
    source_vertex_buffer: Arc<Buffer>,
    processed_vertex_buffer: Arc<Buffer>,
    skinning_buffer: Arc<Buffer>,
    index_count: u32,
}

/// Finds the skinned mesh leaves of a scene, plain meshes are ignored.
#[derive(Debug, Default)]
pub struct SkinnedMeshCollector {
    meshes: Vec<SkinnedMeshBinding>,
}

impl SkinnedMeshCollector {
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

impl Visitor for SkinnedMeshCollector {
    fn visit_skinned_mesh(&mut self, node: &Node, mesh: &SkinnedMeshData) {
        self.meshes.push(SkinnedMeshBinding {
            name: node.name.clone(),
            index_buffer: Arc::clone(&mesh.index_buffer),
            source_vertex_buffer: Arc::clone(&mesh.source_vertex_buffer),
            processed_vertex_buffer: Arc::clone(&mesh.processed_vertex_buffer),
            skinning_buffer: Arc::clone(&mesh.skinning_buffer),
            index_count: mesh.index_count,
        });
    }
}

pub struct AnimationPassBuilder {
    device: SharedDevice,
    shader: Option<PathBuf>,
    collector: SkinnedMeshCollector,
}

impl AnimationPassBuilder {
    pub fn shader(mut self, path: impl AsRef<Path>) -> Self {
        self.shader = Some(path.as_ref().to_owned());
        self
    }

    /// Binds every skinned mesh found under `root`.
    pub fn scene(mut self, root: &Node) -> Self {
        root.accept(&mut self.collector);
        self
    }

    pub fn build(self) -> Result<AnimationPass> {
        let shader = self.shader.ok_or(Error::MissingShader)?;
        let pipeline = self.device.create_compute_pipeline(&ComputePipelineDesc {
            shader,
            storage_buffer_count: AnimationPass::BINDING_COUNT,
            name: "skinning".to_owned(),
        })?;
        debug!(meshes = self.collector.len(), "created animation pass");
        Ok(AnimationPass {
            device: self.device,
            pipeline,
            meshes: self.collector.meshes,
            bone_buffer: None,
        })
    }
}

/// Deforms skinned meshes on the GPU, writing their processed vertex buffers.
pub struct AnimationPass {
    device: SharedDevice,
    pipeline: ComputePipelineId,
    meshes: Vec<SkinnedMeshBinding>,
    bone_buffer: Option<Buffer>,
}

impl AnimationPass {
    pub const BINDING_BONES: u32 = 0;
    pub const BINDING_INDICES: u32 = 1;
    pub const BINDING_SOURCE_VERTICES: u32 = 2;
    pub const BINDING_PROCESSED_VERTICES: u32 = 3;
    pub const BINDING_SKINNING: u32 = 4;
    pub const BINDING_COUNT: u32 = 5;

    pub fn builder(device: &SharedDevice) -> AnimationPassBuilder {
        AnimationPassBuilder {
            device: SharedDevice::clone(device),
            shader: None,
            collector: SkinnedMeshCollector::default(),
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn pipeline(&self) -> ComputePipelineId {
        self.pipeline
    }

    pub fn bone_buffer(&self) -> Option<&Buffer> {
        self.bone_buffer.as_ref()
    }

    /// Number of matrices the current bone buffer can hold.
    pub fn bone_capacity(&self) -> usize {
        self.bone_buffer
            .as_ref()
            .map_or(0, |buffer| buffer.size() / mem::size_of::<Mat4>())
    }

    fn reserve_bones(&mut self, bone_count: usize) -> Result<&Buffer> {
        if self.bone_capacity() < bone_count {
            let buffer = Buffer::new(
                &self.device,
                BufferDesc::new(bone_count * mem::size_of::<Mat4>())
                    .usage(BufferUsage::STORAGE)
                    .host_visible()
                    .name("bone matrices"),
            )?;
            self.device
                .bind_storage_buffer(self.pipeline, Self::BINDING_BONES, buffer.id())?;
            debug!(bone_count, "resized bone matrix buffer");
            self.bone_buffer = Some(buffer);
        }
        self.bone_buffer.as_ref().ok_or(Error::EmptyBoneMatrices)
    }

    /// Skins every bound mesh with `bone_matrices`, indexed by bone id.
    ///
    /// On return each processed vertex buffer holds the deformed vertices.
    pub fn process(&mut self, bone_matrices: &[Mat4]) -> Result<()> {
        if bone_matrices.is_empty() {
            return Err(Error::EmptyBoneMatrices);
        }
        self.reserve_bones(bone_matrices.len())?.write(0, bone_matrices)?;

        for mesh in self.meshes.iter() {
            let bindings = [
                (Self::BINDING_INDICES, &mesh.index_buffer),
                (Self::BINDING_SOURCE_VERTICES, &mesh.source_vertex_buffer),
                (Self::BINDING_PROCESSED_VERTICES, &mesh.processed_vertex_buffer),
                (Self::BINDING_SKINNING, &mesh.skinning_buffer),
            ];
            for (binding, buffer) in bindings.iter() {
                self.device.bind_storage_buffer(self.pipeline, *binding, buffer.id())?;
            }
            // one group per index, vertices shared by several triangles are written more than once
            self.device.dispatch(self.pipeline, mesh.index_count)?;
            debug!(mesh = mesh.name.as_str(), "skinned");
        }
        Ok(())
    }
}

impl Drop for AnimationPass {
    fn drop(&mut self) {
        self.device.destroy_compute_pipeline(self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockDevice};
    use approx::assert_relative_eq;

    fn scene(device: &SharedDevice) -> Node {
        let mut root = Node::new("root");
        root.push_child(Node::skinned_mesh("skinned", mock::skinned_quad(device, "skinned")))
            .unwrap();
        root.push_child(Node::mesh("static", mock::triangle(device, "static"))).unwrap();
        root
    }

    fn processed(root: &Node) -> &Buffer {
        match &root.children()[0].kind {
            NodeKind::SkinnedMesh(mesh) => &*mesh.processed_vertex_buffer,
            _ => unreachable!(),
        }
    }

    #[test]
    fn builder_needs_a_shader() {
        let (_mock, device) = MockDevice::shared();
        assert!(matches!(
            AnimationPass::builder(&device).build(),
            Err(Error::MissingShader)
        ));
    }

    #[test]
    fn only_skinned_meshes_are_bound() {
        let (mock, device) = MockDevice::shared();
        let root = scene(&device);
        let mut pass = AnimationPass::builder(&device)
            .shader("skin.comp.spv")
            .scene(&root)
            .build()
            .unwrap();
        assert_eq!(pass.mesh_count(), 1);

        pass.process(&[Mat4::identity(); 2]).unwrap();
        assert_eq!(mock.dispatches(), vec![(pass.pipeline(), 6)]);
        match &root.children()[0].kind {
            NodeKind::SkinnedMesh(mesh) => {
                let binding = |b| mock.binding(pass.pipeline(), b);
                assert_eq!(binding(AnimationPass::BINDING_INDICES), Some(mesh.index_buffer.id()));
                assert_eq!(
                    binding(AnimationPass::BINDING_SOURCE_VERTICES),
                    Some(mesh.source_vertex_buffer.id())
                );
                assert_eq!(
                    binding(AnimationPass::BINDING_PROCESSED_VERTICES),
                    Some(mesh.processed_vertex_buffer.id())
                );
                assert_eq!(binding(AnimationPass::BINDING_SKINNING), Some(mesh.skinning_buffer.id()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_bone_matrices_are_rejected() {
        let (_mock, device) = MockDevice::shared();
        let root = scene(&device);
        let mut pass = AnimationPass::builder(&device)
            .shader("skin.comp.spv")
            .scene(&root)
            .build()
            .unwrap();
        assert!(matches!(pass.process(&[]), Err(Error::EmptyBoneMatrices)));
    }

    #[test]
    fn static_pose_is_idempotent() {
        let (mock, device) = MockDevice::shared();
        mock.set_kernel(mock::cpu_skinning());
        let root = scene(&device);
        let mut pass = AnimationPass::builder(&device)
            .shader("skin.comp.spv")
            .scene(&root)
            .build()
            .unwrap();

        let bones = [Mat4::identity(), Mat4::from_translation(Vec3::unit_z())];
        pass.process(&bones).unwrap();
        let first = mock.contents(processed(&root).id());
        pass.process(&bones).unwrap();
        assert_eq!(mock.contents(processed(&root).id()), first);

        let vertices: Vec<Vertex> = processed(&root).read().unwrap();
        assert_relative_eq!(vertices[0].position.z, 0.0);
        assert_relative_eq!(vertices[2].position.z, 0.5);
        assert_relative_eq!(vertices[3].position.z, 1.0);
        assert_relative_eq!(vertices[3].normal.z, 1.0);
    }

    #[test]
    fn bone_buffer_grows_on_demand() {
        let (mock, device) = MockDevice::shared();
        let root = scene(&device);
        let mut pass = AnimationPass::builder(&device)
            .shader("skin.comp.spv")
            .scene(&root)
            .build()
            .unwrap();

        pass.process(&[Mat4::identity(); 10]).unwrap();
        assert_eq!(pass.bone_capacity(), 10);

        pass.process(&[Mat4::identity(); 50]).unwrap();
        assert_eq!(pass.bone_capacity(), 50);
        let bones = pass.bone_buffer().unwrap().id();
        assert_eq!(mock.binding(pass.pipeline(), AnimationPass::BINDING_BONES), Some(bones));
        assert!(mock.buffer_size(bones) >= 50 * mem::size_of::<Mat4>());

        let created = mock.created_buffer_count();
        pass.process(&[Mat4::identity(); 10]).unwrap();
        assert_eq!(mock.created_buffer_count(), created);
        assert_eq!(pass.bone_capacity(), 50);
        assert_eq!(mock.binding(pass.pipeline(), AnimationPass::BINDING_BONES), Some(bones));
        match &root.children()[0].kind {
            NodeKind::SkinnedMesh(mesh) => assert_eq!(
                mock.binding(pass.pipeline(), AnimationPass::BINDING_SKINNING),
                Some(mesh.skinning_buffer.id())
            ),
            _ => unreachable!(),
        }
    }
}
