use crate::{error::*, maths::*, mesh::*, resource::*};

#[derive(Debug)]
pub enum NodeKind {
    Interior { children: Vec<Node> },
    Mesh(MeshData),
    SkinnedMesh(SkinnedMeshData),
}

/// A node of the scene graph.
///
/// Interior nodes own their children and hold a top level acceleration
/// structure once built, mesh leaves hold a bottom level one.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub transform: Mat4,
    pub accel: Option<AccelerationStructure>,
    pub kind: NodeKind,
}

impl Node {
    fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::identity(),
            accel: None,
            kind,
        }
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Interior { children: Vec::new() })
    }

    pub fn mesh(name: impl Into<String>, mesh: MeshData) -> Self {
        Self::with_kind(name, NodeKind::Mesh(mesh))
    }

    pub fn skinned_mesh(name: impl Into<String>, mesh: SkinnedMeshData) -> Self {
        Self::with_kind(name, NodeKind::SkinnedMesh(mesh))
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_child(mut self, child: Node) -> Result<Self> {
        self.push_child(child)?;
        Ok(self)
    }

    /// Appends a child, children are visited in insertion order.
    pub fn push_child(&mut self, child: Node) -> Result<&mut Node> {
        match &mut self.kind {
            NodeKind::Interior { children } => {
                let index = children.len();
                children.push(child);
                Ok(&mut children[index])
            }
            NodeKind::Mesh(_) | NodeKind::SkinnedMesh(_) => Err(Error::LeafWithChildren {
                name: self.name.clone(),
            }),
        }
    }

    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Interior { children } => children,
            NodeKind::Mesh(_) | NodeKind::SkinnedMesh(_) => &[],
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, NodeKind::Interior { .. })
    }

    /// Number of mesh and skinned mesh leaves in this subtree.
    pub fn leaf_count(&self) -> usize {
        self.iter_depth_first().filter(|node| node.is_leaf()).count()
    }

    /// Pre-order iteration over this subtree, children in insertion order.
    pub fn iter_depth_first(&self) -> DepthFirstIter<'_> {
        DepthFirstIter { stack: vec![self] }
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.iter_depth_first().find(|node| node.name == name)
    }
}

pub struct DepthFirstIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for DepthFirstIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}
