use crate::{error::*, maths::*, mesh::*, resource::*, scene::*};

/// Read-only traversal over a scene graph.
///
/// Each method defaults to recursing into children, so an implementation
/// only overrides the variants it cares about.
pub trait Visitor {
    fn visit_interior(&mut self, _node: &Node, children: &[Node]) {
        walk_children(self, children);
    }

    fn visit_mesh(&mut self, _node: &Node, _mesh: &MeshData) {}

    fn visit_skinned_mesh(&mut self, _node: &Node, _mesh: &SkinnedMeshData) {}
}

pub fn walk_children<V: Visitor + ?Sized>(visitor: &mut V, children: &[Node]) {
    for child in children {
        child.accept(visitor);
    }
}

/// Mutable view of an interior node, split so that children and the
/// node's own acceleration structure can be borrowed together.
pub struct InteriorMut<'a> {
    pub name: &'a str,
    pub transform: &'a Mat4,
    pub accel: &'a mut Option<AccelerationStructure>,
    pub children: &'a mut [Node],
}

pub struct LeafMut<'a, T> {
    pub name: &'a str,
    pub transform: &'a Mat4,
    pub accel: &'a mut Option<AccelerationStructure>,
    pub data: &'a T,
}

/// Traversal that may modify the graph, usually to (re)build acceleration structures.
pub trait VisitorMut {
    fn visit_interior_mut(&mut self, node: InteriorMut) -> Result<()> {
        walk_children_mut(self, node.children)
    }

    fn visit_mesh_mut(&mut self, _node: LeafMut<MeshData>) -> Result<()> {
        Ok(())
    }

    fn visit_skinned_mesh_mut(&mut self, _node: LeafMut<SkinnedMeshData>) -> Result<()> {
        Ok(())
    }
}

pub fn walk_children_mut<V: VisitorMut + ?Sized>(visitor: &mut V, children: &mut [Node]) -> Result<()> {
    for child in children.iter_mut() {
        child.accept_mut(visitor)?;
    }
    Ok(())
}

impl Node {
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        match &self.kind {
            NodeKind::Interior { children } => visitor.visit_interior(self, children),
            NodeKind::Mesh(mesh) => visitor.visit_mesh(self, mesh),
            NodeKind::SkinnedMesh(mesh) => visitor.visit_skinned_mesh(self, mesh),
        }
    }

    pub fn accept_mut<V: VisitorMut + ?Sized>(&mut self, visitor: &mut V) -> Result<()> {
        let Node {
            name,
            transform,
            accel,
            kind,
        } = self;
        match kind {
            NodeKind::Interior { children } => visitor.visit_interior_mut(InteriorMut {
                name: name.as_str(),
                transform: &*transform,
                accel,
                children: children.as_mut_slice(),
            }),
            NodeKind::Mesh(data) => visitor.visit_mesh_mut(LeafMut {
                name: name.as_str(),
                transform: &*transform,
                accel,
                data: &*data,
            }),
            NodeKind::SkinnedMesh(data) => visitor.visit_skinned_mesh_mut(LeafMut {
                name: name.as_str(),
                transform: &*transform,
                accel,
                data: &*data,
            }),
        }
    }
}
