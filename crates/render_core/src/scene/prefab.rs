//! Prefab node hierarchies.

use std::sync::Arc;

use bevy::math::Mat4;

use super::{Material, Mesh};

/// One node of a prefab tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub local: Mat4,
    pub visible: bool,
    pub mesh: Option<Arc<Mesh>>,
    pub material: Option<Arc<Material>>,
    pub children: Vec<Node>,
    /// Local-to-prefab-root matrix, resolved by [`Prefab::new`].
    global: Mat4,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: Mat4::IDENTITY,
            visible: true,
            mesh: None,
            material: None,
            children: Vec::new(),
            global: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    pub fn with_mesh(mut self, mesh: Arc<Mesh>, material: Arc<Material>) -> Self {
        self.mesh = Some(mesh);
        self.material = Some(material);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Chain of local transforms from the prefab root down to this node.
    pub fn global_matrix(&self) -> Mat4 {
        self.global
    }

    fn resolve(&mut self, parent: Mat4) {
        self.global = parent * self.local;
        let global = self.global;
        for child in &mut self.children {
            child.resolve(global);
        }
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}

/// An immutable node tree, shared between instances.
#[derive(Clone, Debug, PartialEq)]
pub struct Prefab {
    pub name: String,
    pub root: Node,
}

impl Prefab {
    pub fn new(name: &str, mut root: Node) -> Self {
        root.resolve(Mat4::IDENTITY);
        Self {
            name: name.to_string(),
            root,
        }
    }

    pub fn node_count(&self) -> usize {
        self.root.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;

    #[test]
    fn test_global_matrices_chain_locals() {
        let grandchild = Node::new("c").with_transform(Mat4::from_translation(Vec3::Z));
        let child = Node::new("b")
            .with_transform(Mat4::from_translation(Vec3::Y))
            .with_child(grandchild);
        let root = Node::new("a")
            .with_transform(Mat4::from_translation(Vec3::X))
            .with_child(child);
        let prefab = Prefab::new("p", root);

        assert_eq!(prefab.node_count(), 3);
        let c = &prefab.root.children[0].children[0];
        let origin = c.global_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::ONE).length() < 1e-6);
    }
}
