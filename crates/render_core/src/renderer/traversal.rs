//! Prefab hierarchy traversal shared by every scene pass.

use std::sync::Arc;

use bevy::log::debug;
use bevy::math::Mat4;

use super::context::{PassKind, RenderPassContext};
use super::{forward, gbuffer, shadow};
use crate::camera::Camera;
use crate::gpu::GraphicsContext;
use crate::scene::{Material, Mesh, Node, PrefabRef};

/// Visit every visible, frustum-passing mesh node of a prefab instance.
///
/// A hidden node hides its whole subtree. Each node's world matrix is
/// `root * node.global_matrix()`, and children are visited with the
/// instance `root`, not with the parent's world matrix.
pub fn traverse<F>(root: &Mat4, node: &Node, camera: &Camera, visit: &mut F)
where
    F: FnMut(&Mat4, &Arc<Mesh>, &Arc<Material>, &Camera),
{
    if !node.visible {
        return;
    }

    let world = *root * node.global_matrix();

    if let (Some(mesh), Some(material)) = (&node.mesh, &node.material) {
        let bounds = mesh.bounds.transformed(&world);
        if camera.test_box_in_frustum(bounds.center, bounds.half_extents) {
            visit(&world, mesh, material, camera);
        }
    }

    for child in &node.children {
        traverse(root, child, camera, visit);
    }
}

/// Draw every visible prefab through the mesh routine of `pass.kind`.
/// Returns how many draws were dropped for missing programs.
pub(crate) fn render_scene(
    ctx: &mut dyn GraphicsContext,
    pass: &RenderPassContext,
    prefabs: &[PrefabRef],
) -> u32 {
    let mut skipped = 0;
    for instance in prefabs {
        traverse(
            &instance.model,
            &instance.prefab.root,
            pass.camera,
            &mut |model, mesh, material, _camera| {
                if !draw_mesh(ctx, pass, model, mesh, material) {
                    skipped += 1;
                }
            },
        );
    }
    if skipped > 0 {
        debug!("{:?} pass skipped {} draws", pass.kind, skipped);
    }
    skipped
}

/// Returns `false` when the draw was dropped for a missing resource.
fn draw_mesh(
    ctx: &mut dyn GraphicsContext,
    pass: &RenderPassContext,
    model: &Mat4,
    mesh: &Mesh,
    material: &Material,
) -> bool {
    if mesh.is_empty() {
        return true;
    }
    match pass.kind {
        PassKind::Shadow => shadow::draw_mesh_depth(ctx, pass, model, mesh),
        PassKind::Forward => forward::draw_mesh_forward(ctx, pass, model, mesh, material),
        PassKind::GBuffer => gbuffer::draw_mesh_gbuffer(ctx, pass, model, mesh, material),
    }
}
