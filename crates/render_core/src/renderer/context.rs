//! Per-pass state threaded through every scene draw.

use bevy::math::{UVec2, Vec2};

use crate::camera::Camera;
use crate::gpu::TextureId;
use crate::scene::{LightRef, SceneEnvironment};

/// Which mesh routine a scene traversal feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    /// Depth only, `shadow` program, no color writes.
    Shadow,
    /// One draw per visible light, additive from the second light on.
    Forward,
    /// One draw into the G-buffer, lighting independent.
    GBuffer,
}

/// How materials flagged for planar reflection are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanarSource {
    /// Feature off; the material's own color texture is used.
    Disabled,
    /// The mirror view itself is being rendered; planar surfaces are skipped.
    Mirror,
    /// Sample the mirror view rendered earlier this frame.
    Texture(TextureId),
}

/// Everything a mesh draw needs besides the mesh and material.
pub struct RenderPassContext<'a> {
    pub kind: PassKind,
    pub camera: &'a Camera,
    /// Size of the bound target.
    pub target_size: UVec2,
    /// Visible lights for forward passes; empty otherwise.
    pub lights: &'a [LightRef],
    pub environment: &'a SceneEnvironment,
    pub planar: PlanarSource,
}

impl<'a> RenderPassContext<'a> {
    pub fn inverse_resolution(&self) -> Vec2 {
        Vec2::ONE / self.target_size.max(UVec2::ONE).as_vec2()
    }
}
