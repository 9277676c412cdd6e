//! Graphics command stream abstraction.
//!
//! The renderer never talks to a GPU API directly. Every pass is expressed as
//! an ordered sequence of calls on a [`GraphicsContext`]:
//!
//! ```text
//! bind_render_target ─► set_pipeline_state ─► use_program ─► set_uniform* ─► draw
//! ```
//!
//! The same trait also fronts the lookup collaborators the renderer depends on
//! (shader programs by symbolic name, meshes and textures by asset name). All
//! lookups return `Option`; a missing resource means "draw nothing for this
//! element", never an error.
//!
//! Pipeline state uses the `wgpu` vocabulary so [`WgpuContext`] maps it
//! one-to-one onto render pipeline descriptors.

mod recording;
mod uniforms;
mod wgpu_backend;

pub use recording::*;
pub use uniforms::*;
pub use wgpu_backend::*;

use std::sync::Arc;

use bevy::math::{Mat4, UVec2, Vec2, Vec3, Vec4};
use wgpu::{
    BlendComponent, BlendFactor, BlendOperation, BlendState, ColorWrites, CompareFunction, Face,
    FilterMode, FrontFace, TextureFormat,
};

use crate::probes::{CubeFace, FloatImage};
use crate::scene::Mesh;

/// Handle to a compiled shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Handle to a texture (2D, depth or cubemap).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Handle to an offscreen render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u32);

/// Description of an offscreen render target.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: &'static str,
    pub size: UVec2,
    /// One entry per color attachment.
    pub color_formats: Vec<TextureFormat>,
    /// Depth attachment format, if any.
    pub depth_format: Option<TextureFormat>,
}

/// An allocated render target and the textures backing its attachments.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTarget {
    pub id: RenderTargetId,
    pub size: UVec2,
    pub color: Vec<TextureId>,
    pub depth: Option<TextureId>,
}

impl RenderTarget {
    /// Color attachment `index`, if the target has one.
    pub fn color(&self, index: usize) -> Option<TextureId> {
        self.color.get(index).copied()
    }

    /// Inverse resolution, pushed to most full-screen shaders as `u_iRes`.
    pub fn inverse_resolution(&self) -> Vec2 {
        Vec2::new(1.0 / self.size.x.max(1) as f32, 1.0 / self.size.y.max(1) as f32)
    }
}

/// Description of a standalone texture.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub size: UVec2,
    pub format: TextureFormat,
    /// Six faces instead of one.
    pub cubemap: bool,
    pub mipmaps: bool,
}

/// Which color attachments of the bound target receive writes and clears.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawBuffers {
    All,
    Single(u32),
}

/// Buffers to clear on the bound target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearOps {
    pub color: Option<Vec4>,
    pub depth: bool,
}

impl ClearOps {
    pub fn color_and_depth(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: true,
        }
    }

    pub fn color(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: false,
        }
    }
}

/// Pixel rectangle of the bound target that draws are mapped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(size: UVec2) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.x,
            height: size.y,
        }
    }
}

/// Fixed-function state applied to subsequent draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineState {
    /// `None` disables blending.
    pub blend: Option<BlendState>,
    /// `None` disables depth testing.
    pub depth_compare: Option<CompareFunction>,
    pub depth_write: bool,
    /// `None` disables face culling.
    pub cull_mode: Option<Face>,
    pub front_face: FrontFace,
    pub color_writes: ColorWrites,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend: None,
            depth_compare: Some(CompareFunction::Less),
            depth_write: true,
            cull_mode: Some(Face::Back),
            front_face: FrontFace::Ccw,
            color_writes: ColorWrites::ALL,
        }
    }
}

impl PipelineState {
    /// Full-screen pass: no depth test, no culling, no blending.
    pub fn fullscreen() -> Self {
        Self {
            depth_compare: None,
            depth_write: false,
            cull_mode: None,
            ..Self::default()
        }
    }

    pub fn with_blend(mut self, blend: Option<BlendState>) -> Self {
        self.blend = blend;
        self
    }
}

/// `src * 1 + dst * 1`, used to sum light contributions in the deferred pass.
pub const ADDITIVE_BLENDING: BlendState = BlendState {
    color: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
    alpha: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
};

/// `src * src_alpha + dst * 1`, used for the second and later forward lights.
pub const ALPHA_ADDITIVE_BLENDING: BlendState = BlendState {
    color: BlendComponent {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
    alpha: BlendComponent {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
};

/// A named shader parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Vec3Array(Vec<Vec3>),
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

impl From<Vec<Vec3>> for UniformValue {
    fn from(v: Vec<Vec3>) -> Self {
        UniformValue::Vec3Array(v)
    }
}

/// One ordered graphics command stream plus its resource lookups.
///
/// Submission order is execution order. Implementations are not expected to
/// be thread-safe beyond `Send + Sync` for storage in an ECS resource.
pub trait GraphicsContext: Send + Sync {
    /// Look up a shader program by symbolic name (e.g. `"deferred"`).
    fn program(&mut self, name: &str) -> Option<ProgramId>;

    /// Look up an already loaded mesh by asset name.
    fn mesh(&mut self, name: &str) -> Option<Arc<Mesh>>;

    /// Look up an already loaded texture by asset name.
    fn texture(&mut self, name: &str) -> Option<TextureId>;

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> RenderTarget;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Replace the full contents of a texture (tightly packed texels).
    fn upload_texture(&mut self, texture: TextureId, data: &[u8]);

    fn set_texture_filter(&mut self, texture: TextureId, min: FilterMode, mag: FilterMode);

    fn generate_mipmaps(&mut self, texture: TextureId);

    /// Route color attachment 0 of `target` to one face of a cubemap.
    fn attach_cubemap_face(&mut self, target: RenderTargetId, cubemap: TextureId, face: CubeFace);

    /// Read a color attachment back as linear float RGBA.
    fn read_color(&mut self, target: RenderTargetId, attachment: u32) -> FloatImage;

    /// `None` binds the presentation surface.
    fn bind_render_target(&mut self, target: Option<RenderTargetId>);

    fn set_draw_buffers(&mut self, buffers: DrawBuffers);

    fn set_viewport(&mut self, viewport: Viewport);

    fn clear(&mut self, ops: ClearOps);

    fn set_pipeline_state(&mut self, state: &PipelineState);

    fn use_program(&mut self, program: ProgramId);

    fn set_uniform(&mut self, name: &str, value: UniformValue);

    fn set_texture(&mut self, name: &str, texture: TextureId, slot: u32);

    /// Issue one draw call for a whole mesh with the current program/state.
    fn draw(&mut self, mesh: &Mesh);

    /// Draw `source` as a full-screen quad into the current viewport, through
    /// `program` if given or a plain copy otherwise.
    fn blit(&mut self, source: TextureId, program: Option<ProgramId>);

    /// Hand everything issued so far to the device. Called once per frame.
    fn submit(&mut self) {}
}
