//! G-buffer pass.
//!
//! Layout (all RGBA16F plus depth-stencil):
//! - 0: albedo, cleared to the scene background
//! - 1: normal + material extra, cleared to black
//! - 2: extra, cleared to black

use bevy::log::debug;
use bevy::math::{Mat4, Vec2, Vec4};
use wgpu::{BlendState, CompareFunction};

use super::context::{PassKind, PlanarSource, RenderPassContext};
use super::forward::material_cull_mode;
use super::targets::{ensure_allocated, gbuffer_descriptor};
use super::traversal::render_scene;
use super::{FrameInputs, PassLabel, Renderer};
use crate::gpu::{ClearOps, DrawBuffers, GraphicsContext, PipelineState, RenderTarget, Viewport};
use crate::scene::{AlphaMode, Material, Mesh};

impl Renderer {
    /// Allocate (if needed), clear and fill the G-buffer.
    pub(crate) fn render_gbuffer(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
    ) -> RenderTarget {
        let gbuffer = ensure_allocated(
            ctx,
            &mut self.targets.gbuffer,
            &gbuffer_descriptor(frame.viewport),
        );
        self.report.push(PassLabel::GBufferPass);

        ctx.bind_render_target(Some(gbuffer.id));
        ctx.set_viewport(Viewport::full(gbuffer.size));
        ctx.set_pipeline_state(&PipelineState::default());

        // Background lands in target 0 only.
        ctx.set_draw_buffers(DrawBuffers::Single(0));
        ctx.clear(ClearOps::color_and_depth(frame.environment.background));
        for index in 1..gbuffer.color.len() as u32 {
            ctx.set_draw_buffers(DrawBuffers::Single(index));
            ctx.clear(ClearOps::color(Vec4::new(0.0, 0.0, 0.0, 1.0)));
        }
        ctx.set_draw_buffers(DrawBuffers::All);

        self.draw_skybox(ctx, frame.camera);

        let pass = RenderPassContext {
            kind: PassKind::GBuffer,
            camera: frame.camera,
            target_size: gbuffer.size,
            lights: &[],
            environment: frame.environment,
            planar: PlanarSource::Disabled,
        };
        self.report.skipped_draws += render_scene(ctx, &pass, frame.prefabs);

        gbuffer
    }
}

/// Lighting-independent draw into the G-buffer with the `multi` program.
pub(crate) fn draw_mesh_gbuffer(
    ctx: &mut dyn GraphicsContext,
    pass: &RenderPassContext,
    model: &Mat4,
    mesh: &Mesh,
    material: &Material,
) -> bool {
    let Some(program) = ctx.program("multi") else {
        debug!("Missing multi program, skipping {}", mesh.name);
        return false;
    };

    ctx.set_pipeline_state(&PipelineState {
        blend: match material.alpha_mode {
            AlphaMode::Blend => Some(BlendState::ALPHA_BLENDING),
            _ => None,
        },
        depth_compare: Some(CompareFunction::Less),
        depth_write: true,
        cull_mode: material_cull_mode(material),
        ..PipelineState::default()
    });
    ctx.use_program(program);
    ctx.set_uniform("u_viewprojection", pass.camera.view_projection().into());
    ctx.set_uniform("u_camera_position", pass.camera.eye().into());
    ctx.set_uniform("u_model", (*model).into());
    ctx.set_uniform(
        "u_camera_near_far",
        Vec2::new(pass.camera.near_plane(), pass.camera.far_plane()).into(),
    );
    ctx.set_uniform("u_hasgamma", pass.environment.has_gamma.into());
    material.set_uniforms(ctx);
    material.set_pbr_uniforms(ctx);
    ctx.draw(mesh);
    true
}
