//! Projected decals onto the G-buffer albedo target.
//!
//! A decal is a box; the program reconstructs each covered pixel's world
//! position from G-buffer depth, moves it into box space with the inverse
//! box transform and samples the decal texture there.

use bevy::log::debug;
use bevy::math::{Mat4, Vec3};
use wgpu::{BlendState, CompareFunction, Face};

use super::{FrameInputs, PassLabel, Renderer};
use crate::config::DecalSettings;
use crate::gpu::{DrawBuffers, GraphicsContext, PipelineState, RenderTarget};

/// Box transform of the configured decal projector.
pub fn decal_transform(settings: &DecalSettings) -> Mat4 {
    Mat4::from_translation(Vec3::from_array(settings.translation))
        * Mat4::from_scale(Vec3::from_array(settings.scale))
}

impl Renderer {
    /// Blend decals onto G-buffer target 0. Runs while the G-buffer is bound.
    pub(crate) fn render_decals(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
    ) {
        let assets = &self.config.assets;
        let Some(texture) = ctx.texture(&assets.decal_texture) else {
            debug!("Decal texture {} missing", assets.decal_texture);
            return;
        };
        let (Some(program), Some(cube)) = (ctx.program("decal"), ctx.mesh(&assets.cube_mesh)) else {
            debug!("Decal program or cube mesh missing");
            self.report.skipped_draws += 1;
            return;
        };
        let Some(depth) = gbuffer.depth else {
            return;
        };
        self.report.push(PassLabel::DecalPass);

        let model = decal_transform(&self.config.decal);

        ctx.set_draw_buffers(DrawBuffers::Single(0));
        ctx.set_pipeline_state(&PipelineState {
            blend: Some(BlendState::ALPHA_BLENDING),
            depth_compare: Some(CompareFunction::Less),
            depth_write: false,
            cull_mode: Some(Face::Back),
            ..PipelineState::default()
        });
        ctx.use_program(program);
        ctx.set_uniform("u_camera_position", frame.camera.eye().into());
        ctx.set_texture("u_texture", texture, 0);
        ctx.set_uniform("u_inverse_viewprojection", frame.camera.inverse_view_projection().into());
        ctx.set_uniform("u_viewprojection", frame.camera.view_projection().into());
        ctx.set_texture("u_depth_texture", depth, 1);
        ctx.set_uniform("u_model", model.into());
        ctx.set_uniform("u_imodel", model.inverse().into());
        ctx.set_uniform("u_iRes", gbuffer.inverse_resolution().into());
        ctx.draw(&cube);
        ctx.set_draw_buffers(DrawBuffers::All);
    }
}
