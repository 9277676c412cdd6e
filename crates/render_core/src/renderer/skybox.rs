//! Environment skybox, drawn first in forward views and the G-buffer.

use bevy::log::debug;
use bevy::math::Mat4;

use super::Renderer;
use crate::camera::Camera;
use crate::gpu::{GraphicsContext, PipelineState};

impl Renderer {
    /// Draw the environment cubemap on a box centred on the eye. A missing
    /// environment texture means no skybox.
    pub(crate) fn draw_skybox(&mut self, ctx: &mut dyn GraphicsContext, camera: &Camera) {
        let Some(environment) = ctx.texture(&self.config.assets.environment) else {
            return;
        };
        let (Some(program), Some(mesh)) = (
            ctx.program("skybox"),
            ctx.mesh(&self.config.assets.skybox_mesh),
        ) else {
            debug!("Skybox program or mesh missing");
            self.report.skipped_draws += 1;
            return;
        };

        ctx.set_pipeline_state(&PipelineState {
            blend: None,
            depth_compare: None,
            depth_write: false,
            cull_mode: None,
            ..PipelineState::default()
        });
        ctx.use_program(program);
        ctx.set_uniform("u_viewprojection", camera.view_projection().into());
        ctx.set_uniform("u_camera_position", camera.eye().into());
        ctx.set_uniform("u_model", Mat4::from_translation(camera.eye()).into());
        ctx.set_texture("u_texture", environment, 0);
        ctx.draw(&mesh);

        ctx.set_pipeline_state(&PipelineState::default());
    }
}
