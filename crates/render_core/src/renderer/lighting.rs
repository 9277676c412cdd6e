//! Deferred lighting: per-light additive accumulation over the G-buffer.
//!
//! Directional and spot lights shade the whole screen through a full-screen
//! quad (`deferred`). Point lights draw a sphere scaled to their range
//! (`deferred_ws`) with the winding flipped, so the back faces rasterise and
//! the volume still shades when the eye is inside it.

use bevy::log::{debug, warn};
use bevy::math::{Mat4, Vec3, Vec4};
use wgpu::{Face, FrontFace};

use super::shadow::bind_light_shadow;
use super::targets::{color_descriptor, ensure_allocated, ILLUMINATION_FORMAT};
use super::{FrameInputs, PassLabel, Renderer};
use crate::gpu::{
    ClearOps, GraphicsContext, PipelineState, RenderTarget, TextureId, Viewport, ADDITIVE_BLENDING,
};
use crate::scene::{LightKind, LightRef};

/// Pipeline state of a point-light volume.
pub fn light_volume_state() -> PipelineState {
    PipelineState {
        blend: Some(ADDITIVE_BLENDING),
        depth_compare: None,
        depth_write: false,
        cull_mode: Some(Face::Back),
        front_face: FrontFace::Cw,
        ..PipelineState::default()
    }
}

/// Model matrix of a point light's influence sphere.
pub fn light_volume_transform(light: &LightRef) -> Mat4 {
    Mat4::from_translation(light.position())
        * Mat4::from_scale(Vec3::splat(light.light.max_distance))
}

impl Renderer {
    /// G-buffer, decals, SSAO, lighting, then post-process.
    pub(crate) fn render_deferred(&mut self, ctx: &mut dyn GraphicsContext, frame: &FrameInputs) {
        let gbuffer = self.render_gbuffer(ctx, frame);
        if self.config.decal.enabled {
            self.render_decals(ctx, frame, &gbuffer);
        }
        let Some(occlusion) = self.render_ssao(ctx, frame, &gbuffer) else {
            warn!("Occlusion buffer has no color attachment, frame dropped");
            return;
        };
        let illumination = self.render_lighting(ctx, frame, &gbuffer, occlusion);
        self.render_post_process(ctx, frame, &gbuffer, occlusion, &illumination);
    }

    pub(crate) fn render_lighting(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
        occlusion: TextureId,
    ) -> RenderTarget {
        let illumination = ensure_allocated(
            ctx,
            &mut self.targets.illumination,
            &color_descriptor("illumination", frame.viewport, ILLUMINATION_FORMAT),
        );
        self.report.push(PassLabel::LightingPass);

        ctx.bind_render_target(Some(illumination.id));
        ctx.set_viewport(Viewport::full(illumination.size));
        ctx.clear(ClearOps::color(Vec4::new(0.0, 0.0, 0.0, 1.0)));

        for (index, light) in frame.lights.iter().enumerate() {
            if !self.draw_light(ctx, frame, gbuffer, occlusion, index, light) {
                self.report.skipped_draws += 1;
            }
        }

        illumination
    }

    fn draw_light(
        &self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
        occlusion: TextureId,
        index: usize,
        light: &LightRef,
    ) -> bool {
        let is_volume = light.light.kind == LightKind::Point;
        let (program_name, mesh_name) = if is_volume {
            ("deferred_ws", &self.config.assets.sphere_mesh)
        } else {
            ("deferred", &self.config.assets.quad_mesh)
        };
        let (Some(program), Some(mesh)) = (ctx.program(program_name), ctx.mesh(mesh_name)) else {
            debug!("Missing {} program or {} mesh for light {}", program_name, mesh_name, light.id);
            return false;
        };
        let (Some(albedo), Some(normal), Some(extra)) =
            (gbuffer.color(0), gbuffer.color(1), gbuffer.color(2))
        else {
            debug!("G-buffer is missing an attachment, light {} skipped", light.id);
            return false;
        };

        let state = if is_volume {
            light_volume_state()
        } else {
            PipelineState::fullscreen().with_blend(Some(ADDITIVE_BLENDING))
        };
        ctx.set_pipeline_state(&state);
        ctx.use_program(program);

        ctx.set_uniform("u_camera_position", frame.camera.eye().into());
        ctx.set_texture("u_color_texture", albedo, 0);
        ctx.set_texture("u_normal_texture", normal, 1);
        ctx.set_texture("u_extra_texture", extra, 2);
        if let Some(depth) = gbuffer.depth {
            ctx.set_texture("u_depth_texture", depth, 3);
        }
        ctx.set_uniform("u_hasgamma", frame.environment.has_gamma.into());
        ctx.set_texture("u_ssao", occlusion, 4);
        ctx.set_uniform("u_inverse_viewprojection", frame.camera.inverse_view_projection().into());
        ctx.set_uniform("u_iRes", gbuffer.inverse_resolution().into());
        ctx.set_uniform("u_ambient_light", frame.environment.ambient.into());
        ctx.set_uniform("u_light_num", (index as i32).into());

        match &self.irradiance {
            Some(volume) => volume.set_uniforms(ctx),
            None => ctx.set_uniform("u_irradiance", false.into()),
        }

        if is_volume {
            ctx.set_uniform("u_viewprojection", frame.camera.view_projection().into());
            ctx.set_uniform("u_model", light_volume_transform(light).into());
        }

        light.light.set_uniforms(ctx, &light.model);
        bind_light_shadow(ctx, light);
        ctx.draw(&mesh);
        true
    }
}
