//! Screen-space ambient occlusion over the G-buffer.
//!
//! The sample kernel is generated once from a seeded RNG so frames (and
//! tests) are reproducible. The optional blur ping-pongs between the
//! occlusion buffer (A) and a second buffer (B) at 1×, 2× and 4× texel
//! offsets: A→B, B→A, A→B. Lighting then reads B.

use std::f32::consts::PI;

use bevy::log::debug;
use bevy::math::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::FilterMode;

use super::targets::{color_descriptor, ensure_allocated, SSAO_FORMAT};
use super::{FrameInputs, PassLabel, Renderer};
use crate::config::SsaoSettings;
use crate::gpu::{ClearOps, GraphicsContext, PipelineState, RenderTarget, TextureId, Viewport};

/// Random points inside a sphere of `radius`, folded into +Z when
/// `hemisphere` is set. Radii are drawn so samples cluster away from the
/// centre less than uniform volume sampling would.
pub fn generate_sphere_points(
    count: usize,
    radius: f32,
    hemisphere: bool,
    rng: &mut impl Rng,
) -> Vec<Vec3> {
    (0..count)
        .map(|_| {
            let u: f32 = rng.gen();
            let v: f32 = rng.gen();
            let theta = u * 2.0 * PI;
            let phi = (2.0 * v - 1.0).clamp(-1.0, 1.0).acos();
            let r = (rng.gen::<f32>() * 0.9 + 0.1).cbrt() * radius;
            let mut p = Vec3::new(
                r * phi.sin() * theta.cos(),
                r * phi.sin() * theta.sin(),
                r * phi.cos(),
            );
            if hemisphere && p.z < 0.0 {
                p.z = -p.z;
            }
            p
        })
        .collect()
}

pub fn ssao_kernel(settings: &SsaoSettings) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    generate_sphere_points(settings.sample_count, settings.radius, settings.hemisphere, &mut rng)
}

impl Renderer {
    /// Occlusion pass (plus optional blur). Returns the texture holding the
    /// final occlusion values.
    pub(crate) fn render_ssao(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
    ) -> Option<TextureId> {
        let ssao = ensure_allocated(
            ctx,
            &mut self.targets.ssao,
            &color_descriptor("ssao", frame.viewport, SSAO_FORMAT),
        );

        ctx.bind_render_target(Some(ssao.id));
        ctx.set_viewport(Viewport::full(ssao.size));
        // Unoccluded until the pass writes.
        ctx.clear(ClearOps::color(Vec4::ONE));
        ctx.set_pipeline_state(&PipelineState::fullscreen());

        let (Some(program), Some(quad), Some(depth), Some(normal)) = (
            ctx.program("ssao"),
            ctx.mesh(&self.config.assets.quad_mesh),
            gbuffer.depth,
            gbuffer.color(1),
        ) else {
            debug!("SSAO program or quad missing, occlusion left at 1.0");
            self.report.skipped_draws += 1;
            return ssao.color(0);
        };
        self.report.push(PassLabel::SsaoPass);

        ctx.set_texture_filter(depth, FilterMode::Nearest, FilterMode::Linear);
        ctx.use_program(program);
        ctx.set_texture("u_depth_texture", depth, 0);
        ctx.set_texture("u_normal_texture", normal, 1);
        ctx.set_uniform("u_inverse_viewprojection", frame.camera.inverse_view_projection().into());
        ctx.set_uniform("u_iRes", gbuffer.inverse_resolution().into());
        ctx.set_uniform("u_viewprojection", frame.camera.view_projection().into());
        ctx.set_uniform("u_bias", frame.environment.ssao_bias.into());
        ctx.set_uniform("u_points", self.ssao_kernel.clone().into());
        ctx.draw(&quad);

        if self.config.ssao.blur {
            return self.blur_ssao(ctx, &ssao);
        }
        ssao.color(0)
    }

    fn blur_ssao(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        ssao: &RenderTarget,
    ) -> Option<TextureId> {
        let Some(blur) = ctx.program("blur") else {
            debug!("Missing blur program, using unblurred occlusion");
            return ssao.color(0);
        };
        let buffer_b = ensure_allocated(
            ctx,
            &mut self.targets.ssao_blur,
            &color_descriptor("ssao_blur", ssao.size, SSAO_FORMAT),
        );
        let (Some(a), Some(b)) = (ssao.color(0), buffer_b.color(0)) else {
            return ssao.color(0);
        };
        self.report.push(PassLabel::SsaoBlurPass);

        let texel = ssao.inverse_resolution();
        let steps = [(a, &buffer_b, 1.0), (b, ssao, 2.0), (a, &buffer_b, 4.0)];
        for (source, destination, scale) in steps {
            ctx.bind_render_target(Some(destination.id));
            ctx.set_viewport(Viewport::full(destination.size));
            ctx.use_program(blur);
            ctx.set_uniform("u_offset", (texel * Vec2::splat(scale)).into());
            ctx.set_texture("u_texture", source, 0);
            ctx.blit(source, Some(blur));
        }
        Some(b)
    }
}
