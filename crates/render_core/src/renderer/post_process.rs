//! Post-process and debug views over the illumination buffer.
//!
//! Order: present, then either a debug view, or tonemap → volumetric →
//! reflections → probe overlays.

use bevy::log::debug;
use bevy::math::{Mat4, UVec2, Vec2, Vec3, Vec4};
use rand::Rng;
use wgpu::{BlendState, FilterMode};

use super::targets::{color_descriptor, ensure_allocated};
use super::{FrameInputs, PassLabel, Renderer};
use crate::camera::Camera;
use crate::config::DebugView;
use crate::gpu::{ClearOps, GraphicsContext, PipelineState, RenderTarget, TextureId, Viewport};

const VOLUMETRIC_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Viewport quadrants for the G-buffer debug view: albedo, normal, SSAO,
/// depth.
pub fn debug_quadrants(size: UVec2) -> [Viewport; 4] {
    let half = size / 2;
    let quad = |x: u32, y: u32| Viewport {
        x,
        y,
        width: half.x,
        height: half.y,
    };
    [quad(0, 0), quad(half.x, 0), quad(0, half.y), quad(half.x, half.y)]
}

impl Renderer {
    pub(crate) fn render_post_process(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
        occlusion: TextureId,
        illumination: &RenderTarget,
    ) {
        let Some(lit) = illumination.color(0) else {
            debug!("Illumination buffer has no color attachment, nothing to present");
            return;
        };
        ctx.bind_render_target(None);
        ctx.set_viewport(Viewport::full(frame.viewport));
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.blit(lit, None);
        self.report.push(PassLabel::Present);

        match self.config.debug.view {
            DebugView::GBuffers => {
                self.render_gbuffer_debug(ctx, frame, gbuffer, occlusion);
                return;
            }
            DebugView::IrradianceTexture => {
                if let Some(volume) = &self.irradiance {
                    ctx.blit(volume.texture, None);
                    self.report.push(PassLabel::IrradianceDebugView);
                    return;
                }
            }
            DebugView::None => {}
        }

        if self.config.tonemapper.enabled {
            self.render_tonemap(ctx, lit);
        }
        if self.config.volumetric.enabled {
            self.render_volumetric(ctx, frame, gbuffer);
        }
        if self.config.reflections.enabled {
            self.render_reflections(ctx, frame, gbuffer);
        }
        self.render_probe_overlays(ctx, frame.camera);
    }

    fn render_gbuffer_debug(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
        occlusion: TextureId,
    ) {
        self.report.push(PassLabel::GBufferDebugView);
        let [albedo, normal, ssao, depth_view] = debug_quadrants(frame.viewport);

        for (viewport, attachment) in [(albedo, 0), (normal, 1)] {
            ctx.set_viewport(viewport);
            if let Some(texture) = gbuffer.color(attachment) {
                ctx.blit(texture, None);
            }
        }
        ctx.set_viewport(ssao);
        ctx.blit(occlusion, None);

        ctx.set_viewport(depth_view);
        match (ctx.program("depth"), gbuffer.depth) {
            (Some(program), Some(depth)) => {
                ctx.use_program(program);
                ctx.set_uniform(
                    "u_camera_nearfar",
                    Vec2::new(frame.camera.near_plane(), frame.camera.far_plane()).into(),
                );
                ctx.blit(depth, Some(program));
            }
            _ => {
                debug!("Depth debug program missing");
                self.report.skipped_draws += 1;
            }
        }
        ctx.set_viewport(Viewport::full(frame.viewport));
    }

    fn render_tonemap(&mut self, ctx: &mut dyn GraphicsContext, lit: TextureId) {
        let Some(program) = ctx.program("tonemapper") else {
            debug!("Missing tonemapper program");
            self.report.skipped_draws += 1;
            return;
        };
        self.report.push(PassLabel::TonemapPass);
        let settings = &self.config.tonemapper;
        ctx.use_program(program);
        ctx.set_uniform("u_scale", settings.scale.into());
        ctx.set_uniform("u_average_lum", settings.average_lum.into());
        ctx.set_uniform("u_lumwhite2", (settings.lum_white * settings.lum_white).into());
        ctx.set_uniform("u_igamma", (1.0 / settings.gamma).into());
        ctx.blit(lit, Some(program));
    }

    /// Light scattering from the shadow-casting sun, ray marched at reduced
    /// resolution and alpha blended over the frame.
    fn render_volumetric(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
    ) {
        let Some(sun) = frame.sun.as_ref().filter(|sun| sun.light.has_shadow) else {
            return;
        };
        let Some(shadow) = &sun.shadow else {
            return;
        };
        let (Some(shadow_depth), Some(depth)) = (shadow.target.depth, gbuffer.depth) else {
            return;
        };
        let assets = &self.config.assets;
        let (Some(program), Some(quad), Some(noise)) = (
            ctx.program("volumetric_directional"),
            ctx.mesh(&assets.quad_mesh),
            ctx.texture(&assets.noise_texture),
        ) else {
            debug!("Volumetric program, quad or noise texture missing");
            self.report.skipped_draws += 1;
            return;
        };
        self.report.push(PassLabel::VolumetricPass);

        let shift = self.config.volumetric.downsample_shift;
        let size = UVec2::new(
            frame.viewport.x.checked_shr(shift).unwrap_or(0),
            frame.viewport.y.checked_shr(shift).unwrap_or(0),
        )
        .max(UVec2::ONE);
        let target = ensure_allocated(
            ctx,
            &mut self.targets.volumetric,
            &color_descriptor("volumetric", size, VOLUMETRIC_FORMAT),
        );
        let Some(scattering) = target.color(0) else {
            return;
        };

        ctx.set_texture_filter(noise, FilterMode::Nearest, FilterMode::Nearest);
        ctx.bind_render_target(Some(target.id));
        ctx.set_viewport(Viewport::full(target.size));
        ctx.clear(ClearOps::color(Vec4::ZERO));
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.use_program(program);
        ctx.set_uniform("u_inverse_viewprojection", frame.camera.inverse_view_projection().into());
        ctx.set_uniform("u_viewprojection", frame.camera.view_projection().into());
        ctx.set_texture("u_depth_texture", depth, 0);
        ctx.set_uniform("u_iRes", target.inverse_resolution().into());
        ctx.set_uniform("u_camera_position", frame.camera.eye().into());
        ctx.set_uniform("u_ambient_light", frame.environment.ambient.into());
        ctx.set_uniform("u_light_color", sun.light.color.into());
        ctx.set_uniform("u_light_vector", sun.direction().into());
        ctx.set_texture("shadowmap", shadow_depth, 1);
        ctx.set_uniform("u_shadow_viewproj", shadow.camera.view_projection().into());
        ctx.set_uniform("u_shadow_bias", sun.light.shadow_bias.into());
        ctx.set_uniform("u_sample_density", self.config.volumetric.sample_density.into());
        let mut rng = rand::thread_rng();
        let jitter = Vec3::new(rng.gen(), rng.gen(), rng.gen());
        ctx.set_uniform("u_rand", jitter.into());
        ctx.set_texture("u_noise", noise, 3);
        ctx.draw(&quad);

        ctx.bind_render_target(None);
        ctx.set_viewport(Viewport::full(frame.viewport));
        ctx.set_texture_filter(scattering, FilterMode::Linear, FilterMode::Linear);
        let blended = PipelineState::fullscreen().with_blend(Some(BlendState::ALPHA_BLENDING));
        ctx.set_pipeline_state(&blended);
        ctx.blit(scattering, None);
        ctx.set_pipeline_state(&PipelineState::fullscreen());
    }

    /// Specular reflections from the nearest baked probe, or the global
    /// environment when no probe is close enough.
    fn render_reflections(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
        gbuffer: &RenderTarget,
    ) {
        if self.reflections.is_empty() {
            return;
        }
        let assets = &self.config.assets;
        let Some(environment) = ctx.texture(&assets.environment) else {
            return;
        };
        let (Some(program), Some(quad), Some(depth), Some(albedo), Some(normal)) = (
            ctx.program("deferred_reflections"),
            ctx.mesh(&assets.quad_mesh),
            gbuffer.depth,
            gbuffer.color(0),
            gbuffer.color(1),
        ) else {
            debug!("Reflection program or quad missing");
            self.report.skipped_draws += 1;
            return;
        };
        self.report.push(PassLabel::ReflectionPass);

        let cubemap = self
            .reflections
            .nearest_within(frame.camera.eye(), self.config.reflections.capture_radius)
            .map(|probe| probe.cubemap)
            .unwrap_or(environment);

        let blended = PipelineState::fullscreen().with_blend(Some(BlendState::ALPHA_BLENDING));
        ctx.set_pipeline_state(&blended);
        ctx.use_program(program);
        ctx.set_uniform("u_inverse_viewprojection", frame.camera.inverse_view_projection().into());
        ctx.set_uniform("u_viewprojection", frame.camera.view_projection().into());
        ctx.set_texture("u_color_texture", albedo, 0);
        ctx.set_texture("u_normal_texture", normal, 1);
        ctx.set_texture("u_depth_texture", depth, 2);
        ctx.set_texture("u_environment_texture", cubemap, 3);
        ctx.set_uniform("u_iRes", gbuffer.inverse_resolution().into());
        ctx.set_uniform("u_camera_position", frame.camera.eye().into());
        ctx.draw(&quad);
        ctx.set_pipeline_state(&PipelineState::fullscreen());
    }

    /// Irradiance probes as SH-shaded spheres and reflection probes as
    /// mirrored spheres.
    pub(crate) fn render_probe_overlays(&mut self, ctx: &mut dyn GraphicsContext, camera: &Camera) {
        let debug = &self.config.debug;
        let show_irradiance = debug.show_probes && self.irradiance.is_some();
        let show_reflections = debug.show_reflection_probes && !self.reflections.is_empty();
        if !show_irradiance && !show_reflections {
            return;
        }
        let Some(sphere) = ctx.mesh(&self.config.assets.sphere_mesh) else {
            debug!("Sphere mesh missing, no probe overlay");
            return;
        };
        self.report.push(PassLabel::ProbeOverlay);
        ctx.set_pipeline_state(&PipelineState::default());

        if show_irradiance {
            if let (Some(program), Some(volume)) = (ctx.program("probe"), &self.irradiance) {
                let size = Vec3::splat(self.config.debug.probe_size);
                for probe in &volume.probes {
                    ctx.use_program(program);
                    ctx.set_uniform("u_viewprojection", camera.view_projection().into());
                    ctx.set_uniform("u_camera_position", camera.eye().into());
                    ctx.set_uniform(
                        "u_model",
                        (Mat4::from_translation(probe.position) * Mat4::from_scale(size)).into(),
                    );
                    ctx.set_uniform("u_coeffs", probe.sh.to_vec().into());
                    ctx.draw(&sphere);
                }
            }
        }

        if show_reflections {
            if let Some(program) = ctx.program("ref_probes") {
                let size = Vec3::splat(self.config.debug.reflection_probe_size);
                for probe in &self.reflections.probes {
                    ctx.use_program(program);
                    ctx.set_uniform("u_viewprojection", camera.view_projection().into());
                    ctx.set_uniform("u_camera_position", camera.eye().into());
                    ctx.set_uniform(
                        "u_model",
                        (Mat4::from_translation(probe.position) * Mat4::from_scale(size)).into(),
                    );
                    ctx.set_texture("u_texture", probe.cubemap, 0);
                    ctx.draw(&sphere);
                }
            }
        }
    }
}
