//! Shadow mapping.
//!
//! Every shadow-casting light (visible or not) renders scene depth from its
//! own camera into a dedicated depth target:
//! - directional: orthographic box of ±`directional_extent` along local -Z
//! - spot/point: perspective cone of half-angle `acos(spot_cutoff)`, far
//!   plane at `max_distance`
//!
//! The depth target and camera live in a [`ShadowMap`] component inserted on
//! the light entity the first time it is needed.

use bevy::log::{debug, info};
use bevy::math::{Mat4, UVec2, Vec3};
use bevy::prelude::World;
use wgpu::{ColorWrites, CompareFunction, Face};

use super::context::{PassKind, PlanarSource, RenderPassContext};
use super::targets::{release, shadow_descriptor};
use super::traversal::render_scene;
use super::{PassLabel, Renderer};
use crate::camera::Camera;
use crate::config::ShadowSettings;
use crate::gpu::{ClearOps, GraphicsContext, PipelineState, Viewport};
use crate::scene::{
    shadow_casting_lights, LightKind, LightRef, PrefabRef, SceneEnvironment, ShadowMap,
};

/// Depth only: no color writes, no blending, back-face culling.
pub fn shadow_pipeline_state() -> PipelineState {
    PipelineState {
        blend: None,
        depth_compare: Some(CompareFunction::Less),
        depth_write: true,
        cull_mode: Some(Face::Back),
        color_writes: ColorWrites::empty(),
        ..PipelineState::default()
    }
}

/// Camera rendering a light's shadow map.
pub fn light_camera(light: &LightRef, settings: &ShadowSettings) -> Camera {
    let mut camera = Camera::default();
    let position = light.position();
    let target = position + light.direction();
    match light.light.kind {
        LightKind::Directional => {
            let e = settings.directional_extent;
            camera.set_orthographic(-e, e, -e, e, -e, e);
        }
        LightKind::Spot | LightKind::Point => {
            let half_angle = light.light.spot_cutoff.clamp(-1.0, 1.0).acos();
            // Keep the cone a valid perspective frustum.
            let fov = (2.0 * half_angle).to_degrees().clamp(1.0, 179.0);
            let far = light.light.max_distance.max(settings.spot_near + 0.01);
            camera.set_perspective(fov, 1.0, settings.spot_near, far);
        }
    }
    camera.look_at(position, target, Vec3::Y);
    camera
}

impl Renderer {
    /// Render depth for every shadow-casting light.
    pub(crate) fn render_shadow_maps(
        &mut self,
        world: &mut World,
        ctx: &mut dyn GraphicsContext,
        prefabs: &[PrefabRef],
        environment: &SceneEnvironment,
    ) {
        let casters = shadow_casting_lights(world);
        if casters.is_empty() {
            return;
        }
        self.report.push(PassLabel::ShadowPass);

        let settings = self.config.shadows.clone();
        let size = UVec2::splat(settings.resolution);

        for light in &casters {
            let camera = light_camera(light, &settings);
            let target = match &light.shadow {
                Some(existing) if existing.target.size == size => existing.target.clone(),
                existing => {
                    if let Some(old) = existing {
                        release(ctx, &old.target);
                    }
                    info!(
                        "Allocating {}x{} shadow map for light {}",
                        size.x, size.y, light.id
                    );
                    ctx.create_render_target(&shadow_descriptor(settings.resolution))
                }
            };

            ctx.bind_render_target(Some(target.id));
            ctx.set_viewport(Viewport::full(size));
            ctx.set_pipeline_state(&shadow_pipeline_state());
            ctx.clear(ClearOps {
                color: None,
                depth: true,
            });

            let pass = RenderPassContext {
                kind: PassKind::Shadow,
                camera: &camera,
                target_size: size,
                lights: &[],
                environment,
                planar: PlanarSource::Disabled,
            };
            self.report.skipped_draws += render_scene(ctx, &pass, prefabs);

            debug!("Shadow map rendered for light {} ({:?})", light.id, light.light.kind);
            world
                .entity_mut(light.entity)
                .insert(ShadowMap { target, camera });
        }

        ctx.bind_render_target(None);
    }
}

/// Depth-only draw with the `shadow` program.
pub(crate) fn draw_mesh_depth(
    ctx: &mut dyn GraphicsContext,
    pass: &RenderPassContext,
    model: &Mat4,
    mesh: &crate::scene::Mesh,
) -> bool {
    let Some(program) = ctx.program("shadow") else {
        debug!("Missing shadow program, skipping {}", mesh.name);
        return false;
    };
    ctx.use_program(program);
    ctx.set_uniform("u_viewprojection", pass.camera.view_projection().into());
    ctx.set_uniform("u_camera_position", pass.camera.eye().into());
    ctx.set_uniform("u_model", (*model).into());
    ctx.draw(mesh);
    true
}

/// Bind a light's shadow map, matrix and bias if it casts shadows and its map
/// exists.
pub(crate) fn bind_light_shadow(ctx: &mut dyn GraphicsContext, light: &LightRef) {
    if !light.light.has_shadow {
        return;
    }
    let Some(shadow) = &light.shadow else {
        return;
    };
    let Some(depth) = shadow.target.depth else {
        return;
    };
    ctx.set_texture("shadowmap", depth, 8);
    ctx.set_uniform("u_shadow_viewproj", shadow.camera.view_projection().into());
    ctx.set_uniform("u_shadow_bias", light.light.shadow_bias.into());
}
