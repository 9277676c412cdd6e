//! Forward rendering: one draw per mesh per visible light.
//!
//! The first light uses the material's own blending (none for opaque and
//! masked, alpha blending for blended materials); every later light adds its
//! contribution with `src_alpha, one`. Depth compares with less-or-equal so
//! the repeated draws land on the depth written by the first.

use bevy::log::debug;
use bevy::math::{Mat4, UVec2};
use wgpu::{BlendState, CompareFunction, Face};

use super::context::{PassKind, PlanarSource, RenderPassContext};
use super::shadow::bind_light_shadow;
use super::traversal::render_scene;
use super::{FrameInputs, PassLabel, Renderer};
use crate::camera::Camera;
use crate::gpu::{
    ClearOps, GraphicsContext, PipelineState, RenderTargetId, Viewport, ALPHA_ADDITIVE_BLENDING,
};
use crate::scene::{AlphaMode, LightRef, Material, Mesh, PrefabRef, SceneEnvironment};

/// Culling for a material: none when two-sided.
pub(crate) fn material_cull_mode(material: &Material) -> Option<Face> {
    if material.two_sided {
        None
    } else {
        Some(Face::Back)
    }
}

/// Blending for the `light_index`-th light of a forward draw.
pub fn forward_blend(material: &Material, light_index: usize) -> Option<BlendState> {
    if light_index > 0 {
        return Some(ALPHA_ADDITIVE_BLENDING);
    }
    match material.alpha_mode {
        AlphaMode::Blend => Some(BlendState::ALPHA_BLENDING),
        AlphaMode::Opaque | AlphaMode::Mask => None,
    }
}

/// A scene render from one camera into an already bound target.
pub(crate) struct ForwardView<'a> {
    pub camera: &'a Camera,
    pub target_size: UVec2,
    pub prefabs: &'a [PrefabRef],
    pub lights: &'a [LightRef],
    pub environment: &'a SceneEnvironment,
    pub planar: PlanarSource,
}

impl Renderer {
    /// Forward frame onto the presentation surface.
    pub(crate) fn render_forward(&mut self, ctx: &mut dyn GraphicsContext, frame: &FrameInputs) {
        let planar = if self.config.planar_reflection.enabled {
            self.render_planar_reflection(ctx, frame)
        } else {
            PlanarSource::Disabled
        };

        self.report.push(PassLabel::ForwardPass);
        ctx.bind_render_target(None);
        ctx.set_viewport(Viewport::full(frame.viewport));
        ctx.clear(ClearOps::color_and_depth(frame.environment.background));

        let view = ForwardView {
            camera: frame.camera,
            target_size: frame.viewport,
            prefabs: frame.prefabs,
            lights: frame.lights,
            environment: frame.environment,
            planar,
        };
        self.render_forward_view(ctx, &view);

        self.render_probe_overlays(ctx, frame.camera);
    }

    /// Skybox then every visible prefab, lit by `view.lights`. Used by the
    /// forward frame, the planar mirror and both probe bakes.
    pub(crate) fn render_forward_view(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        view: &ForwardView,
    ) {
        self.draw_skybox(ctx, view.camera);

        let pass = RenderPassContext {
            kind: PassKind::Forward,
            camera: view.camera,
            target_size: view.target_size,
            lights: view.lights,
            environment: view.environment,
            planar: view.planar,
        };
        self.report.skipped_draws += render_scene(ctx, &pass, view.prefabs);
    }

    /// Bind `target`, clear it to opaque black and render a forward view.
    pub(crate) fn capture_forward_view(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        target: RenderTargetId,
        view: &ForwardView,
    ) {
        ctx.bind_render_target(Some(target));
        ctx.set_viewport(Viewport::full(view.target_size));
        ctx.set_pipeline_state(&PipelineState::default());
        ctx.clear(ClearOps::color_and_depth(bevy::math::Vec4::new(0.0, 0.0, 0.0, 1.0)));
        self.render_forward_view(ctx, view);
    }
}

/// Forward draw of one mesh, once per light.
pub(crate) fn draw_mesh_forward(
    ctx: &mut dyn GraphicsContext,
    pass: &RenderPassContext,
    model: &Mat4,
    mesh: &Mesh,
    material: &Material,
) -> bool {
    let (program_name, planar_texture) = if material.planar_reflection {
        match pass.planar {
            PlanarSource::Mirror => return true,
            PlanarSource::Texture(texture) => ("planar_reflection", Some(texture)),
            PlanarSource::Disabled => ("planar_reflection", None),
        }
    } else {
        ("texture", None)
    };

    let Some(program) = ctx.program(program_name) else {
        debug!("Missing {} program, skipping {}", program_name, mesh.name);
        return false;
    };

    if pass.lights.is_empty() {
        return true;
    }

    ctx.use_program(program);
    ctx.set_uniform("u_iRes", pass.inverse_resolution().into());
    ctx.set_uniform("u_viewprojection", pass.camera.view_projection().into());
    ctx.set_uniform("u_camera_position", pass.camera.eye().into());
    ctx.set_uniform("u_model", (*model).into());
    material.set_uniforms(ctx);
    if let Some(texture) = planar_texture {
        ctx.set_texture("u_texture", texture, 0);
    }

    for (i, light) in pass.lights.iter().enumerate() {
        ctx.set_pipeline_state(&PipelineState {
            blend: forward_blend(material, i),
            depth_compare: Some(CompareFunction::LessEqual),
            depth_write: true,
            cull_mode: material_cull_mode(material),
            ..PipelineState::default()
        });
        bind_light_shadow(ctx, light);
        light.light.set_uniforms(ctx, &light.model);
        ctx.draw(mesh);
    }
    true
}
