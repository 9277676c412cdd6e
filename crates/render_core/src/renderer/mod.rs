//! Scene renderer: shadow, forward and deferred pipelines plus probe bakes.
//!
//! ## Frame Overview
//!
//! ```text
//! ┌─────────────────┐
//! │   Shadow Pass   │  ← depth from every shadow-casting light
//! └────────┬────────┘
//!          │
//!    ┌─────┴──────────────────────┐
//!    │ Forward                    │ Deferred
//! ┌──▼──────────────┐   ┌─────────▼───────┐
//! │ Planar mirror   │   │ G-Buffer + Decal│
//! │ Per-light blend │   │ SSAO (+ blur)   │
//! │ Probe overlays  │   │ Light volumes   │
//! └─────────────────┘   │ Post-process    │
//!                       └─────────────────┘
//! ```
//!
//! Every pass is a sequence of commands on a [`GraphicsContext`]. The passes
//! that ran in the last frame or bake are listed in [`FrameReport`].

mod bake;
mod context;
mod decal;
mod forward;
mod gbuffer;
mod labels;
mod lighting;
mod planar;
mod plugin;
mod post_process;
mod shadow;
mod skybox;
mod ssao;
mod targets;
mod traversal;

pub use context::*;
pub use decal::decal_transform;
pub use forward::forward_blend;
pub use labels::*;
pub use lighting::{light_volume_state, light_volume_transform};
pub use planar::mirrored_camera;
pub use plugin::*;
pub use post_process::debug_quadrants;
pub use shadow::{light_camera, shadow_pipeline_state};
pub use ssao::{generate_sphere_points, ssao_kernel};
pub use targets::*;
pub use traversal::traverse;

use bevy::log::{debug, warn_once};
use bevy::math::{UVec2, Vec3};
use bevy::prelude::{Resource, World};

use crate::camera::Camera;
use crate::config::{RenderMode, RendererConfig};
use crate::gpu::GraphicsContext;
use crate::probes::{IrradianceVolume, ReflectionProbeSet};
use crate::scene::{
    sun_light, visible_lights, visible_prefabs, LightRef, PrefabRef, SceneEnvironment,
};

/// Shader programs the renderer looks up by name.
pub const PROGRAM_NAMES: [&str; 16] = [
    "texture",
    "planar_reflection",
    "shadow",
    "multi",
    "skybox",
    "decal",
    "ssao",
    "blur",
    "deferred",
    "deferred_ws",
    "depth",
    "tonemapper",
    "volumetric_directional",
    "deferred_reflections",
    "probe",
    "ref_probes",
];

/// Everything one frame reads, snapshotted from the world before any pass.
pub(crate) struct FrameInputs<'a> {
    pub camera: &'a Camera,
    pub viewport: UVec2,
    pub prefabs: &'a [PrefabRef],
    pub lights: &'a [LightRef],
    pub environment: &'a SceneEnvironment,
    pub sun: Option<LightRef>,
}

/// Renderer state that persists across frames: offscreen targets, the SSAO
/// kernel and the baked probe sets.
#[derive(Resource)]
pub struct Renderer {
    pub config: RendererConfig,
    pub(crate) targets: FrameTargets,
    pub(crate) ssao_kernel: Vec<Vec3>,
    pub(crate) irradiance: Option<IrradianceVolume>,
    pub(crate) reflections: ReflectionProbeSet,
    pub(crate) report: FrameReport,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        let ssao_kernel = ssao_kernel(&config.ssao);
        Self {
            config,
            targets: FrameTargets::default(),
            ssao_kernel,
            irradiance: None,
            reflections: ReflectionProbeSet::default(),
            report: FrameReport::default(),
        }
    }

    /// Replace the configuration. The SSAO kernel is regenerated only when its
    /// settings changed; baked probes are kept until the next bake.
    pub fn set_config(&mut self, config: RendererConfig) {
        if config.ssao != self.config.ssao {
            self.ssao_kernel = ssao_kernel(&config.ssao);
        }
        self.config = config;
    }

    pub fn irradiance(&self) -> Option<&IrradianceVolume> {
        self.irradiance.as_ref()
    }

    pub fn reflection_probes(&self) -> &ReflectionProbeSet {
        &self.reflections
    }

    /// Passes executed by the last frame or bake.
    pub fn report(&self) -> &FrameReport {
        &self.report
    }

    pub fn ssao_kernel(&self) -> &[Vec3] {
        &self.ssao_kernel
    }

    /// Render one frame of `world` as seen by `camera` into the presentation
    /// surface of `ctx`.
    pub fn render_frame(
        &mut self,
        world: &mut World,
        ctx: &mut dyn GraphicsContext,
        camera: &Camera,
        viewport: UVec2,
    ) -> &FrameReport {
        self.report.clear();
        if viewport.x == 0 || viewport.y == 0 {
            warn_once!("Zero-sized viewport, nothing rendered");
            return &self.report;
        }

        let environment = world.get_resource::<SceneEnvironment>().cloned().unwrap_or_default();
        let prefabs = visible_prefabs(world);
        self.render_shadow_maps(world, ctx, &prefabs, &environment);

        // Read lights after the shadow pass so they carry their shadow maps.
        let lights = visible_lights(world);
        let sun = sun_light(world);
        let frame = FrameInputs {
            camera,
            viewport,
            prefabs: &prefabs,
            lights: &lights,
            environment: &environment,
            sun,
        };

        match self.config.mode {
            RenderMode::Forward => self.render_forward(ctx, &frame),
            RenderMode::Deferred => self.render_deferred(ctx, &frame),
        }
        debug!("Frame: {}", self.report);
        &self.report
    }
}
