//! Real-time scene renderer with forward and deferred pipelines.
//!
//! This crate provides:
//! - A world of prefab instances and lights stored in a bevy ECS `World`
//! - Shadow maps for directional, spot and point lights
//! - Forward per-light accumulation with planar reflections
//! - Deferred G-buffer, decals, SSAO and light-volume lighting
//! - Irradiance (spherical harmonics) and reflection cubemap probe bakes
//! - Tonemapping, volumetric scattering and debug views
//!
//! All GPU work goes through the [`gpu::GraphicsContext`] command stream.
//! [`gpu::WgpuContext`] executes it on a `wgpu` device and
//! [`gpu::RecordingContext`] records it for inspection.

pub mod camera;
pub mod config;
pub mod gpu;
pub mod probes;
pub mod renderer;
pub mod scene;

pub use camera::{Camera, Projection};
pub use config::{ConfigError, DebugView, RenderMode, RendererConfig};
pub use gpu::{GraphicsContext, RecordingContext, WgpuContext};
pub use renderer::{
    FrameReport, GraphicsBackend, PassLabel, ProbeBakeRequest, Renderer, SceneRendererPlugin,
    ViewCamera,
};
pub use scene::{
    set_sun, spawn_light, spawn_prefab, Light, LightKind, Material, Mesh, Node, Prefab,
    SceneEnvironment, SceneObject,
};
