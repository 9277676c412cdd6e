//! Bevy app integration.
//!
//! The renderer runs as one exclusive `PostUpdate` system: pending probe bakes
//! first, then a frame for the [`ViewCamera`].

use bevy::app::{App, Plugin, PostUpdate};
use bevy::log::{info, warn_once};
use bevy::math::UVec2;
use bevy::prelude::{Resource, World};

use super::Renderer;
use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::gpu::GraphicsContext;
use crate::scene::SceneEnvironment;

/// The graphics backend frames are submitted to.
#[derive(Resource)]
pub struct GraphicsBackend(pub Box<dyn GraphicsContext>);

/// Camera and viewport size of the presented view.
#[derive(Resource, Clone, Debug)]
pub struct ViewCamera {
    pub camera: Camera,
    pub viewport: UVec2,
}

/// Bakes to run before the next frame. Flags are cleared once serviced.
#[derive(Resource, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeBakeRequest {
    pub irradiance: bool,
    pub reflections: bool,
}

impl ProbeBakeRequest {
    pub fn all() -> Self {
        Self {
            irradiance: true,
            reflections: true,
        }
    }
}

/// Plugin that renders the scene world every frame.
///
/// ## Usage
///
/// ```rust,ignore
/// app.add_plugins(SceneRendererPlugin);
/// app.insert_resource(GraphicsBackend(Box::new(RecordingContext::standard())));
/// app.insert_resource(ViewCamera { camera, viewport: UVec2::new(1280, 720) });
/// ```
pub struct SceneRendererPlugin;

impl Plugin for SceneRendererPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RendererConfig>();
        app.init_resource::<SceneEnvironment>();
        app.init_resource::<ProbeBakeRequest>();

        let config = app.world().resource::<RendererConfig>().clone();
        app.insert_resource(Renderer::new(config));

        app.add_systems(PostUpdate, render_scene_system);
        info!("SceneRendererPlugin initialized");
    }
}

/// Exclusive system: sync config, service bakes, render the view.
pub fn render_scene_system(world: &mut World) {
    let Some(mut backend) = world.remove_resource::<GraphicsBackend>() else {
        warn_once!("No GraphicsBackend resource, scene not rendered");
        return;
    };
    let Some(mut renderer) = world.remove_resource::<Renderer>() else {
        world.insert_resource(backend);
        return;
    };

    if let Some(config) = world.get_resource::<RendererConfig>() {
        if *config != renderer.config {
            renderer.set_config(config.clone());
        }
    }

    let request = world
        .get_resource_mut::<ProbeBakeRequest>()
        .map(|mut request| std::mem::take(&mut *request))
        .unwrap_or_default();
    let ctx = backend.0.as_mut();
    if request.irradiance {
        renderer.bake_irradiance(world, ctx);
    }
    if request.reflections {
        renderer.bake_reflections(world, ctx);
    }

    match world.get_resource::<ViewCamera>().cloned() {
        Some(view) => {
            renderer.render_frame(world, ctx, &view.camera, view.viewport);
        }
        None => warn_once!("No ViewCamera resource, frame skipped"),
    }
    ctx.submit();

    world.insert_resource(renderer);
    world.insert_resource(backend);
}
