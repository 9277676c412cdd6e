use std::sync::Arc;

use bevy::app::{App, Startup};
use bevy::log::{info, warn, LogPlugin};
use bevy::math::{EulerRot, Mat4, Quat, UVec2, Vec3, Vec4};
use bevy::prelude::World;
use render_core::scene::{Aabb, AlphaMode};
use render_core::{
    set_sun, spawn_light, spawn_prefab, Camera, GraphicsBackend, Light, Material, Mesh, Node,
    Prefab, ProbeBakeRequest, RecordingContext, RenderMode, Renderer, RendererConfig,
    SceneRendererPlugin, ViewCamera,
};

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => RendererConfig::load(&path).unwrap_or_else(|e| {
            warn!("Could not load {}: {}, using defaults", path, e);
            RendererConfig::default()
        }),
        None => RendererConfig::default(),
    };

    let mut app = App::new();
    app.add_plugins(LogPlugin::default())
        .insert_resource(config)
        .add_plugins(SceneRendererPlugin)
        .insert_resource(GraphicsBackend(Box::new(RecordingContext::standard())))
        .insert_resource(ViewCamera {
            camera: Camera::perspective(
                Vec3::new(0.0, 40.0, 120.0),
                Vec3::ZERO,
                45.0,
                16.0 / 9.0,
                0.1,
                1000.0,
            ),
            viewport: UVec2::new(1280, 720),
        })
        .insert_resource(ProbeBakeRequest::all())
        .add_systems(Startup, setup);

    // Bakes, then the first frame in the configured mode.
    app.update();
    log_report(app.world(), "first frame");

    let mode = app.world().resource::<RendererConfig>().mode;
    app.world_mut().resource_mut::<RendererConfig>().mode = match mode {
        RenderMode::Deferred => RenderMode::Forward,
        RenderMode::Forward => RenderMode::Deferred,
    };
    app.update();
    log_report(app.world(), "mode toggled");
}

fn log_report(world: &World, label: &str) {
    let renderer = world.resource::<Renderer>();
    info!("{} ({:?}): {}", label, renderer.config.mode, renderer.report());
    info!(
        "Probes: {} irradiance, {} reflection; {} draws skipped",
        renderer.irradiance().map_or(0, |v| v.probes.len()),
        renderer.reflection_probes().len(),
        renderer.report().skipped_draws
    );
}

/// A floor, a tinted glass box and three lights.
fn setup(world: &mut World) {
    let cube = Arc::new(Mesh::new("cube", 36, Aabb::unit()));

    let floor = Arc::new(Prefab::new(
        "floor",
        Node::new("floor")
            .with_transform(Mat4::from_scale(Vec3::new(200.0, 1.0, 200.0)))
            .with_mesh(cube.clone(), Arc::new(Material::named("concrete"))),
    ));
    spawn_prefab(world, Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)), floor);

    let glass = Material {
        color: Vec4::new(0.4, 0.7, 1.0, 0.5),
        alpha_mode: AlphaMode::Blend,
        ..Material::named("glass")
    };
    let crate_prefab = Arc::new(Prefab::new(
        "crate",
        Node::new("crate")
            .with_mesh(cube.clone(), Arc::new(Material::named("wood")))
            .with_child(
                Node::new("window")
                    .with_transform(Mat4::from_translation(Vec3::Y * 2.0))
                    .with_mesh(cube, Arc::new(glass)),
            ),
    ));
    spawn_prefab(world, Mat4::from_scale(Vec3::splat(10.0)), crate_prefab);

    let sun_rotation = Quat::from_euler(EulerRot::YXZ, 0.6, -0.9, 0.0);
    let sun = spawn_light(
        world,
        Mat4::from_rotation_translation(sun_rotation, Vec3::new(0.0, 300.0, 0.0)),
        Light::directional(Vec3::new(1.0, 0.95, 0.85)).with_shadow(0.001),
    );
    set_sun(world, sun);

    spawn_light(
        world,
        Mat4::from_translation(Vec3::new(30.0, 20.0, 30.0)),
        Light::point(Vec3::new(1.0, 0.6, 0.3), 200.0),
    );
    spawn_light(
        world,
        Mat4::look_to_rh(Vec3::new(-40.0, 60.0, 0.0), Vec3::new(0.5, -1.0, 0.0), Vec3::Y).inverse(),
        Light::spot(Vec3::ONE, 250.0).with_shadow(0.002),
    );
}
