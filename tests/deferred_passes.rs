use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use bevy::math::{Mat4, UVec2, Vec2, Vec3, Vec4};
use bevy::prelude::World;
use render_core::config::AssetNames;
use render_core::gpu::{
    ClearOps, Command, DrawBuffers, RecordingContext, RenderTarget, UniformValue,
};
use render_core::renderer::debug_quadrants;
use render_core::scene::{Aabb, ShadowMap};
use render_core::{
    set_sun, spawn_light, spawn_prefab, Camera, DebugView, Light, Material, Mesh, Node, PassLabel,
    Prefab, RenderMode, Renderer, RendererConfig, SceneEnvironment,
};
use wgpu::BlendState;

const VIEWPORT: UVec2 = UVec2::new(640, 360);

fn test_camera() -> Camera {
    Camera::perspective(
        Vec3::new(0.0, 5.0, 20.0),
        Vec3::ZERO,
        45.0,
        16.0 / 9.0,
        0.1,
        1000.0,
    )
}

fn sun_transform() -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, 100.0, 0.0)) * Mat4::from_rotation_x(-FRAC_PI_2)
}

fn box_prefab(ctx: &mut RecordingContext) -> Arc<Prefab> {
    let mesh = Arc::new(Mesh::new("box", 36, Aabb::unit()));
    let material = Material {
        color_texture: Some(ctx.register_texture("data/textures/brick.png")),
        ..Material::named("brick")
    };
    Arc::new(Prefab::new("box", Node::new("box").with_mesh(mesh, Arc::new(material))))
}

/// A box lit by a shadow-casting sun.
fn sunlit_scene(ctx: &mut RecordingContext) -> World {
    let mut world = World::new();
    let prefab = box_prefab(ctx);
    spawn_prefab(&mut world, Mat4::IDENTITY, prefab);
    let light = Light::directional(Vec3::ONE).with_shadow(0.001);
    let sun = spawn_light(&mut world, sun_transform(), light);
    assert!(set_sun(&mut world, sun));
    world
}

/// Reflection grid of two cubemaps, the first 10 units from the test camera.
fn nearby_reflection_grid(config: &mut RendererConfig) {
    config.reflection_grid.origin = [0.0, 5.0, 30.0];
    config.reflection_grid.step_x = 100.0;
    config.reflection_grid.count_x = 2;
    config.reflection_grid.count_z = 1;
    config.reflection_grid.resolution = 8;
}

fn target_labelled(ctx: &RecordingContext, wanted: &str) -> RenderTarget {
    ctx.commands()
        .iter()
        .find_map(|command| match command {
            Command::CreateRenderTarget { id, label, .. } if *label == wanted => {
                ctx.render_target(*id).cloned()
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("no {wanted} target created"))
}

fn position_of(passes: &[PassLabel], label: PassLabel) -> usize {
    passes
        .iter()
        .position(|p| *p == label)
        .unwrap_or_else(|| panic!("{label} not executed"))
}

#[test]
fn test_ssao_blur_ping_pongs_and_lighting_reads_second_buffer() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.ssao.blur = true;
    let mut renderer = Renderer::new(config);

    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    let ssao_pass = position_of(&report.passes, PassLabel::SsaoPass);
    assert!(ssao_pass < position_of(&report.passes, PassLabel::SsaoBlurPass));

    let a = target_labelled(&ctx, "ssao");
    let b = target_labelled(&ctx, "ssao_blur");
    let (a_color, b_color) = (a.color(0).unwrap(), b.color(0).unwrap());
    let texel = Vec2::new(1.0 / 640.0, 1.0 / 360.0);

    let blurs: Vec<_> = ctx.draws_with_program("blur").collect();
    assert_eq!(blurs.len(), 3);
    let expected = [(a_color, b.id, 1.0), (b_color, a.id, 2.0), (a_color, b.id, 4.0)];
    for (blur, (source, destination, scale)) in blurs.iter().zip(expected) {
        assert_eq!(blur.source, Some(source));
        assert_eq!(blur.textures.get("u_texture"), Some(&source));
        assert_eq!(blur.target, Some(destination));
        assert_eq!(blur.uniform("u_offset"), Some(&UniformValue::Vec2(texel * Vec2::splat(scale))));
    }

    let lights: Vec<_> = ctx.draws_with_program("deferred").collect();
    assert_eq!(lights.len(), 1);
    assert_eq!(lights[0].textures.get("u_ssao"), Some(&b_color));
}

#[test]
fn test_gbuffer_clears_background_into_albedo_only() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let background = Vec4::new(0.2, 0.4, 0.6, 1.0);
    let environment = SceneEnvironment {
        background,
        ..world.resource::<SceneEnvironment>().clone()
    };
    world.insert_resource(environment);

    let mut renderer = Renderer::default();
    renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);

    let gbuffer = target_labelled(&ctx, "gbuffer");
    assert_eq!(gbuffer.color.len(), 3);
    let commands = ctx.commands();
    let bind = commands
        .iter()
        .position(|c| *c == Command::BindRenderTarget(Some(gbuffer.id)))
        .expect("gbuffer bound");
    let clears: Vec<&Command> = commands[bind..]
        .iter()
        .filter(|c| matches!(c, Command::SetDrawBuffers(_) | Command::Clear(_)))
        .take(7)
        .collect();
    let black = Vec4::new(0.0, 0.0, 0.0, 1.0);
    assert_eq!(
        clears,
        [
            &Command::SetDrawBuffers(DrawBuffers::Single(0)),
            &Command::Clear(ClearOps::color_and_depth(background)),
            &Command::SetDrawBuffers(DrawBuffers::Single(1)),
            &Command::Clear(ClearOps::color(black)),
            &Command::SetDrawBuffers(DrawBuffers::Single(2)),
            &Command::Clear(ClearOps::color(black)),
            &Command::SetDrawBuffers(DrawBuffers::All),
        ]
    );

    let geometry: Vec<_> = ctx.draws_with_program("multi").collect();
    assert_eq!(geometry.len(), 1);
    assert_eq!(geometry[0].target, Some(gbuffer.id));
    assert_eq!(geometry[0].draw_buffers, DrawBuffers::All);
}

#[test]
fn test_decal_writes_albedo_while_gbuffer_is_bound() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut renderer = Renderer::default();
    assert!(renderer.config.decal.enabled);

    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    let decal_pass = position_of(&report.passes, PassLabel::DecalPass);
    assert!(position_of(&report.passes, PassLabel::GBufferPass) < decal_pass);
    assert!(decal_pass < position_of(&report.passes, PassLabel::SsaoPass));

    let gbuffer = target_labelled(&ctx, "gbuffer");
    let decals: Vec<_> = ctx.draws_with_program("decal").collect();
    assert_eq!(decals.len(), 1);
    let decal = decals[0];
    assert_eq!(decal.target, Some(gbuffer.id));
    assert_eq!(decal.draw_buffers, DrawBuffers::Single(0));
    assert_eq!(decal.state.blend, Some(BlendState::ALPHA_BLENDING));
    assert!(!decal.state.depth_write);
    assert_eq!(decal.textures.get("u_depth_texture"), gbuffer.depth.as_ref());
    assert_eq!(decal.mesh.as_deref(), Some(AssetNames::default().cube_mesh.as_str()));

    // All attachments are writable again once the decal is down.
    let commands = ctx.commands();
    let drawn = commands
        .iter()
        .position(|c| matches!(c, Command::Draw { program: Some(p), .. } if p == "decal"))
        .expect("decal drawn");
    assert_eq!(commands[drawn + 1], Command::SetDrawBuffers(DrawBuffers::All));

    renderer.config.decal.enabled = false;
    ctx.clear_log();
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    assert!(!report.contains(PassLabel::DecalPass));
    assert_eq!(ctx.draws_with_program("decal").count(), 0);
}

#[test]
fn test_post_process_runs_tonemap_then_volumetric_then_reflections() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.volumetric.enabled = true;
    config.reflections.enabled = true;
    nearby_reflection_grid(&mut config);
    let mut renderer = Renderer::new(config);
    renderer.bake_reflections(&mut world, &mut ctx);
    ctx.clear_log();

    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    let present = position_of(&report.passes, PassLabel::Present);
    let tonemap = position_of(&report.passes, PassLabel::TonemapPass);
    let volumetric = position_of(&report.passes, PassLabel::VolumetricPass);
    let reflections = position_of(&report.passes, PassLabel::ReflectionPass);
    assert!(present < tonemap && tonemap < volumetric && volumetric < reflections);

    let draw_index = |program: &str| {
        ctx.draws()
            .iter()
            .position(|d| d.is_program(program))
            .unwrap_or_else(|| panic!("{program} not drawn"))
    };
    assert!(draw_index("tonemapper") < draw_index("volumetric_directional"));
    assert!(draw_index("volumetric_directional") < draw_index("deferred_reflections"));

    let tonemap = ctx.draws_with_program("tonemapper").next().expect("tonemap blit");
    assert_eq!(tonemap.uniform("u_igamma"), Some(&UniformValue::Float(1.0 / 2.2)));
    assert_eq!(tonemap.target, None);
}

#[test]
fn test_gbuffer_debug_view_replaces_post_process() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.volumetric.enabled = true;
    config.reflections.enabled = true;
    config.debug.view = DebugView::GBuffers;
    nearby_reflection_grid(&mut config);
    let mut renderer = Renderer::new(config);
    renderer.bake_reflections(&mut world, &mut ctx);
    ctx.clear_log();

    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    assert!(report.contains(PassLabel::GBufferDebugView));
    for label in [PassLabel::TonemapPass, PassLabel::VolumetricPass, PassLabel::ReflectionPass] {
        assert!(!report.contains(label), "{label} ran under the debug view");
    }

    let gbuffer = target_labelled(&ctx, "gbuffer");
    let ssao = target_labelled(&ctx, "ssao");
    let illumination = target_labelled(&ctx, "illumination");
    let surface: Vec<_> = ctx.draws().iter().filter(|d| d.target.is_none()).collect();
    assert_eq!(surface.len(), 5);
    assert_eq!(surface[0].source, illumination.color(0));

    let quadrants = debug_quadrants(VIEWPORT);
    let sources = [gbuffer.color(0), gbuffer.color(1), ssao.color(0), gbuffer.depth];
    for ((draw, viewport), source) in surface[1..].iter().zip(quadrants).zip(sources) {
        assert_eq!(draw.viewport, Some(viewport));
        assert_eq!(draw.source, source);
    }
    assert!(surface[4].is_program("depth"));
    assert_eq!(
        surface[4].uniform("u_camera_nearfar"),
        Some(&UniformValue::Vec2(Vec2::new(0.1, 1000.0)))
    );
}

#[test]
fn test_irradiance_debug_view_shows_coefficient_texture() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.debug.view = DebugView::IrradianceTexture;
    config.irradiance_grid.dims = [2, 1, 2];
    config.irradiance_grid.capture_resolution = 4;
    let mut renderer = Renderer::new(config);

    // Nothing baked yet: the regular chain runs.
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    assert!(!report.contains(PassLabel::IrradianceDebugView));
    assert!(report.contains(PassLabel::TonemapPass));

    renderer.bake_irradiance(&mut world, &mut ctx);
    let texture = renderer.irradiance().map(|v| v.texture);
    ctx.clear_log();
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    assert!(report.contains(PassLabel::IrradianceDebugView));
    assert!(!report.contains(PassLabel::TonemapPass));
    assert_eq!(ctx.draws_with_program("tonemapper").count(), 0);

    let last = ctx.draws().last().expect("debug blit");
    assert_eq!(last.source, texture);
    assert_eq!(last.target, None);
}

#[test]
fn test_volumetric_needs_shadow_casting_sun() {
    let mut config = RendererConfig::default();
    config.volumetric.enabled = true;

    // A sun without a shadow map.
    let mut ctx = RecordingContext::standard();
    let mut world = World::new();
    let prefab = box_prefab(&mut ctx);
    spawn_prefab(&mut world, Mat4::IDENTITY, prefab);
    let sun = spawn_light(&mut world, sun_transform(), Light::directional(Vec3::ONE));
    assert!(set_sun(&mut world, sun));
    let mut renderer = Renderer::new(config.clone());
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    assert!(!report.contains(PassLabel::VolumetricPass));

    // A shadow caster that is not the sun.
    let mut ctx = RecordingContext::standard();
    let mut world = World::new();
    let prefab = box_prefab(&mut ctx);
    spawn_prefab(&mut world, Mat4::IDENTITY, prefab);
    spawn_light(&mut world, sun_transform(), Light::directional(Vec3::ONE).with_shadow(0.001));
    let mut renderer = Renderer::new(config.clone());
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    assert!(report.contains(PassLabel::ShadowPass));
    assert!(!report.contains(PassLabel::VolumetricPass));
    assert_eq!(ctx.draws_with_program("volumetric_directional").count(), 0);

    // A shadow-casting sun.
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut renderer = Renderer::new(config);
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    assert!(report.contains(PassLabel::VolumetricPass));

    let sun = world.resource::<SceneEnvironment>().sun.expect("sun set");
    let shadow_depth = world.get::<ShadowMap>(sun).and_then(|s| s.target.depth);
    let draws: Vec<_> = ctx.draws_with_program("volumetric_directional").collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].textures.get("shadowmap"), shadow_depth.as_ref());
    let scattering = target_labelled(&ctx, "volumetric");
    assert_eq!(scattering.size, VIEWPORT / 4);
    assert_eq!(draws[0].target, Some(scattering.id));

    // The scattering buffer is alpha blended over the frame.
    let composite = ctx
        .draws()
        .iter()
        .find(|d| d.source == scattering.color(0))
        .expect("scattering composited");
    assert_eq!(composite.target, None);
    assert_eq!(composite.state.blend, Some(BlendState::ALPHA_BLENDING));
}

#[test]
fn test_reflection_overlay_prefers_nearest_cubemap() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.reflections.enabled = true;
    nearby_reflection_grid(&mut config);
    let mut renderer = Renderer::new(config);
    renderer.bake_reflections(&mut world, &mut ctx);
    let probes = renderer.reflection_probes().probes.clone();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].position, Vec3::new(0.0, 5.0, 30.0));

    let overlay_cubemap = |ctx: &RecordingContext| {
        ctx.draws_with_program("deferred_reflections")
            .next()
            .and_then(|d| d.textures.get("u_environment_texture").copied())
    };
    let camera_at = |eye: Vec3| Camera::perspective(eye, Vec3::ZERO, 45.0, 16.0 / 9.0, 0.1, 1000.0);

    ctx.clear_log();
    renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    assert_eq!(overlay_cubemap(&ctx), Some(probes[0].cubemap));
    let overlay = ctx.draws_with_program("deferred_reflections").next().expect("overlay drawn");
    assert_eq!(overlay.state.blend, Some(BlendState::ALPHA_BLENDING));

    // Next to the second cubemap.
    ctx.clear_log();
    renderer.render_frame(&mut world, &mut ctx, &camera_at(Vec3::new(95.0, 5.0, 30.0)), VIEWPORT);
    assert_eq!(overlay_cubemap(&ctx), Some(probes[1].cubemap));

    // Out of range of both: the global environment.
    ctx.clear_log();
    renderer.render_frame(&mut world, &mut ctx, &camera_at(Vec3::new(0.0, 500.0, 500.0)), VIEWPORT);
    let environment = ctx.register_texture(&AssetNames::default().environment);
    assert_eq!(overlay_cubemap(&ctx), Some(environment));
}

#[test]
fn test_reflections_without_baked_cubemaps_draw_nothing() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.reflections.enabled = true;
    let mut renderer = Renderer::new(config);

    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    assert!(!report.contains(PassLabel::ReflectionPass));
    assert_eq!(ctx.draws_with_program("deferred_reflections").count(), 0);
}

#[test]
fn test_planar_mirror_skips_reflective_surfaces() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let floor = Material {
        planar_reflection: true,
        ..Material::named("water")
    };
    let mesh = Arc::new(Mesh::new("floor", 6, Aabb::unit()));
    let water = Prefab::new("water", Node::new("water").with_mesh(mesh, Arc::new(floor)));
    spawn_prefab(&mut world, Mat4::IDENTITY, Arc::new(water));

    let mut config = RendererConfig::default();
    config.mode = RenderMode::Forward;
    config.planar_reflection.enabled = true;
    config.planar_reflection.resolution = 256;
    let mut renderer = Renderer::new(config);
    let report = renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT).clone();
    let mirror_pass = position_of(&report.passes, PassLabel::PlanarReflectionPass);
    assert!(mirror_pass < position_of(&report.passes, PassLabel::ForwardPass));

    let mirror = target_labelled(&ctx, "planar_reflection");
    assert_eq!(mirror.size, UVec2::splat(256));
    let mirror_texture = mirror.color(0).expect("mirror color attachment");

    // The mirror view draws the box but never the reflective floor.
    let in_mirror: Vec<_> = ctx.mesh_draws().filter(|d| d.target == Some(mirror.id)).collect();
    assert!(in_mirror.iter().any(|d| d.is_program("texture") && d.mesh.as_deref() == Some("box")));
    assert!(in_mirror.iter().all(|d| d.mesh.as_deref() != Some("floor")));
    assert!(ctx.commands().contains(&Command::GenerateMipmaps(mirror_texture)));

    let planar: Vec<_> = ctx.draws_with_program("planar_reflection").collect();
    assert_eq!(planar.len(), 1);
    assert_eq!(planar[0].target, None);
    assert_eq!(planar[0].mesh.as_deref(), Some("floor"));
    assert_eq!(planar[0].textures.get("u_texture"), Some(&mirror_texture));
}

#[test]
fn test_irradiance_uniforms_reach_deferred_lighting_after_bake() {
    let mut ctx = RecordingContext::standard();
    let mut world = sunlit_scene(&mut ctx);
    let mut config = RendererConfig::default();
    config.irradiance_grid.dims = [2, 1, 2];
    config.irradiance_grid.capture_resolution = 4;
    let mut renderer = Renderer::new(config);

    renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);
    let before = ctx.draws_with_program("deferred").next().expect("light drawn");
    assert_eq!(before.uniform("u_irradiance"), Some(&UniformValue::Bool(false)));
    assert!(!before.textures.contains_key("u_probes_texture"));

    renderer.bake_irradiance(&mut world, &mut ctx);
    let texture = renderer.irradiance().map(|v| v.texture).expect("baked volume");
    ctx.clear_log();
    renderer.render_frame(&mut world, &mut ctx, &test_camera(), VIEWPORT);

    let after = ctx.draws_with_program("deferred").next().expect("light drawn");
    assert_eq!(after.uniform("u_irradiance"), Some(&UniformValue::Bool(true)));
    assert_eq!(after.textures.get("u_probes_texture"), Some(&texture));
    assert_eq!(after.uniform("u_irr_dims"), Some(&UniformValue::Vec3(Vec3::new(2.0, 1.0, 2.0))));
    assert_eq!(after.uniform("u_num_probes"), Some(&UniformValue::Float(4.0)));
}
