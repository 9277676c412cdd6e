//! Whole frames rendered through the wgpu backend. Skipped when the machine
//! has no GPU adapter.

use std::sync::Arc;

use bevy::math::{Mat4, UVec2, Vec3, Vec4};
use bevy::prelude::World;
use bevy::tasks::block_on;
use render_core::gpu::{
    GraphicsContext, ProgramSource, TextureKind, UniformKind, Vertex, WgpuContext,
};
use render_core::{
    spawn_light, spawn_prefab, Camera, Light, Material, Node, PassLabel, Prefab, RenderMode,
    Renderer, RendererConfig, SceneEnvironment,
};

const SIZE: UVec2 = UVec2::new(32, 32);

const FORWARD_WGSL: &str = r#"
struct Params {
    u_viewprojection: mat4x4<f32>,
    u_model: mat4x4<f32>,
    u_color: vec4<f32>,
    u_light_color: vec3<f32>,
};
@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.u_viewprojection * params.u_model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(params.u_color.rgb * params.u_light_color, 1.0);
}
"#;

const TONEMAP_WGSL: &str = r#"
struct Params {
    u_scale: f32,
};
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var lit: texture_2d<f32>;
@group(0) @binding(2) var lit_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(lit, lit_sampler, in.uv, 0.0);
    return vec4<f32>(color.rgb + vec3<f32>(params.u_scale, 0.0, 0.0), 1.0);
}
"#;

fn gpu_context() -> Option<WgpuContext> {
    match block_on(WgpuContext::headless(SIZE)) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

/// 36 vertices of the cube spanning ±1.
fn cube_vertices() -> Vec<Vertex> {
    let mut vertices = Vec::with_capacity(36);
    for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
        for sign in [1.0, -1.0] {
            let normal = axis * sign;
            let u = Vec3::new(axis.y, axis.z, axis.x);
            let v = normal.cross(u);
            let corner = |a: f32, b: f32| Vertex {
                position: (normal + u * a + v * b).to_array(),
                normal: normal.to_array(),
                uv: [(a + 1.0) * 0.5, (b + 1.0) * 0.5],
            };
            let quad = [
                corner(-1.0, -1.0),
                corner(1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, 1.0),
            ];
            vertices.extend(quad);
        }
    }
    vertices
}

fn assert_rgba(actual: Vec4, expected: Vec4) {
    assert!(
        (actual - expected).abs().max_element() <= 1.0 / 255.0,
        "{actual} != {expected}"
    );
}

#[test]
fn test_forward_frame_rasterizes_lit_cube_over_background() {
    let Some(mut ctx) = gpu_context() else {
        return;
    };
    ctx.register_program(
        "texture",
        ProgramSource::new(FORWARD_WGSL)
            .uniform("u_viewprojection", UniformKind::Mat4)
            .uniform("u_model", UniformKind::Mat4)
            .uniform("u_color", UniformKind::Vec4)
            .uniform("u_light_color", UniformKind::Vec3),
    )
    .unwrap();
    let cube = ctx.register_mesh("cube", &cube_vertices());

    let mut world = World::new();
    world.insert_resource(SceneEnvironment {
        background: Vec4::new(0.0, 0.0, 1.0, 1.0),
        ..Default::default()
    });
    let material = Material {
        color: Vec4::new(1.0, 0.5, 0.0, 1.0),
        two_sided: true,
        ..Material::named("orange")
    };
    let prefab = Prefab::new("cube", Node::new("cube").with_mesh(cube, Arc::new(material)));
    spawn_prefab(&mut world, Mat4::IDENTITY, Arc::new(prefab));
    spawn_light(&mut world, Mat4::IDENTITY, Light::directional(Vec3::ONE));

    let mut config = RendererConfig::default();
    config.mode = RenderMode::Forward;
    config.planar_reflection.enabled = false;
    let mut renderer = Renderer::new(config);
    let camera = Camera::perspective(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, 45.0, 1.0, 0.1, 100.0);
    let report = renderer.render_frame(&mut world, &mut ctx, &camera, SIZE);
    assert!(report.passes.contains(&PassLabel::ForwardPass));
    ctx.submit();

    let image = ctx.read_surface();
    assert_rgba(image.pixel_rgba(16, 16), Vec4::new(1.0, 0.5, 0.0, 1.0));
    assert_rgba(image.pixel_rgba(0, 0), Vec4::new(0.0, 0.0, 1.0, 1.0));
}

#[test]
fn test_deferred_frame_presents_tonemapped_illumination() {
    let Some(mut ctx) = gpu_context() else {
        return;
    };
    ctx.register_program(
        "tonemapper",
        ProgramSource::new(TONEMAP_WGSL)
            .uniform("u_scale", UniformKind::Float)
            .texture("u_texture", TextureKind::Float),
    )
    .unwrap();
    let targets_before = ctx.render_target_count();

    let mut world = World::new();
    let mut config = RendererConfig::default();
    config.mode = RenderMode::Deferred;
    config.tonemapper.enabled = true;
    config.tonemapper.scale = 0.5;
    let mut renderer = Renderer::new(config);
    let camera = Camera::perspective(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, 45.0, 1.0, 0.1, 100.0);
    let report = renderer.render_frame(&mut world, &mut ctx, &camera, SIZE);
    assert!(report.passes.contains(&PassLabel::TonemapPass));
    ctx.submit();

    // G-buffer, occlusion and illumination live on the device.
    assert!(ctx.render_target_count() >= targets_before + 3);
    // Illumination clears to black, the tonemapper adds its scale to red.
    let image = ctx.read_surface();
    assert_rgba(image.pixel_rgba(5, 27), Vec4::new(0.5, 0.0, 0.0, 1.0));
}
