//! Probe bakes: irradiance SH grid and reflection cubemaps.
//!
//! Both bakes re-run the forward pass from each probe position, one capture
//! per cubemap face, and discard the previous probe set before rebuilding.
//! They are blocking and must run between frames.

use bevy::log::{debug, info, warn};
use bevy::math::UVec2;
use bevy::prelude::World;
use wgpu::FilterMode;

use super::context::PlanarSource;
use super::forward::ForwardView;
use super::targets::{capture_descriptor, ensure_allocated, CAPTURE_FORMAT};
use super::{FrameReport, PassLabel, Renderer};
use crate::camera::Camera;
use crate::gpu::{GraphicsContext, TextureDescriptor};
use crate::probes::{
    compute_sh, CubeFace, IrradianceProbe, IrradianceVolume, ProbeGrid, ReflectionProbe,
    ReflectionProbeSet, MAX_PROBES, PROBE_TEXTURE_FORMAT,
};
use crate::scene::{visible_lights, visible_prefabs, SceneEnvironment};

/// 90° square capture camera shared by both bakes.
fn capture_camera() -> Camera {
    let mut camera = Camera::default();
    camera.set_perspective(90.0, 1.0, 0.1, 1000.0);
    camera
}

impl Renderer {
    /// Capture the scene from every irradiance grid cell and upload the SH
    /// coefficients as a `9 × N` texture.
    pub fn bake_irradiance(
        &mut self,
        world: &mut World,
        ctx: &mut dyn GraphicsContext,
    ) -> &FrameReport {
        self.report.clear();
        if let Some(old) = self.irradiance.take() {
            ctx.destroy_texture(old.texture);
        }

        let grid = ProbeGrid::from_settings(&self.config.irradiance_grid);
        if grid.is_empty() {
            debug!("Irradiance grid has no cells, bake skipped");
            return &self.report;
        }
        if grid.len() > MAX_PROBES {
            warn!("Irradiance grid of {} probes exceeds {}, bake skipped", grid.len(), MAX_PROBES);
            return &self.report;
        }

        let environment = world.get_resource::<SceneEnvironment>().cloned().unwrap_or_default();
        let prefabs = visible_prefabs(world);
        self.render_shadow_maps(world, ctx, &prefabs, &environment);
        let lights = visible_lights(world);
        self.report.push(PassLabel::IrradianceBake);

        let size = UVec2::splat(self.config.irradiance_grid.capture_resolution.max(1));
        let target = ensure_allocated(
            ctx,
            &mut self.targets.irradiance_capture,
            &capture_descriptor("irradiance_capture", size),
        );

        let mut camera = capture_camera();
        let mut probes = Vec::with_capacity(grid.len());
        for cell in grid.cells() {
            let position = grid.position(cell);
            let faces = CubeFace::ALL.map(|face| {
                let (direction, up) = face.orientation();
                camera.look_at(position, position + direction, up);
                let view = ForwardView {
                    camera: &camera,
                    target_size: size,
                    prefabs: &prefabs,
                    lights: &lights,
                    environment: &environment,
                    planar: PlanarSource::Disabled,
                };
                self.capture_forward_view(ctx, target.id, &view);
                ctx.read_color(target.id, 0)
            });
            probes.push(IrradianceProbe {
                cell,
                index: grid.linear_index(cell),
                position,
                sh: compute_sh(&faces),
            });
        }
        ctx.bind_render_target(None);

        let texels = IrradianceVolume::texels(&grid, &probes);
        let texture = ctx.create_texture(&TextureDescriptor {
            label: "irradiance_probes",
            size: IrradianceVolume::texture_size(grid.len()),
            format: PROBE_TEXTURE_FORMAT,
            cubemap: false,
            mipmaps: false,
        });
        ctx.upload_texture(texture, bytemuck::cast_slice(&texels));
        ctx.set_texture_filter(texture, FilterMode::Nearest, FilterMode::Nearest);

        info!("Irradiance bake complete: {} probes", probes.len());
        self.irradiance = Some(IrradianceVolume {
            grid,
            probes,
            texture,
            normal_distance: self.config.irradiance_grid.normal_distance,
        });
        &self.report
    }

    /// Capture one mipmapped cubemap per reflection grid position.
    pub fn bake_reflections(
        &mut self,
        world: &mut World,
        ctx: &mut dyn GraphicsContext,
    ) -> &FrameReport {
        self.report.clear();
        self.reflections.release(ctx);

        let positions = ReflectionProbeSet::layout(&self.config.reflection_grid);
        if positions.is_empty() {
            debug!("Reflection grid has no probes, bake skipped");
            return &self.report;
        }

        let environment = world.get_resource::<SceneEnvironment>().cloned().unwrap_or_default();
        let prefabs = visible_prefabs(world);
        self.render_shadow_maps(world, ctx, &prefabs, &environment);
        let lights = visible_lights(world);
        self.report.push(PassLabel::ReflectionBake);

        let size = UVec2::splat(self.config.reflection_grid.resolution.max(1));
        let target = ensure_allocated(
            ctx,
            &mut self.targets.reflection_capture,
            &capture_descriptor("reflection_capture", size),
        );

        let mut camera = capture_camera();
        for position in positions {
            let cubemap = ctx.create_texture(&TextureDescriptor {
                label: "reflection_probe",
                size,
                format: CAPTURE_FORMAT,
                cubemap: true,
                mipmaps: true,
            });
            for face in CubeFace::ALL {
                let (direction, up) = face.orientation();
                camera.look_at(position, position + direction, up);
                ctx.attach_cubemap_face(target.id, cubemap, face);
                let view = ForwardView {
                    camera: &camera,
                    target_size: size,
                    prefabs: &prefabs,
                    lights: &lights,
                    environment: &environment,
                    planar: PlanarSource::Disabled,
                };
                self.capture_forward_view(ctx, target.id, &view);
            }
            ctx.bind_render_target(None);
            ctx.generate_mipmaps(cubemap);
            self.reflections.probes.push(ReflectionProbe { position, cubemap });
        }

        info!("Reflection bake complete: {} probes", self.reflections.len());
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::gpu::RecordingContext;

    fn small_config() -> RendererConfig {
        let mut config = RendererConfig::default();
        config.irradiance_grid.dims = [2, 1, 2];
        config.irradiance_grid.capture_resolution = 4;
        config.reflection_grid.count_x = 2;
        config.reflection_grid.count_z = 1;
        config.reflection_grid.resolution = 8;
        config
    }

    #[test]
    fn test_irradiance_bake_replaces_texture() {
        let mut world = World::new();
        let mut ctx = RecordingContext::standard();
        let mut renderer = Renderer::new(small_config());

        renderer.bake_irradiance(&mut world, &mut ctx);
        let first = renderer.irradiance().map(|v| v.texture);
        assert_eq!(renderer.irradiance().map(|v| v.probes.len()), Some(4));
        assert!(renderer.report().contains(PassLabel::IrradianceBake));

        let live = ctx.live_texture_count();
        renderer.bake_irradiance(&mut world, &mut ctx);
        assert_ne!(renderer.irradiance().map(|v| v.texture), first);
        assert_eq!(ctx.live_texture_count(), live);
    }

    #[test]
    fn test_oversized_irradiance_grid_is_skipped() {
        let mut world = World::new();
        let mut ctx = RecordingContext::standard();
        let mut config = small_config();
        config.irradiance_grid.dims = [u32::MAX, u32::MAX, u32::MAX];
        let mut renderer = Renderer::new(config);

        renderer.bake_irradiance(&mut world, &mut ctx);
        assert!(renderer.irradiance().is_none());
        assert!(!renderer.report().contains(PassLabel::IrradianceBake));
        assert!(ctx.draws().is_empty());
    }

    #[test]
    fn test_reflection_bake_creates_cubemaps() {
        let mut world = World::new();
        let mut ctx = RecordingContext::standard();
        let mut renderer = Renderer::new(small_config());

        renderer.bake_reflections(&mut world, &mut ctx);
        assert_eq!(renderer.reflection_probes().len(), 2);
        assert!(renderer.report().contains(PassLabel::ReflectionBake));

        let live = ctx.live_texture_count();
        renderer.bake_reflections(&mut world, &mut ctx);
        assert_eq!(renderer.reflection_probes().len(), 2);
        assert_eq!(ctx.live_texture_count(), live);
    }

    #[test]
    fn test_capture_faces_use_square_frustum() {
        let camera = capture_camera();
        assert!(matches!(
            camera.projection(),
            crate::camera::Projection::Perspective { fov_y_degrees, aspect, .. }
                if fov_y_degrees == 90.0 && aspect == 1.0
        ));
        assert_eq!(camera.near_plane(), 0.1);
        assert_eq!(camera.far_plane(), 1000.0);
    }
}
