//! Planar reflection: the forward scene seen from a camera mirrored in the
//! y = 0 plane, sampled by materials flagged `planar_reflection`.

use bevy::math::{UVec2, Vec3};

use super::context::PlanarSource;
use super::forward::ForwardView;
use super::targets::{capture_descriptor, ensure_allocated};
use super::{FrameInputs, PassLabel, Renderer};
use crate::camera::Camera;
use crate::gpu::GraphicsContext;

/// `camera` reflected in y = 0. Up flips to -Y so the image is not mirrored
/// twice.
pub fn mirrored_camera(camera: &Camera) -> Camera {
    let flip = Vec3::new(1.0, -1.0, 1.0);
    let mut mirrored = camera.clone();
    mirrored.look_at(camera.eye() * flip, camera.center() * flip, Vec3::NEG_Y);
    mirrored
}

impl Renderer {
    /// Render the mirror view and return the texture planar materials sample.
    pub(crate) fn render_planar_reflection(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &FrameInputs,
    ) -> PlanarSource {
        self.report.push(PassLabel::PlanarReflectionPass);

        let size = UVec2::splat(self.config.planar_reflection.resolution);
        let target = ensure_allocated(
            ctx,
            &mut self.targets.planar,
            &capture_descriptor("planar_reflection", size),
        );

        let camera = mirrored_camera(frame.camera);
        let view = ForwardView {
            camera: &camera,
            target_size: size,
            prefabs: frame.prefabs,
            lights: frame.lights,
            environment: frame.environment,
            planar: PlanarSource::Mirror,
        };
        self.capture_forward_view(ctx, target.id, &view);
        ctx.bind_render_target(None);

        match target.color(0) {
            Some(texture) => {
                ctx.generate_mipmaps(texture);
                PlanarSource::Texture(texture)
            }
            None => PlanarSource::Disabled,
        }
    }
}
