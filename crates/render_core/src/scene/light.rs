//! Light parameters and their shader contract.

use bevy::math::{Mat4, Vec3};
use bevy::prelude::Component;

use crate::gpu::GraphicsContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Spot,
    Point,
}

impl LightKind {
    /// Value of `u_light_type`.
    pub fn shader_index(self) -> i32 {
        match self {
            LightKind::Directional => 0,
            LightKind::Spot => 1,
            LightKind::Point => 2,
        }
    }
}

/// Light emission parameters. Position and orientation come from the
/// owning [`SceneObject`](super::SceneObject) transform; the light shines
/// along its local -Z axis.
#[derive(Component, Clone, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// Cosine of the cone half-angle (spot only).
    pub spot_cutoff: f32,
    /// Cone falloff exponent (spot only).
    pub exponent: f32,
    pub max_distance: f32,
    pub has_shadow: bool,
    pub shadow_bias: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            spot_cutoff: 0.9,
            exponent: 12.0,
            max_distance: 100.0,
            has_shadow: false,
            shadow_bias: 0.001,
        }
    }
}

impl Light {
    pub fn directional(color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            max_distance: 10_000.0,
            ..Default::default()
        }
    }

    pub fn spot(color: Vec3, max_distance: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            color,
            max_distance,
            ..Default::default()
        }
    }

    pub fn point(color: Vec3, max_distance: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            max_distance,
            ..Default::default()
        }
    }

    pub fn with_shadow(mut self, bias: f32) -> Self {
        self.has_shadow = true;
        self.shadow_bias = bias;
        self
    }

    /// Push the per-light parameter set to the bound program.
    pub fn set_uniforms(&self, ctx: &mut dyn GraphicsContext, model: &Mat4) {
        ctx.set_uniform("u_light_type", self.kind.shader_index().into());
        ctx.set_uniform("u_light_vector", light_direction(model).into());
        ctx.set_uniform("u_light_position", model.w_axis.truncate().into());
        ctx.set_uniform("u_light_color", self.color.into());
        ctx.set_uniform("u_spotCutOff", self.spot_cutoff.into());
        ctx.set_uniform("u_exponent", self.exponent.into());
        ctx.set_uniform("u_light_maxdist", self.max_distance.into());
        ctx.set_uniform("u_light_intensity", self.intensity.into());
        ctx.set_uniform("u_shadows", self.has_shadow.into());
    }
}

/// World-space direction of the light's local -Z axis.
pub(crate) fn light_direction(model: &Mat4) -> Vec3 {
    model.transform_vector3(Vec3::NEG_Z).normalize_or_zero()
}
