//! Surface materials.

use bevy::math::{Vec3, Vec4};

use crate::gpu::{GraphicsContext, TextureId};

/// How a material's alpha channel is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Discard fragments below `alpha_cutoff`.
    Mask,
    /// Standard alpha blending.
    Blend,
}

/// PBR-ish material shared by reference across nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub color: Vec4,
    pub two_sided: bool,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: Vec3,
    pub color_texture: Option<TextureId>,
    pub metallic_roughness_texture: Option<TextureId>,
    pub emissive_texture: Option<TextureId>,
    /// Drawn with the `planar_reflection` program, sampling the mirror view.
    pub planar_reflection: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: Vec4::ONE,
            two_sided: false,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: Vec3::ZERO,
            color_texture: None,
            metallic_roughness_texture: None,
            emissive_texture: None,
            planar_reflection: false,
        }
    }
}

impl Material {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Alpha threshold pushed as `u_alpha_cutoff`; zero unless masked.
    pub fn effective_alpha_cutoff(&self) -> f32 {
        match self.alpha_mode {
            AlphaMode::Mask => self.alpha_cutoff,
            _ => 0.0,
        }
    }

    /// Surface parameters shared by the forward and G-buffer programs.
    pub fn set_uniforms(&self, ctx: &mut dyn GraphicsContext) {
        ctx.set_uniform("u_color", self.color.into());
        if let Some(texture) = self.color_texture {
            ctx.set_texture("u_texture", texture, 0);
        }
        ctx.set_uniform("u_emissive_factor", self.emissive_factor.into());
        ctx.set_uniform("u_alpha_cutoff", self.effective_alpha_cutoff().into());
    }

    /// Metallic/roughness block, G-buffer only.
    pub fn set_pbr_uniforms(&self, ctx: &mut dyn GraphicsContext) {
        match self.metallic_roughness_texture {
            Some(texture) => {
                ctx.set_texture("u_metal_roughness", texture, 1);
                ctx.set_uniform("u_hasmetal", true.into());
            }
            None => ctx.set_uniform("u_hasmetal", false.into()),
        }
        ctx.set_uniform("u_metalness", self.metallic_factor.into());
        ctx.set_uniform("u_roughness", self.roughness_factor.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_cutoff_only_applies_to_mask() {
        let mut material = Material {
            alpha_cutoff: 0.3,
            ..Default::default()
        };
        assert_eq!(material.effective_alpha_cutoff(), 0.0);
        material.alpha_mode = AlphaMode::Mask;
        assert_eq!(material.effective_alpha_cutoff(), 0.3);
        material.alpha_mode = AlphaMode::Blend;
        assert_eq!(material.effective_alpha_cutoff(), 0.0);
    }
}
