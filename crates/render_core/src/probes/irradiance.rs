//! Irradiance volume: a regular 3D grid of SH probes packed into a texture.

use bevy::math::{UVec2, UVec3, Vec3};
use bytemuck::{Pod, Zeroable};
use wgpu::TextureFormat;

use super::{ShCoefficients, SH_COEFFICIENTS};
use crate::config::IrradianceGridSettings;
use crate::gpu::{GraphicsContext, TextureId};

/// Probe texture format. One texel per coefficient, one row per probe.
pub const PROBE_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

/// Largest probe count a bake accepts: one texture row per probe, bounded by
/// the default 2D texture limit.
pub const MAX_PROBES: usize = 8192;

/// Per-axis cap applied to configured grid dimensions.
pub const MAX_GRID_AXIS: u32 = 1024;

/// Axis-aligned probe grid. Probe `(0,0,0)` sits on `start` and the last probe
/// on `end`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeGrid {
    pub start: Vec3,
    pub end: Vec3,
    pub dims: UVec3,
}

impl ProbeGrid {
    pub fn from_settings(settings: &IrradianceGridSettings) -> Self {
        Self {
            start: settings.start(),
            end: settings.end(),
            dims: settings.dims().min(UVec3::splat(MAX_GRID_AXIS)),
        }
    }

    pub fn len(&self) -> usize {
        self.dims.x as usize * self.dims.y as usize * self.dims.z as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spacing between neighbouring probes on each axis.
    pub fn delta(&self) -> Vec3 {
        let steps = (self.dims.as_vec3() - Vec3::ONE).max(Vec3::ONE);
        (self.end - self.start) / steps
    }

    /// `x + y·dimX + z·dimX·dimY`
    pub fn linear_index(&self, cell: UVec3) -> usize {
        let (dim_x, dim_y) = (self.dims.x as usize, self.dims.y as usize);
        cell.x as usize + cell.y as usize * dim_x + cell.z as usize * dim_x * dim_y
    }

    pub fn position(&self, cell: UVec3) -> Vec3 {
        self.start + self.delta() * cell.as_vec3()
    }

    /// Cells in x-fastest order, matching [`Self::linear_index`].
    pub fn cells(&self) -> impl Iterator<Item = UVec3> + '_ {
        let dims = self.dims;
        (0..dims.z).flat_map(move |z| {
            (0..dims.y).flat_map(move |y| (0..dims.x).map(move |x| UVec3::new(x, y, z)))
        })
    }
}

/// One baked probe.
#[derive(Clone, Debug, PartialEq)]
pub struct IrradianceProbe {
    pub cell: UVec3,
    pub index: usize,
    pub position: Vec3,
    pub sh: ShCoefficients,
}

/// One coefficient triple as stored in the probe texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ProbeTexel {
    pub rgb: [f32; 3],
    pub pad: f32,
}

/// The result of an irradiance bake.
#[derive(Clone, Debug)]
pub struct IrradianceVolume {
    pub grid: ProbeGrid,
    pub probes: Vec<IrradianceProbe>,
    pub texture: TextureId,
    pub normal_distance: f32,
}

impl IrradianceVolume {
    /// Texture size: `9 × probe_count`.
    pub fn texture_size(probe_count: usize) -> UVec2 {
        let rows = u32::try_from(probe_count.max(1)).unwrap_or(u32::MAX);
        UVec2::new(SH_COEFFICIENTS as u32, rows)
    }

    /// Probe texels, row `probe.index` holding that probe's coefficients.
    pub fn texels(grid: &ProbeGrid, probes: &[IrradianceProbe]) -> Vec<ProbeTexel> {
        let mut texels = vec![ProbeTexel::default(); grid.len() * SH_COEFFICIENTS];
        for probe in probes {
            let row = probe.index * SH_COEFFICIENTS;
            for (i, rgb) in probe.sh.coeffs.iter().enumerate() {
                texels[row + i] = ProbeTexel { rgb: *rgb, pad: 1.0 };
            }
        }
        texels
    }

    /// Push the irradiance block consumed by the lighting programs.
    pub fn set_uniforms(&self, ctx: &mut dyn GraphicsContext) {
        ctx.set_uniform("u_irradiance", true.into());
        ctx.set_texture("u_probes_texture", self.texture, 7);
        ctx.set_uniform("u_irr_start", self.grid.start.into());
        ctx.set_uniform("u_irr_end", self.grid.end.into());
        ctx.set_uniform("u_irr_delta", (self.grid.end - self.grid.start).into());
        ctx.set_uniform("u_irr_dims", self.grid.dims.as_vec3().into());
        ctx.set_uniform("u_irr_normal_distance", self.normal_distance.into());
        ctx.set_uniform("u_num_probes", (self.probes.len() as f32).into());
    }
}
