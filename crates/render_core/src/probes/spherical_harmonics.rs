//! Second-order (9 coefficient) spherical harmonics projection of a cubemap.

use std::f32::consts::PI;

use bevy::math::{Vec2, Vec3};
use bytemuck::{Pod, Zeroable};

use super::{CubeFace, FloatImage};

pub const SH_COEFFICIENTS: usize = 9;

/// RGB coefficient triples, laid out as 27 packed floats.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShCoefficients {
    pub coeffs: [[f32; 3]; SH_COEFFICIENTS],
}

impl ShCoefficients {
    pub fn coefficient(&self, index: usize) -> Vec3 {
        Vec3::from_array(self.coeffs[index])
    }

    pub fn to_vec(&self) -> Vec<Vec3> {
        self.coeffs.iter().copied().map(Vec3::from_array).collect()
    }

    fn accumulate(&mut self, basis: &[f32; SH_COEFFICIENTS], radiance: Vec3) {
        for (c, b) in self.coeffs.iter_mut().zip(basis) {
            c[0] += radiance.x * b;
            c[1] += radiance.y * b;
            c[2] += radiance.z * b;
        }
    }

    fn scale(&mut self, factor: f32) {
        for c in &mut self.coeffs {
            for channel in c.iter_mut() {
                *channel *= factor;
            }
        }
    }
}

/// Real SH basis evaluated at unit direction `d`.
fn sh_basis(d: Vec3) -> [f32; SH_COEFFICIENTS] {
    [
        0.282_095,
        0.488_603 * d.y,
        0.488_603 * d.z,
        0.488_603 * d.x,
        1.092_548 * d.x * d.y,
        1.092_548 * d.y * d.z,
        0.315_392 * (3.0 * d.z * d.z - 1.0),
        1.092_548 * d.x * d.z,
        0.546_274 * (d.x * d.x - d.y * d.y),
    ]
}

/// Project six cubemap faces (in [`CubeFace::ALL`] order) onto SH.
///
/// Each texel is weighted by its solid angle; weights are renormalised so
/// they sum to 4π.
pub fn compute_sh(faces: &[FloatImage; 6]) -> ShCoefficients {
    let mut sh = ShCoefficients::default();
    let mut weight_sum = 0.0;

    for (face, image) in CubeFace::ALL.iter().zip(faces) {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            continue;
        }
        for y in 0..h {
            for x in 0..w {
                let uv = Vec2::new(
                    2.0 * (x as f32 + 0.5) / w as f32 - 1.0,
                    1.0 - 2.0 * (y as f32 + 0.5) / h as f32,
                );
                let dir = face.direction(uv);
                let weight = 1.0 / dir.length_squared().powf(1.5);
                let basis = sh_basis(dir.normalize());
                sh.accumulate(&basis, image.pixel(x, y) * weight);
                weight_sum += weight;
            }
        }
    }

    if weight_sum > 0.0 {
        sh.scale(4.0 * PI / weight_sum);
    }
    sh
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec4;

    #[test]
    fn test_constant_radiance_projects_to_dc_term() {
        let faces: [FloatImage; 6] =
            std::array::from_fn(|_| FloatImage::filled(8, 8, Vec4::new(1.0, 0.5, 0.25, 1.0)));
        let sh = compute_sh(&faces);

        let dc = 0.282_095 * 4.0 * PI;
        assert!((sh.coefficient(0) - Vec3::new(1.0, 0.5, 0.25) * dc).length() < 1e-3);
        for i in 1..SH_COEFFICIENTS {
            assert!(sh.coefficient(i).length() < 1e-3, "coefficient {i} = {:?}", sh.coefficient(i));
        }
    }

    #[test]
    fn test_bright_face_sets_directional_term() {
        let mut faces: [FloatImage; 6] = std::array::from_fn(|_| FloatImage::new(8, 8));
        faces[CubeFace::PositiveY as usize] = FloatImage::filled(8, 8, Vec4::ONE);
        let sh = compute_sh(&faces);
        // Light from +Y drives the Y-linear band positive and leaves X/Z at zero.
        assert!(sh.coefficient(1).x > 0.1);
        assert!(sh.coefficient(3).x.abs() < 1e-3);
        assert!(sh.coefficient(2).x.abs() < 1e-3);
    }

    #[test]
    fn test_coefficients_pack_as_27_floats() {
        assert_eq!(std::mem::size_of::<ShCoefficients>(), 27 * 4);
        let sh = ShCoefficients::default();
        assert_eq!(bytemuck::bytes_of(&sh).len(), 108);
    }
}
