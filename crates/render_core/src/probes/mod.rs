//! Probe data and math: cubemap capture faces, read-back images, spherical
//! harmonics projection, and the baked irradiance/reflection probe sets.
//!
//! The capture passes themselves live in the renderer, since they re-run the
//! forward pass from each probe position.

mod cubemap;
mod irradiance;
mod reflection;
mod spherical_harmonics;

pub use cubemap::{CubeFace, FloatImage};
pub use irradiance::{
    IrradianceProbe, IrradianceVolume, ProbeGrid, ProbeTexel, MAX_GRID_AXIS, MAX_PROBES,
    PROBE_TEXTURE_FORMAT,
};
pub use reflection::{ReflectionProbe, ReflectionProbeSet};
pub use spherical_harmonics::{compute_sh, ShCoefficients, SH_COEFFICIENTS};
