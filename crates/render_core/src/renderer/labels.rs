//! Labels for the passes the renderer executes.

use std::fmt;

/// Labels for renderer passes, recorded in execution order.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum PassLabel {
    /// Depth-only render from every shadow-casting light
    ShadowPass,
    /// Forward render from the camera mirrored in y = 0
    PlanarReflectionPass,
    /// Forward per-light accumulation into the presentation surface
    ForwardPass,
    /// Geometry into the three G-buffer targets
    GBufferPass,
    /// Projected decal boxes onto G-buffer target 0
    DecalPass,
    /// Screen-space ambient occlusion from G-buffer depth/normal
    SsaoPass,
    /// Three ping-pong blur iterations over the occlusion buffer
    SsaoBlurPass,
    /// Per-light additive accumulation into the illumination buffer
    LightingPass,
    /// Illumination buffer copied to the surface
    Present,
    /// G-buffer quadrants debug view
    GBufferDebugView,
    /// Probe coefficient texture debug view
    IrradianceDebugView,
    /// Tonemapping over the illumination buffer
    TonemapPass,
    /// Sun light scattering, composited with alpha blending
    VolumetricPass,
    /// Specular reflection overlay from the nearest probe
    ReflectionPass,
    /// Probe spheres drawn over the scene
    ProbeOverlay,
    /// Irradiance volume bake
    IrradianceBake,
    /// Reflection cubemap bake
    ReflectionBake,
}

impl fmt::Display for PassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the renderer did during the last frame or bake.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub passes: Vec<PassLabel>,
    /// Draws dropped because a program or mesh did not resolve.
    pub skipped_draws: u32,
}

impl FrameReport {
    pub fn contains(&self, label: PassLabel) -> bool {
        self.passes.contains(&label)
    }

    pub(crate) fn push(&mut self, label: PassLabel) {
        self.passes.push(label);
    }

    pub(crate) fn clear(&mut self) {
        self.passes.clear();
        self.skipped_draws = 0;
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pass) in self.passes.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{pass}")?;
        }
        if self.skipped_draws > 0 {
            write!(f, " ({} skipped draws)", self.skipped_draws)?;
        }
        Ok(())
    }
}
