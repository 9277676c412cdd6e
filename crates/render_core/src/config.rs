//! Renderer configuration.
//!
//! All settings live in one [`RendererConfig`] resource that round-trips
//! through JSON. Every field has a default, so partial files are accepted.

use std::path::Path;

use bevy::math::{UVec3, Vec3};
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

/// Which lighting pipeline renders the view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    #[default]
    Deferred,
    Forward,
}

/// Debug overlays that replace the post-process chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugView {
    #[default]
    None,
    /// Albedo, normal, SSAO and depth tiled into viewport quadrants.
    GBuffers,
    /// The baked probe coefficient texture.
    IrradianceTexture,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoSettings {
    pub blur: bool,
    /// Number of kernel offsets pushed as `u_points`.
    pub sample_count: usize,
    pub radius: f32,
    /// Fold samples into the +Z hemisphere.
    pub hemisphere: bool,
    pub seed: u64,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            blur: false,
            sample_count: 64,
            radius: 1.0,
            hemisphere: true,
            seed: 0x55A0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecalSettings {
    pub enabled: bool,
    pub translation: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for DecalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            translation: [-200.0, -3.0, 50.0],
            scale: [20.0, 30.0, 20.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub enabled: bool,
    pub scale: f32,
    pub average_lum: f32,
    /// White point; squared before upload.
    pub lum_white: f32,
    /// Display gamma; inverted before upload.
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: 1.0,
            average_lum: 1.0,
            lum_white: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumetricSettings {
    pub enabled: bool,
    pub sample_density: f32,
    /// The scattering target is the viewport size shifted right by this.
    pub downsample_shift: u32,
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_density: 0.02,
            downsample_shift: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    pub enabled: bool,
    /// A probe is used only when the eye is closer than this.
    pub capture_radius: f32,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capture_radius: 50.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub resolution: u32,
    /// Half extent of the directional orthographic frustum.
    pub directional_extent: f32,
    pub spot_near: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            directional_extent: 900.0,
            spot_near: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarReflectionSettings {
    pub enabled: bool,
    pub resolution: u32,
}

impl Default for PlanarReflectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrradianceGridSettings {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub dims: [u32; 3],
    /// Edge length of each square capture face.
    pub capture_resolution: u32,
    /// Offset along the surface normal when sampling the grid.
    pub normal_distance: f32,
}

impl Default for IrradianceGridSettings {
    fn default() -> Self {
        Self {
            start: [-55.0, 10.0, -170.0],
            end: [180.0, 150.0, 80.0],
            dims: [8, 6, 12],
            capture_resolution: 64,
            normal_distance: 1.0,
        }
    }
}

impl IrradianceGridSettings {
    pub fn start(&self) -> Vec3 {
        Vec3::from_array(self.start)
    }

    pub fn end(&self) -> Vec3 {
        Vec3::from_array(self.end)
    }

    pub fn dims(&self) -> UVec3 {
        UVec3::from_array(self.dims)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionGridSettings {
    /// Position of probe (0, 0).
    pub origin: [f32; 3],
    pub step_x: f32,
    pub step_z: f32,
    pub count_x: u32,
    pub count_z: u32,
    pub resolution: u32,
}

impl Default for ReflectionGridSettings {
    fn default() -> Self {
        Self {
            origin: [-200.0, 100.0, 100.0],
            step_x: 150.0,
            step_z: -150.0,
            count_x: 5,
            count_z: 4,
            resolution: 512,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub view: DebugView,
    pub show_probes: bool,
    pub probe_size: f32,
    pub show_reflection_probes: bool,
    pub reflection_probe_size: f32,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            view: DebugView::None,
            show_probes: false,
            probe_size: 5.0,
            show_reflection_probes: false,
            reflection_probe_size: 10.0,
        }
    }
}

/// Asset names resolved through the graphics context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetNames {
    pub quad_mesh: String,
    pub sphere_mesh: String,
    pub cube_mesh: String,
    pub skybox_mesh: String,
    pub environment: String,
    pub noise_texture: String,
    pub decal_texture: String,
}

impl Default for AssetNames {
    fn default() -> Self {
        Self {
            quad_mesh: "quad".to_string(),
            sphere_mesh: "data/meshes/sphere.obj".to_string(),
            cube_mesh: "cube".to_string(),
            skybox_mesh: "data/meshes/box.ASE".to_string(),
            environment: "data/textures/panorama.hdre".to_string(),
            noise_texture: "data/textures/noise.png".to_string(),
            decal_texture: "data/textures/bulletholes.png".to_string(),
        }
    }
}

/// Complete renderer configuration.
#[derive(Resource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub mode: RenderMode,
    pub ssao: SsaoSettings,
    pub decal: DecalSettings,
    pub tonemapper: TonemapSettings,
    pub volumetric: VolumetricSettings,
    pub reflections: ReflectionSettings,
    pub shadows: ShadowSettings,
    pub planar_reflection: PlanarReflectionSettings,
    pub irradiance_grid: IrradianceGridSettings,
    pub reflection_grid: ReflectionGridSettings,
    pub debug: DebugSettings,
    pub assets: AssetNames,
}

/// Error loading or saving a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// File system error
    Io(std::io::Error),
    /// Malformed JSON
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl RendererConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_json(text: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "mode": "Forward", "ssao": { "blur": true } }"#;
        let config = RendererConfig::from_json(json).unwrap();
        assert_eq!(config.mode, RenderMode::Forward);
        assert!(config.ssao.blur);
        assert_eq!(config.ssao.sample_count, 64);
        assert_eq!(config.irradiance_grid.dims, [8, 6, 12]);
    }

    #[test]
    fn test_save_and_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("renderer.json");

        let mut config = RendererConfig::default();
        config.volumetric.enabled = true;
        config.debug.view = DebugView::GBuffers;
        config.save(&path).unwrap();

        let loaded = RendererConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = RendererConfig::load(temp_dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));

        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RendererConfig::load(&path), Err(ConfigError::Json(_))));
    }
}
