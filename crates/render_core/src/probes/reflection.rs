//! Reflection probes: baked environment cubemaps at fixed positions.

use bevy::math::Vec3;

use crate::config::ReflectionGridSettings;
use crate::gpu::{GraphicsContext, TextureId};

#[derive(Clone, Debug, PartialEq)]
pub struct ReflectionProbe {
    pub position: Vec3,
    pub cubemap: TextureId,
}

/// The result of a reflection bake.
#[derive(Clone, Debug, Default)]
pub struct ReflectionProbeSet {
    pub probes: Vec<ReflectionProbe>,
}

impl ReflectionProbeSet {
    /// Probe positions on the configured XZ grid, x fastest.
    pub fn layout(settings: &ReflectionGridSettings) -> Vec<Vec3> {
        let origin = Vec3::from_array(settings.origin);
        (0..settings.count_z)
            .flat_map(|z| {
                (0..settings.count_x).map(move |x| {
                    origin + Vec3::new(x as f32 * settings.step_x, 0.0, z as f32 * settings.step_z)
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Closest probe strictly within `radius` of `point`.
    pub fn nearest_within(&self, point: Vec3, radius: f32) -> Option<&ReflectionProbe> {
        self.probes
            .iter()
            .map(|p| (p.position.distance(point), p))
            .filter(|(d, _)| *d < radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, p)| p)
    }

    /// Destroy every cubemap and empty the set.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        for probe in self.probes.drain(..) {
            ctx.destroy_texture(probe.cubemap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let positions = ReflectionProbeSet::layout(&ReflectionGridSettings::default());
        assert_eq!(positions.len(), 20);
        assert_eq!(positions[0], Vec3::new(-200.0, 100.0, 100.0));
        assert_eq!(positions[4], Vec3::new(400.0, 100.0, 100.0));
        assert_eq!(positions[5], Vec3::new(-200.0, 100.0, -50.0));
        assert!(positions.iter().all(|p| p.y == 100.0));
    }

    #[test]
    fn test_nearest_within_radius() {
        let set = ReflectionProbeSet {
            probes: vec![
                ReflectionProbe {
                    position: Vec3::ZERO,
                    cubemap: TextureId(1),
                },
                ReflectionProbe {
                    position: Vec3::new(30.0, 0.0, 0.0),
                    cubemap: TextureId(2),
                },
            ],
        };
        let hit = set.nearest_within(Vec3::new(20.0, 0.0, 0.0), 50.0);
        assert_eq!(hit.map(|p| p.cubemap), Some(TextureId(2)));
        assert!(set.nearest_within(Vec3::new(500.0, 0.0, 0.0), 50.0).is_none());
    }
}
