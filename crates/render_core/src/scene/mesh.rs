//! Loaded mesh handles and axis-aligned bounding boxes.

use bevy::math::{Mat4, Vec3};

/// Axis-aligned bounding box stored as center and half extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Aabb {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            half_extents,
        }
    }

    /// The [-1, 1] cube.
    pub fn unit() -> Self {
        Self::new(Vec3::ZERO, Vec3::ONE)
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    /// World-space box enclosing all eight transformed corners.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let sign = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { -1.0 } else { 1.0 },
            );
            let corner = transform.transform_point3(self.center + sign * self.half_extents);
            min = min.min(corner);
            max = max.max(corner);
        }
        Aabb::from_min_max(min, max)
    }
}

/// A mesh already resident on the GPU, referenced by asset name.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub vertex_count: u32,
    /// Bounds in mesh-local space.
    pub bounds: Aabb,
}

impl Mesh {
    pub fn new(name: &str, vertex_count: u32, bounds: Aabb) -> Self {
        Self {
            name: name.to_string(),
            vertex_count,
            bounds,
        }
    }

    /// Zero-vertex meshes are never submitted.
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}
