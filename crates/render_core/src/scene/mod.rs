//! Scene data consumed by the renderer.
//!
//! Meshes, materials and prefab hierarchies are immutable once built and
//! shared by `Arc`. World objects (prefab instances and lights) are ECS
//! entities in an explicitly owned [`bevy::prelude::World`]; see [`world`].

mod light;
mod material;
mod mesh;
mod prefab;
pub mod world;

pub use light::{Light, LightKind};
pub use material::{AlphaMode, Material};
pub use mesh::{Aabb, Mesh};
pub use prefab::{Node, Prefab};
pub use world::{
    set_sun, shadow_casting_lights, spawn_light, spawn_prefab, sun_light, visible_lights,
    visible_prefabs, LightRef, ObjectKind, PrefabInstance, PrefabRef, SceneEnvironment,
    SceneObject, ShadowMap,
};
