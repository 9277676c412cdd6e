//! World objects as ECS entities, and the queries the renderer consumes.
//!
//! Every object carries a [`SceneObject`] plus exactly one variant component
//! ([`PrefabInstance`] or [`Light`]). Query results are ordered by object id,
//! which is allocated monotonically at spawn time, so iteration order matches
//! insertion order.

use std::sync::Arc;

use bevy::math::{Mat4, Vec3, Vec4};
use bevy::prelude::{Component, Entity, Resource, World};

use super::light::light_direction;
use super::{Light, LightKind, Prefab};
use crate::camera::Camera;
use crate::gpu::RenderTarget;

/// Discriminant of a world object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Prefab,
    Light,
}

/// Fields shared by every world object.
#[derive(Component, Clone, Debug, PartialEq)]
pub struct SceneObject {
    pub id: u64,
    /// Instance root transform.
    pub model: Mat4,
    pub visible: bool,
    kind: ObjectKind,
}

impl SceneObject {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.model.w_axis.truncate()
    }
}

/// Prefab variant: a shared, immutable node tree.
#[derive(Component, Clone, Debug)]
pub struct PrefabInstance(pub Arc<Prefab>);

/// Per-light shadow state, inserted on the first shadow pass that needs it.
#[derive(Component, Clone, Debug)]
pub struct ShadowMap {
    pub target: RenderTarget,
    pub camera: Camera,
}

/// Scene-wide parameters.
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct SceneEnvironment {
    pub background: Vec4,
    pub ambient: Vec3,
    pub has_gamma: bool,
    pub ssao_bias: f32,
    /// Directional light used for volumetric scattering. At most one.
    pub sun: Option<Entity>,
}

impl Default for SceneEnvironment {
    fn default() -> Self {
        Self {
            background: Vec4::new(0.1, 0.1, 0.1, 1.0),
            ambient: Vec3::splat(0.1),
            has_gamma: true,
            ssao_bias: 0.005,
            sun: None,
        }
    }
}

#[derive(Resource, Default)]
struct ObjectIds {
    next: u64,
}

fn next_object_id(world: &mut World) -> u64 {
    let mut ids = world.get_resource_or_insert_with(ObjectIds::default);
    let id = ids.next;
    ids.next += 1;
    id
}

pub fn spawn_prefab(world: &mut World, model: Mat4, prefab: Arc<Prefab>) -> Entity {
    let id = next_object_id(world);
    world
        .spawn((
            SceneObject {
                id,
                model,
                visible: true,
                kind: ObjectKind::Prefab,
            },
            PrefabInstance(prefab),
        ))
        .id()
}

pub fn spawn_light(world: &mut World, model: Mat4, light: Light) -> Entity {
    let id = next_object_id(world);
    world
        .spawn((
            SceneObject {
                id,
                model,
                visible: true,
                kind: ObjectKind::Light,
            },
            light,
        ))
        .id()
}

/// Assign the sun role. Only directional lights qualify; returns whether the
/// role was assigned.
pub fn set_sun(world: &mut World, entity: Entity) -> bool {
    let is_directional = world
        .get::<Light>(entity)
        .is_some_and(|light| light.kind == LightKind::Directional);
    if !is_directional {
        return false;
    }
    world
        .get_resource_or_insert_with(SceneEnvironment::default)
        .sun = Some(entity);
    true
}

/// A visible prefab instance.
#[derive(Clone, Debug)]
pub struct PrefabRef {
    pub entity: Entity,
    pub model: Mat4,
    pub prefab: Arc<Prefab>,
}

/// Snapshot of a light object for one pass.
#[derive(Clone, Debug)]
pub struct LightRef {
    pub entity: Entity,
    pub id: u64,
    pub model: Mat4,
    pub visible: bool,
    pub light: Light,
    pub shadow: Option<ShadowMap>,
}

impl LightRef {
    pub fn position(&self) -> Vec3 {
        self.model.w_axis.truncate()
    }

    pub fn direction(&self) -> Vec3 {
        light_direction(&self.model)
    }
}

pub fn visible_prefabs(world: &mut World) -> Vec<PrefabRef> {
    let mut query = world.query::<(Entity, &SceneObject, &PrefabInstance)>();
    let mut prefabs: Vec<(u64, PrefabRef)> = query
        .iter(world)
        .filter(|(_, object, _)| object.visible)
        .map(|(entity, object, instance)| {
            (
                object.id,
                PrefabRef {
                    entity,
                    model: object.model,
                    prefab: instance.0.clone(),
                },
            )
        })
        .collect();
    prefabs.sort_by_key(|(id, _)| *id);
    prefabs.into_iter().map(|(_, prefab)| prefab).collect()
}

fn all_lights(world: &mut World) -> Vec<LightRef> {
    let mut query = world.query::<(Entity, &SceneObject, &Light, Option<&ShadowMap>)>();
    let mut lights: Vec<LightRef> = query
        .iter(world)
        .map(|(entity, object, light, shadow)| LightRef {
            entity,
            id: object.id,
            model: object.model,
            visible: object.visible,
            light: light.clone(),
            shadow: shadow.cloned(),
        })
        .collect();
    lights.sort_by_key(|light| light.id);
    lights
}

/// Lights that contribute to forward/deferred accumulation.
pub fn visible_lights(world: &mut World) -> Vec<LightRef> {
    all_lights(world).into_iter().filter(|l| l.visible).collect()
}

/// Lights flagged to cast shadows, regardless of visibility.
pub fn shadow_casting_lights(world: &mut World) -> Vec<LightRef> {
    all_lights(world)
        .into_iter()
        .filter(|l| l.light.has_shadow)
        .collect()
}

pub fn sun_light(world: &mut World) -> Option<LightRef> {
    let sun = world.get_resource::<SceneEnvironment>()?.sun?;
    all_lights(world).into_iter().find(|l| l.entity == sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Aabb, Material, Mesh, Node};

    fn test_prefab() -> Arc<Prefab> {
        let mesh = Arc::new(Mesh::new("box", 36, Aabb::unit()));
        let material = Arc::new(Material::named("grey"));
        Arc::new(Prefab::new("box", Node::new("box").with_mesh(mesh, material)))
    }

    #[test]
    fn test_queries_follow_insertion_order() {
        let mut world = World::new();
        let a = spawn_light(&mut world, Mat4::IDENTITY, Light::point(Vec3::X, 10.0));
        let lamp = Light::point(Vec3::Y, 10.0).with_shadow(0.01);
        let b = spawn_light(&mut world, Mat4::IDENTITY, lamp);
        let c = spawn_light(&mut world, Mat4::IDENTITY, Light::point(Vec3::Z, 10.0));

        let order: Vec<Entity> = visible_lights(&mut world).iter().map(|l| l.entity).collect();
        assert_eq!(order, vec![a, b, c]);

        world.get_mut::<SceneObject>(b).unwrap().visible = false;
        let order: Vec<Entity> = visible_lights(&mut world).iter().map(|l| l.entity).collect();
        assert_eq!(order, vec![a, c]);

        // Shadow casters ignore visibility.
        let casters: Vec<Entity> =
            shadow_casting_lights(&mut world).iter().map(|l| l.entity).collect();
        assert_eq!(casters, vec![b]);
    }

    #[test]
    fn test_visible_prefabs_skip_hidden_instances() {
        let mut world = World::new();
        let shown = spawn_prefab(&mut world, Mat4::IDENTITY, test_prefab());
        let hidden = spawn_prefab(&mut world, Mat4::IDENTITY, test_prefab());
        world.get_mut::<SceneObject>(hidden).unwrap().visible = false;

        let prefabs = visible_prefabs(&mut world);
        assert_eq!(prefabs.len(), 1);
        assert_eq!(prefabs[0].entity, shown);
        assert_eq!(world.get::<SceneObject>(shown).unwrap().kind(), ObjectKind::Prefab);
    }

    #[test]
    fn test_sun_must_be_directional() {
        let mut world = World::new();
        let point = spawn_light(&mut world, Mat4::IDENTITY, Light::point(Vec3::ONE, 10.0));
        let sun = spawn_light(&mut world, Mat4::IDENTITY, Light::directional(Vec3::ONE));

        assert!(!set_sun(&mut world, point));
        assert!(sun_light(&mut world).is_none());
        assert!(set_sun(&mut world, sun));
        assert_eq!(sun_light(&mut world).map(|l| l.entity), Some(sun));
    }
}
