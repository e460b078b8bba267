//! Node components

use super::{Camera, DirectionalLight, Environment, ParticleEmitter, PointLight, SpotLight};
use crate::resources::Model;
use glam::{Mat4, Vec4Swizzles};

/// Everything a scene node can carry
#[derive(Debug, Clone)]
pub enum Component {
    Model(Box<Model>),
    Camera(Camera),
    Environment(Environment),
    DirectionalLight(DirectionalLight),
    PointLight(PointLight),
    SpotLight(SpotLight),
    ParticleEmitter(ParticleEmitter),
}

impl Component {
    /// Advance time-dependent state
    pub(crate) fn animate(&mut self, dt: f32) {
        if let Component::Model(model) = self {
            model.animate(dt);
        }
    }

    /// Write back data derived from the owning node's world transform
    pub(crate) fn update_from_world(&mut self, world: Mat4) {
        match self {
            Component::Model(model) => {
                model.update_world(world);
                model.update_joints();
            }
            Component::Camera(camera) => camera.update_from_world(world),
            Component::DirectionalLight(light) => light.update_from_world(world),
            Component::PointLight(light) => light.update_from_world(world),
            Component::SpotLight(light) => light.update_from_world(world),
            Component::ParticleEmitter(emitter) => emitter.position = world.w_axis.xyz(),
            Component::Environment(_) => {}
        }
    }
}

impl From<Model> for Component {
    fn from(model: Model) -> Self {
        Component::Model(Box::new(model))
    }
}

impl From<Camera> for Component {
    fn from(camera: Camera) -> Self {
        Component::Camera(camera)
    }
}

impl From<Environment> for Component {
    fn from(environment: Environment) -> Self {
        Component::Environment(environment)
    }
}

impl From<DirectionalLight> for Component {
    fn from(light: DirectionalLight) -> Self {
        Component::DirectionalLight(light)
    }
}

impl From<PointLight> for Component {
    fn from(light: PointLight) -> Self {
        Component::PointLight(light)
    }
}

impl From<SpotLight> for Component {
    fn from(light: SpotLight) -> Self {
        Component::SpotLight(light)
    }
}

impl From<ParticleEmitter> for Component {
    fn from(emitter: ParticleEmitter) -> Self {
        Component::ParticleEmitter(emitter)
    }
}
