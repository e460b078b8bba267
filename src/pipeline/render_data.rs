//! Per-frame render snapshot collected from the scene graph

use crate::backend::types::TextureHandle;
use crate::resources::Model;
use crate::scene::{Camera, Component, DirectionalLight, ParticleEmitter, PointLight, Scene, SpotLight};

/// Everything the passes of one frame read from the scene.
///
/// Lists keep traversal order. When a scene holds several cameras or
/// environments, the last one visited wins.
#[derive(Debug, Default)]
pub struct RenderData<'a> {
    pub camera: Option<&'a Camera>,
    pub directional_lights: Vec<&'a DirectionalLight>,
    pub point_lights: Vec<&'a PointLight>,
    pub spot_lights: Vec<&'a SpotLight>,
    pub models: Vec<&'a Model>,
    pub particle_emitters: Vec<&'a ParticleEmitter>,
    pub environment_map: Option<TextureHandle>,
    pub irradiance_map: Option<TextureHandle>,
    pub prefiltered_map: Option<TextureHandle>,
    pub prefiltered_mip_levels: u32,
}

impl<'a> RenderData<'a> {
    /// Collect a fresh snapshot of `scene`
    pub fn collect(scene: &'a Scene) -> Self {
        let mut data = Self::default();
        data.visit(scene);
        data
    }

    /// Reset and refill from `scene`, reusing list allocations
    pub fn recollect(&mut self, scene: &'a Scene) {
        self.clear();
        self.visit(scene);
    }

    /// Drop every reference held by the snapshot
    pub fn clear(&mut self) {
        self.camera = None;
        self.directional_lights.clear();
        self.point_lights.clear();
        self.spot_lights.clear();
        self.models.clear();
        self.particle_emitters.clear();
        self.environment_map = None;
        self.irradiance_map = None;
        self.prefiltered_map = None;
        self.prefiltered_mip_levels = 0;
    }

    fn visit(&mut self, scene: &'a Scene) {
        scene.traverse(|_, node| {
            for component in node.components() {
                match component {
                    Component::Model(model) => self.models.push(model),
                    Component::Camera(camera) => self.camera = Some(camera),
                    Component::Environment(environment) => {
                        self.environment_map = environment.environment_map;
                        self.irradiance_map = environment.irradiance_map;
                        self.prefiltered_map = environment.prefiltered_map;
                        self.prefiltered_mip_levels = environment.prefiltered_mip_levels;
                    }
                    Component::DirectionalLight(light) => self.directional_lights.push(light),
                    Component::PointLight(light) => self.point_lights.push(light),
                    Component::SpotLight(light) => self.spot_lights.push(light),
                    Component::ParticleEmitter(emitter) => self.particle_emitters.push(emitter),
                }
            }
        });
        log::trace!(
            "RenderData: {} models, {}/{}/{} lights, camera: {}",
            self.models.len(),
            self.directional_lights.len(),
            self.point_lights.len(),
            self.spot_lights.len(),
            self.camera.is_some()
        );
    }

    /// Whether both irradiance and prefiltered maps are present
    pub fn has_ibl(&self) -> bool {
        self.irradiance_map.is_some() && self.prefiltered_map.is_some()
    }
}
