//! Shared fixtures for the frame pipeline integration tests.
//!
//! Everything runs on the headless device, so no GPU is needed.

#![allow(dead_code)]

use std::f32::consts::FRAC_PI_4;

use deferred_engine::backend::{GraphicsDevice, MeshHandle};
use deferred_engine::resources::{Material, Mesh, Model, ModelNode, TextureData};
use deferred_engine::scene::{Camera, DirectionalLight, Environment, NodeId, Projection, Scene, Transform};
use deferred_engine::{EngineConfig, ShadowConfig};
use glam::{Quat, Vec3};

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;

/// Install a test logger once per process
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small output, small LUT, small cascades
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_size(WIDTH, HEIGHT)
        .with_brdf_lut_size(16)
        .with_shadow(ShadowConfig::default().with_resolution(64).with_shadow_distance(20.0))
}

pub fn perspective_camera() -> Camera {
    Camera::new(Projection::perspective(60.0, WIDTH as f32 / HEIGHT as f32, 0.1, 100.0))
}

/// Camera on +Z looking down -Z at the origin
pub fn spawn_camera(scene: &mut Scene, z: f32) -> NodeId {
    let node = scene.spawn("camera", Transform::from_position(Vec3::new(0.0, 0.0, z)));
    scene.add_component(node, perspective_camera()).unwrap();
    node
}

/// Sun tilted down towards -Z
pub fn spawn_sun(scene: &mut Scene) -> NodeId {
    let node = scene.spawn(
        "sun",
        Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_x(-FRAC_PI_4)),
    );
    scene
        .add_component(node, DirectionalLight::new(Vec3::new(1.0, 0.95, 0.9), 3.0))
        .unwrap();
    node
}

/// Model with an opaque cube "A" on the left and a blended cube "B" on the right
pub struct OpaqueAndBlend {
    pub model: Model,
    pub opaque: MeshHandle,
    pub blend: MeshHandle,
}

pub const OPAQUE_X: f32 = -1.5;
pub const BLEND_X: f32 = 1.5;

pub fn opaque_and_blend(device: &mut dyn GraphicsDevice) -> OpaqueAndBlend {
    let opaque = Mesh::cube().upload(device).unwrap();
    let blend = Mesh::cube().upload(device).unwrap();

    let mut model = Model::new("pair");
    let red = model.add_material(Material::plastic(Vec3::new(1.0, 0.0, 0.0)));
    let glass = model.add_material(Material::glass());
    model
        .add_node(
            ModelNode::new("A", Transform::from_position(Vec3::new(OPAQUE_X, 0.0, 0.0))).with_primitive(opaque, red),
            None,
        )
        .unwrap();
    model
        .add_node(
            ModelNode::new("B", Transform::from_position(Vec3::new(BLEND_X, 0.0, 0.0))).with_primitive(blend, glass),
            None,
        )
        .unwrap();

    OpaqueAndBlend { model, opaque, blend }
}

/// Sky cubemap, optionally with irradiance and prefiltered maps
pub fn environment(device: &mut dyn GraphicsDevice, ibl: bool) -> Environment {
    let sky = TextureData::sky(4, [90, 140, 220, 255], [200, 210, 230, 255], [40, 40, 40, 255]);
    let environment = Environment::new(sky.upload(device).unwrap());
    if !ibl {
        return environment;
    }
    let irradiance = TextureData::cubemap(2, [[128, 128, 128, 255]; 6], "irradiance")
        .upload(device)
        .unwrap();
    let prefiltered = TextureData::cubemap(4, [[160, 160, 160, 255]; 6], "prefiltered")
        .upload(device)
        .unwrap();
    environment.with_irradiance(irradiance).with_prefiltered(prefiltered, 1)
}

/// Pixel covering `point` as seen through `camera`
pub fn pixel_of(camera: &Camera, point: Vec3) -> (u32, u32) {
    let ndc = camera.view_projection_matrix().project_point3(point);
    let x = (ndc.x * 0.5 + 0.5) * WIDTH as f32;
    let y = (0.5 - ndc.y * 0.5) * HEIGHT as f32;
    (x as u32, y as u32)
}
