//! Frame pipeline integration tests.
//!
//! These drive whole frames through the renderer on the headless device and
//! inspect the recorded draws and the G-buffer / HDR contents.
//!
//! ```bash
//! cargo test --test frame_pipeline
//! ```

mod common;

use rstest::rstest;

use common::{
    environment, init_logging, opaque_and_blend, pixel_of, spawn_camera, spawn_sun, test_config, BLEND_X, HEIGHT,
    OPAQUE_X, WIDTH,
};
use deferred_engine::animation::{AnimationChannel, AnimationClip, InterpolationMode, Keyframe};
use deferred_engine::backend::{
    CompareFunction, DepthState, DrawKind, GraphicsDevice, HeadlessDevice, UniformValue,
};
use deferred_engine::pipeline::{GBufferGenerator, LightPass, LightPassInputs, RenderData, ShadowMap};
use deferred_engine::resources::{Material, Mesh, Model, ModelNode};
use deferred_engine::scene::{Scene, Transform};
use deferred_engine::{FrameStage, Renderer, ShadowConfig};
use glam::Vec3;

// ============================================================================
// End-to-end
// ============================================================================

/// One directional light, one model with an opaque and a blended mesh, no
/// environment and no shadow map.
#[test]
fn test_opaque_and_blend_frame() {
    init_logging();
    let config = test_config().with_shadow(ShadowConfig::default().with_enabled(false));
    let mut renderer = Renderer::new(HeadlessDevice::new(WIDTH, HEIGHT), config).unwrap();

    let pair = opaque_and_blend(renderer.device_mut());
    let (opaque, blend) = (pair.opaque, pair.blend);
    let mut scene = Scene::new();
    spawn_camera(&mut scene, 6.0);
    spawn_sun(&mut scene);
    let node = scene.spawn("pair", Transform::default());
    scene.add_component(node, pair.model).unwrap();

    renderer.device_mut().take_draws();
    renderer.render_frame(&mut scene, 0.0).unwrap();
    assert_eq!(renderer.stage(), FrameStage::Submitted);

    let data = RenderData::collect(&scene);
    assert_eq!(data.directional_lights.len(), 1);
    assert_eq!(data.models.len(), 1);
    assert_eq!(data.environment_map, None);

    let device = renderer.device();
    let geometry: Vec<_> = device.draws().iter().filter(|d| d.program_label == "gbuffer").collect();
    assert_eq!(geometry.len(), 1);
    assert_eq!(geometry[0].kind, DrawKind::Mesh(opaque));
    assert!(device.draws().iter().all(|d| d.kind != DrawKind::Mesh(blend)));

    // only A leaves a footprint in the G-buffer
    let gbuffer = renderer.gbuffer();
    let camera = data.camera.unwrap();
    let (ax, ay) = pixel_of(camera, Vec3::new(OPAQUE_X, 0.0, 0.5));
    let (bx, by) = pixel_of(camera, Vec3::new(BLEND_X, 0.0, 0.5));
    let albedo = device.pixel(gbuffer.color, ax, ay).unwrap();
    assert!(albedo[0] > 0.9 && albedo[1] < 0.1, "{albedo:?}");
    assert!(device.depth_at(gbuffer.depth, ax, ay).unwrap() < 1.0);
    assert_eq!(device.pixel(gbuffer.color, bx, by), Some([0.0; 4]));
    assert_eq!(device.depth_at(gbuffer.depth, bx, by), Some(1.0));

    let light = device.draws().iter().find(|d| d.program_label == "light pass").unwrap();
    assert_eq!(light.uniform("uLights.directionalCount"), Some(UniformValue::UInt(1)));
    assert_eq!(light.uniform("uShadow.hasShadow"), Some(UniformValue::Bool(false)));
    assert!(device.draws().iter().all(|d| d.program_label != "skybox"));
}

#[test]
fn test_empty_scene_frame() {
    init_logging();
    let mut renderer = Renderer::new(HeadlessDevice::new(WIDTH, HEIGHT), test_config()).unwrap();
    let mut scene = Scene::new();
    renderer.render_frame(&mut scene, 0.016).unwrap();

    let device = renderer.device();
    assert_eq!(renderer.frame_index(), 1);
    assert!(!renderer.shadow_map().unwrap().is_active());
    assert!(device.draws().iter().all(|d| d.program_label != "gbuffer"));
    let light = device.draws().iter().find(|d| d.program_label == "light pass").unwrap();
    assert_eq!(light.uniform("uLights.directionalCount"), Some(UniformValue::UInt(0)));
    // BRDF bake plus one frame
    assert_eq!(device.submissions(), 2);
}

#[test]
fn test_last_camera_wins() {
    let mut scene = Scene::new();
    spawn_camera(&mut scene, 4.0);
    spawn_camera(&mut scene, 9.0);
    scene.update(0.0);

    let data = RenderData::collect(&scene);
    let camera = data.camera.unwrap();
    assert!((camera.position() - Vec3::new(0.0, 0.0, 9.0)).length() < 1e-5);
}

// ============================================================================
// State restoration
// ============================================================================

#[rstest]
#[case::neither(false, false)]
#[case::shadow_only(true, false)]
#[case::ibl_only(false, true)]
#[case::both(true, true)]
fn test_light_pass_restores_depth_state(#[case] shadow: bool, #[case] ibl: bool) {
    init_logging();
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let pair = opaque_and_blend(&mut device);
    let env = environment(&mut device, ibl);

    let mut scene = Scene::new();
    spawn_camera(&mut scene, 6.0);
    spawn_sun(&mut scene);
    let node = scene.spawn("pair", Transform::default());
    scene.add_component(node, pair.model).unwrap();
    let node = scene.spawn("environment", Transform::default());
    scene.add_component(node, env).unwrap();
    scene.update(0.0);
    let data = RenderData::collect(&scene);

    let mut generator = GBufferGenerator::new(&mut device, WIDTH, HEIGHT).unwrap();
    let mut shadow_map = ShadowMap::new(&mut device, &test_config().shadow).unwrap();
    if shadow {
        shadow_map.render(&mut device, &data);
    }
    let gbuffer = generator.generate(&mut device, &data);
    let light_pass = LightPass::new(&mut device).unwrap();

    let prior = DepthState {
        compare: CompareFunction::Greater,
        write: true,
    };
    device.bind_framebuffer(None);
    device.set_depth_state(prior);
    device.take_draws();

    // a map that was never rendered counts as absent
    let inputs = LightPassInputs::new()
        .with_gbuffer(gbuffer)
        .with_render_data(&data)
        .with_shadow_map(Some(&shadow_map));
    light_pass.render(&mut device, &inputs);

    assert_eq!(device.depth_state(), prior);
    let draw = &device.draws()[0];
    assert_eq!(draw.uniform("uShadow.hasShadow"), Some(UniformValue::Bool(shadow)));
    assert_eq!(draw.uniform("uIbl.enabled"), Some(UniformValue::Bool(ibl)));
    assert_eq!(draw.textures.len(), 5 + usize::from(shadow) * 4 + usize::from(ibl) * 2);
}

// ============================================================================
// Background and animation
// ============================================================================

#[rstest]
#[case::cleared(false)]
#[case::sky(true)]
fn test_background_pixels(#[case] with_environment: bool) {
    init_logging();
    let mut renderer = Renderer::new(HeadlessDevice::new(WIDTH, HEIGHT), test_config()).unwrap();
    let mut scene = Scene::new();
    spawn_camera(&mut scene, 6.0);
    if with_environment {
        let env = environment(renderer.device_mut(), false);
        let node = scene.spawn("environment", Transform::default());
        scene.add_component(node, env).unwrap();
    }
    renderer.render_frame(&mut scene, 0.0).unwrap();

    let expected = if with_environment { [1.0; 4] } else { [0.0, 0.0, 0.0, 1.0] };
    let device = renderer.device();
    assert_eq!(device.pixel(renderer.hdr_output(), 0, 0), Some(expected));
    assert_eq!(
        device.draws().iter().any(|d| d.program_label == "skybox"),
        with_environment
    );
}

#[test]
fn test_animation_drives_geometry() {
    init_logging();
    let mut renderer = Renderer::new(HeadlessDevice::new(WIDTH, HEIGHT), test_config()).unwrap();
    let mesh = Mesh::cube().upload(renderer.device_mut()).unwrap();

    let mut model = Model::new("mover");
    let material = model.add_material(Material::default());
    model
        .add_node(ModelNode::new("body", Transform::default()).with_primitive(mesh, material), None)
        .unwrap();
    let keyframes = vec![
        Keyframe::new(0.0).with_translation(Vec3::new(-2.0, 0.0, 0.0)),
        Keyframe::new(1.0).with_translation(Vec3::new(2.0, 0.0, 0.0)),
    ];
    model
        .add_animation(AnimationClip::new(
            "slide",
            vec![AnimationChannel::new(0, keyframes, InterpolationMode::Linear)],
        ))
        .unwrap();
    model.play_named("slide").unwrap();

    let mut scene = Scene::new();
    spawn_camera(&mut scene, 6.0);
    let node = scene.spawn("mover", Transform::default());
    scene.add_component(node, model).unwrap();

    let world_x = |renderer: &mut Renderer<HeadlessDevice>| {
        let draws = renderer.device_mut().take_draws();
        let draw = draws.iter().find(|d| d.program_label == "gbuffer").unwrap();
        match draw.uniform("uMatrices.world") {
            Some(UniformValue::Mat4(world)) => world.w_axis.x,
            other => panic!("unexpected world uniform {other:?}"),
        }
    };

    renderer.render_frame(&mut scene, 0.5).unwrap();
    assert!(world_x(&mut renderer).abs() < 1e-5);
    renderer.render_frame(&mut scene, 0.25).unwrap();
    assert!((world_x(&mut renderer) - 1.0).abs() < 1e-5);

    let device = renderer.destroy();
    assert_eq!(device.program_count(), 0);
}
