//! Deferred rendering demo
//!
//! Builds a small scene (ground plane, a row of spheres with varying
//! roughness, an animated cube, a sun and a point light under a sky
//! environment) and renders a fixed number of frames offscreen.
//!
//! ```bash
//! cargo run --example deferred_demo -- --backend wgpu --frames 120
//! ```

use std::error::Error;
use std::f32::consts::{FRAC_PI_2, PI, TAU};

use clap::{Parser, ValueEnum};
use deferred_engine::animation::{AnimationChannel, AnimationClip, InterpolationMode, Keyframe};
use deferred_engine::backend::{GraphicsDevice, HeadlessDevice, WgpuDevice};
use deferred_engine::resources::{Material, Mesh, Model, ModelNode, TextureData};
use deferred_engine::scene::{Camera, DirectionalLight, Environment, PointLight, Projection, Scene, Transform};
use deferred_engine::{BackendType, EngineConfig, Renderer, ShadowConfig};
use glam::{Quat, Vec3};

/// Device selection for the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliBackend {
    /// CPU reference device, records draws only
    #[default]
    Headless,
    /// wgpu offscreen rendering
    Wgpu,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Headless => BackendType::Headless,
            CliBackend::Wgpu => BackendType::Wgpu,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "deferred_demo", about = "Renders a deferred shading demo scene offscreen")]
struct Args {
    #[arg(long, value_enum, default_value_t = CliBackend::Headless)]
    backend: CliBackend,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Number of frames to render before exiting
    #[arg(long, default_value_t = 60)]
    frames: u64,

    #[arg(long, default_value_t = 1024)]
    shadow_resolution: u32,

    #[arg(long)]
    no_shadows: bool,
}

impl Args {
    fn config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_size(self.width, self.height)
            .with_backend(self.backend.into())
            .with_brdf_lut_size(128)
            .with_shadow(
                ShadowConfig::default()
                    .with_enabled(!self.no_shadows)
                    .with_resolution(self.shadow_resolution),
            )
            .with_clear_color([0.02, 0.02, 0.03, 1.0])
    }
}

type DemoResult<T> = Result<T, Box<dyn Error>>;

fn build_scene(device: &mut dyn GraphicsDevice, aspect: f32) -> DemoResult<Scene> {
    let mut scene = Scene::new();

    let camera = scene.spawn(
        "camera",
        Transform::from_position_rotation(Vec3::new(0.0, 3.0, 9.0), Quat::from_rotation_x(-0.3)),
    );
    scene.add_component(camera, Camera::new(Projection::perspective(60.0, aspect, 0.1, 200.0)))?;

    let sun = scene.spawn(
        "sun",
        Transform::from_position_rotation(Vec3::ZERO, Quat::from_euler(glam::EulerRot::YXZ, 0.6, -0.9, 0.0)),
    );
    scene.add_component(sun, DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), 3.0))?;

    let lamp = scene.spawn("lamp", Transform::from_position(Vec3::new(-2.0, 1.5, 2.0)));
    scene.add_component(lamp, PointLight::new(Vec3::new(1.0, 0.6, 0.3), 8.0, 6.0))?;

    let sky = TextureData::sky(64, [90, 140, 220, 255], [200, 210, 230, 255], [50, 45, 40, 255]).upload(device)?;
    let irradiance = TextureData::sky(8, [60, 80, 110, 255], [110, 115, 120, 255], [40, 35, 30, 255]).upload(device)?;
    let environment = scene.spawn("environment", Transform::default());
    scene.add_component(
        environment,
        Environment::new(sky).with_irradiance(irradiance).with_prefiltered(sky, 1),
    )?;

    let plane = Mesh::quad(20.0, 20.0).upload(device)?;
    let ground = scene.spawn(
        "ground",
        Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_x(-FRAC_PI_2)),
    );
    scene.add_component(ground, Model::single("ground", plane, Material::plastic(Vec3::splat(0.6))))?;

    let sphere = Mesh::sphere(32, 16).upload(device)?;
    let mut row = Model::new("spheres");
    for i in 0..5 {
        let roughness = 0.1 + 0.2 * i as f32;
        let material = row.add_material(Material::metal(Vec3::new(0.9, 0.6, 0.3), roughness));
        let node = ModelNode::new(
            &format!("sphere {i}"),
            Transform::from_position(Vec3::new(-3.0 + 1.5 * i as f32, 0.5, 0.0)),
        )
        .with_primitive(sphere, material);
        row.add_node(node, None)?;
    }
    let glass = row.add_material(Material::glass());
    row.add_node(
        ModelNode::new("glass", Transform::from_position(Vec3::new(0.0, 0.5, 2.0))).with_primitive(sphere, glass),
        None,
    )?;
    let spheres = scene.spawn("spheres", Transform::default());
    scene.add_component(spheres, row)?;

    let cube = Mesh::cube().upload(device)?;
    let mut spinner = Model::single("spinner", cube, Material::gold());
    let low = Vec3::new(3.0, 1.0, -2.0);
    let keyframes = vec![
        Keyframe::new(0.0).with_translation(low).with_rotation(Quat::IDENTITY),
        Keyframe::new(2.0)
            .with_translation(low + Vec3::Y)
            .with_rotation(Quat::from_rotation_y(PI)),
        Keyframe::new(4.0).with_translation(low).with_rotation(Quat::from_rotation_y(TAU)),
    ];
    spinner.add_animation(AnimationClip::new(
        "spin",
        vec![AnimationChannel::new(0, keyframes, InterpolationMode::Linear)],
    ))?;
    spinner.play_named("spin")?;
    let node = scene.spawn("spinner", Transform::default());
    scene.add_component(node, spinner)?;

    log::info!("Demo scene: {} nodes", scene.len());
    Ok(scene)
}

fn run<D: GraphicsDevice>(device: D, args: &Args) -> DemoResult<D> {
    let config = args.config();
    let aspect = config.width as f32 / config.height as f32;
    let mut renderer = Renderer::new(device, config)?;
    let mut scene = build_scene(renderer.device_mut(), aspect)?;

    let dt = 1.0 / 60.0;
    let start = std::time::Instant::now();
    for _ in 0..args.frames {
        renderer.render_frame(&mut scene, dt)?;
    }
    let elapsed = start.elapsed();
    log::info!(
        "Rendered {} frames in {:.2?} ({:.2?} per frame), shadows active: {}",
        renderer.frame_index(),
        elapsed,
        elapsed / args.frames.max(1) as u32,
        renderer.shadow_map().is_some_and(|map| map.is_active())
    );
    Ok(renderer.destroy())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match BackendType::from(args.backend) {
        BackendType::Headless => {
            run(HeadlessDevice::new(args.width, args.height), &args).map(|device| {
                log::info!("Headless device recorded {} draws", device.draws().len());
            })
        }
        BackendType::Wgpu => WgpuDevice::new(args.width, args.height)
            .map_err(Into::into)
            .and_then(|device| run(device, &args))
            .map(|_| ()),
    };

    if let Err(err) = result {
        log::error!("Demo failed: {err}");
        std::process::exit(1);
    }
}
