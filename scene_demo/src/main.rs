//! Drifting field demo
//!
//! Scatters a few thousand render objects over a square world, drifts them
//! around and renders every frame into a recording backend. Frame statistics
//! are logged so the effect of culling and instancing can be watched without
//! a GPU.
//!
//! Usage: `drifting_field [config.toml|config.ron]`

use std::cell::Cell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scene_render::prelude::*;
use scene_render::render::{DynamicParam, InstancedUniform, InstancingLayout, UniformSource};

const WORLD_HALF_SIZE: f32 = 400.0;
const NUM_CRATES: usize = 2000;
const NUM_GLASS: usize = 200;
const NUM_LAMPS: usize = 6;
const FRAMES: u32 = 240;
const FRAME_TIME: f32 = 1.0 / 60.0;
const MAX_SPEED: f32 = 12.0;

struct Drifter {
    id: ObjectId,
    position: Vec3,
    velocity: Vec3,
}

/// Counts ticks and simulated time seen through the render system's update
struct FrameClock {
    ticks: Rc<Cell<(u32, f32)>>,
}

impl RenderUpdatable for FrameClock {
    fn render_update(&mut self, camera: Option<&Camera>, time_elapsed: f32) {
        if camera.is_some() {
            let (frames, seconds) = self.ticks.get();
            self.ticks.set((frames + 1, seconds + time_elapsed));
        }
    }
}

fn random_point(rng: &mut StdRng, half_size: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-half_size..half_size),
        rng.gen_range(-half_size..half_size),
        rng.gen_range(0.0..20.0),
    )
}

fn cube(handle: u64, half_size: f32) -> Geometry {
    Geometry::new(GeometryHandle(handle), 36, AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(half_size)))
}

fn orbit_camera(angle: f32) -> Camera {
    let position = Vec3::new(angle.cos() * 250.0, angle.sin() * 250.0, 120.0);
    let mut camera = Camera::perspective(position, 60.0, 16.0 / 9.0, 1.0, 900.0);
    camera.look_at(Vec3::zeros(), Vec3::z());
    camera
}

fn load_config() -> Result<RenderSystemConfig, Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        let world = AABB::new(
            Vec3::new(-WORLD_HALF_SIZE, -WORLD_HALF_SIZE, -50.0),
            Vec3::new(WORLD_HALF_SIZE, WORLD_HALF_SIZE, 50.0),
        );
        return Ok(RenderSystemConfig::default()
            .with_quad_tree(QuadTreeConfig::default().with_world_bounds(world).with_max_depth(8)));
    };

    log::info!("Loading render config from {}", path);
    let config = RenderSystemConfig::load_from_file(&path)?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut system = RenderSystem::new(load_config()?)?;

    let global = system.add_material(Material::new("global").with_property("fogDensity", &[0.002]))?;
    system.set_global_material(Some(global));

    let crate_base = system.add_material(Material::new("crate_base").with_instancing(true))?;
    let crate_wood = system.add_material(Material::new("crate_wood").with_parent(crate_base))?;
    let crate_metal = system.add_material(Material::new("crate_metal").with_parent(crate_base))?;
    let glass = system.add_material(Material::new("glass").with_render_layer(RenderLayerId::Translucent))?;

    for _ in 0..NUM_LAMPS {
        let light = Light::point(random_point(&mut rng, WORLD_HALF_SIZE), Vec3::new(1.0, 0.9, 0.7), 2.0);
        system.add_light(light.with_dynamic(true));
    }

    let mut drifters = Vec::with_capacity(NUM_CRATES + NUM_GLASS);
    for i in 0..NUM_CRATES + NUM_GLASS {
        let position = random_point(&mut rng, WORLD_HALF_SIZE * 0.95);
        let batch = if i < NUM_CRATES {
            let material = if i % 3 == 0 { crate_metal } else { crate_wood };
            RenderBatch::new(material, Some(cube(1 + (i % 2) as u64, 1.5)))
        } else {
            RenderBatch::new(glass, Some(cube(3, 2.5)))
        };

        let object = RenderObject::new()
            .with_transform(Mat4::new_translation(&position))
            .with_batch(batch);
        let velocity = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0) * MAX_SPEED;
        drifters.push(Drifter {
            id: system.render_permanent(object)?,
            position,
            velocity,
        });
    }
    log::info!("Registered {} render objects", system.render_object_count());

    let ticks = Rc::new(Cell::new((0, 0.0)));
    let clock = system.register_for_update(Box::new(FrameClock { ticks: Rc::clone(&ticks) }));

    let layout = InstancingLayout {
        uniforms: vec![
            InstancedUniform::new("worldMatrix", UniformSource::Dynamic(DynamicParam::WorldMatrix), 64),
            InstancedUniform::new("tint", UniformSource::Property("tint".to_string()), 16),
        ],
        shared_params: vec![DynamicParam::LightPosition],
        ..Default::default()
    };
    let mut backend = RecordingBackend::new()
        .with_antialiasing(AntialiasingType::Msaa4x)
        .with_default_layout(layout);

    let mut angle = 0.0_f32;
    let mut totals = FrameStats::default();
    for frame in 0..FRAMES {
        for drifter in &mut drifters {
            drifter.position += drifter.velocity * FRAME_TIME;
            for axis in 0..2 {
                if drifter.position[axis].abs() > WORLD_HALF_SIZE * 0.95 {
                    drifter.velocity[axis] = -drifter.velocity[axis];
                }
            }
            system.set_object_transform(drifter.id, Mat4::new_translation(&drifter.position))?;
        }

        angle += FRAME_TIME * 0.2;
        system.set_main_camera(Some(orbit_camera(angle)));
        system.update(FRAME_TIME);

        backend.clear();
        let stats = system.render(&mut backend)?;
        totals.visible_objects += stats.visible_objects;
        totals.draw_calls += stats.draw_calls;
        totals.instanced_draw_calls += stats.instanced_draw_calls;
        totals.instances += stats.instances;

        if frame % 60 == 0 {
            log::info!(
                "Frame {}: {} visible, {} batches, {} draws, {} instanced draws ({} instances)",
                frame,
                stats.visible_objects,
                stats.batches,
                stats.draw_calls,
                stats.instanced_draw_calls,
                stats.instances
            );
        }
    }

    system.unregister_from_update(clock)?;
    let (ticked, seconds) = ticks.get();
    log::info!("Updatables ticked {} times over {:.2}s", ticked, seconds);
    log::info!(
        "{} frames: avg {:.1} visible, avg {:.1} draw calls, antialiasing {:?}",
        FRAMES,
        totals.visible_objects as f32 / FRAMES as f32,
        totals.total_draw_calls() as f32 / FRAMES as f32,
        system.main_pass_config().antialiasing
    );
    Ok(())
}
