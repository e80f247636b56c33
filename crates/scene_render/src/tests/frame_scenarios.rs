//! Frame scenarios covering the index, sorting and instancing together

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::core::{QuadTreeConfig, RenderSystemConfig};
use crate::foundation::collections::{MaterialId, ObjectId};
use crate::foundation::math::{Mat4, Vec3};
use crate::render::{InstancingLayout, Material, RecordingBackend, RenderSystem, ShaderHandle};
use crate::scene::{Camera, Frustum, Geometry, GeometryHandle, RenderBatch, RenderObject, RenderObjectFlags, AABB};

const CRITERIA: RenderObjectFlags = RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA;

fn world_system(max_depth: u32) -> RenderSystem {
    let world = AABB::new(Vec3::repeat(-500.0), Vec3::repeat(500.0));
    let tree = QuadTreeConfig::default().with_world_bounds(world).with_max_depth(max_depth);
    RenderSystem::new(RenderSystemConfig::default().with_quad_tree(tree)).unwrap()
}

fn object_at(position: Vec3, extent: f32, material: MaterialId, geometry: u64) -> RenderObject {
    let bounds = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(extent));
    RenderObject::new()
        .with_transform(Mat4::new_translation(&position))
        .with_batch(RenderBatch::new(material, Some(Geometry::new(GeometryHandle(geometry), 36, bounds))))
}

fn random_position(rng: &mut StdRng) -> Vec3 {
    Vec3::new(
        rng.gen_range(-490.0..490.0),
        rng.gen_range(-490.0..490.0),
        rng.gen_range(-490.0..490.0),
    )
}

fn overhead_camera() -> Camera {
    let mut camera = Camera::perspective(Vec3::new(0.0, -60.0, 0.0), 60.0, 1.0, 1.0, 1000.0);
    camera.look_at(Vec3::zeros(), Vec3::z());
    camera
}

#[test]
fn test_thousand_objects_found_then_half_removed() {
    crate::foundation::logging::init_for_tests();
    let mut rng = StdRng::seed_from_u64(1000);
    let mut system = world_system(6);
    let material = system.add_material(Material::new("m")).unwrap();

    let mut ids: Vec<ObjectId> = (0..1000)
        .map(|_| {
            let position = random_position(&mut rng);
            let extent = rng.gen_range(0.0..8.0);
            system.render_permanent(object_at(position, extent, material, 1)).unwrap()
        })
        .collect();
    system.update(0.016);

    for &id in &ids {
        let bounds = *system.object(id).unwrap().world_bounding_box();
        assert!(system.spatial_index().query_aabb(&bounds).contains(&id));
    }

    ids.shuffle(&mut rng);
    let (removed, kept) = ids.split_at(500);
    for &id in removed {
        system.remove_from_render(id).unwrap();
    }
    system.update(0.016);
    let removed: HashSet<ObjectId> = removed.iter().copied().collect();

    let everything = Frustum::from_aabb(&AABB::new(Vec3::repeat(-600.0), Vec3::repeat(600.0)));
    let mut frustums = vec![everything.clone(), overhead_camera().frustum()];
    for _ in 0..10 {
        let mut camera = Camera::perspective(random_position(&mut rng), 70.0, 1.5, 1.0, 800.0);
        camera.look_at(random_position(&mut rng), Vec3::z());
        frustums.push(camera.frustum());
    }

    for frustum in &frustums {
        let mut visible = Vec::new();
        system.spatial_index().clip(frustum, CRITERIA, &mut visible);
        assert!(visible.iter().all(|id| !removed.contains(id)));
    }

    let mut all = Vec::new();
    system.spatial_index().clip(&everything, CRITERIA, &mut all);
    assert_eq!(all.len(), kept.len());
    assert_eq!(system.render_object_count(), 500);
}

#[test]
fn test_visible_set_independent_of_registration_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let positions: Vec<Vec3> = (0..200).map(|_| random_position(&mut rng)).collect();
    let camera = overhead_camera();

    let mut reference: Option<HashSet<usize>> = None;
    for seed in 0..4 {
        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut system = world_system(8);
        let material = system.add_material(Material::new("m")).unwrap();
        let mut index_of = std::collections::HashMap::new();
        for &i in &order {
            let id = system.render_permanent(object_at(positions[i], 3.0, material, 1)).unwrap();
            index_of.insert(id, i);
        }
        system.update(0.016);

        let mut visible = Vec::new();
        system.spatial_index().clip(&camera.frustum(), CRITERIA, &mut visible);
        let visible: HashSet<usize> = visible.iter().map(|id| index_of[id]).collect();

        match &reference {
            Some(expected) => assert_eq!(&visible, expected),
            None => reference = Some(visible),
        }
    }
}

fn instancing_scene(max_instances: u32) -> (RenderSystem, MaterialId) {
    let config = RenderSystemConfig::default().with_instancing(true, max_instances);
    let mut system = RenderSystem::new(config).unwrap();
    let material = system.add_material(Material::new("crate").with_instancing(true)).unwrap();
    system.set_main_camera(Some(overhead_camera()));
    (system, material)
}

#[test]
fn test_twenty_batches_render_as_two_instanced_draws() {
    let (mut system, material) = instancing_scene(64);
    for i in 0..20 {
        let geometry = if i < 10 { 1 } else { 2 };
        let position = Vec3::new((i % 5) as f32 * 4.0 - 8.0, (i / 5) as f32 * 4.0, 0.0);
        system.render_permanent(object_at(position, 1.0, material, geometry)).unwrap();
    }

    system.update(0.016);
    let mut backend = RecordingBackend::new().with_default_layout(InstancingLayout::default());
    let stats = system.render(&mut backend).unwrap();

    let counts: Vec<u32> = backend.instanced_draws().map(|draw| draw.instance_count).collect();
    assert_eq!(counts, vec![10, 10]);
    assert_eq!(backend.draws().count(), 0);
    assert_eq!(stats.batches, 20);
}

#[test]
fn test_instance_cap_splits_draws() {
    let (mut system, material) = instancing_scene(4);
    for i in 0..10 {
        system
            .render_permanent(object_at(Vec3::new(i as f32 * 3.0 - 15.0, 0.0, 0.0), 1.0, material, 1))
            .unwrap();
    }

    system.update(0.016);
    let mut backend = RecordingBackend::new().with_default_layout(InstancingLayout::default());
    let stats = system.render(&mut backend).unwrap();

    assert_eq!(stats.instanced_draw_calls, 3);
    assert_eq!(stats.instances, 10);
}

#[test]
fn test_moved_object_leaves_the_frame() {
    let (mut system, material) = instancing_scene(64);
    let id = system.render_permanent(object_at(Vec3::zeros(), 1.0, material, 1)).unwrap();

    system.update(0.016);
    let mut backend = RecordingBackend::new();
    assert_eq!(system.render(&mut backend).unwrap().visible_objects, 1);

    system.set_object_transform(id, Mat4::new_translation(&Vec3::new(0.0, -300.0, 0.0))).unwrap();
    system.update(0.016);
    assert_eq!(system.render(&mut backend).unwrap().visible_objects, 0);
}

#[test]
fn test_global_material_swap_across_shared_materials() {
    let mut system = world_system(6);
    let g1 = system.add_material(Material::new("g1")).unwrap();
    let g2 = system.add_material(Material::new("g2")).unwrap();
    let base = system.add_material(Material::new("base")).unwrap();
    let variants: Vec<MaterialId> = (0..3)
        .map(|i| system.add_material(Material::new(format!("variant{i}")).with_parent(base)).unwrap())
        .collect();
    let loner = system.add_material(Material::new("loner")).unwrap();

    for (i, material) in variants.iter().chain([loner].iter()).cycle().take(12).enumerate() {
        system
            .render_permanent(object_at(Vec3::new(i as f32 * 5.0, 0.0, 0.0), 1.0, *material, 1))
            .unwrap();
    }

    system.set_global_material(Some(g1));
    system.set_global_material(Some(g2));

    for &id in system.render_objects() {
        let object = system.object(id).unwrap();
        for batch in object.render_batches() {
            let materials = system.materials();
            assert_eq!(materials.root_material_of(batch.material), Some(g2));
            assert!(materials.ancestors(batch.material).all(|ancestor| ancestor != g1));
        }
    }
    assert_eq!(system.materials().parent_of(g1), None);
}

#[test]
fn test_global_material_keeps_instancing_per_material() {
    let (mut system, rock) = instancing_scene(64);
    let global = system.add_material(Material::new("global")).unwrap();
    let tree = system.add_material(Material::new("tree").with_instancing(true)).unwrap();
    system.set_global_material(Some(global));

    for (i, material) in [rock, tree, rock, tree].into_iter().enumerate() {
        system
            .render_permanent(object_at(Vec3::new(i as f32 * 3.0, 0.0, 0.0), 1.0, material, 1))
            .unwrap();
    }
    system.update(0.016);

    let mut backend = RecordingBackend::new();
    backend.set_layout(rock, InstancingLayout { shader: ShaderHandle(1), ..Default::default() });
    backend.set_layout(tree, InstancingLayout { shader: ShaderHandle(2), ..Default::default() });
    system.render(&mut backend).unwrap();

    let mut draws: Vec<(ShaderHandle, u32)> =
        backend.instanced_draws().map(|draw| (draw.shader, draw.instance_count)).collect();
    draws.sort_by_key(|(shader, _)| shader.0);
    assert_eq!(draws, vec![(ShaderHandle(1), 2), (ShaderHandle(2), 2)]);
}
