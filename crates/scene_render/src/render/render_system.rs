//! # Render System
//!
//! Owns every render object, light and material of a scene and drives the
//! frame:
//!
//! - `update()` drains the marked-object queue, refreshes world boxes and
//!   spatial index entries, runs budgeted index maintenance, reassigns
//!   nearest lights when lights moved and ticks per-frame updatables.
//! - `render()` negotiates antialiasing and hands the frame to the main
//!   forward pass.
//!
//! Objects are handed over by value on registration and handed back on
//! removal. All mutation of a registered object goes through the system so
//! the spatial index and batch registry never go stale.

use super::backend::{LoadAction, RenderBackend, RenderPassConfig, RenderTargetHandle, Viewport};
use super::batch_registry::BatchRegistry;
use super::material::{Material, MaterialLibrary};
use super::render_pass::{MainForwardRenderPass, PassInputs};
use super::{FrameStats, RenderError, RenderResult};
use crate::core::{QualityConfig, RenderSystemConfig};
use crate::foundation::collections::{
    remove_exchanging_with_last, LightId, MaterialId, ObjectId, SlotMap, UpdatableId,
};
use crate::foundation::math::{Mat4, Vec3};
use crate::scene::{Camera, Light, RenderBatch, RenderObject, RenderObjectFlags};
use crate::spatial::{QuadTree, SpatialIndex};

/// Lights further away than this (squared) are never assigned
const NEAREST_LIGHT_MAX_DISTANCE_SQUARED: f32 = 10_000_000.0;

/// Something that wants a callback once per frame after objects are updated
pub trait RenderUpdatable {
    fn render_update(&mut self, camera: Option<&Camera>, time_elapsed: f32);
}

/// Nearest dynamic light to `position`
///
/// With a single light it is used whenever it is dynamic. Otherwise the
/// closest dynamic light wins and ties go to the earlier light.
fn find_nearest_light(position: Vec3, lights: &SlotMap<LightId, Light>, order: &[LightId]) -> Option<LightId> {
    if let [only] = order {
        return lights.get(*only).filter(|light| light.is_dynamic()).map(|_| *only);
    }

    let mut nearest = None;
    let mut nearest_distance = NEAREST_LIGHT_MAX_DISTANCE_SQUARED;
    for &id in order {
        let Some(light) = lights.get(id) else {
            continue;
        };
        if !light.is_dynamic() {
            continue;
        }
        let distance = (light.position - position).norm_squared();
        if distance < nearest_distance {
            nearest_distance = distance;
            nearest = Some(id);
        }
    }
    nearest
}

fn light_probe_position(object: &RenderObject) -> Vec3 {
    let bounds = object.world_bounding_box();
    if bounds.is_empty() {
        object.world_position()
    } else {
        bounds.center()
    }
}

pub struct RenderSystem {
    config: RenderSystemConfig,
    objects: SlotMap<ObjectId, RenderObject>,
    render_objects: Vec<ObjectId>,
    marked_objects: Vec<ObjectId>,
    lights: SlotMap<LightId, Light>,
    light_order: Vec<LightId>,
    moved_lights: Vec<LightId>,
    force_update_lights: bool,
    updatables: SlotMap<UpdatableId, Box<dyn RenderUpdatable>>,
    updatable_order: Vec<UpdatableId>,
    main_camera: Option<Camera>,
    draw_camera: Option<Camera>,
    materials: MaterialLibrary,
    batches: BatchRegistry,
    spatial_index: Box<dyn SpatialIndex>,
    main_pass: MainForwardRenderPass,
    hierarchy_initialized: bool,
}

impl RenderSystem {
    /// Create a render system backed by a quad tree
    pub fn new(config: RenderSystemConfig) -> RenderResult<Self> {
        let tree = QuadTree::new(config.quad_tree.clone());
        Self::with_spatial_index(config, Box::new(tree))
    }

    /// Create a render system over a caller-supplied spatial index
    pub fn with_spatial_index(config: RenderSystemConfig, spatial_index: Box<dyn SpatialIndex>) -> RenderResult<Self> {
        config.validate().map_err(RenderError::InvalidConfig)?;
        log::info!(
            "Render system created: {} layers, instancing {} (max {})",
            config.layers.len(),
            if config.instancing.enabled { "on" } else { "off" },
            config.instancing.max_instances
        );

        Ok(Self {
            main_pass: MainForwardRenderPass::new(&config),
            config,
            objects: SlotMap::with_key(),
            render_objects: Vec::new(),
            marked_objects: Vec::new(),
            lights: SlotMap::with_key(),
            light_order: Vec::new(),
            moved_lights: Vec::new(),
            force_update_lights: false,
            updatables: SlotMap::with_key(),
            updatable_order: Vec::new(),
            main_camera: None,
            draw_camera: None,
            materials: MaterialLibrary::new(),
            batches: BatchRegistry::new(),
            spatial_index,
            hierarchy_initialized: false,
        })
    }

    pub fn config(&self) -> &RenderSystemConfig {
        &self.config
    }

    // ---- Objects ----

    /// Register an object for rendering and take ownership of it
    pub fn render_permanent(&mut self, mut object: RenderObject) -> RenderResult<ObjectId> {
        if let Some(index) = object.remove_index() {
            return Err(RenderError::ObjectAlreadyRegistered(index));
        }

        object.remove_index = Some(self.render_objects.len());
        object.set_flags(RenderObjectFlags::NEED_UPDATE | RenderObjectFlags::MARKED_FOR_UPDATE, false);
        object.recalculate_world_bounding_box();
        object.set_light(find_nearest_light(light_probe_position(&object), &self.lights, &self.light_order));

        for batch in object.render_batches() {
            self.batches.register_batch(batch, &mut self.materials);
        }

        let bounds = *object.world_bounding_box();
        let flags = object.flags();
        let id = self.objects.insert(object);
        self.render_objects.push(id);
        self.spatial_index.add_object(id, &bounds, flags);

        log::debug!("Registered render object {:?} ({} total)", id, self.render_objects.len());
        Ok(id)
    }

    /// Unregister an object and hand it back to the caller
    pub fn remove_from_render(&mut self, id: ObjectId) -> RenderResult<RenderObject> {
        let Some(remove_index) = self.objects.get(id).and_then(RenderObject::remove_index) else {
            return Err(RenderError::ObjectNotRegistered(id));
        };

        remove_exchanging_with_last(&mut self.marked_objects, &id);

        self.render_objects.swap_remove(remove_index);
        if let Some(&moved) = self.render_objects.get(remove_index) {
            if let Some(moved_object) = self.objects.get_mut(moved) {
                moved_object.remove_index = Some(remove_index);
            }
        }

        if !self.spatial_index.remove_object(id) {
            log::warn!("Render object {:?} was missing from the spatial index", id);
        }

        let mut object = self
            .objects
            .remove(id)
            .ok_or(RenderError::ObjectNotRegistered(id))?;
        for batch in object.render_batches() {
            self.batches.unregister_batch(batch);
        }
        object.remove_index = None;
        object.set_flags(RenderObjectFlags::MARKED_FOR_UPDATE, false);

        log::debug!("Removed render object {:?} ({} left)", id, self.render_objects.len());
        Ok(object)
    }

    pub fn object(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    pub fn objects(&self) -> &SlotMap<ObjectId, RenderObject> {
        &self.objects
    }

    /// Registered objects in registration-array order
    pub fn render_objects(&self) -> &[ObjectId] {
        &self.render_objects
    }

    pub fn render_object_count(&self) -> usize {
        self.render_objects.len()
    }

    /// Objects waiting for the next `update`
    pub fn marked_objects(&self) -> &[ObjectId] {
        &self.marked_objects
    }

    fn object_mut(&mut self, id: ObjectId) -> RenderResult<&mut RenderObject> {
        self.objects.get_mut(id).ok_or(RenderError::ObjectNotRegistered(id))
    }

    /// Queue an object's world data for recomputation on the next update
    ///
    /// Objects failing the clipping criteria only get `NEED_UPDATE`; they are
    /// queued once they become visible again.
    pub fn mark_for_update(&mut self, id: ObjectId) -> RenderResult<()> {
        let object = self.object_mut(id)?;
        if object.has_flags(RenderObjectFlags::MARKED_FOR_UPDATE) {
            return Ok(());
        }

        object.set_flags(RenderObjectFlags::NEED_UPDATE, true);
        if object.has_flags(RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA) {
            object.set_flags(RenderObjectFlags::MARKED_FOR_UPDATE, true);
            self.marked_objects.push(id);
        }
        Ok(())
    }

    /// Move an object; takes effect on the next update
    pub fn set_object_transform(&mut self, id: ObjectId, world_transform: Mat4) -> RenderResult<()> {
        self.object_mut(id)?.set_world_transform(world_transform);
        self.mark_for_update(id)
    }

    /// Set or clear object flags and keep the spatial index in step
    pub fn set_object_flags(&mut self, id: ObjectId, flags: RenderObjectFlags, enabled: bool) -> RenderResult<()> {
        let object = self.object_mut(id)?;
        object.set_flags(flags, enabled);
        let current = object.flags();
        self.spatial_index.set_object_flags(id, current);

        let stale = current.contains(RenderObjectFlags::NEED_UPDATE | RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA)
            && !current.contains(RenderObjectFlags::MARKED_FOR_UPDATE);
        if stale {
            self.mark_for_update(id)?;
        }
        Ok(())
    }

    pub fn set_lod_and_switch(&mut self, id: ObjectId, lod_index: Option<u32>, switch_index: Option<u32>) -> RenderResult<()> {
        self.object_mut(id)?.set_lod_and_switch(lod_index, switch_index);
        Ok(())
    }

    /// Attach a batch to a registered object
    pub fn add_render_batch(&mut self, id: ObjectId, batch: RenderBatch) -> RenderResult<()> {
        let object = self.objects.get_mut(id).ok_or(RenderError::ObjectNotRegistered(id))?;
        self.batches.register_batch(&batch, &mut self.materials);
        object.add_render_batch(batch);
        self.mark_for_update(id)
    }

    /// Detach a batch from a registered object
    pub fn remove_render_batch(&mut self, id: ObjectId, index: usize) -> RenderResult<RenderBatch> {
        let batch = self
            .object_mut(id)?
            .remove_render_batch(index)
            .ok_or(RenderError::BatchNotFound(id, index))?;
        self.batches.unregister_batch(&batch);
        self.mark_for_update(id)?;
        Ok(batch)
    }

    /// Swap one batch of a registered object for another
    pub fn replace_render_batch(&mut self, id: ObjectId, index: usize, batch: RenderBatch) -> RenderResult<RenderBatch> {
        let object = self.objects.get_mut(id).ok_or(RenderError::ObjectNotRegistered(id))?;
        if object.render_batch(index).is_none() {
            return Err(RenderError::BatchNotFound(id, index));
        }

        self.batches.register_batch(&batch, &mut self.materials);
        let old = object
            .replace_render_batch(index, batch)
            .ok_or(RenderError::BatchNotFound(id, index))?;
        self.batches.unregister_batch(&old);
        self.mark_for_update(id)?;
        Ok(old)
    }

    // ---- Materials ----

    pub fn materials(&self) -> &MaterialLibrary {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialLibrary {
        &mut self.materials
    }

    pub fn add_material(&mut self, material: Material) -> RenderResult<MaterialId> {
        self.materials.insert(material)
    }

    pub fn batch_registry(&self) -> &BatchRegistry {
        &self.batches
    }

    /// Root a material's chain at the global material
    pub fn register_material(&mut self, material: MaterialId) -> RenderResult<()> {
        self.batches.register_material(material, &mut self.materials)
    }

    pub fn unregister_material(&mut self, material: Option<MaterialId>) {
        self.batches.unregister_material(material);
    }

    pub fn global_material(&self) -> Option<MaterialId> {
        self.batches.global_material()
    }

    pub fn set_global_material(&mut self, material: Option<MaterialId>) {
        self.batches.set_global_material(material, &mut self.materials);
    }

    // ---- Lights ----

    /// Register a light; every object's nearest light is recomputed
    pub fn add_light(&mut self, light: Light) -> LightId {
        let id = self.lights.insert(light);
        self.light_order.push(id);
        self.find_all_nearest_lights();
        id
    }

    /// Unregister a light and hand it back
    pub fn remove_light(&mut self, id: LightId) -> RenderResult<Light> {
        let light = self.lights.remove(id).ok_or(RenderError::LightNotRegistered(id))?;
        remove_exchanging_with_last(&mut self.light_order, &id);
        remove_exchanging_with_last(&mut self.moved_lights, &id);
        self.find_all_nearest_lights();
        Ok(light)
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id)
    }

    /// Registered lights in array order
    pub fn lights(&self) -> impl Iterator<Item = (LightId, &Light)> + '_ {
        self.light_order
            .iter()
            .filter_map(move |&id| self.lights.get(id).map(|light| (id, light)))
    }

    /// Note that a light changed; nearest lights are recomputed on the next update
    pub fn mark_light_for_update(&mut self, id: LightId) -> RenderResult<()> {
        if !self.lights.contains_key(id) {
            return Err(RenderError::LightNotRegistered(id));
        }
        if !self.moved_lights.contains(&id) {
            self.moved_lights.push(id);
        }
        Ok(())
    }

    pub fn set_light_position(&mut self, id: LightId, position: Vec3) -> RenderResult<()> {
        let light = self.lights.get_mut(id).ok_or(RenderError::LightNotRegistered(id))?;
        light.position = position;
        self.mark_light_for_update(id)
    }

    pub fn set_light_dynamic(&mut self, id: LightId, dynamic: bool) -> RenderResult<()> {
        let light = self.lights.get_mut(id).ok_or(RenderError::LightNotRegistered(id))?;
        light.set_dynamic(dynamic);
        self.mark_light_for_update(id)
    }

    /// Recompute every object's nearest light on the next update
    pub fn set_force_update_lights(&mut self) {
        self.force_update_lights = true;
    }

    fn find_all_nearest_lights(&mut self) {
        for object in self.objects.values_mut() {
            object.set_light(find_nearest_light(light_probe_position(object), &self.lights, &self.light_order));
        }
    }

    // ---- Per-frame updatables ----

    pub fn register_for_update(&mut self, updatable: Box<dyn RenderUpdatable>) -> UpdatableId {
        let id = self.updatables.insert(updatable);
        self.updatable_order.push(id);
        id
    }

    /// Stop ticking an updatable and hand it back
    pub fn unregister_from_update(&mut self, id: UpdatableId) -> RenderResult<Box<dyn RenderUpdatable>> {
        let updatable = self.updatables.remove(id).ok_or(RenderError::UpdatableNotRegistered(id))?;
        remove_exchanging_with_last(&mut self.updatable_order, &id);
        Ok(updatable)
    }

    // ---- Cameras ----

    pub fn main_camera(&self) -> Option<&Camera> {
        self.main_camera.as_ref()
    }

    /// Camera visibility is computed for
    pub fn set_main_camera(&mut self, camera: Option<Camera>) {
        self.main_camera = camera;
    }

    pub fn draw_camera(&self) -> Option<&Camera> {
        self.draw_camera.as_ref()
    }

    /// Camera used for sorting and drawing; falls back to the main camera
    pub fn set_draw_camera(&mut self, camera: Option<Camera>) {
        self.draw_camera = camera;
    }

    // ---- Frame ----

    pub fn spatial_index(&self) -> &dyn SpatialIndex {
        self.spatial_index.as_ref()
    }

    pub fn is_hierarchy_initialized(&self) -> bool {
        self.hierarchy_initialized
    }

    /// Bring world data, the spatial index and light assignment up to date
    pub fn update(&mut self, time_elapsed: f32) {
        if !self.hierarchy_initialized {
            self.spatial_index.initialize();
            self.hierarchy_initialized = true;
        }

        let mut marked = std::mem::take(&mut self.marked_objects);
        for &id in &marked {
            let Some(object) = self.objects.get_mut(id) else {
                log::warn!("Marked render object {:?} is gone", id);
                continue;
            };

            object.recalculate_world_bounding_box();
            object.set_light(find_nearest_light(light_probe_position(object), &self.lights, &self.light_order));
            if object.remove_index().is_some() {
                self.spatial_index.object_updated(id, object.world_bounding_box());
            }
            object.set_flags(
                RenderObjectFlags::NEED_UPDATE
                    | RenderObjectFlags::MARKED_FOR_UPDATE
                    | RenderObjectFlags::TRANSFORM_UPDATED,
                false,
            );
        }
        marked.clear();
        self.marked_objects = marked;

        self.spatial_index.update();

        if !self.moved_lights.is_empty() || self.force_update_lights {
            self.find_all_nearest_lights();
            self.moved_lights.clear();
            self.force_update_lights = false;
        }

        for id in &self.updatable_order {
            if let Some(updatable) = self.updatables.get_mut(*id) {
                updatable.render_update(self.main_camera.as_ref(), time_elapsed);
            }
        }
    }

    /// Draw the frame through the main forward pass
    pub fn render(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<FrameStats> {
        let camera = self.main_camera.as_ref().ok_or(RenderError::NoCamera)?;
        let draw_camera = self.draw_camera.as_ref().unwrap_or(camera);

        self.main_pass.configure_antialiasing(&self.config.quality, &*backend);

        let inputs = PassInputs {
            camera,
            draw_camera,
            index: self.spatial_index.as_ref(),
            objects: &self.objects,
            materials: &self.materials,
            lights: &self.lights,
        };
        self.main_pass.draw(&inputs, RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA, backend)
    }

    // ---- Main pass settings ----

    pub fn main_pass(&self) -> &MainForwardRenderPass {
        &self.main_pass
    }

    pub fn main_pass_mut(&mut self) -> &mut MainForwardRenderPass {
        &mut self.main_pass
    }

    pub fn main_pass_config(&self) -> &RenderPassConfig {
        self.main_pass.pass_config()
    }

    pub fn set_antialiasing_allowed(&mut self, allowed: bool) {
        self.config.quality.allow_antialiasing = allowed;
    }

    pub fn set_quality(&mut self, quality: QualityConfig) {
        self.config.quality = quality;
    }

    pub fn set_main_render_target(&mut self, target: Option<RenderTargetHandle>, color_load: LoadAction, clear_color: [f32; 4]) {
        self.main_pass.set_render_target(target, color_load, clear_color);
    }

    pub fn set_main_pass_properties(&mut self, priority: i32, viewport: Viewport) {
        self.main_pass.set_main_pass_properties(priority, viewport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QuadTreeConfig;
    use crate::render::backend::{AntialiasingType, RecordingBackend, StoreAction};
    use crate::scene::{Geometry, GeometryHandle, AABB};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn system() -> RenderSystem {
        let bounds = AABB::new(Vec3::repeat(-500.0), Vec3::repeat(500.0));
        let config = RenderSystemConfig::default().with_quad_tree(QuadTreeConfig::default().with_world_bounds(bounds));
        RenderSystem::new(config).unwrap()
    }

    fn cube(position: Vec3, material: MaterialId) -> RenderObject {
        let geometry = Geometry::new(GeometryHandle(1), 36, AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0)));
        RenderObject::new()
            .with_transform(Mat4::new_translation(&position))
            .with_batch(RenderBatch::new(material, Some(geometry)))
    }

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, -100.0, 0.0), 60.0, 1.0, 1.0, 1000.0);
        camera.look_at(Vec3::zeros(), Vec3::z());
        camera
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RenderSystemConfig::default().with_instancing(true, 0);
        assert!(matches!(RenderSystem::new(config), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_double_registration_is_reported() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();

        let copy = system.object(id).unwrap().clone();
        assert_eq!(system.render_permanent(copy), Err(RenderError::ObjectAlreadyRegistered(0)));
        assert_eq!(system.render_object_count(), 1);
    }

    #[test]
    fn test_removal_fixes_remove_indices() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let ids: Vec<_> = (0..4)
            .map(|i| system.render_permanent(cube(Vec3::new(i as f32 * 10.0, 0.0, 0.0), material)).unwrap())
            .collect();

        let removed = system.remove_from_render(ids[1]).unwrap();
        assert_eq!(removed.remove_index(), None);
        assert_eq!(system.render_objects(), &[ids[0], ids[3], ids[2]]);
        for (index, id) in system.render_objects().iter().enumerate() {
            assert_eq!(system.object(*id).unwrap().remove_index(), Some(index));
        }
        assert_eq!(system.batch_registry().batch_count(material), 3);

        assert_eq!(system.remove_from_render(ids[1]).map(|_| ()), Err(RenderError::ObjectNotRegistered(ids[1])));

        // A removed object can come back
        let back = system.render_permanent(removed).unwrap();
        assert_eq!(system.object(back).unwrap().remove_index(), Some(3));
    }

    #[test]
    fn test_marked_object_moves_in_index_on_update() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();
        system.update(0.016);

        system.set_object_transform(id, Mat4::new_translation(&Vec3::new(200.0, 200.0, 0.0))).unwrap();
        system.set_object_transform(id, Mat4::new_translation(&Vec3::new(300.0, 300.0, 0.0))).unwrap();
        assert_eq!(system.marked_objects(), &[id]);

        system.update(0.016);
        assert!(system.marked_objects().is_empty());

        let object = system.object(id).unwrap();
        assert!(!object.has_flags(RenderObjectFlags::NEED_UPDATE));
        assert!(!object.has_flags(RenderObjectFlags::MARKED_FOR_UPDATE));

        let query = AABB::from_center_extents(Vec3::new(300.0, 300.0, 0.0), Vec3::repeat(5.0));
        assert_eq!(system.spatial_index().query_aabb(&query), vec![id]);
        let origin = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(5.0));
        assert!(system.spatial_index().query_aabb(&origin).is_empty());
    }

    #[test]
    fn test_hidden_object_is_queued_when_shown_again() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();
        system.update(0.016);

        system.set_object_flags(id, RenderObjectFlags::VISIBLE, false).unwrap();
        system.set_object_transform(id, Mat4::new_translation(&Vec3::new(100.0, 0.0, 0.0))).unwrap();
        assert!(system.marked_objects().is_empty());
        assert!(system.object(id).unwrap().has_flags(RenderObjectFlags::NEED_UPDATE));

        system.set_object_flags(id, RenderObjectFlags::VISIBLE, true).unwrap();
        assert_eq!(system.marked_objects(), &[id]);

        system.update(0.016);
        let query = AABB::from_center_extents(Vec3::new(100.0, 0.0, 0.0), Vec3::repeat(2.0));
        assert_eq!(system.spatial_index().query_aabb(&query), vec![id]);
    }

    #[test]
    fn test_unknown_object_mutations_fail() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();
        system.remove_from_render(id).unwrap();

        assert_eq!(system.mark_for_update(id), Err(RenderError::ObjectNotRegistered(id)));
        assert_eq!(
            system.set_lod_and_switch(id, Some(0), Some(0)),
            Err(RenderError::ObjectNotRegistered(id))
        );
    }

    #[test]
    fn test_single_light_assigned_only_when_dynamic() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();

        let sun = system.add_light(Light::directional(Vec3::new(0.0, 0.0, -1.0), Vec3::repeat(1.0), 1.0));
        assert_eq!(system.object(id).unwrap().light(), None);

        system.set_light_dynamic(sun, true).unwrap();
        system.update(0.016);
        assert_eq!(system.object(id).unwrap().light(), Some(sun));
    }

    #[test]
    fn test_nearest_dynamic_light_wins() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();

        let far = system.add_light(Light::point(Vec3::new(50.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0));
        let near = system.add_light(Light::point(Vec3::new(10.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0));
        let nearest_static = system.add_light(
            Light::point(Vec3::new(1.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0).with_dynamic(false),
        );
        assert_eq!(system.object(id).unwrap().light(), Some(near));

        system.set_light_position(far, Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert_eq!(system.object(id).unwrap().light(), Some(near));
        system.update(0.016);
        assert_eq!(system.object(id).unwrap().light(), Some(far));

        system.remove_light(far).unwrap();
        assert_eq!(system.object(id).unwrap().light(), Some(near));
        assert!(system.lights().all(|(light, _)| light != far));
        assert!(system.light(nearest_static).is_some());
    }

    #[test]
    fn test_equidistant_lights_prefer_first() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();

        let first = system.add_light(Light::point(Vec3::new(5.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0));
        system.add_light(Light::point(Vec3::new(-5.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0));
        assert_eq!(system.object(id).unwrap().light(), Some(first));
    }

    #[test]
    fn test_lights_beyond_range_are_ignored() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();

        system.add_light(Light::point(Vec3::new(4000.0, 0.0, 0.0), Vec3::repeat(1.0), 1.0));
        system.add_light(Light::point(Vec3::new(0.0, 4000.0, 0.0), Vec3::repeat(1.0), 1.0));
        assert_eq!(system.object(id).unwrap().light(), None);
    }

    struct Ticker {
        name: &'static str,
        log: Rc<RefCell<Vec<(&'static str, f32, bool)>>>,
    }

    impl RenderUpdatable for Ticker {
        fn render_update(&mut self, camera: Option<&Camera>, time_elapsed: f32) {
            self.log.borrow_mut().push((self.name, time_elapsed, camera.is_some()));
        }
    }

    #[test]
    fn test_updatables_tick_every_update() {
        let mut system = system();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = system.register_for_update(Box::new(Ticker { name: "a", log: log.clone() }));
        system.register_for_update(Box::new(Ticker { name: "b", log: log.clone() }));
        system.set_main_camera(Some(camera()));

        system.update(0.5);
        assert_eq!(*log.borrow(), vec![("a", 0.5, true), ("b", 0.5, true)]);

        system.unregister_from_update(a).unwrap();
        assert!(matches!(system.unregister_from_update(a), Err(RenderError::UpdatableNotRegistered(_))));
        log.borrow_mut().clear();
        system.update(0.25);
        assert_eq!(*log.borrow(), vec![("b", 0.25, true)]);
    }

    #[test]
    fn test_batch_edits_keep_registry_in_step() {
        let mut system = system();
        let a = system.add_material(Material::new("a")).unwrap();
        let b = system.add_material(Material::new("b")).unwrap();
        let id = system.render_permanent(cube(Vec3::zeros(), a)).unwrap();

        system.add_render_batch(id, RenderBatch::new(b, None)).unwrap();
        assert_eq!(system.batch_registry().batch_count(b), 1);

        let old = system.replace_render_batch(id, 0, RenderBatch::new(b, None)).unwrap();
        assert_eq!(old.material, a);
        assert_eq!(system.batch_registry().batch_count(a), 0);
        assert_eq!(system.batch_registry().batch_count(b), 2);

        assert!(matches!(system.remove_render_batch(id, 5), Err(RenderError::BatchNotFound(_, 5))));
        system.remove_render_batch(id, 1).unwrap();
        assert_eq!(system.batch_registry().batch_count(b), 1);

        system.remove_from_render(id).unwrap();
        assert_eq!(system.batch_registry().total_batches(), 0);
    }

    #[test]
    fn test_global_material_reaches_registered_batches() {
        let mut system = system();
        let g1 = system.add_material(Material::new("g1")).unwrap();
        let g2 = system.add_material(Material::new("g2")).unwrap();
        let base = system.add_material(Material::new("base")).unwrap();
        let leaf = system.add_material(Material::new("leaf").with_parent(base)).unwrap();

        system.set_global_material(Some(g1));
        let id = system.render_permanent(cube(Vec3::zeros(), leaf)).unwrap();
        assert_eq!(system.materials().root_material_of(leaf), Some(g1));

        system.set_global_material(Some(g2));
        assert_eq!(system.global_material(), Some(g2));
        assert_eq!(system.materials().root_material_of(leaf), Some(g2));
        assert_eq!(system.materials().parent_of(base), Some(g2));
        assert!(system.object(id).is_some());
    }

    #[test]
    fn test_render_needs_camera() {
        let mut system = system();
        let mut backend = RecordingBackend::new();
        assert_eq!(system.render(&mut backend), Err(RenderError::NoCamera));
    }

    #[test]
    fn test_frame_draws_visible_objects() {
        let mut system = system();
        let material = system.add_material(Material::new("m")).unwrap();
        let visible = system.render_permanent(cube(Vec3::zeros(), material)).unwrap();
        system.render_permanent(cube(Vec3::new(0.0, -400.0, 0.0), material)).unwrap();
        system.set_main_camera(Some(camera()));

        system.update(0.016);
        let mut backend = RecordingBackend::new().with_antialiasing(AntialiasingType::Msaa4x);
        let stats = system.render(&mut backend).unwrap();

        assert_eq!(stats.visible_objects, 1);
        assert_eq!(backend.draws().map(|packet| packet.object).collect::<Vec<_>>(), vec![visible]);
        assert_eq!(system.main_pass_config().antialiasing, AntialiasingType::Msaa4x);
        assert_eq!(system.main_pass_config().color_store, StoreAction::Resolve);

        system.set_antialiasing_allowed(false);
        system.render(&mut backend).unwrap();
        assert_eq!(system.main_pass_config().antialiasing, AntialiasingType::None);
    }
}
