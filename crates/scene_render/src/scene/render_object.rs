//! Render objects and their draw batches
//!
//! A [`RenderObject`] is built by the caller, handed to the render system with
//! `render_permanent` and handed back by `remove_from_render`. While it is
//! registered, every change goes through the render system so the spatial
//! index and the batch registry stay in sync.

use bitflags::bitflags;

use crate::foundation::collections::{LightId, MaterialId};
use crate::foundation::math::{Mat4, Vec3};
use crate::scene::AABB;

bitflags! {
    /// Render object state and visibility flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderObjectFlags: u32 {
        /// Object is switched on
        const VISIBLE = 1 << 0;
        /// Object survived static occlusion
        const VISIBLE_STATIC_OCCLUSION = 1 << 1;
        /// Object is enabled at the current quality level
        const VISIBLE_QUALITY = 1 << 2;
        /// Drawn in reflection passes
        const VISIBLE_REFLECTION = 1 << 3;
        /// Drawn in refraction passes
        const VISIBLE_REFRACTION = 1 << 4;
        /// Skips the frustum test entirely
        const ALWAYS_CLIPPING_VISIBLE = 1 << 5;
        /// World data is stale and must be recomputed on the next update
        const NEED_UPDATE = 1 << 6;
        /// Object sits in the render system's marked queue
        const MARKED_FOR_UPDATE = 1 << 7;
        /// World transform changed since the last update
        const TRANSFORM_UPDATED = 1 << 8;

        /// Flags an object needs for the main pass to consider it at all
        const CLIPPING_VISIBILITY_CRITERIA = Self::VISIBLE.bits()
            | Self::VISIBLE_STATIC_OCCLUSION.bits()
            | Self::VISIBLE_QUALITY.bits();
    }
}

impl Default for RenderObjectFlags {
    fn default() -> Self {
        Self::CLIPPING_VISIBILITY_CRITERIA | Self::VISIBLE_REFLECTION | Self::VISIBLE_REFRACTION
    }
}

/// Opaque geometry handle owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(pub u64);

/// Indexed geometry a batch draws
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Backend handle of the vertex/index buffers
    pub handle: GeometryHandle,
    /// Number of indices drawn per instance
    pub index_count: u32,
    /// Local-space bounds of the vertices
    pub bounding_box: AABB,
}

impl Geometry {
    pub fn new(handle: GeometryHandle, index_count: u32, bounding_box: AABB) -> Self {
        Self { handle, index_count, bounding_box }
    }
}

/// One (geometry, material) pair of a render object
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBatch {
    /// Material the batch is drawn with
    pub material: MaterialId,
    /// Geometry; batches without geometry are never drawn instanced
    pub geometry: Option<Geometry>,
    /// LOD level this batch belongs to, `None` for every level
    pub lod_index: Option<u32>,
    /// Switch state this batch belongs to, `None` for every state
    pub switch_index: Option<u32>,
}

impl RenderBatch {
    /// Batch active at every LOD and switch state
    pub fn new(material: MaterialId, geometry: Option<Geometry>) -> Self {
        Self {
            material,
            geometry,
            lod_index: None,
            switch_index: None,
        }
    }

    /// Restrict the batch to one LOD level and switch state
    pub fn with_lod(mut self, lod_index: u32, switch_index: u32) -> Self {
        self.lod_index = Some(lod_index);
        self.switch_index = Some(switch_index);
        self
    }

    fn is_active_for(&self, lod_index: Option<u32>, switch_index: Option<u32>) -> bool {
        (self.lod_index == lod_index && self.switch_index == switch_index)
            || (self.lod_index.is_none() && self.switch_index.is_none())
    }
}

/// Drawable scene entity
#[derive(Debug, Clone)]
pub struct RenderObject {
    local_bounding_box: AABB,
    /// Local box was set explicitly and is not derived from geometry
    fixed_bounding_box: bool,
    world_bounding_box: AABB,
    world_transform: Mat4,
    flags: RenderObjectFlags,
    render_batches: Vec<RenderBatch>,
    active_batches: Vec<usize>,
    lod_index: Option<u32>,
    switch_index: Option<u32>,
    light: Option<LightId>,
    pub(crate) remove_index: Option<usize>,
}

impl Default for RenderObject {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderObject {
    /// Empty object at the origin with default visibility flags
    pub fn new() -> Self {
        Self {
            local_bounding_box: AABB::empty(),
            fixed_bounding_box: false,
            world_bounding_box: AABB::empty(),
            world_transform: Mat4::identity(),
            flags: RenderObjectFlags::default(),
            render_batches: Vec::new(),
            active_batches: Vec::new(),
            lod_index: None,
            switch_index: None,
            light: None,
            remove_index: None,
        }
    }

    /// Override the local bounds computed from the batch geometry
    pub fn with_bounding_box(mut self, bounding_box: AABB) -> Self {
        self.local_bounding_box = bounding_box;
        self.fixed_bounding_box = true;
        self.recalculate_world_bounding_box();
        self
    }

    pub fn with_transform(mut self, world_transform: Mat4) -> Self {
        self.world_transform = world_transform;
        self.recalculate_world_bounding_box();
        self
    }

    pub fn with_batch(mut self, batch: RenderBatch) -> Self {
        self.add_render_batch(batch);
        self
    }

    pub fn with_flags(mut self, flags: RenderObjectFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn local_bounding_box(&self) -> &AABB {
        &self.local_bounding_box
    }

    /// World-space bounds as of the last recalculation
    pub fn world_bounding_box(&self) -> &AABB {
        &self.world_bounding_box
    }

    pub fn world_transform(&self) -> &Mat4 {
        &self.world_transform
    }

    /// World-space translation of the object
    pub fn world_position(&self) -> Vec3 {
        self.world_transform.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn flags(&self) -> RenderObjectFlags {
        self.flags
    }

    /// True when every bit of `flags` is set
    pub fn has_flags(&self, flags: RenderObjectFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn light(&self) -> Option<LightId> {
        self.light
    }

    pub fn lod_index(&self) -> Option<u32> {
        self.lod_index
    }

    pub fn switch_index(&self) -> Option<u32> {
        self.switch_index
    }

    /// Every batch, active or not
    pub fn render_batches(&self) -> &[RenderBatch] {
        &self.render_batches
    }

    pub fn render_batch(&self, index: usize) -> Option<&RenderBatch> {
        self.render_batches.get(index)
    }

    /// Indices of the batches drawn at the current LOD and switch state
    pub fn active_batch_indices(&self) -> &[usize] {
        &self.active_batches
    }

    pub fn active_render_batches(&self) -> impl Iterator<Item = (usize, &RenderBatch)> + '_ {
        self.active_batches.iter().map(move |&index| (index, &self.render_batches[index]))
    }

    /// Position of this object in the render system's flat array
    pub fn remove_index(&self) -> Option<usize> {
        self.remove_index
    }

    pub fn recalculate_world_bounding_box(&mut self) {
        self.world_bounding_box = self.local_bounding_box.transformed(&self.world_transform);
    }

    /// Union of the geometry bounds of every batch, unless the box was set explicitly
    pub fn recalculate_bounding_box(&mut self) {
        if self.fixed_bounding_box {
            self.recalculate_world_bounding_box();
            return;
        }
        let mut bounding_box = AABB::empty();
        for geometry in self.render_batches.iter().filter_map(|batch| batch.geometry.as_ref()) {
            bounding_box.add_aabb(&geometry.bounding_box);
        }
        self.local_bounding_box = bounding_box;
        self.recalculate_world_bounding_box();
    }

    pub fn add_render_batch(&mut self, batch: RenderBatch) {
        if let (Some(geometry), false) = (&batch.geometry, self.fixed_bounding_box) {
            self.local_bounding_box.add_aabb(&geometry.bounding_box);
            self.recalculate_world_bounding_box();
        }
        self.render_batches.push(batch);
        self.update_active_render_batches();
    }

    /// Remove a batch; later batches shift down by one
    pub fn remove_render_batch(&mut self, index: usize) -> Option<RenderBatch> {
        if index >= self.render_batches.len() {
            return None;
        }
        let batch = self.render_batches.remove(index);
        self.recalculate_bounding_box();
        self.update_active_render_batches();
        Some(batch)
    }

    /// Swap in a new batch at `index`, returning the old one
    pub fn replace_render_batch(&mut self, index: usize, batch: RenderBatch) -> Option<RenderBatch> {
        let slot = self.render_batches.get_mut(index)?;
        let old = std::mem::replace(slot, batch);
        self.recalculate_bounding_box();
        self.update_active_render_batches();
        Some(old)
    }

    pub fn set_lod_and_switch(&mut self, lod_index: Option<u32>, switch_index: Option<u32>) {
        self.lod_index = lod_index;
        self.switch_index = switch_index;
        self.update_active_render_batches();
    }

    pub fn set_world_transform(&mut self, world_transform: Mat4) {
        self.world_transform = world_transform;
        self.flags.insert(RenderObjectFlags::TRANSFORM_UPDATED);
    }

    pub(crate) fn set_flags(&mut self, flags: RenderObjectFlags, enabled: bool) {
        self.flags.set(flags, enabled);
    }

    pub(crate) fn set_light(&mut self, light: Option<LightId>) {
        self.light = light;
    }

    fn update_active_render_batches(&mut self) {
        let (lod_index, switch_index) = (self.lod_index, self.switch_index);
        self.active_batches = self
            .render_batches
            .iter()
            .enumerate()
            .filter(|(_, batch)| batch.is_active_for(lod_index, switch_index))
            .map(|(index, _)| index)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::SlotMap;
    use approx::assert_relative_eq;

    fn material() -> MaterialId {
        let mut materials: SlotMap<MaterialId, ()> = SlotMap::with_key();
        materials.insert(())
    }

    fn cube(handle: u64) -> Geometry {
        Geometry::new(
            GeometryHandle(handle),
            36,
            AABB::new(Vec3::repeat(-1.0), Vec3::repeat(1.0)),
        )
    }

    #[test]
    fn test_default_flags_pass_clipping_criteria() {
        let object = RenderObject::new();
        assert!(object.has_flags(RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA));
        assert!(!object.has_flags(RenderObjectFlags::ALWAYS_CLIPPING_VISIBLE));
    }

    #[test]
    fn test_world_box_follows_transform() {
        let mut object = RenderObject::new().with_batch(RenderBatch::new(material(), Some(cube(1))));
        object.set_world_transform(Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0)));
        assert!(object.has_flags(RenderObjectFlags::TRANSFORM_UPDATED));

        object.recalculate_world_bounding_box();
        assert_relative_eq!(object.world_bounding_box().min, Vec3::new(4.0, -1.0, -1.0));
        assert_relative_eq!(object.world_position(), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_active_batches_follow_lod_and_switch() {
        let material = material();
        let mut object = RenderObject::new()
            .with_batch(RenderBatch::new(material, Some(cube(1))))
            .with_batch(RenderBatch::new(material, Some(cube(2))).with_lod(0, 0))
            .with_batch(RenderBatch::new(material, Some(cube(3))).with_lod(1, 0));

        assert_eq!(object.active_batch_indices(), &[0]);

        object.set_lod_and_switch(Some(0), Some(0));
        assert_eq!(object.active_batch_indices(), &[0, 1]);

        object.set_lod_and_switch(Some(1), Some(0));
        assert_eq!(object.active_batch_indices(), &[0, 2]);
    }

    #[test]
    fn test_removing_batch_shrinks_bounds() {
        let material = material();
        let far = Geometry::new(GeometryHandle(2), 3, AABB::new(Vec3::repeat(9.0), Vec3::repeat(10.0)));
        let mut object = RenderObject::new()
            .with_batch(RenderBatch::new(material, Some(cube(1))))
            .with_batch(RenderBatch::new(material, Some(far)));
        assert_relative_eq!(object.local_bounding_box().max, Vec3::repeat(10.0));

        let removed = object.remove_render_batch(1);
        assert!(removed.is_some());
        assert_relative_eq!(object.local_bounding_box().max, Vec3::repeat(1.0));
        assert!(object.remove_render_batch(5).is_none());
    }

    #[test]
    fn test_explicit_bounds_survive_batch_edits() {
        let material = material();
        let bounds = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(3.0));
        let mut object = RenderObject::new()
            .with_bounding_box(bounds)
            .with_batch(RenderBatch::new(material, None))
            .with_batch(RenderBatch::new(material, Some(cube(1))));
        assert_eq!(*object.local_bounding_box(), bounds);

        object.remove_render_batch(0);
        object.replace_render_batch(0, RenderBatch::new(material, None));
        assert_eq!(*object.local_bounding_box(), bounds);
        assert!(!object.world_bounding_box().is_empty());
    }
}
