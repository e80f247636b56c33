//! Frustum visibility for one camera

use crate::foundation::collections::ObjectId;
use crate::scene::{Camera, RenderObjectFlags};
use crate::spatial::SpatialIndex;

/// Turns a camera and a flag mask into the list of visible objects
#[derive(Debug, Clone, Copy)]
pub struct VisibilityPass {
    static_occlusion: bool,
}

impl VisibilityPass {
    pub fn new(static_occlusion: bool) -> Self {
        Self { static_occlusion }
    }

    pub fn static_occlusion(&self) -> bool {
        self.static_occlusion
    }

    pub fn set_static_occlusion(&mut self, enabled: bool) {
        self.static_occlusion = enabled;
    }

    /// Flags an object needs to pass clipping
    pub fn effective_criteria(&self, criteria: RenderObjectFlags) -> RenderObjectFlags {
        if self.static_occlusion {
            criteria
        } else {
            criteria - RenderObjectFlags::VISIBLE_STATIC_OCCLUSION
        }
    }

    /// Append every object of `index` the camera can see to `out`
    ///
    /// Output order follows the index's traversal and carries no meaning.
    pub fn clip<I: SpatialIndex + ?Sized>(
        &self,
        index: &I,
        camera: &Camera,
        criteria: RenderObjectFlags,
        out: &mut Vec<ObjectId>,
    ) {
        let before = out.len();
        index.clip(&camera.frustum(), self.effective_criteria(criteria), out);
        log::trace!("Visibility pass: {} of {} objects visible", out.len() - before, index.object_count());
    }
}

impl Default for VisibilityPass {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QuadTreeConfig;
    use crate::foundation::collections::SlotMap;
    use crate::foundation::math::Vec3;
    use crate::scene::AABB;
    use crate::spatial::QuadTree;

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, -100.0, 0.0), 60.0, 1.0, 1.0, 400.0);
        camera.look_at(Vec3::zeros(), Vec3::z());
        camera
    }

    fn tree() -> QuadTree {
        let bounds = AABB::new(Vec3::repeat(-500.0), Vec3::repeat(500.0));
        let mut tree = QuadTree::new(QuadTreeConfig::default().with_world_bounds(bounds).with_max_depth(6));
        tree.initialize();
        tree
    }

    #[test]
    fn test_static_occlusion_bit_dropped_when_disabled() {
        let criteria = RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA;
        assert_eq!(VisibilityPass::new(true).effective_criteria(criteria), criteria);

        let relaxed = VisibilityPass::new(false).effective_criteria(criteria);
        assert!(!relaxed.contains(RenderObjectFlags::VISIBLE_STATIC_OCCLUSION));
        assert!(relaxed.contains(RenderObjectFlags::VISIBLE));
    }

    #[test]
    fn test_occluded_object_visible_only_without_static_occlusion() {
        let mut ids: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let shown = ids.insert(());
        let occluded = ids.insert(());

        let mut index = tree();
        let bounds = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(2.0));
        index.add_object(shown, &bounds, RenderObjectFlags::default());
        index.add_object(
            occluded,
            &bounds,
            RenderObjectFlags::default() - RenderObjectFlags::VISIBLE_STATIC_OCCLUSION,
        );

        let criteria = RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA;
        let mut out = Vec::new();
        VisibilityPass::new(true).clip(&index, &camera(), criteria, &mut out);
        assert_eq!(out, vec![shown]);

        out.clear();
        VisibilityPass::new(false).clip(&index, &camera(), criteria, &mut out);
        out.sort();
        let mut expected = vec![shown, occluded];
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_object_behind_camera_is_culled() {
        let mut ids: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let ahead = ids.insert(());
        let behind = ids.insert(());

        let mut index = tree();
        let flags = RenderObjectFlags::default();
        index.add_object(ahead, &AABB::from_center_extents(Vec3::new(0.0, 50.0, 0.0), Vec3::repeat(1.0)), flags);
        index.add_object(behind, &AABB::from_center_extents(Vec3::new(0.0, -300.0, 0.0), Vec3::repeat(1.0)), flags);

        let criteria = RenderObjectFlags::CLIPPING_VISIBILITY_CRITERIA;
        let mut out = Vec::new();
        VisibilityPass::default().clip(&index, &camera(), criteria, &mut out);
        assert_eq!(out, vec![ahead]);
    }
}
