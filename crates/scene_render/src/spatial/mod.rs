//! Spatial partitioning for render objects
//!
//! The render system only talks to the [`SpatialIndex`] trait, so the
//! partitioning scheme can change without touching the frame pipeline.

mod quad_tree;

pub use quad_tree::{QuadTree, QuadTreeNode};

use crate::foundation::collections::ObjectId;
use crate::scene::{Frustum, RenderObjectFlags, AABB};

/// Incrementally maintained spatial index over render objects
pub trait SpatialIndex {
    /// Build the top-level structure and insert everything added so far. Runs once.
    fn initialize(&mut self);

    /// Start tracking an object
    fn add_object(&mut self, id: ObjectId, bounds: &AABB, flags: RenderObjectFlags);

    /// Stop tracking an object; returns `false` if it was not tracked
    fn remove_object(&mut self, id: ObjectId) -> bool;

    /// React to a changed world box
    fn object_updated(&mut self, id: ObjectId, bounds: &AABB);

    /// React to changed visibility flags
    fn set_object_flags(&mut self, id: ObjectId, flags: RenderObjectFlags);

    /// Budgeted per-frame maintenance
    fn update(&mut self);

    /// Append every object inside `frustum` whose flags contain `criteria`
    fn clip(&self, frustum: &Frustum, criteria: RenderObjectFlags, out: &mut Vec<ObjectId>);

    /// Every object whose box intersects `aabb`
    fn query_aabb(&self, aabb: &AABB) -> Vec<ObjectId>;

    fn contains(&self, id: ObjectId) -> bool;

    fn object_count(&self) -> usize;
}
