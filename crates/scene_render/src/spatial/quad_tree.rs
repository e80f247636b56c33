//! Loose-in-Z quad tree over render object world boxes
//!
//! Space is split on X and Y at each node's centre; an object lives in the
//! deepest node whose XY rectangle fully contains its box. Node Z ranges grow
//! eagerly when an object is inserted and shrink lazily, a few nodes per
//! frame, so a node box always encloses every object below it.
//!
//! Objects that moved out of their node are queued and reinserted under a
//! per-frame budget. Until then they, together with objects outside the
//! world box and objects flagged `ALWAYS_CLIPPING_VISIBLE`, are clipped one
//! by one, so culling is exact at any point in time.

use std::collections::VecDeque;

use super::SpatialIndex;
use crate::core::config::QuadTreeConfig;
use crate::foundation::collections::{remove_exchanging_with_last, NodeId, ObjectId, SecondaryMap, SlotMap};
use crate::foundation::math::Vec3;
use crate::scene::{Containment, Frustum, PlaneMask, RenderObjectFlags, AABB, ALL_PLANES};

const CHILD_COUNT_MASK: u32 = 0b111;
const DEPTH_SHIFT: u32 = 3;
const DEPTH_MASK: u32 = 0b1_1111 << DEPTH_SHIFT;
const DIRTY_Z_BIT: u32 = 1 << 8;

/// Child count, depth and dirty-Z bit packed into one word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeInfo(u32);

impl NodeInfo {
    fn new(depth: u32) -> Self {
        Self((depth << DEPTH_SHIFT) & DEPTH_MASK)
    }

    fn child_count(self) -> u32 {
        self.0 & CHILD_COUNT_MASK
    }

    fn set_child_count(&mut self, count: u32) {
        self.0 = (self.0 & !CHILD_COUNT_MASK) | (count & CHILD_COUNT_MASK);
    }

    fn depth(self) -> u32 {
        (self.0 & DEPTH_MASK) >> DEPTH_SHIFT
    }

    fn is_dirty_z(self) -> bool {
        self.0 & DIRTY_Z_BIT != 0
    }

    fn set_dirty_z(&mut self, dirty: bool) {
        if dirty {
            self.0 |= DIRTY_Z_BIT;
        } else {
            self.0 &= !DIRTY_Z_BIT;
        }
    }
}

/// Single node in the quad tree hierarchy
#[derive(Debug, Clone)]
pub struct QuadTreeNode {
    parent: Option<NodeId>,
    children: [Option<NodeId>; 4],
    bounds: AABB,
    info: NodeInfo,
    objects: Vec<ObjectId>,
}

impl QuadTreeNode {
    fn new(parent: Option<NodeId>, bounds: AABB, depth: u32) -> Self {
        Self {
            parent,
            children: [None; 4],
            bounds,
            info: NodeInfo::new(depth),
            objects: Vec::new(),
        }
    }

    /// XY rectangle fixed by subdivision, Z range enclosing the subtree
    pub fn bounds(&self) -> &AABB {
        &self.bounds
    }

    /// Depth in the tree (0 = root)
    pub fn depth(&self) -> u32 {
        self.info.depth()
    }

    pub fn child_count(&self) -> u32 {
        self.info.child_count()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Allocated children, in quadrant order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    /// Objects stored directly in this node
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn is_leaf(&self) -> bool {
        self.info.child_count() == 0
    }

    fn center_xy(&self) -> (f32, f32) {
        (
            (self.bounds.min.x + self.bounds.max.x) * 0.5,
            (self.bounds.min.y + self.bounds.max.y) * 0.5,
        )
    }

    /// Quadrant (bit 0 = upper X half, bit 1 = upper Y half) fully containing `bounds`
    fn quadrant_of(&self, bounds: &AABB) -> Option<usize> {
        let (cx, cy) = self.center_xy();

        let x = if bounds.max.x <= cx {
            0
        } else if bounds.min.x >= cx {
            1
        } else {
            return None;
        };
        let y = if bounds.max.y <= cy {
            0
        } else if bounds.min.y >= cy {
            2
        } else {
            return None;
        };

        Some(x | y)
    }

    /// Rectangle of a child quadrant; its Z range starts out empty
    fn child_bounds(&self, quadrant: usize) -> AABB {
        let (cx, cy) = self.center_xy();
        let (min_x, max_x) = if quadrant & 1 == 0 { (self.bounds.min.x, cx) } else { (cx, self.bounds.max.x) };
        let (min_y, max_y) = if quadrant & 2 == 0 { (self.bounds.min.y, cy) } else { (cy, self.bounds.max.y) };

        AABB::new(Vec3::new(min_x, min_y, f32::MAX), Vec3::new(max_x, max_y, f32::MIN))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Node(NodeId),
    /// Waiting for (re)insertion
    Pending,
    /// Outside the root rectangle
    Overflow,
    AlwaysVisible,
}

#[derive(Debug, Clone)]
struct ObjectEntry {
    bounds: AABB,
    flags: RenderObjectFlags,
    location: Location,
    warned_outside: bool,
}

fn z_contains(outer: &AABB, inner: &AABB) -> bool {
    outer.min.z <= inner.min.z && outer.max.z >= inner.max.z
}

/// Arena-backed quad tree implementing [`SpatialIndex`]
#[derive(Debug, Clone)]
pub struct QuadTree {
    config: QuadTreeConfig,
    nodes: SlotMap<NodeId, QuadTreeNode>,
    root: Option<NodeId>,
    entries: SecondaryMap<ObjectId, ObjectEntry>,
    pending: VecDeque<ObjectId>,
    overflow: Vec<ObjectId>,
    always_visible: Vec<ObjectId>,
    dirty_z: Vec<NodeId>,
}

impl QuadTree {
    pub fn new(config: QuadTreeConfig) -> Self {
        Self {
            config,
            nodes: SlotMap::with_key(),
            root: None,
            entries: SecondaryMap::new(),
            pending: VecDeque::new(),
            overflow: Vec::new(),
            always_visible: Vec::new(),
            dirty_z: Vec::new(),
        }
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&QuadTreeNode> {
        self.nodes.get(id)
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node currently holding the object, if it sits in the tree proper
    pub fn node_of(&self, id: ObjectId) -> Option<NodeId> {
        match self.entries.get(id)?.location {
            Location::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Objects waiting for reinsertion
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Objects outside the root rectangle
    pub fn overflow_count(&self) -> usize {
        self.overflow.len()
    }

    /// Deepest level any node currently sits at
    pub fn max_node_depth(&self) -> u32 {
        self.nodes.values().map(QuadTreeNode::depth).max().unwrap_or(0)
    }

    fn fitted_world_bounds(&self) -> AABB {
        let mut union = AABB::empty();
        for id in &self.pending {
            if let Some(entry) = self.entries.get(*id) {
                union.add_aabb(&entry.bounds);
            }
        }
        if union.is_empty() {
            log::warn!(
                "Quad tree fitted to no objects: world box is +/-{} around the origin, \
                 set world_bounds or register objects before the first update",
                self.config.world_margin
            );
            union = AABB::from_center_extents(Vec3::zeros(), Vec3::zeros());
        }

        let margin = Vec3::repeat(self.config.world_margin);
        AABB::new(union.min - margin, union.max + margin)
    }

    fn insert_into_tree(&mut self, id: ObjectId) {
        let (Some(root), Some(entry)) = (self.root, self.entries.get(id)) else {
            return;
        };
        let bounds = entry.bounds;

        if !self.nodes[root].bounds.contains_aabb_xy(&bounds) {
            self.push_overflow(id);
            return;
        }

        let mut node_id = root;
        loop {
            let node = &self.nodes[node_id];
            if node.info.depth() >= self.config.max_depth {
                break;
            }
            let Some(quadrant) = node.quadrant_of(&bounds) else {
                break;
            };
            let child = node.children[quadrant];
            node_id = match child {
                Some(child) => child,
                None => self.create_child(node_id, quadrant),
            };
        }

        self.nodes[node_id].objects.push(id);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.location = Location::Node(node_id);
        }
        self.expand_z(node_id, &bounds);
    }

    fn create_child(&mut self, parent_id: NodeId, quadrant: usize) -> NodeId {
        let parent = &self.nodes[parent_id];
        let child = QuadTreeNode::new(Some(parent_id), parent.child_bounds(quadrant), parent.info.depth() + 1);
        let child_id = self.nodes.insert(child);

        let parent = &mut self.nodes[parent_id];
        parent.children[quadrant] = Some(child_id);
        let count = parent.info.child_count();
        parent.info.set_child_count(count + 1);

        child_id
    }

    /// Grow Z ranges from `node_id` upward until an ancestor already encloses `bounds`
    fn expand_z(&mut self, node_id: NodeId, bounds: &AABB) {
        let mut current = Some(node_id);
        while let Some(id) = current {
            let Some(node) = self.nodes.get_mut(id) else {
                break;
            };
            if z_contains(&node.bounds, bounds) {
                break;
            }
            node.bounds.min.z = node.bounds.min.z.min(bounds.min.z);
            node.bounds.max.z = node.bounds.max.z.max(bounds.max.z);
            current = node.parent;
        }
    }

    fn mark_dirty_z(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            if !node.info.is_dirty_z() {
                node.info.set_dirty_z(true);
                self.dirty_z.push(node_id);
            }
        }
    }

    /// Object stays in `node_id` if the node is the deepest one able to hold it
    fn fits_node(&self, node_id: NodeId, bounds: &AABB) -> bool {
        let Some(node) = self.nodes.get(node_id) else {
            return false;
        };
        node.bounds.contains_aabb_xy(bounds)
            && (node.info.depth() >= self.config.max_depth || node.quadrant_of(bounds).is_none())
    }

    fn detach_from_node(&mut self, id: ObjectId, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            remove_exchanging_with_last(&mut node.objects, &id);
        }
        self.mark_dirty_z(node_id);
        self.release_empty_nodes(node_id);
    }

    /// Return empty leaves to the arena, walking up while parents empty out too
    fn release_empty_nodes(&mut self, node_id: NodeId) {
        let mut current = node_id;
        while Some(current) != self.root {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            if !node.objects.is_empty() || node.info.child_count() > 0 {
                break;
            }
            let Some(parent_id) = node.parent else {
                break;
            };

            self.nodes.remove(current);
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                if let Some(slot) = parent.children.iter_mut().find(|slot| **slot == Some(current)) {
                    *slot = None;
                }
                let count = parent.info.child_count();
                parent.info.set_child_count(count.saturating_sub(1));
            }
            self.mark_dirty_z(parent_id);
            current = parent_id;
        }
    }

    fn queue_pending(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.location = Location::Pending;
            self.pending.push_back(id);
        }
    }

    fn push_overflow(&mut self, id: ObjectId) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.location = Location::Overflow;
        if !entry.warned_outside && !entry.bounds.is_empty() {
            entry.warned_outside = true;
            log::warn!(
                "Render object {:?} lies outside the quad tree world box ({:?} .. {:?}); it will be clipped individually",
                id,
                entry.bounds.min,
                entry.bounds.max
            );
        }
        self.overflow.push(id);
    }

    /// Take an object out of whatever container currently holds it
    fn leave_location(&mut self, id: ObjectId, location: Location) {
        match location {
            Location::Node(node_id) => self.detach_from_node(id, node_id),
            Location::Pending => self.pending.retain(|pending| *pending != id),
            Location::Overflow => {
                remove_exchanging_with_last(&mut self.overflow, &id);
            }
            Location::AlwaysVisible => {
                remove_exchanging_with_last(&mut self.always_visible, &id);
            }
        }
    }

    fn place(&mut self, id: ObjectId) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if entry.flags.contains(RenderObjectFlags::ALWAYS_CLIPPING_VISIBLE) {
            entry.location = Location::AlwaysVisible;
            self.always_visible.push(id);
        } else if self.root.is_some() {
            self.insert_into_tree(id);
        } else {
            self.queue_pending(id);
        }
    }

    fn reinsert_pending(&mut self) {
        let budget = self.config.recalculate_objects_per_frame;
        for _ in 0..budget {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            self.insert_into_tree(id);
        }

        if !self.pending.is_empty() {
            log::debug!("Quad tree: {} objects deferred to later frames", self.pending.len());
        }
    }

    /// Recompute the deepest dirty nodes first so parents see final child ranges
    fn recalculate_dirty_z(&mut self) {
        let nodes = &self.nodes;
        self.dirty_z.retain(|id| nodes.contains_key(*id));

        for _ in 0..self.config.recalculate_z_per_frame {
            let deepest = self
                .dirty_z
                .iter()
                .enumerate()
                .max_by_key(|(_, id)| self.nodes[**id].info.depth())
                .map(|(index, _)| index);
            let Some(index) = deepest else {
                break;
            };
            let node_id = self.dirty_z.swap_remove(index);
            self.recalculate_node_z(node_id);
        }
    }

    fn recalculate_node_z(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };

        let (mut min_z, mut max_z) = (f32::MAX, f32::MIN);
        for entry in node.objects.iter().filter_map(|id| self.entries.get(*id)) {
            min_z = min_z.min(entry.bounds.min.z);
            max_z = max_z.max(entry.bounds.max.z);
        }
        for child in node.children().filter_map(|id| self.nodes.get(id)) {
            min_z = min_z.min(child.bounds.min.z);
            max_z = max_z.max(child.bounds.max.z);
        }
        let parent = node.parent;

        let node = &mut self.nodes[node_id];
        node.info.set_dirty_z(false);
        let changed = node.bounds.min.z != min_z || node.bounds.max.z != max_z;
        node.bounds.min.z = min_z;
        node.bounds.max.z = max_z;

        if changed {
            if let Some(parent) = parent {
                self.mark_dirty_z(parent);
            }
        }
    }

    fn clip_node(
        &self,
        node_id: NodeId,
        frustum: &Frustum,
        criteria: RenderObjectFlags,
        mask: PlaneMask,
        out: &mut Vec<ObjectId>,
    ) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };

        let mut mask = mask;
        match frustum.classify(&node.bounds, &mut mask) {
            Containment::Outside => {}
            Containment::Inside => self.collect_subtree(node_id, criteria, out),
            Containment::Intersect => {
                for &id in &node.objects {
                    let Some(entry) = self.entries.get(id) else {
                        continue;
                    };
                    let mut object_mask = mask;
                    if entry.flags.contains(criteria)
                        && frustum.classify(&entry.bounds, &mut object_mask) != Containment::Outside
                    {
                        out.push(id);
                    }
                }
                for child in node.children() {
                    self.clip_node(child, frustum, criteria, mask, out);
                }
            }
        }
    }

    /// Everything under a node that is completely inside the frustum
    fn collect_subtree(&self, node_id: NodeId, criteria: RenderObjectFlags, out: &mut Vec<ObjectId>) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            out.extend(node.objects.iter().copied().filter(|object| {
                self.entries.get(*object).is_some_and(|entry| entry.flags.contains(criteria))
            }));
            stack.extend(node.children());
        }
    }

    fn query_node(&self, node_id: NodeId, aabb: &AABB, out: &mut Vec<ObjectId>) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };
        if !node.bounds.intersects(aabb) {
            return;
        }
        for &id in &node.objects {
            if self.entries.get(id).is_some_and(|entry| entry.bounds.intersects(aabb)) {
                out.push(id);
            }
        }
        for child in node.children() {
            self.query_node(child, aabb, out);
        }
    }

    /// Objects not covered by the node hierarchy
    fn loose_objects(&self) -> impl Iterator<Item = (ObjectId, &ObjectEntry)> + '_ {
        self.pending
            .iter()
            .chain(&self.overflow)
            .chain(&self.always_visible)
            .filter_map(|id| self.entries.get(*id).map(|entry| (*id, entry)))
    }

    /// Structural consistency check used by the tests
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        for (node_id, node) in &self.nodes {
            assert_eq!(node.info.child_count() as usize, node.children().count());
            if Some(node_id) != self.root {
                assert!(!node.objects.is_empty() || node.info.child_count() > 0, "empty node kept alive");
            }
            for child in node.children() {
                let child_node = &self.nodes[child];
                assert_eq!(child_node.parent, Some(node_id));
                assert_eq!(child_node.depth(), node.depth() + 1);
                assert!(child_node.bounds.is_empty() || z_contains(&node.bounds, &child_node.bounds));
            }
            for object in &node.objects {
                let entry = &self.entries[*object];
                assert_eq!(entry.location, Location::Node(node_id));
                assert!(node.bounds.contains_aabb_xy(&entry.bounds));
                assert!(z_contains(&node.bounds, &entry.bounds));
            }
        }
        for (id, entry) in &self.entries {
            if let Location::Node(node_id) = entry.location {
                assert!(self.nodes[node_id].objects.contains(&id));
            }
        }
    }
}

impl SpatialIndex for QuadTree {
    fn initialize(&mut self) {
        if self.root.is_some() {
            return;
        }

        let bounds = self.config.world_bounds.unwrap_or_else(|| self.fitted_world_bounds());
        let root = self.nodes.insert(QuadTreeNode::new(None, bounds, 0));
        self.root = Some(root);

        log::info!(
            "Quad tree initialized: world box {:?} .. {:?}, {} objects, max depth {}",
            bounds.min,
            bounds.max,
            self.pending.len(),
            self.config.max_depth
        );

        let pending: Vec<ObjectId> = self.pending.drain(..).collect();
        for id in pending {
            self.insert_into_tree(id);
        }
    }

    fn add_object(&mut self, id: ObjectId, bounds: &AABB, flags: RenderObjectFlags) {
        if self.entries.contains_key(id) {
            log::warn!("Render object {:?} is already in the quad tree", id);
            return;
        }

        self.entries.insert(
            id,
            ObjectEntry {
                bounds: *bounds,
                flags,
                location: Location::Pending,
                warned_outside: false,
            },
        );
        self.place(id);
    }

    fn remove_object(&mut self, id: ObjectId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            log::warn!("Render object {:?} is not in the quad tree", id);
            return false;
        };

        let location = entry.location;
        self.leave_location(id, location);
        self.entries.remove(id);
        true
    }

    fn object_updated(&mut self, id: ObjectId, bounds: &AABB) {
        let Some(entry) = self.entries.get_mut(id) else {
            log::warn!("Update for render object {:?} which is not in the quad tree", id);
            return;
        };
        let old_bounds = std::mem::replace(&mut entry.bounds, *bounds);
        let location = entry.location;

        match location {
            Location::Pending | Location::AlwaysVisible => {}
            Location::Overflow => {
                let back_inside = self
                    .root
                    .and_then(|root| self.nodes.get(root))
                    .is_some_and(|root| root.bounds.contains_aabb_xy(bounds));
                if back_inside {
                    remove_exchanging_with_last(&mut self.overflow, &id);
                    self.queue_pending(id);
                }
            }
            Location::Node(node_id) => {
                if self.fits_node(node_id, bounds) {
                    self.expand_z(node_id, bounds);
                    if !z_contains(bounds, &old_bounds) {
                        self.mark_dirty_z(node_id);
                    }
                } else {
                    self.detach_from_node(id, node_id);
                    self.queue_pending(id);
                }
            }
        }
    }

    fn set_object_flags(&mut self, id: ObjectId, flags: RenderObjectFlags) {
        let Some(entry) = self.entries.get_mut(id) else {
            log::warn!("Flags changed for render object {:?} which is not in the quad tree", id);
            return;
        };

        let always = RenderObjectFlags::ALWAYS_CLIPPING_VISIBLE;
        let moved = entry.flags.contains(always) != flags.contains(always);
        entry.flags = flags;
        let location = entry.location;

        if moved {
            self.leave_location(id, location);
            self.place(id);
        }
    }

    fn update(&mut self) {
        if self.root.is_none() {
            return;
        }
        self.reinsert_pending();
        self.recalculate_dirty_z();
    }

    fn clip(&self, frustum: &Frustum, criteria: RenderObjectFlags, out: &mut Vec<ObjectId>) {
        if let Some(root) = self.root {
            self.clip_node(root, frustum, criteria, ALL_PLANES, out);
        }

        for (id, entry) in self.loose_objects() {
            if !entry.flags.contains(criteria) {
                continue;
            }
            if entry.location == Location::AlwaysVisible || frustum.intersects_aabb(&entry.bounds) {
                out.push(id);
            }
        }
    }

    fn query_aabb(&self, aabb: &AABB) -> Vec<ObjectId> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.query_node(root, aabb, &mut out);
        }
        out.extend(
            self.loose_objects()
                .filter(|(_, entry)| entry.bounds.intersects(aabb))
                .map(|(id, _)| id),
        );
        out
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(id)
    }

    fn object_count(&self) -> usize {
        self.entries.len()
    }
}
