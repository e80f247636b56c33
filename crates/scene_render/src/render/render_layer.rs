//! Render layers and per-layer batch sorting
//!
//! Every visible active batch lands in exactly one [`RenderBatchArray`],
//! picked by its material's layer id. Each array is sorted with its layer's
//! [`SortingFlags`] before the layer is drawn; layers are drawn in list order.

use std::cmp::Reverse;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::material::MaterialLibrary;
use crate::core::config::RenderLayerConfig;
use crate::foundation::collections::{Key, MaterialId, ObjectId, SlotMap};
use crate::foundation::math::Vec3;
use crate::scene::RenderObject;

/// Layer a material draws in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderLayerId {
    Opaque,
    AfterOpaque,
    Vegetation,
    AlphaTest,
    ShadowVolume,
    Water,
    Translucent,
    AfterTranslucent,
    DebugDraw,
}

impl RenderLayerId {
    /// Number of layer ids
    pub const COUNT: usize = 9;

    /// Every layer id in declaration order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Opaque,
        Self::AfterOpaque,
        Self::Vegetation,
        Self::AlphaTest,
        Self::ShadowVolume,
        Self::Water,
        Self::Translucent,
        Self::AfterTranslucent,
        Self::DebugDraw,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Opaque => "OpaqueRenderLayer",
            Self::AfterOpaque => "AfterOpaqueRenderLayer",
            Self::Vegetation => "VegetationRenderLayer",
            Self::AlphaTest => "AlphaTestLayer",
            Self::ShadowVolume => "ShadowVolumeRenderLayer",
            Self::Water => "WaterLayer",
            Self::Translucent => "TranslucentRenderLayer",
            Self::AfterTranslucent => "AfterTranslucentRenderLayer",
            Self::DebugDraw => "DebugRenderLayer",
        }
    }
}

bitflags! {
    /// How a layer orders its batches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SortingFlags: u32 {
        /// Sort at all; without it batches keep visibility order
        const SORT_ENABLED = 1 << 0;
        /// Group by parent material, then geometry
        const SORT_BY_MATERIAL = 1 << 1;
        /// Nearest first
        const SORT_BY_DISTANCE_FRONT_TO_BACK = 1 << 2;
        /// Farthest first
        const SORT_BY_DISTANCE_BACK_TO_FRONT = 1 << 3;
    }
}

/// One batch of one render object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchRef {
    pub object: ObjectId,
    /// Index into the object's full batch list
    pub batch_index: usize,
}

/// Batch plus the key it was last sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub batch: BatchRef,
    pub layer_sorting_key: u64,
}

/// Distance quantized to centimetres
fn distance_key(distance: f32) -> u64 {
    (distance * 100.0) as u64
}

/// Batches sharing a parent material sort next to each other
fn material_key(materials: &MaterialLibrary, material: MaterialId) -> u64 {
    let group = materials.sharing_group_of(material);
    group.data().as_ffi() & 0xFFFF_FFFF
}

/// Batches of one layer for the current frame
#[derive(Debug, Clone, Default)]
pub struct RenderBatchArray {
    entries: Vec<BatchEntry>,
    sorting_flags: SortingFlags,
}

impl Default for SortingFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl RenderBatchArray {
    pub fn new(sorting_flags: SortingFlags) -> Self {
        Self {
            entries: Vec::new(),
            sorting_flags,
        }
    }

    pub fn sorting_flags(&self) -> SortingFlags {
        self.sorting_flags
    }

    pub fn set_sorting_flags(&mut self, flags: SortingFlags) {
        self.sorting_flags = flags;
    }

    pub fn add_render_batch(&mut self, batch: BatchRef) {
        self.entries.push(BatchEntry {
            batch,
            layer_sorting_key: 0,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Batches in current order
    pub fn batches(&self) -> impl Iterator<Item = BatchRef> + '_ {
        self.entries.iter().map(|entry| entry.batch)
    }

    /// Recompute every key and stable-sort by it
    pub fn sort(
        &mut self,
        camera_position: Vec3,
        objects: &SlotMap<ObjectId, RenderObject>,
        materials: &MaterialLibrary,
    ) {
        let flags = self.sorting_flags;
        if !flags.contains(SortingFlags::SORT_ENABLED) || self.entries.len() < 2 {
            return;
        }

        let by_material = flags.contains(SortingFlags::SORT_BY_MATERIAL);
        let by_distance = flags.intersects(
            SortingFlags::SORT_BY_DISTANCE_FRONT_TO_BACK | SortingFlags::SORT_BY_DISTANCE_BACK_TO_FRONT,
        );

        for entry in &mut self.entries {
            let Some(object) = objects.get(entry.batch.object) else {
                entry.layer_sorting_key = 0;
                continue;
            };
            let distance = distance_key((object.world_bounding_box().center() - camera_position).norm());

            entry.layer_sorting_key = match object.render_batch(entry.batch.batch_index) {
                Some(batch) if by_material => {
                    let geometry = batch.geometry.map_or(0, |geometry| geometry.handle.0 & 0xFFFF);
                    let low = if by_distance { distance.min(0xFFFF_FFFF) } else { geometry };
                    (material_key(materials, batch.material) << 32) | low
                }
                _ => distance,
            };
        }

        if flags.contains(SortingFlags::SORT_BY_DISTANCE_BACK_TO_FRONT) {
            self.entries.sort_by_key(|entry| Reverse(entry.layer_sorting_key));
        } else {
            self.entries.sort_by_key(|entry| entry.layer_sorting_key);
        }
    }
}

/// Layer taking part in a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLayer {
    pub id: RenderLayerId,
    pub sorting_flags: SortingFlags,
    /// Draw through the instancing coordinator
    pub instanced: bool,
}

impl From<&RenderLayerConfig> for RenderLayer {
    fn from(config: &RenderLayerConfig) -> Self {
        Self {
            id: config.id,
            sorting_flags: config.sorting,
            instanced: config.instanced,
        }
    }
}

/// Distributes visible batches to layers and sorts them
#[derive(Debug, Clone)]
pub struct LayerSorter {
    layers: Vec<RenderLayer>,
    arrays: Vec<RenderBatchArray>,
}

impl LayerSorter {
    /// Layers drawn in the given order
    pub fn new(layers: &[RenderLayerConfig]) -> Self {
        let mut sorter = Self {
            layers: Vec::with_capacity(layers.len()),
            arrays: vec![RenderBatchArray::default(); RenderLayerId::COUNT],
        };
        for layer in layers {
            sorter.add_render_layer(RenderLayer::from(layer), None);
        }
        sorter
    }

    /// Insert a layer after `after`, or at the end when `after` is `None`.
    ///
    /// Returns `false` and leaves the list alone when `after` is not present.
    pub fn add_render_layer(&mut self, layer: RenderLayer, after: Option<RenderLayerId>) -> bool {
        let position = match after {
            Some(after) => match self.layers.iter().position(|existing| existing.id == after) {
                Some(index) => index + 1,
                None => {
                    log::warn!("Cannot add {:?} after {:?}: layer not in pass", layer.id, after);
                    return false;
                }
            },
            None => self.layers.len(),
        };

        self.arrays[layer.id.index()].set_sorting_flags(layer.sorting_flags);
        self.layers.insert(position, layer);
        true
    }

    pub fn remove_render_layer(&mut self, id: RenderLayerId) -> Option<RenderLayer> {
        let index = self.layers.iter().position(|layer| layer.id == id)?;
        Some(self.layers.remove(index))
    }

    /// Layers in draw order
    pub fn layers(&self) -> &[RenderLayer] {
        &self.layers
    }

    pub fn batch_array(&self, id: RenderLayerId) -> &RenderBatchArray {
        &self.arrays[id.index()]
    }

    pub fn clear(&mut self) {
        for array in &mut self.arrays {
            array.clear();
        }
    }

    /// Put every active batch of every visible object into its layer's array.
    ///
    /// Returns the number of batches distributed.
    pub fn prepare_layers(
        &mut self,
        visible: &[ObjectId],
        objects: &SlotMap<ObjectId, RenderObject>,
        materials: &MaterialLibrary,
    ) -> usize {
        self.clear();

        let mut count = 0;
        for &object_id in visible {
            let Some(object) = objects.get(object_id) else {
                continue;
            };
            for (batch_index, batch) in object.active_render_batches() {
                if !materials.contains(batch.material) {
                    log::warn!("Batch {} of {:?} uses an unknown material; skipped", batch_index, object_id);
                    continue;
                }
                let layer = materials.render_layer_of(batch.material);
                self.arrays[layer.index()].add_render_batch(BatchRef {
                    object: object_id,
                    batch_index,
                });
                count += 1;
            }
        }
        count
    }

    /// Sort every layer array by its own flags
    pub fn sort(
        &mut self,
        camera_position: Vec3,
        objects: &SlotMap<ObjectId, RenderObject>,
        materials: &MaterialLibrary,
    ) {
        for array in &mut self.arrays {
            array.sort(camera_position, objects, materials);
        }
    }

    /// Pass layers in draw order with their arrays
    pub fn ordered(&self) -> impl Iterator<Item = (&RenderLayer, &RenderBatchArray)> + '_ {
        self.layers.iter().map(move |layer| (layer, &self.arrays[layer.id.index()]))
    }
}
