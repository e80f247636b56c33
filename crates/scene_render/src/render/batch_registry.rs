//! Batch bookkeeping and global material rooting
//!
//! Every batch of a registered object passes through here exactly once on
//! the way in and once on the way out. The registry counts batches per
//! material and keeps the top of every registered material's parent chain
//! attached to the global material, so scene-wide settings on the global
//! material reach every draw.

use std::collections::{HashMap, HashSet};

use super::material::MaterialLibrary;
use super::{RenderError, RenderResult};
use crate::foundation::collections::MaterialId;
use crate::scene::RenderBatch;

#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches_per_material: HashMap<MaterialId, usize>,
    global_material: Option<MaterialId>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_material(&self) -> Option<MaterialId> {
        self.global_material
    }

    /// Registered batches using `material` directly
    pub fn batch_count(&self, material: MaterialId) -> usize {
        self.batches_per_material.get(&material).copied().unwrap_or(0)
    }

    pub fn total_batches(&self) -> usize {
        self.batches_per_material.values().sum()
    }

    /// Materials used by at least one registered batch
    pub fn registered_materials(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.batches_per_material.keys().copied()
    }

    pub fn register_batch(&mut self, batch: &RenderBatch, materials: &mut MaterialLibrary) {
        *self.batches_per_material.entry(batch.material).or_insert(0) += 1;
        if let Err(err) = self.register_material(batch.material, materials) {
            log::warn!("Batch material {:?} left unrooted: {}", batch.material, err);
        }
    }

    /// Forget one batch; returns `false` if its material had none registered
    pub fn unregister_batch(&mut self, batch: &RenderBatch) -> bool {
        let Some(count) = self.batches_per_material.get_mut(&batch.material) else {
            log::warn!("Unregistering a batch of {:?} that was never registered", batch.material);
            return false;
        };

        *count -= 1;
        if *count == 0 {
            self.batches_per_material.remove(&batch.material);
            self.unregister_material(Some(batch.material));
        }
        true
    }

    /// Root `material`'s chain at the global material
    ///
    /// Does nothing when no global material is set or the chain already
    /// passes through it, so calling it again changes nothing.
    pub fn register_material(&self, material: MaterialId, materials: &mut MaterialLibrary) -> RenderResult<()> {
        let Some(global) = self.global_material else {
            return Ok(());
        };
        if !materials.contains(material) {
            return Err(RenderError::MaterialNotFound(material));
        }
        if materials.ancestors(material).any(|ancestor| ancestor == global) {
            return Ok(());
        }

        let top = materials.root_material_of(material).unwrap_or(material);
        log::trace!("Rooting material {:?} at global {:?}", top, global);
        materials.set_parent(top, Some(global))
    }

    /// Materials keep their parents after their last batch goes away
    pub fn unregister_material(&self, _material: Option<MaterialId>) {}

    /// Swap the global material under every registered material
    ///
    /// Each chain is walked up to the old or new global, and the material
    /// found there is re-parented to `global`. Shared tops are visited once.
    pub fn set_global_material(&mut self, global: Option<MaterialId>, materials: &mut MaterialLibrary) {
        let old = self.global_material;
        if let Some(id) = global {
            if !materials.contains(id) {
                log::warn!("Global material {:?} is not in the library; ignored", id);
                return;
            }
        }

        let mut tops = HashSet::new();
        for material in self.batches_per_material.keys().copied() {
            if !materials.contains(material) {
                continue;
            }
            let mut current = material;
            while let Some(parent) = materials.parent_of(current) {
                if Some(parent) == old || Some(parent) == global {
                    break;
                }
                current = parent;
            }
            tops.insert(current);
        }

        for top in tops {
            if Some(top) == global {
                continue;
            }
            if let Err(err) = materials.set_parent(top, global) {
                log::warn!("Cannot re-parent {:?} to global {:?}: {}", top, global, err);
            }
        }

        log::debug!("Global material changed from {:?} to {:?}", old, global);
        self.global_material = global;
        materials.set_global_material(global);
    }
}
