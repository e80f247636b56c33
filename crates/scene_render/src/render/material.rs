//! Materials and their parent chains
//!
//! A material inherits everything it does not set from its parent. The
//! render system keeps every top-level material of a registered batch
//! parented to the global material, which is how scene-wide settings reach
//! every draw.

use std::collections::HashMap;

use super::render_layer::RenderLayerId;
use super::{RenderError, RenderResult};
use crate::foundation::collections::{MaterialId, SlotMap};

/// Opaque pipeline/render-state handle owned by the material system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderStateHandle(pub u64);

/// Opaque texture-binding handle owned by the material system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureStateHandle(pub u64);

/// Material node
#[derive(Debug, Clone, Default)]
pub struct Material {
    /// Human readable name for debugging
    pub name: String,
    parent: Option<MaterialId>,
    render_layer: Option<RenderLayerId>,
    supports_instancing: Option<bool>,
    /// Render state the batch is drawn with
    pub render_state: RenderStateHandle,
    /// Texture bindings the batch is drawn with
    pub texture_state: TextureStateHandle,
    properties: HashMap<String, Vec<f32>>,
}

impl Material {
    /// Create an unparented material that inherits nothing
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: MaterialId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_render_layer(mut self, layer: RenderLayerId) -> Self {
        self.render_layer = Some(layer);
        self
    }

    pub fn with_instancing(mut self, supported: bool) -> Self {
        self.supports_instancing = Some(supported);
        self
    }

    pub fn with_states(mut self, render_state: RenderStateHandle, texture_state: TextureStateHandle) -> Self {
        self.render_state = render_state;
        self.texture_state = texture_state;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: &[f32]) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn parent(&self) -> Option<MaterialId> {
        self.parent
    }

    /// Layer set on this material itself, ignoring ancestors
    pub fn local_render_layer(&self) -> Option<RenderLayerId> {
        self.render_layer
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: &[f32]) {
        self.properties.insert(name.into(), value.to_vec());
    }

    /// Property set on this material itself, ignoring ancestors
    pub fn local_property(&self, name: &str) -> Option<&[f32]> {
        self.properties.get(name).map(Vec::as_slice)
    }
}

/// Arena of every material known to a render system
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    materials: SlotMap<MaterialId, Material>,
    global: Option<MaterialId>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material; its parent, if any, must already exist
    pub fn insert(&mut self, material: Material) -> RenderResult<MaterialId> {
        if let Some(parent) = material.parent {
            if !self.materials.contains_key(parent) {
                return Err(RenderError::MaterialNotFound(parent));
            }
        }
        let id = self.materials.insert(material);
        log::debug!("Added material {:?} ({})", id, self.materials[id].name);
        Ok(id)
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    /// Mutable access for state and property edits; use [`set_parent`](Self::set_parent) to re-parent
    pub fn get_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        self.materials.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn parent_of(&self, id: MaterialId) -> Option<MaterialId> {
        self.materials.get(id).and_then(|material| material.parent)
    }

    /// Re-parent a material, refusing to create a cycle
    pub fn set_parent(&mut self, id: MaterialId, parent: Option<MaterialId>) -> RenderResult<()> {
        if !self.materials.contains_key(id) {
            return Err(RenderError::MaterialNotFound(id));
        }
        if let Some(parent) = parent {
            if !self.materials.contains_key(parent) {
                return Err(RenderError::MaterialNotFound(parent));
            }
            if self.ancestors(parent).any(|ancestor| ancestor == id) {
                return Err(RenderError::MaterialCycle(id));
            }
        }

        self.materials[id].parent = parent;
        Ok(())
    }

    /// The material itself followed by every ancestor, nearest first
    pub fn ancestors(&self, id: MaterialId) -> impl Iterator<Item = MaterialId> + '_ {
        let start = self.materials.contains_key(id).then_some(id);
        std::iter::successors(start, move |current| self.parent_of(*current))
    }

    /// Scene-wide material every registered chain is rooted at
    pub fn global_material(&self) -> Option<MaterialId> {
        self.global
    }

    pub(crate) fn set_global_material(&mut self, global: Option<MaterialId>) {
        self.global = global;
    }

    /// Material whose children may be sorted and drawn together
    ///
    /// The parent, unless the parent is the global material; every top-level
    /// material hangs under the global one and would otherwise share a group.
    pub fn sharing_group_of(&self, id: MaterialId) -> MaterialId {
        match self.parent_of(id) {
            Some(parent) if Some(parent) != self.global => parent,
            _ => id,
        }
    }

    /// Top of the parent chain
    pub fn root_material_of(&self, id: MaterialId) -> Option<MaterialId> {
        self.ancestors(id).last()
    }

    /// Layer resolved through the parent chain, `Opaque` when nothing sets one
    pub fn render_layer_of(&self, id: MaterialId) -> RenderLayerId {
        self.ancestors(id)
            .find_map(|ancestor| self.materials[ancestor].render_layer)
            .unwrap_or(RenderLayerId::Opaque)
    }

    /// Instancing support resolved through the parent chain, off by default
    pub fn supports_instancing(&self, id: MaterialId) -> bool {
        self.ancestors(id)
            .find_map(|ancestor| self.materials[ancestor].supports_instancing)
            .unwrap_or(false)
    }

    /// Property resolved through the parent chain
    pub fn property(&self, id: MaterialId, name: &str) -> Option<&[f32]> {
        self.ancestors(id)
            .find_map(|ancestor| self.materials[ancestor].local_property(name))
    }
}
