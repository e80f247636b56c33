//! # Render Module
//!
//! Per-frame pipeline of the render core: materials and their parent chains,
//! batch registration, visibility, layer sorting, instancing and the
//! [`RenderSystem`](render_system::RenderSystem) that drives them.
//!
//! ## Frame Flow
//!
//! ```text
//! RenderSystem::update()   marked objects -> world boxes -> quad tree -> lights
//! RenderSystem::render()   visibility -> layers -> sort -> instancing -> backend
//! ```
//!
//! The graphics backend is reached only through the [`RenderBackend`]
//! trait, so the whole pipeline runs headless against
//! [`RecordingBackend`](backend::RecordingBackend) in tests.

pub mod backend;
pub mod batch_registry;
pub mod dynamic_bindings;
pub mod instancing;
pub mod material;
pub mod render_layer;
pub mod render_pass;
pub mod render_system;
pub mod visibility;

pub use backend::{
    AntialiasingType, BackendCall, DrawPacket, InstanceBuffer, InstancedDraw, InstancedUniform,
    InstancingLayout, LoadAction, RecordingBackend, RenderBackend, RenderPassConfig, RenderPassHandle,
    RenderTargetHandle, ShaderHandle, StoreAction, UniformSource, Viewport,
};
pub use batch_registry::BatchRegistry;
pub use dynamic_bindings::{DynamicBindings, DynamicParam, ParamValue};
pub use instancing::{DrawContext, InstancingCoordinator};
pub use material::{Material, MaterialLibrary, RenderStateHandle, TextureStateHandle};
pub use render_layer::{BatchRef, LayerSorter, RenderBatchArray, RenderLayer, RenderLayerId, SortingFlags};
pub use render_pass::{MainForwardRenderPass, PassInputs};
pub use render_system::{RenderSystem, RenderUpdatable};
pub use visibility::VisibilityPass;

use crate::foundation::collections::{LightId, MaterialId, ObjectId, UpdatableId};

/// Errors reported by the render core
///
/// Every variant describes a rejected call; the render system's state is left
/// unchanged when one is returned.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The object is already part of a render system
    #[error("Render object is already registered (remove index {0})")]
    ObjectAlreadyRegistered(usize),

    /// The handle does not name a registered render object
    #[error("Render object {0:?} is not registered")]
    ObjectNotRegistered(ObjectId),

    /// The handle does not name a registered light
    #[error("Light {0:?} is not registered")]
    LightNotRegistered(LightId),

    /// The handle does not name a registered per-frame updatable
    #[error("Updatable {0:?} is not registered")]
    UpdatableNotRegistered(UpdatableId),

    /// The handle does not name a material in the library
    #[error("Material {0:?} not found")]
    MaterialNotFound(MaterialId),

    /// Re-parenting would make a material its own ancestor
    #[error("Material {0:?} cannot be parented to its own descendant")]
    MaterialCycle(MaterialId),

    /// The batch index is past the end of the object's batch list
    #[error("Render object {0:?} has no batch {1}")]
    BatchNotFound(ObjectId, usize),

    /// Rendering needs a main camera
    #[error("No main camera set")]
    NoCamera,

    /// The backend refused to allocate the main render pass
    #[error("Render pass allocation failed: {0}")]
    RenderPassAllocationFailed(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for render core operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Counters gathered while rendering one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Objects returned by the visibility pass
    pub visible_objects: usize,
    /// Active batches distributed to layers
    pub batches: usize,
    /// Non-instanced draw calls
    pub draw_calls: usize,
    /// Instanced draw calls
    pub instanced_draw_calls: usize,
    /// Instances submitted through instanced draws
    pub instances: usize,
}

impl FrameStats {
    /// Draw calls of either kind
    pub fn total_draw_calls(&self) -> usize {
        self.draw_calls + self.instanced_draw_calls
    }
}
