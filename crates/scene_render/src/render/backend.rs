//! Backend abstraction for the render core
//!
//! The render core never talks to a graphics API directly. Everything it
//! submits goes through [`RenderBackend`]: pass allocation, plain draws and
//! instanced draws. [`RecordingBackend`] implements the trait by recording
//! every call, which is what headless tools and the tests use.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::dynamic_bindings::DynamicParam;
use super::material::{MaterialLibrary, RenderStateHandle, TextureStateHandle};
use super::render_layer::{BatchRef, RenderLayerId};
use crate::foundation::collections::{LightId, MaterialId, ObjectId, SlotMap};
use crate::foundation::math::utils;
use crate::scene::{GeometryHandle, RenderObject};

/// Handle to a render pass allocated by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub u64);

/// Handle to a render target owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RenderTargetHandle(pub u64);

/// Handle to the shader program an instanced draw is issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderHandle(pub u64);

/// Antialiasing modes a pass can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntialiasingType {
    None,
    Msaa2x,
    Msaa4x,
}

impl AntialiasingType {
    pub fn samples(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Msaa2x => 2,
            Self::Msaa4x => 4,
        }
    }

    pub fn is_multisampled(self) -> bool {
        self != Self::None
    }
}

/// What happens to an attachment at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    None,
    Load,
    Clear,
}

/// What happens to an attachment at the end of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    None,
    Store,
    /// Resolve multisampled contents into the target
    Resolve,
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1280.0, 720.0)
    }
}

/// Everything the backend needs to allocate a pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassConfig {
    /// `None` renders into the default framebuffer
    pub color_target: Option<RenderTargetHandle>,
    pub color_load: LoadAction,
    pub color_store: StoreAction,
    pub clear_color: [f32; 4],
    pub depth_load: LoadAction,
    pub depth_store: StoreAction,
    pub antialiasing: AntialiasingType,
    pub viewport: Viewport,
    /// Passes with a higher priority execute first
    pub priority: i32,
}

impl Default for RenderPassConfig {
    fn default() -> Self {
        Self {
            color_target: None,
            color_load: LoadAction::Clear,
            color_store: StoreAction::Store,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_load: LoadAction::Clear,
            depth_store: StoreAction::None,
            antialiasing: AntialiasingType::None,
            viewport: Viewport::default(),
            priority: 0,
        }
    }
}

/// Single draw as submitted to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DrawPacket {
    pub object: ObjectId,
    pub batch_index: usize,
    pub layer: RenderLayerId,
    pub material: MaterialId,
    pub geometry: Option<GeometryHandle>,
    pub index_count: u32,
    pub render_state: RenderStateHandle,
    pub texture_state: TextureStateHandle,
    /// Column-major world matrix
    pub world_matrix: [f32; 16],
    pub light: Option<LightId>,
}

impl DrawPacket {
    /// Build the packet for one batch of a registered object
    ///
    /// Returns `None` when the object, the batch or its material no longer
    /// exists.
    pub fn from_batch(
        batch: BatchRef,
        layer: RenderLayerId,
        objects: &SlotMap<ObjectId, RenderObject>,
        materials: &MaterialLibrary,
    ) -> Option<Self> {
        let object = objects.get(batch.object)?;
        let render_batch = object.render_batch(batch.batch_index)?;
        let material = materials.get(render_batch.material)?;

        Some(Self {
            object: batch.object,
            batch_index: batch.batch_index,
            layer,
            material: render_batch.material,
            geometry: render_batch.geometry.as_ref().map(|geometry| geometry.handle),
            index_count: render_batch.geometry.as_ref().map_or(0, |geometry| geometry.index_count),
            render_state: material.render_state,
            texture_state: material.texture_state,
            world_matrix: utils::mat4_to_floats(object.world_transform()),
            light: object.light(),
        })
    }
}

/// Where a per-instance uniform takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum UniformSource {
    /// Computed by the render core for each object
    Dynamic(DynamicParam),
    /// Material property, resolved through the parent chain
    Property(String),
}

/// Uniform replicated once per instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstancedUniform {
    pub name: String,
    pub source: UniformSource,
    /// Bytes reserved per instance
    pub size: usize,
}

impl InstancedUniform {
    pub fn new(name: impl Into<String>, source: UniformSource, size: usize) -> Self {
        Self {
            name: name.into(),
            source,
            size,
        }
    }
}

/// How a shader wants its instanced data laid out
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstancingLayout {
    pub shader: ShaderHandle,
    /// Uniforms copied for every instance
    pub uniforms: Vec<InstancedUniform>,
    /// Parameters bound once per draw; a change ends the current group
    pub shared_params: Vec<DynamicParam>,
}

/// Per-instance data of one uniform, `instance_count * size` bytes
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceBuffer {
    pub name: String,
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Instanced draw as submitted to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct InstancedDraw {
    /// First packet of the group; shared state is taken from it
    pub template: DrawPacket,
    pub shader: ShaderHandle,
    pub instance_count: u32,
    pub buffers: Vec<InstanceBuffer>,
}

/// Main rendering backend trait
///
/// Draw submission is fire-and-forget; failures inside the backend are the
/// backend's to report.
pub trait RenderBackend {
    /// Whether the device can render with the given antialiasing mode
    fn supports_antialiasing(&self, antialiasing: AntialiasingType) -> bool;

    /// Allocate a pass for this frame, `None` if the backend cannot
    fn allocate_render_pass(&mut self, config: &RenderPassConfig) -> Option<RenderPassHandle>;

    /// Start recording into a pass
    fn begin_render_pass(&mut self, pass: RenderPassHandle);

    /// Finish recording into a pass
    fn end_render_pass(&mut self, pass: RenderPassHandle);

    /// Instanced data layout of the shader a material uses, if it has one
    fn instancing_layout(&self, material: MaterialId) -> Option<InstancingLayout>;

    /// Submit one indexed draw
    fn draw_indexed(&mut self, packet: &DrawPacket);

    /// Submit one instanced indexed draw
    fn draw_indexed_instanced(&mut self, draw: &InstancedDraw);
}

/// Call received by a [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    AllocateRenderPass(RenderPassConfig),
    BeginRenderPass(RenderPassHandle),
    EndRenderPass(RenderPassHandle),
    DrawIndexed(DrawPacket),
    DrawIndexedInstanced(InstancedDraw),
}

/// Backend that records every call instead of rendering
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    supported_antialiasing: Vec<AntialiasingType>,
    layouts: HashMap<MaterialId, InstancingLayout>,
    default_layout: Option<InstancingLayout>,
    refuse_passes: bool,
    next_pass: u64,
}

impl RecordingBackend {
    /// A backend without multisampling or instancing layouts
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_antialiasing(mut self, antialiasing: AntialiasingType) -> Self {
        self.supported_antialiasing.push(antialiasing);
        self
    }

    /// Layout handed out for materials without one of their own
    pub fn with_default_layout(mut self, layout: InstancingLayout) -> Self {
        self.default_layout = Some(layout);
        self
    }

    pub fn set_layout(&mut self, material: MaterialId, layout: InstancingLayout) {
        self.layouts.insert(material, layout);
    }

    /// Make every following pass allocation fail
    pub fn refuse_render_passes(&mut self, refuse: bool) {
        self.refuse_passes = refuse;
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Plain draws in submission order
    pub fn draws(&self) -> impl Iterator<Item = &DrawPacket> + '_ {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::DrawIndexed(packet) => Some(packet),
            _ => None,
        })
    }

    /// Instanced draws in submission order
    pub fn instanced_draws(&self) -> impl Iterator<Item = &InstancedDraw> + '_ {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::DrawIndexedInstanced(draw) => Some(draw),
            _ => None,
        })
    }

    /// Pass configurations in allocation order
    pub fn pass_configs(&self) -> impl Iterator<Item = &RenderPassConfig> + '_ {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::AllocateRenderPass(config) => Some(config),
            _ => None,
        })
    }
}

impl RenderBackend for RecordingBackend {
    fn supports_antialiasing(&self, antialiasing: AntialiasingType) -> bool {
        antialiasing == AntialiasingType::None || self.supported_antialiasing.contains(&antialiasing)
    }

    fn allocate_render_pass(&mut self, config: &RenderPassConfig) -> Option<RenderPassHandle> {
        if self.refuse_passes {
            return None;
        }
        self.calls.push(BackendCall::AllocateRenderPass(config.clone()));
        self.next_pass += 1;
        Some(RenderPassHandle(self.next_pass))
    }

    fn begin_render_pass(&mut self, pass: RenderPassHandle) {
        self.calls.push(BackendCall::BeginRenderPass(pass));
    }

    fn end_render_pass(&mut self, pass: RenderPassHandle) {
        self.calls.push(BackendCall::EndRenderPass(pass));
    }

    fn instancing_layout(&self, material: MaterialId) -> Option<InstancingLayout> {
        self.layouts.get(&material).or(self.default_layout.as_ref()).cloned()
    }

    fn draw_indexed(&mut self, packet: &DrawPacket) {
        self.calls.push(BackendCall::DrawIndexed(packet.clone()));
    }

    fn draw_indexed_instanced(&mut self, draw: &InstancedDraw) {
        self.calls.push(BackendCall::DrawIndexedInstanced(draw.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_backend_antialiasing_support() {
        let backend = RecordingBackend::new().with_antialiasing(AntialiasingType::Msaa2x);
        assert!(backend.supports_antialiasing(AntialiasingType::None));
        assert!(backend.supports_antialiasing(AntialiasingType::Msaa2x));
        assert!(!backend.supports_antialiasing(AntialiasingType::Msaa4x));
    }

    #[test]
    fn test_refused_pass_records_nothing() {
        let mut backend = RecordingBackend::new();
        backend.refuse_render_passes(true);
        assert_eq!(backend.allocate_render_pass(&RenderPassConfig::default()), None);
        assert!(backend.calls().is_empty());

        backend.refuse_render_passes(false);
        let first = backend.allocate_render_pass(&RenderPassConfig::default());
        let second = backend.allocate_render_pass(&RenderPassConfig::default());
        assert_ne!(first, second);
        assert_eq!(backend.pass_configs().count(), 2);
    }

    #[test]
    fn test_material_layout_overrides_default() {
        let mut materials: SlotMap<MaterialId, ()> = SlotMap::with_key();
        let plain = materials.insert(());
        let special = materials.insert(());

        let mut backend = RecordingBackend::new().with_default_layout(InstancingLayout {
            shader: ShaderHandle(1),
            ..Default::default()
        });
        backend.set_layout(
            special,
            InstancingLayout {
                shader: ShaderHandle(2),
                ..Default::default()
            },
        );

        assert_eq!(backend.instancing_layout(plain).map(|layout| layout.shader), Some(ShaderHandle(1)));
        assert_eq!(backend.instancing_layout(special).map(|layout| layout.shader), Some(ShaderHandle(2)));
    }
}
