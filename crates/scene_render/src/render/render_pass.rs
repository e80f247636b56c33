//! # Main Forward Pass
//!
//! One frame of the main camera's view:
//!
//! 1. Allocate the pass on the backend
//! 2. Clip the spatial index against the camera frustum
//! 3. Distribute active batches of visible objects to layers and sort them
//! 4. Draw layers in order, merging batches into instanced draws where the
//!    layer allows it

use super::backend::{
    AntialiasingType, DrawPacket, LoadAction, RenderBackend, RenderPassConfig, RenderTargetHandle,
    StoreAction, Viewport,
};
use super::dynamic_bindings::DynamicBindings;
use super::instancing::{DrawContext, InstancingCoordinator};
use super::material::MaterialLibrary;
use super::render_layer::{LayerSorter, RenderLayer, RenderLayerId};
use super::visibility::VisibilityPass;
use super::{FrameStats, RenderError, RenderResult};
use crate::core::{QualityConfig, RenderSystemConfig};
use crate::foundation::collections::{LightId, ObjectId, SlotMap};
use crate::scene::{Camera, Light, RenderObject, RenderObjectFlags};
use crate::spatial::SpatialIndex;

/// Scene state a pass reads while drawing
pub struct PassInputs<'a> {
    /// Camera visibility is computed for
    pub camera: &'a Camera,
    /// Camera batches are sorted and drawn with, usually the same one
    pub draw_camera: &'a Camera,
    pub index: &'a dyn SpatialIndex,
    pub objects: &'a SlotMap<ObjectId, RenderObject>,
    pub materials: &'a MaterialLibrary,
    pub lights: &'a SlotMap<LightId, Light>,
}

/// Forward pass that draws the main camera's view
#[derive(Debug)]
pub struct MainForwardRenderPass {
    pass_config: RenderPassConfig,
    visibility: VisibilityPass,
    layers: LayerSorter,
    instancing: InstancingCoordinator,
    instancing_enabled: bool,
    visible: Vec<ObjectId>,
    last_stats: FrameStats,
}

impl MainForwardRenderPass {
    pub fn new(config: &RenderSystemConfig) -> Self {
        let pass_config = RenderPassConfig {
            color_load: LoadAction::Load,
            color_store: StoreAction::Store,
            depth_load: LoadAction::Clear,
            depth_store: StoreAction::None,
            ..Default::default()
        };

        Self {
            pass_config,
            visibility: VisibilityPass::new(config.enable_static_occlusion),
            layers: LayerSorter::new(&config.layers),
            instancing: InstancingCoordinator::new(config.instancing.max_instances),
            instancing_enabled: config.instancing.enabled,
            visible: Vec::new(),
            last_stats: FrameStats::default(),
        }
    }

    pub fn pass_config(&self) -> &RenderPassConfig {
        &self.pass_config
    }

    /// Priority and viewport the pass is allocated with
    pub fn set_main_pass_properties(&mut self, priority: i32, viewport: Viewport) {
        self.pass_config.priority = priority;
        self.pass_config.viewport = viewport;
    }

    /// Target to render into, `None` for the default framebuffer
    pub fn set_render_target(&mut self, target: Option<RenderTargetHandle>, color_load: LoadAction, clear_color: [f32; 4]) {
        self.pass_config.color_target = target;
        self.pass_config.color_load = color_load;
        self.pass_config.clear_color = clear_color;
    }

    /// Pick the antialiasing mode for the next frame
    ///
    /// The quality request is used only when allowed and supported by the
    /// device; otherwise the pass renders without multisampling.
    pub fn configure_antialiasing(&mut self, quality: &QualityConfig, backend: &dyn RenderBackend) -> AntialiasingType {
        let requested = if quality.allow_antialiasing {
            quality.antialiasing
        } else {
            AntialiasingType::None
        };
        let antialiasing = if requested.is_multisampled() && backend.supports_antialiasing(requested) {
            requested
        } else {
            AntialiasingType::None
        };

        if antialiasing != self.pass_config.antialiasing {
            log::debug!("Main pass antialiasing: {:?} -> {:?}", self.pass_config.antialiasing, antialiasing);
        }
        self.pass_config.antialiasing = antialiasing;
        self.pass_config.color_store = if antialiasing.is_multisampled() {
            StoreAction::Resolve
        } else {
            StoreAction::Store
        };
        antialiasing
    }

    pub fn visibility(&self) -> &VisibilityPass {
        &self.visibility
    }

    pub fn set_static_occlusion(&mut self, enabled: bool) {
        self.visibility.set_static_occlusion(enabled);
    }

    pub fn set_instancing(&mut self, enabled: bool, max_instances: u32) {
        self.instancing_enabled = enabled;
        self.instancing.set_max_instances(max_instances);
    }

    pub fn layer_sorter(&self) -> &LayerSorter {
        &self.layers
    }

    /// Insert a layer after `after`, or at the end
    pub fn add_render_layer(&mut self, layer: RenderLayer, after: Option<RenderLayerId>) -> bool {
        self.layers.add_render_layer(layer, after)
    }

    pub fn remove_render_layer(&mut self, id: RenderLayerId) -> Option<RenderLayer> {
        self.layers.remove_render_layer(id)
    }

    /// Objects that passed clipping in the last frame
    pub fn visible_objects(&self) -> &[ObjectId] {
        &self.visible
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Render one frame into the backend
    pub fn draw(
        &mut self,
        inputs: &PassInputs<'_>,
        criteria: RenderObjectFlags,
        backend: &mut dyn RenderBackend,
    ) -> RenderResult<FrameStats> {
        let Some(pass) = backend.allocate_render_pass(&self.pass_config) else {
            return Err(RenderError::RenderPassAllocationFailed("main forward pass".to_string()));
        };

        let mut stats = FrameStats::default();

        self.visible.clear();
        self.visibility.clip(inputs.index, inputs.camera, criteria, &mut self.visible);
        stats.visible_objects = self.visible.len();

        stats.batches = self.layers.prepare_layers(&self.visible, inputs.objects, inputs.materials);
        self.layers.sort(inputs.draw_camera.position, inputs.objects, inputs.materials);

        let camera_bindings = DynamicBindings::from_camera(inputs.draw_camera);
        let ctx = DrawContext {
            objects: inputs.objects,
            materials: inputs.materials,
            lights: inputs.lights,
            camera_bindings: &camera_bindings,
        };

        backend.begin_render_pass(pass);
        for (layer, array) in self.layers.ordered() {
            if array.is_empty() {
                continue;
            }

            if layer.instanced && self.instancing_enabled {
                self.instancing.draw_batches(array.batches(), layer.id, &ctx, backend, &mut stats);
                continue;
            }

            for batch in array.batches() {
                if let Some(packet) = DrawPacket::from_batch(batch, layer.id, inputs.objects, inputs.materials) {
                    backend.draw_indexed(&packet);
                    stats.draw_calls += 1;
                }
            }
        }
        backend.end_render_pass(pass);

        log::trace!(
            "Main pass: {} visible, {} batches, {} draw calls",
            stats.visible_objects,
            stats.batches,
            stats.total_draw_calls()
        );
        self.last_stats = stats;
        Ok(stats)
    }
}
