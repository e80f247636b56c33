//! Instanced draw merging
//!
//! Walks a layer's sorted batches and merges runs of compatible neighbours
//! into a single instanced draw. A group starts from one batch and grows
//! while the next batch shares its geometry, material group, instancing
//! layout, render and texture state, and the shader's shared parameters. Per-instance uniforms
//! are copied into byte buffers as the group grows.

use super::backend::{
    DrawPacket, InstanceBuffer, InstancedDraw, InstancingLayout, RenderBackend, UniformSource,
};
use super::dynamic_bindings::{DynamicBindings, ParamValue};
use super::material::MaterialLibrary;
use super::render_layer::{BatchRef, RenderLayerId};
use super::FrameStats;
use crate::foundation::collections::{LightId, MaterialId, ObjectId, SlotMap};
use crate::foundation::math::Mat4;
use crate::scene::{Light, RenderObject};

/// Read-only frame state needed to build and merge draws
pub struct DrawContext<'a> {
    pub objects: &'a SlotMap<ObjectId, RenderObject>,
    pub materials: &'a MaterialLibrary,
    pub lights: &'a SlotMap<LightId, Light>,
    /// Bindings with the frame's camera values already set
    pub camera_bindings: &'a DynamicBindings,
}

impl<'a> DrawContext<'a> {
    fn bindings_for(&self, packet: &DrawPacket) -> DynamicBindings {
        let mut bindings = self.camera_bindings.clone();
        let light = packet.light.and_then(|id| self.lights.get(id));
        bindings.bind_object(&Mat4::from_column_slice(&packet.world_matrix), light);
        bindings
    }

    /// Materials sharing this key may share a draw
    fn instancing_key(&self, material: MaterialId) -> MaterialId {
        self.materials.sharing_group_of(material)
    }
}

#[derive(Debug)]
struct InstancingGroup {
    template: DrawPacket,
    key: MaterialId,
    layout: InstancingLayout,
    shared_values: Vec<ParamValue>,
    buffers: Vec<InstanceBuffer>,
    instance_count: u32,
}

impl InstancingGroup {
    fn write_instance(&mut self, bindings: &DynamicBindings, materials: &MaterialLibrary, material: MaterialId) {
        for (uniform, buffer) in self.layout.uniforms.iter().zip(self.buffers.iter_mut()) {
            let start = buffer.data.len();
            match &uniform.source {
                UniformSource::Dynamic(param) => {
                    buffer.data.extend_from_slice(bindings.value(*param).as_bytes());
                }
                UniformSource::Property(name) => {
                    if let Some(value) = materials.property(material, name) {
                        buffer.data.extend_from_slice(bytemuck::cast_slice(value));
                    }
                }
            }
            // Every instance occupies exactly one stride
            buffer.data.resize(start + uniform.size, 0);
        }
        self.instance_count += 1;
    }
}

#[derive(Debug)]
enum GroupState {
    Idle,
    Accumulating(InstancingGroup),
}

/// Merges compatible consecutive batches into instanced draws
#[derive(Debug)]
pub struct InstancingCoordinator {
    state: GroupState,
    max_instances: u32,
}

impl InstancingCoordinator {
    pub fn new(max_instances: u32) -> Self {
        Self {
            state: GroupState::Idle,
            max_instances: max_instances.max(1),
        }
    }

    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }

    pub fn set_max_instances(&mut self, max_instances: u32) {
        self.max_instances = max_instances.max(1);
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, GroupState::Accumulating(_))
    }

    /// Instances in the open group, zero when idle
    pub fn instance_count(&self) -> u32 {
        match &self.state {
            GroupState::Idle => 0,
            GroupState::Accumulating(group) => group.instance_count,
        }
    }

    /// Draw a layer's batches in order, merging what can be merged
    pub fn draw_batches(
        &mut self,
        batches: impl IntoIterator<Item = BatchRef>,
        layer: RenderLayerId,
        ctx: &DrawContext<'_>,
        backend: &mut dyn RenderBackend,
        stats: &mut FrameStats,
    ) {
        for batch in batches {
            let Some(packet) = DrawPacket::from_batch(batch, layer, ctx.objects, ctx.materials) else {
                log::warn!("Skipping stale batch {:?}", batch);
                continue;
            };

            if self.try_append(&packet, ctx, &*backend) {
                continue;
            }
            self.flush(backend, stats);
            self.start_group(packet, ctx, backend, stats);
        }
        self.flush(backend, stats);
    }

    /// Open a group seeded with `packet`
    ///
    /// Batches that cannot be instanced are drawn immediately and leave the
    /// coordinator idle. An open group is flushed first.
    pub fn start_group(
        &mut self,
        packet: DrawPacket,
        ctx: &DrawContext<'_>,
        backend: &mut dyn RenderBackend,
        stats: &mut FrameStats,
    ) {
        self.flush(backend, stats);

        let layout = if packet.geometry.is_some() && ctx.materials.supports_instancing(packet.material) {
            backend.instancing_layout(packet.material)
        } else {
            None
        };
        let Some(layout) = layout else {
            backend.draw_indexed(&packet);
            stats.draw_calls += 1;
            return;
        };

        let bindings = ctx.bindings_for(&packet);
        let shared_values = layout.shared_params.iter().map(|param| bindings.value(*param)).collect();
        let buffers = layout
            .uniforms
            .iter()
            .map(|uniform| InstanceBuffer {
                name: uniform.name.clone(),
                stride: uniform.size,
                data: Vec::with_capacity(uniform.size * self.max_instances as usize),
            })
            .collect();

        let mut group = InstancingGroup {
            key: ctx.instancing_key(packet.material),
            template: packet,
            layout,
            shared_values,
            buffers,
            instance_count: 0,
        };
        let material = group.template.material;
        group.write_instance(&bindings, ctx.materials, material);
        self.state = GroupState::Accumulating(group);
    }

    /// Add `packet` to the open group if it is compatible
    pub fn try_append(&mut self, packet: &DrawPacket, ctx: &DrawContext<'_>, backend: &dyn RenderBackend) -> bool {
        let GroupState::Accumulating(group) = &mut self.state else {
            return false;
        };

        if group.instance_count >= self.max_instances {
            return false;
        }
        if !ctx.materials.supports_instancing(packet.material) {
            return false;
        }
        if packet.geometry.is_none() || packet.geometry != group.template.geometry {
            return false;
        }
        if ctx.instancing_key(packet.material) != group.key {
            return false;
        }
        if packet.render_state != group.template.render_state || packet.texture_state != group.template.texture_state {
            return false;
        }
        if packet.material != group.template.material
            && backend.instancing_layout(packet.material).as_ref() != Some(&group.layout)
        {
            return false;
        }

        let bindings = ctx.bindings_for(packet);
        let shared_changed = group
            .layout
            .shared_params
            .iter()
            .zip(&group.shared_values)
            .any(|(param, value)| bindings.value(*param) != *value);
        if shared_changed {
            return false;
        }

        group.write_instance(&bindings, ctx.materials, packet.material);
        true
    }

    /// Submit the open group, if any, as one instanced draw
    pub fn flush(&mut self, backend: &mut dyn RenderBackend, stats: &mut FrameStats) {
        let GroupState::Accumulating(group) = std::mem::replace(&mut self.state, GroupState::Idle) else {
            return;
        };

        log::trace!(
            "Instanced draw of {} x {:?} (material {:?})",
            group.instance_count,
            group.template.geometry,
            group.template.material
        );
        backend.draw_indexed_instanced(&InstancedDraw {
            shader: group.layout.shader,
            instance_count: group.instance_count,
            buffers: group.buffers,
            template: group.template,
        });
        stats.instanced_draw_calls += 1;
        stats.instances += group.instance_count as usize;
    }
}
