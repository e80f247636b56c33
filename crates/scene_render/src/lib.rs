//! # Scene Render
//!
//! Render-object spatial hierarchy and per-frame draw pipeline.
//!
//! ## Features
//!
//! - **Quad Tree**: incrementally maintained spatial index with budgeted
//!   per-frame maintenance
//! - **Frustum Culling**: plane-mask propagation through the tree
//! - **Layer Sorting**: fixed layer order with per-layer material or
//!   distance sort keys
//! - **Instancing**: greedy merging of compatible neighbouring batches
//! - **Global Materials**: every registered material chain is rooted at one
//!   scene-wide material
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_render::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut system = RenderSystem::new(RenderSystemConfig::default())?;
//!     let material = system.add_material(Material::new("rock").with_instancing(true))?;
//!
//!     let object = RenderObject::new()
//!         .with_bounding_box(AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0)))
//!         .with_batch(RenderBatch::new(material, None));
//!     system.render_permanent(object)?;
//!
//!     system.set_main_camera(Some(Camera::perspective(Vec3::new(0.0, -10.0, 5.0), 60.0, 1.6, 0.1, 500.0)));
//!
//!     let mut backend = RecordingBackend::new();
//!     system.update(1.0 / 60.0);
//!     let stats = system.render(&mut backend)?;
//!     println!("{} draw calls", stats.total_draw_calls());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;
pub mod spatial;

#[cfg(test)]
mod tests;

/// Common imports for render core users
pub mod prelude {
    pub use crate::{
        core::{Config, InstancingConfig, QualityConfig, QuadTreeConfig, RenderLayerConfig, RenderSystemConfig},
        foundation::{
            collections::{LightId, MaterialId, ObjectId, UpdatableId},
            math::{Mat4, Vec3},
        },
        render::{
            AntialiasingType, FrameStats, Material, MaterialLibrary, RecordingBackend, RenderBackend, RenderError,
            RenderLayerId, RenderResult, RenderSystem, RenderUpdatable, SortingFlags,
        },
        scene::{Camera, Geometry, GeometryHandle, Light, RenderBatch, RenderObject, RenderObjectFlags, AABB},
        spatial::{QuadTree, SpatialIndex},
    };
}
