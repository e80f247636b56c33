//! # Render System Configuration
//!
//! Tuning knobs for the render core, grouped by subsystem:
//!
//! - **Quad tree**: depth limit, per-frame maintenance budgets, world box
//! - **Instancing**: group size cap and global switch
//! - **Layers**: draw order, sorting flags and instancing per layer
//! - **Quality**: antialiasing request and permission
//!
//! Every section has sensible defaults, so a config file only needs to name
//! what it overrides.

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};
use crate::render::backend::AntialiasingType;
use crate::render::render_layer::{RenderLayerId, SortingFlags};
use crate::scene::AABB;

/// # Quad Tree Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadTreeConfig {
    /// Deepest level a node may be created at (root is level 0)
    pub max_depth: u32,
    /// Dirty z-ranges recomputed per `update`
    pub recalculate_z_per_frame: usize,
    /// Moved objects reinserted per `update`
    pub recalculate_objects_per_frame: usize,
    /// Fixed world box; when absent the box is fitted to the initial objects
    pub world_bounds: Option<AABB>,
    /// Padding added around a fitted world box
    pub world_margin: f32,
}

impl QuadTreeConfig {
    pub fn with_world_bounds(mut self, bounds: AABB) -> Self {
        self.world_bounds = Some(bounds);
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set both per-frame budgets
    pub fn with_budgets(mut self, objects_per_frame: usize, z_per_frame: usize) -> Self {
        self.recalculate_objects_per_frame = objects_per_frame;
        self.recalculate_z_per_frame = z_per_frame;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth > 24 {
            return Err(format!("Quad tree depth {} exceeds the limit of 24", self.max_depth));
        }
        if self.recalculate_objects_per_frame == 0 {
            return Err("Quad tree must reinsert at least one object per frame".to_string());
        }
        if self.world_margin < 0.0 || !self.world_margin.is_finite() {
            return Err(format!("Invalid world margin: {}", self.world_margin));
        }
        if let Some(bounds) = &self.world_bounds {
            if bounds.is_empty() {
                return Err("World bounds are empty".to_string());
            }
        }
        Ok(())
    }
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            recalculate_z_per_frame: 10,
            recalculate_objects_per_frame: 10,
            world_bounds: None,
            world_margin: 10.0,
        }
    }
}

/// # Instancing Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    /// Upper bound on instances merged into one draw
    pub max_instances: u32,
    /// Master switch; when off every batch is drawn on its own
    pub enabled: bool,
}

impl InstancingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_instances == 0 {
            return Err("Max instances must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            max_instances: 64,
            enabled: true,
        }
    }
}

/// Per-layer settings of the main forward pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderLayerConfig {
    pub id: RenderLayerId,
    pub sorting: SortingFlags,
    /// Merge compatible neighbours into instanced draws
    pub instanced: bool,
}

impl RenderLayerConfig {
    pub fn new(id: RenderLayerId, sorting: SortingFlags, instanced: bool) -> Self {
        Self { id, sorting, instanced }
    }

    /// Default layer list of the main forward pass, in draw order
    pub fn main_pass_defaults() -> Vec<Self> {
        let by_material = SortingFlags::SORT_ENABLED | SortingFlags::SORT_BY_MATERIAL;
        let back_to_front = SortingFlags::SORT_ENABLED | SortingFlags::SORT_BY_DISTANCE_BACK_TO_FRONT;

        vec![
            Self::new(RenderLayerId::Opaque, by_material, true),
            Self::new(RenderLayerId::AfterOpaque, by_material, true),
            Self::new(RenderLayerId::Vegetation, by_material, true),
            Self::new(RenderLayerId::AlphaTest, by_material, true),
            Self::new(RenderLayerId::ShadowVolume, by_material, false),
            Self::new(RenderLayerId::Water, by_material, false),
            Self::new(RenderLayerId::Translucent, back_to_front, false),
            Self::new(RenderLayerId::AfterTranslucent, back_to_front, false),
            Self::new(RenderLayerId::DebugDraw, SortingFlags::empty(), false),
        ]
    }
}

/// # Quality Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Antialiasing the current quality level asks for
    pub antialiasing: AntialiasingType,
    /// Global permission; the main pass never multisamples without it
    pub allow_antialiasing: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            antialiasing: AntialiasingType::Msaa4x,
            allow_antialiasing: true,
        }
    }
}

/// # Complete Render System Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSystemConfig {
    pub quad_tree: QuadTreeConfig,
    pub instancing: InstancingConfig,
    /// Layers of the main forward pass in draw order
    pub layers: Vec<RenderLayerConfig>,
    pub quality: QualityConfig,
    /// Require `VISIBLE_STATIC_OCCLUSION` during clipping
    pub enable_static_occlusion: bool,
}

impl RenderSystemConfig {
    pub fn new() -> Self {
        Self {
            quad_tree: QuadTreeConfig::default(),
            instancing: InstancingConfig::default(),
            layers: RenderLayerConfig::main_pass_defaults(),
            quality: QualityConfig::default(),
            enable_static_occlusion: true,
        }
    }

    pub fn with_quad_tree(mut self, quad_tree: QuadTreeConfig) -> Self {
        self.quad_tree = quad_tree;
        self
    }

    pub fn with_instancing(mut self, enabled: bool, max_instances: u32) -> Self {
        self.instancing = InstancingConfig { enabled, max_instances };
        self
    }

    pub fn with_static_occlusion(mut self, enabled: bool) -> Self {
        self.enable_static_occlusion = enabled;
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        self.quad_tree.validate()?;
        self.instancing.validate()?;

        for (index, layer) in self.layers.iter().enumerate() {
            if self.layers[..index].iter().any(|other| other.id == layer.id) {
                return Err(format!("Render layer {:?} is listed twice", layer.id));
            }
            if layer.sorting.contains(
                SortingFlags::SORT_BY_DISTANCE_FRONT_TO_BACK | SortingFlags::SORT_BY_DISTANCE_BACK_TO_FRONT,
            ) {
                return Err(format!("Render layer {:?} sorts in both distance directions", layer.id));
            }
        }

        Ok(())
    }
}

impl Default for RenderSystemConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for RenderSystemConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_defaults_are_valid() {
        let config = RenderSystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quad_tree.max_depth, 10);
        assert_eq!(config.instancing.max_instances, 64);
        assert_eq!(config.layers.len(), 9);
        assert_eq!(config.layers[0].id, RenderLayerId::Opaque);
        assert_eq!(config.layers[8].id, RenderLayerId::DebugDraw);
    }

    #[test]
    fn test_duplicate_layer_is_rejected() {
        let mut config = RenderSystemConfig::default();
        config.layers.push(RenderLayerConfig::new(RenderLayerId::Opaque, SortingFlags::empty(), false));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_instance_cap_is_rejected() {
        let config = RenderSystemConfig::default().with_instancing(true, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RenderSystemConfig = toml::from_str(
            "enable_static_occlusion = false\n[quad_tree]\nmax_depth = 6\n",
        )
        .unwrap();

        assert!(!config.enable_static_occlusion);
        assert_eq!(config.quad_tree.max_depth, 6);
        assert_eq!(config.quad_tree.recalculate_objects_per_frame, 10);
        assert_eq!(config.layers.len(), 9);
    }

    #[test]
    fn test_ron_round_trip_preserves_world_bounds() {
        let bounds = AABB::new(Vec3::repeat(-50.0), Vec3::repeat(50.0));
        let config = RenderSystemConfig::default()
            .with_quad_tree(QuadTreeConfig::default().with_world_bounds(bounds));

        let text = ron::ser::to_string(&config).unwrap();
        let parsed: RenderSystemConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed.quad_tree.world_bounds, Some(bounds));
        assert_eq!(parsed.layers, config.layers);
    }
}
