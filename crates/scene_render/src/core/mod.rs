//! # Core Module
//!
//! Shared configuration for every subsystem of the render core.

pub mod config;

pub use config::{
    Config,
    ConfigError,
    InstancingConfig,
    QualityConfig,
    QuadTreeConfig,
    RenderLayerConfig,
    RenderSystemConfig,
};
