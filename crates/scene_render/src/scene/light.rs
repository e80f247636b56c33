//! Scene lights as seen by the render system
//!
//! The render system only needs a light's position and whether it is
//! dynamic; dynamic lights are assigned to the render objects nearest to them.

use bitflags::bitflags;

use crate::foundation::math::Vec3;

/// Light types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    /// Directional light (like sunlight)
    Directional,
    /// Point light (like a lightbulb)
    Point,
    /// Spot light (like a flashlight)
    Spot,
    /// Ambient term, never bound per object
    Ambient,
}

bitflags! {
    /// Light behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightFlags: u32 {
        /// Light takes part in per-object nearest-light assignment
        const IS_DYNAMIC = 1 << 0;
        /// Light casts shadows
        const CAST_SHADOW = 1 << 1;
    }
}

/// Light source
#[derive(Debug, Clone)]
pub struct Light {
    /// Light type
    pub light_type: LightType,
    /// Light position (for point/spot lights)
    pub position: Vec3,
    /// Light direction (for directional/spot lights)
    pub direction: Vec3,
    /// Light color
    pub color: Vec3,
    /// Light intensity
    pub intensity: f32,
    flags: LightFlags,
}

impl Light {
    /// Create a directional light
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            position: Vec3::zeros(),
            direction: direction.normalize(),
            color,
            intensity,
            flags: LightFlags::empty(),
        }
    }

    /// Create a dynamic point light
    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            direction: Vec3::zeros(),
            color,
            intensity,
            flags: LightFlags::IS_DYNAMIC,
        }
    }

    /// Whether the light is considered for nearest-light assignment
    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(LightFlags::IS_DYNAMIC)
    }

    /// Enable or disable nearest-light assignment for this light
    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.flags.set(LightFlags::IS_DYNAMIC, dynamic);
    }

    /// Builder form of [`Light::set_dynamic`]
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.set_dynamic(dynamic);
        self
    }

    /// Current flags
    pub fn flags(&self) -> LightFlags {
        self.flags
    }

    /// Position packed for shader upload, `w = 1` for positional lights
    pub fn position_vector(&self) -> [f32; 4] {
        match self.light_type {
            LightType::Directional => [-self.direction.x, -self.direction.y, -self.direction.z, 0.0],
            _ => [self.position.x, self.position.y, self.position.z, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_lights_start_dynamic() {
        let mut light = Light::point(Vec3::zeros(), Vec3::repeat(1.0), 1.0);
        assert!(light.is_dynamic());
        light.set_dynamic(false);
        assert!(!light.is_dynamic());
        assert!(!Light::directional(Vec3::y(), Vec3::repeat(1.0), 1.0).is_dynamic());
    }

    #[test]
    fn test_directional_position_vector_points_to_light() {
        let light = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::repeat(1.0), 1.0);
        assert_eq!(light.position_vector(), [0.0, 1.0, 0.0, 0.0]);
    }
}
