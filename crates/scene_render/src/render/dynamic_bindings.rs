//! Auto-bound shader parameters
//!
//! Values a shader receives without the material naming them: camera
//! matrices, the object's world transform and its nearest light. The
//! instancing coordinator reads per-instance values from here and compares
//! the shared ones to decide whether a group can keep growing.

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::scene::{Camera, Light};

/// Parameter the render core can compute on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicParam {
    WorldMatrix,
    WorldViewProjection,
    WorldPosition,
    ViewMatrix,
    ProjectionMatrix,
    ViewProjection,
    CameraPosition,
    LightPosition,
}

/// Value of a [`DynamicParam`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

impl ParamValue {
    pub fn as_slice(&self) -> &[f32] {
        match self {
            Self::Vec3(value) => value,
            Self::Vec4(value) => value,
            Self::Mat4(value) => value,
        }
    }

    /// Raw bytes as uploaded to the GPU
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }
}

fn vec3_value(v: &Vec3) -> ParamValue {
    ParamValue::Vec3([v.x, v.y, v.z])
}

/// Current values of every [`DynamicParam`]
#[derive(Debug, Clone)]
pub struct DynamicBindings {
    view: Mat4,
    projection: Mat4,
    view_projection: Mat4,
    camera_position: Vec3,
    world: Mat4,
    light_position: [f32; 4],
}

impl DynamicBindings {
    /// Bind per-camera values; the object slots start out as identity
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view: camera.get_view_matrix(),
            projection: camera.get_projection_matrix(),
            view_projection: camera.get_view_projection_matrix(),
            camera_position: camera.position,
            world: Mat4::identity(),
            light_position: [0.0; 4],
        }
    }

    /// Bind per-object values
    pub fn bind_object(&mut self, world: &Mat4, light: Option<&Light>) {
        self.world = *world;
        self.light_position = light.map_or([0.0; 4], Light::position_vector);
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_position
    }

    pub fn value(&self, param: DynamicParam) -> ParamValue {
        match param {
            DynamicParam::WorldMatrix => ParamValue::Mat4(utils::mat4_to_floats(&self.world)),
            DynamicParam::WorldViewProjection => {
                ParamValue::Mat4(utils::mat4_to_floats(&(self.view_projection * self.world)))
            }
            DynamicParam::WorldPosition => vec3_value(&self.world.fixed_view::<3, 1>(0, 3).into_owned()),
            DynamicParam::ViewMatrix => ParamValue::Mat4(utils::mat4_to_floats(&self.view)),
            DynamicParam::ProjectionMatrix => ParamValue::Mat4(utils::mat4_to_floats(&self.projection)),
            DynamicParam::ViewProjection => ParamValue::Mat4(utils::mat4_to_floats(&self.view_projection)),
            DynamicParam::CameraPosition => vec3_value(&self.camera_position),
            DynamicParam::LightPosition => ParamValue::Vec4(self.light_position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_object_binding_changes_world_values_only() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0, 0.1, 100.0);
        let mut bindings = DynamicBindings::from_camera(&camera);
        let view_before = bindings.value(DynamicParam::ViewProjection);

        let light = Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::repeat(1.0), 1.0);
        bindings.bind_object(&Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0)), Some(&light));

        assert_eq!(bindings.value(DynamicParam::ViewProjection), view_before);
        assert_eq!(bindings.value(DynamicParam::WorldPosition), ParamValue::Vec3([4.0, 5.0, 6.0]));
        assert_eq!(bindings.value(DynamicParam::LightPosition), ParamValue::Vec4([1.0, 2.0, 3.0, 1.0]));
    }

    #[test]
    fn test_param_bytes_are_little_endian_floats() {
        let value = ParamValue::Vec3([1.0, 2.0, 3.0]);
        let bytes = value.as_bytes();
        assert_eq!(bytes.len(), 12);
        assert_relative_eq!(f32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 2.0);
    }
}
