//! Scene-side data the render system works on

pub mod bounds;
pub mod camera;
pub mod light;
pub mod render_object;

pub use bounds::{Containment, Frustum, Plane, PlaneMask, AABB, ALL_PLANES};
pub use camera::Camera;
pub use light::{Light, LightFlags, LightType};
pub use render_object::{Geometry, GeometryHandle, RenderBatch, RenderObject, RenderObjectFlags};
