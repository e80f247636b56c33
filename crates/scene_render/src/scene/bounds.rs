//! Bounding volumes and the view frustum used for visibility culling

use serde::{Deserialize, Serialize};

use crate::foundation::math::{Mat4, Point3, Vec3, Vec4};

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// An inverted box that contains nothing; adding points grows it
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::MAX),
            max: Vec3::repeat(f32::MIN),
        }
    }

    /// True when the box contains no point at all
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if `other` lies entirely inside this box
    pub fn contains_aabb(&self, other: &AABB) -> bool {
        !other.is_empty() && self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Check if `other` lies inside this box when only X and Y are considered
    pub fn contains_aabb_xy(&self, other: &AABB) -> bool {
        !other.is_empty()
            && other.min.x >= self.min.x && other.max.x <= self.max.x
            && other.min.y >= self.min.y && other.max.y <= self.max.y
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        !self.is_empty() && !other.is_empty() &&
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Grow the box to include a point
    pub fn add_point(&mut self, point: Vec3) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
    }

    /// Grow the box to include another box
    pub fn add_aabb(&mut self, other: &AABB) {
        if other.is_empty() {
            return;
        }
        self.add_point(other.min);
        self.add_point(other.max);
    }

    /// The eight corners of the box
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned box enclosing this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> AABB {
        if self.is_empty() {
            return *self;
        }
        let mut result = AABB::empty();
        for corner in self.corners() {
            let point = matrix.transform_point(&Point3::from(corner));
            result.add_point(point.coords);
        }
        result
    }
}

/// Result of testing a volume against the frustum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Completely outside at least one plane
    Outside,
    /// Inside every plane that was still active
    Inside,
    /// Straddles at least one active plane
    Intersect,
}

/// Bit mask selecting the frustum planes that still need testing
pub type PlaneMask = u8;

/// Mask with all six frustum planes active
pub const ALL_PLANES: PlaneMask = 0b0011_1111;

/// Frustum for visibility culling
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Six inward-facing planes (left, right, bottom, top, near, far)
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction for clip space with `-w <= x, y <= w` and
    /// `0 <= z <= w`.
    pub fn from_matrix(vp_matrix: &Mat4) -> Self {
        let row = |i: usize| -> Vec4 { vp_matrix.row(i).transpose() };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// A box-shaped frustum, handy for region queries
    pub fn from_aabb(aabb: &AABB) -> Self {
        Self {
            planes: [
                Plane::new(Vec3::x(), -aabb.min.x),
                Plane::new(-Vec3::x(), aabb.max.x),
                Plane::new(Vec3::y(), -aabb.min.y),
                Plane::new(-Vec3::y(), aabb.max.y),
                Plane::new(Vec3::z(), -aabb.min.z),
                Plane::new(-Vec3::z(), aabb.max.z),
            ],
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        let mut mask = ALL_PLANES;
        self.classify(aabb, &mut mask) != Containment::Outside
    }

    /// Classify a box against the planes selected by `mask`.
    ///
    /// Planes the box is completely inside of are cleared from `mask`, so a
    /// caller can hand the reduced mask down to everything contained in the box.
    pub fn classify(&self, aabb: &AABB, mask: &mut PlaneMask) -> Containment {
        if aabb.is_empty() {
            return Containment::Outside;
        }

        for (index, plane) in self.planes.iter().enumerate() {
            let bit = 1 << index;
            if *mask & bit == 0 {
                continue;
            }

            let positive = plane.positive_vertex(aabb);
            if plane.distance_to_point(positive) < 0.0 {
                return Containment::Outside;
            }

            let negative = plane.negative_vertex(aabb);
            if plane.distance_to_point(negative) >= 0.0 {
                *mask &= !bit;
            }
        }

        if *mask == 0 {
            Containment::Inside
        } else {
            Containment::Intersect
        }
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Build a normalized plane from `ax + by + cz + d = 0` coefficients
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.magnitude();
        if length <= f32::EPSILON {
            return Self { normal, distance: coefficients.w };
        }
        Self {
            normal: normal / length,
            distance: coefficients.w / length,
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }

    /// Box corner furthest along the normal
    fn positive_vertex(&self, aabb: &AABB) -> Vec3 {
        let mut p = aabb.min;
        if self.normal.x >= 0.0 { p.x = aabb.max.x; }
        if self.normal.y >= 0.0 { p.y = aabb.max.y; }
        if self.normal.z >= 0.0 { p.z = aabb.max.z; }
        p
    }

    /// Box corner furthest against the normal
    fn negative_vertex(&self, aabb: &AABB) -> Vec3 {
        let mut n = aabb.max;
        if self.normal.x >= 0.0 { n.x = aabb.min.x; }
        if self.normal.y >= 0.0 { n.y = aabb.min.y; }
        if self.normal.z >= 0.0 { n.z = aabb.min.z; }
        n
    }
}
