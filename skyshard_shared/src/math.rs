//! Math types.
//!
//! Small and deterministic on purpose: plain `f32` vectors plus the
//! fixed-point encoding the protocol uses for positions.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Returns the unit vector, or zero for a zero-length input.
    pub fn normalized(self) -> Self {
        let len = self.len();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    /// Squared distance on the horizontal (x/z) plane.
    pub fn planar_distance_sq(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Scale between world units and fixed-point position values.
pub const FIXED_POINT_SCALE: f64 = (1 << 12) as f64;

/// Packed rotation value the client decodes as identity.
pub const PACKED_IDENTITY_ROTATION: u32 = 1023;

/// Position in protocol fixed-point form (`value * 4096`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FixedPointVector3 {
    pub fixed_point_values: [i64; 3],
}

impl FixedPointVector3 {
    pub const ZERO: Self = Self {
        fixed_point_values: [0, 0, 0],
    };

    pub fn from_vec3(v: Vec3) -> Self {
        let scale = |c: f32| (c as f64 * FIXED_POINT_SCALE) as i64;
        Self {
            fixed_point_values: [scale(v.x), scale(v.y), scale(v.z)],
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        let [x, y, z] = self.fixed_point_values;
        let unscale = |c: i64| (c as f64 / FIXED_POINT_SCALE) as f32;
        Vec3::new(unscale(x), unscale(y), unscale(z))
    }
}
