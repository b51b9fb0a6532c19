//! Rigid-body geometry shared by every layer of the formation stack.
//!
//! All frames follow the same convention: local `+X` points right, `+Y` up
//! and `+Z` backward, so a vehicle's forward axis is its local `-Z`.  Offsets
//! handed to followers are expressed in this convention relative to the
//! leader's frame.
//!
//! # Example
//!
//! ```rust
//! use formation_types::geometry::{RigidTransform, Vec3};
//!
//! // Leader at (10, 0, 0) facing world -Z with +Y up.
//! let leader = RigidTransform::create_world(
//!     Vec3::new(10.0, 0.0, 0.0),
//!     Vec3::new(0.0, 0.0, -1.0),
//!     Vec3::new(0.0, 1.0, 0.0),
//! );
//!
//! // 5 units to the leader's right.
//! let p = leader.transform_point(Vec3::new(5.0, 0.0, 0.0));
//! assert!((p.x - 15.0).abs() < 1e-9);
//! ```

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector of `f64` components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    /// Unit vector in the same direction, or the zero vector when `self` has
    /// no length.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= f64::EPSILON {
            Self::ZERO
        } else {
            self * (1.0 / len)
        }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Scale the vector down so its length does not exceed `max_len`.
    pub fn clamp_length(self, max_len: f64) -> Self {
        let len = self.length();
        if len > max_len && len > f64::EPSILON {
            self * (max_len / len)
        } else {
            self
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X:{:.2} Y:{:.2} Z:{:.2}", self.x, self.y, self.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RigidTransform
// ────────────────────────────────────────────────────────────────────────────

/// A rigid pose: world-space position plus an orthonormal right/up/backward
/// basis.
///
/// On the wire this is the 4×3 row-major matrix
/// `[right, up, backward, translation]` flattened to 12 floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub right: Vec3,
    pub up: Vec3,
    pub backward: Vec3,
    pub translation: Vec3,
}

impl RigidTransform {
    /// The world frame itself.
    pub fn identity() -> Self {
        Self {
            right: Vec3::new(1.0, 0.0, 0.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            backward: Vec3::new(0.0, 0.0, 1.0),
            translation: Vec3::ZERO,
        }
    }

    /// Build a pose at `position` looking along `forward` with `up` as the
    /// approximate up direction.  `up` is re-orthogonalised against
    /// `forward`.
    pub fn create_world(position: Vec3, forward: Vec3, up: Vec3) -> Self {
        let f = forward.normalize();
        let right = f.cross(up).normalize();
        let up = right.cross(f);
        Self {
            right,
            up,
            backward: -f,
            translation: position,
        }
    }

    pub fn forward(&self) -> Vec3 {
        -self.backward
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    /// Rotate a local direction into world space (no translation).
    pub fn transform_normal(&self, local: Vec3) -> Vec3 {
        self.right * local.x + self.up * local.y + self.backward * local.z
    }

    /// Map a point expressed in this frame into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.translation + self.transform_normal(local)
    }

    /// Rotate a world direction into this frame (multiplication by the
    /// transposed basis).
    pub fn inverse_transform_normal(&self, world: Vec3) -> Vec3 {
        Vec3::new(
            world.dot(self.right),
            world.dot(self.up),
            world.dot(self.backward),
        )
    }

    /// Express a world point in this frame.
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.inverse_transform_normal(world - self.translation)
    }

    /// Flatten to the 12-float wire layout.
    pub fn to_wire(&self) -> [f64; 12] {
        let r = [self.right, self.up, self.backward, self.translation];
        let mut out = [0.0; 12];
        for (row, v) in r.iter().enumerate() {
            out[row * 3] = v.x;
            out[row * 3 + 1] = v.y;
            out[row * 3 + 2] = v.z;
        }
        out
    }

    /// Rebuild from the 12-float wire layout.  No orthonormality check is
    /// performed.
    pub fn from_wire(m: &[f64; 12]) -> Self {
        let row = |i: usize| Vec3::new(m[i * 3], m[i * 3 + 1], m[i * 3 + 2]);
        Self {
            right: row(0),
            up: row(1),
            backward: row(2),
            translation: row(3),
        }
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
