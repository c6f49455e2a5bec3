//! Mathematical types shared between the host and the bridge.
//!
//! Positions and velocities are double precision because hosts address large
//! worlds; angles are single precision degrees, the way hosts store them.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D vector in double precision - position, velocity, acceleration
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct DVec3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl DVec3 {
    /// Creates a new vector
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array
    #[must_use]
    pub const fn from_array(arr: [f64; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// True when no component is NaN or infinite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Blends towards `other`.
    ///
    /// Written as `a·(1−t) + b·t` so both endpoints are reproduced exactly.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let s = 1.0 - t;
        Self::new(
            self.x * s + other.x * t,
            self.y * s + other.y * t,
            self.z * s + other.z * t,
        )
    }
}

impl std::ops::Add for DVec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for DVec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f64> for DVec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Euler orientation in degrees.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Orientation {
    /// Heading around the vertical axis
    pub yaw: f32,
    /// Elevation
    pub pitch: f32,
    /// Bank; hosts that do not roll leave this at zero
    pub roll: f32,
}

impl Orientation {
    /// Creates a new orientation
    #[must_use]
    pub const fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    /// True when no angle is NaN or infinite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }

    /// Blends every angle along its shortest arc. See [`lerp_degrees`].
    #[must_use]
    pub fn lerp_shortest(self, other: Self, t: f32) -> Self {
        Self::new(
            lerp_degrees(self.yaw, other.yaw, t),
            lerp_degrees(self.pitch, other.pitch, t),
            lerp_degrees(self.roll, other.roll, t),
        )
    }
}

/// Transform as stored in one arena region: position, orientation, flag word.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform {
    /// Position
    pub position: DVec3,
    /// Orientation
    pub orientation: Orientation,
    /// Host-defined flag word, carried through untouched
    pub flags: u32,
}

impl Transform {
    /// Creates a new transform
    #[must_use]
    pub const fn new(position: DVec3, orientation: Orientation, flags: u32) -> Self {
        Self {
            position,
            orientation,
            flags,
        }
    }
}

/// Wraps an angle in degrees into `[-180, 180)`.
#[inline]
#[must_use]
pub fn wrap_degrees(degrees: f32) -> f32 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Interpolates an angle along the shortest signed arc.
///
/// `t <= 0` returns `from` and `t >= 1` returns `to`, bit for bit. In between
/// the result is wrapped into `[-180, 180)`, so 350° → 10° at `t = 0.5`
/// lands on 0° instead of swinging through 180°.
#[inline]
#[must_use]
pub fn lerp_degrees(from: f32, to: f32, t: f32) -> f32 {
    if t <= 0.0 {
        return from;
    }
    if t >= 1.0 {
        return to;
    }
    let delta = wrap_degrees(to - from);
    wrap_degrees(from + delta * t)
}
