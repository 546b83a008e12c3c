//! Minimal rigid-transform math used to place possessables relative to anchors.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn one() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Component-wise product, used for scale composition
    pub fn scaled_by(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x * other.x, self.y * other.y, self.z * other.z)
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Unit quaternion rotation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    pub fn from_axis_angle(axis: Vec3, radians: f32) -> Self {
        let len = axis.length();
        if len < f32::EPSILON {
            return Self::identity();
        }
        let axis = axis * (1.0 / len);
        let half = radians * 0.5;
        let s = half.sin();
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: half.cos(),
        }
    }

    /// Builds a rotation from Euler angles in degrees.
    ///
    /// Angles are applied roll (z) first, then pitch (x), then yaw (y), which is
    /// the convention hand offsets are authored in.
    pub fn from_euler_degrees(euler: Vec3) -> Self {
        let pitch = Self::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), euler.x.to_radians());
        let yaw = Self::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), euler.y.to_radians());
        let roll = Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), euler.z.to_radians());
        yaw * pitch * roll
    }

    pub fn normalized(self) -> Self {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if len < f32::EPSILON {
            return Self::identity();
        }
        Self {
            x: self.x / len,
            y: self.y / len,
            z: self.z / len,
            w: self.w / len,
        }
    }

    /// Rotates a direction vector by this quaternion
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Quat {
    type Output = Quat;

    fn mul(self, rhs: Quat) -> Quat {
        Quat {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}

/// Position and orientation of a reference frame in world space
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::identity())
    }

    /// Composes a local offset onto this frame (`self ∘ local`).
    ///
    /// The offset is rotated into the frame but not scaled by it.
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.position + self.rotation.rotate(local.position),
            rotation: (self.rotation * local.rotation).normalized(),
        }
    }
}

/// Full presentation state of an object: pose plus local scale
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quat::identity(), Vec3::one())
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::identity(), Vec3::one())
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    pub fn with_pose(self, pose: Pose) -> Self {
        Self {
            position: pose.position,
            rotation: pose.rotation,
            scale: self.scale,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_identity_rotation_leaves_vector() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let r = Quat::identity().rotate(v);
        assert_eq!(r, v);
    }

    #[test]
    fn test_yaw_quarter_turn() {
        let q = Quat::from_euler_degrees(Vec3::new(0.0, 90.0, 0.0));
        let r = q.rotate(Vec3::new(0.0, 0.0, 1.0));
        assert_approx_eq!(r.x, 1.0, 1e-5);
        assert_approx_eq!(r.y, 0.0, 1e-5);
        assert_approx_eq!(r.z, 0.0, 1e-5);
    }

    #[test]
    fn test_quaternion_product_composes_rotations() {
        let a = Quat::from_euler_degrees(Vec3::new(0.0, 45.0, 0.0));
        let b = Quat::from_euler_degrees(Vec3::new(0.0, 45.0, 0.0));
        let r = (a * b).rotate(Vec3::new(0.0, 0.0, 1.0));
        assert_approx_eq!(r.x, 1.0, 1e-5);
        assert_approx_eq!(r.z, 0.0, 1e-5);
    }

    #[test]
    fn test_compose_rotates_offset_into_frame() {
        let anchor = Pose::new(
            Vec3::new(10.0, 1.0, 0.0),
            Quat::from_euler_degrees(Vec3::new(0.0, 90.0, 0.0)),
        );
        let offset = Pose::at(Vec3::new(0.0, 0.0, 2.0));
        let world = anchor.compose(&offset);

        assert_approx_eq!(world.position.x, 12.0, 1e-5);
        assert_approx_eq!(world.position.y, 1.0, 1e-5);
        assert_approx_eq!(world.position.z, 0.0, 1e-5);
    }

    #[test]
    fn test_scaled_by_is_component_wise() {
        let s = Vec3::new(2.0, 3.0, 4.0).scaled_by(Vec3::new(0.5, 1.0, 2.0));
        assert_eq!(s, Vec3::new(1.0, 3.0, 8.0));
    }

    #[test]
    fn test_zero_axis_is_identity() {
        let q = Quat::from_axis_angle(Vec3::zero(), 1.0);
        assert_eq!(q, Quat::identity());
    }
}
