use glam::{Quat, Vec3};
use std::fmt;

/// 3D vector in the MOSIM scene coordinate system (left handed, Y up)
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Vector3 {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Convert into the right handed motion model frame (X mirrored)
    pub fn to_model(&self) -> Vec3 {
        Vec3::new(-self.x, self.y, self.z)
    }

    pub fn from_model(v: Vec3) -> Self {
        Self::new(-v.x, v.y, v.z)
    }

    /// Convert to array for compatibility
    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

fn default_w() -> f32 {
    1.0
}

/// Quaternion in the MOSIM scene coordinate system
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Quaternion {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "default_w")]
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Convert into the motion model frame: `[w, x, y, z] = [-W, -X, Y, Z]`
    pub fn to_model(&self) -> Quat {
        let q = Quat::from_xyzw(-self.x, self.y, self.z, -self.w);
        if q.length_squared() < 1e-12 {
            Quat::IDENTITY
        } else {
            q.normalize()
        }
    }

    pub fn from_model(q: Quat) -> Self {
        Self::new(-q.x, q.y, q.z, -q.w)
    }
}

/// Read the `[w, x, y, z]` quaternion stored at `offset`
pub fn quat_at(frame: &[f32], offset: usize) -> Quat {
    Quat::from_xyzw(
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
        frame[offset],
    )
}

/// Write a normalized quaternion as `[w, x, y, z]` at `offset`
pub fn write_quat(frame: &mut [f32], offset: usize, q: Quat) {
    let q = normalize_or_identity(q);
    frame[offset] = q.w;
    frame[offset + 1] = q.x;
    frame[offset + 2] = q.y;
    frame[offset + 3] = q.z;
}

pub fn normalize_or_identity(q: Quat) -> Quat {
    let len_sq = q.length_squared();
    if !len_sq.is_finite() || len_sq < 1e-12 {
        Quat::IDENTITY
    } else {
        q.normalize()
    }
}

/// Shortest-path slerp of two stored quaternions, written back into `target`
pub fn slerp_slot(target: &mut [f32], other: &[f32], offset: usize, weight: f32) {
    let q1 = normalize_or_identity(quat_at(target, offset));
    let q2 = normalize_or_identity(quat_at(other, offset));
    write_quat(target, offset, q1.slerp(q2, weight.clamp(0.0, 1.0)));
}

/// Weighted average of unit quaternions (sign aligned to the first, then normalized)
pub fn blend_quats(quats: &[Quat], weights: &[f32]) -> Quat {
    let Some(&reference) = quats.first() else {
        return Quat::IDENTITY;
    };
    let mut acc = glam::Vec4::ZERO;
    for (q, w) in quats.iter().zip(weights) {
        let v = glam::Vec4::from(*q);
        let v = if v.dot(glam::Vec4::from(reference)) < 0.0 { -v } else { v };
        acc += v * *w;
    }
    normalize_or_identity(Quat::from_vec4(acc))
}

/// Rotate a vector around the up axis by `angle_deg` degrees
pub fn rotate_vector_deg(vec: Vec3, angle_deg: f32) -> Vec3 {
    Quat::from_rotation_y(angle_deg.to_radians()) * vec
}

/// Heading angle (radians around +Y) of the forward axis rotated by `q`
pub fn heading_of(q: Quat, forward: Vec3) -> f32 {
    let dir = q * forward;
    dir.x.atan2(dir.z)
}

/// Rotation around +Y between the horizontal projections of two directions
pub fn heading_delta(from: Vec3, to: Vec3) -> Quat {
    let a = Vec3::new(from.x, 0.0, from.z);
    let b = Vec3::new(to.x, 0.0, to.z);
    if a.length_squared() < 1e-10 || b.length_squared() < 1e-10 {
        return Quat::IDENTITY;
    }
    let angle = b.x.atan2(b.z) - a.x.atan2(a.z);
    Quat::from_rotation_y(angle)
}

/// Twist component of `q` around the up axis
pub fn yaw_twist(q: Quat) -> Quat {
    let twist = Quat::from_xyzw(0.0, q.y, 0.0, q.w);
    normalize_or_identity(twist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quat_slot_roundtrip_is_normalized() {
        let mut frame = vec![0.0; 7];
        write_quat(&mut frame, 3, Quat::from_xyzw(0.0, 2.0, 0.0, 2.0));
        let q = quat_at(&frame, 3);
        assert!((q.length() - 1.0).abs() < 1e-6);
        assert!((frame[3] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_rotate_vector_deg_quarter_turn() {
        let v = rotate_vector_deg(Vec3::Z, 90.0);
        assert!((v - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_mosim_conversion_mirrors_x() {
        let v = Vector3::new(0.3, 1.2, 0.4);
        let m = v.to_model();
        assert_eq!(m, Vec3::new(-0.3, 1.2, 0.4));
        assert_eq!(Vector3::from_model(m), v);

        let q = Quaternion::new(0.1, 0.2, 0.3, 0.9);
        let back = Quaternion::from_model(q.to_model());
        let n = (0.01f32 + 0.04 + 0.09 + 0.81).sqrt();
        assert!((back.x - 0.1 / n).abs() < 1e-5);
        assert!((back.w - 0.9 / n).abs() < 1e-5);
    }

    #[test]
    fn test_heading_delta_and_blend() {
        let q = heading_delta(Vec3::Z, Vec3::X);
        assert!(((q * Vec3::Z) - Vec3::X).length() < 1e-5);

        let a = Quat::from_rotation_y(0.2);
        let blended = blend_quats(&[a, -a], &[0.5, 0.5]);
        assert!(blended.abs_diff_eq(a, 1e-5));
    }
}
