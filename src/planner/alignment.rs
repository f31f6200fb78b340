//! Aligning sampled clips to the pose history

use crate::animation::frame::{self, Frame};
use crate::utils::math::{heading_delta, normalize_or_identity, quat_at, write_quat, yaw_twist};
use glam::{Quat, Vec3};

/// Rigid root transform that moves a clip onto an anchor pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootAlignment {
    source: Vec3,
    destination: Vec3,
    rotation: Quat,
}

impl Default for RootAlignment {
    fn default() -> Self {
        Self {
            source: Vec3::ZERO,
            destination: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl RootAlignment {
    /// Put the clip's first root on the anchor's root and match its heading
    pub fn to_anchor(first: &[f32], anchor: &[f32], ignore_rotation: bool) -> Self {
        let rotation = if ignore_rotation {
            Quat::IDENTITY
        } else {
            let anchor_yaw = yaw_twist(frame::root_orientation(anchor));
            let first_yaw = yaw_twist(frame::root_orientation(first));
            normalize_or_identity(anchor_yaw * first_yaw.inverse())
        };
        Self {
            source: frame::root_position(first),
            destination: frame::root_position(anchor),
            rotation,
        }
    }

    /// Add the yaw that makes the clip's root displacement head for `target`
    pub fn heading_toward(mut self, first: &[f32], last: &[f32], target: Vec3) -> Self {
        let displacement = self.rotation * (frame::root_position(last) - frame::root_position(first));
        let desired = target - self.destination;
        self.rotation = normalize_or_identity(heading_delta(displacement, desired) * self.rotation);
        self
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn apply_frame(&self, f: &mut [f32]) {
        let p = frame::root_position(f);
        frame::set_root_position(f, self.destination + self.rotation * (p - self.source));
        let q = frame::root_orientation(f);
        frame::set_root_orientation(f, self.rotation * q);
    }

    pub fn apply(&self, frames: &mut [Frame]) {
        for f in frames.iter_mut() {
            self.apply_frame(f);
        }
    }

    pub fn transformed(&self, f: &[f32]) -> Frame {
        let mut out = f.to_vec();
        self.apply_frame(&mut out);
        out
    }
}

/// Ease the first `window` frames out of `previous` so the hand-off has no pop
pub fn smooth_transition(frames: &mut [Frame], previous: &[f32], window: usize) {
    let Some(first) = frames.first().cloned() else {
        return;
    };
    if window == 0 || first.len() != previous.len() {
        return;
    }
    let window = window.min(frames.len());
    let position_offset = frame::root_position(previous) - frame::root_position(&first);
    let offsets: Vec<(usize, Quat)> = frame::quaternion_offsets(first.len())
        .map(|offset| {
            let from = normalize_or_identity(quat_at(previous, offset));
            let to = normalize_or_identity(quat_at(&first, offset));
            let to = if from.dot(to) < 0.0 { -to } else { to };
            (offset, normalize_or_identity(from * to.inverse()))
        })
        .collect();

    for (i, f) in frames.iter_mut().take(window).enumerate() {
        let weight = 1.0 - i as f32 / window as f32;
        let p = frame::root_position(f);
        frame::set_root_position(f, p + position_offset * weight);
        for (offset, delta) in &offsets {
            let correction = Quat::IDENTITY.slerp(*delta, weight);
            let q = quat_at(f, *offset);
            write_quat(f, *offset, correction * q);
        }
    }
}

/// Spread an IK correction solved at `keyframe` over a linear window around it
pub fn apply_keyframe_correction(
    frames: &mut [Frame],
    keyframe: usize,
    original: &[f32],
    corrected: &[f32],
    window: usize,
) {
    if keyframe >= frames.len() {
        return;
    }
    let deltas: Vec<(usize, Quat)> = frame::quaternion_offsets(original.len())
        .filter_map(|offset| {
            let before = normalize_or_identity(quat_at(original, offset));
            let after = normalize_or_identity(quat_at(corrected, offset));
            if before.dot(after).abs() > 1.0 - 1e-7 {
                return None;
            }
            Some((offset, normalize_or_identity(after * before.inverse())))
        })
        .collect();
    if deltas.is_empty() {
        return;
    }

    let start = keyframe.saturating_sub(window);
    let end = (keyframe + window).min(frames.len() - 1);
    for idx in start..=end {
        let distance = idx.abs_diff(keyframe) as f32;
        let weight = 1.0 - distance / (window as f32 + 1.0);
        for (offset, delta) in &deltas {
            let correction = Quat::IDENTITY.slerp(*delta, weight);
            let q = quat_at(&frames[idx], *offset);
            write_quat(&mut frames[idx], *offset, correction * q);
        }
    }
    // the keyframe itself takes the solved pose exactly
    for (offset, _) in &deltas {
        let q = quat_at(corrected, *offset);
        write_quat(&mut frames[keyframe], *offset, q);
    }
}

/// Copy the quaternions at `offsets` from `source` (clamped in time) into `frames`
pub fn overlay_joints(frames: &mut [Frame], source: &[Frame], offsets: &[usize]) {
    if source.is_empty() {
        return;
    }
    for (idx, f) in frames.iter_mut().enumerate() {
        let src = &source[idx.min(source.len() - 1)];
        if src.len() != f.len() {
            continue;
        }
        for &offset in offsets {
            f[offset..offset + 4].copy_from_slice(&src[offset..offset + 4]);
        }
    }
}
