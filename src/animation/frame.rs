//! Frame layout and motion clips
//!
//! A frame is a flat `f32` vector: root position at `[0..3]`, then one
//! `[w, x, y, z]` quaternion per animated joint starting at index 3. The
//! quaternion of the joint with frame index `k` lives at `4k + 3`.

use crate::utils::math::{normalize_or_identity, quat_at, write_quat};
use glam::{Quat, Vec3};

pub type Frame = Vec<f32>;

/// Offset of the root orientation quaternion
pub const ROOT_ORIENTATION_OFFSET: usize = 3;

/// Offset of the quaternion of the joint with the given frame index
pub const fn quaternion_offset(frame_index: usize) -> usize {
    frame_index * 4 + 3
}

/// Frame length for a skeleton with `n_animated` quaternion joints
pub const fn frame_len_for(n_animated: usize) -> usize {
    3 + 4 * n_animated
}

pub fn root_position(frame: &[f32]) -> Vec3 {
    Vec3::new(frame[0], frame[1], frame[2])
}

pub fn set_root_position(frame: &mut [f32], position: Vec3) {
    frame[0] = position.x;
    frame[1] = position.y;
    frame[2] = position.z;
}

pub fn root_orientation(frame: &[f32]) -> Quat {
    quat_at(frame, ROOT_ORIENTATION_OFFSET)
}

pub fn set_root_orientation(frame: &mut [f32], orientation: Quat) {
    write_quat(frame, ROOT_ORIENTATION_OFFSET, orientation);
}

/// Offsets of every quaternion slot in a frame of `len` values
pub fn quaternion_offsets(len: usize) -> impl Iterator<Item = usize> {
    (ROOT_ORIENTATION_OFFSET..len.saturating_sub(3)).step_by(4)
}

pub fn normalize_quaternions(frame: &mut [f32]) {
    for offset in quaternion_offsets(frame.len()) {
        let q = normalize_or_identity(quat_at(frame, offset));
        write_quat(frame, offset, q);
    }
}

pub fn quaternions_normalized(frame: &[f32], tolerance: f32) -> bool {
    quaternion_offsets(frame.len()).all(|offset| (quat_at(frame, offset).length() - 1.0).abs() <= tolerance)
}

pub fn has_non_finite(frame: &[f32]) -> bool {
    frame.iter().any(|v| !v.is_finite())
}

/// Ordered frames sampled from the motion graph plus their frame time
#[derive(Debug, Clone, PartialEq)]
pub struct MotionClip {
    frames: Vec<Frame>,
    frame_time: f32,
}

impl MotionClip {
    pub fn new(frames: Vec<Frame>, frame_time: f32) -> Self {
        Self { frames, frame_time }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    pub fn duration(&self) -> f32 {
        self.frames.len() as f32 * self.frame_time
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, idx: usize) -> Option<&Frame> {
        self.frames.get(idx)
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Last `n` frames, oldest first
    pub fn tail(&self, n: usize) -> Vec<Frame> {
        let start = self.frames.len().saturating_sub(n);
        self.frames[start..].to_vec()
    }

    /// Horizontal root displacement between first and last frame
    pub fn root_displacement(&self) -> Vec3 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => {
                let d = root_position(last) - root_position(first);
                Vec3::new(d.x, 0.0, d.z)
            }
            _ => Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quaternion_offsets_cover_all_joints() {
        let offsets: Vec<usize> = quaternion_offsets(frame_len_for(3)).collect();
        assert_eq!(offsets, vec![3, 7, 11]);
        assert_eq!(quaternion_offset(2), 11);
    }

    #[test]
    fn test_normalize_quaternions_fixes_zero_slots() {
        let mut frame = vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0];
        assert!(!quaternions_normalized(&frame, 1e-5));
        normalize_quaternions(&mut frame);
        assert!(quaternions_normalized(&frame, 1e-5));
        assert_eq!(root_position(&frame), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(frame[7], 1.0);
    }

    #[test]
    fn test_clip_tail_and_displacement() {
        let frames: Vec<Frame> = (0..5)
            .map(|i| vec![i as f32, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0])
            .collect();
        let clip = MotionClip::new(frames, 1.0 / 30.0);
        assert_eq!(clip.tail(2).len(), 2);
        assert_eq!(clip.tail(10).len(), 5);
        assert_eq!(clip.root_displacement(), Vec3::new(4.0, 0.0, 0.0));
    }
}
