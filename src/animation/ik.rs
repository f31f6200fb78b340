//! Inverse kinematics capability
//!
//! The state machine and the planner only talk to the [`InverseKinematics`]
//! trait. [`Skeleton`] ships a cyclic coordinate descent solver that walks
//! the chain from the effector's parent up to the chain end, skipping static
//! joints. Given the same frame, constraint and iteration budget the result
//! is always the same.

use crate::animation::frame::{quaternion_offset, Frame};
use crate::animation::skeleton::Skeleton;
use crate::error::MotionResult;
use crate::utils::math::write_quat;
use glam::{Quat, Vec3};
use tracing::trace;

/// Positional (and optional orientation) goal for one joint at one frame
#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeConstraint {
    /// Frame index inside the clip the constraint applies to
    pub frame_idx: usize,
    pub joint: String,
    pub position: Vec3,
    pub orientation: Option<Quat>,
    /// Overrides the default chain end of `joint`
    pub chain_end: Option<String>,
}

impl KeyframeConstraint {
    pub fn new(frame_idx: usize, joint: &str, position: Vec3, orientation: Option<Quat>) -> Self {
        Self {
            frame_idx,
            joint: joint.to_string(),
            position,
            orientation,
            chain_end: None,
        }
    }

    pub fn with_chain_end(mut self, chain_end: Option<String>) -> Self {
        self.chain_end = chain_end;
        self
    }
}

pub trait InverseKinematics: Send + Sync {
    /// Move `constraint.joint` toward `constraint.position` by rotating the
    /// chain up to `chain_end_joint` (or the constraint's/default chain end).
    fn reach_target_position(
        &self,
        frame: &[f32],
        constraint: &KeyframeConstraint,
        max_iter: usize,
        chain_end_joint: Option<&str>,
    ) -> MotionResult<Frame>;

    /// Rotate `joint` so that its local `local_dir` axis points at `target`
    fn look_at(
        &self,
        frame: &[f32],
        joint: &str,
        target: Vec3,
        eps: f32,
        n_iter: usize,
        local_dir: Vec3,
    ) -> MotionResult<Frame>;

    /// Set the global orientation of `joint` by writing its local quaternion
    fn set_joint_orientation(&self, frame: &[f32], joint: &str, orientation: Quat) -> MotionResult<Frame>;
}

impl InverseKinematics for Skeleton {
    fn reach_target_position(
        &self,
        frame: &[f32],
        constraint: &KeyframeConstraint,
        max_iter: usize,
        chain_end_joint: Option<&str>,
    ) -> MotionResult<Frame> {
        self.check_frame(frame)?;
        let effector = self.joint_index(&constraint.joint)?;
        let chain_end = match chain_end_joint.or(constraint.chain_end.as_deref()) {
            Some(name) => Some(name.to_string()),
            None => self.chain_end_for(&constraint.joint),
        };
        let chain: Vec<usize> = self
            .ancestors_until(effector, chain_end.as_deref())?
            .into_iter()
            .filter(|&idx| {
                let joint = &self.joints()[idx];
                !joint.is_static && joint.frame_index.is_some()
            })
            .collect();

        let mut out = frame.to_vec();
        let mut iterations = 0;
        for _ in 0..max_iter {
            iterations += 1;
            for &idx in &chain {
                let globals = self.global_transforms(&out);
                let (joint_pos, joint_rot) = globals[idx];
                let to_effector = globals[effector].0 - joint_pos;
                let to_target = constraint.position - joint_pos;
                if to_effector.length_squared() < 1e-10 || to_target.length_squared() < 1e-10 {
                    continue;
                }
                let delta = Quat::from_rotation_arc(to_effector.normalize(), to_target.normalize());
                let local = self.parent_rotation(&globals, idx).inverse() * (delta * joint_rot);
                if let Some(k) = self.joints()[idx].frame_index {
                    write_quat(&mut out, quaternion_offset(k), local);
                }
            }
            let reached = self.global_transforms(&out)[effector].0;
            if (reached - constraint.position).length() < self.ik_tolerance {
                break;
            }
        }
        trace!(
            "CCD {} -> {:?} finished after {} iterations",
            constraint.joint,
            constraint.position,
            iterations
        );

        if let Some(orientation) = constraint.orientation {
            out = self.set_joint_orientation(&out, &constraint.joint, orientation)?;
        }
        Ok(out)
    }

    fn look_at(
        &self,
        frame: &[f32],
        joint: &str,
        target: Vec3,
        eps: f32,
        n_iter: usize,
        local_dir: Vec3,
    ) -> MotionResult<Frame> {
        self.check_frame(frame)?;
        let idx = self.joint_index(joint)?;
        let mut out = frame.to_vec();
        let local_dir = local_dir.try_normalize().unwrap_or(Vec3::Z);
        for _ in 0..n_iter {
            let (pos, rot) = self.global_transforms(&out)[idx];
            let Some(desired) = (target - pos).try_normalize() else {
                break;
            };
            let current = rot * local_dir;
            if current.angle_between(desired) < eps {
                break;
            }
            let delta = Quat::from_rotation_arc(current, desired);
            out = self.set_joint_orientation(&out, joint, delta * rot)?;
        }
        Ok(out)
    }

    fn set_joint_orientation(&self, frame: &[f32], joint: &str, orientation: Quat) -> MotionResult<Frame> {
        self.check_frame(frame)?;
        let idx = self.joint_index(joint)?;
        let mut out = frame.to_vec();
        if let Some(k) = self.joints()[idx].frame_index {
            let globals = self.global_transforms(&out);
            let local = self.parent_rotation(&globals, idx).inverse() * orientation;
            write_quat(&mut out, quaternion_offset(k), local);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::skeleton::JointDefinition;
    use std::collections::HashMap;

    fn arm() -> Skeleton {
        let defs = vec![
            JointDefinition::new("Hips", None, [0.0, 1.0, 0.0]),
            JointDefinition::new("Clavicle", Some("Hips"), [0.0, 0.5, 0.0]),
            JointDefinition::new("Shoulder", Some("Clavicle"), [0.1, 0.0, 0.0]),
            JointDefinition::new("Elbow", Some("Shoulder"), [0.3, 0.0, 0.0]),
            JointDefinition::new("Wrist", Some("Elbow"), [0.25, 0.0, 0.0]),
            JointDefinition::new("Head", Some("Clavicle"), [0.0, 0.2, 0.0]),
        ];
        let mut model = HashMap::new();
        model.insert("right_wrist".to_string(), "Wrist".to_string());
        model.insert("right_clavicle".to_string(), "Clavicle".to_string());
        let mut skeleton = Skeleton::new(&defs, model, 1.0 / 30.0).unwrap();
        skeleton.set_static_joints(&["right_clavicle"]);
        skeleton
    }

    #[test]
    fn test_ccd_reaches_target_inside_workspace() {
        let skeleton = arm();
        let frame = skeleton.reference_frame().clone();
        let target = Vec3::new(0.3, 1.3, 0.3);
        let c = KeyframeConstraint::new(0, "Wrist", target, None);
        let out = skeleton.reach_target_position(&frame, &c, 30, None).unwrap();
        let wrist = skeleton.global_position(&out, "Wrist").unwrap();
        assert!((wrist - target).length() < 0.01, "wrist at {:?}", wrist);
        assert!(crate::animation::frame::quaternions_normalized(&out, 1e-5));
    }

    #[test]
    fn test_ccd_is_deterministic_and_keeps_static_joints() {
        let skeleton = arm();
        let frame = skeleton.reference_frame().clone();
        let c = KeyframeConstraint::new(0, "Wrist", Vec3::new(0.2, 1.8, 0.2), None);
        let a = skeleton.reach_target_position(&frame, &c, 10, None).unwrap();
        let b = skeleton.reach_target_position(&frame, &c, 10, None).unwrap();
        assert_eq!(a, b);
        let clavicle = skeleton.quaternion_offset_of("Clavicle").unwrap().unwrap();
        assert_eq!(&a[clavicle..clavicle + 4], &frame[clavicle..clavicle + 4]);
    }

    #[test]
    fn test_set_joint_orientation_sets_global_rotation() {
        let skeleton = arm();
        let frame = skeleton.reference_frame().clone();
        let q = Quat::from_rotation_y(0.7);
        let out = skeleton.set_joint_orientation(&frame, "Elbow", q).unwrap();
        let global = skeleton.global_orientation(&out, "Elbow").unwrap();
        assert!(global.dot(q).abs() > 0.9999);
    }

    #[test]
    fn test_look_at_points_axis_at_target() {
        let skeleton = arm();
        let frame = skeleton.reference_frame().clone();
        let target = Vec3::new(1.0, 1.7, 1.0);
        let out = skeleton.look_at(&frame, "Head", target, 1e-4, 2, Vec3::Z).unwrap();
        let (pos, rot) = skeleton.global_transforms(&out)[skeleton.joint_index("Head").unwrap()];
        let dir = rot * Vec3::Z;
        assert!(dir.angle_between((target - pos).normalize()) < 1e-3);
    }

    #[test]
    fn test_wrong_frame_length_is_an_error() {
        let skeleton = arm();
        let c = KeyframeConstraint::new(0, "Wrist", Vec3::ZERO, None);
        assert!(skeleton.reach_target_position(&[0.0; 7], &c, 5, None).is_err());
    }
}
