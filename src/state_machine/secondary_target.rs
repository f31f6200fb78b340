//! Rate-limited secondary reach target
//!
//! Pursues a target with a tracked point that moves at most `speed` per
//! call, solves the chain against that point and blends the result in by a
//! progress weight `1 - distance / max_distance`. Links closer to the end
//! effector are blended with a small lead so the hand moves first.

use crate::animation::frame::{quaternion_offset, Frame};
use crate::animation::ik::{InverseKinematics, KeyframeConstraint};
use crate::animation::skeleton::Skeleton;
use crate::config::IkSettings;
use crate::error::{MotionError, MotionResult};
use crate::utils::math::{normalize_or_identity, slerp_slot};
use glam::{Quat, Vec3};
use std::sync::Arc;
use tracing::debug;

/// Second chain kept at its pre-reach pose after the main solve
#[derive(Debug, Clone)]
struct PreservedChain {
    joint: String,
    chain_end: Option<String>,
}

pub struct SecondaryIkTarget {
    skeleton: Arc<Skeleton>,
    ik: Arc<dyn InverseKinematics>,
    joint: String,
    position: Vec3,
    orientation: Option<Quat>,
    chain_end: Option<String>,
    /// Quaternion offsets of the chain, end effector first
    chain: Vec<usize>,
    speed: f32,
    eps: f32,
    rotation_distance: f32,
    max_ik_iter: usize,
    link_lead: f32,
    prev_target_pos: Option<Vec3>,
    prev_delta: Option<Vec3>,
    prev_frame: Option<Frame>,
    original_rotation: Option<Quat>,
    distance: f32,
    max_distance: f32,
    weight: f32,
    preserve: Option<PreservedChain>,
    look_at_dir: Option<Vec3>,
}

impl std::fmt::Debug for SecondaryIkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIkTarget")
            .field("joint", &self.joint)
            .field("position", &self.position)
            .field("chain_end", &self.chain_end)
            .field("distance", &self.distance)
            .field("weight", &self.weight)
            .finish()
    }
}

impl SecondaryIkTarget {
    pub fn new(
        skeleton: Arc<Skeleton>,
        ik: Arc<dyn InverseKinematics>,
        joint: &str,
        position: Vec3,
        orientation: Option<Quat>,
        chain_end: Option<String>,
        settings: &IkSettings,
    ) -> MotionResult<Self> {
        if !position.is_finite() {
            return Err(MotionError::Other {
                reason: format!("secondary target for {} is not finite: {:?}", joint, position),
            });
        }
        let chain_end = chain_end.or_else(|| skeleton.chain_end_for(joint));
        let chain = Self::prepare_joint_parameter_indices(&skeleton, joint, chain_end.as_deref())?;
        let orientation = orientation.map(|q| {
            let q = normalize_or_identity(q);
            if q.x + q.y + q.z + q.w < 0.0 {
                -q
            } else {
                q
            }
        });
        let speed = settings.secondary_target_speed * skeleton.frame_time();
        Ok(Self {
            skeleton,
            ik,
            joint: joint.to_string(),
            position,
            orientation,
            chain_end,
            chain,
            speed,
            eps: settings.eps,
            rotation_distance: settings.rotation_distance,
            max_ik_iter: settings.max_ik_iter,
            link_lead: settings.link_lead,
            prev_target_pos: None,
            prev_delta: None,
            prev_frame: None,
            original_rotation: None,
            distance: 0.0,
            max_distance: 0.0,
            weight: 0.0,
            preserve: None,
            look_at_dir: None,
        })
    }

    /// Offsets of the effector and its animated ancestors up to the chain end
    fn prepare_joint_parameter_indices(
        skeleton: &Skeleton,
        joint: &str,
        chain_end: Option<&str>,
    ) -> MotionResult<Vec<usize>> {
        let effector = skeleton.joint_index(joint)?;
        let mut indices = vec![effector];
        indices.extend(skeleton.ancestors_until(effector, chain_end)?);
        Ok(indices
            .into_iter()
            .filter_map(|idx| skeleton.joints()[idx].frame_index.map(quaternion_offset))
            .collect())
    }

    /// Keep `joint` where the incoming pose puts it after every reach
    pub fn preserve_chain(&mut self, joint: &str, chain_end: Option<String>) -> MotionResult<()> {
        self.skeleton.joint_index(joint)?;
        self.preserve = Some(PreservedChain {
            joint: joint.to_string(),
            chain_end,
        });
        Ok(())
    }

    pub fn set_look_at(&mut self, local_dir: Vec3) {
        self.look_at_dir = Some(local_dir);
    }

    pub fn joint(&self) -> &str {
        &self.joint
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Option<Quat> {
        self.orientation
    }

    pub fn chain_end(&self) -> Option<&str> {
        self.chain_end.as_deref()
    }

    pub fn joint_indices(&self) -> &[usize] {
        &self.chain
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn get_delta(&self) -> Option<Vec3> {
        self.prev_target_pos.map(|p| self.position - p)
    }

    pub fn get_distance(&self) -> Option<f32> {
        self.get_delta().map(|d| d.length())
    }

    pub fn get_velocity(&self) -> Option<f32> {
        Some((self.get_delta()? - self.prev_delta?).length())
    }

    /// True once the target was reached, the pursuit stalled, or the blend is complete
    pub fn has_reached(&self) -> bool {
        let Some(distance) = self.get_distance() else {
            return false;
        };
        distance < self.eps || self.get_velocity().is_some_and(|v| v < self.eps) || self.weight >= 1.0
    }

    /// Step the tracked point and build this call's IK constraint
    fn create_constraint(&mut self, frame: &[f32]) -> MotionResult<KeyframeConstraint> {
        let current = match self.prev_target_pos {
            Some(p) => p,
            None => {
                let p = self.skeleton.global_position(frame, &self.joint)?;
                self.max_distance = (self.position - p).length().max(self.eps);
                self.prev_target_pos = Some(p);
                p
            }
        };
        let delta = self.position - current;
        let remaining = delta.length();
        self.prev_delta = Some(delta);

        let stepped = if remaining > self.eps {
            current + delta / remaining * remaining.min(self.speed)
        } else {
            self.position
        };
        self.prev_target_pos = Some(stepped);
        self.distance = (self.position - stepped).length();
        self.weight = (1.0 - self.distance / self.max_distance).clamp(0.0, 1.0);

        let mut orientation = None;
        if let Some(target_q) = self.orientation {
            if self.distance < self.rotation_distance {
                let original = match self.original_rotation {
                    Some(q) => q,
                    None => {
                        let q = self.skeleton.global_orientation(frame, &self.joint)?;
                        self.original_rotation = Some(q);
                        q
                    }
                };
                let denominator = self.rotation_distance.min(self.max_distance).max(self.eps);
                let w = (1.0 - self.distance / denominator).clamp(0.0, 1.0);
                orientation = Some(original.slerp(target_q, w).normalize());
            }
        }
        Ok(KeyframeConstraint::new(0, &self.joint, stepped, orientation))
    }

    fn create_preservation_constraint(&self, frame: &[f32]) -> MotionResult<Option<KeyframeConstraint>> {
        let Some(preserve) = &self.preserve else {
            return Ok(None);
        };
        let position = self.skeleton.global_position(frame, &preserve.joint)?;
        let orientation = self.skeleton.global_orientation(frame, &preserve.joint)?;
        Ok(Some(
            KeyframeConstraint::new(0, &preserve.joint, position, Some(orientation))
                .with_chain_end(preserve.chain_end.clone()),
        ))
    }

    /// Blend `solved` into `frame` along the chain, effector leading
    fn blend_chain(&self, frame: &mut [f32], solved: &[f32]) {
        let n = self.chain.len();
        for (i, &offset) in self.chain.iter().enumerate() {
            let w = (self.weight + self.link_lead * (n - 1 - i) as f32).min(1.0);
            slerp_slot(frame, solved, offset, w);
        }
    }

    /// Move the chain one step toward the target and return the edited frame
    pub fn reach(&mut self, frame: &[f32]) -> MotionResult<Frame> {
        self.skeleton.check_frame(frame)?;
        let constraint = self.create_constraint(frame)?;
        let preserve_constraint = self.create_preservation_constraint(frame)?;

        let mut out = frame.to_vec();
        if let Some(prev) = &self.prev_frame {
            for &offset in &self.chain {
                out[offset..offset + 4].copy_from_slice(&prev[offset..offset + 4]);
            }
        }
        let solved = self.ik.reach_target_position(
            &out,
            &constraint,
            self.max_ik_iter,
            self.chain_end.as_deref(),
        )?;
        self.blend_chain(&mut out, &solved);

        if let Some(dir) = self.look_at_dir {
            if let Some(head) = self.skeleton.model_joint("head") {
                if let Some(offset) = self.skeleton.quaternion_offset_of(head)? {
                    let looked = self.ik.look_at(&out, head, self.position, 1e-4, 2, dir)?;
                    slerp_slot(&mut out, &looked, offset, self.weight);
                }
            }
        }
        if let Some(c) = preserve_constraint {
            out = self
                .ik
                .reach_target_position(&out, &c, self.max_ik_iter, c.chain_end.as_deref())?;
        }

        if self.has_reached() && self.prev_frame.is_some() {
            debug!("Secondary target for {} reached (weight {:.3})", self.joint, self.weight);
        }
        self.prev_frame = Some(out.clone());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::demo::demo_skeleton;

    fn setup() -> (Arc<Skeleton>, Frame) {
        let skeleton = Arc::new(demo_skeleton().unwrap());
        let frame = skeleton.reference_frame().clone();
        (skeleton, frame)
    }

    fn target(skeleton: &Arc<Skeleton>, position: Vec3, orientation: Option<Quat>) -> SecondaryIkTarget {
        SecondaryIkTarget::new(
            skeleton.clone(),
            skeleton.clone(),
            "RightHand",
            position,
            orientation,
            None,
            &IkSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_not_reached_before_first_step() {
        let (skeleton, _) = setup();
        let t = target(&skeleton, Vec3::new(-0.4, 1.2, 0.3), None);
        assert!(!t.has_reached());
        assert!(t.get_velocity().is_none());
    }

    #[test]
    fn test_chain_indices_are_chain_local() {
        let (skeleton, _) = setup();
        let t = target(&skeleton, Vec3::new(-0.4, 1.2, 0.3), None);
        let right: Vec<usize> = ["RightHand", "RightForeArm", "RightArm", "RightShoulder"]
            .iter()
            .map(|j| skeleton.quaternion_offset_of(j).unwrap().unwrap())
            .collect();
        assert_eq!(t.joint_indices(), right.as_slice());
        let left_hand = skeleton.quaternion_offset_of("LeftHand").unwrap().unwrap();
        assert!(!t.joint_indices().contains(&left_hand));
    }

    #[test]
    fn test_reach_converges_within_bounded_steps() {
        let (skeleton, frame) = setup();
        let goal = Vec3::new(-0.4, 1.2, 0.3);
        let mut t = target(&skeleton, goal, None);
        let mut out = frame.clone();
        let mut steps = 0;
        while !t.has_reached() && steps < 200 {
            out = t.reach(&frame).unwrap();
            steps += 1;
        }
        assert!(t.has_reached(), "not reached after {} steps", steps);
        assert!(steps < 60, "took {} steps", steps);
        let hand = skeleton.global_position(&out, "RightHand").unwrap();
        assert!((hand - goal).length() < 0.01, "hand at {:?}", hand);
        assert!(crate::animation::frame::quaternions_normalized(&out, 1e-5));
    }

    #[test]
    fn test_weight_grows_monotonically() {
        let (skeleton, frame) = setup();
        let mut t = target(&skeleton, Vec3::new(-0.4, 1.2, 0.3), None);
        let mut last = -1.0;
        for _ in 0..10 {
            t.reach(&frame).unwrap();
            assert!(t.weight() >= last);
            last = t.weight();
        }
        assert!(last > 0.0 && last < 1.0);
    }

    #[test]
    fn test_orientation_sign_is_canonical() {
        let (skeleton, _) = setup();
        let q = Quat::from_rotation_y(0.5);
        let t = target(&skeleton, Vec3::new(-0.4, 1.2, 0.3), Some(-q));
        let stored = t.orientation().unwrap();
        assert!(stored.x + stored.y + stored.z + stored.w >= 0.0);
        assert!(stored.dot(q) > 0.999);
    }

    #[test]
    fn test_preserved_chain_keeps_other_wrist() {
        let (skeleton, mut frame) = setup();
        let elbow = skeleton.quaternion_offset_of("LeftForeArm").unwrap().unwrap();
        crate::utils::math::write_quat(&mut frame, elbow, Quat::from_rotation_y(-1.2));
        let mut t = SecondaryIkTarget::new(
            skeleton.clone(),
            skeleton.clone(),
            "RightHand",
            Vec3::new(-0.3, 1.1, 0.35),
            None,
            Some("Spine1".to_string()),
            &IkSettings::default(),
        )
        .unwrap();
        t.preserve_chain("LeftHand", Some("LeftShoulder".to_string())).unwrap();
        let before = skeleton.global_position(&frame, "LeftHand").unwrap();
        let mut out = frame.clone();
        for _ in 0..40 {
            out = t.reach(&frame).unwrap();
        }
        let after = skeleton.global_position(&out, "LeftHand").unwrap();
        assert!((after - before).length() < 0.02, "left wrist moved to {:?}", after);
    }

    #[test]
    fn test_unknown_joint_is_rejected() {
        let (skeleton, _) = setup();
        let result = SecondaryIkTarget::new(
            skeleton.clone(),
            skeleton.clone(),
            "Tail",
            Vec3::ZERO,
            None,
            None,
            &IkSettings::default(),
        );
        assert!(matches!(result, Err(MotionError::UnknownJoint { .. })));
    }
}
