//! Foot grounding
//!
//! Detects planted feet in a window of frames and pins them back to those
//! plants with a short leg IK chain on every produced pose.

use crate::animation::frame::Frame;
use crate::animation::ik::{InverseKinematics, KeyframeConstraint};
use crate::animation::skeleton::{Side, Skeleton};
use crate::config::{FootplantSettings, IkSettings};
use crate::error::MotionResult;
use glam::Vec3;
use std::sync::Arc;
use tracing::{debug, trace};

/// Height query against the surrounding scene
pub trait SceneInterface: Send + Sync {
    fn get_height(&self, x: f32, z: f32) -> f32;
}

/// Infinite horizontal ground plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatGround {
    pub height: f32,
}

impl FlatGround {
    pub fn new(height: f32) -> Self {
        Self { height }
    }
}

impl SceneInterface for FlatGround {
    fn get_height(&self, _x: f32, _z: f32) -> f32 {
        self.height
    }
}

/// A planted joint: horizontal plant position plus its rest height above ground
#[derive(Debug, Clone, PartialEq)]
pub struct FootConstraint {
    pub joint: String,
    pub position: Vec3,
    pub height_above_ground: f32,
}

pub struct FootplantConstraintGenerator {
    skeleton: Arc<Skeleton>,
    settings: FootplantSettings,
    scene: Arc<dyn SceneInterface>,
    contact_joints: Vec<String>,
}

impl FootplantConstraintGenerator {
    pub fn new(skeleton: Arc<Skeleton>, settings: FootplantSettings, scene: Arc<dyn SceneInterface>) -> Self {
        let contact_joints = [Side::Left, Side::Right]
            .into_iter()
            .filter_map(|side| skeleton.ankle_joint(side).map(str::to_string))
            .collect();
        Self {
            skeleton,
            settings,
            scene,
            contact_joints,
        }
    }

    pub fn contact_joints(&self) -> &[String] {
        &self.contact_joints
    }

    /// Ankles that are close to the ground and do not slide inside the window
    pub fn generate_grounding_constraints(
        &self,
        frames: &[Frame],
        start_idx: usize,
        contact_joints: &[String],
    ) -> MotionResult<Vec<FootConstraint>> {
        let end = (start_idx + self.settings.window.max(1)).min(frames.len());
        let window = frames.get(start_idx..end).unwrap_or(&[]);
        let mut constraints = Vec::new();
        if window.is_empty() {
            return Ok(constraints);
        }

        for joint in contact_joints {
            let positions = window
                .iter()
                .map(|f| self.skeleton.global_position(f, joint))
                .collect::<MotionResult<Vec<_>>>()?;
            let sliding = positions
                .windows(2)
                .any(|pair| (pair[1] - pair[0]).length() > self.settings.contact_tolerance);
            let mean = positions.iter().copied().sum::<Vec3>() / positions.len() as f32;
            let height = mean.y - self.scene.get_height(mean.x, mean.z);
            if sliding || height > self.settings.foot_lift_tolerance {
                trace!("{} is not planted (height {:.3}, sliding {})", joint, height, sliding);
                continue;
            }
            constraints.push(FootConstraint {
                joint: joint.clone(),
                position: mean,
                height_above_ground: height,
            });
        }
        debug!("Generated {} grounding constraint(s)", constraints.len());
        Ok(constraints)
    }
}

pub struct MotionGrounding {
    skeleton: Arc<Skeleton>,
    ik: Arc<dyn InverseKinematics>,
    max_ik_iter: usize,
    max_correction: f32,
}

impl MotionGrounding {
    pub fn new(
        skeleton: Arc<Skeleton>,
        ik: Arc<dyn InverseKinematics>,
        ik_settings: &IkSettings,
        footplant: &FootplantSettings,
    ) -> Self {
        Self {
            skeleton,
            ik,
            max_ik_iter: ik_settings.max_ik_iter,
            max_correction: footplant.max_correction,
        }
    }

    /// Pull every constrained foot that is within reach of its plant back onto it
    pub fn apply_on_frame(
        &self,
        frame: &[f32],
        constraints: &[FootConstraint],
        scene: &dyn SceneInterface,
    ) -> MotionResult<Frame> {
        let mut out = frame.to_vec();
        for c in constraints {
            let target = Vec3::new(
                c.position.x,
                scene.get_height(c.position.x, c.position.z) + c.height_above_ground,
                c.position.z,
            );
            let current = self.skeleton.global_position(&out, &c.joint)?;
            let error = (current - target).length();
            if error < 1e-4 || error > self.max_correction {
                continue;
            }
            let orientation = self.skeleton.global_orientation(&out, &c.joint)?;
            let hip = self.skeleton.chain_end_for(&c.joint);
            let constraint = KeyframeConstraint::new(0, &c.joint, target, Some(orientation)).with_chain_end(hip);
            out = self
                .ik
                .reach_target_position(&out, &constraint, self.max_ik_iter, None)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::frame::set_root_position;
    use crate::graph::demo::demo_skeleton;

    fn setup() -> (Arc<Skeleton>, FootplantConstraintGenerator, MotionGrounding) {
        let skeleton = Arc::new(demo_skeleton().unwrap());
        let settings = FootplantSettings::default();
        let generator =
            FootplantConstraintGenerator::new(skeleton.clone(), settings.clone(), Arc::new(FlatGround::new(0.0)));
        let grounding = MotionGrounding::new(skeleton.clone(), skeleton.clone(), &IkSettings::default(), &settings);
        (skeleton, generator, grounding)
    }

    #[test]
    fn test_standing_frames_plant_both_feet() {
        let (skeleton, generator, _) = setup();
        let frames = vec![skeleton.reference_frame().clone(); 12];
        let constraints = generator
            .generate_grounding_constraints(&frames, 0, generator.contact_joints())
            .unwrap();
        assert_eq!(constraints.len(), 2);
        assert!(constraints.iter().all(|c| (c.height_above_ground - 0.08).abs() < 1e-4));
    }

    #[test]
    fn test_lifted_or_sliding_feet_are_not_planted() {
        let (skeleton, generator, _) = setup();
        let mut lifted = skeleton.reference_frame().clone();
        set_root_position(&mut lifted, Vec3::new(0.0, 0.35, 0.0));
        let constraints = generator
            .generate_grounding_constraints(&vec![lifted; 5], 0, generator.contact_joints())
            .unwrap();
        assert!(constraints.is_empty());

        let sliding: Vec<Frame> = (0..5)
            .map(|i| {
                let mut f = skeleton.reference_frame().clone();
                set_root_position(&mut f, Vec3::new(0.0, 0.0, 0.05 * i as f32));
                f
            })
            .collect();
        let constraints = generator
            .generate_grounding_constraints(&sliding, 0, generator.contact_joints())
            .unwrap();
        assert!(constraints.is_empty());
    }

    #[test]
    fn test_apply_on_frame_pins_nearby_foot() {
        let (skeleton, generator, grounding) = setup();
        let frames = vec![skeleton.reference_frame().clone(); 3];
        let constraints = generator
            .generate_grounding_constraints(&frames, 0, generator.contact_joints())
            .unwrap();
        let mut crouched = skeleton.reference_frame().clone();
        set_root_position(&mut crouched, Vec3::new(0.03, -0.02, 0.0));
        let out = grounding
            .apply_on_frame(&crouched, &constraints, &FlatGround::new(0.0))
            .unwrap();
        for c in &constraints {
            let foot = skeleton.global_position(&out, &c.joint).unwrap();
            assert!((foot - c.position).length() < 0.01, "{} at {:?}", c.joint, foot);
        }
    }

    #[test]
    fn test_far_plants_are_ignored() {
        let (skeleton, generator, grounding) = setup();
        let frames = vec![skeleton.reference_frame().clone(); 3];
        let constraints = generator
            .generate_grounding_constraints(&frames, 0, generator.contact_joints())
            .unwrap();
        let mut walked = skeleton.reference_frame().clone();
        set_root_position(&mut walked, Vec3::new(0.0, 0.0, 2.0));
        let out = grounding
            .apply_on_frame(&walked, &constraints, &FlatGround::new(0.0))
            .unwrap();
        assert_eq!(out, walked);
    }
}
