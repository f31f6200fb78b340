//! Skeleton hierarchy and forward kinematics

use crate::animation::frame::{self, frame_len_for, quaternion_offset, Frame};
use crate::error::{MotionError, MotionResult};
use crate::utils::math::quat_at;
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Body side of a hand or foot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Parse the `Hand` instruction property ("Left"/"Right", any case)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Side::Left),
            "right" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "Left"),
            Side::Right => write!(f, "Right"),
        }
    }
}

/// Declarative joint entry used to build a skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDefinition {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub offset: [f32; 3],
    /// Joints without a quaternion channel (end sites) are not animated
    #[serde(default = "default_animated")]
    pub animated: bool,
}

fn default_animated() -> bool {
    true
}

impl JointDefinition {
    pub fn new(name: &str, parent: Option<&str>, offset: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            offset,
            animated: true,
        }
    }

    pub fn end_site(name: &str, parent: &str, offset: [f32; 3]) -> Self {
        Self {
            animated: false,
            ..Self::new(name, Some(parent), offset)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonJoint {
    pub name: String,
    pub parent: Option<usize>,
    pub offset: Vec3,
    /// Index of this joint's quaternion in the frame layout
    pub frame_index: Option<usize>,
    /// Static joints keep their rotation during IK
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct Skeleton {
    joints: Vec<SkeletonJoint>,
    name_to_index: HashMap<String, usize>,
    /// Semantic joint names (`left_wrist`, `spine_1`, ...) to skeleton joint names
    skeleton_model: HashMap<String, String>,
    reference_frame: Frame,
    frame_time: f32,
    pub(crate) ik_tolerance: f32,
}

impl Skeleton {
    /// Build a skeleton; parents must be declared before their children and
    /// the first joint is the animated root.
    pub fn new(
        definitions: &[JointDefinition],
        skeleton_model: HashMap<String, String>,
        frame_time: f32,
    ) -> MotionResult<Self> {
        let mut joints = Vec::with_capacity(definitions.len());
        let mut name_to_index = HashMap::new();
        let mut n_animated = 0;

        for (idx, def) in definitions.iter().enumerate() {
            if name_to_index.contains_key(&def.name) {
                return Err(MotionError::GraphDescription {
                    reason: format!("duplicate joint {}", def.name),
                });
            }
            let parent = match &def.parent {
                Some(parent) => Some(*name_to_index.get(parent).ok_or_else(|| {
                    MotionError::GraphDescription {
                        reason: format!("joint {} declared before its parent {}", def.name, parent),
                    }
                })?),
                None if idx == 0 => None,
                None => {
                    return Err(MotionError::GraphDescription {
                        reason: format!("joint {} has no parent but is not the root", def.name),
                    })
                }
            };
            if idx == 0 && !def.animated {
                return Err(MotionError::GraphDescription {
                    reason: "root joint must be animated".to_string(),
                });
            }
            let frame_index = if def.animated {
                n_animated += 1;
                Some(n_animated - 1)
            } else {
                None
            };
            name_to_index.insert(def.name.clone(), idx);
            joints.push(SkeletonJoint {
                name: def.name.clone(),
                parent,
                offset: Vec3::from(def.offset),
                frame_index,
                is_static: false,
            });
        }

        if joints.is_empty() {
            return Err(MotionError::GraphDescription {
                reason: "skeleton has no joints".to_string(),
            });
        }
        for (semantic, name) in &skeleton_model {
            if !name_to_index.contains_key(name) {
                return Err(MotionError::GraphDescription {
                    reason: format!("skeleton model entry {} refers to unknown joint {}", semantic, name),
                });
            }
        }

        let mut reference_frame = vec![0.0; frame_len_for(n_animated)];
        for offset in frame::quaternion_offsets(reference_frame.len()) {
            reference_frame[offset] = 1.0;
        }

        Ok(Self {
            joints,
            name_to_index,
            skeleton_model,
            reference_frame,
            frame_time,
            ik_tolerance: 0.0005,
        })
    }

    pub fn with_ik_tolerance(mut self, tolerance: f32) -> Self {
        self.ik_tolerance = tolerance;
        self
    }

    /// Mark joints (by semantic name) as static for IK, clavicles by default
    pub fn set_static_joints(&mut self, semantic_names: &[&str]) {
        for semantic in semantic_names {
            if let Some(idx) = self
                .skeleton_model
                .get(*semantic)
                .and_then(|name| self.name_to_index.get(name))
                .copied()
            {
                self.joints[idx].is_static = true;
            }
        }
    }

    pub fn joints(&self) -> &[SkeletonJoint] {
        &self.joints
    }

    pub fn root_name(&self) -> &str {
        &self.joints[0].name
    }

    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    pub fn frame_len(&self) -> usize {
        self.reference_frame.len()
    }

    pub fn reference_frame(&self) -> &Frame {
        &self.reference_frame
    }

    pub fn set_reference_frame(&mut self, frame: Frame) -> MotionResult<()> {
        self.check_frame(&frame)?;
        self.reference_frame = frame;
        Ok(())
    }

    pub fn animated_joints(&self) -> Vec<&str> {
        self.joints
            .iter()
            .filter(|j| j.frame_index.is_some())
            .map(|j| j.name.as_str())
            .collect()
    }

    pub fn joint_index(&self, name: &str) -> MotionResult<usize> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| MotionError::unknown_joint(name))
    }

    pub fn joint(&self, name: &str) -> MotionResult<&SkeletonJoint> {
        Ok(&self.joints[self.joint_index(name)?])
    }

    pub fn has_joint(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Skeleton joint for a semantic name such as `left_wrist`
    pub fn model_joint(&self, semantic: &str) -> Option<&str> {
        self.skeleton_model.get(semantic).map(String::as_str)
    }

    pub fn skeleton_model(&self) -> &HashMap<String, String> {
        &self.skeleton_model
    }

    pub fn wrist_joint(&self, side: Side) -> Option<&str> {
        self.model_joint(&format!("{}_wrist", side.prefix()))
    }

    pub fn clavicle_joint(&self, side: Side) -> Option<&str> {
        self.model_joint(&format!("{}_clavicle", side.prefix()))
    }

    pub fn ankle_joint(&self, side: Side) -> Option<&str> {
        self.model_joint(&format!("{}_ankle", side.prefix()))
    }

    pub fn hip_joint(&self, side: Side) -> Option<&str> {
        self.model_joint(&format!("{}_hip", side.prefix()))
    }

    /// End of the spine chain used when a reach should bend the torso
    pub fn long_chain_end(&self) -> Option<&str> {
        self.model_joint("spine_1")
    }

    /// Default chain end: clavicle for wrists, hip for ankles, otherwise the grandparent
    pub fn chain_end_for(&self, joint: &str) -> Option<String> {
        for side in [Side::Left, Side::Right] {
            if self.wrist_joint(side) == Some(joint) {
                if let Some(clavicle) = self.clavicle_joint(side) {
                    return Some(clavicle.to_string());
                }
            }
            if self.ankle_joint(side) == Some(joint) {
                if let Some(hip) = self.hip_joint(side) {
                    return Some(hip.to_string());
                }
            }
        }
        let idx = self.name_to_index.get(joint)?;
        let parent = self.joints[*idx].parent?;
        let grandparent = self.joints[parent].parent.unwrap_or(parent);
        Some(self.joints[grandparent].name.clone())
    }

    /// Quaternion offset of a joint in the frame layout
    pub fn quaternion_offset_of(&self, name: &str) -> MotionResult<Option<usize>> {
        Ok(self.joint(name)?.frame_index.map(quaternion_offset))
    }

    /// Ancestors of `joint` from its parent up to and including `chain_end`
    pub fn ancestors_until(&self, joint: usize, chain_end: Option<&str>) -> MotionResult<Vec<usize>> {
        let end = chain_end.map(|name| self.joint_index(name)).transpose()?;
        let mut chain = Vec::new();
        let mut current = self.joints[joint].parent;
        while let Some(idx) = current {
            chain.push(idx);
            if Some(idx) == end {
                return Ok(chain);
            }
            current = self.joints[idx].parent;
        }
        match (end, chain_end) {
            (Some(_), Some(name)) => Err(MotionError::Other {
                reason: format!("{} is not an ancestor of {}", name, self.joints[joint].name),
            }),
            _ => Ok(chain),
        }
    }

    pub fn check_frame(&self, frame: &[f32]) -> MotionResult<()> {
        if frame.len() != self.frame_len() {
            return Err(MotionError::FrameLength {
                expected: self.frame_len(),
                actual: frame.len(),
            });
        }
        Ok(())
    }

    fn local_rotation(&self, frame: &[f32], joint: &SkeletonJoint) -> Quat {
        match joint.frame_index {
            Some(k) => quat_at(frame, quaternion_offset(k)).normalize(),
            None => Quat::IDENTITY,
        }
    }

    /// Global position and orientation of every joint
    pub fn global_transforms(&self, frame: &[f32]) -> Vec<(Vec3, Quat)> {
        let mut globals: Vec<(Vec3, Quat)> = Vec::with_capacity(self.joints.len());
        for joint in &self.joints {
            let local_rot = self.local_rotation(frame, joint);
            let global = match joint.parent {
                Some(p) => {
                    let (parent_pos, parent_rot) = globals[p];
                    (parent_pos + parent_rot * joint.offset, parent_rot * local_rot)
                }
                None => (frame::root_position(frame) + joint.offset, local_rot),
            };
            globals.push(global);
        }
        globals
    }

    pub fn global_position(&self, frame: &[f32], joint: &str) -> MotionResult<Vec3> {
        let idx = self.joint_index(joint)?;
        Ok(self.global_transforms(frame)[idx].0)
    }

    pub fn global_orientation(&self, frame: &[f32], joint: &str) -> MotionResult<Quat> {
        let idx = self.joint_index(joint)?;
        Ok(self.global_transforms(frame)[idx].1)
    }

    pub fn global_matrix(&self, frame: &[f32], joint: &str) -> MotionResult<Mat4> {
        let idx = self.joint_index(joint)?;
        let (pos, rot) = self.global_transforms(frame)[idx];
        Ok(Mat4::from_rotation_translation(rot, pos))
    }

    /// Global rotation of the parent of `joint`, identity for the root
    pub(crate) fn parent_rotation(&self, globals: &[(Vec3, Quat)], joint: usize) -> Quat {
        self.joints[joint]
            .parent
            .map(|p| globals[p].1)
            .unwrap_or(Quat::IDENTITY)
    }

    /// Indices of `root` and every joint below it
    pub fn subtree(&self, root: &str) -> MotionResult<Vec<usize>> {
        let root_idx = self.joint_index(root)?;
        let mut inside = vec![false; self.joints.len()];
        inside[root_idx] = true;
        for (idx, joint) in self.joints.iter().enumerate().skip(root_idx + 1) {
            if let Some(p) = joint.parent {
                inside[idx] = inside[p];
            }
        }
        Ok(inside
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag)
            .map(|(idx, _)| idx)
            .collect())
    }
}
