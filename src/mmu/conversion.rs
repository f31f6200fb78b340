//! Conversion between motion model frames and MOSIM postures, plus the
//! builders for reach actions and the constraints reported when a reach ends

use crate::animation::skeleton::{Side, Skeleton};
use crate::error::{MotionError, MotionResult};
use crate::mmu::types::{
    AvatarJoint, AvatarPosture, AvatarPostureValues, Constraint, EndeffectorType, GeometryConstraint, Interval3,
    JointConstraint, JointType, RotationConstraint, Transform, TranslationConstraint, TranslationConstraintType,
};
use crate::planner::{ActionDescriptor, FrameConstraintDesc};
use crate::utils::math::{Quaternion, Vector3};
use glam::{EulerRot, Quat};
use std::collections::BTreeMap;
use uuid::Uuid;

const ROOT_CHANNELS: usize = 7;
const JOINT_CHANNELS: usize = 4;

/// Zero posture joint index to skeleton joint name, for joints the skeleton model knows
pub fn index_to_joint_map(zero_posture: &AvatarPosture, skeleton: &Skeleton) -> BTreeMap<usize, String> {
    zero_posture
        .joints
        .iter()
        .enumerate()
        .filter_map(|(idx, joint)| {
            let semantic = joint.joint_type.semantic_name()?;
            let name = skeleton.model_joint(semantic)?;
            skeleton.has_joint(name).then(|| (idx, name.to_string()))
        })
        .collect()
}

/// Global joint transforms of `frame` laid out like `zero_posture`.
/// Joints without a skeleton counterpart keep their zero transform and lose their type.
pub fn frame_to_posture(
    avatar_id: &str,
    skeleton: &Skeleton,
    frame: &[f32],
    zero_posture: &AvatarPosture,
    index_to_joint: &BTreeMap<usize, String>,
    scale_factor: f32,
) -> MotionResult<AvatarPosture> {
    skeleton.check_frame(frame)?;
    let globals = skeleton.global_transforms(frame);
    let mut joints = Vec::with_capacity(zero_posture.joints.len());
    for (idx, zero_joint) in zero_posture.joints.iter().enumerate() {
        let joint = match index_to_joint.get(&idx) {
            Some(name) => {
                let (position, rotation) = globals[skeleton.joint_index(name)?];
                AvatarJoint {
                    position: Vector3::from_model(position * scale_factor),
                    rotation: Quaternion::from_model(rotation),
                    ..zero_joint.clone()
                }
            }
            None => AvatarJoint {
                joint_type: JointType::Undefined,
                ..zero_joint.clone()
            },
        };
        joints.push(joint);
    }
    Ok(AvatarPosture {
        avatar_id: avatar_id.to_string(),
        joints,
    })
}

fn push_rotation(data: &mut Vec<f32>, q: &Quaternion) {
    data.extend_from_slice(&[q.w, q.x, q.y, q.z]);
}

/// Pack a posture into channel values: root position and rotation, then one rotation per joint
pub fn posture_to_values(posture: &AvatarPosture) -> AvatarPostureValues {
    let mut data = Vec::new();
    let mut joints = posture.joints.iter();
    if let Some(root) = joints.next() {
        data.extend_from_slice(&root.position.to_array());
        push_rotation(&mut data, &root.rotation);
    }
    for joint in joints {
        push_rotation(&mut data, &joint.rotation);
    }
    AvatarPostureValues::new(&posture.avatar_id, data)
}

fn rotation_at(data: &[f32], offset: usize) -> Option<Quaternion> {
    let d = data.get(offset..offset + JOINT_CHANNELS)?;
    Some(Quaternion::new(d[1], d[2], d[3], d[0]))
}

/// Unpack channel values onto the joints of `zero_posture`
pub fn values_to_posture(values: &AvatarPostureValues, zero_posture: &AvatarPosture) -> MotionResult<AvatarPosture> {
    let data = &values.posture_data;
    if data.len() < ROOT_CHANNELS {
        return Err(MotionError::Retargeting {
            reason: format!("posture data has {} values, the root needs {}", data.len(), ROOT_CHANNELS),
        });
    }
    let mut joints = zero_posture.joints.clone();
    for (idx, joint) in joints.iter_mut().enumerate() {
        if idx == 0 {
            joint.position = Vector3::new(data[0], data[1], data[2]);
            joint.rotation = rotation_at(data, 3).unwrap_or_default();
        } else if let Some(rotation) = rotation_at(data, ROOT_CHANNELS + (idx - 1) * JOINT_CHANNELS) {
            joint.rotation = rotation;
        }
    }
    Ok(AvatarPosture {
        avatar_id: values.avatar_id.clone(),
        joints,
    })
}

/// Euler angles `[x, y, z]` of a scene rotation, static XYZ convention
fn euler_xyz(rotation: &Quaternion) -> [f32; 3] {
    let q = Quat::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w);
    let q = if q.length_squared() < 1e-12 { Quat::IDENTITY } else { q.normalize() };
    let (z, y, x) = q.to_euler(EulerRot::ZYX);
    [x, y, z]
}

/// Hand constraint handed back to the co-simulation once the reach is done
pub fn create_reach_constraint(side: Side, transform: &Transform, set_rotation: bool) -> Constraint {
    let translation = TranslationConstraint {
        constraint_type: TranslationConstraintType::Box,
        limits: Interval3::exact(transform.position.to_array()),
    };
    let rotation = set_rotation.then(|| RotationConstraint {
        limits: Interval3::exact(euler_xyz(&transform.rotation)),
    });
    Constraint {
        id: format!("mg_reach_constraint_{}_{}", side, Uuid::new_v4()),
        joint_constraint: Some(JointConstraint {
            joint_type: EndeffectorType::from(side),
            geometry_constraint: GeometryConstraint {
                parent_object_id: None,
                translation_constraint: Some(translation),
                rotation_constraint: rotation,
            },
        }),
    }
}

/// Keyframe goal for `joint` at the scene transform, in motion model units
pub fn reach_constraint_desc(
    joint: &str,
    keyframe_label: &str,
    target: &Transform,
    set_orientation: bool,
    hold: bool,
    scale: f32,
) -> FrameConstraintDesc {
    let mut desc = FrameConstraintDesc::new(keyframe_label, joint, target.position.to_model() * scale);
    if set_orientation {
        let q = target.rotation.to_model();
        desc.orientation = Some([q.w, q.x, q.y, q.z]);
    }
    desc.constrain_orientation = set_orientation;
    desc.hold = hold;
    desc
}

pub fn reach_action_desc(name: &str, constraints: Vec<FrameConstraintDesc>, look_at: bool) -> ActionDescriptor {
    ActionDescriptor::new(name)
        .with_frame_constraints(constraints)
        .with_look_at_constraints(look_at)
}
