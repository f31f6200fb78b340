//! Procedural demo graph
//!
//! A meter-scale humanoid (Y up, facing +Z, left side on +X) with idle,
//! walk and one-/two-handed reach actions. Used by the binary and the
//! tests so nothing depends on captured motion data.

use crate::animation::frame::{Frame, MotionClip};
use crate::animation::skeleton::{JointDefinition, Side, Skeleton};
use crate::error::MotionResult;
use crate::graph::{GraphNode, GraphNodeId, MotionGraph, MotionPrimitive, NodeType};
use crate::utils::math::write_quat;
use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

pub const FRAME_TIME: f32 = 1.0 / 30.0;
pub const CONTACT_LABEL: &str = "contact0";
const REACH_FRAMES: usize = 45;
const REACH_CONTACT_FRAME: usize = 27;

pub fn demo_skeleton() -> MotionResult<Skeleton> {
    let mut joints = vec![
        JointDefinition::new("Hips", None, [0.0, 0.95, 0.0]),
        JointDefinition::new("Spine", Some("Hips"), [0.0, 0.1, 0.0]),
        JointDefinition::new("Spine1", Some("Spine"), [0.0, 0.15, 0.0]),
        JointDefinition::new("Spine2", Some("Spine1"), [0.0, 0.15, 0.0]),
        JointDefinition::new("Neck", Some("Spine2"), [0.0, 0.15, 0.0]),
        JointDefinition::new("Head", Some("Neck"), [0.0, 0.1, 0.0]),
        JointDefinition::end_site("HeadEnd", "Head", [0.0, 0.15, 0.0]),
    ];
    for (prefix, sign) in [("Left", 1.0), ("Right", -1.0)] {
        let name = |suffix: &str| format!("{}{}", prefix, suffix);
        joints.extend([
            JointDefinition::new(&name("Shoulder"), Some("Spine2"), [0.05 * sign, 0.1, 0.0]),
            JointDefinition::new(&name("Arm"), Some(&name("Shoulder")), [0.12 * sign, 0.0, 0.0]),
            JointDefinition::new(&name("ForeArm"), Some(&name("Arm")), [0.28 * sign, 0.0, 0.0]),
            JointDefinition::new(&name("Hand"), Some(&name("ForeArm")), [0.25 * sign, 0.0, 0.0]),
            JointDefinition::end_site(&name("HandEnd"), &name("Hand"), [0.08 * sign, 0.0, 0.0]),
        ]);
    }
    for (prefix, sign) in [("Left", 1.0), ("Right", -1.0)] {
        let name = |suffix: &str| format!("{}{}", prefix, suffix);
        joints.extend([
            JointDefinition::new(&name("UpLeg"), Some("Hips"), [0.1 * sign, -0.05, 0.0]),
            JointDefinition::new(&name("Leg"), Some(&name("UpLeg")), [0.0, -0.42, 0.0]),
            JointDefinition::new(&name("Foot"), Some(&name("Leg")), [0.0, -0.4, 0.0]),
            JointDefinition::new(&name("ToeBase"), Some(&name("Foot")), [0.0, -0.05, 0.12]),
            JointDefinition::end_site(&name("ToeEnd"), &name("ToeBase"), [0.0, 0.0, 0.05]),
        ]);
    }

    let mut model = HashMap::new();
    for (semantic, joint) in [
        ("pelvis", "Hips"),
        ("spine", "Spine"),
        ("spine_1", "Spine1"),
        ("spine_2", "Spine2"),
        ("neck", "Neck"),
        ("head", "Head"),
    ] {
        model.insert(semantic.to_string(), joint.to_string());
    }
    for (side, prefix) in [("left", "Left"), ("right", "Right")] {
        for (semantic, suffix) in [
            ("clavicle", "Shoulder"),
            ("shoulder", "Arm"),
            ("elbow", "ForeArm"),
            ("wrist", "Hand"),
            ("hip", "UpLeg"),
            ("knee", "Leg"),
            ("ankle", "Foot"),
            ("toe", "ToeBase"),
        ] {
            model.insert(format!("{}_{}", side, semantic), format!("{}{}", prefix, suffix));
        }
    }

    let mut skeleton = Skeleton::new(&joints, model, FRAME_TIME)?;
    skeleton.set_static_joints(&["left_clavicle", "right_clavicle"]);
    Ok(skeleton)
}

/// Writes local joint rotations into a frame of the demo skeleton
struct PoseBuilder<'a> {
    skeleton: &'a Skeleton,
    frame: Frame,
}

impl<'a> PoseBuilder<'a> {
    fn new(skeleton: &'a Skeleton) -> Self {
        Self {
            skeleton,
            frame: skeleton.reference_frame().clone(),
        }
    }

    fn rotate(mut self, joint: &str, q: Quat) -> MotionResult<Self> {
        if let Some(offset) = self.skeleton.quaternion_offset_of(joint)? {
            write_quat(&mut self.frame, offset, q);
        }
        Ok(self)
    }

    fn root(mut self, position: Vec3) -> Self {
        crate::animation::frame::set_root_position(&mut self.frame, position);
        self
    }

    /// Upper arm pointing along `direction` (global, parents at rest)
    fn arm(self, side: Side, direction: Vec3) -> MotionResult<Self> {
        let rest = match side {
            Side::Left => Vec3::X,
            Side::Right => Vec3::NEG_X,
        };
        let joint = format!("{}Arm", side);
        self.rotate(&joint, Quat::from_rotation_arc(rest, direction.normalize()))
    }

    fn build(self) -> Frame {
        self.frame
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn arm_down() -> Vec3 {
    Vec3::NEG_Y
}

fn idle_clip(skeleton: &Skeleton, amplitude: f32, phase: f32) -> MotionResult<MotionClip> {
    let n = 30;
    let frames = (0..n)
        .map(|i| -> MotionResult<Frame> {
            let t = TAU * i as f32 / n as f32 + phase;
            PoseBuilder::new(skeleton)
                .rotate("Spine1", Quat::from_rotation_x(amplitude * t.sin()))?
                .rotate("Head", Quat::from_rotation_y(0.5 * amplitude * t.cos()))?
                .arm(Side::Left, arm_down())?
                .arm(Side::Right, arm_down())
                .map(PoseBuilder::build)
        })
        .collect::<MotionResult<Vec<_>>>()?;
    Ok(MotionClip::new(frames, FRAME_TIME))
}

/// Mirror a right-arm direction to the left side
fn mirror(direction: Vec3) -> Vec3 {
    Vec3::new(-direction.x, direction.y, direction.z)
}

fn reach_clip(skeleton: &Skeleton, sides: &[Side], direction: Vec3) -> MotionResult<MotionClip> {
    let frames = (0..REACH_FRAMES)
        .map(|i| -> MotionResult<Frame> {
            let s = smoothstep(i as f32 / REACH_CONTACT_FRAME as f32);
            let mut pose = PoseBuilder::new(skeleton)
                .rotate("Spine1", Quat::from_rotation_x(0.08 * s))?
                .arm(Side::Left, arm_down())?
                .arm(Side::Right, arm_down())?;
            for side in sides {
                let target = match side {
                    Side::Right => direction,
                    Side::Left => mirror(direction),
                };
                pose = pose.arm(*side, arm_down().lerp(target.normalize(), s))?;
            }
            Ok(pose.build())
        })
        .collect::<MotionResult<Vec<_>>>()?;
    Ok(MotionClip::new(frames, FRAME_TIME))
}

fn retract_clip(skeleton: &Skeleton, sides: &[Side], direction: Vec3) -> MotionResult<MotionClip> {
    let n = 30;
    let frames = (0..n)
        .map(|i| -> MotionResult<Frame> {
            let s = 1.0 - smoothstep(i as f32 / (n - 1) as f32);
            let mut pose = PoseBuilder::new(skeleton)
                .rotate("Spine1", Quat::from_rotation_x(0.08 * s))?
                .arm(Side::Left, arm_down())?
                .arm(Side::Right, arm_down())?;
            for side in sides {
                let target = match side {
                    Side::Right => direction,
                    Side::Left => mirror(direction),
                };
                pose = pose.arm(*side, arm_down().lerp(target.normalize(), s))?;
            }
            Ok(pose.build())
        })
        .collect::<MotionResult<Vec<_>>>()?;
    Ok(MotionClip::new(frames, FRAME_TIME))
}

/// Walk clip covering `distance` along +Z; `profile` maps progress to covered fraction
fn walk_clip(skeleton: &Skeleton, n: usize, distance: f32, profile: fn(f32) -> f32) -> MotionResult<MotionClip> {
    let frames = (0..n)
        .map(|i| -> MotionResult<Frame> {
            let t = i as f32 / n as f32;
            let swing = 0.35 * (TAU * t).sin() * (distance / 0.7).min(1.5);
            let knee = 0.3 * (TAU * t + PI / 2.0).sin().max(0.0);
            PoseBuilder::new(skeleton)
                .root(Vec3::new(0.0, 0.0, distance * profile(t)))
                .rotate("LeftUpLeg", Quat::from_rotation_x(-swing))?
                .rotate("RightUpLeg", Quat::from_rotation_x(swing))?
                .rotate("LeftLeg", Quat::from_rotation_x(knee))?
                .rotate("RightLeg", Quat::from_rotation_x(0.3 - knee))?
                .arm(Side::Left, Vec3::new(0.0, -1.0, 0.3 * swing))?
                .arm(Side::Right, Vec3::new(0.0, -1.0, -0.3 * swing))
                .map(PoseBuilder::build)
        })
        .collect::<MotionResult<Vec<_>>>()?;
    Ok(MotionClip::new(frames, FRAME_TIME))
}

fn reach_directions() -> [Vec3; 4] {
    [
        Vec3::new(0.0, -0.5, 1.0),
        Vec3::new(0.0, -0.1, 1.0),
        Vec3::new(0.0, 0.35, 1.0),
        Vec3::new(-0.5, -0.2, 1.0),
    ]
}

fn reach_nodes(
    skeleton: &Skeleton,
    action: &str,
    sides: &[Side],
    after_retract: Vec<GraphNodeId>,
) -> MotionResult<Vec<GraphNode>> {
    let reach_examples = reach_directions()
        .iter()
        .map(|d| reach_clip(skeleton, sides, *d))
        .collect::<MotionResult<Vec<_>>>()?;
    let retract_examples = reach_directions()
        .iter()
        .map(|d| retract_clip(skeleton, sides, *d))
        .collect::<MotionResult<Vec<_>>>()?;
    let retract_id = GraphNodeId::new(action, "retract");
    Ok(vec![
        GraphNode::new(
            GraphNodeId::new(action, "reach"),
            NodeType::Start,
            MotionPrimitive::morphable(reach_examples)?,
        )
        .with_keyframe(CONTACT_LABEL, REACH_CONTACT_FRAME)
        .with_transitions(vec![retract_id.clone()]),
        GraphNode::new(retract_id, NodeType::End, MotionPrimitive::morphable(retract_examples)?)
            .with_transitions(after_retract),
    ])
}

/// Build the demo graph; the start node is `(idle, idle)`
pub fn build_demo_graph() -> MotionResult<MotionGraph> {
    let skeleton = demo_skeleton()?;

    let idle = GraphNodeId::new("idle", "idle");
    let walk_start = GraphNodeId::new("walk", "start");
    let walk_step = GraphNodeId::new("walk", "step");
    let walk_end = GraphNodeId::new("walk", "end");
    let reach_actions = [
        ("reachRight", vec![Side::Right]),
        ("reachLeft", vec![Side::Left]),
        ("reachBoth", vec![Side::Left, Side::Right]),
    ];
    let reach_starts: Vec<GraphNodeId> = reach_actions
        .iter()
        .map(|(action, _)| GraphNodeId::new(action, "reach"))
        .collect();

    let mut idle_transitions = vec![idle.clone(), walk_start.clone()];
    idle_transitions.extend(reach_starts.iter().cloned());
    let mut walk_end_transitions = vec![idle.clone()];
    walk_end_transitions.extend(reach_starts.iter().cloned());

    let idle_examples = [(0.01, 0.0), (0.02, 0.5), (0.03, 1.0)]
        .iter()
        .map(|(amplitude, phase)| idle_clip(&skeleton, *amplitude, *phase))
        .collect::<MotionResult<Vec<_>>>()?;
    let ease_in: fn(f32) -> f32 = |t| t * t;
    let linear: fn(f32) -> f32 = |t| t;
    let ease_out: fn(f32) -> f32 = |t| 1.0 - (1.0 - t) * (1.0 - t);

    let mut nodes = vec![
        GraphNode::new(idle.clone(), NodeType::Idle, MotionPrimitive::morphable(idle_examples)?)
            .with_transitions(idle_transitions),
        GraphNode::new(
            walk_start.clone(),
            NodeType::Start,
            MotionPrimitive::morphable(vec![
                walk_clip(&skeleton, 20, 0.25, ease_in)?,
                walk_clip(&skeleton, 20, 0.4, ease_in)?,
            ])?,
        )
        .with_transitions(vec![walk_step.clone(), walk_end.clone()]),
        GraphNode::new(
            walk_step.clone(),
            NodeType::Standard,
            MotionPrimitive::morphable(vec![
                walk_clip(&skeleton, 24, 0.55, linear)?,
                walk_clip(&skeleton, 24, 0.7, linear)?,
                walk_clip(&skeleton, 24, 0.85, linear)?,
            ])?,
        )
        .with_transitions(vec![walk_step.clone(), walk_end.clone()]),
        GraphNode::new(
            walk_end.clone(),
            NodeType::End,
            MotionPrimitive::morphable(vec![
                walk_clip(&skeleton, 20, 0.2, ease_out)?,
                walk_clip(&skeleton, 20, 0.4, ease_out)?,
            ])?,
        )
        .with_transitions(walk_end_transitions),
    ];
    for (action, sides) in &reach_actions {
        nodes.extend(reach_nodes(&skeleton, action, sides, vec![idle.clone(), walk_start.clone()])?);
    }

    MotionGraph::new(Arc::new(skeleton), nodes, idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::frame::quaternions_normalized;

    #[test]
    fn test_demo_graph_builds() {
        let graph = build_demo_graph().unwrap();
        assert_eq!(graph.nodes().count(), 10);
        let actions = graph.action_definitions();
        for name in ["idle", "walk", "reachRight", "reachLeft", "reachBoth"] {
            assert!(actions.contains_key(name), "missing action {}", name);
        }
    }

    #[test]
    fn test_demo_clips_are_normalized() {
        let graph = build_demo_graph().unwrap();
        for node in graph.nodes() {
            let clip = node.primitive.back_project_mean().unwrap();
            assert!(clip.frames().iter().all(|f| quaternions_normalized(f, 1e-5)), "{}", node.id);
        }
    }

    #[test]
    fn test_idle_pose_stands_on_ground() {
        let graph = build_demo_graph().unwrap();
        let skeleton = graph.skeleton();
        let clip = graph.node(graph.start_node()).unwrap().primitive.back_project_mean().unwrap();
        let pose = &clip.frames()[0];
        let foot = skeleton.global_position(pose, "LeftFoot").unwrap();
        assert!((foot.y - 0.08).abs() < 0.02);
        let wrist = skeleton.global_position(pose, "RightHand").unwrap();
        assert!(wrist.y < 1.0 && wrist.x < 0.0);
    }

    #[test]
    fn test_reach_contact_keyframe() {
        let graph = build_demo_graph().unwrap();
        let node = graph.node(&GraphNodeId::new("reachRight", "reach")).unwrap();
        assert_eq!(node.keyframe(CONTACT_LABEL), Some(REACH_CONTACT_FRAME));
        let clip = node.primitive.back_project_mean().unwrap();
        let skeleton = graph.skeleton();
        let wrist = skeleton.global_position(&clip.frames()[REACH_CONTACT_FRAME], "RightHand").unwrap();
        assert!(wrist.z > 0.3, "wrist should be in front of the body: {:?}", wrist);
    }
}
