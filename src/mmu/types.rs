//! MOSIM interface data model
//!
//! Plain data exchanged with the co-simulation: avatar descriptions and
//! postures, instructions, simulation state/results, constraints and events.
//! Positions and rotations stay in scene coordinates here; conversion into
//! the motion model happens in `conversion`.

use crate::animation::skeleton::Side;
use crate::utils::math::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event type emitted when an instruction is done
pub const SIMULATION_EVENT_END: &str = "end";

/// Intermediate skeleton joint types understood by the reach MMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    Undefined,
    PelvisCentre,
    S1L5Joint,
    T12L1Joint,
    T1T2Joint,
    C4C5Joint,
    HeadJoint,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    RightShoulder,
    RightElbow,
    RightWrist,
    LeftHip,
    LeftKnee,
    LeftAnkle,
    RightHip,
    RightKnee,
    RightAnkle,
}

impl Default for JointType {
    fn default() -> Self {
        JointType::Undefined
    }
}

impl JointType {
    /// Semantic skeleton model name of this joint type
    pub fn semantic_name(self) -> Option<&'static str> {
        use JointType::*;
        let name = match self {
            Undefined => return None,
            PelvisCentre => "pelvis",
            S1L5Joint => "spine",
            T12L1Joint => "spine_1",
            T1T2Joint => "spine_2",
            C4C5Joint => "neck",
            HeadJoint => "head",
            LeftShoulder => "left_shoulder",
            LeftElbow => "left_elbow",
            LeftWrist => "left_wrist",
            RightShoulder => "right_shoulder",
            RightElbow => "right_elbow",
            RightWrist => "right_wrist",
            LeftHip => "left_hip",
            LeftKnee => "left_knee",
            LeftAnkle => "left_ankle",
            RightHip => "right_hip",
            RightKnee => "right_knee",
            RightAnkle => "right_ankle",
        };
        Some(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndeffectorType {
    LeftHand,
    RightHand,
}

impl From<Side> for EndeffectorType {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => EndeffectorType::LeftHand,
            Side::Right => EndeffectorType::RightHand,
        }
    }
}

/// Scene object transform
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transform {
    pub id: String,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub rotation: Quaternion,
}

impl Transform {
    pub fn new(id: &str, position: Vector3, rotation: Quaternion) -> Self {
        Self {
            id: id.to_string(),
            position,
            rotation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AvatarJoint {
    pub id: String,
    #[serde(rename = "Type", default)]
    pub joint_type: JointType,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub rotation: Quaternion,
    #[serde(default)]
    pub parent: Option<String>,
}

impl AvatarJoint {
    pub fn new(id: &str, joint_type: JointType, parent: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            joint_type,
            position: Vector3::zero(),
            rotation: Quaternion::identity(),
            parent: parent.map(str::to_string),
        }
    }
}

/// Global joint transforms of one avatar
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AvatarPosture {
    #[serde(rename = "AvatarID")]
    pub avatar_id: String,
    pub joints: Vec<AvatarJoint>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AvatarDescription {
    #[serde(rename = "AvatarID")]
    pub avatar_id: String,
    pub zero_posture: AvatarPosture,
}

/// Channel values of the intermediate skeleton: root `X, Y, Z, W, X, Y, Z`
/// followed by one `W, X, Y, Z` rotation per joint
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AvatarPostureValues {
    #[serde(rename = "AvatarID")]
    pub avatar_id: String,
    pub posture_data: Vec<f32>,
}

impl AvatarPostureValues {
    pub fn new(avatar_id: &str, posture_data: Vec<f32>) -> Self {
        Self {
            avatar_id: avatar_id.to_string(),
            posture_data,
        }
    }

    pub fn root_position(&self) -> Option<Vector3> {
        let d = self.posture_data.get(0..3)?;
        Some(Vector3::new(d[0], d[1], d[2]))
    }

    pub fn root_rotation(&self) -> Option<Quaternion> {
        let d = self.posture_data.get(3..7)?;
        Some(Quaternion::new(d[1], d[2], d[3], d[0]))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instruction {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub motion_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Instruction {
    pub fn new(id: &str, name: &str, motion_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            motion_type: motion_type.to_string(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationEvent {
    pub name: String,
    #[serde(rename = "Type")]
    pub event_type: String,
    pub reference: String,
}

impl SimulationEvent {
    pub fn end(name: &str, reference: &str) -> Self {
        Self {
            name: name.to_string(),
            event_type: SIMULATION_EVENT_END.to_string(),
            reference: reference.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    pub fn exact(value: f32) -> Self {
        Self { min: value, max: value }
    }

    pub fn contains(&self, value: f32) -> bool {
        self.min <= value && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Interval3 {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Interval3 {
    pub fn exact(values: [f32; 3]) -> Self {
        Self {
            x: Interval::exact(values[0]),
            y: Interval::exact(values[1]),
            z: Interval::exact(values[2]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationConstraintType {
    Box,
    Ellipsoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranslationConstraint {
    #[serde(rename = "Type")]
    pub constraint_type: TranslationConstraintType,
    pub limits: Interval3,
}

/// Euler angle limits in radians
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotationConstraint {
    pub limits: Interval3,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeometryConstraint {
    #[serde(rename = "ParentObjectID")]
    pub parent_object_id: Option<String>,
    pub translation_constraint: Option<TranslationConstraint>,
    pub rotation_constraint: Option<RotationConstraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JointConstraint {
    pub joint_type: EndeffectorType,
    pub geometry_constraint: GeometryConstraint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Constraint {
    #[serde(rename = "ID")]
    pub id: String,
    pub joint_constraint: Option<JointConstraint>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationState {
    pub initial: AvatarPostureValues,
    pub current: AvatarPostureValues,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub events: Vec<SimulationEvent>,
}

impl SimulationState {
    pub fn new(current: AvatarPostureValues) -> Self {
        Self {
            initial: current.clone(),
            current,
            constraints: Vec::new(),
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationResult {
    pub posture: AvatarPostureValues,
    pub constraints: Vec<Constraint>,
    pub events: Vec<SimulationEvent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoolResponse {
    pub successful: bool,
    pub log_data: Vec<String>,
}

impl BoolResponse {
    pub fn ok() -> Self {
        Self {
            successful: true,
            log_data: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            successful: false,
            log_data: vec![message.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_json_uses_mosim_names() {
        let data = r#"{"ID":"i1","Name":"reach","MotionType":"Pose/Reach","Properties":{"TargetID":"cup","Hand":"Right"}}"#;
        let instruction: Instruction = serde_json::from_str(data).unwrap();
        assert_eq!(instruction.id, "i1");
        assert_eq!(instruction.property("Hand"), Some("Right"));
        assert_eq!(instruction.property("LeftTargetID"), None);
    }

    #[test]
    fn test_posture_values_root_channels() {
        let values = AvatarPostureValues::new("a", vec![1.0, 2.0, 3.0, 0.5, 0.1, 0.2, 0.3, 1.0]);
        assert_eq!(values.root_position(), Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(values.root_rotation(), Some(Quaternion::new(0.1, 0.2, 0.3, 0.5)));
        assert_eq!(AvatarPostureValues::default().root_rotation(), None);
    }

    #[test]
    fn test_semantic_names_cover_reach_joints() {
        assert_eq!(JointType::RightWrist.semantic_name(), Some("right_wrist"));
        assert_eq!(JointType::T12L1Joint.semantic_name(), Some("spine_1"));
        assert_eq!(JointType::Undefined.semantic_name(), None);
        assert_eq!(EndeffectorType::from(Side::Left), EndeffectorType::LeftHand);
    }
}
