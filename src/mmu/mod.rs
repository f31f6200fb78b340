//! MOSIM motion model unit for morphable graph reaching
//!
//! [`MmuReachMg`] turns reach instructions into action descriptors for the
//! [`MorphableGraphStateMachine`] and converts its frames back into
//! intermediate skeleton postures on every simulation step.
//!
//! Nothing in here lets an error cross the interface: failures become a
//! failed [`BoolResponse`] or a pass-through [`SimulationResult`].

pub mod conversion;
pub mod services;
pub mod types;

pub use services::{DirectRetargeting, InMemoryScene, RetargetingService, SceneAccess};
pub use types::{
    AvatarDescription, AvatarJoint, AvatarPosture, AvatarPostureValues, BoolResponse, Constraint, EndeffectorType,
    Instruction, JointType, SimulationEvent, SimulationResult, SimulationState, Transform,
};

use crate::animation::frame;
use crate::animation::skeleton::Side;
use crate::config::MgSettings;
use crate::error::{MotionError, MotionResult};
use crate::graph::description::load_graph_from_path;
use crate::graph::{demo, MotionGraph};
use crate::planner::ActionDescriptor;
use crate::state_machine::{FlatGround, MorphableGraphStateMachine, SceneInterface};
use crate::utils::math::{yaw_twist, Quaternion, Vector3};
use glam::Vec3;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const MMU_NAME: &str = "MGReach";
pub const MMU_MOTION_TYPE: &str = "Pose/Reach";

const TARGET_ID: &str = "TargetID";
const HAND: &str = "Hand";
const LEFT_TARGET_ID: &str = "LeftTargetID";
const RIGHT_TARGET_ID: &str = "RightTargetID";

/// Calls a co-simulation makes on a motion model unit
pub trait MotionModelInterface: Send {
    fn initialize(&mut self, avatar_description: AvatarDescription, properties: &HashMap<String, String>)
        -> BoolResponse;

    fn assign_instruction(&mut self, instruction: &Instruction, simulation_state: &SimulationState) -> BoolResponse;

    fn do_step(&mut self, dt: f32, simulation_state: &SimulationState) -> SimulationResult;

    fn get_boundary_constraints(&self, instruction: &Instruction) -> Vec<Constraint>;

    fn check_prerequisites(&self, instruction: &Instruction) -> BoolResponse;

    fn abort(&mut self, instruction_id: &str) -> BoolResponse;

    fn dispose(&mut self, parameters: &HashMap<String, String>) -> BoolResponse;

    fn create_checkpoint(&self) -> Vec<u8>;

    fn restore_checkpoint(&mut self, data: &[u8]) -> BoolResponse;

    fn execute_function(&mut self, name: &str, parameters: &HashMap<String, String>) -> HashMap<String, String>;
}

/// Hand(s) driven by the instruction currently planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReachHand {
    One(Side),
    Both,
}

/// Per-avatar state created by `initialize`
struct ReachSession {
    state_machine: MorphableGraphStateMachine,
    avatar: AvatarDescription,
    index_to_joint: BTreeMap<usize, String>,
    retargeting: Arc<dyn RetargetingService>,
    retargeting_ready: bool,
    finished_event: Option<SimulationEvent>,
    final_constraints: Vec<Constraint>,
    prev_hand: Option<ReachHand>,
    frame_time: f32,
}

impl ReachSession {
    fn settings(&self) -> &MgSettings {
        self.state_machine.settings()
    }

    fn is_finished(&self) -> bool {
        self.state_machine.is_paused() && self.state_machine.reached_secondary_ik_target()
    }

    fn planner_busy(&self) -> bool {
        self.state_machine.is_planner_active() && !self.is_finished()
    }

    fn wrist(&self, side: Side) -> MotionResult<String> {
        self.state_machine
            .skeleton()
            .wrist_joint(side)
            .map(str::to_string)
            .ok_or_else(|| MotionError::unknown_joint(format!("{}_wrist", side)))
    }

    fn one_handed_reach_desc(&self, side: Side, target: &Transform) -> MotionResult<ActionDescriptor> {
        let settings = self.settings();
        let name = match side {
            Side::Right => &settings.right_reach_action_name,
            Side::Left => &settings.left_reach_action_name,
        };
        let constraint = conversion::reach_constraint_desc(
            &self.wrist(side)?,
            &settings.reach_keyframe_label,
            target,
            settings.set_orientation_constraints,
            settings.hold_frame,
            settings.target_to_mmu_scale,
        );
        Ok(conversion::reach_action_desc(
            name,
            vec![constraint],
            settings.look_at_constraints,
        ))
    }

    fn two_handed_reach_desc(&self, left: &Transform, right: &Transform) -> MotionResult<ActionDescriptor> {
        let settings = self.settings();
        let constraints = [(Side::Left, left), (Side::Right, right)]
            .into_iter()
            .map(|(side, target)| {
                Ok(conversion::reach_constraint_desc(
                    &self.wrist(side)?,
                    &settings.reach_keyframe_label,
                    target,
                    settings.set_orientation_constraints,
                    settings.hold_frame,
                    settings.target_to_mmu_scale,
                ))
            })
            .collect::<MotionResult<Vec<_>>>()?;
        Ok(conversion::reach_action_desc(
            &settings.two_hand_reach_action_name,
            constraints,
            false,
        ))
    }

    fn create_one_handed_reach(
        &mut self,
        side: Side,
        target: &Transform,
        simulation_state: &SimulationState,
    ) -> MotionResult<bool> {
        if !self.planner_busy() {
            let desc = self.one_handed_reach_desc(side, target)?;
            self.final_constraints.clear();
            self.prev_hand = Some(ReachHand::One(side));
            self.state_machine.remove_secondary_ik_target();
            self.final_constraints
                .push(conversion::create_reach_constraint(side, target, true));
            self.assign_to_state_machine(simulation_state, &desc)?;
        } else if self.prev_hand != Some(ReachHand::One(side)) {
            self.set_secondary_ik_target(side, target)?;
        } else {
            // the requested hand is busy with the planned reach
            self.set_secondary_ik_target(side.other(), target)?;
        }
        Ok(true)
    }

    fn create_two_handed_reach(
        &mut self,
        left: &Transform,
        right: &Transform,
        simulation_state: &SimulationState,
    ) -> MotionResult<bool> {
        if self.planner_busy() {
            debug!("Two handed reach rejected while the planner is busy");
            return Ok(false);
        }
        let desc = self.two_handed_reach_desc(left, right)?;
        self.final_constraints.clear();
        self.prev_hand = Some(ReachHand::Both);
        self.state_machine.remove_secondary_ik_target();
        self.final_constraints
            .push(conversion::create_reach_constraint(Side::Left, left, true));
        self.final_constraints
            .push(conversion::create_reach_constraint(Side::Right, right, true));
        self.assign_to_state_machine(simulation_state, &desc)?;
        Ok(true)
    }

    fn assign_to_state_machine(&self, simulation_state: &SimulationState, desc: &ActionDescriptor) -> MotionResult<()> {
        let sm = &self.state_machine;
        sm.unpause();
        sm.reset()?;
        sm.update(self.frame_time)?;
        self.set_pose(simulation_state)?;
        sm.update_idle_foot_grounding_constraints()?;
        sm.enqueue_states(std::slice::from_ref(desc), self.frame_time, true)
    }

    fn set_secondary_ik_target(&mut self, side: Side, target: &Transform) -> MotionResult<()> {
        let settings = self.settings();
        let skeleton = self.state_machine.skeleton();
        let position = target.position.to_model() * settings.target_to_mmu_scale;
        let orientation = target.rotation.to_model();
        let joint = self.wrist(side)?;
        let long_chain = settings.use_long_chain_for_secondary_ik;
        let chain_end = if long_chain {
            skeleton.long_chain_end()
        } else {
            skeleton.clavicle_joint(side)
        }
        .map(str::to_string);
        info!("Secondary IK target for {} at {}", joint, target.position);
        self.state_machine.set_secondary_ik_target(
            &joint,
            position,
            Some(orientation),
            chain_end,
            settings.look_at_secondary_targets,
        )?;
        if long_chain {
            let other = side.other();
            let preserve_end = skeleton.clavicle_joint(other).map(str::to_string);
            self.state_machine
                .preserve_secondary_chain(&self.wrist(other)?, preserve_end)?;
        }
        self.final_constraints
            .push(conversion::create_reach_constraint(side, target, true));
        Ok(())
    }

    /// Re-anchor the avatar to the root of the incoming simulation state
    fn set_pose(&self, simulation_state: &SimulationState) -> MotionResult<()> {
        let current = &simulation_state.current;
        let (position, rotation) = match (current.root_position(), current.root_rotation()) {
            (Some(p), Some(q)) => (p, q),
            _ => {
                return Err(MotionError::Instruction {
                    reason: format!(
                        "posture of {} has {} values, root channels missing",
                        current.avatar_id,
                        current.posture_data.len()
                    ),
                })
            }
        };
        let skeleton = self.state_machine.skeleton();
        let settings = self.settings();

        let twist = yaw_twist(rotation.to_model());
        let reference = frame::root_orientation(skeleton.reference_frame());
        self.state_machine
            .set_global_orientation((twist * reference).normalize());

        let root = if self.retargeting_ready {
            match self.retargeting.retarget_to_target(current) {
                Ok(posture) => posture.joints.first().map(|j| j.position).unwrap_or(position),
                Err(e) => {
                    warn!("Retargeting to target failed, using raw root channels: {}", e);
                    position
                }
            }
        } else {
            position
        };
        let mut start = root.to_model() * settings.target_to_mmu_scale;
        start.y = 0.0;
        start += twist * Vec3::from(settings.root_offset);
        debug!("Set start position {:?} from {}", start, root);
        self.state_machine.set_global_position(start);
        self.state_machine.update(self.frame_time)
    }

    fn step(&mut self, dt: f32, simulation_state: &SimulationState) -> MotionResult<SimulationResult> {
        if self.state_machine.is_idle() {
            self.state_machine.update(dt)?;
            return Ok(pass_through(simulation_state));
        }
        let frame = self.state_machine.get_current_frame()?;
        self.state_machine.update(dt)?;

        let posture = conversion::frame_to_posture(
            &self.avatar.avatar_id,
            self.state_machine.skeleton(),
            &frame,
            &self.avatar.zero_posture,
            &self.index_to_joint,
            1.0 / self.settings().target_to_mmu_scale,
        )?;
        let mut values = if self.retargeting_ready {
            self.retargeting.retarget_to_intermediate(&posture)?
        } else {
            conversion::posture_to_values(&posture)
        };
        values.avatar_id = self.avatar.avatar_id.clone();

        let mut result = SimulationResult {
            posture: values,
            constraints: simulation_state.constraints.clone(),
            events: simulation_state.events.clone(),
        };
        if self.is_finished() {
            if let Some(event) = self.finished_event.take() {
                info!("Reach {} finished with {} constraints", event.reference, self.final_constraints.len());
                result.constraints.extend(self.final_constraints.iter().cloned());
                result.events = vec![event];
            }
        }
        Ok(result)
    }

    fn abort(&mut self) -> MotionResult<()> {
        self.finished_event = None;
        self.final_constraints.clear();
        self.prev_hand = None;
        self.state_machine.reset()
    }
}

fn pass_through(simulation_state: &SimulationState) -> SimulationResult {
    SimulationResult {
        posture: simulation_state.current.clone(),
        constraints: simulation_state.constraints.clone(),
        events: simulation_state.events.clone(),
    }
}

/// Reach MMU backed by a morphable graph state machine
pub struct MmuReachMg {
    settings: MgSettings,
    scene_access: Arc<dyn SceneAccess>,
    retargeting: Arc<dyn RetargetingService>,
    scene: Arc<dyn SceneInterface>,
    graph: Option<Arc<MotionGraph>>,
    session: Option<ReachSession>,
}

impl MmuReachMg {
    pub fn new(
        settings: MgSettings,
        scene_access: Arc<dyn SceneAccess>,
        retargeting: Arc<dyn RetargetingService>,
    ) -> Self {
        Self {
            settings,
            scene_access,
            retargeting,
            scene: Arc::new(FlatGround::new(0.0)),
            graph: None,
            session: None,
        }
    }

    /// Use `graph` instead of loading `model_file`
    pub fn with_graph(mut self, graph: Arc<MotionGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Ground heights used by foot grounding
    pub fn with_scene(mut self, scene: Arc<dyn SceneInterface>) -> Self {
        self.scene = scene;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Reach pose held and every secondary target reached
    pub fn is_finished(&self) -> bool {
        self.session.as_ref().map(ReachSession::is_finished).unwrap_or(false)
    }

    pub fn is_retargeting_ready(&self) -> bool {
        self.session.as_ref().map(|s| s.retargeting_ready).unwrap_or(false)
    }

    pub fn state_machine(&self) -> Option<&MorphableGraphStateMachine> {
        self.session.as_ref().map(|s| &s.state_machine)
    }

    /// Constraints reported with the next finished event
    pub fn final_constraints(&self) -> &[Constraint] {
        self.session
            .as_ref()
            .map(|s| s.final_constraints.as_slice())
            .unwrap_or(&[])
    }

    fn load_graph(&self) -> MotionResult<Arc<MotionGraph>> {
        if let Some(graph) = &self.graph {
            return Ok(graph.clone());
        }
        match &self.settings.model_file {
            Some(path) => {
                info!("Loading motion graph from {}", path.display());
                Ok(Arc::new(load_graph_from_path(path)?))
            }
            None => {
                info!("No model file configured, using the demo graph");
                Ok(Arc::new(demo::build_demo_graph()?))
            }
        }
    }

    fn create_session(&self, avatar: AvatarDescription) -> MotionResult<ReachSession> {
        let graph = self.load_graph()?;
        let state_machine = MorphableGraphStateMachine::new(graph, self.settings.clone(), self.scene.clone())?;
        let skeleton = state_machine.skeleton().clone();
        let frame_time = skeleton.frame_time();

        let index_to_joint = conversion::index_to_joint_map(&avatar.zero_posture, &skeleton);
        for (idx, name) in &index_to_joint {
            debug!("Avatar joint {} maps to {}", idx, name);
        }
        let mut reference = skeleton.reference_frame().clone();
        frame::set_root_position(&mut reference, Vec3::ZERO);
        let zero_posture = conversion::frame_to_posture(
            &avatar.avatar_id,
            &skeleton,
            &reference,
            &avatar.zero_posture,
            &index_to_joint,
            1.0 / self.settings.target_to_mmu_scale,
        )?;
        let retargeting_ready = match self.retargeting.setup_retargeting(&zero_posture) {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not set up retargeting, continuing without it: {}", e);
                false
            }
        };

        state_machine.set_play(true);
        state_machine.update(frame_time)?;
        Ok(ReachSession {
            state_machine,
            avatar,
            index_to_joint,
            retargeting: self.retargeting.clone(),
            retargeting_ready,
            finished_event: None,
            final_constraints: Vec::new(),
            prev_hand: None,
            frame_time,
        })
    }

    fn target(&self, id: &str) -> MotionResult<Transform> {
        self.scene_access
            .get_transform_by_id(id)
            .ok_or_else(|| MotionError::Instruction {
                reason: format!("target {} not found in scene", id),
            })
    }

    fn assign(&mut self, instruction: &Instruction, simulation_state: &SimulationState) -> MotionResult<bool> {
        let one_handed = instruction.property(TARGET_ID).zip(instruction.property(HAND));
        let two_handed = instruction
            .property(LEFT_TARGET_ID)
            .zip(instruction.property(RIGHT_TARGET_ID));
        match (one_handed, two_handed) {
            (Some((target_id, hand)), _) => {
                let side = Side::parse(hand).ok_or_else(|| MotionError::Instruction {
                    reason: format!("unknown hand {}", hand),
                })?;
                let target = self.target(target_id)?;
                info!("One handed reach with {} hand to {} at {}", side, target_id, target.position);
                let session = self.session_mut()?;
                session.create_one_handed_reach(side, &target, simulation_state)
            }
            (None, Some((left_id, right_id))) => {
                let left = self.target(left_id)?;
                let right = self.target(right_id)?;
                info!("Two handed reach to {} and {}", left_id, right_id);
                let session = self.session_mut()?;
                session.create_two_handed_reach(&left, &right, simulation_state)
            }
            (None, None) => Err(MotionError::Instruction {
                reason: "Required parameters not defined".to_string(),
            }),
        }
    }

    fn session_mut(&mut self) -> MotionResult<&mut ReachSession> {
        self.session.as_mut().ok_or_else(|| MotionError::Instruction {
            reason: "MMU is not initialized".to_string(),
        })
    }
}

impl MotionModelInterface for MmuReachMg {
    fn initialize(
        &mut self,
        avatar_description: AvatarDescription,
        properties: &HashMap<String, String>,
    ) -> BoolResponse {
        info!(
            "Initialize {} for avatar {} ({} properties)",
            MMU_NAME,
            avatar_description.avatar_id,
            properties.len()
        );
        if let Some(old) = self.session.take() {
            if let Err(e) = old.state_machine.reset() {
                warn!("Reset of the previous session failed: {}", e);
            }
        }
        match self.create_session(avatar_description) {
            Ok(session) => {
                self.session = Some(session);
                BoolResponse::ok()
            }
            Err(e) => {
                error!("Initialization failed: {}", e);
                BoolResponse::failed(e.to_string())
            }
        }
    }

    fn assign_instruction(&mut self, instruction: &Instruction, simulation_state: &SimulationState) -> BoolResponse {
        debug!("Assign instruction {} ({})", instruction.name, instruction.id);
        match self.assign(instruction, simulation_state) {
            Ok(true) => {
                if let Some(session) = self.session.as_mut() {
                    session.finished_event = Some(SimulationEvent::end(&instruction.name, &instruction.id));
                }
                BoolResponse::ok()
            }
            Ok(false) => BoolResponse::failed(format!("{} is busy with another reach", MMU_NAME)),
            Err(e) => {
                warn!("Instruction {} rejected: {}", instruction.id, e);
                BoolResponse::failed(e.to_string())
            }
        }
    }

    fn do_step(&mut self, dt: f32, simulation_state: &SimulationState) -> SimulationResult {
        let Some(session) = self.session.as_mut() else {
            return pass_through(simulation_state);
        };
        match session.step(dt, simulation_state) {
            Ok(result) => result,
            Err(e) => {
                error!("Step failed: {}", e);
                pass_through(simulation_state)
            }
        }
    }

    fn get_boundary_constraints(&self, _instruction: &Instruction) -> Vec<Constraint> {
        Vec::new()
    }

    fn check_prerequisites(&self, _instruction: &Instruction) -> BoolResponse {
        BoolResponse::ok()
    }

    fn abort(&mut self, instruction_id: &str) -> BoolResponse {
        info!("Abort {}", instruction_id);
        match self.session.as_mut().map(ReachSession::abort) {
            Some(Err(e)) => BoolResponse::failed(e.to_string()),
            _ => BoolResponse::ok(),
        }
    }

    fn dispose(&mut self, _parameters: &HashMap<String, String>) -> BoolResponse {
        if let Some(session) = self.session.take() {
            info!("Dispose {} for avatar {}", MMU_NAME, session.avatar.avatar_id);
            if let Err(e) = session.state_machine.reset() {
                return BoolResponse::failed(e.to_string());
            }
        }
        BoolResponse::ok()
    }

    fn create_checkpoint(&self) -> Vec<u8> {
        Vec::new()
    }

    fn restore_checkpoint(&mut self, _data: &[u8]) -> BoolResponse {
        BoolResponse::ok()
    }

    fn execute_function(&mut self, name: &str, _parameters: &HashMap<String, String>) -> HashMap<String, String> {
        debug!("Function {} is not supported", name);
        HashMap::new()
    }
}

/// Intermediate skeleton subset with the joints the reach MMU drives
pub fn default_avatar_description(avatar_id: &str) -> AvatarDescription {
    let joints = [
        ("PelvisCentre", JointType::PelvisCentre, None),
        ("S1L5Joint", JointType::S1L5Joint, Some("PelvisCentre")),
        ("T12L1Joint", JointType::T12L1Joint, Some("S1L5Joint")),
        ("T1T2Joint", JointType::T1T2Joint, Some("T12L1Joint")),
        ("C4C5Joint", JointType::C4C5Joint, Some("T1T2Joint")),
        ("HeadJoint", JointType::HeadJoint, Some("C4C5Joint")),
        ("LeftShoulder", JointType::LeftShoulder, Some("T1T2Joint")),
        ("LeftElbow", JointType::LeftElbow, Some("LeftShoulder")),
        ("LeftWrist", JointType::LeftWrist, Some("LeftElbow")),
        ("RightShoulder", JointType::RightShoulder, Some("T1T2Joint")),
        ("RightElbow", JointType::RightElbow, Some("RightShoulder")),
        ("RightWrist", JointType::RightWrist, Some("RightElbow")),
        ("LeftHip", JointType::LeftHip, Some("PelvisCentre")),
        ("LeftKnee", JointType::LeftKnee, Some("LeftHip")),
        ("LeftAnkle", JointType::LeftAnkle, Some("LeftKnee")),
        ("RightHip", JointType::RightHip, Some("PelvisCentre")),
        ("RightKnee", JointType::RightKnee, Some("RightHip")),
        ("RightAnkle", JointType::RightAnkle, Some("RightKnee")),
    ];
    AvatarDescription {
        avatar_id: avatar_id.to_string(),
        zero_posture: AvatarPosture {
            avatar_id: avatar_id.to_string(),
            joints: joints
                .iter()
                .map(|(id, joint_type, parent)| AvatarJoint::new(id, *joint_type, *parent))
                .collect(),
        },
    }
}

/// Standing posture values at `position` facing the scene's forward axis
pub fn standing_posture_values(avatar: &AvatarDescription, position: Vector3) -> AvatarPostureValues {
    let mut data = position.to_array().to_vec();
    let identity = Quaternion::identity();
    for _ in 0..avatar.zero_posture.joints.len().max(1) {
        data.extend_from_slice(&[identity.w, identity.x, identity.y, identity.z]);
    }
    AvatarPostureValues::new(&avatar.avatar_id, data)
}
