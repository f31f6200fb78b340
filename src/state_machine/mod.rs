//! Morphable graph state machine
//!
//! Orchestrates foreground playback and the background planner. Playback
//! state lives behind one coarse lock; the state queue carries its own lock
//! and is never locked while waiting for the orchestrator lock. The only
//! blocking point on the frame path is [`MorphableGraphStateMachine::wait_for_planner`],
//! which gives up after a fixed number of queries and lets `update`
//! substitute an idle state.

pub mod grounding;
pub mod secondary_target;

pub use grounding::{FlatGround, FootConstraint, FootplantConstraintGenerator, MotionGrounding, SceneInterface};
pub use secondary_target::SecondaryIkTarget;

use crate::animation::frame::{self, Frame, MotionClip};
use crate::animation::ik::InverseKinematics;
use crate::animation::motion_state::{MotionState, MotionStateInterface};
use crate::animation::motion_state_machine::MotionStateMachine;
use crate::animation::skeleton::Skeleton;
use crate::config::{MgSettings, SamplingPool};
use crate::error::{MotionError, MotionResult};
use crate::graph::{GraphNodeId, MotionGraph, NodeType};
use crate::planner::{ActionConstraints, ActionDescriptor, PlannerEvent, StatePlanner, StateQueueEntry};
use crossbeam_channel::Receiver;
use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the frame loop and the instruction calls both touch
struct OrchestratorState {
    state_machine: MotionStateMachine,
    /// Idle clip the machine was seeded with, re-anchored on every global transform write
    initial_pose_buffer: Vec<Frame>,
    global_position: Vec3,
    global_orientation: Quat,
    stop_current_state: bool,
    secondary_ik_target: Option<SecondaryIkTarget>,
    activate_grounding: bool,
    idle_constraints: Vec<FootConstraint>,
    rng: StdRng,
    target_projection_len: f32,
    play: bool,
    speed: f32,
    last_planner_event: Option<PlannerEvent>,
}

pub struct MorphableGraphStateMachine {
    graph: Arc<MotionGraph>,
    skeleton: Arc<Skeleton>,
    settings: Arc<MgSettings>,
    planner: StatePlanner,
    shared: Mutex<OrchestratorState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: Receiver<PlannerEvent>,
    start_node: GraphNodeId,
    start_node_type: NodeType,
    scene: Arc<dyn SceneInterface>,
    grounding: MotionGrounding,
    foot_constraint_generator: FootplantConstraintGenerator,
}

impl std::fmt::Debug for MorphableGraphStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MorphableGraphStateMachine")
            .field("start_node", &self.start_node)
            .field("planner", &self.planner)
            .finish()
    }
}

impl MorphableGraphStateMachine {
    pub fn new(graph: Arc<MotionGraph>, settings: MgSettings, scene: Arc<dyn SceneInterface>) -> MotionResult<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let skeleton = graph.skeleton().clone();
        let ik: Arc<dyn InverseKinematics> = skeleton.clone();
        let pool = SamplingPool::new(settings.concurrency.clone())?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let planner = StatePlanner::new(graph.clone(), settings.clone(), Arc::new(pool), tx);

        let start_node = graph.start_node().clone();
        let start_node_type = NodeType::Idle;
        let mut rng = match settings.planner.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let initial_pose_buffer = graph.node(&start_node)?.sample_clip(&mut rng)?.into_frames();
        let state = MotionState::new(MotionClip::new(initial_pose_buffer.clone(), skeleton.frame_time()))?;
        let global_position = initial_pose_buffer
            .first()
            .map(|f| frame::root_position(f))
            .unwrap_or(Vec3::ZERO);
        let global_orientation = initial_pose_buffer
            .first()
            .map(|f| frame::root_orientation(f))
            .unwrap_or(Quat::IDENTITY);
        let state_machine = MotionStateMachine::new(
            skeleton.clone(),
            Box::new(state),
            start_node.clone(),
            start_node_type,
            settings.state_machine.buffer_size,
        );

        let grounding = MotionGrounding::new(skeleton.clone(), ik, &settings.ik, &settings.footplant);
        let foot_constraint_generator =
            FootplantConstraintGenerator::new(skeleton.clone(), settings.footplant.clone(), scene.clone());
        let contact_joints = foot_constraint_generator.contact_joints().to_vec();
        let idle_constraints =
            foot_constraint_generator.generate_grounding_constraints(&initial_pose_buffer, 0, &contact_joints)?;
        let activate_grounding = settings.activate_grounding && !contact_joints.is_empty();
        if settings.activate_grounding && !activate_grounding {
            warn!("Grounding disabled: skeleton has no ankle joints");
        }

        info!(
            "Morphable graph state machine ready: start node {}, {} actions",
            start_node,
            planner.action_definitions().len()
        );
        let shared = OrchestratorState {
            state_machine,
            initial_pose_buffer,
            global_position,
            global_orientation,
            stop_current_state: false,
            secondary_ik_target: None,
            activate_grounding,
            idle_constraints,
            rng,
            target_projection_len: 0.0,
            play: true,
            speed: settings.state_machine.speed,
            last_planner_event: None,
        };
        Ok(Self {
            graph,
            skeleton,
            settings,
            planner,
            shared: Mutex::new(shared),
            worker: Mutex::new(None),
            events: rx,
            start_node,
            start_node_type,
            scene,
            grounding,
            foot_constraint_generator,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn graph(&self) -> &Arc<MotionGraph> {
        &self.graph
    }

    pub fn settings(&self) -> &MgSettings {
        &self.settings
    }

    pub fn start_node(&self) -> &GraphNodeId {
        &self.start_node
    }

    /// Advance playback by `dt` and hand over to the next state when due
    pub fn update(&self, dt: f32) -> MotionResult<()> {
        let events: Vec<PlannerEvent> = self.events.try_iter().collect();
        for event in &events {
            match event {
                PlannerEvent::Finished { n_states } => debug!("Planner queued {} states", n_states),
                PlannerEvent::Cancelled => debug!("Planner was cancelled"),
                PlannerEvent::Failed { reason } => warn!("Planner gave up: {}", reason),
            }
        }

        let mut shared = self.lock_state();
        if let Some(event) = events.into_iter().last() {
            shared.last_planner_event = Some(event);
        }
        if !shared.play {
            return Ok(());
        }
        let speed = shared.speed;
        let transition = shared.state_machine.update(speed * dt);
        let queue_ready = !self.planner.queue().is_empty();

        if transition || (shared.stop_current_state && queue_ready) {
            if self.planner.is_processing() || queue_ready {
                drop(shared);
                let result = self.wait_for_planner();
                shared = self.lock_state();
                let entry = match result {
                    Ok(entry) => entry,
                    Err(MotionError::PlannerStarved { attempts }) => {
                        warn!("Transition to idle state after {} empty queue queries", attempts);
                        let fallback = shared.state_machine.get_pose(None);
                        StateQueueEntry::idle(
                            &shared.state_machine.pose_buffer(),
                            &fallback,
                            self.skeleton.frame_time(),
                            self.settings.state_machine.idle_fallback_duration,
                            self.start_node.clone(),
                        )
                    }
                    Err(e) => return Err(e),
                };
                debug!("Hand-off to {} ({})", entry.node, entry.node_type);
                let play = shared.play;
                shared.state_machine.set_state_entry(entry);
                shared.state_machine.set_play(play);
                shared.stop_current_state = false;
            } else {
                self.transition_to_next_state_controlled(&mut shared)?;
            }
        }
        shared.state_machine.update_transformation();
        Ok(())
    }

    /// Poll the queue at most `n_max_state_queries` times
    pub fn wait_for_planner(&self) -> MotionResult<StateQueueEntry> {
        let attempts = self.settings.state_machine.n_max_state_queries;
        let interval = Duration::from_millis(self.settings.state_machine.state_query_interval_ms);
        for attempt in 0..attempts {
            if let Some(entry) = self.planner.queue().pop_first() {
                return Ok(entry);
            }
            if attempt + 1 < attempts {
                thread::sleep(interval);
            }
        }
        Err(MotionError::PlannerStarved { attempts })
    }

    fn root_heading(&self) -> Vec3 {
        let pose = self.lock_state().state_machine.get_pose(None);
        frame::root_orientation(&pose) * Vec3::Z
    }

    /// Validate one descriptor against the graph and the current root heading
    pub fn generate_action_constraints(&self, desc: &ActionDescriptor) -> MotionResult<ActionConstraints> {
        let constraints = desc.validate(self.root_heading(), self.settings.planner.max_steps)?;
        let actions = self.planner.action_definitions();
        let mut required = vec![constraints.action_name.as_str()];
        if let Some(gesture) = &constraints.upper_body_gesture {
            required.push(gesture);
        }
        if constraints.trajectory.is_some() {
            required.push(&self.settings.planner.locomotion_action);
        }
        if let Some(missing) = required.into_iter().find(|name| !actions.contains_key(*name)) {
            return Err(MotionError::UnknownAction {
                name: missing.to_string(),
            });
        }
        Ok(constraints)
    }

    /// Replace any running plan with one for `action_sequence`
    pub fn enqueue_states(&self, action_sequence: &[ActionDescriptor], dt: f32, refresh: bool) -> MotionResult<()> {
        let actions = action_sequence
            .iter()
            .map(|desc| self.generate_action_constraints(desc))
            .collect::<MotionResult<Vec<_>>>()?;
        let names: Vec<&str> = actions.iter().map(|a| a.action_name.as_str()).collect();
        info!("Enqueue states for {:?} (refresh: {})", names, refresh);

        self.stop_worker();
        let (start_node, start_node_type, pose_buffer) = {
            let mut shared = self.lock_state();
            if refresh {
                let state = MotionState::new(MotionClip::new(
                    shared.initial_pose_buffer.clone(),
                    self.skeleton.frame_time(),
                ))?;
                let play = shared.play;
                shared.state_machine.reset(Box::new(state), self.start_node.clone(), self.start_node_type);
                shared.state_machine.set_play(play);
                shared.stop_current_state = true;
                (
                    self.start_node.clone(),
                    self.start_node_type,
                    shared.initial_pose_buffer.clone(),
                )
            } else {
                // the current state plays to its end before the first queued state takes over
                let mut pose_buffer = shared.state_machine.state_tail();
                if pose_buffer.is_empty() {
                    pose_buffer.push(shared.state_machine.get_pose(None));
                }
                (
                    shared.state_machine.current_node.clone(),
                    shared.state_machine.node_type,
                    pose_buffer,
                )
            }
        };

        self.planner.queue().reset();
        self.planner.clear_stop();
        self.planner.set_processing(true);
        match self
            .planner
            .spawn(actions, start_node, start_node_type, pose_buffer, dt)
        {
            Ok(handle) => {
                *self.lock_worker() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.planner.set_processing(false);
                Err(e)
            }
        }
    }

    /// Cooperative stop of the planner thread followed by a join
    pub fn stop_worker(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            debug!("Stopping planner thread");
            self.planner.request_stop();
            if handle.join().is_err() {
                error!("Planner thread panicked while stopping");
            }
            self.planner.set_processing(false);
        }
        self.planner.clear_stop();
    }

    fn transition_to_next_state_controlled(&self, shared: &mut OrchestratorState) -> MotionResult<()> {
        let (next, next_type) = self.select_next_node(
            &shared.state_machine.current_node,
            shared.state_machine.node_type,
            shared.target_projection_len,
            &mut shared.rng,
        );
        let pose_buffer = shared.state_machine.pose_buffer();
        let mut state = self.planner.build_state(&next, &pose_buffer, &mut shared.rng)?;
        state.set_play(shared.play);
        debug!("Random walk to {} ({})", next, next_type);
        shared.state_machine.set_state(Box::new(state), next, next_type);
        Ok(())
    }

    /// Successor for uncontrolled playback, the start node when the graph has none
    pub fn select_next_node(
        &self,
        current: &GraphNodeId,
        current_type: NodeType,
        step_distance: f32,
        rng: &mut StdRng,
    ) -> (GraphNodeId, NodeType) {
        let next_type = self.planner.get_next_node_type(current_type, step_distance);
        match self.graph.generate_random_transition(current, next_type, rng) {
            Some(node) => (node, next_type),
            None => (self.start_node.clone(), self.start_node_type),
        }
    }

    /// Stop planning, drop queued states and return to the start idle
    pub fn reset_planner(&self) -> MotionResult<()> {
        debug!("Reset planner");
        self.stop_worker();
        self.planner.set_processing(false);
        self.planner.queue().reset();
        let mut shared = self.lock_state();
        let state = MotionState::new(MotionClip::new(
            shared.initial_pose_buffer.clone(),
            self.skeleton.frame_time(),
        ))?;
        let play = shared.play;
        shared.state_machine.reset(Box::new(state), self.start_node.clone(), self.start_node_type);
        shared.state_machine.set_play(play);
        Ok(())
    }

    /// Full reset used for aborts and disposal
    pub fn reset(&self) -> MotionResult<()> {
        self.reset_planner()?;
        let mut shared = self.lock_state();
        shared.stop_current_state = false;
        shared.secondary_ik_target = None;
        Ok(())
    }

    pub fn set_secondary_ik_target(
        &self,
        joint: &str,
        position: Vec3,
        orientation: Option<Quat>,
        chain_end: Option<String>,
        look_at: bool,
    ) -> MotionResult<()> {
        let mut target = SecondaryIkTarget::new(
            self.skeleton.clone(),
            self.skeleton.clone(),
            joint,
            position,
            orientation,
            chain_end,
            &self.settings.ik,
        )?;
        if look_at {
            target.set_look_at(self.planner.look_at_dir());
        }
        debug!("Secondary IK target for {} at {:?}", joint, position);
        self.lock_state().secondary_ik_target = Some(target);
        Ok(())
    }

    /// Keep `joint` at its played-back pose while the secondary target is active
    pub fn preserve_secondary_chain(&self, joint: &str, chain_end: Option<String>) -> MotionResult<()> {
        match self.lock_state().secondary_ik_target.as_mut() {
            Some(target) => target.preserve_chain(joint, chain_end),
            None => Ok(()),
        }
    }

    pub fn remove_secondary_ik_target(&self) {
        self.lock_state().secondary_ik_target = None;
    }

    pub fn has_secondary_ik_target(&self) -> bool {
        self.lock_state().secondary_ik_target.is_some()
    }

    pub fn reached_secondary_ik_target(&self) -> bool {
        self.lock_state()
            .secondary_ik_target
            .as_ref()
            .map(|t| t.has_reached())
            .unwrap_or(true)
    }

    /// Playback pose, then the secondary target, then grounding
    pub fn get_pose(&self, frame_idx: Option<usize>) -> MotionResult<Frame> {
        let mut shared = self.lock_state();
        let mut pose = shared.state_machine.get_pose(frame_idx);
        if let Some(target) = shared.secondary_ik_target.as_mut() {
            pose = target.reach(&pose)?;
        }
        if shared.activate_grounding {
            pose = self
                .grounding
                .apply_on_frame(&pose, &shared.idle_constraints, self.scene.as_ref())?;
        }
        Ok(pose)
    }

    pub fn get_current_frame(&self) -> MotionResult<Frame> {
        self.get_pose(None)
    }

    pub fn set_global_position(&self, position: Vec3) {
        let latest = {
            let mut shared = self.lock_state();
            shared.global_position = position;
            for pose in shared.initial_pose_buffer.iter_mut() {
                frame::set_root_position(pose, position);
            }
            shared.state_machine.set_global_position(position);
            shared.state_machine.pose_buffer().pop()
        };
        if let Some(latest) = latest {
            assert!(!frame::has_non_finite(&latest), "Error in set pos {:?}", position);
        }
    }

    pub fn set_global_orientation(&self, orientation: Quat) {
        let latest = {
            let mut shared = self.lock_state();
            shared.global_orientation = orientation;
            for pose in shared.initial_pose_buffer.iter_mut() {
                frame::set_root_orientation(pose, orientation);
            }
            shared.state_machine.set_global_orientation(orientation);
            shared.state_machine.pose_buffer().pop()
        };
        if let Some(latest) = latest {
            assert!(!frame::has_non_finite(&latest), "Error in set orientation {:?}", orientation);
        }
    }

    pub fn global_position(&self) -> Vec3 {
        self.lock_state().global_position
    }

    pub fn global_orientation(&self) -> Quat {
        self.lock_state().global_orientation
    }

    pub fn update_idle_foot_grounding_constraints(&self) -> MotionResult<()> {
        let mut shared = self.lock_state();
        let constraints = self.foot_constraint_generator.generate_grounding_constraints(
            &shared.initial_pose_buffer,
            0,
            self.foot_constraint_generator.contact_joints(),
        )?;
        shared.idle_constraints = constraints;
        Ok(())
    }

    pub fn set_activate_grounding(&self, active: bool) {
        let has_contacts = !self.foot_constraint_generator.contact_joints().is_empty();
        self.lock_state().activate_grounding = active && has_contacts;
    }

    pub fn is_planner_active(&self) -> bool {
        self.planner.is_processing() || !self.planner.queue().is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.lock_state().state_machine.node_type == NodeType::Idle
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().state_machine.is_paused()
    }

    pub fn unpause(&self) {
        self.lock_state().state_machine.unpause();
    }

    pub fn set_play(&self, play: bool) {
        let mut shared = self.lock_state();
        shared.play = play;
        shared.state_machine.set_play(play);
    }

    pub fn set_speed(&self, speed: f32) {
        self.lock_state().speed = speed;
    }

    pub fn set_target_projection_len(&self, len: f32) {
        self.lock_state().target_projection_len = len;
    }

    pub fn update_transformation(&self) {
        self.lock_state().state_machine.update_transformation();
    }

    pub fn get_position(&self) -> Vec3 {
        self.lock_state().state_machine.get_position()
    }

    pub fn get_global_transformation(&self) -> Mat4 {
        self.lock_state().state_machine.get_global_transformation()
    }

    pub fn get_n_frames(&self) -> usize {
        self.lock_state().state_machine.n_frames()
    }

    pub fn get_frame_time(&self) -> f32 {
        self.lock_state().state_machine.frame_time()
    }

    pub fn get_current_frame_idx(&self) -> usize {
        self.lock_state().state_machine.current_frame_idx()
    }

    /// Current node identity and type
    pub fn current_node(&self) -> (GraphNodeId, NodeType) {
        let shared = self.lock_state();
        (shared.state_machine.current_node.clone(), shared.state_machine.node_type)
    }

    pub fn queued_states(&self) -> usize {
        self.planner.queue().len()
    }

    /// Queue polls made so far by hand-offs and `wait_for_planner`
    pub fn state_queue_polls(&self) -> usize {
        self.planner.queue().poll_count()
    }

    pub fn last_planner_event(&self) -> Option<PlannerEvent> {
        self.lock_state().last_planner_event.clone()
    }

    pub fn get_actions(&self) -> Vec<String> {
        self.planner.action_definitions().keys().cloned().collect()
    }
}

impl Drop for MorphableGraphStateMachine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::demo;
    use crate::planner::FrameConstraintDesc;

    fn machine(settings: MgSettings) -> MorphableGraphStateMachine {
        let graph = Arc::new(demo::build_demo_graph().unwrap());
        MorphableGraphStateMachine::new(graph, settings, Arc::new(FlatGround::new(0.0))).unwrap()
    }

    fn seeded() -> MgSettings {
        let mut settings = MgSettings::default();
        settings.planner.seed = Some(11);
        settings.planner.n_random_samples = 8;
        settings.concurrency.job_threads = 2;
        settings
    }

    #[test]
    fn test_starts_idle_at_start_node() {
        let sm = machine(seeded());
        assert!(sm.is_idle());
        assert_eq!(sm.current_node().0, GraphNodeId::new("idle", "idle"));
        assert!(!sm.is_planner_active());
        assert!(sm.reached_secondary_ik_target());
    }

    #[test]
    fn test_wait_for_planner_is_bounded() {
        let mut settings = seeded();
        settings.state_machine.n_max_state_queries = 3;
        settings.state_machine.state_query_interval_ms = 5;
        let sm = machine(settings);
        let before = sm.state_queue_polls();
        let start = std::time::Instant::now();
        match sm.wait_for_planner() {
            Err(MotionError::PlannerStarved { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected starvation, got {:?}", other.map(|e| e.node)),
        }
        let elapsed = start.elapsed();
        assert_eq!(sm.state_queue_polls() - before, 3);
        // two sleeps between three polls, none after the last
        assert!(elapsed >= Duration::from_millis(10), "returned after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_for_planner_returns_on_first_hit() {
        let mut settings = seeded();
        settings.state_machine.n_max_state_queries = 5;
        let sm = machine(settings);
        let pose = sm.get_pose(None).unwrap();
        sm.planner
            .queue()
            .push(StateQueueEntry::idle(&[], &pose, demo::FRAME_TIME, 0.5, GraphNodeId::new("idle", "idle")));
        let before = sm.state_queue_polls();
        assert!(sm.wait_for_planner().is_ok());
        assert_eq!(sm.state_queue_polls() - before, 1);
    }

    #[test]
    fn test_oversized_step_count_is_rejected_before_planning() {
        let sm = machine(seeded());
        let walk = ActionDescriptor::new("walk").with_steps(0.0, 1 << 40, 0.5);
        let result = sm.enqueue_states(&[walk], demo::FRAME_TIME, false);
        assert!(matches!(result, Err(MotionError::InvalidAction { .. })));
        assert!(!sm.is_planner_active());
        assert!(sm.is_idle());
    }

    #[test]
    fn test_starved_update_substitutes_idle() {
        let mut settings = seeded();
        settings.state_machine.n_max_state_queries = 2;
        settings.state_machine.state_query_interval_ms = 1;
        let sm = machine(settings);
        sm.planner.set_processing(true);
        let n = sm.get_n_frames();
        for _ in 0..=n {
            sm.update(demo::FRAME_TIME).unwrap();
        }
        assert!(sm.is_idle());
        assert_eq!(sm.get_n_frames(), 1);
        sm.planner.set_processing(false);
    }

    #[test]
    fn test_random_walk_continues_without_planner() {
        let sm = machine(seeded());
        for _ in 0..200 {
            sm.update(demo::FRAME_TIME).unwrap();
        }
        let pose = sm.get_pose(None).unwrap();
        assert!(frame::quaternions_normalized(&pose, 1e-5));
        assert!(!frame::has_non_finite(&pose));
    }

    #[test]
    fn test_set_global_position_round_trip() {
        let sm = machine(seeded());
        sm.update(demo::FRAME_TIME).unwrap();
        let p = Vec3::new(1.5, 0.0, -2.0);
        sm.set_global_position(p);
        sm.update_transformation();
        assert!((sm.get_position() - p).length() < 1e-5);
        assert_eq!(sm.global_position(), p);
    }

    #[test]
    fn test_refresh_snaps_to_start_node() {
        let sm = machine(seeded());
        let target = Vec3::new(-0.3, 1.2, 0.4);
        let action = ActionDescriptor::new("reachRight")
            .with_frame_constraints(vec![FrameConstraintDesc::new("contact0", "RightHand", target)]);
        sm.enqueue_states(&[action], demo::FRAME_TIME, true).unwrap();
        assert_eq!(sm.current_node(), (GraphNodeId::new("idle", "idle"), NodeType::Idle));
        sm.stop_worker();
    }

    #[test]
    fn test_unknown_action_is_rejected_before_planning() {
        let sm = machine(seeded());
        let result = sm.enqueue_states(&[ActionDescriptor::new("fly")], demo::FRAME_TIME, false);
        assert!(matches!(result, Err(MotionError::UnknownAction { .. })));
        assert!(!sm.is_planner_active());
    }

    #[test]
    fn test_remove_secondary_target_restores_playback_pose() {
        let sm = machine(seeded());
        let plain = sm.get_pose(None).unwrap();
        sm.set_secondary_ik_target("RightHand", Vec3::new(-0.4, 1.2, 0.3), None, None, false)
            .unwrap();
        let reached = sm.get_pose(None).unwrap();
        assert_ne!(plain, reached);
        sm.remove_secondary_ik_target();
        assert_eq!(sm.get_pose(None).unwrap(), plain);
        assert!(sm.reached_secondary_ik_target());
    }

    #[test]
    fn test_reset_returns_to_idle_and_clears_queue() {
        let sm = machine(seeded());
        let action = ActionDescriptor::new("reachLeft")
            .with_frame_constraints(vec![FrameConstraintDesc::new("contact0", "LeftHand", Vec3::new(0.3, 1.2, 0.4))]);
        sm.enqueue_states(&[action], demo::FRAME_TIME, false).unwrap();
        sm.reset().unwrap();
        assert!(!sm.is_planner_active());
        assert_eq!(sm.queued_states(), 0);
        assert!(sm.is_idle());
    }
}
