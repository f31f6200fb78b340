//! Background state planner
//!
//! A [`StatePlanner`] turns validated action constraints into playable
//! states. It runs on a dedicated worker thread spawned per instruction,
//! samples the graph, aligns each clip to the pose history, applies keyframe
//! IK and pushes the result into the shared [`StateQueue`]. Cancellation is
//! cooperative: the stop flag is checked before and after every node sample.

pub mod actions;
pub mod alignment;
pub mod queue;

pub use actions::{ActionConstraints, ActionDescriptor, FrameConstraint, FrameConstraintDesc, Trajectory};
pub use queue::{StateQueue, StateQueueEntry};

use crate::animation::frame::{self, quaternion_offset, Frame, MotionClip};
use crate::animation::ik::{InverseKinematics, KeyframeConstraint};
use crate::animation::motion_state::{MotionState, MotionStateInterface};
use crate::config::{MgSettings, SamplingPool};
use crate::error::{MotionError, MotionResult};
use crate::graph::{ActionDefinition, GraphNode, GraphNodeId, MotionGraph, MotionSample, NodeType};
use crate::utils::math::slerp_slot;
use alignment::RootAlignment;
use crossbeam_channel::Sender;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Notifications from the worker to the foreground thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerEvent {
    /// Every action was planned and `n_states` entries were queued
    Finished { n_states: usize },
    /// The stop flag was raised before planning completed
    Cancelled,
    /// Planning returned an error or the worker panicked
    Failed { reason: String },
}

/// Node, type and pose history the next planned state continues from
#[derive(Debug, Clone)]
struct PlanningContext {
    node: GraphNodeId,
    node_type: NodeType,
    pose_buffer: Vec<Frame>,
    n_states: usize,
}

impl PlanningContext {
    fn anchor(&self) -> Option<&Frame> {
        self.pose_buffer.last()
    }

    fn root_position(&self) -> Vec3 {
        self.anchor().map(|f| frame::root_position(f)).unwrap_or(Vec3::ZERO)
    }
}

/// Constraint resolved against one node's keyframes
#[derive(Debug, Clone)]
struct ResolvedConstraint {
    ik: KeyframeConstraint,
    hold: bool,
    look_at: bool,
}

#[derive(Clone)]
pub struct StatePlanner {
    graph: Arc<MotionGraph>,
    ik: Arc<dyn InverseKinematics>,
    settings: Arc<MgSettings>,
    pool: Arc<SamplingPool>,
    queue: Arc<StateQueue>,
    stop_thread: Arc<AtomicBool>,
    is_processing: Arc<AtomicBool>,
    events: Sender<PlannerEvent>,
    action_definitions: Arc<BTreeMap<String, ActionDefinition>>,
}

impl std::fmt::Debug for StatePlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePlanner")
            .field("queued", &self.queue.len())
            .field("is_processing", &self.is_processing())
            .field("actions", &self.action_definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StatePlanner {
    pub fn new(
        graph: Arc<MotionGraph>,
        settings: Arc<MgSettings>,
        pool: Arc<SamplingPool>,
        events: Sender<PlannerEvent>,
    ) -> Self {
        let ik: Arc<dyn InverseKinematics> = graph.skeleton().clone();
        let action_definitions = Arc::new(graph.action_definitions());
        Self {
            graph,
            ik,
            settings,
            pool,
            queue: Arc::new(StateQueue::new()),
            stop_thread: Arc::new(AtomicBool::new(false)),
            is_processing: Arc::new(AtomicBool::new(false)),
            events,
            action_definitions,
        }
    }

    pub fn queue(&self) -> &Arc<StateQueue> {
        &self.queue
    }

    pub fn action_definitions(&self) -> &BTreeMap<String, ActionDefinition> {
        &self.action_definitions
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    pub fn set_processing(&self, processing: bool) {
        self.is_processing.store(processing, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_thread.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop_thread.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_thread.load(Ordering::SeqCst)
    }

    fn check_stop(&self) -> MotionResult<()> {
        if self.stop_requested() {
            return Err(MotionError::Cancelled);
        }
        Ok(())
    }

    pub fn look_at_dir(&self) -> Vec3 {
        Vec3::from(self.settings.planner.look_at_dir)
    }

    /// Type of the node following `current` given the remaining walk distance
    pub fn get_next_node_type(&self, current: NodeType, distance: f32) -> NodeType {
        match current {
            NodeType::Start | NodeType::Standard => {
                if distance > self.settings.state_machine.max_step_length {
                    NodeType::Standard
                } else {
                    NodeType::End
                }
            }
            NodeType::End | NodeType::Idle => NodeType::Idle,
        }
    }

    fn new_rng(&self) -> StdRng {
        match self.settings.planner.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Start a worker that fills the queue for `actions`
    pub fn spawn(
        &self,
        actions: Vec<ActionConstraints>,
        start_node: GraphNodeId,
        start_node_type: NodeType,
        pose_buffer: Vec<Frame>,
        dt: f32,
    ) -> MotionResult<JoinHandle<()>> {
        let planner = self.clone();
        thread::Builder::new()
            .name("mg-state-planner".to_string())
            .spawn(move || planner.run(actions, start_node, start_node_type, pose_buffer, dt))
            .map_err(|e| MotionError::Worker {
                reason: format!("Failed to spawn planner thread: {}", e),
            })
    }

    /// Worker body; every failure stays inside the thread
    fn run(
        &self,
        actions: Vec<ActionConstraints>,
        start_node: GraphNodeId,
        start_node_type: NodeType,
        pose_buffer: Vec<Frame>,
        dt: f32,
    ) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.generate_motion_states_from_action_sequence(&actions, start_node, start_node_type, pose_buffer, dt)
        }));
        let event = match result {
            Ok(Ok(n_states)) => {
                info!("Planner finished with {} queued states", n_states);
                PlannerEvent::Finished { n_states }
            }
            Ok(Err(MotionError::Cancelled)) => {
                debug!("Planner cancelled");
                PlannerEvent::Cancelled
            }
            Ok(Err(e)) => {
                error!("Planner failed: {}", e);
                PlannerEvent::Failed { reason: e.to_string() }
            }
            Err(_) => {
                error!("Planner worker panicked");
                PlannerEvent::Failed {
                    reason: "planner worker panicked".to_string(),
                }
            }
        };
        self.set_processing(false);
        let _ = self.events.send(event);
    }

    /// Plan every action in order and queue the resulting states
    pub fn generate_motion_states_from_action_sequence(
        &self,
        actions: &[ActionConstraints],
        start_node: GraphNodeId,
        start_node_type: NodeType,
        pose_buffer: Vec<Frame>,
        dt: f32,
    ) -> MotionResult<usize> {
        debug!(
            "Planning {} action(s) from {} ({}), dt {:.4}",
            actions.len(),
            start_node,
            start_node_type,
            dt
        );
        let mut rng = self.new_rng();
        let mut ctx = PlanningContext {
            node: start_node,
            node_type: start_node_type,
            pose_buffer,
            n_states: 0,
        };

        for action in actions {
            self.check_stop()?;
            let gesture = self.sample_gesture(action, &mut rng)?;
            let is_locomotion = action.action_name == self.settings.planner.locomotion_action;
            if let Some(trajectory) = &action.trajectory {
                self.plan_locomotion(&mut ctx, action, trajectory, gesture.as_deref(), &mut rng)?;
            }
            if !(is_locomotion && action.trajectory.is_some()) {
                self.plan_action_nodes(&mut ctx, action, gesture.as_deref(), &mut rng)?;
            }
        }
        Ok(ctx.n_states)
    }

    fn action_definition(&self, name: &str) -> MotionResult<&ActionDefinition> {
        self.action_definitions
            .get(name)
            .ok_or_else(|| MotionError::UnknownAction { name: name.to_string() })
    }

    fn plan_action_nodes(
        &self,
        ctx: &mut PlanningContext,
        action: &ActionConstraints,
        gesture: Option<&[Frame]>,
        rng: &mut StdRng,
    ) -> MotionResult<()> {
        let definition = self.action_definition(&action.action_name)?;
        for node_id in definition.node_sequence(action.n_cycles) {
            self.check_stop()?;
            let node = self.graph.node(&node_id)?;
            let constraints = self.resolve_constraints(node, action);
            let mut frames = self.sample_constrained(node, &constraints, ctx.anchor(), None, rng)?;
            self.check_stop()?;

            if let Some(gesture) = gesture {
                self.overlay_upper_body(&mut frames, gesture)?;
            }
            self.apply_constraints(&mut frames, &constraints)?;
            if action.wants_look_at() {
                self.apply_look_at(&mut frames, &constraints)?;
            }
            let holds = constraints
                .iter()
                .filter(|c| c.hold)
                .map(|c| c.ik.frame_idx)
                .collect();
            self.push_state(ctx, frames, node, holds, action.velocity_factor)?;
        }
        Ok(())
    }

    fn plan_locomotion(
        &self,
        ctx: &mut PlanningContext,
        action: &ActionConstraints,
        trajectory: &Trajectory,
        gesture: Option<&[Frame]>,
        rng: &mut StdRng,
    ) -> MotionResult<()> {
        let definition = self.action_definition(&self.settings.planner.locomotion_action)?;
        let max_states = self.settings.planner.max_steps;
        let waypoints = trajectory.waypoints(ctx.root_position(), max_states);
        let Some(&final_target) = waypoints.last() else {
            return Ok(());
        };
        let max_step = self.settings.state_machine.max_step_length;
        let mut waypoint_idx = 0;
        let mut next = definition
            .start
            .first()
            .or_else(|| definition.standard.first())
            .cloned();

        let mut n_planned = 0;
        while let Some(node_id) = next.take() {
            self.check_stop()?;
            if n_planned >= max_states {
                warn!("Locomotion toward {:?} stopped after {} states", final_target, n_planned);
                break;
            }
            let node = self.graph.node(&node_id)?;
            let target = waypoints[waypoint_idx];
            let mut frames = self.sample_constrained(node, &[], ctx.anchor(), Some(target), rng)?;
            self.check_stop()?;
            if let Some(gesture) = gesture {
                self.overlay_upper_body(&mut frames, gesture)?;
            }
            self.push_state(ctx, frames, node, Vec::new(), action.velocity_factor)?;
            n_planned += 1;
            if node.node_type == NodeType::End {
                break;
            }

            while waypoint_idx + 1 < waypoints.len()
                && horizontal_distance(ctx.root_position(), waypoints[waypoint_idx]) < max_step
            {
                waypoint_idx += 1;
            }
            let remaining = if waypoint_idx + 1 < waypoints.len() {
                f32::INFINITY
            } else {
                horizontal_distance(ctx.root_position(), final_target)
            };
            next = match self.get_next_node_type(node.node_type, remaining) {
                NodeType::Standard if !definition.standard.is_empty() => {
                    let idx = rng.random_range(0..definition.standard.len());
                    Some(definition.standard[idx].clone())
                }
                NodeType::Standard | NodeType::End => definition.end.first().cloned(),
                NodeType::Start | NodeType::Idle => None,
            };
        }
        debug!("Planned {} locomotion states toward {:?}", n_planned, final_target);
        Ok(())
    }

    fn resolve_constraints(&self, node: &GraphNode, action: &ActionConstraints) -> Vec<ResolvedConstraint> {
        action
            .frame_constraints
            .iter()
            .filter_map(|c| {
                let frame_idx = node.keyframe(&c.keyframe)?;
                Some(ResolvedConstraint {
                    ik: KeyframeConstraint::new(frame_idx, &c.joint, c.position, c.orientation)
                        .with_chain_end(c.chain_end.clone()),
                    hold: c.hold,
                    look_at: c.look_at,
                })
            })
            .collect()
    }

    /// Pick the best of `n_random_samples` candidates and return its aligned frames
    fn sample_constrained(
        &self,
        node: &GraphNode,
        constraints: &[ResolvedConstraint],
        anchor: Option<&Frame>,
        root_target: Option<Vec3>,
        rng: &mut StdRng,
    ) -> MotionResult<Vec<Frame>> {
        let unconstrained = constraints.is_empty() && root_target.is_none();
        let sample = if unconstrained || node.primitive.n_examples() == 1 {
            node.sample(rng)
        } else {
            let n_samples = self.settings.planner.n_random_samples.max(1);
            let candidates: Vec<MotionSample> = (0..n_samples).map(|_| node.sample(rng)).collect();
            let best = self
                .pool
                .argmin_by_score(&candidates, |s| {
                    self.score_sample(node, s, constraints, anchor, root_target)
                        .unwrap_or(f32::INFINITY)
                })
                .unwrap_or(0);
            candidates.into_iter().nth(best).unwrap_or_else(|| node.sample(rng))
        };

        let mut frames = node.back_project(&sample)?.into_frames();
        if let (Some(anchor), Some(last)) = (anchor, frames.last().cloned()) {
            let alignment = self.alignment_for(node, &frames[0], &last, anchor, root_target);
            alignment.apply(&mut frames);
            alignment::smooth_transition(&mut frames, anchor, self.settings.planner.transition_window);
        }
        Ok(frames)
    }

    fn alignment_for(
        &self,
        node: &GraphNode,
        first: &[f32],
        last: &[f32],
        anchor: &[f32],
        root_target: Option<Vec3>,
    ) -> RootAlignment {
        let ignore_rotation = node.node_type == NodeType::Idle && self.settings.planner.ignore_idle_rotation;
        let alignment = RootAlignment::to_anchor(first, anchor, ignore_rotation);
        match root_target {
            Some(target) => alignment.heading_toward(first, last, target),
            None => alignment,
        }
    }

    /// Summed position error of a candidate at its constrained frames
    fn score_sample(
        &self,
        node: &GraphNode,
        sample: &MotionSample,
        constraints: &[ResolvedConstraint],
        anchor: Option<&Frame>,
        root_target: Option<Vec3>,
    ) -> MotionResult<f32> {
        let first = node.primitive.back_project_frame(sample, 0)?;
        let last = node
            .primitive
            .back_project_frame(sample, node.primitive.n_frames().saturating_sub(1))?;
        let alignment = match anchor {
            Some(anchor) => self.alignment_for(node, &first, &last, anchor, root_target),
            None => RootAlignment::default(),
        };
        let skeleton = self.graph.skeleton();
        let mut error = 0.0;
        for c in constraints {
            let f = alignment.transformed(&node.primitive.back_project_frame(sample, c.ik.frame_idx)?);
            error += (skeleton.global_position(&f, &c.ik.joint)? - c.ik.position).length();
        }
        if let Some(target) = root_target {
            let end = frame::root_position(&alignment.transformed(&last));
            error += horizontal_distance(end, target);
        }
        Ok(error)
    }

    /// Solve every constraint at its keyframe and spread the correction
    fn apply_constraints(&self, frames: &mut [Frame], constraints: &[ResolvedConstraint]) -> MotionResult<()> {
        for c in constraints {
            let Some(original) = frames.get(c.ik.frame_idx).cloned() else {
                continue;
            };
            let corrected = self.ik.reach_target_position(
                &original,
                &c.ik,
                self.settings.ik.max_ik_iter,
                c.ik.chain_end.as_deref(),
            )?;
            alignment::apply_keyframe_correction(
                frames,
                c.ik.frame_idx,
                &original,
                &corrected,
                self.settings.planner.interpolation_window,
            );
        }
        Ok(())
    }

    /// Turn the head toward the first constraint around its keyframe
    fn apply_look_at(&self, frames: &mut [Frame], constraints: &[ResolvedConstraint]) -> MotionResult<()> {
        let skeleton = self.graph.skeleton();
        let Some(head) = skeleton.model_joint("head") else {
            return Ok(());
        };
        let Some(head_offset) = skeleton.quaternion_offset_of(head)? else {
            return Ok(());
        };
        let Some(target) = constraints.iter().find(|c| c.look_at).or(constraints.first()) else {
            return Ok(());
        };
        let window = self.settings.planner.interpolation_window;
        let keyframe = target.ik.frame_idx;
        let start = keyframe.saturating_sub(window);
        let end = (keyframe + window).min(frames.len().saturating_sub(1));
        for idx in start..=end {
            let weight = 1.0 - idx.abs_diff(keyframe) as f32 / (window as f32 + 1.0);
            let looked = self
                .ik
                .look_at(&frames[idx], head, target.ik.position, 1e-4, 2, self.look_at_dir())?;
            slerp_slot(&mut frames[idx], &looked, head_offset, weight);
        }
        Ok(())
    }

    /// Frames of the gesture action's first node, if the action asks for one
    fn sample_gesture(&self, action: &ActionConstraints, rng: &mut StdRng) -> MotionResult<Option<Vec<Frame>>> {
        let Some(name) = &action.upper_body_gesture else {
            return Ok(None);
        };
        let definition = self.action_definition(name)?;
        let Some(node_id) = definition.node_sequence(0).into_iter().next() else {
            return Ok(None);
        };
        let clip = self.graph.node(&node_id)?.sample_clip(rng)?;
        Ok(Some(clip.into_frames()))
    }

    fn overlay_upper_body(&self, frames: &mut [Frame], gesture: &[Frame]) -> MotionResult<()> {
        let skeleton = self.graph.skeleton();
        let Some(spine) = skeleton.long_chain_end() else {
            return Ok(());
        };
        let offsets: Vec<usize> = skeleton
            .subtree(spine)?
            .into_iter()
            .filter_map(|idx| skeleton.joints()[idx].frame_index.map(quaternion_offset))
            .collect();
        alignment::overlay_joints(frames, gesture, &offsets);
        Ok(())
    }

    fn push_state(
        &self,
        ctx: &mut PlanningContext,
        frames: Vec<Frame>,
        node: &GraphNode,
        hold_frames: Vec<usize>,
        velocity_factor: f32,
    ) -> MotionResult<()> {
        self.check_stop()?;
        let clip = MotionClip::new(frames, node.primitive.frame_time());
        let next_buffer = clip.tail(self.settings.state_machine.buffer_size);
        let state = MotionState::new(clip)?
            .with_hold_frames(hold_frames)
            .with_speed(velocity_factor);
        debug!("Queue state {} ({}) with {} frames", node.id, node.node_type, state.n_frames());
        self.queue.push(StateQueueEntry {
            state: Box::new(state),
            node: node.id.clone(),
            node_type: node.node_type,
            pose_buffer: std::mem::replace(&mut ctx.pose_buffer, next_buffer),
        });
        ctx.node = node.id.clone();
        ctx.node_type = node.node_type;
        ctx.n_states += 1;
        Ok(())
    }

    /// Unconstrained state for `node_id` aligned to `pose_buffer`, used for random walks
    pub fn build_state(
        &self,
        node_id: &GraphNodeId,
        pose_buffer: &[Frame],
        rng: &mut StdRng,
    ) -> MotionResult<MotionState> {
        let node = self.graph.node(node_id)?;
        let frames = self.sample_constrained(node, &[], pose_buffer.last(), None, rng)?;
        MotionState::new(MotionClip::new(frames, node.primitive.frame_time()))
    }
}

fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    Vec3::new(a.x - b.x, 0.0, a.z - b.z).length()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThreadPoolConfig, DEFAULT_MAX_STEPS};
    use crate::graph::demo;
    use crossbeam_channel::unbounded;

    fn planner() -> (StatePlanner, crossbeam_channel::Receiver<PlannerEvent>) {
        let graph = Arc::new(demo::build_demo_graph().unwrap());
        let mut settings = MgSettings::default();
        settings.planner.seed = Some(3);
        settings.planner.n_random_samples = 8;
        let pool = SamplingPool::new(ThreadPoolConfig {
            job_threads: 2,
            stack_size: None,
        })
        .unwrap();
        let (tx, rx) = unbounded();
        (StatePlanner::new(graph, Arc::new(settings), Arc::new(pool), tx), rx)
    }

    fn idle_buffer(planner: &StatePlanner) -> Vec<Frame> {
        let graph = &planner.graph;
        let clip = graph.node(graph.start_node()).unwrap().primitive.back_project_mean().unwrap();
        clip.tail(10)
    }

    #[test]
    fn test_next_node_type() {
        let (planner, _rx) = planner();
        assert_eq!(planner.get_next_node_type(NodeType::Start, 5.0), NodeType::Standard);
        assert_eq!(planner.get_next_node_type(NodeType::Standard, 0.1), NodeType::End);
        assert_eq!(planner.get_next_node_type(NodeType::End, 5.0), NodeType::Idle);
        assert_eq!(planner.get_next_node_type(NodeType::Idle, 5.0), NodeType::Idle);
    }

    #[test]
    fn test_reach_action_is_planned_with_hold() {
        let (planner, _rx) = planner();
        let target = Vec3::new(-0.3, 1.2, 0.4);
        let mut c = FrameConstraintDesc::new("contact0", "RightHand", target);
        c.hold = true;
        let action = ActionDescriptor::new("reachRight")
            .with_frame_constraints(vec![c])
            .validate(Vec3::Z, DEFAULT_MAX_STEPS)
            .unwrap();
        let n = planner
            .generate_motion_states_from_action_sequence(
                &[action],
                GraphNodeId::new("idle", "idle"),
                NodeType::Idle,
                idle_buffer(&planner),
                demo::FRAME_TIME,
            )
            .unwrap();
        assert_eq!(n, 2);
        let entry = planner.queue().pop_first().unwrap();
        assert_eq!(entry.node, GraphNodeId::new("reachRight", "reach"));
        let contact = entry.state.get_pose(Some(27));
        let wrist = planner.graph.skeleton().global_position(&contact, "RightHand").unwrap();
        assert!((wrist - target).length() < 0.02, "wrist {:?}", wrist);
        assert!(frame::quaternions_normalized(&contact, 1e-5));
    }

    #[test]
    fn test_locomotion_reaches_waypoint() {
        let (planner, _rx) = planner();
        let action = ActionDescriptor::new("walk")
            .with_control_points(vec![[0.0, 0.0, 2.0]])
            .validate(Vec3::Z, DEFAULT_MAX_STEPS)
            .unwrap();
        planner
            .generate_motion_states_from_action_sequence(
                &[action],
                GraphNodeId::new("idle", "idle"),
                NodeType::Idle,
                idle_buffer(&planner),
                demo::FRAME_TIME,
            )
            .unwrap();
        let nodes = planner.queue().queued_nodes();
        assert_eq!(nodes.first(), Some(&GraphNodeId::new("walk", "start")));
        assert_eq!(nodes.last(), Some(&GraphNodeId::new("walk", "end")));
        let mut last = None;
        while let Some(entry) = planner.queue().pop_first() {
            last = Some(entry);
        }
        let last = last.unwrap();
        let end = frame::root_position(&last.state.get_pose(Some(last.state.n_frames() - 1)));
        assert!(horizontal_distance(end, Vec3::new(0.0, 0.0, 2.0)) < 0.8, "ended at {:?}", end);
    }

    #[test]
    fn test_unknown_action_fails() {
        let (planner, _rx) = planner();
        let action = ActionDescriptor::new("dance").validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        let result = planner.generate_motion_states_from_action_sequence(
            &[action],
            GraphNodeId::new("idle", "idle"),
            NodeType::Idle,
            Vec::new(),
            demo::FRAME_TIME,
        );
        assert!(matches!(result, Err(MotionError::UnknownAction { .. })));
    }

    #[test]
    fn test_stop_flag_cancels_worker() {
        let (planner, rx) = planner();
        planner.request_stop();
        planner.set_processing(true);
        let action = ActionDescriptor::new("reachLeft").validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        let handle = planner
            .spawn(vec![action], GraphNodeId::new("idle", "idle"), NodeType::Idle, Vec::new(), 0.033)
            .unwrap();
        handle.join().unwrap();
        assert_eq!(rx.recv().unwrap(), PlannerEvent::Cancelled);
        assert!(!planner.is_processing());
        assert!(planner.queue().is_empty());
    }

    #[test]
    fn test_worker_reports_finished() {
        let (planner, rx) = planner();
        planner.set_processing(true);
        let action = ActionDescriptor::new("reachBoth").validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        let handle = planner
            .spawn(vec![action], GraphNodeId::new("idle", "idle"), NodeType::Idle, idle_buffer(&planner), 0.033)
            .unwrap();
        handle.join().unwrap();
        assert_eq!(rx.recv().unwrap(), PlannerEvent::Finished { n_states: 2 });
        assert_eq!(planner.queue().len(), 2);
    }
}
