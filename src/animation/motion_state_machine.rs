//! Foreground playback of the active motion state
//!
//! Holds exactly one [`MotionStateInterface`] plus a rolling window of the
//! most recently produced poses. The planner aligns new segments to that
//! window, so it is handed over together with every queued state.

use crate::animation::frame::{self, Frame};
use crate::animation::motion_state::MotionStateInterface;
use crate::animation::skeleton::Skeleton;
use crate::graph::{GraphNodeId, NodeType};
use crate::planner::queue::StateQueueEntry;
use glam::{Mat4, Quat, Vec3};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
pub struct MotionStateMachine {
    skeleton: Arc<Skeleton>,
    state: Box<dyn MotionStateInterface>,
    pub current_node: GraphNodeId,
    pub node_type: NodeType,
    pose_buffer: VecDeque<Frame>,
    buffer_size: usize,
}

impl MotionStateMachine {
    pub fn new(
        skeleton: Arc<Skeleton>,
        state: Box<dyn MotionStateInterface>,
        current_node: GraphNodeId,
        node_type: NodeType,
        buffer_size: usize,
    ) -> Self {
        Self {
            skeleton,
            state,
            current_node,
            node_type,
            pose_buffer: VecDeque::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Replace the state and node and forget the pose history
    pub fn reset(&mut self, state: Box<dyn MotionStateInterface>, node: GraphNodeId, node_type: NodeType) {
        self.state = state;
        self.current_node = node;
        self.node_type = node_type;
        self.pose_buffer.clear();
    }

    /// Replace the state and node but keep the pose history
    pub fn set_state(&mut self, state: Box<dyn MotionStateInterface>, node: GraphNodeId, node_type: NodeType) {
        self.state = state;
        self.current_node = node;
        self.node_type = node_type;
    }

    pub fn update(&mut self, dt: f32) -> bool {
        self.state.update(dt)
    }

    /// Take over a planned segment; the caller holds the orchestrator lock
    pub fn set_state_entry(&mut self, entry: StateQueueEntry) {
        self.state = entry.state;
        self.current_node = entry.node;
        self.node_type = entry.node_type;
        self.pose_buffer = entry.pose_buffer.into_iter().collect();
        while self.pose_buffer.len() > self.buffer_size {
            self.pose_buffer.pop_front();
        }
    }

    pub fn set_global_position(&mut self, position: Vec3) {
        self.state.set_position(position);
        self.set_buffer_position(position);
    }

    pub fn set_global_orientation(&mut self, orientation: Quat) {
        self.state.set_orientation(orientation);
        self.set_buffer_orientation(orientation);
    }

    pub fn set_buffer_position(&mut self, position: Vec3) {
        for pose in self.pose_buffer.iter_mut() {
            frame::set_root_position(pose, position);
        }
    }

    pub fn set_buffer_orientation(&mut self, orientation: Quat) {
        for pose in self.pose_buffer.iter_mut() {
            frame::set_root_orientation(pose, orientation);
        }
    }

    pub fn unpause(&mut self) {
        self.state.unpause();
    }

    pub fn set_play(&mut self, play: bool) {
        self.state.set_play(play);
    }

    /// Append the current pose to the history, dropping the oldest entries
    pub fn update_transformation(&mut self) {
        let pose = self.state.get_pose(None);
        self.pose_buffer.push_back(pose);
        while self.pose_buffer.len() > self.buffer_size {
            self.pose_buffer.pop_front();
        }
    }

    pub fn get_position(&self) -> Vec3 {
        frame::root_position(&self.state.get_pose(None))
    }

    /// Most recent buffered pose, a zero frame during warm-up
    pub fn latest_pose(&self) -> Frame {
        self.pose_buffer
            .back()
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.skeleton.frame_len()])
    }

    /// Global transform of the root joint in the latest buffered pose
    pub fn get_global_transformation(&self) -> Mat4 {
        let pose = self.latest_pose();
        let root = self.skeleton.root_name().to_string();
        self.skeleton
            .global_matrix(&pose, &root)
            .unwrap_or(Mat4::IDENTITY)
    }

    pub fn pose_buffer(&self) -> Vec<Frame> {
        self.pose_buffer.iter().cloned().collect()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Last `buffer_size` frames of the active state, where its playback will end
    pub fn state_tail(&self) -> Vec<Frame> {
        let frames = self.state.frames();
        let start = frames.len().saturating_sub(self.buffer_size);
        frames[start..].to_vec()
    }

    pub fn get_pose(&self, frame_idx: Option<usize>) -> Frame {
        self.state.get_pose(frame_idx)
    }

    pub fn state(&self) -> &dyn MotionStateInterface {
        self.state.as_ref()
    }

    pub fn n_frames(&self) -> usize {
        self.state.n_frames()
    }

    pub fn frame_time(&self) -> f32 {
        self.state.frame_time()
    }

    pub fn current_frame_idx(&self) -> usize {
        self.state.current_frame_idx()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::frame::{quaternions_normalized, MotionClip};
    use crate::animation::motion_state::MotionState;
    use crate::graph::demo;

    fn machine(buffer_size: usize) -> MotionStateMachine {
        let graph = demo::build_demo_graph().unwrap();
        let node = graph.start_node().clone();
        let clip = graph.node(&node).unwrap().primitive.back_project_mean().unwrap();
        let state = MotionState::new(clip).unwrap();
        MotionStateMachine::new(graph.skeleton().clone(), Box::new(state), node, NodeType::Idle, buffer_size)
    }

    #[test]
    fn test_pose_buffer_is_a_sliding_window() {
        let mut sm = machine(3);
        for _ in 0..5 {
            sm.update(1.0 / 30.0);
            sm.update_transformation();
        }
        let buffer = sm.pose_buffer();
        assert_eq!(buffer.len(), 3);
        assert!(buffer.iter().all(|f| quaternions_normalized(f, 1e-5)));
        assert_eq!(buffer.last().unwrap(), &sm.get_pose(None));
    }

    #[test]
    fn test_latest_pose_defaults_to_zero_frame() {
        let sm = machine(10);
        let pose = sm.latest_pose();
        assert_eq!(pose.len(), sm.skeleton.frame_len());
        assert!(pose.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_set_global_position_round_trip() {
        let mut sm = machine(10);
        sm.update_transformation();
        let p = Vec3::new(1.5, 0.0, -2.0);
        sm.set_global_position(p);
        sm.update_transformation();
        assert!((sm.get_position() - p).length() < 1e-6);
        assert!((frame::root_position(&sm.latest_pose()) - p).length() < 1e-6);
    }

    #[test]
    fn test_set_state_entry_replaces_everything() {
        let mut sm = machine(2);
        let frames = vec![sm.get_pose(Some(0)); 4];
        let entry = StateQueueEntry {
            state: Box::new(MotionState::new(MotionClip::new(frames.clone(), 0.1)).unwrap()),
            node: GraphNodeId::new("walk", "step"),
            node_type: NodeType::Standard,
            pose_buffer: frames,
        };
        sm.set_state_entry(entry);
        assert_eq!(sm.current_node, GraphNodeId::new("walk", "step"));
        assert_eq!(sm.node_type, NodeType::Standard);
        assert_eq!(sm.pose_buffer().len(), 2);
        assert_eq!(sm.n_frames(), 4);
    }

    #[test]
    fn test_state_tail_ends_at_clip_end_not_cursor() {
        let mut sm = machine(3);
        let frames: Vec<Frame> = (0..10)
            .map(|i| {
                let mut f = sm.get_pose(Some(0));
                frame::set_root_position(&mut f, Vec3::new(0.0, 0.0, i as f32 * 0.1));
                f
            })
            .collect();
        let state = MotionState::new(MotionClip::new(frames.clone(), 0.1)).unwrap();
        sm.set_state(Box::new(state), GraphNodeId::new("walk", "step"), NodeType::Standard);
        sm.update(0.25);
        sm.update_transformation();
        let tail = sm.state_tail();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.last(), frames.last());
        assert_ne!(tail.last(), sm.pose_buffer().last());
    }
}
