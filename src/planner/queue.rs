//! Producer/consumer queue between the planner worker and playback
//!
//! The queue carries its own lock. Length checks, pops and resets all take
//! it, and it is never held while the orchestrator lock is requested.

use crate::animation::frame::Frame;
use crate::animation::motion_state::{HoldPoseState, MotionStateInterface};
use crate::graph::{GraphNodeId, NodeType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A planned segment plus the pose history it was aligned to
#[derive(Debug)]
pub struct StateQueueEntry {
    pub state: Box<dyn MotionStateInterface>,
    pub node: GraphNodeId,
    pub node_type: NodeType,
    pub pose_buffer: Vec<Frame>,
}

impl StateQueueEntry {
    /// Idle entry holding the most recent pose (or `fallback` when there is no history)
    pub fn idle(
        pose_buffer: &[Frame],
        fallback: &Frame,
        frame_time: f32,
        duration: f32,
        node: GraphNodeId,
    ) -> Self {
        let pose = pose_buffer.last().unwrap_or(fallback).clone();
        Self {
            state: Box::new(HoldPoseState::new(pose, frame_time, duration)),
            node,
            node_type: NodeType::Idle,
            pose_buffer: pose_buffer.to_vec(),
        }
    }
}

#[derive(Debug, Default)]
pub struct StateQueue {
    entries: Mutex<VecDeque<StateQueueEntry>>,
    /// Calls to `pop_first`, successful or not
    polls: AtomicUsize,
}

impl StateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StateQueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn push(&self, entry: StateQueueEntry) {
        self.lock().push_back(entry);
    }

    /// Remove and return the oldest entry
    pub fn pop_first(&self) -> Option<StateQueueEntry> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.lock().pop_front()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Node identities currently queued, oldest first
    pub fn queued_nodes(&self) -> Vec<GraphNodeId> {
        self.lock().iter().map(|entry| entry.node.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn entry(primitive: &str) -> StateQueueEntry {
        let pose = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut e = StateQueueEntry::idle(&[], &pose, 0.1, 0.5, GraphNodeId::new("idle", primitive));
        e.node_type = NodeType::Standard;
        e
    }

    #[test]
    fn test_fifo_order_and_reset() {
        let queue = StateQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_first().unwrap().node.primitive, "a");
        assert_eq!(queue.queued_nodes(), vec![GraphNodeId::new("idle", "b")]);
        queue.reset();
        assert!(queue.is_empty());
        assert!(queue.pop_first().is_none());
        assert_eq!(queue.poll_count(), 2);
    }

    #[test]
    fn test_concurrent_producer() {
        let queue = Arc::new(StateQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..50 {
                    queue.push(entry(&i.to_string()));
                }
            })
        };
        producer.join().unwrap();
        let mut popped = 0;
        while queue.pop_first().is_some() {
            popped += 1;
        }
        assert_eq!(popped, 50);
    }

    #[test]
    fn test_idle_entry_uses_latest_pose() {
        let fallback = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut latest = fallback.clone();
        latest[0] = 2.0;
        let buffer = vec![fallback.clone(), latest.clone()];
        let e = StateQueueEntry::idle(&buffer, &fallback, 0.1, 0.5, GraphNodeId::new("idle", "idle"));
        assert_eq!(e.state.get_pose(None), latest);
        assert_eq!(e.node_type, NodeType::Idle);
        assert_eq!(e.pose_buffer.len(), 2);
    }
}
