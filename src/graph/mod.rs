//! Morphable motion graph
//!
//! Nodes are motion primitives grouped by action. Each node carries a
//! [`NodeType`], labelled keyframes and its legal successors. The planner
//! walks the graph START -> STANDARD -> END inside an action and the state
//! machine falls back to IDLE nodes when nothing is planned.

pub mod demo;
pub mod description;
pub mod primitive;

pub use primitive::{MotionPrimitive, MotionSample};

use crate::animation::frame::MotionClip;
use crate::animation::skeleton::Skeleton;
use crate::error::{MotionError, MotionResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identity of a graph node: the action it belongs to and its primitive name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphNodeId {
    pub action: String,
    pub primitive: String,
}

impl GraphNodeId {
    pub fn new(action: &str, primitive: &str) -> Self {
        Self {
            action: action.to_string(),
            primitive: primitive.to_string(),
        }
    }
}

impl fmt::Display for GraphNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.action, self.primitive)
    }
}

/// Position of a node inside its action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// First node of an action, entered from idle or another action's end
    Start,
    /// Repeatable middle node, e.g. a walk cycle
    Standard,
    /// Last node of an action
    End,
    /// Standing still between actions
    Idle,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Idle
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Start => write!(f, "start"),
            NodeType::Standard => write!(f, "standard"),
            NodeType::End => write!(f, "end"),
            NodeType::Idle => write!(f, "idle"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: GraphNodeId,
    pub node_type: NodeType,
    pub primitive: MotionPrimitive,
    /// Keyframe label to frame index
    pub keyframes: HashMap<String, usize>,
    pub transitions: Vec<GraphNodeId>,
}

impl GraphNode {
    pub fn new(id: GraphNodeId, node_type: NodeType, primitive: MotionPrimitive) -> Self {
        Self {
            id,
            node_type,
            primitive,
            keyframes: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_keyframe(mut self, label: &str, frame_idx: usize) -> Self {
        self.keyframes.insert(label.to_string(), frame_idx);
        self
    }

    pub fn with_transitions(mut self, transitions: Vec<GraphNodeId>) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn keyframe(&self, label: &str) -> Option<usize> {
        self.keyframes.get(label).copied()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MotionSample {
        self.primitive.sample(rng)
    }

    pub fn back_project(&self, sample: &MotionSample) -> MotionResult<MotionClip> {
        self.primitive.back_project(sample)
    }

    /// Random sample turned directly into a clip
    pub fn sample_clip<R: Rng + ?Sized>(&self, rng: &mut R) -> MotionResult<MotionClip> {
        let sample = self.sample(rng);
        self.back_project(&sample)
    }
}

/// Nodes of one action ordered the way the planner plays them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionDefinition {
    pub name: String,
    pub start: Vec<GraphNodeId>,
    pub standard: Vec<GraphNodeId>,
    pub end: Vec<GraphNodeId>,
    pub idle: Vec<GraphNodeId>,
}

impl ActionDefinition {
    /// START nodes, STANDARD nodes repeated `n_cycles` extra times, then END nodes
    pub fn node_sequence(&self, n_cycles: usize) -> Vec<GraphNodeId> {
        let mut sequence = self.start.clone();
        for _ in 0..=n_cycles {
            sequence.extend(self.standard.iter().cloned());
        }
        sequence.extend(self.end.iter().cloned());
        if sequence.is_empty() {
            sequence.extend(self.idle.iter().take(1).cloned());
        }
        sequence
    }
}

#[derive(Debug)]
pub struct MotionGraph {
    skeleton: Arc<Skeleton>,
    nodes: BTreeMap<GraphNodeId, GraphNode>,
    start_node: GraphNodeId,
}

impl MotionGraph {
    pub fn new(skeleton: Arc<Skeleton>, nodes: Vec<GraphNode>, start_node: GraphNodeId) -> MotionResult<Self> {
        let mut map = BTreeMap::new();
        for node in nodes {
            if node.primitive.frame_len() != skeleton.frame_len() {
                return Err(MotionError::FrameLength {
                    expected: skeleton.frame_len(),
                    actual: node.primitive.frame_len(),
                });
            }
            for (label, idx) in &node.keyframes {
                if *idx >= node.primitive.n_frames() {
                    return Err(MotionError::GraphDescription {
                        reason: format!("keyframe {} of {} is outside the clip", label, node.id),
                    });
                }
            }
            if map.insert(node.id.clone(), node).is_some() {
                return Err(MotionError::GraphDescription {
                    reason: "duplicate node identifier".to_string(),
                });
            }
        }
        for node in map.values() {
            if let Some(missing) = node.transitions.iter().find(|t| !map.contains_key(*t)) {
                return Err(MotionError::GraphDescription {
                    reason: format!("{} has a transition to unknown node {}", node.id, missing),
                });
            }
        }
        if !map.contains_key(&start_node) {
            return Err(MotionError::UnknownNode {
                node: start_node.to_string(),
            });
        }
        debug!("Motion graph with {} nodes, start node {}", map.len(), start_node);
        Ok(Self {
            skeleton,
            nodes: map,
            start_node,
        })
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn start_node(&self) -> &GraphNodeId {
        &self.start_node
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn contains(&self, id: &GraphNodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &GraphNodeId) -> MotionResult<&GraphNode> {
        self.nodes.get(id).ok_or_else(|| MotionError::UnknownNode { node: id.to_string() })
    }

    pub fn can_transition(&self, from: &GraphNodeId, to: &GraphNodeId) -> bool {
        self.nodes
            .get(from)
            .map(|node| node.transitions.contains(to))
            .unwrap_or(false)
    }

    /// Random legal successor of `from` with type `node_type`
    pub fn generate_random_transition<R: Rng + ?Sized>(
        &self,
        from: &GraphNodeId,
        node_type: NodeType,
        rng: &mut R,
    ) -> Option<GraphNodeId> {
        let node = self.nodes.get(from)?;
        let candidates: Vec<&GraphNodeId> = node
            .transitions
            .iter()
            .filter(|t| self.nodes.get(*t).map(|n| n.node_type) == Some(node_type))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    /// Nodes grouped by action name
    pub fn action_definitions(&self) -> BTreeMap<String, ActionDefinition> {
        let mut actions: BTreeMap<String, ActionDefinition> = BTreeMap::new();
        for node in self.nodes.values() {
            let entry = actions
                .entry(node.id.action.clone())
                .or_insert_with(|| ActionDefinition {
                    name: node.id.action.clone(),
                    ..Default::default()
                });
            let slot = match node.node_type {
                NodeType::Start => &mut entry.start,
                NodeType::Standard => &mut entry.standard,
                NodeType::End => &mut entry.end,
                NodeType::Idle => &mut entry.idle,
            };
            slot.push(node.id.clone());
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_node_type_display() {
        assert_eq!(NodeType::Standard.to_string(), "standard");
        assert_eq!(GraphNodeId::new("walk", "step").to_string(), "(walk, step)");
    }

    #[test]
    fn test_random_transition_respects_type() {
        let graph = demo::build_demo_graph().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let idle = graph.start_node().clone();
        for _ in 0..10 {
            let next = graph.generate_random_transition(&idle, NodeType::Idle, &mut rng).unwrap();
            assert_eq!(graph.node(&next).unwrap().node_type, NodeType::Idle);
            assert!(graph.can_transition(&idle, &next));
        }
        assert!(graph
            .generate_random_transition(&idle, NodeType::End, &mut rng)
            .is_none());
    }

    #[test]
    fn test_action_definitions_order_nodes() {
        let graph = demo::build_demo_graph().unwrap();
        let actions = graph.action_definitions();
        let walk = &actions["walk"];
        assert_eq!(walk.start.len(), 1);
        assert_eq!(walk.end.len(), 1);
        let seq = walk.node_sequence(1);
        assert_eq!(seq.first(), walk.start.first());
        assert_eq!(seq.last(), walk.end.first());
        assert_eq!(seq.len(), 2 + 2 * walk.standard.len());
    }

    #[test]
    fn test_unknown_transition_is_rejected() {
        let graph = demo::build_demo_graph().unwrap();
        let mut node = graph.node(graph.start_node()).unwrap().clone();
        node.transitions.push(GraphNodeId::new("nope", "nope"));
        let err = MotionGraph::new(graph.skeleton().clone(), vec![node], graph.start_node().clone());
        assert!(matches!(err, Err(MotionError::GraphDescription { .. })));
    }
}
