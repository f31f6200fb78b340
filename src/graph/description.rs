//! JSON graph description files

use crate::animation::frame::{Frame, MotionClip};
use crate::animation::skeleton::{JointDefinition, Skeleton};
use crate::error::{MotionError, MotionResult};
use crate::graph::{GraphNode, GraphNodeId, MotionGraph, MotionPrimitive, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn default_static_joints() -> Vec<String> {
    vec!["left_clavicle".to_string(), "right_clavicle".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkeletonDescription {
    pub joints: Vec<JointDefinition>,
    #[serde(default)]
    pub skeleton_model: HashMap<String, String>,
    pub frame_time: f32,
    /// Semantic names of joints kept fixed during IK
    #[serde(default = "default_static_joints")]
    pub static_joints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    pub action: String,
    pub primitive: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub keyframes: HashMap<String, usize>,
    #[serde(default)]
    pub transitions: Vec<GraphNodeId>,
    /// Example clips; a single example makes a static primitive
    pub examples: Vec<Vec<Frame>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDescription {
    pub skeleton: SkeletonDescription,
    pub start_node: GraphNodeId,
    pub nodes: Vec<NodeDescription>,
}

impl GraphDescription {
    pub fn from_json_str(data: &str) -> MotionResult<Self> {
        serde_json::from_str(data).map_err(|e| MotionError::GraphDescription { reason: e.to_string() })
    }

    pub fn to_json_string(&self) -> MotionResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn into_graph(self) -> MotionResult<MotionGraph> {
        let mut skeleton = Skeleton::new(
            &self.skeleton.joints,
            self.skeleton.skeleton_model,
            self.skeleton.frame_time,
        )?;
        let static_joints: Vec<&str> = self.skeleton.static_joints.iter().map(String::as_str).collect();
        skeleton.set_static_joints(&static_joints);
        let frame_time = self.skeleton.frame_time;

        let nodes = self
            .nodes
            .into_iter()
            .map(|desc| {
                let id = GraphNodeId::new(&desc.action, &desc.primitive);
                let mut clips: Vec<MotionClip> = desc
                    .examples
                    .into_iter()
                    .map(|frames| MotionClip::new(frames, frame_time))
                    .collect();
                let primitive = if clips.len() == 1 {
                    let clip = clips.remove(0);
                    if clip.is_empty() {
                        return Err(MotionError::GraphDescription {
                            reason: format!("node {} has an empty clip", id),
                        });
                    }
                    MotionPrimitive::Static(clip)
                } else {
                    MotionPrimitive::morphable(clips)?
                };
                let mut node = GraphNode::new(id, desc.node_type, primitive).with_transitions(desc.transitions);
                node.keyframes = desc.keyframes;
                Ok(node)
            })
            .collect::<MotionResult<Vec<_>>>()?;

        MotionGraph::new(Arc::new(skeleton), nodes, self.start_node)
    }

    pub fn from_graph(graph: &MotionGraph) -> Self {
        let skeleton = graph.skeleton();
        let joints = skeleton
            .joints()
            .iter()
            .map(|joint| JointDefinition {
                name: joint.name.clone(),
                parent: joint.parent.map(|p| skeleton.joints()[p].name.clone()),
                offset: joint.offset.to_array(),
                animated: joint.frame_index.is_some(),
            })
            .collect();
        let mut static_joints: Vec<String> = skeleton
            .skeleton_model()
            .iter()
            .filter(|(_, name)| skeleton.joint(name).map(|j| j.is_static).unwrap_or(false))
            .map(|(semantic, _)| semantic.clone())
            .collect();
        static_joints.sort();

        let nodes = graph
            .nodes()
            .map(|node| {
                let examples = match &node.primitive {
                    MotionPrimitive::Static(clip) => vec![clip.frames().to_vec()],
                    MotionPrimitive::Morphable { examples } => {
                        examples.iter().map(|c| c.frames().to_vec()).collect()
                    }
                };
                NodeDescription {
                    action: node.id.action.clone(),
                    primitive: node.id.primitive.clone(),
                    node_type: node.node_type,
                    keyframes: node.keyframes.clone(),
                    transitions: node.transitions.clone(),
                    examples,
                }
            })
            .collect();

        Self {
            skeleton: SkeletonDescription {
                joints,
                skeleton_model: skeleton.skeleton_model().clone(),
                frame_time: skeleton.frame_time(),
                static_joints,
            },
            start_node: graph.start_node().clone(),
            nodes,
        }
    }
}

pub fn load_graph_from_path(path: &Path) -> MotionResult<MotionGraph> {
    let data = fs::read_to_string(path)?;
    let graph = GraphDescription::from_json_str(&data)?.into_graph()?;
    info!("Loaded motion graph from {:?}", path);
    Ok(graph)
}

pub fn save_graph_description(graph: &MotionGraph, path: &Path) -> MotionResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, GraphDescription::from_graph(graph).to_json_string()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::demo;

    #[test]
    fn test_demo_graph_survives_description() {
        let graph = demo::build_demo_graph().unwrap();
        let json = GraphDescription::from_graph(&graph).to_json_string().unwrap();
        let reloaded = GraphDescription::from_json_str(&json).unwrap().into_graph().unwrap();
        assert_eq!(reloaded.nodes().count(), graph.nodes().count());
        assert_eq!(reloaded.start_node(), graph.start_node());
        assert!(reloaded.skeleton().joint("LeftShoulder").unwrap().is_static);
        assert_eq!(reloaded.skeleton().frame_len(), graph.skeleton().frame_len());
    }

    #[test]
    fn test_minimal_description() {
        let json = r#"{
            "skeleton": {
                "joints": [{"name": "Hips"}, {"name": "Spine", "parent": "Hips", "offset": [0.0, 0.1, 0.0]}],
                "frameTime": 0.05
            },
            "startNode": {"action": "idle", "primitive": "idle"},
            "nodes": [{
                "action": "idle",
                "primitive": "idle",
                "nodeType": "idle",
                "transitions": [{"action": "idle", "primitive": "idle"}],
                "examples": [[[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]]]
            }]
        }"#;
        let graph = GraphDescription::from_json_str(json).unwrap().into_graph().unwrap();
        assert_eq!(graph.skeleton().frame_len(), 11);
        assert!(graph.node(graph.start_node()).unwrap().primitive.is_static());
    }

    #[test]
    fn test_bad_frame_length_is_rejected() {
        let json = r#"{
            "skeleton": {"joints": [{"name": "Hips"}], "frameTime": 0.05},
            "startNode": {"action": "idle", "primitive": "idle"},
            "nodes": [{"action": "idle", "primitive": "idle", "nodeType": "idle",
                       "examples": [[[0, 0, 0, 1, 0, 0, 0, 1]]]}]
        }"#;
        let result = GraphDescription::from_json_str(json).unwrap().into_graph();
        assert!(matches!(result, Err(MotionError::FrameLength { .. })));
    }
}
