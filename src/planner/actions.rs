//! Declarative action descriptors and their validated form
//!
//! Descriptors arrive from the instruction layer with every field optional.
//! [`ActionDescriptor::validate`] checks them once and produces the
//! [`ActionConstraints`] the planner works with.

use crate::error::{MotionError, MotionResult};
use crate::utils::math::{normalize_or_identity, rotate_vector_deg};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

fn default_velocity_factor() -> f32 {
    1.0
}

/// A joint goal at a labelled keyframe of the action's primitives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameConstraintDesc {
    pub keyframe: String,
    pub joint: String,
    pub position: [f32; 3],
    /// `[w, x, y, z]`
    #[serde(default)]
    pub orientation: Option<[f32; 4]>,
    #[serde(default)]
    pub constrain_orientation: bool,
    /// Pause playback at the keyframe
    #[serde(default)]
    pub hold: bool,
    #[serde(default)]
    pub chain_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpperBodyGesture {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub name: String,
    #[serde(default)]
    pub locomotion_upper_body_action: Option<String>,
    #[serde(default)]
    pub upper_body_gesture: Option<UpperBodyGesture>,
    #[serde(default = "default_velocity_factor")]
    pub velocity_factor: f32,
    #[serde(default)]
    pub n_cycles: usize,
    #[serde(default)]
    pub constrain_look_at: bool,
    #[serde(default)]
    pub look_at_constraints: bool,
    #[serde(default)]
    pub control_points: Option<Vec<[f32; 3]>>,
    /// Degrees around the up axis, relative to the avatar's current heading
    #[serde(default)]
    pub direction_angle: Option<f32>,
    #[serde(default)]
    pub direction: Option<[f32; 3]>,
    #[serde(default)]
    pub n_steps: Option<usize>,
    #[serde(default)]
    pub step_distance: Option<f32>,
    #[serde(default)]
    pub frame_constraints: Vec<FrameConstraintDesc>,
}

impl ActionDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            locomotion_upper_body_action: None,
            upper_body_gesture: None,
            velocity_factor: 1.0,
            n_cycles: 0,
            constrain_look_at: false,
            look_at_constraints: false,
            control_points: None,
            direction_angle: None,
            direction: None,
            n_steps: None,
            step_distance: None,
            frame_constraints: Vec::new(),
        }
    }

    pub fn with_frame_constraints(mut self, constraints: Vec<FrameConstraintDesc>) -> Self {
        self.frame_constraints = constraints;
        self
    }

    pub fn with_look_at_constraints(mut self, look_at: bool) -> Self {
        self.look_at_constraints = look_at;
        self
    }

    pub fn with_control_points(mut self, points: Vec<[f32; 3]>) -> Self {
        self.control_points = Some(points);
        self
    }

    pub fn with_steps(mut self, direction_angle: f32, n_steps: usize, step_distance: f32) -> Self {
        self.direction_angle = Some(direction_angle);
        self.n_steps = Some(n_steps);
        self.step_distance = Some(step_distance);
        self
    }

    /// Check the descriptor; `root_heading` resolves `directionAngle`, `max_steps` bounds `nSteps`
    pub fn validate(&self, root_heading: Vec3, max_steps: usize) -> MotionResult<ActionConstraints> {
        if self.name.trim().is_empty() {
            return Err(MotionError::invalid_action("action name is empty"));
        }
        if !self.velocity_factor.is_finite() || self.velocity_factor <= 0.0 {
            return Err(MotionError::invalid_action(format!(
                "velocityFactor must be positive, got {}",
                self.velocity_factor
            )));
        }

        let frame_constraints = self
            .frame_constraints
            .iter()
            .map(|desc| desc.validate(self.look_at_constraints))
            .collect::<MotionResult<Vec<_>>>()?;

        let upper_body_gesture = match (&self.locomotion_upper_body_action, &self.upper_body_gesture) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(gesture)) => Some(gesture.name.clone()),
            (None, None) => None,
        };

        Ok(ActionConstraints {
            action_name: self.name.clone(),
            frame_constraints,
            trajectory: self.trajectory(root_heading, max_steps)?,
            upper_body_gesture,
            velocity_factor: self.velocity_factor,
            n_cycles: self.n_cycles,
            constrain_look_at: self.constrain_look_at,
            look_at_constraints: self.look_at_constraints,
        })
    }

    fn trajectory(&self, root_heading: Vec3, max_steps: usize) -> MotionResult<Option<Trajectory>> {
        if let Some(points) = &self.control_points {
            if points.is_empty() {
                return Err(MotionError::invalid_action("controlPoints is empty"));
            }
            let points: Vec<Vec3> = points.iter().map(|p| Vec3::from(*p)).collect();
            if points.iter().any(|p| !p.is_finite()) {
                return Err(MotionError::invalid_action("controlPoints contains non-finite values"));
            }
            return Ok(Some(Trajectory::ControlPoints(points)));
        }

        let direction = match (self.direction_angle, self.direction) {
            (Some(angle), _) => {
                let heading = Vec3::new(root_heading.x, 0.0, root_heading.z);
                Some(rotate_vector_deg(heading.try_normalize().unwrap_or(Vec3::Z), angle))
            }
            (None, Some(direction)) => Some(Vec3::from(direction)),
            (None, None) => None,
        };
        match (direction, self.n_steps, self.step_distance) {
            (None, None, None) => Ok(None),
            (Some(direction), Some(n_steps), Some(step_distance)) => {
                let Some(direction) = Vec3::new(direction.x, 0.0, direction.z).try_normalize() else {
                    return Err(MotionError::invalid_action("step direction has no horizontal component"));
                };
                if n_steps == 0 || !(step_distance > 0.0) {
                    return Err(MotionError::invalid_action("nSteps and stepDistance must be positive"));
                }
                if n_steps > max_steps {
                    return Err(MotionError::invalid_action(format!(
                        "nSteps is {}, at most {} are accepted",
                        n_steps, max_steps
                    )));
                }
                Ok(Some(Trajectory::Steps {
                    direction,
                    n_steps,
                    step_distance,
                }))
            }
            _ => Err(MotionError::invalid_action(
                "step trajectory needs directionAngle or direction plus nSteps and stepDistance",
            )),
        }
    }
}

impl FrameConstraintDesc {
    pub fn new(keyframe: &str, joint: &str, position: Vec3) -> Self {
        Self {
            keyframe: keyframe.to_string(),
            joint: joint.to_string(),
            position: position.to_array(),
            orientation: None,
            constrain_orientation: false,
            hold: false,
            chain_end: None,
        }
    }

    fn validate(&self, look_at: bool) -> MotionResult<FrameConstraint> {
        let position = Vec3::from(self.position);
        if !position.is_finite() {
            return Err(MotionError::invalid_action(format!(
                "constraint on {} has a non-finite position",
                self.joint
            )));
        }
        let orientation = match (self.constrain_orientation, self.orientation) {
            (true, Some([w, x, y, z])) => Some(normalize_or_identity(Quat::from_xyzw(x, y, z, w))),
            (true, None) => {
                return Err(MotionError::invalid_action(format!(
                    "constraint on {} asks for orientation but has none",
                    self.joint
                )))
            }
            (false, _) => None,
        };
        Ok(FrameConstraint {
            keyframe: self.keyframe.clone(),
            joint: self.joint.clone(),
            position,
            orientation,
            hold: self.hold,
            chain_end: self.chain_end.clone(),
            look_at,
        })
    }
}

/// Path the avatar walks before the action's own nodes are played
#[derive(Debug, Clone, PartialEq)]
pub enum Trajectory {
    ControlPoints(Vec<Vec3>),
    Steps {
        direction: Vec3,
        n_steps: usize,
        step_distance: f32,
    },
}

impl Trajectory {
    /// Points to walk through from `start`; a step path yields at most `max_steps` of them
    pub fn waypoints(&self, start: Vec3, max_steps: usize) -> Vec<Vec3> {
        match self {
            Trajectory::ControlPoints(points) => points.clone(),
            Trajectory::Steps {
                direction,
                n_steps,
                step_distance,
            } => (1..=(*n_steps).min(max_steps))
                .map(|i| start + *direction * (*step_distance * i as f32))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameConstraint {
    pub keyframe: String,
    pub joint: String,
    pub position: Vec3,
    pub orientation: Option<Quat>,
    pub hold: bool,
    pub chain_end: Option<String>,
    /// Turn the head toward this constraint
    pub look_at: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionConstraints {
    pub action_name: String,
    pub frame_constraints: Vec<FrameConstraint>,
    pub trajectory: Option<Trajectory>,
    pub upper_body_gesture: Option<String>,
    pub velocity_factor: f32,
    pub n_cycles: usize,
    pub constrain_look_at: bool,
    pub look_at_constraints: bool,
}

impl ActionConstraints {
    pub fn wants_look_at(&self) -> bool {
        self.constrain_look_at || self.look_at_constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_STEPS;

    #[test]
    fn test_defaults_from_json() {
        let desc: ActionDescriptor = serde_json::from_str(r#"{"name": "reachRight"}"#).unwrap();
        assert_eq!(desc.velocity_factor, 1.0);
        assert_eq!(desc.n_cycles, 0);
        assert!(!desc.constrain_look_at);
        let action = desc.validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        assert!(action.trajectory.is_none());
        assert!(action.frame_constraints.is_empty());
    }

    #[test]
    fn test_direction_angle_is_relative_to_heading() {
        let desc = ActionDescriptor::new("walk").with_steps(90.0, 2, 0.5);
        let action = desc.validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        match action.trajectory {
            Some(Trajectory::Steps { direction, n_steps, .. }) => {
                assert!((direction - Vec3::X).length() < 1e-5);
                assert_eq!(n_steps, 2);
            }
            other => panic!("unexpected trajectory {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_step_trajectory_is_rejected() {
        let mut desc = ActionDescriptor::new("walk");
        desc.n_steps = Some(3);
        assert!(matches!(desc.validate(Vec3::Z, DEFAULT_MAX_STEPS), Err(MotionError::InvalidAction { .. })));
    }

    #[test]
    fn test_control_points_take_precedence() {
        let desc = ActionDescriptor::new("walk")
            .with_control_points(vec![[1.0, 0.0, 2.0]])
            .with_steps(0.0, 1, 1.0);
        let action = desc.validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        assert_eq!(
            action.trajectory.unwrap().waypoints(Vec3::ZERO, DEFAULT_MAX_STEPS),
            vec![Vec3::new(1.0, 0.0, 2.0)]
        );
    }

    #[test]
    fn test_gesture_and_orientation_fields() {
        let json = r#"{
            "name": "reachRight",
            "locomotionUpperBodyAction": "wave",
            "lookAtConstraints": true,
            "frameConstraints": [{
                "keyframe": "contact0", "joint": "RightHand", "position": [0.1, 1.2, 0.4],
                "orientation": [0.0, 0.0, 2.0, 0.0], "constrainOrientation": true, "hold": true
            }]
        }"#;
        let action = serde_json::from_str::<ActionDescriptor>(json).unwrap().validate(Vec3::Z, DEFAULT_MAX_STEPS).unwrap();
        assert_eq!(action.upper_body_gesture.as_deref(), Some("wave"));
        let c = &action.frame_constraints[0];
        assert!(c.hold && c.look_at);
        assert!((c.orientation.unwrap().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_step_waypoints() {
        let t = Trajectory::Steps {
            direction: Vec3::Z,
            n_steps: 3,
            step_distance: 0.5,
        };
        let points = t.waypoints(Vec3::new(1.0, 0.0, 0.0), DEFAULT_MAX_STEPS);
        assert_eq!(points.len(), 3);
        assert!((points[2] - Vec3::new(1.0, 0.0, 1.5)).length() < 1e-6);
    }

    #[test]
    fn test_oversized_step_count_is_rejected() {
        let desc = ActionDescriptor::new("walk").with_steps(0.0, 1 << 40, 0.5);
        match desc.validate(Vec3::Z, DEFAULT_MAX_STEPS) {
            Err(MotionError::InvalidAction { reason }) => assert!(reason.contains("nSteps"), "{}", reason),
            other => panic!("expected rejection, got {:?}", other),
        }
        let at_limit = ActionDescriptor::new("walk").with_steps(0.0, DEFAULT_MAX_STEPS, 0.5);
        assert!(at_limit.validate(Vec3::Z, DEFAULT_MAX_STEPS).is_ok());
    }

    #[test]
    fn test_step_waypoints_are_capped() {
        let t = Trajectory::Steps {
            direction: Vec3::X,
            n_steps: usize::MAX,
            step_distance: 0.5,
        };
        let points = t.waypoints(Vec3::ZERO, 4);
        assert_eq!(points.len(), 4);
        assert!((points[3] - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
    }
}
