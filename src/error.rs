//! Error types shared by every layer of the reach MMU

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MotionError {
    /// Joint name missing from the skeleton
    #[error("Unknown joint: {name}")]
    UnknownJoint { name: String },

    /// Node id missing from the motion graph
    #[error("Unknown graph node: {node}")]
    UnknownNode { node: String },

    /// Action name with no nodes in the motion graph
    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    /// Descriptor rejected before planning
    #[error("Invalid action descriptor: {reason}")]
    InvalidAction { reason: String },

    /// Frame does not match the skeleton's channel count
    #[error("Frame length mismatch: expected {expected}, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    /// `wait_for_planner` ran out of queue queries
    #[error("State queue still empty after {attempts} queries")]
    PlannerStarved { attempts: usize },

    /// Planning stopped through the cooperative stop flag
    #[error("Planning cancelled")]
    Cancelled,

    /// Planner thread or sampling pool could not be started
    #[error("Planner worker failed: {reason}")]
    Worker { reason: String },

    /// Malformed motion graph file or inconsistent graph
    #[error("Invalid graph description: {reason}")]
    GraphDescription { reason: String },

    /// Unreadable or out-of-range settings
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Conversion between MOSIM postures and skeleton frames failed
    #[error("Retargeting failed: {reason}")]
    Retargeting { reason: String },

    /// Instruction is missing a target or has unusable properties
    #[error("Invalid instruction: {reason}")]
    Instruction { reason: String },

    /// Filesystem failure while loading or saving files
    #[error("I/O error: {reason}")]
    Io { reason: String },

    /// Anything not covered by the variants above
    #[error("{reason}")]
    Other { reason: String },
}

pub type MotionResult<T> = Result<T, MotionError>;

impl From<std::io::Error> for MotionError {
    fn from(err: std::io::Error) -> Self {
        MotionError::Io { reason: err.to_string() }
    }
}

impl From<serde_json::Error> for MotionError {
    fn from(err: serde_json::Error) -> Self {
        MotionError::Config { reason: err.to_string() }
    }
}

impl From<toml::de::Error> for MotionError {
    fn from(err: toml::de::Error) -> Self {
        MotionError::Config { reason: err.to_string() }
    }
}

impl From<toml::ser::Error> for MotionError {
    fn from(err: toml::ser::Error) -> Self {
        MotionError::Config { reason: err.to_string() }
    }
}

impl MotionError {
    pub fn unknown_joint(name: impl Into<String>) -> Self {
        MotionError::UnknownJoint { name: name.into() }
    }

    pub fn invalid_action(reason: impl Into<String>) -> Self {
        MotionError::InvalidAction { reason: reason.into() }
    }
}
