//! Frames, skeleton kinematics and motion playback

pub mod frame;
pub mod ik;
pub mod motion_state;
pub mod motion_state_machine;
pub mod skeleton;

pub use frame::{Frame, MotionClip};
pub use ik::{InverseKinematics, KeyframeConstraint};
pub use motion_state::{HoldPoseState, MotionState, MotionStateInterface};
pub use motion_state_machine::MotionStateMachine;
pub use skeleton::{JointDefinition, Side, Skeleton, SkeletonJoint};
