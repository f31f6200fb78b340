// MG-Reach: morphable graph reaching for MOSIM co-simulations
// Planning runs in the background, playback never waits on it for long

pub mod animation;
pub mod config;
pub mod error;
pub mod graph;
pub mod mmu;
pub mod planner;
pub mod state_machine;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{load_settings, save_settings, MgSettings};
pub use error::{MotionError, MotionResult};
pub use mmu::{MmuReachMg, MotionModelInterface};
pub use state_machine::{MorphableGraphStateMachine, SecondaryIkTarget};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
