use crate::config::concurrency::ThreadPoolConfig;
use crate::error::{MotionError, MotionResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "mg_config.toml";

/// Default ceiling on `nSteps` and on locomotion states planned per action
pub const DEFAULT_MAX_STEPS: usize = 64;

// =============================================================================
// Reach MMU Configuration
// =============================================================================

/// Playback and hand-off tuning of the morphable graph state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineSettings {
    /// Playback speed multiplier applied to every `update(dt)`
    pub speed: f32,
    /// Upper bound on queue polls before an idle state is synthesized
    pub n_max_state_queries: usize,
    /// Back-off between two empty queue polls
    pub state_query_interval_ms: u64,
    /// Number of poses kept in the rolling pose history
    pub buffer_size: usize,
    /// Remaining walk distance below which locomotion ends
    pub max_step_length: f32,
    /// Seconds a synthesized idle pose is held before the next hand-off attempt
    pub idle_fallback_duration: f32,
}

impl Default for StateMachineSettings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            n_max_state_queries: 20,
            state_query_interval_ms: 5,
            buffer_size: 10,
            max_step_length: 0.8,
            idle_fallback_duration: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Candidate samples drawn per constrained node
    pub n_random_samples: usize,
    /// Action whose nodes are used to walk toward trajectory waypoints
    pub locomotion_action: String,
    /// Keep the sampled heading of idle clips instead of aligning it
    pub ignore_idle_rotation: bool,
    /// Frames over which a new clip is blended out of the previous pose
    pub transition_window: usize,
    /// Frames around a constrained keyframe that receive the IK correction
    pub interpolation_window: usize,
    /// Local head axis used for look-at
    pub look_at_dir: [f32; 3],
    /// Fixed seed for the sampling RNG, `None` draws from the OS
    pub seed: Option<u64>,
    /// Largest accepted `nSteps`, also caps the locomotion states of one action
    pub max_steps: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            n_random_samples: 64,
            locomotion_action: "walk".to_string(),
            ignore_idle_rotation: false,
            transition_window: 8,
            interpolation_window: 12,
            look_at_dir: [0.0, 0.0, 1.0],
            seed: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkSettings {
    /// Distance/velocity threshold of the secondary target stopping test
    pub eps: f32,
    /// Distance under which the end effector starts turning toward the target orientation
    pub rotation_distance: f32,
    pub max_ik_iter: usize,
    /// Pursuit speed of a secondary target in units per second
    pub secondary_target_speed: f32,
    /// Extra blend weight per link toward the end of the chain
    pub link_lead: f32,
    /// Positional tolerance at which the CCD solver stops early
    pub ik_tolerance: f32,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            eps: 0.001,
            rotation_distance: 0.8,
            max_ik_iter: 30,
            secondary_target_speed: 0.5,
            link_lead: 0.05,
            ik_tolerance: 0.0005,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootplantSettings {
    /// Frames inspected when detecting foot contacts
    pub window: usize,
    /// Maximum per-frame foot displacement that still counts as contact
    pub contact_tolerance: f32,
    /// Maximum height above ground that still counts as contact
    pub foot_lift_tolerance: f32,
    /// Grounding is skipped when the foot is farther than this from its plant
    pub max_correction: f32,
    pub ground_height: f32,
}

impl Default for FootplantSettings {
    fn default() -> Self {
        Self {
            window: 20,
            contact_tolerance: 0.01,
            foot_lift_tolerance: 0.15,
            max_correction: 0.25,
            ground_height: 0.0,
        }
    }
}

/// Complete configuration of one reach MMU instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgSettings {
    /// Motion graph description; the built-in demo graph is used when unset
    pub model_file: Option<PathBuf>,
    /// Scale from scene units to motion model units
    pub target_to_mmu_scale: f32,
    pub right_reach_action_name: String,
    pub left_reach_action_name: String,
    pub two_hand_reach_action_name: String,
    /// Keyframe label carrying the hand contact in the reach primitives
    pub reach_keyframe_label: String,
    /// Secondary targets use the spine chain and keep the other shoulder in place
    pub use_long_chain_for_secondary_ik: bool,
    pub look_at_secondary_targets: bool,
    pub activate_grounding: bool,
    pub set_orientation_constraints: bool,
    /// Pause playback at the contact keyframe
    pub hold_frame: bool,
    pub look_at_constraints: bool,
    /// Root offset in the avatar's heading frame added when re-anchoring
    pub root_offset: [f32; 3],
    pub state_machine: StateMachineSettings,
    pub planner: PlannerSettings,
    pub ik: IkSettings,
    pub footplant: FootplantSettings,
    pub concurrency: ThreadPoolConfig,
}

impl Default for MgSettings {
    fn default() -> Self {
        Self {
            model_file: None,
            target_to_mmu_scale: 1.0,
            right_reach_action_name: "reachRight".to_string(),
            left_reach_action_name: "reachLeft".to_string(),
            two_hand_reach_action_name: "reachBoth".to_string(),
            reach_keyframe_label: "contact0".to_string(),
            use_long_chain_for_secondary_ik: false,
            look_at_secondary_targets: false,
            activate_grounding: false,
            set_orientation_constraints: false,
            hold_frame: true,
            look_at_constraints: false,
            root_offset: [0.0, 0.0, 0.0],
            state_machine: StateMachineSettings::default(),
            planner: PlannerSettings::default(),
            ik: IkSettings::default(),
            footplant: FootplantSettings::default(),
            concurrency: ThreadPoolConfig::default(),
        }
    }
}

impl MgSettings {
    /// Reject values that would stall or divide by zero at runtime
    pub fn validate(&self) -> MotionResult<()> {
        if self.state_machine.n_max_state_queries == 0 {
            return Err(MotionError::Config {
                reason: "state_machine.n_max_state_queries must be at least 1".to_string(),
            });
        }
        if self.state_machine.buffer_size == 0 {
            return Err(MotionError::Config {
                reason: "state_machine.buffer_size must be at least 1".to_string(),
            });
        }
        if self.target_to_mmu_scale <= 0.0 {
            return Err(MotionError::Config {
                reason: format!("target_to_mmu_scale must be positive, got {}", self.target_to_mmu_scale),
            });
        }
        if self.ik.secondary_target_speed <= 0.0 {
            return Err(MotionError::Config {
                reason: "ik.secondary_target_speed must be positive".to_string(),
            });
        }
        if self.planner.n_random_samples == 0 {
            return Err(MotionError::Config {
                reason: "planner.n_random_samples must be at least 1".to_string(),
            });
        }
        if self.planner.max_steps == 0 {
            return Err(MotionError::Config {
                reason: "planner.max_steps must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// Configuration file management
fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "mosim", "mg-reach")
        .map(|proj| proj.config_dir().join(CONFIG_FILE))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Load settings from a JSON (`.json`) or TOML file
pub fn load_settings_from_path(path: &Path) -> MotionResult<MgSettings> {
    let data = fs::read_to_string(path)?;
    let settings: MgSettings = if is_json(path) {
        serde_json::from_str(&data)?
    } else {
        toml::from_str(&data)?
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings_to_path(settings: &MgSettings, path: &Path) -> MotionResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = if is_json(path) {
        serde_json::to_string_pretty(settings)?
    } else {
        toml::to_string_pretty(settings)?
    };
    fs::write(path, data)?;
    Ok(())
}

pub fn save_settings(settings: &MgSettings) -> MotionResult<()> {
    if let Some(path) = config_path() {
        save_settings_to_path(settings, &path)?;
    }
    Ok(())
}

pub fn load_settings() -> Option<MgSettings> {
    let path = config_path()?;
    load_settings_from_path(&path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let data = r#"
            target_to_mmu_scale = 100.0
            [ik]
            max_ik_iter = 12
        "#;
        let settings: MgSettings = toml::from_str(data).unwrap();
        assert_eq!(settings.target_to_mmu_scale, 100.0);
        assert_eq!(settings.ik.max_ik_iter, 12);
        assert_eq!(settings.ik.eps, IkSettings::default().eps);
        assert_eq!(settings.state_machine.buffer_size, 10);
        assert_eq!(settings.right_reach_action_name, "reachRight");
    }

    #[test]
    fn test_validate_rejects_zero_queries() {
        let mut settings = MgSettings::default();
        assert!(settings.validate().is_ok());
        settings.state_machine.n_max_state_queries = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_steps() {
        let mut settings = MgSettings::default();
        assert_eq!(settings.planner.max_steps, DEFAULT_MAX_STEPS);
        settings.planner.max_steps = 0;
        assert!(matches!(settings.validate(), Err(MotionError::Config { .. })));
    }
}
