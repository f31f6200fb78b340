pub mod settings;
pub mod concurrency;

// Re-export commonly used types
pub use settings::{
    MgSettings, StateMachineSettings, PlannerSettings, IkSettings, FootplantSettings, DEFAULT_MAX_STEPS,
    load_settings, save_settings, load_settings_from_path, save_settings_to_path,
};
pub use concurrency::{SamplingPool, ThreadPoolConfig, SamplingPoolStats};
