use mg_reach::config::{
    load_settings_from_path, save_settings_to_path, MgSettings, SamplingPool, ThreadPoolConfig,
};
use mg_reach::MotionError;
use std::env;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

fn temp_path(extension: &str) -> PathBuf {
    env::temp_dir()
        .join(format!("mg-reach-{}", Uuid::new_v4()))
        .join(format!("mg_config.{}", extension))
}

#[test]
fn test_settings_persistence_toml() {
    let mut original = MgSettings::default();
    original.target_to_mmu_scale = 100.0;
    original.use_long_chain_for_secondary_ik = true;
    original.planner.seed = Some(42);
    original.ik.max_ik_iter = 12;

    let path = temp_path("toml");
    save_settings_to_path(&original, &path).unwrap();
    let loaded = load_settings_from_path(&path).unwrap();
    assert_eq!(loaded, original);

    fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_settings_persistence_json() {
    let mut original = MgSettings::default();
    original.model_file = Some(PathBuf::from("graphs/reach.json"));
    original.state_machine.n_max_state_queries = 5;

    let path = temp_path("json");
    save_settings_to_path(&original, &path).unwrap();
    let loaded = load_settings_from_path(&path).unwrap();
    assert_eq!(loaded.model_file, original.model_file);
    assert_eq!(loaded.state_machine.n_max_state_queries, 5);

    fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_invalid_settings_file_is_rejected() {
    let path = temp_path("toml");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[state_machine]\nn_max_state_queries = 0\n").unwrap();
    assert!(matches!(load_settings_from_path(&path), Err(MotionError::Config { .. })));

    fs::write(&path, "target_to_mmu_scale = \"big\"\n").unwrap();
    assert!(matches!(load_settings_from_path(&path), Err(MotionError::Config { .. })));

    fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_missing_settings_file_is_io_error() {
    let path = temp_path("toml");
    assert!(matches!(load_settings_from_path(&path), Err(MotionError::Io { .. })));
}

#[test]
fn test_thread_pool_config() {
    let config = ThreadPoolConfig::default();
    assert!(config.job_threads >= 1);

    let pool = SamplingPool::new(ThreadPoolConfig {
        job_threads: 3,
        stack_size: None,
    })
    .unwrap();
    assert_eq!(pool.get_stats().job_threads, 3);
    let scores = [4.0f32, 1.5, 2.0, 1.5];
    assert_eq!(pool.argmin_by_score(&scores, |s| *s), Some(1));
}
