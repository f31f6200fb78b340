use anyhow::{bail, Context, Result};
use mg_reach::config::{load_settings, load_settings_from_path, MgSettings};
use mg_reach::mmu::{
    default_avatar_description, standing_posture_values, DirectRetargeting, InMemoryScene, Instruction,
    MotionModelInterface, SimulationState, Transform, MMU_MOTION_TYPE,
};
use mg_reach::utils::logging::{init_logging, log_settings_summary};
use mg_reach::utils::math::{Quaternion, Vector3};
use mg_reach::{MmuReachMg, APP_NAME, VERSION};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const MAX_STEPS: usize = 900;

/// Headless run: reach for a cup with the right hand until the MMU reports the end event
fn main() -> Result<()> {
    init_logging(Some(Path::new("mg-reach.log")));
    info!("{} {}", APP_NAME, VERSION);

    let settings = match env::args().nth(1) {
        Some(path) => load_settings_from_path(Path::new(&path))
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => load_settings().unwrap_or_else(MgSettings::default),
    };
    log_settings_summary(&settings);

    let scene = InMemoryScene::new().with_transform(Transform::new(
        "cup",
        Vector3::new(0.3, 1.2, 0.4),
        Quaternion::identity(),
    ));
    let mut mmu = MmuReachMg::new(settings, Arc::new(scene), Arc::new(DirectRetargeting::new()));
    let avatar = default_avatar_description("avatar");
    let response = mmu.initialize(avatar.clone(), &HashMap::new());
    if !response.successful {
        bail!("Initialization failed: {:?}", response.log_data);
    }
    let frame_time = mmu
        .state_machine()
        .map(|sm| sm.get_frame_time())
        .context("MMU has no state machine after initialization")?;

    let mut state = SimulationState::new(standing_posture_values(&avatar, Vector3::zero()));
    let instruction = Instruction::new("reach-1", "reach cup", MMU_MOTION_TYPE)
        .with_property("TargetID", "cup")
        .with_property("Hand", "Right");
    let response = mmu.assign_instruction(&instruction, &state);
    if !response.successful {
        bail!("Instruction rejected: {:?}", response.log_data);
    }

    for step in 0..MAX_STEPS {
        let result = mmu.do_step(frame_time, &state);
        state.current = result.posture;
        if let Some(event) = result.events.iter().find(|e| e.reference == instruction.id) {
            info!(
                "Step {}: {} ({}) with {} constraints",
                step,
                event.name,
                event.event_type,
                result.constraints.len()
            );
            for constraint in &result.constraints {
                info!("{}", serde_json::to_string(constraint)?);
            }
            mmu.dispose(&HashMap::new());
            return Ok(());
        }
    }
    mmu.dispose(&HashMap::new());
    bail!("Reach did not finish within {} steps", MAX_STEPS)
}
