use glam::{Quat, Vec3};
use mg_reach::config::MgSettings;
use mg_reach::graph::{demo, GraphNodeId, NodeType};
use mg_reach::mmu::types::{EndeffectorType, SIMULATION_EVENT_END};
use mg_reach::mmu::{
    default_avatar_description, standing_posture_values, DirectRetargeting, InMemoryScene, Instruction,
    MotionModelInterface, SimulationState, Transform, MMU_MOTION_TYPE,
};
use mg_reach::planner::ActionDescriptor;
use mg_reach::state_machine::FlatGround;
use mg_reach::utils::math::{Quaternion, Vector3};
use mg_reach::{MmuReachMg, MorphableGraphStateMachine, MotionError};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MAX_STEPS: usize = 900;

fn settings() -> MgSettings {
    let mut settings = MgSettings::default();
    settings.planner.seed = Some(3);
    settings.planner.n_random_samples = 8;
    settings.concurrency.job_threads = 2;
    settings
}

fn scene() -> InMemoryScene {
    InMemoryScene::new()
        .with_transform(Transform::new("cup", Vector3::new(0.3, 1.2, 0.4), Quaternion::identity()))
        .with_transform(Transform::new("plate", Vector3::new(-0.3, 1.2, 0.4), Quaternion::identity()))
}

fn initialized_mmu() -> MmuReachMg {
    let mut mmu = MmuReachMg::new(settings(), Arc::new(scene()), Arc::new(DirectRetargeting::new()));
    let response = mmu.initialize(default_avatar_description("avatar"), &HashMap::new());
    assert!(response.successful, "{:?}", response.log_data);
    mmu
}

fn standing_state() -> SimulationState {
    let avatar = default_avatar_description("avatar");
    SimulationState::new(standing_posture_values(&avatar, Vector3::zero()))
}

/// Step until the end event for `instruction` arrives, returns the step index
fn run_until_finished(mmu: &mut MmuReachMg, instruction: &Instruction) -> (usize, Vec<EndeffectorType>) {
    let mut state = standing_state();
    let frame_time = mmu.state_machine().unwrap().get_frame_time();
    for step in 0..MAX_STEPS {
        let result = mmu.do_step(frame_time, &state);
        state.current = result.posture;
        if let Some(event) = result.events.iter().find(|e| e.reference == instruction.id) {
            assert_eq!(event.event_type, SIMULATION_EVENT_END);
            let hands = result
                .constraints
                .iter()
                .filter_map(|c| c.joint_constraint.as_ref().map(|j| j.joint_type))
                .collect();
            return (step, hands);
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("no end event within {} steps", MAX_STEPS);
}

fn wrist_error(mmu: &MmuReachMg, joint: &str, target: Vector3) -> f32 {
    let sm = mmu.state_machine().unwrap();
    let frame = sm.get_current_frame().unwrap();
    let wrist = sm.skeleton().global_position(&frame, joint).unwrap();
    (wrist - target.to_model()).length()
}

#[test]
fn test_one_handed_reach_finishes_once() {
    let mut mmu = initialized_mmu();
    let instruction = Instruction::new("reach-right", "reach cup", MMU_MOTION_TYPE)
        .with_property("TargetID", "cup")
        .with_property("Hand", "Right");
    assert!(mmu.assign_instruction(&instruction, &standing_state()).successful);

    let (_, hands) = run_until_finished(&mut mmu, &instruction);
    assert_eq!(hands, vec![EndeffectorType::RightHand]);
    assert!(mmu.is_finished());
    let error = wrist_error(&mmu, "RightHand", Vector3::new(0.3, 1.2, 0.4));
    assert!(error < 0.05, "right wrist off by {}", error);

    // the end event is reported a single time
    let state = standing_state();
    for _ in 0..10 {
        let result = mmu.do_step(1.0 / 30.0, &state);
        assert!(result.events.iter().all(|e| e.reference != instruction.id));
    }
}

#[test]
fn test_two_handed_reach_constrains_both_hands() {
    let mut mmu = initialized_mmu();
    let instruction = Instruction::new("reach-both", "reach both", MMU_MOTION_TYPE)
        .with_property("LeftTargetID", "plate")
        .with_property("RightTargetID", "cup");
    assert!(mmu.assign_instruction(&instruction, &standing_state()).successful);
    assert_eq!(mmu.final_constraints().len(), 2);

    let (_, hands) = run_until_finished(&mut mmu, &instruction);
    assert_eq!(hands, vec![EndeffectorType::LeftHand, EndeffectorType::RightHand]);
    let left = wrist_error(&mmu, "LeftHand", Vector3::new(-0.3, 1.2, 0.4));
    let right = wrist_error(&mmu, "RightHand", Vector3::new(0.3, 1.2, 0.4));
    assert!(left < 0.06 && right < 0.06, "left {} right {}", left, right);
}

#[test]
fn test_new_reach_after_finish_is_replanned() {
    let mut mmu = initialized_mmu();
    let first = Instruction::new("reach-right", "reach cup", MMU_MOTION_TYPE)
        .with_property("TargetID", "cup")
        .with_property("Hand", "Right");
    assert!(mmu.assign_instruction(&first, &standing_state()).successful);
    run_until_finished(&mut mmu, &first);

    // a finished reach is replanned rather than extended
    let second = Instruction::new("reach-left", "reach plate", MMU_MOTION_TYPE)
        .with_property("TargetID", "plate")
        .with_property("Hand", "Left");
    assert!(mmu.assign_instruction(&second, &standing_state()).successful);
    let sm = mmu.state_machine().unwrap();
    assert!(!sm.has_secondary_ik_target());
    assert_eq!(sm.current_node().0, *sm.start_node());
}

fn state_machine(settings: MgSettings) -> MorphableGraphStateMachine {
    let graph = Arc::new(demo::build_demo_graph().unwrap());
    MorphableGraphStateMachine::new(graph, settings, Arc::new(FlatGround::new(0.0))).unwrap()
}

#[test]
fn test_bounded_stall_on_empty_queue() {
    let mut settings = settings();
    settings.state_machine.n_max_state_queries = 4;
    settings.state_machine.state_query_interval_ms = 3;
    let sm = state_machine(settings);

    let polls_before = sm.state_queue_polls();
    let start = Instant::now();
    match sm.wait_for_planner() {
        Err(MotionError::PlannerStarved { attempts }) => assert_eq!(attempts, 4),
        other => panic!("expected starvation, got ok: {}", other.is_ok()),
    }
    let elapsed = start.elapsed();
    assert_eq!(sm.state_queue_polls() - polls_before, 4);
    assert!(elapsed >= Duration::from_millis(9), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1));
}

#[test]
fn test_refresh_snaps_back_to_start_node() {
    let sm = state_machine(settings());
    let reach = ActionDescriptor::new("reachRight");
    sm.enqueue_states(&[reach.clone()], sm.get_frame_time(), true).unwrap();
    let mut left_start = false;
    for _ in 0..MAX_STEPS {
        sm.update(sm.get_frame_time()).unwrap();
        if sm.current_node().0 != *sm.start_node() {
            left_start = true;
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(left_start);

    sm.enqueue_states(&[reach], sm.get_frame_time(), true).unwrap();
    assert_eq!(sm.current_node().0, *sm.start_node());
    assert!(sm.is_idle());
}

#[test]
fn test_remove_secondary_target_restores_playback() {
    let sm = state_machine(settings());
    sm.set_play(false);
    let baseline = sm.get_pose(None).unwrap();

    sm.set_secondary_ik_target("RightHand", Vec3::new(-0.3, 1.3, 0.35), Some(Quat::IDENTITY), None, false)
        .unwrap();
    for _ in 0..5 {
        sm.get_pose(None).unwrap();
    }
    let reached = sm.get_pose(None).unwrap();
    assert_ne!(reached, baseline);

    sm.remove_secondary_ik_target();
    sm.remove_secondary_ik_target();
    assert_eq!(sm.get_pose(None).unwrap(), baseline);
}

fn horizontal_step(a: Vec3, b: Vec3) -> f32 {
    Vec3::new(a.x - b.x, 0.0, a.z - b.z).length()
}

#[test]
fn test_append_mid_walk_continues_from_clip_end() {
    let sm = state_machine(settings());
    let dt = sm.get_frame_time();
    let walk = ActionDescriptor::new("walk").with_control_points(vec![[0.0, 0.0, 4.0]]);
    sm.enqueue_states(&[walk], dt, true).unwrap();

    let walk_step = GraphNodeId::new("walk", "step");
    let mut in_step = false;
    for _ in 0..MAX_STEPS {
        sm.update(dt).unwrap();
        if sm.current_node().0 == walk_step {
            in_step = true;
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(in_step, "never entered a walk step");
    for _ in 0..10 {
        sm.update(dt).unwrap();
    }
    let (walking_node, walking_type) = sm.current_node();
    assert_eq!(walking_type, NodeType::Standard);
    assert!(sm.get_current_frame_idx() > 0);

    // appended without refresh: the current step keeps playing
    sm.enqueue_states(&[ActionDescriptor::new("reachRight")], dt, false).unwrap();
    assert_eq!(sm.current_node().0, walking_node);
    let deadline = Instant::now() + Duration::from_secs(10);
    while sm.queued_states() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(sm.queued_states() > 0, "nothing was planned");

    let mut previous = sm.get_position();
    let mut max_walk_step = 0.0_f32;
    let mut handoff = None;
    for _ in 0..MAX_STEPS {
        sm.update(dt).unwrap();
        let position = sm.get_position();
        let step = horizontal_step(position, previous);
        let (node, _) = sm.current_node();
        if node != walking_node {
            handoff = Some((node, step));
            break;
        }
        max_walk_step = max_walk_step.max(step);
        previous = position;
    }
    let (next_node, handoff_step) = handoff.expect("the walk step never ended");
    assert_eq!(next_node, GraphNodeId::new("reachRight", "reach"));
    assert!(max_walk_step > 0.0);
    assert!(
        handoff_step < 0.15,
        "root moved {} at the hand-off, walk steps were at most {}",
        handoff_step,
        max_walk_step
    );
}
