use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ManipulationConfig;
use crate::environment::Environment;
use crate::error::PlanningError;
use crate::kinematic_traits::CollisionChecker;
use crate::manipulation::{BaseManipulation, MoveActiveJointsRequest, MoveManipulatorRequest};
use crate::planner::{Planner, PlannerParameters, PlannerRegistry};
use crate::robot::Robot;
use crate::tests::test_utils::{environment, planar_robot, test_config};
use crate::trajectory::Trajectory;

/// Planner that never finds a path, or never initializes.
struct Hopeless {
    calls: Arc<AtomicUsize>,
    broken: bool,
    seeds: Arc<Mutex<Vec<u64>>>,
}

impl Planner for Hopeless {
    fn initialize(&mut self, _robot: &Robot, params: &PlannerParameters) -> Result<(), String> {
        self.seeds.lock().unwrap().push(params.seed);
        if self.broken {
            Err("cannot initialize".into())
        } else {
            Ok(())
        }
    }

    fn plan(&mut self, robot: &mut Robot, _checker: &dyn CollisionChecker) -> Result<Trajectory, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Leaves the robot somewhere else, the retry loop must undo it.
        let moved: Vec<f64> = robot.values().iter().map(|v| v + 0.5).collect();
        robot.set_values(&moved).map_err(|e| e.to_string())?;
        Err("no path".into())
    }
}

type Setup = (BaseManipulation, Arc<AtomicUsize>, Arc<Mutex<Vec<u64>>>, Arc<Mutex<Environment>>);

fn with_hopeless(config: ManipulationConfig, broken: bool) -> Setup {
    let calls = Arc::new(AtomicUsize::new(0));
    let seeds = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PlannerRegistry::with_defaults();
    let (c, s) = (calls.clone(), seeds.clone());
    registry.register_planner("hopeless", move || {
        Box::new(Hopeless {
            calls: c.clone(),
            broken,
            seeds: s.clone(),
        })
    });
    let env = environment(planar_robot(2), vec![]);
    let manipulation = BaseManipulation::new(env.clone(), config).unwrap().with_registry(registry);
    (manipulation, calls, seeds, env)
}

fn hopeless_config() -> ManipulationConfig {
    ManipulationConfig {
        planner: "Hopeless".into(),
        ..test_config()
    }
}

#[test]
fn test_every_try_is_used_before_giving_up() {
    let (manipulation, calls, seeds, env) = with_hopeless(hopeless_config(), false);
    let request = MoveManipulatorRequest {
        arm_goal: vec![0.5, 0.5],
        ..MoveManipulatorRequest::default()
    };
    let result = manipulation.move_manipulator(&request);
    assert!(matches!(result, Err(PlanningError::PlanningFailed { tries: 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let seeds = seeds.lock().unwrap();
    assert_eq!(seeds.len(), 3);
    assert_eq!(seeds[1], seeds[0].wrapping_add(1));
    assert_eq!(seeds[2], seeds[0].wrapping_add(2));
    assert_eq!(env.lock().unwrap().robot.values(), &[0.0, 0.0]);
}

#[test]
fn test_active_joints_default_to_single_try() {
    let (manipulation, calls, _, _) = with_hopeless(hopeless_config(), false);
    let request = MoveActiveJointsRequest {
        goal: vec![0.5, 0.5],
        ..MoveActiveJointsRequest::default()
    };
    let result = manipulation.move_active_joints(&request);
    assert!(matches!(result, Err(PlanningError::PlanningFailed { tries: 1 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let request = MoveActiveJointsRequest {
        max_tries: Some(4),
        ..request
    };
    assert!(manipulation.move_active_joints(&request).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_initialization_failure_ends_retries() {
    let (manipulation, calls, seeds, _) = with_hopeless(hopeless_config(), true);
    let request = MoveManipulatorRequest {
        arm_goal: vec![0.5, 0.5],
        ..MoveManipulatorRequest::default()
    };
    let result = manipulation.move_manipulator(&request);
    assert!(matches!(result, Err(PlanningError::InitializationFailed(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(seeds.lock().unwrap().len(), 1);
}

#[test]
fn test_unknown_planner_falls_back() {
    let config = ManipulationConfig {
        planner: "no-such-planner".into(),
        ..test_config()
    };
    let env = environment(planar_robot(2), vec![]);
    let manipulation = BaseManipulation::new(env.clone(), config).unwrap();
    let request = MoveActiveJointsRequest {
        goal: vec![0.5, -0.5],
        ..MoveActiveJointsRequest::default()
    };
    manipulation.move_active_joints(&request).unwrap();
    assert!(env.lock().unwrap().robot.motion().is_some());
}

#[test]
fn test_empty_registry_reports_missing_planner() {
    let env = environment(planar_robot(2), vec![]);
    let manipulation = BaseManipulation::new(env, test_config())
        .unwrap()
        .with_registry(PlannerRegistry::new());
    let request = MoveActiveJointsRequest {
        goal: vec![0.5, -0.5],
        ..MoveActiveJointsRequest::default()
    };
    assert!(matches!(
        manipulation.move_active_joints(&request),
        Err(PlanningError::PlannerNotFound(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let env = environment(planar_robot(2), vec![]);
    let config = ManipulationConfig {
        max_vel_mult: 0.0,
        ..test_config()
    };
    assert!(matches!(BaseManipulation::new(env, config), Err(PlanningError::Config(_))));
}
