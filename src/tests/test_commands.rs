use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};

use crate::error::PlanningError;
use crate::ik::{ConeFilter, GoalSpec};
use crate::kinematic_traits::Pose;
use crate::manipulation::{FindIkRequest, JitterActiveRequest, MoveActiveJointsRequest, MoveManipulatorRequest};
use crate::planar_arm::Disk;
use crate::robot::{AffineDofs, Manipulator};
use crate::tests::test_utils::{assert_close, environment, manipulation, planar_manipulator, planar_robot};
use crate::trajectory::Trajectory;

fn disk(x: f64, y: f64, radius: f64) -> Disk {
    Disk {
        center: Point3::new(x, y, 0.0),
        radius,
    }
}

#[test]
fn test_move_active_joints_reaches_goal_and_restores_robot() {
    let env = environment(planar_robot(2), vec![]);
    let manipulation = manipulation(&env);
    let request = MoveActiveJointsRequest {
        goal: vec![1.0, 0.5],
        ..MoveActiveJointsRequest::default()
    };
    let output = manipulation.move_active_joints(&request).unwrap();
    assert!(output.executed);

    let env = env.lock().unwrap();
    assert_eq!(env.robot.values(), &[0.0, 0.0]);
    let motion = env.robot.motion().expect("trajectory was not executed");
    assert_close(motion.first_configuration().unwrap(), &[0.0, 0.0], 1e-12);
    assert_close(motion.last_configuration().unwrap(), &[1.0, 0.5], 1e-12);
    assert!(motion.total_duration() > 0.0);
}

#[test]
fn test_move_active_joints_rejects_wrong_dimension() {
    let env = environment(planar_robot(2), vec![]);
    let request = MoveActiveJointsRequest {
        goal: vec![1.0],
        ..MoveActiveJointsRequest::default()
    };
    let result = manipulation(&env).move_active_joints(&request);
    assert!(matches!(
        result,
        Err(PlanningError::DimensionMismatch { expected: 2, found: 1 })
    ));
    assert!(env.lock().unwrap().robot.motion().is_none());
}

#[test]
fn test_move_manipulator_plans_around_obstacle() {
    // The disk blocks the arm swinging stretched from x to y.
    let env = environment(planar_robot(2), vec![disk(1.4, 1.4, 0.3)]);
    let request = MoveManipulatorRequest {
        arm_goal: vec![FRAC_PI_2, 0.0],
        ..MoveManipulatorRequest::default()
    };
    manipulation(&env).move_manipulator(&request).unwrap();

    let env = env.lock().unwrap();
    let motion = env.robot.motion().unwrap();
    assert_close(motion.last_configuration().unwrap(), &[FRAC_PI_2, 0.0], 1e-12);
    assert!(motion.len() > 2);
    assert_eq!(env.robot.values(), &[0.0, 0.0]);
}

#[test]
fn test_failed_goal_jitter_restores_robot() {
    let mut robot = planar_robot(2);
    robot.set_active_dofs(&[1], AffineDofs::empty()).unwrap();
    // The goal points the arm straight through the disk, too deep to jitter out.
    let env = environment(robot, vec![disk(0.0, 1.5, 0.3)]);
    let request = MoveManipulatorRequest {
        arm_goal: vec![FRAC_PI_2, 0.0],
        ..MoveManipulatorRequest::default()
    };
    let result = manipulation(&env).move_manipulator(&request);
    assert!(matches!(result, Err(PlanningError::JitterFailed("goal"))));

    let env = env.lock().unwrap();
    assert_eq!(env.robot.values(), &[0.0, 0.0]);
    assert_eq!(env.robot.active_dofs().indices, vec![1]);
    assert!(env.robot.motion().is_none());
}

#[test]
fn test_move_manipulator_rejects_arm_dimension() {
    let env = environment(planar_robot(2), vec![]);
    let request = MoveManipulatorRequest {
        arm_goal: vec![0.1, 0.2, 0.3],
        ..MoveManipulatorRequest::default()
    };
    let result = manipulation(&env).move_manipulator(&request);
    assert!(matches!(result, Err(PlanningError::DimensionMismatch { .. })));
}

#[test]
fn test_jitter_active_repairs_colliding_start() {
    // Grazes the first link at the zero configuration.
    let env = environment(planar_robot(2), vec![disk(0.5, 0.05, 0.06)]);
    let request = JitterActiveRequest {
        output_final: true,
        ..JitterActiveRequest::default()
    };
    let output = manipulation(&env).jitter_active(&request).unwrap();
    let final_values = output.final_values.unwrap();
    assert!(final_values[0] < -0.02, "not repaired: {:?}", final_values);
    assert!(final_values.iter().all(|q| q.abs() <= 0.03));

    let env = env.lock().unwrap();
    let motion = env.robot.motion().unwrap();
    assert_eq!(motion.len(), 2);
    assert_close(motion.first_configuration().unwrap(), &[0.0, 0.0], 1e-12);
    assert_eq!(env.robot.values(), &[0.0, 0.0]);
}

#[test]
fn test_jitter_active_valid_start() {
    let env = environment(planar_robot(2), vec![]);
    let output = manipulation(&env).jitter_active(&JitterActiveRequest::default()).unwrap();
    assert_eq!(output.final_values, None);
    assert_eq!(env.lock().unwrap().robot.motion().unwrap().len(), 1);
}

#[test]
fn test_jitter_active_fails_deep_in_collision() {
    let env = environment(planar_robot(2), vec![disk(1.0, 0.0, 0.5)]);
    let result = manipulation(&env).jitter_active(&JitterActiveRequest::default());
    assert!(matches!(result, Err(PlanningError::JitterFailed(_))));
    assert!(env.lock().unwrap().robot.motion().is_none());
}

#[test]
fn test_set_active_manipulator_by_name_and_index() {
    let mut robot = planar_robot(2);
    robot
        .add_manipulator(Manipulator {
            name: "other".into(),
            ..planar_manipulator(2)
        })
        .unwrap();
    let env = environment(robot, vec![]);
    let manipulation = manipulation(&env);

    assert_eq!(manipulation.set_active_manipulator("other").unwrap(), 1);
    assert_eq!(env.lock().unwrap().robot.active_manipulator_index(), 1);
    assert_eq!(manipulation.set_active_manipulator("0").unwrap(), 0);
    assert!(matches!(
        manipulation.set_active_manipulator("missing"),
        Err(PlanningError::NoActiveManipulator(_))
    ));
    assert!(manipulation.set_active_manipulator("5").is_err());
    assert_eq!(env.lock().unwrap().robot.active_manipulator_index(), 0);
}

#[test]
fn test_find_ik_with_cone_filter() {
    let env = environment(planar_robot(2), vec![]);
    // Tip at (1, 1): the elbow-left solution ends pointing along x, the other along y.
    let goal = GoalSpec::Translation3D(Vector3::new(1.0, 1.0, 0.0));
    let cone = ConeFilter::new(Vector3::x(), Vector3::x(), 0.1).unwrap();
    let request = FindIkRequest {
        solve_all: true,
        ..FindIkRequest::new(goal, cone)
    };
    let output = manipulation(&env).find_ik_with_filters(&request).unwrap();
    assert_eq!(output.solutions.len(), 1);
    assert_close(&output.solutions[0], &[FRAC_PI_2, -FRAC_PI_2], 1e-9);
    assert!(!output.executed);
}

#[test]
fn test_find_ik_rejecting_cone() {
    let env = environment(planar_robot(2), vec![]);
    let goal = GoalSpec::Translation3D(Vector3::new(1.0, 1.0, 0.0));
    // The tool z axis of a planar arm never leaves the world z axis.
    let cone = ConeFilter::new(Vector3::z(), Vector3::x(), 0.1).unwrap();
    let result = manipulation(&env).find_ik_with_filters(&FindIkRequest::new(goal, cone));
    assert!(matches!(result, Err(PlanningError::NoIkSolution)));
}

#[test]
fn test_find_ik_error_precedence() {
    let mut robot = crate::robot::Robot::new("planar", vec![-PI; 2], vec![PI; 2]).unwrap();
    robot
        .add_manipulator(Manipulator {
            ik_solver: None,
            ..planar_manipulator(2)
        })
        .unwrap();
    let without_solver = environment(robot, vec![]);
    let goal = GoalSpec::Translation3D(Vector3::new(1.0, 1.0, 0.0));
    let request = FindIkRequest {
        goal: goal.clone(),
        cone: None,
        solve_all: false,
        options: crate::ik::IkFilterOptions::CHECK_ENV_COLLISIONS,
    };
    assert!(matches!(
        manipulation(&without_solver).find_ik_with_filters(&request),
        Err(PlanningError::NoIkSolver(_))
    ));

    let with_solver = environment(planar_robot(2), vec![]);
    assert!(matches!(
        manipulation(&with_solver).find_ik_with_filters(&request),
        Err(PlanningError::NoFilter)
    ));
}

#[test]
fn test_execute_trajectory_resets_transforms_and_times() {
    let mut robot = planar_robot(2);
    let base = Pose::from_parts(Translation3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
    robot.set_transform(base);
    robot.set_active_dofs(&[0], AffineDofs::empty()).unwrap();
    let env = environment(robot, vec![]);

    let mut trajectory = Trajectory::new(2);
    trajectory.push_configuration(vec![0.0, 0.0]).unwrap();
    trajectory.push_configuration(vec![0.5, -0.5]).unwrap();
    let manipulation = manipulation(&env);
    manipulation.execute_trajectory(trajectory, true, None).unwrap();

    let env = env.lock().unwrap();
    let motion = env.robot.motion().unwrap();
    assert!(motion.total_duration() > 0.0);
    assert!(motion.points().iter().all(|p| p.transform == Some(base)));
    assert_eq!(env.robot.active_dofs().indices, vec![0]);
}

#[test]
fn test_execute_trajectory_keeps_timing_and_checks_dimension() {
    let env = environment(planar_robot(2), vec![]);
    let manipulation = manipulation(&env);
    let timed = crate::trajectory_io::parse_trajectory("2 2\n0 0 0\n3 0.5 0.5\n").unwrap();
    manipulation.execute_trajectory(timed, false, Some(2.0)).unwrap();
    assert_eq!(env.lock().unwrap().robot.motion().unwrap().total_duration(), 3.0);

    let narrow = Trajectory::new(1);
    assert!(matches!(
        manipulation.execute_trajectory(narrow, false, None),
        Err(PlanningError::DimensionMismatch { expected: 2, found: 1 })
    ));
}

#[test]
fn test_execute_trajectory_file() {
    let env = environment(planar_robot(2), vec![]);
    let path = std::env::temp_dir().join(format!("rs-manipulation-exec-{}.traj", std::process::id()));
    std::fs::write(&path, "2 2\n0 0 0\n0 0.25 0.25\n").unwrap();
    let output = manipulation(&env).execute_trajectory_file(&path, false, None).unwrap();
    let _ = std::fs::remove_file(&path);
    assert!(output.executed);
    assert!(env.lock().unwrap().robot.motion().unwrap().total_duration() > 0.0);
    assert!(manipulation(&env).execute_trajectory_file(&path, false, None).is_err());
}
