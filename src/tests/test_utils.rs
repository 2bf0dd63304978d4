use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use crate::config::ManipulationConfig;
use crate::environment::Environment;
use crate::manipulation::BaseManipulation;
use crate::planar_arm::{Disk, DiskObstacles, PlanarArm, PlanarArmIk};
use crate::robot::{Manipulator, Robot};

/// Planar arm with two unit links followed by half meter links.
pub fn planar_arm(dof: usize) -> PlanarArm {
    let lengths = (0..dof).map(|i| if i < 2 { 1.0 } else { 0.5 }).collect();
    PlanarArm::new(lengths)
}

/// Manipulator "arm" on the first `dof` joints, with the analytical solver.
pub fn planar_manipulator(dof: usize) -> Manipulator {
    let arm = planar_arm(dof);
    Manipulator {
        name: "arm".into(),
        arm_indices: (0..dof).collect(),
        kinematics: Arc::new(arm.clone()),
        ik_solver: Some(Arc::new(PlanarArmIk::new(arm))),
    }
}

/// Robot with joint limits of +-PI carrying a planar manipulator.
pub fn planar_robot(dof: usize) -> Robot {
    let mut robot = Robot::new("planar", vec![-PI; dof], vec![PI; dof]).unwrap();
    robot.add_manipulator(planar_manipulator(dof)).unwrap();
    robot
}

pub fn environment(robot: Robot, disks: Vec<Disk>) -> Arc<Mutex<Environment>> {
    let dof = robot.dof();
    let checker = DiskObstacles::new(planar_arm(dof), (0..dof).collect(), disks);
    Arc::new(Mutex::new(Environment::new(robot, checker)))
}

/// Fixed seed and a jitter budget small enough for fast failures.
pub fn test_config() -> ManipulationConfig {
    ManipulationConfig {
        seed: 42,
        jitter_iterations: 500,
        ..ManipulationConfig::default()
    }
}

pub fn manipulation(environment: &Arc<Mutex<Environment>>) -> BaseManipulation {
    BaseManipulation::new(environment.clone(), test_config()).unwrap()
}

pub fn assert_close(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "{:?} and {:?} differ in length", a, b);
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < tolerance, "{:?} is not close to {:?}", a, b);
    }
}
