//! Shared environment: the robot and the collision checker that judges its states.
//! A manipulation command holds the environment lock from start to finish.

use crate::kinematic_traits::CollisionChecker;
use crate::robot::Robot;

pub struct Environment {
    pub robot: Robot,
    pub checker: Box<dyn CollisionChecker>,
}

impl Environment {
    pub fn new(robot: Robot, checker: impl CollisionChecker + 'static) -> Self {
        Environment {
            robot,
            checker: Box::new(checker),
        }
    }

    /// Splits the environment into the robot and the checker so both can be borrowed at once.
    pub fn parts(&mut self) -> (&mut Robot, &dyn CollisionChecker) {
        (&mut self.robot, self.checker.as_ref())
    }
}

/// Sets the active DOF values and reports if the robot is within limits and collision free.
/// The robot is left in the checked state, callers restore it when needed.
pub fn is_valid(robot: &mut Robot, checker: &dyn CollisionChecker, values: &[f64]) -> bool {
    robot.active_within_limits(values) && robot.set_active_dof_values(values).is_ok() && !checker.collides(robot)
}

/// Like [`is_valid`] but also probes tiny offsets around the values, as very small changes
/// in angles may flip the outcome of a collision check.
pub fn is_valid_with_probes(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    values: &[f64],
    perturbation: f64,
) -> bool {
    if !is_valid(robot, checker, values) {
        return false;
    }
    if perturbation <= 0.0 {
        return true;
    }
    for offset in [perturbation, -perturbation] {
        let probe: Vec<f64> = values.iter().map(|q| q + offset).collect();
        if robot.set_active_dof_values(&probe).is_err() || checker.collides(robot) {
            return false;
        }
    }
    true
}
