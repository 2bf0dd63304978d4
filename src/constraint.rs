//! Task constraints applied to candidate configurations before they are checked for validity.

use nalgebra::DVector;

use crate::jacobian::Jacobian;
use crate::kinematic_traits::{Configuration, Pose};
use crate::robot::{Manipulator, Robot};

/// Maps a candidate configuration (over the active DOFs) onto a task constraint.
pub trait ConstraintFunction: Send + Sync {
    /// True if the values already satisfy the constraint.
    fn is_satisfied(&self, robot: &Robot, values: &[f64]) -> bool;

    /// Moves `candidate` onto the constraint manifold. `previous` is the last accepted
    /// configuration the candidate was derived from. Returns false if the candidate cannot
    /// be made to satisfy the constraint; `candidate` is only modified on success.
    fn project(&self, robot: &Robot, previous: &[f64], candidate: &mut Configuration) -> bool;
}

/// Keeps the selected end effector DOFs of a manipulator at a target frame, by retracting
/// candidates with pseudo-inverse Jacobian steps. The freedoms refer to the target frame axes:
/// translation x, y, z then rotation about x, y, z. A constrained DOF must stay within
/// `error_threshold` of the target, the remaining ones are free.
pub struct GripperConstraint {
    manipulator: Manipulator,
    target: Pose,
    constrained: Vec<usize>,
    error_threshold: f64,

    /// Newton iterations before giving up.
    pub max_iterations: usize,

    /// Largest per-DOF move between `previous` and the projected configuration.
    pub max_retraction: f64,

    /// Disturbance used for the numerical Jacobian.
    pub epsilon: f64,
}

impl GripperConstraint {
    /// Freedom values are flags as in the command interface: non-zero means constrained.
    pub fn new(manipulator: Manipulator, target: Pose, freedoms: [f64; 6], error_threshold: f64) -> Self {
        let constrained = freedoms
            .iter()
            .enumerate()
            .filter(|(_, f)| **f != 0.0)
            .map(|(i, _)| i)
            .collect();
        GripperConstraint {
            manipulator,
            target,
            constrained,
            error_threshold,
            max_iterations: 20,
            max_retraction: 0.5,
            epsilon: 1e-6,
        }
    }

    /// Constrained components of the end effector deviation from the target, in the target frame.
    fn error(&self, robot: &Robot, values: &[f64]) -> Option<DVector<f64>> {
        let ee = robot
            .end_effector_transform_for_active(&self.manipulator, values)
            .ok()?;
        let relative = self.target.inverse() * ee;
        let translation = relative.translation.vector;
        let rotation = relative.rotation.scaled_axis();
        let full = [
            translation.x,
            translation.y,
            translation.z,
            rotation.x,
            rotation.y,
            rotation.z,
        ];
        Some(DVector::from_iterator(
            self.constrained.len(),
            self.constrained.iter().map(|&i| full[i]),
        ))
    }

    fn within_threshold(&self, error: &DVector<f64>) -> bool {
        error.iter().all(|e| e.abs() <= self.error_threshold)
    }
}

impl ConstraintFunction for GripperConstraint {
    fn is_satisfied(&self, robot: &Robot, values: &[f64]) -> bool {
        self.error(robot, values)
            .is_some_and(|error| self.within_threshold(&error))
    }

    fn project(&self, robot: &Robot, previous: &[f64], candidate: &mut Configuration) -> bool {
        let mut q = candidate.clone();
        for _ in 0..=self.max_iterations {
            let Some(error) = self.error(robot, &q) else {
                return false;
            };
            if self.within_threshold(&error) {
                let close_to_previous = previous.len() == q.len()
                    && previous
                        .iter()
                        .zip(&q)
                        .all(|(p, x)| (x - p).abs() <= self.max_retraction);
                if close_to_previous && robot.active_within_limits(&q) {
                    *candidate = q;
                    return true;
                }
                return false;
            }

            let forward = |x: &[f64]| {
                robot
                    .end_effector_transform_for_active(&self.manipulator, x)
                    .unwrap_or_else(|_| Pose::identity())
            };
            let jacobian = Jacobian::new(forward, &q, self.epsilon)
                .in_frame(&self.target.rotation)
                .select_rows(&self.constrained);
            match jacobian.velocities_from_vector(&error) {
                Ok(step) => {
                    for (value, delta) in q.iter_mut().zip(step.iter()) {
                        *value -= delta;
                    }
                }
                Err(_) => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planar_arm::PlanarArm;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};
    use std::f64::consts::PI;
    use std::sync::Arc;

    fn setup() -> (Robot, Manipulator) {
        let arm = PlanarArm::new(vec![1.0, 1.0]);
        let mut robot = Robot::new("planar", vec![-PI; 2], vec![PI; 2]).unwrap();
        let manipulator = Manipulator {
            name: "arm".into(),
            arm_indices: vec![0, 1],
            kinematics: Arc::new(arm),
            ik_solver: None,
        };
        robot.add_manipulator(manipulator.clone()).unwrap();
        (robot, manipulator)
    }

    #[test]
    fn test_satisfied_at_target() {
        let (robot, manipulator) = setup();
        let target = robot.end_effector_transform_for_arm(&manipulator, &[0.3, 0.4]);
        let constraint = GripperConstraint::new(manipulator, target, [1.0, 1.0, 0.0, 0.0, 0.0, 0.0], 1e-4);
        assert!(constraint.is_satisfied(&robot, &[0.3, 0.4]));
        assert!(!constraint.is_satisfied(&robot, &[0.4, 0.4]));
    }

    #[test]
    fn test_projects_onto_target_x() {
        let (robot, manipulator) = setup();
        // Keep the tip on the line x = 1.2, y is free.
        let target = Pose::from_parts(Translation3::new(1.2, 0.0, 0.0), UnitQuaternion::identity());
        let constraint = GripperConstraint::new(manipulator.clone(), target, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-6);
        let previous = vec![0.5, 0.5];
        let mut candidate = vec![0.52, 0.48];
        assert!(constraint.project(&robot, &previous, &mut candidate));
        let ee = robot.end_effector_transform_for_arm(&manipulator, &candidate);
        assert!((ee.translation.vector.x - 1.2).abs() < 1e-5);
    }

    #[test]
    fn test_unreachable_target_is_rejected() {
        let (robot, manipulator) = setup();
        let target = Pose::from_parts(Translation3::from(Vector3::new(5.0, 0.0, 0.0)), UnitQuaternion::identity());
        let constraint = GripperConstraint::new(manipulator, target, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-6);
        let mut candidate = vec![0.1, 0.1];
        let before = candidate.clone();
        assert!(!constraint.project(&robot, &before, &mut candidate));
        assert_eq!(candidate, before);
    }
}
