//! Randomized local search that nudges the active configuration out of collision or out of
//! a joint limit violation, optionally respecting a task constraint.

use rand::Rng;
use tracing::{debug, warn};

use crate::constraint::ConstraintFunction;
use crate::environment::{is_valid, is_valid_with_probes};
use crate::kinematic_traits::{CollisionChecker, Configuration};
use crate::robot::Robot;
use crate::utils::format_configuration;

/// Result of a jitter search. Callers are expected to branch on all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterOutcome {
    /// The configuration was valid as is; the robot state is unchanged.
    AlreadyValid,
    /// A nearby valid configuration was found and set on the robot.
    Repaired,
    /// The budget was exhausted; the robot state is restored to the input.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JitterParameters {
    /// Maximal number of random perturbations tried.
    pub max_iterations: usize,

    /// Each active DOF is perturbed uniformly within `[-radius, radius]`. The radius
    /// stays fixed for the whole search.
    pub radius: f64,

    /// Offset of the extra probes around every perturbed candidate (0 disables them). The
    /// input configuration is judged without probes.
    pub perturbation: f64,
}

impl Default for JitterParameters {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            radius: 0.03,
            perturbation: 1e-5,
        }
    }
}

impl JitterParameters {
    pub fn with_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }
}

/// Searches for a valid configuration close to the current active DOF values of the robot.
///
/// The constraint, if given, is applied to every perturbed candidate before the validity
/// check and may move it onto the constraint manifold. On [`JitterOutcome::Repaired`] the
/// robot holds the repaired values, otherwise it holds exactly the values it had on entry.
pub fn jitter_active_dofs<R: Rng + ?Sized>(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    params: &JitterParameters,
    constraint: Option<&dyn ConstraintFunction>,
    rng: &mut R,
) -> JitterOutcome {
    let saved = robot.save_state();
    let start = robot.active_dof_values();

    let constraint_ok = constraint.is_none_or(|c| c.is_satisfied(robot, &start));
    if constraint_ok && is_valid(robot, checker, &start) {
        robot.restore_state(&saved);
        return JitterOutcome::AlreadyValid;
    }

    let radius = params.radius.abs();
    for iteration in 0..params.max_iterations {
        let mut candidate: Configuration = start
            .iter()
            .map(|q| q + rng.gen_range(-radius..=radius))
            .collect();

        if let Some(constraint) = constraint {
            if !constraint.project(robot, &start, &mut candidate) {
                continue;
            }
        }

        if is_valid_with_probes(robot, checker, &candidate, params.perturbation) {
            robot.restore_state(&saved);
            if robot.set_active_dof_values(&candidate).is_ok() {
                debug!(
                    "jittered into {} after {} iterations",
                    format_configuration(&candidate),
                    iteration + 1
                );
                return JitterOutcome::Repaired;
            }
        }
    }

    robot.restore_state(&saved);
    warn!(
        "jitter failed to find a valid configuration near {} in {} iterations",
        format_configuration(&start),
        params.max_iterations
    );
    JitterOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::AffineDofs;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn robot() -> Robot {
        Robot::new("box", vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap()
    }

    /// Accepts every candidate unchanged, counting how often it was asked.
    struct CountingConstraint {
        calls: AtomicUsize,
    }

    impl ConstraintFunction for CountingConstraint {
        fn is_satisfied(&self, _robot: &Robot, _values: &[f64]) -> bool {
            true
        }

        fn project(&self, _robot: &Robot, _previous: &[f64], _candidate: &mut Configuration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_already_valid_is_untouched() {
        let mut robot = robot();
        robot.set_values(&[0.123456789, -0.5]).unwrap();
        let before = robot.save_state();
        let checker = |_: &Robot| false;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let outcome = jitter_active_dofs(&mut robot, &checker, &JitterParameters::default(), None, &mut rng);
        assert_eq!(outcome, JitterOutcome::AlreadyValid);
        assert_eq!(robot.save_state(), before);
    }

    #[test]
    fn test_valid_next_to_obstacle_is_untouched() {
        let mut robot = robot();
        robot.set_values(&[0.499999, 0.0]).unwrap();
        let before = robot.save_state();
        let checker = |r: &Robot| r.values()[0] > 0.5;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let outcome = jitter_active_dofs(&mut robot, &checker, &JitterParameters::default(), None, &mut rng);
        assert_eq!(outcome, JitterOutcome::AlreadyValid);
        assert_eq!(robot.save_state(), before);
    }

    #[test]
    fn test_repairs_small_collision() {
        let mut robot = robot();
        // Everything with the first joint below 0.01 collides.
        let checker = |r: &Robot| r.values()[0] < 0.01;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let params = JitterParameters {
            max_iterations: 1000,
            radius: 0.05,
            perturbation: 1e-5,
        };
        let outcome = jitter_active_dofs(&mut robot, &checker, &params, None, &mut rng);
        assert_eq!(outcome, JitterOutcome::Repaired);
        assert!(robot.values()[0] >= 0.01);
        assert!(robot.values()[0] <= 0.05);
        assert!(robot.values()[1].abs() <= 0.05);
    }

    #[test]
    fn test_repairs_limit_violation() {
        let mut robot = robot();
        robot.set_values(&[1.0 + 1e-3, 0.0]).unwrap();
        let checker = |_: &Robot| false;
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let outcome = jitter_active_dofs(&mut robot, &checker, &JitterParameters::default(), None, &mut rng);
        assert_eq!(outcome, JitterOutcome::Repaired);
        assert!(robot.values()[0] <= 1.0);
    }

    #[test]
    fn test_failure_restores_exactly_and_respects_budget() {
        let mut robot = robot();
        robot
            .set_active_dofs(&[1, 0], AffineDofs::X | AffineDofs::ROTATION_QUAT)
            .unwrap();
        robot.set_values(&[0.25, -0.75]).unwrap();
        let before = robot.save_state();
        let checker = |_: &Robot| true;
        let constraint = CountingConstraint {
            calls: AtomicUsize::new(0),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let params = JitterParameters::with_iterations(37);
        let outcome = jitter_active_dofs(&mut robot, &checker, &params, Some(&constraint), &mut rng);
        assert_eq!(outcome, JitterOutcome::Failed);
        assert_eq!(constraint.calls.load(Ordering::SeqCst), 37);
        assert_eq!(robot.save_state(), before);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let checker = |r: &Robot| r.values()[0] < 0.01;
        let run = |seed: u64| {
            let mut robot = robot();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            jitter_active_dofs(&mut robot, &checker, &JitterParameters::default(), None, &mut rng);
            robot.values().to_vec()
        };
        assert_eq!(run(5), run(5));
    }
}
