//! Cartesian line tracking

use nalgebra::DVector;
use tracing::{debug, info};

use crate::ik::{find_ik_solutions, GoalSpec, IkFilterOptions};
use crate::jacobian::Jacobian;
use crate::kinematic_traits::{CollisionChecker, Configuration, Pose};
use crate::robot::{Manipulator, Robot};
use crate::trajectory::{Trajectory, Waypoint};
use crate::utils::{self, format_configuration, format_pose, max_joint_step};
use crate::workspace::{WorkspaceTrajectoryParameters, WorkspaceTracker};

/// Tracks a workspace line by solving IK at every step and choosing the solution closest to
/// the previous configuration. A solution is only taken if its joint step points within
/// `max_deviation_angle` of the step the Jacobian predicts for the commanded motion. In greedy mode the first step without an acceptable solution
/// ends the search; otherwise the tracker backtracks to earlier steps and tries their next
/// best solutions.
pub struct CartesianTracker {
    /// Transition cost coefficients per joint (heavy base joints are more expensive to move).
    /// Joints without a coefficient weigh 1.
    pub transition_coefficients: Vec<f64>,

    /// Budget of backtracking moves in non greedy mode.
    pub max_backtracks: usize,

    /// Largest move of a single joint between two consecutive steps, radians.
    pub max_joint_jump: f64,

    params: Option<WorkspaceTrajectoryParameters>,
}

impl Default for CartesianTracker {
    fn default() -> Self {
        CartesianTracker {
            transition_coefficients: Vec::new(),
            max_backtracks: 1000,
            max_joint_jump: std::f64::consts::FRAC_PI_2,
            params: None,
        }
    }
}

const JACOBIAN_EPSILON: f64 = 1e-6;

/// Joint step that moves the end effector from where it is at `previous` to `target`, to the
/// first order.
fn predicted_step(robot: &Robot, manipulator: &Manipulator, previous: &[f64], target: &Pose) -> Option<DVector<f64>> {
    let forward = |q: &[f64]| robot.end_effector_transform_for_arm(manipulator, q);
    let current = forward(previous);
    let linear = target.translation.vector - current.translation.vector;
    let angular = (target.rotation * current.rotation.inverse()).scaled_axis();
    let desired = DVector::from_iterator(6, linear.iter().chain(angular.iter()).copied());
    Jacobian::new(forward, previous, JACOBIAN_EPSILON)
        .velocities_from_vector(&desired)
        .ok()
}

/// Angle between the joint step `previous -> candidate` and the predicted step. Steps too
/// short to have a direction deviate by nothing.
fn deviation_angle(predicted: &DVector<f64>, previous: &[f64], candidate: &[f64]) -> f64 {
    let actual = DVector::from_iterator(candidate.len(), candidate.iter().zip(previous).map(|(c, p)| c - p));
    let norms = actual.norm() * predicted.norm();
    if actual.len() != predicted.len() || norms < 1e-12 {
        return 0.0;
    }
    (actual.dot(predicted) / norms).clamp(-1.0, 1.0).acos()
}

/// Pose on the line with the distance travelled from the start and the time it is reached.
struct LinePose {
    pose: Pose,
    travelled: f64,
    time: f64,
}

impl CartesianTracker {
    /// Poses from the start to the end of the line (both included), at most a step apart.
    fn line_poses(params: &WorkspaceTrajectoryParameters) -> Result<Vec<LinePose>, String> {
        let points = params.workspace_trajectory.points();
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err("empty workspace trajectory".into());
        };
        let (Some(start), Some(end)) = (first.transform, last.transform) else {
            return Err("workspace trajectory has no transforms".into());
        };
        let translation_diff = end.translation.vector - start.translation.vector;
        let distance = translation_diff.norm();
        // Rounding noise must not add a step.
        let steps = (distance / params.step_length - 1e-9).ceil().max(0.0) as usize;
        let duration = last.time - first.time;

        let mut poses = Vec::with_capacity(steps + 1);
        poses.push(LinePose {
            pose: start,
            travelled: 0.0,
            time: first.time,
        });
        for i in 1..=steps {
            let fraction = i as f64 / steps as f64;
            let translation = start.translation.vector + translation_diff * fraction;
            let rotation = start.rotation.slerp(&end.rotation, fraction);
            poses.push(LinePose {
                pose: Pose::from_parts(translation.into(), rotation),
                travelled: distance * fraction,
                time: first.time + duration * fraction,
            });
        }
        Ok(poses)
    }

    /// Acceptable IK solutions for the pose, worst first so that the best one is popped first.
    fn candidates(
        &self,
        params: &WorkspaceTrajectoryParameters,
        robot: &mut Robot,
        checker: &dyn CollisionChecker,
        target: &LinePose,
        previous: &[f64],
        check_step: bool,
    ) -> Result<Vec<Configuration>, String> {
        let predicted = if check_step {
            let step = predicted_step(robot, &params.manipulator, previous, &target.pose);
            if step.is_none() {
                debug!("no predicted step towards {}", format_pose(&target.pose));
                return Ok(Vec::new());
            }
            step
        } else {
            None
        };
        let options = if target.travelled <= params.ignore_first_collision {
            IkFilterOptions::empty()
        } else {
            IkFilterOptions::CHECK_ENV_COLLISIONS
        };
        let solutions = find_ik_solutions(
            robot,
            checker,
            &params.manipulator,
            &GoalSpec::Transform6D(target.pose),
            options,
            None,
            None,
            false,
        )
        .map_err(|e| e.to_string())?;

        let mut accepted: Vec<(f64, Configuration)> = solutions
            .into_iter()
            .filter(|q| match &predicted {
                Some(step) => {
                    max_joint_step(previous, q) <= self.max_joint_jump
                        && deviation_angle(step, previous, q) <= params.max_deviation_angle
                }
                None => true,
            })
            .map(|q| (utils::transition_costs(previous, &q, &self.transition_coefficients), q))
            .collect();
        accepted.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(accepted.into_iter().map(|(_, q)| q).collect())
    }

    /// Configuration at the start of the line: the current one if it already places the end
    /// effector there, otherwise the closest IK solution for the start pose.
    fn start_configuration(
        &self,
        params: &WorkspaceTrajectoryParameters,
        robot: &mut Robot,
        checker: &dyn CollisionChecker,
        start: &LinePose,
    ) -> Result<Configuration, String> {
        let current = robot.active_dof_values();
        let reached = robot.end_effector_transform(&params.manipulator);
        let offset = (reached.translation.vector - start.pose.translation.vector).norm();
        if offset < 1e-6 && reached.rotation.angle_to(&start.pose.rotation) < 1e-6 {
            return Ok(current);
        }
        debug!("end effector is not at the line start, solving for {}", format_pose(&start.pose));
        self.candidates(params, robot, checker, start, &current, false)?
            .pop()
            .ok_or_else(|| "no ik solution at the start of the line".to_string())
    }
}

impl WorkspaceTracker for CartesianTracker {
    fn initialize(&mut self, robot: &Robot, params: &WorkspaceTrajectoryParameters) -> Result<(), String> {
        let arm = &params.manipulator.arm_indices;
        if robot.active_dofs().indices != *arm || !robot.active_dofs().affine.is_empty() {
            return Err("active DOFs must be the manipulator arm".into());
        }
        if params.lower_limits.len() != arm.len() || params.upper_limits.len() != arm.len() {
            return Err("limits do not match the manipulator arm".into());
        }
        if params.initial_config.as_ref().is_some_and(|q| q.len() != arm.len()) {
            return Err("initial configuration does not match the manipulator arm".into());
        }
        if params.manipulator.ik_solver.is_none() {
            return Err(format!("manipulator {} has no ik solver", params.manipulator.name));
        }
        if !(params.step_length.is_finite() && params.step_length > 0.0) {
            return Err(format!("step length must be positive, got {}", params.step_length));
        }
        if params.workspace_trajectory.len() < 2 {
            return Err("workspace trajectory needs at least two waypoints".into());
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn plan(&mut self, robot: &mut Robot, checker: &dyn CollisionChecker) -> Result<Trajectory, String> {
        let params = self.params.as_ref().ok_or("tracker is not initialized")?;
        if let Some(initial) = &params.initial_config {
            robot.set_active_dof_values(initial).map_err(|e| e.to_string())?;
        }
        let poses = Self::line_poses(params)?;
        let start = self.start_configuration(params, robot, checker, &poses[0])?;

        let mut path = vec![start];
        let mut best = path.clone();
        // Remaining alternatives for every chosen step, for backtracking.
        let mut pending: Vec<Vec<Configuration>> = Vec::new();
        let mut backtracks = 0;
        let mut candidates = if poses.len() > 1 {
            self.candidates(params, robot, checker, &poses[1], &path[0], true)?
        } else {
            Vec::new()
        };
        while path.len() < poses.len() {
            if let Some(next) = candidates.pop() {
                path.push(next);
                if path.len() > best.len() {
                    best = path.clone();
                }
                if path.len() == poses.len() {
                    break;
                }
                pending.push(std::mem::take(&mut candidates));
                let previous = path[path.len() - 1].clone();
                candidates = self.candidates(params, robot, checker, &poses[path.len()], &previous, true)?;
            } else {
                if params.greedy_search || backtracks >= self.max_backtracks {
                    break;
                }
                match pending.pop() {
                    Some(alternatives) => {
                        path.pop();
                        candidates = alternatives;
                        backtracks += 1;
                    }
                    None => break,
                }
            }
        }

        let steps = poses.len() - 1;
        let reached = best.len() - 1;
        if reached < steps {
            let time = poses[reached].time - poses[0].time;
            if reached == 0 || time + 1e-9 < params.minimum_complete_time {
                return Err(format!(
                    "tracked {} of {} steps, reaching {:.3} s of required {:.3} s",
                    reached, steps, time, params.minimum_complete_time
                ));
            }
            info!("line tracked partially, {} of {} steps", reached, steps);
        }

        let mut trajectory = Trajectory::new(params.manipulator.arm_indices.len());
        for (q, target) in best.into_iter().zip(&poses) {
            trajectory
                .push(Waypoint {
                    q,
                    transform: Some(target.pose),
                    time: target.time,
                })
                .map_err(|e| e.to_string())?;
        }
        if let Some(last) = trajectory.last_configuration() {
            debug!("line ends at {}", format_configuration(last));
        }
        Ok(trajectory)
    }
}
