//! Straight end effector motion: building the workspace line and handing it to a tracker.

use nalgebra::{Translation3, Vector3};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::PlanningError;
use crate::jitter::{jitter_active_dofs, JitterOutcome, JitterParameters};
use crate::kinematic_traits::{CollisionChecker, Configuration, Pose};
use crate::planner::TrackerFactory;
use crate::robot::{AffineDofs, AffineVelocityOverride, Manipulator, Robot};
use crate::trajectory::{Trajectory, Waypoint};

/// Parameters of a workspace tracking attempt.
#[derive(Debug, Clone)]
pub struct WorkspaceTrajectoryParameters {
    /// Configuration to start tracking from. The current robot configuration is used if not set.
    pub initial_config: Option<Configuration>,

    pub lower_limits: Configuration,
    pub upper_limits: Configuration,

    /// Two-waypoint Cartesian line with end effector transforms, timed.
    pub workspace_trajectory: Trajectory,

    /// Length of a single tracking step in meters.
    pub step_length: f64,

    /// Largest angle between a joint step and the step predicted for the commanded
    /// direction, radians.
    pub max_deviation_angle: f64,

    /// Stop at the first step without a solution instead of backtracking.
    pub greedy_search: bool,

    /// Collisions are ignored while the end effector is closer than this to the start.
    pub ignore_first_collision: f64,

    /// Time on the line that a partial result must reach to count as success.
    pub minimum_complete_time: f64,

    pub manipulator: Manipulator,
}

/// Tracks a workspace line in joint space. A fresh instance is created for every request.
pub trait WorkspaceTracker {
    fn initialize(&mut self, robot: &Robot, params: &WorkspaceTrajectoryParameters) -> Result<(), String>;

    /// Produces the joint trajectory of the active DOFs following the line.
    fn plan(&mut self, robot: &mut Robot, checker: &dyn CollisionChecker) -> Result<Trajectory, String>;
}

/// Straight hand motion request.
#[derive(Debug, Clone)]
pub struct HandStraightRequest {
    /// Motion direction, normalized before use.
    pub direction: Vector3<f64>,
    pub step_length: f64,
    pub min_steps: usize,
    pub max_steps: usize,
    pub ignore_first_collision: f64,
    pub max_deviation_angle: f64,
    pub greedy_search: bool,

    /// Start of the line. If set, the start configuration is not jittered.
    pub starting_pose: Option<Pose>,

    /// Configuration to start from. If set, the start configuration is not jittered.
    pub starting_config: Option<Configuration>,

    /// Jitter budget for the start configuration.
    pub jitter_iterations: usize,
}

impl Default for HandStraightRequest {
    fn default() -> Self {
        HandStraightRequest {
            direction: Vector3::new(0.0, 1.0, 0.0),
            step_length: 0.01,
            min_steps: 0,
            max_steps: 10000,
            ignore_first_collision: 0.04,
            max_deviation_angle: 0.15 * std::f64::consts::PI,
            greedy_search: true,
            starting_pose: None,
            starting_config: None,
            jitter_iterations: 100,
        }
    }
}

impl HandStraightRequest {
    pub fn unit_direction(&self) -> Result<Vector3<f64>, PlanningError> {
        self.direction
            .try_normalize(1e-12)
            .ok_or_else(|| PlanningError::InvalidGoal("direction has zero length".into()))
    }

    pub fn minimum_complete_time(&self) -> f64 {
        self.step_length * self.min_steps as f64
    }
}

/// Builds the two-waypoint Cartesian line from `start` to `start + direction * max_steps * step_length`.
/// The line is timed linearly with the affine velocity caps raised to 1 for the duration of
/// the call, so its own length governs the timing.
pub fn build_workspace_line(
    robot: &mut Robot,
    start: &Pose,
    direction: &Vector3<f64>,
    step_length: f64,
    max_steps: usize,
) -> Result<Trajectory, PlanningError> {
    if !(step_length.is_finite() && step_length > 0.0) {
        return Err(PlanningError::InvalidGoal(format!("step length must be positive, got {}", step_length)));
    }
    let offset = direction * (max_steps as f64 * step_length);
    let end = Translation3::from(offset) * start;

    let robot = AffineVelocityOverride::new(robot, Vector3::repeat(1.0), 1.0);
    let mut line = Trajectory::new(AffineDofs::TRANSLATION.count() + AffineDofs::ROTATION_QUAT.count());
    for pose in [start, &end] {
        line.push(Waypoint {
            q: pose_values(pose),
            transform: Some(*pose),
            time: 0.0,
        })?;
    }
    line.calc_workspace_timing(&robot.affine_translation_max_vels(), robot.affine_rotation_max_vel());
    Ok(line)
}

/// Translation followed by the quaternion as w, i, j, k.
fn pose_values(pose: &Pose) -> Configuration {
    let t = pose.translation.vector;
    let r = pose.rotation;
    vec![t.x, t.y, t.z, r.w, r.i, r.j, r.k]
}

/// Moves the end effector of the active manipulator along a straight line. Sets the active
/// DOFs to the arm, jitters the start (unless an explicit start is given; failure to jitter
/// is tolerated), builds the line and tracks it. The caller is responsible for saving and
/// restoring the robot state.
pub fn track_straight_line<R: Rng + ?Sized>(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    tracker: &TrackerFactory,
    request: &HandStraightRequest,
    jitter: &JitterParameters,
    rng: &mut R,
) -> Result<Trajectory, PlanningError> {
    let direction = request.unit_direction()?;
    let manipulator = robot.active_manipulator()?.clone();
    robot.set_active_dofs(&manipulator.arm_indices, AffineDofs::empty())?;

    if let Some(config) = &request.starting_config {
        robot.set_active_dof_values(config)?;
    }
    let explicit_start = request.starting_pose.is_some() || request.starting_config.is_some();
    if !explicit_start {
        let params = JitterParameters {
            max_iterations: request.jitter_iterations,
            ..jitter.clone()
        };
        if jitter_active_dofs(robot, checker, &params, None, rng) == JitterOutcome::Failed {
            warn!("failed to jitter the start of the straight line, tracking anyway");
        }
    }

    let start = match &request.starting_pose {
        Some(pose) => *pose,
        None => robot.end_effector_transform(&manipulator),
    };
    let line = build_workspace_line(robot, &start, &direction, request.step_length, request.max_steps)?;
    debug!("workspace line of {} s from {:?}", line.total_duration(), start.translation.vector);

    let (lower_limits, upper_limits) = robot.active_dof_limits();
    let params = WorkspaceTrajectoryParameters {
        initial_config: request.starting_config.clone(),
        lower_limits,
        upper_limits,
        workspace_trajectory: line,
        step_length: request.step_length,
        max_deviation_angle: request.max_deviation_angle,
        greedy_search: request.greedy_search,
        ignore_first_collision: request.ignore_first_collision,
        minimum_complete_time: request.minimum_complete_time(),
        manipulator,
    };

    let mut tracker = tracker();
    tracker
        .initialize(robot, &params)
        .map_err(PlanningError::InitializationFailed)?;
    let trajectory = tracker.plan(robot, checker).map_err(PlanningError::TrackingFailed)?;
    info!("tracked straight line with {} waypoints", trajectory.len());
    Ok(trajectory)
}
