//! Planner contract, the planner registry and the retry loop around planning attempts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::constraint::ConstraintFunction;
use crate::error::PlanningError;
use crate::kinematic_traits::{CollisionChecker, Configuration};
use crate::path_plan::cartesian::CartesianTracker;
use crate::path_plan::rrt::RrtConnectPlanner;
use crate::robot::Robot;
use crate::trajectory::Trajectory;
use crate::utils::joint_distance;
use crate::workspace::WorkspaceTracker;

/// Distance between two configurations of the active DOFs.
pub type DistanceMetric = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// Name of the planner used when the requested one is not registered.
pub const DEFAULT_PLANNER: &str = "BiRRT";

/// Name of the workspace trajectory tracker.
pub const DEFAULT_TRACKER: &str = "workspacetrajectorytracker";

/// Everything a joint-space planner needs for a single planning attempt.
#[derive(Clone)]
pub struct PlannerParameters {
    pub initial_config: Configuration,

    /// Planning succeeds if any of these is reached.
    pub goal_configs: Vec<Configuration>,

    pub lower_limits: Configuration,
    pub upper_limits: Configuration,

    /// Iteration budget of a single attempt.
    pub max_iterations: usize,

    /// Largest step in the configuration space between collision checks.
    pub step_length: f64,

    /// Number of shortcut tries applied to a found path (0 disables smoothing).
    pub smoothing_iterations: usize,

    pub distance_metric: DistanceMetric,

    /// If set, every sampled configuration is projected onto this constraint.
    pub constraint: Option<Arc<dyn ConstraintFunction>>,

    /// Seed of the random sampler; attempts with different seeds explore differently.
    pub seed: u64,
}

impl Default for PlannerParameters {
    fn default() -> Self {
        PlannerParameters {
            initial_config: Vec::new(),
            goal_configs: Vec::new(),
            lower_limits: Vec::new(),
            upper_limits: Vec::new(),
            max_iterations: 4000,
            step_length: 0.04,
            smoothing_iterations: 100,
            distance_metric: Arc::new(joint_distance),
            constraint: None,
            seed: 0,
        }
    }
}

impl fmt::Debug for PlannerParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannerParameters")
            .field("initial_config", &self.initial_config)
            .field("goal_configs", &self.goal_configs)
            .field("max_iterations", &self.max_iterations)
            .field("step_length", &self.step_length)
            .field("constraint", &self.constraint.is_some())
            .field("seed", &self.seed)
            .finish()
    }
}

impl PlannerParameters {
    /// Fills the initial configuration and limits from the active DOFs of the robot.
    pub fn set_robot_active_joints(&mut self, robot: &Robot) {
        self.initial_config = robot.active_dof_values();
        let (lower, upper) = robot.active_dof_limits();
        self.lower_limits = lower;
        self.upper_limits = upper;
    }

    /// Checks that all configurations and limits have the same dimension.
    pub fn validate(&self) -> Result<(), PlanningError> {
        let dof = self.initial_config.len();
        let lengths = std::iter::once(self.lower_limits.len())
            .chain(std::iter::once(self.upper_limits.len()))
            .chain(self.goal_configs.iter().map(|g| g.len()));
        for found in lengths {
            if found != dof {
                return Err(PlanningError::DimensionMismatch { expected: dof, found });
            }
        }
        if self.goal_configs.is_empty() {
            return Err(PlanningError::InvalidGoal("no goal configurations".into()));
        }
        if !(self.step_length.is_finite() && self.step_length > 0.0) {
            return Err(PlanningError::Config(format!(
                "step length must be positive, got {}",
                self.step_length
            )));
        }
        Ok(())
    }
}

/// Joint-space planner. A fresh instance is created for every attempt.
pub trait Planner {
    /// Prepares the attempt. An error here is final and is not retried.
    fn initialize(&mut self, robot: &Robot, params: &PlannerParameters) -> Result<(), String>;

    /// Runs the attempt. The robot may be used for validity checks; the caller restores it.
    fn plan(&mut self, robot: &mut Robot, checker: &dyn CollisionChecker) -> Result<Trajectory, String>;
}

pub type PlannerFactory = Arc<dyn Fn() -> Box<dyn Planner> + Send + Sync>;
pub type TrackerFactory = Arc<dyn Fn() -> Box<dyn WorkspaceTracker> + Send + Sync>;

/// Planners and workspace trackers by case-insensitive name.
#[derive(Clone, Default)]
pub struct PlannerRegistry {
    planners: HashMap<String, PlannerFactory>,
    trackers: HashMap<String, TrackerFactory>,
}

impl PlannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bidirectional RRT planner and the workspace trajectory tracker.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_planner(DEFAULT_PLANNER, || Box::new(RrtConnectPlanner::default()));
        registry.register_tracker(DEFAULT_TRACKER, || Box::new(CartesianTracker::default()));
        registry
    }

    pub fn register_planner<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Planner> + Send + Sync + 'static,
    {
        self.planners.insert(name.to_lowercase(), Arc::new(factory));
    }

    pub fn register_tracker<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn WorkspaceTracker> + Send + Sync + 'static,
    {
        self.trackers.insert(name.to_lowercase(), Arc::new(factory));
    }

    /// Factory of the named planner, falling back to the default planner.
    pub fn planner(&self, name: &str) -> Result<PlannerFactory, PlanningError> {
        if let Some(factory) = self.planners.get(&name.to_lowercase()) {
            return Ok(factory.clone());
        }
        match self.planners.get(&DEFAULT_PLANNER.to_lowercase()) {
            Some(factory) => {
                warn!("planner {} not found, falling back to {}", name, DEFAULT_PLANNER);
                Ok(factory.clone())
            }
            None => Err(PlanningError::PlannerNotFound(name.to_string())),
        }
    }

    pub fn tracker(&self, name: &str) -> Result<TrackerFactory, PlanningError> {
        self.trackers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| PlanningError::PlannerNotFound(name.to_string()))
    }
}

/// Runs up to `max_tries` planning attempts, each with a freshly created planner and a
/// different sampler seed. Initialization failure ends the loop at once; a failed plan is
/// retried. On success the trajectory of the first successful attempt is returned and no
/// more attempts are made.
pub fn plan_with_retries(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    factory: &PlannerFactory,
    params: &PlannerParameters,
    max_tries: usize,
) -> Result<Trajectory, PlanningError> {
    params.validate()?;
    for attempt in 0..max_tries {
        let mut attempt_params = params.clone();
        attempt_params.seed = params.seed.wrapping_add(attempt as u64);

        let mut planner = factory();
        if let Err(reason) = planner.initialize(robot, &attempt_params) {
            error!("planner failed to initialize: {}", reason);
            return Err(PlanningError::InitializationFailed(reason));
        }

        let saved = robot.save_state();
        let outcome = planner.plan(robot, checker);
        robot.restore_state(&saved);
        match outcome {
            Ok(trajectory) => {
                info!(
                    "planning succeeded on attempt {}/{} with {} waypoints",
                    attempt + 1,
                    max_tries,
                    trajectory.len()
                );
                return Ok(trajectory);
            }
            Err(reason) => {
                warn!("planning attempt {}/{} failed: {}", attempt + 1, max_tries, reason);
            }
        }
    }
    debug!("giving up after {} planning attempts", max_tries);
    Err(PlanningError::PlanningFailed { tries: max_tries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails to plan until the given attempt, counting its calls.
    struct ScriptedPlanner {
        succeed_on: usize,
        init_calls: Arc<AtomicUsize>,
        plan_calls: Arc<AtomicUsize>,
        fail_init: bool,
        dof: usize,
    }

    impl Planner for ScriptedPlanner {
        fn initialize(&mut self, _robot: &Robot, params: &PlannerParameters) -> Result<(), String> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            self.dof = params.initial_config.len();
            if self.fail_init { Err("bad parameters".into()) } else { Ok(()) }
        }

        fn plan(&mut self, _robot: &mut Robot, _checker: &dyn CollisionChecker) -> Result<Trajectory, String> {
            let call = self.plan_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                let mut trajectory = Trajectory::new(self.dof);
                trajectory
                    .push_configuration(vec![0.0; self.dof])
                    .map_err(|e| e.to_string())?;
                Ok(trajectory)
            } else {
                Err("no path".into())
            }
        }
    }

    fn scripted(succeed_on: usize, fail_init: bool) -> (PlannerFactory, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let plan_calls = Arc::new(AtomicUsize::new(0));
        let (i, p) = (init_calls.clone(), plan_calls.clone());
        let factory: PlannerFactory = Arc::new(move || {
            Box::new(ScriptedPlanner {
                succeed_on,
                init_calls: i.clone(),
                plan_calls: p.clone(),
                fail_init,
                dof: 0,
            })
        });
        (factory, init_calls, plan_calls)
    }

    fn setup() -> (Robot, PlannerParameters) {
        let robot = Robot::new("box", vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        let mut params = PlannerParameters::default();
        params.set_robot_active_joints(&robot);
        params.goal_configs = vec![vec![0.5, 0.5]];
        (robot, params)
    }

    #[test]
    fn test_all_attempts_fail() {
        let (mut robot, params) = setup();
        let (factory, init_calls, plan_calls) = scripted(usize::MAX, false);
        let checker = |_: &Robot| false;
        let result = plan_with_retries(&mut robot, &checker, &factory, &params, 3);
        assert!(matches!(result, Err(PlanningError::PlanningFailed { tries: 3 })));
        assert_eq!(init_calls.load(Ordering::SeqCst), 3);
        assert_eq!(plan_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stops_at_first_success() {
        let (mut robot, params) = setup();
        let (factory, init_calls, plan_calls) = scripted(2, false);
        let checker = |_: &Robot| false;
        let trajectory = plan_with_retries(&mut robot, &checker, &factory, &params, 5).unwrap();
        assert_eq!(trajectory.len(), 1);
        assert_eq!(init_calls.load(Ordering::SeqCst), 2);
        assert_eq!(plan_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_initialization_failure_is_not_retried() {
        let (mut robot, params) = setup();
        let (factory, init_calls, plan_calls) = scripted(1, true);
        let checker = |_: &Robot| false;
        let result = plan_with_retries(&mut robot, &checker, &factory, &params, 4);
        assert!(matches!(result, Err(PlanningError::InitializationFailed(_))));
        assert_eq!(init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(plan_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_tries() {
        let (mut robot, params) = setup();
        let (factory, init_calls, _) = scripted(1, false);
        let checker = |_: &Robot| false;
        let result = plan_with_retries(&mut robot, &checker, &factory, &params, 0);
        assert!(matches!(result, Err(PlanningError::PlanningFailed { tries: 0 })));
        assert_eq!(init_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_lookup_and_fallback() {
        let registry = PlannerRegistry::with_defaults();
        assert!(registry.planner("birrt").is_ok());
        assert!(registry.planner("NoSuchPlanner").is_ok());
        assert!(registry.tracker("WorkspaceTrajectoryTracker").is_ok());
        assert!(registry.tracker("nothing").is_err());
        assert!(matches!(
            PlannerRegistry::new().planner("BiRRT"),
            Err(PlanningError::PlannerNotFound(_))
        ));
    }

    #[test]
    fn test_validate_dimensions() {
        let (_, mut params) = setup();
        assert!(params.validate().is_ok());
        params.goal_configs.push(vec![0.0]);
        assert!(matches!(params.validate(), Err(PlanningError::DimensionMismatch { .. })));
    }
}
