//! Manipulation commands over a shared environment.
//!
//! Every command locks the environment for its whole duration and works on the robot
//! through a [`RobotStateSaver`], so the joint values, base pose, active DOF selection and
//! active manipulator are restored whatever way the command ends. Only the trajectory
//! handed over for execution (and [`BaseManipulation::set_active_manipulator`]) outlive
//! the command.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::ManipulationConfig;
use crate::constraint::{ConstraintFunction, GripperConstraint};
use crate::environment::Environment;
use crate::error::PlanningError;
use crate::ik::{find_ik_solutions, resolve_ik_goals, ConeFilter, GoalSpec, IkFilter, IkFilterOptions, IkGoalMode};
use crate::jitter::{jitter_active_dofs, JitterOutcome, JitterParameters};
use crate::kinematic_traits::{CollisionChecker, Configuration, Pose};
use crate::output::{set_active_trajectory, CommandOutput, OutputOptions};
use crate::planner::{plan_with_retries, PlannerParameters, PlannerRegistry, DEFAULT_TRACKER};
use crate::robot::{AffineDofs, Robot, RobotStateSaver};
use crate::trajectory::Trajectory;
use crate::trajectory_io::read_trajectory;
use crate::utils::format_configuration;
use crate::workspace::{track_straight_line, HandStraightRequest};

/// Move of the active DOFs to a joint goal.
#[derive(Debug, Clone, Default)]
pub struct MoveActiveJointsRequest {
    pub goal: Configuration,
    pub max_iterations: Option<usize>,
    pub step_length: Option<f64>,
    pub max_tries: Option<usize>,
    pub output: OutputOptions,
}

/// Move of the active manipulator arm to arm joint values.
#[derive(Debug, Clone, Default)]
pub struct MoveManipulatorRequest {
    pub arm_goal: Configuration,
    pub max_iterations: Option<usize>,
    pub max_tries: Option<usize>,
    pub output: OutputOptions,
}

/// Keeps the selected end effector DOFs at a target frame while moving.
#[derive(Debug, Clone, PartialEq)]
pub struct GripperConstraintSpec {
    pub target: Pose,

    /// Translation x, y, z then rotation about x, y, z; non-zero means constrained.
    pub freedoms: [f64; 6],

    /// The constraint is only used if this is positive.
    pub error_threshold: f64,
}

/// Move of the active manipulator end effector to any of the Cartesian goals.
#[derive(Debug, Clone)]
pub struct MoveToHandPositionRequest {
    pub goals: Vec<GoalSpec>,
    pub mode: IkGoalMode,

    /// Affine base DOFs planned together with the arm.
    pub affine: AffineDofs,
    pub max_iterations: Option<usize>,
    pub max_tries: Option<usize>,
    pub constraint: Option<GripperConstraintSpec>,
    pub output: OutputOptions,
}

impl Default for MoveToHandPositionRequest {
    fn default() -> Self {
        MoveToHandPositionRequest {
            goals: Vec::new(),
            mode: IkGoalMode::Single,
            affine: AffineDofs::empty(),
            max_iterations: None,
            max_tries: None,
            constraint: None,
            output: OutputOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JitterActiveRequest {
    pub max_iterations: Option<usize>,
    pub radius: Option<f64>,

    /// Report the configuration the robot ends up in.
    pub output_final: bool,
    pub output: OutputOptions,
}

/// IK query with a custom filter. The filter only applies to this query.
#[derive(Debug, Clone)]
pub struct FindIkRequest {
    pub goal: GoalSpec,
    pub cone: Option<ConeFilter>,
    pub solve_all: bool,
    pub options: IkFilterOptions,
}

impl FindIkRequest {
    pub fn new(goal: GoalSpec, cone: ConeFilter) -> Self {
        FindIkRequest {
            goal,
            cone: Some(cone),
            solve_all: false,
            options: IkFilterOptions::CHECK_ENV_COLLISIONS,
        }
    }
}

/// Manipulation commands for the robot of a shared environment.
pub struct BaseManipulation {
    environment: Arc<Mutex<Environment>>,
    registry: PlannerRegistry,
    config: ManipulationConfig,
    commands: AtomicU64,
}

impl BaseManipulation {
    pub fn new(environment: Arc<Mutex<Environment>>, config: ManipulationConfig) -> Result<Self, PlanningError> {
        config.validate()?;
        let registry = PlannerRegistry::with_defaults();
        // Resolve the planner once so that a missing planner is reported early.
        registry.planner(&config.planner)?;
        debug!("manipulation using {} planner", config.planner);
        Ok(BaseManipulation {
            environment,
            registry,
            config,
            commands: AtomicU64::new(0),
        })
    }

    pub fn with_registry(mut self, registry: PlannerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ManipulationConfig {
        &self.config
    }

    pub fn environment(&self) -> &Arc<Mutex<Environment>> {
        &self.environment
    }

    /// Straight hand move request filled with the configured defaults.
    pub fn hand_straight_request(&self) -> HandStraightRequest {
        HandStraightRequest {
            step_length: self.config.workspace_step_length,
            ignore_first_collision: self.config.ignore_first_collision,
            max_deviation_angle: self.config.max_deviation_angle,
            greedy_search: self.config.greedy_search,
            jitter_iterations: self.config.straight_jitter_iterations,
            ..HandStraightRequest::default()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Environment>, PlanningError> {
        self.environment.lock().map_err(|_| PlanningError::EnvironmentLocked)
    }

    /// Every command draws from its own generator, reproducible from the configured seed.
    fn command_rng(&self) -> ChaCha8Rng {
        let command = self.commands.fetch_add(1, Ordering::Relaxed);
        ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(command))
    }

    fn planner_parameters(&self, robot: &Robot, max_iterations: Option<usize>, seed: u64) -> PlannerParameters {
        let mut params = PlannerParameters {
            max_iterations: max_iterations.unwrap_or(self.config.max_iterations),
            step_length: self.config.step_length,
            seed,
            ..PlannerParameters::default()
        };
        params.set_robot_active_joints(robot);
        params
    }

    /// Runs the retry loop with the configured planner.
    fn plan(
        &self,
        robot: &mut Robot,
        checker: &dyn CollisionChecker,
        params: &PlannerParameters,
        max_tries: usize,
    ) -> Result<Trajectory, PlanningError> {
        let factory = self.registry.planner(&self.config.planner)?;
        info!("starting planning with {} tries", max_tries);
        plan_with_retries(robot, checker, &factory, params, max_tries)
    }

    /// Selects the active manipulator by name, or by index if no manipulator has that name.
    /// The selection persists after the command.
    pub fn set_active_manipulator(&self, name_or_index: &str) -> Result<usize, PlanningError> {
        let mut env = self.lock()?;
        let robot = &mut env.robot;
        let index = match robot.manipulators().iter().position(|m| m.name == name_or_index) {
            Some(index) => index,
            None => name_or_index
                .trim()
                .parse::<usize>()
                .map_err(|_| PlanningError::NoActiveManipulator(name_or_index.to_string()))?,
        };
        robot.set_active_manipulator(index)?;
        Ok(index)
    }

    /// Plans the active DOFs from their current values to the goal. Both the start and the goal
    /// are jittered into validity first; the repaired goal is the one planned to.
    pub fn move_active_joints(&self, request: &MoveActiveJointsRequest) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        if request.goal.len() != robot.active_dof() {
            return Err(PlanningError::DimensionMismatch {
                expected: robot.active_dof(),
                found: request.goal.len(),
            });
        }

        let mut rng = self.command_rng();
        let jitter = self.config.jitter_parameters();
        if jitter_active_dofs(&mut robot, checker, &jitter, None, &mut rng) == JitterOutcome::Failed {
            return Err(PlanningError::JitterFailed("start"));
        }
        let mut params = self.planner_parameters(&robot, request.max_iterations, rng_seed(&mut rng));
        if let Some(step_length) = request.step_length {
            params.step_length = step_length;
        }

        robot.set_active_dof_values(&request.goal)?;
        if jitter_active_dofs(&mut robot, checker, &jitter, None, &mut rng) == JitterOutcome::Failed {
            return Err(PlanningError::JitterFailed("goal"));
        }
        params.goal_configs = vec![robot.active_dof_values()];
        robot.set_active_dof_values(&params.initial_config)?;

        let max_tries = request.max_tries.unwrap_or(self.config.max_tries_active_joints);
        let trajectory = self.plan(&mut robot, checker, &params, max_tries)?;
        set_active_trajectory(&mut *robot, trajectory, &request.output, self.config.max_vel_mult)
    }

    /// Plans the arm of the active manipulator to the given arm values.
    pub fn move_manipulator(&self, request: &MoveManipulatorRequest) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        let manipulator = robot.active_manipulator()?.clone();
        if request.arm_goal.len() != manipulator.arm_indices.len() {
            return Err(PlanningError::DimensionMismatch {
                expected: manipulator.arm_indices.len(),
                found: request.arm_goal.len(),
            });
        }
        robot.set_active_dofs(&manipulator.arm_indices, AffineDofs::empty())?;

        let mut rng = self.command_rng();
        let jitter = self.config.jitter_parameters();
        // The start is jittered again after the goal, a failure here is not final.
        if jitter_active_dofs(&mut robot, checker, &jitter, None, &mut rng) == JitterOutcome::Failed {
            debug!("first jitter of the start failed");
        }
        let values = robot.active_dof_values();

        robot.set_active_dof_values(&request.arm_goal)?;
        if jitter_active_dofs(&mut robot, checker, &jitter, None, &mut rng) == JitterOutcome::Failed {
            warn!("jitter failed for the goal {}", format_configuration(&request.arm_goal));
            return Err(PlanningError::JitterFailed("goal"));
        }
        let goal = robot.active_dof_values();
        robot.set_active_dof_values(&values)?;
        if jitter_active_dofs(&mut robot, checker, &jitter, None, &mut rng) == JitterOutcome::Failed {
            warn!("jitter failed for the start");
            return Err(PlanningError::JitterFailed("start"));
        }

        let mut params = self.planner_parameters(&robot, request.max_iterations, rng_seed(&mut rng));
        params.goal_configs = vec![goal];
        let max_tries = request.max_tries.unwrap_or(self.config.max_tries);
        let trajectory = self.plan(&mut robot, checker, &params, max_tries)?;
        set_active_trajectory(&mut *robot, trajectory, &request.output, self.config.max_vel_mult)
    }

    /// Resolves the Cartesian goals into arm goals, repairs every goal under the optional
    /// gripper constraint (goals that cannot be repaired are dropped), repairs the start and
    /// plans to any of the remaining goals. The response lists the resolved IK solutions.
    pub fn move_to_hand_position(&self, request: &MoveToHandPositionRequest) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        let manipulator = robot.active_manipulator()?.clone();
        let mut rng = self.command_rng();

        let resolution = resolve_ik_goals(&mut robot, checker, &request.goals, request.mode, None, &mut rng)?;
        if resolution.configurations.is_empty() {
            warn!("no ik solution found");
            return Err(PlanningError::NoIkSolution);
        }
        info!("move to hand position found {} solutions", resolution.configurations.len());

        robot.set_active_dofs(&manipulator.arm_indices, request.affine)?;
        let mut params = self.planner_parameters(&robot, request.max_iterations, rng_seed(&mut rng));
        let initial = params.initial_config.clone();

        let constraint: Option<Arc<dyn ConstraintFunction>> = match &request.constraint {
            Some(gripper) if gripper.error_threshold > 0.0 => {
                debug!("setting jacobian constraint function in planner parameters");
                Some(Arc::new(GripperConstraint::new(
                    manipulator.clone(),
                    gripper.target,
                    gripper.freedoms,
                    gripper.error_threshold,
                )))
            }
            _ => None,
        };
        params.constraint = constraint.clone();

        let jitter = self.config.jitter_parameters();
        for (index, arm_goal) in resolution.configurations.iter().enumerate() {
            robot.set_active_dofs(&manipulator.arm_indices, AffineDofs::empty())?;
            robot.set_active_dof_values(arm_goal)?;
            robot.set_active_dofs(&manipulator.arm_indices, request.affine)?;
            match jitter_active_dofs(&mut robot, checker, &jitter, constraint.as_deref(), &mut rng) {
                JitterOutcome::Failed => debug!("constraint function failed for goal {}", index),
                _ => params.goal_configs.push(robot.active_dof_values()),
            }
        }
        if params.goal_configs.is_empty() {
            warn!("jitter failed for all goals");
            return Err(PlanningError::JitterFailed("goal"));
        }

        robot.set_active_dof_values(&initial)?;
        if jitter_active_dofs(&mut robot, checker, &jitter, constraint.as_deref(), &mut rng) == JitterOutcome::Failed {
            warn!("jitter failed for the start");
            return Err(PlanningError::JitterFailed("start"));
        }
        params.initial_config = robot.active_dof_values();

        let max_tries = request.max_tries.unwrap_or(self.config.max_tries);
        let trajectory = self.plan(&mut robot, checker, &params, max_tries)?;
        let mut output = set_active_trajectory(&mut *robot, trajectory, &request.output, self.config.max_vel_mult)?;
        output.solutions = resolution.configurations;
        Ok(output)
    }

    /// Moves the end effector of the active manipulator along a straight line.
    pub fn move_hand_straight(
        &self,
        request: &HandStraightRequest,
        output: &OutputOptions,
    ) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        let tracker = self.registry.tracker(DEFAULT_TRACKER)?;
        let mut rng = self.command_rng();
        let trajectory = track_straight_line(
            &mut robot,
            checker,
            &tracker,
            request,
            &self.config.jitter_parameters(),
            &mut rng,
        )?;
        set_active_trajectory(&mut *robot, trajectory, output, self.config.max_vel_mult)
    }

    /// Jitters the active DOFs out of collision. The resulting trajectory holds the start and,
    /// if it had to be repaired, the repaired configuration.
    pub fn jitter_active(&self, request: &JitterActiveRequest) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        let mut rng = self.command_rng();
        let params = JitterParameters {
            max_iterations: request.max_iterations.unwrap_or(self.config.jitter_iterations),
            radius: request.radius.unwrap_or(self.config.jitter_radius),
            perturbation: self.config.jitter_perturbation,
        };

        let mut trajectory = Trajectory::new(robot.active_dof());
        trajectory.push_configuration(robot.active_dof_values())?;
        match jitter_active_dofs(&mut robot, checker, &params, None, &mut rng) {
            JitterOutcome::Failed => {
                warn!("could not jitter out of collision");
                return Err(PlanningError::JitterFailed("the active DOFs"));
            }
            JitterOutcome::Repaired => trajectory.push_configuration(robot.active_dof_values())?,
            JitterOutcome::AlreadyValid => {}
        }

        let final_values = trajectory.last_configuration().cloned();
        let mut output = set_active_trajectory(&mut *robot, trajectory, &request.output, self.config.max_vel_mult)?;
        if request.output_final {
            output.final_values = final_values;
        }
        Ok(output)
    }

    /// IK solutions of the active manipulator accepted by the cone filter.
    pub fn find_ik_with_filters(&self, request: &FindIkRequest) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, checker) = env.parts();
        let manipulator = robot.active_manipulator()?.clone();
        if manipulator.ik_solver.is_none() {
            return Err(PlanningError::NoIkSolver(manipulator.name.clone()));
        }
        let cone = request.cone.as_ref().ok_or(PlanningError::NoFilter)?;

        let mut robot = RobotStateSaver::new(robot);
        let solutions = find_ik_solutions(
            &mut robot,
            checker,
            &manipulator,
            &request.goal,
            request.options,
            Some(cone as &dyn IkFilter),
            None,
            !request.solve_all,
        )?;
        if solutions.is_empty() {
            return Err(PlanningError::NoIkSolution);
        }
        Ok(CommandOutput {
            solutions,
            ..CommandOutput::default()
        })
    }

    /// Executes a trajectory over all robot joints. With `reset_transforms`, every waypoint
    /// gets the current robot base pose. A trajectory without duration is timed (cubic) first.
    pub fn execute_trajectory(
        &self,
        mut trajectory: Trajectory,
        reset_transforms: bool,
        max_vel_mult: Option<f64>,
    ) -> Result<CommandOutput, PlanningError> {
        let mut env = self.lock()?;
        let (robot, _) = env.parts();
        let mut robot = RobotStateSaver::new(robot);
        if trajectory.dof() != robot.dof() {
            return Err(PlanningError::DimensionMismatch {
                expected: robot.dof(),
                found: trajectory.dof(),
            });
        }
        if reset_transforms {
            trajectory.set_transforms(robot.transform());
        }
        let all: Vec<usize> = (0..robot.dof()).collect();
        robot.set_active_dofs(&all, AffineDofs::empty())?;
        set_active_trajectory(
            &mut *robot,
            trajectory,
            &OutputOptions::default(),
            max_vel_mult.unwrap_or(self.config.max_vel_mult),
        )
    }

    /// Reads the trajectory from a file and executes it as [`Self::execute_trajectory`] does.
    pub fn execute_trajectory_file(
        &self,
        path: &Path,
        reset_transforms: bool,
        max_vel_mult: Option<f64>,
    ) -> Result<CommandOutput, PlanningError> {
        let trajectory = read_trajectory(path)?;
        self.execute_trajectory(trajectory, reset_transforms, max_vel_mult)
    }
}

/// Planner seed derived from the command generator.
fn rng_seed(rng: &mut ChaCha8Rng) -> u64 {
    rng.next_u64()
}
