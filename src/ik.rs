//! Resolution of Cartesian goals into joint-space goal configurations, with custom filters
//! consulted for every IK candidate.

use bitflags::bitflags;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::PlanningError;
use crate::kinematic_traits::{CollisionChecker, Configuration, Pose};
use crate::robot::{Manipulator, Robot, RobotStateSaver};
use crate::utils::format_configuration;

/// Goal of a manipulation command.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalSpec {
    /// End effector position only.
    Translation3D(Vector3<f64>),
    /// End effector orientation only.
    Rotation3D(UnitQuaternion<f64>),
    /// Full end effector pose.
    Transform6D(Pose),
    /// Explicit joint values, used directly as a planner goal.
    Joints(Configuration),
}

impl GoalSpec {
    pub fn is_cartesian(&self) -> bool {
        !matches!(self, GoalSpec::Joints(_))
    }

    /// The same Cartesian goal expressed in the frame whose world pose is `frame`.
    pub fn relative_to(&self, frame: &Pose) -> GoalSpec {
        let inverse = frame.inverse();
        match self {
            GoalSpec::Translation3D(t) => GoalSpec::Translation3D(inverse.transform_point(&(*t).into()).coords),
            GoalSpec::Rotation3D(r) => GoalSpec::Rotation3D(inverse.rotation * r),
            GoalSpec::Transform6D(pose) => GoalSpec::Transform6D(inverse * pose),
            GoalSpec::Joints(q) => GoalSpec::Joints(q.clone()),
        }
    }
}

/// Verdict of an IK filter on a single candidate solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkFilterReturn {
    Success,
    Reject,
    /// Reject and stop searching for further solutions.
    Quit,
}

bitflags! {
    /// Checks applied to IK candidates.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IkFilterOptions: u32 {
        /// Reject solutions where the robot collides with the environment or itself.
        const CHECK_ENV_COLLISIONS = 0b0000_0001;
        /// Accept solutions outside of the joint limits.
        const IGNORE_JOINT_LIMITS  = 0b0000_0010;
    }
}

/// Predicate over an IK candidate. The filter is passed to every solve call explicitly,
/// so it only ever affects the call it was given to.
pub trait IkFilter {
    fn filter(&self, solution: &[f64], manipulator: &Manipulator, end_effector: &Pose, goal: &GoalSpec) -> IkFilterReturn;
}

impl<F> IkFilter for F
where
    F: Fn(&[f64], &Manipulator, &Pose, &GoalSpec) -> IkFilterReturn,
{
    fn filter(&self, solution: &[f64], manipulator: &Manipulator, end_effector: &Pose, goal: &GoalSpec) -> IkFilterReturn {
        self(solution, manipulator, end_effector, goal)
    }
}

/// Slack on the cosine comparison so that rounding does not reject the boundary angle.
const CONE_TOLERANCE: f64 = 1e-12;

/// Accepts a candidate if the world image of a local end effector axis lies within a double
/// cone around a world axis: `|world . (R * local)| >= cos(angle)`. Antiparallel axes are
/// accepted as well, and the boundary angle itself is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeFilter {
    local_axis: Unit<Vector3<f64>>,
    world_axis: Unit<Vector3<f64>>,
    cos_limit: f64,
}

impl ConeFilter {
    pub fn new(local_axis: Vector3<f64>, world_axis: Vector3<f64>, angle_limit: f64) -> Result<Self, PlanningError> {
        let local_axis = Unit::try_new(local_axis, 1e-12)
            .ok_or_else(|| PlanningError::InvalidGoal("cone local axis has zero length".into()))?;
        let world_axis = Unit::try_new(world_axis, 1e-12)
            .ok_or_else(|| PlanningError::InvalidGoal("cone world axis has zero length".into()))?;
        Ok(ConeFilter {
            local_axis,
            world_axis,
            cos_limit: angle_limit.cos(),
        })
    }

    pub fn accepts(&self, orientation: &UnitQuaternion<f64>) -> bool {
        self.world_axis.dot(&(orientation * self.local_axis)).abs() >= self.cos_limit - CONE_TOLERANCE
    }
}

impl IkFilter for ConeFilter {
    fn filter(&self, _solution: &[f64], _manipulator: &Manipulator, end_effector: &Pose, _goal: &GoalSpec) -> IkFilterReturn {
        if self.accepts(&end_effector.rotation) {
            IkFilterReturn::Success
        } else {
            IkFilterReturn::Reject
        }
    }
}

/// How many IK solutions to request per Cartesian goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkGoalMode {
    /// Exactly one collision free solution per goal; goals without solution are skipped.
    Single,
    /// All collision free solutions per goal.
    All,
    /// Up to N solutions per goal by random seeding of the solver free parameters.
    Sampled(usize),
}

/// Goals found by the resolver. `shortfalls` lists `(goal index, solutions found)` for
/// sampled goals that produced fewer solutions than requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IkResolution {
    pub configurations: Vec<Configuration>,
    pub shortfalls: Vec<(usize, usize)>,
}

/// Finds IK solutions for the manipulator. Candidates outside the joint limits (unless
/// ignored), rejected by the filter, or colliding (if requested) are dropped. With
/// `first_only`, the search stops at the first accepted solution. The robot state is
/// restored before returning.
pub fn find_ik_solutions(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    manipulator: &Manipulator,
    goal: &GoalSpec,
    options: IkFilterOptions,
    filter: Option<&dyn IkFilter>,
    free: Option<&[f64]>,
    first_only: bool,
) -> Result<Vec<Configuration>, PlanningError> {
    let solver = manipulator
        .ik_solver
        .as_ref()
        .ok_or_else(|| PlanningError::NoIkSolver(manipulator.name.clone()))?;
    if !goal.is_cartesian() {
        return Err(PlanningError::InvalidGoal("joint goal given to inverse kinematics".into()));
    }

    let local_goal = goal.relative_to(robot.transform());
    let candidates = solver.solve(&local_goal, free);

    let mut robot = RobotStateSaver::new(robot);
    let mut accepted = Vec::new();
    for candidate in candidates {
        if candidate.len() != manipulator.arm_indices.len() {
            return Err(PlanningError::DimensionMismatch {
                expected: manipulator.arm_indices.len(),
                found: candidate.len(),
            });
        }
        if !options.contains(IkFilterOptions::IGNORE_JOINT_LIMITS) && !robot.arm_within_limits(manipulator, &candidate) {
            continue;
        }
        if let Some(filter) = filter {
            let end_effector = robot.end_effector_transform_for_arm(manipulator, &candidate);
            match filter.filter(&candidate, manipulator, &end_effector, goal) {
                IkFilterReturn::Success => {}
                IkFilterReturn::Reject => continue,
                IkFilterReturn::Quit => break,
            }
        }
        if options.contains(IkFilterOptions::CHECK_ENV_COLLISIONS) {
            robot.set_joint_values(&manipulator.arm_indices, &candidate)?;
            if checker.collides(&robot) {
                continue;
            }
        }
        accepted.push(candidate);
        if first_only {
            break;
        }
    }
    Ok(accepted)
}

/// Single collision free solution, or `None`.
pub fn find_ik_solution(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    manipulator: &Manipulator,
    goal: &GoalSpec,
    filter: Option<&dyn IkFilter>,
    free: Option<&[f64]>,
) -> Result<Option<Configuration>, PlanningError> {
    let mut found = find_ik_solutions(
        robot,
        checker,
        manipulator,
        goal,
        IkFilterOptions::CHECK_ENV_COLLISIONS,
        filter,
        free,
        true,
    )?;
    Ok(found.pop())
}

/// Samples up to `count` solutions by seeding the solver free parameters randomly, with at most
/// `50 * count` attempts. Solvers without free parameters contribute at most one solution.
pub fn sample_ik_solutions<R: Rng + ?Sized>(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    manipulator: &Manipulator,
    goal: &GoalSpec,
    count: usize,
    filter: Option<&dyn IkFilter>,
    rng: &mut R,
) -> Result<Vec<Configuration>, PlanningError> {
    let solver = manipulator
        .ik_solver
        .as_ref()
        .ok_or_else(|| PlanningError::NoIkSolver(manipulator.name.clone()))?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let free_count = solver.free_parameters();
    if free_count == 0 {
        if count != 1 {
            warn!("ik solver has no free parameters, sampling a single solution instead of {}", count);
        }
        return Ok(find_ik_solution(robot, checker, manipulator, goal, filter, None)?
            .into_iter()
            .collect());
    }

    let mut solutions = Vec::new();
    let mut free = vec![0.0; free_count];
    for _ in 0..sampling_attempts(count) {
        if solutions.len() == count {
            break;
        }
        for value in free.iter_mut() {
            *value = rng.gen_range(0.0..1.0);
        }
        if let Some(solution) = find_ik_solution(robot, checker, manipulator, goal, filter, Some(&free))? {
            solutions.push(solution);
        }
    }
    Ok(solutions)
}

/// Solver calls allowed when sampling `count` solutions.
fn sampling_attempts(count: usize) -> usize {
    count.saturating_mul(50)
}

/// Turns an ordered list of Cartesian goals into joint-space goals for the active
/// manipulator. A missing IK solver is reported before any goal is looked at. Goals without
/// solutions are skipped; an empty result means no goal is reachable.
pub fn resolve_ik_goals<R: Rng + ?Sized>(
    robot: &mut Robot,
    checker: &dyn CollisionChecker,
    goals: &[GoalSpec],
    mode: IkGoalMode,
    filter: Option<&dyn IkFilter>,
    rng: &mut R,
) -> Result<IkResolution, PlanningError> {
    let manipulator = robot.active_manipulator()?.clone();
    if manipulator.ik_solver.is_none() {
        return Err(PlanningError::NoIkSolver(manipulator.name.clone()));
    }
    if let Some(bad) = goals.iter().find(|g| !g.is_cartesian()) {
        return Err(PlanningError::InvalidGoal(format!("{:?} is not a Cartesian goal", bad)));
    }

    let mut resolution = IkResolution::default();
    for (index, goal) in goals.iter().enumerate() {
        match mode {
            IkGoalMode::Single => match find_ik_solution(robot, checker, &manipulator, goal, filter, None)? {
                Some(solution) => {
                    debug!("ik sol: {}", format_configuration(&solution));
                    resolution.configurations.push(solution);
                }
                None => warn!("no ik solution for goal {}", index),
            },
            IkGoalMode::All => {
                let solutions = find_ik_solutions(
                    robot,
                    checker,
                    &manipulator,
                    goal,
                    IkFilterOptions::CHECK_ENV_COLLISIONS,
                    filter,
                    None,
                    false,
                )?;
                if solutions.is_empty() {
                    warn!("no ik solution for goal {}", index);
                }
                resolution.configurations.extend(solutions);
            }
            IkGoalMode::Sampled(count) => {
                let solutions = sample_ik_solutions(robot, checker, &manipulator, goal, count, filter, rng)?;
                if solutions.len() != count {
                    warn!("only found {}/{} ik solutions for goal {}", solutions.len(), count, index);
                    resolution.shortfalls.push((index, solutions.len()));
                }
                resolution.configurations.extend(solutions);
            }
        }
    }
    info!(
        "resolved {} goal configurations from {} goals",
        resolution.configurations.len(),
        goals.len()
    );
    Ok(resolution)
}
