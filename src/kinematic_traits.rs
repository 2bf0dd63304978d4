//! Contracts of the collaborators consumed by the manipulation core: kinematic model,
//! inverse kinematics and collision checking.

extern crate nalgebra as na;

use crate::ik::GoalSpec;
use crate::robot::Robot;
use na::Isometry3;

/// Pose is used a pose of the end effector. It contains both Cartesian position and rotation quaternion
/// ```
/// extern crate nalgebra as na;
/// use na::{Isometry3, Translation3, UnitQuaternion};
///
/// type Pose = Isometry3<f64>;
///
/// let translation = Translation3::new(1.0, 0.0, 0.0);
/// // The quaternion should be normalized to represent a valid rotation.
/// let rotation = UnitQuaternion::from_quaternion(na::Quaternion::new(1.0, 0.0, 0.0, 1.0).normalize());
/// let transform = Pose::from_parts(translation, rotation);
/// ```
pub type Pose = Isometry3<f64>;

/// Ordered joint coordinates over the active DOF set that produced them. The length
/// always matches the active DOF count at the time of sampling; the values are meaningless
/// outside that DOF selection.
pub type Configuration = Vec<f64>;

/// Forward kinematics of a manipulator arm. The pose is expressed in the robot frame,
/// the robot base transform is applied by the caller.
pub trait Kinematics: Send + Sync {
    /// Number of arm joints this model expects.
    fn dof(&self) -> usize;

    /// Pose of the end effector for the given arm joint values.
    fn forward(&self, qs: &[f64]) -> Pose;
}

/// Inverse kinematics solver attached to a manipulator. The numerical or analytical solve
/// itself lives outside this crate; the core only filters and orders what the solver
/// proposes (joint limits, custom filters, collisions).
pub trait IkSolver: Send + Sync {
    /// Number of free parameters that can be sampled to obtain different solution
    /// families (redundant joints). Each free value is normalized to `[0, 1)`.
    fn free_parameters(&self) -> usize {
        0
    }

    /// Returns the candidate arm configurations reaching the goal. The goal is already
    /// expressed in the robot frame. If `free` is `None`, the solver picks its own defaults
    /// for free parameters.
    fn solve(&self, goal: &GoalSpec, free: Option<&[f64]>) -> Vec<Configuration>;
}

/// Collision checker for the current state of the robot (self collisions and collisions
/// with the environment).
pub trait CollisionChecker: Send + Sync {
    /// True if the robot, in its current state, collides with itself or the environment.
    fn collides(&self, robot: &Robot) -> bool;
}

impl<F> CollisionChecker for F
where
    F: Fn(&Robot) -> bool + Send + Sync,
{
    fn collides(&self, robot: &Robot) -> bool {
        self(robot)
    }
}
