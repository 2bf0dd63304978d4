//! Planning orchestration for articulated robots: turns manipulation goals into executable
//! trajectories.
//!
//! The crate sits between the caller and the actual motion planners. It resolves Cartesian
//! goals into joint-space goals through inverse kinematics, repairs start and goal
//! configurations that are marginally in collision, drives joint-space planners in a retry loop
//! and hands the resulting trajectory over for execution, restoring the robot state on every
//! exit path.
//!
//! # Features
//!
//! - Jitter search: randomized repair of configurations that are slightly in collision or
//!   violate a motion constraint.
//! - Gripper constraint: keeps selected end effector DOFs at a target frame, using Jacobian
//!   based projection.
//! - IK goal resolution with one, all, or randomly sampled solutions per goal, and custom IK
//!   filters (such as the cone filter) that only affect the call they are passed to.
//! - Retrying planning loop over pluggable planners. The default "BiRRT" planner uses
//!   dual RRT-connect from the [rrt](https://crates.io/crates/rrt) crate.
//! - Straight end effector motion along a workspace line, tracked step by step with
//!   backtracking.
//! - Trajectory timing, execution and a flat text format for reading and writing trajectories.
//! - Manipulation commands over a shared, lockable environment ([`manipulation::BaseManipulation`]).
//!
//! Kinematic models, IK solvers and collision checkers are consumed through the traits in
//! [`kinematic_traits`]. A planar arm with analytical IK and disk obstacles
//! ([`planar_arm`]) is included for demonstrations and tests.
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use rs_manipulation::environment::Environment;
//! use rs_manipulation::manipulation::{BaseManipulation, MoveActiveJointsRequest};
//! use rs_manipulation::config::ManipulationConfig;
//! use rs_manipulation::robot::Robot;
//!
//! let robot = Robot::new("slider", vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
//! let never_collides = |_: &Robot| false;
//! let environment = Arc::new(Mutex::new(Environment::new(robot, never_collides)));
//! let manipulation = BaseManipulation::new(environment.clone(), ManipulationConfig::default()).unwrap();
//!
//! let request = MoveActiveJointsRequest { goal: vec![0.5, -0.5], ..Default::default() };
//! manipulation.move_active_joints(&request).unwrap();
//! assert!(environment.lock().unwrap().robot.motion().is_some());
//! ```

pub mod error;
pub mod kinematic_traits;

#[path = "utils/utils.rs"]
pub mod utils;

pub mod robot;
pub mod trajectory;
pub mod trajectory_io;
pub mod environment;

pub mod jacobian;
pub mod constraint;
pub mod jitter;
pub mod ik;

pub mod planner;
pub mod workspace;

pub mod path_plan {
    //! Default planner and workspace tracker.
    pub mod cartesian;
    pub mod rrt;
}

pub mod output;
pub mod config;
pub mod manipulation;

pub mod planar_arm;

#[cfg(test)]
mod tests;
