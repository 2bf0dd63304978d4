//! Error handling for manipulation commands

use thiserror::Error;

/// Unified error reported by manipulation commands.
///
/// The variants fall into three groups. Configuration errors (missing IK solver,
/// malformed goals, unknown planner) are reported immediately and never retried.
/// Search failures (jitter, IK, planning) are reported after their budgets are spent.
/// Environment errors cover the shared lock and file access.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("manipulator {0} has no ik solver set")]
    NoIkSolver(String),

    #[error("no ik filter function set")]
    NoFilter,

    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("planner {0} is not registered")]
    PlannerNotFound(String),

    #[error("no such manipulator: {0}")]
    NoActiveManipulator(String),

    #[error("invalid active DOF selection: {0}")]
    InvalidActiveDofs(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid trajectory: {0}")]
    InvalidTrajectory(String),

    #[error("could not jitter {0} out of collision")]
    JitterFailed(&'static str),

    #[error("no ik solution found")]
    NoIkSolution,

    #[error("planner initialization failed: {0}")]
    InitializationFailed(String),

    #[error("planning failed after {tries} tries")]
    PlanningFailed { tries: usize },

    #[error("workspace tracking failed: {0}")]
    TrackingFailed(String),

    #[error("environment lock is poisoned")]
    EnvironmentLocked,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PlanningError {
    fn from(err: std::io::Error) -> Self {
        PlanningError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for PlanningError {
    fn from(err: anyhow::Error) -> Self {
        PlanningError::Io(format!("{:#}", err))
    }
}
