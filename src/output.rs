//! Finalizing produced trajectories: timing, execution, serialization and the command response.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::PlanningError;
use crate::kinematic_traits::Configuration;
use crate::robot::Robot;
use crate::trajectory::{InterpolationKind, Trajectory};
use crate::trajectory_io::{serialize_trajectory, write_trajectory};

/// Receives finished trajectories. Timing uses the limits of the consumer.
pub trait TrajectoryConsumer {
    /// Takes the trajectory over for playback.
    fn execute(&mut self, trajectory: Trajectory);

    fn compute_timing(
        &self,
        trajectory: &mut Trajectory,
        kind: InterpolationKind,
        max_vel_mult: f64,
    ) -> Result<(), PlanningError>;
}

impl TrajectoryConsumer for Robot {
    fn execute(&mut self, trajectory: Trajectory) {
        self.set_motion(trajectory);
    }

    /// Times over the active DOFs, so the trajectory must be expressed in them.
    fn compute_timing(
        &self,
        trajectory: &mut Trajectory,
        kind: InterpolationKind,
        max_vel_mult: f64,
    ) -> Result<(), PlanningError> {
        trajectory.calc_timing(
            &self.active_velocity_limits(),
            &self.active_acceleration_limits(),
            kind,
            max_vel_mult,
        )
    }
}

/// What to do with a produced trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOptions {
    /// Hand the trajectory to the consumer for execution.
    pub execute: bool,

    /// Also write the trajectory to this file.
    pub write_trajectory: Option<PathBuf>,

    /// Return the serialized trajectory in the response.
    pub output_trajectory: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            execute: true,
            write_trajectory: None,
            output_trajectory: false,
        }
    }
}

/// Response of a manipulation command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// The trajectory was handed over for execution.
    pub executed: bool,

    /// Serialized trajectory, if requested.
    pub trajectory: Option<String>,

    /// Terminal configuration, for commands that report it.
    pub final_values: Option<Configuration>,

    /// IK solutions, for commands that resolve them.
    pub solutions: Vec<Configuration>,
}

/// Finalizes a trajectory: untimed trajectories with more than one waypoint are timed
/// (cubic, limits scaled by `max_vel_mult`) before anything else happens, then the
/// trajectory is optionally executed, written to a file and serialized into the response.
pub fn set_active_trajectory(
    consumer: &mut dyn TrajectoryConsumer,
    mut trajectory: Trajectory,
    options: &OutputOptions,
    max_vel_mult: f64,
) -> Result<CommandOutput, PlanningError> {
    if trajectory.is_empty() {
        return Err(PlanningError::InvalidTrajectory("trajectory has no waypoints".into()));
    }
    if trajectory.len() > 1 && trajectory.total_duration() == 0.0 {
        consumer.compute_timing(&mut trajectory, InterpolationKind::Cubic, max_vel_mult)?;
        debug!("timed trajectory to {:.3} s", trajectory.total_duration());
    }

    let mut output = CommandOutput::default();
    if let Some(path) = &options.write_trajectory {
        write_trajectory(path, &trajectory)?;
    }
    if options.output_trajectory {
        output.trajectory = Some(serialize_trajectory(&trajectory));
    }
    if options.execute {
        info!(
            "executing trajectory of {} waypoints, {:.3} s",
            trajectory.len(),
            trajectory.total_duration()
        );
        consumer.execute(trajectory);
        output.executed = true;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records what it was asked to do.
    #[derive(Default)]
    struct Recorder {
        executed: Vec<Trajectory>,
        timed: std::cell::Cell<usize>,
    }

    impl TrajectoryConsumer for Recorder {
        fn execute(&mut self, trajectory: Trajectory) {
            self.executed.push(trajectory);
        }

        fn compute_timing(&self, trajectory: &mut Trajectory, kind: InterpolationKind, mult: f64) -> Result<(), PlanningError> {
            self.timed.set(self.timed.get() + 1);
            // Velocity bound segments, the acceleration limit never dominates.
            trajectory.calc_timing(&vec![1.0; trajectory.dof()], &vec![1e6; trajectory.dof()], kind, mult)
        }
    }

    fn untimed() -> Trajectory {
        let mut trajectory = Trajectory::new(1);
        trajectory.push_configuration(vec![0.0]).unwrap();
        trajectory.push_configuration(vec![1.0]).unwrap();
        trajectory
    }

    #[test]
    fn test_timing_before_execution() {
        let mut recorder = Recorder::default();
        let output = set_active_trajectory(&mut recorder, untimed(), &OutputOptions::default(), 1.0).unwrap();
        assert!(output.executed);
        assert_eq!(recorder.timed.get(), 1);
        assert!(recorder.executed[0].total_duration() > 0.0);
    }

    #[test]
    fn test_multiplier_speeds_up() {
        let mut slow = Recorder::default();
        let mut fast = Recorder::default();
        set_active_trajectory(&mut slow, untimed(), &OutputOptions::default(), 1.0).unwrap();
        set_active_trajectory(&mut fast, untimed(), &OutputOptions::default(), 2.0).unwrap();
        let ratio = slow.executed[0].total_duration() / fast.executed[0].total_duration();
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_execution_is_optional() {
        let mut recorder = Recorder::default();
        let options = OutputOptions {
            execute: false,
            output_trajectory: true,
            ..OutputOptions::default()
        };
        let output = set_active_trajectory(&mut recorder, untimed(), &options, 1.0).unwrap();
        assert!(!output.executed);
        assert!(recorder.executed.is_empty());
        assert!(output.trajectory.unwrap().starts_with("1 2\n"));
    }

    #[test]
    fn test_single_point_is_not_timed_and_empty_fails() {
        let mut recorder = Recorder::default();
        let mut single = Trajectory::new(1);
        single.push_configuration(vec![0.5]).unwrap();
        set_active_trajectory(&mut recorder, single, &OutputOptions::default(), 1.0).unwrap();
        assert_eq!(recorder.timed.get(), 0);
        assert!(set_active_trajectory(&mut recorder, Trajectory::new(1), &OutputOptions::default(), 1.0).is_err());
    }

    #[test]
    fn test_robot_consumer() {
        let mut robot = Robot::new("box", vec![-1.0], vec![1.0]).unwrap();
        set_active_trajectory(&mut robot, untimed(), &OutputOptions::default(), 1.0).unwrap();
        let motion = robot.motion().unwrap();
        assert!(motion.total_duration() > 0.0);
    }
}
