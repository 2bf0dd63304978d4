//! Time-stamped sequence of waypoints produced by planners and trackers.

use nalgebra::Vector3;

use crate::error::PlanningError;
use crate::kinematic_traits::{Configuration, Pose};

/// Interpolation used by the timing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationKind {
    /// Constant velocity on each segment.
    Linear,
    /// Cubic segments that start and end at rest.
    Cubic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub q: Configuration,

    /// End effector (or workspace) transform, if known.
    pub transform: Option<Pose>,

    /// Time from the start of the trajectory, seconds.
    pub time: f64,
}

/// Ordered waypoints with non-decreasing timestamps. A trajectory whose waypoints all carry
/// the same timestamp is untimed until a timing pass assigns durations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    dof: usize,
    points: Vec<Waypoint>,
}

impl Trajectory {
    pub fn new(dof: usize) -> Self {
        Trajectory {
            dof,
            points: Vec::new(),
        }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn points(&self) -> &[Waypoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Appends an untimed configuration (it takes the time of the previous waypoint).
    pub fn push_configuration(&mut self, q: Configuration) -> Result<(), PlanningError> {
        let time = self.points.last().map_or(0.0, |p| p.time);
        self.push(Waypoint {
            q,
            transform: None,
            time,
        })
    }

    pub fn push(&mut self, waypoint: Waypoint) -> Result<(), PlanningError> {
        if waypoint.q.len() != self.dof {
            return Err(PlanningError::DimensionMismatch {
                expected: self.dof,
                found: waypoint.q.len(),
            });
        }
        if let Some(last) = self.points.last() {
            if waypoint.time < last.time {
                return Err(PlanningError::InvalidTrajectory(format!(
                    "time {} goes back from {}",
                    waypoint.time, last.time
                )));
            }
        }
        self.points.push(waypoint);
        Ok(())
    }

    pub fn first_configuration(&self) -> Option<&Configuration> {
        self.points.first().map(|p| &p.q)
    }

    pub fn last_configuration(&self) -> Option<&Configuration> {
        self.points.last().map(|p| &p.q)
    }

    pub fn total_duration(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }

    /// Stamps every waypoint with the same transform.
    pub fn set_transforms(&mut self, transform: &Pose) {
        for point in &mut self.points {
            point.transform = Some(*transform);
        }
    }

    /// Assigns timestamps from joint velocity and acceleration limits. Both limits are
    /// scaled by `max_vel_mult`, so the multiplier speeds up or slows down every DOF
    /// uniformly. Each segment takes the time of its slowest DOF.
    pub fn calc_timing(
        &mut self,
        max_velocities: &[f64],
        max_accelerations: &[f64],
        kind: InterpolationKind,
        max_vel_mult: f64,
    ) -> Result<(), PlanningError> {
        if max_velocities.len() != self.dof || max_accelerations.len() != self.dof {
            return Err(PlanningError::DimensionMismatch {
                expected: self.dof,
                found: max_velocities.len().min(max_accelerations.len()),
            });
        }
        if !(max_vel_mult.is_finite() && max_vel_mult > 0.0) {
            return Err(PlanningError::Config(format!(
                "velocity multiplier must be positive, got {}",
                max_vel_mult
            )));
        }

        let mut time = 0.0;
        let mut previous: Option<Configuration> = None;
        for point in &mut self.points {
            if let Some(prev) = &previous {
                time += segment_duration(prev, &point.q, max_velocities, max_accelerations, kind, max_vel_mult);
            }
            point.time = time;
            previous = Some(point.q.clone());
        }
        Ok(())
    }

    /// Linear timing of a workspace trajectory from its transforms, bounded by
    /// the affine translation and rotation speed caps.
    pub fn calc_workspace_timing(&mut self, max_translation_vels: &Vector3<f64>, max_rotation_vel: f64) {
        let mut time = 0.0;
        let mut previous: Option<Pose> = None;
        for point in &mut self.points {
            if let (Some(prev), Some(current)) = (&previous, &point.transform) {
                let delta = current.translation.vector - prev.translation.vector;
                let translation_time = (0..3)
                    .map(|axis| delta[axis].abs() / max_translation_vels[axis])
                    .fold(0.0, f64::max);
                let rotation_time = prev.rotation.angle_to(&current.rotation) / max_rotation_vel;
                time += translation_time.max(rotation_time);
            }
            point.time = time;
            previous = point.transform;
        }
    }
}

fn segment_duration(
    from: &[f64],
    to: &[f64],
    max_velocities: &[f64],
    max_accelerations: &[f64],
    kind: InterpolationKind,
    max_vel_mult: f64,
) -> f64 {
    from.iter()
        .zip(to)
        .zip(max_velocities.iter().zip(max_accelerations))
        .map(|((a, b), (v, acc))| {
            let distance = (b - a).abs();
            let velocity = v * max_vel_mult;
            let acceleration = acc * max_vel_mult;
            match kind {
                InterpolationKind::Linear => distance / velocity,
                // Rest-to-rest cubic: peak velocity 1.5 d/T, peak acceleration 6 d/T^2.
                InterpolationKind::Cubic => (1.5 * distance / velocity).max((6.0 * distance / acceleration).sqrt()),
            }
        })
        .fold(0.0, f64::max)
}
