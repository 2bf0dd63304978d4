//! Robot state: joint values, limits, affine base pose, manipulators and the active DOF
//! selection, together with the scoped guards that restore this state on every exit path.

use std::f64::consts::PI;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bitflags::bitflags;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::PlanningError;
use crate::kinematic_traits::{Configuration, IkSolver, Kinematics, Pose};
use crate::trajectory::Trajectory;

bitflags! {
    /// Affine DOFs of the robot base that can be appended to the active joints.
    /// At most one rotation flag can be active; the active affine values follow the
    /// joint values in the order x, y, z, rotation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AffineDofs: u32 {
        const X =              0b0000_0001;
        const Y =              0b0000_0010;
        const Z =              0b0000_0100;

        /// Rotation about the world z axis, one value (radians).
        const ROTATION_AXIS =  0b0000_1000;

        /// Rotation as scaled axis, three values.
        const ROTATION_3D =    0b0001_0000;

        /// Rotation as quaternion w, i, j, k (four values).
        const ROTATION_QUAT =  0b0010_0000;

        const TRANSLATION = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
        const ROTATION = Self::ROTATION_AXIS.bits() | Self::ROTATION_3D.bits() | Self::ROTATION_QUAT.bits();
    }
}

impl AffineDofs {
    /// Number of configuration values these affine DOFs add (0 ..= 7).
    pub fn count(&self) -> usize {
        let mut count = self.intersection(Self::TRANSLATION).bits().count_ones() as usize;
        if self.contains(Self::ROTATION_AXIS) {
            count += 1;
        }
        if self.contains(Self::ROTATION_3D) {
            count += 3;
        }
        if self.contains(Self::ROTATION_QUAT) {
            count += 4;
        }
        count
    }

    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.intersection(Self::ROTATION).bits().count_ones() > 1 {
            return Err(PlanningError::InvalidActiveDofs(format!(
                "only one rotation representation can be active, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Ordered joint indices (plus affine flags) currently designated active.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ActiveDofs {
    pub indices: Vec<usize>,
    pub affine: AffineDofs,
}

impl ActiveDofs {
    pub fn len(&self) -> usize {
        self.indices.len() + self.affine.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arm of the robot with its kinematic model and optional IK solver.
#[derive(Clone)]
pub struct Manipulator {
    pub name: String,

    /// Robot joint indices that drive this arm, in the order the kinematic model expects.
    pub arm_indices: Vec<usize>,

    pub kinematics: Arc<dyn Kinematics>,

    /// Without a solver, Cartesian goals cannot be resolved for this manipulator.
    pub ik_solver: Option<Arc<dyn IkSolver>>,
}

impl fmt::Debug for Manipulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manipulator")
            .field("name", &self.name)
            .field("arm_indices", &self.arm_indices)
            .field("ik_solver", &self.ik_solver.is_some())
            .finish()
    }
}

/// Snapshot of everything a command may change on the robot.
#[derive(Clone, Debug, PartialEq)]
pub struct RobotState {
    values: Vec<f64>,
    transform: Pose,
    active: ActiveDofs,
    active_manipulator: usize,
}

#[derive(Clone)]
pub struct Robot {
    pub name: String,
    values: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    max_velocities: Vec<f64>,
    max_accelerations: Vec<f64>,

    /// Affine pose of the robot base in the world.
    transform: Pose,
    affine_translation_lower: Vector3<f64>,
    affine_translation_upper: Vector3<f64>,
    affine_translation_max_vels: Vector3<f64>,
    affine_rotation_max_vel: f64,

    manipulators: Vec<Manipulator>,
    active_manipulator: usize,
    active: ActiveDofs,

    /// Trajectory handed over for playback.
    motion: Option<Trajectory>,
}

impl Robot {
    /// Creates the robot with the given joint limits. All joints start active, the joint
    /// values start at zero clamped into the limits. Limits must be finite with lower <= upper.
    pub fn new(name: &str, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, PlanningError> {
        if lower.len() != upper.len() {
            return Err(PlanningError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(PlanningError::Config(format!(
                    "joint {} has invalid limits [{}, {}]",
                    i, lo, hi
                )));
            }
        }
        let dof = lower.len();
        let values = lower
            .iter()
            .zip(upper.iter())
            .map(|(lo, hi)| 0.0_f64.clamp(*lo, *hi))
            .collect();
        Ok(Robot {
            name: name.to_string(),
            values,
            lower,
            upper,
            max_velocities: vec![1.0; dof],
            max_accelerations: vec![2.0; dof],
            transform: Pose::identity(),
            affine_translation_lower: Vector3::repeat(-10.0),
            affine_translation_upper: Vector3::repeat(10.0),
            affine_translation_max_vels: Vector3::repeat(0.5),
            affine_rotation_max_vel: 0.5,
            manipulators: Vec::new(),
            active_manipulator: 0,
            active: ActiveDofs {
                indices: (0..dof).collect(),
                affine: AffineDofs::empty(),
            },
            motion: None,
        })
    }

    /// Sets per-joint velocity and acceleration limits used by the timing pass.
    pub fn with_dynamics_limits(
        mut self,
        max_velocities: Vec<f64>,
        max_accelerations: Vec<f64>,
    ) -> Result<Self, PlanningError> {
        for limits in [&max_velocities, &max_accelerations] {
            if limits.len() != self.dof() {
                return Err(PlanningError::DimensionMismatch {
                    expected: self.dof(),
                    found: limits.len(),
                });
            }
            if limits.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
                return Err(PlanningError::Config(
                    "velocity and acceleration limits must be positive".into(),
                ));
            }
        }
        self.max_velocities = max_velocities;
        self.max_accelerations = max_accelerations;
        Ok(self)
    }

    pub fn with_affine_translation_limits(mut self, lower: Vector3<f64>, upper: Vector3<f64>) -> Self {
        self.affine_translation_lower = lower;
        self.affine_translation_upper = upper;
        self
    }

    pub fn dof(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn set_values(&mut self, values: &[f64]) -> Result<(), PlanningError> {
        if values.len() != self.dof() {
            return Err(PlanningError::DimensionMismatch {
                expected: self.dof(),
                found: values.len(),
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    /// Sets the values of the listed joints, leaving all others untouched.
    pub fn set_joint_values(&mut self, indices: &[usize], values: &[f64]) -> Result<(), PlanningError> {
        if indices.len() != values.len() {
            return Err(PlanningError::DimensionMismatch {
                expected: indices.len(),
                found: values.len(),
            });
        }
        for (&index, &value) in indices.iter().zip(values) {
            let slot = self.values.get_mut(index).ok_or_else(|| {
                PlanningError::InvalidActiveDofs(format!("joint index {} out of range", index))
            })?;
            *slot = value;
        }
        Ok(())
    }

    pub fn joint_values(&self, indices: &[usize]) -> Configuration {
        indices.iter().map(|&i| self.values[i]).collect()
    }

    pub fn joint_limits(&self) -> (&[f64], &[f64]) {
        (&self.lower, &self.upper)
    }

    pub fn transform(&self) -> &Pose {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Pose) {
        self.transform = transform;
    }

    pub fn affine_translation_max_vels(&self) -> Vector3<f64> {
        self.affine_translation_max_vels
    }

    pub fn set_affine_translation_max_vels(&mut self, vels: Vector3<f64>) {
        self.affine_translation_max_vels = vels;
    }

    pub fn affine_rotation_max_vel(&self) -> f64 {
        self.affine_rotation_max_vel
    }

    pub fn set_affine_rotation_max_vel(&mut self, vel: f64) {
        self.affine_rotation_max_vel = vel;
    }

    pub fn manipulators(&self) -> &[Manipulator] {
        &self.manipulators
    }

    /// Adds the manipulator, returning its index. The first added manipulator becomes active.
    pub fn add_manipulator(&mut self, manipulator: Manipulator) -> Result<usize, PlanningError> {
        if let Some(bad) = manipulator.arm_indices.iter().find(|&&i| i >= self.dof()) {
            return Err(PlanningError::InvalidActiveDofs(format!(
                "manipulator {} refers to joint {} of a {} DOF robot",
                manipulator.name,
                bad,
                self.dof()
            )));
        }
        if manipulator.kinematics.dof() != manipulator.arm_indices.len() {
            return Err(PlanningError::DimensionMismatch {
                expected: manipulator.arm_indices.len(),
                found: manipulator.kinematics.dof(),
            });
        }
        self.manipulators.push(manipulator);
        Ok(self.manipulators.len() - 1)
    }

    pub fn active_manipulator_index(&self) -> usize {
        self.active_manipulator
    }

    pub fn active_manipulator(&self) -> Result<&Manipulator, PlanningError> {
        self.manipulators
            .get(self.active_manipulator)
            .ok_or_else(|| PlanningError::NoActiveManipulator(format!("#{}", self.active_manipulator)))
    }

    pub fn set_active_manipulator(&mut self, index: usize) -> Result<(), PlanningError> {
        if index >= self.manipulators.len() {
            return Err(PlanningError::NoActiveManipulator(format!("#{}", index)));
        }
        self.active_manipulator = index;
        Ok(())
    }

    /// Pose of the manipulator end effector in the world, for the current joint values.
    pub fn end_effector_transform(&self, manipulator: &Manipulator) -> Pose {
        self.transform * manipulator.kinematics.forward(&self.joint_values(&manipulator.arm_indices))
    }

    /// Pose of the manipulator end effector in the world if the given arm values were set.
    pub fn end_effector_transform_for_arm(&self, manipulator: &Manipulator, arm_values: &[f64]) -> Pose {
        self.transform * manipulator.kinematics.forward(arm_values)
    }

    /// Pose of the manipulator end effector in the world if the given active values
    /// were set. The robot itself is not modified.
    pub fn end_effector_transform_for_active(
        &self,
        manipulator: &Manipulator,
        active_values: &[f64],
    ) -> Result<Pose, PlanningError> {
        let (values, transform) = self.compose_active(active_values)?;
        let arm: Configuration = manipulator.arm_indices.iter().map(|&i| values[i]).collect();
        Ok(transform * manipulator.kinematics.forward(&arm))
    }

    pub fn arm_within_limits(&self, manipulator: &Manipulator, arm_values: &[f64]) -> bool {
        manipulator
            .arm_indices
            .iter()
            .zip(arm_values)
            .all(|(&i, q)| *q >= self.lower[i] && *q <= self.upper[i])
    }

    pub fn active_dofs(&self) -> &ActiveDofs {
        &self.active
    }

    pub fn active_dof(&self) -> usize {
        self.active.len()
    }

    pub fn set_active_dofs(&mut self, indices: &[usize], affine: AffineDofs) -> Result<(), PlanningError> {
        affine.validate()?;
        if let Some(bad) = indices.iter().find(|&&i| i >= self.dof()) {
            return Err(PlanningError::InvalidActiveDofs(format!(
                "joint index {} out of range for {} DOF robot",
                bad,
                self.dof()
            )));
        }
        self.active = ActiveDofs {
            indices: indices.to_vec(),
            affine,
        };
        Ok(())
    }

    pub fn active_dof_values(&self) -> Configuration {
        let mut values: Configuration = self.joint_values(&self.active.indices);
        append_affine_values(&self.transform, self.active.affine, &mut values);
        values
    }

    pub fn set_active_dof_values(&mut self, values: &[f64]) -> Result<(), PlanningError> {
        let (all, transform) = self.compose_active(values)?;
        self.values = all;
        self.transform = transform;
        Ok(())
    }

    /// Full joint vector and base transform that would result from setting the active values.
    fn compose_active(&self, values: &[f64]) -> Result<(Vec<f64>, Pose), PlanningError> {
        if values.len() != self.active_dof() {
            return Err(PlanningError::DimensionMismatch {
                expected: self.active_dof(),
                found: values.len(),
            });
        }
        let joints = self.active.indices.len();
        let mut all = self.values.clone();
        for (&index, &value) in self.active.indices.iter().zip(&values[..joints]) {
            all[index] = value;
        }
        let transform = apply_affine_values(&self.transform, self.active.affine, &values[joints..]);
        Ok((all, transform))
    }

    /// Lower and upper limits of the active DOFs, affine DOFs included.
    pub fn active_dof_limits(&self) -> (Configuration, Configuration) {
        let mut lower: Configuration = self.active.indices.iter().map(|&i| self.lower[i]).collect();
        let mut upper: Configuration = self.active.indices.iter().map(|&i| self.upper[i]).collect();
        let affine = self.active.affine;
        for (flag, axis) in [(AffineDofs::X, 0), (AffineDofs::Y, 1), (AffineDofs::Z, 2)] {
            if affine.contains(flag) {
                lower.push(self.affine_translation_lower[axis]);
                upper.push(self.affine_translation_upper[axis]);
            }
        }
        let (rotation_count, bound) = rotation_dofs(affine);
        for _ in 0..rotation_count {
            lower.push(-bound);
            upper.push(bound);
        }
        (lower, upper)
    }

    pub fn active_within_limits(&self, values: &[f64]) -> bool {
        let (lower, upper) = self.active_dof_limits();
        values.len() == lower.len()
            && values
                .iter()
                .zip(lower.iter().zip(upper.iter()))
                .all(|(q, (lo, hi))| *q >= *lo && *q <= *hi)
    }

    /// Velocity limits of the active DOFs. Affine DOFs use the affine velocity caps.
    pub fn active_velocity_limits(&self) -> Configuration {
        self.active_dynamics(&self.max_velocities)
    }

    /// Acceleration limits of the active DOFs. Affine DOFs reuse their velocity caps.
    pub fn active_acceleration_limits(&self) -> Configuration {
        self.active_dynamics(&self.max_accelerations)
    }

    fn active_dynamics(&self, joint_limits: &[f64]) -> Configuration {
        let mut limits: Configuration = self.active.indices.iter().map(|&i| joint_limits[i]).collect();
        let affine = self.active.affine;
        for (flag, axis) in [(AffineDofs::X, 0), (AffineDofs::Y, 1), (AffineDofs::Z, 2)] {
            if affine.contains(flag) {
                limits.push(self.affine_translation_max_vels[axis]);
            }
        }
        let (rotation_count, _) = rotation_dofs(affine);
        limits.extend(std::iter::repeat_n(self.affine_rotation_max_vel, rotation_count));
        limits
    }

    pub fn motion(&self) -> Option<&Trajectory> {
        self.motion.as_ref()
    }

    /// Hands the trajectory over for playback, replacing any previous motion.
    pub fn set_motion(&mut self, trajectory: Trajectory) {
        self.motion = Some(trajectory);
    }

    pub fn save_state(&self) -> RobotState {
        RobotState {
            values: self.values.clone(),
            transform: self.transform,
            active: self.active.clone(),
            active_manipulator: self.active_manipulator,
        }
    }

    pub fn restore_state(&mut self, state: &RobotState) {
        self.values.clone_from(&state.values);
        self.transform = state.transform;
        self.active.clone_from(&state.active);
        self.active_manipulator = state.active_manipulator;
    }
}

fn rotation_dofs(affine: AffineDofs) -> (usize, f64) {
    if affine.contains(AffineDofs::ROTATION_AXIS) {
        (1, PI)
    } else if affine.contains(AffineDofs::ROTATION_3D) {
        (3, PI)
    } else if affine.contains(AffineDofs::ROTATION_QUAT) {
        (4, 1.0)
    } else {
        (0, 0.0)
    }
}

fn append_affine_values(transform: &Pose, affine: AffineDofs, out: &mut Configuration) {
    let translation = transform.translation.vector;
    for (flag, axis) in [(AffineDofs::X, 0), (AffineDofs::Y, 1), (AffineDofs::Z, 2)] {
        if affine.contains(flag) {
            out.push(translation[axis]);
        }
    }
    let rotation = transform.rotation;
    if affine.contains(AffineDofs::ROTATION_AXIS) {
        let (_, _, yaw) = rotation.euler_angles();
        out.push(yaw);
    } else if affine.contains(AffineDofs::ROTATION_3D) {
        out.extend(rotation.scaled_axis().iter());
    } else if affine.contains(AffineDofs::ROTATION_QUAT) {
        out.extend([rotation.w, rotation.i, rotation.j, rotation.k]);
    }
}

fn apply_affine_values(transform: &Pose, affine: AffineDofs, values: &[f64]) -> Pose {
    let mut result = *transform;
    let mut next = values.iter().copied();
    for (flag, axis) in [(AffineDofs::X, 0), (AffineDofs::Y, 1), (AffineDofs::Z, 2)] {
        if affine.contains(flag) {
            if let Some(v) = next.next() {
                result.translation.vector[axis] = v;
            }
        }
    }
    let mut take = |n: usize| -> Vec<f64> { next.by_ref().take(n).collect() };
    if affine.contains(AffineDofs::ROTATION_AXIS) {
        let angle = take(1);
        result.rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle[0]);
    } else if affine.contains(AffineDofs::ROTATION_3D) {
        let axis = take(3);
        result.rotation = UnitQuaternion::from_scaled_axis(Vector3::new(axis[0], axis[1], axis[2]));
    } else if affine.contains(AffineDofs::ROTATION_QUAT) {
        let q = take(4);
        result.rotation = UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3]));
    }
    result
}

/// Captures the robot configuration, base pose, active DOF selection and active manipulator
/// on creation and restores all of them when dropped, whatever path the command takes.
/// The guard dereferences to the robot so the command works through it.
pub struct RobotStateSaver<'a> {
    robot: &'a mut Robot,
    state: RobotState,
}

impl<'a> RobotStateSaver<'a> {
    pub fn new(robot: &'a mut Robot) -> Self {
        let state = robot.save_state();
        RobotStateSaver { robot, state }
    }
}

impl Deref for RobotStateSaver<'_> {
    type Target = Robot;

    fn deref(&self) -> &Robot {
        self.robot
    }
}

impl DerefMut for RobotStateSaver<'_> {
    fn deref_mut(&mut self) -> &mut Robot {
        self.robot
    }
}

impl Drop for RobotStateSaver<'_> {
    fn drop(&mut self) {
        self.robot.restore_state(&self.state);
    }
}

/// Temporarily replaces the affine velocity caps, restoring the previous ones on drop.
pub struct AffineVelocityOverride<'a> {
    robot: &'a mut Robot,
    translation: Vector3<f64>,
    rotation: f64,
}

impl<'a> AffineVelocityOverride<'a> {
    pub fn new(robot: &'a mut Robot, translation: Vector3<f64>, rotation: f64) -> Self {
        let saved_translation = robot.affine_translation_max_vels();
        let saved_rotation = robot.affine_rotation_max_vel();
        robot.set_affine_translation_max_vels(translation);
        robot.set_affine_rotation_max_vel(rotation);
        AffineVelocityOverride {
            robot,
            translation: saved_translation,
            rotation: saved_rotation,
        }
    }
}

impl Deref for AffineVelocityOverride<'_> {
    type Target = Robot;

    fn deref(&self) -> &Robot {
        self.robot
    }
}

impl Drop for AffineVelocityOverride<'_> {
    fn drop(&mut self) {
        self.robot.set_affine_translation_max_vels(self.translation);
        self.robot.set_affine_rotation_max_vel(self.rotation);
    }
}
