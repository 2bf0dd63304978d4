//! Numerical Jacobian of the end effector pose over an arbitrary number of DOFs.

extern crate nalgebra as na;

use na::linalg::SVD;
use na::{DMatrix, DVector, Matrix3, UnitQuaternion};

use crate::kinematic_traits::Pose;

/// Struct representing the Jacobian matrix
pub struct Jacobian {
    /// A 6xN matrix. Each column corresponds to a DOF, the rows are the linear (x, y, z)
    /// and angular (x, y, z) velocities of the end effector.
    matrix: DMatrix<f64>,

    /// The disturbance value used for computing the Jacobian
    epsilon: f64,
}

impl Jacobian {
    /// Computes the Jacobian of `forward` at `qs` by finite differences.
    pub fn new(forward: impl Fn(&[f64]) -> Pose, qs: &[f64], epsilon: f64) -> Self {
        let matrix = compute_jacobian(forward, qs, epsilon);
        Self { matrix, epsilon }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The same Jacobian with both linear and angular rows expressed in the frame given by `rotation`.
    pub fn in_frame(&self, rotation: &UnitQuaternion<f64>) -> Jacobian {
        let inverse: Matrix3<f64> = rotation.inverse().to_rotation_matrix().into_inner();
        let mut matrix = self.matrix.clone();
        for column in 0..matrix.ncols() {
            let linear = inverse * self.matrix.fixed_view::<3, 1>(0, column);
            let angular = inverse * self.matrix.fixed_view::<3, 1>(3, column);
            matrix.fixed_view_mut::<3, 1>(0, column).copy_from(&linear);
            matrix.fixed_view_mut::<3, 1>(3, column).copy_from(&angular);
        }
        Jacobian {
            matrix,
            epsilon: self.epsilon,
        }
    }

    /// Keeps only the listed rows (end effector DOFs of interest).
    pub fn select_rows(&self, rows: &[usize]) -> Jacobian {
        Jacobian {
            matrix: self.matrix.select_rows(rows),
            epsilon: self.epsilon,
        }
    }

    /// Computes the DOF velocities producing the desired end effector velocity, using the
    /// pseudoinverse so that redundant and under-actuated cases are both handled.
    pub fn velocities_from_vector(&self, desired: &DVector<f64>) -> Result<DVector<f64>, &'static str> {
        if desired.len() != self.matrix.nrows() {
            return Err("Desired velocity does not match the Jacobian rows");
        }
        let svd = SVD::new(self.matrix.clone(), true, true);
        let pseudo_inverse = svd.pseudo_inverse(self.epsilon)?;
        Ok(pseudo_inverse * desired)
    }
}

/// Computes the 6xN Jacobian for the given forward kinematics and configuration.
/// Linear rows are the position derivatives, angular rows the scaled-axis derivatives
/// of the orientation, both in the world frame.
pub fn compute_jacobian(forward: impl Fn(&[f64]) -> Pose, qs: &[f64], epsilon: f64) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(6, qs.len());
    let current_pose = forward(qs);
    let current_position = current_pose.translation.vector;
    let current_orientation = current_pose.rotation;

    let mut perturbed_qs = qs.to_vec();
    for i in 0..qs.len() {
        perturbed_qs[i] += epsilon;
        let perturbed_pose = forward(&perturbed_qs);
        perturbed_qs[i] = qs[i];

        let delta_position = (perturbed_pose.translation.vector - current_position) / epsilon;
        let delta_orientation = (perturbed_pose.rotation * current_orientation.inverse()).scaled_axis() / epsilon;

        jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&delta_position);
        jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&delta_orientation);
    }

    jacobian
}
