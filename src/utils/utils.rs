//! Helper functions

use nalgebra::{Isometry3, UnitQuaternion};
use std::f64::consts::PI;

/// Checks if all elements in the array are finite
pub fn is_valid(qs: &[f64]) -> bool {
    qs.iter().all(|&q| q.is_finite())
}

/// Formats configuration values for logging, radians as degrees.
pub fn format_configuration(qs: &[f64]) -> String {
    let row: Vec<String> = qs.iter().map(|q| format!("{:5.2}", q.to_degrees())).collect();
    format!("[{}]", row.join(" "))
}

/// Formats the pose as translation and quaternion (w last).
pub fn format_pose(isometry: &Isometry3<f64>) -> String {
    let translation = isometry.translation.vector;
    let rotation: UnitQuaternion<f64> = isometry.rotation;
    format!(
        "x: {:.5}, y: {:.5}, z: {:.5},  quat: {:.5},{:.5},{:.5},{:.5}",
        translation.x, translation.y, translation.z, rotation.i, rotation.j, rotation.k, rotation.w
    )
}

/// Wraps the angle into (-PI, PI].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI { wrapped - 2.0 * PI } else { wrapped }
}

/// Calculates the transition cost between two sets of joint positions, weighted by
/// given coefficients (rotating heavy base joints is more expensive). Missing
/// coefficients count as 1.
pub fn transition_costs(from: &[f64], to: &[f64], coefficients: &[f64]) -> f64 {
    from.iter()
        .zip(to)
        .enumerate()
        .map(|(i, (a, b))| (a - b).abs() * coefficients.get(i).copied().unwrap_or(1.0))
        .sum()
}

/// Largest absolute per-joint difference.
pub fn max_joint_step(from: &[f64], to: &[f64]) -> f64 {
    from.iter()
        .zip(to)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

/// Euclidean distance in joint space.
pub fn joint_distance(from: &[f64], to: &[f64]) -> f64 {
    from.iter()
        .zip(to)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}
