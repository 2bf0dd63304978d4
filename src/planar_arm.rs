//! Serial arm with all revolute joints about parallel z axes, moving in the xy plane.
//! Serves as a complete reference robot: forward kinematics, an analytical IK solver with
//! free joints for redundant arms, and a collision checker against disk obstacles.

use std::f64::consts::PI;

use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};

use crate::ik::GoalSpec;
use crate::kinematic_traits::{CollisionChecker, Configuration, IkSolver, Kinematics, Pose};
use crate::robot::Robot;
use crate::utils::wrap_angle;

const PLANE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct PlanarArm {
    link_lengths: Vec<f64>,
}

impl PlanarArm {
    pub fn new(link_lengths: Vec<f64>) -> Self {
        PlanarArm { link_lengths }
    }

    pub fn link_lengths(&self) -> &[f64] {
        &self.link_lengths
    }

    /// Positions of the base, every joint and the tip, in the robot frame.
    pub fn link_points(&self, qs: &[f64]) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(self.link_lengths.len() + 1);
        let mut position = Point3::origin();
        let mut angle = 0.0;
        points.push(position);
        for (length, q) in self.link_lengths.iter().zip(qs) {
            angle += q;
            position += Vector3::new(length * angle.cos(), length * angle.sin(), 0.0);
            points.push(position);
        }
        points
    }
}

impl Kinematics for PlanarArm {
    fn dof(&self) -> usize {
        self.link_lengths.len()
    }

    fn forward(&self, qs: &[f64]) -> Pose {
        let tip = self.link_points(qs).pop().unwrap_or_else(Point3::origin);
        let yaw: f64 = qs.iter().take(self.link_lengths.len()).sum();
        Pose::from_parts(
            Translation3::from(tip.coords),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw),
        )
    }
}

/// Analytical IK for [`PlanarArm`]. The last two joints are solved in closed form (elbow
/// up and elbow down), the preceding ones are free parameters. For full pose goals the
/// last joint is reserved for the orientation, so one free parameter less is used.
/// A free value `f` in `[0, 1)` maps to the joint angle `-PI + 2 PI f`; without free values
/// the free joints are kept at zero.
#[derive(Debug, Clone)]
pub struct PlanarArmIk {
    arm: PlanarArm,
}

impl PlanarArmIk {
    pub fn new(arm: PlanarArm) -> Self {
        PlanarArmIk { arm }
    }

    /// Values of the leading `count` joints from the normalized free parameters.
    fn free_joints(free: Option<&[f64]>, count: usize) -> Vec<f64> {
        (0..count)
            .map(|i| {
                free.and_then(|f| f.get(i))
                    .map_or(0.0, |f| -PI + 2.0 * PI * f)
            })
            .collect()
    }

    /// Solves the two links `lengths` for the target point, given the pose of their base.
    fn solve_two_links(base: &Pose, lengths: (f64, f64), target: &Vector3<f64>) -> Vec<(f64, f64)> {
        let local = base.inverse_transform_point(&Point3::from(*target));
        let (l1, l2) = lengths;
        let r2 = local.x * local.x + local.y * local.y;
        let c = (r2 - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
        if !c.is_finite() || c.abs() > 1.0 + 1e-9 {
            return Vec::new();
        }
        let elbow = c.clamp(-1.0, 1.0).acos();
        let mut solutions = Vec::with_capacity(2);
        for q2 in [elbow, -elbow] {
            let q1 = local.y.atan2(local.x) - (l2 * q2.sin()).atan2(l1 + l2 * q2.cos());
            let solution = (wrap_angle(q1), wrap_angle(q2));
            if !solutions.iter().any(|(a, b): &(f64, f64)| (a - solution.0).abs() < 1e-12 && (b - solution.1).abs() < 1e-12) {
                solutions.push(solution);
            }
        }
        solutions
    }

    /// Solves the two links following the `leading` joints for the target point.
    fn solve_position(&self, target: &Vector3<f64>, leading: &[f64]) -> Vec<Configuration> {
        let lengths = self.arm.link_lengths();
        let first = leading.len();
        if first + 2 > lengths.len() || target.z.abs() > PLANE_TOLERANCE {
            return Vec::new();
        }
        let base = self.arm.forward(leading);
        Self::solve_two_links(&base, (lengths[first], lengths[first + 1]), target)
            .into_iter()
            .map(|(q1, q2)| {
                let mut q = leading.to_vec();
                q.extend([q1, q2]);
                q
            })
            .collect()
    }

    fn solve_pose(&self, goal: &Pose, free: Option<&[f64]>) -> Vec<Configuration> {
        let lengths = self.arm.link_lengths();
        let n = lengths.len();
        let z = goal.rotation * Vector3::z();
        if n < 2 || (z - Vector3::z()).norm() > PLANE_TOLERANCE {
            return Vec::new();
        }
        let (_, _, yaw) = goal.rotation.euler_angles();
        if n == 2 {
            // Not enough joints to choose the orientation, keep what reaches it anyway.
            return self
                .solve_position(&goal.translation.vector, &[])
                .into_iter()
                .filter(|q| wrap_angle(q[0] + q[1] - yaw).abs() < 1e-6)
                .collect();
        }
        let leading = Self::free_joints(free, n - 3);
        let wrist = goal.translation.vector - lengths[n - 1] * Vector3::new(yaw.cos(), yaw.sin(), 0.0);
        self.solve_position(&wrist, &leading)
            .into_iter()
            .map(|mut q| {
                let reached: f64 = q.iter().sum();
                q.push(wrap_angle(yaw - reached));
                q
            })
            .collect()
    }
}

impl IkSolver for PlanarArmIk {
    fn free_parameters(&self) -> usize {
        self.arm.dof().saturating_sub(2)
    }

    fn solve(&self, goal: &GoalSpec, free: Option<&[f64]>) -> Vec<Configuration> {
        match goal {
            GoalSpec::Translation3D(target) => {
                let leading = Self::free_joints(free, self.free_parameters());
                self.solve_position(target, &leading)
            }
            GoalSpec::Transform6D(pose) => self.solve_pose(pose, free),
            GoalSpec::Rotation3D(_) | GoalSpec::Joints(_) => Vec::new(),
        }
    }
}

/// Disk (cylinder) obstacle in the world xy plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disk {
    pub center: Point3<f64>,
    pub radius: f64,
}

/// Reports a collision if any link segment of the arm passes through an obstacle disk.
pub struct DiskObstacles {
    arm: PlanarArm,
    arm_indices: Vec<usize>,
    disks: Vec<Disk>,
}

impl DiskObstacles {
    pub fn new(arm: PlanarArm, arm_indices: Vec<usize>, disks: Vec<Disk>) -> Self {
        DiskObstacles {
            arm,
            arm_indices,
            disks,
        }
    }
}

fn segment_distance(a: &Point3<f64>, b: &Point3<f64>, p: &Point3<f64>) -> f64 {
    let ab = b - a;
    let length2 = ab.norm_squared();
    let t = if length2 > 0.0 {
        ((p - a).dot(&ab) / length2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (a + ab * t - p).xy().norm()
}

impl CollisionChecker for DiskObstacles {
    fn collides(&self, robot: &Robot) -> bool {
        let qs = robot.joint_values(&self.arm_indices);
        let points: Vec<Point3<f64>> = self
            .arm
            .link_points(&qs)
            .iter()
            .map(|p| robot.transform().transform_point(p))
            .collect();
        points.windows(2).any(|link| {
            self.disks
                .iter()
                .any(|disk| segment_distance(&link[0], &link[1], &disk.center) < disk.radius)
        })
    }
}
