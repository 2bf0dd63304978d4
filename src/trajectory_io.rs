//! Flat text form of trajectories.
//!
//! The first line holds the DOF count and the waypoint count. Every following line is a
//! waypoint: the time, the configuration values and, optionally, the transform as
//! `tx ty tz qw qi qj qk`.
//! ```text
//! 2 2
//! 0 0.0 0.0
//! 1.5 0.5 -0.25 0 0 0 1 0 0 0
//! ```

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::{Quaternion, Translation3, UnitQuaternion};

use crate::kinematic_traits::Pose;
use crate::trajectory::{Trajectory, Waypoint};
use crate::utils::is_valid;

pub fn serialize_trajectory(trajectory: &Trajectory) -> String {
    let mut text = format!("{} {}\n", trajectory.dof(), trajectory.len());
    for point in trajectory.points() {
        let mut fields: Vec<String> = Vec::with_capacity(1 + point.q.len() + 7);
        fields.push(point.time.to_string());
        fields.extend(point.q.iter().map(|q| q.to_string()));
        if let Some(transform) = &point.transform {
            let t = transform.translation.vector;
            let r = transform.rotation;
            fields.extend([t.x, t.y, t.z, r.w, r.i, r.j, r.k].iter().map(|v| v.to_string()));
        }
        let _ = writeln!(text, "{}", fields.join(" "));
    }
    text
}

pub fn parse_trajectory(text: &str) -> Result<Trajectory> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines.next().context("trajectory header is missing")?;
    let header: Vec<usize> = header
        .split_whitespace()
        .map(|v| v.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("bad trajectory header '{}'", header))?;
    let [dof, count] = header[..] else {
        bail!("trajectory header needs the DOF and waypoint counts");
    };

    let mut trajectory = Trajectory::new(dof);
    for (index, line) in lines.enumerate() {
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("bad number in waypoint {}", index))?;
        if !is_valid(&values) {
            bail!("waypoint {} has non finite values", index);
        }
        let transform = if values.len() == 1 + dof {
            None
        } else if values.len() == 1 + dof + 7 {
            let p = &values[1 + dof..];
            Some(Pose::from_parts(
                Translation3::new(p[0], p[1], p[2]),
                UnitQuaternion::from_quaternion(Quaternion::new(p[3], p[4], p[5], p[6])),
            ))
        } else {
            bail!(
                "waypoint {} has {} values, expected {} or {}",
                index,
                values.len(),
                1 + dof,
                1 + dof + 7
            );
        };
        trajectory
            .push(Waypoint {
                q: values[1..1 + dof].to_vec(),
                transform,
                time: values[0],
            })
            .with_context(|| format!("waypoint {}", index))?;
    }
    if trajectory.len() != count {
        bail!("header announces {} waypoints but {} were read", count, trajectory.len());
    }
    Ok(trajectory)
}

pub fn read_trajectory(path: &Path) -> Result<Trajectory> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read trajectory {}", path.display()))?;
    parse_trajectory(&text).with_context(|| format!("Failed to parse trajectory {}", path.display()))
}

pub fn write_trajectory(path: &Path, trajectory: &Trajectory) -> Result<()> {
    fs::write(path, serialize_trajectory(trajectory))
        .with_context(|| format!("Failed to write trajectory {}", path.display()))
}
