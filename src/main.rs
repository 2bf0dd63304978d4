use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::{Point3, Vector3};
use tracing_subscriber::EnvFilter;

use rs_manipulation::config::ManipulationConfig;
use rs_manipulation::environment::Environment;
use rs_manipulation::ik::{GoalSpec, IkGoalMode};
use rs_manipulation::manipulation::{BaseManipulation, MoveToHandPositionRequest};
use rs_manipulation::output::OutputOptions;
use rs_manipulation::planar_arm::{Disk, DiskObstacles, PlanarArm, PlanarArmIk};
use rs_manipulation::robot::{Manipulator, Robot};
use rs_manipulation::utils::format_configuration;

/// Moves a planar three link arm around a disk obstacle, then straight along y.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Target x of the end effector
    #[arg(long, default_value_t = 0.2)]
    x: f64,

    /// Target y of the end effector
    #[arg(long, default_value_t = 1.6)]
    y: f64,

    /// Number of sampled IK solutions per goal, 0 for a single one
    #[arg(long, default_value_t = 0)]
    samples: usize,

    /// Length of the straight move after reaching the target, meters
    #[arg(long, default_value_t = 0.2)]
    straight: f64,

    /// YAML file with planner configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final straight move trajectory here
    #[arg(long)]
    output: Option<PathBuf>,
}

fn scene() -> Result<Environment> {
    let arm = PlanarArm::new(vec![1.0, 1.0, 0.5]);
    let mut robot = Robot::new("planar", vec![-PI; 3], vec![PI; 3])?;
    robot.add_manipulator(Manipulator {
        name: "arm".into(),
        arm_indices: vec![0, 1, 2],
        kinematics: Arc::new(arm.clone()),
        ik_solver: Some(Arc::new(PlanarArmIk::new(arm.clone()))),
    })?;
    let obstacles = DiskObstacles::new(
        arm,
        vec![0, 1, 2],
        vec![Disk {
            center: Point3::new(1.3, 1.3, 0.0),
            radius: 0.25,
        }],
    );
    Ok(Environment::new(robot, obstacles))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ManipulationConfig::from_yaml_file(path)?,
        None => ManipulationConfig::default(),
    };
    let environment = Arc::new(Mutex::new(scene()?));
    let manipulation = BaseManipulation::new(environment.clone(), config)?;

    let mode = match args.samples {
        0 => IkGoalMode::Single,
        n => IkGoalMode::Sampled(n),
    };
    let request = MoveToHandPositionRequest {
        goals: vec![GoalSpec::Translation3D(Vector3::new(args.x, args.y, 0.0))],
        mode,
        ..MoveToHandPositionRequest::default()
    };
    let reached = manipulation
        .move_to_hand_position(&request)
        .context("Failed to move to the hand position")?;
    for solution in &reached.solutions {
        println!("IK solution {}", format_configuration(solution));
    }

    // Continue from where the previous motion ended.
    {
        let mut env = environment
            .lock()
            .map_err(|_| anyhow::anyhow!("environment lock poisoned"))?;
        let end = env
            .robot
            .motion()
            .and_then(|m| m.last_configuration().cloned())
            .context("No motion was executed")?;
        let duration = env.robot.motion().map_or(0.0, |m| m.total_duration());
        println!("Reached {} in {:.2} s", format_configuration(&end), duration);
        env.robot.set_active_dof_values(&end)?;
    }

    let step = manipulation.config().workspace_step_length;
    let straight = rs_manipulation::workspace::HandStraightRequest {
        max_steps: (args.straight / step).round() as usize,
        ..manipulation.hand_straight_request()
    };
    let output = OutputOptions {
        write_trajectory: args.output.clone(),
        output_trajectory: true,
        ..OutputOptions::default()
    };
    let moved = manipulation
        .move_hand_straight(&straight, &output)
        .context("Failed to move the hand straight")?;
    if let Some(text) = moved.trajectory {
        print!("{}", text);
    }
    Ok(())
}
