use std::cell::RefCell;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rrt::{dual_rrt_connect, smooth_path};
use tracing::{debug, info};

use crate::environment::is_valid;
use crate::kinematic_traits::{CollisionChecker, Configuration};
use crate::planner::{Planner, PlannerParameters};
use crate::robot::Robot;
use crate::trajectory::Trajectory;

#[derive(Debug, Default)]
/// Bidirectional RRT-Connect planner that relocates the active DOFs between the initial
/// configuration and the nearest reachable goal in a collision free way.
pub struct RrtConnectPlanner {
    params: Option<PlannerParameters>,
}

impl RrtConnectPlanner {
    /// Goal configurations ordered by distance from the start, closest first.
    fn ordered_goals(params: &PlannerParameters) -> Vec<&Configuration> {
        let mut goals: Vec<&Configuration> = params.goal_configs.iter().collect();
        goals.sort_by(|a, b| {
            let da = (params.distance_metric)(&params.initial_config, a);
            let db = (params.distance_metric)(&params.initial_config, b);
            da.total_cmp(&db)
        });
        goals
    }
}

impl Planner for RrtConnectPlanner {
    fn initialize(&mut self, robot: &Robot, params: &PlannerParameters) -> Result<(), String> {
        params.validate().map_err(|e| e.to_string())?;
        if params.initial_config.len() != robot.active_dof() {
            return Err(format!(
                "planner set up for {} DOFs but the robot has {} active",
                params.initial_config.len(),
                robot.active_dof()
            ));
        }
        if params
            .lower_limits
            .iter()
            .zip(&params.upper_limits)
            .any(|(lo, hi)| !(lo.is_finite() && hi.is_finite()) || lo > hi)
        {
            return Err("planner limits must be finite with lower <= upper".into());
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn plan(&mut self, robot: &mut Robot, checker: &dyn CollisionChecker) -> Result<Trajectory, String> {
        let params = self.params.as_ref().ok_or("planner is not initialized")?;
        let started = Instant::now();

        let robot = RefCell::new(robot);
        let mut is_free = |q: &[f64]| -> bool {
            if let Some(constraint) = &params.constraint {
                if !constraint.is_satisfied(&robot.borrow(), q) {
                    return false;
                }
            }
            is_valid(&mut robot.borrow_mut(), checker, q)
        };

        if !is_free(&params.initial_config) {
            return Err("initial configuration is in collision or out of limits".into());
        }

        // Constraint compliant random configuration generator.
        let rng = RefCell::new(ChaCha8Rng::seed_from_u64(params.seed));
        let random_sample = || -> Configuration {
            let mut rng = rng.borrow_mut();
            let mut sample: Configuration = params
                .lower_limits
                .iter()
                .zip(&params.upper_limits)
                .map(|(lo, hi)| if lo < hi { rng.gen_range(*lo..=*hi) } else { *lo })
                .collect();
            if let Some(constraint) = &params.constraint {
                let anchor = sample.clone();
                constraint.project(&robot.borrow(), &anchor, &mut sample);
            }
            sample
        };

        let goals = Self::ordered_goals(params);
        let budget = (params.max_iterations / goals.len()).max(1);
        let mut last_error = String::from("no goal is collision free");
        for goal in goals {
            if !is_free(goal) {
                debug!("skipping goal in collision");
                continue;
            }
            match dual_rrt_connect(
                &params.initial_config,
                goal,
                &mut is_free,
                &random_sample,
                params.step_length,
                budget,
            ) {
                Ok(mut path) => {
                    if params.smoothing_iterations > 0 {
                        smooth_path(&mut path, &mut is_free, params.step_length, params.smoothing_iterations);
                    }
                    info!("RRT found {} waypoints in {:?}", path.len(), started.elapsed());
                    let mut trajectory = Trajectory::new(params.initial_config.len());
                    for q in path {
                        trajectory.push_configuration(q).map_err(|e| e.to_string())?;
                    }
                    return Ok(trajectory);
                }
                Err(reason) => last_error = reason,
            }
        }
        Err(last_error)
    }
}
