//! Tunable defaults of the manipulation commands, optionally read from YAML.

use std::f64::consts::PI;

use crate::error::PlanningError;
use crate::jitter::JitterParameters;
use crate::planner::DEFAULT_PLANNER;

#[derive(Debug, Clone, PartialEq)]
pub struct ManipulationConfig {
    /// Planner name, looked up case-insensitively. Unknown names fall back to "BiRRT".
    pub planner: String,

    /// Scales all velocity and acceleration limits when timing trajectories.
    pub max_vel_mult: f64,

    /// Iteration budget of a single planning attempt.
    pub max_iterations: usize,

    /// Step in the configuration space between collision checks of the planner.
    pub step_length: f64,

    /// Planning attempts for manipulator and hand moves.
    pub max_tries: usize,

    /// Planning attempts for active joint moves.
    pub max_tries_active_joints: usize,

    /// Jitter budget for goals and starts of hand moves.
    pub jitter_iterations: usize,

    /// Jitter budget for the start of a straight hand move.
    pub straight_jitter_iterations: usize,

    pub jitter_radius: f64,
    pub jitter_perturbation: f64,

    pub workspace_step_length: f64,
    pub ignore_first_collision: f64,
    pub max_deviation_angle: f64,
    pub greedy_search: bool,

    /// Seed of the per-command random generators.
    pub seed: u64,
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        ManipulationConfig {
            planner: DEFAULT_PLANNER.to_string(),
            max_vel_mult: 1.0,
            max_iterations: 4000,
            step_length: 0.04,
            max_tries: 3,
            max_tries_active_joints: 1,
            jitter_iterations: 5000,
            straight_jitter_iterations: 100,
            jitter_radius: 0.03,
            jitter_perturbation: 1e-5,
            workspace_step_length: 0.01,
            ignore_first_collision: 0.04,
            max_deviation_angle: 0.15 * PI,
            greedy_search: true,
            seed: 0,
        }
    }
}

impl ManipulationConfig {
    pub fn jitter_parameters(&self) -> JitterParameters {
        JitterParameters {
            max_iterations: self.jitter_iterations,
            radius: self.jitter_radius,
            perturbation: self.jitter_perturbation,
        }
    }

    /// Checks the values a YAML file or a caller could get wrong.
    pub fn validate(&self) -> Result<(), PlanningError> {
        let positive = [
            ("max_vel_mult", self.max_vel_mult),
            ("step_length", self.step_length),
            ("workspace_step_length", self.workspace_step_length),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PlanningError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        let non_negative = [
            ("jitter_radius", self.jitter_radius),
            ("jitter_perturbation", self.jitter_perturbation),
            ("ignore_first_collision", self.ignore_first_collision),
            ("max_deviation_angle", self.max_deviation_angle),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PlanningError::Config(format!("{} must not be negative, got {}", name, value)));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "allow_filesystem")]
mod yaml {
    use std::path::Path;

    use anyhow::Context;
    use yaml_rust2::{Yaml, YamlLoader};

    use super::ManipulationConfig;
    use crate::error::PlanningError;

    fn float(doc: &Yaml, key: &str, target: &mut f64) -> Result<(), PlanningError> {
        match &doc[key] {
            Yaml::BadValue => Ok(()),
            Yaml::Real(_) | Yaml::Integer(_) => {
                *target = doc[key]
                    .as_f64()
                    .or_else(|| doc[key].as_i64().map(|v| v as f64))
                    .ok_or_else(|| PlanningError::Config(format!("{} is not a number", key)))?;
                Ok(())
            }
            other => Err(PlanningError::Config(format!("{} must be a number, got {:?}", key, other))),
        }
    }

    fn count<T: TryFrom<i64>>(doc: &Yaml, key: &str, target: &mut T) -> Result<(), PlanningError> {
        match &doc[key] {
            Yaml::BadValue => Ok(()),
            Yaml::Integer(value) => {
                *target = T::try_from(*value)
                    .map_err(|_| PlanningError::Config(format!("{} is out of range: {}", key, value)))?;
                Ok(())
            }
            other => Err(PlanningError::Config(format!("{} must be an integer, got {:?}", key, other))),
        }
    }

    impl ManipulationConfig {
        /// Reads the configuration from YAML text. Keys that are not present keep their defaults:
        /// ```yaml
        /// planner: BiRRT
        /// max_vel_mult: 0.5
        /// max_tries: 5
        /// jitter_radius: 0.02
        /// greedy_search: false
        /// seed: 7
        /// ```
        pub fn from_yaml_str(text: &str) -> Result<Self, PlanningError> {
            let docs = YamlLoader::load_from_str(text).map_err(|e| PlanningError::Config(e.to_string()))?;
            let mut config = ManipulationConfig::default();
            let Some(doc) = docs.first() else {
                return Ok(config);
            };
            if !matches!(doc, Yaml::Hash(_) | Yaml::Null) {
                return Err(PlanningError::Config("configuration must be a mapping".into()));
            }

            match &doc["planner"] {
                Yaml::BadValue => {}
                Yaml::String(name) => config.planner = name.clone(),
                other => return Err(PlanningError::Config(format!("planner must be a name, got {:?}", other))),
            }
            match &doc["greedy_search"] {
                Yaml::BadValue => {}
                Yaml::Boolean(value) => config.greedy_search = *value,
                other => {
                    return Err(PlanningError::Config(format!("greedy_search must be a boolean, got {:?}", other)));
                }
            }

            float(doc, "max_vel_mult", &mut config.max_vel_mult)?;
            float(doc, "step_length", &mut config.step_length)?;
            float(doc, "jitter_radius", &mut config.jitter_radius)?;
            float(doc, "jitter_perturbation", &mut config.jitter_perturbation)?;
            float(doc, "workspace_step_length", &mut config.workspace_step_length)?;
            float(doc, "ignore_first_collision", &mut config.ignore_first_collision)?;
            float(doc, "max_deviation_angle", &mut config.max_deviation_angle)?;

            count(doc, "max_iterations", &mut config.max_iterations)?;
            count(doc, "max_tries", &mut config.max_tries)?;
            count(doc, "max_tries_active_joints", &mut config.max_tries_active_joints)?;
            count(doc, "jitter_iterations", &mut config.jitter_iterations)?;
            count(doc, "straight_jitter_iterations", &mut config.straight_jitter_iterations)?;
            count(doc, "seed", &mut config.seed)?;

            config.validate()?;
            Ok(config)
        }

        pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, PlanningError> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?;
            Self::from_yaml_str(&text)
        }
    }
}
