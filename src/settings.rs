//! Noise sigmas of the dynamics factors and optimizer parameters, optionally loaded
//! from YAML.

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::optimizer::{OptimizerParams, OptimizerType};

/// Standard deviations of the factors emitted by the graph assembler. Small sigmas make
/// the factors behave like hard constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsSettings {
    /// Priors pinning fixed links
    pub pose_prior_sigma: f64,
    pub twist_prior_sigma: f64,
    pub accel_prior_sigma: f64,

    pub pose_sigma: f64,
    pub twist_sigma: f64,
    pub accel_sigma: f64,

    /// Newton-Euler balance of a link
    pub wrench_sigma: f64,
    pub wrench_equivalence_sigma: f64,
    pub torque_sigma: f64,
    pub planar_sigma: f64,

    /// Priors on joint quantities (forward dynamics inputs)
    pub angle_prior_sigma: f64,
    pub velocity_prior_sigma: f64,
    pub joint_accel_prior_sigma: f64,
    pub torque_prior_sigma: f64,

    pub angle_collocation_sigma: f64,
    pub velocity_collocation_sigma: f64,

    /// Prior on phase durations
    pub time_sigma: f64,
    pub joint_limit_sigma: f64,

    pub optimizer: OptimizerParams,
}

impl Default for DynamicsSettings {
    fn default() -> Self {
        let sigma = 0.001;
        DynamicsSettings {
            pose_prior_sigma: sigma,
            twist_prior_sigma: sigma,
            accel_prior_sigma: sigma,
            pose_sigma: sigma,
            twist_sigma: sigma,
            accel_sigma: sigma,
            wrench_sigma: sigma,
            wrench_equivalence_sigma: sigma,
            torque_sigma: sigma,
            planar_sigma: sigma,
            angle_prior_sigma: sigma,
            velocity_prior_sigma: sigma,
            joint_accel_prior_sigma: sigma,
            torque_prior_sigma: sigma,
            angle_collocation_sigma: sigma,
            velocity_collocation_sigma: sigma,
            time_sigma: sigma,
            joint_limit_sigma: sigma,
            optimizer: OptimizerParams::default(),
        }
    }
}

impl DynamicsSettings {
    fn sigmas_mut(&mut self) -> [(&'static str, &mut f64); 18] {
        [
            ("pose_prior", &mut self.pose_prior_sigma),
            ("twist_prior", &mut self.twist_prior_sigma),
            ("accel_prior", &mut self.accel_prior_sigma),
            ("pose", &mut self.pose_sigma),
            ("twist", &mut self.twist_sigma),
            ("accel", &mut self.accel_sigma),
            ("wrench", &mut self.wrench_sigma),
            ("wrench_equivalence", &mut self.wrench_equivalence_sigma),
            ("torque", &mut self.torque_sigma),
            ("planar", &mut self.planar_sigma),
            ("angle_prior", &mut self.angle_prior_sigma),
            ("velocity_prior", &mut self.velocity_prior_sigma),
            ("joint_accel_prior", &mut self.joint_accel_prior_sigma),
            ("torque_prior", &mut self.torque_prior_sigma),
            ("angle_collocation", &mut self.angle_collocation_sigma),
            ("velocity_collocation", &mut self.velocity_collocation_sigma),
            ("time", &mut self.time_sigma),
            ("joint_limit", &mut self.joint_limit_sigma),
        ]
    }

    /// Checks that all sigmas are positive and finite
    pub fn validate(&self) -> DynamicsResult<()> {
        let mut copy = self.clone();
        for (name, sigma) in copy.sigmas_mut() {
            if !sigma.is_finite() || *sigma <= 0.0 {
                return Err(DynamicsError::Settings(format!(
                    "sigma '{}' must be positive and finite, got {}", name, sigma
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "allow_filesystem")]
mod yaml {
    use std::path::Path;

    use yaml_rust2::{Yaml, YamlLoader};

    use super::*;

    fn number(yaml: &Yaml, name: &str) -> DynamicsResult<Option<f64>> {
        match yaml {
            Yaml::BadValue | Yaml::Null => Ok(None),
            Yaml::Integer(i) => Ok(Some(*i as f64)),
            Yaml::Real(_) => yaml
                .as_f64()
                .map(Some)
                .ok_or_else(|| DynamicsError::Settings(format!("'{}' is not a number", name))),
            _ => Err(DynamicsError::Settings(format!("'{}' must be a number", name))),
        }
    }

    impl DynamicsSettings {
        /// Reads settings from YAML like this:
        /// ```yaml
        /// sigmas:
        ///   pose: 0.001
        ///   planar: 0.0001
        ///   time: 0.01
        /// optimizer:
        ///   type: levenberg_marquardt
        ///   max_iterations: 50
        ///   relative_tolerance: 1.0e-8
        /// ```
        /// Missing fields keep their defaults, unknown fields are ignored.
        pub fn from_yaml_str(contents: &str) -> DynamicsResult<Self> {
            let docs = YamlLoader::load_from_str(contents)
                .map_err(|e| DynamicsError::Settings(format!("Failed to parse YAML: {}", e)))?;
            let mut settings = DynamicsSettings::default();
            let Some(doc) = docs.first() else {
                return Ok(settings);
            };

            let sigmas = &doc["sigmas"];
            for (name, sigma) in settings.sigmas_mut() {
                if let Some(value) = number(&sigmas[name], name)? {
                    *sigma = value;
                }
            }

            let optimizer = &doc["optimizer"];
            if let Some(kind) = optimizer["type"].as_str() {
                settings.optimizer.optimizer = match kind {
                    "gauss_newton" => OptimizerType::GaussNewton,
                    "levenberg_marquardt" => OptimizerType::LevenbergMarquardt,
                    other => {
                        return Err(DynamicsError::Settings(format!("unknown optimizer '{}'", other)));
                    }
                };
            }
            if let Some(iterations) = optimizer["max_iterations"].as_i64() {
                if iterations < 0 {
                    return Err(DynamicsError::Settings("max_iterations must not be negative".into()));
                }
                settings.optimizer.max_iterations = iterations as usize;
            }
            let params = &mut settings.optimizer;
            for (name, field) in [
                ("relative_tolerance", &mut params.relative_tolerance),
                ("absolute_tolerance", &mut params.absolute_tolerance),
                ("initial_lambda", &mut params.initial_lambda),
                ("lambda_factor", &mut params.lambda_factor),
                ("max_lambda", &mut params.max_lambda),
                ("rank_tolerance", &mut params.rank_tolerance),
            ] {
                if let Some(value) = number(&optimizer[name], name)? {
                    *field = value;
                }
            }

            settings.validate()?;
            Ok(settings)
        }

        pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> DynamicsResult<Self> {
            let contents = std::fs::read_to_string(path)?;
            Self::from_yaml_str(&contents)
        }
    }
}
