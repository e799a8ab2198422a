//! Factors: vector-valued residual functions of a few variables, weighted by a noise
//! model. A factor graph is the sum of squared whitened residuals of its factors.
//!
//! Factors are immutable value structs. They keep only the keys they read and the
//! numeric parameters needed to evaluate the residual, never references to the robot.
//! Jacobians default to central differences on the tangent spaces of the variables;
//! linear factors override them with exact ones.

use std::fmt;

use nalgebra::{DMatrix, DVector, Isometry3};

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::jacobian::{numerical_jacobians, NUMERICAL_EPSILON};
use crate::keys::Key;
use crate::values::{pose_local, Value, Values};

/// Diagonal Gaussian noise, given by per-row standard deviations
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    sigmas: DVector<f64>,
}

impl NoiseModel {
    pub fn isotropic(dim: usize, sigma: f64) -> Self {
        NoiseModel { sigmas: DVector::from_element(dim, sigma) }
    }

    pub fn diagonal(sigmas: &[f64]) -> Self {
        NoiseModel { sigmas: DVector::from_column_slice(sigmas) }
    }

    pub fn unit(dim: usize) -> Self {
        Self::isotropic(dim, 1.0)
    }

    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    pub fn whiten(&self, error: &DVector<f64>) -> DVector<f64> {
        error.component_div(&self.sigmas)
    }

    pub fn whiten_jacobian(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        let mut whitened = jacobian.clone();
        for (mut row, sigma) in whitened.row_iter_mut().zip(self.sigmas.iter()) {
            row /= *sigma;
        }
        whitened
    }
}

pub trait Factor: fmt::Debug + Send + Sync {
    /// Short name of the factor type, used in logs and signatures
    fn name(&self) -> &'static str;

    /// Keys of the variables the residual depends on, in the order of `jacobians`
    fn keys(&self) -> &[Key];

    fn noise(&self) -> &NoiseModel;

    fn dim(&self) -> usize {
        self.noise().dim()
    }

    /// Unwhitened residual, zero when the factor is satisfied
    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>>;

    /// Jacobians of the unwhitened residual, one block per key
    fn jacobians(&self, values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        numerical_jacobians(self, values, NUMERICAL_EPSILON)
    }

    fn whitened_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        Ok(self.noise().whiten(&self.evaluate_error(values)?))
    }

    /// Half of the squared whitened residual
    fn error(&self, values: &Values) -> DynamicsResult<f64> {
        Ok(0.5 * self.whitened_error(values)?.norm_squared())
    }
}

/// Unary factor pulling a variable towards a known value
#[derive(Debug, Clone)]
pub struct PriorFactor {
    keys: [Key; 1],
    prior: Value,
    noise: NoiseModel,
}

impl PriorFactor {
    pub fn new(key: Key, prior: Value, sigma: f64) -> Self {
        let noise = NoiseModel::isotropic(prior.dim(), sigma);
        PriorFactor { keys: [key], prior, noise }
    }

    pub fn scalar(key: Key, prior: f64, sigma: f64) -> Self {
        Self::new(key, Value::Scalar(prior), sigma)
    }

    pub fn prior(&self) -> &Value {
        &self.prior
    }
}

impl Factor for PriorFactor {
    fn name(&self) -> &'static str {
        "prior"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let key = self.keys[0];
        let value = values.at(key)?;
        self.prior.local(value).ok_or(DynamicsError::ValueKindMismatch {
            key,
            expected: self.prior.kind(),
            found: value.kind(),
        })
    }

    fn jacobians(&self, values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        match self.prior {
            Value::Scalar(_) | Value::Vector(_) => {
                Ok(vec![DMatrix::identity(self.prior.dim(), self.prior.dim())])
            }
            Value::Pose(_) => numerical_jacobians(self, values, NUMERICAL_EPSILON),
        }
    }
}

/// Relative pose constraint: `x1^-1 * x2 == measured`
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    keys: [Key; 2],
    measured: Isometry3<f64>,
    noise: NoiseModel,
}

impl BetweenFactor {
    pub fn new(key1: Key, key2: Key, measured: Isometry3<f64>, noise: NoiseModel) -> Self {
        BetweenFactor { keys: [key1, key2], measured, noise }
    }
}

impl Factor for BetweenFactor {
    fn name(&self) -> &'static str {
        "between"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let x1 = values.pose(self.keys[0])?;
        let x2 = values.pose(self.keys[1])?;
        Ok(pose_local(&self.measured, &(x1.inverse() * x2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_noise_whitening() {
        let noise = NoiseModel::diagonal(&[0.5, 2.0]);
        let whitened = noise.whiten(&DVector::from_column_slice(&[1.0, 1.0]));
        assert_eq!(whitened.as_slice(), &[2.0, 0.5]);
        let jacobian = noise.whiten_jacobian(&DMatrix::from_element(2, 3, 1.0));
        assert_eq!(jacobian[(0, 2)], 2.0);
        assert_eq!(jacobian[(1, 0)], 0.5);
    }

    #[test]
    fn test_scalar_prior() {
        let mut values = Values::new();
        values.insert_scalar(Key::new(1), 3.0);
        let prior = PriorFactor::scalar(Key::new(1), 1.0, 0.1);
        let error = prior.evaluate_error(&values).unwrap();
        assert!((error[0] - 2.0).abs() < 1e-12);
        assert!((prior.error(&values).unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_between_numerical_jacobian() {
        let mut values = Values::new();
        values.insert_pose(Key::new(1), Isometry3::new(Vector3::new(0.0, 0.0, -1.0), Vector3::new(0.1, 0.0, 0.0)));
        values.insert_pose(Key::new(2), Isometry3::new(Vector3::new(0.0, 0.5, 1.0), Vector3::zeros()));
        let between = BetweenFactor::new(Key::new(1), Key::new(2), Isometry3::translation(0.0, 0.0, 1.0), NoiseModel::unit(6));
        let jacobians = between.jacobians(&values).unwrap();
        assert_eq!(jacobians.len(), 2);

        // Moving x2 along its own frame moves the error by the same local amount
        // up to the rotation between the frames, so the second block is near identity
        // when x1 and x2 are nearly aligned.
        let h2 = &jacobians[1];
        assert!((h2[(5, 5)] - 1.0).abs() < 0.1);
        assert!(h2[(0, 0)] > 0.9);
    }
}
