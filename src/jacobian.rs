extern crate nalgebra as na;
use std::collections::BTreeMap;

use na::linalg::SVD;
use na::{DMatrix, DVector};
use rayon::prelude::*;

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::factors::Factor;
use crate::keys::Key;
use crate::values::Values;

/// Disturbance used for the central differences of factors without analytic Jacobians
pub const NUMERICAL_EPSILON: f64 = 1e-6;

/// Computes the Jacobians of the factor residual by central differences
///
/// # Arguments
///
/// * `factor` - The factor to differentiate
/// * `values` - The linearization point, must contain all keys of the factor
/// * `epsilon` - The tangent space disturbance
///
/// # Returns
///
/// One `dim x dim(key)` block per factor key, in the key order of the factor.
///
/// Every column of a block is the residual change when the variable is moved by
/// `epsilon` along one tangent direction. Keys are processed in parallel.
pub fn numerical_jacobians<F: Factor + ?Sized>(
    factor: &F,
    values: &Values,
    epsilon: f64,
) -> DynamicsResult<Vec<DMatrix<f64>>> {
    let local = values.subset(factor.keys())?;
    let rows = factor.dim();

    factor
        .keys()
        .par_iter()
        .map(|key| {
            let value = local.at(*key)?;
            let dim = value.dim();
            let mut perturbed = local.clone();
            let mut jacobian = DMatrix::zeros(rows, dim);
            let mut delta = vec![0.0; dim];
            for column in 0..dim {
                delta[column] = epsilon;
                perturbed.insert(*key, value.retract(&delta));
                let plus = factor.evaluate_error(&perturbed)?;
                delta[column] = -epsilon;
                perturbed.insert(*key, value.retract(&delta));
                let minus = factor.evaluate_error(&perturbed)?;
                delta[column] = 0.0;
                jacobian.set_column(column, &((plus - minus) / (2.0 * epsilon)));
            }
            Ok(jacobian)
        })
        .collect()
}

/// Linearization of one factor: residual and one Jacobian block per key
#[derive(Debug, Clone)]
pub struct LinearizedFactor {
    pub keys: Vec<Key>,
    pub jacobians: Vec<DMatrix<f64>>,
    pub residual: DVector<f64>,
}

impl LinearizedFactor {
    /// Linearizes the factor at `values`. With `whiten`, rows are divided by the sigmas
    /// of the noise model, otherwise the raw residual is kept.
    pub fn new(factor: &dyn Factor, values: &Values, whiten: bool) -> DynamicsResult<Self> {
        let residual = factor.evaluate_error(values)?;
        let jacobians = factor.jacobians(values)?;
        let noise = factor.noise();
        if whiten {
            Ok(LinearizedFactor {
                keys: factor.keys().to_vec(),
                jacobians: jacobians.iter().map(|h| noise.whiten_jacobian(h)).collect(),
                residual: noise.whiten(&residual),
            })
        } else {
            Ok(LinearizedFactor { keys: factor.keys().to_vec(), jacobians, residual })
        }
    }
}

/// Stacked Jacobian of a set of factors over an ordering of variables
#[derive(Debug, Clone)]
pub struct Jacobian {
    /// Rows are the stacked residual rows, columns the tangent coordinates of the ordered
    /// variables. Variables outside the ordering are held fixed and have no columns.
    matrix: DMatrix<f64>,

    /// Stacked residual at the linearization point
    residual: DVector<f64>,

    ordering: Vec<Key>,

    /// Singular values below this are treated as zero
    epsilon: f64,
}

impl Jacobian {
    /// Stacks the linearized factors over `ordering`
    ///
    /// # Arguments
    ///
    /// * `factors` - The linearized factors
    /// * `ordering` - Variables that receive columns, in column order
    /// * `values` - Used to look up the tangent dimension of every ordered key
    /// * `epsilon` - Threshold for singular values
    pub fn stack(
        factors: &[LinearizedFactor],
        ordering: &[Key],
        values: &Values,
        epsilon: f64,
    ) -> DynamicsResult<Self> {
        let mut offsets = BTreeMap::new();
        let mut columns = 0;
        for key in ordering {
            offsets.insert(*key, columns);
            columns += values.dim(*key)?;
        }
        let rows: usize = factors.iter().map(|f| f.residual.len()).sum();

        let mut matrix = DMatrix::zeros(rows, columns);
        let mut residual = DVector::zeros(rows);
        let mut row = 0;
        for factor in factors {
            let height = factor.residual.len();
            residual.rows_mut(row, height).copy_from(&factor.residual);
            for (key, block) in factor.keys.iter().zip(factor.jacobians.iter()) {
                if let Some(column) = offsets.get(key) {
                    matrix
                        .view_mut((row, *column), (height, block.ncols()))
                        .copy_from(block);
                }
            }
            row += height;
        }

        Ok(Jacobian { matrix, residual, ordering: ordering.to_vec(), epsilon })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn ordering(&self) -> &[Key] {
        &self.ordering
    }

    /// Number of singular values above epsilon
    pub fn rank(&self) -> usize {
        if self.matrix.is_empty() {
            return 0;
        }
        SVD::new(self.matrix.clone(), false, false).rank(self.epsilon)
    }

    /// Computes the minimal norm tangent step that zeroes the linearized residual,
    /// `delta = -J^+ r`
    ///
    /// Singular values below epsilon are dropped, also for square matrices: redundant
    /// constraints give a rank deficient Jacobian that rounding may leave invertible.
    pub fn correction(&self) -> DynamicsResult<DVector<f64>> {
        if self.matrix.is_empty() {
            return Ok(DVector::zeros(self.matrix.ncols()));
        }
        let svd = SVD::new(self.matrix.clone(), true, true);
        let rank = svd.rank(self.epsilon);
        svd.solve(&self.residual, self.epsilon)
            .map(|step| -step)
            .map_err(|_| DynamicsError::InfeasibleConstraintSet {
                rank,
                dimension: self.matrix.ncols(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{NoiseModel, PriorFactor};
    use crate::values::Value;

    const EPSILON: f64 = 1e-9;

    /// Residual `x * y - 6`, so the Jacobian at (2, 3) is [3, 2].
    #[derive(Debug)]
    struct ProductFactor {
        keys: [Key; 2],
        noise: NoiseModel,
    }

    impl Factor for ProductFactor {
        fn name(&self) -> &'static str {
            "product"
        }

        fn keys(&self) -> &[Key] {
            &self.keys
        }

        fn noise(&self) -> &NoiseModel {
            &self.noise
        }

        fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
            let x = values.scalar(self.keys[0])?;
            let y = values.scalar(self.keys[1])?;
            Ok(DVector::from_element(1, x * y - 6.0))
        }
    }

    fn product_values() -> Values {
        let mut values = Values::new();
        values.insert_scalar(Key::new(1), 2.0);
        values.insert_scalar(Key::new(2), 3.0);
        values
    }

    #[test]
    fn test_numerical_jacobian_of_product() {
        let factor = ProductFactor { keys: [Key::new(1), Key::new(2)], noise: NoiseModel::unit(1) };
        let jacobians = factor.jacobians(&product_values()).unwrap();
        assert!((jacobians[0][(0, 0)] - 3.0).abs() < 1e-6);
        assert!((jacobians[1][(0, 0)] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_stack_skips_keys_outside_ordering() {
        let values = product_values();
        let product = ProductFactor { keys: [Key::new(1), Key::new(2)], noise: NoiseModel::unit(1) };
        let prior = PriorFactor::new(Key::new(2), Value::Scalar(4.0), 0.5);
        let linearized = vec![
            LinearizedFactor::new(&product, &values, true).unwrap(),
            LinearizedFactor::new(&prior, &values, true).unwrap(),
        ];

        let jacobian = Jacobian::stack(&linearized, &[Key::new(2)], &values, EPSILON).unwrap();
        assert_eq!(jacobian.matrix().shape(), (2, 1));
        assert!((jacobian.matrix()[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((jacobian.matrix()[(1, 0)] - 2.0).abs() < EPSILON);
        assert!((jacobian.residual()[1] + 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_minimal_norm_correction() {
        // One equation in two unknowns, linearized at (2, 3.5): J = [3.5, 2], r = 1
        let mut values = product_values();
        values.insert_scalar(Key::new(2), 3.5);
        let factor = ProductFactor { keys: [Key::new(1), Key::new(2)], noise: NoiseModel::unit(1) };
        let linearized = vec![LinearizedFactor::new(&factor, &values, false).unwrap()];
        let jacobian = Jacobian::stack(&linearized, &[Key::new(1), Key::new(2)], &values, EPSILON).unwrap();
        assert_eq!(jacobian.rank(), 1);

        let delta = jacobian.correction().unwrap();
        // Step is parallel to J and removes the linear residual
        let j = jacobian.matrix();
        let predicted = (j * &delta)[0] + jacobian.residual()[0];
        assert!(predicted.abs() < 1e-6);
        assert!((delta[0] * j[(0, 1)] - delta[1] * j[(0, 0)]).abs() < 1e-6);
    }

    #[test]
    fn test_nearly_singular_square_correction() {
        // Second row is the first scaled, up to rounding noise that keeps it invertible
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.37, 0.74 + 1e-12]);
        assert!(matrix.clone().try_inverse().is_some());
        let jacobian = Jacobian {
            matrix,
            residual: DVector::from_vec(vec![0.5, 0.185]),
            ordering: vec![Key::new(1), Key::new(2)],
            epsilon: 1e-6,
        };
        assert_eq!(jacobian.rank(), 1);

        let delta = jacobian.correction().unwrap();
        // Minimal norm solution of [1, 2] delta = -0.5
        assert!((delta[0] + 0.1).abs() < 1e-9);
        assert!((delta[1] + 0.2).abs() < 1e-9);
    }
}
