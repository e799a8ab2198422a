//! Dense nonlinear least squares over a factor graph.
//!
//! Gauss-Newton refuses rank deficient systems: a dynamics graph whose Jacobian loses
//! rank has no unique solution, which is reported as
//! [`DynamicsError::InfeasibleConstraintSet`] rather than resolved arbitrarily.
//! Levenberg-Marquardt damps the normal equations and therefore also moves on
//! underdetermined systems, which is what constraint penalties need.

extern crate nalgebra as na;
use na::linalg::{Cholesky, SVD};
use na::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::factor_graph::FactorGraph;
use crate::jacobian::Jacobian;
use crate::keys::Key;
use crate::values::Values;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerType {
    #[default]
    GaussNewton,
    LevenbergMarquardt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerParams {
    pub optimizer: OptimizerType,
    pub max_iterations: usize,

    /// Stop when the error decreases by less than this fraction
    pub relative_tolerance: f64,

    /// Stop when the error, or its decrease, is below this
    pub absolute_tolerance: f64,

    pub initial_lambda: f64,
    pub lambda_factor: f64,
    pub max_lambda: f64,

    /// Singular values below this fraction of the largest one count as zero
    pub rank_tolerance: f64,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        OptimizerParams {
            optimizer: OptimizerType::GaussNewton,
            max_iterations: 100,
            relative_tolerance: 1e-8,
            absolute_tolerance: 1e-12,
            initial_lambda: 1e-5,
            lambda_factor: 10.0,
            max_lambda: 1e10,
            rank_tolerance: 1e-6,
        }
    }
}

impl OptimizerParams {
    pub fn levenberg_marquardt() -> Self {
        OptimizerParams { optimizer: OptimizerType::LevenbergMarquardt, ..Self::default() }
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub values: Values,
    pub iterations: usize,
    pub initial_error: f64,
    pub final_error: f64,
    pub converged: bool,
}

/// Minimizes the graph error starting from `initial`. Every key of the graph must have
/// a value; values of other keys are returned unchanged.
pub fn optimize(graph: &FactorGraph, initial: &Values, params: &OptimizerParams) -> DynamicsResult<SolveReport> {
    let ordering: Vec<Key> = graph.keys().into_iter().collect();
    let dimension = initial.total_dim(&ordering)?;
    info!(
        "Optimizing {} factors over {} variables ({} dimensions) with {:?}",
        graph.len(),
        ordering.len(),
        dimension,
        params.optimizer
    );

    let initial_error = graph.error(initial)?;
    if graph.is_empty() {
        return Ok(SolveReport {
            values: initial.clone(),
            iterations: 0,
            initial_error,
            final_error: initial_error,
            converged: true,
        });
    }

    match params.optimizer {
        OptimizerType::GaussNewton => gauss_newton(graph, initial, &ordering, initial_error, params),
        OptimizerType::LevenbergMarquardt => levenberg_marquardt(graph, initial, &ordering, initial_error, params),
    }
}

fn check_convergence(params: &OptimizerParams, current_error: f64, new_error: f64) -> bool {
    if new_error <= params.absolute_tolerance {
        return true;
    }
    let decrease = current_error - new_error;
    let relative = if current_error > 0.0 { decrease / current_error } else { 0.0 };
    decrease.abs() <= params.absolute_tolerance || relative.abs() <= params.relative_tolerance
}

fn linearize(graph: &FactorGraph, values: &Values, ordering: &[Key], epsilon: f64) -> DynamicsResult<Jacobian> {
    let linearized = graph.linearize(values, true)?;
    Jacobian::stack(&linearized, ordering, values, epsilon)
}

fn gauss_newton(
    graph: &FactorGraph,
    initial: &Values,
    ordering: &[Key],
    initial_error: f64,
    params: &OptimizerParams,
) -> DynamicsResult<SolveReport> {
    let mut values = initial.clone();
    let mut current_error = initial_error;
    let mut iterations = 0;
    let mut converged = current_error <= params.absolute_tolerance;

    while !converged && iterations < params.max_iterations {
        let jacobian = linearize(graph, &values, ordering, params.rank_tolerance)?;
        let matrix = jacobian.matrix();
        let svd = SVD::new(matrix.clone(), true, true);
        let threshold = svd.singular_values.max() * params.rank_tolerance;
        let rank = svd.rank(threshold);
        if rank < matrix.ncols() {
            warn!("Indeterminate linear system: rank {} of {} columns", rank, matrix.ncols());
            return Err(DynamicsError::InfeasibleConstraintSet { rank, dimension: matrix.ncols() });
        }
        let rhs = -jacobian.residual();
        let delta = svd
            .solve(&rhs, threshold)
            .map_err(|_| DynamicsError::InfeasibleConstraintSet { rank, dimension: matrix.ncols() })?;

        let next = values.retract(ordering, &delta)?;
        let next_error = graph.error(&next)?;
        iterations += 1;
        debug!("Gauss-Newton iteration {}: error {:e} -> {:e}", iterations, current_error, next_error);

        converged = check_convergence(params, current_error, next_error);
        values = next;
        current_error = next_error;
    }

    if !converged {
        warn!("Gauss-Newton did not converge in {} iterations, error {:e}", iterations, current_error);
    }
    Ok(SolveReport { values, iterations, initial_error, final_error: current_error, converged })
}

fn levenberg_marquardt(
    graph: &FactorGraph,
    initial: &Values,
    ordering: &[Key],
    initial_error: f64,
    params: &OptimizerParams,
) -> DynamicsResult<SolveReport> {
    let mut values = initial.clone();
    let mut current_error = initial_error;
    let mut lambda = params.initial_lambda;
    let mut iterations = 0;
    let mut converged = current_error <= params.absolute_tolerance;

    'outer: while !converged && iterations < params.max_iterations {
        let jacobian = linearize(graph, &values, ordering, params.rank_tolerance)?;
        let matrix = jacobian.matrix();
        let hessian = matrix.transpose() * matrix;
        let gradient: DVector<f64> = matrix.transpose() * jacobian.residual();
        let n = hessian.nrows();
        iterations += 1;

        loop {
            let damped = &hessian + DMatrix::<f64>::identity(n, n) * lambda;
            let step = Cholesky::new(damped).map(|cholesky| cholesky.solve(&(-&gradient)));
            if let Some(delta) = step {
                let next = values.retract(ordering, &delta)?;
                let next_error = graph.error(&next)?;
                if next_error < current_error {
                    debug!(
                        "Levenberg-Marquardt iteration {}: error {:e} -> {:e}, lambda {:e}",
                        iterations, current_error, next_error, lambda
                    );
                    converged = check_convergence(params, current_error, next_error);
                    values = next;
                    current_error = next_error;
                    lambda = (lambda / params.lambda_factor).max(f64::MIN_POSITIVE);
                    break;
                }
            }
            lambda *= params.lambda_factor;
            if lambda > params.max_lambda {
                // No step decreases the error any more: this is a local minimum
                debug!("Levenberg-Marquardt stopped at lambda {:e}", lambda);
                converged = true;
                break 'outer;
            }
        }
    }

    if !converged {
        warn!("Levenberg-Marquardt did not converge in {} iterations, error {:e}", iterations, current_error);
    }
    Ok(SolveReport { values, iterations, initial_error, final_error: current_error, converged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{BetweenFactor, NoiseModel, PriorFactor};
    use nalgebra::{Isometry3, Vector3};

    fn pose_chain() -> (FactorGraph, Values) {
        let mut graph = FactorGraph::new();
        graph.add(PriorFactor::new(Key::new(1), crate::values::Value::Pose(Isometry3::identity()), 0.01));
        graph.add(BetweenFactor::new(Key::new(1), Key::new(2), Isometry3::translation(1.0, 0.0, 0.0), NoiseModel::isotropic(6, 0.01)));
        let mut values = Values::new();
        values.insert_pose(Key::new(1), Isometry3::new(Vector3::new(0.1, 0.2, 0.0), Vector3::new(0.0, 0.0, 0.2)));
        values.insert_pose(Key::new(2), Isometry3::new(Vector3::new(0.5, -0.3, 0.1), Vector3::new(0.1, 0.0, 0.0)));
        (graph, values)
    }

    #[test]
    fn test_gauss_newton_pose_chain() {
        let (graph, values) = pose_chain();
        let report = optimize(&graph, &values, &OptimizerParams::default()).unwrap();
        assert!(report.converged);
        assert!(report.final_error < 1e-10);
        let x2 = report.values.pose(Key::new(2)).unwrap();
        assert!((x2.translation.vector - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_levenberg_marquardt_pose_chain() {
        let (graph, values) = pose_chain();
        let report = optimize(&graph, &values, &OptimizerParams::levenberg_marquardt()).unwrap();
        assert!(report.final_error < 1e-8);
        assert!(report.final_error < report.initial_error);
    }

    #[test]
    fn test_underdetermined_is_infeasible_for_gauss_newton() {
        let mut graph = FactorGraph::new();
        graph.add(BetweenFactor::new(Key::new(1), Key::new(2), Isometry3::identity(), NoiseModel::unit(6)));
        let mut values = Values::new();
        values.insert_pose(Key::new(1), Isometry3::identity());
        values.insert_pose(Key::new(2), Isometry3::translation(0.0, 0.0, 1.0));
        assert!(matches!(
            optimize(&graph, &values, &OptimizerParams::default()),
            Err(DynamicsError::InfeasibleConstraintSet { rank: 6, dimension: 12 })
        ));

        let report = optimize(&graph, &values, &OptimizerParams::levenberg_marquardt()).unwrap();
        assert!(report.final_error < 1e-8);
    }
}
