use std::collections::BTreeSet;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::dynamics_error::DynamicsResult;
use crate::factor_graph::FactorGraph;
use crate::factors::{Factor, NoiseModel};
use crate::jacobian::LinearizedFactor;
use crate::keys::Key;
use crate::values::Values;

/// Requires the residual of a factor to vanish. The noise model of the factor is ignored:
/// every row of the residual must be within the tolerance in absolute value.
#[derive(Debug, Clone)]
pub struct EqualityConstraint {
    factor: Arc<dyn Factor>,
    tolerance: f64,
}

impl EqualityConstraint {
    pub fn new(factor: Arc<dyn Factor>, tolerance: f64) -> Self {
        EqualityConstraint { factor, tolerance }
    }

    pub fn from_factor<F: Factor + 'static>(factor: F, tolerance: f64) -> Self {
        Self::new(Arc::new(factor), tolerance)
    }

    pub fn factor(&self) -> &Arc<dyn Factor> {
        &self.factor
    }

    pub fn keys(&self) -> &[Key] {
        self.factor.keys()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn dim(&self) -> usize {
        self.factor.dim()
    }

    /// Largest absolute residual row
    pub fn violation(&self, values: &Values) -> DynamicsResult<f64> {
        let residual = self.factor.evaluate_error(values)?;
        Ok(residual.iter().fold(0.0, |max, r| max.max(r.abs())))
    }

    pub fn compliant(&self, values: &Values) -> DynamicsResult<bool> {
        Ok(self.violation(values)? <= self.tolerance)
    }
}

/// Constraint used as a least squares cost with its own noise
#[derive(Debug)]
struct PenaltyFactor {
    constraint: Arc<dyn Factor>,
    noise: NoiseModel,
}

impl Factor for PenaltyFactor {
    fn name(&self) -> &'static str {
        self.constraint.name()
    }

    fn keys(&self) -> &[Key] {
        self.constraint.keys()
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        self.constraint.evaluate_error(values)
    }

    fn jacobians(&self, values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        self.constraint.jacobians(values)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EqualityConstraints {
    constraints: Vec<EqualityConstraint>,
}

impl EqualityConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every factor of the graph as a constraint with the given tolerance
    pub fn from_graph(graph: &FactorGraph, tolerance: f64) -> Self {
        graph
            .iter()
            .map(|factor| EqualityConstraint::new(factor.clone(), tolerance))
            .collect()
    }

    pub fn add(&mut self, constraint: EqualityConstraint) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EqualityConstraint> {
        self.constraints.iter()
    }

    /// All keys touched by the constraints
    pub fn keys(&self) -> BTreeSet<Key> {
        self.constraints
            .iter()
            .flat_map(|c| c.keys().iter().copied())
            .collect()
    }

    /// Largest residual row over all constraints, zero if there are none
    pub fn max_violation(&self, values: &Values) -> DynamicsResult<f64> {
        self.constraints
            .iter()
            .try_fold(0.0, |max: f64, c| Ok(max.max(c.violation(values)?)))
    }

    /// Checks if every constraint holds within its own tolerance
    pub fn compliant(&self, values: &Values) -> DynamicsResult<bool> {
        for constraint in &self.constraints {
            if !constraint.compliant(values)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Unwhitened linearization of every constraint
    pub fn linearize(&self, values: &Values) -> DynamicsResult<Vec<LinearizedFactor>> {
        self.constraints
            .iter()
            .map(|c| LinearizedFactor::new(c.factor.as_ref(), values, false))
            .collect()
    }

    /// The constraints as least squares costs, all with the isotropic `sigma`
    pub fn to_penalty_graph(&self, sigma: f64) -> FactorGraph {
        let mut graph = FactorGraph::new();
        for constraint in &self.constraints {
            graph.add(PenaltyFactor {
                constraint: constraint.factor.clone(),
                noise: NoiseModel::isotropic(constraint.dim(), sigma),
            });
        }
        graph
    }
}

impl FromIterator<EqualityConstraint> for EqualityConstraints {
    fn from_iter<I: IntoIterator<Item = EqualityConstraint>>(iter: I) -> Self {
        EqualityConstraints { constraints: iter.into_iter().collect() }
    }
}
