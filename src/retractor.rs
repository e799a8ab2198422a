//! Retraction: moving an assignment that almost satisfies the constraints of a component
//! back onto the constraint manifold.
//!
//! Three strategies share one contract. The result satisfies every constraint of the
//! component within its tolerance, or is returned as a best effort with `converged`
//! unset. Only the variables of the component change; all other values are copied.
//!
//! * [`UoptRetractor`] minimizes the constraints as tight least squares costs, starting
//!   from the input. It finds a feasible point, not necessarily the closest one.
//! * [`ProjRetractor`] repeats minimal norm Gauss-Newton corrections
//!   `delta = -J^+ r` over all variables, approximating the metric projection.
//! * [`BasisRetractor`] does the same over the non-basis variables only, so basis
//!   variables keep their input values exactly.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::connected_component::ConnectedComponent;
use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::jacobian::Jacobian;
use crate::keys::Key;
use crate::optimizer::{optimize, OptimizerParams};
use crate::values::Values;

#[derive(Debug, Clone, PartialEq)]
pub struct RetractParams {
    /// Iteration budget of the projection retractors
    pub max_iterations: usize,

    /// Singular values of the constraint Jacobian below this count as zero
    pub epsilon: f64,

    /// Sigma of the constraints when used as costs by the optimizing retractor
    pub penalty_sigma: f64,

    pub optimizer: OptimizerParams,
}

impl Default for RetractParams {
    fn default() -> Self {
        RetractParams {
            max_iterations: 100,
            epsilon: 1e-6,
            penalty_sigma: 1e-3,
            optimizer: OptimizerParams::levenberg_marquardt(),
        }
    }
}

/// Result of a retraction
#[derive(Debug, Clone)]
pub struct Retraction {
    pub values: Values,

    /// All constraints hold within their tolerances
    pub converged: bool,
    pub iterations: usize,

    /// Largest residual row over the constraints of the component
    pub max_violation: f64,
}

impl Retraction {
    /// The retracted values, or an error if the constraints are not satisfied
    pub fn into_result(self) -> DynamicsResult<Values> {
        if self.converged {
            Ok(self.values)
        } else {
            Err(DynamicsError::RetractionNonConvergence {
                iterations: self.iterations,
                max_violation: self.max_violation,
            })
        }
    }
}

pub trait Retractor: Send + Sync {
    fn retract(&self, component: &ConnectedComponent, values: &Values, params: &RetractParams) -> DynamicsResult<Retraction>;
}

fn finish(component: &ConnectedComponent, values: Values, iterations: usize, name: &str) -> DynamicsResult<Retraction> {
    let constraints = component.constraints();
    let max_violation = constraints.max_violation(&values)?;
    let converged = constraints.compliant(&values)?;
    if !converged {
        warn!(
            "{} retraction did not converge after {} iterations, violation {:e}",
            name, iterations, max_violation
        );
    }
    Ok(Retraction { values, converged, iterations, max_violation })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UoptRetractor;

impl Retractor for UoptRetractor {
    fn retract(&self, component: &ConnectedComponent, values: &Values, params: &RetractParams) -> DynamicsResult<Retraction> {
        let graph = component.constraints().to_penalty_graph(params.penalty_sigma);
        let report = optimize(&graph, values, &params.optimizer)?;
        debug!(
            "Optimizing retraction: error {:e} -> {:e} in {} iterations",
            report.initial_error, report.final_error, report.iterations
        );
        finish(component, report.values, report.iterations, "Optimizing")
    }
}

/// Gauss-Newton on the constraints over the `free` keys, holding all others fixed
fn project(
    component: &ConnectedComponent,
    values: &Values,
    free: &[Key],
    params: &RetractParams,
    name: &str,
) -> DynamicsResult<Retraction> {
    let constraints = component.constraints();
    let mut current = values.clone();
    let mut iterations = 0;

    while iterations < params.max_iterations && !free.is_empty() && !constraints.compliant(&current)? {
        let linearized = constraints.linearize(&current)?;
        let jacobian = Jacobian::stack(&linearized, free, &current, params.epsilon)?;
        let delta = jacobian.correction()?;
        current = current.retract(free, &delta)?;
        iterations += 1;
        debug!(
            "{} retraction iteration {}: violation {:e}",
            name,
            iterations,
            constraints.max_violation(&current)?
        );
    }
    finish(component, current, iterations, name)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjRetractor;

impl Retractor for ProjRetractor {
    fn retract(&self, component: &ConnectedComponent, values: &Values, params: &RetractParams) -> DynamicsResult<Retraction> {
        let free: Vec<Key> = component.keys().iter().copied().collect();
        project(component, values, &free, params, "Projection")
    }
}

/// Projection restricted to the variables outside the basis
#[derive(Debug, Clone, Default)]
pub struct BasisRetractor {
    basis: Vec<Key>,
}

impl BasisRetractor {
    pub fn new(basis: Vec<Key>) -> Self {
        BasisRetractor { basis }
    }

    pub fn basis(&self) -> &[Key] {
        &self.basis
    }
}

impl Retractor for BasisRetractor {
    fn retract(&self, component: &ConnectedComponent, values: &Values, params: &RetractParams) -> DynamicsResult<Retraction> {
        for key in &self.basis {
            values.at(*key)?;
        }
        let free: Vec<Key> = component
            .keys()
            .iter()
            .copied()
            .filter(|key| !self.basis.contains(key))
            .collect();
        project(component, values, &free, params, "Basis")
    }
}

/// Selects the retraction strategy
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetractorKind {
    Uopt,
    #[default]
    Proj,
    /// Ordered basis keys, kept unchanged by the retraction
    Basis(Vec<Key>),
}

impl RetractorKind {
    pub fn retractor(&self) -> Box<dyn Retractor> {
        match self {
            RetractorKind::Uopt => Box::new(UoptRetractor),
            RetractorKind::Proj => Box::new(ProjRetractor),
            RetractorKind::Basis(basis) => Box::new(BasisRetractor::new(basis.clone())),
        }
    }
}

/// Retracts one component with the selected strategy
pub fn retract(
    component: &ConnectedComponent,
    kind: &RetractorKind,
    values: &Values,
    params: &RetractParams,
) -> DynamicsResult<Retraction> {
    kind.retractor().retract(component, values, params)
}

/// Retracts independent components in parallel and merges the results. The merged
/// retraction converged if all components did.
pub fn retract_components(
    components: &[ConnectedComponent],
    kind: &RetractorKind,
    values: &Values,
    params: &RetractParams,
) -> DynamicsResult<Retraction> {
    let retractor = kind.retractor();
    let results: Vec<Retraction> = components
        .par_iter()
        .map(|component| retractor.retract(component, values, params))
        .collect::<DynamicsResult<_>>()?;

    let mut merged = Retraction { values: values.clone(), converged: true, iterations: 0, max_violation: 0.0 };
    for (component, result) in components.iter().zip(results) {
        let updated = result.values.subset(component.keys())?;
        merged.values.update_all(&updated);
        merged.converged &= result.converged;
        merged.iterations = merged.iterations.max(result.iterations);
        merged.max_violation = merged.max_violation.max(result.max_violation);
    }
    Ok(merged)
}
