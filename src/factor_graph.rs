use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::dynamics_error::DynamicsResult;
use crate::factors::Factor;
use crate::jacobian::LinearizedFactor;
use crate::keys::Key;
use crate::values::Values;

/// Order-free description of a factor: its type name and sorted keys. Two graphs with
/// equal sorted signature lists contain the same factors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FactorSignature {
    pub name: &'static str,
    pub keys: Vec<Key>,
}

impl fmt::Display for FactorSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", key)?;
        }
        write!(f, ")")
    }
}

/// Sum of squared residuals of shared, immutable factors
#[derive(Debug, Clone, Default)]
pub struct FactorGraph {
    factors: Vec<Arc<dyn Factor>>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F: Factor + 'static>(&mut self, factor: F) {
        self.factors.push(Arc::new(factor));
    }

    pub fn add_shared(&mut self, factor: Arc<dyn Factor>) {
        self.factors.push(factor);
    }

    /// Appends all factors of the other graph
    pub fn add_graph(&mut self, other: &FactorGraph) {
        self.factors.extend(other.factors.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn factors(&self) -> &[Arc<dyn Factor>] {
        &self.factors
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Factor>> {
        self.factors.iter()
    }

    /// All keys touched by the graph, sorted
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .collect()
    }

    /// Total number of residual rows
    pub fn dim(&self) -> usize {
        self.factors.iter().map(|f| f.dim()).sum()
    }

    /// Half of the sum of squared whitened residuals
    pub fn error(&self, values: &Values) -> DynamicsResult<f64> {
        let errors: Vec<f64> = self
            .factors
            .par_iter()
            .map(|f| f.error(values))
            .collect::<DynamicsResult<_>>()?;
        Ok(errors.iter().sum())
    }

    /// Linearizes every factor at `values`, in factor order
    pub fn linearize(&self, values: &Values, whiten: bool) -> DynamicsResult<Vec<LinearizedFactor>> {
        self.factors
            .par_iter()
            .map(|f| LinearizedFactor::new(f.as_ref(), values, whiten))
            .collect()
    }

    /// Sorted signatures of all factors
    pub fn signatures(&self) -> Vec<FactorSignature> {
        let mut signatures: Vec<FactorSignature> = self
            .factors
            .iter()
            .map(|f| {
                let mut keys = f.keys().to_vec();
                keys.sort();
                FactorSignature { name: f.name(), keys }
            })
            .collect();
        signatures.sort();
        signatures
    }
}

impl FromIterator<Arc<dyn Factor>> for FactorGraph {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Factor>>>(iter: I) -> Self {
        FactorGraph { factors: iter.into_iter().collect() }
    }
}

impl Extend<Arc<dyn Factor>> for FactorGraph {
    fn extend<I: IntoIterator<Item = Arc<dyn Factor>>>(&mut self, iter: I) {
        self.factors.extend(iter);
    }
}
