//! Error handling for graph assembly, optimization and retraction

use std::io;
use thiserror::Error;

use crate::keys::Key;

/// Unified error to report failures of assembly, solving and retraction.
#[derive(Debug, Error)]
pub enum DynamicsError {
    /// A factor or constraint reads a variable that the assignment does not hold.
    /// This is a violation of the caller contract and is never recovered internally.
    #[error("Invalid variable reference: {0} is not present in the values")]
    InvalidVariableReference(Key),

    #[error("Value kind mismatch for {key}: expected {expected}, found {found}")]
    ValueKindMismatch {
        key: Key,
        expected: &'static str,
        found: &'static str,
    },

    /// The linearized system is rank deficient, so the constraints do not determine
    /// the solution (or contradict each other).
    #[error("Infeasible constraint set: Jacobian rank {rank} is below the dimension {dimension}")]
    InfeasibleConstraintSet { rank: usize, dimension: usize },

    #[error("Retraction did not converge after {iterations} iterations (max violation {max_violation:e})")]
    RetractionNonConvergence {
        iterations: usize,
        max_violation: f64,
    },

    #[error("Invalid trajectory: {0}")]
    InvalidTrajectory(String),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Invalid robot: {0}")]
    InvalidRobot(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Result type used throughout the crate
pub type DynamicsResult<T> = Result<T, DynamicsError>;
