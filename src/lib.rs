//! Factor-graph formulation of the dynamics of articulated robots.
//!
//! Link poses, twists, accelerations and wrenches, together with joint angles,
//! velocities, accelerations and torques, are variables of a nonlinear least squares
//! problem. The laws that relate them (joint kinematics, Newton-Euler equations, wrench
//! equivalence, torque) are factors. Solving the graph under priors answers forward or
//! inverse dynamics questions; joining time slices with collocation factors gives
//! trajectories, optionally split into phases of variable duration.
//!
//! # Features
//!
//! - Factor graph of a single time slice for any robot, including closed loops such as a
//!   four-bar linkage. Factor groups (poses, twists, accelerations, dynamics) can be
//!   selected individually.
//! - Euler and trapezoidal collocation with a fixed step or a per-phase duration variable.
//! - Trajectory and multi-phase trajectory graphs, with transition graphs at phase
//!   boundaries.
//! - Gauss-Newton and Levenberg-Marquardt solvers. Gauss-Newton reports rank deficient
//!   systems instead of returning an arbitrary solution.
//! - Equality constraint sets, their split into independent connected components, and
//!   retraction onto the constraint manifold by optimization, by projection or over a
//!   fixed basis.
//! - Noise and optimizer settings from YAML.
//!
//! Spatial vectors are ordered `[angular; linear]` and expressed in the link COM frame.
//!
//! ## Example
//!
//! ```
//! use gtdyn_rs::dynamics_graph::DynamicsGraph;
//! use gtdyn_rs::optimizer::{optimize, OptimizerParams};
//! use gtdyn_rs::robot_models::two_link_arm;
//! use nalgebra::Vector3;
//!
//! let robot = two_link_arm().unwrap();
//! let builder = DynamicsGraph::default();
//! let mut graph = builder
//!     .dynamics_factor_graph(&robot, 0, &Vector3::new(0.0, 0.0, -9.8), None)
//!     .unwrap();
//! graph.add_graph(&builder.forward_dynamics_priors(&robot, 0, &[0.0], &[0.0], &[1.0]).unwrap());
//!
//! let initial = DynamicsGraph::zero_values(&robot, 0);
//! let report = optimize(&graph, &initial, &OptimizerParams::default()).unwrap();
//! let accels = DynamicsGraph::joint_accels(&robot, &report.values, 0).unwrap();
//! assert!((accels[0] - 1.0).abs() < 1e-6);
//! ```

pub mod dynamics_error;
pub mod keys;
pub mod values;

pub mod spatial;
pub mod robot;
pub mod robot_models;

pub mod factors;
pub mod jacobian;
pub mod dynamics_factors;
pub mod collocation;
pub mod factor_graph;

pub mod optimizer;
pub mod settings;

pub mod dynamics_graph;

pub mod constraints;
pub mod connected_component;
pub mod retractor;

#[path = "utils/utils.rs"]
pub mod utils;

#[cfg(test)]
mod tests;
