//! Integration relations between consecutive slices.
//!
//! For every joint, a collocation factor ties the angle at `t + 1` to the angle and
//! velocity at `t` (and `t + 1` for trapezoidal), and the same for velocity and
//! acceleration. The step `dt` is either a known constant or the duration variable of a
//! phase; in the second case the residual is bilinear in `dt` and the rates.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::factors::{Factor, NoiseModel};
use crate::keys::Key;
use crate::values::Values;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollocationScheme {
    /// `x1 = x0 + dt * dx0`
    #[default]
    Euler,
    /// `x1 = x0 + dt / 2 * (dx0 + dx1)`
    Trapezoidal,
}

impl CollocationScheme {
    /// Value at the end of the step
    pub fn integrate(&self, x0: f64, dx0: f64, dx1: f64, dt: f64) -> f64 {
        match self {
            CollocationScheme::Euler => x0 + dt * dx0,
            CollocationScheme::Trapezoidal => x0 + 0.5 * dt * (dx0 + dx1),
        }
    }

    /// Residual of the relation, zero when `x1` is the integrated value
    pub fn residual(&self, x0: f64, x1: f64, dx0: f64, dx1: f64, dt: f64) -> f64 {
        x1 - self.integrate(x0, dx0, dx1, dt)
    }

    /// Whether the relation reads the rate at the end of the step
    pub fn uses_end_rate(&self) -> bool {
        matches!(self, CollocationScheme::Trapezoidal)
    }
}

impl fmt::Display for CollocationScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CollocationScheme::Euler => write!(f, "euler"),
            CollocationScheme::Trapezoidal => write!(f, "trapezoidal"),
        }
    }
}

impl FromStr for CollocationScheme {
    type Err = DynamicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "euler" => Ok(CollocationScheme::Euler),
            "trapezoidal" => Ok(CollocationScheme::Trapezoidal),
            other => Err(DynamicsError::Settings(format!("unknown collocation scheme '{}'", other))),
        }
    }
}

/// Length of an integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeStep {
    Fixed(f64),
    /// Duration variable of the phase the step belongs to
    Phase(Key),
}

/// `x1 - integrate(x0, dx0, dx1, dt) == 0` for one scalar quantity.
/// Key order: x0, x1, dx0, then dx1 (trapezoidal only), then dt (phase steps only).
#[derive(Debug, Clone)]
pub struct CollocationFactor {
    keys: Vec<Key>,
    scheme: CollocationScheme,
    step: TimeStep,
    noise: NoiseModel,
}

impl CollocationFactor {
    pub fn new(
        x0: Key,
        x1: Key,
        dx0: Key,
        dx1: Key,
        step: TimeStep,
        scheme: CollocationScheme,
        sigma: f64,
    ) -> Self {
        let mut keys = vec![x0, x1, dx0];
        if scheme.uses_end_rate() {
            keys.push(dx1);
        }
        if let TimeStep::Phase(phase) = step {
            keys.push(phase);
        }
        CollocationFactor { keys, scheme, step, noise: NoiseModel::isotropic(1, sigma) }
    }

    pub fn scheme(&self) -> CollocationScheme {
        self.scheme
    }

    pub fn step(&self) -> TimeStep {
        self.step
    }

    /// Reads (x0, x1, dx0, dx1, dt). dx1 is zero when the scheme does not use it.
    fn read(&self, values: &Values) -> DynamicsResult<(f64, f64, f64, f64, f64)> {
        let x0 = values.scalar(self.keys[0])?;
        let x1 = values.scalar(self.keys[1])?;
        let dx0 = values.scalar(self.keys[2])?;
        let dx1 = if self.scheme.uses_end_rate() {
            values.scalar(self.keys[3])?
        } else {
            0.0
        };
        let dt = match self.step {
            TimeStep::Fixed(dt) => dt,
            TimeStep::Phase(phase) => values.scalar(phase)?,
        };
        Ok((x0, x1, dx0, dx1, dt))
    }
}

impl Factor for CollocationFactor {
    fn name(&self) -> &'static str {
        match (self.scheme, self.step) {
            (CollocationScheme::Euler, TimeStep::Fixed(_)) => "euler_collocation",
            (CollocationScheme::Euler, TimeStep::Phase(_)) => "euler_phase_collocation",
            (CollocationScheme::Trapezoidal, TimeStep::Fixed(_)) => "trapezoidal_collocation",
            (CollocationScheme::Trapezoidal, TimeStep::Phase(_)) => "trapezoidal_phase_collocation",
        }
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let (x0, x1, dx0, dx1, dt) = self.read(values)?;
        Ok(DVector::from_element(1, self.scheme.residual(x0, x1, dx0, dx1, dt)))
    }

    fn jacobians(&self, values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        let (_, _, dx0, dx1, dt) = self.read(values)?;
        let entry = |x: f64| DMatrix::from_element(1, 1, x);
        let mut jacobians = vec![entry(-1.0), entry(1.0)];
        match self.scheme {
            CollocationScheme::Euler => jacobians.push(entry(-dt)),
            CollocationScheme::Trapezoidal => {
                jacobians.push(entry(-0.5 * dt));
                jacobians.push(entry(-0.5 * dt));
            }
        }
        if let TimeStep::Phase(_) = self.step {
            let d_dt = match self.scheme {
                CollocationScheme::Euler => -dx0,
                CollocationScheme::Trapezoidal => -0.5 * (dx0 + dx1),
            };
            jacobians.push(entry(d_dt));
        }
        Ok(jacobians)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian::numerical_jacobians;

    const EPSILON: f64 = 1e-9;

    fn values() -> Values {
        let mut values = Values::new();
        values.insert_scalar(Key::new(1), 1.0);
        values.insert_scalar(Key::new(2), 2.0);
        values.insert_scalar(Key::new(3), 1.0);
        values.insert_scalar(Key::new(4), 2.0);
        values.insert_scalar(Key::new(5), 0.5);
        values
    }

    #[test]
    fn test_integrate() {
        assert_eq!(CollocationScheme::Euler.integrate(1.0, 1.0, 2.0, 1.0), 2.0);
        assert_eq!(CollocationScheme::Trapezoidal.integrate(1.0, 1.0, 2.0, 1.0), 2.5);
        assert_eq!(CollocationScheme::Trapezoidal.residual(1.0, 2.5, 1.0, 2.0, 1.0), 0.0);
    }

    #[test]
    fn test_fixed_step_keys() {
        let euler = CollocationFactor::new(
            Key::new(1), Key::new(2), Key::new(3), Key::new(4),
            TimeStep::Fixed(1.0), CollocationScheme::Euler, 0.001,
        );
        assert_eq!(euler.keys(), &[Key::new(1), Key::new(2), Key::new(3)]);
        assert_eq!(euler.name(), "euler_collocation");
        assert!(euler.evaluate_error(&values()).unwrap()[0].abs() < EPSILON);

        let trapezoidal = CollocationFactor::new(
            Key::new(1), Key::new(2), Key::new(3), Key::new(4),
            TimeStep::Fixed(1.0), CollocationScheme::Trapezoidal, 0.001,
        );
        assert_eq!(trapezoidal.keys().len(), 4);
        assert!((trapezoidal.evaluate_error(&values()).unwrap()[0] + 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_phase_step_jacobians() {
        for scheme in [CollocationScheme::Euler, CollocationScheme::Trapezoidal] {
            let factor = CollocationFactor::new(
                Key::new(1), Key::new(2), Key::new(3), Key::new(4),
                TimeStep::Phase(Key::new(5)), scheme, 0.001,
            );
            assert_eq!(*factor.keys().last().unwrap(), Key::new(5));
            let analytic = factor.jacobians(&values()).unwrap();
            let numerical = numerical_jacobians(&factor, &values(), 1e-6).unwrap();
            assert_eq!(analytic.len(), numerical.len());
            for (a, n) in analytic.iter().zip(numerical.iter()) {
                assert!((a - n).norm() < 1e-6, "{}: {} vs {}", scheme, a, n);
            }
        }
    }

    #[test]
    fn test_parse_scheme() {
        assert_eq!("Euler".parse::<CollocationScheme>().unwrap(), CollocationScheme::Euler);
        assert_eq!(" trapezoidal ".parse::<CollocationScheme>().unwrap(), CollocationScheme::Trapezoidal);
        assert!("rk4".parse::<CollocationScheme>().is_err());
    }
}
