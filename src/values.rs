//! Variable assignment container. Values are scalars (joint quantities, torques, phase
//! durations), 6-vectors (twists, accelerations, wrenches) or SE(3) poses. Each kind has
//! a tangent space used by the optimizer and the retractors:
//! scalars and vectors are updated additively, poses by right-multiplying the
//! perturbation `[rotation vector; translation]`.

use std::collections::BTreeMap;

use nalgebra::{DVector, Isometry3, Vector3, Vector6};

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::keys::Key;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vector6<f64>),
    Pose(Isometry3<f64>),
}

impl Value {
    /// Dimension of the tangent space
    pub fn dim(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(_) | Value::Pose(_) => 6,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "vector6",
            Value::Pose(_) => "pose",
        }
    }

    /// Applies the tangent perturbation. `delta` must have exactly `dim()` elements.
    pub fn retract(&self, delta: &[f64]) -> Value {
        debug_assert_eq!(delta.len(), self.dim());
        match self {
            Value::Scalar(x) => Value::Scalar(x + delta[0]),
            Value::Vector(v) => Value::Vector(v + Vector6::from_column_slice(delta)),
            Value::Pose(pose) => {
                let rotation = Vector3::new(delta[0], delta[1], delta[2]);
                let translation = Vector3::new(delta[3], delta[4], delta[5]);
                Value::Pose(pose * Isometry3::new(translation, rotation))
            }
        }
    }

    /// Tangent vector taking `self` to `other`, the inverse of [`Value::retract`].
    pub fn local(&self, other: &Value) -> Option<DVector<f64>> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Some(DVector::from_element(1, b - a)),
            (Value::Vector(a), Value::Vector(b)) => Some(DVector::from_column_slice((b - a).as_slice())),
            (Value::Pose(a), Value::Pose(b)) => Some(pose_local(a, b)),
            _ => None,
        }
    }
}

/// Local coordinates `[rotation vector; translation]` of `b` relative to `a`.
pub fn pose_local(a: &Isometry3<f64>, b: &Isometry3<f64>) -> DVector<f64> {
    let relative = a.inverse() * b;
    let rotation = relative.rotation.scaled_axis();
    let translation = relative.translation.vector;
    DVector::from_column_slice(&[
        rotation.x, rotation.y, rotation.z,
        translation.x, translation.y, translation.z,
    ])
}

/// Assignment of values to keys. Ordered by key, so iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    values: BTreeMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value, returning the replaced one
    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        self.values.insert(key, value)
    }

    pub fn insert_scalar(&mut self, key: Key, value: f64) {
        self.values.insert(key, Value::Scalar(value));
    }

    pub fn insert_vector(&mut self, key: Key, value: Vector6<f64>) {
        self.values.insert(key, Value::Vector(value));
    }

    pub fn insert_pose(&mut self, key: Key, value: Isometry3<f64>) {
        self.values.insert(key, Value::Pose(value));
    }

    /// Inserts only keys that are not yet present
    pub fn try_insert_all(&mut self, other: &Values) {
        for (key, value) in other.iter() {
            self.values.entry(*key).or_insert_with(|| value.clone());
        }
    }

    /// Inserts all values of `other`, replacing existing ones
    pub fn update_all(&mut self, other: &Values) {
        for (key, value) in other.iter() {
            self.values.insert(*key, value.clone());
        }
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.values.iter()
    }

    pub fn at(&self, key: Key) -> DynamicsResult<&Value> {
        self.values
            .get(&key)
            .ok_or(DynamicsError::InvalidVariableReference(key))
    }

    pub fn scalar(&self, key: Key) -> DynamicsResult<f64> {
        match self.at(key)? {
            Value::Scalar(x) => Ok(*x),
            other => Err(mismatch(key, "scalar", other)),
        }
    }

    pub fn vector6(&self, key: Key) -> DynamicsResult<Vector6<f64>> {
        match self.at(key)? {
            Value::Vector(v) => Ok(*v),
            other => Err(mismatch(key, "vector6", other)),
        }
    }

    pub fn pose(&self, key: Key) -> DynamicsResult<Isometry3<f64>> {
        match self.at(key)? {
            Value::Pose(p) => Ok(*p),
            other => Err(mismatch(key, "pose", other)),
        }
    }

    /// Tangent dimension of the value under the key
    pub fn dim(&self, key: Key) -> DynamicsResult<usize> {
        Ok(self.at(key)?.dim())
    }

    /// Total tangent dimension of the given keys
    pub fn total_dim(&self, keys: &[Key]) -> DynamicsResult<usize> {
        keys.iter().map(|key| self.dim(*key)).sum()
    }

    /// Copy of these values where keys in `ordering` are perturbed by consecutive
    /// blocks of `delta`. Keys not in the ordering are carried over unchanged.
    pub fn retract(&self, ordering: &[Key], delta: &DVector<f64>) -> DynamicsResult<Values> {
        let mut result = self.clone();
        let mut offset = 0;
        for key in ordering {
            let value = self.at(*key)?;
            let dim = value.dim();
            let block = &delta.as_slice()[offset..offset + dim];
            result.values.insert(*key, value.retract(block));
            offset += dim;
        }
        debug_assert_eq!(offset, delta.len());
        Ok(result)
    }

    /// Restriction of these values to the given keys
    pub fn subset<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> DynamicsResult<Values> {
        let mut subset = Values::new();
        for key in keys {
            subset.insert(*key, self.at(*key)?.clone());
        }
        Ok(subset)
    }

    /// Checks if all stored numbers are finite
    pub fn all_finite(&self) -> bool {
        self.values.values().all(|value| match value {
            Value::Scalar(x) => x.is_finite(),
            Value::Vector(v) => v.iter().all(|x| x.is_finite()),
            Value::Pose(p) => {
                p.translation.vector.iter().all(|x| x.is_finite())
                    && p.rotation.coords.iter().all(|x| x.is_finite())
            }
        })
    }
}

fn mismatch(key: Key, expected: &'static str, found: &Value) -> DynamicsError {
    DynamicsError::ValueKindMismatch { key, expected, found: found.kind() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_pose_retract_and_local_agree() {
        let pose = Isometry3::new(Vector3::new(1.0, -2.0, 0.5), Vector3::new(0.1, 0.2, -0.3));
        let delta = [0.05, -0.02, 0.01, 0.3, 0.2, -0.1];
        let moved = Value::Pose(pose).retract(&delta);
        let back = Value::Pose(pose).local(&moved).unwrap();
        for i in 0..6 {
            assert!((back[i] - delta[i]).abs() < 1e-9, "{} != {}", back[i], delta[i]);
        }
    }

    #[test]
    fn test_missing_key_is_reported() {
        let values = Values::new();
        match values.scalar(Key::new(7)) {
            Err(DynamicsError::InvalidVariableReference(key)) => assert_eq!(key, Key::new(7)),
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kind_mismatch_is_reported() {
        let mut values = Values::new();
        values.insert_pose(Key::new(1), Isometry3::identity());
        assert!(matches!(
            values.scalar(Key::new(1)),
            Err(DynamicsError::ValueKindMismatch { expected: "scalar", found: "pose", .. })
        ));
    }

    #[test]
    fn test_retract_ordering() {
        let mut values = Values::new();
        values.insert_scalar(Key::new(1), 1.0);
        values.insert_pose(Key::new(2), Isometry3::from_parts(Translation3::new(0.0, 0.0, 1.0), UnitQuaternion::identity()));
        values.insert_scalar(Key::new(3), 5.0);

        let delta = DVector::from_column_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.5]);
        let moved = values.retract(&[Key::new(2), Key::new(1)], &delta).unwrap();
        assert!((moved.pose(Key::new(2)).unwrap().translation.z - 3.0).abs() < EPSILON);
        assert!((moved.scalar(Key::new(1)).unwrap() - 1.5).abs() < EPSILON);
        assert_eq!(moved.scalar(Key::new(3)).unwrap(), 5.0);
    }
}
