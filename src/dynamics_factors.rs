//! Factors of one time slice: kinematics of every joint, Newton-Euler balance of every
//! moving link and the joint wrench relations.
//!
//! Residuals follow the spatial conventions of [`crate::spatial`]. A joint wrench
//! variable `F(i, j, t)` is the wrench that joint `j` exerts on link `i`, expressed in
//! the COM frame of link `i`.

use nalgebra::{DMatrix, DVector, Matrix6, RowDVector, Vector3, Vector6};

use crate::dynamics_error::DynamicsResult;
use crate::factors::{Factor, NoiseModel};
use crate::keys::Key;
use crate::robot::JointFrames;
use crate::spatial::{adjoint_map, gravity_wrench, lie_bracket_map, planar_selector};
use crate::values::{pose_local, Values};

fn vector(v: &Vector6<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}

/// `wTc == wTp * pTc(q)`
#[derive(Debug, Clone)]
pub struct PoseFactor {
    /// wTp, wTc, q
    keys: [Key; 3],
    frames: JointFrames,
    noise: NoiseModel,
}

impl PoseFactor {
    pub fn new(parent_pose: Key, child_pose: Key, angle: Key, frames: JointFrames, sigma: f64) -> Self {
        PoseFactor {
            keys: [parent_pose, child_pose, angle],
            frames,
            noise: NoiseModel::isotropic(6, sigma),
        }
    }
}

impl Factor for PoseFactor {
    fn name(&self) -> &'static str {
        "pose"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let w_t_p = values.pose(self.keys[0])?;
        let w_t_c = values.pose(self.keys[1])?;
        let q = values.scalar(self.keys[2])?;
        Ok(pose_local(&w_t_c, &(w_t_p * self.frames.parent_t_child(q))))
    }
}

/// `Vc == Ad(cTp(q)) Vp + Sc qdot`
#[derive(Debug, Clone)]
pub struct TwistFactor {
    /// Vp, Vc, q, qdot
    keys: [Key; 4],
    frames: JointFrames,
    noise: NoiseModel,
}

impl TwistFactor {
    pub fn new(parent_twist: Key, child_twist: Key, angle: Key, velocity: Key, frames: JointFrames, sigma: f64) -> Self {
        TwistFactor {
            keys: [parent_twist, child_twist, angle, velocity],
            frames,
            noise: NoiseModel::isotropic(6, sigma),
        }
    }
}

impl Factor for TwistFactor {
    fn name(&self) -> &'static str {
        "twist"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let v_p = values.vector6(self.keys[0])?;
        let v_c = values.vector6(self.keys[1])?;
        let q = values.scalar(self.keys[2])?;
        let q_dot = values.scalar(self.keys[3])?;
        let ad = adjoint_map(&self.frames.child_t_parent(q));
        Ok(vector(&(ad * v_p + self.frames.screw_child() * q_dot - v_c)))
    }
}

/// `Ac == Ad(cTp(q)) Ap + ad(Vc) Sc qdot + Sc qddot`
#[derive(Debug, Clone)]
pub struct TwistAccelFactor {
    /// Vc, Ap, Ac, q, qdot, qddot
    keys: [Key; 6],
    frames: JointFrames,
    noise: NoiseModel,
}

impl TwistAccelFactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        child_twist: Key,
        parent_accel: Key,
        child_accel: Key,
        angle: Key,
        velocity: Key,
        acceleration: Key,
        frames: JointFrames,
        sigma: f64,
    ) -> Self {
        TwistAccelFactor {
            keys: [child_twist, parent_accel, child_accel, angle, velocity, acceleration],
            frames,
            noise: NoiseModel::isotropic(6, sigma),
        }
    }
}

impl Factor for TwistAccelFactor {
    fn name(&self) -> &'static str {
        "twist_accel"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let v_c = values.vector6(self.keys[0])?;
        let a_p = values.vector6(self.keys[1])?;
        let a_c = values.vector6(self.keys[2])?;
        let q = values.scalar(self.keys[3])?;
        let q_dot = values.scalar(self.keys[4])?;
        let q_ddot = values.scalar(self.keys[5])?;
        let ad = adjoint_map(&self.frames.child_t_parent(q));
        let screw = self.frames.screw_child();
        let predicted = ad * a_p + lie_bracket_map(&v_c) * screw * q_dot + screw * q_ddot;
        Ok(vector(&(predicted - a_c)))
    }
}

/// Newton-Euler equation of a moving link:
/// `sum(F) + m R^T g - G A + ad(V)^T G V == 0`
#[derive(Debug, Clone)]
pub struct WrenchFactor {
    /// Pose, twist, acceleration, then one wrench per incident joint
    keys: Vec<Key>,
    inertia: Matrix6<f64>,
    mass: f64,
    gravity: Vector3<f64>,
    noise: NoiseModel,
}

impl WrenchFactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pose: Key,
        twist: Key,
        accel: Key,
        wrenches: &[Key],
        mass: f64,
        inertia: Matrix6<f64>,
        gravity: Vector3<f64>,
        sigma: f64,
    ) -> Self {
        let mut keys = vec![pose, twist, accel];
        keys.extend_from_slice(wrenches);
        WrenchFactor { keys, inertia, mass, gravity, noise: NoiseModel::isotropic(6, sigma) }
    }
}

impl Factor for WrenchFactor {
    fn name(&self) -> &'static str {
        "wrench"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let pose = values.pose(self.keys[0])?;
        let twist = values.vector6(self.keys[1])?;
        let accel = values.vector6(self.keys[2])?;
        let mut balance = gravity_wrench(self.mass, &pose, &self.gravity) - self.inertia * accel
            + lie_bracket_map(&twist).transpose() * self.inertia * twist;
        for key in &self.keys[3..] {
            balance += values.vector6(*key)?;
        }
        Ok(vector(&balance))
    }
}

/// Action and reaction through the joint: `Fp + Ad(cTp(q))^T Fc == 0`
#[derive(Debug, Clone)]
pub struct WrenchEquivalenceFactor {
    /// Wrench on parent, wrench on child, q
    keys: [Key; 3],
    frames: JointFrames,
    noise: NoiseModel,
}

impl WrenchEquivalenceFactor {
    pub fn new(parent_wrench: Key, child_wrench: Key, angle: Key, frames: JointFrames, sigma: f64) -> Self {
        WrenchEquivalenceFactor {
            keys: [parent_wrench, child_wrench, angle],
            frames,
            noise: NoiseModel::isotropic(6, sigma),
        }
    }
}

impl Factor for WrenchEquivalenceFactor {
    fn name(&self) -> &'static str {
        "wrench_equivalence"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let f_p = values.vector6(self.keys[0])?;
        let f_c = values.vector6(self.keys[1])?;
        let q = values.scalar(self.keys[2])?;
        let ad = adjoint_map(&self.frames.child_t_parent(q));
        Ok(vector(&(f_p + ad.transpose() * f_c)))
    }
}

/// Actuation is the projection of the child wrench on the joint screw: `Sc . Fc == tau`
#[derive(Debug, Clone)]
pub struct TorqueFactor {
    /// Wrench on child, torque
    keys: [Key; 2],
    screw: Vector6<f64>,
    noise: NoiseModel,
}

impl TorqueFactor {
    pub fn new(child_wrench: Key, torque: Key, frames: &JointFrames, sigma: f64) -> Self {
        TorqueFactor {
            keys: [child_wrench, torque],
            screw: *frames.screw_child(),
            noise: NoiseModel::isotropic(1, sigma),
        }
    }
}

impl Factor for TorqueFactor {
    fn name(&self) -> &'static str {
        "torque"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let wrench = values.vector6(self.keys[0])?;
        let torque = values.scalar(self.keys[1])?;
        Ok(DVector::from_element(1, self.screw.dot(&wrench) - torque))
    }

    fn jacobians(&self, _values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        let row = RowDVector::from_row_slice(self.screw.as_slice());
        Ok(vec![DMatrix::from_rows(&[row]), DMatrix::from_element(1, 1, -1.0)])
    }
}

/// Zeroes the wrench components that would move the child out of the plane orthogonal
/// to the planar axis.
#[derive(Debug, Clone)]
pub struct WrenchPlanarFactor {
    keys: [Key; 1],
    selector: [Vector6<f64>; 3],
    noise: NoiseModel,
}

impl WrenchPlanarFactor {
    pub fn new(child_wrench: Key, planar_axis: &Vector3<f64>, sigma: f64) -> Self {
        WrenchPlanarFactor {
            keys: [child_wrench],
            selector: planar_selector(planar_axis),
            noise: NoiseModel::isotropic(3, sigma),
        }
    }

    fn matrix(&self) -> DMatrix<f64> {
        let rows: Vec<RowDVector<f64>> = self
            .selector
            .iter()
            .map(|s| RowDVector::from_row_slice(s.as_slice()))
            .collect();
        DMatrix::from_rows(&rows)
    }
}

impl Factor for WrenchPlanarFactor {
    fn name(&self) -> &'static str {
        "wrench_planar"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let wrench = values.vector6(self.keys[0])?;
        Ok(DVector::from_iterator(3, self.selector.iter().map(|s| s.dot(&wrench))))
    }

    fn jacobians(&self, _values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        Ok(vec![self.matrix()])
    }
}

/// Hinge on a scalar joint quantity: zero inside `[lower, upper]`, the distance to the
/// violated bound outside.
#[derive(Debug, Clone)]
pub struct JointLimitFactor {
    keys: [Key; 1],
    lower: f64,
    upper: f64,
    noise: NoiseModel,
}

impl JointLimitFactor {
    pub fn new(key: Key, lower: f64, upper: f64, sigma: f64) -> Self {
        JointLimitFactor { keys: [key], lower, upper, noise: NoiseModel::isotropic(1, sigma) }
    }

    /// Limits symmetric around zero, as for velocities, accelerations and torques
    pub fn symmetric(key: Key, bound: f64, sigma: f64) -> Self {
        Self::new(key, -bound.abs(), bound.abs(), sigma)
    }
}

impl Factor for JointLimitFactor {
    fn name(&self) -> &'static str {
        "joint_limit"
    }

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    fn evaluate_error(&self, values: &Values) -> DynamicsResult<DVector<f64>> {
        let x = values.scalar(self.keys[0])?;
        let violation = if x < self.lower {
            x - self.lower
        } else if x > self.upper {
            x - self.upper
        } else {
            0.0
        };
        Ok(DVector::from_element(1, violation))
    }

    fn jacobians(&self, values: &Values) -> DynamicsResult<Vec<DMatrix<f64>>> {
        let x = values.scalar(self.keys[0])?;
        let slope = if x < self.lower || x > self.upper { 1.0 } else { 0.0 };
        Ok(vec![DMatrix::from_element(1, 1, slope)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{joint_angle_key, pose_key, torque_key, wrench_key};
    use crate::robot::{JointType, Robot};
    use nalgebra::{Isometry3, Matrix3};

    fn pendulum_frames() -> JointFrames {
        let mut robot = Robot::new();
        robot.add_link("base", 1.0, Matrix3::identity(), Isometry3::identity());
        robot.add_link("arm", 1.0, Matrix3::identity(), Isometry3::translation(0.0, 0.0, 2.0));
        robot
            .add_joint("j", JointType::Revolute, "base", "arm", Isometry3::translation(0.0, 0.0, 1.0), Vector3::x())
            .unwrap();
        robot.joint_frames(&robot.joints()[0]).unwrap()
    }

    #[test]
    fn test_pose_factor_zero_at_rest() {
        let frames = pendulum_frames();
        let factor = PoseFactor::new(pose_key(0, 0), pose_key(1, 0), joint_angle_key(0, 0), frames, 0.001);
        let mut values = Values::new();
        values.insert_pose(pose_key(0, 0), Isometry3::identity());
        values.insert_pose(pose_key(1, 0), Isometry3::translation(0.0, 0.0, 2.0));
        values.insert_scalar(joint_angle_key(0, 0), 0.0);
        assert!(factor.evaluate_error(&values).unwrap().norm() < 1e-12);

        values.insert_scalar(joint_angle_key(0, 0), 0.1);
        assert!(factor.evaluate_error(&values).unwrap().norm() > 0.05);
    }

    #[test]
    fn test_torque_jacobian_matches_numerical() {
        let frames = pendulum_frames();
        let factor = TorqueFactor::new(wrench_key(1, 0, 0), torque_key(0, 0), &frames, 0.001);
        let mut values = Values::new();
        values.insert_vector(wrench_key(1, 0, 0), Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
        values.insert_scalar(torque_key(0, 0), 0.5);
        let analytic = factor.jacobians(&values).unwrap();
        let numerical = crate::jacobian::numerical_jacobians(&factor, &values, 1e-6).unwrap();
        for (a, n) in analytic.iter().zip(numerical.iter()) {
            assert!((a - n).norm() < 1e-6);
        }
    }

    #[test]
    fn test_static_wrench_balance() {
        // Link hanging still under gravity needs an upward supporting force
        let key_pose = pose_key(1, 0);
        let factor = WrenchFactor::new(
            key_pose,
            crate::keys::twist_key(1, 0),
            crate::keys::twist_accel_key(1, 0),
            &[wrench_key(1, 0, 0)],
            2.0,
            crate::spatial::spatial_inertia(2.0, &Matrix3::identity()),
            Vector3::new(0.0, 0.0, -9.8),
            0.001,
        );
        let mut values = Values::new();
        values.insert_pose(key_pose, Isometry3::identity());
        values.insert_vector(crate::keys::twist_key(1, 0), Vector6::zeros());
        values.insert_vector(crate::keys::twist_accel_key(1, 0), Vector6::zeros());
        values.insert_vector(wrench_key(1, 0, 0), Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 19.6));
        assert!(factor.evaluate_error(&values).unwrap().norm() < 1e-12);
    }

    #[test]
    fn test_joint_limit_hinge() {
        let factor = JointLimitFactor::new(joint_angle_key(0, 0), -1.0, 1.0, 0.01);
        let mut values = Values::new();
        values.insert_scalar(joint_angle_key(0, 0), 0.5);
        assert_eq!(factor.evaluate_error(&values).unwrap()[0], 0.0);
        assert_eq!(factor.jacobians(&values).unwrap()[0][(0, 0)], 0.0);
        values.insert_scalar(joint_angle_key(0, 0), 1.5);
        assert!((factor.evaluate_error(&values).unwrap()[0] - 0.5).abs() < 1e-12);
        values.insert_scalar(joint_angle_key(0, 0), -3.0);
        assert!((factor.evaluate_error(&values).unwrap()[0] + 2.0).abs() < 1e-12);
    }
}
