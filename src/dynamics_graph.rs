//! Assembles the factor graphs of robot dynamics: a single time slice, collocation
//! between slices, whole trajectories and multi-phase trajectories, plus the priors and
//! initial values that go with them.
//!
//! Joint values passed in or returned as vectors are ordered by ascending joint id.

use std::sync::Arc;

use bitflags::bitflags;
use nalgebra::{DVector, Isometry3, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::collocation::{CollocationFactor, CollocationScheme, TimeStep};
use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::dynamics_factors::{
    JointLimitFactor, PoseFactor, TorqueFactor, TwistAccelFactor, TwistFactor, WrenchEquivalenceFactor,
    WrenchFactor, WrenchPlanarFactor,
};
use crate::factor_graph::FactorGraph;
use crate::factors::{Factor, PriorFactor};
use crate::keys::{
    joint_accel_key, joint_angle_key, joint_vel_key, phase_key, pose_key, torque_key, twist_accel_key,
    twist_key, wrench_key, Key, Variable,
};
use crate::robot::{Joint, JointFrames, Link, Robot};
use crate::settings::DynamicsSettings;
use crate::values::{Value, Values};

bitflags! {
    /// Groups of factors emitted for a time slice
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FactorGroups: u8 {
        /// Link poses from joint angles
        const POSES =    0b0000_0001;
        /// Link twists from joint velocities
        const TWISTS =   0b0000_0010;
        /// Link accelerations from joint accelerations
        const ACCELS =   0b0000_0100;
        /// Newton-Euler, wrench equivalence, torque and planar factors
        const DYNAMICS = 0b0000_1000;
    }
}

impl Default for FactorGroups {
    fn default() -> Self {
        FactorGroups::all()
    }
}

/// Builder of dynamics factor graphs. Holds only the noise settings, so one builder can
/// serve any number of robots and threads.
#[derive(Debug, Clone, Default)]
pub struct DynamicsGraph {
    settings: DynamicsSettings,
    groups: FactorGroups,
}

type Factors = Vec<Arc<dyn Factor>>;

fn shared<F: Factor + 'static>(factor: F) -> Arc<dyn Factor> {
    Arc::new(factor)
}

/// Joints sorted by id
fn sorted_joints(robot: &Robot) -> Vec<&Joint> {
    let mut joints: Vec<&Joint> = robot.joints().iter().collect();
    joints.sort_by_key(|j| j.id);
    joints
}

fn check_joint_values(robot: &Robot, name: &str, values: &[f64]) -> DynamicsResult<()> {
    if values.len() != robot.num_joints() {
        return Err(DynamicsError::InvalidRobot(format!(
            "{} {} given for {} joints",
            values.len(),
            name,
            robot.num_joints()
        )));
    }
    Ok(())
}

impl DynamicsGraph {
    pub fn new(settings: DynamicsSettings) -> Self {
        DynamicsGraph { settings, groups: FactorGroups::all() }
    }

    /// Builder that emits only the given factor groups for a slice
    pub fn with_groups(mut self, groups: FactorGroups) -> Self {
        self.groups = groups;
        self
    }

    pub fn settings(&self) -> &DynamicsSettings {
        &self.settings
    }

    pub fn groups(&self) -> FactorGroups {
        self.groups
    }

    /// Builds factors of every joint in parallel, keeping the joint order of the robot
    fn per_joint<F>(robot: &Robot, build: F) -> DynamicsResult<FactorGraph>
    where
        F: Fn(&Joint, JointFrames) -> Factors + Sync + Send,
    {
        let factors: Vec<Factors> = robot
            .joints()
            .par_iter()
            .map(|joint| Ok(build(joint, robot.joint_frames(joint)?)))
            .collect::<DynamicsResult<_>>()?;
        Ok(factors.into_iter().flatten().collect())
    }

    fn fixed_links(robot: &Robot) -> impl Iterator<Item = &Link> {
        robot.links().iter().filter(|l| l.fixed)
    }

    /// Pose factors of all joints, and rest pose priors of fixed links
    pub fn q_factors(&self, robot: &Robot, t: usize) -> DynamicsResult<FactorGraph> {
        let sigma = self.settings.pose_sigma;
        let mut graph = Self::per_joint(robot, |joint, frames| {
            vec![shared(PoseFactor::new(
                pose_key(joint.parent, t),
                pose_key(joint.child, t),
                joint_angle_key(joint.id, t),
                frames,
                sigma,
            ))]
        })?;
        for link in Self::fixed_links(robot) {
            graph.add(PriorFactor::new(
                pose_key(link.id, t),
                Value::Pose(link.w_t_com),
                self.settings.pose_prior_sigma,
            ));
        }
        Ok(graph)
    }

    /// Twist factors of all joints, and zero twist priors of fixed links
    pub fn v_factors(&self, robot: &Robot, t: usize) -> DynamicsResult<FactorGraph> {
        let sigma = self.settings.twist_sigma;
        let mut graph = Self::per_joint(robot, |joint, frames| {
            vec![shared(TwistFactor::new(
                twist_key(joint.parent, t),
                twist_key(joint.child, t),
                joint_angle_key(joint.id, t),
                joint_vel_key(joint.id, t),
                frames,
                sigma,
            ))]
        })?;
        for link in Self::fixed_links(robot) {
            graph.add(PriorFactor::new(
                twist_key(link.id, t),
                Value::Vector(Vector6::zeros()),
                self.settings.twist_prior_sigma,
            ));
        }
        Ok(graph)
    }

    /// Twist acceleration factors of all joints, and zero acceleration priors of fixed links
    pub fn a_factors(&self, robot: &Robot, t: usize) -> DynamicsResult<FactorGraph> {
        let sigma = self.settings.accel_sigma;
        let mut graph = Self::per_joint(robot, |joint, frames| {
            vec![shared(TwistAccelFactor::new(
                twist_key(joint.child, t),
                twist_accel_key(joint.parent, t),
                twist_accel_key(joint.child, t),
                joint_angle_key(joint.id, t),
                joint_vel_key(joint.id, t),
                joint_accel_key(joint.id, t),
                frames,
                sigma,
            ))]
        })?;
        for link in Self::fixed_links(robot) {
            graph.add(PriorFactor::new(
                twist_accel_key(link.id, t),
                Value::Vector(Vector6::zeros()),
                self.settings.accel_prior_sigma,
            ));
        }
        Ok(graph)
    }

    /// Newton-Euler factor of every moving link; wrench equivalence and torque factors of
    /// every joint; with a planar axis, planar factors on the child wrench of every joint.
    ///
    /// The planar axis is not checked against the robot: a robot that cannot move in the
    /// plane produces a graph that fails to solve.
    pub fn dynamics_factors(
        &self,
        robot: &Robot,
        t: usize,
        gravity: &Vector3<f64>,
        planar_axis: Option<&Vector3<f64>>,
    ) -> DynamicsResult<FactorGraph> {
        let settings = &self.settings;
        let link_factors: Factors = robot
            .links()
            .par_iter()
            .filter(|link| !link.fixed)
            .map(|link| {
                let wrenches: Vec<Key> = robot
                    .joints_of_link(link.id)
                    .map(|joint| wrench_key(link.id, joint.id, t))
                    .collect();
                shared(WrenchFactor::new(
                    pose_key(link.id, t),
                    twist_key(link.id, t),
                    twist_accel_key(link.id, t),
                    &wrenches,
                    link.mass,
                    link.spatial_inertia(),
                    *gravity,
                    settings.wrench_sigma,
                ))
            })
            .collect();

        let mut graph: FactorGraph = link_factors.into_iter().collect();
        graph.add_graph(&Self::per_joint(robot, |joint, frames| {
            let parent_wrench = wrench_key(joint.parent, joint.id, t);
            let child_wrench = wrench_key(joint.child, joint.id, t);
            let mut factors = vec![
                shared(WrenchEquivalenceFactor::new(
                    parent_wrench,
                    child_wrench,
                    joint_angle_key(joint.id, t),
                    frames,
                    settings.wrench_equivalence_sigma,
                )),
                shared(TorqueFactor::new(child_wrench, torque_key(joint.id, t), &frames, settings.torque_sigma)),
            ];
            if let Some(axis) = planar_axis {
                factors.push(shared(WrenchPlanarFactor::new(child_wrench, axis, settings.planar_sigma)));
            }
            factors
        })?);
        Ok(graph)
    }

    /// All factors of one time slice, as selected by the factor groups of this builder
    pub fn dynamics_factor_graph(
        &self,
        robot: &Robot,
        t: usize,
        gravity: &Vector3<f64>,
        planar_axis: Option<&Vector3<f64>>,
    ) -> DynamicsResult<FactorGraph> {
        let mut graph = FactorGraph::new();
        if self.groups.contains(FactorGroups::POSES) {
            graph.add_graph(&self.q_factors(robot, t)?);
        }
        if self.groups.contains(FactorGroups::TWISTS) {
            graph.add_graph(&self.v_factors(robot, t)?);
        }
        if self.groups.contains(FactorGroups::ACCELS) {
            graph.add_graph(&self.a_factors(robot, t)?);
        }
        if self.groups.contains(FactorGroups::DYNAMICS) {
            graph.add_graph(&self.dynamics_factors(robot, t, gravity, planar_axis)?);
        }
        debug!("Slice {}: {} factors", t, graph.len());
        Ok(graph)
    }

    fn collocation(&self, robot: &Robot, t: usize, step: TimeStep, scheme: CollocationScheme) -> FactorGraph {
        let mut graph = FactorGraph::new();
        for joint in sorted_joints(robot) {
            let j = joint.id;
            graph.add(CollocationFactor::new(
                joint_angle_key(j, t),
                joint_angle_key(j, t + 1),
                joint_vel_key(j, t),
                joint_vel_key(j, t + 1),
                step,
                scheme,
                self.settings.angle_collocation_sigma,
            ));
            graph.add(CollocationFactor::new(
                joint_vel_key(j, t),
                joint_vel_key(j, t + 1),
                joint_accel_key(j, t),
                joint_accel_key(j, t + 1),
                step,
                scheme,
                self.settings.velocity_collocation_sigma,
            ));
        }
        graph
    }

    /// Angle and velocity integration of every joint from `t` to `t + 1` over a known `dt`
    pub fn collocation_factors(&self, robot: &Robot, t: usize, dt: f64, scheme: CollocationScheme) -> FactorGraph {
        self.collocation(robot, t, TimeStep::Fixed(dt), scheme)
    }

    /// Like [`DynamicsGraph::collocation_factors`], with the step being the duration
    /// variable of the phase
    pub fn multi_phase_collocation_factors(
        &self,
        robot: &Robot,
        t: usize,
        phase: usize,
        scheme: CollocationScheme,
    ) -> FactorGraph {
        self.collocation(robot, t, TimeStep::Phase(phase_key(phase)), scheme)
    }

    /// Slices `0..=num_steps` joined by collocation with a constant step
    pub fn trajectory_fg(
        &self,
        robot: &Robot,
        num_steps: usize,
        dt: f64,
        scheme: CollocationScheme,
        gravity: &Vector3<f64>,
        planar_axis: Option<&Vector3<f64>>,
    ) -> DynamicsResult<FactorGraph> {
        let slices: Vec<FactorGraph> = (0..=num_steps)
            .into_par_iter()
            .map(|t| self.dynamics_factor_graph(robot, t, gravity, planar_axis))
            .collect::<DynamicsResult<_>>()?;

        let mut graph = FactorGraph::new();
        for slice in &slices {
            graph.add_graph(slice);
        }
        for t in 0..num_steps {
            graph.add_graph(&self.collocation_factors(robot, t, dt, scheme));
        }
        info!("Trajectory of {} steps: {} factors", num_steps, graph.len());
        Ok(graph)
    }

    /// Time indices of the phase boundaries: the first slice of every phase but the first
    pub fn boundary_times(phase_steps: &[usize]) -> Vec<usize> {
        phase_steps
            .iter()
            .scan(0, |t, steps| {
                *t += steps;
                Some(*t)
            })
            .take(phase_steps.len().saturating_sub(1))
            .collect()
    }

    /// Transition graphs at the phase boundaries, each being the slice of the robot of
    /// the phase that is entered
    pub fn transition_graphs(
        &self,
        robots: &[Robot],
        phase_steps: &[usize],
        gravity: &Vector3<f64>,
        planar_axis: Option<&Vector3<f64>>,
    ) -> DynamicsResult<Vec<FactorGraph>> {
        Self::check_phases(robots, phase_steps)?;
        Self::boundary_times(phase_steps)
            .into_par_iter()
            .enumerate()
            .map(|(i, t)| self.dynamics_factor_graph(&robots[i + 1], t, gravity, planar_axis))
            .collect()
    }

    fn check_phases(robots: &[Robot], phase_steps: &[usize]) -> DynamicsResult<()> {
        if phase_steps.is_empty() {
            return Err(DynamicsError::InvalidTrajectory("no phases given".into()));
        }
        if robots.len() != phase_steps.len() {
            return Err(DynamicsError::InvalidTrajectory(format!(
                "{} robots given for {} phases",
                robots.len(),
                phase_steps.len()
            )));
        }
        if let Some(phase) = phase_steps.iter().position(|steps| *steps == 0) {
            return Err(DynamicsError::InvalidTrajectory(format!("phase {} has no steps", phase)));
        }
        Ok(())
    }

    /// Trajectory over phases of variable duration. Phase `p` spans `phase_steps[p]` steps
    /// of robot `robots[p]` with step `P(p)`. At every boundary, the given transition graph
    /// is used, or, if none are given, the slice of the robot of the entered phase.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_phase_trajectory_fg(
        &self,
        robots: &[Robot],
        phase_steps: &[usize],
        transition_graphs: Option<&[FactorGraph]>,
        scheme: CollocationScheme,
        gravity: &Vector3<f64>,
        planar_axis: Option<&Vector3<f64>>,
    ) -> DynamicsResult<FactorGraph> {
        Self::check_phases(robots, phase_steps)?;
        let num_phases = phase_steps.len();
        let transitions = match transition_graphs {
            Some(graphs) if graphs.len() != num_phases - 1 => {
                return Err(DynamicsError::InvalidTrajectory(format!(
                    "{} transition graphs given for {} phases",
                    graphs.len(),
                    num_phases
                )));
            }
            Some(graphs) => graphs.to_vec(),
            None => self.transition_graphs(robots, phase_steps, gravity, planar_axis)?,
        };

        // Slices strictly inside a phase, plus the very first and the very last slice
        let mut slices: Vec<(usize, usize)> = vec![(0, 0)];
        let mut t = 0;
        for (phase, steps) in phase_steps.iter().enumerate() {
            slices.extend((t + 1..t + steps).map(|inner| (phase, inner)));
            t += steps;
        }
        slices.push((num_phases - 1, t));

        let slice_graphs: Vec<FactorGraph> = slices
            .par_iter()
            .map(|(phase, t)| self.dynamics_factor_graph(&robots[*phase], *t, gravity, planar_axis))
            .collect::<DynamicsResult<_>>()?;

        let mut graph = FactorGraph::new();
        for slice in &slice_graphs {
            graph.add_graph(slice);
        }
        for transition in &transitions {
            graph.add_graph(transition);
        }
        let mut t = 0;
        for (phase, steps) in phase_steps.iter().enumerate() {
            for _ in 0..*steps {
                graph.add_graph(&self.multi_phase_collocation_factors(&robots[phase], t, phase, scheme));
                t += 1;
            }
        }
        info!("Trajectory of {} phases, {} steps: {} factors", num_phases, t, graph.len());
        Ok(graph)
    }

    /// Priors on joint angles, velocities and torques of a slice
    pub fn forward_dynamics_priors(
        &self,
        robot: &Robot,
        t: usize,
        angles: &[f64],
        velocities: &[f64],
        torques: &[f64],
    ) -> DynamicsResult<FactorGraph> {
        check_joint_values(robot, "angles", angles)?;
        check_joint_values(robot, "velocities", velocities)?;
        check_joint_values(robot, "torques", torques)?;
        let mut graph = FactorGraph::new();
        for (i, joint) in sorted_joints(robot).into_iter().enumerate() {
            let j = joint.id;
            graph.add(PriorFactor::scalar(joint_angle_key(j, t), angles[i], self.settings.angle_prior_sigma));
            graph.add(PriorFactor::scalar(joint_vel_key(j, t), velocities[i], self.settings.velocity_prior_sigma));
            graph.add(PriorFactor::scalar(torque_key(j, t), torques[i], self.settings.torque_prior_sigma));
        }
        Ok(graph)
    }

    /// Priors on joint angles, velocities and accelerations of a slice, leaving the
    /// torques to be solved for
    pub fn inverse_dynamics_priors(
        &self,
        robot: &Robot,
        t: usize,
        angles: &[f64],
        velocities: &[f64],
        accels: &[f64],
    ) -> DynamicsResult<FactorGraph> {
        check_joint_values(robot, "angles", angles)?;
        check_joint_values(robot, "velocities", velocities)?;
        check_joint_values(robot, "accelerations", accels)?;
        let mut graph = FactorGraph::new();
        for (i, joint) in sorted_joints(robot).into_iter().enumerate() {
            let j = joint.id;
            graph.add(PriorFactor::scalar(joint_angle_key(j, t), angles[i], self.settings.angle_prior_sigma));
            graph.add(PriorFactor::scalar(joint_vel_key(j, t), velocities[i], self.settings.velocity_prior_sigma));
            graph.add(PriorFactor::scalar(joint_accel_key(j, t), accels[i], self.settings.joint_accel_prior_sigma));
        }
        Ok(graph)
    }

    /// Initial angles and velocities at `t = 0` and torques at every slice
    pub fn trajectory_fd_priors(
        &self,
        robot: &Robot,
        num_steps: usize,
        angles: &[f64],
        velocities: &[f64],
        torques: &[DVector<f64>],
    ) -> DynamicsResult<FactorGraph> {
        if torques.len() != num_steps + 1 {
            return Err(DynamicsError::InvalidTrajectory(format!(
                "{} torque vectors given for {} slices",
                torques.len(),
                num_steps + 1
            )));
        }
        check_joint_values(robot, "angles", angles)?;
        check_joint_values(robot, "velocities", velocities)?;
        let joints = sorted_joints(robot);
        let mut graph = FactorGraph::new();
        for (i, joint) in joints.iter().enumerate() {
            graph.add(PriorFactor::scalar(joint_angle_key(joint.id, 0), angles[i], self.settings.angle_prior_sigma));
            graph.add(PriorFactor::scalar(joint_vel_key(joint.id, 0), velocities[i], self.settings.velocity_prior_sigma));
        }
        for (t, tau) in torques.iter().enumerate() {
            check_joint_values(robot, "torques", tau.as_slice())?;
            for (i, joint) in joints.iter().enumerate() {
                graph.add(PriorFactor::scalar(torque_key(joint.id, t), tau[i], self.settings.torque_prior_sigma));
            }
        }
        Ok(graph)
    }

    pub fn phase_duration_prior(&self, phase: usize, dt: f64) -> PriorFactor {
        PriorFactor::scalar(phase_key(phase), dt, self.settings.time_sigma)
    }

    /// Hinge factors keeping angle, velocity, acceleration and torque of every joint with
    /// limits inside them
    pub fn joint_limit_factors(&self, robot: &Robot, t: usize) -> FactorGraph {
        let sigma = self.settings.joint_limit_sigma;
        let mut graph = FactorGraph::new();
        for joint in sorted_joints(robot) {
            let Some(limits) = joint.limits else {
                continue;
            };
            let j = joint.id;
            graph.add(JointLimitFactor::new(joint_angle_key(j, t), limits.lower, limits.upper, sigma));
            graph.add(JointLimitFactor::symmetric(joint_vel_key(j, t), limits.velocity, sigma));
            graph.add(JointLimitFactor::symmetric(joint_accel_key(j, t), limits.acceleration, sigma));
            graph.add(JointLimitFactor::symmetric(torque_key(j, t), limits.torque, sigma));
        }
        graph
    }

    /// Default value of a robot quantity: rest pose for link poses, zero otherwise
    fn default_value(robot: &Robot, variable: &Variable) -> Value {
        match variable {
            Variable::Pose { link, .. } => {
                Value::Pose(robot.link(*link).map(|l| l.w_t_com).unwrap_or_else(Isometry3::identity))
            }
            Variable::Twist { .. } | Variable::TwistAccel { .. } | Variable::Wrench { .. } => {
                Value::Vector(Vector6::zeros())
            }
            Variable::Torque { .. }
            | Variable::JointAngle { .. }
            | Variable::JointVel { .. }
            | Variable::JointAccel { .. }
            | Variable::PhaseDuration { .. } => Value::Scalar(0.0),
        }
    }

    /// Every variable of a slice: link poses at rest, all other quantities zero
    pub fn zero_values(robot: &Robot, t: usize) -> Values {
        let mut values = Values::new();
        for link in robot.links() {
            values.insert_pose(pose_key(link.id, t), link.w_t_com);
            values.insert_vector(twist_key(link.id, t), Vector6::zeros());
            values.insert_vector(twist_accel_key(link.id, t), Vector6::zeros());
        }
        for joint in robot.joints() {
            let j = joint.id;
            values.insert_vector(wrench_key(joint.parent, j, t), Vector6::zeros());
            values.insert_vector(wrench_key(joint.child, j, t), Vector6::zeros());
            values.insert_scalar(torque_key(j, t), 0.0);
            values.insert_scalar(joint_angle_key(j, t), 0.0);
            values.insert_scalar(joint_vel_key(j, t), 0.0);
            values.insert_scalar(joint_accel_key(j, t), 0.0);
        }
        values
    }

    /// Zero values of slices `0..=num_steps` and zero durations of `num_phases` phases
    pub fn zero_values_trajectory(robot: &Robot, num_steps: usize, num_phases: usize) -> Values {
        let mut values = Values::new();
        for t in 0..=num_steps {
            values.update_all(&Self::zero_values(robot, t));
        }
        for phase in 0..num_phases {
            values.insert_scalar(phase_key(phase), 0.0);
        }
        values
    }

    /// Default values of exactly the variables the graph touches. Every key of the graph
    /// must be a robot quantity.
    pub fn zero_values_for_graph(robot: &Robot, graph: &FactorGraph) -> DynamicsResult<Values> {
        let mut values = Values::new();
        for key in graph.keys() {
            let variable = key.variable().ok_or(DynamicsError::InvalidVariableReference(key))?;
            values.insert(key, Self::default_value(robot, &variable));
        }
        Ok(values)
    }

    /// Zero values of a slice with every coordinate perturbed uniformly in
    /// `[-sigma, sigma]`. The same seed gives the same values.
    pub fn zero_values_with_noise(robot: &Robot, t: usize, sigma: f64, seed: u64) -> Values {
        let mut rng = StdRng::seed_from_u64(seed);
        let zero = Self::zero_values(robot, t);
        let mut values = Values::new();
        for (key, value) in zero.iter() {
            let delta: Vec<f64> = if sigma > 0.0 {
                (0..value.dim()).map(|_| rng.gen_range(-sigma..=sigma)).collect()
            } else {
                vec![0.0; value.dim()]
            };
            values.insert(*key, value.retract(&delta));
        }
        values
    }

    /// Joint accelerations of a slice, ordered by joint id
    pub fn joint_accels(robot: &Robot, values: &Values, t: usize) -> DynamicsResult<DVector<f64>> {
        let accels = sorted_joints(robot)
            .iter()
            .map(|joint| values.scalar(joint_accel_key(joint.id, t)))
            .collect::<DynamicsResult<Vec<f64>>>()?;
        Ok(DVector::from_vec(accels))
    }
}
