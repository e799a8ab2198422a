//! Kinematic tree (or loop) of rigid links connected by one-degree-of-freedom joints.
//!
//! Links are described by their center-of-mass (COM) frame at rest, in world
//! coordinates. Joints are described by the joint frame at rest and the axis in that
//! frame. All dynamics variables of a link live in its COM frame.

use nalgebra::{Isometry3, Matrix3, Matrix6, Translation3, Unit, UnitQuaternion, Vector3, Vector6};

use crate::dynamics_error::{DynamicsError, DynamicsResult};
use crate::keys::MAX_ID;
use crate::spatial::{adjoint_map, prismatic_screw, revolute_screw, rotation_about, spatial_inertia};

#[derive(Debug, Clone)]
pub struct Link {
    pub id: usize,
    pub name: String,
    pub mass: f64,

    /// Rotational inertia about the COM, in the COM frame
    pub inertia: Matrix3<f64>,

    /// World pose of the COM frame at rest
    pub w_t_com: Isometry3<f64>,

    /// Fixed links are pinned to their rest pose and get no Newton-Euler factor
    pub fixed: bool,
}

impl Link {
    pub fn new(id: usize, name: &str, mass: f64, inertia: Matrix3<f64>, w_t_com: Isometry3<f64>) -> Self {
        Link {
            id,
            name: name.to_string(),
            mass,
            inertia,
            w_t_com,
            fixed: false,
        }
    }

    pub fn spatial_inertia(&self) -> Matrix6<f64> {
        spatial_inertia(self.mass, &self.inertia)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    Revolute,
    Prismatic,
}

/// Limits of the joint. Angles in radians (or meters for prismatic joints).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLimits {
    pub lower: f64,
    pub upper: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub torque: f64,
}

#[derive(Debug, Clone)]
pub struct Joint {
    pub id: usize,
    pub name: String,
    pub joint_type: JointType,
    pub parent: usize,
    pub child: usize,

    /// World pose of the joint frame at rest (q = 0)
    pub w_t_joint: Isometry3<f64>,

    /// Motion axis in the joint frame
    pub axis: Unit<Vector3<f64>>,
    pub limits: Option<JointLimits>,
}

impl Joint {
    /// The link on the other side of the joint, None if `link` is not attached to it.
    pub fn other_link(&self, link: usize) -> Option<usize> {
        if link == self.parent {
            Some(self.child)
        } else if link == self.child {
            Some(self.parent)
        } else {
            None
        }
    }
}

/// Geometry of a joint relative to the COM frames of its parent and child links.
/// This is a plain value, so factors can own a copy of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointFrames {
    pub joint_type: JointType,
    p_t_j: Isometry3<f64>,
    j_t_c: Isometry3<f64>,
    axis: Unit<Vector3<f64>>,
    screw_child: Vector6<f64>,
    screw_parent: Vector6<f64>,
}

impl JointFrames {
    pub fn new(
        joint_type: JointType,
        w_t_parent: &Isometry3<f64>,
        w_t_joint: &Isometry3<f64>,
        w_t_child: &Isometry3<f64>,
        axis: Unit<Vector3<f64>>,
    ) -> Self {
        let p_t_j = w_t_parent.inverse() * w_t_joint;
        let j_t_c = w_t_joint.inverse() * w_t_child;
        let screw = match joint_type {
            JointType::Revolute => revolute_screw(&axis),
            JointType::Prismatic => prismatic_screw(&axis),
        };
        JointFrames {
            joint_type,
            p_t_j,
            j_t_c,
            axis,
            screw_child: adjoint_map(&j_t_c.inverse()) * screw,
            screw_parent: adjoint_map(&p_t_j) * screw,
        }
    }

    fn motion(&self, q: f64) -> Isometry3<f64> {
        match self.joint_type {
            JointType::Revolute => rotation_about(&self.axis, q),
            JointType::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis.into_inner() * q),
                UnitQuaternion::identity(),
            ),
        }
    }

    /// Pose of the child COM frame in the parent COM frame at joint coordinate q
    pub fn parent_t_child(&self, q: f64) -> Isometry3<f64> {
        self.p_t_j * self.motion(q) * self.j_t_c
    }

    pub fn child_t_parent(&self, q: f64) -> Isometry3<f64> {
        self.parent_t_child(q).inverse()
    }

    /// Joint screw axis in the child COM frame (constant for any q)
    pub fn screw_child(&self) -> &Vector6<f64> {
        &self.screw_child
    }

    /// Joint screw axis in the parent COM frame at q = 0
    pub fn screw_parent(&self) -> &Vector6<f64> {
        &self.screw_parent
    }
}

/// Robot built from links and joints with explicit ids. The order in which links and
/// joints are stored does not matter for anything computed from the robot.
#[derive(Debug, Clone, Default)]
pub struct Robot {
    links: Vec<Link>,
    joints: Vec<Joint>,
}

impl Robot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Robot from prepared links and joints. Ids must be unique and joints must refer to
    /// existing links.
    pub fn from_parts(links: Vec<Link>, joints: Vec<Joint>) -> DynamicsResult<Self> {
        let robot = Robot { links, joints };
        robot.validate()?;
        Ok(robot)
    }

    fn validate(&self) -> DynamicsResult<()> {
        for (i, link) in self.links.iter().enumerate() {
            if link.id > MAX_ID {
                return Err(DynamicsError::InvalidRobot(format!("link id {} is too large", link.id)));
            }
            if self.links[..i].iter().any(|other| other.id == link.id) {
                return Err(DynamicsError::InvalidRobot(format!("duplicate link id {}", link.id)));
            }
        }
        for (i, joint) in self.joints.iter().enumerate() {
            if joint.id > MAX_ID {
                return Err(DynamicsError::InvalidRobot(format!("joint id {} is too large", joint.id)));
            }
            if self.joints[..i].iter().any(|other| other.id == joint.id) {
                return Err(DynamicsError::InvalidRobot(format!("duplicate joint id {}", joint.id)));
            }
            if joint.parent == joint.child {
                return Err(DynamicsError::InvalidRobot(format!(
                    "joint {} connects link {} to itself", joint.name, joint.parent
                )));
            }
            for link in [joint.parent, joint.child] {
                if self.link(link).is_none() {
                    return Err(DynamicsError::UnknownLink(format!("{} (joint {})", link, joint.name)));
                }
            }
        }
        Ok(())
    }

    /// Adds the link with the next free id, returning the id
    pub fn add_link(&mut self, name: &str, mass: f64, inertia: Matrix3<f64>, w_t_com: Isometry3<f64>) -> usize {
        let id = self.links.iter().map(|l| l.id + 1).max().unwrap_or(0);
        self.links.push(Link::new(id, name, mass, inertia, w_t_com));
        id
    }

    /// Adds the joint between two named links with the next free id, returning the id
    pub fn add_joint(
        &mut self,
        name: &str,
        joint_type: JointType,
        parent: &str,
        child: &str,
        w_t_joint: Isometry3<f64>,
        axis: Vector3<f64>,
    ) -> DynamicsResult<usize> {
        let parent = self.link_by_name(parent)?.id;
        let child = self.link_by_name(child)?.id;
        if parent == child {
            return Err(DynamicsError::InvalidRobot(format!("joint {} connects a link to itself", name)));
        }
        let id = self.joints.iter().map(|j| j.id + 1).max().unwrap_or(0);
        self.joints.push(Joint {
            id,
            name: name.to_string(),
            joint_type,
            parent,
            child,
            w_t_joint,
            axis: Unit::new_normalize(axis),
            limits: None,
        });
        Ok(id)
    }

    pub fn set_joint_limits(&mut self, name: &str, limits: JointLimits) -> DynamicsResult<()> {
        let joint = self
            .joints
            .iter_mut()
            .find(|j| j.name == name)
            .ok_or_else(|| DynamicsError::UnknownJoint(name.to_string()))?;
        joint.limits = Some(limits);
        Ok(())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    pub fn link(&self, id: usize) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    pub fn joint(&self, id: usize) -> Option<&Joint> {
        self.joints.iter().find(|j| j.id == id)
    }

    pub fn link_by_name(&self, name: &str) -> DynamicsResult<&Link> {
        self.links
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| DynamicsError::UnknownLink(name.to_string()))
    }

    pub fn joint_by_name(&self, name: &str) -> DynamicsResult<&Joint> {
        self.joints
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| DynamicsError::UnknownJoint(name.to_string()))
    }

    /// Pins the link to its rest pose
    pub fn fix_link(&mut self, name: &str) -> DynamicsResult<()> {
        self.set_fixed(name, true)
    }

    pub fn unfix_link(&mut self, name: &str) -> DynamicsResult<()> {
        self.set_fixed(name, false)
    }

    fn set_fixed(&mut self, name: &str, fixed: bool) -> DynamicsResult<()> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| DynamicsError::UnknownLink(name.to_string()))?;
        link.fixed = fixed;
        Ok(())
    }

    /// Joints attached to the link, as parent or as child
    pub fn joints_of_link(&self, link: usize) -> impl Iterator<Item = &Joint> {
        self.joints
            .iter()
            .filter(move |j| j.parent == link || j.child == link)
    }

    pub fn joint_frames(&self, joint: &Joint) -> DynamicsResult<JointFrames> {
        let parent = self
            .link(joint.parent)
            .ok_or_else(|| DynamicsError::UnknownLink(joint.parent.to_string()))?;
        let child = self
            .link(joint.child)
            .ok_or_else(|| DynamicsError::UnknownLink(joint.child.to_string()))?;
        Ok(JointFrames::new(
            joint.joint_type,
            &parent.w_t_com,
            &joint.w_t_joint,
            &child.w_t_com,
            joint.axis,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::adjoint_map;

    const EPSILON: f64 = 1e-12;

    fn pendulum() -> Robot {
        let mut robot = Robot::new();
        robot.add_link("base", 1.0, Matrix3::identity(), Isometry3::translation(0.0, 0.0, 0.0));
        robot.add_link("arm", 1.0, Matrix3::identity(), Isometry3::translation(0.0, 0.0, 2.0));
        robot
            .add_joint("j", JointType::Revolute, "base", "arm", Isometry3::translation(0.0, 0.0, 1.0), Vector3::x())
            .unwrap();
        robot
    }

    #[test]
    fn test_rest_transform() {
        let robot = pendulum();
        let frames = robot.joint_frames(&robot.joints()[0]).unwrap();
        let p_t_c = frames.parent_t_child(0.0);
        assert!((p_t_c.translation.vector - Vector3::new(0.0, 0.0, 2.0)).norm() < EPSILON);
    }

    #[test]
    fn test_quarter_turn_moves_child() {
        let robot = pendulum();
        let frames = robot.joint_frames(&robot.joints()[0]).unwrap();
        // Rotating +90° about x takes the arm, 1 m above the joint, to -y
        let p_t_c = frames.parent_t_child(std::f64::consts::FRAC_PI_2);
        let expected = Vector3::new(0.0, -1.0, 1.0);
        assert!((p_t_c.translation.vector - expected).norm() < 1e-9);
    }

    #[test]
    fn test_screw_axes_agree_at_rest() {
        let robot = pendulum();
        let frames = robot.joint_frames(&robot.joints()[0]).unwrap();
        let transported = adjoint_map(&frames.parent_t_child(0.0)) * frames.screw_child();
        assert!((transported - frames.screw_parent()).norm() < EPSILON);
        // Arm COM is 1 m above the axis, so it moves along -y when the joint turns
        assert!((frames.screw_child()[4] + 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_validation() {
        let link = Link::new(0, "a", 1.0, Matrix3::identity(), Isometry3::identity());
        let duplicate = Link::new(0, "b", 1.0, Matrix3::identity(), Isometry3::identity());
        assert!(matches!(
            Robot::from_parts(vec![link.clone(), duplicate], vec![]),
            Err(DynamicsError::InvalidRobot(_))
        ));

        let mut robot = pendulum();
        assert!(robot.fix_link("base").is_ok());
        assert!(robot.link_by_name("base").unwrap().fixed);
        assert!(matches!(robot.fix_link("nothing"), Err(DynamicsError::UnknownLink(_))));
    }
}
