//! Hardcoded robots, used as fixtures and as examples of building a robot

use nalgebra::{Isometry3, Matrix3, Vector3};

use crate::dynamics_error::DynamicsResult;
use crate::robot::{JointType, Robot};

/// Base link `l1` and arm link `l2`, joined by the revolute joint `j1` about x.
/// The joint passes through the COM of `l2` (mass 1, unit inertia), so gravity exerts no
/// torque on it and the joint acceleration equals the applied torque. `l1` is fixed.
pub fn two_link_arm() -> DynamicsResult<Robot> {
    let mut robot = Robot::new();
    robot.add_link("l1", 1.0, Matrix3::identity(), Isometry3::translation(0.0, 0.0, 1.0));
    robot.add_link("l2", 1.0, Matrix3::identity(), Isometry3::translation(0.0, 0.0, 2.0));
    robot.add_joint(
        "j1",
        JointType::Revolute,
        "l1",
        "l2",
        Isometry3::translation(0.0, 0.0, 2.0),
        Vector3::x(),
    )?;
    robot.fix_link("l1")?;
    Ok(robot)
}

/// Closed loop of four 2 m links in the y-z plane, all joints revolute about x:
/// ```text
///  D (0,0,2) --l3-- C (0,2,2)
///     |               |
///    l4              l2
///     |               |
///  A (0,0,0) --l1-- B (0,2,0)
/// ```
/// Joints `j1` at B (l1 -> l2), `j2` at C (l2 -> l3), `j3` at D (l3 -> l4) and `j4` at A
/// (l4 -> l1). Links have mass 1 and unit inertia. No link is fixed.
pub fn four_bar_linkage() -> DynamicsResult<Robot> {
    let mut robot = Robot::new();
    let inertia = Matrix3::identity();
    robot.add_link("l1", 1.0, inertia, Isometry3::translation(0.0, 1.0, 0.0));
    robot.add_link("l2", 1.0, inertia, Isometry3::translation(0.0, 2.0, 1.0));
    robot.add_link("l3", 1.0, inertia, Isometry3::translation(0.0, 1.0, 2.0));
    robot.add_link("l4", 1.0, inertia, Isometry3::translation(0.0, 0.0, 1.0));

    let joints = [
        ("j1", "l1", "l2", Vector3::new(0.0, 2.0, 0.0)),
        ("j2", "l2", "l3", Vector3::new(0.0, 2.0, 2.0)),
        ("j3", "l3", "l4", Vector3::new(0.0, 0.0, 2.0)),
        ("j4", "l4", "l1", Vector3::new(0.0, 0.0, 0.0)),
    ];
    for (name, parent, child, at) in joints {
        robot.add_joint(
            name,
            JointType::Revolute,
            parent,
            child,
            Isometry3::translation(at.x, at.y, at.z),
            Vector3::x(),
        )?;
    }
    Ok(robot)
}
