//! Helper functions

use crate::dynamics_error::DynamicsResult;
use crate::keys::{joint_accel_key, joint_angle_key, joint_vel_key, torque_key};
use crate::robot::Robot;
use crate::values::{Value, Values};

/// Formats angle, velocity, acceleration and torque of every joint at `t`, one joint per line,
/// in ascending joint id.
pub fn format_joint_values(robot: &Robot, values: &Values, t: usize) -> DynamicsResult<String> {
    let mut joints: Vec<_> = robot.joints().iter().collect();
    joints.sort_by_key(|j| j.id);
    let mut text = String::new();
    for joint in joints {
        let j = joint.id;
        text.push_str(&format!(
            "{:>8}: q {:9.4} v {:9.4} a {:9.4} T {:9.4}\n",
            joint.name,
            values.scalar(joint_angle_key(j, t))?,
            values.scalar(joint_vel_key(j, t))?,
            values.scalar(joint_accel_key(j, t))?,
            values.scalar(torque_key(j, t))?,
        ));
    }
    Ok(text)
}

/// Print joint values of a slice.
#[allow(dead_code)]
pub fn dump_joint_values(robot: &Robot, values: &Values, t: usize) {
    match format_joint_values(robot, values, t) {
        Ok(text) => print!("{}", text),
        Err(e) => println!("Incomplete slice {}: {}", t, e),
    }
}

/// Print all values, one key per line.
#[allow(dead_code)]
pub fn dump_values(values: &Values) {
    if values.is_empty() {
        println!("No values");
    }
    for (key, value) in values.iter() {
        match value {
            Value::Scalar(x) => println!("{}: {:.4}", key, x),
            Value::Vector(v) => println!("{}: {:.4?}", key, v.as_slice()),
            Value::Pose(p) => {
                let (roll, pitch, yaw) = p.rotation.euler_angles();
                let t = p.translation.vector;
                println!(
                    "{}: [{:.4}, {:.4}, {:.4}] rpy [{:.2}, {:.2}, {:.2}]",
                    key,
                    t.x,
                    t.y,
                    t.z,
                    roll.to_degrees(),
                    pitch.to_degrees(),
                    yaw.to_degrees()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics_graph::DynamicsGraph;
    use crate::robot_models::two_link_arm;

    #[test]
    fn test_format_joint_values() {
        let robot = two_link_arm().unwrap();
        let mut values = DynamicsGraph::zero_values(&robot, 0);
        values.insert_scalar(torque_key(0, 0), 1.5);
        let text = format_joint_values(&robot, &values, 0).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("j1"));
        assert!(text.contains("1.5000"));
        assert!(format_joint_values(&robot, &values, 1).is_err());
        dump_values(&values);
    }
}
