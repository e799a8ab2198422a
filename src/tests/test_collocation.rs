#[cfg(test)]
mod tests {
    use nalgebra::{DVector, Vector3};

    use crate::collocation::CollocationScheme;
    use crate::dynamics_graph::DynamicsGraph;
    use crate::factor_graph::FactorGraph;
    use crate::factors::PriorFactor;
    use crate::keys::{joint_accel_key, joint_angle_key, joint_vel_key, phase_key};
    use crate::optimizer::{optimize, OptimizerParams};
    use crate::robot::Robot;
    use crate::robot_models::two_link_arm;
    use crate::values::Values;

    const TOLERANCE: f64 = 1e-5;

    fn assert_close(actual: f64, expected: f64, what: &str) {
        assert!((actual - expected).abs() < TOLERANCE, "{}: {} != {}", what, actual, expected);
    }

    /// Angle and velocity of the only joint of the arm at `t`
    fn state(values: &Values, t: usize) -> (f64, f64, f64) {
        (
            values.scalar(joint_angle_key(0, t)).unwrap(),
            values.scalar(joint_vel_key(0, t)).unwrap(),
            values.scalar(joint_accel_key(0, t)).unwrap(),
        )
    }

    /// q0 = v0 = a0 = 1 and a1 = 2
    fn boundary_priors() -> FactorGraph {
        let mut graph = FactorGraph::new();
        graph.add(PriorFactor::scalar(joint_angle_key(0, 0), 1.0, 0.001));
        graph.add(PriorFactor::scalar(joint_vel_key(0, 0), 1.0, 0.001));
        graph.add(PriorFactor::scalar(joint_accel_key(0, 0), 1.0, 0.001));
        graph.add(PriorFactor::scalar(joint_accel_key(0, 1), 2.0, 0.001));
        graph
    }

    fn solve_step(robot: &Robot, collocation: FactorGraph) -> Values {
        let mut graph = collocation;
        graph.add_graph(&boundary_priors());
        let init = DynamicsGraph::zero_values_trajectory(robot, 1, 1);
        optimize(&graph, &init, &OptimizerParams::default()).unwrap().values
    }

    #[test]
    fn test_fixed_step_collocation() {
        let robot = two_link_arm().unwrap();
        let builder = DynamicsGraph::default();
        for (scheme, q1, v1) in [(CollocationScheme::Euler, 2.0, 2.0), (CollocationScheme::Trapezoidal, 2.75, 2.5)] {
            let values = solve_step(&robot, builder.collocation_factors(&robot, 0, 1.0, scheme));
            let (q, v, _) = state(&values, 1);
            assert_close(q, q1, &format!("{} angle", scheme));
            assert_close(v, v1, &format!("{} velocity", scheme));
        }
    }

    #[test]
    fn test_phase_step_collocation() {
        let robot = two_link_arm().unwrap();
        let builder = DynamicsGraph::default();
        for (scheme, q1, v1) in [(CollocationScheme::Euler, 2.0, 2.0), (CollocationScheme::Trapezoidal, 2.75, 2.5)] {
            let mut graph = builder.multi_phase_collocation_factors(&robot, 0, 0, scheme);
            graph.add(builder.phase_duration_prior(0, 1.0));
            let values = solve_step(&robot, graph);
            let (q, v, _) = state(&values, 1);
            assert_close(q, q1, &format!("{} angle", scheme));
            assert_close(v, v1, &format!("{} velocity", scheme));
            assert_close(values.scalar(phase_key(0)).unwrap(), 1.0, "phase duration");
        }
    }

    fn torques() -> Vec<DVector<f64>> {
        vec![DVector::from_element(1, 1.0), DVector::from_element(1, 2.0), DVector::from_element(1, 3.0)]
    }

    #[test]
    fn test_trajectory() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let builder = DynamicsGraph::default();
        let gravity = Vector3::new(0.0, 0.0, -9.8);

        // (scheme, [q, v, a] at t = 1 and t = 2)
        let cases = [
            (CollocationScheme::Euler, [(0.0, 1.0, 2.0), (1.0, 3.0, 3.0)]),
            (CollocationScheme::Trapezoidal, [(0.75, 1.5, 2.0), (3.5, 4.0, 3.0)]),
        ];
        for (scheme, expected) in cases {
            let mut graph = builder.trajectory_fg(&robot, 2, 1.0, scheme, &gravity, Some(&Vector3::x()))?;
            graph.add_graph(&builder.trajectory_fd_priors(&robot, 2, &[0.0], &[0.0], &torques())?);

            let init = DynamicsGraph::zero_values_trajectory(&robot, 2, 0);
            let report = optimize(&graph, &init, &OptimizerParams::default())?;
            assert!(report.converged, "{} trajectory did not converge", scheme);
            for (t, (q, v, a)) in expected.iter().enumerate().map(|(i, e)| (i + 1, e)) {
                let actual = state(&report.values, t);
                assert_close(actual.0, *q, &format!("{} angle at {}", scheme, t));
                assert_close(actual.1, *v, &format!("{} velocity at {}", scheme, t));
                assert_close(actual.2, *a, &format!("{} acceleration at {}", scheme, t));
            }
        }
        Ok(())
    }

    #[test]
    fn test_multi_phase_trajectory() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let robots = vec![robot.clone(), robot.clone()];
        let builder = DynamicsGraph::default();
        let gravity = Vector3::new(0.0, 0.0, -9.8);
        let planar = Vector3::x();
        let phase_steps = [1, 1];

        let priors = {
            let mut priors = builder.trajectory_fd_priors(&robot, 2, &[0.0], &[0.0], &torques())?;
            priors.add(builder.phase_duration_prior(0, 1.0));
            priors.add(builder.phase_duration_prior(1, 2.0));
            priors
        };

        let mut euler =
            builder.multi_phase_trajectory_fg(&robots, &phase_steps, None, CollocationScheme::Euler, &gravity, Some(&planar))?;
        euler.add_graph(&priors);
        let init = DynamicsGraph::zero_values_trajectory(&robot, 2, 2);
        let euler_result = optimize(&euler, &init, &OptimizerParams::default())?.values;
        let expected = [(0.0, 0.0, 1.0), (0.0, 1.0, 2.0), (2.0, 5.0, 3.0)];
        for (t, (q, v, a)) in expected.iter().enumerate() {
            let actual = state(&euler_result, t);
            assert_close(actual.0, *q, &format!("euler angle at {}", t));
            assert_close(actual.1, *v, &format!("euler velocity at {}", t));
            assert_close(actual.2, *a, &format!("euler acceleration at {}", t));
        }

        // Explicit transition graphs give the same graph as the default ones
        let transitions = builder.transition_graphs(&robots, &phase_steps, &gravity, Some(&planar))?;
        let mut trapezoidal = builder.multi_phase_trajectory_fg(
            &robots,
            &phase_steps,
            Some(&transitions),
            CollocationScheme::Trapezoidal,
            &gravity,
            Some(&planar),
        )?;
        trapezoidal.add_graph(&priors);
        let trapezoidal_result = optimize(&trapezoidal, &euler_result, &OptimizerParams::default())?.values;
        let (q1, v1, _) = state(&trapezoidal_result, 1);
        let (q2, v2, _) = state(&trapezoidal_result, 2);
        assert_close(q1, 0.75, "trapezoidal angle at 1");
        assert_close(v1, 1.5, "trapezoidal velocity at 1");
        assert_close(q2, 8.75, "trapezoidal angle at 2");
        assert_close(v2, 6.5, "trapezoidal velocity at 2");
        Ok(())
    }

    #[test]
    fn test_multi_phase_graph_structure() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let robots = vec![robot.clone(), robot.clone(), robot.clone()];
        let builder = DynamicsGraph::default();
        let gravity = Vector3::zeros();
        let graph = builder.multi_phase_trajectory_fg(&robots, &[2, 1, 3], None, CollocationScheme::Euler, &gravity, None)?;

        let slice = builder.dynamics_factor_graph(&robot, 0, &gravity, None)?.len();
        let collocation = builder.collocation_factors(&robot, 0, 1.0, CollocationScheme::Euler).len();
        // 7 slices (two of them transitions) and 6 steps
        assert_eq!(graph.len(), 7 * slice + 6 * collocation);
        for phase in 0..3 {
            assert!(graph.keys().contains(&phase_key(phase)));
        }
        assert!(!graph.keys().contains(&phase_key(3)));
        Ok(())
    }
}
