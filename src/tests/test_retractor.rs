#[cfg(test)]
mod tests {
    use crate::constraints::EqualityConstraints;
    use crate::dynamics_graph::DynamicsGraph;
    use crate::keys::{joint_angle_key, pose_key, twist_key};
    use crate::retractor::{retract, retract_components, RetractParams, RetractorKind};
    use crate::robot_models::two_link_arm;

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn test_retract_noisy_kinematics() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let graph = DynamicsGraph::default().q_factors(&robot, 0)?;
        let constraints = EqualityConstraints::from_graph(&graph, TOLERANCE);
        let components = constraints.connected_components();
        assert_eq!(components.len(), 1);

        let noisy = DynamicsGraph::zero_values_with_noise(&robot, 0, 0.1, 3);
        assert!(!constraints.compliant(&noisy)?);

        for kind in [RetractorKind::Uopt, RetractorKind::Proj] {
            let retraction = retract(&components[0], &kind, &noisy, &RetractParams::default())?;
            assert!(retraction.converged, "{:?} did not converge", kind);
            assert!(constraints.compliant(&retraction.values)?);
            // Only variables of the component change
            assert_eq!(retraction.values.vector6(twist_key(1, 0))?, noisy.vector6(twist_key(1, 0))?);
            assert_eq!(retraction.values.len(), noisy.len());
        }
        Ok(())
    }

    #[test]
    fn test_basis_keeps_joint_angle() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let graph = DynamicsGraph::default().q_factors(&robot, 0)?;
        let constraints = EqualityConstraints::from_graph(&graph, TOLERANCE);
        let components = constraints.connected_components();

        let noisy = DynamicsGraph::zero_values_with_noise(&robot, 0, 0.1, 5);
        let q = joint_angle_key(0, 0);
        let retracted = retract(&components[0], &RetractorKind::Basis(vec![q]), &noisy, &RetractParams::default())?
            .into_result()?;
        assert_eq!(retracted.scalar(q)?, noisy.scalar(q)?);
        assert!(constraints.compliant(&retracted)?);
        // Base pinned back to rest
        let base = retracted.pose(pose_key(0, 0))?;
        assert!((base.translation.vector - robot.links()[0].w_t_com.translation.vector).norm() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_retract_trajectory_slices() -> anyhow::Result<()> {
        let robot = two_link_arm()?;
        let builder = DynamicsGraph::default();
        let mut graph = builder.q_factors(&robot, 0)?;
        graph.add_graph(&builder.q_factors(&robot, 1)?);
        let constraints = EqualityConstraints::from_graph(&graph, TOLERANCE);
        let components = constraints.connected_components();
        assert_eq!(components.len(), 2);

        let mut noisy = DynamicsGraph::zero_values_with_noise(&robot, 0, 0.05, 11);
        noisy.update_all(&DynamicsGraph::zero_values_with_noise(&robot, 1, 0.05, 12));
        let merged = retract_components(&components, &RetractorKind::Proj, &noisy, &RetractParams::default())?;
        assert!(merged.converged);
        assert!(merged.max_violation <= TOLERANCE);
        assert!(constraints.compliant(&merged.values)?);
        Ok(())
    }
}
