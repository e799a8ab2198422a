//! Spatial (6D) algebra used by the dynamics factors.
//!
//! Motion and force vectors are laid out as `[angular; linear]`:
//! ```text
//! twist  V = [ω_x, ω_y, ω_z, v_x, v_y, v_z]
//! wrench F = [m_x, m_y, m_z, f_x, f_y, f_z]
//! ```

use nalgebra::{Isometry3, Matrix3, Matrix6, Rotation3, Translation3, Unit, Vector3, Vector6};

/// Skew-symmetric matrix so that `skew(a) * b == a.cross(&b)`
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Adjoint map of `T = aTb`, transforming twists from frame b to frame a:
/// `V_a = Ad(aTb) V_b`. Wrenches go the other way: `F_b = Ad(aTb)^T F_a`.
pub fn adjoint_map(pose: &Isometry3<f64>) -> Matrix6<f64> {
    let rotation = pose.rotation.to_rotation_matrix().into_inner();
    let translation = pose.translation.vector;
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&(skew(&translation) * rotation));
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&rotation);
    ad
}

/// Lie bracket matrix: `ad(V) W = [V, W]`
pub fn lie_bracket_map(twist: &Vector6<f64>) -> Matrix6<f64> {
    let omega = skew(&twist.fixed_rows::<3>(0).into_owned());
    let linear = skew(&twist.fixed_rows::<3>(3).into_owned());
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&omega);
    ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&linear);
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&omega);
    ad
}

/// Spatial inertia in the COM frame: `diag(I, m * 1)`
pub fn spatial_inertia(mass: f64, inertia: &Matrix3<f64>) -> Matrix6<f64> {
    let mut g = Matrix6::zeros();
    g.fixed_view_mut::<3, 3>(0, 0).copy_from(inertia);
    g.fixed_view_mut::<3, 3>(3, 3).copy_from(&(Matrix3::identity() * mass));
    g
}

/// Wrench of gravity acting on the COM, expressed in the COM frame of the link at `pose`.
pub fn gravity_wrench(mass: f64, pose: &Isometry3<f64>, gravity: &Vector3<f64>) -> Vector6<f64> {
    let force = pose.rotation.inverse() * (gravity * mass);
    Vector6::new(0.0, 0.0, 0.0, force.x, force.y, force.z)
}

/// Unit twist of a joint expressed in the joint frame
pub fn revolute_screw(axis: &Unit<Vector3<f64>>) -> Vector6<f64> {
    Vector6::new(axis.x, axis.y, axis.z, 0.0, 0.0, 0.0)
}

pub fn prismatic_screw(axis: &Unit<Vector3<f64>>) -> Vector6<f64> {
    Vector6::new(0.0, 0.0, 0.0, axis.x, axis.y, axis.z)
}

/// Rows selecting the wrench components that must vanish for motion in the plane
/// orthogonal to `axis`: the two moments about in-plane directions and the force
/// along the axis.
pub fn planar_selector(axis: &Vector3<f64>) -> [Vector6<f64>; 3] {
    let n = axis.normalize();
    // Pick the basis vector least aligned with the normal to build the in-plane pair
    let helper = if n.x.abs() <= n.y.abs() && n.x.abs() <= n.z.abs() {
        Vector3::x()
    } else if n.y.abs() <= n.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let u = n.cross(&helper).normalize();
    let w = n.cross(&u);
    [
        Vector6::new(u.x, u.y, u.z, 0.0, 0.0, 0.0),
        Vector6::new(w.x, w.y, w.z, 0.0, 0.0, 0.0),
        Vector6::new(0.0, 0.0, 0.0, n.x, n.y, n.z),
    ]
}

/// Rotation about `axis` by `angle`, as an isometry with no translation
pub fn rotation_about(axis: &Unit<Vector3<f64>>, angle: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::identity(),
        Rotation3::from_axis_angle(axis, angle).into(),
    )
}
