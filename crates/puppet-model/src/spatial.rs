//! Small geometry helpers shared by the model back-ends.

use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, UnitVector3, Vector3, Vector6};

/// Build a rotation matrix from roll-pitch-yaw (extrinsic X-Y-Z, the URDF
/// convention).
#[must_use]
pub fn rotation_from_rpy(roll: f64, pitch: f64, yaw: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(roll, pitch, yaw)
}

/// Convert a URDF origin (xyz + rpy) to an isometry.
#[must_use]
pub fn origin_to_isometry(origin: &puppet_urdf::Origin) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(origin.xyz[0], origin.xyz[1], origin.xyz[2]),
        rotation_from_rpy(origin.rpy[0], origin.rpy[1], origin.rpy[2]),
    )
}

/// Transform for a single-DoF joint at the given position.
#[must_use]
pub fn joint_transform(axis: &UnitVector3<f64>, prismatic: bool, position: f64) -> Isometry3<f64> {
    if prismatic {
        Isometry3::from_parts(
            Translation3::from(axis.into_inner() * position),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(axis, position),
        )
    }
}

/// Decompose a rotation into intrinsic X-Y-Z Euler angles `(rx, ry, rz)`
/// such that `R = Rx(rx) * Ry(ry) * Rz(rz)`.
///
/// This is the decomposition matched by the chained `rot_x`, `rot_y`,
/// `rot_z` virtual floating-base joints. Near the gimbal singularity
/// (`|ry| = π/2`) the split between `rx` and `rz` is conventional
/// (`rx = 0`).
#[must_use]
pub fn euler_xyz_from_rotation(rotation: &UnitQuaternion<f64>) -> (f64, f64, f64) {
    let m = rotation.to_rotation_matrix();
    let m = m.matrix();
    // R = Rx*Ry*Rz has m[(0,2)] = sin(ry).
    let sy = m[(0, 2)].clamp(-1.0, 1.0);
    let ry = sy.asin();
    if sy.abs() > 1.0 - 1e-9 {
        // Gimbal lock: only the sum/difference of rx and rz is observable.
        let rz = m[(1, 0)].atan2(m[(1, 1)]);
        (0.0, ry, rz)
    } else {
        let rx = (-m[(1, 2)]).atan2(m[(2, 2)]);
        let rz = (-m[(0, 1)]).atan2(m[(0, 0)]);
        (rx, ry, rz)
    }
}

/// Mapping matrix `E` with `ω_world = E · (ṙx, ṙy, ṙz)` for the intrinsic
/// X-Y-Z Euler chain.
#[must_use]
pub fn euler_xyz_rate_matrix(rx: f64, ry: f64) -> Matrix3<f64> {
    let rx_rot = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), rx);
    let ry_rot = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), ry);
    let col0 = Vector3::x();
    let col1 = rx_rot * Vector3::y();
    let col2 = rx_rot * (ry_rot * Vector3::z());
    Matrix3::from_columns(&[col0, col1, col2])
}

/// Transform a twist given in the `tip` frame into the `root` frame, given
/// the pose of `tip` in `root`. Component ordering is `(linear, angular)`.
#[must_use]
pub fn twist_to_root(pose_root_tip: &Isometry3<f64>, twist_tip: &Vector6<f64>) -> Vector6<f64> {
    let linear = Vector3::new(twist_tip[0], twist_tip[1], twist_tip[2]);
    let angular = Vector3::new(twist_tip[3], twist_tip[4], twist_tip[5]);
    let r = pose_root_tip.rotation;
    let p = pose_root_tip.translation.vector;
    let angular_root = r * angular;
    let linear_root = r * linear + p.cross(&angular_root);
    Vector6::new(
        linear_root.x,
        linear_root.y,
        linear_root.z,
        angular_root.x,
        angular_root.y,
        angular_root.z,
    )
}

/// Inertia tensor from the URDF `[ixx, ixy, ixz, iyy, iyz, izz]` layout.
#[must_use]
pub fn inertia_tensor(values: &[f64; 6]) -> Matrix3<f64> {
    Matrix3::new(
        values[0], values[1], values[2], //
        values[1], values[3], values[4], //
        values[2], values[4], values[5],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
