//! The robot model abstraction shared by all scenes.
//!
//! A [`RobotModel`] answers kinematics and dynamics queries against the most
//! recent `update`. Scenes hold the model as `&dyn RobotModel` per tick and
//! never know which back-end they are talking to; the back-end advertises
//! what it can do through [`ModelCapabilities`].

use nalgebra::{DMatrix, DVector, Vector3, Vector6};

use puppet_core::types::{ActiveContacts, JointLimits, JointState, RigidBodyStateSE3};

use crate::error::ModelError;
use crate::spatial::{euler_xyz_from_rotation, euler_xyz_rate_matrix};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Which back-end family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    /// Serial spanning tree, full analytic kinematics and dynamics.
    SerialTree,
    /// Parallel submechanism description reduced into actuation space.
    ParallelSubmechanism,
}

/// Capability set of a model back-end.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    pub variant: ModelVariant,
    /// FK, Jacobians, CoM.
    pub kinematics: bool,
    /// Inertia matrix and bias forces.
    pub dynamics: bool,
    /// Jacobian time derivative.
    pub jacobian_dot: bool,
}

// ---------------------------------------------------------------------------
// RobotModel
// ---------------------------------------------------------------------------

/// Uniform interface over a floating-base, possibly parallel articulated
/// body.
///
/// All queries fail with `StateError::NotUpdated` until the first successful
/// [`RobotModel::update`]. Matrix row ordering is `(linear_xyz,
/// angular_xyz)` everywhere; Jacobians are full-width (`6 × n_joints`) with
/// zero columns for joints off the queried chain.
pub trait RobotModel {
    /// Feed a measured joint state (and, for floating-base models, the
    /// floating-base estimate) into the model and recompute all cached
    /// per-tick quantities.
    fn update(
        &mut self,
        joint_state: &JointState,
        floating_base: Option<&RigidBodyStateSE3>,
    ) -> Result<(), ModelError>;

    /// The model-internal joint state, in canonical joint order.
    fn joint_state(&self) -> Result<&JointState, ModelError>;

    /// Pose, twist and acceleration of `tip` expressed in `root`.
    fn rigid_body_state(&self, root: &str, tip: &str) -> Result<RigidBodyStateSE3, ModelError>;

    /// Space Jacobian of `tip` with respect to `root`.
    fn space_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError>;

    /// Body Jacobian of `tip` with respect to `root` (same reference point,
    /// expressed in the tip frame).
    fn body_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError>;

    /// Time derivative of the space Jacobian.
    fn jacobian_dot(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError>;

    /// The `J̇·q̇` term for the chain `root → tip`.
    fn spatial_acceleration_bias(&self, root: &str, tip: &str) -> Result<Vector6<f64>, ModelError>;

    /// Joint-space inertia matrix (`n × n`).
    fn joint_space_inertia_matrix(&self) -> Result<&DMatrix<f64>, ModelError>;

    /// Bias forces: Coriolis, centrifugal and gravity terms (`n`).
    fn bias_forces(&self) -> Result<&DVector<f64>, ModelError>;

    /// Selection matrix mapping full joint torques to actuated ones
    /// (`n_a × n`).
    fn selection_matrix(&self) -> &DMatrix<f64>;

    /// Center-of-mass state in the base frame.
    fn com_state(&self) -> Result<RigidBodyStateSE3, ModelError>;

    /// Center-of-mass Jacobian (`3 × n`) in the base frame.
    fn com_jacobian(&self) -> Result<DMatrix<f64>, ModelError>;

    /// Joint limits of the actuated joints.
    fn joint_limits(&self) -> &JointLimits;

    /// The configured contact points and their activation flags.
    fn active_contacts(&self) -> &ActiveContacts;

    /// Replace the contact activation flags. Names must match the configured
    /// contact points.
    fn set_active_contacts(&mut self, contacts: ActiveContacts) -> Result<(), ModelError>;

    /// Canonical joint names (floating-base joints first, when present).
    fn joint_names(&self) -> &[String];

    /// Actuated joint names.
    fn actuated_joint_names(&self) -> &[String];

    /// Index of a joint in the canonical ordering.
    fn joint_index(&self, name: &str) -> Result<usize, ModelError>;

    /// Total number of joints, including the virtual floating-base ones.
    fn n_joints(&self) -> usize;

    /// Number of actuated joints.
    fn n_actuated_joints(&self) -> usize;

    /// Number of virtual floating-base joints (six or zero).
    fn n_floating_base_joints(&self) -> usize;

    /// Name of the world frame (the tree root; equals the base frame for
    /// fixed-base models).
    fn world_frame(&self) -> &str;

    /// Name of the robot base frame (the URDF root link).
    fn base_frame(&self) -> &str;

    fn has_link(&self, name: &str) -> bool;
    fn has_joint(&self, name: &str) -> bool;
    fn has_actuated_joint(&self, name: &str) -> bool;

    /// What this back-end can do.
    fn capabilities(&self) -> ModelCapabilities;
}

// ---------------------------------------------------------------------------
// Floating-base helper
// ---------------------------------------------------------------------------

/// Convert a floating-base state into the six virtual joint coordinates
/// `(trans_x, trans_y, trans_z, rot_x, rot_y, rot_z)`.
///
/// Rotational rates are recovered through the Euler-rate mapping; the
/// Euler-rate coupling term is neglected for accelerations, which is exact
/// whenever the angular velocity is zero.
pub fn floating_base_coordinates(
    state: &RigidBodyStateSE3,
) -> Result<([f64; 6], [f64; 6], [f64; 6]), ModelError> {
    if !state.has_valid_pose() {
        return Err(puppet_core::error::StateError::NonFinite("floating base pose").into());
    }

    let t = state.pose.translation.vector;
    let (rx, ry, rz) = euler_xyz_from_rotation(&state.pose.rotation);
    let positions = [t.x, t.y, t.z, rx, ry, rz];

    let rate_map = euler_xyz_rate_matrix(rx, ry);
    let inv = rate_map.try_inverse().ok_or(ModelError::State(
        puppet_core::error::StateError::NonFinite("floating base Euler rates (gimbal lock)"),
    ))?;

    let euler_rates = inv * state.angular_velocity;
    let velocities = [
        state.linear_velocity.x,
        state.linear_velocity.y,
        state.linear_velocity.z,
        euler_rates.x,
        euler_rates.y,
        euler_rates.z,
    ];

    let euler_accels = inv * state.angular_acceleration;
    let accelerations = [
        state.linear_acceleration.x,
        state.linear_acceleration.y,
        state.linear_acceleration.z,
        euler_accels.x,
        euler_accels.y,
        euler_accels.z,
    ];

    Ok((positions, velocities, accelerations))
}

/// Reconstruct the world-frame angular velocity from virtual joint rates.
#[must_use]
pub fn floating_base_angular_velocity(rx: f64, ry: f64, rates: &Vector3<f64>) -> Vector3<f64> {
    euler_xyz_rate_matrix(rx, ry) * rates
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion};

    #[test]
    fn floating_base_coordinates_identity() {
        let state = RigidBodyStateSE3::default();
        let (pos, vel, acc) = floating_base_coordinates(&state).unwrap();
        assert_eq!(pos, [0.0; 6]);
        assert_eq!(vel, [0.0; 6]);
        assert_eq!(acc, [0.0; 6]);
    }

    #[test]
    fn floating_base_coordinates_translation_and_yaw() {
        let mut state = RigidBodyStateSE3::default();
        state.pose = Isometry3::from_parts(
            Translation3::new(1.0, -2.0, 0.5),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4),
        );
        let (pos, _, _) = floating_base_coordinates(&state).unwrap();
        assert_relative_eq!(pos[0], 1.0);
        assert_relative_eq!(pos[1], -2.0);
        assert_relative_eq!(pos[2], 0.5);
        assert_relative_eq!(pos[3], 0.0, epsilon = 1e-12);
        assert_relative_eq!(pos[4], 0.0, epsilon = 1e-12);
        assert_relative_eq!(pos[5], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn floating_base_rates_roundtrip() {
        let mut state = RigidBodyStateSE3::default();
        state.pose = Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3)
                * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.5),
        );
        state.angular_velocity = Vector3::new(0.2, -0.1, 0.7);
        let (pos, vel, _) = floating_base_coordinates(&state).unwrap();
        let recovered = floating_base_angular_velocity(
            pos[3],
            pos[4],
            &Vector3::new(vel[3], vel[4], vel[5]),
        );
        assert_relative_eq!(recovered, state.angular_velocity, epsilon = 1e-10);
    }

    #[test]
    fn floating_base_invalid_pose_rejected() {
        let mut state = RigidBodyStateSE3::default();
        state.pose.translation.vector.x = f64::NAN;
        assert!(floating_base_coordinates(&state).is_err());
    }
}
