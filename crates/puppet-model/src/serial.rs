//! Serial-tree robot model back-end.
//!
//! Builds a [`KinematicTree`] from a URDF description (optionally with a
//! virtual floating-base linkage injected under the root) and answers every
//! model query analytically: forward kinematics, space/body Jacobians and
//! their time derivative, joint-space inertia, bias forces and
//! center-of-mass quantities.

use nalgebra::{DMatrix, DVector, Isometry3, Vector3, Vector6};
use tracing::debug;

use puppet_core::config::{RobotModelConfig, FLOATING_BASE_JOINT_NAMES};
use puppet_core::error::{ConfigError, StateError};
use puppet_core::types::{
    ActiveContacts, JointLimitRange, JointLimits, JointState, RigidBodyStateSE3,
};

use crate::error::ModelError;
use crate::model::{
    floating_base_coordinates, ModelCapabilities, ModelVariant, RobotModel,
};
use crate::tree::{KinematicTree, LinkAcceleration, LinkVelocity};

/// Serial-tree robot model.
pub struct SerialTreeModel {
    tree: KinematicTree,
    joint_names: Vec<String>,
    actuated_joint_names: Vec<String>,
    joint_limits: JointLimits,
    selection: DMatrix<f64>,
    n_floating: usize,
    world_frame: String,
    base_frame: String,
    contacts: ActiveContacts,
    gravity: Vector3<f64>,

    // Per-tick state, filled by `update`.
    state: JointState,
    q: DVector<f64>,
    qd: DVector<f64>,
    qdd: DVector<f64>,
    poses: Vec<Isometry3<f64>>,
    vels: Vec<LinkVelocity>,
    accs: Vec<LinkAcceleration>,
    inertia: DMatrix<f64>,
    bias: DVector<f64>,
    com: RigidBodyStateSE3,
    updated: bool,
}

impl SerialTreeModel {
    /// Configure from a URDF file on disk.
    pub fn configure(config: &RobotModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let description = puppet_urdf::parse_file(&config.file)?;
        Self::from_description(config, description)
    }

    /// Configure from an already parsed robot description.
    pub fn from_description(
        config: &RobotModelConfig,
        mut description: puppet_urdf::UrdfModel,
    ) -> Result<Self, ModelError> {
        config.validate()?;

        let base_frame = description.root_link.clone();
        description.apply_joint_blacklist(&config.joint_blacklist);

        let n_floating = if config.floating_base { 6 } else { 0 };
        if config.floating_base {
            description
                .inject_floating_base(&config.world_frame_id, &FLOATING_BASE_JOINT_NAMES)?;
        }
        let world_frame = description.root_link.clone();

        // Canonical joint ordering: floating-base joints first, then either
        // the configured ordering or the deterministic tree order.
        let joint_names = resolve_joint_order(config, &description, n_floating)?;
        let tree = KinematicTree::from_urdf(&description, &joint_names)?;

        let actuated_joint_names = if config.actuated_joint_names.is_empty() {
            joint_names[n_floating..].to_vec()
        } else {
            config.actuated_joint_names.clone()
        };
        for name in &actuated_joint_names {
            if !joint_names[n_floating..].contains(name) {
                return Err(ConfigError::ActuatedJointNotInJoints(name.clone()).into());
            }
        }

        for contact in &config.contact_points {
            if tree.link_index(contact).is_none() {
                return Err(ConfigError::ContactPointNotALink(contact.clone()).into());
            }
        }

        let joint_limits = JointLimits {
            names: actuated_joint_names.clone(),
            elements: actuated_joint_names
                .iter()
                .map(|name| {
                    let limits = description.joint(name).map(|j| j.limits).unwrap_or_default();
                    JointLimitRange {
                        lower: limits.lower,
                        upper: limits.upper,
                        velocity: limits.velocity,
                        effort: limits.effort,
                    }
                })
                .collect(),
        };

        let n = joint_names.len();
        let mut selection = DMatrix::zeros(actuated_joint_names.len(), n);
        for (row, name) in actuated_joint_names.iter().enumerate() {
            let col = joint_names.iter().position(|j| j == name).unwrap();
            selection[(row, col)] = 1.0;
        }

        let mut q = DVector::zeros(n);
        if config.floating_base {
            let (pos, _, _) = floating_base_coordinates(&config.floating_base_state)?;
            for (i, value) in pos.iter().enumerate() {
                q[i] = *value;
            }
        }

        let n_links = tree.links().len();
        debug!(
            n_joints = n,
            n_actuated = actuated_joint_names.len(),
            floating_base = config.floating_base,
            "configured serial-tree model"
        );
        Ok(Self {
            tree,
            joint_names: joint_names.clone(),
            actuated_joint_names,
            joint_limits,
            selection,
            n_floating,
            world_frame,
            base_frame,
            contacts: ActiveContacts::all_active(&config.contact_points),
            gravity: Vector3::new(0.0, 0.0, -9.81),
            state: JointState::zeros(&joint_names, puppet_core::TimeStamp::null()),
            q,
            qd: DVector::zeros(n),
            qdd: DVector::zeros(n),
            poses: vec![Isometry3::identity(); n_links],
            vels: vec![(Vector3::zeros(), Vector3::zeros()); n_links],
            accs: vec![(Vector3::zeros(), Vector3::zeros()); n_links],
            inertia: DMatrix::zeros(n, n),
            bias: DVector::zeros(n),
            com: RigidBodyStateSE3::default(),
            updated: false,
        })
    }

    fn ensure_updated(&self) -> Result<(), ModelError> {
        if self.updated {
            Ok(())
        } else {
            Err(StateError::NotUpdated.into())
        }
    }

    fn link(&self, name: &str) -> Result<usize, ModelError> {
        self.tree
            .link_index(name)
            .ok_or_else(|| ModelError::UnknownFrame(name.into()))
    }
}

/// Resolve the canonical joint ordering for a description.
fn resolve_joint_order(
    config: &RobotModelConfig,
    description: &puppet_urdf::UrdfModel,
    n_floating: usize,
) -> Result<Vec<String>, ModelError> {
    let order = if config.joint_names.is_empty() {
        // Tree order already lists the injected floating-base joints first
        // because they sit above everything else.
        description.joint_names_in_tree_order()
    } else {
        let mut order: Vec<String> = FLOATING_BASE_JOINT_NAMES[..n_floating]
            .iter()
            .map(|s| (*s).into())
            .collect();
        for name in &config.joint_names {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    };

    // Every moving joint of the description must be covered.
    if order.len() != description.dof() {
        return Err(ConfigError::InvalidValue {
            field: "joint_names".into(),
            message: format!(
                "ordering covers {} joints but the model has {} degrees of freedom",
                order.len(),
                description.dof()
            ),
        }
        .into());
    }
    Ok(order)
}

impl RobotModel for SerialTreeModel {
    fn update(
        &mut self,
        joint_state: &JointState,
        floating_base: Option<&RigidBodyStateSE3>,
    ) -> Result<(), ModelError> {
        joint_state.validate()?;
        if !self.state.time.is_null() && joint_state.time < self.state.time {
            return Err(StateError::NonMonotoneTimestamp.into());
        }

        // Floating-base coordinates go into the first six slots.
        if self.n_floating > 0 {
            if let Some(fb) = floating_base {
                let (pos, vel, acc) = floating_base_coordinates(fb)?;
                for i in 0..6 {
                    self.q[i] = pos[i];
                    self.qd[i] = vel[i];
                    self.qdd[i] = acc[i];
                }
            }
        }

        // Measured joints, matched by name.
        for i in self.n_floating..self.joint_names.len() {
            let name = &self.joint_names[i];
            let element = joint_state
                .element(name)
                .ok_or_else(|| ModelError::UnknownJoint(name.clone()))?;
            self.q[i] = element.position;
            self.qd[i] = element.speed;
            self.qdd[i] = element.acceleration;
            self.state.elements[i] = *element;
        }
        for i in 0..self.n_floating {
            self.state.elements[i].position = self.q[i];
            self.state.elements[i].speed = self.qd[i];
            self.state.elements[i].acceleration = self.qdd[i];
        }
        self.state.time = joint_state.time;

        // Kinematics passes.
        self.poses = self.tree.forward_kinematics(&self.q);
        self.vels = self.tree.link_velocities(&self.poses, &self.qd);
        self.accs =
            self.tree
                .link_accelerations(&self.poses, &self.vels, &self.qd, &self.qdd, Vector3::zeros());

        // Dynamics.
        self.inertia = self.tree.inertia_matrix(&self.poses);
        let zero = DVector::zeros(self.q.len());
        self.bias = self.tree.rnea(&self.poses, &self.qd, &zero, self.gravity);

        // Center of mass.
        let (_, com_pos) = self.tree.com_position(&self.poses);
        let (com_vel, com_acc) = self.tree.com_motion(&self.poses, &self.vels, &self.accs);
        self.com = RigidBodyStateSE3 {
            frame_id: self.world_frame.clone(),
            pose: Isometry3::translation(com_pos.x, com_pos.y, com_pos.z),
            linear_velocity: com_vel,
            angular_velocity: Vector3::zeros(),
            linear_acceleration: com_acc,
            angular_acceleration: Vector3::zeros(),
            time: self.state.time,
        };

        self.updated = true;
        Ok(())
    }

    fn joint_state(&self) -> Result<&JointState, ModelError> {
        self.ensure_updated()?;
        Ok(&self.state)
    }

    fn rigid_body_state(&self, root: &str, tip: &str) -> Result<RigidBodyStateSE3, ModelError> {
        self.ensure_updated()?;
        let r = self.link(root)?;
        let t = self.link(tip)?;

        let pose = self.poses[r].inverse() * self.poses[t];
        let rot_r_t = self.poses[r].rotation.inverse();

        let (v_r, w_r) = self.vels[r];
        let (v_t, w_t) = self.vels[t];
        let (a_r, al_r) = self.accs[r];
        let (a_t, al_t) = self.accs[t];
        let arm = self.poses[t].translation.vector - self.poses[r].translation.vector;

        let v_rel_w = v_t - v_r - w_r.cross(&arm);
        let w_rel_w = w_t - w_r;
        let a_rel_w = a_t
            - a_r
            - al_r.cross(&arm)
            - w_r.cross(&w_r.cross(&arm))
            - 2.0 * w_r.cross(&v_rel_w);
        let al_rel_w = al_t - al_r - w_r.cross(&w_rel_w);

        Ok(RigidBodyStateSE3 {
            frame_id: root.into(),
            pose,
            linear_velocity: rot_r_t * v_rel_w,
            angular_velocity: rot_r_t * w_rel_w,
            linear_acceleration: rot_r_t * a_rel_w,
            angular_acceleration: rot_r_t * al_rel_w,
            time: self.state.time,
        })
    }

    fn space_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        let r = self.link(root)?;
        let t = self.link(tip)?;
        Ok(self.tree.space_jacobian(&self.poses, r, t))
    }

    fn body_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        let r = self.link(root)?;
        let t = self.link(tip)?;
        let jac = self.tree.space_jacobian(&self.poses, r, t);
        let rot = (self.poses[r].rotation.inverse() * self.poses[t].rotation).inverse();
        let mut body = DMatrix::zeros(6, jac.ncols());
        for c in 0..jac.ncols() {
            let lin = rot * Vector3::new(jac[(0, c)], jac[(1, c)], jac[(2, c)]);
            let ang = rot * Vector3::new(jac[(3, c)], jac[(4, c)], jac[(5, c)]);
            for k in 0..3 {
                body[(k, c)] = lin[k];
                body[(k + 3, c)] = ang[k];
            }
        }
        Ok(body)
    }

    fn jacobian_dot(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        let r = self.link(root)?;
        let t = self.link(tip)?;
        Ok(self.tree.jacobian_dot(&self.poses, &self.vels, r, t))
    }

    fn spatial_acceleration_bias(&self, root: &str, tip: &str) -> Result<Vector6<f64>, ModelError> {
        let jac_dot = self.jacobian_dot(root, tip)?;
        let bias = jac_dot * &self.qd;
        Ok(Vector6::from_iterator(bias.iter().copied()))
    }

    fn joint_space_inertia_matrix(&self) -> Result<&DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        Ok(&self.inertia)
    }

    fn bias_forces(&self) -> Result<&DVector<f64>, ModelError> {
        self.ensure_updated()?;
        Ok(&self.bias)
    }

    fn selection_matrix(&self) -> &DMatrix<f64> {
        &self.selection
    }

    fn com_state(&self) -> Result<RigidBodyStateSE3, ModelError> {
        self.ensure_updated()?;
        Ok(self.com.clone())
    }

    fn com_jacobian(&self) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        Ok(self.tree.com_jacobian(&self.poses))
    }

    fn joint_limits(&self) -> &JointLimits {
        &self.joint_limits
    }

    fn active_contacts(&self) -> &ActiveContacts {
        &self.contacts
    }

    fn set_active_contacts(&mut self, contacts: ActiveContacts) -> Result<(), ModelError> {
        for name in &contacts.names {
            if !self.contacts.names.contains(name) {
                return Err(ModelError::UnknownFrame(name.clone()));
            }
        }
        for (name, active) in contacts.names.iter().zip(&contacts.active) {
            self.contacts.set_active(name, *active);
        }
        Ok(())
    }

    fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    fn actuated_joint_names(&self) -> &[String] {
        &self.actuated_joint_names
    }

    fn joint_index(&self, name: &str) -> Result<usize, ModelError> {
        self.joint_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ModelError::UnknownJoint(name.into()))
    }

    fn n_joints(&self) -> usize {
        self.joint_names.len()
    }

    fn n_actuated_joints(&self) -> usize {
        self.actuated_joint_names.len()
    }

    fn n_floating_base_joints(&self) -> usize {
        self.n_floating
    }

    fn world_frame(&self) -> &str {
        &self.world_frame
    }

    fn base_frame(&self) -> &str {
        &self.base_frame
    }

    fn has_link(&self, name: &str) -> bool {
        self.tree.link_index(name).is_some()
    }

    fn has_joint(&self, name: &str) -> bool {
        self.joint_names.iter().any(|n| n == name)
    }

    fn has_actuated_joint(&self, name: &str) -> bool {
        self.actuated_joint_names.iter().any(|n| n == name)
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            variant: ModelVariant::SerialTree,
            kinematics: true,
            dynamics: true,
            jacobian_dot: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
