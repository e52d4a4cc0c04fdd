//! Submechanism robot model back-end.
//!
//! Parallel mechanisms are described by a submechanism file that names the
//! independent (actuation-space) joints and the linear couplings that drive
//! the remaining spanning-tree joints (`Q̇ = Γ·ẏ` with constant ratios).
//! Kinematics and dynamics are computed on the spanning tree by the serial
//! back-end and reduced into actuation space:
//!
//! ```text
//! J_y = J·Γ      H_y = Γᵀ·H·Γ      C_y = Γᵀ·C
//! ```
//!
//! The reduction is exact for serial submechanisms and fixed-ratio
//! transmissions. This back-end cannot produce the Jacobian time derivative
//! and restricts pose/Jacobian queries to the model root frame.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Vector6};
use serde::{Deserialize, Serialize};
use tracing::debug;

use puppet_core::config::RobotModelConfig;
use puppet_core::error::ConfigError;
use puppet_core::types::{
    ActiveContacts, JointLimitRange, JointLimits, JointState, RigidBodyStateSE3,
};

use crate::error::ModelError;
use crate::model::{ModelCapabilities, ModelVariant, RobotModel};
use crate::serial::SerialTreeModel;

// ---------------------------------------------------------------------------
// Submechanism description
// ---------------------------------------------------------------------------

/// A linear coupling driving one spanning-tree joint from independent
/// joints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupling {
    /// The driven spanning-tree joint.
    pub joint: String,
    /// Independent joints it is driven by.
    pub sources: Vec<String>,
    /// One ratio per source.
    pub ratios: Vec<f64>,
}

/// Parsed submechanism description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmechanismDescription {
    /// Actuation-space joints, in actuation-space order.
    pub independent_joints: Vec<String>,
    /// Couplings for the dependent spanning-tree joints.
    #[serde(default)]
    pub couplings: Vec<Coupling>,
}

impl SubmechanismDescription {
    /// Load a submechanism description from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

// ---------------------------------------------------------------------------
// SubmechanismModel
// ---------------------------------------------------------------------------

/// Robot model over a parallel submechanism description.
pub struct SubmechanismModel {
    inner: SerialTreeModel,
    /// Full reduction matrix (n_spanning × n_y), floating-base block
    /// included as identity.
    gamma: DMatrix<f64>,
    joint_names: Vec<String>,
    actuated_joint_names: Vec<String>,
    joint_limits: JointLimits,
    selection: DMatrix<f64>,
    n_floating: usize,

    // Per-tick actuation-space caches.
    state: JointState,
    inertia: DMatrix<f64>,
    bias: DVector<f64>,
    updated: bool,
}

impl SubmechanismModel {
    /// Configure from a URDF file plus the submechanism file named in the
    /// config.
    pub fn configure(config: &RobotModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let submechanism_file = config
            .submechanism_file
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("submechanism_file".into()))?;
        let description = SubmechanismDescription::from_file(submechanism_file)
            .map_err(ModelError::Config)?;
        let urdf = puppet_urdf::parse_file(&config.file)?;
        Self::from_parts(config, urdf, description)
    }

    /// Configure from already parsed descriptions.
    pub fn from_parts(
        config: &RobotModelConfig,
        urdf: puppet_urdf::UrdfModel,
        description: SubmechanismDescription,
    ) -> Result<Self, ModelError> {
        // The spanning tree uses its own canonical ordering; configured
        // joint names apply to actuation space, not the spanning tree.
        let mut spanning_config = config.clone();
        spanning_config.joint_names = Vec::new();
        spanning_config.actuated_joint_names = Vec::new();
        let inner = SerialTreeModel::from_description(&spanning_config, urdf)?;

        let n_floating = inner.n_floating_base_joints();
        let spanning = &inner.joint_names()[n_floating..];

        let mut column_of: HashMap<&str, usize> = HashMap::new();
        for (i, name) in description.independent_joints.iter().enumerate() {
            column_of.insert(name.as_str(), i);
        }

        // Γ over the non-floating spanning joints.
        let n_ind = description.independent_joints.len();
        let mut gamma_red = DMatrix::zeros(spanning.len(), n_ind);
        for (row, name) in spanning.iter().enumerate() {
            if let Some(col) = column_of.get(name.as_str()) {
                gamma_red[(row, *col)] = 1.0;
                continue;
            }
            let coupling = description
                .couplings
                .iter()
                .find(|c| &c.joint == name)
                .ok_or_else(|| {
                    ConfigError::Incompatible(format!(
                        "spanning joint '{name}' is neither independent nor coupled"
                    ))
                })?;
            if coupling.sources.len() != coupling.ratios.len() {
                return Err(ConfigError::InvalidValue {
                    field: format!("couplings ({name})"),
                    message: "sources and ratios must have the same length".into(),
                }
                .into());
            }
            for (source, ratio) in coupling.sources.iter().zip(&coupling.ratios) {
                let col = column_of
                    .get(source.as_str())
                    .ok_or_else(|| ModelError::UnknownJoint(source.clone()))?;
                gamma_red[(row, *col)] = *ratio;
            }
        }
        for name in &description.independent_joints {
            if !spanning.contains(name) {
                return Err(ModelError::UnknownJoint(name.clone()));
            }
        }
        debug!(
            independent = n_ind,
            spanning = spanning.len(),
            "built submechanism reduction"
        );

        // Full Γ with the floating-base identity block.
        let n_span_total = inner.n_joints();
        let n_y = n_floating + n_ind;
        let mut gamma = DMatrix::zeros(n_span_total, n_y);
        for i in 0..n_floating {
            gamma[(i, i)] = 1.0;
        }
        gamma
            .view_mut((n_floating, n_floating), (spanning.len(), n_ind))
            .copy_from(&gamma_red);

        let joint_names: Vec<String> = inner.joint_names()[..n_floating]
            .iter()
            .cloned()
            .chain(description.independent_joints.iter().cloned())
            .collect();

        let actuated_joint_names = if config.actuated_joint_names.is_empty() {
            description.independent_joints.clone()
        } else {
            config.actuated_joint_names.clone()
        };
        for name in &actuated_joint_names {
            if !description.independent_joints.contains(name) {
                return Err(ConfigError::ActuatedJointNotInJoints(name.clone()).into());
            }
        }

        let mut selection = DMatrix::zeros(actuated_joint_names.len(), n_y);
        for (row, name) in actuated_joint_names.iter().enumerate() {
            let col = joint_names.iter().position(|j| j == name).unwrap();
            selection[(row, col)] = 1.0;
        }

        let joint_limits = JointLimits {
            names: actuated_joint_names.clone(),
            elements: actuated_joint_names
                .iter()
                .map(|name| {
                    inner
                        .joint_limits()
                        .element(name)
                        .copied()
                        .unwrap_or(JointLimitRange::default())
                })
                .collect(),
        };

        Ok(Self {
            inner,
            gamma,
            joint_names: joint_names.clone(),
            actuated_joint_names,
            joint_limits,
            selection,
            n_floating,
            state: JointState::zeros(&joint_names, puppet_core::TimeStamp::null()),
            inertia: DMatrix::zeros(n_y, n_y),
            bias: DVector::zeros(n_y),
            updated: false,
        })
    }

    fn ensure_updated(&self) -> Result<(), ModelError> {
        if self.updated {
            Ok(())
        } else {
            Err(puppet_core::error::StateError::NotUpdated.into())
        }
    }

    fn check_root(&self, root: &str) -> Result<(), ModelError> {
        if root == self.inner.world_frame() {
            Ok(())
        } else {
            Err(ModelError::InvalidFrame {
                expected: self.inner.world_frame().into(),
                got: root.into(),
            })
        }
    }

    /// Map an actuation-space state into the spanning tree by the coupling
    /// ratios.
    fn spanning_state(&self, y: &JointState) -> Result<JointState, ModelError> {
        let spanning_names: Vec<String> = self.inner.joint_names()[self.n_floating..].to_vec();
        let mut out = JointState::zeros(&spanning_names, y.time);
        for row in 0..spanning_names.len() {
            let gamma_row = self.gamma.row(self.n_floating + row);
            let mut position = 0.0;
            let mut speed = 0.0;
            let mut acceleration = 0.0;
            for (col, y_name) in self.joint_names.iter().enumerate().skip(self.n_floating) {
                let ratio = gamma_row[col];
                if ratio == 0.0 {
                    continue;
                }
                let element = y
                    .element(y_name)
                    .ok_or_else(|| ModelError::UnknownJoint(y_name.clone()))?;
                position += ratio * element.position;
                speed += ratio * element.speed;
                acceleration += ratio * element.acceleration;
            }
            out.elements[row].position = position;
            out.elements[row].speed = speed;
            out.elements[row].acceleration = acceleration;
        }
        Ok(out)
    }
}

impl RobotModel for SubmechanismModel {
    fn update(
        &mut self,
        joint_state: &JointState,
        floating_base: Option<&RigidBodyStateSE3>,
    ) -> Result<(), ModelError> {
        joint_state.validate()?;
        let spanning = self.spanning_state(joint_state)?;
        self.inner.update(&spanning, floating_base)?;

        // Reduce dynamics into actuation space.
        let h = self.inner.joint_space_inertia_matrix()?;
        self.inertia = self.gamma.transpose() * h * &self.gamma;
        self.bias = self.gamma.transpose() * self.inner.bias_forces()?;

        // Actuation-space state echo.
        let inner_state = self.inner.joint_state()?;
        for i in 0..self.n_floating {
            self.state.elements[i] = inner_state.elements[i];
        }
        for (i, name) in self.joint_names.iter().enumerate().skip(self.n_floating) {
            if let Some(element) = joint_state.element(name) {
                self.state.elements[i] = *element;
            }
        }
        self.state.time = joint_state.time;

        self.updated = true;
        Ok(())
    }

    fn joint_state(&self) -> Result<&JointState, ModelError> {
        self.ensure_updated()?;
        Ok(&self.state)
    }

    fn rigid_body_state(&self, root: &str, tip: &str) -> Result<RigidBodyStateSE3, ModelError> {
        self.ensure_updated()?;
        self.check_root(root)?;
        self.inner.rigid_body_state(root, tip)
    }

    fn space_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        self.check_root(root)?;
        Ok(self.inner.space_jacobian(root, tip)? * &self.gamma)
    }

    fn body_jacobian(&self, root: &str, tip: &str) -> Result<DMatrix<f64>, ModelError> {
        self.ensure_updated()?;
        self.check_root(root)?;
        Ok(self.inner.body_jacobian(root, tip)? * &self.gamma)
    }

    fn jacobian_dot(&self, _root: &str, _tip: &str) -> Result<DMatrix<f64>, ModelError> {
        Err(ModelError::NotImplemented(
            "jacobian_dot on the submechanism back-end",
        ))
    }

    fn spatial_acceleration_bias(&self, root: &str, tip: &str) -> Result<Vector6<f64>, ModelError> {
        self.ensure_updated()?;
        self.check_root(root)?;
        // Γ is constant, so J̇_y·ẏ equals the spanning-tree J̇·q̇.
        self.inner.spatial_acceleration_bias(root, tip)
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
        self.inner.com_state()
    }

    fn com_jacobian(&self) -> Result<DMatrix<f64>, ModelError> {
        Ok(self.inner.com_jacobian()? * &self.gamma)
    }

    fn joint_limits(&self) -> &JointLimits {
        &self.joint_limits
    }

    fn active_contacts(&self) -> &ActiveContacts {
        self.inner.active_contacts()
    }

    fn set_active_contacts(&mut self, contacts: ActiveContacts) -> Result<(), ModelError> {
        self.inner.set_active_contacts(contacts)
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
        self.inner.world_frame()
    }

    fn base_frame(&self) -> &str {
        self.inner.base_frame()
    }

    fn has_link(&self, name: &str) -> bool {
        self.inner.has_link(name)
    }

    fn has_joint(&self, name: &str) -> bool {
        self.joint_names.iter().any(|n| n == name)
    }

    fn has_actuated_joint(&self, name: &str) -> bool {
        self.actuated_joint_names.iter().any(|n| n == name)
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            variant: ModelVariant::ParallelSubmechanism,
            kinematics: true,
            dynamics: true,
            jacobian_dot: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
