//! Hard constraints: feasibility rows assembled against the current model.
//!
//! Each constraint produces, per tick, either equality rows `(A, b)`,
//! inequality rows `(A, lb_y, ub_y)`, or variable bounds `(lb_x, ub_x)` over
//! the TSID decision variable `x = (q̈, τ, f_ext)` of size
//! `n_j + n_a + 6·n_c`.

use nalgebra::{DMatrix, DVector};

use puppet_core::qp::BOUND_SENTINEL;
use puppet_model::RobotModel;

use crate::error::SceneError;

/// Classification of a hard constraint's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Equality,
    Inequality,
    Bounds,
}

/// Decision-variable sizing shared by all constraints.
#[derive(Debug, Clone, Copy)]
struct VariableLayout {
    n_j: usize,
    n_a: usize,
    n_c: usize,
}

impl VariableLayout {
    fn of(model: &dyn RobotModel) -> Self {
        Self {
            n_j: model.n_joints(),
            n_a: model.n_actuated_joints(),
            n_c: model.active_contacts().len(),
        }
    }

    fn n_vars(&self) -> usize {
        self.n_j + self.n_a + 6 * self.n_c
    }
}

// ---------------------------------------------------------------------------
// RigidBodyDynamicsConstraint
// ---------------------------------------------------------------------------

/// Equation-of-motion equality.
///
/// Full form (`n_eq = n_j`), over `x = (q̈, τ, f_ext)`:
///
/// ```text
/// [ H   −Sᵀ   −J_cᵀ ] · x = −C
/// ```
///
/// Reduced form (`n_eq = 6`, floating-base rows only, no `τ`, linear
/// 3-component contact forces): `H[0:6,:]·q̈ − J_c,linᵀ[0:6,:]·f = −C[0:6]`.
#[derive(Debug, Clone, Default)]
pub struct RigidBodyDynamicsConstraint {
    /// Use the 6-row floating-base form without torque variables.
    pub reduced: bool,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl RigidBodyDynamicsConstraint {
    #[must_use]
    pub fn new(reduced: bool) -> Self {
        Self {
            reduced,
            ..Self::default()
        }
    }

    pub fn update(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        let layout = VariableLayout::of(model);
        let contacts = model.active_contacts().clone();
        let h = model.joint_space_inertia_matrix()?;
        let bias = model.bias_forces()?;
        let world = model.world_frame().to_string();

        if self.reduced {
            if layout.n_j < 6 {
                return Err(puppet_core::error::ConfigError::Incompatible(
                    "reduced dynamics requires a floating-base model".into(),
                )
                .into());
            }
            let n_vars = layout.n_j + 3 * layout.n_c;
            self.a = DMatrix::zeros(6, n_vars);
            self.a
                .view_mut((0, 0), (6, layout.n_j))
                .copy_from(&h.rows(0, 6));
            for (i, name) in contacts.names.iter().enumerate() {
                if !contacts.active[i] {
                    continue;
                }
                let jac = model.space_jacobian(&world, name)?;
                let jac_lin_t = jac.rows(0, 3).transpose();
                self.a
                    .view_mut((0, layout.n_j + 3 * i), (6, 3))
                    .copy_from(&-jac_lin_t.rows(0, 6));
            }
            self.b = -bias.rows(0, 6);
        } else {
            self.a = DMatrix::zeros(layout.n_j, layout.n_vars());
            self.a
                .view_mut((0, 0), (layout.n_j, layout.n_j))
                .copy_from(h);
            self.a
                .view_mut((0, layout.n_j), (layout.n_j, layout.n_a))
                .copy_from(&-model.selection_matrix().transpose());
            for (i, name) in contacts.names.iter().enumerate() {
                if !contacts.active[i] {
                    continue;
                }
                let jac = model.space_jacobian(&world, name)?;
                self.a
                    .view_mut((0, layout.n_j + layout.n_a + 6 * i), (layout.n_j, 6))
                    .copy_from(&-jac.transpose());
            }
            self.b = -bias.clone();
        }
        Ok(())
    }

    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        ConstraintKind::Equality
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    #[must_use]
    pub fn vector(&self) -> &DVector<f64> {
        &self.b
    }
}

// ---------------------------------------------------------------------------
// ContactsAccelerationConstraint
// ---------------------------------------------------------------------------

/// Zero spatial acceleration at every active contact point:
/// `J_c·q̈ = −J̇_c·q̇`, one 6-row block per contact written into the `q̈`
/// columns. Inactive contacts contribute zero rows (trivially satisfied).
#[derive(Debug, Clone, Default)]
pub struct ContactsAccelerationConstraint {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl ContactsAccelerationConstraint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        let layout = VariableLayout::of(model);
        let contacts = model.active_contacts().clone();
        let world = model.world_frame().to_string();

        self.a = DMatrix::zeros(6 * layout.n_c, layout.n_vars());
        self.b = DVector::zeros(6 * layout.n_c);
        for (i, name) in contacts.names.iter().enumerate() {
            if !contacts.active[i] {
                continue;
            }
            let jac = model.space_jacobian(&world, name)?;
            self.a
                .view_mut((6 * i, 0), (6, layout.n_j))
                .copy_from(&jac);
            let bias = model.spatial_acceleration_bias(&world, name)?;
            for k in 0..6 {
                self.b[6 * i + k] = -bias[k];
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        ConstraintKind::Equality
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    #[must_use]
    pub fn vector(&self) -> &DVector<f64> {
        &self.b
    }
}

// ---------------------------------------------------------------------------
// JointLimitsAccelerationConstraint
// ---------------------------------------------------------------------------

/// Variable bounds keeping every actuated joint feasible over the next tick:
///
/// ```text
/// a_lo = max(−a_max, (v_min − q̇)/dt, 2·(q_min − q − q̇·dt)/dt²)
/// a_hi = min( a_max, (v_max − q̇)/dt, 2·(q_max − q − q̇·dt)/dt²)
/// ```
///
/// Torque slots are bounded by the URDF effort limits; wrench slots by the
/// configured force/torque boxes, pinned to zero for inactive contacts.
#[derive(Debug, Clone)]
pub struct JointLimitsAccelerationConstraint {
    /// Control period used for the one-tick feasibility horizon.
    pub dt: f64,
    /// Acceleration magnitude cap applied to every actuated joint.
    pub max_acceleration: f64,
    /// Contact force box (friction-cone box approximation).
    pub max_contact_force: f64,
    /// Contact torque box.
    pub max_contact_torque: f64,
    lb: DVector<f64>,
    ub: DVector<f64>,
}

impl JointLimitsAccelerationConstraint {
    #[must_use]
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            max_acceleration: BOUND_SENTINEL,
            max_contact_force: BOUND_SENTINEL,
            max_contact_torque: BOUND_SENTINEL,
            lb: DVector::zeros(0),
            ub: DVector::zeros(0),
        }
    }

    pub fn update(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        let layout = VariableLayout::of(model);
        let state = model.joint_state()?;
        let limits = model.joint_limits();
        let dt = self.dt;

        self.lb = DVector::from_element(layout.n_vars(), -BOUND_SENTINEL);
        self.ub = DVector::from_element(layout.n_vars(), BOUND_SENTINEL);

        for (row, name) in model.actuated_joint_names().iter().enumerate() {
            let idx = model.joint_index(name)?;
            let element = state
                .element(name)
                .ok_or_else(|| puppet_model::ModelError::UnknownJoint(name.clone()))?;
            let range = limits.element(name).copied().unwrap_or_default();

            let v_max = if range.velocity > 0.0 {
                range.velocity
            } else {
                BOUND_SENTINEL
            };
            let mut a_lo = (-v_max - element.speed) / dt;
            let mut a_hi = (v_max - element.speed) / dt;
            if let Some(q_min) = range.lower {
                a_lo = a_lo.max(2.0 * (q_min - element.position - element.speed * dt) / (dt * dt));
            }
            if let Some(q_max) = range.upper {
                a_hi = a_hi.min(2.0 * (q_max - element.position - element.speed * dt) / (dt * dt));
            }
            self.lb[idx] = a_lo.max(-self.max_acceleration);
            self.ub[idx] = a_hi.min(self.max_acceleration);

            // Torque slot of this actuated joint.
            let effort = if range.effort > 0.0 {
                range.effort
            } else {
                BOUND_SENTINEL
            };
            self.lb[layout.n_j + row] = -effort;
            self.ub[layout.n_j + row] = effort;
        }

        let contacts = model.active_contacts();
        for i in 0..layout.n_c {
            let base = layout.n_j + layout.n_a + 6 * i;
            let (force, torque) = if contacts.active[i] {
                (self.max_contact_force, self.max_contact_torque)
            } else {
                // Inactive contacts cannot transmit a wrench.
                (0.0, 0.0)
            };
            for k in 0..3 {
                self.lb[base + k] = -force;
                self.ub[base + k] = force;
                self.lb[base + 3 + k] = -torque;
                self.ub[base + 3 + k] = torque;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        ConstraintKind::Bounds
    }

    #[must_use]
    pub fn lower(&self) -> &DVector<f64> {
        &self.lb
    }

    #[must_use]
    pub fn upper(&self) -> &DVector<f64> {
        &self.ub
    }
}

// ---------------------------------------------------------------------------
// HardConstraint
// ---------------------------------------------------------------------------

/// Variant over the hard-constraint kinds a scene can carry.
#[derive(Debug, Clone)]
pub enum HardConstraint {
    RigidBodyDynamics(RigidBodyDynamicsConstraint),
    ContactsAcceleration(ContactsAccelerationConstraint),
    JointLimitsAcceleration(JointLimitsAccelerationConstraint),
}

impl HardConstraint {
    pub fn update(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        match self {
            Self::RigidBodyDynamics(c) => c.update(model),
            Self::ContactsAcceleration(c) => c.update(model),
            Self::JointLimitsAcceleration(c) => c.update(model),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::RigidBodyDynamics(c) => c.kind(),
            Self::ContactsAcceleration(c) => c.kind(),
            Self::JointLimitsAcceleration(c) => c.kind(),
        }
    }

    /// Rows contributed to the stacked constraint matrices (zero for
    /// bounds).
    #[must_use]
    pub fn rows(&self) -> usize {
        match self {
            Self::RigidBodyDynamics(c) => c.rows(),
            Self::ContactsAcceleration(c) => c.rows(),
            Self::JointLimitsAcceleration(_) => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
