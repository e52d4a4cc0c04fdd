//! Task-space inverse dynamics scene.
//!
//! Decision variable `x = (q̈, τ, f_ext)` of size `n_j + n_a + 6·n_c`.
//! Tasks contribute cost only on the acceleration block; the rigid-body
//! dynamics, contact-acceleration and joint-limit constraints make the
//! solution physically consistent. Solving yields joint accelerations and
//! torques plus the contact wrenches.

use nalgebra::{DVector, Vector3};
use tracing::debug;

use puppet_core::config::{SceneConfig, TaskType};
use puppet_core::qp::{HierarchicalQp, QpProblem};
use puppet_core::time::TimeStamp;
use puppet_core::types::{JointCommand, Wrench, Wrenches};
use puppet_model::RobotModel;
use puppet_solver::{ClarabelSolver, HqpSolver};

use crate::constraints::{
    ConstraintKind, ContactsAccelerationConstraint, HardConstraint,
    JointLimitsAccelerationConstraint, RigidBodyDynamicsConstraint,
};
use crate::error::SceneError;
use crate::scenes::{
    accumulate_cost, actuated_command, resolve_joint_weights, ModelInfo, Scene, TaskSet,
};
use crate::task::{Task, TaskLevel, TaskStatus, TasksStatus};

/// Acceleration-level scene with full rigid-body dynamics.
pub struct AccelerationTsidScene {
    info: ModelInfo,
    tasks: TaskSet,
    constraints: Vec<HardConstraint>,
    joint_weights: DVector<f64>,
    solver: ClarabelSolver,
    hqp: HierarchicalQp,
    solution: DVector<f64>,
    status: TasksStatus,
    contact_wrenches: Wrenches,
    hessian_regularizer: f64,
    configured: bool,
    updated: bool,
}

impl AccelerationTsidScene {
    /// Create the scene with its standard constraint stack: rigid-body
    /// dynamics, contact accelerations, and joint limits over the control
    /// period `dt`.
    #[must_use]
    pub fn new(dt: f64) -> Self {
        Self {
            info: ModelInfo::default(),
            tasks: TaskSet::default(),
            constraints: vec![
                HardConstraint::RigidBodyDynamics(RigidBodyDynamicsConstraint::new(false)),
                HardConstraint::ContactsAcceleration(ContactsAccelerationConstraint::new()),
                HardConstraint::JointLimitsAcceleration(JointLimitsAccelerationConstraint::new(
                    dt,
                )),
            ],
            joint_weights: DVector::zeros(0),
            solver: ClarabelSolver::new(),
            hqp: HierarchicalQp::default(),
            solution: DVector::zeros(0),
            status: TasksStatus::default(),
            contact_wrenches: Wrenches::default(),
            hessian_regularizer: 1e-8,
            configured: false,
            updated: false,
        }
    }

    /// Constant added to the full Hessian diagonal after assembly.
    pub fn set_hessian_regularizer(&mut self, regularizer: f64) {
        self.hessian_regularizer = regularizer;
    }

    /// The constraint stack (for tuning bounds such as contact force
    /// boxes).
    pub fn constraints_mut(&mut self) -> &mut [HardConstraint] {
        &mut self.constraints
    }

    /// Contact wrenches of the last solve, in `(force, torque)` order.
    #[must_use]
    pub fn contact_wrenches(&self) -> &Wrenches {
        &self.contact_wrenches
    }

    /// Raw solution vector `(q̈, τ, f_ext)` of the last solve.
    #[must_use]
    pub fn solution(&self) -> &DVector<f64> {
        &self.solution
    }

    fn n_vars(&self) -> usize {
        self.info.n_joints + self.info.n_actuated + 6 * self.info.contact_names.len()
    }
}

impl Scene for AccelerationTsidScene {
    fn configure(
        &mut self,
        model: &dyn RobotModel,
        config: &SceneConfig,
    ) -> Result<(), SceneError> {
        let info = ModelInfo::of(model)?;
        let joint_weights = resolve_joint_weights(config, info.n_joints)?;
        // Tasks act on the acceleration block only.
        let tasks = TaskSet::configure(&config.tasks, TaskLevel::Acceleration, info.n_joints)?;
        if tasks.n_priorities() > 1 {
            return Err(SceneError::MultiplePriorities(tasks.n_priorities()));
        }

        self.hqp.problems = vec![QpProblem::default()];
        self.contact_wrenches = Wrenches {
            names: info.contact_names.clone(),
            elements: vec![Wrench::default(); info.contact_names.len()],
            time: TimeStamp::null(),
        };
        debug!(
            n_joints = info.n_joints,
            n_actuated = info.n_actuated,
            n_contacts = info.contact_names.len(),
            "configured TSID scene"
        );

        self.info = info;
        self.solution = DVector::zeros(self.n_vars());
        self.tasks = tasks;
        self.joint_weights = joint_weights;
        self.configured = true;
        self.updated = false;
        Ok(())
    }

    fn update(&mut self, model: &dyn RobotModel, now: TimeStamp) -> Result<(), SceneError> {
        if !self.configured {
            return Err(SceneError::NotConfigured);
        }
        self.tasks.update_all(model, now, &self.joint_weights)?;

        // Constraints first: they determine the row counts of this tick.
        let mut n_eq = 0;
        let mut n_ineq = 0;
        for constraint in &mut self.constraints {
            constraint.update(model)?;
            match constraint.kind() {
                ConstraintKind::Equality => n_eq += constraint.rows(),
                ConstraintKind::Inequality => n_ineq += constraint.rows(),
                ConstraintKind::Bounds => {}
            }
        }

        let n_j = self.info.n_joints;
        let n_vars = self.n_vars();
        let problem = &mut self.hqp.problems[0];
        problem.resize(n_vars, n_eq, n_ineq);

        // Task contribution: top-left acceleration block only.
        if let Some(tasks) = self.tasks.priorities.first() {
            accumulate_cost(tasks, &mut problem.hessian, &mut problem.gradient, n_j);
        }
        for i in 0..n_vars {
            problem.hessian[(i, i)] += self.hessian_regularizer;
        }

        // Constraint blocks.
        let mut eq_row = 0;
        for constraint in &self.constraints {
            match constraint {
                HardConstraint::RigidBodyDynamics(c) => {
                    problem
                        .eq_matrix
                        .view_mut((eq_row, 0), (c.rows(), n_vars))
                        .copy_from(c.matrix());
                    problem
                        .eq_vector
                        .rows_mut(eq_row, c.rows())
                        .copy_from(c.vector());
                    eq_row += c.rows();
                }
                HardConstraint::ContactsAcceleration(c) => {
                    problem
                        .eq_matrix
                        .view_mut((eq_row, 0), (c.rows(), n_vars))
                        .copy_from(c.matrix());
                    problem
                        .eq_vector
                        .rows_mut(eq_row, c.rows())
                        .copy_from(c.vector());
                    eq_row += c.rows();
                }
                HardConstraint::JointLimitsAcceleration(c) => {
                    problem.lower_x.copy_from(c.lower());
                    problem.upper_x.copy_from(c.upper());
                }
            }
        }
        debug_assert_eq!(eq_row, n_eq);

        self.hqp.joint_weights = self.joint_weights.clone();
        self.hqp.time = now;
        self.updated = true;
        Ok(())
    }

    fn hqp(&self) -> Result<&HierarchicalQp, SceneError> {
        if self.updated {
            Ok(&self.hqp)
        } else {
            Err(SceneError::NotUpdated)
        }
    }

    fn solve(&mut self) -> Result<JointCommand, SceneError> {
        if !self.updated {
            return Err(SceneError::NotUpdated);
        }
        self.solver.solve(&self.hqp, &mut self.solution)?;

        let n_j = self.info.n_joints;
        let n_a = self.info.n_actuated;
        let solution = &self.solution;
        let command = actuated_command(&self.info, self.hqp.time, |i, idx, cmd| {
            cmd.acceleration = Some(solution[idx]);
            // Torque slots follow the actuated-joint ordering, which is what
            // makes Sᵀ·τ well-defined.
            cmd.effort = Some(solution[n_j + i]);
        });

        for (i, wrench) in self.contact_wrenches.elements.iter_mut().enumerate() {
            let base = n_j + n_a + 6 * i;
            wrench.force = Vector3::new(
                self.solution[base],
                self.solution[base + 1],
                self.solution[base + 2],
            );
            wrench.torque = Vector3::new(
                self.solution[base + 3],
                self.solution[base + 4],
                self.solution[base + 5],
            );
        }
        self.contact_wrenches.time = self.hqp.time;
        Ok(command)
    }

    fn update_tasks_status(
        &mut self,
        model: &dyn RobotModel,
    ) -> Result<&TasksStatus, SceneError> {
        let state = model.joint_state()?;
        let n_j = self.info.n_joints;
        let qdd_measured = DVector::from_iterator(
            state.elements.len(),
            state.elements.iter().map(|e| e.acceleration),
        );
        let qdd_solution = DVector::from_iterator(n_j, self.solution.iter().take(n_j).copied());

        self.status.elements.clear();
        for task in self.tasks.iter() {
            let mut y = &task.a * &qdd_measured;
            let mut y_solution = &task.a * &qdd_solution;
            if task.config.task_type == TaskType::Cartesian {
                let bias = model
                    .spatial_acceleration_bias(&task.config.root_frame, &task.config.tip_frame)?;
                for k in 0..6 {
                    y[k] += bias[k];
                    y_solution[k] += bias[k];
                }
            }
            self.status.elements.push(TaskStatus {
                name: task.config.name.clone(),
                time: task.time,
                activation: task.activation,
                timeout: task.timeout,
                weights: task.weights.clone(),
                y_ref: task.y_ref_root.clone(),
                y,
                y_solution,
            });
        }
        Ok(&self.status)
    }

    fn task_mut(&mut self, name: &str) -> Result<&mut Task, SceneError> {
        self.tasks
            .task_mut(name)
            .ok_or_else(|| SceneError::UnknownTask(name.into()))
    }

    fn has_task(&self, name: &str) -> bool {
        self.tasks.has_task(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
