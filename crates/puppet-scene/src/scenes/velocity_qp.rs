//! Velocity-level scene with quadratic cost.
//!
//! Single priority; tasks enter the cost as `H = Σ AwᵀAw`,
//! `g = −Σ Awᵀ·yw`. Variable damping can be applied to guide the robot
//! through kinematic singularities: when the smallest singular value of `H`
//! drops below the threshold, a linearly tapered factor is added to the
//! diagonal.

use nalgebra::DVector;
use tracing::debug;

use puppet_core::config::SceneConfig;
use puppet_core::qp::{HierarchicalQp, QpProblem};
use puppet_core::time::TimeStamp;
use puppet_core::types::JointCommand;
use puppet_model::RobotModel;
use puppet_solver::{ClarabelSolver, HqpSolver};

use crate::error::SceneError;
use crate::scenes::{
    accumulate_cost, actuated_command, resolve_joint_weights, ModelInfo, Scene, TaskSet,
};
use crate::task::{Task, TaskLevel, TaskStatus, TasksStatus};

/// Velocity-level scene with quadratic cost and variable damping.
pub struct VelocityQpScene {
    info: ModelInfo,
    tasks: TaskSet,
    joint_weights: DVector<f64>,
    solver: ClarabelSolver,
    hqp: HierarchicalQp,
    solution: DVector<f64>,
    status: TasksStatus,
    damping_threshold: f64,
    max_damping: f64,
    damping_factor: f64,
    configured: bool,
    updated: bool,
}

impl VelocityQpScene {
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ModelInfo::default(),
            tasks: TaskSet::default(),
            joint_weights: DVector::zeros(0),
            solver: ClarabelSolver::new(),
            hqp: HierarchicalQp::default(),
            solution: DVector::zeros(0),
            status: TasksStatus::default(),
            damping_threshold: 1e-8,
            max_damping: 0.1,
            damping_factor: 0.0,
            configured: false,
            updated: false,
        }
    }

    /// Singular-value threshold below which variable damping activates.
    pub fn set_damping_threshold(&mut self, threshold: f64) {
        self.damping_threshold = threshold;
    }

    /// Damping added at a fully singular Hessian; tapers linearly to zero
    /// at the threshold.
    pub fn set_max_damping(&mut self, max_damping: f64) {
        self.max_damping = max_damping;
    }

    /// Damping factor applied by the last `update`.
    #[must_use]
    pub fn current_damping_factor(&self) -> f64 {
        self.damping_factor
    }
}

impl Default for VelocityQpScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for VelocityQpScene {
    fn configure(
        &mut self,
        model: &dyn RobotModel,
        config: &SceneConfig,
    ) -> Result<(), SceneError> {
        let info = ModelInfo::of(model)?;
        let joint_weights = resolve_joint_weights(config, info.n_joints)?;
        let tasks = TaskSet::configure(&config.tasks, TaskLevel::Velocity, info.n_joints)?;
        if tasks.n_priorities() > 1 {
            return Err(SceneError::MultiplePriorities(tasks.n_priorities()));
        }

        self.hqp.problems = vec![QpProblem::default()];
        self.solution = DVector::zeros(info.n_joints);
        debug!(n_joints = info.n_joints, "configured velocity QP scene");

        self.info = info;
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

        let n = self.info.n_joints;
        let problem = &mut self.hqp.problems[0];
        problem.resize(n, 0, 0);
        if let Some(tasks) = self.tasks.priorities.first() {
            accumulate_cost(tasks, &mut problem.hessian, &mut problem.gradient, n);
        }

        // Variable damping against kinematic singularities.
        let sigma_min = problem
            .hessian
            .clone()
            .svd(false, false)
            .singular_values
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        self.damping_factor = if sigma_min < self.damping_threshold {
            self.max_damping * (1.0 - sigma_min / self.damping_threshold)
        } else {
            0.0
        };
        for i in 0..n {
            problem.hessian[(i, i)] += self.damping_factor;
        }

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
        let solution = &self.solution;
        Ok(actuated_command(&self.info, self.hqp.time, |_, idx, cmd| {
            cmd.velocity = Some(solution[idx]);
        }))
    }

    fn update_tasks_status(
        &mut self,
        model: &dyn RobotModel,
    ) -> Result<&TasksStatus, SceneError> {
        let state = model.joint_state()?;
        let qd_measured = DVector::from_iterator(
            state.elements.len(),
            state.elements.iter().map(|e| e.speed),
        );

        self.status.elements.clear();
        for task in self.tasks.iter() {
            self.status.elements.push(TaskStatus {
                name: task.config.name.clone(),
                time: task.time,
                activation: task.activation,
                timeout: task.timeout,
                weights: task.weights.clone(),
                y_ref: task.y_ref_root.clone(),
                y: &task.a * &qd_measured,
                y_solution: &task.a * &self.solution,
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
