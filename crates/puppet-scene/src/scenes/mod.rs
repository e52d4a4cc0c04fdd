//! The scene family: per-tick lowering of tasks and hard constraints into a
//! [`HierarchicalQp`].
//!
//! All four scenes share the same update shape (timeout supervision, task
//! update, weighting, cost/row assembly) and differ only in the decision
//! variable, the task contribution region and which constraint blocks are
//! included. The shared machinery lives in [`TaskSet`] and the free
//! assembly helpers here; each scene is a thin policy over them.

mod acceleration;
mod acceleration_tsid;
mod velocity;
mod velocity_qp;

pub use acceleration::AccelerationScene;
pub use acceleration_tsid::AccelerationTsidScene;
pub use velocity::VelocityScene;
pub use velocity_qp::VelocityQpScene;

use nalgebra::{DMatrix, DVector};

use puppet_core::config::{SceneConfig, TaskConfig};
use puppet_core::qp::HierarchicalQp;
use puppet_core::time::TimeStamp;
use puppet_core::types::JointCommand;
use puppet_model::RobotModel;

use crate::error::SceneError;
use crate::task::{Task, TaskLevel, TasksStatus};

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// A whole-body control scene: owns tasks, constraints and a solver, and
/// turns them into joint commands each tick.
///
/// The per-tick call order is `configure → [update → solve →
/// update_tasks_status]*`; the model is borrowed per call, which enforces
/// the one-owner-per-tick contract.
pub trait Scene {
    /// Build the task set. The single allocating entry point; may be called
    /// again to reconfigure from scratch.
    fn configure(
        &mut self,
        model: &dyn RobotModel,
        config: &SceneConfig,
    ) -> Result<(), SceneError>;

    /// Assemble the optimization problem from the current model state.
    fn update(&mut self, model: &dyn RobotModel, now: TimeStamp) -> Result<(), SceneError>;

    /// The problem assembled by the last `update`.
    fn hqp(&self) -> Result<&HierarchicalQp, SceneError>;

    /// Solve the assembled problem into a joint command.
    fn solve(&mut self) -> Result<JointCommand, SceneError>;

    /// Per-task achieved/achievable telemetry against the last solution.
    fn update_tasks_status(&mut self, model: &dyn RobotModel)
        -> Result<&TasksStatus, SceneError>;

    /// Mutable access to a task (reference, activation and weight setters).
    fn task_mut(&mut self, name: &str) -> Result<&mut Task, SceneError>;

    /// Whether a task with this name exists.
    fn has_task(&self, name: &str) -> bool;
}

// ---------------------------------------------------------------------------
// ModelInfo
// ---------------------------------------------------------------------------

/// Model sizing cached at `configure` so `solve` needs no model access.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModelInfo {
    pub n_joints: usize,
    pub n_actuated: usize,
    pub joint_names: Vec<String>,
    pub actuated_joint_names: Vec<String>,
    /// Canonical index of each actuated joint.
    pub actuated_indices: Vec<usize>,
    pub contact_names: Vec<String>,
}

impl ModelInfo {
    pub fn of(model: &dyn RobotModel) -> Result<Self, SceneError> {
        let actuated_indices = model
            .actuated_joint_names()
            .iter()
            .map(|name| model.joint_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            n_joints: model.n_joints(),
            n_actuated: model.n_actuated_joints(),
            joint_names: model.joint_names().to_vec(),
            actuated_joint_names: model.actuated_joint_names().to_vec(),
            actuated_indices,
            contact_names: model.active_contacts().names.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// TaskSet
// ---------------------------------------------------------------------------

/// Tasks grouped by priority (0 = highest), with the shared per-tick
/// lifecycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSet {
    pub priorities: Vec<Vec<Task>>,
}

impl TaskSet {
    /// Create all tasks, grouped and ordered by priority. Empty priority
    /// levels are dropped.
    pub fn configure(
        configs: &[TaskConfig],
        level: TaskLevel,
        n_x: usize,
    ) -> Result<Self, SceneError> {
        for (i, config) in configs.iter().enumerate() {
            if configs[..i].iter().any(|c| c.name == config.name) {
                return Err(
                    puppet_core::error::ConfigError::DuplicateTaskName(config.name.clone()).into(),
                );
            }
        }

        let max_priority = configs.iter().map(|c| c.priority).max().unwrap_or(0);
        let mut priorities: Vec<Vec<Task>> = vec![Vec::new(); max_priority + 1];
        for config in configs {
            priorities[config.priority].push(Task::new(config.clone(), level, n_x)?);
        }
        priorities.retain(|tasks| !tasks.is_empty());
        Ok(Self { priorities })
    }

    /// Number of priority levels actually populated.
    pub fn n_priorities(&self) -> usize {
        self.priorities.len()
    }

    /// Stacked row count per priority level.
    pub fn rows_per_priority(&self) -> Vec<usize> {
        self.priorities
            .iter()
            .map(|tasks| tasks.iter().map(Task::rows).sum())
            .collect()
    }

    /// Run the shared per-tick lifecycle on every task: timeout check,
    /// model update, weighting.
    pub fn update_all(
        &mut self,
        model: &dyn RobotModel,
        now: TimeStamp,
        joint_weights: &DVector<f64>,
    ) -> Result<(), SceneError> {
        for tasks in &mut self.priorities {
            for task in tasks {
                task.check_timeout(now);
                task.update(model)?;
                task.apply_weighting(joint_weights);
            }
        }
        Ok(())
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.priorities
            .iter_mut()
            .flatten()
            .find(|task| task.config.name == name)
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.priorities
            .iter()
            .flatten()
            .any(|task| task.config.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.priorities.iter().flatten()
    }
}

// ---------------------------------------------------------------------------
// Assembly helpers
// ---------------------------------------------------------------------------

/// Accumulate the quadratic cost of a task level into a Hessian/gradient
/// region: `H += AwᵀAw`, `g −= Awᵀ·yw`.
pub(crate) fn accumulate_cost(
    tasks: &[Task],
    hessian: &mut DMatrix<f64>,
    gradient: &mut DVector<f64>,
    region: usize,
) {
    for task in tasks {
        let aw = &task.aw;
        let yw = task.weighted_reference();
        let mut h_block = hessian.view_mut((0, 0), (region, region));
        h_block.gemm_tr(1.0, aw, aw, 1.0);
        let mut g_block = gradient.rows_mut(0, region);
        g_block.gemv_tr(-1.0, aw, &yw, 1.0);
    }
}

/// Stack the weighted task rows of one priority level into an equality
/// system.
pub(crate) fn stack_rows(tasks: &[Task], a: &mut DMatrix<f64>, b: &mut DVector<f64>) {
    let mut row = 0;
    for task in tasks {
        a.view_mut((row, 0), (task.rows(), task.aw.ncols()))
            .copy_from(&task.aw);
        b.rows_mut(row, task.rows())
            .copy_from(&task.weighted_reference());
        row += task.rows();
    }
}

/// Resolve the per-joint weight vector of a scene config.
pub(crate) fn resolve_joint_weights(
    config: &SceneConfig,
    n_joints: usize,
) -> Result<DVector<f64>, SceneError> {
    config.validate()?;
    if config.joint_weights.is_empty() {
        Ok(DVector::from_element(n_joints, 1.0))
    } else if config.joint_weights.len() == n_joints {
        Ok(DVector::from_column_slice(&config.joint_weights))
    } else {
        Err(puppet_core::error::ConfigError::InvalidValue {
            field: "joint_weights".into(),
            message: format!(
                "expected {} entries, got {}",
                n_joints,
                config.joint_weights.len()
            ),
        }
        .into())
    }
}

/// Build a joint command from solution slices, one entry per actuated
/// joint.
pub(crate) fn actuated_command(
    info: &ModelInfo,
    time: TimeStamp,
    mut fill: impl FnMut(usize, usize, &mut puppet_core::types::CommandElement),
) -> JointCommand {
    let mut command = JointCommand::for_joints(&info.actuated_joint_names, time);
    for (i, element) in command.elements.iter_mut().enumerate() {
        fill(i, info.actuated_indices[i], element);
    }
    command
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use puppet_core::config::TaskType;

    fn joint_config(name: &str, priority: usize, joints: &[&str]) -> TaskConfig {
        TaskConfig {
            name: name.into(),
            task_type: TaskType::Joint,
            priority,
            weights: vec![1.0; joints.len()],
            activation: 1.0,
            timeout_seconds: 0.0,
            root_frame: String::new(),
            tip_frame: String::new(),
            joint_names: joints.iter().map(|s| (*s).into()).collect(),
        }
    }

    #[test]
    fn task_set_groups_by_priority() {
        let configs = vec![
            joint_config("low", 3, &["a"]),
            joint_config("high", 0, &["b"]),
            joint_config("also_high", 0, &["c"]),
        ];
        let set = TaskSet::configure(&configs, TaskLevel::Velocity, 3).unwrap();
        // Empty priorities 1 and 2 are dropped.
        assert_eq!(set.n_priorities(), 2);
        assert_eq!(set.priorities[0].len(), 2);
        assert_eq!(set.priorities[1].len(), 1);
        assert_eq!(set.rows_per_priority(), vec![2, 1]);
    }

    #[test]
    fn task_set_rejects_duplicates() {
        let configs = vec![joint_config("t", 0, &["a"]), joint_config("t", 1, &["b"])];
        assert!(matches!(
            TaskSet::configure(&configs, TaskLevel::Velocity, 2),
            Err(SceneError::Config(_))
        ));
    }

    #[test]
    fn task_set_lookup() {
        let configs = vec![joint_config("t", 0, &["a"])];
        let mut set = TaskSet::configure(&configs, TaskLevel::Velocity, 1).unwrap();
        assert!(set.has_task("t"));
        assert!(set.task_mut("t").is_some());
        assert!(!set.has_task("u"));
    }

    #[test]
    fn accumulate_cost_matches_normal_equations() {
        let configs = vec![joint_config("t", 0, &["a", "b"])];
        let mut set = TaskSet::configure(&configs, TaskLevel::Velocity, 2).unwrap();
        let task = set.task_mut("t").unwrap();
        task.a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]);
        task.y_ref_root = DVector::from_column_slice(&[1.0, -1.0]);
        task.apply_weighting(&DVector::from_element(2, 1.0));

        let mut h = DMatrix::zeros(2, 2);
        let mut g = DVector::zeros(2);
        accumulate_cost(&set.priorities[0], &mut h, &mut g, 2);

        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]);
        let y = DVector::from_column_slice(&[1.0, -1.0]);
        let h_expected = a.transpose() * &a;
        let g_expected = -(a.transpose() * &y);
        for i in 0..2 {
            assert_relative_eq!(g[i], g_expected[i], epsilon = 1e-12);
            for j in 0..2 {
                assert_relative_eq!(h[(i, j)], h_expected[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn resolve_joint_weights_defaults_to_ones() {
        let config = SceneConfig::default();
        let w = resolve_joint_weights(&config, 3).unwrap();
        assert_eq!(w.len(), 3);
        assert_relative_eq!(w[0], 1.0);

        let bad = SceneConfig {
            tasks: Vec::new(),
            joint_weights: vec![1.0, 2.0],
        };
        assert!(resolve_joint_weights(&bad, 3).is_err());
    }
}
