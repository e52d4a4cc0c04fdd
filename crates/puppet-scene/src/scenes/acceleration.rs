//! Acceleration-level scene without dynamics.
//!
//! Decision variable `x = q̈`. Tasks only, no feasibility constraints; the
//! cost-form assembly matches the velocity QP scene, with a constant
//! Hessian regularizer instead of variable damping.

use nalgebra::DVector;
use tracing::debug;

use puppet_core::config::{SceneConfig, TaskType};
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

/// Acceleration-level scene with quadratic cost.
pub struct AccelerationScene {
    info: ModelInfo,
    tasks: TaskSet,
    joint_weights: DVector<f64>,
    solver: ClarabelSolver,
    hqp: HierarchicalQp,
    solution: DVector<f64>,
    status: TasksStatus,
    hessian_regularizer: f64,
    configured: bool,
    updated: bool,
}

impl AccelerationScene {
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
            hessian_regularizer: 1e-8,
            configured: false,
            updated: false,
        }
    }

    /// Constant added to the Hessian diagonal after assembly.
    pub fn set_hessian_regularizer(&mut self, regularizer: f64) {
        self.hessian_regularizer = regularizer;
    }
}

impl Default for AccelerationScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for AccelerationScene {
    fn configure(
        &mut self,
        model: &dyn RobotModel,
        config: &SceneConfig,
    ) -> Result<(), SceneError> {
        let info = ModelInfo::of(model)?;
        let joint_weights = resolve_joint_weights(config, info.n_joints)?;
        let tasks = TaskSet::configure(&config.tasks, TaskLevel::Acceleration, info.n_joints)?;
        if tasks.n_priorities() > 1 {
            return Err(SceneError::MultiplePriorities(tasks.n_priorities()));
        }

        self.hqp.problems = vec![QpProblem::default()];
        self.solution = DVector::zeros(info.n_joints);
        debug!(n_joints = info.n_joints, "configured acceleration scene");

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
        for i in 0..n {
            problem.hessian[(i, i)] += self.hessian_regularizer;
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
            cmd.acceleration = Some(solution[idx]);
        }))
    }

    fn update_tasks_status(
        &mut self,
        model: &dyn RobotModel,
    ) -> Result<&TasksStatus, SceneError> {
        let state = model.joint_state()?;
        let qdd_measured = DVector::from_iterator(
            state.elements.len(),
            state.elements.iter().map(|e| e.acceleration),
        );

        self.status.elements.clear();
        for task in self.tasks.iter() {
            let mut y = &task.a * &qdd_measured;
            let mut y_solution = &task.a * &self.solution;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use puppet_core::config::{RobotModelConfig, TaskConfig};
    use puppet_core::types::JointState;
    use puppet_model::SerialTreeModel;
    use puppet_urdf::parse_string;

    const ARM_URDF: &str = r#"
        <robot name="arm">
            <link name="base">
                <inertial><mass value="5.0"/><inertia ixx="0.1" ixy="0" ixz="0" iyy="0.1" iyz="0" izz="0.1"/></inertial>
            </link>
            <link name="upper">
                <inertial><origin xyz="0 0 0.15"/><mass value="2.0"/><inertia ixx="0.02" ixy="0" ixz="0" iyy="0.02" iyz="0" izz="0.004"/></inertial>
            </link>
            <link name="lower">
                <inertial><origin xyz="0 0 0.1"/><mass value="1.0"/><inertia ixx="0.01" ixy="0" ixz="0" iyy="0.01" iyz="0" izz="0.002"/></inertial>
            </link>
            <link name="ee"/>
            <joint name="shoulder" type="revolute">
                <parent link="base"/><child link="upper"/>
                <origin xyz="0 0 0.1"/><axis xyz="0 1 0"/>
                <limit lower="-2.0" upper="2.0" effort="60" velocity="3"/>
            </joint>
            <joint name="elbow" type="revolute">
                <parent link="upper"/><child link="lower"/>
                <origin xyz="0 0 0.3"/><axis xyz="0 1 0"/>
                <limit lower="-2.5" upper="2.5" effort="30" velocity="4"/>
            </joint>
            <joint name="tool" type="fixed">
                <parent link="lower"/><child link="ee"/>
                <origin xyz="0 0 0.2"/>
            </joint>
        </robot>
    "#;

    fn arm_model() -> SerialTreeModel {
        let cfg = RobotModelConfig::new("arm.urdf");
        let mut model =
            SerialTreeModel::from_description(&cfg, parse_string(ARM_URDF).unwrap()).unwrap();
        let mut js = JointState::zeros(
            &["shoulder".into(), "elbow".into()],
            TimeStamp::from_secs(1.0),
        );
        js.elements[0].position = 0.3;
        model.update(&js, None).unwrap();
        model
    }

    #[test]
    fn joint_acceleration_tracking() {
        let model = arm_model();
        let mut scene = AccelerationScene::new();
        let config = SceneConfig {
            tasks: vec![TaskConfig {
                name: "posture".into(),
                task_type: TaskType::Joint,
                priority: 0,
                weights: vec![1.0, 1.0],
                activation: 1.0,
                timeout_seconds: 0.0,
                root_frame: String::new(),
                tip_frame: String::new(),
                joint_names: vec!["shoulder".into(), "elbow".into()],
            }],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();

        scene
            .task_mut("posture")
            .unwrap()
            .set_reference(
                &DVector::from_column_slice(&[1.5, -0.5]),
                TimeStamp::from_secs(1.0),
            )
            .unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        let command = scene.solve().unwrap();

        assert_relative_eq!(
            command.element("shoulder").unwrap().acceleration.unwrap(),
            1.5,
            epsilon = 1e-5
        );
        assert_relative_eq!(
            command.element("elbow").unwrap().acceleration.unwrap(),
            -0.5,
            epsilon = 1e-5
        );
        assert!(command.element("shoulder").unwrap().velocity.is_none());
    }

    #[test]
    fn com_task_is_accepted() {
        let model = arm_model();
        let mut scene = AccelerationScene::new();
        let config = SceneConfig {
            tasks: vec![TaskConfig {
                name: "balance".into(),
                task_type: TaskType::Com,
                priority: 0,
                weights: vec![1.0; 3],
                activation: 1.0,
                timeout_seconds: 0.0,
                root_frame: String::new(),
                tip_frame: String::new(),
                joint_names: Vec::new(),
            }],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        // Zero reference: no CoM motion requested, the regularized problem
        // returns zero accelerations.
        let command = scene.solve().unwrap();
        assert_relative_eq!(
            command.element("shoulder").unwrap().acceleration.unwrap(),
            0.0,
            epsilon = 1e-5
        );
    }

    #[test]
    fn hessian_stays_symmetric() {
        let model = arm_model();
        let mut scene = AccelerationScene::new();
        let config = SceneConfig {
            tasks: vec![TaskConfig {
                name: "ee_acc".into(),
                task_type: TaskType::Cartesian,
                priority: 0,
                weights: vec![1.0; 6],
                activation: 1.0,
                timeout_seconds: 0.0,
                root_frame: "base".into(),
                tip_frame: "ee".into(),
                joint_names: Vec::new(),
            }],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        assert!(scene.hqp().unwrap().problems[0].hessian_asymmetry() <= 1e-10);
    }
}
