//! Velocity-level HQP scene over the hierarchical WDLS solver.
//!
//! Decision variable `x = q̇`. Each priority level becomes one
//! least-squares equality stack `A·x = y`; the solver projects lower
//! priorities into the nullspace of higher ones.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use puppet_core::config::SceneConfig;
use puppet_core::qp::{HierarchicalQp, QpProblem};
use puppet_core::time::TimeStamp;
use puppet_core::types::JointCommand;
use puppet_model::RobotModel;
use puppet_solver::{HierarchicalWdlsSolver, HqpSolver};

use crate::error::SceneError;
use crate::scenes::{
    actuated_command, resolve_joint_weights, stack_rows, ModelInfo, Scene, TaskSet,
};
use crate::task::{Task, TaskLevel, TaskStatus, TasksStatus};

/// Velocity-level hierarchical scene.
pub struct VelocityScene {
    info: ModelInfo,
    tasks: TaskSet,
    joint_weights: DVector<f64>,
    solver: HierarchicalWdlsSolver,
    hqp: HierarchicalQp,
    solution: DVector<f64>,
    status: TasksStatus,
    configured: bool,
    updated: bool,
}

impl VelocityScene {
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ModelInfo::default(),
            tasks: TaskSet::default(),
            joint_weights: DVector::zeros(0),
            solver: HierarchicalWdlsSolver::new(),
            hqp: HierarchicalQp::default(),
            solution: DVector::zeros(0),
            status: TasksStatus::default(),
            configured: false,
            updated: false,
        }
    }

    /// Bound on the solution norm enforced by the solver's damping.
    pub fn set_norm_max(&mut self, norm_max: f64) {
        self.solver.set_norm_max(norm_max);
    }

    /// Per-priority solver debug data of the last solve.
    #[must_use]
    pub fn priority_data(&self) -> &[puppet_solver::PriorityData] {
        self.solver.priority_data()
    }
}

impl Default for VelocityScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for VelocityScene {
    fn configure(
        &mut self,
        model: &dyn RobotModel,
        config: &SceneConfig,
    ) -> Result<(), SceneError> {
        let info = ModelInfo::of(model)?;
        let joint_weights = resolve_joint_weights(config, info.n_joints)?;
        let tasks = TaskSet::configure(&config.tasks, TaskLevel::Velocity, info.n_joints)?;
        self.solver
            .configure(&tasks.rows_per_priority(), info.n_joints)?;

        self.hqp.problems = vec![QpProblem::default(); tasks.n_priorities()];
        self.solution = DVector::zeros(info.n_joints);
        debug!(
            priorities = tasks.n_priorities(),
            n_joints = info.n_joints,
            "configured velocity scene"
        );

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
        // Joint weights are applied by the solver as column weights; the
        // stacked rows carry the task weighting only.
        let ones = DVector::from_element(self.info.n_joints, 1.0);
        self.tasks.update_all(model, now, &ones)?;

        let n = self.info.n_joints;
        for (problem, tasks) in self.hqp.problems.iter_mut().zip(&self.tasks.priorities) {
            let rows: usize = tasks.iter().map(Task::rows).sum();
            problem.nq = n;
            problem.eq_matrix = DMatrix::zeros(rows, n);
            problem.eq_vector = DVector::zeros(rows);
            stack_rows(tasks, &mut problem.eq_matrix, &mut problem.eq_vector);
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use puppet_core::config::{RobotModelConfig, TaskConfig, TaskType};
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
        // Straight arm: shoulder, elbow and tool frames stay collinear, so
        // a pure tip rotation is exactly reachable.
        js.elements[0].position = 0.4;
        js.elements[1].position = 0.0;
        model.update(&js, None).unwrap();
        model
    }

    fn joint_task(name: &str, priority: usize, joints: &[&str]) -> TaskConfig {
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
    fn joint_space_tracking() {
        let model = arm_model();
        let mut scene = VelocityScene::new();
        let config = SceneConfig {
            tasks: vec![joint_task("posture", 0, &["shoulder", "elbow"])],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();

        let y = DVector::from_column_slice(&[0.3, -0.1]);
        scene
            .task_mut("posture")
            .unwrap()
            .set_reference(&y, TimeStamp::from_secs(1.0))
            .unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        let command = scene.solve().unwrap();

        assert_relative_eq!(
            command.element("shoulder").unwrap().velocity.unwrap(),
            0.3,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            command.element("elbow").unwrap().velocity.unwrap(),
            -0.1,
            epsilon = 1e-9
        );
    }

    #[test]
    fn update_before_configure_fails() {
        let model = arm_model();
        let mut scene = VelocityScene::new();
        assert!(matches!(
            scene.update(&model, TimeStamp::from_secs(1.0)),
            Err(SceneError::NotConfigured)
        ));
    }

    #[test]
    fn solve_before_update_fails() {
        let model = arm_model();
        let mut scene = VelocityScene::new();
        let config = SceneConfig {
            tasks: vec![joint_task("posture", 0, &["shoulder"])],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();
        assert!(matches!(scene.solve(), Err(SceneError::NotUpdated)));
    }

    #[test]
    fn cartesian_task_tracks_twist() {
        let model = arm_model();
        let mut scene = VelocityScene::new();
        let config = SceneConfig {
            tasks: vec![TaskConfig {
                name: "ee_twist".into(),
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
        scene.set_norm_max(1.0e4);

        // Reference: rotate about y (the only reachable direction).
        let mut y = DVector::zeros(6);
        y[4] = 0.2;
        scene
            .task_mut("ee_twist")
            .unwrap()
            .set_reference(&y, TimeStamp::from_secs(1.0))
            .unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        scene.solve().unwrap();

        let status = scene.update_tasks_status(&model).unwrap();
        let ee = status.element("ee_twist").unwrap();
        // Achievable angular-y velocity matches the reference.
        assert_relative_eq!(ee.y_solution[4], 0.2, epsilon = 1e-6);
    }

    #[test]
    fn hierarchical_priorities_respected() {
        // Priority 0 fully constrains both joints; priority 1 is ignored.
        let model = arm_model();
        let mut scene = VelocityScene::new();
        let config = SceneConfig {
            tasks: vec![
                joint_task("all", 0, &["shoulder", "elbow"]),
                joint_task("conflicting", 1, &["shoulder"]),
            ],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();

        scene
            .task_mut("all")
            .unwrap()
            .set_reference(
                &DVector::from_column_slice(&[0.1, 0.2]),
                TimeStamp::from_secs(1.0),
            )
            .unwrap();
        scene
            .task_mut("conflicting")
            .unwrap()
            .set_reference(&DVector::from_column_slice(&[5.0]), TimeStamp::from_secs(1.0))
            .unwrap();

        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        let command = scene.solve().unwrap();
        assert_relative_eq!(
            command.element("shoulder").unwrap().velocity.unwrap(),
            0.1,
            epsilon = 1e-9
        );

        // Changing the lower-priority weight leaves the result untouched.
        scene
            .task_mut("conflicting")
            .unwrap()
            .set_weights(&DVector::from_column_slice(&[0.01]))
            .unwrap();
        scene.update(&model, TimeStamp::from_secs(1.0)).unwrap();
        let command2 = scene.solve().unwrap();
        assert_relative_eq!(
            command.element("shoulder").unwrap().velocity.unwrap(),
            command2.element("shoulder").unwrap().velocity.unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn timed_out_task_is_muted() {
        let model = arm_model();
        let mut scene = VelocityScene::new();
        let mut task = joint_task("posture", 0, &["shoulder", "elbow"]);
        task.timeout_seconds = 0.5;
        let config = SceneConfig {
            tasks: vec![task],
            joint_weights: Vec::new(),
        };
        scene.configure(&model, &config).unwrap();

        scene
            .task_mut("posture")
            .unwrap()
            .set_reference(
                &DVector::from_column_slice(&[0.3, 0.3]),
                TimeStamp::from_secs(1.0),
            )
            .unwrap();

        // Two seconds later the reference is stale; the task contributes
        // zero rows and the solution collapses to zero.
        scene.update(&model, TimeStamp::from_secs(3.0)).unwrap();
        let command = scene.solve().unwrap();
        assert_relative_eq!(
            command.element("shoulder").unwrap().velocity.unwrap(),
            0.0,
            epsilon = 1e-9
        );
        assert!(scene.task_mut("posture").unwrap().timeout);
    }
}
