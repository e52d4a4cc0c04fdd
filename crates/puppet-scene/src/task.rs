//! Tasks: weighted linear forms in the scene's decision variables.
//!
//! A task turns the current model state and a user reference into a row
//! block `A·x = y_ref` plus weighting metadata. The scene drives the
//! lifecycle each tick: `check_timeout → update → apply_weighting`, with the
//! effective rows
//!
//! ```text
//! Aw[i,:] = weights_root[i] · A[i,:] · activation · (1 − timeout) · joint_weights[:]
//! ```

use nalgebra::{DMatrix, DVector, Vector3};

use puppet_core::config::{TaskConfig, TaskType};
use puppet_core::time::TimeStamp;
use puppet_model::spatial::twist_to_root;
use puppet_model::RobotModel;

use crate::error::SceneError;

/// Whether a task references velocities or accelerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLevel {
    Velocity,
    Acceleration,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One configured task, owned by a scene.
#[derive(Debug, Clone)]
pub struct Task {
    pub config: TaskConfig,
    pub level: TaskLevel,
    /// Task matrix (`n_y × n_x`).
    pub a: DMatrix<f64>,
    /// Weighted task matrix, rebuilt by [`Task::apply_weighting`].
    pub aw: DMatrix<f64>,
    /// Raw reference, in the task's native frame.
    pub y_ref: DVector<f64>,
    /// Reference expressed in the task root frame.
    pub y_ref_root: DVector<f64>,
    /// Configured row weights.
    pub weights: DVector<f64>,
    /// Row weights expressed in the task root frame.
    pub weights_root: DVector<f64>,
    /// Activation in `[0, 1]`.
    pub activation: f64,
    /// Set by [`Task::check_timeout`] when the reference went stale.
    pub timeout: bool,
    /// Time of the last reference update; drives timeout supervision.
    pub time: TimeStamp,
}

impl Task {
    /// Create a task sized for `n_x` decision variables.
    pub fn new(config: TaskConfig, level: TaskLevel, n_x: usize) -> Result<Self, SceneError> {
        config.validate()?;
        if level == TaskLevel::Velocity && config.task_type == TaskType::Com {
            return Err(SceneError::UnsupportedTaskType {
                name: config.name.clone(),
                reason: "center-of-mass tasks need an acceleration scene",
            });
        }
        let n_y = config.rows();
        let weights = DVector::from_column_slice(&config.weights);
        Ok(Self {
            activation: config.activation,
            weights_root: weights.clone(),
            weights,
            level,
            a: DMatrix::zeros(n_y, n_x),
            aw: DMatrix::zeros(n_y, n_x),
            y_ref: DVector::zeros(n_y),
            y_ref_root: DVector::zeros(n_y),
            timeout: false,
            time: TimeStamp::null(),
            config,
        })
    }

    /// Number of task rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    /// Set a new reference and stamp the timeout clock.
    pub fn set_reference(&mut self, y: &DVector<f64>, now: TimeStamp) -> Result<(), SceneError> {
        if y.len() != self.y_ref.len() {
            return Err(puppet_core::error::ConfigError::InvalidValue {
                field: format!("reference ({})", self.config.name),
                message: format!("expected {} rows, got {}", self.y_ref.len(), y.len()),
            }
            .into());
        }
        self.y_ref.copy_from(y);
        self.time = now;
        Ok(())
    }

    /// Set the activation value.
    pub fn set_activation(&mut self, activation: f64) -> Result<(), SceneError> {
        if !(0.0..=1.0).contains(&activation) {
            return Err(puppet_core::error::ConfigError::InvalidValue {
                field: format!("activation ({})", self.config.name),
                message: format!("must be in [0, 1], got {activation}"),
            }
            .into());
        }
        self.activation = activation;
        Ok(())
    }

    /// Replace the row weights.
    pub fn set_weights(&mut self, weights: &DVector<f64>) -> Result<(), SceneError> {
        if weights.len() != self.weights.len() {
            return Err(puppet_core::error::ConfigError::InvalidValue {
                field: format!("weights ({})", self.config.name),
                message: format!("expected {} rows, got {}", self.weights.len(), weights.len()),
            }
            .into());
        }
        self.weights.copy_from(weights);
        Ok(())
    }

    /// Timeout supervision: a stale (or never set) reference mutes the task.
    pub fn check_timeout(&mut self, now: TimeStamp) {
        if self.config.timeout_seconds <= 0.0 {
            self.timeout = false;
            return;
        }
        self.timeout = self.time.is_null()
            || (now - self.time).as_secs_f64() > self.config.timeout_seconds;
    }

    /// Rebuild `A`, `y_ref_root` and `weights_root` from the current model
    /// state.
    pub fn update(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        match self.config.task_type {
            TaskType::Cartesian => self.update_cartesian(model)?,
            TaskType::Joint => self.update_joint(model)?,
            TaskType::Com => self.update_com(model)?,
        }
        // A switched-off task must not latch its old reference: when it
        // comes back, it restarts from a clean slate.
        if self.activation == 0.0 {
            self.y_ref.fill(0.0);
            self.y_ref_root.fill(0.0);
        }
        Ok(())
    }

    fn update_cartesian(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        let root = &self.config.root_frame;
        let tip = &self.config.tip_frame;
        self.a = model.space_jacobian(root, tip)?;
        match self.level {
            TaskLevel::Velocity => {
                // The twist reference is given in the tip frame.
                let pose = model.rigid_body_state(root, tip)?.pose;
                let y = nalgebra::Vector6::from_iterator(self.y_ref.iter().copied());
                let y_root = twist_to_root(&pose, &y);
                self.y_ref_root = DVector::from_iterator(6, y_root.iter().copied());

                // Weights follow the reference frame: rotate each triplet,
                // magnitudes only.
                let rot = pose.rotation;
                let lin = rot * Vector3::new(self.weights[0], self.weights[1], self.weights[2]);
                let ang = rot * Vector3::new(self.weights[3], self.weights[4], self.weights[5]);
                for k in 0..3 {
                    self.weights_root[k] = lin[k].abs();
                    self.weights_root[k + 3] = ang[k].abs();
                }
            }
            TaskLevel::Acceleration => {
                // The spatial-acceleration reference is given in the root
                // frame; subtract the J̇·q̇ bias so A·q̈ = y_ref_root tracks
                // the requested acceleration.
                let bias = model.spatial_acceleration_bias(root, tip)?;
                for k in 0..6 {
                    self.y_ref_root[k] = self.y_ref[k] - bias[k];
                }
                self.weights_root.copy_from(&self.weights);
            }
        }
        Ok(())
    }

    fn update_joint(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        self.a.fill(0.0);
        for (row, name) in self.config.joint_names.iter().enumerate() {
            let col = model.joint_index(name)?;
            self.a[(row, col)] = 1.0;
        }
        self.y_ref_root.copy_from(&self.y_ref);
        self.weights_root.copy_from(&self.weights);
        Ok(())
    }

    fn update_com(&mut self, model: &dyn RobotModel) -> Result<(), SceneError> {
        self.a = model.com_jacobian()?;
        self.y_ref_root.copy_from(&self.y_ref);
        self.weights_root.copy_from(&self.weights);
        Ok(())
    }

    /// Fold weights, activation, timeout and per-joint weights into `Aw`.
    pub fn apply_weighting(&mut self, joint_weights: &DVector<f64>) {
        let gate = self.activation * if self.timeout { 0.0 } else { 1.0 };
        for i in 0..self.a.nrows() {
            let row_scale = self.weights_root[i] * gate;
            for j in 0..self.a.ncols() {
                self.aw[(i, j)] = row_scale * self.a[(i, j)] * joint_weights[j];
            }
        }
    }

    /// Row-weighted reference matching [`Task::apply_weighting`].
    #[must_use]
    pub fn weighted_reference(&self) -> DVector<f64> {
        let gate = self.activation * if self.timeout { 0.0 } else { 1.0 };
        DVector::from_iterator(
            self.y_ref_root.len(),
            self.y_ref_root
                .iter()
                .zip(self.weights_root.iter())
                .map(|(y, w)| y * w * gate),
        )
    }
}

// ---------------------------------------------------------------------------
// Task status telemetry
// ---------------------------------------------------------------------------

/// Per-task telemetry produced by `update_tasks_status`.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub name: String,
    pub time: TimeStamp,
    pub activation: f64,
    pub timeout: bool,
    pub weights: DVector<f64>,
    /// Reference handed to the solver.
    pub y_ref: DVector<f64>,
    /// Task value achieved by the measured robot state.
    pub y: DVector<f64>,
    /// Task value achievable by the solver output.
    pub y_solution: DVector<f64>,
}

/// Status of all tasks of a scene.
#[derive(Debug, Clone, Default)]
pub struct TasksStatus {
    pub elements: Vec<TaskStatus>,
}

impl TasksStatus {
    /// Status of a task by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&TaskStatus> {
        self.elements.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
