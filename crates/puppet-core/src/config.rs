//! Configuration types for robot models, tasks and scenes.
//!
//! All configs are plain serde types so a whole scene can be described in a
//! TOML document and loaded with [`SceneConfig::from_file`]. `validate()`
//! checks the structural invariants before any allocation happens.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::RigidBodyStateSE3;

/// Canonical names of the six virtual floating-base joints, in the order in
/// which they are prepended to the joint list.
pub const FLOATING_BASE_JOINT_NAMES: [&str; 6] =
    ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

fn default_world_frame() -> String {
    "world".into()
}
const fn default_activation() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// RobotModelConfig
// ---------------------------------------------------------------------------

/// Configuration of a robot model back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotModelConfig {
    /// Path to the URDF file.
    pub file: PathBuf,

    /// Path to the submechanism description (parallel back-end only).
    #[serde(default)]
    pub submechanism_file: Option<PathBuf>,

    /// Canonical joint ordering. Empty means "take it from the model". If
    /// `floating_base` is set, the six virtual joints are implicit and must
    /// not be listed here.
    #[serde(default)]
    pub joint_names: Vec<String>,

    /// Actuated joints, a subset of `joint_names`. Empty means "all
    /// non-virtual joints".
    #[serde(default)]
    pub actuated_joint_names: Vec<String>,

    /// Joints stripped from the URDF before loading.
    #[serde(default)]
    pub joint_blacklist: Vec<String>,

    /// Link names used as contact points.
    #[serde(default)]
    pub contact_points: Vec<String>,

    /// Whether to inject a virtual 6-DoF floating-base linkage under the
    /// model root.
    #[serde(default)]
    pub floating_base: bool,

    /// Name of the world frame the floating base moves in.
    #[serde(default = "default_world_frame")]
    pub world_frame_id: String,

    /// Initial floating-base state.
    #[serde(default)]
    pub floating_base_state: RigidBodyStateSE3,
}

impl RobotModelConfig {
    /// Minimal config for a fixed-base robot.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            submechanism_file: None,
            joint_names: Vec::new(),
            actuated_joint_names: Vec::new(),
            joint_blacklist: Vec::new(),
            contact_points: Vec::new(),
            floating_base: false,
            world_frame_id: default_world_frame(),
            floating_base_state: RigidBodyStateSE3::default(),
        }
    }

    /// Validate structural invariants that do not require the parsed model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("file".into()));
        }
        for name in &self.actuated_joint_names {
            if !self.joint_names.is_empty() && !self.joint_names.contains(name) {
                return Err(ConfigError::ActuatedJointNotInJoints(name.clone()));
            }
        }
        if self.floating_base {
            for (i, name) in self
                .joint_names
                .iter()
                .take(FLOATING_BASE_JOINT_NAMES.len())
                .enumerate()
            {
                if name == FLOATING_BASE_JOINT_NAMES[i] {
                    continue;
                }
                // Virtual joints are implicit; listing anything else first is
                // an inconsistent ordering.
                if FLOATING_BASE_JOINT_NAMES.contains(&name.as_str()) {
                    return Err(ConfigError::InconsistentFloatingBase(name.clone(), i));
                }
            }
            if !self.floating_base_state.has_valid_pose() {
                return Err(ConfigError::InvalidValue {
                    field: "floating_base_state".into(),
                    message: "initial pose has a non-unit quaternion".into(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TaskConfig
// ---------------------------------------------------------------------------

/// Kind of motion objective a task encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Cartesian pose/twist/acceleration tracking between two frames.
    Cartesian,
    /// Joint-space tracking of a named joint subset.
    Joint,
    /// Center-of-mass tracking.
    Com,
}

/// Configuration of a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique name within the scene.
    pub name: String,

    /// Task kind.
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Priority, 0-based; 0 is the highest priority.
    #[serde(default)]
    pub priority: usize,

    /// Per-row task weights. Length must equal the task's row count
    /// (6 for Cartesian, 3 for CoM, one per joint for joint tasks).
    pub weights: Vec<f64>,

    /// Initial activation in `[0, 1]`.
    #[serde(default = "default_activation")]
    pub activation: f64,

    /// Reference timeout in seconds. Zero disables timeout supervision.
    #[serde(default)]
    pub timeout_seconds: f64,

    /// Cartesian tasks: root frame of the task chain.
    #[serde(default)]
    pub root_frame: String,

    /// Cartesian tasks: tip frame of the task chain.
    #[serde(default)]
    pub tip_frame: String,

    /// Joint tasks: the controlled joints.
    #[serde(default)]
    pub joint_names: Vec<String>,
}

impl TaskConfig {
    /// Expected number of task rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        match self.task_type {
            TaskType::Cartesian => 6,
            TaskType::Com => 3,
            TaskType::Joint => self.joint_names.len(),
        }
    }

    /// Validate a single task configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if self.weights.len() != self.rows() {
            return Err(ConfigError::InvalidValue {
                field: format!("weights ({})", self.name),
                message: format!("expected {} entries, got {}", self.rows(), self.weights.len()),
            });
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidValue {
                field: format!("weights ({})", self.name),
                message: "weights must be finite and non-negative".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.activation) {
            return Err(ConfigError::InvalidValue {
                field: format!("activation ({})", self.name),
                message: format!("must be in [0, 1], got {}", self.activation),
            });
        }
        if self.timeout_seconds < 0.0 || !self.timeout_seconds.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: format!("timeout_seconds ({})", self.name),
                message: "must be non-negative".into(),
            });
        }
        match self.task_type {
            TaskType::Cartesian => {
                if self.root_frame.is_empty() || self.tip_frame.is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "root_frame/tip_frame ({})",
                        self.name
                    )));
                }
            }
            TaskType::Joint => {
                if self.joint_names.is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "joint_names ({})",
                        self.name
                    )));
                }
            }
            TaskType::Com => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SceneConfig
// ---------------------------------------------------------------------------

/// A full scene description: task set plus scene-level parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    /// All tasks, across all priorities.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,

    /// Per-joint weights; empty means all ones.
    #[serde(default)]
    pub joint_weights: Vec<f64>,
}

impl SceneConfig {
    /// Load and validate a scene description from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all tasks and uniqueness of their names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, task) in self.tasks.iter().enumerate() {
            task.validate()?;
            if self.tasks[..i].iter().any(|t| t.name == task.name) {
                return Err(ConfigError::DuplicateTaskName(task.name.clone()));
            }
        }
        if self.joint_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "joint_weights".into(),
                message: "weights must be finite and non-negative".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_task(name: &str) -> TaskConfig {
        TaskConfig {
            name: name.into(),
            task_type: TaskType::Cartesian,
            priority: 0,
            weights: vec![1.0; 6],
            activation: 1.0,
            timeout_seconds: 0.0,
            root_frame: "base".into(),
            tip_frame: "ee".into(),
            joint_names: Vec::new(),
        }
    }

    // -- RobotModelConfig --

    #[test]
    fn model_config_minimal_is_valid() {
        assert!(RobotModelConfig::new("robot.urdf").validate().is_ok());
    }

    #[test]
    fn model_config_missing_file() {
        let cfg = RobotModelConfig::new("");
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn model_config_actuated_subset() {
        let mut cfg = RobotModelConfig::new("robot.urdf");
        cfg.joint_names = vec!["a".into(), "b".into()];
        cfg.actuated_joint_names = vec!["c".into()];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ActuatedJointNotInJoints(_))
        ));
    }

    #[test]
    fn model_config_floating_base_ordering() {
        let mut cfg = RobotModelConfig::new("robot.urdf");
        cfg.floating_base = true;
        // rot_x listed before the translation joints
        cfg.joint_names = vec!["rot_x".into(), "trans_x".into()];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InconsistentFloatingBase(_, 0))
        ));
    }

    #[test]
    fn model_config_floating_base_canonical_ok() {
        let mut cfg = RobotModelConfig::new("robot.urdf");
        cfg.floating_base = true;
        cfg.joint_names = FLOATING_BASE_JOINT_NAMES
            .iter()
            .map(|s| (*s).into())
            .chain(["elbow".into()])
            .collect();
        assert!(cfg.validate().is_ok());
    }

    // -- TaskConfig --

    #[test]
    fn task_config_valid() {
        assert!(cart_task("ee_pose").validate().is_ok());
    }

    #[test]
    fn task_config_wrong_weight_count() {
        let mut cfg = cart_task("ee_pose");
        cfg.weights = vec![1.0; 3];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn task_config_activation_range() {
        let mut cfg = cart_task("ee_pose");
        cfg.activation = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn task_config_joint_requires_names() {
        let cfg = TaskConfig {
            name: "posture".into(),
            task_type: TaskType::Joint,
            priority: 1,
            weights: vec![],
            activation: 1.0,
            timeout_seconds: 0.0,
            root_frame: String::new(),
            tip_frame: String::new(),
            joint_names: Vec::new(),
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn task_config_rows() {
        assert_eq!(cart_task("t").rows(), 6);
        let mut jnt = cart_task("t");
        jnt.task_type = TaskType::Joint;
        jnt.joint_names = vec!["a".into(), "b".into()];
        assert_eq!(jnt.rows(), 2);
        let mut com = cart_task("t");
        com.task_type = TaskType::Com;
        assert_eq!(com.rows(), 3);
    }

    // -- SceneConfig --

    #[test]
    fn scene_config_duplicate_names() {
        let cfg = SceneConfig {
            tasks: vec![cart_task("a"), cart_task("a")],
            joint_weights: Vec::new(),
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateTaskName(_))
        ));
    }

    #[test]
    fn scene_config_from_toml() {
        let doc = r#"
            joint_weights = [1.0, 1.0, 0.5]

            [[tasks]]
            name = "ee_twist"
            type = "cartesian"
            priority = 0
            weights = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
            root_frame = "base"
            tip_frame = "ee"

            [[tasks]]
            name = "posture"
            type = "joint"
            priority = 1
            weights = [1.0, 1.0]
            joint_names = ["j1", "j2"]
        "#;
        let cfg: SceneConfig = toml::from_str(doc).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tasks.len(), 2);
        assert_eq!(cfg.tasks[0].task_type, TaskType::Cartesian);
        assert_eq!(cfg.tasks[1].priority, 1);
        approx::assert_relative_eq!(cfg.tasks[1].activation, 1.0);
    }
}
