// puppet-core: Types, configuration, time and errors for the puppet
// whole-body control runtime.

pub mod config;
pub mod error;
pub mod qp;
pub mod time;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{
    RobotModelConfig, SceneConfig, TaskConfig, TaskType, FLOATING_BASE_JOINT_NAMES,
};
pub use error::{ConfigError, StateError};
pub use qp::{HierarchicalQp, QpProblem};
pub use time::TimeStamp;
pub use types::{
    ActiveContacts, CommandElement, JointCommand, JointLimitRange, JointLimits, JointState,
    JointStateElement, RigidBodyStateSE3, Wrench, Wrenches,
};

/// Commonly used items.
pub mod prelude {
    pub use crate::config::{RobotModelConfig, SceneConfig, TaskConfig, TaskType};
    pub use crate::error::{ConfigError, StateError};
    pub use crate::qp::{HierarchicalQp, QpProblem};
    pub use crate::time::TimeStamp;
    pub use crate::types::{
        ActiveContacts, JointCommand, JointState, RigidBodyStateSE3, Wrench, Wrenches,
    };
}
