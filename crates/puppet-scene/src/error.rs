use thiserror::Error;

use puppet_core::error::ConfigError;
use puppet_model::ModelError;
use puppet_solver::SolverError;

/// Errors from scene configuration, assembly and solving.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Scene has not been configured")]
    NotConfigured,

    #[error("Scene has not been updated this tick")]
    NotUpdated,

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task '{name}' has a type this scene does not support: {reason}")]
    UnsupportedTaskType { name: String, reason: &'static str },

    #[error("This scene requires a single priority level, got {0}")]
    MultiplePriorities(usize),
}
