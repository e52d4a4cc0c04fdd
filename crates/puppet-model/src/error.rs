use thiserror::Error;

use puppet_core::error::{ConfigError, StateError};
use puppet_urdf::UrdfError;

/// Errors from robot model configuration and per-tick queries.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URDF error: {0}")]
    Urdf(#[from] UrdfError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Joint '{0}' is not in the robot model")]
    UnknownJoint(String),

    #[error("Frame '{0}' is not in the robot model")]
    UnknownFrame(String),

    #[error("This back-end requires the root frame to be '{expected}', got '{got}'")]
    InvalidFrame { expected: String, got: String },

    #[error("Not implemented by this back-end: {0}")]
    NotImplemented(&'static str),
}
