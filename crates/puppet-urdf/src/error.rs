use std::path::PathBuf;

use thiserror::Error;

/// Errors from URDF parsing and description-level edits.
#[derive(Debug, Error)]
pub enum UrdfError {
    #[error("Failed to read URDF file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("URDF parse error: {0}")]
    Parse(String),

    #[error("URDF has no root link")]
    NoRootLink,

    #[error("Link not found: {0}")]
    MissingLink(String),

    #[error("Joint not found: {0}")]
    MissingJoint(String),

    #[error("Unsupported joint type: {0}")]
    UnsupportedJointType(String),

    #[error("Link name '{0}' already exists in the model")]
    DuplicateLink(String),
}
