use thiserror::Error;

/// Configuration errors.
///
/// Raised synchronously by `configure`-type entry points. A failed configure
/// leaves the target object in its pre-configure state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Actuated joint '{0}' is not in the joint name list")]
    ActuatedJointNotInJoints(String),

    #[error("Contact point '{0}' is not a link in the robot model")]
    ContactPointNotALink(String),

    #[error(
        "Floating-base model requires the first six joints to be the virtual \
         floating-base joints, got '{0}' at index {1}"
    )]
    InconsistentFloatingBase(String, usize),

    #[error("Duplicate task name: {0}")]
    DuplicateTaskName(String),

    #[error("Incompatible configuration: {0}")]
    Incompatible(String),
}

/// Per-tick state validation errors.
///
/// Raised by `update`-type operations and by queries on stale state. A failed
/// update discards the outputs of that tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Query before first successful update")]
    NotUpdated,

    #[error("Joint state size mismatch: {names} names vs {elements} elements")]
    JointStateSizeMismatch { names: usize, elements: usize },

    #[error("Joint state has a null timestamp")]
    NullTimestamp,

    #[error("Joint state timestamp went backwards")]
    NonMonotoneTimestamp,

    #[error("Joint state of '{0}' contains a non-finite value")]
    NonFiniteJointState(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),
}
