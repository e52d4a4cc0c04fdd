//! URDF parsing and robot description handling for puppet.
//!
//! Provides types for representing a robot's kinematic tree (links, joints,
//! inertials), parsing URDF XML files, and the two description-level edits
//! the control runtime needs before a model is built: joint blacklisting and
//! virtual floating-base injection.

pub mod error;
pub mod parser;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::UrdfError;
pub use parser::{parse_file, parse_string};
pub use types::{Inertial, JointData, JointLimits, JointType, LinkData, Origin, UrdfModel};
