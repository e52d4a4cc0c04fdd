//! Robot model abstraction for the puppet whole-body control runtime.
//!
//! A robot model answers kinematics and dynamics queries against the most
//! recent measured state:
//!
//! ```text
//! JointState ──► RobotModel::update ──► {FK, J, J̇, H, C, S, CoM}
//! ```
//!
//! Two back-ends implement the [`RobotModel`] trait:
//!
//! - [`SerialTreeModel`] — analytic kinematics and dynamics over the URDF
//!   spanning tree, optionally with a virtual floating-base linkage.
//! - [`SubmechanismModel`] — parallel mechanisms with linear couplings,
//!   reduced into actuation space on top of the serial back-end.

pub mod error;
pub mod model;
pub mod parallel;
pub mod serial;
pub mod spatial;
pub mod tree;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ModelError;
pub use model::{
    floating_base_coordinates, ModelCapabilities, ModelVariant, RobotModel,
};
pub use parallel::{Coupling, SubmechanismDescription, SubmechanismModel};
pub use serial::SerialTreeModel;
pub use tree::KinematicTree;
