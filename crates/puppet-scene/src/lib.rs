//! Task and constraint algebra plus per-tick HQP assembly for the puppet
//! whole-body control runtime.
//!
//! # Architecture
//!
//! ```text
//! task refs ──► Task.update ──► (A, y_ref)   ┐
//! contact/limit info ─► HardConstraint.update ├──► Scene.update ──► HierarchicalQp
//!                                             ┘        │
//!                                                      ▼
//!                                                 Scene.solve ──► JointCommand
//! ```
//!
//! Four scene shapes share the update machinery and differ in their
//! decision variable:
//!
//! - [`VelocityScene`] — `q̇`, one least-squares stack per priority,
//!   hierarchical WDLS solver.
//! - [`VelocityQpScene`] — `q̇`, single priority, quadratic cost with
//!   variable damping.
//! - [`AccelerationScene`] — `q̈`, tasks only.
//! - [`AccelerationTsidScene`] — `(q̈, τ, f_ext)` with rigid-body dynamics,
//!   contact and joint-limit constraints.

pub mod constraints;
pub mod error;
pub mod scenes;
pub mod task;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use constraints::{
    ConstraintKind, ContactsAccelerationConstraint, HardConstraint,
    JointLimitsAccelerationConstraint, RigidBodyDynamicsConstraint,
};
pub use error::SceneError;
pub use scenes::{
    AccelerationScene, AccelerationTsidScene, Scene, VelocityQpScene, VelocityScene,
};
pub use task::{Task, TaskLevel, TaskStatus, TasksStatus};
