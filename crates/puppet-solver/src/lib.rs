//! Solver back-ends for the puppet whole-body control runtime.
//!
//! Three pieces:
//!
//! - [`GeneralizedInverse`] — weighted, damped Moore-Penrose inverse with
//!   automatic norm-bounded damping.
//! - [`HierarchicalWdlsSolver`] — classical hierarchical least-squares over
//!   a stack of equality task levels (the velocity HQP path).
//! - [`ClarabelSolver`] — interior-point QP back-end for single-priority
//!   problems with quadratic cost, equality/inequality rows and variable
//!   bounds.
//!
//! Both solvers implement [`HqpSolver`], the contract scenes program
//! against.

pub mod error;
pub mod hierarchical;
pub mod pseudo_inverse;
pub mod qp;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::SolverError;
pub use hierarchical::{HierarchicalWdlsSolver, PriorityData};
pub use pseudo_inverse::{DampingMode, GeneralizedInverse};
pub use qp::{ClarabelSolver, HqpSolver};
