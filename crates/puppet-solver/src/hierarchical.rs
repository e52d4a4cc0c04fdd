//! Hierarchical weighted damped least-squares solver.
//!
//! Solves a stack of equality task levels by classical hierarchical
//! least-squares: each priority is solved with a weighted damped
//! pseudo-inverse in the nullspace of all higher priorities, so lower
//! priorities can never alter higher-priority residuals:
//!
//! ```text
//! x_p = x_{p−1} + (A_p·N_{p−1})⁺_W · (y_p − A_p·x_{p−1})
//! N_p = N_{p−1} · (I − (A_p·N_{p−1})⁺ · A_p·N_{p−1})
//! ```

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use puppet_core::qp::HierarchicalQp;

use crate::error::SolverError;
use crate::pseudo_inverse::GeneralizedInverse;
use crate::qp::HqpSolver;

// ---------------------------------------------------------------------------
// PriorityData
// ---------------------------------------------------------------------------

/// Debug information for one solved priority level.
#[derive(Debug, Clone, Default)]
pub struct PriorityData {
    /// Priority index (0 = highest).
    pub priority: usize,
    /// Reference vector of this level.
    pub y_des: DVector<f64>,
    /// Task values achieved by the accumulated solution. Differs from
    /// `y_des` through damping and nullspace degeneracy.
    pub y_solution: DVector<f64>,
    /// Singular values of the projected, weighted task matrix.
    pub singular_values: DVector<f64>,
    /// Damping factor used for the inversion on this level.
    pub damping: f64,
}

// ---------------------------------------------------------------------------
// HierarchicalWdlsSolver
// ---------------------------------------------------------------------------

/// Hierarchical weighted damped least-squares solver over joint velocities.
pub struct HierarchicalWdlsSolver {
    n_joints: usize,
    rows_per_priority: Vec<usize>,
    inverses: Vec<GeneralizedInverse>,
    norm_max: f64,
    priority_data: Vec<PriorityData>,
}

impl HierarchicalWdlsSolver {
    /// Create an unconfigured solver with the default solution-norm bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            n_joints: 0,
            rows_per_priority: Vec::new(),
            inverses: Vec::new(),
            norm_max: 10.0,
            priority_data: Vec::new(),
        }
    }

    /// Size the solver for a problem shape. The single allocating entry
    /// point; `solve` only reuses these buffers.
    pub fn configure(
        &mut self,
        rows_per_priority: &[usize],
        n_joints: usize,
    ) -> Result<(), SolverError> {
        if rows_per_priority.is_empty() || n_joints == 0 {
            return Err(SolverError::Unsupported("empty problem shape"));
        }
        self.n_joints = n_joints;
        self.rows_per_priority = rows_per_priority.to_vec();
        self.inverses = rows_per_priority
            .iter()
            .map(|rows| {
                let mut inverse = GeneralizedInverse::new(*rows, n_joints);
                inverse.set_norm_max_damping(self.norm_max);
                inverse
            })
            .collect();
        self.priority_data = rows_per_priority
            .iter()
            .enumerate()
            .map(|(priority, rows)| PriorityData {
                priority,
                y_des: DVector::zeros(*rows),
                y_solution: DVector::zeros(*rows),
                singular_values: DVector::zeros(n_joints.min(*rows)),
                damping: 0.0,
            })
            .collect();
        debug!(
            priorities = rows_per_priority.len(),
            n_joints, "configured hierarchical WDLS solver"
        );
        Ok(())
    }

    /// Bound on the solution norm enforced through automatic damping.
    pub fn set_norm_max(&mut self, norm_max: f64) {
        self.norm_max = norm_max;
        for inverse in &mut self.inverses {
            inverse.set_norm_max_damping(norm_max);
        }
    }

    /// Per-priority debug data of the last solve.
    #[must_use]
    pub fn priority_data(&self) -> &[PriorityData] {
        &self.priority_data
    }
}

impl Default for HierarchicalWdlsSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HqpSolver for HierarchicalWdlsSolver {
    fn solve(&mut self, hqp: &HierarchicalQp, out: &mut DVector<f64>) -> Result<(), SolverError> {
        if hqp.len() != self.rows_per_priority.len() {
            return Err(SolverError::NotConfigured);
        }
        for (problem, rows) in hqp.problems.iter().zip(&self.rows_per_priority) {
            if problem.n_eq() != *rows || problem.nq != self.n_joints {
                return Err(SolverError::NotConfigured);
            }
        }
        if out.len() != self.n_joints {
            return Err(SolverError::DimensionMismatch {
                expected: self.n_joints,
                got: out.len(),
            });
        }

        let n = self.n_joints;
        out.fill(0.0);
        let mut nullspace = DMatrix::<f64>::identity(n, n);

        for (p, problem) in hqp.problems.iter().enumerate() {
            let a = &problem.eq_matrix;
            let y = &problem.eq_vector;

            let projected = a * &nullspace;
            let inverse = &mut self.inverses[p];
            if hqp.joint_weights.len() == n {
                inverse.set_col_weights(&hqp.joint_weights)?;
            }

            let mut projected_inv = DMatrix::zeros(n, a.nrows());
            inverse.compute_inverse(&projected, &mut projected_inv)?;

            let residual = y - a * &*out;
            *out += &projected_inv * residual;

            // Project subsequent priorities into the remaining nullspace.
            nullspace =
                &nullspace * (DMatrix::identity(n, n) - &projected_inv * &projected);

            let data = &mut self.priority_data[p];
            data.y_des = y.clone();
            data.y_solution = a * &*out;
            data.singular_values = inverse.singular_values().clone();
            data.damping = inverse.damping();
        }

        if out.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericError("hierarchical solution"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
