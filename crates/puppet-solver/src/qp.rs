//! QP solver interface and the Clarabel back-end.
//!
//! [`HqpSolver`] is the one contract scenes program against: solve a
//! [`HierarchicalQp`] into a flat solution vector. [`ClarabelSolver`] handles
//! single-priority problems with a quadratic cost by mapping them onto
//! Clarabel's conic form: equality rows into the zero cone, inequality and
//! bound rows into the nonnegative cone.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use puppet_core::qp::{HierarchicalQp, QpProblem};

use crate::error::SolverError;

// ---------------------------------------------------------------------------
// HqpSolver
// ---------------------------------------------------------------------------

/// A solver that can consume a [`HierarchicalQp`].
pub trait HqpSolver {
    /// Solve the problem into `out` (sized `nq` of the first priority).
    fn solve(&mut self, hqp: &HierarchicalQp, out: &mut DVector<f64>) -> Result<(), SolverError>;
}

// ---------------------------------------------------------------------------
// ClarabelSolver
// ---------------------------------------------------------------------------

/// Interior-point QP back-end using Clarabel.
#[derive(Debug, Clone)]
pub struct ClarabelSolver {
    max_iter: u32,
    tolerance: f64,
}

impl ClarabelSolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_iter: 200,
            tolerance: 1e-8,
        }
    }

    /// Cap the interior-point iteration count.
    pub fn set_max_iter(&mut self, max_iter: u32) {
        self.max_iter = max_iter;
    }

    fn solve_problem(&self, problem: &QpProblem, out: &mut DVector<f64>) -> Result<(), SolverError> {
        let nq = problem.nq;
        if !problem.has_cost() {
            return Err(SolverError::Unsupported(
                "least-squares row stack without a cost; use the hierarchical solver",
            ));
        }
        if out.len() != nq {
            return Err(SolverError::DimensionMismatch {
                expected: nq,
                got: out.len(),
            });
        }

        let n_eq = problem.n_eq();
        let n_ineq = problem.n_ineq();

        // Constraint stack: equalities first (zero cone), then paired
        // one-sided rows for inequalities and variable bounds (nonnegative
        // cone):  C·x ≤ ub, −C·x ≤ −lb, x ≤ ub_x, −x ≤ −lb_x.
        let n_rows = n_eq + 2 * n_ineq + 2 * nq;
        let mut a_all = DMatrix::zeros(n_rows, nq);
        let mut b_all = DVector::zeros(n_rows);

        let mut row = 0;
        for i in 0..n_eq {
            for j in 0..nq {
                a_all[(row, j)] = problem.eq_matrix[(i, j)];
            }
            b_all[row] = problem.eq_vector[i];
            row += 1;
        }
        for i in 0..n_ineq {
            for j in 0..nq {
                a_all[(row, j)] = problem.ineq_matrix[(i, j)];
                a_all[(row + 1, j)] = -problem.ineq_matrix[(i, j)];
            }
            b_all[row] = problem.upper_y[i];
            b_all[row + 1] = -problem.lower_y[i];
            row += 2;
        }
        for j in 0..nq {
            a_all[(row, j)] = 1.0;
            a_all[(row + 1, j)] = -1.0;
            b_all[row] = problem.upper_x[j];
            b_all[row + 1] = -problem.lower_x[j];
            row += 2;
        }

        let p_csc = dmatrix_to_csc_upper_tri(&problem.hessian);
        let a_csc = dmatrix_to_csc(&a_all);
        let q: Vec<f64> = problem.gradient.iter().copied().collect();
        let b: Vec<f64> = b_all.iter().copied().collect();
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_rows - n_eq)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .verbose(false)
            .tol_gap_abs(self.tolerance)
            .tol_gap_rel(self.tolerance)
            .tol_feas(self.tolerance)
            .build()
            .map_err(|e| SolverError::Failure(e.to_string()))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings);
        solver.solve();

        let status = solver.solution.status;
        if !matches!(status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            return Err(SolverError::Failure(format!("{status:?}")));
        }
        debug!(?status, nq, n_eq, n_ineq, "QP solved");

        for (i, value) in solver.solution.x.iter().take(nq).enumerate() {
            out[i] = *value;
        }
        if out.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericError("QP solution"));
        }
        Ok(())
    }
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HqpSolver for ClarabelSolver {
    fn solve(&mut self, hqp: &HierarchicalQp, out: &mut DVector<f64>) -> Result<(), SolverError> {
        if hqp.len() != 1 {
            return Err(SolverError::Unsupported(
                "multi-priority problems; use the hierarchical solver",
            ));
        }
        self.solve_problem(&hqp.problems[0], out)
    }
}

// ---------------------------------------------------------------------------
// CSC conversion
// ---------------------------------------------------------------------------

/// Convert a dense matrix to a Clarabel `CscMatrix` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric dense matrix to upper-triangular `CscMatrix`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use puppet_core::TimeStamp;

    fn single_problem(problem: QpProblem) -> HierarchicalQp {
        let nq = problem.nq;
        HierarchicalQp {
            problems: vec![problem],
            joint_weights: DVector::from_element(nq, 1.0),
            time: TimeStamp::from_secs(1.0),
        }
    }

    #[test]
    fn equality_constrained_minimum_norm() {
        // min ½‖x‖² s.t. x₀ = 1 → x = (1, 0).
        let mut problem = QpProblem::default();
        problem.resize(2, 1, 0);
        problem.hessian = DMatrix::identity(2, 2);
        problem.eq_matrix[(0, 0)] = 1.0;
        problem.eq_vector[0] = 1.0;

        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(2);
        solver.solve(&single_problem(problem), &mut x).unwrap();

        assert_relative_eq!(x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn variable_bound_clamps_solution() {
        // min ½x² − 2x has its unconstrained optimum at 2; the bound x ≤ 1
        // is active.
        let mut problem = QpProblem::default();
        problem.resize(1, 0, 0);
        problem.hessian[(0, 0)] = 1.0;
        problem.gradient[0] = -2.0;
        problem.upper_x[0] = 1.0;

        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(1);
        solver.solve(&single_problem(problem), &mut x).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn inequality_rows_are_two_sided() {
        // min ½‖x‖² − (1,1)·x with 0.2 ≤ x₀ + x₁ ≤ 0.5: the unconstrained
        // optimum (1,1) violates the upper side.
        let mut problem = QpProblem::default();
        problem.resize(2, 0, 1);
        problem.hessian = DMatrix::identity(2, 2);
        problem.gradient = DVector::from_column_slice(&[-1.0, -1.0]);
        problem.ineq_matrix[(0, 0)] = 1.0;
        problem.ineq_matrix[(0, 1)] = 1.0;
        problem.lower_y[0] = 0.2;
        problem.upper_y[0] = 0.5;

        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(2);
        solver.solve(&single_problem(problem), &mut x).unwrap();
        assert_relative_eq!(x[0] + x[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(x[0], x[1], epsilon = 1e-6);
    }

    #[test]
    fn least_squares_cost_form() {
        // H = AᵀA, g = −Aᵀy reproduces the LS solution of A·x = y.
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 1.0, -1.0]);
        let y = DVector::from_column_slice(&[0.4, -0.2]);
        let mut problem = QpProblem::default();
        problem.resize(3, 0, 0);
        problem.hessian = a.transpose() * &a;
        // Regularize the rank-deficient normal matrix.
        for i in 0..3 {
            problem.hessian[(i, i)] += 1e-8;
        }
        problem.gradient = -(a.transpose() * &y);

        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(3);
        solver.solve(&single_problem(problem), &mut x).unwrap();

        let achieved = &a * &x;
        assert_relative_eq!(achieved[0], 0.4, epsilon = 1e-5);
        assert_relative_eq!(achieved[1], -0.2, epsilon = 1e-5);
    }

    #[test]
    fn multi_priority_is_unsupported() {
        let mut p0 = QpProblem::default();
        p0.resize(1, 0, 0);
        p0.hessian[(0, 0)] = 1.0;
        let p1 = p0.clone();
        let hqp = HierarchicalQp {
            problems: vec![p0, p1],
            joint_weights: DVector::from_element(1, 1.0),
            time: TimeStamp::from_secs(1.0),
        };
        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(1);
        assert!(matches!(
            solver.solve(&hqp, &mut x),
            Err(SolverError::Unsupported(_))
        ));
    }

    #[test]
    fn pure_row_stack_is_rejected() {
        let mut problem = QpProblem::default();
        problem.nq = 2;
        problem.eq_matrix = DMatrix::identity(2, 2);
        problem.eq_vector = DVector::zeros(2);
        let mut solver = ClarabelSolver::new();
        let mut x = DVector::zeros(2);
        assert!(matches!(
            solver.solve(&single_problem(problem), &mut x),
            Err(SolverError::Unsupported(_))
        ));
    }
}
