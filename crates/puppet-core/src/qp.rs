//! Dense quadratic-program containers handed from scenes to solvers.
//!
//! A [`QpProblem`] is one priority level of the shape
//!
//! ```text
//! min ½ xᵀHx + gᵀx   s.t.  A·x = b,  lb_y ≤ C·x ≤ ub_y,  lb_x ≤ x ≤ ub_x
//! ```
//!
//! A [`HierarchicalQp`] is the ordered sequence of such problems (highest
//! priority first) plus the per-joint weight vector. This is the complete
//! contract between a scene and any solver back-end.

use nalgebra::{DMatrix, DVector};

use crate::time::TimeStamp;

/// Sentinel used for unconstrained bound slots.
pub const BOUND_SENTINEL: f64 = 1.0e6;

// ---------------------------------------------------------------------------
// QpProblem
// ---------------------------------------------------------------------------

/// One dense QP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QpProblem {
    /// Number of decision variables.
    pub nq: usize,
    /// Hessian, symmetric PSD after the regularizer step. Empty when the
    /// problem is a pure least-squares stack (velocity HQP path).
    pub hessian: DMatrix<f64>,
    /// Gradient.
    pub gradient: DVector<f64>,
    /// Equality constraint matrix.
    pub eq_matrix: DMatrix<f64>,
    /// Equality right-hand side.
    pub eq_vector: DVector<f64>,
    /// Inequality constraint matrix.
    pub ineq_matrix: DMatrix<f64>,
    /// Inequality lower bounds.
    pub lower_y: DVector<f64>,
    /// Inequality upper bounds.
    pub upper_y: DVector<f64>,
    /// Decision-variable lower bounds.
    pub lower_x: DVector<f64>,
    /// Decision-variable upper bounds.
    pub upper_x: DVector<f64>,
}

impl QpProblem {
    /// Resize all containers and reset them: matrices to zero, bounds to the
    /// unconstrained sentinels.
    pub fn resize(&mut self, nq: usize, n_eq: usize, n_ineq: usize) {
        self.nq = nq;
        self.hessian = DMatrix::zeros(nq, nq);
        self.gradient = DVector::zeros(nq);
        self.eq_matrix = DMatrix::zeros(n_eq, nq);
        self.eq_vector = DVector::zeros(n_eq);
        self.ineq_matrix = DMatrix::zeros(n_ineq, nq);
        self.lower_y = DVector::from_element(n_ineq, -BOUND_SENTINEL);
        self.upper_y = DVector::from_element(n_ineq, BOUND_SENTINEL);
        self.lower_x = DVector::from_element(nq, -BOUND_SENTINEL);
        self.upper_x = DVector::from_element(nq, BOUND_SENTINEL);
    }

    /// Number of equality rows.
    #[must_use]
    pub fn n_eq(&self) -> usize {
        self.eq_matrix.nrows()
    }

    /// Number of inequality rows.
    #[must_use]
    pub fn n_ineq(&self) -> usize {
        self.ineq_matrix.nrows()
    }

    /// Whether the problem carries a quadratic cost (as opposed to being a
    /// pure least-squares row stack).
    #[must_use]
    pub fn has_cost(&self) -> bool {
        self.hessian.nrows() > 0
    }

    /// Infinity norm of `H - Hᵀ`; zero for a symmetric Hessian.
    #[must_use]
    pub fn hessian_asymmetry(&self) -> f64 {
        let mut max = 0.0_f64;
        for i in 0..self.hessian.nrows() {
            for j in (i + 1)..self.hessian.ncols() {
                max = max.max((self.hessian[(i, j)] - self.hessian[(j, i)]).abs());
            }
        }
        max
    }
}

// ---------------------------------------------------------------------------
// HierarchicalQp
// ---------------------------------------------------------------------------

/// Ordered sequence of QPs, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalQp {
    /// One problem per priority level.
    pub problems: Vec<QpProblem>,
    /// Per-joint weights, applied column-wise by solvers.
    pub joint_weights: DVector<f64>,
    pub time: TimeStamp,
}

impl HierarchicalQp {
    /// Number of priority levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    /// Whether there are no priority levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_resets_to_sentinels() {
        let mut qp = QpProblem::default();
        qp.resize(4, 2, 3);
        assert_eq!(qp.nq, 4);
        assert_eq!(qp.n_eq(), 2);
        assert_eq!(qp.n_ineq(), 3);
        assert!(qp.lower_x.iter().all(|v| *v == -BOUND_SENTINEL));
        assert!(qp.upper_y.iter().all(|v| *v == BOUND_SENTINEL));
        assert!(qp.hessian.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn resize_is_idempotent() {
        let mut qp = QpProblem::default();
        qp.resize(4, 2, 0);
        qp.hessian[(0, 0)] = 5.0;
        qp.resize(4, 2, 0);
        assert_eq!(qp.hessian[(0, 0)], 0.0);
    }

    #[test]
    fn hessian_asymmetry_detects() {
        let mut qp = QpProblem::default();
        qp.resize(2, 0, 0);
        qp.hessian[(0, 1)] = 1.0;
        approx::assert_relative_eq!(qp.hessian_asymmetry(), 1.0);
        qp.hessian[(1, 0)] = 1.0;
        approx::assert_relative_eq!(qp.hessian_asymmetry(), 0.0);
    }

    #[test]
    fn has_cost_distinguishes_ls_stack() {
        let mut qp = QpProblem::default();
        assert!(!qp.has_cost());
        qp.resize(2, 0, 0);
        assert!(qp.has_cost());
    }

    #[test]
    fn hierarchical_qp_len() {
        let mut hqp = HierarchicalQp::default();
        assert!(hqp.is_empty());
        hqp.problems.push(QpProblem::default());
        assert_eq!(hqp.len(), 1);
    }
}
