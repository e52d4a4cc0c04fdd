//! Weighted, damped Moore-Penrose inverse.
//!
//! Computes `M⁺ = (Wᵣ·M·Wᵧ)⁺` through a thin SVD, with per-row and
//! per-column weights and three damping modes. Zero-weighted rows and
//! columns are eliminated before the decomposition and reinserted as zero
//! rows/columns of the result, so a zero column weight makes the
//! corresponding output column exactly zero.

use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;

/// Singular values below this threshold are truncated when undamped.
const SINGULAR_VALUE_EPS: f64 = 1e-10;

/// How the damping factor `λ` is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DampingMode {
    /// No damping; small singular values are truncated.
    None,
    /// Fixed user-set `λ`.
    Constant(f64),
    /// Automatic: the smallest `λ` that keeps the worst-case solution norm
    /// below the given bound. Not binding (λ = 0) while
    /// `σ_min ≥ 1/norm_max`.
    NormMax(f64),
}

/// Weighted damped pseudo-inverse with reusable weight configuration.
#[derive(Debug, Clone)]
pub struct GeneralizedInverse {
    rows: usize,
    cols: usize,
    row_weights: DVector<f64>,
    col_weights: DVector<f64>,
    damping_mode: DampingMode,
    damping: f64,
    singular_values: DVector<f64>,
}

impl GeneralizedInverse {
    /// Create an inverse for `rows × cols` inputs with unit weights and no
    /// damping.
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            row_weights: DVector::from_element(rows, 1.0),
            col_weights: DVector::from_element(cols, 1.0),
            damping_mode: DampingMode::None,
            damping: 0.0,
            singular_values: DVector::zeros(0),
        }
    }

    /// Set per-row weights.
    pub fn set_row_weights(&mut self, weights: &DVector<f64>) -> Result<(), SolverError> {
        if weights.len() != self.rows {
            return Err(SolverError::DimensionMismatch {
                expected: self.rows,
                got: weights.len(),
            });
        }
        self.row_weights.copy_from(weights);
        Ok(())
    }

    /// Set per-column weights.
    pub fn set_col_weights(&mut self, weights: &DVector<f64>) -> Result<(), SolverError> {
        if weights.len() != self.cols {
            return Err(SolverError::DimensionMismatch {
                expected: self.cols,
                got: weights.len(),
            });
        }
        self.col_weights.copy_from(weights);
        Ok(())
    }

    /// Use a fixed damping factor.
    pub fn set_constant_damping(&mut self, damping: f64) {
        self.damping_mode = DampingMode::Constant(damping);
    }

    /// Bound the worst-case solution norm; damping activates only near
    /// singularities.
    pub fn set_norm_max_damping(&mut self, norm_max: f64) {
        self.damping_mode = DampingMode::NormMax(norm_max);
    }

    /// Damping factor used by the last [`Self::compute_inverse`].
    #[must_use]
    pub fn damping(&self) -> f64 {
        self.damping
    }

    /// Singular values of the weighted matrix from the last
    /// [`Self::compute_inverse`], descending.
    #[must_use]
    pub fn singular_values(&self) -> &DVector<f64> {
        &self.singular_values
    }

    /// Compute `out = (Wᵣ·m·Wᵧ)⁺`, weight-compensated back into the
    /// original coordinates.
    pub fn compute_inverse(
        &mut self,
        m: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), SolverError> {
        if m.nrows() != self.rows || m.ncols() != self.cols {
            return Err(SolverError::DimensionMismatch {
                expected: self.rows * self.cols,
                got: m.nrows() * m.ncols(),
            });
        }
        if out.nrows() != self.cols || out.ncols() != self.rows {
            return Err(SolverError::DimensionMismatch {
                expected: self.cols * self.rows,
                got: out.nrows() * out.ncols(),
            });
        }
        if m.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericError("pseudo-inverse input"));
        }

        // Eliminate zero-weighted rows and columns.
        let active_rows: Vec<usize> =
            (0..self.rows).filter(|i| self.row_weights[*i] > 0.0).collect();
        let active_cols: Vec<usize> =
            (0..self.cols).filter(|j| self.col_weights[*j] > 0.0).collect();

        out.fill(0.0);
        if active_rows.is_empty() || active_cols.is_empty() {
            self.damping = 0.0;
            self.singular_values = DVector::zeros(0);
            return Ok(());
        }

        let mut weighted = DMatrix::zeros(active_rows.len(), active_cols.len());
        for (i, row) in active_rows.iter().enumerate() {
            let rw = self.row_weights[*row].sqrt();
            for (j, col) in active_cols.iter().enumerate() {
                weighted[(i, j)] = rw * m[(*row, *col)] * self.col_weights[*col].sqrt();
            }
        }

        let svd = weighted.svd(true, true);
        let u = svd.u.as_ref().ok_or(SolverError::NumericError("SVD"))?;
        let v_t = svd.v_t.as_ref().ok_or(SolverError::NumericError("SVD"))?;
        self.singular_values = svd.singular_values.clone();

        self.damping = match self.damping_mode {
            DampingMode::None => 0.0,
            DampingMode::Constant(damping) => damping,
            DampingMode::NormMax(norm_max) => {
                // The worst-case solution norm for a unit reference is
                // 1/σ_min; the bound binds once σ_min drops below
                // 1/norm_max.
                let sigma_min = self
                    .singular_values
                    .iter()
                    .copied()
                    .fold(f64::INFINITY, f64::min);
                if sigma_min * norm_max >= 1.0 || sigma_min < SINGULAR_VALUE_EPS {
                    0.0
                } else {
                    sigma_min * (1.0 / (sigma_min * norm_max) - 1.0).sqrt()
                }
            }
        };

        // Per-component inverse singular values.
        let damping_sq = self.damping * self.damping;
        let inv_sigma: Vec<f64> = self
            .singular_values
            .iter()
            .map(|s| {
                let denom = s * s + damping_sq;
                if denom < SINGULAR_VALUE_EPS {
                    0.0
                } else {
                    s / denom
                }
            })
            .collect();

        // M⁺_w = V·Σ̃·Uᵀ, then compensate the weights.
        let mut inv_weighted = DMatrix::zeros(active_cols.len(), active_rows.len());
        for j in 0..active_cols.len() {
            for i in 0..active_rows.len() {
                let mut acc = 0.0;
                for (s, inv_s) in inv_sigma.iter().enumerate() {
                    acc += v_t[(s, j)] * inv_s * u[(i, s)];
                }
                inv_weighted[(j, i)] = acc;
            }
        }

        for (j, col) in active_cols.iter().enumerate() {
            let cw = self.col_weights[*col].sqrt();
            for (i, row) in active_rows.iter().enumerate() {
                out[(*col, *row)] = cw * inv_weighted[(j, i)] * self.row_weights[*row].sqrt();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // A fixed full-row-rank 3x5 matrix.
    fn wide_matrix() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            5,
            &[
                0.62, 0.14, 0.88, 0.31, 0.05, //
                0.27, 0.91, 0.13, 0.56, 0.72, //
                0.08, 0.44, 0.67, 0.95, 0.21,
            ],
        )
    }

    #[test]
    fn pseudo_inverse_right_identity() {
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();

        let res = &m * &out;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(res[(i, j)], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn pseudo_inverse_reconstruction_law() {
        // M·M⁺·M ≈ M for well-conditioned inputs.
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();

        let rec = &m * &out * &m;
        for i in 0..3 {
            for j in 0..5 {
                assert_relative_eq!(rec[(i, j)], m[(i, j)], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn constant_damping_stays_close() {
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        inv.set_constant_damping(0.01);
        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();
        assert_relative_eq!(inv.damping(), 0.01);

        let res = &m * &out;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((res[(i, j)] - expected).abs() < 0.01);
            }
        }
    }

    #[test]
    fn damped_inverse_norm_is_bounded() {
        // With non-zero damping, ‖M⁺‖ ≤ 1/λ.
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        inv.set_constant_damping(0.05);
        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();

        let norm = out.svd(false, false).singular_values[0];
        assert!(norm <= 1.0 / 0.05 + 1e-9);
    }

    #[test]
    fn norm_max_damping_idempotent_when_not_binding() {
        // Well-conditioned matrix, generous bound: damping stays zero and
        // the result equals the undamped inverse.
        let m = wide_matrix();
        let mut undamped = GeneralizedInverse::new(3, 5);
        let mut auto = GeneralizedInverse::new(3, 5);
        auto.set_norm_max_damping(1.0e4);

        let mut out_a = DMatrix::zeros(5, 3);
        let mut out_b = DMatrix::zeros(5, 3);
        undamped.compute_inverse(&m, &mut out_a).unwrap();
        auto.compute_inverse(&m, &mut out_b).unwrap();

        assert_relative_eq!(auto.damping(), 0.0);
        for i in 0..5 {
            for j in 0..3 {
                assert_relative_eq!(out_a[(i, j)], out_b[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn norm_max_damping_activates_near_singularity() {
        // Nearly rank-deficient matrix: second row almost parallel to the
        // first.
        let m = DMatrix::from_row_slice(
            2,
            3,
            &[
                1.0, 0.0, 0.0, //
                1.0, 1e-4, 0.0,
            ],
        );
        let mut inv = GeneralizedInverse::new(2, 3);
        inv.set_norm_max_damping(2.0);
        let mut out = DMatrix::zeros(3, 2);
        inv.compute_inverse(&m, &mut out).unwrap();

        assert!(inv.damping() > 0.0);
        // Worst-case amplification stays within the bound.
        let norm = out.svd(false, false).singular_values[0];
        assert!(norm <= 2.0 + 1e-9);
    }

    #[test]
    fn zero_column_weight_zeroes_output_column() {
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut col_weights = DVector::from_element(5, 1.0);
        col_weights[3] = 0.0;
        inv.set_col_weights(&col_weights).unwrap();

        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();

        for j in 0..3 {
            assert_eq!(out[(3, j)], 0.0);
        }
        // Remaining rows still satisfy the identity on the reduced system.
        let res = &m * &out;
        assert!(res[(0, 0)].is_finite());
    }

    #[test]
    fn zero_row_weight_is_eliminated() {
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut row_weights = DVector::from_element(3, 1.0);
        row_weights[1] = 0.0;
        inv.set_row_weights(&row_weights).unwrap();

        let mut out = DMatrix::zeros(5, 3);
        inv.compute_inverse(&m, &mut out).unwrap();

        // Column 1 of the inverse (fed by the eliminated row) is zero.
        for i in 0..5 {
            assert_eq!(out[(i, 1)], 0.0);
        }
        // The other rows are still inverted.
        let res = &m * &out;
        for i in [0usize, 2] {
            for j in [0usize, 2] {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(res[(i, j)], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let m = wide_matrix();
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut out = DMatrix::zeros(4, 3);
        assert!(matches!(
            inv.compute_inverse(&m, &mut out),
            Err(SolverError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_input_is_reported() {
        let mut m = wide_matrix();
        m[(1, 1)] = f64::NAN;
        let mut inv = GeneralizedInverse::new(3, 5);
        let mut out = DMatrix::zeros(5, 3);
        assert!(matches!(
            inv.compute_inverse(&m, &mut out),
            Err(SolverError::NumericError(_))
        ));
    }
}
