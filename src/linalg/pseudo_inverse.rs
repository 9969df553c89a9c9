use nalgebra::{DMatrix, DVector};

use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinAlgResult, LinearSolverType, check_finite, check_rows,
    check_square,
};

/// SVD based pseudo-inverse solver.
///
/// Singular values below `relative_cutoff * σ_max` are treated as zero, which
/// yields the minimum-norm solution for rank deficient systems. Only a matrix
/// whose largest singular value is zero is reported as singular.
#[derive(Debug, Clone)]
pub struct PseudoInverseSolver {
    /// `None` selects `max(rows, cols) * ε`
    relative_cutoff: Option<f64>,
}

impl PseudoInverseSolver {
    pub fn new() -> Self {
        PseudoInverseSolver {
            relative_cutoff: None,
        }
    }

    pub fn with_relative_cutoff(mut self, relative_cutoff: f64) -> Self {
        self.relative_cutoff = Some(relative_cutoff);
        self
    }

    fn solve_svd(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        let cutoff = self
            .relative_cutoff
            .unwrap_or(a.nrows().max(a.ncols()) as f64 * f64::EPSILON);

        let svd = a.clone().svd(true, true);
        let sigma_max = svd.singular_values.max();
        if !sigma_max.is_finite() {
            return Err(LinAlgError::FactorizationFailed(
                "SVD produced non-finite singular values".to_string(),
            )
            .log());
        }
        if sigma_max == 0.0 {
            return Err(LinAlgError::SingularMatrix);
        }

        let x = svd.solve(b, cutoff * sigma_max).map_err(|e| {
            LinAlgError::FactorizationFailed("SVD back-substitution failed".to_string())
                .log_with_source(e)
        })?;
        check_finite(x)
    }
}

impl Default for PseudoInverseSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseLinearSolver for PseudoInverseSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        check_square(a, b)?;
        self.solve_svd(a, b)
    }

    fn solve_least_squares(
        &mut self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>> {
        check_rows(a, b)?;
        self.solve_svd(a, b)
    }

    fn solver_type(&self) -> LinearSolverType {
        LinearSolverType::PseudoInverse
    }
}
