use faer::linalg::solvers::{Solve, SolveLstsq};
use faer::{Mat, MatRef};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinAlgResult, LinearSolverType, check_finite, check_rows,
    check_square, matrix_to_faer, vector_from_faer, vector_to_faer,
};

/// Column-pivoted QR solver.
///
/// Solves least-squares systems directly from `a` without forming `aᵀa`, which
/// keeps the conditioning of the Jacobian instead of squaring it.
///
/// A rank deficient least-squares system of numerical rank `r` gets the basic
/// solution: the problem is solved over the first `r` pivot columns and the
/// remaining unknowns are set to zero. Square solves still require full rank
/// and report [`LinAlgError::SingularMatrix`] otherwise.
#[derive(Debug, Clone)]
pub struct QrSolver {
    /// Pivots with magnitude below `rank_tolerance * |largest pivot|` count as zero
    rank_tolerance: f64,
}

impl QrSolver {
    pub fn new() -> Self {
        QrSolver {
            rank_tolerance: 1e-12,
        }
    }

    pub fn with_rank_tolerance(mut self, rank_tolerance: f64) -> Self {
        self.rank_tolerance = rank_tolerance;
        self
    }

    /// Number of leading diagonal entries of the pivoted R factor above the tolerance.
    ///
    /// Column pivoting keeps the diagonal non-increasing in magnitude, so the
    /// count stops at the first negligible pivot.
    fn numerical_rank(&self, r: MatRef<'_, f64>) -> usize {
        let size = r.nrows().min(r.ncols());
        let largest = (0..size).map(|i| r[(i, i)].abs()).fold(0.0, f64::max);
        if !(largest > 0.0) {
            return 0;
        }
        (0..size)
            .take_while(|&i| r[(i, i)].abs() > self.rank_tolerance * largest)
            .count()
    }
}

impl Default for QrSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseLinearSolver for QrSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        check_square(a, b)?;
        let a_faer = matrix_to_faer(a);
        let qr = a_faer.as_ref().col_piv_qr();
        if self.numerical_rank(qr.R()) < a.ncols() {
            return Err(LinAlgError::SingularMatrix);
        }

        let x = qr.solve(&vector_to_faer(b));
        check_finite(vector_from_faer(&x, a.ncols()))
    }

    fn solve_least_squares(
        &mut self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>> {
        check_rows(a, b)?;
        let a_faer = matrix_to_faer(a);
        let qr = a_faer.as_ref().col_piv_qr();
        let rank = self.numerical_rank(qr.R());
        if rank == 0 {
            return Err(LinAlgError::SingularMatrix);
        }
        if rank == a.ncols() {
            let x = qr.solve_lstsq(&vector_to_faer(b));
            return check_finite(vector_from_faer(&x, a.ncols()));
        }

        // forward[k] is the original index of the k-th pivot column
        let (forward, _) = qr.P().arrays();
        let columns = &forward[..rank];
        debug!(
            "Least-squares system {}x{} has rank {}, solving over pivot columns {:?}",
            a.nrows(),
            a.ncols(),
            rank,
            columns
        );
        let reduced = Mat::from_fn(a.nrows(), rank, |i, j| a[(i, columns[j])]);
        let reduced_qr = reduced.as_ref().col_piv_qr();
        if self.numerical_rank(reduced_qr.R()) < rank {
            return Err(LinAlgError::SingularMatrix);
        }
        let y = reduced_qr.solve_lstsq(&vector_to_faer(b));

        let mut x = DVector::zeros(a.ncols());
        for (k, &column) in columns.iter().enumerate() {
            x[column] = y[(k, 0)];
        }
        check_finite(x)
    }

    fn solver_type(&self) -> LinearSolverType {
        LinearSolverType::QrPivot
    }
}
