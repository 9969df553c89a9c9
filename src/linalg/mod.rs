//! Dense linear algebra capability used by the subproblem solvers and the
//! Levenberg-Marquardt loop.
//!
//! Matrices crossing the public API are `nalgebra` dense types. Factorizations
//! run on `faer` (Cholesky, column-pivoted QR) or on nalgebra's SVD
//! (pseudo-inverse). Every solver reports failures through [`LinAlgError`]
//! instead of returning a non-finite solution.

pub mod cholesky;
pub mod pseudo_inverse;
pub mod qr;

use faer::Mat;
use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

pub use cholesky::CholeskySolver;
pub use pseudo_inverse::PseudoInverseSolver;
pub use qr::QrSolver;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    /// Dense LLᵀ factorization. Requires a symmetric positive definite system.
    Cholesky,
    /// Column-pivoted QR. Handles rectangular least-squares systems directly.
    #[default]
    QrPivot,
    /// SVD based pseudo-inverse. Slowest, tolerates rank deficiency.
    PseudoInverse,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::Cholesky => write!(f, "Cholesky"),
            LinearSolverType::QrPivot => write!(f, "Pivoted QR"),
            LinearSolverType::PseudoInverse => write!(f, "Pseudo-inverse"),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, QR, SVD)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// The factorization succeeded but the solution contains NaN or Inf
    #[error("Linear solve produced a non-finite solution")]
    NonFiniteSolution,

    /// Operand shapes do not agree
    #[error("Dimension mismatch: expected {expected} rows, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A square system was required
    #[error("Matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error reported by the factorization backend
    ///
    /// # Example
    /// ```ignore
    /// a.as_ref()
    ///     .llt(Side::Lower)
    ///     .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Pluggable dense linear solver.
///
/// Implementations must either return a finite solution or an error; the
/// optimizers rely on this to tell a failed solve apart from a bad step.
pub trait DenseLinearSolver: Send {
    /// Solve the square system `a · x = b`.
    ///
    /// # Errors
    /// Returns `LinAlgError` if:
    /// - `a` is not square or does not match `b`
    /// - The factorization fails or the system is singular
    /// - The solution is not finite
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>>;

    /// Solve `min ‖a · x − b‖₂`.
    ///
    /// Rank deficiency is backend specific: pivoted QR returns the basic
    /// solution, the pseudo-inverse returns the minimum-norm solution and
    /// Cholesky fails.
    ///
    /// # Errors
    /// Same failure modes as [`DenseLinearSolver::solve`]. For pivoted QR a
    /// singular system means `a` is numerically zero.
    fn solve_least_squares(
        &mut self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>>;

    /// Which backend this solver is
    fn solver_type(&self) -> LinearSolverType;
}

/// Create the linear solver selected by `solver_type`
pub fn create_linear_solver(solver_type: LinearSolverType) -> Box<dyn DenseLinearSolver> {
    match solver_type {
        LinearSolverType::Cholesky => Box::new(CholeskySolver::new()),
        LinearSolverType::QrPivot => Box::new(QrSolver::new()),
        LinearSolverType::PseudoInverse => Box::new(PseudoInverseSolver::new()),
    }
}

/// Computes `aᵀ · m · b` without allocating the intermediate product.
pub fn inner_product(a: &DVector<f64>, m: &DMatrix<f64>, b: &DVector<f64>) -> f64 {
    b.iter()
        .enumerate()
        .map(|(j, b_j)| b_j * m.column(j).dot(a))
        .sum()
}

/// Resize `v` to `len` entries, reusing the allocation when the size already matches.
pub fn reshape_vector(v: &mut DVector<f64>, len: usize) {
    if v.len() != len {
        *v = DVector::zeros(len);
    }
}

/// Resize `m` to `rows x cols`, reusing the allocation when the shape already matches.
pub fn reshape_matrix(m: &mut DMatrix<f64>, rows: usize, cols: usize) {
    if m.nrows() != rows || m.ncols() != cols {
        *m = DMatrix::zeros(rows, cols);
    }
}

pub(crate) fn check_square(a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<()> {
    if a.nrows() != a.ncols() {
        return Err(LinAlgError::NotSquare {
            rows: a.nrows(),
            cols: a.ncols(),
        }
        .log());
    }
    check_rows(a, b)
}

pub(crate) fn check_rows(a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<()> {
    if a.nrows() != b.len() {
        return Err(LinAlgError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        }
        .log());
    }
    Ok(())
}

pub(crate) fn check_finite(x: DVector<f64>) -> LinAlgResult<DVector<f64>> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(LinAlgError::NonFiniteSolution)
    }
}

pub(crate) fn matrix_to_faer(m: &DMatrix<f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
}

pub(crate) fn vector_to_faer(v: &DVector<f64>) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

/// Copy the first `len` rows of a faer column into a nalgebra vector
pub(crate) fn vector_from_faer(m: &Mat<f64>, len: usize) -> DVector<f64> {
    DVector::from_fn(len, |i, _| m[(i, 0)])
}
