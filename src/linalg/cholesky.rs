use faer::{Side, linalg::solvers::Solve};
use nalgebra::{DMatrix, DVector};

use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinAlgResult, LinearSolverType, check_finite, check_rows,
    check_square, matrix_to_faer, vector_from_faer, vector_to_faer,
};

/// Dense Cholesky (LLᵀ) solver.
///
/// Fast, but only valid for symmetric positive definite systems. Least-squares
/// problems are solved through the normal equations `aᵀa · x = aᵀb`, which
/// squares the condition number of `a`.
#[derive(Debug, Clone, Default)]
pub struct CholeskySolver {
    /// Number of successful factorizations, mostly useful in tests and logs
    factorizations: usize,
}

impl CholeskySolver {
    pub fn new() -> Self {
        CholeskySolver { factorizations: 0 }
    }

    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    fn factor_and_solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        let a_faer = matrix_to_faer(a);
        let llt = a_faer
            .as_ref()
            .llt(Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;
        self.factorizations += 1;

        let x = llt.solve(&vector_to_faer(b));
        check_finite(vector_from_faer(&x, a.ncols()))
    }
}

impl DenseLinearSolver for CholeskySolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        check_square(a, b)?;
        self.factor_and_solve(a, b)
    }

    fn solve_least_squares(
        &mut self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>> {
        check_rows(a, b)?;
        let normal = a.transpose() * a;
        let rhs = a.transpose() * b;
        self.factor_and_solve(&normal, &rhs)
    }

    fn solver_type(&self) -> LinearSolverType {
        LinearSolverType::Cholesky
    }
}
