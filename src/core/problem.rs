//! Evaluator capabilities supplied by the caller.
//!
//! The optimizers never differentiate anything themselves. They ask the
//! caller's function for values and derivatives at a point, writing into
//! buffers the optimizer owns so no allocation happens per evaluation.
//!
//! Every method must be deterministic for a given `x`: the control loops
//! evaluate candidate points more than once across accept/reject decisions
//! and assume identical answers.

use crate::core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};

/// Scalar cost `f: ℝⁿ → ℝ` for unconstrained minimization.
///
/// # Example
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use trustopt::core::CostFunction;
///
/// /// f(x) = xᵀx
/// struct Bowl;
///
/// impl CostFunction for Bowl {
///     fn num_parameters(&self) -> usize {
///         2
///     }
///
///     fn cost(&self, x: &DVector<f64>) -> f64 {
///         x.dot(x)
///     }
///
///     fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
///         gradient.copy_from(&(x * 2.0));
///     }
///
///     fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
///         hessian.fill_with_identity();
///         *hessian *= 2.0;
///         true
///     }
/// }
/// ```
pub trait CostFunction {
    /// Dimension `n` of the parameter vector
    fn num_parameters(&self) -> usize;

    /// Cost at `x`. Used on its own for candidate points.
    fn cost(&self, x: &DVector<f64>) -> f64;

    /// Write `∇f(x)` into `gradient` (already sized to `n`).
    fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>);

    /// Write `∇²f(x)` into `hessian` (already sized `n x n`) and return `true`.
    ///
    /// The default returns `false`, in which case the trust-region loop
    /// maintains a BFGS approximation instead.
    fn hessian(&self, _x: &DVector<f64>, _hessian: &mut DMatrix<f64>) -> bool {
        false
    }
}

/// Residual function `r: ℝⁿ → ℝᵐ` whose cost is `½ rᵀr`.
pub trait LeastSquaresFunction {
    /// Dimension `n` of the parameter vector
    fn num_parameters(&self) -> usize;

    /// Dimension `m` of the residual vector
    fn num_residuals(&self) -> usize;

    /// Write `r(x)` into `residuals` (already sized to `m`).
    fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>);

    /// Write the `m x n` Jacobian `∂r/∂x` into `jacobian` (already sized).
    fn jacobian(&self, x: &DVector<f64>, jacobian: &mut DMatrix<f64>);
}

/// Check that a caller supplied vector has the problem's dimension
pub fn check_dimension(expected: usize, actual: usize) -> CoreResult<()> {
    if expected == 0 {
        return Err(CoreError::InvalidProblem("problem has no parameters".to_string()).log());
    }
    if expected != actual {
        return Err(CoreError::DimensionMismatch { expected, actual }.log());
    }
    Ok(())
}
