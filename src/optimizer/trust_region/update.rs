//! Trust-region subproblem solvers behind one closed enum.

use crate::linalg::{DenseLinearSolver, LinearSolverType};
use crate::optimizer::OptimizerResult;
use crate::optimizer::trust_region::cauchy::CauchyUpdate;
use crate::optimizer::trust_region::dogleg::DoglegUpdate;
use nalgebra::{DMatrix, DVector};
use std::fmt::{self, Display, Formatter};

/// Read-only view of the local model at the current point.
///
/// Rebuilt by the control loop for every call; the subproblem solver never
/// mutates the loop's state.
#[derive(Debug, Clone, Copy)]
pub struct ModelView<'a> {
    /// Cost at the current point
    pub fx: f64,
    pub gradient: &'a DVector<f64>,
    /// Euclidean norm of `gradient`
    pub gradient_norm: f64,
    /// Hessian or its approximation
    pub hessian: &'a DMatrix<f64>,
    /// Present in least-squares mode only
    pub jacobian: Option<&'a DMatrix<f64>>,
    /// Present in least-squares mode only
    pub residuals: Option<&'a DVector<f64>>,
}

/// Strategy for choosing a step inside the trust region.
pub enum ParameterUpdate {
    /// Steepest descent clipped to the region
    Cauchy(CauchyUpdate),
    /// Dogleg with a Newton step from the Hessian approximation
    Dogleg(DoglegUpdate),
    /// Dogleg with a Gauss-Newton step solved from the Jacobian directly
    DoglegLeastSquares(DoglegUpdate),
}

impl ParameterUpdate {
    pub fn cauchy() -> Self {
        ParameterUpdate::Cauchy(CauchyUpdate::new())
    }

    pub fn dogleg(solver_type: LinearSolverType) -> Self {
        ParameterUpdate::Dogleg(DoglegUpdate::new(solver_type))
    }

    /// Requires a model exposing a Jacobian, i.e. a least-squares problem.
    pub fn dogleg_least_squares(solver_type: LinearSolverType) -> Self {
        ParameterUpdate::DoglegLeastSquares(DoglegUpdate::new(solver_type))
    }

    pub fn dogleg_with_solver(linear_solver: Box<dyn DenseLinearSolver>) -> Self {
        ParameterUpdate::Dogleg(DoglegUpdate::with_solver(linear_solver))
    }

    pub fn dogleg_least_squares_with_solver(linear_solver: Box<dyn DenseLinearSolver>) -> Self {
        ParameterUpdate::DoglegLeastSquares(DoglegUpdate::with_solver(linear_solver))
    }

    /// Size internal buffers for `num_parameters` unknowns.
    ///
    /// `minimum_function_value` is a known lower bound on the cost, used by the
    /// Cauchy step when the model has non-positive curvature.
    pub fn initialize(&mut self, num_parameters: usize, minimum_function_value: f64) {
        match self {
            ParameterUpdate::Cauchy(cauchy) => {
                cauchy.initialize(num_parameters, minimum_function_value)
            }
            ParameterUpdate::Dogleg(dogleg) | ParameterUpdate::DoglegLeastSquares(dogleg) => {
                dogleg.initialize(num_parameters, minimum_function_value)
            }
        }
    }

    /// Compute everything that depends only on the linearization point.
    ///
    /// Called once per accepted step; rejected steps reuse it through
    /// [`ParameterUpdate::compute_update`] with a smaller radius.
    ///
    /// # Errors
    /// - `NumericalInstability` if the curvature along the gradient is not finite
    /// - `MissingJacobian` for the least-squares dogleg without a Jacobian
    pub fn prepare(&mut self, view: &ModelView<'_>) -> OptimizerResult<()> {
        match self {
            ParameterUpdate::Cauchy(cauchy) => cauchy.prepare(view),
            ParameterUpdate::Dogleg(dogleg) => dogleg.prepare_newton(view),
            ParameterUpdate::DoglegLeastSquares(dogleg) => dogleg.prepare_least_squares(view),
        }
    }

    /// Write a step with `‖step‖ ≤ radius` into `step`.
    ///
    /// Returns `true` when the step lies on the region boundary, which is what
    /// allows the radius to grow.
    pub fn compute_update(
        &mut self,
        view: &ModelView<'_>,
        step: &mut DVector<f64>,
        radius: f64,
    ) -> OptimizerResult<bool> {
        match self {
            ParameterUpdate::Cauchy(cauchy) => cauchy.compute_update(view, step, radius),
            ParameterUpdate::Dogleg(dogleg) | ParameterUpdate::DoglegLeastSquares(dogleg) => {
                dogleg.compute_update(view, step, radius)
            }
        }
    }
}

impl Display for ParameterUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParameterUpdate::Cauchy(_) => write!(f, "Cauchy"),
            ParameterUpdate::Dogleg(dogleg) => write!(f, "Dogleg ({})", dogleg.solver_type()),
            ParameterUpdate::DoglegLeastSquares(dogleg) => {
                write!(f, "Dogleg least-squares ({})", dogleg.solver_type())
            }
        }
    }
}
