//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt (LM) method solves nonlinear least squares problems
//! of the form:
//!
//! ```text
//! min f(x) = ½||r(x)||² = ½Σᵢ rᵢ(x)²
//! ```
//!
//! where `r: ℝⁿ → ℝᵐ` is the residual vector function.
//!
//! # Algorithm Overview
//!
//! Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λD)·h = −Jᵀr
//! ```
//!
//! where `D` is either the identity or `diag(JᵀJ)` (see [`DampingMode`]).
//!
//! - **λ → 0**: Gauss-Newton, fast convergence near a zero-residual solution
//! - **λ → ∞**: short gradient-descent steps, robust far from the solution
//!
//! ## Step Acceptance and Damping Update
//!
//! A candidate `x + h` is accepted only if its cost is strictly lower. Then
//! `λ ← λ / damping_decrease_factor` and the Jacobian is refreshed at the new point.
//! Otherwise `λ ← λ · damping_increase_factor` and the old `x`, gradient and
//! Hessian are kept; they are still valid because `x` did not change.
//!
//! A linear solve that fails (singular or indefinite system) counts as a
//! rejected step. Damping growing past `damping_max` ends the run with
//! [`OptimizationStatus::Failed`].
//!
//! ## Convergence
//!
//! The F-test is applied componentwise to the residual vector and the G-test to
//! the gradient `Jᵀr`, both at initialization and after each accepted step. The
//! X-test is applied to every solved step: once the step is negligible next to
//! `x` the run converges, even if the cost no longer decreases in floating point.
//!
//! A Jacobian that turns non-finite at an accepted point is an error. The solver
//! returns to the previous point and its status becomes `Failed`.
//!
//! # Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector, dvector};
//! use trustopt::core::LeastSquaresFunction;
//! use trustopt::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus, Optimizer};
//!
//! /// r(x) = (x₀ − 1, x₁ + 2)
//! struct Shift;
//!
//! impl LeastSquaresFunction for Shift {
//!     fn num_parameters(&self) -> usize {
//!         2
//!     }
//!
//!     fn num_residuals(&self) -> usize {
//!         2
//!     }
//!
//!     fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
//!         residuals[0] = x[0] - 1.0;
//!         residuals[1] = x[1] + 2.0;
//!     }
//!
//!     fn jacobian(&self, _x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
//!         jacobian.fill_with_identity();
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut solver = LevenbergMarquardt::new(Shift, LevenbergMarquardtConfig::new());
//! solver.initialize(&dvector![0.0, 0.0])?;
//! let result = solver.run()?;
//!
//! assert_eq!(result.status, OptimizationStatus::Converged);
//! assert!((result.parameters - dvector![1.0, -2.0]).norm() < 1e-9);
//! # Ok(())
//! # }
//! ```

use crate::core::{LeastSquaresFunction, problem};
use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinearSolverType, create_linear_solver, inner_product,
    reshape_matrix, reshape_vector,
};
use crate::optimizer::{
    ConvergenceCriteria, ConvergenceInfo, IterationStats, OptimizationStatus, Optimizer,
    OptimizerError, OptimizerResult, all_finite, compute_cost,
};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};
use web_time as time;

/// Scaling matrix `D` added to the normal equations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DampingMode {
    /// `D = I`
    Identity,
    /// `D = diag(JᵀJ)`, floored at `diagonal_min`. Invariant to parameter scaling
    #[default]
    HessianDiagonal,
}

/// Configuration parameters for the Levenberg-Marquardt optimizer.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    /// Termination tolerances
    pub convergence: ConvergenceCriteria,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Damping λ at initialization
    pub initial_damping: f64,
    /// λ is multiplied by this after a rejected step
    pub damping_increase_factor: f64,
    /// λ is divided by this after an accepted step
    pub damping_decrease_factor: f64,
    /// Exceeding this damping fails the run
    pub damping_max: f64,
    pub damping_mode: DampingMode,
    /// Lower bound on the diagonal entries in `HessianDiagonal` mode
    pub diagonal_min: f64,
    /// Backend for the damped normal equations
    pub linear_solver_type: LinearSolverType,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            convergence: ConvergenceCriteria::default(),
            max_iterations: 100,
            initial_damping: 1e-3,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 10.0,
            damping_max: 1e16,
            damping_mode: DampingMode::HessianDiagonal,
            diagonal_min: 1e-9,
            linear_solver_type: LinearSolverType::Cholesky,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_convergence(mut self, convergence: ConvergenceCriteria) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }

    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn with_damping_max(mut self, damping_max: f64) -> Self {
        self.damping_max = damping_max;
        self
    }

    pub fn with_damping_mode(mut self, damping_mode: DampingMode) -> Self {
        self.damping_mode = damping_mode;
        self
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn validate(&self) -> OptimizerResult<()> {
        self.convergence.validate()?;

        let invalid = |message: String| -> OptimizerResult<()> {
            Err(OptimizerError::InvalidParameters(message).log())
        };
        if !(self.initial_damping >= 0.0 && self.initial_damping <= self.damping_max) {
            return invalid(format!(
                "initial damping must be in [0, {:e}], got {:e}",
                self.damping_max, self.initial_damping
            ));
        }
        if !(self.damping_increase_factor > 1.0 && self.damping_decrease_factor > 1.0) {
            return invalid(format!(
                "damping factors must be > 1, got increase {} and decrease {}",
                self.damping_increase_factor, self.damping_decrease_factor
            ));
        }
        if !(self.diagonal_min > 0.0) {
            return invalid(format!(
                "diagonal_min must be positive, got {:e}",
                self.diagonal_min
            ));
        }
        Ok(())
    }

    /// Print configuration parameters (debug level)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Levenberg-Marquardt\n  Linear solver: {}\n\nConvergence Criteria:\n  Max iterations:      {}\n  Function tolerance:  {:.2e}\n  Gradient tolerance:  {:.2e}\n  Step tolerance:      {:.2e}\n  Gradient norm:       {:?}\n  Scaled gradient:     {}\n\nDamping:\n  Initial damping:     {:.2e}\n  Damping max:         {:.2e}\n  Increase factor:     {:.2}\n  Decrease factor:     {:.2}\n  Mode:                {:?}\n  Diagonal min:        {:.2e}",
            self.linear_solver_type,
            self.max_iterations,
            self.convergence.ftol,
            self.convergence.gtol,
            self.convergence.xtol,
            self.convergence.gradient_norm,
            self.convergence.scale_gradient,
            self.initial_damping,
            self.damping_max,
            self.damping_increase_factor,
            self.damping_decrease_factor,
            self.damping_mode,
            self.diagonal_min,
        );
    }
}

/// Levenberg-Marquardt solver for nonlinear least squares.
pub struct LevenbergMarquardt<F> {
    function: F,
    config: LevenbergMarquardtConfig,
    linear_solver: Box<dyn DenseLinearSolver>,
    status: OptimizationStatus,
    damping: f64,

    x: DVector<f64>,
    x_candidate: DVector<f64>,
    step: DVector<f64>,
    residuals: DVector<f64>,
    candidate_residuals: DVector<f64>,
    jacobian: DMatrix<f64>,
    gradient: DVector<f64>,
    hessian: DMatrix<f64>,
    augmented: DMatrix<f64>,
    rhs: DVector<f64>,

    fx: f64,
    initial_fx: f64,
    iterations: usize,
    updated: bool,
    info: ConvergenceInfo,
    start_time: time::Instant,
}

impl<F: LeastSquaresFunction> LevenbergMarquardt<F> {
    pub fn new(function: F, config: LevenbergMarquardtConfig) -> Self {
        let linear_solver = create_linear_solver(config.linear_solver_type);
        Self::with_linear_solver(function, config, linear_solver)
    }

    /// Use a caller supplied solver instead of `config.linear_solver_type`
    pub fn with_linear_solver(
        function: F,
        config: LevenbergMarquardtConfig,
        linear_solver: Box<dyn DenseLinearSolver>,
    ) -> Self {
        Self {
            function,
            damping: config.initial_damping,
            config,
            linear_solver,
            status: OptimizationStatus::Initializing,
            x: DVector::zeros(0),
            x_candidate: DVector::zeros(0),
            step: DVector::zeros(0),
            residuals: DVector::zeros(0),
            candidate_residuals: DVector::zeros(0),
            jacobian: DMatrix::zeros(0, 0),
            gradient: DVector::zeros(0),
            hessian: DMatrix::zeros(0, 0),
            augmented: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            fx: f64::NAN,
            initial_fx: f64::NAN,
            iterations: 0,
            updated: false,
            info: ConvergenceInfo::default(),
            start_time: time::Instant::now(),
        }
    }

    /// Start a new run from `initial`. Returns `true` if it is already converged.
    ///
    /// # Errors
    /// - `InvalidParameters` for an inconsistent configuration
    /// - `Core` for a dimension mismatch or a problem without residuals
    /// - `NumericalInstability` if residuals or Jacobian at `initial` are not finite
    pub fn initialize(&mut self, initial: &DVector<f64>) -> OptimizerResult<bool> {
        self.status = OptimizationStatus::Initializing;
        self.config.validate()?;
        let n = self.function.num_parameters();
        let m = self.function.num_residuals();
        problem::check_dimension(n, initial.len())?;
        if m == 0 {
            return Err(OptimizerError::from(crate::core::CoreError::InvalidProblem(
                "least squares problem has no residuals".to_string(),
            ))
            .log());
        }

        reshape_vector(&mut self.x, n);
        reshape_vector(&mut self.x_candidate, n);
        reshape_vector(&mut self.step, n);
        reshape_vector(&mut self.gradient, n);
        reshape_vector(&mut self.rhs, n);
        reshape_vector(&mut self.residuals, m);
        reshape_vector(&mut self.candidate_residuals, m);
        reshape_matrix(&mut self.jacobian, m, n);
        reshape_matrix(&mut self.hessian, n, n);
        reshape_matrix(&mut self.augmented, n, n);
        self.x.copy_from(initial);

        self.damping = self.config.initial_damping;
        self.iterations = 0;
        self.updated = false;
        self.info = ConvergenceInfo::default();
        self.start_time = time::Instant::now();

        self.function.residuals(&self.x, &mut self.residuals);
        self.fx = compute_cost(&self.residuals);
        self.initial_fx = self.fx;
        self.linearize()?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
            IterationStats::print_header();
        }

        if self.converged_at_current_point() {
            self.status = OptimizationStatus::Converged;
            return Ok(true);
        }
        self.status = OptimizationStatus::Running;
        Ok(false)
    }

    /// Jacobian, gradient `Jᵀr` and Gauss-Newton Hessian `JᵀJ` at the current `x`.
    ///
    /// Expects `residuals` to be current already.
    fn linearize(&mut self) -> OptimizerResult<()> {
        self.function.jacobian(&self.x, &mut self.jacobian);
        self.info.derivative_evaluations += 1;

        if !self.fx.is_finite() || !all_finite(&self.residuals) {
            return Err(OptimizerError::NumericalInstability(
                "residuals contain NaN or Inf".to_string(),
            )
            .log());
        }
        if !self.jacobian.iter().all(|v| v.is_finite()) {
            return Err(OptimizerError::NumericalInstability(
                "Jacobian contains NaN or Inf".to_string(),
            )
            .log());
        }
        self.jacobian.tr_mul_to(&self.residuals, &mut self.gradient);
        self.jacobian.tr_mul_to(&self.jacobian, &mut self.hessian);
        self.info.final_gradient_norm = self.gradient.norm();
        Ok(())
    }

    fn converged_at_current_point(&self) -> bool {
        let criteria = &self.config.convergence;
        if criteria.check_convergence_f_test(self.residuals.iter().copied()) {
            debug!("F-test passed on residuals at cost {:.6e}", self.fx);
            return true;
        }
        criteria.check_convergence_g_test(&self.gradient, self.fx)
    }

    /// Solve `(JᵀJ + λD)·h = −Jᵀr` into `step`.
    ///
    /// Returns `false` when the linear solver rejects the system as singular or
    /// indefinite. A solver that answers with the wrong shape is an error and
    /// fails the run.
    fn update_state(&mut self) -> OptimizerResult<bool> {
        self.augmented.copy_from(&self.hessian);
        for i in 0..self.augmented.nrows() {
            let scale = match self.config.damping_mode {
                DampingMode::Identity => 1.0,
                DampingMode::HessianDiagonal => self.hessian[(i, i)].max(self.config.diagonal_min),
            };
            self.augmented[(i, i)] += self.damping * scale;
        }
        self.rhs.copy_from(&self.gradient);
        self.rhs.neg_mut();

        match self.linear_solver.solve(&self.augmented, &self.rhs) {
            Ok(step) if step.len() != self.x.len() => {
                self.status = OptimizationStatus::Failed;
                Err(OptimizerError::from(LinAlgError::DimensionMismatch {
                    expected: self.x.len(),
                    actual: step.len(),
                })
                .log())
            }
            Ok(step) => {
                self.step = step;
                Ok(true)
            }
            Err(e @ (LinAlgError::DimensionMismatch { .. } | LinAlgError::NotSquare { .. })) => {
                self.status = OptimizationStatus::Failed;
                Err(OptimizerError::from(e).log())
            }
            Err(e) => {
                debug!("Damped system not solvable at λ = {:.3e}: {}", self.damping, e);
                Ok(false)
            }
        }
    }

    /// Evaluate the candidate `x + h`; commit it if the cost strictly decreased.
    ///
    /// Returns whether the step was accepted.
    fn compute_and_consider_new(&mut self) -> OptimizerResult<bool> {
        self.x_candidate.copy_from(&self.x);
        self.x_candidate += &self.step;
        self.function
            .residuals(&self.x_candidate, &mut self.candidate_residuals);
        self.info.cost_evaluations += 1;
        let fx_candidate = compute_cost(&self.candidate_residuals);

        if !(fx_candidate.is_finite() && fx_candidate < self.fx) {
            return Ok(false);
        }

        std::mem::swap(&mut self.x, &mut self.x_candidate);
        std::mem::swap(&mut self.residuals, &mut self.candidate_residuals);
        let previous_fx = self.fx;
        self.fx = fx_candidate;
        if let Err(e) = self.linearize() {
            // The gradient and Hessian are only written after the checks pass
            std::mem::swap(&mut self.x, &mut self.x_candidate);
            std::mem::swap(&mut self.residuals, &mut self.candidate_residuals);
            self.fx = previous_fx;
            self.status = OptimizationStatus::Failed;
            return Err(e);
        }
        self.damping /= self.config.damping_decrease_factor;
        self.info.accepted_steps += 1;
        self.updated = true;
        Ok(true)
    }

    /// Increase damping after a failed solve or a rejected candidate.
    ///
    /// Returns `true` when damping overflowed and the run failed.
    fn increase_damping(&mut self) -> bool {
        self.info.rejected_steps += 1;
        self.damping = (self.damping * self.config.damping_increase_factor).max(f64::EPSILON);
        if self.damping > self.config.damping_max {
            warn!(
                "Damping {:.3e} exceeded its maximum {:.3e} without an acceptable step",
                self.damping, self.config.damping_max
            );
            self.status = OptimizationStatus::Failed;
            return true;
        }
        false
    }

    /// Current damping λ
    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    pub fn function(&self) -> &F {
        &self.function
    }
}

impl<F: LeastSquaresFunction> Optimizer for LevenbergMarquardt<F> {
    fn iterate(&mut self) -> OptimizerResult<bool> {
        if self.status == OptimizationStatus::Initializing {
            return Err(OptimizerError::NotInitialized.log());
        }
        if self.status.is_terminal() {
            return Ok(true);
        }
        self.updated = false;
        if self.iterations >= self.config.max_iterations {
            debug!("Stopping after {} iterations", self.iterations);
            self.status = OptimizationStatus::MaxIterationsReached;
            return Ok(true);
        }
        self.iterations += 1;
        let iteration_start = time::Instant::now();
        let previous_fx = self.fx;

        let solved = self.update_state()?;
        let (step_norm, predicted, small_step) = if solved {
            let predicted = -(self.gradient.dot(&self.step)
                + 0.5 * inner_product(&self.step, &self.hessian, &self.step));
            let small_step = self
                .config
                .convergence
                .check_convergence_x_test(&self.step, &self.x);
            (self.step.norm(), predicted, small_step)
        } else {
            (0.0, f64::NAN, false)
        };
        self.info.final_step_norm = step_norm;

        let accepted = solved && self.compute_and_consider_new()?;
        let done = if accepted {
            if small_step || self.converged_at_current_point() {
                self.status = OptimizationStatus::Converged;
                true
            } else {
                false
            }
        } else if small_step {
            self.info.rejected_steps += 1;
            debug!("Rejected step is below the step tolerance, the point is stationary");
            self.status = OptimizationStatus::Converged;
            true
        } else {
            self.increase_damping()
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            IterationStats {
                iteration: self.iterations,
                cost: self.fx,
                cost_change: previous_fx - self.fx,
                gradient_norm: self.info.final_gradient_norm,
                step_norm,
                step_quality: if accepted {
                    (previous_fx - self.fx) / predicted
                } else {
                    f64::NAN
                },
                region: self.damping,
                iter_time_ms: iteration_start.elapsed().as_secs_f64() * 1000.0,
                total_time_ms: self.start_time.elapsed().as_secs_f64() * 1000.0,
                accepted,
            }
            .print_line();
        }
        Ok(done)
    }

    fn status(&self) -> OptimizationStatus {
        self.status
    }

    fn parameters(&self) -> &DVector<f64> {
        &self.x
    }

    fn function_value(&self) -> f64 {
        self.fx
    }

    fn is_updated(&self) -> bool {
        self.updated
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn initial_cost(&self) -> f64 {
        self.initial_fx
    }

    fn convergence_info(&self) -> ConvergenceInfo {
        self.info.clone()
    }
}
