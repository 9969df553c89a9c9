//! Optimization control loops.
//!
//! This module provides two families of local optimizers that share one
//! convergence-testing contract:
//! - Trust-region methods with pluggable subproblem solvers (Cauchy point,
//!   dogleg, least-squares dogleg), for unconstrained minimization and for
//!   nonlinear least squares
//! - Levenberg-Marquardt, a damped Gauss-Newton method for nonlinear least squares
//!
//! All optimizers are driven one step at a time through [`Optimizer::iterate`].
//! Callers that want to impose their own budget simply stop calling it;
//! [`Optimizer::run`] iterates until a terminal [`OptimizationStatus`].

use crate::{core, linalg};
use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::{debug, error};
use web_time as time;

pub mod convergence;
pub mod levenberg_marquardt;
pub mod trust_region;

pub use convergence::{ConvergenceCriteria, GradientNorm};
pub use levenberg_marquardt::{DampingMode, LevenbergMarquardt, LevenbergMarquardtConfig};
pub use trust_region::{
    LeastSquaresTrustRegion, ParameterUpdate, TrustRegion, TrustRegionConfig, UnconMinTrustRegion,
};

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// NaN or Inf in the cost, gradient, Hessian, curvature or a computed step.
    ///
    /// The local model is unusable, which is different from a rejected step.
    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),

    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// `iterate` or `run` called before `initialize`
    #[error("Optimizer has not been initialized")]
    NotInitialized,

    /// The least-squares dogleg was paired with a model that has no Jacobian
    #[error("Least-squares dogleg requires a Jacobian and residuals")]
    MissingJacobian,

    /// Problem definition errors
    #[error(transparent)]
    Core(#[from] core::CoreError),

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error that caused it
    ///
    /// # Example
    /// ```ignore
    /// solver
    ///     .solve(&a, &b)
    ///     .map_err(|e| OptimizerError::NumericalInstability("damped step".into()).log_with_source(e))?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Status of an optimization process
///
/// `Converged`, `MaxIterationsReached` and `Failed` are terminal. Every other
/// transition goes through `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// `initialize` has not completed yet
    Initializing,
    /// Iterating
    Running,
    /// A convergence test passed
    Converged,
    /// Iteration budget exhausted. A normal termination, not an error
    MaxIterationsReached,
    /// Trust region collapsed below its minimum radius, or LM damping overflowed
    Failed,
}

impl OptimizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Converged
                | OptimizationStatus::MaxIterationsReached
                | OptimizationStatus::Failed
        )
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Initializing => write!(f, "Initializing"),
            OptimizationStatus::Running => write!(f, "Running"),
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceInfo {
    /// Gradient norm at the final point
    pub final_gradient_norm: f64,
    /// Norm of the last attempted step
    pub final_step_norm: f64,
    /// Cost-only evaluations (candidate points)
    pub cost_evaluations: usize,
    /// Evaluations of gradient plus Hessian or Jacobian
    pub derivative_evaluations: usize,
    /// Steps that decreased the cost and were committed
    pub accepted_steps: usize,
    /// Steps that were discarded
    pub rejected_steps: usize,
}

impl Display for ConvergenceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final step norm: {:.2e}, Cost evaluations: {}, Derivative evaluations: {}, Accepted/rejected: {}/{}",
            self.final_gradient_norm,
            self.final_step_norm,
            self.cost_evaluations,
            self.derivative_evaluations,
            self.accepted_steps,
            self.rejected_steps
        )
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final parameters
    pub parameters: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Cost at the initial parameters
    pub initial_cost: f64,
    /// Cost at the final parameters
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Wall-clock time spent in `run`
    pub elapsed_time: time::Duration,
    /// Convergence statistics
    pub convergence_info: ConvergenceInfo,
}

/// Per-iteration statistics for detailed logging (Ceres-style output).
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Iteration number (1-indexed)
    pub iteration: usize,
    /// Cost at the accepted point, or at the rejected candidate
    pub cost: f64,
    /// Decrease of the accepted cost in this iteration (0 when rejected)
    pub cost_change: f64,
    /// L2 norm of the gradient at the accepted point
    pub gradient_norm: f64,
    /// L2 norm of the attempted step
    pub step_norm: f64,
    /// Gain ratio ρ = actual / predicted reduction (NaN when not evaluated)
    pub step_quality: f64,
    /// Trust region radius Δ, or LM damping λ
    pub region: f64,
    /// Time taken for this iteration in milliseconds
    pub iter_time_ms: f64,
    /// Total elapsed time since initialization in milliseconds
    pub total_time_ms: f64,
    /// Whether the step was accepted
    pub accepted: bool,
}

impl IterationStats {
    /// Print table header in Ceres-style format
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>11}  {:>11}  {:>13}  {:>6}",
            "iter",
            "cost",
            "cost_change",
            "|gradient|",
            "|step|",
            "ratio",
            "radius",
            "iter_time",
            "total_time",
            "status"
        );
    }

    /// Print single iteration line with scientific notation
    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };

        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.step_quality,
            self.region,
            self.iter_time_ms,
            self.total_time_ms,
            status
        );
    }
}

/// Common interface of the iterative optimizers.
pub trait Optimizer {
    /// Perform one iteration. Returns `true` once the status is terminal;
    /// further calls are no-ops that keep returning `true`.
    fn iterate(&mut self) -> OptimizerResult<bool>;

    fn status(&self) -> OptimizationStatus;

    /// Best parameters found so far (the current accepted point)
    fn parameters(&self) -> &DVector<f64>;

    /// Cost at [`Optimizer::parameters`]
    fn function_value(&self) -> f64;

    /// Whether the last call to `iterate` moved the parameters
    fn is_updated(&self) -> bool;

    /// Iterations performed since `initialize`
    fn iterations(&self) -> usize;

    /// Cost at the point passed to `initialize`
    fn initial_cost(&self) -> f64;

    fn convergence_info(&self) -> ConvergenceInfo;

    /// Iterate until a terminal status is reached.
    ///
    /// # Errors
    /// `NotInitialized` if `initialize` was not called, or any error raised by
    /// [`Optimizer::iterate`].
    fn run(&mut self) -> OptimizerResult<SolverResult> {
        if self.status() == OptimizationStatus::Initializing {
            return Err(OptimizerError::NotInitialized.log());
        }
        let start_time = time::Instant::now();
        while !self.iterate()? {}

        Ok(SolverResult {
            parameters: self.parameters().clone(),
            status: self.status(),
            initial_cost: self.initial_cost(),
            final_cost: self.function_value(),
            iterations: self.iterations(),
            elapsed_time: start_time.elapsed(),
            convergence_info: self.convergence_info(),
        })
    }
}

/// Least-squares cost convention `½ rᵀr`.
///
/// Convergence thresholds are calibrated against this scaling.
pub fn compute_cost(residuals: &DVector<f64>) -> f64 {
    0.5 * residuals.norm_squared()
}

pub(crate) fn all_finite(values: &DVector<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}
