//! Trust-region control loop.
//!
//! Each iteration solves the subproblem
//!
//! ```text
//! min_p  m(p) = f + gᵀp + ½ pᵀBp    subject to  ‖p‖ ≤ Δ
//! ```
//!
//! with a pluggable [`ParameterUpdate`], then compares the actual cost
//! reduction against the model's prediction:
//!
//! ```text
//! ρ = (f(x) − f(x + p)) / (m(0) − m(p))
//! ```
//!
//! - Steps that reduce the cost and have `ρ` above `min_step_quality` are accepted.
//! - `Δ` shrinks when the step is rejected or `ρ < poor_step_quality`.
//! - `Δ` grows when `ρ > good_step_quality` and the step reached the boundary.
//! - A step that passes the X-test ends the run as converged, accepted or not.
//!
//! An error from [`Optimizer::iterate`] leaves the solver `Failed` at the last
//! accepted point.
//!
//! The loop is generic over a [`TrustRegionModel`], giving two front ends:
//! [`UnconMinTrustRegion`] for a [`CostFunction`] and [`LeastSquaresTrustRegion`]
//! for a [`LeastSquaresFunction`].
//!
//! # Example
//!
//! ```
//! use nalgebra::{DVector, dvector};
//! use trustopt::core::CostFunction;
//! use trustopt::linalg::LinearSolverType;
//! use trustopt::optimizer::{Optimizer, OptimizationStatus, ParameterUpdate, TrustRegion, TrustRegionConfig};
//!
//! struct Bowl;
//!
//! impl CostFunction for Bowl {
//!     fn num_parameters(&self) -> usize {
//!         2
//!     }
//!
//!     fn cost(&self, x: &DVector<f64>) -> f64 {
//!         x.dot(x)
//!     }
//!
//!     fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
//!         gradient.copy_from(&(x * 2.0));
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut solver = TrustRegion::unconstrained(
//!     Bowl,
//!     ParameterUpdate::dogleg(LinearSolverType::Cholesky),
//!     TrustRegionConfig::new(),
//! );
//! solver.initialize(&dvector![10.0, 10.0], 0.0)?;
//! let result = solver.run()?;
//! assert_eq!(result.status, OptimizationStatus::Converged);
//! assert!(result.parameters.norm() < 1e-6);
//! # Ok(())
//! # }
//! ```

pub mod cauchy;
pub mod dogleg;
pub mod model;
pub mod update;

pub use cauchy::CauchyUpdate;
pub use dogleg::DoglegUpdate;
pub use model::{LeastSquaresModel, TrustRegionModel, UnconstrainedModel};
pub use update::{ModelView, ParameterUpdate};

use crate::core::{CostFunction, LeastSquaresFunction, problem};
use crate::linalg::{inner_product, reshape_matrix, reshape_vector};
use crate::optimizer::{
    ConvergenceCriteria, ConvergenceInfo, IterationStats, OptimizationStatus, Optimizer,
    OptimizerError, OptimizerResult, all_finite, convergence::relative_reduction,
};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};
use web_time as time;

/// Trust-region solver for unconstrained minimization
pub type UnconMinTrustRegion<F> = TrustRegion<UnconstrainedModel<F>>;

/// Trust-region solver for nonlinear least squares
pub type LeastSquaresTrustRegion<F> = TrustRegion<LeastSquaresModel<F>>;

/// Configuration parameters for the trust-region loop.
#[derive(Debug, Clone)]
pub struct TrustRegionConfig {
    /// Termination tolerances
    pub convergence: ConvergenceCriteria,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Initial radius. `None` picks the unconstrained Cauchy step length at the
    /// initial point
    pub initial_radius: Option<f64>,
    /// Minimum trust region radius; rejecting a step at this radius fails the solve
    pub radius_min: f64,
    /// Maximum trust region radius
    pub radius_max: f64,
    /// Factor applied to a growing radius
    pub increase_factor: f64,
    /// Factor applied to a shrinking radius
    pub decrease_factor: f64,
    /// Steps with gain ratio at or below this are rejected
    pub min_step_quality: f64,
    /// Gain ratio below which the radius shrinks
    pub poor_step_quality: f64,
    /// Gain ratio above which a boundary step grows the radius
    pub good_step_quality: f64,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            convergence: ConvergenceCriteria::default(),
            max_iterations: 100,
            initial_radius: None,
            radius_min: 1e-12,
            radius_max: 1e12,
            increase_factor: 2.0,
            decrease_factor: 0.5,
            min_step_quality: 0.0,
            poor_step_quality: 0.25,
            good_step_quality: 0.75,
        }
    }
}

impl TrustRegionConfig {
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

    /// Fix the initial trust region radius instead of choosing it automatically
    pub fn with_initial_radius(mut self, radius: f64) -> Self {
        self.initial_radius = Some(radius);
        self
    }

    pub fn with_radius_bounds(mut self, min: f64, max: f64) -> Self {
        self.radius_min = min;
        self.radius_max = max;
        self
    }

    pub fn with_radius_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.increase_factor = increase;
        self.decrease_factor = decrease;
        self
    }

    pub fn with_step_quality_thresholds(
        mut self,
        min_quality: f64,
        poor_quality: f64,
        good_quality: f64,
    ) -> Self {
        self.min_step_quality = min_quality;
        self.poor_step_quality = poor_quality;
        self.good_step_quality = good_quality;
        self
    }

    /// Check that the parameters describe a usable trust-region schedule.
    pub fn validate(&self) -> OptimizerResult<()> {
        self.convergence.validate()?;

        let invalid = |message: String| -> OptimizerResult<()> {
            Err(OptimizerError::InvalidParameters(message).log())
        };
        if !(self.radius_min > 0.0 && self.radius_min <= self.radius_max) {
            return invalid(format!(
                "radius bounds must satisfy 0 < min <= max, got [{:e}, {:e}]",
                self.radius_min, self.radius_max
            ));
        }
        if let Some(radius) = self.initial_radius
            && !(radius > 0.0 && radius.is_finite())
        {
            return invalid(format!("initial radius must be positive, got {radius:e}"));
        }
        if !(self.increase_factor > 1.0) {
            return invalid(format!(
                "increase factor must be > 1, got {}",
                self.increase_factor
            ));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return invalid(format!(
                "decrease factor must be in (0, 1), got {}",
                self.decrease_factor
            ));
        }
        if !(self.poor_step_quality <= self.good_step_quality) {
            return invalid(format!(
                "poor step quality {} exceeds good step quality {}",
                self.poor_step_quality, self.good_step_quality
            ));
        }
        Ok(())
    }

    /// Print configuration parameters (debug level)
    pub fn print_configuration(&self, update: &ParameterUpdate) {
        let initial_radius = match self.initial_radius {
            Some(radius) => format!("{radius:.2e}"),
            None => "automatic".to_string(),
        };
        debug!(
            "Configuration:\n  Solver:        Trust region\n  Update:        {}\n\nConvergence Criteria:\n  Max iterations:      {}\n  Function tolerance:  {:.2e}\n  Gradient tolerance:  {:.2e}\n  Step tolerance:      {:.2e}\n  Gradient norm:       {:?}\n  Scaled gradient:     {}\n\nTrust Region:\n  Initial radius:      {}\n  Radius range:        [{:.2e}, {:.2e}]\n  Radius factors:      x{:.2} / x{:.2}\n  Min step quality:    {:.2}\n  Poor step quality:   {:.2}\n  Good step quality:   {:.2}",
            update,
            self.max_iterations,
            self.convergence.ftol,
            self.convergence.gtol,
            self.convergence.xtol,
            self.convergence.gradient_norm,
            self.convergence.scale_gradient,
            initial_radius,
            self.radius_min,
            self.radius_max,
            self.increase_factor,
            self.decrease_factor,
            self.min_step_quality,
            self.poor_step_quality,
            self.good_step_quality,
        );
    }
}

/// Trust-region optimizer.
///
/// All buffers are sized once in [`TrustRegion::initialize`] and reused for
/// every iteration.
pub struct TrustRegion<M: TrustRegionModel> {
    config: TrustRegionConfig,
    model: M,
    update: ParameterUpdate,
    status: OptimizationStatus,

    x: DVector<f64>,
    x_candidate: DVector<f64>,
    step: DVector<f64>,
    fx: f64,
    initial_fx: f64,
    gradient: DVector<f64>,
    /// Euclidean norm of `gradient`
    gradient_norm: f64,
    hessian: DMatrix<f64>,

    region_radius: f64,
    minimum_function_value: f64,
    iterations: usize,
    updated: bool,
    info: ConvergenceInfo,
    start_time: time::Instant,
}

/// Borrow the model state as the read-only view handed to the subproblem solver.
fn model_view<'a, M: TrustRegionModel>(
    model: &'a M,
    fx: f64,
    gradient: &'a DVector<f64>,
    gradient_norm: f64,
    hessian: &'a DMatrix<f64>,
) -> ModelView<'a> {
    ModelView {
        fx,
        gradient,
        gradient_norm,
        hessian,
        jacobian: model.jacobian(),
        residuals: model.residuals(),
    }
}

impl<F: CostFunction> TrustRegion<UnconstrainedModel<F>> {
    /// Minimize a scalar cost. Uses BFGS when `F` supplies no Hessian.
    pub fn unconstrained(function: F, update: ParameterUpdate, config: TrustRegionConfig) -> Self {
        Self::new(UnconstrainedModel::new(function), update, config)
    }
}

impl<F: LeastSquaresFunction> TrustRegion<LeastSquaresModel<F>> {
    /// Minimize `½‖r(x)‖²`. Pair with any update, including
    /// [`ParameterUpdate::dogleg_least_squares`].
    pub fn least_squares(function: F, update: ParameterUpdate, config: TrustRegionConfig) -> Self {
        Self::new(LeastSquaresModel::new(function), update, config)
    }
}

impl<M: TrustRegionModel> TrustRegion<M> {
    pub fn new(model: M, update: ParameterUpdate, config: TrustRegionConfig) -> Self {
        Self {
            config,
            model,
            update,
            status: OptimizationStatus::Initializing,
            x: DVector::zeros(0),
            x_candidate: DVector::zeros(0),
            step: DVector::zeros(0),
            fx: f64::NAN,
            initial_fx: f64::NAN,
            gradient: DVector::zeros(0),
            gradient_norm: f64::NAN,
            hessian: DMatrix::zeros(0, 0),
            region_radius: f64::NAN,
            minimum_function_value: f64::NEG_INFINITY,
            iterations: 0,
            updated: false,
            info: ConvergenceInfo::default(),
            start_time: time::Instant::now(),
        }
    }

    /// Start a new run from `initial`.
    ///
    /// `minimum_function_value` is a known lower bound of the cost; reaching it
    /// counts as convergence. Pass `0.0` for least squares and
    /// `f64::NEG_INFINITY` when nothing is known.
    ///
    /// Returns `true` when the initial point already satisfies a convergence test.
    ///
    /// # Errors
    /// - `InvalidParameters` for an inconsistent configuration
    /// - `Core` when `initial` does not match the problem dimension
    /// - `NumericalInstability` when the cost or derivatives at `initial` are not finite
    pub fn initialize(
        &mut self,
        initial: &DVector<f64>,
        minimum_function_value: f64,
    ) -> OptimizerResult<bool> {
        self.status = OptimizationStatus::Initializing;
        self.config.validate()?;
        let n = self.model.num_parameters();
        problem::check_dimension(n, initial.len())?;

        reshape_vector(&mut self.x, n);
        reshape_vector(&mut self.x_candidate, n);
        reshape_vector(&mut self.step, n);
        reshape_vector(&mut self.gradient, n);
        reshape_matrix(&mut self.hessian, n, n);
        self.x.copy_from(initial);

        self.model.initialize();
        self.update.initialize(n, minimum_function_value);
        self.minimum_function_value = minimum_function_value;
        self.iterations = 0;
        self.updated = false;
        self.info = ConvergenceInfo::default();
        self.start_time = time::Instant::now();

        self.fx = self
            .model
            .linearize(&self.x, false, &mut self.gradient, &mut self.hessian);
        self.info.derivative_evaluations += 1;
        self.initial_fx = self.fx;
        self.check_model()?;
        self.gradient_norm = self.gradient.norm();
        self.info.final_gradient_norm = self.gradient_norm;

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration(&self.update);
            IterationStats::print_header();
        }

        if self.converged_at_current_point(None) {
            self.status = OptimizationStatus::Converged;
            return Ok(true);
        }

        let view = model_view(
            &self.model,
            self.fx,
            &self.gradient,
            self.gradient_norm,
            &self.hessian,
        );
        self.update.prepare(&view)?;

        self.region_radius = match self.config.initial_radius {
            Some(radius) => radius.clamp(self.config.radius_min, self.config.radius_max),
            None => self.automatic_radius(),
        };
        self.status = OptimizationStatus::Running;
        Ok(false)
    }

    /// Length of the unconstrained Cauchy step `‖g‖ / dᵀBd`, clamped to the radius bounds.
    ///
    /// Falls back to `‖g‖` under non-positive curvature.
    fn automatic_radius(&self) -> f64 {
        let curvature = inner_product(&self.gradient, &self.hessian, &self.gradient)
            / (self.gradient_norm * self.gradient_norm);
        let radius = if curvature > 0.0 {
            self.gradient_norm / curvature
        } else {
            self.gradient_norm
        };
        if radius.is_finite() && radius > 0.0 {
            radius.clamp(self.config.radius_min, self.config.radius_max)
        } else {
            1.0_f64.clamp(self.config.radius_min, self.config.radius_max)
        }
    }

    fn check_model(&self) -> OptimizerResult<()> {
        if !self.fx.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "cost is {} at the current point",
                self.fx
            ))
            .log());
        }
        if !all_finite(&self.gradient) {
            return Err(OptimizerError::NumericalInstability(
                "gradient contains NaN or Inf".to_string(),
            )
            .log());
        }
        if !self.hessian.iter().all(|v| v.is_finite()) {
            return Err(OptimizerError::NumericalInstability(
                "Hessian contains NaN or Inf".to_string(),
            )
            .log());
        }
        Ok(())
    }

    /// G-test, zero gradient and the cost bound, plus the F-test when a previous cost is given.
    fn converged_at_current_point(&self, previous_fx: Option<f64>) -> bool {
        let criteria = &self.config.convergence;
        if let Some(previous_fx) = previous_fx
            && criteria.check_convergence_f_test([relative_reduction(previous_fx, self.fx)])
        {
            debug!("F-test passed at cost {:.6e}", self.fx);
            return true;
        }
        if self.gradient_norm == 0.0 || criteria.check_convergence_g_test(&self.gradient, self.fx)
        {
            return true;
        }
        if self.fx <= self.minimum_function_value {
            debug!(
                "Cost {:.6e} reached the lower bound {:.6e}",
                self.fx, self.minimum_function_value
            );
            return true;
        }
        false
    }

    /// Shrink or grow the radius after a step.
    ///
    /// Returns `true` when a rejected step leaves no admissible smaller radius.
    fn update_region_radius(&mut self, ratio: f64, full_step: bool, accepted: bool) -> bool {
        if !accepted || !(ratio >= self.config.poor_step_quality) {
            let shrunk = self.region_radius * self.config.decrease_factor;
            if shrunk >= self.config.radius_min {
                self.region_radius = shrunk;
            } else if !accepted && self.region_radius <= self.config.radius_min {
                return true;
            } else {
                self.region_radius = self.config.radius_min;
            }
        } else if ratio > self.config.good_step_quality && full_step {
            self.region_radius =
                (self.region_radius * self.config.increase_factor).min(self.config.radius_max);
        }
        false
    }

    /// Commit the candidate, relinearize and test for convergence.
    ///
    /// A model that is not finite at the candidate sends `x` and `fx` back to
    /// the previous point and fails the run.
    fn accept_candidate(&mut self, small_step: bool) -> OptimizerResult<bool> {
        std::mem::swap(&mut self.x, &mut self.x_candidate);
        let previous_fx = self.fx;
        self.fx = self
            .model
            .linearize(&self.x, true, &mut self.gradient, &mut self.hessian);
        self.info.derivative_evaluations += 1;
        if let Err(e) = self.check_model() {
            std::mem::swap(&mut self.x, &mut self.x_candidate);
            self.fx = previous_fx;
            self.status = OptimizationStatus::Failed;
            return Err(e);
        }
        self.info.accepted_steps += 1;
        self.updated = true;
        self.gradient_norm = self.gradient.norm();
        self.info.final_gradient_norm = self.gradient_norm;

        if small_step || self.converged_at_current_point(Some(previous_fx)) {
            self.status = OptimizationStatus::Converged;
            return Ok(true);
        }

        let view = model_view(
            &self.model,
            self.fx,
            &self.gradient,
            self.gradient_norm,
            &self.hessian,
        );
        if let Err(e) = self.update.prepare(&view) {
            self.status = OptimizationStatus::Failed;
            return Err(e);
        }
        Ok(false)
    }

    /// Current trust region radius
    pub fn region_radius(&self) -> f64 {
        self.region_radius
    }

    /// Gradient at the current point
    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    /// Hessian (or approximation) at the current point
    pub fn hessian(&self) -> &DMatrix<f64> {
        &self.hessian
    }

    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn parameter_update(&self) -> &ParameterUpdate {
        &self.update
    }
}

impl<M: TrustRegionModel> Optimizer for TrustRegion<M> {
    /// One trust-region step.
    ///
    /// The candidate cost is evaluated only when the model predicts a positive
    /// reduction. Otherwise the step is rejected without calling the cost
    /// function, since the gain ratio is undefined.
    ///
    /// # Errors
    /// `NumericalInstability` when the step or the model at an accepted point is
    /// not finite. The status is then `Failed`.
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

        let view = model_view(
            &self.model,
            self.fx,
            &self.gradient,
            self.gradient_norm,
            &self.hessian,
        );
        let full_step = self
            .update
            .compute_update(&view, &mut self.step, self.region_radius)?;
        if !all_finite(&self.step) {
            self.status = OptimizationStatus::Failed;
            return Err(OptimizerError::NumericalInstability(
                "subproblem step contains NaN or Inf".to_string(),
            )
            .log());
        }
        let step_norm = self.step.norm();
        self.info.final_step_norm = step_norm;
        let small_step = self
            .config
            .convergence
            .check_convergence_x_test(&self.step, &self.x);

        // m(0) − m(p)
        let predicted = -(self.gradient.dot(&self.step)
            + 0.5 * inner_product(&self.step, &self.hessian, &self.step));

        let (accepted, ratio, fx_candidate) = if predicted > 0.0 && predicted.is_finite() {
            self.x_candidate.copy_from(&self.x);
            self.x_candidate += &self.step;
            let fx_candidate = self.model.cost(&self.x_candidate);
            self.info.cost_evaluations += 1;

            let actual = self.fx - fx_candidate;
            let ratio = actual / predicted;
            let accepted = fx_candidate.is_finite()
                && actual > 0.0
                && ratio > self.config.min_step_quality;
            (accepted, ratio, fx_candidate)
        } else {
            debug!("Predicted reduction {:.3e} is not positive", predicted);
            (false, f64::NAN, f64::NAN)
        };

        let previous_fx = self.fx;
        let collapsed = self.update_region_radius(ratio, full_step, accepted);
        let done = if accepted {
            self.accept_candidate(small_step)?
        } else {
            self.info.rejected_steps += 1;
            if small_step {
                debug!("Rejected step is below the step tolerance, the point is stationary");
                self.status = OptimizationStatus::Converged;
                true
            } else if collapsed {
                warn!(
                    "Trust region collapsed at radius {:.3e} without an acceptable step",
                    self.region_radius
                );
                self.status = OptimizationStatus::Failed;
                true
            } else {
                false
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            IterationStats {
                iteration: self.iterations,
                cost: if accepted { self.fx } else { fx_candidate },
                cost_change: previous_fx - self.fx,
                gradient_norm: self.gradient_norm,
                step_norm,
                step_quality: ratio,
                region: self.region_radius,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::LinearSolverType;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// f(x) = xᵀx with exact Hessian 2I
    struct Bowl {
        n: usize,
    }

    impl CostFunction for Bowl {
        fn num_parameters(&self) -> usize {
            self.n
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            x.dot(x)
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient.copy_from(&(x * 2.0));
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian.fill_with_identity();
            *hessian *= 2.0;
            true
        }
    }

    /// Rosenbrock residuals r = (10(x₁ − x₀²), 1 − x₀)
    struct Rosenbrock;

    impl LeastSquaresFunction for Rosenbrock {
        fn num_parameters(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            2
        }

        fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
            residuals[0] = 10.0 * (x[1] - x[0] * x[0]);
            residuals[1] = 1.0 - x[0];
        }

        fn jacobian(&self, x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
            jacobian[(0, 0)] = -20.0 * x[0];
            jacobian[(0, 1)] = 10.0;
            jacobian[(1, 0)] = -1.0;
            jacobian[(1, 1)] = 0.0;
        }
    }

    /// x² inside |x| < 0.5 and NaN outside, with a Hessian that underestimates the curvature
    struct Cliff;

    impl CostFunction for Cliff {
        fn num_parameters(&self) -> usize {
            1
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            if x[0].abs() < 0.5 { x[0] * x[0] } else { f64::NAN }
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = 2.0 * x[0];
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian[(0, 0)] = 0.2;
            true
        }
    }

    /// Linear cost whose gradient never vanishes and whose candidates never improve
    struct Stubborn;

    impl CostFunction for Stubborn {
        fn num_parameters(&self) -> usize {
            1
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            if x[0] == 1.0 { 0.0 } else { 1.0 }
        }

        fn gradient(&self, _x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = 1.0;
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian[(0, 0)] = 1.0;
            true
        }
    }

    /// f(x) = x₀² + 10x₁², an exact quadratic model with unequal curvatures
    struct Ellipse;

    impl CostFunction for Ellipse {
        fn num_parameters(&self) -> usize {
            2
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0] + 10.0 * x[1] * x[1]
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = 2.0 * x[0];
            gradient[1] = 20.0 * x[1];
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian.fill(0.0);
            hessian[(0, 0)] = 2.0;
            hessian[(1, 1)] = 20.0;
            true
        }
    }

    /// f(x) = x² with a Hessian ten times too small, so the model overpromises
    struct Understated;

    impl CostFunction for Understated {
        fn num_parameters(&self) -> usize {
            1
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0]
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = 2.0 * x[0];
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian[(0, 0)] = 0.2;
            true
        }
    }

    /// f(x) = x₀² − x₁² + x₁⁴: saddle at the origin, minima −¼ at (0, ±1/√2)
    struct DoubleWell;

    impl CostFunction for DoubleWell {
        fn num_parameters(&self) -> usize {
            2
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0] - x[1] * x[1] + x[1].powi(4)
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = 2.0 * x[0];
            gradient[1] = -2.0 * x[1] + 4.0 * x[1].powi(3);
        }

        fn hessian(&self, x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian.fill(0.0);
            hessian[(0, 0)] = 2.0;
            hessian[(1, 1)] = -2.0 + 12.0 * x[1] * x[1];
            true
        }
    }

    /// f(x) = x², with a gradient that is NaN for |x| < 0.5
    struct PoisonedGradient;

    impl CostFunction for PoisonedGradient {
        fn num_parameters(&self) -> usize {
            1
        }

        fn cost(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0]
        }

        fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
            gradient[0] = if x[0].abs() < 0.5 { f64::NAN } else { 2.0 * x[0] };
        }

        fn hessian(&self, _x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
            hessian[(0, 0)] = 2.0;
            true
        }
    }

    /// r(x) = (x₀ − 1, 10(x₁ − 2), 0): the Jacobian has rank 2 and x₂ is free
    struct RankDeficient;

    impl LeastSquaresFunction for RankDeficient {
        fn num_parameters(&self) -> usize {
            3
        }

        fn num_residuals(&self) -> usize {
            3
        }

        fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
            residuals[0] = x[0] - 1.0;
            residuals[1] = 10.0 * (x[1] - 2.0);
            residuals[2] = 0.0;
        }

        fn jacobian(&self, _x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
            jacobian.fill(0.0);
            jacobian[(0, 0)] = 1.0;
            jacobian[(1, 1)] = 10.0;
        }
    }

    fn updates() -> Vec<ParameterUpdate> {
        vec![
            ParameterUpdate::cauchy(),
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            ParameterUpdate::dogleg(LinearSolverType::QrPivot),
            ParameterUpdate::dogleg(LinearSolverType::PseudoInverse),
        ]
    }

    #[test]
    fn test_config_validation() {
        assert!(TrustRegionConfig::new().validate().is_ok());
        assert!(
            TrustRegionConfig::new()
                .with_radius_bounds(1.0, 0.5)
                .validate()
                .is_err()
        );
        assert!(
            TrustRegionConfig::new()
                .with_radius_factors(2.0, 1.5)
                .validate()
                .is_err()
        );
        assert!(
            TrustRegionConfig::new()
                .with_initial_radius(-1.0)
                .validate()
                .is_err()
        );
        assert!(
            TrustRegionConfig::new()
                .with_step_quality_thresholds(0.0, 0.9, 0.1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_bowl_converges_for_every_update() -> TestResult {
        for update in updates() {
            let name = update.to_string();
            let mut solver = TrustRegion::unconstrained(
                Bowl { n: 2 },
                update,
                TrustRegionConfig::new().with_initial_radius(1.0),
            );
            assert!(!solver.initialize(&dvector![10.0, 10.0], f64::NEG_INFINITY)?);
            let result = solver.run()?;

            assert_eq!(result.status, OptimizationStatus::Converged, "{name}");
            assert!(result.parameters.norm() < 1e-6, "{name}");
            assert!(result.final_cost < result.initial_cost);
        }
        Ok(())
    }

    #[test]
    fn test_steps_respect_radius_and_cost_is_monotone() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 3 },
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new().with_initial_radius(0.5),
        );
        solver.initialize(&dvector![4.0, -3.0, 2.0], f64::NEG_INFINITY)?;

        let mut previous_fx = solver.function_value();
        let mut previous_x = solver.parameters().clone();
        loop {
            let radius = solver.region_radius();
            let done = solver.iterate()?;
            let moved = (solver.parameters() - &previous_x).norm();
            assert!(moved <= radius * (1.0 + 1e-12));
            if solver.is_updated() {
                assert!(solver.function_value() < previous_fx);
            } else {
                assert_eq!(solver.function_value(), previous_fx);
            }
            previous_fx = solver.function_value();
            previous_x = solver.parameters().clone();
            if done {
                break;
            }
        }
        assert_eq!(solver.status(), OptimizationStatus::Converged);
        Ok(())
    }

    #[test]
    fn test_radius_stays_within_bounds() -> TestResult {
        let config = TrustRegionConfig::new()
            .with_initial_radius(100.0)
            .with_radius_bounds(1e-3, 2.0);
        let mut solver = TrustRegion::least_squares(
            Rosenbrock,
            ParameterUpdate::dogleg_least_squares(LinearSolverType::QrPivot),
            config,
        );
        solver.initialize(&dvector![-1.2, 1.0], 0.0)?;
        assert_eq!(solver.region_radius(), 2.0);

        while !solver.iterate()? {
            assert!(solver.region_radius() >= 1e-3);
            assert!(solver.region_radius() <= 2.0);
        }
        assert_eq!(solver.status(), OptimizationStatus::Converged);
        assert!((solver.parameters() - dvector![1.0, 1.0]).norm() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_radius_grows_after_good_boundary_step() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 1 },
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new().with_initial_radius(1.0),
        );
        solver.initialize(&dvector![10.0], f64::NEG_INFINITY)?;

        // Newton step −10 is clipped to −1, and the quadratic model is exact (ρ = 1)
        assert!(!solver.iterate()?);
        assert!(solver.is_updated());
        assert_eq!(solver.parameters(), &dvector![9.0]);
        assert_eq!(solver.region_radius(), 2.0);
        Ok(())
    }

    #[test]
    fn test_radius_growth_is_capped() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 1 },
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new()
                .with_initial_radius(1.0)
                .with_radius_bounds(1e-12, 1.5),
        );
        solver.initialize(&dvector![10.0], f64::NEG_INFINITY)?;

        assert!(!solver.iterate()?);
        assert_eq!(solver.region_radius(), 1.5);
        assert!(!solver.iterate()?);
        assert_eq!(solver.region_radius(), 1.5);
        Ok(())
    }

    #[test]
    fn test_radius_kept_after_good_interior_step() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Ellipse,
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new().with_initial_radius(100.0),
        );
        solver.initialize(&dvector![1.0, 1.0], f64::NEG_INFINITY)?;

        // The Cauchy point lies about 1.01 from x, well inside the region
        assert!(!solver.iterate()?);
        assert!(solver.is_updated());
        assert!(solver.convergence_info().final_step_norm < 2.0);
        assert_eq!(solver.region_radius(), 100.0);
        Ok(())
    }

    #[test]
    fn test_radius_shrinks_after_poor_accepted_step() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Understated,
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new().with_initial_radius(1.9),
        );
        solver.initialize(&dvector![1.0], f64::NEG_INFINITY)?;

        // x: 1 → −0.9, actual reduction 0.19 against a predicted 3.439
        assert!(!solver.iterate()?);
        assert!(solver.is_updated());
        assert!((solver.parameters()[0] + 0.9).abs() < 1e-12);
        assert_eq!(solver.region_radius(), 0.95);
        Ok(())
    }

    #[test]
    fn test_converges_at_negative_minimum() -> TestResult {
        let configs = [
            TrustRegionConfig::new().with_initial_radius(10.0),
            // Only the step test can end this run
            TrustRegionConfig::new()
                .with_initial_radius(10.0)
                .with_convergence(ConvergenceCriteria::new().with_ftol(0.0).with_gtol(0.0)),
        ];
        for config in configs {
            for solver_type in [LinearSolverType::Cholesky, LinearSolverType::QrPivot] {
                let mut solver = TrustRegion::unconstrained(
                    DoubleWell,
                    ParameterUpdate::dogleg(solver_type),
                    config.clone(),
                );
                solver.initialize(&dvector![3.0, 0.1], f64::NEG_INFINITY)?;
                let result = solver.run()?;

                assert_eq!(result.status, OptimizationStatus::Converged, "{solver_type}");
                assert!((result.final_cost + 0.25).abs() < 1e-12);
                assert!(result.parameters[0].abs() < 1e-6);
                assert!((result.parameters[1].abs() - 0.5_f64.sqrt()).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_non_finite_gradient_at_accepted_point_fails() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            PoisonedGradient,
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new().with_initial_radius(10.0),
        );
        solver.initialize(&dvector![1.0], f64::NEG_INFINITY)?;

        // The Newton step reaches x = 0, where the cost is fine but the gradient is not
        assert!(matches!(
            solver.iterate(),
            Err(OptimizerError::NumericalInstability(_))
        ));
        assert_eq!(solver.status(), OptimizationStatus::Failed);
        assert!(!solver.is_updated());
        assert_eq!(solver.parameters(), &dvector![1.0]);
        assert_eq!(solver.function_value(), 1.0);
        assert_eq!(solver.convergence_info().accepted_steps, 0);

        assert!(solver.iterate()?);
        assert_eq!(solver.iterations(), 1);
        assert_eq!(solver.parameters(), &dvector![1.0]);
        Ok(())
    }

    #[test]
    fn test_least_squares_dogleg_on_rank_deficient_jacobian() -> TestResult {
        for solver_type in [LinearSolverType::QrPivot, LinearSolverType::PseudoInverse] {
            let mut solver = TrustRegion::least_squares(
                RankDeficient,
                ParameterUpdate::dogleg_least_squares(solver_type),
                TrustRegionConfig::new().with_initial_radius(10.0),
            );
            solver.initialize(&dvector![0.0, 0.0, 0.0], 0.0)?;
            let result = solver.run()?;

            // The Gauss-Newton step solves the problem in one iteration
            assert_eq!(result.status, OptimizationStatus::Converged, "{solver_type}");
            assert_eq!(result.iterations, 1, "{solver_type}");
            assert!((result.parameters - dvector![1.0, 2.0, 0.0]).norm() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_automatic_radius_is_cauchy_length() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 2 },
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new(),
        );
        solver.initialize(&dvector![3.0, 4.0], f64::NEG_INFINITY)?;
        // ‖g‖ / dᵀBd = 10 / 2
        assert!((solver.region_radius() - 5.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_converged_at_initial_point() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 2 },
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new(),
        );
        assert!(solver.initialize(&dvector![0.0, 0.0], f64::NEG_INFINITY)?);
        assert_eq!(solver.status(), OptimizationStatus::Converged);
        assert!(solver.iterate()?);
        assert_eq!(solver.iterations(), 0);
        Ok(())
    }

    #[test]
    fn test_minimum_function_value_stops_the_search() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 1 },
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new().with_initial_radius(1.0),
        );
        solver.initialize(&dvector![10.0], 50.0)?;
        solver.run()?;
        assert_eq!(solver.status(), OptimizationStatus::Converged);
        assert!(solver.function_value() <= 50.0);
        assert!(solver.parameters()[0].abs() > 1.0);
        Ok(())
    }

    #[test]
    fn test_max_iterations_reached() -> TestResult {
        let mut solver = TrustRegion::least_squares(
            Rosenbrock,
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new().with_max_iterations(3),
        );
        solver.initialize(&dvector![-1.2, 1.0], 0.0)?;
        let result = solver.run()?;
        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 3);
        // Further iterations are no-ops
        assert!(solver.iterate()?);
        assert_eq!(solver.iterations(), 3);
        Ok(())
    }

    #[test]
    fn test_non_finite_candidate_cost_is_rejected() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Cliff,
            ParameterUpdate::dogleg(LinearSolverType::Cholesky),
            TrustRegionConfig::new().with_initial_radius(1.0),
        );
        solver.initialize(&dvector![0.4], f64::NEG_INFINITY)?;

        // The boundary step lands at -0.6 where the cost is NaN
        assert!(!solver.iterate()?);
        assert!(!solver.is_updated());
        assert_eq!(solver.status(), OptimizationStatus::Running);
        assert_eq!(solver.parameters(), &dvector![0.4]);
        assert!((solver.function_value() - 0.16).abs() < 1e-15);
        assert_eq!(solver.region_radius(), 0.5);
        assert_eq!(solver.convergence_info().rejected_steps, 1);

        // Half the radius reaches -0.1, which is an improvement
        assert!(!solver.iterate()?);
        assert!(solver.is_updated());
        assert!((solver.parameters()[0] + 0.1).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_collapsed_region_fails() -> TestResult {
        let mut solver = TrustRegion::unconstrained(
            Stubborn,
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new()
                .with_initial_radius(0.1)
                .with_radius_bounds(0.01, 1.0),
        );
        solver.initialize(&dvector![0.0], f64::NEG_INFINITY)?;
        let result = solver.run()?;
        assert_eq!(result.status, OptimizationStatus::Failed);
        assert_eq!(result.convergence_info.accepted_steps, 0);
        assert_eq!(solver.parameters(), &dvector![0.0]);
        Ok(())
    }

    #[test]
    fn test_iterate_before_initialize() {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 1 },
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new(),
        );
        assert!(matches!(
            solver.iterate(),
            Err(OptimizerError::NotInitialized)
        ));
        assert!(matches!(solver.run(), Err(OptimizerError::NotInitialized)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 2 },
            ParameterUpdate::cauchy(),
            TrustRegionConfig::new(),
        );
        assert!(matches!(
            solver.initialize(&dvector![1.0], 0.0),
            Err(OptimizerError::Core(_))
        ));
    }

    #[test]
    fn test_least_squares_dogleg_needs_jacobian() {
        let mut solver = TrustRegion::unconstrained(
            Bowl { n: 2 },
            ParameterUpdate::dogleg_least_squares(LinearSolverType::QrPivot),
            TrustRegionConfig::new(),
        );
        assert!(matches!(
            solver.initialize(&dvector![1.0, 1.0], f64::NEG_INFINITY),
            Err(OptimizerError::MissingJacobian)
        ));
    }
}
