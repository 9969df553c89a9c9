//! Local quadratic models driven by the trust-region loop.
//!
//! A model turns the caller's evaluator into the quantities the control loop
//! works with: cost `f`, gradient `g` and a symmetric Hessian approximation `B`.
//!
//! - [`UnconstrainedModel`] uses the caller's Hessian when one is provided and
//!   otherwise keeps a BFGS approximation, starting from `B₀ = I`.
//! - [`LeastSquaresModel`] uses `f = ½ rᵀr`, `g = Jᵀr`, `B = JᵀJ` and exposes
//!   `J` and `r` so the least-squares dogleg can avoid the normal equations.

use crate::core::{CostFunction, LeastSquaresFunction};
use crate::linalg::{reshape_matrix, reshape_vector};
use crate::optimizer::compute_cost;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Evaluator adapter used by [`TrustRegion`](super::TrustRegion).
pub trait TrustRegionModel {
    /// Dimension of the parameter vector
    fn num_parameters(&self) -> usize;

    /// Size internal buffers and forget state from a previous run
    fn initialize(&mut self);

    /// Cost at a candidate point. No derivatives are evaluated.
    fn cost(&mut self, x: &DVector<f64>) -> f64;

    /// Evaluate cost, gradient and Hessian approximation at `x`, returning the cost.
    ///
    /// `x_is_last_candidate` is true when `x` is the point most recently passed to
    /// [`TrustRegionModel::cost`], letting the model reuse what it computed there.
    fn linearize(
        &mut self,
        x: &DVector<f64>,
        x_is_last_candidate: bool,
        gradient: &mut DVector<f64>,
        hessian: &mut DMatrix<f64>,
    ) -> f64;

    /// Jacobian at the current linearization point, if the model has one
    fn jacobian(&self) -> Option<&DMatrix<f64>> {
        None
    }

    /// Residuals at the current linearization point, if the model has them
    fn residuals(&self) -> Option<&DVector<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HessianSource {
    /// Not known until the first linearization
    Unknown,
    Exact,
    Bfgs,
}

/// Model for unconstrained minimization of a [`CostFunction`].
#[derive(Debug, Clone)]
pub struct UnconstrainedModel<F> {
    function: F,
    hessian_source: HessianSource,
    candidate_cost: f64,
    previous_x: DVector<f64>,
    previous_gradient: DVector<f64>,
    s: DVector<f64>,
    y: DVector<f64>,
    bs: DVector<f64>,
}

impl<F: CostFunction> UnconstrainedModel<F> {
    pub fn new(function: F) -> Self {
        Self {
            function,
            hessian_source: HessianSource::Unknown,
            candidate_cost: f64::NAN,
            previous_x: DVector::zeros(0),
            previous_gradient: DVector::zeros(0),
            s: DVector::zeros(0),
            y: DVector::zeros(0),
            bs: DVector::zeros(0),
        }
    }

    pub fn function(&self) -> &F {
        &self.function
    }

    /// True once the model has fallen back to a BFGS Hessian approximation
    pub fn uses_bfgs(&self) -> bool {
        self.hessian_source == HessianSource::Bfgs
    }

    fn remember(&mut self, x: &DVector<f64>, gradient: &DVector<f64>) {
        self.previous_x.copy_from(x);
        self.previous_gradient.copy_from(gradient);
    }
}

impl<F: CostFunction> TrustRegionModel for UnconstrainedModel<F> {
    fn num_parameters(&self) -> usize {
        self.function.num_parameters()
    }

    fn initialize(&mut self) {
        let n = self.function.num_parameters();
        reshape_vector(&mut self.previous_x, n);
        reshape_vector(&mut self.previous_gradient, n);
        reshape_vector(&mut self.s, n);
        reshape_vector(&mut self.y, n);
        reshape_vector(&mut self.bs, n);
        self.hessian_source = HessianSource::Unknown;
        self.candidate_cost = f64::NAN;
    }

    fn cost(&mut self, x: &DVector<f64>) -> f64 {
        self.candidate_cost = self.function.cost(x);
        self.candidate_cost
    }

    fn linearize(
        &mut self,
        x: &DVector<f64>,
        x_is_last_candidate: bool,
        gradient: &mut DVector<f64>,
        hessian: &mut DMatrix<f64>,
    ) -> f64 {
        let fx = if x_is_last_candidate {
            self.candidate_cost
        } else {
            self.function.cost(x)
        };
        self.function.gradient(x, gradient);

        match self.hessian_source {
            HessianSource::Exact => {
                self.function.hessian(x, hessian);
            }
            HessianSource::Unknown => {
                if self.function.hessian(x, hessian) {
                    self.hessian_source = HessianSource::Exact;
                } else {
                    debug!("Cost function provides no Hessian, using a BFGS approximation");
                    self.hessian_source = HessianSource::Bfgs;
                    hessian.fill_with_identity();
                    self.remember(x, gradient);
                }
            }
            HessianSource::Bfgs => {
                self.s.copy_from(x);
                self.s -= &self.previous_x;
                self.y.copy_from(gradient);
                self.y -= &self.previous_gradient;
                if !bfgs_update(hessian, &self.s, &self.y, &mut self.bs) {
                    debug!("BFGS curvature condition failed, keeping previous Hessian");
                }
                self.remember(x, gradient);
            }
        }
        fx
    }
}

/// BFGS update of a Hessian approximation in place:
/// `B ← B + yyᵀ/(yᵀs) − (Bs)(Bs)ᵀ/(sᵀBs)`.
///
/// Skipped (returns `false`) when `yᵀs` or `sᵀBs` is not safely positive, which
/// keeps `B` positive definite.
pub fn bfgs_update(
    hessian: &mut DMatrix<f64>,
    s: &DVector<f64>,
    y: &DVector<f64>,
    bs: &mut DVector<f64>,
) -> bool {
    let sy = s.dot(y);
    if !(sy > f64::EPSILON * s.norm() * y.norm()) {
        return false;
    }
    hessian.mul_to(s, bs);
    let sbs = s.dot(bs);
    if !(sbs > 0.0) {
        return false;
    }
    hessian.ger(1.0 / sy, y, y, 1.0);
    hessian.ger(-1.0 / sbs, bs, bs, 1.0);
    true
}

/// Model for nonlinear least squares over a [`LeastSquaresFunction`].
#[derive(Debug, Clone)]
pub struct LeastSquaresModel<F> {
    function: F,
    residuals: DVector<f64>,
    candidate_residuals: DVector<f64>,
    jacobian: DMatrix<f64>,
}

impl<F: LeastSquaresFunction> LeastSquaresModel<F> {
    pub fn new(function: F) -> Self {
        Self {
            function,
            residuals: DVector::zeros(0),
            candidate_residuals: DVector::zeros(0),
            jacobian: DMatrix::zeros(0, 0),
        }
    }

    pub fn function(&self) -> &F {
        &self.function
    }
}

impl<F: LeastSquaresFunction> TrustRegionModel for LeastSquaresModel<F> {
    fn num_parameters(&self) -> usize {
        self.function.num_parameters()
    }

    fn initialize(&mut self) {
        let m = self.function.num_residuals();
        let n = self.function.num_parameters();
        reshape_vector(&mut self.residuals, m);
        reshape_vector(&mut self.candidate_residuals, m);
        reshape_matrix(&mut self.jacobian, m, n);
    }

    fn cost(&mut self, x: &DVector<f64>) -> f64 {
        self.function.residuals(x, &mut self.candidate_residuals);
        compute_cost(&self.candidate_residuals)
    }

    fn linearize(
        &mut self,
        x: &DVector<f64>,
        x_is_last_candidate: bool,
        gradient: &mut DVector<f64>,
        hessian: &mut DMatrix<f64>,
    ) -> f64 {
        if x_is_last_candidate {
            std::mem::swap(&mut self.residuals, &mut self.candidate_residuals);
        } else {
            self.function.residuals(x, &mut self.residuals);
        }
        self.function.jacobian(x, &mut self.jacobian);

        self.jacobian.tr_mul_to(&self.residuals, gradient);
        self.jacobian.tr_mul_to(&self.jacobian, hessian);
        compute_cost(&self.residuals)
    }

    fn jacobian(&self) -> Option<&DMatrix<f64>> {
        Some(&self.jacobian)
    }

    fn residuals(&self) -> Option<&DVector<f64>> {
        Some(&self.residuals)
    }
}
