//! Convergence tests shared by every optimizer.
//!
//! The tests are pure predicates over configuration-time tolerances; they hold
//! no state between calls.

use crate::optimizer::{OptimizerError, OptimizerResult};
use nalgebra::DVector;
use tracing::debug;

/// Norm used by the gradient test
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GradientNorm {
    /// `max |gᵢ|`
    #[default]
    Infinity,
    /// `‖g‖₂`
    L2,
}

/// Termination tolerances.
///
/// - **F-test**: every component of the tested vector satisfies `|vᵢ| ≤ ftol`.
///   Least-squares loops pass the residual vector; the trust-region loop passes
///   the relative cost reduction of the accepted step.
/// - **G-test**: the gradient norm (optionally divided by `max(|f|, 1)`) is `≤ gtol`.
/// - **X-test**: the attempted step satisfies `‖p‖ ≤ xtol·(‖x‖ + xtol)`. This is
///   what ends a run at a minimizer whose cost can no longer be lowered in
///   floating point, where the gradient may still sit above an absolute `gtol`.
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    /// Function / residual tolerance
    pub ftol: f64,
    /// Gradient tolerance
    pub gtol: f64,
    /// Relative step tolerance
    pub xtol: f64,
    /// Which norm the gradient test measures
    pub gradient_norm: GradientNorm,
    /// Divide the gradient norm by `max(|f|, 1)` before comparing
    pub scale_gradient: bool,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            gtol: 1e-12,
            xtol: 1e-10,
            gradient_norm: GradientNorm::Infinity,
            scale_gradient: false,
        }
    }
}

impl ConvergenceCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_gradient_norm(mut self, gradient_norm: GradientNorm) -> Self {
        self.gradient_norm = gradient_norm;
        self
    }

    pub fn with_scaled_gradient(mut self, scale_gradient: bool) -> Self {
        self.scale_gradient = scale_gradient;
        self
    }

    /// Tolerances must be finite and non-negative.
    pub fn validate(&self) -> OptimizerResult<()> {
        if !(self.ftol >= 0.0 && self.ftol.is_finite()) {
            return Err(OptimizerError::InvalidParameters(format!(
                "ftol must be finite and >= 0, got {}",
                self.ftol
            ))
            .log());
        }
        if !(self.gtol >= 0.0 && self.gtol.is_finite()) {
            return Err(OptimizerError::InvalidParameters(format!(
                "gtol must be finite and >= 0, got {}",
                self.gtol
            ))
            .log());
        }
        if !(self.xtol >= 0.0 && self.xtol.is_finite()) {
            return Err(OptimizerError::InvalidParameters(format!(
                "xtol must be finite and >= 0, got {}",
                self.xtol
            ))
            .log());
        }
        Ok(())
    }

    /// True iff every value satisfies `|v| ≤ ftol`. Stops at the first value out of tolerance.
    pub fn check_convergence_f_test<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = f64>,
    {
        values.into_iter().all(|v| v.abs() <= self.ftol)
    }

    /// True when the (optionally scaled) gradient norm is within `gtol`.
    pub fn check_convergence_g_test(&self, gradient: &DVector<f64>, fx: f64) -> bool {
        let mut norm = self.gradient_norm(gradient);
        if self.scale_gradient {
            norm /= fx.abs().max(1.0);
        }
        let converged = norm <= self.gtol;
        if converged {
            debug!("G-test passed: gradient norm {:.3e} <= {:.3e}", norm, self.gtol);
        }
        converged
    }

    /// True when `step` is negligible relative to the point `x` it was taken from.
    pub fn check_convergence_x_test(&self, step: &DVector<f64>, x: &DVector<f64>) -> bool {
        let step_norm = step.norm();
        let converged = step_norm <= self.xtol * (x.norm() + self.xtol);
        if converged {
            debug!("X-test passed: step norm {:.3e} at |x| = {:.3e}", step_norm, x.norm());
        }
        converged
    }

    /// Gradient norm in the configured norm, unscaled
    pub fn gradient_norm(&self, gradient: &DVector<f64>) -> f64 {
        match self.gradient_norm {
            GradientNorm::Infinity => gradient.amax(),
            GradientNorm::L2 => gradient.norm(),
        }
    }
}

/// Relative cost reduction `(f_prev − f) / |f_prev|`, used as the trust-region F-test input.
pub fn relative_reduction(fx_prev: f64, fx: f64) -> f64 {
    (fx_prev - fx) / fx_prev.abs().max(f64::MIN_POSITIVE)
}
