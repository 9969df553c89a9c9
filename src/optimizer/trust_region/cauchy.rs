//! Cauchy point: minimizer of the quadratic model along steepest descent,
//! restricted to the trust region.
//!
//! With `d = g/‖g‖` and curvature `gBg = dᵀBd`:
//!
//! ```text
//! gBg ≤ 0 :  τ = clamp((f − f_min) / Δ, 0, 1)
//! gBg > 0 :  τ = min(‖g‖ / (Δ·gBg), 1)
//! p = −τ·Δ·d
//! ```
//!
//! The step is "full" (touches the boundary) exactly when `τ = 1`.

use crate::linalg::{inner_product, reshape_vector};
use crate::optimizer::trust_region::update::ModelView;
use crate::optimizer::{OptimizerError, OptimizerResult};
use nalgebra::DVector;

#[derive(Debug, Clone)]
pub struct CauchyUpdate {
    minimum_function_value: f64,
    /// Unit steepest-ascent direction `g/‖g‖`
    direction: DVector<f64>,
    /// `dᵀBd` at the current linearization
    curvature: f64,
    prepared: bool,
}

impl Default for CauchyUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl CauchyUpdate {
    pub fn new() -> Self {
        Self {
            minimum_function_value: f64::NEG_INFINITY,
            direction: DVector::zeros(0),
            curvature: 0.0,
            prepared: false,
        }
    }

    pub fn initialize(&mut self, num_parameters: usize, minimum_function_value: f64) {
        reshape_vector(&mut self.direction, num_parameters);
        self.minimum_function_value = minimum_function_value;
        self.prepared = false;
    }

    /// Cache the direction and curvature `dᵀBd` for a new linearization point.
    ///
    /// # Errors
    /// `NumericalInstability` if the curvature is NaN or infinite.
    pub fn prepare(&mut self, view: &ModelView<'_>) -> OptimizerResult<()> {
        self.set_direction(view);
        let curvature = inner_product(&self.direction, view.hessian, &self.direction);
        self.set_curvature(curvature)
    }

    pub(crate) fn set_direction(&mut self, view: &ModelView<'_>) {
        self.direction.copy_from(view.gradient);
        if view.gradient_norm > 0.0 {
            self.direction /= view.gradient_norm;
        }
        self.prepared = false;
    }

    pub(crate) fn set_curvature(&mut self, curvature: f64) -> OptimizerResult<()> {
        if !curvature.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "curvature along the gradient is {}",
                curvature
            ))
            .log());
        }
        self.curvature = curvature;
        self.prepared = true;
        Ok(())
    }

    /// Write the Cauchy step for `radius` into `step`. Returns whether it is a full step.
    pub fn compute_update(
        &self,
        view: &ModelView<'_>,
        step: &mut DVector<f64>,
        radius: f64,
    ) -> OptimizerResult<bool> {
        if !self.prepared {
            return Err(OptimizerError::NotInitialized.log());
        }
        let tau = if self.curvature <= 0.0 {
            // Model is unbounded below along -d; go as far as the cost bound allows
            ((view.fx - self.minimum_function_value) / radius).clamp(0.0, 1.0)
        } else {
            (view.gradient_norm / (radius * self.curvature)).min(1.0)
        };

        step.copy_from(&self.direction);
        *step *= -tau * radius;
        Ok(tau == 1.0)
    }

    /// Unit steepest-ascent direction at the current point
    pub fn direction(&self) -> &DVector<f64> {
        &self.direction
    }

    /// `dᵀBd` at the current point
    pub fn curvature(&self) -> f64 {
        self.curvature
    }
}
