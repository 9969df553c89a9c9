//! Dogleg subproblem solver.
//!
//! The dogleg path runs from the origin to the Cauchy point `p_c` and on to the
//! Gauss-Newton step `p_gn`. The returned step is the point where the path
//! leaves the trust region:
//!
//! 1. `‖p_gn‖ ≤ Δ`: take `p_gn` (not a full step)
//! 2. `‖p_c‖ ≥ Δ`: take the steepest-descent step of length `Δ`
//! 3. otherwise `p = p_c + β(p_gn − p_c)` with `β ∈ [0, 1]` chosen so `‖p‖ = Δ`
//!
//! Two ways of producing `p_gn` and the curvature `gBg` are supported:
//! - Newton form: `gBg = dᵀBd` and `B·p_gn = −g`
//! - Least-squares form: `gBg = ‖J·d‖²` and `p_gn = argmin ‖J·p + r‖`, which
//!   avoids squaring the condition number of `J`
//!
//! When the curvature is not positive or the Gauss-Newton solve fails, the
//! dogleg degrades to the Cauchy step for that linearization point. So does a
//! `p_gn` with `gᵀp_gn ≥ 0`, which an indefinite `B` can produce.

use crate::linalg::{
    DenseLinearSolver, LinAlgResult, LinearSolverType, create_linear_solver, reshape_vector,
};
use crate::optimizer::trust_region::cauchy::CauchyUpdate;
use crate::optimizer::trust_region::update::ModelView;
use crate::optimizer::{OptimizerError, OptimizerResult};
use nalgebra::DVector;
use tracing::{debug, warn};

pub struct DoglegUpdate {
    linear_solver: Box<dyn DenseLinearSolver>,
    cauchy: CauchyUpdate,
    gauss_newton: DVector<f64>,
    gauss_newton_norm: f64,
    /// False when the current point only supports a Cauchy step
    gauss_newton_valid: bool,
    rhs: DVector<f64>,
    scratch: DVector<f64>,
}

impl DoglegUpdate {
    pub fn new(solver_type: LinearSolverType) -> Self {
        Self::with_solver(create_linear_solver(solver_type))
    }

    /// Use a caller supplied linear solver
    pub fn with_solver(linear_solver: Box<dyn DenseLinearSolver>) -> Self {
        Self {
            linear_solver,
            cauchy: CauchyUpdate::new(),
            gauss_newton: DVector::zeros(0),
            gauss_newton_norm: 0.0,
            gauss_newton_valid: false,
            rhs: DVector::zeros(0),
            scratch: DVector::zeros(0),
        }
    }

    pub fn solver_type(&self) -> LinearSolverType {
        self.linear_solver.solver_type()
    }

    pub fn initialize(&mut self, num_parameters: usize, minimum_function_value: f64) {
        self.cauchy
            .initialize(num_parameters, minimum_function_value);
        reshape_vector(&mut self.gauss_newton, num_parameters);
        self.gauss_newton_valid = false;
    }

    /// Prepare from the Hessian approximation: `gBg = dᵀBd`, `B·p_gn = −g`.
    pub fn prepare_newton(&mut self, view: &ModelView<'_>) -> OptimizerResult<()> {
        self.cauchy.prepare(view)?;
        self.gauss_newton_valid = false;
        if self.cauchy.curvature() <= 0.0 {
            debug!(
                "Non-positive curvature {:.3e}, dogleg reduces to the Cauchy step",
                self.cauchy.curvature()
            );
            return Ok(());
        }

        reshape_vector(&mut self.rhs, view.gradient.len());
        self.rhs.copy_from(view.gradient);
        self.rhs.neg_mut();
        let solution = self.linear_solver.solve(view.hessian, &self.rhs);
        self.accept_gauss_newton(solution, view.gradient);
        Ok(())
    }

    /// Prepare from the Jacobian: `gBg = ‖J·d‖²`, `p_gn = argmin ‖J·p + r‖`.
    ///
    /// # Errors
    /// `MissingJacobian` if the model exposes no Jacobian or residuals.
    pub fn prepare_least_squares(&mut self, view: &ModelView<'_>) -> OptimizerResult<()> {
        let (Some(jacobian), Some(residuals)) = (view.jacobian, view.residuals) else {
            return Err(OptimizerError::MissingJacobian.log());
        };

        self.cauchy.set_direction(view);
        reshape_vector(&mut self.scratch, jacobian.nrows());
        jacobian.mul_to(self.cauchy.direction(), &mut self.scratch);
        self.cauchy.set_curvature(self.scratch.norm_squared())?;

        self.gauss_newton_valid = false;
        if self.cauchy.curvature() <= 0.0 {
            debug!("Jacobian is zero along the gradient, dogleg reduces to the Cauchy step");
            return Ok(());
        }

        reshape_vector(&mut self.rhs, residuals.len());
        self.rhs.copy_from(residuals);
        self.rhs.neg_mut();
        let solution = self
            .linear_solver
            .solve_least_squares(jacobian, &self.rhs);
        self.accept_gauss_newton(solution, view.gradient);
        Ok(())
    }

    fn accept_gauss_newton(
        &mut self,
        solution: LinAlgResult<DVector<f64>>,
        gradient: &DVector<f64>,
    ) {
        match solution {
            Ok(step) if !(gradient.dot(&step) < 0.0) => {
                debug!(
                    "Gauss-Newton step is not a descent direction (gᵀp = {:.3e}), using the Cauchy step",
                    gradient.dot(&step)
                );
            }
            Ok(step) => {
                self.gauss_newton_norm = step.norm();
                self.gauss_newton = step;
                self.gauss_newton_valid = true;
            }
            Err(e) => {
                warn!(
                    "Gauss-Newton step unavailable ({}), falling back to the Cauchy step",
                    e
                );
            }
        }
    }

    /// Write the dogleg step for `radius` into `step`. Returns whether it is a full step.
    pub fn compute_update(
        &self,
        view: &ModelView<'_>,
        step: &mut DVector<f64>,
        radius: f64,
    ) -> OptimizerResult<bool> {
        if !self.gauss_newton_valid {
            return self.cauchy.compute_update(view, step, radius);
        }

        if self.gauss_newton_norm <= radius {
            step.copy_from(&self.gauss_newton);
            return Ok(false);
        }

        let direction = self.cauchy.direction();
        let cauchy_length = view.gradient_norm / self.cauchy.curvature();
        if cauchy_length >= radius {
            step.copy_from(direction);
            *step *= -radius;
            return Ok(true);
        }

        // step = p_c, then move along v = p_gn − p_c until ‖p_c + βv‖ = Δ
        step.copy_from(direction);
        *step *= -cauchy_length;
        let (mut a, mut b) = (0.0, 0.0);
        for (p_c, p_gn) in step.iter().zip(self.gauss_newton.iter()) {
            let v = p_gn - p_c;
            a += v * v;
            b += p_c * v;
        }
        let c = cauchy_length * cauchy_length - radius * radius;
        let beta = dogleg_beta(a, b, c);

        for (p, p_gn) in step.iter_mut().zip(self.gauss_newton.iter()) {
            *p += beta * (p_gn - *p);
        }
        Ok(true)
    }

    /// Gauss-Newton step at the current point, if one was computed
    pub fn gauss_newton_step(&self) -> Option<&DVector<f64>> {
        self.gauss_newton_valid.then_some(&self.gauss_newton)
    }
}

/// Positive root of `a·β² + 2b·β + c = 0`, clamped to `[0, 1]`.
///
/// Uses the cancellation-free form of the quadratic formula.
fn dogleg_beta(a: f64, b: f64, c: f64) -> f64 {
    if a <= 0.0 {
        return 0.0;
    }
    let d = (b * b - a * c).max(0.0).sqrt();
    let beta = if b <= 0.0 { (-b + d) / a } else { -c / (b + d) };
    beta.clamp(0.0, 1.0)
}
