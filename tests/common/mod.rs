//! Test problems shared by the integration tests.
//!
//! Least-squares problems follow Moré, Garbow and Hillstrom, "Testing
//! Unconstrained Optimization Software" (1981), with their standard starting
//! points.

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector, dmatrix, dvector};
use std::f64::consts::PI;
use trustopt::{CostFunction, LeastSquaresFunction};

/// f(x) = xᵀx, minimum 0 at the origin
pub struct QuadraticBowl {
    pub n: usize,
}

impl CostFunction for QuadraticBowl {
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

/// f(x) = 100(x₁ − x₀²)² + (1 − x₀)², optionally without a Hessian
pub struct RosenbrockCost {
    pub exact_hessian: bool,
}

impl CostFunction for RosenbrockCost {
    fn num_parameters(&self) -> usize {
        2
    }

    fn cost(&self, x: &DVector<f64>) -> f64 {
        let a = x[1] - x[0] * x[0];
        let b = 1.0 - x[0];
        100.0 * a * a + b * b
    }

    fn gradient(&self, x: &DVector<f64>, gradient: &mut DVector<f64>) {
        let a = x[1] - x[0] * x[0];
        gradient[0] = -400.0 * x[0] * a - 2.0 * (1.0 - x[0]);
        gradient[1] = 200.0 * a;
    }

    fn hessian(&self, x: &DVector<f64>, hessian: &mut DMatrix<f64>) -> bool {
        if !self.exact_hessian {
            return false;
        }
        hessian[(0, 0)] = 1200.0 * x[0] * x[0] - 400.0 * x[1] + 2.0;
        hessian[(0, 1)] = -400.0 * x[0];
        hessian[(1, 0)] = -400.0 * x[0];
        hessian[(1, 1)] = 200.0;
        true
    }
}

/// MGH #1, residual form of Rosenbrock. Start (−1.2, 1), solution (1, 1)
pub struct Rosenbrock;

impl Rosenbrock {
    pub fn start() -> DVector<f64> {
        dvector![-1.2, 1.0]
    }

    pub fn solution() -> DVector<f64> {
        dvector![1.0, 1.0]
    }
}

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

/// MGH #7, helical valley. Start (−1, 0, 0), solution (1, 0, 0)
pub struct HelicalValley;

impl HelicalValley {
    pub fn start() -> DVector<f64> {
        dvector![-1.0, 0.0, 0.0]
    }

    pub fn solution() -> DVector<f64> {
        dvector![1.0, 0.0, 0.0]
    }

    fn theta(x0: f64, x1: f64) -> f64 {
        if x0 > 0.0 {
            (x1 / x0).atan() / (2.0 * PI)
        } else if x0 < 0.0 {
            (x1 / x0).atan() / (2.0 * PI) + 0.5
        } else {
            0.25_f64.copysign(x1)
        }
    }
}

impl LeastSquaresFunction for HelicalValley {
    fn num_parameters(&self) -> usize {
        3
    }

    fn num_residuals(&self) -> usize {
        3
    }

    fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
        let theta = Self::theta(x[0], x[1]);
        residuals[0] = 10.0 * (x[2] - 10.0 * theta);
        residuals[1] = 10.0 * ((x[0] * x[0] + x[1] * x[1]).sqrt() - 1.0);
        residuals[2] = x[2];
    }

    fn jacobian(&self, x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        let rho_squared = x[0] * x[0] + x[1] * x[1];
        let rho = rho_squared.sqrt();
        let dtheta_dx0 = -x[1] / (2.0 * PI * rho_squared);
        let dtheta_dx1 = x[0] / (2.0 * PI * rho_squared);

        jacobian[(0, 0)] = -100.0 * dtheta_dx0;
        jacobian[(0, 1)] = -100.0 * dtheta_dx1;
        jacobian[(0, 2)] = 10.0;
        jacobian[(1, 0)] = 10.0 * x[0] / rho;
        jacobian[(1, 1)] = 10.0 * x[1] / rho;
        jacobian[(1, 2)] = 0.0;
        jacobian[(2, 0)] = 0.0;
        jacobian[(2, 1)] = 0.0;
        jacobian[(2, 2)] = 1.0;
    }
}

/// MGH #13, Powell singular. Start (3, −1, 0, 1), solution at the origin
/// where the Jacobian is singular
pub struct PowellSingular;

impl PowellSingular {
    pub fn start() -> DVector<f64> {
        dvector![3.0, -1.0, 0.0, 1.0]
    }
}

impl LeastSquaresFunction for PowellSingular {
    fn num_parameters(&self) -> usize {
        4
    }

    fn num_residuals(&self) -> usize {
        4
    }

    fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
        residuals[0] = x[0] + 10.0 * x[1];
        residuals[1] = 5.0_f64.sqrt() * (x[2] - x[3]);
        residuals[2] = (x[1] - 2.0 * x[2]).powi(2);
        residuals[3] = 10.0_f64.sqrt() * (x[0] - x[3]).powi(2);
    }

    fn jacobian(&self, x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        let sqrt5 = 5.0_f64.sqrt();
        let sqrt10 = 10.0_f64.sqrt();
        let a = x[1] - 2.0 * x[2];
        let b = x[0] - x[3];

        jacobian.fill(0.0);
        jacobian[(0, 0)] = 1.0;
        jacobian[(0, 1)] = 10.0;
        jacobian[(1, 2)] = sqrt5;
        jacobian[(1, 3)] = -sqrt5;
        jacobian[(2, 1)] = 2.0 * a;
        jacobian[(2, 2)] = -4.0 * a;
        jacobian[(3, 0)] = 2.0 * sqrt10 * b;
        jacobian[(3, 3)] = -2.0 * sqrt10 * b;
    }
}

/// r(x) = A x − b with a full-rank, overdetermined A
pub struct LinearLeastSquares {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl LinearLeastSquares {
    pub fn new() -> Self {
        Self {
            a: dmatrix![
                1.0, 2.0, 0.0;
                0.0, 1.0, -1.0;
                3.0, 0.0, 1.0;
                1.0, 1.0, 1.0;
                -2.0, 0.5, 4.0
            ],
            b: dvector![1.0, -2.0, 0.5, 3.0, 2.0],
        }
    }

    /// Minimizer of ‖A x − b‖ via SVD
    pub fn solution(&self) -> DVector<f64> {
        self.a
            .clone()
            .svd(true, true)
            .solve(&self.b, 1e-14)
            .unwrap_or_else(|_| DVector::zeros(self.a.ncols()))
    }
}

impl LeastSquaresFunction for LinearLeastSquares {
    fn num_parameters(&self) -> usize {
        self.a.ncols()
    }

    fn num_residuals(&self) -> usize {
        self.a.nrows()
    }

    fn residuals(&self, x: &DVector<f64>, residuals: &mut DVector<f64>) {
        self.a.mul_to(x, residuals);
        *residuals -= &self.b;
    }

    fn jacobian(&self, _x: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        jacobian.copy_from(&self.a);
    }
}
