//! # trustopt
//!
//! Local nonlinear optimization with trust-region and Levenberg-Marquardt
//! control loops over dense problems.
//!
//! ## Features
//!
//! - **Trust-region framework**: radius adaptation driven by the gain ratio of
//!   a local quadratic model, with interchangeable subproblem solvers
//!   (Cauchy point, dogleg, least-squares dogleg)
//! - **Two problem families**: unconstrained minimization of a scalar cost
//!   ([`CostFunction`], exact Hessian or BFGS) and nonlinear least squares
//!   ([`LeastSquaresFunction`])
//! - **Levenberg-Marquardt**: damped Gauss-Newton sharing the same
//!   convergence tests
//! - **Pluggable dense linear solvers**: Cholesky and column-pivoted QR on
//!   faer, SVD pseudo-inverse on nalgebra
//!
//! ## Driving an optimizer
//!
//! Every optimizer is initialized with a starting point and then advanced one
//! step at a time with [`Optimizer::iterate`], or to completion with
//! [`Optimizer::run`]. Iteration always ends in a terminal
//! [`OptimizationStatus`]: `Converged`, `MaxIterationsReached` or `Failed`.
//! Errors are reserved for an unusable model (NaN/Inf) or invalid input.

pub mod core;
pub mod error;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod optimizer;

pub use crate::core::{CostFunction, LeastSquaresFunction};
pub use error::{TrustOptError, TrustOptResult};
pub use linalg::{DenseLinearSolver, LinearSolverType};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{
    ConvergenceCriteria, GradientNorm, LeastSquaresTrustRegion, LevenbergMarquardt,
    LevenbergMarquardtConfig, OptimizationStatus, Optimizer, ParameterUpdate, SolverResult,
    TrustRegion, TrustRegionConfig, UnconMinTrustRegion,
};
