//! Core problem formulation for the trustopt library
//!
//! This module defines the evaluator capabilities the optimizers drive:
//! - [`CostFunction`]: scalar cost with gradient and optional Hessian (unconstrained minimization)
//! - [`LeastSquaresFunction`]: residual vector with Jacobian (nonlinear least squares)

pub mod problem;

pub use problem::{CostFunction, LeastSquaresFunction};

use thiserror::Error;
use tracing::error;

/// Core module error types for problem definitions
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Vector or matrix length does not match the problem dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The problem cannot be optimized as stated (e.g. zero parameters)
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// problem::check_dimension(n, x.len())
    ///     .map_err(|e| e.log())?;
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
    /// usize::try_from(count)
    ///     .map_err(|e| CoreError::InvalidProblem("negative size".into()).log_with_source(e))?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
