//! Error types for the trustopt library
//!
//! # Error Hierarchy
//!
//! - **`TrustOptError`** is the top-level error for callers that want a single type
//! - **Module errors** (`CoreError`, `LinAlgError`, `OptimizerError`) are wrapped transparently
//! - **Error sources** are preserved, so the whole chain can be inspected
//!
//! Example error chain:
//! ```text
//! TrustOptError::Optimizer(
//!     OptimizerError::LinAlg(LinAlgError::SingularMatrix)
//! )
//! ```
//!
//! Linear-solve failures inside an iteration never surface here: the control
//! loops recover from them by shrinking the region or raising the damping.

use crate::{core::CoreError, linalg::LinAlgError, optimizer::OptimizerError};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the trustopt library
pub type TrustOptResult<T> = Result<T, TrustOptError>;

/// Main error type for the trustopt library
#[derive(Debug, Error)]
pub enum TrustOptError {
    /// Problem definition errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),
}

impl TrustOptError {
    /// Get the full error chain as a string for logging and debugging.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// if let Err(e) = solver.run() {
    ///     warn!("Error chain: {}", TrustOptError::from(e).chain());
    /// }
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line form of [`TrustOptError::chain`]
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
