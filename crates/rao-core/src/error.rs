//! Unified error type for remedial-action optimization
//!
//! [`RaoError`] separates the conditions a search can recover from (a failed
//! simulation turns one leaf into an error leaf) from the ones it cannot
//! (an inapplicable combination, missing configuration, or a caller reading
//! results that do not exist yet).
//!
//! # Example
//!
//! ```ignore
//! use rao_core::{RaoError, RaoResult};
//!
//! fn optimize_perimeter(crac: &Crac) -> RaoResult<()> {
//!     let perimeter = OptimizationPerimeter::preventive(crac)?;
//!     SearchTree::new(input, parameters)?.run(Instant::Outage)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all RAO operations.
#[derive(Error, Debug)]
pub enum RaoError {
    /// I/O errors (parameter files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Catalog validation errors (duplicate ids, inconsistent ranges)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing prerequisites or invalid parameters, detected before any search starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// The sensitivity engine could not produce a result for a snapshot
    #[error("Simulation error: {0}")]
    Simulation(String),

    /// The linear solver failed or returned an unusable solution
    #[error("Solver error: {0}")]
    Solver(String),

    /// A discrete action could not be applied on a snapshot
    #[error("Illegal combination: network action '{action}' cannot be applied on '{snapshot}'")]
    IllegalCombination { action: String, snapshot: String },

    /// The caller used a leaf or result outside of its lifecycle contract
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using RaoError.
pub type RaoResult<T> = Result<T, RaoError>;

impl RaoError {
    /// Errors that only affect the leaf they were raised for.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RaoError::Simulation(_) | RaoError::Solver(_))
    }
}

impl From<anyhow::Error> for RaoError {
    fn from(err: anyhow::Error) -> Self {
        RaoError::Other(err.to_string())
    }
}

impl From<String> for RaoError {
    fn from(s: String) -> Self {
        RaoError::Other(s)
    }
}

impl From<&str> for RaoError {
    fn from(s: &str) -> Self {
        RaoError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RaoError::Simulation("load flow diverged".into());
        assert!(err.to_string().contains("Simulation error"));
        assert!(err.to_string().contains("load flow diverged"));
    }

    #[test]
    fn test_illegal_combination_display() {
        let err = RaoError::IllegalCombination {
            action: "open-line-1".into(),
            snapshot: "leaf-3".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("open-line-1"));
        assert!(msg.contains("leaf-3"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(RaoError::Simulation("x".into()).is_recoverable());
        assert!(RaoError::Solver("x".into()).is_recoverable());
        assert!(!RaoError::Config("x".into()).is_recoverable());
        assert!(!RaoError::ContractViolation("x".into()).is_recoverable());
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> RaoResult<()> {
            Err(RaoError::Validation("test".into()))
        }

        fn outer() -> RaoResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
