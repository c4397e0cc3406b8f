//! Backend error types

use crate::backend::Method;
use verimath_expr::ExprError;

/// Failure of a single backend computation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Backend was asked for something outside its capabilities
    #[error("backend '{backend}' cannot handle {method}")]
    Unsupported { backend: String, method: Method },

    /// Request lacks a statement, variable or prior output the method needs
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Linear system without a unique solution
    #[error("singular system: {0}")]
    Singular(String),

    /// Iterative method gave up
    #[error("no convergence after {iterations} iterations: {detail}")]
    NonConvergence { iterations: usize, detail: String },

    /// Exact technique does not apply to this input
    #[error("no closed form: {0}")]
    NoClosedForm(String),

    /// Problem has no admissible solution
    #[error("no solution: {0}")]
    NoSolution(String),

    /// Enumeration produced more solutions than the budget allows
    #[error("found {found} solutions, limit is {limit}")]
    ResourceLimit { found: usize, limit: usize },

    /// Build collaborator rejected or failed the task
    #[error("build failed: {0}")]
    Build(String),

    #[error(transparent)]
    Expr(#[from] ExprError),
}

impl BackendError {
    /// Exceeded a resource budget (as opposed to a computation failure)
    #[inline]
    #[must_use]
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::ResourceLimit { .. })
    }

    /// Whether a different approach could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MissingInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(BackendError::ResourceLimit { found: 9, limit: 8 }.is_resource_limit());
        assert!(!BackendError::Singular("det = 0".into()).is_resource_limit());
        assert!(!BackendError::MissingInput("variable".into()).is_recoverable());
        assert!(BackendError::NoClosedForm("x^5 + x + 1".into()).is_recoverable());
    }

    #[test]
    fn messages_name_the_method() {
        let err = BackendError::Unsupported {
            backend: "numeric".into(),
            method: Method::Factor,
        };
        assert_eq!(err.to_string(), "backend 'numeric' cannot handle factor");
    }
}
