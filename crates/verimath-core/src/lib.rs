//! Verimath Core - verification-first math reasoning
//!
//! The pipeline that:
//! - Classifies a query and assesses its real-world impact
//! - Parses it into a structured problem
//! - Plans a subgoal DAG over the registered backends
//! - Executes the DAG group by group under a resource budget
//! - Accepts an answer only after independent verification strategies agree
//! - Explains the result and records an audit trail
//!
//! # Example
//!
//! ```rust,ignore
//! use verimath_core::MathEngine;
//!
//! # async fn example() {
//! let engine = MathEngine::with_defaults();
//! let out = engine.process("solve x^2 - 4 = 0", None).await;
//!
//! assert_eq!(out.answer(), Some("x = 2, x = -2"));
//! println!("confidence {:.2}", out.confidence());
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod executor;
pub mod explainer;
pub mod impact;
pub mod parser;
pub mod planner;
pub mod types;
pub mod validator;
pub mod worker_pool;

// Re-exports for convenience
pub use config::{BudgetTable, ConfigStore, EngineConfig, Policy, PromotionEvidence, SpotCheck, Thresholds};
pub use detector::Detector;
pub use engine::{AttemptRecord, AuditMetadata, CognitionSummary, Completeness, DecisionEntry, MathEngine, ModeResult, Phase};
pub use error::{ConfigError, EngineError, ErrorCode, ModeError, ParseError, PlanError, PoolError, Stage};
pub use executor::Executor;
pub use explainer::{explain, Explanation, ExplanationMode, ExplanationStep};
pub use impact::{
    GovernanceContext, ImpactAssessment, ImpactAssessor, ImpactCategory, ImpactTier, RequiredCheck, Treaty,
};
pub use parser::ProblemParser;
pub use planner::Planner;
pub use types::{
    ComputeTier, Domain, ExecutionResult, Intent, Plan, Problem, ProblemType, ResourceBudget, RunId, StepResult,
    Subgoal, SubgoalInputs,
};
pub use validator::{CheckCategory, CheckKind, ValidationCheck, ValidationOutcome, Validator};
pub use worker_pool::{PoolStats, WorkerPool};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Verimath Core
    pub use crate::{
        ComputeTier, EngineConfig, ErrorCode, GovernanceContext, ImpactAssessment, MathEngine, ModeResult, Problem,
        ProblemType, ValidationOutcome,
    };
    pub use verimath_backend::{BackendRegistry, Value};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn engine_full_flow() {
        let engine = MathEngine::with_defaults();
        let out = engine.process("find the derivative of x^3", None).await;

        assert!(out.success, "{:?}", out.errors);
        assert_eq!(out.answer(), Some("3*x^2"));
        assert!(out.validation.as_ref().is_some_and(|v| v.valid));
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
