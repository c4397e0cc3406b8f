//! Error types for the engine
//!
//! Two layers:
//! - `thiserror` enums returned by individual stages (`ParseError`,
//!   `PlanError`, `ConfigError`, umbrella `EngineError`)
//! - `ModeError`, the stage-tagged record collected into a run's result

use serde::{Deserialize, Serialize};
use std::fmt;
use verimath_backend::BackendError;
use verimath_expr::ExprError;

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Parse,
    Plan,
    Execute,
    Validate,
}

/// Error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    IntentUnclear,
    NoViablePlan,
    ContradictionUnresolved,
    BackendUnavailable,
    ExecutionError,
    Timeout,
    ResourceLimit,
    VerificationFailed,
    LowConfidence,
    HighImpactLowConfidence,
    ImpactBlocked,
}

impl ErrorCode {
    /// Stable upper-case code
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::IntentUnclear => "INTENT_UNCLEAR",
            Self::NoViablePlan => "NO_VIABLE_PLAN",
            Self::ContradictionUnresolved => "CONTRADICTION_UNRESOLVED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ResourceLimit => "RESOURCE_LIMIT",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::HighImpactLowConfidence => "HIGH_IMPACT_LOW_CONFIDENCE",
            Self::ImpactBlocked => "IMPACT_BLOCKED",
        }
    }

    /// Pipeline stage that raises this code
    #[must_use]
    pub fn stage(self) -> Stage {
        match self {
            Self::IntentUnclear => Stage::Detect,
            Self::ParseError => Stage::Parse,
            Self::NoViablePlan | Self::ContradictionUnresolved => Stage::Plan,
            Self::BackendUnavailable | Self::ExecutionError | Self::Timeout | Self::ResourceLimit => {
                Stage::Execute
            }
            Self::VerificationFailed
            | Self::LowConfidence
            | Self::HighImpactLowConfidence
            | Self::ImpactBlocked => Stage::Validate,
        }
    }

    /// Whether the caller can recover, by clarifying the query or retrying.
    /// Only a governance block is final.
    #[inline]
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::ImpactBlocked)
    }

    /// Failures caused by the attempt's budget rather than its approach
    #[inline]
    #[must_use]
    pub fn is_budget_related(self) -> bool {
        matches!(self, Self::Timeout | Self::ResourceLimit)
    }

    /// What the caller should try next
    #[must_use]
    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::ParseError => "restate the problem with an explicit equation or expression",
            Self::IntentUnclear => "phrase the query as a mathematical task",
            Self::NoViablePlan => "register a backend for the required method",
            Self::ContradictionUnresolved => "remove or relax the conflicting constraints",
            Self::BackendUnavailable => "enable a backend that accepts this input",
            Self::ExecutionError => "inspect the failing step and its backend",
            Self::Timeout => "raise the wall-time budget or use a higher compute tier",
            Self::ResourceLimit => "narrow the search interval or raise the solution budget",
            Self::VerificationFailed => "review the failed checks before using the answer",
            Self::LowConfidence => "request human review of the answer",
            Self::HighImpactLowConfidence => "obtain independent review before acting on the answer",
            Self::ImpactBlocked => "obtain governance approval for this use",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-tagged error record carried in `ModeResult::errors`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeError {
    pub code: ErrorCode,
    pub stage: Stage,
    pub message: String,
    pub recoverable: bool,
    pub suggested_action: String,
    /// 1-based attempt number; 0 before the first attempt starts
    pub attempt: u32,
}

impl ModeError {
    /// Error with the stage, recoverability and action implied by `code`
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            stage: code.stage(),
            message: message.into(),
            recoverable: code.is_recoverable(),
            suggested_action: code.suggested_action().to_string(),
            attempt: 0,
        }
    }

    /// Tag with the attempt number
    #[inline]
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

impl fmt::Display for ModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&BackendError> for ModeError {
    fn from(err: &BackendError) -> Self {
        let code = if err.is_resource_limit() {
            ErrorCode::ResourceLimit
        } else {
            ErrorCode::ExecutionError
        };
        Self::new(code, err.to_string())
    }
}

/// Parser failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Detector did not consider the query mathematical
    #[error("query does not look mathematical (confidence {confidence:.2})")]
    NotMath { confidence: f64 },

    /// No equation or expression could be extracted
    #[error("no goal could be extracted from '{0}'")]
    NoGoal(String),

    /// Goal needs unknowns but none were found
    #[error("no unknowns in '{0}'")]
    NoUnknowns(String),

    /// Goal type has no meaningful reading of the extracted statements
    #[error("cannot {goal} '{statement}'")]
    Unsupported { goal: String, statement: String },

    #[error("invalid expression in '{segment}': {source}")]
    Expr {
        segment: String,
        #[source]
        source: ExprError,
    },
}

impl ParseError {
    /// Result code for this failure
    #[inline]
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotMath { .. } => ErrorCode::IntentUnclear,
            _ => ErrorCode::ParseError,
        }
    }
}

/// Planner failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// No template with available backends addresses the goal
    #[error("no viable plan for {goal_type}: {reason}")]
    NoViablePlan { goal_type: String, reason: String },

    /// Constraints can never hold together
    #[error("contradictory constraints: {0}")]
    Contradiction(String),

    #[error("subgoal '{subgoal}' depends on unknown subgoal '{dependency}'")]
    UnknownDependency { subgoal: String, dependency: String },

    #[error("dependency cycle through '{0}'")]
    Cycle(String),

    #[error("plan has no subgoals")]
    Empty,
}

impl PlanError {
    /// Result code for this failure
    #[inline]
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Contradiction(_) => ErrorCode::ContradictionUnresolved,
            _ => ErrorCode::NoViablePlan,
        }
    }
}

/// Worker pool failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Pool was closed while work waited for a worker
    #[error("worker pool closed")]
    Closed,
}

/// Configuration loading and promotion failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Values parse but are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Candidate did not clear the promotion thresholds
    #[error("promotion rejected: {0}")]
    Rejected(String),

    /// Nothing to roll back to
    #[error("no earlier configuration version")]
    NoHistory,
}

impl ConfigError {
    /// Whether a corrected candidate could be accepted
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Umbrella error for callers driving stages directly
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backend failed: {0}")]
    Backend(#[from] BackendError),
}

impl EngineError {
    /// Taxonomy code, when the error maps onto one
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Parse(e) => Some(e.code()),
            Self::Plan(e) => Some(e.code()),
            Self::Backend(e) => Some(ModeError::from(e).code),
            Self::Config(_) => None,
        }
    }

    /// Whether the wrapped failure has a recoverable code
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.code().is_some_and(ErrorCode::is_recoverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialise_screaming() {
        let json = serde_json::to_string(&ErrorCode::HighImpactLowConfidence).unwrap();
        assert_eq!(json, "\"HIGH_IMPACT_LOW_CONFIDENCE\"");
        assert_eq!(ErrorCode::HighImpactLowConfidence.to_string(), "HIGH_IMPACT_LOW_CONFIDENCE");
    }

    #[test]
    fn stages_follow_taxonomy() {
        assert_eq!(ErrorCode::IntentUnclear.stage(), Stage::Detect);
        assert_eq!(ErrorCode::ContradictionUnresolved.stage(), Stage::Plan);
        assert_eq!(ErrorCode::Timeout.stage(), Stage::Execute);
        assert_eq!(ErrorCode::ImpactBlocked.stage(), Stage::Validate);
    }

    #[test]
    fn only_impact_blocked_is_unrecoverable() {
        let all = [
            ErrorCode::ParseError,
            ErrorCode::IntentUnclear,
            ErrorCode::NoViablePlan,
            ErrorCode::ContradictionUnresolved,
            ErrorCode::BackendUnavailable,
            ErrorCode::ExecutionError,
            ErrorCode::Timeout,
            ErrorCode::ResourceLimit,
            ErrorCode::VerificationFailed,
            ErrorCode::LowConfidence,
            ErrorCode::HighImpactLowConfidence,
            ErrorCode::ImpactBlocked,
        ];
        for code in all {
            let expected = code != ErrorCode::ImpactBlocked;
            assert_eq!(code.is_recoverable(), expected, "{code}");
            assert_eq!(ModeError::new(code, "x").recoverable, expected, "{code}");
        }
    }

    #[test]
    fn impact_blocked_is_final() {
        let err = ModeError::new(ErrorCode::ImpactBlocked, "blocked").with_attempt(1);
        assert!(!err.recoverable);
        assert_eq!(err.attempt, 1);
        assert!(ModeError::new(ErrorCode::Timeout, "slow").recoverable);
    }

    #[test]
    fn backend_errors_map_to_execute_codes() {
        let limit = BackendError::ResourceLimit { found: 9, limit: 8 };
        assert_eq!(ModeError::from(&limit).code, ErrorCode::ResourceLimit);
        let singular = BackendError::Singular("det = 0".into());
        assert_eq!(ModeError::from(&singular).code, ErrorCode::ExecutionError);
        assert_eq!(EngineError::from(limit).code(), Some(ErrorCode::ResourceLimit));
    }

    #[test]
    fn parse_and_plan_codes() {
        assert_eq!(ParseError::NotMath { confidence: 0.0 }.code(), ErrorCode::IntentUnclear);
        assert_eq!(ParseError::NoGoal("hi".into()).code(), ErrorCode::ParseError);
        assert_eq!(
            PlanError::Contradiction("x > 3 and x < 1".into()).code(),
            ErrorCode::ContradictionUnresolved
        );
    }
}
