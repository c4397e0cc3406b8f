//! Math engine orchestrator
//!
//! Drives one query through the observe-orient-plan-act-verify loop:
//! - Detects intent and assesses real-world impact
//! - Applies the governance gate
//! - Parses once, then plans, executes and verifies per attempt
//! - Escalates the compute tier on retry, never repeating a failed approach
//! - Reports the best attempt with an explanation and audit metadata

use crate::config::{ConfigStore, EngineConfig};
use crate::detector::Detector;
use crate::error::{ErrorCode, ModeError, Stage};
use crate::executor::Executor;
use crate::explainer::{explain, Explanation, ExplanationMode};
use crate::impact::{GovernanceContext, ImpactAssessment, ImpactAssessor, ImpactTier};
use crate::parser::ProblemParser;
use crate::planner::Planner;
use crate::types::{ComputeTier, ExecutionResult, Intent, Plan, Problem, RunId};
use crate::validator::{ValidationOutcome, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use verimath_backend::BackendRegistry;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Intent detection and impact assessment on the raw query
    Observe,
    /// Parsing the query into a problem
    Orient,
    /// Choosing an approach and compute tier
    Plan,
    /// Running the plan against the backends
    Act,
    /// Independent checks of the answer
    Verify,
    /// Another attempt after a failed one
    Retry,
    /// Finished with a validated answer
    Done,
    /// Stopped without a validated answer
    Aborted,
}

impl Phase {
    /// Snake-case name used in the decision trail
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Orient => "orient",
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Verify => "verify",
            Self::Retry => "retry",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the decision trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub phase: Phase,
    /// Component that made the decision
    pub source: String,
    /// What it decided on
    pub target: String,
    pub influence: String,
    /// Strength of the decision in [0, 1]
    pub weight: f64,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Short account of what the engine saw and did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CognitionSummary {
    pub observed: String,
    pub oriented: String,
    pub acted: String,
    pub key_decision: String,
    pub confidence_rationale: String,
}

impl CognitionSummary {
    /// Natural-language rendering
    #[must_use]
    pub fn render(&self) -> String {
        [
            &self.observed,
            &self.oriented,
            &self.acted,
            &self.key_decision,
            &self.confidence_rationale,
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s}."))
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// How far the run got and what is left to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
    pub score: f64,
    pub missing: Vec<String>,
    pub next_steps: Vec<String>,
    pub auto_approve_allowed: bool,
}

impl Completeness {
    /// Weighted progress: parsed 0.2, planned 0.2, executed 0.3, confidence 0.3
    #[must_use]
    pub fn assess(parsed: bool, planned: bool, executed: bool, confidence: f64, success: bool) -> Self {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let score = 0.2 * flag(parsed) + 0.2 * flag(planned) + 0.3 * flag(executed) + 0.3 * confidence.clamp(0.0, 1.0);
        let score = (score * 1e6).round() / 1e6;
        let missing = [
            (parsed, "problem"),
            (planned, "plan"),
            (executed, "execution"),
            (success, "verification"),
        ]
        .iter()
        .filter(|(done, _)| !done)
        .map(|(_, name)| (*name).to_string())
        .collect();
        Self {
            score,
            missing,
            next_steps: Vec::new(),
            auto_approve_allowed: success && score >= 0.7,
        }
    }
}

/// Per-attempt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub tier: ComputeTier,
    pub approach: Option<String>,
    pub success: bool,
    pub confidence: f64,
    pub errors: Vec<ModeError>,
    pub elapsed_ms: u64,
}

/// Everything needed to replay how a run reached its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    /// Decisions in the order they were taken
    pub trail: Vec<DecisionEntry>,
    /// One-line account of the run
    pub summary: String,
    pub cognition: CognitionSummary,
    /// Impact as used for gating, re-derived from category and score
    pub impact: ImpactAssessment,
    pub completeness: Completeness,
    /// One record per attempt, oldest first
    pub attempts: Vec<AttemptRecord>,
    /// Configuration version the run was pinned to
    pub config_version: u64,
}

/// Outcome of one `process` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeResult {
    pub run_id: RunId,
    pub success: bool,
    pub problem: Option<Problem>,
    /// Best attempt's execution
    pub result: Option<ExecutionResult>,
    pub validation: Option<ValidationOutcome>,
    pub explanation: Explanation,
    /// Empty on success; every attempt's failures otherwise
    pub errors: Vec<ModeError>,
    pub total_time_ms: u64,
    pub audit: AuditMetadata,
}

impl ModeResult {
    /// Final answer text of a successful run
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        self.result
            .as_ref()
            .filter(|_| self.success)
            .and_then(|r| r.final_answer.as_deref())
    }

    /// Final confidence, zero without a validation
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.validation.as_ref().map_or(0.0, |v| v.confidence)
    }

    /// Codes of the final errors, in order
    #[must_use]
    pub fn error_codes(&self) -> Vec<ErrorCode> {
        self.errors.iter().map(|e| e.code).collect()
    }

    /// Whether any final error has `code`
    #[inline]
    #[must_use]
    pub fn has_error(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

/// Everything one attempt produced
#[derive(Debug, Clone)]
struct Attempt {
    record: AttemptRecord,
    plan: Option<Plan>,
    result: Option<ExecutionResult>,
    validation: Option<ValidationOutcome>,
}

impl Attempt {
    fn confidence(&self) -> f64 {
        self.validation.as_ref().map_or(0.0, |v| v.confidence)
    }

    /// Rank for best-attempt selection: success, then confidence, then progress
    fn rank(&self) -> (bool, f64, u8) {
        let progress = match (&self.plan, &self.result) {
            (_, Some(r)) if r.success => 3,
            (_, Some(_)) => 2,
            (Some(_), None) => 1,
            (None, None) => 0,
        };
        (self.record.success, self.confidence(), progress)
    }
}

#[derive(Debug, Default)]
struct Trail {
    entries: Vec<DecisionEntry>,
}

impl Trail {
    fn record(&mut self, phase: Phase, source: &str, target: impl Into<String>, influence: &str, weight: f64, note: impl Into<String>) {
        let entry = DecisionEntry {
            phase,
            source: source.to_string(),
            target: target.into(),
            influence: influence.to_string(),
            weight: weight.clamp(0.0, 1.0),
            note: note.into(),
            at: Utc::now(),
        };
        tracing::debug!(phase = %entry.phase, source = %entry.source, target = %entry.target, "decision");
        self.entries.push(entry);
    }
}

/// Verification-first math engine
#[derive(Debug, Clone)]
pub struct MathEngine {
    registry: Arc<BackendRegistry>,
    config: Arc<ConfigStore>,
    detector: Detector,
    assessor: ImpactAssessor,
    parser: ProblemParser,
}

impl MathEngine {
    /// Create new engine
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, config: EngineConfig) -> Self {
        Self::with_store(registry, Arc::new(ConfigStore::new(config)))
    }

    /// Engine sharing a versioned configuration store
    #[must_use]
    pub fn with_store(registry: Arc<BackendRegistry>, config: Arc<ConfigStore>) -> Self {
        Self {
            registry,
            config,
            detector: Detector::new(),
            assessor: ImpactAssessor::new(),
            parser: ProblemParser::new(),
        }
    }

    /// Symbolic and numeric backends, default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(BackendRegistry::with_defaults()), EngineConfig::default())
    }

    /// Backends the engine plans against
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Versioned configuration shared with other engines
    #[inline]
    #[must_use]
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Answer `query`, verified
    ///
    /// # Workflow
    /// 1. Observe: detect intent, assess impact, apply the governance gate
    /// 2. Orient: parse into a problem
    /// 3. Plan, act and verify per attempt, escalating the tier on retry
    /// 4. Report the best attempt
    #[tracing::instrument(skip(self, governance), fields(run_id = tracing::field::Empty))]
    pub async fn process(&self, query: &str, governance: Option<&GovernanceContext>) -> ModeResult {
        let started = Instant::now();
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(&run_id));
        let config = self.config.current();
        let mut trail = Trail::default();

        // OBSERVE
        let intent = self.detector.detect(query);
        tracing::info!(
            problem_type = %intent.problem_type,
            confidence = intent.confidence,
            tier = %intent.compute_tier,
            "observed query"
        );
        trail.record(
            Phase::Observe,
            "detector",
            intent.problem_type.name(),
            "classification",
            intent.confidence,
            format!("domain {}, tier {}", intent.domain.name(), intent.compute_tier),
        );

        let impact = governance
            .and_then(|g| g.impact.as_ref())
            .map_or_else(|| self.assessor.assess(query), ImpactAssessment::rederived);
        trail.record(
            Phase::Observe,
            "impact_assessor",
            impact.tier.name(),
            "verification threshold",
            impact.score,
            impact
                .category
                .map_or_else(|| "no impact category".to_string(), |c| format!("category {c}")),
        );

        if let Some(reason) = Self::blocked(governance, &impact, &config) {
            tracing::warn!(%reason, "blocked by governance");
            trail.record(Phase::Aborted, "governance", "run", "block", 1.0, reason.clone());
            let error = ModeError::new(ErrorCode::ImpactBlocked, reason.clone());
            return self.abort(run_id, &intent, impact, trail, error, &reason, started, config.version);
        }

        // ORIENT
        let problem = match self.parser.parse(query, &intent) {
            Ok(problem) => problem,
            Err(err) => {
                tracing::warn!(error = %err, "parse failed");
                trail.record(Phase::Aborted, "parser", "problem", "rejection", 1.0, err.to_string());
                let error = ModeError::new(err.code(), err.to_string());
                let reason = err.to_string();
                return self.abort(run_id, &intent, impact, trail, error, &reason, started, config.version);
            }
        };
        tracing::info!(goal = %problem.goal, unknowns = ?problem.unknowns, "oriented");
        trail.record(
            Phase::Orient,
            "parser",
            problem.goal.clone(),
            "problem statement",
            1.0,
            format!("{} known(s), {} constraint(s)", problem.knowns.len(), problem.constraints.len()),
        );

        let attempts = self.attempt_loop(&problem, &impact, &config, intent.compute_tier, &mut trail).await;

        // best attempt; ties keep the later, more escalated one
        let best = attempts
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                let (sa, ca, pa) = a.rank();
                let (sb, cb, pb) = b.rank();
                sa.cmp(&sb)
                    .then(ca.total_cmp(&cb))
                    .then(pa.cmp(&pb))
                    .then(ia.cmp(ib))
            })
            .map(|(_, a)| a);
        let success = best.is_some_and(|a| a.record.success);
        let errors: Vec<ModeError> = if success {
            Vec::new()
        } else {
            attempts.iter().flat_map(|a| a.record.errors.clone()).collect()
        };

        let mode = ExplanationMode::for_tier(best.map_or(intent.compute_tier, |a| a.record.tier));
        let explanation = explain(
            &problem,
            best.and_then(|a| a.plan.as_ref()),
            best.and_then(|a| a.result.as_ref()),
            best.and_then(|a| a.validation.as_ref()),
            mode,
        );

        let final_phase = if success { Phase::Done } else { Phase::Aborted };
        trail.record(
            final_phase,
            "orchestrator",
            "run",
            "verdict",
            best.map_or(0.0, Attempt::confidence),
            format!("{} attempt(s)", attempts.len()),
        );

        let mut completeness = Completeness::assess(
            true,
            best.is_some_and(|a| a.plan.is_some()),
            best.and_then(|a| a.result.as_ref()).is_some_and(|r| r.success),
            best.map_or(0.0, Attempt::confidence),
            success,
        );
        completeness.next_steps = next_steps(&errors);

        let cognition = CognitionSummary {
            observed: format!(
                "Classified as {} in {} (confidence {:.2})",
                intent.problem_type,
                intent.domain.name(),
                intent.confidence
            ),
            oriented: format!("Goal: {}; {} impact", problem.goal, impact.tier),
            acted: format!(
                "{} attempt(s), last approach {}",
                attempts.len(),
                attempts
                    .last()
                    .and_then(|a| a.record.approach.as_deref())
                    .unwrap_or("none")
            ),
            key_decision: match (success, best.and_then(|a| a.result.as_ref())) {
                (true, Some(r)) => format!("Accepted {}", r.final_answer.as_deref().unwrap_or("the answer")),
                _ => match errors.last() {
                    Some(err) => format!("Rejected after {}", err.code),
                    None => "No answer".to_string(),
                },
            },
            confidence_rationale: best
                .and_then(|a| a.validation.as_ref())
                .map(|v| {
                    format!(
                        "{}/{} checks passed, confidence {:.2} against {:.2}",
                        v.checks.iter().filter(|c| c.passed).count(),
                        v.checks.len(),
                        v.confidence,
                        v.threshold
                    )
                })
                .unwrap_or_default(),
        };

        let total_time_ms = elapsed_ms(started);
        tracing::info!(success, attempts = attempts.len(), elapsed_ms = total_time_ms, "run finished");

        let best = best.cloned();
        ModeResult {
            run_id,
            success,
            problem: Some(problem),
            result: best.as_ref().and_then(|a| a.result.clone()),
            validation: best.as_ref().and_then(|a| a.validation.clone()),
            explanation,
            errors,
            total_time_ms,
            audit: AuditMetadata {
                trail: trail.entries,
                summary: cognition.render(),
                cognition,
                impact,
                completeness,
                attempts: attempts.into_iter().map(|a| a.record).collect(),
                config_version: config.version,
            },
        }
    }

    /// PLAN, ACT and VERIFY until an attempt succeeds or retries run out
    async fn attempt_loop(
        &self,
        problem: &Problem,
        impact: &ImpactAssessment,
        config: &EngineConfig,
        initial_tier: ComputeTier,
        trail: &mut Trail,
    ) -> Vec<Attempt> {
        let planner = Planner::new(Arc::clone(&self.registry)).with_reproduction(config.request_reproduction);
        let executor = Executor::new(Arc::clone(&self.registry)).with_tolerance(config.tolerance);
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();
        let mut tier = initial_tier;

        for attempt in 1..=config.max_retries.saturating_add(1) {
            let attempt_started = Instant::now();
            if attempt > 1 {
                let next = tier.escalate();
                tracing::info!(attempt, from = %tier, to = %next, excluded = ?excluded, "retrying");
                trail.record(
                    Phase::Retry,
                    "orchestrator",
                    next.name(),
                    "tier escalation",
                    0.5,
                    format!("excluding {excluded:?}"),
                );
                tier = next;
            }
            let budget = config.budgets.for_tier(tier);
            let mut record = AttemptRecord {
                attempt,
                tier,
                approach: None,
                success: false,
                confidence: 0.0,
                errors: Vec::new(),
                elapsed_ms: 0,
            };

            // PLAN
            let plan = match planner.plan_with(problem, &budget, &excluded) {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "planning failed");
                    trail.record(Phase::Plan, "planner", "plan", "rejection", 1.0, err.to_string());
                    record.errors.push(ModeError::new(err.code(), err.to_string()).with_attempt(attempt));
                    record.elapsed_ms = elapsed_ms(attempt_started);
                    attempts.push(Attempt {
                        record,
                        plan: None,
                        result: None,
                        validation: None,
                    });
                    // planning is deterministic for a fixed exclusion list
                    break;
                }
            };
            record.approach = Some(plan.approach.clone());
            trail.record(
                Phase::Plan,
                "planner",
                plan.approach.clone(),
                "approach",
                plan.score,
                format!("{} subgoal(s), fallbacks {:?}", plan.subgoals.len(), plan.fallback_approaches),
            );

            // ACT
            let result = executor.execute(&plan, &budget).await;
            trail.record(
                Phase::Act,
                "executor",
                result.backends_used.join(","),
                "execution",
                if result.success { 1.0 } else { 0.0 },
                format!("{} step(s) in {} ms", result.steps.len(), result.elapsed_ms),
            );

            // VERIFY
            let validator =
                Validator::new(Arc::clone(&self.registry), config).with_paths(budget.max_verification_paths);
            let validation = if result.success {
                validator.validate(problem, &result, Some(impact)).await
            } else {
                validator.unverified("execution failed", Some(impact))
            };
            trail.record(
                Phase::Verify,
                "validator",
                if validation.valid { "accepted" } else { "rejected" },
                "verdict",
                validation.confidence,
                format!(
                    "diversity {:.2}, threshold {:.2}",
                    validation.diversity_score, validation.threshold
                ),
            );

            let error = if result.success {
                validation.failure()
            } else {
                Some(result.error.clone().unwrap_or_else(|| {
                    ModeError::new(ErrorCode::ExecutionError, "execution failed without a reported error")
                }))
            }
            .map(|e| e.with_attempt(attempt));

            record.success = result.success && validation.valid;
            record.confidence = validation.confidence;
            record.elapsed_ms = elapsed_ms(attempt_started);
            let approach = plan.approach.clone();
            if let Some(err) = &error {
                tracing::warn!(attempt, code = %err.code, message = %err.message, "attempt failed");
                record.errors.push(err.clone());
            }
            let succeeded = record.success;
            attempts.push(Attempt {
                record,
                plan: Some(plan),
                result: Some(result),
                validation: Some(validation),
            });

            if succeeded {
                break;
            }
            match error {
                Some(err) if ends_retries(err.code) => break,
                Some(err) if err.code.is_budget_related() => {}
                _ => excluded.push(approach),
            }
        }
        attempts
    }

    fn blocked(
        governance: Option<&GovernanceContext>,
        impact: &ImpactAssessment,
        config: &EngineConfig,
    ) -> Option<String> {
        if let Some(reason) = governance.and_then(|g| g.block_reason.clone()) {
            return Some(reason);
        }
        let has_treaty = governance.is_some_and(GovernanceContext::has_active_treaty);
        (impact.tier == ImpactTier::Critical && config.policy.require_treaty_for_critical && !has_treaty)
            .then(|| "critical-impact query without an active treaty".to_string())
    }

    #[allow(clippy::too_many_arguments)]
    fn abort(
        &self,
        run_id: RunId,
        intent: &Intent,
        impact: ImpactAssessment,
        trail: Trail,
        error: ModeError,
        reason: &str,
        started: Instant,
        config_version: u64,
    ) -> ModeResult {
        let parsed = !matches!(
            error.code,
            ErrorCode::ParseError | ErrorCode::IntentUnclear | ErrorCode::ImpactBlocked
        );
        let mut completeness = Completeness::assess(parsed, false, false, 0.0, false);
        let errors = vec![error];
        completeness.next_steps = next_steps(&errors);
        let cognition = CognitionSummary {
            observed: format!(
                "Classified as {} in {} (confidence {:.2})",
                intent.problem_type,
                intent.domain.name(),
                intent.confidence
            ),
            oriented: format!("{} impact", impact.tier),
            acted: "No attempt made".to_string(),
            key_decision: format!("Aborted: {reason}"),
            confidence_rationale: String::new(),
        };
        ModeResult {
            run_id,
            success: false,
            problem: None,
            result: None,
            validation: None,
            explanation: Explanation::unparsed(&intent.raw_query, reason),
            errors,
            total_time_ms: elapsed_ms(started),
            audit: AuditMetadata {
                trail: trail.entries,
                summary: cognition.render(),
                cognition,
                impact,
                completeness,
                attempts: Vec::new(),
                config_version,
            },
        }
    }
}

impl Default for MathEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Failures another attempt on the same problem cannot fix. Detection, parse
/// and plan failures are recoverable for the caller but not by re-planning.
fn ends_retries(code: ErrorCode) -> bool {
    !code.is_recoverable() || matches!(code.stage(), Stage::Detect | Stage::Parse | Stage::Plan)
}

fn next_steps(errors: &[ModeError]) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();
    for err in errors {
        if !steps.contains(&err.suggested_action) {
            steps.push(err.suggested_action.clone());
        }
    }
    steps
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::{ImpactCategory, Treaty};

    #[tokio::test]
    async fn solves_and_records_the_trail() {
        let engine = MathEngine::with_defaults();
        let out = engine.process("solve x^2 - 4 = 0", None).await;

        assert!(out.success, "{:?}", out.errors);
        assert_eq!(out.answer(), Some("x = 2, x = -2"));
        assert!(out.errors.is_empty());
        assert_eq!(out.audit.attempts.len(), 1);
        let phases: Vec<Phase> = out.audit.trail.iter().map(|e| e.phase).collect();
        assert_eq!(phases.first(), Some(&Phase::Observe));
        assert!(phases.contains(&Phase::Verify));
        assert_eq!(phases.last(), Some(&Phase::Done));
        assert!(out.audit.completeness.auto_approve_allowed);
        assert!(out.audit.summary.contains("Accepted x = 2, x = -2"));
    }

    #[tokio::test]
    async fn blocked_by_governance() {
        let engine = MathEngine::with_defaults();
        let ctx = GovernanceContext::new().blocked("under review");
        let out = engine.process("solve x^2 - 4 = 0", Some(&ctx)).await;
        assert!(!out.success);
        assert_eq!(out.error_codes(), vec![ErrorCode::ImpactBlocked]);
        assert!(!out.errors[0].recoverable);
        assert!(out.audit.attempts.is_empty());
    }

    #[tokio::test]
    async fn critical_impact_needs_a_treaty() {
        let engine = MathEngine::with_defaults();
        let critical = ImpactAssessment::new(Some(ImpactCategory::Healthcare), 0.9);
        let without = GovernanceContext::new().with_impact(critical.clone());
        let out = engine.process("solve x^2 - 4 = 0", Some(&without)).await;
        assert_eq!(out.error_codes(), vec![ErrorCode::ImpactBlocked]);

        let with = GovernanceContext::new().with_impact(critical).with_treaty(Treaty {
            id: "treaty-7".into(),
            active: true,
        });
        let out = engine.process("solve x^2 - 4 = 0", Some(&with)).await;
        assert!(!out.has_error(ErrorCode::ImpactBlocked));
        assert_eq!(out.audit.impact.tier, ImpactTier::Critical);
    }

    #[tokio::test]
    async fn governance_override_is_rederived() {
        let mut forged = ImpactAssessment::new(Some(ImpactCategory::Healthcare), 0.95);
        forged.tier = ImpactTier::Standard;
        forged.confidence_penalty = 0.5;
        let ctx = GovernanceContext::new().with_impact(forged);
        let out = MathEngine::with_defaults().process("solve x^2 - 4 = 0", Some(&ctx)).await;

        assert!(!out.success);
        assert_eq!(out.audit.impact.tier, ImpactTier::Critical);
        assert_eq!(out.audit.impact.confidence_penalty, -0.10);
        assert_eq!(out.error_codes(), vec![ErrorCode::ImpactBlocked]);
    }

    #[test]
    fn retry_policy_stops_on_pre_execution_failures() {
        assert!(ends_retries(ErrorCode::ImpactBlocked));
        assert!(ends_retries(ErrorCode::ParseError));
        assert!(ends_retries(ErrorCode::ContradictionUnresolved));
        assert!(!ends_retries(ErrorCode::VerificationFailed));
        assert!(!ends_retries(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn parse_failure_aborts_with_explanation() {
        let out = MathEngine::with_defaults().process("tell me a story", None).await;
        assert!(!out.success);
        assert_eq!(out.error_codes(), vec![ErrorCode::IntentUnclear]);
        assert!(out.errors[0].recoverable);
        assert!(out.explanation.is_partial());
        assert!(!out.audit.completeness.auto_approve_allowed);
        assert!(out.audit.completeness.missing.contains(&"problem".to_string()));
    }

    #[tokio::test]
    async fn prove_has_no_viable_plan() {
        let out = MathEngine::with_defaults()
            .process("prove that x^2 + 1 > 0", None)
            .await;
        assert!(!out.success);
        assert!(out.has_error(ErrorCode::NoViablePlan) || out.has_error(ErrorCode::ParseError));
    }

    #[test]
    fn completeness_weights() {
        let c = Completeness::assess(true, true, true, 1.0, true);
        assert_eq!(c.score, 1.0);
        assert!(c.auto_approve_allowed);
        let c = Completeness::assess(true, true, false, 0.0, false);
        assert_eq!(c.score, 0.4);
        assert_eq!(c.missing, vec!["execution".to_string(), "verification".to_string()]);
    }
}
