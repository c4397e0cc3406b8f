//! Plan execution
//!
//! Walks a plan's parallel groups in order. Members of one group run
//! concurrently through a bounded `WorkerPool`; each subgoal goes to the
//! first backend in its preference list whose capability check accepts the
//! request. The whole call runs under the budget's wall-time ceiling, and
//! steps finished before a timeout are kept.

use crate::error::{ErrorCode, ModeError};
use crate::types::{ExecutionResult, Plan, ResourceBudget, StepResult, Subgoal};
use crate::worker_pool::WorkerPool;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use verimath_backend::{BackendRegistry, BackendRequest, Value};
use verimath_expr::Tolerance;

/// Completed steps keyed by declared position
type StepLog = Mutex<BTreeMap<usize, StepResult>>;

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Dispatches plans against a backend registry
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<BackendRegistry>,
    tolerance: Tolerance,
}

impl Executor {
    /// Create new executor
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            tolerance: Tolerance::default(),
        }
    }

    /// Tolerance used to accept numeric results as roots or optima
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Execute `plan` under `budget`
    ///
    /// Never panics on backend failure; every failure is reported through
    /// `ExecutionResult::error` and the failed step.
    #[tracing::instrument(skip_all, fields(approach = %plan.approach))]
    pub async fn execute(&self, plan: &Plan, budget: &ResourceBudget) -> ExecutionResult {
        let started = Instant::now();
        let pool = WorkerPool::new(budget.max_workers);
        let log: StepLog = Mutex::new(BTreeMap::new());

        let outcome = tokio::time::timeout(budget.max_wall_time(), self.run_groups(plan, budget, &pool, &log)).await;
        let mut error = match outcome {
            Ok(first_failure) => first_failure,
            Err(_) => {
                pool.close();
                tracing::warn!(budget_ms = budget.max_wall_time_ms, "wall-time budget exhausted");
                Some(ModeError::new(
                    ErrorCode::Timeout,
                    format!("plan '{}' exceeded {} ms", plan.approach, budget.max_wall_time_ms),
                ))
            }
        };

        let steps: Vec<StepResult> = log.into_inner().into_values().collect();
        let mut backends_used: Vec<String> = Vec::new();
        for name in steps.iter().filter_map(|s| s.backend_used.as_ref()) {
            if !backends_used.contains(name) {
                backends_used.push(name.clone());
            }
        }

        let answer = if error.is_none() {
            steps
                .iter()
                .find(|s| s.subgoal_id == plan.answer_id)
                .and_then(|s| s.output.clone())
        } else {
            None
        };
        if error.is_none() && answer.is_none() {
            error = Some(ModeError::new(
                ErrorCode::ExecutionError,
                format!("answer subgoal '{}' produced no output", plan.answer_id),
            ));
        }

        let stats = pool.stats().await;
        let result = ExecutionResult {
            success: error.is_none(),
            final_answer: answer.as_ref().map(ToString::to_string),
            final_answer_value: answer,
            steps,
            backends_used,
            error,
            elapsed_ms: elapsed_ms(started),
            approach: plan.approach.clone(),
            peak_concurrency: stats.peak_active,
        };
        tracing::info!(
            success = result.success,
            steps = result.steps.len(),
            elapsed_ms = result.elapsed_ms,
            "plan executed"
        );
        result
    }

    /// Run groups in order; stop after the first group with a failure
    async fn run_groups(
        &self,
        plan: &Plan,
        budget: &ResourceBudget,
        pool: &WorkerPool,
        log: &StepLog,
    ) -> Option<ModeError> {
        for (index, group) in plan.parallel_groups.iter().enumerate() {
            let members: Vec<(usize, &Subgoal)> = plan
                .subgoals
                .iter()
                .enumerate()
                .filter(|(_, s)| group.contains(&s.id))
                .collect();
            tracing::debug!(group = index, members = members.len(), "running group");

            let runs = members
                .iter()
                .map(|(position, subgoal)| self.run_subgoal(plan, *position, subgoal, budget, pool, log));
            let results = futures::future::join_all(runs).await;
            if let Some(error) = results.into_iter().flatten().next() {
                return Some(error);
            }
        }
        None
    }

    /// Execute one subgoal and record its step; returns the step's error
    async fn run_subgoal(
        &self,
        plan: &Plan,
        position: usize,
        subgoal: &Subgoal,
        budget: &ResourceBudget,
        pool: &WorkerPool,
        log: &StepLog,
    ) -> Option<ModeError> {
        let started = Instant::now();
        let request = self.request_for(plan, subgoal, budget, log);

        let (output, backend_used, error) = match self.registry.select(&request, &subgoal.backend_preference) {
            None => {
                let tried = if subgoal.backend_preference.is_empty() {
                    "any backend".to_string()
                } else {
                    subgoal.backend_preference.join(", ")
                };
                let err = ModeError::new(
                    ErrorCode::BackendUnavailable,
                    format!("no backend ({tried}) accepts {} for '{}'", subgoal.method, subgoal.id),
                );
                (None, None, Some(err))
            }
            Some(backend) => {
                let name = backend.name().to_string();
                tracing::debug!(subgoal = %subgoal.id, backend = %name, method = %subgoal.method, "dispatching");
                match pool.run(&subgoal.id, backend.execute(&request)).await {
                    Ok(Ok(value)) => {
                        if value.kind() != subgoal.expected_output_type {
                            tracing::warn!(
                                subgoal = %subgoal.id,
                                expected = ?subgoal.expected_output_type,
                                actual = ?value.kind(),
                                "backend returned an unexpected value kind"
                            );
                        }
                        (Some(value), Some(name), None)
                    }
                    Ok(Err(err)) => (None, Some(name), Some(ModeError::from(&err))),
                    Err(err) => (None, Some(name), Some(ModeError::new(ErrorCode::ExecutionError, err.to_string()))),
                }
            }
        };

        if let Some(err) = &error {
            tracing::warn!(subgoal = %subgoal.id, code = %err.code, error = %err.message, "subgoal failed");
        }
        let step = StepResult {
            subgoal_id: subgoal.id.clone(),
            success: error.is_none(),
            output,
            backend_used,
            method_used: subgoal.method,
            duration_ms: elapsed_ms(started),
            error: error.clone(),
        };
        log.lock().insert(position, step);
        error
    }

    /// Request from the subgoal's inputs plus its dependencies' outputs in plan order
    fn request_for(&self, plan: &Plan, subgoal: &Subgoal, budget: &ResourceBudget, log: &StepLog) -> BackendRequest {
        let inputs: Vec<Value> = {
            let steps = log.lock();
            plan.subgoals
                .iter()
                .enumerate()
                .filter(|(_, s)| subgoal.dependencies.contains(&s.id))
                .filter_map(|(pos, _)| steps.get(&pos).and_then(|step| step.output.clone()))
                .collect()
        };
        let given = &subgoal.inputs;
        BackendRequest::new(subgoal.method)
            .with_statements(given.statements.clone())
            .with_variables(given.variables.clone())
            .with_constraints(given.constraints.clone())
            .with_interval(given.interval)
            .with_sense(given.sense)
            .with_order(given.order.max(1))
            .with_max_solutions(budget.max_solutions_per_plan)
            .with_inputs(inputs)
            .with_tolerance(self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::parser::ProblemParser;
    use crate::planner::Planner;
    use crate::types::{Problem, SubgoalInputs};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use verimath_backend::{Method, NumericBackend, SymbolicBackend, ValueKind};
    use verimath_test_utils::{OfflineBackend, SlowBackend};

    fn problem(query: &str) -> Problem {
        let intent = Detector::new().detect(query);
        ProblemParser::new().parse(query, &intent).unwrap()
    }

    async fn run(registry: BackendRegistry, query: &str, budget: ResourceBudget) -> (Plan, ExecutionResult) {
        let registry = Arc::new(registry);
        let plan = Planner::new(Arc::clone(&registry)).plan_with(&problem(query), &budget, &[]).unwrap();
        let result = Executor::new(registry).execute(&plan, &budget).await;
        (plan, result)
    }

    #[tokio::test]
    async fn factor_chain_produces_roots() {
        let (plan, result) = run(BackendRegistry::with_defaults(), "solve x^2 - 4 = 0", ResourceBudget::standard()).await;
        assert!(result.success);
        assert_eq!(result.final_answer.as_deref(), Some("x = 2, x = -2"));
        assert_eq!(result.steps.len(), plan.subgoals.len());
        let ids: Vec<&str> = result.steps.iter().map(|s| s.subgoal_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(result.backends_used, vec!["symbolic"]);
    }

    #[tokio::test]
    async fn optimum_through_critical_points() {
        let (_, result) = run(BackendRegistry::with_defaults(), "maximize 10*d - d^2", ResourceBudget::standard()).await;
        assert!(result.success);
        assert_eq!(result.final_answer.as_deref(), Some("d = 5, maximum = 25"));
        assert_eq!(result.final_answer_value.map(|v| v.kind()), Some(ValueKind::Optimum));
    }

    #[tokio::test]
    async fn offline_backend_is_unavailable() {
        let registry = BackendRegistry::new().with_backend(Arc::new(OfflineBackend::new(
            "offline",
            vec![Method::Factor, Method::ZeroProduct, Method::Solve, Method::RootFind],
        )));
        let (_, result) = run(registry, "solve x^2 - 4 = 0", ResourceBudget::standard()).await;
        assert!(!result.success);
        assert!(result.final_answer.is_none());
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::BackendUnavailable));
        assert_eq!(result.steps.len(), 1);
        assert!(!result.steps[0].success);
    }

    #[tokio::test]
    async fn timeout_keeps_finished_steps() {
        let slow_numeric = SlowBackend::wrap(Arc::new(NumericBackend::new()), Duration::from_secs(5));
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(SymbolicBackend::new()))
            .with_backend(Arc::new(slow_numeric));
        let step = |id: &str, method: Method, preference: &str, deps: &[&str], statement: &str| Subgoal {
            id: id.to_string(),
            description: String::new(),
            method,
            backend_preference: vec![preference.to_string()],
            dependencies: deps.iter().map(ToString::to_string).collect(),
            expected_output_type: crate::planner::expected_kind(method),
            inputs: SubgoalInputs {
                statements: vec![verimath_expr::parse_statement(statement).unwrap()],
                variables: vec!["x".to_string()],
                ..SubgoalInputs::default()
            },
        };
        let plan = Plan {
            subgoals: vec![
                step("s1", Method::Differentiate, "symbolic", &[], "x^3 - x"),
                step("s2", Method::RootFind, "numeric", &["s1"], "3x^2 - 1 = 0"),
            ],
            parallel_groups: vec![BTreeSet::from(["s1".to_string()]), BTreeSet::from(["s2".to_string()])],
            search_budget: ResourceBudget::standard(),
            approach: "handmade".into(),
            fallback_approaches: Vec::new(),
            answer_id: "s2".into(),
            score: 0.0,
        };
        let budget = ResourceBudget::standard().with_wall_time(Duration::from_millis(50));
        let result = Executor::new(Arc::new(registry)).execute(&plan, &budget).await;
        assert!(!result.success);
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::Timeout));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].subgoal_id, "s1");
        assert!(result.final_answer.is_none());
    }

    #[tokio::test]
    async fn resource_limit_surfaces_from_backend() {
        let (_, result) = run(BackendRegistry::with_defaults(), "solve sin(x) = 0", ResourceBudget::light()).await;
        assert!(!result.success);
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::ResourceLimit));
    }

    #[tokio::test]
    async fn same_group_runs_concurrently() {
        let budget = ResourceBudget::standard();
        let (plan, result) = run(BackendRegistry::with_defaults(), "minimize x^4 - 2x^2", budget).await;
        assert!(result.success);
        assert_eq!(plan.parallel_groups[0].len(), 2);
        assert!(result.peak_concurrency <= budget.max_workers);
    }
}
