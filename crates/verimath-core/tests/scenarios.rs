//! End-to-end runs through `MathEngine::process`

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use verimath_backend::{Backend, BackendRegistry, Method, NumericBackend, ReproductionBackend, SymbolicBackend};
use verimath_core::{
    BudgetTable, ComputeTier, ConfigStore, EngineConfig, ErrorCode, ImpactCategory, ImpactTier, MathEngine,
    PromotionEvidence, ResourceBudget,
};
use verimath_test_utils::{
    recording_registry, LyingOptimizer, OfflineBackend, RecordingCollaborator, SlowBackend, SOLVABLE_QUERIES,
};

fn engine(registry: BackendRegistry) -> MathEngine {
    MathEngine::new(Arc::new(registry), EngineConfig::default())
}

#[tokio::test]
async fn quadratic_is_solved_and_verified() {
    let out = MathEngine::with_defaults().process("solve x^2 - 4 = 0", None).await;

    assert!(out.success, "{:?}", out.errors);
    assert_eq!(out.answer(), Some("x = 2, x = -2"));
    let validation = out.validation.as_ref().unwrap();
    assert!(validation.confidence >= 0.9);
    assert!(validation.check("substitution").is_some_and(|c| c.passed));
    assert!(validation.check("alternative_method").is_some_and(|c| c.passed));
    assert!(out.errors.is_empty());
}

#[tokio::test]
async fn prose_dosage_query_is_high_impact() {
    let out = MathEngine::with_defaults()
        .process("optimize drug dosage to maximize absorption minus toxicity", None)
        .await;

    assert!(!out.success);
    assert_eq!(out.audit.impact.category, Some(ImpactCategory::Healthcare));
    assert!(out.audit.impact.tier >= ImpactTier::Elevated);
    assert_eq!(out.error_codes(), vec![ErrorCode::ParseError]);
    assert!(out.answer().is_none());
}

#[tokio::test]
async fn failed_alternative_blocks_high_impact_answer() {
    let registry = BackendRegistry::with_defaults()
        .without_backend("numeric")
        .with_backend(Arc::new(LyingOptimizer::new("liar")));
    let out = engine(registry)
        .process("optimize drug dosage d to maximize 10*d - d^2", None)
        .await;

    assert!(!out.success);
    assert_eq!(out.audit.impact.category, Some(ImpactCategory::Healthcare));
    assert!(out.has_error(ErrorCode::HighImpactLowConfidence));
    let first = &out.audit.attempts[0];
    assert_eq!(first.errors[0].code, ErrorCode::HighImpactLowConfidence);
    assert!(first.confidence < 0.8);
    // no attempt repeats an approach
    let approaches: Vec<&str> = out.audit.attempts.iter().filter_map(|a| a.approach.as_deref()).collect();
    let mut distinct = approaches.clone();
    distinct.dedup();
    assert_eq!(approaches, distinct);
}

#[tokio::test]
async fn unavailable_backend_fails_without_answer() {
    let registry = BackendRegistry::new().with_backend(Arc::new(OfflineBackend::new(
        "offline",
        vec![Method::Factor, Method::ZeroProduct, Method::Solve, Method::RootFind],
    )));
    let out = engine(registry).process("solve x^2 - 4 = 0", None).await;

    assert!(!out.success);
    assert!(out.answer().is_none());
    assert!(out.has_error(ErrorCode::BackendUnavailable));
    assert_eq!(out.audit.attempts[0].errors[0].code, ErrorCode::BackendUnavailable);
    assert!(out.explanation.is_partial());
}

#[tokio::test]
async fn tiny_budget_times_out_cleanly() {
    let registry = BackendRegistry::new()
        .with_backend(Arc::new(SlowBackend::wrap(Arc::new(SymbolicBackend::new()), Duration::from_millis(50))))
        .with_backend(Arc::new(SlowBackend::wrap(Arc::new(NumericBackend::new()), Duration::from_millis(50))));
    let budget = ResourceBudget::standard().with_wall_time(Duration::from_millis(1));
    let config = EngineConfig {
        budgets: BudgetTable::uniform(budget),
        ..EngineConfig::default()
    };
    let out = MathEngine::new(Arc::new(registry), config)
        .process("maximize 10*d - d^2", None)
        .await;

    assert!(!out.success);
    assert!(out.answer().is_none());
    assert!(!out.errors.is_empty());
    assert!(out.errors.iter().all(|e| e.code == ErrorCode::Timeout));
    let result = out.result.as_ref().unwrap();
    assert!(!result.success);
    assert!(result.steps.len() < 4);
    // budget failures are retried with the same approach
    assert!(out.audit.attempts.iter().all(|a| a.approach.as_deref() == Some("critical_points")));
}

#[tokio::test]
async fn retry_escalates_the_compute_tier() {
    let out = MathEngine::with_defaults().process("quick solve sin(x) = 0", None).await;

    assert!(out.success, "{:?}", out.audit.attempts);
    assert_eq!(out.audit.attempts.len(), 2);
    assert_eq!(out.audit.attempts[0].tier, ComputeTier::Light);
    assert_eq!(out.audit.attempts[0].errors[0].code, ErrorCode::ResourceLimit);
    assert_eq!(out.audit.attempts[1].tier, ComputeTier::Standard);
    assert!(out.errors.is_empty());
    assert_eq!(out.result.as_ref().unwrap().final_answer_value.as_ref().unwrap().numbers().len(), 7);
}

#[tokio::test]
async fn runs_are_deterministic() {
    let engine = MathEngine::with_defaults();
    let a = engine.process("solve x^3 - 6x^2 + 11x - 6 = 0", None).await;
    let b = engine.process("solve x^3 - 6x^2 + 11x - 6 = 0", None).await;

    assert_eq!(a.answer(), b.answer());
    assert_eq!(a.validation, b.validation);
    assert_eq!(a.problem, b.problem);
    assert_ne!(a.run_id, b.run_id);
}

#[tokio::test]
async fn only_grouped_subgoals_overlap() {
    let (registry, symbolic, numeric) = recording_registry();
    let out = engine(registry).process("minimize x^4 - 2x^2", None).await;
    assert!(out.success, "{:?}", out.errors);

    let mut calls = symbolic.calls();
    calls.extend(numeric.calls());
    for (i, a) in calls.iter().enumerate() {
        for b in &calls[i + 1..] {
            if a.overlaps(b) {
                assert_eq!((a.method, b.method), (Method::Differentiate, Method::Differentiate));
            }
        }
    }
    assert!(symbolic.max_overlap() <= ResourceBudget::standard().max_workers);
}

#[tokio::test]
async fn default_registry_answers_fixture_queries() {
    let engine = MathEngine::with_defaults();
    for (query, expected) in SOLVABLE_QUERIES {
        let out = engine.process(query, None).await;
        assert!(out.success, "{query}: {:?}", out.errors);
        assert_eq!(out.answer(), Some(*expected), "{query}");
    }
}

#[tokio::test]
async fn reproduction_is_requested_from_the_builder() {
    let collaborator = Arc::new(RecordingCollaborator::passing());
    let registry = BackendRegistry::with_defaults()
        .with_backend(Arc::new(ReproductionBackend::new(collaborator.clone())) as Arc<dyn Backend>);
    let config = EngineConfig::default().with_reproduction(true);
    let out = MathEngine::new(Arc::new(registry), config)
        .process("solve x^2 - 4 = 0", None)
        .await;

    assert!(out.success, "{:?}", out.errors);
    assert_eq!(out.answer(), Some("x = 2, x = -2"));
    let tasks = collaborator.tasks();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].generated_code.contains("fn main"));
    let validation = out.validation.unwrap();
    assert!(validation.check("reproduction_build").is_some_and(|c| c.passed));
}

#[tokio::test]
async fn promoted_configuration_applies_to_later_runs() {
    let store = Arc::new(ConfigStore::new(EngineConfig::default()));
    let engine = MathEngine::with_store(Arc::new(BackendRegistry::with_defaults()), Arc::clone(&store));
    let before = engine.process("solve 2x + 3 = 11", None).await;

    let evidence = PromotionEvidence {
        observable_effect: 0.08,
        causal_effect: 0.12,
        note: "fewer retries".into(),
    };
    let version = store
        .propose(EngineConfig::default().with_max_retries(0), &evidence)
        .unwrap();
    let after = engine.process("solve 2x + 3 = 11", None).await;

    assert_eq!(after.audit.config_version, version);
    assert_eq!(version, before.audit.config_version + 1);
    assert_eq!(after.answer(), Some("x = 4"));
}

#[tokio::test]
async fn deeply_nested_query_fails_cleanly() {
    let depth = 5000;
    let query = format!("solve {}x{} = 1", "(".repeat(depth), ")".repeat(depth));
    let out = MathEngine::with_defaults().process(&query, None).await;

    assert!(!out.success);
    assert!(out.answer().is_none());
    assert!(!out.errors.is_empty());
}
