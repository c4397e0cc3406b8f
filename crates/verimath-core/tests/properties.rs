//! Property tests for the pipeline stages

use proptest::prelude::*;
use std::sync::Arc;
use verimath_backend::BackendRegistry;
use verimath_core::{Detector, EngineConfig, Executor, Planner, ProblemParser, Validator};

fn term(coefficient: i64, suffix: &str) -> String {
    match coefficient {
        0 => String::new(),
        c if c < 0 => format!(" - {}{suffix}", -c),
        c => format!(" + {c}{suffix}"),
    }
}

/// `x^2 + bx + c = 0` with roots `r1` and `r2`
fn quadratic(r1: i64, r2: i64) -> String {
    format!("solve x^2{}{} = 0", term(-(r1 + r2), "x"), term(r1 * r2, ""))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_integer_quadratics_verify_exactly(r1 in -9i64..=9, r2 in -9i64..=9) {
        prop_assume!(r1 != r2);
        let query = quadratic(r1, r2);
        let registry = Arc::new(BackendRegistry::with_defaults());
        let config = EngineConfig::default();

        let (roots, valid, certified) = runtime().block_on(async {
            let problem = ProblemParser::new().parse(&query, &Detector::new().detect(&query)).unwrap();
            let plan = Planner::new(Arc::clone(&registry)).plan(&problem).unwrap();
            let result = Executor::new(Arc::clone(&registry)).execute(&plan, &plan.search_budget).await;
            let validation = Validator::new(Arc::clone(&registry), &config).validate(&problem, &result, None).await;
            let roots = result.final_answer_value.map(|v| v.numbers()).unwrap_or_default();
            let certified = validation.check("exact_certificate").is_some_and(|c| c.passed);
            (roots, validation.valid, certified)
        });

        let mut found = roots;
        found.sort_by(f64::total_cmp);
        let mut expected = vec![r1 as f64, r2 as f64];
        expected.sort_by(f64::total_cmp);
        prop_assert_eq!(found.len(), 2, "{}", query);
        for (f, e) in found.iter().zip(&expected) {
            prop_assert!((f - e).abs() < 1e-9, "{}: {} vs {}", query, f, e);
        }
        prop_assert!(valid, "{}", query);
        prop_assert!(certified, "{}", query);
    }

    #[test]
    fn prop_detector_confidence_is_bounded(query in ".{0,80}") {
        let intent = Detector::new().detect(&query);
        prop_assert!((0.0..=1.0).contains(&intent.confidence));
    }

    #[test]
    fn prop_parser_never_panics(query in "[a-z0-9 +*^()=/.,-]{0,60}") {
        let intent = Detector::new().detect(&query);
        let _ = ProblemParser::new().parse(&query, &intent);
    }
}
