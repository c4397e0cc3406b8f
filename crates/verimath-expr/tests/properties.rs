//! Property tests for the canonical form and exact factoring

use proptest::prelude::*;
use verimath_expr::prelude::*;
use verimath_expr::solve_univariate;

fn product_of_roots(roots: &[i64]) -> String {
    roots
        .iter()
        .map(|r| format!("(x - ({r}))"))
        .collect::<Vec<_>>()
        .join("*")
}

proptest! {
    #[test]
    fn prop_canonical_text_is_a_fixed_point(roots in prop::collection::vec(-9i64..=9, 1..4), k in 1i64..5) {
        let src = format!("{k}*{}", product_of_roots(&roots));
        let expanded = Poly::from_expr(&parse_expr(&src).unwrap()).unwrap().to_expr();
        let text = expanded.to_string();
        let reparsed = parse_expr(&text).unwrap();
        prop_assert_eq!(reparsed.to_string(), text);
    }

    #[test]
    fn prop_integer_roots_are_recovered_exactly(roots in prop::collection::vec(-12i64..=12, 1..5)) {
        let expanded = Poly::from_expr(&parse_expr(&product_of_roots(&roots)).unwrap()).unwrap().to_expr();
        let p = UniPoly::from_expr(&expanded, "x").unwrap();
        let found = solve_univariate(&p);

        let mut expected: Vec<f64> = roots.iter().map(|r| *r as f64).collect();
        expected.sort_by(|a, b| b.total_cmp(a));
        expected.dedup();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_every_root_satisfies_its_equation(a in -5i64..=5, b in -20i64..=20, c in -20i64..=20) {
        prop_assume!(a != 0);
        let eq = parse_equation(&format!("{a}x^2 + ({b})x + ({c}) = 0")).unwrap();
        let p = UniPoly::from_expr(&eq.residual(), "x").unwrap();
        let tol = Tolerance::default();
        for root in solve_univariate(&p) {
            let env = std::collections::BTreeMap::from([("x".to_string(), root)]);
            prop_assert!(eq.is_satisfied(&env, &tol).unwrap());
        }
    }

    #[test]
    fn prop_derivative_agrees_with_finite_difference(c0 in -5.0f64..5.0, c1 in -5.0f64..5.0, c2 in -5.0f64..5.0, at in -3.0f64..3.0) {
        let f = parse_expr(&format!("({c2})*x^3 + ({c1})*x^2 + ({c0})*x")).unwrap();
        let symbolic = differentiate(&f, "x").eval_at("x", at).unwrap();
        let numeric = verimath_expr::central_difference(&f, "x", at).unwrap();
        prop_assert!((symbolic - numeric).abs() < 1e-5 * symbolic.abs().max(1.0));
    }
}
