//! Intent detection
//!
//! Pattern tables, scored rather than learned:
//! - domain vocabularies with strong (+0.30) and medium (+0.15) patterns
//! - an ordered problem-type table, first match wins
//! - compute-tier and explanation cues
//!
//! Detection is pure and never fails; unmatched text yields a non-math
//! intent with zero confidence.

use crate::impact::ImpactAssessor;
use crate::types::{ComputeTier, Domain, Intent, ProblemType};
use once_cell::sync::Lazy;
use regex::Regex;

const STRONG_WEIGHT: f64 = 0.30;
const MEDIUM_WEIGHT: f64 = 0.15;
/// Floor applied when the query contains a recognisable expression
const EXPRESSION_FLOOR: f64 = 0.6;
/// Minimum confidence for `is_math`
pub const MATH_THRESHOLD: f64 = 0.4;

struct DomainPatterns {
    domain: Domain,
    strong: Vec<Regex>,
    medium: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

const DOMAIN_TABLE: &[(Domain, &[&str], &[&str])] = &[
    (
        Domain::Algebra,
        &[
            r"\bsolve\b.*\bfor\b",
            r"\bfactor(?:i[sz]e)?\b",
            r"\bsimplify\b",
            r"\bexpand\b",
            r"\bquadratic\b",
            r"\bpolynomial\b",
            r"\broots?\b",
            r"\bsystem of equations\b",
        ],
        &[r"\bx\s*[=+\-*/^]", r"\bsolve\b", r"=\s*0\b"],
    ),
    (
        Domain::Calculus,
        &[
            r"\bintegra(?:te|l)\b",
            r"\bderivative\b",
            r"\bdifferentiat",
            r"\blimit\b",
            r"d/dx",
            r"∫",
            r"\bpartial derivatives?\b",
            r"\btaylor\b",
            r"\bgradient\b",
        ],
        &[r"\brate of change\b", r"\barea under\b", r"\bslope\b"],
    ),
    (
        Domain::LinearAlgebra,
        &[
            r"\bmatrix\b",
            r"\bdeterminant\b",
            r"\beigen(?:value|vector)s?\b",
            r"\blinear system\b",
            r"\binverse\b",
        ],
        &[r"\bvectors?\b", r"\bdot product\b", r"\bsystem\b"],
    ),
    (
        Domain::Probability,
        &[
            r"\bprobability\b",
            r"\bexpected value\b",
            r"\bvariance\b",
            r"\bbinomial\b",
            r"\bdistribution\b",
        ],
        &[r"\brandom\b", r"\bdice\b", r"\bcoin\b"],
    ),
    (
        Domain::NumberTheory,
        &[
            r"\bprimes?\b",
            r"\bgcd\b",
            r"\blcm\b",
            r"\bmodular\b",
            r"\bfactorial\b",
            r"\bfibonacci\b",
        ],
        &[r"\bdivisib", r"\bintegers?\b"],
    ),
    (
        Domain::Optimization,
        &[
            r"\boptimi[sz]",
            r"\bminimi[sz]e\b",
            r"\bmaximi[sz]e\b",
            r"\blinear programming\b",
            r"\bconvex\b",
            r"\bgradient descent\b",
            r"\bsubject to\b",
        ],
        &[r"\bbest\b.*\bvalue\b", r"\bminimum\b", r"\bmaximum\b", r"\bconstraints?\b"],
    ),
    (
        Domain::Statistics,
        &[
            r"\bregression\b",
            r"\bcorrelation\b",
            r"\bstandard deviation\b",
            r"\bhypothesis\b",
            r"\bconfidence interval\b",
        ],
        &[r"\bmean\b", r"\bmedian\b", r"\baverage\b"],
    ),
    (
        Domain::DifferentialEquations,
        &[
            r"\bdifferential equation\b",
            r"\bode\b",
            r"dy/dx",
            r"\by'",
            r"\binitial value\b",
        ],
        &[r"\bgrowth rate\b", r"\bdecay\b"],
    ),
];

static DOMAIN_PATTERNS: Lazy<Vec<DomainPatterns>> = Lazy::new(|| {
    DOMAIN_TABLE
        .iter()
        .map(|(domain, strong, medium)| DomainPatterns {
            domain: *domain,
            strong: compile(strong),
            medium: compile(medium),
        })
        .collect()
});

/// Ordered: the first matching row decides the problem type
const PROBLEM_TYPE_TABLE: &[(ProblemType, &[&str])] = &[
    (ProblemType::Prove, &[r"\bprove\b", r"\bshow that\b", r"\bdemonstrate\b"]),
    (
        ProblemType::Optimize,
        &[r"\boptimi[sz]e\b", r"\bmaximi[sz]e\b", r"\bminimi[sz]e\b", r"\b(?:maximum|minimum)\b"],
    ),
    (ProblemType::Gradient, &[r"\bgradient\b", r"\bpartial derivatives\b", r"\bjacobian\b", r"∇"]),
    (
        ProblemType::Differentiate,
        &[r"\bdifferentiate\b", r"\bderivative\b", r"d/d[a-z]\b"],
    ),
    (ProblemType::Integrate, &[r"\bintegra(?:te|l)\b", r"∫", r"\bantiderivative\b", r"\barea under\b"]),
    (ProblemType::Factor, &[r"\bfactor(?:i[sz]e)?\b"]),
    (ProblemType::Expand, &[r"\bexpand\b", r"\bmultiply out\b"]),
    (ProblemType::Simplify, &[r"\bsimplify\b", r"\breduce\b"]),
    (ProblemType::Solve, &[r"\bsolve\b", r"\broots?\b", r"\bzeros?\b", r"="]),
    (
        ProblemType::Compute,
        &[r"\bcalculate\b", r"\bcompute\b", r"\bevaluate\b", r"\bwhat is\b"],
    ),
];

static PROBLEM_TYPE_PATTERNS: Lazy<Vec<(ProblemType, Vec<Regex>)>> = Lazy::new(|| {
    PROBLEM_TYPE_TABLE
        .iter()
        .map(|(ptype, patterns)| (*ptype, compile(patterns)))
        .collect()
});

static EXPRESSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"=",
        r"\d\s*[-+*/^]\s*[\w(]",
        r"(?:^|[^a-z])[a-z]\s*(?:\^|\*\*)\s*\d",
        r"(?:^|[^a-z])[a-z]\s*[-+*/]\s*[\w(]",
        r"[∫∑∏∂∇√]",
        r"\b(?:sin|cos|tan|exp|ln|log|sqrt)\s*\(",
    ])
});

static LIGHT_TIER: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"\b(?:quick(?:ly)?|simple|rough(?:ly)?)\b"]));
static DEEP_TIER: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"\b(?:prove|rigorous(?:ly)?|formal(?:ly)?|exhaustive(?:ly)?|deep)\b"]));
static EXPLANATION: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"\bexplain\b", r"\bstep\s*by\s*step\b", r"\bshow\s+(?:your\s+)?work\b"]));

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

/// Whether the text carries an equation or an operator between operands
#[must_use]
pub fn has_math_expression(query: &str) -> bool {
    let lower = query.to_lowercase();
    any_match(&EXPRESSION_PATTERNS, &lower)
}

/// Query classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector {
    assessor: ImpactAssessor,
}

impl Detector {
    /// Detector with the built-in pattern tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a raw query
    #[must_use]
    pub fn detect(&self, query: &str) -> Intent {
        let lower = query.to_lowercase();
        let mut keywords_matched = Vec::new();

        let mut best_domain = Domain::Algebra;
        let mut best_score = 0.0_f64;
        for table in DOMAIN_PATTERNS.iter() {
            let mut score = 0.0;
            for (patterns, weight) in [(&table.strong, STRONG_WEIGHT), (&table.medium, MEDIUM_WEIGHT)] {
                for pattern in patterns {
                    if pattern.is_match(&lower) {
                        score += weight;
                        keywords_matched.push(format!("{}:{}", table.domain.name(), pattern.as_str()));
                    }
                }
            }
            let score = f64::min(score, 1.0);
            if score > best_score {
                best_score = score;
                best_domain = table.domain;
            }
        }

        let problem_type = PROBLEM_TYPE_PATTERNS
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(&lower)))
            .map_or(ProblemType::Compute, |(ptype, _)| *ptype);

        let mut confidence = best_score;
        if has_math_expression(query) {
            confidence = confidence.max(EXPRESSION_FLOOR);
        }
        let is_math = confidence >= MATH_THRESHOLD;

        let compute_tier = if any_match(&DEEP_TIER, &lower) {
            ComputeTier::DeepSearch
        } else if any_match(&LIGHT_TIER, &lower) {
            ComputeTier::Light
        } else {
            ComputeTier::Standard
        };

        let impact_category = self.assessor.assess(query).category;

        tracing::debug!(
            is_math,
            confidence,
            domain = best_domain.name(),
            problem_type = %problem_type,
            tier = %compute_tier,
            "intent detected"
        );

        Intent {
            is_math,
            confidence,
            problem_type,
            domain: best_domain,
            impact_category,
            compute_tier,
            requires_explanation: any_match(&EXPLANATION, &lower),
            keywords_matched,
            raw_query: query.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::ImpactCategory;

    fn detect(query: &str) -> Intent {
        Detector::new().detect(query)
    }

    #[test]
    fn every_pattern_compiles() {
        let total: usize = DOMAIN_TABLE.iter().map(|(_, s, m)| s.len() + m.len()).sum();
        let compiled: usize = DOMAIN_PATTERNS.iter().map(|d| d.strong.len() + d.medium.len()).sum();
        assert_eq!(total, compiled);
        let total: usize = PROBLEM_TYPE_TABLE.iter().map(|(_, p)| p.len()).sum();
        let compiled: usize = PROBLEM_TYPE_PATTERNS.iter().map(|(_, p)| p.len()).sum();
        assert_eq!(total, compiled);
        assert_eq!(EXPRESSION_PATTERNS.len(), 6);
        assert_eq!(EXPLANATION.len(), 3);
        assert_eq!(LIGHT_TIER.len() + DEEP_TIER.len(), 2);
    }

    #[test]
    fn quadratic_is_algebra_solve() {
        let intent = detect("solve x^2 - 4 = 0");
        assert!(intent.is_math);
        assert_eq!(intent.domain, Domain::Algebra);
        assert_eq!(intent.problem_type, ProblemType::Solve);
        assert!(intent.confidence >= 0.6);
        assert_eq!(intent.compute_tier, ComputeTier::Standard);
    }

    #[test]
    fn plain_text_is_not_math() {
        let intent = detect("what a lovely afternoon for a walk");
        assert!(!intent.is_math);
        assert_eq!(intent.confidence, 0.0);
        assert!(intent.keywords_matched.is_empty());
    }

    #[test]
    fn problem_type_order() {
        assert_eq!(detect("find the partial derivatives of x*y").problem_type, ProblemType::Gradient);
        assert_eq!(detect("derivative of x^3").problem_type, ProblemType::Differentiate);
        assert_eq!(detect("integrate x^2 from 0 to 3").problem_type, ProblemType::Integrate);
        assert_eq!(detect("factor x^2 - 4").problem_type, ProblemType::Factor);
        assert_eq!(detect("prove that x^2 >= 0").problem_type, ProblemType::Prove);
        assert_eq!(detect("what is 2 + 3*4").problem_type, ProblemType::Compute);
        assert_eq!(
            detect("minimize x^2 + 1 subject to x >= 1").problem_type,
            ProblemType::Optimize
        );
    }

    #[test]
    fn optimisation_vocabulary_alone_is_math() {
        let intent = detect("optimize drug dosage to maximize absorption minus toxicity");
        assert!(intent.is_math);
        assert_eq!(intent.domain, Domain::Optimization);
        assert_eq!(intent.problem_type, ProblemType::Optimize);
        assert_eq!(intent.impact_category, Some(ImpactCategory::Healthcare));
    }

    #[test]
    fn tier_cues() {
        assert_eq!(detect("quick: solve x + 1 = 2").compute_tier, ComputeTier::Light);
        assert_eq!(detect("rigorously solve x^2 = 2").compute_tier, ComputeTier::DeepSearch);
        assert_eq!(detect("prove that x^2 >= 0").compute_tier, ComputeTier::DeepSearch);
    }

    #[test]
    fn hyphenated_words_are_not_expressions() {
        assert!(!has_math_expression("a well-known result"));
        assert!(has_math_expression("2x + 1"));
        assert!(has_math_expression("sqrt(2)"));
    }

    #[test]
    fn explanation_cue() {
        assert!(detect("explain step by step how to solve x + 1 = 2").requires_explanation);
        assert!(!detect("solve x + 1 = 2").requires_explanation);
    }
}
