//! Human-auditable explanations of a run
//!
//! One step per planned subgoal, annotated with what the backend produced,
//! followed by the verification verdict. Attempts that stopped early still
//! get an explanation, marked partial.

use crate::types::{ComputeTier, ExecutionResult, Plan, Problem};
use crate::validator::ValidationOutcome;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use verimath_backend::Method;

/// Register of the explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMode {
    /// Why each technique applies
    #[default]
    Pedagogical,
    /// Backends, timings and check names
    Expert,
}

impl ExplanationMode {
    /// Mode a compute tier asks for
    #[inline]
    #[must_use]
    pub fn for_tier(tier: ComputeTier) -> Self {
        match tier {
            ComputeTier::DeepSearch => Self::Expert,
            ComputeTier::Light | ComputeTier::Standard => Self::Pedagogical,
        }
    }
}

/// One numbered step of an explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationStep {
    pub number: usize,
    pub title: String,
    pub description: String,
    pub justification: String,
}

/// Human-readable account of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub mode: ExplanationMode,
    pub summary: String,
    pub steps: Vec<ExplanationStep>,
    pub final_statement: String,
    pub verification_summary: String,
    /// Present when the answer was not validated
    pub partiality_note: Option<String>,
}

impl Explanation {
    /// Explanation for a query that never became a problem
    #[must_use]
    pub fn unparsed(query: &str, reason: &str) -> Self {
        Self {
            mode: ExplanationMode::Pedagogical,
            summary: format!("Could not extract a mathematical problem from \"{}\".", query.trim()),
            steps: Vec::new(),
            final_statement: "No answer.".to_string(),
            verification_summary: "Nothing to verify.".to_string(),
            partiality_note: Some(reason.to_string()),
        }
    }

    /// Whether the answer was not validated
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.partiality_note.is_some()
    }

    /// Plain-text rendering
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.summary);
        for step in &self.steps {
            let _ = writeln!(out, "{}. {}: {}", step.number, step.title, step.description);
            if !step.justification.is_empty() {
                let _ = writeln!(out, "   {}", step.justification);
            }
        }
        let _ = writeln!(out, "{}", self.final_statement);
        let _ = writeln!(out, "{}", self.verification_summary);
        if let Some(note) = &self.partiality_note {
            let _ = writeln!(out, "Note: {note}");
        }
        out
    }
}

fn title(method: Method) -> &'static str {
    match method {
        Method::Solve => "Solve",
        Method::SolveSystem => "Solve the system",
        Method::LinearSolve => "Solve the linear system",
        Method::Factor => "Factor",
        Method::ZeroProduct => "Apply the zero-product property",
        Method::Expand => "Expand",
        Method::Simplify => "Simplify",
        Method::Differentiate => "Differentiate",
        Method::Integrate => "Integrate",
        Method::DefiniteIntegral => "Evaluate the definite integral",
        Method::Gradient => "Assemble the gradient",
        Method::Evaluate => "Evaluate",
        Method::RootFind => "Locate roots numerically",
        Method::Optimize => "Search for the optimum",
        Method::SelectExtremum => "Classify critical points",
        Method::FilterConstraints => "Apply the constraints",
        Method::Reproduce => "Reproduce as a program",
    }
}

fn rationale(method: Method) -> &'static str {
    match method {
        Method::Solve => "Isolating the unknown turns the equation into explicit values.",
        Method::SolveSystem => "Newton iteration refines a guess until every equation balances.",
        Method::LinearSolve => "A linear system has a unique solution when its determinant is non-zero.",
        Method::Factor => "Writing the polynomial as a product exposes its roots directly.",
        Method::ZeroProduct => "A product is zero exactly when one of its factors is zero.",
        Method::Expand => "Multiplying out and collecting like terms gives a canonical form.",
        Method::Simplify => "Collecting like terms removes redundant structure without changing the value.",
        Method::Differentiate => "The derivative measures the instantaneous rate of change.",
        Method::Integrate => "An antiderivative undoes differentiation.",
        Method::DefiniteIntegral => "The fundamental theorem of calculus gives the area as F(b) - F(a).",
        Method::Gradient => "The gradient collects every partial derivative.",
        Method::Evaluate => "Substituting the values computes the number directly.",
        Method::RootFind => "A sign change of a continuous function brackets a root.",
        Method::Optimize => "Sampling and refinement find the best admissible point.",
        Method::SelectExtremum => "The second derivative tells a maximum from a minimum.",
        Method::FilterConstraints => "Candidates outside the admissible region are discarded.",
        Method::Reproduce => "An independent program rechecks the answer.",
    }
}

/// Build an explanation from whatever the attempt produced
#[must_use]
pub fn explain(
    problem: &Problem,
    plan: Option<&Plan>,
    result: Option<&ExecutionResult>,
    validation: Option<&ValidationOutcome>,
    mode: ExplanationMode,
) -> Explanation {
    let mut steps = Vec::new();
    if let Some(plan) = plan {
        for subgoal in &plan.subgoals {
            let step = result.and_then(|r| r.step(&subgoal.id));
            let mut description = subgoal.description.clone();
            match step {
                Some(s) if s.success => {
                    if let Some(output) = &s.output {
                        let _ = write!(description, " gives {output}");
                    }
                }
                Some(s) => {
                    let reason = s.error.as_ref().map_or_else(|| "unknown error".to_string(), ToString::to_string);
                    let _ = write!(description, " failed ({reason})");
                }
                None => description.push_str(" was not reached"),
            }
            let justification = match (mode, step) {
                (ExplanationMode::Pedagogical, _) => rationale(subgoal.method).to_string(),
                (ExplanationMode::Expert, Some(s)) => format!(
                    "{} on {} in {} ms",
                    subgoal.method,
                    s.backend_used.as_deref().unwrap_or("no backend"),
                    s.duration_ms
                ),
                (ExplanationMode::Expert, None) => format!("{} pending", subgoal.method),
            };
            steps.push(ExplanationStep {
                number: steps.len() + 1,
                title: title(subgoal.method).to_string(),
                description,
                justification,
            });
        }
    }

    let answer = result.and_then(|r| r.final_answer.clone()).filter(|_| result.is_some_and(|r| r.success));
    let final_statement = match &answer {
        Some(a) => format!("Answer: {a}"),
        None => "No answer was produced.".to_string(),
    };

    let verification_summary = match validation {
        Some(v) => {
            let passed: Vec<&str> = v.checks.iter().filter(|c| c.passed).map(|c| c.name.as_str()).collect();
            let failed: Vec<&str> = v.checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
            let mut text = format!(
                "{} with confidence {:.2} (threshold {:.2}, diversity {:.2}).",
                if v.valid { "Verified" } else { "Not verified" },
                v.confidence,
                v.threshold,
                v.diversity_score
            );
            if mode == ExplanationMode::Expert || !v.valid {
                if !passed.is_empty() {
                    let _ = write!(text, " Passed: {}.", passed.join(", "));
                }
                if !failed.is_empty() {
                    let _ = write!(text, " Failed: {}.", failed.join(", "));
                }
            } else {
                let _ = write!(text, " {} independent checks agree.", passed.len());
            }
            if v.suggested_review {
                text.push_str(" Human review suggested.");
            }
            text
        }
        None => "The answer was not verified.".to_string(),
    };

    let partiality_note = match (result, validation) {
        (Some(r), _) if !r.success => Some(match &r.error {
            Some(err) => format!("attempt stopped early: {err}"),
            None => "attempt stopped early".to_string(),
        }),
        (None, _) => Some("no execution took place".to_string()),
        (_, Some(v)) if !v.valid => Some("the answer did not pass verification and must not be relied on".to_string()),
        (_, None) => Some("the answer was not validated".to_string()),
        _ => None,
    };

    let approach = plan.map_or("no plan", |p| p.approach.as_str());
    let summary = match mode {
        ExplanationMode::Pedagogical => format!("To {}, we use the {} approach.", problem.goal, approach.replace('_', " ")),
        ExplanationMode::Expert => format!(
            "{} [{}] via {approach}, {} step(s)",
            problem.goal,
            problem.goal_type,
            steps.len()
        ),
    };

    Explanation {
        mode,
        summary,
        steps,
        final_statement,
        verification_summary,
        partiality_note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::detector::Detector;
    use crate::executor::Executor;
    use crate::parser::ProblemParser;
    use crate::planner::Planner;
    use crate::validator::Validator;
    use std::sync::Arc;
    use verimath_backend::BackendRegistry;

    async fn run(query: &str) -> (Problem, Plan, ExecutionResult, ValidationOutcome) {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let problem = ProblemParser::new().parse(query, &Detector::new().detect(query)).unwrap();
        let plan = Planner::new(Arc::clone(&registry)).plan(&problem).unwrap();
        let result = Executor::new(Arc::clone(&registry)).execute(&plan, &plan.search_budget).await;
        let validation = Validator::new(registry, &EngineConfig::default())
            .validate(&problem, &result, None)
            .await;
        (problem, plan, result, validation)
    }

    #[tokio::test]
    async fn pedagogical_walkthrough() {
        let (problem, plan, result, validation) = run("solve x^2 - 4 = 0").await;
        let e = explain(&problem, Some(&plan), Some(&result), Some(&validation), ExplanationMode::Pedagogical);

        assert_eq!(e.steps.len(), 3);
        assert_eq!(e.steps[0].title, "Factor");
        assert!(e.steps[1].justification.contains("zero"));
        assert_eq!(e.final_statement, "Answer: x = 2, x = -2");
        assert!(e.verification_summary.starts_with("Verified"));
        assert!(!e.is_partial());
        assert!(e.render().contains("Answer: x = 2, x = -2"));
    }

    #[tokio::test]
    async fn expert_mode_names_backends() {
        let (problem, plan, result, validation) = run("solve x^2 - 4 = 0").await;
        let e = explain(&problem, Some(&plan), Some(&result), Some(&validation), ExplanationMode::Expert);
        assert!(e.steps.iter().all(|s| s.justification.contains("symbolic")));
        assert!(e.verification_summary.contains("substitution"));
    }

    #[tokio::test]
    async fn missing_result_is_partial() {
        let (problem, plan, _, _) = run("solve x^2 - 4 = 0").await;
        let e = explain(&problem, Some(&plan), None, None, ExplanationMode::Pedagogical);
        assert!(e.is_partial());
        assert!(e.steps.iter().all(|s| s.description.ends_with("was not reached")));
        assert_eq!(e.final_statement, "No answer was produced.");
    }

    #[test]
    fn deep_search_is_expert() {
        assert_eq!(ExplanationMode::for_tier(ComputeTier::DeepSearch), ExplanationMode::Expert);
        assert_eq!(ExplanationMode::for_tier(ComputeTier::Light), ExplanationMode::Pedagogical);
        assert!(Explanation::unparsed("tell me a story", "not math").is_partial());
    }
}
