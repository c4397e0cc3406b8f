//! Plan construction
//!
//! Turns a `Problem` into a subgoal DAG:
//! - candidate decompositions come from per-goal templates
//! - templates needing a method no registered backend declares are dropped
//! - survivors are scored by step count and per-step success probability
//! - the best template becomes the plan; runners-up are recorded as fallbacks
//! - parallel groups are the dependency-depth levels of the DAG

use crate::error::PlanError;
use crate::types::{Plan, Problem, ProblemType, ResourceBudget, Subgoal, SubgoalInputs};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use verimath_backend::{BackendRegistry, Method, ValueKind};
use verimath_expr::{factor, Poly, Relation, Statement, UniPoly};

/// Score cost of each additional step
const STEP_COST: f64 = 0.02;

/// One step of a template before ids and preferences are assigned
#[derive(Debug, Clone)]
struct Draft {
    method: Method,
    description: String,
    preferred: Option<&'static str>,
    /// Indices of earlier drafts
    deps: Vec<usize>,
    probability: f64,
    inputs: SubgoalInputs,
}

impl Draft {
    fn new(method: Method, description: impl Into<String>, probability: f64, inputs: SubgoalInputs) -> Self {
        Self {
            method,
            description: description.into(),
            preferred: None,
            deps: Vec::new(),
            probability,
            inputs,
        }
    }

    fn prefer(mut self, backend: &'static str) -> Self {
        self.preferred = Some(backend);
        self
    }

    fn after(mut self, deps: &[usize]) -> Self {
        self.deps = deps.to_vec();
        self
    }
}

/// Named decomposition; its last step produces the answer
#[derive(Debug, Clone)]
struct Template {
    name: &'static str,
    steps: Vec<Draft>,
}

impl Template {
    fn new(name: &'static str, steps: Vec<Draft>) -> Self {
        Self { name, steps }
    }

    fn score(&self) -> f64 {
        let success: f64 = self.steps.iter().map(|s| s.probability).product();
        #[allow(clippy::cast_precision_loss)]
        let cost = STEP_COST * self.steps.len() as f64;
        success - cost
    }
}

/// Output shape of a method
#[must_use]
pub fn expected_kind(method: Method) -> ValueKind {
    match method {
        Method::Solve | Method::RootFind | Method::FilterConstraints => ValueKind::Roots,
        Method::Factor => ValueKind::Factored,
        Method::ZeroProduct => ValueKind::FactorEquations,
        Method::LinearSolve | Method::SolveSystem => ValueKind::Assignment,
        Method::Expand | Method::Simplify | Method::Differentiate | Method::Integrate => ValueKind::Expression,
        Method::DefiniteIntegral | Method::Evaluate => ValueKind::Scalar,
        Method::Gradient => ValueKind::Vector,
        Method::Optimize | Method::SelectExtremum => ValueKind::Optimum,
        Method::Reproduce => ValueKind::Artifact,
    }
}

/// Reject plans with dangling dependencies or cycles
///
/// # Errors
/// `PlanError::Empty`, `PlanError::UnknownDependency` or `PlanError::Cycle`.
pub fn validate_dag(subgoals: &[Subgoal]) -> Result<(), PlanError> {
    if subgoals.is_empty() {
        return Err(PlanError::Empty);
    }
    let ids: HashSet<&str> = subgoals.iter().map(|s| s.id.as_str()).collect();
    for subgoal in subgoals {
        if let Some(dep) = subgoal.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
            return Err(PlanError::UnknownDependency {
                subgoal: subgoal.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    let adjacency: BTreeMap<&str, Vec<&str>> = subgoals
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str).collect()))
        .collect();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        if visiting.contains(node) {
            return Some(node);
        }
        if visited.contains(node) {
            return None;
        }
        visiting.insert(node);
        if let Some(next) = adjacency.get(node) {
            for &dep in next {
                if let Some(hit) = dfs(dep, adjacency, visiting, visited) {
                    return Some(hit);
                }
            }
        }
        visiting.remove(node);
        visited.insert(node);
        None
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    for &node in adjacency.keys() {
        if let Some(hit) = dfs(node, &adjacency, &mut visiting, &mut visited) {
            return Err(PlanError::Cycle(hit.to_string()));
        }
    }
    Ok(())
}

/// Dependency-depth levels: group `k` holds every subgoal whose longest
/// dependency chain has length `k`
///
/// # Errors
/// `PlanError::Cycle` when some subgoal can never become ready.
pub fn partition(subgoals: &[Subgoal]) -> Result<Vec<BTreeSet<String>>, PlanError> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();
    while placed.len() < subgoals.len() {
        let ready: BTreeSet<String> = subgoals
            .iter()
            .filter(|s| !placed.contains(s.id.as_str()))
            .filter(|s| s.dependencies.iter().all(|d| placed.contains(d.as_str())))
            .map(|s| s.id.clone())
            .collect();
        if ready.is_empty() {
            let stuck = subgoals
                .iter()
                .find(|s| !placed.contains(s.id.as_str()))
                .map(|s| s.id.clone())
                .unwrap_or_default();
            return Err(PlanError::Cycle(stuck));
        }
        for subgoal in subgoals {
            if ready.contains(&subgoal.id) {
                placed.insert(subgoal.id.as_str());
            }
        }
        groups.push(ready);
    }
    Ok(groups)
}

/// Variable bounds that can never hold together
fn find_contradiction(problem: &Problem) -> Option<String> {
    // (value, strict) per side
    let mut lower: BTreeMap<String, (f64, bool)> = BTreeMap::new();
    let mut upper: BTreeMap<String, (f64, bool)> = BTreeMap::new();
    let mut excluded: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    let mut tighten_lower = |var: &str, value: f64, strict: bool| {
        let entry = lower.entry(var.to_string()).or_insert((value, strict));
        if value > entry.0 || (value == entry.0 && strict) {
            *entry = (value, strict);
        }
    };
    let mut bounds: Vec<(String, Relation, f64)> = problem.constraints.iter().filter_map(|c| c.as_bound()).collect();
    if let (Some((a, b)), Some(var)) = (problem.interval, problem.primary_unknown()) {
        bounds.push((var.to_string(), Relation::Ge, a));
        bounds.push((var.to_string(), Relation::Le, b));
    }
    for (var, relation, value) in &bounds {
        match relation {
            Relation::Gt => tighten_lower(var, *value, true),
            Relation::Ge => tighten_lower(var, *value, false),
            Relation::Ne => excluded.entry(var.clone()).or_default().push(*value),
            Relation::Lt | Relation::Le => {}
        }
    }
    for (var, relation, value) in &bounds {
        let strict = match relation {
            Relation::Lt => true,
            Relation::Le => false,
            _ => continue,
        };
        let entry = upper.entry(var.clone()).or_insert((*value, strict));
        if *value < entry.0 || (*value == entry.0 && strict) {
            *entry = (*value, strict);
        }
    }

    for (var, (lo, lo_strict)) in &lower {
        let Some((hi, hi_strict)) = upper.get(var) else {
            continue;
        };
        if lo > hi || (lo == hi && (*lo_strict || *hi_strict)) {
            return Some(format!("{var} cannot be both above {lo} and below {hi}"));
        }
        if lo == hi && excluded.get(var).is_some_and(|ex| ex.contains(lo)) {
            return Some(format!("{var} is pinned to {lo} and also excluded from it"));
        }
    }
    None
}

/// Builds plans against a fixed backend registry
#[derive(Debug, Clone)]
pub struct Planner {
    registry: Arc<BackendRegistry>,
    request_reproduction: bool,
}

impl Planner {
    /// Create new planner
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            request_reproduction: false,
        }
    }

    /// Append a `reproduce` step when a reproduction backend is registered
    #[inline]
    #[must_use]
    pub fn with_reproduction(mut self, enabled: bool) -> Self {
        self.request_reproduction = enabled;
        self
    }

    /// Plan under the standard budget
    ///
    /// # Errors
    /// See [`Planner::plan_with`].
    pub fn plan(&self, problem: &Problem) -> Result<Plan, PlanError> {
        self.plan_with(problem, &ResourceBudget::standard(), &[])
    }

    /// Plan under `budget`, skipping the named approaches
    ///
    /// # Errors
    /// - `PlanError::Contradiction` for unsatisfiable bounds
    /// - `PlanError::NoViablePlan` when no remaining template is executable
    pub fn plan_with(
        &self,
        problem: &Problem,
        budget: &ResourceBudget,
        excluded: &[String],
    ) -> Result<Plan, PlanError> {
        if let Some(reason) = find_contradiction(problem) {
            return Err(PlanError::Contradiction(reason));
        }
        let no_plan = |reason: String| PlanError::NoViablePlan {
            goal_type: problem.goal_type.to_string(),
            reason,
        };

        let templates = Self::templates(problem);
        if templates.is_empty() {
            return Err(no_plan(format!("no decomposition for '{}'", problem.goal)));
        }
        let mut candidates: Vec<(usize, Template, usize)> = templates
            .into_iter()
            .enumerate()
            .filter(|(_, t)| !excluded.iter().any(|name| name == t.name))
            .filter(|(_, t)| t.steps.iter().all(|s| self.registry.supports(s.method)))
            .map(|(order, t)| {
                let distinct = self.first_choices(&t);
                (order, t, distinct)
            })
            .collect();
        if candidates.is_empty() {
            return Err(no_plan(format!(
                "every approach is excluded or needs an unregistered method (excluded: {})",
                if excluded.is_empty() { "none".to_string() } else { excluded.join(", ") }
            )));
        }
        candidates.sort_by(|(ao, a, ad), (bo, b, bd)| {
            b.score()
                .total_cmp(&a.score())
                .then(ad.cmp(bd))
                .then(ao.cmp(bo))
        });
        candidates.truncate(budget.max_plan_alternatives.max(1));

        let mut ranked = candidates.into_iter().map(|(_, t, _)| t);
        let Some(best) = ranked.next() else {
            return Err(no_plan("no candidate survived ranking".into()));
        };
        let fallback_approaches: Vec<String> = ranked.map(|t| t.name.to_string()).collect();
        let score = best.score();
        let approach = best.name.to_string();

        let mut subgoals = self.materialise(best);
        let mut answer_id = subgoals.last().map(|s| s.id.clone()).unwrap_or_default();
        let answer_kind = subgoals.last().map(|s| s.expected_output_type);

        if !problem.constraints.is_empty()
            && matches!(answer_kind, Some(ValueKind::Roots | ValueKind::Assignment))
            && self.registry.supports(Method::FilterConstraints)
        {
            let id = format!("s{}", subgoals.len() + 1);
            subgoals.push(Subgoal {
                id: id.clone(),
                description: "discard solutions violating the constraints".into(),
                method: Method::FilterConstraints,
                backend_preference: self.registry.providers(Method::FilterConstraints),
                dependencies: BTreeSet::from([answer_id.clone()]),
                expected_output_type: answer_kind.unwrap_or(ValueKind::Roots),
                inputs: Self::base_inputs(problem),
            });
            answer_id = id;
        }

        if self.request_reproduction
            && self.registry.supports(Method::Reproduce)
            && matches!(
                answer_kind,
                Some(ValueKind::Roots | ValueKind::Assignment | ValueKind::Optimum)
            )
        {
            subgoals.push(Subgoal {
                id: format!("s{}", subgoals.len() + 1),
                description: "re-check the answer in an independent build".into(),
                method: Method::Reproduce,
                backend_preference: self.registry.providers(Method::Reproduce),
                dependencies: BTreeSet::from([answer_id.clone()]),
                expected_output_type: ValueKind::Artifact,
                inputs: SubgoalInputs {
                    statements: problem.knowns.clone(),
                    variables: problem.unknowns.clone(),
                    ..SubgoalInputs::default()
                },
            });
        }

        validate_dag(&subgoals)?;
        let parallel_groups = partition(&subgoals)?;
        tracing::debug!(
            approach = %approach,
            score,
            subgoals = subgoals.len(),
            groups = parallel_groups.len(),
            fallbacks = fallback_approaches.len(),
            "plan selected"
        );
        Ok(Plan {
            subgoals,
            parallel_groups,
            search_budget: *budget,
            approach,
            fallback_approaches,
            answer_id,
            score,
        })
    }

    /// Preferred backend first, then every other declaring backend
    fn preference(&self, method: Method, preferred: Option<&str>) -> Vec<String> {
        let providers = self.registry.providers(method);
        match preferred {
            Some(name) if providers.iter().any(|p| p == name) => std::iter::once(name.to_string())
                .chain(providers.into_iter().filter(|p| p != name))
                .collect(),
            _ => providers,
        }
    }

    fn first_choices(&self, template: &Template) -> usize {
        template
            .steps
            .iter()
            .filter_map(|s| self.preference(s.method, s.preferred).into_iter().next())
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn materialise(&self, template: Template) -> Vec<Subgoal> {
        template
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Subgoal {
                id: format!("s{}", i + 1),
                backend_preference: self.preference(draft.method, draft.preferred),
                dependencies: draft.deps.iter().map(|d| format!("s{}", d + 1)).collect(),
                expected_output_type: expected_kind(draft.method),
                description: draft.description,
                method: draft.method,
                inputs: draft.inputs,
            })
            .collect()
    }

    fn base_inputs(problem: &Problem) -> SubgoalInputs {
        SubgoalInputs {
            statements: problem.knowns.clone(),
            variables: problem.unknowns.clone(),
            constraints: problem.constraints.clone(),
            interval: problem.interval,
            sense: problem.sense,
            order: problem.order,
        }
    }

    /// Candidate decompositions in preference order
    fn templates(problem: &Problem) -> Vec<Template> {
        let base = Self::base_inputs(problem);
        let Some(statement) = problem.primary() else {
            return Vec::new();
        };
        let var = problem.primary_unknown().unwrap_or("x").to_string();
        let target = statement.target();
        match problem.goal_type {
            ProblemType::Prove => Vec::new(),
            ProblemType::Solve if problem.is_system() => Self::system_templates(problem, &base),
            ProblemType::Solve => Self::solve_templates(&target, &var, &base),
            ProblemType::Optimize if problem.unknowns.len() == 1 => {
                let with_order = |order: u32| SubgoalInputs {
                    order,
                    constraints: Vec::new(),
                    interval: None,
                    sense: None,
                    ..base.clone()
                };
                vec![
                    Template::new(
                        "critical_points",
                        vec![
                            Draft::new(Method::Differentiate, format!("differentiate {target} in {var}"), 0.99, with_order(1))
                                .prefer("symbolic"),
                            Draft::new(Method::Differentiate, "second derivative for the curvature test", 0.99, with_order(2))
                                .prefer("symbolic"),
                            Draft::new(Method::Solve, "solve f' = 0 for the critical points", 0.99, with_order(1))
                                .prefer("symbolic")
                                .after(&[0]),
                            Draft::new(
                                Method::SelectExtremum,
                                "classify critical points and compare with the boundary",
                                0.99,
                                base.clone(),
                            )
                            .prefer("symbolic")
                            .after(&[1, 2]),
                        ],
                    ),
                    Template::new(
                        "numeric_optimize",
                        vec![Draft::new(Method::Optimize, format!("search for the optimum of {target}"), 0.85, base)
                            .prefer("numeric")],
                    ),
                ]
            }
            ProblemType::Optimize => Vec::new(),
            ProblemType::Gradient => {
                let mut partials: Vec<Draft> = problem
                    .unknowns
                    .iter()
                    .map(|v| {
                        let inputs = SubgoalInputs {
                            variables: vec![v.clone()],
                            order: 1,
                            ..base.clone()
                        };
                        Draft::new(Method::Differentiate, format!("partial derivative in {v}"), 0.99, inputs)
                            .prefer("symbolic")
                    })
                    .collect();
                let all: Vec<usize> = (0..partials.len()).collect();
                partials.push(
                    Draft::new(Method::Gradient, "assemble the gradient vector", 0.99, base.clone())
                        .prefer("symbolic")
                        .after(&all),
                );
                vec![
                    Template::new("partial_derivatives", partials),
                    Template::new(
                        "direct_gradient",
                        vec![Draft::new(Method::Gradient, format!("gradient of {target}"), 0.97, base).prefer("symbolic")],
                    ),
                ]
            }
            ProblemType::Differentiate => vec![Template::new(
                "symbolic_derivative",
                vec![Draft::new(Method::Differentiate, format!("differentiate {target} in {var}"), 0.99, base)
                    .prefer("symbolic")],
            )],
            ProblemType::Integrate if problem.interval.is_some() => vec![
                Template::new(
                    "antiderivative",
                    vec![Draft::new(
                        Method::DefiniteIntegral,
                        "evaluate the antiderivative at the endpoints",
                        0.95,
                        base.clone(),
                    )
                    .prefer("symbolic")],
                ),
                Template::new(
                    "simpson",
                    vec![Draft::new(Method::DefiniteIntegral, "composite Simpson quadrature", 0.9, base)
                        .prefer("numeric")],
                ),
            ],
            ProblemType::Integrate => vec![Template::new(
                "antiderivative",
                vec![Draft::new(Method::Integrate, format!("antiderivative of {target}"), 0.95, base)
                    .prefer("symbolic")],
            )],
            ProblemType::Factor => vec![Template::new(
                "rational_factor",
                vec![Draft::new(Method::Factor, format!("factor {target}"), 0.99, base).prefer("symbolic")],
            )],
            ProblemType::Expand => vec![Template::new(
                "polynomial_expand",
                vec![Draft::new(Method::Expand, format!("expand {target}"), 0.99, base).prefer("symbolic")],
            )],
            ProblemType::Simplify => vec![Template::new(
                "normal_form",
                vec![Draft::new(Method::Simplify, format!("simplify {target}"), 0.99, base).prefer("symbolic")],
            )],
            ProblemType::Compute => vec![
                Template::new(
                    "symbolic_evaluation",
                    vec![Draft::new(Method::Evaluate, format!("evaluate {target}"), 0.99, base.clone())
                        .prefer("symbolic")],
                ),
                Template::new(
                    "numeric_evaluation",
                    vec![Draft::new(Method::Evaluate, format!("evaluate {target} numerically"), 0.99, base)
                        .prefer("numeric")],
                ),
            ],
        }
    }

    fn solve_templates(target: &verimath_expr::Expr, var: &str, base: &SubgoalInputs) -> Vec<Template> {
        let mut out = Vec::new();
        if let Ok(poly) = UniPoly::from_expr(target, var) {
            let degree = poly.degree();
            let factored = factor(&poly);
            let has_rational_root = factored.as_ref().is_some_and(|f| !f.linear.is_empty());
            if degree >= 2 && has_rational_root {
                out.push(Template::new(
                    "factor_zero_product",
                    vec![
                        Draft::new(Method::Factor, format!("factor {target}"), 0.99, base.clone()).prefer("symbolic"),
                        Draft::new(Method::ZeroProduct, "set each factor to zero", 0.99, base.clone())
                            .prefer("symbolic")
                            .after(&[0]),
                        Draft::new(Method::Solve, "solve each factor equation", 0.99, base.clone())
                            .prefer("symbolic")
                            .after(&[1]),
                    ],
                ));
            }
            let probability = match degree {
                0 | 1 => 0.99,
                2 => 0.9,
                _ if factored.as_ref().is_some_and(|f| f.remainder.degree() <= 2) => 0.9,
                _ => 0.8,
            };
            out.push(Template::new(
                "closed_form",
                vec![Draft::new(Method::Solve, format!("closed-form roots of {target}"), probability, base.clone())
                    .prefer("symbolic")],
            ));
        }
        out.push(Template::new(
            "numeric_root_find",
            vec![Draft::new(Method::RootFind, format!("bracket and bisect the roots of {target}"), 0.85, base.clone())
                .prefer("numeric")],
        ));
        out
    }

    fn system_templates(problem: &Problem, base: &SubgoalInputs) -> Vec<Template> {
        let linear = problem.knowns.iter().all(|s| match s {
            Statement::Equation(eq) => Poly::from_expr(&eq.residual()).is_ok_and(|p| p.linear_parts().is_some()),
            Statement::Expression { .. } => false,
        });
        if linear {
            vec![
                Template::new(
                    "cramer",
                    vec![Draft::new(Method::LinearSolve, "Cramer's rule", 0.97, base.clone()).prefer("symbolic")],
                ),
                Template::new(
                    "gaussian_elimination",
                    vec![Draft::new(Method::LinearSolve, "Gaussian elimination with pivoting", 0.95, base.clone())
                        .prefer("numeric")],
                ),
            ]
        } else {
            vec![Template::new(
                "newton_system",
                vec![Draft::new(Method::SolveSystem, "Newton iteration on the system", 0.8, base.clone())
                    .prefer("numeric")],
            )]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::parser::ProblemParser;
    use pretty_assertions::assert_eq;

    fn problem(query: &str) -> Problem {
        let intent = Detector::new().detect(query);
        ProblemParser::new().parse(query, &intent).unwrap()
    }

    fn planner() -> Planner {
        Planner::new(Arc::new(BackendRegistry::with_defaults()))
    }

    #[test]
    fn factorable_quadratic_prefers_factoring() {
        let plan = planner().plan(&problem("solve x^2 - 4 = 0")).unwrap();
        assert_eq!(plan.approach, "factor_zero_product");
        assert_eq!(plan.subgoals.len(), 3);
        assert_eq!(plan.answer_id, "s3");
        assert_eq!(plan.fallback_approaches, vec!["closed_form", "numeric_root_find"]);
        assert_eq!(plan.parallel_groups.len(), 3);
        assert_eq!(plan.subgoals[0].backend_preference, vec!["symbolic"]);
    }

    #[test]
    fn irrational_quadratic_uses_closed_form() {
        let plan = planner().plan(&problem("solve x^2 - 2 = 0")).unwrap();
        assert_eq!(plan.approach, "closed_form");
    }

    #[test]
    fn transcendental_equation_goes_numeric() {
        let plan = planner().plan(&problem("solve sin(x) = 0")).unwrap();
        assert_eq!(plan.approach, "numeric_root_find");
        assert_eq!(plan.subgoals[0].backend_preference, vec!["numeric"]);
    }

    #[test]
    fn optimisation_has_parallel_derivatives() {
        let plan = planner().plan(&problem("maximize 10*d - d^2")).unwrap();
        assert_eq!(plan.approach, "critical_points");
        assert_eq!(
            plan.parallel_groups[0],
            BTreeSet::from(["s1".to_string(), "s2".to_string()])
        );
        assert_eq!(plan.group_of("s3"), Some(1));
        assert_eq!(plan.group_of("s4"), Some(2));
        assert_eq!(plan.answer().map(|s| s.method), Some(Method::SelectExtremum));
    }

    #[test]
    fn linear_system_uses_cramer() {
        let plan = planner().plan(&problem("solve 2x + y = 5 and x - y = 1")).unwrap();
        assert_eq!(plan.approach, "cramer");
        assert_eq!(plan.fallback_approaches, vec!["gaussian_elimination"]);
    }

    #[test]
    fn excluded_approaches_are_skipped() {
        let p = problem("solve x^2 - 4 = 0");
        let plan = planner()
            .plan_with(&p, &ResourceBudget::standard(), &["factor_zero_product".to_string()])
            .unwrap();
        assert_eq!(plan.approach, "closed_form");
    }

    #[test]
    fn light_budget_keeps_one_alternative() {
        let p = problem("solve x^2 - 4 = 0");
        let plan = planner().plan_with(&p, &ResourceBudget::light(), &[]).unwrap();
        assert!(plan.fallback_approaches.is_empty());
    }

    #[test]
    fn constraints_add_filter_step() {
        let plan = planner().plan(&problem("solve x^2 = 9 where x > 0")).unwrap();
        let answer = plan.answer().unwrap();
        assert_eq!(answer.method, Method::FilterConstraints);
        assert_eq!(plan.answer_id, format!("s{}", plan.subgoals.len()));
    }

    #[test]
    fn contradictory_bounds() {
        let err = planner().plan(&problem("solve x^2 = 9 where x > 3 and x < 1")).unwrap_err();
        assert!(matches!(err, PlanError::Contradiction(_)));
        assert_eq!(err.code(), crate::error::ErrorCode::ContradictionUnresolved);
    }

    #[test]
    fn prove_has_no_plan() {
        let err = planner().plan(&problem("prove that x^2 + 1 = 0")).unwrap_err();
        assert!(matches!(err, PlanError::NoViablePlan { .. }));
    }

    #[test]
    fn missing_methods_filter_templates() {
        let registry = BackendRegistry::with_defaults().without_backend("numeric");
        let planner = Planner::new(Arc::new(registry));
        let err = planner.plan(&problem("solve sin(x) = 0")).unwrap_err();
        assert!(matches!(err, PlanError::NoViablePlan { .. }));
    }

    fn node(id: &str, deps: &[&str]) -> Subgoal {
        Subgoal {
            id: id.to_string(),
            description: String::new(),
            method: Method::Evaluate,
            backend_preference: Vec::new(),
            dependencies: deps.iter().map(ToString::to_string).collect(),
            expected_output_type: ValueKind::Scalar,
            inputs: SubgoalInputs::default(),
        }
    }

    #[test]
    fn dag_validation() {
        assert!(validate_dag(&[node("a", &[]), node("b", &["a"])]).is_ok());
        assert!(matches!(
            validate_dag(&[node("a", &["zz"])]),
            Err(PlanError::UnknownDependency { .. })
        ));
        assert!(matches!(
            validate_dag(&[node("a", &["b"]), node("b", &["a"])]),
            Err(PlanError::Cycle(_))
        ));
        assert!(matches!(validate_dag(&[]), Err(PlanError::Empty)));
    }

    #[test]
    fn partition_by_depth() {
        let groups = partition(&[node("a", &[]), node("b", &[]), node("c", &["a", "b"]), node("d", &["a"])]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(groups[1], BTreeSet::from(["c".to_string(), "d".to_string()]));
    }
}
