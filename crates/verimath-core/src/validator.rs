//! Result verification
//!
//! A result is accepted only after independent strategies agree with it:
//! - substitution of the answer back into the problem
//! - seeded numeric spot checks
//! - an alternative method on a different (method, backend) pair
//! - sanity bounds on every number the answer asserts
//! - domain-specific certificates (exact rational roots, curvature tests)
//!
//! Confidence and diversity are pure functions of the check list, so an
//! outcome can always be recomputed from its checks.

use crate::config::{EngineConfig, Policy, SpotCheck, Thresholds};
use crate::error::{ErrorCode, ModeError};
use crate::impact::{ImpactAssessment, ImpactTier, RequiredCheck};
use crate::types::{ExecutionResult, Problem, ProblemType, ResourceBudget};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use verimath_backend::{BackendRegistry, BackendRequest, Method, Sense, Value};
use verimath_expr::{
    central_difference, differentiate, differentiate_n, integer_coefficients, simplify, Equation, Expr, Poly,
    Rational, Relation, Statement, Tolerance, UniPoly,
};

const CATEGORY_COUNT: f64 = 4.0;
const ALTERNATIVE_MAX_SOLUTIONS: usize = 4096;
const MAX_DENOMINATOR: i128 = 10_000;
/// Spot-check variables are drawn from here; positive to stay inside ln/sqrt domains
const SAMPLE_RANGE: (f64, f64) = (0.25, 2.25);
const DEFAULT_WINDOW: f64 = 10.0;

/// What a check looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Structural,
    Numeric,
    AlternativeMethod,
    Formal,
}

/// Weight class of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Substitution,
    Numeric,
    AlternativeMethod,
    Sanity,
    DomainSpecific,
}

impl CheckKind {
    /// Share of the confidence this class can contribute
    #[inline]
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::Substitution => 0.30,
            Self::Numeric => 0.25,
            Self::AlternativeMethod => 0.20,
            Self::Sanity => 0.10,
            Self::DomainSpecific => 0.15,
        }
    }
}

/// One verification strategy's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub kind: CheckKind,
    pub category: CheckCategory,
    pub passed: bool,
    /// Quality of a passing check in [0, 1]
    pub confidence_contribution: f64,
    pub detail: String,
    /// Impact requirement this check fulfils when passed
    pub satisfies: Option<RequiredCheck>,
}

impl ValidationCheck {
    /// A check with full confidence contribution; see `with_contribution`
    #[must_use]
    pub fn new(name: &str, kind: CheckKind, category: CheckCategory, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            category,
            passed,
            confidence_contribution: 1.0,
            detail: detail.into(),
            satisfies: None,
        }
    }

    /// Mark as satisfying `requirement`
    #[inline]
    #[must_use]
    pub fn satisfying(mut self, requirement: RequiredCheck) -> Self {
        self.satisfies = Some(requirement);
        self
    }

    /// Weight in the confidence average
    #[inline]
    #[must_use]
    pub fn with_contribution(mut self, contribution: f64) -> Self {
        self.confidence_contribution = contribution.clamp(0.0, 1.0);
        self
    }
}

/// Weighted confidence of a check list, penalty applied, rounded to six decimals
#[must_use]
pub fn confidence_of(checks: &[ValidationCheck], penalty: f64) -> f64 {
    let mut per_kind: BTreeMap<CheckKind, usize> = BTreeMap::new();
    for check in checks {
        *per_kind.entry(check.kind).or_default() += 1;
    }
    let raw: f64 = checks
        .iter()
        .filter(|c| c.passed)
        .map(|c| {
            #[allow(clippy::cast_precision_loss)]
            let share = per_kind.get(&c.kind).copied().unwrap_or(1) as f64;
            c.kind.weight() / share * c.confidence_contribution.clamp(0.0, 1.0)
        })
        .sum();
    let confidence = (raw.clamp(0.0, 1.0) + penalty.min(0.0)).clamp(0.0, 1.0);
    (confidence * 1e6).round() / 1e6
}

/// Distinct categories among passed checks, over the four categories
#[must_use]
pub fn diversity_of(checks: &[ValidationCheck]) -> f64 {
    let categories: BTreeSet<CheckCategory> = checks.iter().filter(|c| c.passed).map(|c| c.category).collect();
    #[allow(clippy::cast_precision_loss)]
    let distinct = categories.len() as f64;
    distinct / CATEGORY_COUNT
}

fn hash_prefix(canonical: &str) -> u64 {
    let digest = blake3::hash(canonical.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Deterministic re-audit sampler: the problem's hash mapped onto [0, 1)
#[must_use]
pub fn reaudit_selected(canonical: &str, rate: f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    #[allow(clippy::cast_precision_loss)]
    let position = hash_prefix(canonical) as f64 / 18_446_744_073_709_551_616.0;
    position < rate
}

/// Verdict over a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub confidence: f64,
    pub diversity_score: f64,
    pub checks: Vec<ValidationCheck>,
    pub warnings: Vec<String>,
    pub suggested_review: bool,
    /// Confidence the impact tier demanded
    pub threshold: f64,
    pub missing_required: Vec<RequiredCheck>,
    pub confidence_penalty: f64,
    pub impact_tier: ImpactTier,
}

impl ValidationOutcome {
    /// Confidence from the stored checks and penalty
    #[must_use]
    pub fn recompute_confidence(&self) -> f64 {
        confidence_of(&self.checks, self.confidence_penalty)
    }

    /// Method diversity from the stored checks
    #[must_use]
    pub fn recompute_diversity(&self) -> f64 {
        diversity_of(&self.checks)
    }

    /// Check by name
    #[must_use]
    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Whether a check of this kind ran and passed
    #[must_use]
    pub fn passed_kind(&self, kind: CheckKind) -> bool {
        self.checks.iter().any(|c| c.kind == kind && c.passed)
    }

    /// Error for an invalid outcome
    #[must_use]
    pub fn failure(&self) -> Option<ModeError> {
        if self.valid {
            return None;
        }
        let hard_fail = self
            .checks
            .iter()
            .any(|c| !c.passed && matches!(c.kind, CheckKind::Substitution | CheckKind::Sanity));
        let code = if self.impact_tier >= ImpactTier::Elevated {
            ErrorCode::HighImpactLowConfidence
        } else if hard_fail {
            ErrorCode::VerificationFailed
        } else {
            ErrorCode::LowConfidence
        };
        let mut message = format!(
            "confidence {:.2} against threshold {:.2} ({} tier)",
            self.confidence, self.threshold, self.impact_tier
        );
        if !self.missing_required.is_empty() {
            let names: Vec<&str> = self.missing_required.iter().map(|r| r.name()).collect();
            message.push_str(&format!("; missing required checks: {}", names.join(", ")));
        }
        let failed: Vec<&str> = self.checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
        if !failed.is_empty() {
            message.push_str(&format!("; failed: {}", failed.join(", ")));
        }
        Some(ModeError::new(code, message))
    }
}

/// Per-validation state
struct Session {
    rng: StdRng,
    checks: Vec<ValidationCheck>,
    warnings: Vec<String>,
    /// (method, backend) pairs the plan already used
    used: Vec<(Method, String)>,
    /// Backend that produced the answer
    answer_backend: Option<String>,
}

impl Session {
    fn push(&mut self, check: ValidationCheck) {
        self.checks.push(check);
    }

    fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.rng.random::<f64>()
    }

    /// One seeded point per equal-width stratum, ascending
    fn stratified(&mut self, n: usize, lo: f64, hi: f64) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let width = (hi - lo) / n.max(1) as f64;
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let base = lo + width * i as f64;
                base + width * self.rng.random::<f64>()
            })
            .collect()
    }

    fn sample_env(&mut self, vars: &BTreeSet<String>) -> BTreeMap<String, f64> {
        vars.iter()
            .map(|v| (v.clone(), self.uniform(SAMPLE_RANGE.0, SAMPLE_RANGE.1)))
            .collect()
    }
}

fn env1(var: &str, x: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([(var.to_string(), x)])
}

/// Bisection on a sign change; `f_lo` is `f(lo)`
fn bisect(f: &dyn Fn(f64) -> Option<f64>, mut lo: f64, mut hi: f64, mut f_lo: f64) -> f64 {
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        match f(mid) {
            Some(v) if v == 0.0 => return mid,
            Some(v) if (v < 0.0) == (f_lo < 0.0) => {
                lo = mid;
                f_lo = v;
            }
            Some(_) => hi = mid,
            None => break,
        }
        if hi - lo <= f64::EPSILON * lo.abs().max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Whether `r` is an exact root of `p` after rational reconstruction
fn certify_rational_root(p: &UniPoly, r: f64) -> Option<bool> {
    let int = integer_coefficients(p)?;
    let q = Rational::approximate(r, MAX_DENOMINATOR)?;
    int.has_root(q)
}

/// Exact check of a rational assignment against integer-coefficient linear equations
fn rational_linear_certificate(equations: &[&Equation], values: &BTreeMap<String, f64>) -> Option<bool> {
    let exact = |v: f64| (v.fract() == 0.0 && v.abs() < 1e12).then(|| {
        #[allow(clippy::cast_possible_truncation)]
        let n = v as i128;
        n
    });
    let rationals: BTreeMap<String, Rational> = values
        .iter()
        .map(|(k, v)| Rational::approximate(*v, MAX_DENOMINATOR).map(|r| (k.clone(), r)))
        .collect::<Option<_>>()?;
    let mut lcm: i128 = 1;
    for r in rationals.values() {
        let g = verimath_expr::rational::gcd(lcm, r.denom());
        lcm = lcm.checked_mul(r.denom() / g.max(1))?;
    }
    for eq in equations {
        let (coeffs, constant) = Poly::from_expr(&eq.residual()).ok()?.linear_parts()?;
        let mut sum = exact(constant)?.checked_mul(lcm)?;
        for (var, a) in coeffs {
            let r = rationals.get(&var)?;
            let term = exact(a)?.checked_mul(r.numer())?.checked_mul(lcm / r.denom())?;
            sum = sum.checked_add(term)?;
        }
        if sum != 0 {
            return Some(false);
        }
    }
    Some(true)
}

/// Runs verification strategies against a fixed registry and configuration
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<BackendRegistry>,
    tolerance: Tolerance,
    thresholds: Thresholds,
    policy: Policy,
    spot_check: SpotCheck,
    paths: usize,
}

impl Validator {
    /// Create new validator
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            tolerance: config.tolerance,
            thresholds: config.thresholds,
            policy: config.policy,
            spot_check: config.spot_check,
            paths: ResourceBudget::standard().max_verification_paths,
        }
    }

    /// Spot-check sample count follows the attempt's verification paths
    #[inline]
    #[must_use]
    pub fn with_paths(mut self, paths: usize) -> Self {
        self.paths = paths.max(1);
        self
    }

    fn samples(&self) -> usize {
        (self.spot_check.samples_per_path * self.paths).max(1)
    }

    /// Cross-method comparisons allow for the looser method's error
    fn comparison(&self) -> Tolerance {
        self.tolerance.scaled(1e3)
    }

    /// Outcome for an attempt that produced nothing to verify
    #[must_use]
    pub fn unverified(&self, reason: &str, impact: Option<&ImpactAssessment>) -> ValidationOutcome {
        let impact = impact.map_or_else(ImpactAssessment::standard, ImpactAssessment::rederived);
        let tier = impact.tier;
        ValidationOutcome {
            valid: false,
            confidence: 0.0,
            diversity_score: 0.0,
            checks: Vec::new(),
            warnings: vec![reason.to_string()],
            suggested_review: true,
            threshold: self.thresholds.for_tier(tier),
            missing_required: impact.required_checks.iter().copied().collect(),
            confidence_penalty: impact.confidence_penalty,
            impact_tier: tier,
        }
    }

    /// Verify `result` as an answer to `problem`
    #[tracing::instrument(skip_all, fields(goal = %problem.goal))]
    pub async fn validate(
        &self,
        problem: &Problem,
        result: &ExecutionResult,
        impact: Option<&ImpactAssessment>,
    ) -> ValidationOutcome {
        let impact = impact.map_or_else(ImpactAssessment::standard, ImpactAssessment::rederived);
        let impact = &impact;
        let Some(answer) = result.final_answer_value.as_ref().filter(|_| result.success) else {
            return self.unverified("execution produced no answer to verify", Some(impact));
        };

        let canonical = problem.canonical();
        let used: Vec<(Method, String)> = result
            .steps
            .iter()
            .filter(|s| s.success)
            .filter_map(|s| s.backend_used.clone().map(|b| (s.method_used, b)))
            .collect();
        let answer_backend = result
            .steps
            .iter()
            .rev()
            .find(|s| s.output.as_ref() == Some(answer))
            .and_then(|s| s.backend_used.clone());
        let mut session = Session {
            rng: StdRng::seed_from_u64(self.spot_check.seed ^ hash_prefix(&canonical)),
            checks: Vec::new(),
            warnings: Vec::new(),
            used,
            answer_backend,
        };

        match answer {
            Value::Roots { variable, values } => self.check_roots(problem, variable, values, &mut session).await,
            Value::Assignment { values } => self.check_assignment(problem, values, &mut session).await,
            Value::Optimum { point, value, sense } => {
                self.check_optimum(problem, point, *value, *sense, &mut session).await;
            }
            Value::Scalar { value } if problem.goal_type == ProblemType::Integrate => {
                self.check_integral(problem, *value, &mut session).await;
            }
            Value::Scalar { value } => self.check_evaluation(problem, *value, &mut session).await,
            Value::Expression { expr } | Value::Factored { expr, .. } => {
                self.check_expression(problem, expr, answer, &mut session).await;
            }
            Value::Vector { variables, components } => {
                self.check_gradient(problem, variables, components, &mut session).await;
            }
            Value::FactorEquations { .. } | Value::Artifact { .. } => {
                session.warn(format!("no verification strategy for a {:?} answer", answer.kind()));
            }
        }

        if let Some(step) = result.steps.iter().find(|s| s.method_used == Method::Reproduce && s.success) {
            let passed = matches!(step.output, Some(Value::Artifact { passed: true, .. }));
            session.push(ValidationCheck::new(
                "reproduction_build",
                CheckKind::DomainSpecific,
                CheckCategory::Formal,
                passed,
                "generated check program built and ran",
            ));
        }

        self.conclude(impact, session, &canonical)
    }

    fn conclude(&self, impact: &ImpactAssessment, mut session: Session, canonical: &str) -> ValidationOutcome {
        let penalty = impact.confidence_penalty;
        let confidence = confidence_of(&session.checks, penalty);
        let diversity_score = diversity_of(&session.checks);
        let threshold = self.thresholds.for_tier(impact.tier);
        let missing_required: Vec<RequiredCheck> = impact
            .required_checks
            .iter()
            .copied()
            .filter(|req| !session.checks.iter().any(|c| c.passed && c.satisfies == Some(*req)))
            .collect();
        let hard_fail = session
            .checks
            .iter()
            .any(|c| !c.passed && matches!(c.kind, CheckKind::Substitution | CheckKind::Sanity));
        let valid = confidence >= threshold - 1e-9 && missing_required.is_empty() && !hard_fail;

        let sampled = reaudit_selected(canonical, self.policy.reaudit_sample_rate);
        if sampled {
            session.warn("selected for re-audit by the sampling policy");
        }
        let suggested_review = confidence < self.thresholds.review
            || !valid
            || (confidence >= 0.8 && diversity_score < 0.5)
            || sampled;

        tracing::info!(
            valid,
            confidence,
            diversity = diversity_score,
            checks = session.checks.len(),
            tier = %impact.tier,
            "validation verdict"
        );
        ValidationOutcome {
            valid,
            confidence,
            diversity_score,
            checks: session.checks,
            warnings: session.warnings,
            suggested_review,
            threshold,
            missing_required,
            confidence_penalty: penalty,
            impact_tier: impact.tier,
        }
    }

    /// Request carrying the problem's own statements
    fn problem_request(problem: &Problem, method: Method) -> BackendRequest {
        BackendRequest::new(method)
            .with_statements(problem.knowns.clone())
            .with_variables(problem.unknowns.clone())
            .with_constraints(problem.constraints.clone())
            .with_interval(problem.interval)
            .with_sense(problem.sense)
            .with_order(problem.order.max(1))
            .with_max_solutions(ALTERNATIVE_MAX_SOLUTIONS)
    }

    /// First structurally different (method, backend) pair that completes a request
    async fn alternative(
        &self,
        session: &Session,
        requests: Vec<BackendRequest>,
        avoid_backends: &[String],
    ) -> Option<(String, Value)> {
        for request in requests {
            let request = request.with_tolerance(self.tolerance);
            for name in self.registry.providers(request.method) {
                let same_pair = session.used.iter().any(|(m, b)| *m == request.method && *b == name);
                if same_pair || avoid_backends.contains(&name) {
                    continue;
                }
                let Some(backend) = self.registry.get(&name) else {
                    continue;
                };
                if !backend.can_handle(&request) {
                    continue;
                }
                match backend.execute(&request).await {
                    Ok(value) => return Some((format!("{} on {name}", request.method), value)),
                    Err(err) => {
                        tracing::debug!(backend = %name, method = %request.method, error = %err, "alternative failed");
                    }
                }
            }
        }
        None
    }

    /// Any accepting backend
    async fn dispatch(&self, request: BackendRequest) -> Option<Value> {
        let request = request.with_tolerance(self.tolerance);
        let backend = self.registry.select(&request, &[])?;
        backend.execute(&request).await.ok()
    }

    fn admissible(&self, problem: &Problem, env: &BTreeMap<String, f64>) -> bool {
        let constraints_hold = problem
            .constraints
            .iter()
            .all(|c| c.holds(env, &self.tolerance).unwrap_or(false));
        let inside = match (problem.interval, problem.primary_unknown().and_then(|v| env.get(v))) {
            (Some((a, b)), Some(x)) => {
                (*x >= a || self.tolerance.is_close(*x, a)) && (*x <= b || self.tolerance.is_close(*x, b))
            }
            _ => true,
        };
        constraints_hold && inside
    }

    fn sanity(&self, numbers: &[f64], session: &mut Session) {
        let insane: Vec<f64> = numbers.iter().copied().filter(|v| !self.tolerance.is_sane(*v)).collect();
        let detail = if insane.is_empty() {
            format!("{} values finite and below {:e}", numbers.len(), self.tolerance.max_magnitude)
        } else {
            format!("out-of-range values: {insane:?}")
        };
        session.push(
            ValidationCheck::new("sanity_bounds", CheckKind::Sanity, CheckCategory::Structural, insane.is_empty(), detail)
                .satisfying(RequiredCheck::Sanity),
        );
    }

    /// Scan window: explicit interval, Cauchy bound for polynomials, else the default window
    fn scan_window(problem: &Problem, f: &Expr, var: &str) -> (f64, f64) {
        if let Some(interval) = problem.interval {
            return interval;
        }
        match UniPoly::from_expr(f, var) {
            Ok(p) if p.degree() > 0 => {
                let lead = p.leading().abs();
                let c = p.coeffs();
                let bound = 1.0 + c[..c.len() - 1].iter().map(|a| a.abs() / lead).fold(0.0, f64::max);
                (-bound, bound)
            }
            _ => (-DEFAULT_WINDOW, DEFAULT_WINDOW),
        }
    }

    async fn check_roots(&self, problem: &Problem, var: &str, values: &[f64], session: &mut Session) {
        let equations: Vec<&Equation> = problem.knowns.iter().filter_map(Statement::as_equation).collect();
        let cmp = self.comparison();

        let failing: Vec<f64> = values
            .iter()
            .copied()
            .filter(|x| {
                let env = env1(var, *x);
                let satisfied = equations
                    .iter()
                    .all(|eq| eq.is_satisfied(&env, &self.tolerance).unwrap_or(false));
                !(satisfied && self.admissible(problem, &env))
            })
            .collect();
        let detail = if failing.is_empty() {
            format!("{} root(s) satisfy every equation and constraint", values.len())
        } else {
            format!("roots {failing:?} leave a non-zero residual or violate a constraint")
        };
        session.push(
            ValidationCheck::new(
                "substitution",
                CheckKind::Substitution,
                CheckCategory::Structural,
                failing.is_empty(),
                detail,
            )
            .satisfying(RequiredCheck::Substitution),
        );

        let Some(target) = problem.primary().map(Statement::target) else {
            return;
        };

        // sign-change completeness scan
        let (lo, hi) = Self::scan_window(problem, &target, var);
        let eval = |x: f64| target.eval_at(var, x).ok().filter(|v| v.is_finite());
        let mut xs = session.stratified((self.samples() * 4).max(64), lo, hi);
        xs.insert(0, lo);
        xs.push(hi);
        let mut detected = Vec::new();
        for pair in xs.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (Some(fa), Some(fb)) = (eval(a), eval(b)) else {
                continue;
            };
            if fa == 0.0 {
                detected.push(a);
                continue;
            }
            if fa * fb >= 0.0 {
                continue;
            }
            let c = bisect(&eval, a, b, fa);
            // a sign change across a pole is not a root
            if eval(c).is_some_and(|fc| fc.abs() <= 1e-6 * (1.0 + fa.abs().max(fb.abs()))) {
                detected.push(c);
            }
        }
        if eval(hi) == Some(0.0) {
            detected.push(hi);
        }
        let missed: Vec<f64> = detected
            .into_iter()
            .filter(|c| self.admissible(problem, &env1(var, *c)))
            .filter(|c| !values.iter().any(|r| (r - c).abs() <= 1e-6 * c.abs().max(1.0)))
            .collect();
        let detail = if missed.is_empty() {
            format!("sign-change scan of {} points on [{lo:.4}, {hi:.4}] found no unreported root", xs.len())
        } else {
            format!("scan found unreported roots near {missed:?}")
        };
        session.push(
            ValidationCheck::new(
                "root_completeness_scan",
                CheckKind::Numeric,
                CheckCategory::Numeric,
                missed.is_empty(),
                detail,
            )
            .satisfying(RequiredCheck::NumericSpotCheck),
        );

        let requests = vec![
            Self::problem_request(problem, Method::RootFind),
            Self::problem_request(problem, Method::Solve),
        ];
        let alternative = self.alternative(session, requests, &[]).await;
        match alternative {
            Some((how, Value::Roots { values: alt, .. })) => {
                let mut alt: Vec<f64> = alt
                    .into_iter()
                    .filter(|x| self.admissible(problem, &env1(var, *x)))
                    .collect();
                alt.sort_by(|a, b| b.total_cmp(a));
                let agree = alt.len() == values.len() && alt.iter().zip(values).all(|(a, b)| cmp.is_close(*a, *b));
                session.push(
                    ValidationCheck::new(
                        "alternative_method",
                        CheckKind::AlternativeMethod,
                        CheckCategory::AlternativeMethod,
                        agree,
                        format!("{how} gave {alt:?}"),
                    )
                    .satisfying(RequiredCheck::AlternativeMethod),
                );
            }
            Some((how, other)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    false,
                    format!("{how} returned {other} instead of roots"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            None => session.warn("no alternative root-finding method available"),
        }

        self.sanity(values, session);

        if values.is_empty() {
            return;
        }
        let poly = UniPoly::from_expr(&target, var).ok();
        let certified: Option<Vec<bool>> = poly
            .as_ref()
            .and_then(|p| values.iter().map(|r| certify_rational_root(p, *r)).collect());
        match certified {
            Some(flags) if flags.iter().all(|f| *f) => session.push(
                ValidationCheck::new(
                    "exact_certificate",
                    CheckKind::DomainSpecific,
                    CheckCategory::Formal,
                    true,
                    "every root is an exact rational root of the integer polynomial",
                )
                .satisfying(RequiredCheck::ExactCertificate),
            ),
            Some(_) => session.push(
                ValidationCheck::new(
                    "exact_certificate",
                    CheckKind::DomainSpecific,
                    CheckCategory::Formal,
                    false,
                    "a reconstructed rational root leaves a non-zero integer residual",
                )
                .satisfying(RequiredCheck::ExactCertificate),
            ),
            None => {
                let bracketed = values.iter().all(|r| {
                    let delta = 1e-7 * r.abs().max(1.0);
                    match (eval(r - delta), eval(r + delta), eval(*r)) {
                        (Some(left), Some(right), _) if left * right <= 0.0 => true,
                        (_, _, Some(at)) => at.abs() <= self.tolerance.absolute,
                        _ => false,
                    }
                });
                session.warn("roots are not all rational; bracketing used instead of an exact certificate");
                session.push(ValidationCheck::new(
                    "root_bracketing",
                    CheckKind::DomainSpecific,
                    CheckCategory::Numeric,
                    bracketed,
                    "sign change or vanishing value around every root",
                ));
            }
        }
    }

    async fn check_assignment(&self, problem: &Problem, values: &BTreeMap<String, f64>, session: &mut Session) {
        let equations: Vec<&Equation> = problem.knowns.iter().filter_map(Statement::as_equation).collect();
        let cmp = self.comparison();
        let residual_norm = |env: &BTreeMap<String, f64>| -> Option<f64> {
            equations
                .iter()
                .map(|eq| Some((eq.lhs.eval(env).ok()? - eq.rhs.eval(env).ok()?).abs()))
                .sum()
        };

        let satisfied = equations
            .iter()
            .all(|eq| eq.is_satisfied(values, &self.tolerance).unwrap_or(false))
            && self.admissible(problem, values);
        session.push(
            ValidationCheck::new(
                "substitution",
                CheckKind::Substitution,
                CheckCategory::Structural,
                satisfied,
                format!("{} equation(s) checked at the assignment", equations.len()),
            )
            .satisfying(RequiredCheck::Substitution),
        );

        // the solution should be a strict local minimum of the residual norm
        let base = residual_norm(values).unwrap_or(f64::INFINITY);
        let trials = self.samples().min(64);
        let mut isolated = 0_usize;
        for _ in 0..trials {
            let perturbed: BTreeMap<String, f64> = values
                .iter()
                .map(|(k, v)| {
                    let delta = 1e-3 * v.abs().max(1.0) * session.uniform(0.5, 1.0);
                    let sign = if session.rng.random::<bool>() { 1.0 } else { -1.0 };
                    (k.clone(), v + sign * delta)
                })
                .collect();
            if residual_norm(&perturbed).is_some_and(|r| r > base) {
                isolated += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = isolated as f64 / trials.max(1) as f64;
        session.push(
            ValidationCheck::new(
                "perturbation_isolation",
                CheckKind::Numeric,
                CheckCategory::Numeric,
                isolated == trials,
                format!("{isolated}/{trials} seeded perturbations increase the residual"),
            )
            .with_contribution(fraction)
            .satisfying(RequiredCheck::NumericSpotCheck),
        );

        let requests = vec![
            Self::problem_request(problem, Method::LinearSolve),
            Self::problem_request(problem, Method::SolveSystem),
        ];
        let alternative = self.alternative(session, requests, &[]).await;
        match alternative {
            Some((how, Value::Assignment { values: alt })) => {
                let agree = alt.len() == values.len()
                    && values
                        .iter()
                        .all(|(k, v)| alt.get(k).is_some_and(|a| cmp.is_close(*a, *v)));
                session.push(
                    ValidationCheck::new(
                        "alternative_method",
                        CheckKind::AlternativeMethod,
                        CheckCategory::AlternativeMethod,
                        agree,
                        format!("{how} gave {}", Value::Assignment { values: alt.clone() }),
                    )
                    .satisfying(RequiredCheck::AlternativeMethod),
                );
            }
            Some((how, other)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    false,
                    format!("{how} returned {other}"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            None => session.warn("no alternative system solver available"),
        }

        let numbers: Vec<f64> = values.values().copied().collect();
        self.sanity(&numbers, session);

        match rational_linear_certificate(&equations, values) {
            Some(exact) => session.push(
                ValidationCheck::new(
                    "exact_certificate",
                    CheckKind::DomainSpecific,
                    CheckCategory::Formal,
                    exact,
                    "rational reconstruction checked in exact integer arithmetic",
                )
                .satisfying(RequiredCheck::ExactCertificate),
            ),
            None => session.warn("system is not integer-linear; no exact certificate"),
        }
    }

    fn on_boundary(&self, problem: &Problem, var: &str, x: f64) -> bool {
        let cmp = self.comparison();
        let endpoints = problem.interval.map(|(a, b)| vec![a, b]).unwrap_or_default();
        let bounds = problem
            .constraints
            .iter()
            .filter_map(|c| c.as_bound())
            .filter(|(name, _, _)| name == var)
            .map(|(_, _, value)| value);
        endpoints.into_iter().chain(bounds).any(|b| cmp.is_close(b, x))
    }

    fn optimum_window(problem: &Problem, var: &str, x: f64) -> (f64, f64) {
        if let Some(interval) = problem.interval {
            return interval;
        }
        let (mut lo, mut hi) = (x - DEFAULT_WINDOW, x + DEFAULT_WINDOW);
        for (name, relation, value) in problem.constraints.iter().filter_map(|c| c.as_bound()) {
            if name != var {
                continue;
            }
            match relation {
                Relation::Gt | Relation::Ge => lo = lo.max(value),
                Relation::Lt | Relation::Le => hi = hi.min(value),
                Relation::Ne => {}
            }
        }
        if lo >= hi {
            (x - DEFAULT_WINDOW, x + DEFAULT_WINDOW)
        } else {
            (lo, hi)
        }
    }

    async fn check_optimum(
        &self,
        problem: &Problem,
        point: &BTreeMap<String, f64>,
        value: f64,
        sense: Sense,
        session: &mut Session,
    ) {
        let cmp = self.comparison();
        let Some((var, x)) = problem
            .primary_unknown()
            .and_then(|v| point.get(v).map(|x| (v.to_string(), *x)))
            .or_else(|| point.iter().next().map(|(k, v)| (k.clone(), *v)))
        else {
            session.warn("optimum has no coordinates");
            return;
        };
        let Some(objective) = problem.primary().map(Statement::target) else {
            return;
        };
        let f = |t: f64| objective.eval_at(&var, t).ok().filter(|v| v.is_finite());
        let boundary = self.on_boundary(problem, &var, x);
        let slope = differentiate(&objective, &var).eval_at(&var, x).unwrap_or(f64::NAN);

        let value_matches = f(x).is_some_and(|fx| cmp.is_close(fx, value));
        let stationary = slope.abs() <= 1e-6 * (1.0 + value.abs());
        let admissible = self.admissible(problem, &env1(&var, x));
        session.push(
            ValidationCheck::new(
                "first_order_condition",
                CheckKind::Substitution,
                CheckCategory::Structural,
                value_matches && admissible && (boundary || stationary),
                format!(
                    "f({x}) {} the reported value; f' = {slope:.3e}{}",
                    if value_matches { "matches" } else { "does not match" },
                    if boundary { " at a boundary" } else { "" }
                ),
            )
            .satisfying(RequiredCheck::Substitution),
        );

        let (lo, hi) = Self::optimum_window(problem, &var, x);
        let samples = session.stratified(self.samples(), lo, hi);
        let better: Vec<f64> = samples
            .iter()
            .copied()
            .filter(|s| self.admissible(problem, &env1(&var, *s)))
            .filter(|s| f(*s).is_some_and(|fs| sense.prefers(fs, value) && !cmp.is_close(fs, value)))
            .collect();
        session.push(
            ValidationCheck::new(
                "sampled_optimality",
                CheckKind::Numeric,
                CheckCategory::Numeric,
                better.is_empty(),
                if better.is_empty() {
                    format!("no better admissible point among {} samples on [{lo:.4}, {hi:.4}]", samples.len())
                } else {
                    format!("{} sampled points beat the reported {}", better.len(), sense.noun())
                },
            )
            .satisfying(RequiredCheck::NumericSpotCheck),
        );

        let mut alternative = self
            .alternative(session, vec![Self::problem_request(problem, Method::Optimize)], &[])
            .await;
        let chain_used = session.used.iter().any(|(m, _)| *m == Method::SelectExtremum);
        if alternative.is_none() && !chain_used {
            alternative = self
                .critical_point_chain(problem)
                .await
                .map(|v| ("critical-point analysis".to_string(), v));
        }
        match alternative {
            Some((how, Value::Optimum { value: alt, .. })) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    cmp.is_close(alt, value),
                    format!("{how} found {} {alt}", sense.noun()),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            Some((how, other)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    false,
                    format!("{how} returned {other}"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            None => session.warn("no alternative optimisation method available"),
        }

        self.sanity(&[x, value], session);

        let curvature = differentiate_n(&objective, &var, 2).eval_at(&var, x).unwrap_or(f64::NAN);
        let curvature_ok = boundary
            || match sense {
                Sense::Maximize => curvature <= self.tolerance.absolute,
                Sense::Minimize => curvature >= -self.tolerance.absolute,
            };
        session.push(ValidationCheck::new(
            "second_order_condition",
            CheckKind::DomainSpecific,
            CheckCategory::Structural,
            curvature_ok,
            if boundary {
                "boundary optimum".to_string()
            } else {
                format!("f'' = {curvature:.4} at the optimum")
            },
        ));

        if !boundary {
            let derivative = UniPoly::from_expr(&objective, &var).ok().map(|p| p.derivative());
            if let Some(exact) = derivative.and_then(|d| certify_rational_root(&d, x)) {
                session.push(
                    ValidationCheck::new(
                        "exact_certificate",
                        CheckKind::DomainSpecific,
                        CheckCategory::Formal,
                        exact,
                        "critical point is an exact rational root of f'",
                    )
                    .satisfying(RequiredCheck::ExactCertificate),
                );
            }
        }
    }

    /// Differentiate twice, solve f' = 0, classify; used when the plan did not
    async fn critical_point_chain(&self, problem: &Problem) -> Option<Value> {
        let derivative = |order: u32| Self::problem_request(problem, Method::Differentiate).with_order(order);
        let first = self.dispatch(derivative(1)).await?;
        let second = self.dispatch(derivative(2)).await?;
        let critical = self
            .dispatch(Self::problem_request(problem, Method::Solve).with_inputs(vec![first]))
            .await?;
        self.dispatch(Self::problem_request(problem, Method::SelectExtremum).with_inputs(vec![second, critical]))
            .await
    }

    async fn check_integral(&self, problem: &Problem, value: f64, session: &mut Session) {
        let cmp = self.comparison();
        let (Some(var), Some((a, b)), Some(integrand)) = (
            problem.primary_unknown().map(str::to_string),
            problem.interval,
            problem.primary().map(Statement::target),
        ) else {
            session.warn("definite integral without variable, interval or integrand");
            return;
        };

        match self.dispatch(Self::problem_request(problem, Method::Integrate)).await {
            Some(Value::Expression { expr: antiderivative }) => {
                let endpoints = antiderivative
                    .eval_at(&var, b)
                    .and_then(|fb| antiderivative.eval_at(&var, a).map(|fa| fb - fa));
                let derivative = differentiate(&antiderivative, &var);
                let points = session.stratified(8, a, b);
                let consistent = points.iter().all(|x| {
                    match (derivative.eval_at(&var, *x), integrand.eval_at(&var, *x)) {
                        (Ok(d), Ok(f)) => cmp.is_close(d, f),
                        _ => false,
                    }
                });
                let passed = consistent && endpoints.as_ref().is_ok_and(|v| cmp.is_close(*v, value));
                session.push(
                    ValidationCheck::new(
                        "antiderivative_substitution",
                        CheckKind::Substitution,
                        CheckCategory::Structural,
                        passed,
                        format!("F = {antiderivative}; F(b) - F(a) = {}", endpoints.unwrap_or(f64::NAN)),
                    )
                    .satisfying(RequiredCheck::Substitution),
                );
            }
            _ => session.warn("no closed-form antiderivative to substitute"),
        }

        // stratified Monte Carlo estimate
        let n = self.samples();
        #[allow(clippy::cast_precision_loss)]
        let h = (b - a) / n as f64;
        let points = session.stratified(n, a, b);
        let evaluated: Option<Vec<f64>> = points
            .iter()
            .map(|x| integrand.eval_at(&var, *x).ok().filter(|v| v.is_finite()))
            .collect();
        match evaluated {
            Some(fs) => {
                let estimate: f64 = fs.iter().sum::<f64>() * h;
                let scale: f64 = fs.iter().map(|v| v.abs()).sum::<f64>() * h.abs();
                let passed = (estimate - value).abs() <= 0.02 * (value.abs() + scale) + self.tolerance.absolute;
                session.push(
                    ValidationCheck::new(
                        "stratified_estimate",
                        CheckKind::Numeric,
                        CheckCategory::Numeric,
                        passed,
                        format!("{n}-stratum estimate {estimate:.6}"),
                    )
                    .satisfying(RequiredCheck::NumericSpotCheck),
                );
            }
            None => session.warn("integrand is not finite at every sample point"),
        }

        let requests = vec![Self::problem_request(problem, Method::DefiniteIntegral)];
        let alternative = self.alternative(session, requests, &[]).await;
        match alternative {
            Some((how, Value::Scalar { value: alt })) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    cmp.is_close(alt, value),
                    format!("{how} gave {alt}"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            Some((how, other)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    false,
                    format!("{how} returned {other}"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            None => session.warn("no alternative quadrature available"),
        }

        self.sanity(&[value], session);
    }

    async fn check_evaluation(&self, problem: &Problem, value: f64, session: &mut Session) {
        let Some(expr) = problem.primary().map(Statement::target) else {
            return;
        };
        let empty = BTreeMap::new();
        let direct = expr.eval(&empty);
        session.push(
            ValidationCheck::new(
                "re_evaluation",
                CheckKind::Substitution,
                CheckCategory::Structural,
                direct.as_ref().is_ok_and(|v| self.tolerance.is_close(*v, value)),
                format!("direct evaluation of {expr}"),
            )
            .satisfying(RequiredCheck::Substitution),
        );

        let normal_form = Poly::from_expr(&expr)
            .ok()
            .and_then(|p| p.as_constant())
            .or_else(|| simplify(&expr).eval(&empty).ok());
        session.push(
            ValidationCheck::new(
                "normal_form_evaluation",
                CheckKind::Numeric,
                CheckCategory::Numeric,
                normal_form.is_some_and(|v| self.comparison().is_close(v, value)),
                format!("normal form evaluates to {}", normal_form.unwrap_or(f64::NAN)),
            )
            .satisfying(RequiredCheck::NumericSpotCheck),
        );

        let requests = vec![Self::problem_request(problem, Method::Evaluate)];
        let alternative = self.alternative(session, requests, &[]).await;
        match alternative {
            Some((how, alt)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    alt.as_scalar().is_some_and(|v| self.tolerance.is_close(v, value)),
                    format!("{how} gave {alt}"),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            None => session.warn("no alternative evaluator available"),
        }

        self.sanity(&[value], session);
    }

    /// Seeded pointwise agreement of two expressions
    fn agree_at_samples(&self, a: &Expr, b: &Expr, session: &mut Session) -> (usize, usize) {
        let mut vars = a.variables();
        vars.extend(b.variables());
        let cmp = self.comparison();
        let mut agreed = 0;
        let mut tried = 0;
        for _ in 0..self.samples().min(64) {
            let env = session.sample_env(&vars);
            if let (Ok(x), Ok(y)) = (a.eval(&env), b.eval(&env)) {
                if x.is_finite() && y.is_finite() {
                    tried += 1;
                    if cmp.is_close(x, y) {
                        agreed += 1;
                    }
                }
            }
        }
        (agreed, tried)
    }

    fn push_pointwise(&self, name: &str, a: &Expr, b: &Expr, session: &mut Session) {
        let (agreed, tried) = self.agree_at_samples(a, b, session);
        #[allow(clippy::cast_precision_loss)]
        let fraction = agreed as f64 / tried.max(1) as f64;
        session.push(
            ValidationCheck::new(
                name,
                CheckKind::Numeric,
                CheckCategory::Numeric,
                tried > 0 && agreed == tried,
                format!("{agreed}/{tried} seeded points agree"),
            )
            .with_contribution(fraction)
            .satisfying(RequiredCheck::NumericSpotCheck),
        );
    }

    fn push_identity(name: &str, a: &Expr, b: &Expr, session: &mut Session) {
        match (Poly::from_expr(a), Poly::from_expr(b)) {
            (Ok(pa), Ok(pb)) => session.push(
                ValidationCheck::new(
                    name,
                    CheckKind::Substitution,
                    CheckCategory::Structural,
                    pa.approx_eq(&pb, 1e-9),
                    format!("polynomial normal forms of {a} and {b}"),
                )
                .satisfying(RequiredCheck::Substitution),
            ),
            _ => session.warn(format!("{name}: not polynomial, identity checked numerically only")),
        }
    }

    fn push_expression_alternative(&self, how: Option<(String, Value)>, expected: &Expr, session: &mut Session) {
        match how {
            Some((how, alt)) => {
                let passed = alt.as_expr().is_some_and(|alt_expr| {
                    let (agreed, tried) = self.agree_at_samples(alt_expr, expected, session);
                    tried > 0 && agreed == tried
                });
                session.push(
                    ValidationCheck::new(
                        "alternative_method",
                        CheckKind::AlternativeMethod,
                        CheckCategory::AlternativeMethod,
                        passed,
                        format!("{how} gave {alt}"),
                    )
                    .satisfying(RequiredCheck::AlternativeMethod),
                );
            }
            None => session.warn("no alternative method available for this expression"),
        }
    }

    /// Fundamental theorem: integral of `derivative` over [p, p + 1] equals the change in `primitive`
    async fn push_ftc(
        &self,
        derivative: &Expr,
        primitive: &Expr,
        var: &str,
        session: &mut Session,
        avoid_backends: &[String],
    ) {
        let mut others: BTreeSet<String> = derivative.variables();
        others.extend(primitive.variables());
        others.remove(var);
        let env = session.sample_env(&others);
        let fix = |e: &Expr| env.iter().fold(e.clone(), |acc, (k, v)| acc.substitute(k, &Expr::Num(*v)));
        let (derivative, primitive) = (fix(derivative), fix(primitive));
        let p = session.uniform(SAMPLE_RANGE.0, SAMPLE_RANGE.1);
        let expected = primitive
            .eval_at(var, p + 1.0)
            .and_then(|hi| primitive.eval_at(var, p).map(|lo| hi - lo));
        let request = BackendRequest::new(Method::DefiniteIntegral)
            .with_statement(Statement::Expression { expr: derivative })
            .with_variable(var)
            .with_interval(Some((p, p + 1.0)));
        let alternative = self.alternative(session, vec![request], avoid_backends).await;
        match (alternative, expected) {
            (Some((how, alt)), Ok(expected)) => session.push(
                ValidationCheck::new(
                    "alternative_method",
                    CheckKind::AlternativeMethod,
                    CheckCategory::AlternativeMethod,
                    alt.as_scalar().is_some_and(|v| self.comparison().is_close(v, expected)),
                    format!("{how} over [{p:.4}, {:.4}] gave {alt}, expected {expected}", p + 1.0),
                )
                .satisfying(RequiredCheck::AlternativeMethod),
            ),
            _ => session.warn("no quadrature available for a fundamental-theorem check"),
        }
    }

    fn expression_sanity(&self, problem: &Problem, exprs: &[&Expr], session: &mut Session) {
        let known: BTreeSet<String> = problem.knowns.iter().flat_map(Statement::variables).collect();
        let stray: BTreeSet<String> = exprs
            .iter()
            .flat_map(|e| e.variables())
            .filter(|v| !known.contains(v))
            .collect();
        let non_finite = exprs.iter().any(|e| {
            let text = e.to_string();
            text.contains("NaN") || text.contains("inf")
        });
        let passed = stray.is_empty() && !non_finite;
        session.push(
            ValidationCheck::new(
                "sanity_bounds",
                CheckKind::Sanity,
                CheckCategory::Structural,
                passed,
                if passed {
                    "only problem variables and finite literals".to_string()
                } else {
                    format!("stray variables {stray:?} or non-finite literals")
                },
            )
            .satisfying(RequiredCheck::Sanity),
        );
    }

    async fn check_expression(&self, problem: &Problem, answer: &Expr, value: &Value, session: &mut Session) {
        let Some(source) = problem.primary().map(Statement::target) else {
            return;
        };
        let var = problem.primary_unknown().unwrap_or("x").to_string();
        match problem.goal_type {
            ProblemType::Factor => {
                Self::push_identity("polynomial_identity", answer, &source, session);
                self.push_pointwise("pointwise_agreement", answer, &source, session);
                let expand = BackendRequest::new(Method::Expand)
                    .with_statement(Statement::Expression { expr: answer.clone() })
                    .with_variables(problem.unknowns.clone());
                let alt = self.alternative(session, vec![expand], &[]).await;
                self.push_expression_alternative(alt, &source, session);
                self.expression_sanity(problem, &[answer], session);

                let factors = match value {
                    Value::Factored { factors, .. } => factors.as_slice(),
                    _ => &[],
                };
                let poly = UniPoly::from_expr(&source, &var).ok();
                let roots: Vec<f64> = factors
                    .iter()
                    .filter_map(|f| UniPoly::from_expr(f, &var).ok())
                    .filter(|p| p.degree() == 1)
                    .map(|p| -p.coeffs()[0] / p.coeffs()[1])
                    .collect();
                if let (Some(poly), false) = (poly, roots.is_empty()) {
                    let certified = roots.iter().all(|r| certify_rational_root(&poly, *r) == Some(true));
                    session.push(
                        ValidationCheck::new(
                            "exact_certificate",
                            CheckKind::DomainSpecific,
                            CheckCategory::Formal,
                            certified,
                            format!("{} linear factor root(s) checked exactly", roots.len()),
                        )
                        .satisfying(RequiredCheck::ExactCertificate),
                    );
                }
            }
            ProblemType::Expand | ProblemType::Simplify => {
                Self::push_identity("polynomial_identity", answer, &source, session);
                self.push_pointwise("pointwise_agreement", answer, &source, session);
                let other = if problem.goal_type == ProblemType::Expand {
                    Method::Simplify
                } else {
                    Method::Expand
                };
                let alt = self.alternative(session, vec![Self::problem_request(problem, other)], &[]).await;
                self.push_expression_alternative(alt, answer, session);
                self.expression_sanity(problem, &[answer], session);
            }
            ProblemType::Differentiate => {
                let order = problem.order.max(1);
                let lower = if order == 1 {
                    source.clone()
                } else {
                    differentiate_n(&source, &var, order - 1)
                };
                if let Ok(p) = UniPoly::from_expr(&source, &var) {
                    let mut d = p;
                    for _ in 0..order {
                        d = d.derivative();
                    }
                    Self::push_identity("derivative_identity", answer, &d.to_expr(&var), session);
                }
                self.push_central_difference(&lower, answer, &var, session);
                self.push_ftc(answer, &lower, &var, session, &[]).await;
                self.expression_sanity(problem, &[answer], session);
            }
            ProblemType::Integrate => {
                let derivative = differentiate(answer, &var);
                let (agreed, tried) = self.agree_at_samples(&derivative, &source, session);
                session.push(
                    ValidationCheck::new(
                        "derivative_of_answer",
                        CheckKind::Substitution,
                        CheckCategory::Structural,
                        tried > 0 && agreed == tried,
                        format!("d/d{var} of the answer matches the integrand at {agreed}/{tried} points"),
                    )
                    .satisfying(RequiredCheck::Substitution),
                );
                self.push_central_difference(answer, &source, &var, session);
                let avoid: Vec<String> = session.answer_backend.iter().cloned().collect();
                self.push_ftc(&source, answer, &var, session, &avoid).await;
                self.expression_sanity(problem, &[answer], session);
            }
            _ => {
                self.push_pointwise("pointwise_agreement", answer, &source, session);
                self.expression_sanity(problem, &[answer], session);
            }
        }
    }

    /// Central differences of `primitive` in `var` against `derivative`
    fn push_central_difference(&self, primitive: &Expr, derivative: &Expr, var: &str, session: &mut Session) {
        let mut others = primitive.variables();
        others.extend(derivative.variables());
        let cmp = self.comparison();
        let mut agreed = 0;
        let mut tried = 0;
        for _ in 0..self.samples().min(32) {
            let env = session.sample_env(&others);
            let at = env.get(var).copied().unwrap_or_else(|| session.uniform(SAMPLE_RANGE.0, SAMPLE_RANGE.1));
            let fixed = env
                .iter()
                .filter(|(k, _)| k.as_str() != var)
                .fold(primitive.clone(), |acc, (k, v)| acc.substitute(k, &Expr::Num(*v)));
            let mut full = env.clone();
            full.insert(var.to_string(), at);
            if let (Ok(numeric), Ok(symbolic)) = (central_difference(&fixed, var, at), derivative.eval(&full)) {
                if numeric.is_finite() && symbolic.is_finite() {
                    tried += 1;
                    if cmp.is_close(numeric, symbolic) {
                        agreed += 1;
                    }
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = agreed as f64 / tried.max(1) as f64;
        session.push(
            ValidationCheck::new(
                "central_difference",
                CheckKind::Numeric,
                CheckCategory::Numeric,
                tried > 0 && agreed == tried,
                format!("{agreed}/{tried} central differences agree"),
            )
            .with_contribution(fraction)
            .satisfying(RequiredCheck::NumericSpotCheck),
        );
    }

    async fn check_gradient(&self, problem: &Problem, variables: &[String], components: &[Expr], session: &mut Session) {
        let Some(source) = problem.primary().map(Statement::target) else {
            return;
        };
        if variables.len() != components.len() {
            session.push(ValidationCheck::new(
                "sanity_bounds",
                CheckKind::Sanity,
                CheckCategory::Structural,
                false,
                format!("{} components for {} variables", components.len(), variables.len()),
            ));
            return;
        }
        for (var, component) in variables.iter().zip(components) {
            let expected = differentiate(&source, var);
            let (agreed, tried) = self.agree_at_samples(component, &expected, session);
            session.push(
                ValidationCheck::new(
                    &format!("component_identity_{var}"),
                    CheckKind::Substitution,
                    CheckCategory::Structural,
                    tried > 0 && agreed == tried,
                    format!("partial in {var} matches at {agreed}/{tried} points"),
                )
                .satisfying(RequiredCheck::Substitution),
            );
            self.push_central_difference(&source, component, var, session);
            self.push_ftc(component, &source, var, session, &[]).await;
        }
        let refs: Vec<&Expr> = components.iter().collect();
        self.expression_sanity(problem, &refs, session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::executor::Executor;
    use crate::parser::ProblemParser;
    use crate::planner::Planner;
    use crate::types::StepResult;
    use crate::impact::ImpactCategory;
    use pretty_assertions::assert_eq;

    fn problem(query: &str) -> Problem {
        let intent = Detector::new().detect(query);
        ProblemParser::new().parse(query, &intent).unwrap()
    }

    async fn solve_and_validate(
        registry: BackendRegistry,
        query: &str,
        impact: Option<&ImpactAssessment>,
    ) -> ValidationOutcome {
        let registry = Arc::new(registry);
        let p = problem(query);
        let plan = Planner::new(Arc::clone(&registry)).plan(&p).unwrap();
        let result = Executor::new(Arc::clone(&registry)).execute(&plan, &plan.search_budget).await;
        assert!(result.success, "{query}: {:?}", result.error);
        Validator::new(registry, &EngineConfig::default()).validate(&p, &result, impact).await
    }

    fn handmade(answer: Value, method: Method, backend: &str) -> ExecutionResult {
        ExecutionResult {
            success: true,
            final_answer: Some(answer.to_string()),
            final_answer_value: Some(answer.clone()),
            steps: vec![StepResult {
                subgoal_id: "s1".into(),
                success: true,
                output: Some(answer),
                backend_used: Some(backend.into()),
                method_used: method,
                duration_ms: 0,
                error: None,
            }],
            backends_used: vec![backend.into()],
            error: None,
            elapsed_ms: 0,
            approach: "handmade".into(),
            peak_concurrency: 1,
        }
    }

    fn check(name: &str, kind: CheckKind, category: CheckCategory, passed: bool) -> ValidationCheck {
        ValidationCheck::new(name, kind, category, passed, "")
    }

    #[test]
    fn weights_split_within_a_class() {
        let checks = vec![
            check("a", CheckKind::Substitution, CheckCategory::Structural, true),
            check("b", CheckKind::Substitution, CheckCategory::Structural, false),
            check("c", CheckKind::Sanity, CheckCategory::Structural, true),
        ];
        assert_eq!(confidence_of(&checks, 0.0), 0.25);
        assert_eq!(confidence_of(&checks, -0.05), 0.2);
        assert_eq!(diversity_of(&checks), 0.25);
    }

    #[test]
    fn confidence_is_clamped() {
        let checks = vec![check("a", CheckKind::Sanity, CheckCategory::Structural, true)];
        assert_eq!(confidence_of(&checks, -0.5), 0.0);
        assert_eq!(confidence_of(&[], 0.0), 0.0);
        // a positive penalty never raises confidence
        assert_eq!(confidence_of(&checks, 0.5), 0.1);
    }

    #[test]
    fn reaudit_sampling_is_deterministic() {
        assert!(!reaudit_selected("solve|x^2 - 4 = 0|x|", 0.0));
        assert!(reaudit_selected("solve|x^2 - 4 = 0|x|", 1.0));
        assert_eq!(
            reaudit_selected("solve|x^2 - 4 = 0|x|", 0.5),
            reaudit_selected("solve|x^2 - 4 = 0|x|", 0.5)
        );
    }

    #[tokio::test]
    async fn quadratic_passes_every_strategy() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "solve x^2 - 4 = 0", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.confidence >= 0.9);
        assert_eq!(outcome.diversity_score, 1.0);
        assert!(outcome.check("substitution").is_some_and(|c| c.passed));
        assert!(outcome.check("alternative_method").is_some_and(|c| c.passed));
        assert!(outcome.check("exact_certificate").is_some_and(|c| c.passed));
        assert!(!outcome.suggested_review);
        assert_eq!(outcome.recompute_confidence(), outcome.confidence);
        assert_eq!(outcome.recompute_diversity(), outcome.diversity_score);
    }

    #[tokio::test]
    async fn irrational_roots_use_bracketing() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "solve x^2 - 2 = 0", None).await;
        assert!(outcome.valid);
        assert!(outcome.check("root_bracketing").is_some_and(|c| c.passed));
        assert!(outcome.check("exact_certificate").is_none());
    }

    #[tokio::test]
    async fn optimum_checks() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "maximize 10*d - d^2", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.check("second_order_condition").is_some_and(|c| c.passed));
        assert!(outcome.check("alternative_method").is_some_and(|c| c.passed));
    }

    #[tokio::test]
    async fn linear_system_checks() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "solve 2x + y = 5 and x - y = 1", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.check("exact_certificate").is_some_and(|c| c.passed));
        assert!(outcome.check("perturbation_isolation").is_some_and(|c| c.passed));
    }

    #[tokio::test]
    async fn definite_integral_checks() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "integrate x^2 from 0 to 3", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.check("stratified_estimate").is_some_and(|c| c.passed));
    }

    #[tokio::test]
    async fn derivative_checks() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "differentiate x^3 + 2x", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.check("central_difference").is_some_and(|c| c.passed));
    }

    #[tokio::test]
    async fn factor_checks() {
        let outcome = solve_and_validate(BackendRegistry::with_defaults(), "factor x^2 - 5x + 6", None).await;
        assert!(outcome.valid, "{outcome:#?}");
        assert!(outcome.check("exact_certificate").is_some_and(|c| c.passed));
    }

    #[tokio::test]
    async fn wrong_root_fails_substitution() {
        let p = problem("solve x^2 - 4 = 0");
        let result = handmade(Value::roots("x", vec![3.0]), Method::Solve, "symbolic");
        let outcome = Validator::new(Arc::new(BackendRegistry::with_defaults()), &EngineConfig::default())
            .validate(&p, &result, None)
            .await;
        assert!(!outcome.valid);
        assert!(!outcome.check("substitution").unwrap().passed);
        assert_eq!(outcome.failure().map(|e| e.code), Some(ErrorCode::VerificationFailed));
    }

    #[tokio::test]
    async fn elevated_tier_requires_alternative_method() {
        let p = problem("solve x^2 - 4 = 0");
        let result = handmade(Value::roots("x", vec![2.0, -2.0]), Method::Solve, "symbolic");
        let registry = BackendRegistry::with_defaults().without_backend("numeric");
        let impact = ImpactAssessment::new(Some(ImpactCategory::Finance), 0.6);
        let outcome = Validator::new(Arc::new(registry), &EngineConfig::default())
            .validate(&p, &result, Some(&impact))
            .await;
        assert!(!outcome.valid);
        assert_eq!(outcome.missing_required, vec![RequiredCheck::AlternativeMethod]);
        assert_eq!(outcome.failure().map(|e| e.code), Some(ErrorCode::HighImpactLowConfidence));
    }

    #[tokio::test]
    async fn critical_tier_gate_overrides_confidence() {
        // irrational roots have no exact certificate, which critical requires
        let impact = ImpactAssessment::new(Some(ImpactCategory::Healthcare), 0.9);
        assert_eq!(impact.tier, ImpactTier::Critical);
        let outcome =
            solve_and_validate(BackendRegistry::with_defaults(), "solve x^2 - 2 = 0", Some(&impact)).await;

        assert!(outcome.confidence >= 0.9 - 1e-9, "{outcome:#?}");
        assert!(!outcome.valid);
        assert_eq!(outcome.missing_required, vec![RequiredCheck::ExactCertificate]);
        assert_eq!(outcome.impact_tier, ImpactTier::Critical);
        assert_eq!(outcome.failure().map(|e| e.code), Some(ErrorCode::HighImpactLowConfidence));
    }

    #[tokio::test]
    async fn failed_execution_is_unverified() {
        let p = problem("solve x^2 - 4 = 0");
        let mut result = handmade(Value::roots("x", vec![2.0, -2.0]), Method::Solve, "symbolic");
        result.success = false;
        let outcome = Validator::new(Arc::new(BackendRegistry::with_defaults()), &EngineConfig::default())
            .validate(&p, &result, None)
            .await;
        assert!(!outcome.valid);
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.suggested_review);
    }

    #[tokio::test]
    async fn validation_is_deterministic() {
        let p = problem("solve x^3 - 6x^2 + 11x - 6 = 0");
        let result = handmade(Value::roots("x", vec![3.0, 2.0, 1.0]), Method::Solve, "symbolic");
        let validator = Validator::new(Arc::new(BackendRegistry::with_defaults()), &EngineConfig::default());
        let first = validator.validate(&p, &result, None).await;
        let second = validator.validate(&p, &result, None).await;
        assert_eq!(first, second);
    }
}
