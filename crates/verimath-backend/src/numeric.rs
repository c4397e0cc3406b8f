//! Floating-point backend: scanning root finder, elimination, Newton,
//! golden-section search and Simpson quadrature
//!
//! Deliberately shares no algorithm with the symbolic backend so that the
//! two can cross-check each other.

use crate::backend::{Backend, BackendRequest, Method};
use crate::error::BackendError;
use crate::linalg::{lu_solve, LinearSystem};
use nalgebra::{DMatrix, DVector};
use crate::symbolic::admissible;
use crate::value::{Sense, Value};
use std::collections::{BTreeMap, BTreeSet};
use verimath_expr::{central_difference, Expr, Relation, Statement, UniPoly};

const CAPABILITIES: &[Method] = &[
    Method::RootFind,
    Method::LinearSolve,
    Method::SolveSystem,
    Method::Optimize,
    Method::DefiniteIntegral,
    Method::Evaluate,
];

const SCAN_SAMPLES: usize = 4000;
const OPTIMIZE_SAMPLES: usize = 400;
const SIMPSON_PANELS: usize = 2000;
const DEFAULT_HALF_WIDTH: f64 = 10.0;
const NEWTON_ITERATIONS: usize = 100;

/// Numeric computation backend
#[derive(Debug, Clone)]
pub struct NumericBackend {
    name: String,
}

impl Default for NumericBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NumericBackend {
    /// Floating-point backend: bisection, Newton, LU and quadrature
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "numeric".to_string(),
        }
    }

    /// Same backend under a different registry key
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn root_find(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let f = req.working_expr()?;
        let (lo, hi) = search_interval(req, &f, var);
        let roots = scan_roots(&f, var, lo, hi, req)?;
        req.check_solution_count(roots.len())?;
        Ok(Value::roots(var, roots))
    }

    fn linear_solve(req: &BackendRequest) -> Result<Value, BackendError> {
        let system = LinearSystem::from_request(req)?;
        let x = system.lu_solve()?;
        Ok(Value::Assignment {
            values: system.variables.into_iter().zip(x).collect(),
        })
    }

    /// Newton's method with a finite-difference Jacobian from a few starting points
    fn solve_system(req: &BackendRequest) -> Result<Value, BackendError> {
        let residuals: Vec<Expr> = req.statements.iter().map(Statement::target).collect();
        let variables: Vec<String> = if req.variables.is_empty() {
            residuals
                .iter()
                .flat_map(Expr::variables)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            req.variables.clone()
        };
        if residuals.len() != variables.len() || residuals.is_empty() {
            return Err(BackendError::Singular(format!(
                "{} equations in {} unknowns",
                residuals.len(),
                variables.len()
            )));
        }

        for start in [0.5, 1.5, -1.0, 3.0] {
            let mut x = vec![start; variables.len()];
            if let Some(solution) = newton(&residuals, &variables, &mut x, req)? {
                return Ok(Value::Assignment {
                    values: variables.iter().cloned().zip(solution).collect(),
                });
            }
        }
        Err(BackendError::NonConvergence {
            iterations: NEWTON_ITERATIONS,
            detail: "newton iteration from every starting point".into(),
        })
    }

    /// Coarse scan, golden-section refinement, then bisection on the derivative sign
    fn optimize(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let sense = req
            .sense
            .ok_or_else(|| BackendError::MissingInput("optimisation sense".into()))?;
        let f = req.working_expr()?;
        let (lo, hi) = bounded_interval(req, var);

        let score = |x: f64| -> Option<f64> {
            let env = BTreeMap::from([(var.to_string(), x)]);
            match (f.eval(&env), admissible(req, &env)) {
                (Ok(v), Ok(true)) if v.is_finite() => Some(match sense {
                    Sense::Maximize => v,
                    Sense::Minimize => -v,
                }),
                _ => None,
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let step = (hi - lo) / OPTIMIZE_SAMPLES as f64;
        let mut best: Option<(usize, f64)> = None;
        for i in 0..=OPTIMIZE_SAMPLES {
            #[allow(clippy::cast_precision_loss)]
            let x = lo + step * i as f64;
            if let Some(s) = score(x) {
                if best.map_or(true, |(_, b)| s > b) {
                    best = Some((i, s));
                }
            }
        }
        let (index, _) = best.ok_or_else(|| BackendError::NoSolution(format!("{f} has no admissible value")))?;

        #[allow(clippy::cast_precision_loss)]
        let centre = lo + step * index as f64;
        let mut a = (centre - step).max(lo);
        let mut b = (centre + step).min(hi);
        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        for _ in 0..200 {
            if b - a <= 1e-7 * centre.abs().max(1.0) {
                break;
            }
            let c = b - ratio * (b - a);
            let d = a + ratio * (b - a);
            let (fc, fd) = (score(c).unwrap_or(f64::NEG_INFINITY), score(d).unwrap_or(f64::NEG_INFINITY));
            if fc >= fd {
                b = d;
            } else {
                a = c;
            }
        }

        let mut x = 0.5 * (a + b);
        let slope = |x: f64| central_difference(&f, var, x).unwrap_or(f64::NAN);
        let (mut sa, sb) = (slope(a), slope(b));
        if sa.is_finite() && sb.is_finite() && sa * sb < 0.0 {
            let (mut lo_b, mut hi_b) = (a, b);
            for _ in 0..100 {
                let mid = 0.5 * (lo_b + hi_b);
                let sm = slope(mid);
                if sm == 0.0 {
                    lo_b = mid;
                    hi_b = mid;
                    break;
                }
                if sm * sa > 0.0 {
                    lo_b = mid;
                    sa = sm;
                } else {
                    hi_b = mid;
                }
            }
            x = 0.5 * (lo_b + hi_b);
        }
        // boundary optima: golden section only approaches the endpoint
        for edge in [lo, hi] {
            if let (Some(se), sx) = (score(edge), score(x)) {
                if sx.map_or(true, |sx| se >= sx) {
                    x = edge;
                }
            }
        }

        let env = BTreeMap::from([(var.to_string(), x)]);
        let value = f.eval(&env)?;
        Ok(Value::Optimum {
            point: env,
            value,
            sense,
        })
    }

    /// Composite Simpson's rule
    fn definite_integral(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let (a, b) = req
            .interval
            .ok_or_else(|| BackendError::MissingInput("interval".into()))?;
        let f = req.working_expr()?;
        #[allow(clippy::cast_precision_loss)]
        let h = (b - a) / SIMPSON_PANELS as f64;
        let mut sum = f.eval_at(var, a)? + f.eval_at(var, b)?;
        for i in 1..SIMPSON_PANELS {
            #[allow(clippy::cast_precision_loss)]
            let x = a + h * i as f64;
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * f.eval_at(var, x)?;
        }
        let value = sum * h / 3.0;
        if !value.is_finite() {
            return Err(BackendError::NonConvergence {
                iterations: SIMPSON_PANELS,
                detail: "integrand is not finite on the interval".into(),
            });
        }
        Ok(Value::scalar(value))
    }
}

/// Interval for root scanning: explicit, Cauchy bound for polynomials, or a default window
fn search_interval(req: &BackendRequest, f: &Expr, var: &str) -> (f64, f64) {
    if let Some(interval) = req.interval {
        return interval;
    }
    match UniPoly::from_expr(f, var) {
        Ok(p) if p.degree() > 0 => {
            let lead = p.leading().abs();
            let c = p.coeffs();
            let bound = 1.0
                + c[..c.len() - 1]
                    .iter()
                    .map(|a| a.abs() / lead)
                    .fold(0.0, f64::max);
            (-bound, bound)
        }
        _ => (-DEFAULT_HALF_WIDTH, DEFAULT_HALF_WIDTH),
    }
}

/// Interval for optimisation: explicit, narrowed by bound constraints, or a default window
fn bounded_interval(req: &BackendRequest, var: &str) -> (f64, f64) {
    let (mut lo, mut hi) = req.interval.unwrap_or((-DEFAULT_HALF_WIDTH, DEFAULT_HALF_WIDTH));
    for c in &req.constraints {
        if let Some((name, relation, value)) = c.as_bound() {
            if name != var {
                continue;
            }
            match relation {
                Relation::Gt | Relation::Ge if req.interval.is_none() || value > lo => {
                    lo = value;
                    if req.interval.is_none() && hi <= lo {
                        hi = lo + 2.0 * DEFAULT_HALF_WIDTH;
                    }
                }
                Relation::Lt | Relation::Le if req.interval.is_none() || value < hi => {
                    hi = value;
                    if req.interval.is_none() && lo >= hi {
                        lo = hi - 2.0 * DEFAULT_HALF_WIDTH;
                    }
                }
                _ => {}
            }
        }
    }
    (lo, hi)
}

fn bisect(f: &dyn Fn(f64) -> f64, mut lo: f64, mut hi: f64) -> f64 {
    let mut f_lo = f(lo);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || (hi - lo) <= 1e-15 * mid.abs().max(1.0) {
            return mid;
        }
        if f_mid * f_lo > 0.0 {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Ternary search for a minimum of `|f|` inside a bracket
fn minimise_abs(f: &dyn Fn(f64) -> f64, mut lo: f64, mut hi: f64) -> f64 {
    for _ in 0..200 {
        let m1 = lo + (hi - lo) / 3.0;
        let m2 = hi - (hi - lo) / 3.0;
        if f(m1).abs() <= f(m2).abs() {
            hi = m2;
        } else {
            lo = m1;
        }
    }
    0.5 * (lo + hi)
}

/// Sign changes refined by bisection plus touching roots found at local minima of `|f|`
fn scan_roots(f: &Expr, var: &str, lo: f64, hi: f64, req: &BackendRequest) -> Result<Vec<f64>, BackendError> {
    let eval = |x: f64| f.eval_at(var, x).unwrap_or(f64::NAN);
    // evaluate once so unbound variables surface as errors instead of NaN
    f.eval_at(var, 0.5 * (lo + hi))?;

    #[allow(clippy::cast_precision_loss)]
    let step = (hi - lo) / SCAN_SAMPLES as f64;
    let xs: Vec<f64> = (0..=SCAN_SAMPLES)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f64;
            lo + step * i
        })
        .collect();
    let ys: Vec<f64> = xs.iter().map(|x| eval(*x)).collect();
    let tol = &req.tolerance;
    let accept = |x: f64| {
        let y = eval(x);
        y.is_finite() && y.abs() <= tol.absolute.sqrt() * x.abs().max(1.0)
    };

    let mut roots = Vec::new();
    for i in 0..SCAN_SAMPLES {
        let (y0, y1) = (ys[i], ys[i + 1]);
        if !(y0.is_finite() && y1.is_finite()) {
            continue;
        }
        if y0 == 0.0 {
            roots.push(xs[i]);
        } else if y0 * y1 < 0.0 {
            let r = bisect(&eval, xs[i], xs[i + 1]);
            // poles also change sign
            if accept(r) {
                roots.push(r);
            }
        } else if i > 0 && ys[i - 1].is_finite() {
            let (yp, yc, yn) = (ys[i - 1].abs(), y0.abs(), y1.abs());
            if yc <= yp && yc <= yn && ys[i - 1] * y0 > 0.0 {
                let r = minimise_abs(&eval, xs[i - 1], xs[i + 1]);
                if eval(r).abs() <= tol.absolute * r.abs().max(1.0) {
                    roots.push(r);
                }
            }
        }
    }
    if ys[SCAN_SAMPLES] == 0.0 {
        roots.push(xs[SCAN_SAMPLES]);
    }
    roots.retain(|r| {
        let env = BTreeMap::from([(var.to_string(), *r)]);
        req.constraints.iter().all(|c| c.holds(&env, tol).unwrap_or(false))
    });
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|a, b| (*a - *b).abs() <= 1e-7 * a.abs().max(1.0));
    Ok(roots)
}

fn newton(
    residuals: &[Expr],
    variables: &[String],
    x: &mut [f64],
    req: &BackendRequest,
) -> Result<Option<Vec<f64>>, BackendError> {
    let n = variables.len();
    let eval_all = |x: &[f64]| -> Result<Vec<f64>, BackendError> {
        let env: BTreeMap<String, f64> = variables.iter().cloned().zip(x.iter().copied()).collect();
        residuals.iter().map(|r| r.eval(&env).map_err(BackendError::from)).collect()
    };
    for _ in 0..NEWTON_ITERATIONS {
        let fx = eval_all(x)?;
        if fx.iter().any(|v| !v.is_finite()) {
            return Ok(None);
        }
        let norm = fx.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if norm <= req.tolerance.absolute {
            return Ok(Some(x.to_vec()));
        }
        let mut jacobian = DMatrix::<f64>::zeros(n, n);
        for j in 0..n {
            let h = 1e-7 * x[j].abs().max(1.0);
            let mut forward = x.to_vec();
            forward[j] += h;
            let mut backward = x.to_vec();
            backward[j] -= h;
            let (fp, fm) = (eval_all(&forward)?, eval_all(&backward)?);
            for i in 0..n {
                jacobian[(i, j)] = (fp[i] - fm[i]) / (2.0 * h);
            }
        }
        let neg = DVector::from_iterator(n, fx.iter().map(|v| -v));
        let Ok(delta) = lu_solve(jacobian, &neg) else {
            return Ok(None);
        };
        for (xi, di) in x.iter_mut().zip(delta) {
            *xi += di;
        }
    }
    Ok(None)
}

#[async_trait::async_trait]
impl Backend for NumericBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Method] {
        CAPABILITIES
    }

    fn can_handle(&self, req: &BackendRequest) -> bool {
        if !CAPABILITIES.contains(&req.method) {
            return false;
        }
        let univariate = || match (req.working_expr(), req.variable()) {
            (Ok(expr), Ok(var)) => expr.variables().iter().all(|v| v == var),
            _ => false,
        };
        match req.method {
            Method::RootFind | Method::Optimize => univariate(),
            Method::DefiniteIntegral => req.interval.is_some() && univariate(),
            Method::LinearSolve => LinearSystem::from_request(req).is_ok(),
            Method::SolveSystem => !req.statements.is_empty(),
            Method::Evaluate => req.working_expr().is_ok_and(|e| e.is_constant()),
            _ => true,
        }
    }

    async fn execute(&self, req: &BackendRequest) -> Result<Value, BackendError> {
        tracing::debug!(backend = %self.name, method = %req.method, "numeric execute");
        match req.method {
            Method::RootFind => Self::root_find(req),
            Method::LinearSolve => Self::linear_solve(req),
            Method::SolveSystem => Self::solve_system(req),
            Method::Optimize => Self::optimize(req),
            Method::DefiniteIntegral => Self::definite_integral(req),
            Method::Evaluate => Ok(Value::scalar(req.working_expr()?.eval(&BTreeMap::new())?)),
            other => Err(BackendError::Unsupported {
                backend: self.name.clone(),
                method: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use verimath_expr::{parse_constraint, parse_statement};

    fn request(method: Method, statement: &str, var: &str) -> BackendRequest {
        BackendRequest::new(method)
            .with_statement(parse_statement(statement).unwrap())
            .with_variable(var)
    }

    #[tokio::test]
    async fn root_scan_matches_closed_form() {
        let value = NumericBackend::new()
            .execute(&request(Method::RootFind, "x^2 - 4 = 0", "x"))
            .await
            .unwrap();
        assert_eq!(value.to_string(), "x = 2, x = -2");
    }

    #[tokio::test]
    async fn transcendental_roots_in_default_window() {
        let value = NumericBackend::new()
            .execute(&request(Method::RootFind, "cos(x) = x", "x"))
            .await
            .unwrap();
        let roots = value.solutions();
        assert_eq!(roots.len(), 1);
        assert!((roots[0]["x"] - 0.739_085_133_215_160_6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn poles_are_not_roots() {
        let value = NumericBackend::new()
            .execute(&request(Method::RootFind, "1/x = 0", "x"))
            .await
            .unwrap();
        assert_eq!(value.to_string(), "no real solutions");
    }

    #[tokio::test]
    async fn too_many_roots_is_a_resource_limit() {
        let req = request(Method::RootFind, "sin(x) = 0", "x").with_max_solutions(4);
        let err = NumericBackend::new().execute(&req).await.unwrap_err();
        assert_eq!(err, BackendError::ResourceLimit { found: 7, limit: 4 });
    }

    #[tokio::test]
    async fn golden_section_finds_maximum() {
        let req = request(Method::Optimize, "10d - d^2", "d").with_sense(Some(Sense::Maximize));
        let value = NumericBackend::new().execute(&req).await.unwrap();
        assert_eq!(value.to_string(), "d = 5, maximum = 25");
    }

    #[tokio::test]
    async fn optimisation_respects_bounds() {
        let req = request(Method::Optimize, "x^2", "x")
            .with_sense(Some(Sense::Minimize))
            .with_constraints(vec![parse_constraint("x >= 1").unwrap()]);
        let value = NumericBackend::new().execute(&req).await.unwrap();
        assert_eq!(value.to_string(), "x = 1, minimum = 1");
    }

    #[tokio::test]
    async fn simpson_integrates_cubic_exactly() {
        let req = request(Method::DefiniteIntegral, "x^3", "x").with_interval(Some((0.0, 2.0)));
        let v = NumericBackend::new().execute(&req).await.unwrap().as_scalar().unwrap();
        assert!((v - 4.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn newton_solves_nonlinear_system() {
        let req = BackendRequest::new(Method::SolveSystem).with_statements(vec![
            parse_statement("x^2 + y^2 = 5").unwrap(),
            parse_statement("x - y = 1").unwrap(),
        ]);
        let value = NumericBackend::new().execute(&req).await.unwrap();
        for env in value.solutions() {
            assert!((env["x"].powi(2) + env["y"].powi(2) - 5.0).abs() < 1e-8);
            assert!((env["x"] - env["y"] - 1.0).abs() < 1e-8);
        }
    }

    #[tokio::test]
    async fn gaussian_elimination() {
        let req = BackendRequest::new(Method::LinearSolve).with_statements(vec![
            parse_statement("2x + y = 5").unwrap(),
            parse_statement("x - y = 1").unwrap(),
        ]);
        let value = NumericBackend::new().execute(&req).await.unwrap();
        assert_eq!(value.to_string(), "x = 2, y = 1");
    }
}
